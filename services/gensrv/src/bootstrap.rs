//! Service bootstrap: command line, logging and validation mode

use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use common::logging::{self, LogConfig};
use common::service_bootstrap::ServiceInfo;
use errors::{ServiceError, ServiceResult};

use crate::config::ServiceConfig;
use crate::layout::RegisterLayout;

/// Command-line arguments for gensrv
#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "gensrv",
    version = env!("CARGO_PKG_VERSION"),
    about = "Genset controller bridge: Modbus registers to MQTT",
    long_about = None
)]
pub struct Args {
    /// Service configuration file (YAML)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Log level or filter directive, overrides the configuration
    #[arg(short = 'l', long)]
    pub log_level: Option<String>,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Validation mode - only validate configuration and layout without starting
    #[arg(long)]
    pub validate: bool,
}

/// Build the logger configuration
///
/// Filter priority: `--log-level` > `logging.level` > `RUST_LOG` > service default.
pub fn log_config(args: &Args, service: &ServiceInfo, config: &ServiceConfig) -> LogConfig {
    LogConfig {
        service_name: service.name.clone(),
        log_dir: config.logging.dir.clone(),
        filter: args
            .log_level
            .clone()
            .or_else(|| config.logging.level.clone()),
        enable_json: config.logging.json,
        max_log_files: config.logging.max_files,
        ansi: !args.no_color,
        ..LogConfig::default()
    }
}

pub fn initialize_logging(
    args: &Args,
    service: &ServiceInfo,
    config: &ServiceConfig,
) -> ServiceResult<()> {
    logging::init_with_config(log_config(args, service, config))
        .map_err(|e| ServiceError::StartupFailed(format!("logging: {}", e)))
}

/// Log what would run, for `--validate`
pub fn validate_configuration(config: &ServiceConfig, layout: &RegisterLayout) {
    info!("Service: {}", config.service.name);
    info!(
        "Transport: {} (slave {}, timeout {}ms)",
        config.transport.endpoint(),
        config.transport.slave_id,
        config.transport.timeout_ms
    );
    info!(
        "MQTT: {}:{} base topic '{}'",
        config.mqtt.host, config.mqtt.port, config.mqtt.base_topic
    );
    info!(
        "Layout v{} ({}): {} block(s), {} measurements, {} counters",
        layout.version,
        layout.device,
        layout.blocks.len(),
        layout.measurements.len(),
        layout.counters.len()
    );
    for block in &layout.blocks {
        info!("  Block {}: {} registers at {}", block.name, block.count, block.start);
    }
    info!(
        "  {} alarm bits, {} status bits",
        layout.alarms.len(),
        layout.status.len()
    );
    let enabled: Vec<&str> = layout
        .enabled_commands()
        .map(|c| c.identifier.as_str())
        .collect();
    info!(
        "  {} of {} commands enabled: {}",
        enabled.len(),
        layout.commands.len(),
        enabled.join(", ")
    );
    info!(
        "Poll interval {}ms, command cooldown {}ms",
        config.service.poll_interval_ms, config.commands.cooldown_ms
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::default_layout;
    use tracing_test::traced_test;

    fn service() -> ServiceInfo {
        ServiceInfo::new("gensrv", "0.1.0", "test")
    }

    #[test]
    fn test_cli_level_wins_over_config() {
        let mut config = ServiceConfig::default();
        config.logging.level = Some("warn".into());
        let args = Args {
            log_level: Some("trace".into()),
            no_color: true,
            ..Args::default()
        };
        let log = log_config(&args, &service(), &config);
        assert_eq!(log.filter.as_deref(), Some("trace"));
        assert!(!log.ansi);

        let log = log_config(&Args::default(), &service(), &config);
        assert_eq!(log.filter.as_deref(), Some("warn"));
        assert_eq!(log.service_name, "gensrv");
    }

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from(["gensrv", "-c", "/etc/gensrv.yaml", "--validate"]);
        assert_eq!(args.config, Some(PathBuf::from("/etc/gensrv.yaml")));
        assert!(args.validate);
        assert!(args.log_level.is_none());
    }

    #[test]
    #[traced_test]
    fn test_validation_summary_lists_commands() {
        validate_configuration(&ServiceConfig::default(), &default_layout());
        assert!(logs_contain("6 of 8 commands enabled"));
        assert!(logs_contain("Block alarms: 16 registers at 1000"));
    }
}
