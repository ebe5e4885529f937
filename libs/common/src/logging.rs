//! Logging setup shared by all services
//!
//! Console output and the optional daily log file use the same
//! `timestamp [LEVEL] message` line format.

use std::path::PathBuf;
use std::sync::OnceLock;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Custom format for log level with brackets: `[INFO]`, `[WARN]`, etc.
fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// Event formatter that outputs: `timestamp [LEVEL] message`
///
/// Example output: `2025-12-02T00:50:44.809000Z [INFO] Poll loop started`
struct BracketedLevelFormat;

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(writer, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::TRACE => "\x1b[35m",
                Level::DEBUG => "\x1b[34m",
                Level::INFO => "\x1b[32m",
                Level::WARN => "\x1b[33m",
                Level::ERROR => "\x1b[31m",
            };
            write!(writer, "{}{}\x1b[0m ", color, format_level(&level))?;
        } else {
            write!(writer, "{} ", format_level(&level))?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

// Keeps the non-blocking file writer alive for the process lifetime
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Logger configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Service name, used as the default filter target and file prefix
    pub service_name: String,
    /// Directory for log files; `None` disables file output
    pub log_dir: Option<PathBuf>,
    /// Level used when neither `RUST_LOG` nor an explicit filter is given
    pub console_level: Level,
    /// Explicit filter directive (e.g. `"info,gensrv=trace"`), overrides `console_level`
    pub filter: Option<String>,
    /// Write the file layer as JSON lines
    pub enable_json: bool,
    /// Daily files kept before the oldest is removed
    pub max_log_files: usize,
    /// Colour the console output
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".to_string(),
            log_dir: None,
            console_level: Level::INFO,
            filter: None,
            enable_json: false,
            max_log_files: 14,
            ansi: true,
        }
    }
}

impl LogConfig {
    /// Filter directive in effect: explicit filter > `RUST_LOG` > service default
    pub fn filter_directive(&self) -> String {
        if let Some(filter) = &self.filter {
            return filter.clone();
        }
        if let Ok(env_str) = std::env::var("RUST_LOG") {
            if !env_str.trim().is_empty() {
                return env_str;
            }
        }
        let level = self.console_level.as_str().to_lowercase();
        if self.console_level < Level::DEBUG {
            format!("{},{}=debug", level, self.service_name)
        } else {
            level
        }
    }
}

/// Initialize the global subscriber
///
/// Fails if a global subscriber is already installed or the log directory
/// cannot be created.
pub fn init_with_config(config: LogConfig) -> anyhow::Result<()> {
    let directive = config.filter_directive();
    let env_filter = EnvFilter::try_new(&directive)
        .map_err(|e| anyhow::anyhow!("invalid log filter '{}': {}", directive, e))?;

    let console_layer = fmt::layer()
        .with_ansi(config.ansi)
        .event_format(BracketedLevelFormat)
        .boxed();

    let file_layer = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(config.service_name.as_str())
                .filename_suffix("log")
                .max_log_files(config.max_log_files.max(1))
                .build(dir)?;
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);

            let layer = if config.enable_json {
                fmt::layer()
                    .json()
                    .with_writer(non_blocking)
                    .with_target(true)
                    .boxed()
            } else {
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .event_format(BracketedLevelFormat)
                    .boxed()
            };
            Some(layer)
        },
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    match &config.log_dir {
        Some(dir) => tracing::info!("Logging: {} @ {:?}", config.service_name, dir),
        None => tracing::debug!("Logging: {} (console only)", config.service_name),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_level() {
        assert_eq!(format_level(&Level::WARN), "[WARN]");
        assert_eq!(format_level(&Level::ERROR), "[ERROR]");
    }

    #[test]
    fn test_explicit_filter_wins() {
        let config = LogConfig {
            service_name: "gensrv".into(),
            filter: Some("warn,gensrv=trace".into()),
            ..Default::default()
        };
        assert_eq!(config.filter_directive(), "warn,gensrv=trace");
    }

    #[test]
    fn test_default_directive_raises_service_target() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = LogConfig {
            service_name: "gensrv".into(),
            console_level: Level::INFO,
            ..Default::default()
        };
        assert_eq!(config.filter_directive(), "info,gensrv=debug");

        let config = LogConfig {
            service_name: "gensrv".into(),
            console_level: Level::TRACE,
            ..Default::default()
        };
        assert_eq!(config.filter_directive(), "trace");
    }
}
