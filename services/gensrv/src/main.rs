//! Genset controller bridge service

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use common::service_bootstrap::{self, ServiceInfo};
use common::wait_for_shutdown;
use errors::{ServiceError, ServiceResult};

use gensrv::bootstrap::{self, Args};
use gensrv::command::run_command_loop;
use gensrv::mqtt::run_event_loop;
use gensrv::{
    CommandDispatcher, ModbusTransport, MqttBridge, PollEngine, RegisterLayout, RegisterTransport,
    ServiceConfig,
};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("gensrv failed: {}", e);
            eprintln!("gensrv: {}", e);
            ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1))
        },
    }
}

async fn run() -> ServiceResult<()> {
    service_bootstrap::load_development_env();
    let args = Args::parse();
    let service_info = ServiceInfo::new(
        "gensrv",
        env!("CARGO_PKG_VERSION"),
        "Genset Controller Bridge - Modbus to MQTT",
    );

    // Without an explicit path a missing default file means built-in defaults
    let explicit =
        args.config.is_some() || std::env::var_os(service_info.config_env_var()).is_some();
    let config_path = service_bootstrap::get_config_path(&service_info, args.config.clone());
    let config = if explicit || config_path.exists() {
        ServiceConfig::load(Some(&config_path))?
    } else {
        ServiceConfig::load(None)?
    };

    bootstrap::initialize_logging(&args, &service_info, &config)?;
    if !args.no_color {
        service_bootstrap::print_startup_banner(&service_info);
    }
    if explicit || config_path.exists() {
        info!("Configuration loaded from {}", config_path.display());
    } else {
        warn!(
            "No configuration file at {}, using defaults and environment",
            config_path.display()
        );
    }

    let layout = Arc::new(RegisterLayout::load(&config.layout_file)?);
    info!(
        "Register layout v{} loaded from {}",
        layout.version,
        config.layout_file.display()
    );

    if args.validate {
        bootstrap::validate_configuration(&config, &layout);
        info!("Validation completed successfully");
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let transport: Arc<dyn RegisterTransport> =
        Arc::new(ModbusTransport::new(config.transport.clone()));
    let (bridge, eventloop) = MqttBridge::new(&config.mqtt);
    let bridge = Arc::new(bridge);

    let (command_tx, command_rx) = mpsc::channel(config.commands.channel_capacity.max(1));
    let dispatcher = Arc::new(CommandDispatcher::new(
        Arc::clone(&layout),
        Arc::clone(&transport),
        config.cooldown(),
    ));

    let mqtt_task = tokio::spawn(run_event_loop(
        eventloop,
        Arc::clone(&bridge),
        Arc::clone(&layout),
        command_tx,
        cancel.clone(),
    ));
    let command_task = tokio::spawn(run_command_loop(command_rx, dispatcher, cancel.clone()));
    let engine = PollEngine::new(Arc::clone(&layout), transport, bridge);
    let poll_task = tokio::spawn(engine.run(config.poll_interval(), cancel.clone()));

    info!("{} started", service_info.name);
    wait_for_shutdown().await;
    cancel.cancel();

    let stats = poll_task
        .await
        .map_err(|e| ServiceError::Internal(format!("poll task: {}", e)))?;
    if let Err(e) = command_task.await {
        warn!("Command task ended abnormally: {}", e);
    }
    if let Err(e) = mqtt_task.await {
        warn!("MQTT task ended abnormally: {}", e);
    }

    info!(
        "{} stopped after {} poll cycles ({} published)",
        service_info.name, stats.cycles, stats.published
    );
    Ok(())
}
