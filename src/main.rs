use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use ir_bridge::bridge::{Bridge, BridgeServices};
use ir_bridge::config::{BridgeConfig, CliArgs};
use ir_bridge::dispatch::{Dispatcher, IrccTransport};
use ir_bridge::input::{Script, SourceSpec};
use ir_bridge::mapping::KeyMapper;
use ir_bridge::mqtt::MqttHandle;
use ir_bridge::telemetry::{NullSink, Telemetry, TelemetrySink};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let args = CliArgs::parse();
    let config = BridgeConfig::load(&args).map_err(|e| eyre!("Configuration error: {}", e))?;
    setup_logging(&config);

    info!("Starting ir-bridge {}", env!("CARGO_PKG_VERSION"));
    info!("TV: {}", config.device_address);
    info!("Input: {}", config.input_device_path.display());
    info!(
        "Debounce: {}ms, hold timeout: {}ms, retries: {} x {}s",
        config.debounce_window_ms,
        config.hold_timeout_ms,
        config.retry_count,
        config.retry_delay_seconds
    );

    let mapper = KeyMapper::with_overrides(&config.mapping)?;
    let transport = IrccTransport::new(
        &config.device_address,
        config.auth_secret.clone(),
        config.request_timeout(),
    )?;
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(transport),
        config.dispatch_settings(),
    ));
    let telemetry = Arc::new(Telemetry::new(config.degraded_threshold));
    let source_spec = source_spec(&config)?;

    let (control_tx, control_rx) = mpsc::channel(16);
    let mqtt = config
        .mqtt_config()
        .map(|mqtt| MqttHandle::spawn(mqtt, telemetry.clone(), control_tx.clone()));
    let sink: Arc<dyn TelemetrySink> = match &mqtt {
        Some(handle) => handle.sink(),
        None => {
            info!("No MQTT broker configured, telemetry is logged only");
            Arc::new(NullSink)
        }
    };

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let services = BridgeServices {
        dispatcher,
        telemetry,
        sink,
        device_address: config.device_address.clone(),
    };
    let bridge = Bridge::create(
        source_spec,
        mapper,
        config.debounce_settings(),
        services,
        control_rx,
    );

    let running = match bridge.start().await {
        Ok(running) => running,
        Err(e) => {
            error!("Bridge failed to start: {}", e);
            if let Some(mqtt) = mqtt {
                mqtt.shutdown().await;
            }
            return Err(eyre!("Bridge failed to start: {}", e));
        }
    };

    let reason = running.run_until_stopped(shutdown).await.shutdown().await;

    if let Some(mqtt) = mqtt {
        mqtt.shutdown().await;
    }
    info!("ir-bridge exited ({:?})", reason);
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    Ok(())
}

fn setup_logging(config: &BridgeConfig) {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_filter()));

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

fn source_spec(config: &BridgeConfig) -> Result<SourceSpec> {
    if let Some(path) = &config.script {
        let script = Script::load(path)?;
        info!("Replaying {} scripted events from {}", script.events.len(), path.display());
        return Ok(SourceSpec::Scripted(script));
    }
    if config.simulate {
        warn!("Simulation mode: no input device will be opened");
        return Ok(SourceSpec::Idle);
    }
    Ok(SourceSpec::device(
        &config.input_device_path,
        &config.input_device_name,
        config.require_hardware,
    ))
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received");
        shutdown.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!("SIGTERM handler unavailable: {}", e);
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
    }
}
