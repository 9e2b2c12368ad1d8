use crate::runtime::config::RuntimeConfig;
use crate::runtime::logging::init_tracing;
use crate::runtime::telemetry;
use airtank_core::{
    run_cooperative, run_purge_driver, spawn_preemptive, CompressorController, ConfigError,
    ControllerConfig, LoopStats, SchedulingMode, SharedConfig, SimulatedCompressor,
    SoftwareWatchdog, SystemClock, WatchdogError,
};
use airtank_io::TelemetryError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

type Controller = CompressorController<SimulatedCompressor, SystemClock>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("telemetry: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("watchdog: {0}")]
    Watchdog(#[from] WatchdogError),
    #[error("runtime: {0}")]
    Io(#[from] std::io::Error),
    #[error("compressor tick thread panicked")]
    TickPanicked,
}

pub fn run_from_args() -> Result<(), RuntimeError> {
    let config = RuntimeConfig::from_env()?;
    if config.show_help {
        RuntimeConfig::print_help();
        return Ok(());
    }
    run(config)
}

pub fn run(config: RuntimeConfig) -> Result<(), RuntimeError> {
    let _log_guard = init_tracing(config.json_logs, config.log_dir.as_deref());

    let settings = match &config.config_path {
        Some(path) => {
            info!(path = %path.display(), "loading settings");
            ControllerConfig::load(path)?
        }
        None => ControllerConfig::default(),
    };
    let io = SimulatedCompressor::new(settings.tank_sensor, Some(settings.line_sensor));
    let shared = SharedConfig::new(settings);

    // Cooperative mode keeps the controller on this thread for its whole life.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let stats = runtime.block_on(async {
        let controller = Arc::new(CompressorController::new(
            io,
            shared,
            SystemClock::new(),
            config.mode,
        ));
        supervise(&config, controller).await
    })?;

    info!(
        ticks = stats.ticks_executed,
        overruns = stats.overruns,
        max_tick_us = stats.max_tick_us,
        pressure_change_faults = stats.pressure_change_faults,
        "run complete"
    );
    Ok(())
}

async fn supervise(config: &RuntimeConfig, controller: Arc<Controller>) -> Result<LoopStats, RuntimeError> {
    telemetry::init();
    let server = telemetry::bind_server(config.telemetry_addr.as_deref())?;
    let stop = Arc::new(AtomicBool::new(false));

    controller.power_up();
    info!(mode = ?config.mode, "airtank running");

    let background = async {
        tokio::join!(
            run_purge_driver(Arc::clone(&controller), Arc::clone(&stop)),
            telemetry::serve(server, Arc::clone(&controller), Arc::clone(&stop)),
            telemetry::refresh_metrics(Arc::clone(&controller), Arc::clone(&stop)),
            wait_for_stop(config.run_seconds, Arc::clone(&stop)),
        );
    };

    match config.mode {
        SchedulingMode::Cooperative => {
            let (stats, ()) = tokio::join!(
                run_cooperative(Arc::clone(&controller), Arc::clone(&stop)),
                background
            );
            Ok(stats)
        }
        SchedulingMode::Preemptive => {
            let timeout = controller.config().read().watchdog_timeout();
            let watchdog = SoftwareWatchdog::new(timeout)?;
            let handle = spawn_preemptive(Arc::clone(&controller), watchdog, Arc::clone(&stop))?;
            background.await;
            join_tick(handle)
        }
    }
}

async fn wait_for_stop(run_seconds: Option<u64>, stop: Arc<AtomicBool>) {
    match run_seconds {
        Some(seconds) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
                _ = tokio::signal::ctrl_c() => warn!("interrupted"),
            }
        }
        None => {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(error = %err, "cannot listen for ctrl-c; stopping");
            }
        }
    }
    info!("stopping");
    stop.store(true, Ordering::Relaxed);
}

fn join_tick(handle: JoinHandle<LoopStats>) -> Result<LoopStats, RuntimeError> {
    handle.join().map_err(|_| {
        error!("compressor tick thread panicked");
        RuntimeError::TickPanicked
    })
}
