use airtank_core::{Clock, CompressorController, CompressorIo};
use airtank_io::metrics::{init_metrics, record_snapshot};
use airtank_io::{TelemetryError, TelemetryServer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

pub fn init() {
    init_metrics();
}

pub fn bind_server(addr: Option<&str>) -> Result<Option<TelemetryServer>, TelemetryError> {
    addr.map(|addr| {
        info!(addr = %addr, "starting telemetry server");
        TelemetryServer::bind(addr)
    })
    .transpose()
}

/// Serve telemetry until `stop` is raised; returns immediately without a
/// server.
pub async fn serve<IO, C>(
    server: Option<TelemetryServer>,
    controller: Arc<CompressorController<IO, C>>,
    stop: Arc<AtomicBool>,
) where
    IO: CompressorIo,
    C: Clock,
{
    if let Some(server) = server {
        server.serve(controller, stop).await;
    }
}

/// Refresh the Prometheus gauges once per poll interval.
pub async fn refresh_metrics<IO, C>(controller: Arc<CompressorController<IO, C>>, stop: Arc<AtomicBool>)
where
    IO: CompressorIo,
    C: Clock,
{
    while !stop.load(Ordering::Relaxed) {
        record_snapshot(&controller.snapshot());
        let poll = controller.config().read().poll_interval();
        tokio::time::sleep(poll).await;
    }
}
