//! Read-only HTTP telemetry.
//!
//! The server socket is polled with `try_recv` from an async task so it runs
//! on the same scheduler as the control tick in cooperative mode. Log exports
//! follow the controller's [`ExportPolicy`](airtank_core::ExportPolicy).

use crate::metrics;
use crate::protocol::{activity_logs_document, state_logs_document, StatusMsg};
use airtank_core::{Clock, CompressorController, CompressorIo, ExportError, Timestamp};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tiny_http::{Header, Request, Response, Server};

const IDLE_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("cannot bind telemetry server on {addr}: {reason}")]
    Bind { addr: String, reason: String },
    #[error("log export failed: {0}")]
    Export(#[from] ExportError),
    #[error("metrics encoding failed: {0}")]
    Metrics(#[from] prometheus::Error),
    #[error("status encoding failed: {0}")]
    Status(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Metrics,
    Health,
    Ready,
    Status,
    ActivityLogs { since: Timestamp },
    StateLogs { since: Timestamp },
    BadRequest,
    NotFound,
}

impl Route {
    /// Map a request URL (path plus optional query) to a route. A missing
    /// `since` means the whole log.
    pub fn parse(url: &str) -> Self {
        let (path, query) = url.split_once('?').unwrap_or((url, ""));
        match path {
            "/metrics" => Route::Metrics,
            "/health" => Route::Health,
            "/ready" => Route::Ready,
            "/status" => Route::Status,
            "/activity_logs" => match parse_since(query) {
                Some(since) => Route::ActivityLogs { since },
                None => Route::BadRequest,
            },
            "/state_logs" => match parse_since(query) {
                Some(since) => Route::StateLogs { since },
                None => Route::BadRequest,
            },
            _ => Route::NotFound,
        }
    }
}

fn parse_since(query: &str) -> Option<Timestamp> {
    let value = query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "since")
        .map(|(_, value)| value);
    match value {
        None | Some("") => Some(0),
        Some(value) => value.parse().ok(),
    }
}

/// A rendered response body with its status and content type.
#[derive(Debug)]
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Reply {
    fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            body: body.as_bytes().to_vec(),
        }
    }

    fn json(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            content_type: "application/json",
            body,
        }
    }
}

/// Produce the reply for `route` against a live controller.
pub async fn render<IO, C>(
    controller: &CompressorController<IO, C>,
    route: Route,
) -> Result<Reply, TelemetryError>
where
    IO: CompressorIo,
    C: Clock,
{
    let policy = controller.mode().export_policy();
    let reply = match route {
        Route::Metrics => {
            metrics::record_snapshot(&controller.snapshot());
            Reply {
                status: 200,
                content_type: "text/plain; version=0.0.4",
                body: metrics::render()?,
            }
        }
        Route::Health => Reply::text(200, "OK"),
        Route::Ready => {
            if controller.snapshot().tick_count > 0 {
                Reply::text(200, "Ready")
            } else {
                Reply::text(503, "Not Ready")
            }
        }
        Route::Status => {
            let view = controller.snapshot();
            metrics::record_snapshot(&view);
            Reply::json(serde_json::to_vec(&StatusMsg::new(&view))?)
        }
        Route::ActivityLogs { since } => Reply::json(
            activity_logs_document(
                controller.event_log(),
                controller.command_log(),
                controller.clock().now(),
                since,
                policy,
            )
            .await?,
        ),
        Route::StateLogs { since } => {
            let interval = controller.config().read().log_interval_secs;
            Reply::json(
                state_logs_document(
                    controller.state_log(),
                    controller.clock().now(),
                    since,
                    interval,
                    policy,
                )
                .await?,
            )
        }
        Route::BadRequest => Reply::text(400, "Bad Request"),
        Route::NotFound => Reply::text(404, "Not Found"),
    };
    Ok(reply)
}

pub struct TelemetryServer {
    server: Server,
    addr: String,
}

impl TelemetryServer {
    pub fn bind(addr: &str) -> Result<Self, TelemetryError> {
        let server = Server::http(addr).map_err(|e| TelemetryError::Bind {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;
        let addr = server
            .server_addr()
            .to_ip()
            .map(|a| a.to_string())
            .unwrap_or_else(|| addr.to_string());
        tracing::info!(addr = %addr, "telemetry listening");
        Ok(Self { server, addr })
    }

    /// Bound address, with the real port when bound to port 0.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Answer requests until `stop` is raised.
    pub async fn serve<IO, C>(self, controller: Arc<CompressorController<IO, C>>, stop: Arc<AtomicBool>)
    where
        IO: CompressorIo,
        C: Clock,
    {
        while !stop.load(Ordering::Relaxed) {
            match self.server.try_recv() {
                Ok(Some(request)) => handle(&controller, request).await,
                Ok(None) => tokio::time::sleep(IDLE_POLL).await,
                Err(err) => {
                    tracing::error!(error = %err, "telemetry socket failed");
                    break;
                }
            }
        }
        tracing::debug!("telemetry server stopped");
    }
}

async fn handle<IO, C>(controller: &CompressorController<IO, C>, request: Request)
where
    IO: CompressorIo,
    C: Clock,
{
    let route = Route::parse(request.url());
    let reply = match render(controller, route).await {
        Ok(reply) => reply,
        Err(err) => {
            tracing::warn!(url = %request.url(), error = %err, "telemetry request failed");
            Reply::text(500, "Internal Server Error")
        }
    };
    tracing::debug!(url = %request.url(), status = reply.status, bytes = reply.body.len(), "telemetry");

    let mut response = Response::from_data(reply.body).with_status_code(reply.status);
    if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], reply.content_type.as_bytes()) {
        response = response.with_header(header);
    }
    if let Err(err) = request.respond(response) {
        tracing::debug!(error = %err, "telemetry client went away");
    }
}
