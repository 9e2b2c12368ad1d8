pub mod metrics;
pub mod protocol;
pub mod telemetry;

pub use metrics::{init_metrics, record_snapshot};
pub use protocol::{activity_logs_document, state_logs_document, ProtocolVersion, StatusMsg};
pub use telemetry::{Route, TelemetryError, TelemetryServer};
