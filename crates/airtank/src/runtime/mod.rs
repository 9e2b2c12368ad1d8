mod app;
mod config;
mod logging;
mod telemetry;

pub use app::{run, run_from_args, RuntimeError};
pub use config::RuntimeConfig;
