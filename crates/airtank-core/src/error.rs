use thiserror::Error;

/// Errors raised while loading or validating controller configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unknown config key: {0}")]
    UnknownKey(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Precondition violations on the public control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("A purge is already pending or open")]
    PurgeInProgress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegressionError {
    #[error("Need at least two distinct x values, got {samples} sample(s)")]
    Degenerate { samples: usize },
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Failed to write export: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WatchdogError {
    #[error("Watchdog is not armed")]
    NotArmed,

    #[error("Watchdog is already armed")]
    AlreadyArmed,

    #[error("Watchdog has expired")]
    Expired,

    #[error("Invalid watchdog timeout: {0}")]
    InvalidTimeout(String),
}
