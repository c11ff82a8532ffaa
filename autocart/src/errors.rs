use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AutomationError {
    #[error("Stale element reference: {0}")]
    StaleElement(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("Platform-specific error: {0}")]
    PlatformError(String),

    #[error("Automation already running")]
    AlreadyRunning,

    #[error("Engine rejected command: {0}")]
    Rejected(String),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of the host <-> engine control channel.
///
/// `Unreachable` and `Timeout` are kept apart so the host can tell "nothing is
/// listening" from "something is listening but did not answer in time".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("engine unreachable: {0}")]
    Unreachable(String),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("channel closed")]
    Closed,

    #[error("protocol violation: {0}")]
    Protocol(String),
}
