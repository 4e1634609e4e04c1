use thiserror::Error;

/// Failures on the radio side of the relay.
///
/// None of these stop the process: the link state machine either drops a
/// single notification or tears the session down and scans again.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LinkError {
    #[error("bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(String),

    #[error("discovery failed: {0}")]
    DiscoveryFailure(String),

    #[error("malformed characteristic value: expected at least 4 bytes, got {len}")]
    MalformedValue { len: usize },

    #[error("link lost: {0}")]
    LinkLost(String),
}

/// Failures talking to the telemetry sink. Never retried automatically.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink answered 400: every field was absent or falsy.
    #[error("sink rejected reading: {0}")]
    Rejected(String),

    #[error("sink answered with unexpected status {status}: {message}")]
    UnexpectedStatus { status: u16, message: String },

    #[error("sink request failed: {0}")]
    Http(#[from] reqwest::Error),
}
