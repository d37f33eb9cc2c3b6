use thiserror::Error;

/// Result type for audio operations
pub type AudioResult<T> = std::result::Result<T, AudioError>;

/// Error types for audio operations
#[derive(Debug, Error)]
pub enum AudioError {
    /// Configuration rejected at construction time
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Frame or spec mismatch between pipeline stages
    #[error("format mismatch: {0}")]
    FormatMismatch(String),

    /// No mapping exists between two channel sets
    #[error("unsupported channel mapping: {0}")]
    UnsupportedMapping(String),

    /// Watchdog declared the session dead
    #[error("session timed out: {0}")]
    SessionTimeout(String),

    /// Latency left the configured hard bounds
    #[error("latency out of bounds: {0}")]
    LatencyOutOfBounds(String),

    /// Upstream packet pipeline failed fatally
    #[error("packet pipeline failed: {0}")]
    PacketPipeline(#[from] audiolink_packet_core::Error),
}

impl AudioError {
    /// True for errors that terminate the owning session but leave the
    /// rest of the receiver intact.
    pub fn is_session_fatal(&self) -> bool {
        !matches!(self, AudioError::InvalidConfig(_))
    }
}
