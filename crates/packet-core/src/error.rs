use thiserror::Error;

/// Result type for packet operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for packet operations
#[derive(Debug, Error)]
pub enum Error {
    /// Buffer too small for the requested parse or compose
    #[error("buffer too small: required {required} bytes, available {available}")]
    BufferTooSmall {
        required: usize,
        available: usize,
    },

    /// Packet failed header parsing and was dropped
    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    /// The stream violated a protocol invariant and the session must die
    #[error("session fatal: {0}")]
    SessionFatal(String),

    /// A pool ran out of buffers; the packet is dropped, the pipeline continues
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Configuration rejected at construction time
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Queue refused the packet (bounded queue full)
    #[error("queue full: capacity {0}")]
    QueueFull(usize),
}

impl Error {
    /// True for errors that are swallowed with a counter instead of
    /// propagating up the pipeline.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::MalformedPacket(_) | Error::ResourceExhausted(_) | Error::QueueFull(_)
        )
    }
}
