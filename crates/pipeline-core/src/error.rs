use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for pipeline operations
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration rejected at construction time
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Endpoint binding rejected: duplicate interface or incompatible
    /// protocol pairing. The slot is unaffected.
    #[error("slot error: {0}")]
    SlotError(String),

    /// Endpoint URI could not be parsed
    #[error("invalid endpoint uri: {0}")]
    InvalidUri(String),

    /// Referenced slot does not exist
    #[error("unknown slot: {0}")]
    UnknownSlot(u64),

    /// The control task queue was full
    #[error("task queue full")]
    TaskQueueFull,

    /// The pipeline loop went away while a task was pending
    #[error("pipeline terminated")]
    PipelineTerminated,

    /// Error from the audio layer
    #[error(transparent)]
    Audio(#[from] audiolink_audio_core::AudioError),

    /// Error from the packet layer
    #[error(transparent)]
    Packet(#[from] audiolink_packet_core::Error),

    /// Socket-level failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
