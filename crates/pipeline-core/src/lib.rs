//! # Pipeline core for the AudioLink streaming toolkit
//!
//! The receiver pipeline: per-SSRC sessions composing the packet and
//! frame chains, session groups demultiplexing and mixing them, slots
//! binding endpoints, and the pipeline loop interleaving control tasks
//! with frame reads.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use audiolink_pipeline_core::{Receiver, ReceiverConfig, Interface};
//! use audiolink_packet_core::rtp::EncodingMap;
//!
//! let receiver = Receiver::new(ReceiverConfig::default(), EncodingMap::new())?;
//! let slot = receiver.create_slot()?;
//! let writer = receiver.add_endpoint(
//!     slot,
//!     Interface::AudioSource,
//!     "rtp+rs8m://0.0.0.0:10001".parse()?,
//! )?;
//! // Hand `writer` to the network layer, then pull frames:
//! let mut frame = audiolink_audio_core::Frame::new();
//! receiver.read(&mut frame, 512)?;
//! ```

pub mod error;
pub mod config;
pub mod endpoint;
pub mod session;
pub mod session_group;
pub mod slot;
pub mod source;
pub mod pipeline_loop;
pub mod net;

pub use config::{Interface, ReceiverConfig, SessionConfig, SlotMetrics};
pub use endpoint::{EndpointUri, IngressWriter, Protocol};
pub use error::{Error, Result};
pub use pipeline_loop::{NoopScheduler, Receiver, TaskScheduler};
pub use session::{Session, SessionMetrics, SessionState};
pub use session_group::SessionGroup;
pub use slot::{ReceiverSlot, SlotId};
pub use source::ReceiverSource;
