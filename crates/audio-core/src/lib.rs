//! # Audio core for the AudioLink streaming toolkit
//!
//! `audio-core` owns everything between decoded packets and mixed output
//! samples:
//!
//! - **Primitives**: normalized float samples, sample specs with exact
//!   time conversions, channel sets, frames
//! - **PCM codecs**: linear PCM in several widths, µ-law, A-law
//! - **Depacketizer**: ordered packets to a continuous sample timeline
//! - **Channel mapper**: surround downmix/upmix over coefficient tables
//! - **Resamplers**: windowed-sinc backends with runtime scaling
//! - **Latency tuning**: frequency estimator (PI controller over
//!   decimated latency) and the latency monitor driving it
//! - **Watchdog** and **mixer** for session supervision and output

pub mod error;
pub mod sample;
pub mod channels;
pub mod channel_tables;
pub mod channel_mapper;
pub mod frame;
pub mod pcm;
pub mod control;
pub mod depacketizer;
pub mod resampler;
pub mod freq_estimator;
pub mod freq_estimator_decim;
pub mod latency_monitor;
pub mod watchdog;
pub mod mixer;

pub use channel_mapper::{ChannelMapper, ChannelMapperReader};
pub use channels::{ChannelLayout, ChannelPosition, ChannelSet};
pub use control::{LatencyProbe, ScalingHandle};
pub use depacketizer::{Depacketizer, DepacketizerCounters, DepacketizerMetrics};
pub use error::{AudioError, AudioResult};
pub use frame::{Frame, FrameReader, FLAG_HAS_DROPS, FLAG_HAS_GAPS, FLAG_HAS_SIGNAL};
pub use freq_estimator::{FreqEstimator, FreqEstimatorConfig, LatencyTunerProfile};
pub use latency_monitor::{LatencyConfig, LatencyMetrics, LatencyMonitor};
pub use mixer::Mixer;
pub use pcm::PcmCodec;
pub use resampler::{
    BuiltinResamplerRegistry, Resampler, ResamplerBackend, ResamplerProfile, ResamplerReader,
    ResamplerRegistry,
};
pub use sample::{Sample, SampleSpec};
pub use watchdog::{Watchdog, WatchdogConfig};
