//! Samples and sample specifications.

use audiolink_packet_core::units::{Nanos, StreamTimestamp, SECOND};

use crate::channels::ChannelSet;

/// One audio sample: normalized float in [-1, 1].
pub type Sample = f32;

/// Maximum sample magnitude.
pub const SAMPLE_MAX: Sample = 1.0;

/// Minimum sample magnitude.
pub const SAMPLE_MIN: Sample = -1.0;

/// Sample rate plus channel set of a stream.
///
/// Provides exact conversions between nanoseconds, per-channel sample
/// counts, interleaved (overall) sample counts, and RTP timestamps.
/// Fractional results round half to even so that repeated conversions do
/// not drift in either direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleSpec {
    sample_rate: u32,
    channels: ChannelSet,
}

impl SampleSpec {
    pub fn new(sample_rate: u32, channels: ChannelSet) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// A spec is valid iff it has a rate and a valid channel set.
    pub fn is_valid(&self) -> bool {
        self.sample_rate > 0 && self.channels.is_valid()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_set(&self) -> ChannelSet {
        self.channels
    }

    pub fn num_channels(&self) -> usize {
        self.channels.num_channels()
    }

    /// Nanoseconds to per-channel samples.
    pub fn ns_to_samples_per_chan(&self, ns: Nanos) -> usize {
        let val = (ns as f64 / SECOND as f64 * self.sample_rate as f64).round_ties_even();
        if val <= 0.0 {
            0
        } else if val >= usize::MAX as f64 {
            usize::MAX
        } else {
            val as usize
        }
    }

    /// Per-channel samples to nanoseconds.
    pub fn samples_per_chan_to_ns(&self, n_samples: usize) -> Nanos {
        self.fract_samples_per_chan_to_ns(n_samples as f64)
    }

    /// Fractional per-channel samples to nanoseconds.
    pub fn fract_samples_per_chan_to_ns(&self, n_samples: f64) -> Nanos {
        let val = (n_samples / self.sample_rate as f64 * SECOND as f64).round_ties_even();
        if val <= Nanos::MIN as f64 {
            Nanos::MIN
        } else if val >= Nanos::MAX as f64 {
            Nanos::MAX
        } else {
            val as Nanos
        }
    }

    /// Nanoseconds to interleaved samples (all channels).
    pub fn ns_to_samples_overall(&self, ns: Nanos) -> usize {
        self.ns_to_samples_per_chan(ns) * self.num_channels()
    }

    /// Interleaved samples to nanoseconds.
    pub fn samples_overall_to_ns(&self, n_samples: usize) -> Nanos {
        self.fract_samples_per_chan_to_ns(n_samples as f64 / self.num_channels() as f64)
    }

    /// Nanoseconds to an RTP timestamp duration.
    pub fn ns_to_stream_timestamp(&self, ns: Nanos) -> StreamTimestamp {
        let val = (ns as f64 / SECOND as f64 * self.sample_rate as f64).round_ties_even();
        if val <= 0.0 {
            0
        } else if val >= StreamTimestamp::MAX as f64 {
            StreamTimestamp::MAX
        } else {
            val as StreamTimestamp
        }
    }

    /// RTP timestamp duration to nanoseconds.
    pub fn stream_timestamp_to_ns(&self, duration: StreamTimestamp) -> Nanos {
        self.fract_samples_per_chan_to_ns(duration as f64)
    }

    /// Signed RTP timestamp delta to nanoseconds.
    pub fn stream_timestamp_delta_to_ns(&self, delta: i32) -> Nanos {
        self.fract_samples_per_chan_to_ns(delta as f64)
    }

    /// RTP timestamp duration to milliseconds, for logging.
    pub fn stream_timestamp_to_ms(&self, duration: StreamTimestamp) -> f64 {
        self.stream_timestamp_to_ns(duration) as f64 / 1_000_000.0
    }
}
