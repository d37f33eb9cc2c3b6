//! Receiver configuration surface.

use serde::{Deserialize, Serialize};

use audiolink_audio_core::{
    ChannelSet, FreqEstimatorConfig, LatencyConfig, ResamplerBackend, ResamplerProfile,
    WatchdogConfig,
};
use audiolink_fec_core::BlockReaderConfig;
use audiolink_packet_core::rtp::FilterConfig;
use audiolink_packet_core::DEFAULT_MAX_PACKET_SIZE;

/// Per-session configuration, shared by every session a receiver
/// creates.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Latency target, bounds, and tuning profile.
    pub latency: LatencyConfig,

    /// Frequency estimator tunables. Zero fields are deduced from the
    /// latency profile.
    pub freq_est: FreqEstimatorConfig,

    /// Playback watchdog timeouts. Zero fields are deduced from the
    /// target latency.
    pub watchdog: WatchdogConfig,

    /// RTP stream validator thresholds.
    pub filter: FilterConfig,

    /// FEC block reader tolerances.
    pub fec_reader: BlockReaderConfig,

    /// Resampler backend and quality.
    pub resampler_backend: ResamplerBackend,
    pub resampler_profile: ResamplerProfile,

    /// Length of the jitter sliding window, in packets.
    pub sliding_stat_window_length: usize,
}

impl SessionConfig {
    /// Deduce all zero fields, the way each component's own
    /// `deduce_defaults` defines.
    pub fn deduce_defaults(&mut self) {
        self.latency.deduce_defaults();
        self.freq_est.deduce_defaults(self.latency.tuner_profile);
        self.watchdog.deduce_defaults(self.latency.target_latency);
        if self.sliding_stat_window_length == 0 {
            self.sliding_stat_window_length = 100;
        }
    }
}

/// Top-level receiver configuration.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Sample rate of the output device.
    pub output_sample_rate: u32,

    /// Channel set of the output device.
    pub output_channels: ChannelSet,

    /// Session template.
    pub session: SessionConfig,

    /// Upper bound on simultaneous sessions per slot.
    pub max_sessions_per_slot: usize,

    /// Largest chunk of samples processed between task-queue checks.
    pub max_subframe_samples: usize,

    /// Control tasks executed per subframe boundary.
    pub max_tasks_per_subframe: usize,

    /// Capacity of each endpoint's lock-free ingress ring.
    pub ingress_queue_len: usize,

    /// Number of packet buffers pre-allocated per receiver.
    pub packet_pool_size: usize,

    /// Largest accepted datagram.
    pub max_packet_size: usize,

    /// Derive capture timestamps from the local wall clock when reading
    /// frames, instead of waiting for an explicit reclock call.
    pub enable_auto_reclock: bool,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            output_sample_rate: 44_100,
            output_channels: ChannelSet::stereo(),
            session: SessionConfig::default(),
            max_sessions_per_slot: 16,
            max_subframe_samples: 1_024,
            max_tasks_per_subframe: 8,
            ingress_queue_len: 1_024,
            packet_pool_size: 4_096,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            enable_auto_reclock: false,
        }
    }
}

impl ReceiverConfig {
    pub fn deduce_defaults(&mut self) {
        self.session.deduce_defaults();
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        if self.output_sample_rate == 0 {
            return Err(crate::error::Error::InvalidConfig(
                "output sample rate must be non-zero".into(),
            ));
        }
        if !self.output_channels.is_valid() {
            return Err(crate::error::Error::InvalidConfig(
                "output channel set is invalid".into(),
            ));
        }
        if self.max_subframe_samples == 0 {
            return Err(crate::error::Error::InvalidConfig(
                "subframe size must be non-zero".into(),
            ));
        }
        if self.max_sessions_per_slot == 0 {
            return Err(crate::error::Error::InvalidConfig(
                "session limit must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Metrics snapshot of one slot, returned by the query task.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SlotMetrics {
    /// Live sessions in the slot.
    pub num_sessions: usize,

    /// Datagrams that failed parsing on this slot's endpoints.
    pub malformed_packets: u64,

    /// Packets dropped because an ingress ring was full.
    pub ingress_dropped: u64,

    /// Per-session metrics.
    pub sessions: Vec<crate::session::SessionMetrics>,
}

/// Interfaces an endpoint can be attached to within a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interface {
    /// Primary media stream.
    AudioSource,
    /// FEC repair stream.
    AudioRepair,
    /// RTCP control stream.
    Control,
}
