//! Latency monitor.
//!
//! Outermost stage of a session's frame chain. After every frame it
//! measures the niq latency (newest buffered packet end minus next
//! emitted sample, on the source timeline), enforces the configured hard
//! bounds, and drives the frequency estimator whose output is handed to
//! the resampler as a trimmed scaling factor.

use serde::Serialize;
use tracing::{debug, trace};

use audiolink_packet_core::units::{Nanos, StreamTimestamp};

use crate::control::{LatencyProbe, ScalingHandle};
use crate::error::{AudioError, AudioResult};
use crate::frame::{Frame, FrameReader};
use crate::freq_estimator::{FreqEstimator, FreqEstimatorConfig, LatencyTunerProfile};
use crate::sample::SampleSpec;

/// Latency tuning configuration. Zero bounds are deduced from the
/// target.
#[derive(Debug, Clone)]
pub struct LatencyConfig {
    /// Desired playback latency.
    pub target_latency: Nanos,

    /// Hard lower bound; going below kills the session.
    pub min_latency: Nanos,

    /// Hard upper bound; going above kills the session.
    pub max_latency: Nanos,

    /// Tuning profile. `Intact` disables the frequency estimator.
    pub tuner_profile: LatencyTunerProfile,

    /// How often the estimator consumes a latency sample.
    pub fe_update_interval: Nanos,

    /// Scaling is trimmed to `1 ± max_scaling_delta` before it reaches
    /// the resampler.
    pub max_scaling_delta: f32,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            target_latency: 200 * 1_000_000,
            min_latency: 0,
            max_latency: 0,
            tuner_profile: LatencyTunerProfile::default(),
            fe_update_interval: 5 * 1_000_000,
            max_scaling_delta: 0.005,
        }
    }
}

impl LatencyConfig {
    /// Fill zero bounds: underruns are fatal immediately, overruns at
    /// five times the target.
    pub fn deduce_defaults(&mut self) {
        if self.max_latency == 0 {
            self.max_latency = self.target_latency * 5;
        }
    }
}

/// Metrics published through the session query path and RTCP reports.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LatencyMetrics {
    /// Network-plus-queue latency, nanoseconds on the source timeline.
    pub niq_latency: Nanos,

    /// End-to-end latency from capture to playback, nanoseconds. Zero
    /// until capture timestamps are known.
    pub e2e_latency: Nanos,

    /// Whether the frequency estimator has stabilized.
    pub stable: bool,
}

/// Frame reader stage measuring and tuning latency.
pub struct LatencyMonitor {
    reader: Box<dyn FrameReader>,
    probe: LatencyProbe,
    scaling: ScalingHandle,

    fe: Option<FreqEstimator>,

    /// All tick quantities are on the source (input) timeline.
    target_ticks: StreamTimestamp,
    min_ticks: i32,
    max_ticks: i32,
    update_interval: StreamTimestamp,
    update_pos: StreamTimestamp,
    has_update_pos: bool,

    max_scaling_delta: f32,
    in_spec: SampleSpec,

    /// Position on the output timeline, advanced by every read.
    stream_pos: StreamTimestamp,

    /// Capture timestamp of the most recent frame, for reclocking.
    last_capture_ts: Nanos,

    metrics: LatencyMetrics,
}

impl LatencyMonitor {
    pub fn new(
        reader: Box<dyn FrameReader>,
        probe: LatencyProbe,
        scaling: ScalingHandle,
        config: &LatencyConfig,
        fe_config: FreqEstimatorConfig,
        in_spec: SampleSpec,
    ) -> AudioResult<Self> {
        if config.target_latency <= 0
            || config.target_latency < config.min_latency
            || config.target_latency > config.max_latency
        {
            return Err(AudioError::InvalidConfig(format!(
                "target latency {} outside [{}, {}]",
                config.target_latency, config.min_latency, config.max_latency
            )));
        }

        let target_ticks = in_spec.ns_to_stream_timestamp(config.target_latency);

        let fe = if config.tuner_profile != LatencyTunerProfile::Intact {
            if config.fe_update_interval <= 0 {
                return Err(AudioError::InvalidConfig(
                    "estimator update interval must be positive".into(),
                ));
            }
            Some(FreqEstimator::new(fe_config, target_ticks, &in_spec)?)
        } else {
            None
        };

        debug!(
            target = target_ticks,
            min = config.min_latency,
            max = config.max_latency,
            fe_enabled = fe.is_some(),
            "latency monitor: initializing"
        );

        Ok(Self {
            reader,
            probe,
            scaling,
            fe,
            target_ticks,
            min_ticks: in_spec.ns_to_stream_timestamp(config.min_latency) as i32,
            max_ticks: in_spec.ns_to_stream_timestamp(config.max_latency) as i32,
            update_interval: in_spec.ns_to_stream_timestamp(config.fe_update_interval).max(1),
            update_pos: 0,
            has_update_pos: false,
            max_scaling_delta: config.max_scaling_delta,
            in_spec,
            stream_pos: 0,
            last_capture_ts: 0,
            metrics: LatencyMetrics::default(),
        })
    }

    pub fn metrics(&self) -> LatencyMetrics {
        self.metrics
    }

    pub fn is_stable(&self) -> bool {
        self.fe.as_ref().is_some_and(|fe| fe.is_stable())
    }

    /// Feed the wall-clock playback time of the frame that was just
    /// consumed, updating the e2e latency metric.
    pub fn reclock(&mut self, playback_time: Nanos) {
        if self.last_capture_ts != 0 && playback_time > self.last_capture_ts {
            self.metrics.e2e_latency = playback_time - self.last_capture_ts;
        }
    }

    fn update(&mut self) -> AudioResult<()> {
        let Some(latency) = self.probe.niq_latency() else {
            // Not started yet; nothing to measure or tune.
            return Ok(());
        };

        self.metrics.niq_latency = self
            .in_spec
            .stream_timestamp_delta_to_ns(latency);
        self.metrics.stable = self.is_stable();

        self.check_latency(latency)?;

        if self.fe.is_some() {
            let clamped = latency.max(0) as StreamTimestamp;
            self.update_scaling(clamped);
        }

        Ok(())
    }

    fn check_latency(&self, latency: i32) -> AudioResult<()> {
        if latency < self.min_ticks || latency > self.max_ticks {
            debug!(
                latency,
                min = self.min_ticks,
                max = self.max_ticks,
                "latency monitor: latency out of bounds"
            );
            return Err(AudioError::LatencyOutOfBounds(format!(
                "latency {latency} outside [{}, {}] ticks",
                self.min_ticks, self.max_ticks
            )));
        }
        Ok(())
    }

    fn update_scaling(&mut self, latency: StreamTimestamp) {
        let fe = self.fe.as_mut().unwrap();

        if !self.has_update_pos {
            self.has_update_pos = true;
            self.update_pos = self.stream_pos;
        }

        while audiolink_packet_core::units::stream_timestamp_ge(self.stream_pos, self.update_pos)
        {
            fe.update_stream_position(self.stream_pos);
            fe.update_current_latency(latency);
            self.update_pos = self.update_pos.wrapping_add(self.update_interval);
        }

        let coeff = fe.freq_coeff();
        let trimmed = coeff.clamp(
            1.0 - self.max_scaling_delta,
            1.0 + self.max_scaling_delta,
        );

        trace!(latency, coeff, trimmed, "latency monitor: updating scaling");
        self.scaling.set(trimmed as f64);
    }
}

impl FrameReader for LatencyMonitor {
    fn read(&mut self, frame: &mut Frame, duration: usize) -> AudioResult<()> {
        self.reader.read(frame, duration)?;

        self.stream_pos = self.stream_pos.wrapping_add(duration as StreamTimestamp);
        if frame.capture_timestamp() != 0 {
            self.last_capture_ts = frame.capture_timestamp();
        }

        self.update()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ChannelSet;

    struct SilenceReader;

    impl FrameReader for SilenceReader {
        fn read(&mut self, frame: &mut Frame, duration: usize) -> AudioResult<()> {
            frame.prepare(duration);
            Ok(())
        }
    }

    fn spec() -> SampleSpec {
        SampleSpec::new(44_100, ChannelSet::mono())
    }

    fn monitor(config: LatencyConfig, probe: LatencyProbe, scaling: ScalingHandle) -> LatencyMonitor {
        let mut fe_config = FreqEstimatorConfig::default();
        fe_config.deduce_defaults(LatencyTunerProfile::Responsive);
        LatencyMonitor::new(
            Box::new(SilenceReader),
            probe,
            scaling,
            &config,
            fe_config,
            spec(),
        )
        .unwrap()
    }

    fn config() -> LatencyConfig {
        let mut config = LatencyConfig {
            target_latency: 100 * 1_000_000, // 100 ms = 4410 ticks
            tuner_profile: LatencyTunerProfile::Responsive,
            ..Default::default()
        };
        config.deduce_defaults();
        config
    }

    #[test]
    fn test_no_measurement_before_start() {
        let probe = LatencyProbe::new();
        let mut monitor = monitor(config(), probe, ScalingHandle::new());

        let mut frame = Frame::new();
        // Probe has no head/tail yet: reads pass, nothing measured.
        monitor.read(&mut frame, 100).unwrap();
        assert_eq!(monitor.metrics().niq_latency, 0);
    }

    #[test]
    fn test_latency_above_max_is_fatal() {
        let probe = LatencyProbe::new();
        probe.set_head(0);
        probe.update_tail(1_000_000); // far beyond max (5x 4410 ticks)

        let mut monitor = monitor(config(), probe, ScalingHandle::new());
        let mut frame = Frame::new();
        assert!(matches!(
            monitor.read(&mut frame, 100),
            Err(AudioError::LatencyOutOfBounds(_))
        ));
    }

    #[test]
    fn test_latency_below_min_is_fatal() {
        let mut cfg = config();
        cfg.min_latency = 10 * 1_000_000;

        let probe = LatencyProbe::new();
        probe.set_head(9_000);
        probe.update_tail(9_100); // 100 ticks, below the 441-tick minimum

        let mut monitor = monitor(cfg, probe, ScalingHandle::new());
        let mut frame = Frame::new();
        assert!(monitor.read(&mut frame, 100).is_err());
    }

    #[test]
    fn test_scaling_pushed_to_handle() {
        let probe = LatencyProbe::new();
        probe.set_head(0);
        probe.update_tail(8_000); // nearly 2x target of 4410 ticks

        let scaling = ScalingHandle::new();
        let mut monitor = monitor(config(), probe.clone(), scaling.clone());

        // Enough reads for the estimator's first decimation stage (256
        // samples at one sample per 220-tick interval) to produce output.
        let mut frame = Frame::new();
        for _ in 0..1_500 {
            monitor.read(&mut frame, 100).unwrap();
        }

        // Latency above target: the estimator asks the resampler to
        // consume faster, within the trim range.
        let factor = scaling.get();
        assert!(factor > 1.0);
        assert!(factor <= 1.005 + 1e-9);
    }

    #[test]
    fn test_intact_profile_skips_tuning() {
        let mut cfg = config();
        cfg.tuner_profile = LatencyTunerProfile::Intact;

        let probe = LatencyProbe::new();
        probe.set_head(0);
        probe.update_tail(8_000);

        let scaling = ScalingHandle::new();
        let mut monitor = LatencyMonitor::new(
            Box::new(SilenceReader),
            probe,
            scaling.clone(),
            &cfg,
            FreqEstimatorConfig::default(),
            spec(),
        )
        .unwrap();

        let mut frame = Frame::new();
        monitor.read(&mut frame, 100).unwrap();
        assert_eq!(scaling.get(), 1.0);
    }
}
