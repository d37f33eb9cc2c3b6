//! Shared control handles.
//!
//! The latency monitor sits at the outer end of the frame chain but needs
//! two things from deep inside it: the stream positions observed at the
//! packet queue and the depacketizer, and a way to adjust the resampler
//! rate. Instead of back-references between stages, both ends share small
//! atomic handles, keeping ownership a straight line.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use audiolink_packet_core::units::{stream_timestamp_lt, StreamTimestamp};

/// Stream positions needed for latency measurement.
///
/// The session's packet route updates the tail (newest buffered packet
/// end); the depacketizer updates the head (next sample to emit). The
/// latency monitor reads both. All on the source timeline.
#[derive(Debug, Clone, Default)]
pub struct LatencyProbe {
    inner: Arc<ProbeInner>,
}

#[derive(Debug, Default)]
struct ProbeInner {
    head: AtomicU32,
    has_head: AtomicBool,
    tail: AtomicU32,
    has_tail: AtomicBool,
}

impl LatencyProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the depacketizer's next timestamp.
    pub fn set_head(&self, ts: StreamTimestamp) {
        self.inner.head.store(ts, Ordering::Relaxed);
        self.inner.has_head.store(true, Ordering::Release);
    }

    /// Record a newly buffered packet's end timestamp. Keeps the maximum
    /// on the wrapping timeline.
    pub fn update_tail(&self, ts: StreamTimestamp) {
        if self.inner.has_tail.load(Ordering::Acquire) {
            let current = self.inner.tail.load(Ordering::Relaxed);
            if stream_timestamp_lt(ts, current) {
                return;
            }
        }
        self.inner.tail.store(ts, Ordering::Relaxed);
        self.inner.has_tail.store(true, Ordering::Release);
    }

    pub fn head(&self) -> Option<StreamTimestamp> {
        self.inner
            .has_head
            .load(Ordering::Acquire)
            .then(|| self.inner.head.load(Ordering::Relaxed))
    }

    pub fn tail(&self) -> Option<StreamTimestamp> {
        self.inner
            .has_tail
            .load(Ordering::Acquire)
            .then(|| self.inner.tail.load(Ordering::Relaxed))
    }

    /// Current niq latency in samples: newest buffered packet end minus
    /// next emitted sample, wrap-aware. `None` until both ends reported.
    pub fn niq_latency(&self) -> Option<i32> {
        let head = self.head()?;
        let tail = self.tail()?;
        Some(audiolink_packet_core::units::stream_timestamp_diff(
            tail, head,
        ))
    }
}

/// Resampler scaling shared between the latency monitor (writer) and the
/// resampler stage (reader). Applied at the next frame boundary.
#[derive(Debug, Clone)]
pub struct ScalingHandle {
    bits: Arc<AtomicU64>,
}

impl ScalingHandle {
    pub fn new() -> Self {
        Self {
            bits: Arc::new(AtomicU64::new(1.0_f64.to_bits())),
        }
    }

    pub fn set(&self, scaling: f64) {
        self.bits.store(scaling.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

impl Default for ScalingHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_latency() {
        let probe = LatencyProbe::new();
        assert_eq!(probe.niq_latency(), None);

        probe.set_head(1_000);
        probe.update_tail(9_000);
        assert_eq!(probe.niq_latency(), Some(8_000));
    }

    #[test]
    fn test_tail_keeps_maximum() {
        let probe = LatencyProbe::new();
        probe.update_tail(500);
        probe.update_tail(300); // reordered packet, older end
        assert_eq!(probe.tail(), Some(500));
    }

    #[test]
    fn test_probe_latency_across_wrap() {
        let probe = LatencyProbe::new();
        probe.set_head(u32::MAX - 99);
        probe.update_tail(900);
        assert_eq!(probe.niq_latency(), Some(1_000));
    }

    #[test]
    fn test_scaling_handle() {
        let handle = ScalingHandle::new();
        assert_eq!(handle.get(), 1.0);
        handle.set(1.000123);
        assert_eq!(handle.get(), 1.000123);
    }
}
