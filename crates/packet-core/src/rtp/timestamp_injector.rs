//! Capture timestamp injection.
//!
//! RTP packets carry no wall-clock time. Once RTCP sender reports provide
//! a mapping between the sender's clock and the stream timestamp, this
//! stage stamps every passing packet with a capture timestamp, enabling
//! end-to-end latency measurement and reclocking.

use std::sync::Mutex;
use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::packet::PacketPtr;
use crate::units::{stream_timestamp_diff, Nanos, StreamTimestamp, SECOND};
use crate::{PacketReader, ReadMode};

/// Shared sender-clock mapping.
///
/// The RTCP side updates it when sender reports arrive; the injector,
/// boxed deep inside the session's packet chain, reads it on every
/// packet.
#[derive(Debug, Clone, Default)]
pub struct ClockMapping {
    inner: Arc<Mutex<Option<(Nanos, StreamTimestamp)>>>,
}

impl ClockMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or refresh the mapping: `capture_ts` is the sender wall
    /// clock corresponding to `stream_ts`.
    pub fn update(&self, capture_ts: Nanos, stream_ts: StreamTimestamp) {
        if capture_ts <= 0 {
            debug!(capture_ts, "clock mapping: ignoring non-positive mapping");
            return;
        }
        *self.inner.lock().unwrap() = Some((capture_ts, stream_ts));
    }

    pub fn get(&self) -> Option<(Nanos, StreamTimestamp)> {
        *self.inner.lock().unwrap()
    }

    pub fn is_set(&self) -> bool {
        self.get().is_some()
    }
}

/// Reader stage that populates capture timestamps.
pub struct TimestampInjector {
    reader: Box<dyn PacketReader>,
    sample_rate: u32,
    mapping: ClockMapping,
}

impl TimestampInjector {
    pub fn new(reader: Box<dyn PacketReader>, sample_rate: u32, mapping: ClockMapping) -> Self {
        Self {
            reader,
            sample_rate,
            mapping,
        }
    }
}

impl PacketReader for TimestampInjector {
    fn read(&mut self, mode: ReadMode) -> Result<Option<PacketPtr>> {
        let Some(packet) = self.reader.read(mode)? else {
            return Ok(None);
        };

        if let (Some((capture_ts, stream_ts)), Some(rtp)) = (self.mapping.get(), packet.rtp()) {
            if rtp.capture_timestamp() == 0 {
                let delta = stream_timestamp_diff(rtp.stream_timestamp, stream_ts);
                let delta_ns = delta as Nanos * SECOND / self.sample_rate as Nanos;
                rtp.set_capture_timestamp(capture_ts + delta_ns);
            }
        }

        Ok(Some(packet))
    }
}
