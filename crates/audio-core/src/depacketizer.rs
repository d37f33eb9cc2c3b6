//! Depacketizer: ordered packets to contiguous frames.
//!
//! Owns the cursor `next_ts`, the stream timestamp of the next sample to
//! emit. Every read produces exactly the requested duration: holes where
//! packets are missing are zero-filled and flagged, packets that arrive
//! entirely behind the cursor are dropped and flagged.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, trace};

use audiolink_packet_core::units::{stream_timestamp_diff, Nanos, StreamTimestamp, SECOND};
use audiolink_packet_core::{PacketPtr, PacketReader, ReadMode};

use crate::control::LatencyProbe;
use crate::error::AudioResult;
use crate::frame::{Frame, FrameReader, FLAG_HAS_DROPS, FLAG_HAS_GAPS};
use crate::pcm::PcmCodec;
use crate::sample::SampleSpec;

/// Counters exposed through session metrics.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DepacketizerMetrics {
    /// Samples emitted from decoded packets.
    pub decoded_samples: u64,

    /// Samples zero-filled because no packet covered them.
    pub missing_samples: u64,

    /// Samples discarded from packets that arrived behind the cursor.
    pub late_samples: u64,

    /// Packets dropped entirely for arriving late.
    pub late_packets: u64,
}

/// Shared counter cell: the depacketizer sits boxed inside the frame
/// chain, so the owning session reads its counters through this handle.
#[derive(Debug, Default)]
pub struct DepacketizerCounters {
    decoded_samples: AtomicU64,
    missing_samples: AtomicU64,
    late_samples: AtomicU64,
    late_packets: AtomicU64,
}

impl DepacketizerCounters {
    pub fn snapshot(&self) -> DepacketizerMetrics {
        DepacketizerMetrics {
            decoded_samples: self.decoded_samples.load(Ordering::Relaxed),
            missing_samples: self.missing_samples.load(Ordering::Relaxed),
            late_samples: self.late_samples.load(Ordering::Relaxed),
            late_packets: self.late_packets.load(Ordering::Relaxed),
        }
    }

    fn add_decoded(&self, n: u64) {
        self.decoded_samples.fetch_add(n, Ordering::Relaxed);
    }

    fn add_missing(&self, n: u64) {
        self.missing_samples.fetch_add(n, Ordering::Relaxed);
    }

    fn add_late(&self, samples: u64) {
        self.late_samples.fetch_add(samples, Ordering::Relaxed);
        self.late_packets.fetch_add(1, Ordering::Relaxed);
    }

    fn add_late_samples(&self, samples: u64) {
        self.late_samples.fetch_add(samples, Ordering::Relaxed);
    }
}

/// Frame reader stage at the packet/sample boundary.
pub struct Depacketizer {
    reader: Box<dyn PacketReader>,
    codec: PcmCodec,
    spec: SampleSpec,
    probe: LatencyProbe,

    /// Cursor: stream timestamp of the next sample to emit.
    next_ts: StreamTimestamp,

    /// False until the first packet is seen; blank output before start
    /// is normal and not flagged as a gap.
    started: bool,

    /// Partially consumed packet, with the per-channel offset already
    /// emitted from it.
    current: Option<(PacketPtr, usize)>,

    counters: Arc<DepacketizerCounters>,
}

impl Depacketizer {
    pub fn new(
        reader: Box<dyn PacketReader>,
        codec: PcmCodec,
        spec: SampleSpec,
        probe: LatencyProbe,
    ) -> Self {
        Self {
            reader,
            codec,
            spec,
            probe,
            next_ts: 0,
            started: false,
            current: None,
            counters: Arc::new(DepacketizerCounters::default()),
        }
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// The cursor position on the source timeline.
    pub fn next_timestamp(&self) -> StreamTimestamp {
        self.next_ts
    }

    pub fn metrics(&self) -> DepacketizerMetrics {
        self.counters.snapshot()
    }

    /// Handle for reading the counters after the depacketizer is boxed
    /// into the frame chain.
    pub fn counters(&self) -> Arc<DepacketizerCounters> {
        self.counters.clone()
    }

    /// Fetch the next usable packet, dropping ones that lie entirely
    /// behind the cursor.
    fn next_packet(&mut self, frame: &mut Frame) -> AudioResult<Option<PacketPtr>> {
        loop {
            let Some(packet) = self.reader.read(ReadMode::Fetch)? else {
                return Ok(None);
            };

            let rtp = packet
                .rtp()
                .expect("depacketizer expects rtp packets");

            if !self.started {
                // The stream begins at the first packet's timestamp.
                self.started = true;
                self.next_ts = rtp.stream_timestamp;
                debug!(start_ts = self.next_ts, "depacketizer: got first packet");
            }

            if stream_timestamp_diff(rtp.end_timestamp(), self.next_ts) <= 0 {
                self.counters.add_late(rtp.duration() as u64);
                frame.add_flags(FLAG_HAS_DROPS);
                trace!(
                    pkt_ts = rtp.stream_timestamp,
                    cursor = self.next_ts,
                    "depacketizer: dropping late packet"
                );
                continue;
            }

            return Ok(Some(packet));
        }
    }
}

impl FrameReader for Depacketizer {
    fn read(&mut self, frame: &mut Frame, duration: usize) -> AudioResult<()> {
        let n_channels = self.spec.num_channels();
        frame.prepare(duration * n_channels);

        // Per-channel position within the frame.
        let mut pos = 0usize;

        while pos < duration {
            let (packet, consumed) = match self.current.take() {
                Some(entry) => entry,
                None => match self.next_packet(frame)? {
                    Some(packet) => (packet, 0),
                    None => {
                        // Nothing buffered: zero-fill the remainder.
                        if self.started {
                            self.counters.add_missing((duration - pos) as u64);
                            frame.add_flags(FLAG_HAS_GAPS);
                        }
                        break;
                    }
                },
            };

            let rtp = packet.rtp().unwrap();
            let pkt_ts = rtp.stream_timestamp.wrapping_add(consumed as u32);

            let gap = stream_timestamp_diff(pkt_ts, self.next_ts);
            if gap > 0 {
                // The packet starts ahead of the cursor: zero-fill up to
                // it (or to the end of the frame).
                let fill = (gap as usize).min(duration - pos);
                self.counters.add_missing(fill as u64);
                frame.add_flags(FLAG_HAS_GAPS);
                pos += fill;
                self.next_ts = self.next_ts.wrapping_add(fill as u32);
                self.current = Some((packet, consumed));
                continue;
            }

            if gap < 0 {
                // The packet starts behind the cursor but ends after it:
                // drop the overlapped prefix and resume at the cursor.
                let skip = gap.unsigned_abs() as usize;
                self.counters.add_late_samples(skip as u64);
                frame.add_flags(FLAG_HAS_DROPS);
                self.current = Some((packet, consumed + skip));
                continue;
            }

            let remaining = rtp.duration() as usize - consumed;
            let take = remaining.min(duration - pos);

            let dst =
                &mut frame.samples_mut()[pos * n_channels..(pos + take) * n_channels];
            let decoded =
                self.codec
                    .decode(packet.rtp_payload(), consumed * n_channels, dst);
            debug_assert_eq!(decoded, take * n_channels);
            self.counters.add_decoded(take as u64);

            if pos == 0 {
                let cts = rtp.capture_timestamp();
                if cts != 0 {
                    let skew =
                        consumed as Nanos * SECOND / self.spec.sample_rate() as Nanos;
                    frame.set_capture_timestamp(cts + skew);
                }
            }

            pos += take;
            self.next_ts = self.next_ts.wrapping_add(take as u32);

            if consumed + take < rtp.duration() as usize {
                self.current = Some((packet, consumed + take));
            }
        }

        if self.started {
            self.probe.set_head(self.next_ts.wrapping_add((duration - pos) as u32));
            // The cursor always advances by the full frame, holes included.
            self.next_ts = self.next_ts.wrapping_add((duration - pos) as u32);
        }

        frame.detect_signal();
        Ok(())
    }
}
