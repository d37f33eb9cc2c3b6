//! Per-flow link metering.
//!
//! Tracks extended sequence numbers, expected and lost packet counts, and
//! a sliding jitter window over one incoming packet flow. RTT comes from
//! the RTCP layer; recovered-packet counts come from the FEC reader.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::packet::{Packet, FLAG_RESTORED};
use crate::stats::SlidingStats;
use crate::units::{seqnum_diff, stream_timestamp_diff, Nanos, Seqnum, StreamTimestamp, SECOND};

/// Shared monotonically increasing counter.
///
/// Lets a pipeline stage in another part of the chain (the FEC reader)
/// feed a metric into the meter without back-references.
#[derive(Debug, Clone, Default)]
pub struct SharedCounter(Arc<AtomicU64>);

impl SharedCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Snapshot of link metrics for one flow.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LinkMetrics {
    /// First sequence number seen, extended to 32 bits.
    pub ext_first_seqnum: u32,

    /// Highest sequence number seen, extended with the wrap count.
    pub ext_last_seqnum: u32,

    /// Packets the seqnum range says should have arrived.
    pub expected_packets: u64,

    /// Expected minus actually processed. May go negative transiently
    /// when duplicates arrive.
    pub lost_packets: i64,

    /// Sliding-window mean jitter, nanoseconds.
    pub jitter: Nanos,

    /// Sliding-window minimum jitter, nanoseconds.
    pub min_jitter: Nanos,

    /// Sliding-window maximum jitter, nanoseconds.
    pub max_jitter: Nanos,

    /// Round-trip time reported by RTCP, nanoseconds. Zero if unknown.
    pub rtt: Nanos,

    /// Source packets reconstructed by the FEC decoder.
    pub recovered_packets: u64,
}

/// Meter for one packet flow of a session.
pub struct LinkMeter {
    sample_rate: u32,

    first_packet: bool,
    first_seqnum: Seqnum,
    last_seqnum_hi: u32,
    last_seqnum_lo: Seqnum,
    processed_packets: u64,

    prev_queue_timestamp: Nanos,
    prev_stream_timestamp: StreamTimestamp,

    jitter_stats: SlidingStats,
    recovered: SharedCounter,

    has_metrics: bool,
    metrics: LinkMetrics,
}

impl LinkMeter {
    /// `window_len` is the jitter sliding window length in packets.
    pub fn new(sample_rate: u32, window_len: usize) -> Self {
        Self {
            sample_rate,
            first_packet: true,
            first_seqnum: 0,
            last_seqnum_hi: 0,
            last_seqnum_lo: 0,
            processed_packets: 0,
            prev_queue_timestamp: -1,
            prev_stream_timestamp: 0,
            jitter_stats: SlidingStats::new(window_len),
            recovered: SharedCounter::new(),
            has_metrics: false,
            metrics: LinkMetrics::default(),
        }
    }

    pub fn has_metrics(&self) -> bool {
        self.has_metrics
    }

    pub fn metrics(&self) -> LinkMetrics {
        let mut metrics = self.metrics.clone();
        metrics.recovered_packets = self.recovered.get();
        metrics
    }

    /// Handle for the FEC reader to report reconstructed packets.
    pub fn recovered_counter(&self) -> SharedCounter {
        self.recovered.clone()
    }

    /// Feed the RTT measured by the RTCP layer.
    pub fn process_rtt(&mut self, rtt: Nanos) {
        self.metrics.rtt = rtt;
    }

    /// Account one incoming packet. Called on the write path, before the
    /// packet enters the session queue.
    pub fn process_incoming(&mut self, packet: &Packet) {
        let Some(rtp) = packet.rtp() else {
            return;
        };

        let recovered = packet.has_flags(FLAG_RESTORED);
        let seqnum = rtp.seqnum;

        // If the packet is before the first seqnum and no wrap happened
        // yet, move the stream origin back.
        if (self.first_packet || seqnum_diff(seqnum, self.first_seqnum) < 0)
            && self.last_seqnum_hi == 0
        {
            self.first_seqnum = seqnum;
        }

        if self.first_packet {
            self.last_seqnum_hi = 0;
            self.last_seqnum_lo = seqnum;
        } else if seqnum_diff(seqnum, self.last_seqnum_lo) > 0 {
            // Advancing; count wrap if the raw value went backwards.
            if seqnum < self.last_seqnum_lo {
                self.last_seqnum_hi += 1 << 16;
            }
            self.last_seqnum_lo = seqnum;
        }

        if !self.first_packet {
            if !recovered {
                self.update_jitter(packet);
            }
        } else {
            self.first_packet = false;
        }

        if !recovered {
            if let Some(udp) = packet.udp() {
                self.prev_queue_timestamp = udp.queue_timestamp;
            }
            self.prev_stream_timestamp = rtp.stream_timestamp;
        }
        self.processed_packets += 1;

        self.metrics.ext_first_seqnum = self.first_seqnum as u32;
        self.metrics.ext_last_seqnum = self.last_seqnum_hi + self.last_seqnum_lo as u32;
        self.metrics.expected_packets =
            (self.metrics.ext_last_seqnum - self.metrics.ext_first_seqnum + 1) as u64;
        self.metrics.lost_packets =
            self.metrics.expected_packets as i64 - self.processed_packets as i64;

        self.has_metrics = true;
    }

    fn update_jitter(&mut self, packet: &Packet) {
        let Some(udp) = packet.udp() else {
            return;
        };
        if self.prev_queue_timestamp < 0 {
            return;
        }
        let rtp = packet.rtp().unwrap();

        // Jitter sample: |arrival delta - stream delta|.
        let d_arrival = udp.queue_timestamp - self.prev_queue_timestamp;
        let d_stream = stream_timestamp_diff(rtp.stream_timestamp, self.prev_stream_timestamp);
        let d_stream_ns = d_stream as Nanos * SECOND / self.sample_rate as Nanos;

        self.jitter_stats.add((d_arrival - d_stream_ns).abs());
        self.metrics.jitter = self.jitter_stats.mov_avg();
        self.metrics.min_jitter = self.jitter_stats.mov_min();
        self.metrics.max_jitter = self.jitter_stats.mov_max();
    }
}
