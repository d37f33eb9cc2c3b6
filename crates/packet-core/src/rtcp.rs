//! RTCP report types.
//!
//! The RTCP wire codec lives outside this crate; the pipeline only
//! consumes and produces these structs. A `SendReport` is what the control
//! loop learns from a remote sender; a `RecvReport` is what the receiver
//! publishes about one flow it is playing.

use serde::Serialize;

use crate::units::{Nanos, SourceId, StreamTimestamp};

/// Report describing a remote sender, distilled from RTCP SR (and XR)
/// packets by the control layer.
#[derive(Debug, Clone, Default)]
pub struct SendReport {
    /// CNAME of the sender.
    pub sender_cname: String,

    /// SSRC of the sending flow.
    pub sender_source_id: SourceId,

    /// Wall-clock time of the report at the sender, nanoseconds since
    /// Unix epoch.
    pub report_timestamp: Nanos,

    /// Stream timestamp corresponding to `report_timestamp`.
    pub stream_timestamp: StreamTimestamp,

    /// Round-trip time measured via LSR/DLSR, nanoseconds. Zero if not
    /// yet measurable.
    pub rtt: Nanos,
}

/// Report describing what this receiver observes on one flow; encoded by
/// the control layer into RTCP RR plus the latency extension block.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecvReport {
    /// CNAME of this receiver.
    pub receiver_cname: String,

    /// SSRC this receiver reports as.
    pub receiver_source_id: SourceId,

    /// SSRC of the remote flow the report is about.
    pub sender_source_id: SourceId,

    /// Wall-clock time of the report, nanoseconds since Unix epoch.
    pub report_timestamp: Nanos,

    /// Sample rate of the flow.
    pub sample_rate: u32,

    /// Extended first/highest sequence numbers.
    pub ext_first_seqnum: u32,
    pub ext_last_seqnum: u32,

    /// Total packets the seqnum range implies.
    pub packet_count: u64,

    /// Cumulative loss (may be negative with duplicates).
    pub cum_loss: i64,

    /// Mean interarrival jitter, nanoseconds.
    pub jitter: Nanos,

    /// Network-plus-queue latency on the source timeline, nanoseconds.
    pub niq_latency: Nanos,

    /// End-to-end latency from capture to playback, nanoseconds. Zero
    /// when capture timestamps are unknown.
    pub e2e_latency: Nanos,
}
