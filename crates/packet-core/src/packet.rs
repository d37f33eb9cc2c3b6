//! Pooled, reference-counted packets.
//!
//! A packet is a parsed view over a single pooled datagram buffer. The
//! layers that were recognized during parsing (UDP, RTP, FEC) are exposed
//! as optional sub-structs; payloads are ranges into the shared buffer.

use std::cmp::Ordering;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering as MemOrdering};
use std::sync::Arc;

use crate::pool::PooledBuffer;
use crate::units::{blknum_diff, seqnum_diff, BlockNum, Nanos, Seqnum, SourceId, StreamTimestamp};

/// Shared handle to a packet.
pub type PacketPtr = Arc<Packet>;

/// Packet contains a UDP header.
pub const FLAG_UDP: u32 = 1 << 0;
/// Packet contains an RTP header.
pub const FLAG_RTP: u32 = 1 << 1;
/// Packet contains an FEC payload ID.
pub const FLAG_FEC: u32 = 1 << 2;
/// Packet contains a control message.
pub const FLAG_CONTROL: u32 = 1 << 3;
/// Packet carries audio samples.
pub const FLAG_AUDIO: u32 = 1 << 4;
/// Packet carries repair FEC symbols.
pub const FLAG_REPAIR: u32 = 1 << 5;
/// Packet was reconstructed by the FEC decoder rather than received.
pub const FLAG_RESTORED: u32 = 1 << 6;

/// UDP-level packet metadata.
#[derive(Debug, Clone)]
pub struct UdpData {
    /// Address the datagram came from.
    pub source_addr: SocketAddr,

    /// Wall-clock time the datagram was pulled off the socket, in
    /// nanoseconds. Jitter is measured against this.
    pub queue_timestamp: Nanos,
}

/// Parsed RTP header fields.
#[derive(Debug)]
pub struct RtpData {
    /// Synchronization source.
    pub source_id: SourceId,

    /// Sequence number.
    pub seqnum: Seqnum,

    /// Stream timestamp of the first sample in the payload.
    pub stream_timestamp: StreamTimestamp,

    /// Payload type.
    pub payload_type: u8,

    /// Marker bit.
    pub marker: bool,

    /// Duration in samples. Zero until populated from the payload size
    /// by the stream validator.
    duration: AtomicU32,

    /// Capture timestamp in nanoseconds since Unix epoch; zero until the
    /// sender's clock mapping is known.
    capture_timestamp: AtomicI64,

    /// Payload range within the packet buffer.
    pub payload_off: usize,
    pub payload_len: usize,
}

impl RtpData {
    pub fn new(
        source_id: SourceId,
        seqnum: Seqnum,
        stream_timestamp: StreamTimestamp,
        payload_type: u8,
        marker: bool,
        payload_off: usize,
        payload_len: usize,
    ) -> Self {
        Self {
            source_id,
            seqnum,
            stream_timestamp,
            payload_type,
            marker,
            duration: AtomicU32::new(0),
            capture_timestamp: AtomicI64::new(0),
            payload_off,
            payload_len,
        }
    }

    /// Duration in samples, zero if not yet populated.
    pub fn duration(&self) -> StreamTimestamp {
        self.duration.load(MemOrdering::Relaxed)
    }

    pub fn set_duration(&self, duration: StreamTimestamp) {
        self.duration.store(duration, MemOrdering::Relaxed);
    }

    /// Stream timestamp one past the last sample of the payload.
    pub fn end_timestamp(&self) -> StreamTimestamp {
        self.stream_timestamp.wrapping_add(self.duration())
    }

    /// Capture timestamp in nanoseconds since epoch, zero if unknown.
    pub fn capture_timestamp(&self) -> Nanos {
        self.capture_timestamp.load(MemOrdering::Relaxed)
    }

    pub fn set_capture_timestamp(&self, cts: Nanos) {
        self.capture_timestamp.store(cts, MemOrdering::Relaxed);
    }
}

/// Parsed FEC payload ID fields (FECFRAME).
#[derive(Debug, Clone)]
pub struct FecData {
    /// Source block number.
    pub source_block_number: BlockNum,

    /// Encoding symbol index. `< source_block_length` for source packets,
    /// `>= source_block_length` for repair packets.
    pub encoding_symbol_id: usize,

    /// Number of source symbols in the block (`k`).
    pub source_block_length: usize,

    /// Total number of symbols in the block (`k + r`). Zero when the
    /// scheme does not carry it in this packet kind.
    pub block_length: usize,

    /// FEC symbol range within the packet buffer. For source packets this
    /// spans the whole embedded RTP packet; for repair packets, the repair
    /// symbol.
    pub payload_off: usize,
    pub payload_len: usize,
}

/// A parsed packet over one pooled buffer.
pub struct Packet {
    flags: u32,
    udp: Option<UdpData>,
    rtp: Option<RtpData>,
    fec: Option<FecData>,
    buffer: PooledBuffer,
}

impl Packet {
    pub fn new(
        flags: u32,
        udp: Option<UdpData>,
        rtp: Option<RtpData>,
        fec: Option<FecData>,
        buffer: PooledBuffer,
    ) -> Self {
        Self {
            flags,
            udp,
            rtp,
            fec,
            buffer,
        }
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn has_flags(&self, flags: u32) -> bool {
        self.flags & flags == flags
    }

    pub fn udp(&self) -> Option<&UdpData> {
        self.udp.as_ref()
    }

    pub fn rtp(&self) -> Option<&RtpData> {
        self.rtp.as_ref()
    }

    pub fn fec(&self) -> Option<&FecData> {
        self.fec.as_ref()
    }

    /// The raw datagram bytes.
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// RTP payload bytes. Panics if the packet has no RTP layer.
    pub fn rtp_payload(&self) -> &[u8] {
        let rtp = self.rtp.as_ref().expect("packet has no rtp layer");
        &self.buffer[rtp.payload_off..rtp.payload_off + rtp.payload_len]
    }

    /// FEC symbol bytes. Panics if the packet has no FEC layer.
    pub fn fec_payload(&self) -> &[u8] {
        let fec = self.fec.as_ref().expect("packet has no fec layer");
        &self.buffer[fec.payload_off..fec.payload_off + fec.payload_len]
    }

    /// Stream timestamp of the packet, zero if not RTP.
    pub fn stream_timestamp(&self) -> StreamTimestamp {
        self.rtp.as_ref().map_or(0, |r| r.stream_timestamp)
    }

    /// Ordering of two packets on their stream position.
    ///
    /// RTP packets order by wrap-aware sequence number; FEC-only packets
    /// (repair) order by block number, then symbol index.
    pub fn compare(&self, other: &Packet) -> Ordering {
        match (&self.rtp, &other.rtp) {
            (Some(a), Some(b)) => seqnum_diff(a.seqnum, b.seqnum).cmp(&0),
            _ => match (&self.fec, &other.fec) {
                (Some(a), Some(b)) => {
                    match blknum_diff(a.source_block_number, b.source_block_number).cmp(&0) {
                        Ordering::Equal => a.encoding_symbol_id.cmp(&b.encoding_symbol_id),
                        ord => ord,
                    }
                }
                _ => Ordering::Equal,
            },
        }
    }
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("flags", &format_args!("{:#x}", self.flags))
            .field("rtp", &self.rtp)
            .field("fec", &self.fec)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::BufferPool;

    fn rtp_packet(pool: &BufferPool, seqnum: Seqnum) -> Packet {
        let buffer = pool.acquire().unwrap();
        Packet::new(
            FLAG_RTP | FLAG_AUDIO,
            None,
            Some(RtpData::new(0x1111, seqnum, 0, 10, false, 0, 0)),
            None,
            buffer,
        )
    }

    #[test]
    fn test_compare_by_seqnum_with_wrap() {
        let pool = BufferPool::new(64, 8);

        let a = rtp_packet(&pool, 65535);
        let b = rtp_packet(&pool, 0);
        assert_eq!(a.compare(&b), Ordering::Less);
        assert_eq!(b.compare(&a), Ordering::Greater);
        assert_eq!(a.compare(&a), Ordering::Equal);
    }

    #[test]
    fn test_duration_and_end() {
        let pool = BufferPool::new(64, 1);
        let pkt = rtp_packet(&pool, 5);
        let rtp = pkt.rtp().unwrap();

        assert_eq!(rtp.duration(), 0);
        rtp.set_duration(160);
        assert_eq!(rtp.end_timestamp(), 160);
    }
}
