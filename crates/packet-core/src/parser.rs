//! Datagram parsing into packets.
//!
//! Each endpoint owns a parser configured for its protocol: bare RTP,
//! FEC source (RTP + payload ID footer), or FEC repair (payload ID header
//! + symbol). Malformed datagrams are rejected with a transient error and
//! counted by the caller.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::fec::{parse_repair_id, parse_source_id, FecScheme};
use crate::packet::{
    Packet, PacketPtr, RtpData, UdpData, FLAG_AUDIO, FLAG_FEC, FLAG_REPAIR, FLAG_RTP, FLAG_UDP,
};
use crate::pool::{BufferPool, PooledBuffer};
use crate::rtp::header::RtpHeader;

/// What a parser expects on its endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserKind {
    /// Bare RTP audio.
    Rtp,
    /// RTP audio with an FEC source payload ID footer.
    FecSource(FecScheme),
    /// RTP-encapsulated FEC repair symbols: RTP header, repair payload
    /// ID, then the symbol. The RTP layer gives the repair flow its own
    /// SSRC and sequence numbers for demultiplexing and metering.
    FecRepair(FecScheme),
}

/// Parser bound to one endpoint protocol.
#[derive(Debug, Clone)]
pub struct PacketParser {
    kind: ParserKind,
}

impl PacketParser {
    pub fn new(kind: ParserKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> ParserKind {
        self.kind
    }

    /// Parse a datagram already copied into a pooled buffer.
    pub fn parse(&self, buffer: PooledBuffer, udp: Option<UdpData>) -> Result<PacketPtr> {
        self.parse_flagged(buffer, udp, 0)
    }

    /// Parse a symbol reconstructed by the FEC decoder. The packet is
    /// marked restored so downstream metering can count it.
    pub fn parse_restored(&self, pool: &BufferPool, data: &[u8]) -> Result<Option<PacketPtr>> {
        let Some(mut buffer) = pool.acquire() else {
            return Ok(None);
        };
        buffer.fill(data);
        self.parse_flagged(buffer, None, crate::packet::FLAG_RESTORED)
            .map(Some)
    }

    fn parse_flagged(
        &self,
        buffer: PooledBuffer,
        udp: Option<UdpData>,
        extra_flags: u32,
    ) -> Result<PacketPtr> {
        let udp_flag = (if udp.is_some() { FLAG_UDP } else { 0 }) | extra_flags;

        let packet = match self.kind {
            ParserKind::Rtp => {
                let rtp = parse_rtp_data(&buffer)?;
                Packet::new(FLAG_RTP | FLAG_AUDIO | udp_flag, udp, Some(rtp), None, buffer)
            }
            ParserKind::FecSource(scheme) => {
                let fec = parse_source_id(scheme, &buffer)?;
                // The embedded RTP packet ends where the footer begins.
                let rtp_len = buffer.len() - scheme.source_id_size();
                let rtp = parse_rtp_data(&buffer[..rtp_len])?;
                Packet::new(
                    FLAG_RTP | FLAG_AUDIO | FLAG_FEC | udp_flag,
                    udp,
                    Some(rtp),
                    Some(fec),
                    buffer,
                )
            }
            ParserKind::FecRepair(scheme) => {
                let rtp = parse_rtp_data(&buffer)?;
                let mut fec = parse_repair_id(scheme, &buffer[rtp.payload_off..])?;
                // The repair ID offsets are relative to the RTP payload.
                fec.payload_off += rtp.payload_off;
                Packet::new(
                    FLAG_RTP | FLAG_FEC | FLAG_REPAIR | udp_flag,
                    udp,
                    Some(rtp),
                    Some(fec),
                    buffer,
                )
            }
        };

        Ok(Arc::new(packet))
    }

    /// Parse a datagram from raw bytes, copying it into a pool buffer.
    ///
    /// Returns `None` when the pool is exhausted; the datagram is dropped.
    pub fn parse_bytes(
        &self,
        pool: &BufferPool,
        data: &[u8],
        udp: Option<UdpData>,
    ) -> Result<Option<PacketPtr>> {
        if data.len() > pool.buffer_size() {
            // Oversized datagrams would grow the pooled buffer past its
            // fixed size; they are rejected like any malformed packet.
            return Err(Error::MalformedPacket(format!(
                "datagram of {} bytes exceeds {}",
                data.len(),
                pool.buffer_size()
            )));
        }
        let Some(mut buffer) = pool.acquire() else {
            return Ok(None);
        };
        buffer.fill(data);
        self.parse(buffer, udp).map(Some)
    }
}

fn parse_rtp_data(buf: &[u8]) -> Result<RtpData> {
    let header = RtpHeader::parse(buf)?;
    let payload_len = buf.len() - header.payload_offset - header.padding;

    Ok(RtpData::new(
        header.ssrc,
        header.seqnum,
        header.timestamp,
        header.payload_type,
        header.marker,
        header.payload_offset,
        payload_len,
    ))
}
