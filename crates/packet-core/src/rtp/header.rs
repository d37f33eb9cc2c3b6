//! RTP fixed header codec (RFC 3550 section 5.1).

use bytes::{Buf, BufMut};

use crate::error::{Error, Result};
use crate::units::{Seqnum, SourceId, StreamTimestamp};

/// Size of the fixed RTP header without CSRCs.
pub const RTP_HEADER_SIZE: usize = 12;

const RTP_VERSION: u8 = 2;

/// Parsed RTP fixed header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    pub payload_type: u8,
    pub marker: bool,
    pub seqnum: Seqnum,
    pub timestamp: StreamTimestamp,
    pub ssrc: SourceId,

    /// Offset of the payload within the parsed buffer (after CSRCs and
    /// any header extension).
    pub payload_offset: usize,

    /// Number of padding bytes to strip from the end of the payload.
    pub padding: usize,
}

impl RtpHeader {
    /// Parse the header from the start of `buf`.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < RTP_HEADER_SIZE {
            return Err(Error::BufferTooSmall {
                required: RTP_HEADER_SIZE,
                available: buf.len(),
            });
        }

        let mut cursor = buf;

        let b0 = cursor.get_u8();
        let version = b0 >> 6;
        if version != RTP_VERSION {
            return Err(Error::MalformedPacket(format!(
                "bad rtp version: {version}"
            )));
        }
        let has_padding = b0 & 0x20 != 0;
        let has_extension = b0 & 0x10 != 0;
        let csrc_count = (b0 & 0x0f) as usize;

        let b1 = cursor.get_u8();
        let marker = b1 & 0x80 != 0;
        let payload_type = b1 & 0x7f;

        let seqnum = cursor.get_u16();
        let timestamp = cursor.get_u32();
        let ssrc = cursor.get_u32();

        let mut payload_offset = RTP_HEADER_SIZE + csrc_count * 4;
        if buf.len() < payload_offset {
            return Err(Error::MalformedPacket("truncated csrc list".into()));
        }

        if has_extension {
            if buf.len() < payload_offset + 4 {
                return Err(Error::MalformedPacket("truncated header extension".into()));
            }
            let ext_words =
                u16::from_be_bytes([buf[payload_offset + 2], buf[payload_offset + 3]]) as usize;
            payload_offset += 4 + ext_words * 4;
            if buf.len() < payload_offset {
                return Err(Error::MalformedPacket("truncated header extension".into()));
            }
        }

        let padding = if has_padding {
            let pad = *buf.last().unwrap() as usize;
            if pad == 0 || payload_offset + pad > buf.len() {
                return Err(Error::MalformedPacket("bad padding length".into()));
            }
            pad
        } else {
            0
        };

        Ok(Self {
            payload_type,
            marker,
            seqnum,
            timestamp,
            ssrc,
            payload_offset,
            padding,
        })
    }

    /// Compose the fixed header into `buf`.
    pub fn compose(&self, buf: &mut impl BufMut) {
        buf.put_u8(RTP_VERSION << 6);
        buf.put_u8((self.payload_type & 0x7f) | if self.marker { 0x80 } else { 0 });
        buf.put_u16(self.seqnum);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
    }
}
