//! FECFRAME payload IDs.
//!
//! Source packets carry a payload ID footer after the embedded RTP packet;
//! repair packets carry a payload ID header before the repair symbol.
//! Reed–Solomon (m=8) uses 8-bit fields, LDPC-Staircase 16-bit fields.

use bytes::BufMut;

use crate::error::{Error, Result};
use crate::packet::FecData;
use crate::units::BlockNum;

/// Forward erasure correction scheme of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FecScheme {
    /// Reed–Solomon over GF(2^8), RFC 6865.
    Rs8m,
    /// LDPC-Staircase, RFC 6816.
    LdpcStaircase,
}

impl FecScheme {
    /// Size of the source payload ID footer.
    pub fn source_id_size(&self) -> usize {
        match self {
            FecScheme::Rs8m => 3,
            FecScheme::LdpcStaircase => 6,
        }
    }

    /// Size of the repair payload ID header.
    pub fn repair_id_size(&self) -> usize {
        match self {
            FecScheme::Rs8m => 4,
            FecScheme::LdpcStaircase => 8,
        }
    }

    /// Largest block length (`k + r`) the scheme's ID fields can express.
    pub fn max_block_length(&self) -> usize {
        match self {
            FecScheme::Rs8m => 255,
            FecScheme::LdpcStaircase => 65_535,
        }
    }
}

impl std::fmt::Display for FecScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FecScheme::Rs8m => write!(f, "rs8m"),
            FecScheme::LdpcStaircase => write!(f, "ldpc"),
        }
    }
}

/// Parse the source payload ID footer from the tail of `buf`.
///
/// The FEC symbol of a source packet is the whole buffer including the
/// footer, so restored symbols re-parse with the same rules.
pub fn parse_source_id(scheme: FecScheme, buf: &[u8]) -> Result<FecData> {
    let id_size = scheme.source_id_size();
    if buf.len() <= id_size {
        return Err(Error::BufferTooSmall {
            required: id_size + 1,
            available: buf.len(),
        });
    }

    let tail = &buf[buf.len() - id_size..];
    let (sbn, esi, sblen) = match scheme {
        FecScheme::Rs8m => (tail[0] as BlockNum, tail[1] as usize, tail[2] as usize),
        FecScheme::LdpcStaircase => (
            u16::from_be_bytes([tail[0], tail[1]]),
            u16::from_be_bytes([tail[2], tail[3]]) as usize,
            u16::from_be_bytes([tail[4], tail[5]]) as usize,
        ),
    };

    Ok(FecData {
        source_block_number: sbn,
        encoding_symbol_id: esi,
        source_block_length: sblen,
        // Source packets do not carry the total block length.
        block_length: 0,
        payload_off: 0,
        payload_len: buf.len(),
    })
}

/// Compose the source payload ID footer.
pub fn compose_source_id(
    scheme: FecScheme,
    buf: &mut impl BufMut,
    sbn: BlockNum,
    esi: usize,
    sblen: usize,
) {
    match scheme {
        FecScheme::Rs8m => {
            buf.put_u8(sbn as u8);
            buf.put_u8(esi as u8);
            buf.put_u8(sblen as u8);
        }
        FecScheme::LdpcStaircase => {
            buf.put_u16(sbn);
            buf.put_u16(esi as u16);
            buf.put_u16(sblen as u16);
        }
    }
}

/// Parse the repair payload ID header from the head of `buf`.
pub fn parse_repair_id(scheme: FecScheme, buf: &[u8]) -> Result<FecData> {
    let id_size = scheme.repair_id_size();
    if buf.len() <= id_size {
        return Err(Error::BufferTooSmall {
            required: id_size + 1,
            available: buf.len(),
        });
    }

    let (sbn, esi, sblen, blen) = match scheme {
        FecScheme::Rs8m => (
            buf[0] as BlockNum,
            buf[1] as usize,
            buf[2] as usize,
            buf[3] as usize,
        ),
        FecScheme::LdpcStaircase => (
            u16::from_be_bytes([buf[0], buf[1]]),
            u16::from_be_bytes([buf[2], buf[3]]) as usize,
            u16::from_be_bytes([buf[4], buf[5]]) as usize,
            u16::from_be_bytes([buf[6], buf[7]]) as usize,
        ),
    };

    Ok(FecData {
        source_block_number: sbn,
        encoding_symbol_id: esi,
        source_block_length: sblen,
        block_length: blen,
        payload_off: id_size,
        payload_len: buf.len() - id_size,
    })
}

/// Compose the repair payload ID header.
pub fn compose_repair_id(
    scheme: FecScheme,
    buf: &mut impl BufMut,
    sbn: BlockNum,
    esi: usize,
    sblen: usize,
    blen: usize,
) {
    match scheme {
        FecScheme::Rs8m => {
            buf.put_u8(sbn as u8);
            buf.put_u8(esi as u8);
            buf.put_u8(sblen as u8);
            buf.put_u8(blen as u8);
        }
        FecScheme::LdpcStaircase => {
            buf.put_u16(sbn);
            buf.put_u16(esi as u16);
            buf.put_u16(sblen as u16);
            buf.put_u16(blen as u16);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_rs8m_source_id_round_trip() {
        let mut buf = BytesMut::from(&b"rtp-packet-bytes"[..]);
        compose_source_id(FecScheme::Rs8m, &mut buf, 42, 7, 10);

        let fec = parse_source_id(FecScheme::Rs8m, &buf).unwrap();
        assert_eq!(fec.source_block_number, 42);
        assert_eq!(fec.encoding_symbol_id, 7);
        assert_eq!(fec.source_block_length, 10);
        assert_eq!(fec.block_length, 0);
        // The symbol spans the whole packet including the footer.
        assert_eq!(fec.payload_len, buf.len());
    }

    #[test]
    fn test_ldpc_repair_id_round_trip() {
        let mut buf = BytesMut::new();
        compose_repair_id(FecScheme::LdpcStaircase, &mut buf, 1000, 25, 20, 30);
        buf.extend_from_slice(&[0xAA; 64]);

        let fec = parse_repair_id(FecScheme::LdpcStaircase, &buf).unwrap();
        assert_eq!(fec.source_block_number, 1000);
        assert_eq!(fec.encoding_symbol_id, 25);
        assert_eq!(fec.source_block_length, 20);
        assert_eq!(fec.block_length, 30);
        assert_eq!(fec.payload_off, 8);
        assert_eq!(fec.payload_len, 64);
    }

    #[test]
    fn test_parse_rejects_short_buffer() {
        assert!(parse_source_id(FecScheme::Rs8m, &[1, 2]).is_err());
        assert!(parse_repair_id(FecScheme::LdpcStaircase, &[0; 8]).is_err());
    }
}
