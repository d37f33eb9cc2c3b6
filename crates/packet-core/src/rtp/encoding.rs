//! Payload-type registry.
//!
//! Maps RTP payload types to stream encodings. Static types from the RTP
//! audio/video profile are pre-registered; dynamic-range types (L24,
//! float PCM at arbitrary rates) can be added at receiver construction.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// On-wire sample representation of a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    /// Signed 16-bit linear PCM, network byte order.
    S16,
    /// Signed 24-bit linear PCM, network byte order.
    S24,
    /// Signed 32-bit linear PCM, network byte order.
    S32,
    /// IEEE 754 32-bit float PCM, network byte order.
    F32,
    /// ITU-T G.711 µ-law.
    MuLaw,
    /// ITU-T G.711 A-law.
    ALaw,
}

impl PayloadFormat {
    /// Bytes one encoded sample occupies on the wire.
    pub fn sample_size(&self) -> usize {
        match self {
            PayloadFormat::S16 => 2,
            PayloadFormat::S24 => 3,
            PayloadFormat::S32 | PayloadFormat::F32 => 4,
            PayloadFormat::MuLaw | PayloadFormat::ALaw => 1,
        }
    }
}

/// A registered stream encoding.
#[derive(Debug, Clone)]
pub struct Encoding {
    pub payload_type: u8,
    pub format: PayloadFormat,
    pub sample_rate: u32,
    pub num_channels: usize,
}

impl Encoding {
    /// Number of per-channel samples carried by a payload of `len` bytes.
    pub fn samples_per_payload(&self, len: usize) -> usize {
        len / (self.format.sample_size() * self.num_channels)
    }
}

/// Registry of payload types known to a receiver.
#[derive(Debug, Clone)]
pub struct EncodingMap {
    by_pt: HashMap<u8, Encoding>,
}

/// Static payload types from the RTP A/V profile (RFC 3551).
pub mod payload_types {
    /// PCMU (G.711 µ-law), 8 kHz mono.
    pub const PCMU: u8 = 0;
    /// PCMA (G.711 A-law), 8 kHz mono.
    pub const PCMA: u8 = 8;
    /// L16 stereo, 44100 Hz.
    pub const L16_STEREO: u8 = 10;
    /// L16 mono, 44100 Hz.
    pub const L16_MONO: u8 = 11;
    /// First payload type of the dynamic range.
    pub const DYNAMIC_START: u8 = 96;
}

impl EncodingMap {
    /// Create a map with the static profile types registered.
    pub fn new() -> Self {
        let mut map = Self {
            by_pt: HashMap::new(),
        };

        for encoding in [
            Encoding {
                payload_type: payload_types::PCMU,
                format: PayloadFormat::MuLaw,
                sample_rate: 8_000,
                num_channels: 1,
            },
            Encoding {
                payload_type: payload_types::PCMA,
                format: PayloadFormat::ALaw,
                sample_rate: 8_000,
                num_channels: 1,
            },
            Encoding {
                payload_type: payload_types::L16_STEREO,
                format: PayloadFormat::S16,
                sample_rate: 44_100,
                num_channels: 2,
            },
            Encoding {
                payload_type: payload_types::L16_MONO,
                format: PayloadFormat::S16,
                sample_rate: 44_100,
                num_channels: 1,
            },
        ] {
            map.by_pt.insert(encoding.payload_type, encoding);
        }

        map
    }

    /// Register a dynamic-range encoding. Rejects attempts to override
    /// static profile types.
    pub fn register(&mut self, encoding: Encoding) -> Result<()> {
        if encoding.payload_type < payload_types::DYNAMIC_START {
            return Err(Error::InvalidConfig(format!(
                "payload type {} is in the static range",
                encoding.payload_type
            )));
        }
        if encoding.num_channels == 0 || encoding.sample_rate == 0 {
            return Err(Error::InvalidConfig(
                "encoding needs non-zero rate and channels".into(),
            ));
        }
        self.by_pt.insert(encoding.payload_type, encoding);
        Ok(())
    }

    pub fn find_by_pt(&self, payload_type: u8) -> Option<&Encoding> {
        self.by_pt.get(&payload_type)
    }
}

impl Default for EncodingMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_types_present() {
        let map = EncodingMap::new();

        let l16 = map.find_by_pt(payload_types::L16_STEREO).unwrap();
        assert_eq!(l16.sample_rate, 44_100);
        assert_eq!(l16.num_channels, 2);
        assert_eq!(l16.format, PayloadFormat::S16);

        assert!(map.find_by_pt(42).is_none());
    }

    #[test]
    fn test_samples_per_payload() {
        let map = EncodingMap::new();
        let l16 = map.find_by_pt(payload_types::L16_STEREO).unwrap();

        // 100 stereo S16 samples = 400 bytes.
        assert_eq!(l16.samples_per_payload(400), 100);

        let pcmu = map.find_by_pt(payload_types::PCMU).unwrap();
        assert_eq!(pcmu.samples_per_payload(160), 160);
    }

    #[test]
    fn test_register_dynamic() {
        let mut map = EncodingMap::new();

        map.register(Encoding {
            payload_type: 100,
            format: PayloadFormat::F32,
            sample_rate: 48_000,
            num_channels: 2,
        })
        .unwrap();
        assert!(map.find_by_pt(100).is_some());

        // Static range is immutable.
        assert!(map
            .register(Encoding {
                payload_type: 10,
                format: PayloadFormat::F32,
                sample_rate: 48_000,
                num_channels: 2,
            })
            .is_err());
    }
}
