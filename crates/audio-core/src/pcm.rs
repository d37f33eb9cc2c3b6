//! PCM payload codecs.
//!
//! Decodes wire payloads (linear PCM in several widths, µ-law, A-law)
//! into the internal normalized float representation, and encodes floats
//! back for the sender side and for tests.

use bytes::BufMut;

use audiolink_packet_core::rtp::PayloadFormat;

use crate::sample::Sample;

/// Codec for one payload format.
#[derive(Debug, Clone, Copy)]
pub struct PcmCodec {
    format: PayloadFormat,
}

impl PcmCodec {
    pub fn new(format: PayloadFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> PayloadFormat {
        self.format
    }

    /// Bytes per encoded sample.
    pub fn sample_size(&self) -> usize {
        self.format.sample_size()
    }

    /// Number of interleaved samples in a payload of `len` bytes.
    pub fn samples_in(&self, len: usize) -> usize {
        len / self.sample_size()
    }

    /// Decode up to `dst.len()` interleaved samples, starting at sample
    /// index `offset` within the payload. Returns the number of samples
    /// decoded.
    pub fn decode(&self, payload: &[u8], offset: usize, dst: &mut [Sample]) -> usize {
        let total = self.samples_in(payload.len());
        if offset >= total {
            return 0;
        }
        let count = dst.len().min(total - offset);
        let size = self.sample_size();

        for (i, slot) in dst.iter_mut().take(count).enumerate() {
            let at = (offset + i) * size;
            let bytes = &payload[at..at + size];
            *slot = match self.format {
                PayloadFormat::S16 => {
                    i16::from_be_bytes([bytes[0], bytes[1]]) as Sample / 32_768.0
                }
                PayloadFormat::S24 => {
                    let wide =
                        i32::from_be_bytes([bytes[0], bytes[1], bytes[2], 0]) >> 8;
                    wide as Sample / 8_388_608.0
                }
                PayloadFormat::S32 => {
                    i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as Sample
                        / 2_147_483_648.0
                }
                PayloadFormat::F32 => {
                    f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
                }
                PayloadFormat::MuLaw => mu_law_to_linear(bytes[0]) as Sample / 32_768.0,
                PayloadFormat::ALaw => a_law_to_linear(bytes[0]) as Sample / 32_768.0,
            };
        }

        count
    }

    /// Encode interleaved samples onto `dst`.
    pub fn encode(&self, samples: &[Sample], dst: &mut impl BufMut) {
        for &sample in samples {
            match self.format {
                PayloadFormat::S16 => dst.put_i16(float_to_int16(sample)),
                PayloadFormat::S24 => {
                    let wide = float_to_int24(sample);
                    dst.put_u8((wide >> 16) as u8);
                    dst.put_u8((wide >> 8) as u8);
                    dst.put_u8(wide as u8);
                }
                PayloadFormat::S32 => {
                    let clamped = (sample as f64 * 2_147_483_648.0)
                        .clamp(-2_147_483_648.0, 2_147_483_647.0);
                    dst.put_i32(clamped as i32);
                }
                PayloadFormat::F32 => dst.put_f32(sample),
                PayloadFormat::MuLaw => dst.put_u8(linear_to_mu_law(float_to_int16(sample))),
                PayloadFormat::ALaw => dst.put_u8(linear_to_a_law(float_to_int16(sample))),
            }
        }
    }
}

fn float_to_int16(sample: Sample) -> i16 {
    (sample * 32_768.0).clamp(-32_768.0, 32_767.0) as i16
}

fn float_to_int24(sample: Sample) -> i32 {
    (sample * 8_388_608.0).clamp(-8_388_608.0, 8_388_607.0) as i32
}

/// Convert linear PCM sample to µ-law
fn linear_to_mu_law(sample: i16) -> u8 {
    const BIAS: i16 = 0x84;
    const CLIP: i16 = 32_635;

    let sign = if sample < 0 { 0x7F } else { 0xFF };
    let mut sample = if sample < 0 {
        if sample == i16::MIN {
            i16::MAX
        } else {
            -sample
        }
    } else {
        sample
    };

    sample = sample.saturating_add(BIAS);
    if sample > CLIP {
        sample = CLIP;
    }

    // Exponent is the position of the highest set bit above bit 7.
    let mut exp = 7;
    while exp > 0 && sample < (0x100 << (exp - 1)) {
        exp -= 1;
    }

    let mantissa = (sample >> (exp + 3)) & 0x0F;
    let mu_law = ((exp as i16) << 4) | mantissa;

    ((!mu_law) & sign) as u8
}

/// Convert µ-law byte to linear PCM
fn mu_law_to_linear(byte: u8) -> i16 {
    const BIAS: i32 = 0x84;

    let byte = !byte;
    let exp = ((byte >> 4) & 0x07) as i32;
    let mantissa = (byte & 0x0F) as i32;

    let magnitude = (((mantissa << 3) + BIAS) << exp) - BIAS;

    if byte & 0x80 != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Convert linear PCM sample to A-law
fn linear_to_a_law(sample: i16) -> u8 {
    let (mask, mut value) = if sample >= 0 {
        (0xD5u8, (sample >> 3) as i32)
    } else {
        (0x55u8, ((-(sample as i32) - 1) >> 3).max(0))
    };

    let mut seg = 0;
    while seg < 8 && value > SEG_END[seg] {
        seg += 1;
    }

    if seg >= 8 {
        0x7F ^ mask
    } else {
        let mut byte = (seg as u8) << 4;
        byte |= if seg < 2 {
            ((value >> 1) & 0x0F) as u8
        } else {
            ((value >> seg) & 0x0F) as u8
        };
        byte ^ mask
    }
}

const SEG_END: [i32; 8] = [0x1F, 0x3F, 0x7F, 0xFF, 0x1FF, 0x3FF, 0x7FF, 0xFFF];

/// Convert A-law byte to linear PCM
fn a_law_to_linear(byte: u8) -> i16 {
    let byte = byte ^ 0x55;
    let seg = ((byte >> 4) & 0x07) as i32;
    let mut value = ((byte & 0x0F) as i32) << 4;

    value += match seg {
        0 => 8,
        1 => 0x108,
        _ => 0x108,
    };
    if seg > 1 {
        value <<= seg - 1;
    }

    if byte & 0x80 != 0 {
        value as i16
    } else {
        -value as i16
    }
}
