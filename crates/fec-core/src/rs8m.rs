//! Reed–Solomon (m=8) block codec, RFC 6865.
//!
//! The Galois-field math is delegated to the `reed-solomon-erasure`
//! crate; this module adapts it to the block codec contracts. Any `k` of
//! `k + r` symbols recover the block.

use reed_solomon_erasure::galois_8::ReedSolomon;
use tracing::debug;

use crate::scheme::{BlockDecoder, BlockEncoder, CodecError, CodecResult};

/// SBN and ESI are 8-bit on the wire.
const MAX_BLOCK_LENGTH: usize = 255;

fn make_codec(n_source: usize, n_repair: usize) -> CodecResult<ReedSolomon> {
    ReedSolomon::new(n_source, n_repair).map_err(|err| {
        debug!(n_source, n_repair, ?err, "rs8m: cannot build codec");
        CodecError::UnsupportedShape {
            k: n_source,
            r: n_repair,
        }
    })
}

/// Reed–Solomon decoder state for one block.
pub struct Rs8mDecoder {
    /// Codec cached across blocks with the same shape.
    codec: Option<(usize, usize, ReedSolomon)>,
    shards: Vec<Option<Vec<u8>>>,
    n_source: usize,
    symbol_size: usize,
    decoded: bool,
    failed: bool,
}

impl Rs8mDecoder {
    pub fn new() -> Self {
        Self {
            codec: None,
            shards: Vec::new(),
            n_source: 0,
            symbol_size: 0,
            decoded: false,
            failed: false,
        }
    }

    fn ensure_codec(&mut self, k: usize, r: usize) -> CodecResult<()> {
        let rebuild = match &self.codec {
            Some((ck, cr, _)) => *ck != k || *cr != r,
            None => true,
        };
        if rebuild {
            let codec = make_codec(k, r)?;
            self.codec = Some((k, r, codec));
        }
        Ok(())
    }
}

impl Default for Rs8mDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockDecoder for Rs8mDecoder {
    fn max_block_length(&self) -> usize {
        MAX_BLOCK_LENGTH
    }

    fn begin_block(
        &mut self,
        n_source: usize,
        n_repair: usize,
        symbol_size: usize,
    ) -> CodecResult<()> {
        if n_source == 0 || n_repair == 0 || n_source + n_repair > MAX_BLOCK_LENGTH {
            return Err(CodecError::UnsupportedShape {
                k: n_source,
                r: n_repair,
            });
        }
        if symbol_size == 0 {
            return Err(CodecError::BadSymbolSize(symbol_size));
        }

        self.ensure_codec(n_source, n_repair)?;

        self.shards = vec![None; n_source + n_repair];
        self.n_source = n_source;
        self.symbol_size = symbol_size;
        self.decoded = false;
        self.failed = false;
        Ok(())
    }

    fn set_symbol(&mut self, index: usize, symbol: &[u8]) {
        if index < self.shards.len() && symbol.len() == self.symbol_size {
            self.shards[index] = Some(symbol.to_vec());
        }
    }

    fn repair_symbol(&mut self, index: usize) -> Option<Vec<u8>> {
        if index >= self.n_source || self.failed {
            return None;
        }

        if !self.decoded {
            let (_, _, codec) = self.codec.as_ref()?;
            if codec.reconstruct_data(&mut self.shards).is_err() {
                // Not enough symbols arrived; the block stays holed.
                self.failed = true;
                return None;
            }
            self.decoded = true;
        }

        self.shards[index].clone()
    }

    fn end_block(&mut self) {
        self.shards.clear();
        self.n_source = 0;
        self.symbol_size = 0;
        self.decoded = false;
        self.failed = false;
    }
}

/// Reed–Solomon encoder state for one block.
pub struct Rs8mEncoder {
    codec: Option<(usize, usize, ReedSolomon)>,
    shards: Vec<Vec<u8>>,
    n_source: usize,
    symbol_size: usize,
    encoded: bool,
}

impl Rs8mEncoder {
    pub fn new() -> Self {
        Self {
            codec: None,
            shards: Vec::new(),
            n_source: 0,
            symbol_size: 0,
            encoded: false,
        }
    }
}

impl Default for Rs8mEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockEncoder for Rs8mEncoder {
    fn max_block_length(&self) -> usize {
        MAX_BLOCK_LENGTH
    }

    fn begin_block(
        &mut self,
        n_source: usize,
        n_repair: usize,
        symbol_size: usize,
    ) -> CodecResult<()> {
        if n_source == 0 || n_repair == 0 || n_source + n_repair > MAX_BLOCK_LENGTH {
            return Err(CodecError::UnsupportedShape {
                k: n_source,
                r: n_repair,
            });
        }
        if symbol_size == 0 {
            return Err(CodecError::BadSymbolSize(symbol_size));
        }

        let rebuild = match &self.codec {
            Some((ck, cr, _)) => *ck != n_source || *cr != n_repair,
            None => true,
        };
        if rebuild {
            self.codec = Some((n_source, n_repair, make_codec(n_source, n_repair)?));
        }

        self.shards = vec![vec![0; symbol_size]; n_source + n_repair];
        self.n_source = n_source;
        self.symbol_size = symbol_size;
        self.encoded = false;
        Ok(())
    }

    fn set_symbol(&mut self, index: usize, symbol: &[u8]) {
        if index < self.n_source && symbol.len() == self.symbol_size {
            self.shards[index].copy_from_slice(symbol);
        }
    }

    fn repair_symbol(&mut self, index: usize) -> Option<Vec<u8>> {
        if index < self.n_source || index >= self.shards.len() {
            return None;
        }

        if !self.encoded {
            let (_, _, codec) = self.codec.as_ref()?;
            codec.encode(&mut self.shards).ok()?;
            self.encoded = true;
        }

        Some(self.shards[index].clone())
    }

    fn end_block(&mut self) {
        self.shards.clear();
        self.n_source = 0;
        self.symbol_size = 0;
        self.encoded = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbols(k: usize, size: usize) -> Vec<Vec<u8>> {
        (0..k)
            .map(|i| (0..size).map(|j| (i * 31 + j) as u8).collect())
            .collect()
    }

    fn encode_block(k: usize, r: usize, size: usize, data: &[Vec<u8>]) -> Vec<Vec<u8>> {
        let mut encoder = Rs8mEncoder::new();
        encoder.begin_block(k, r, size).unwrap();
        for (i, symbol) in data.iter().enumerate() {
            encoder.set_symbol(i, symbol);
        }
        let repair: Vec<Vec<u8>> = (k..k + r)
            .map(|i| encoder.repair_symbol(i).unwrap())
            .collect();
        encoder.end_block();
        repair
    }

    #[test]
    fn test_recovers_any_k_of_n() {
        let (k, r, size) = (10, 5, 40);
        let data = symbols(k, size);
        let repair = encode_block(k, r, size, &data);

        // Drop source symbols 0, 3, 7; give all repairs.
        let mut decoder = Rs8mDecoder::new();
        decoder.begin_block(k, r, size).unwrap();
        for (i, symbol) in data.iter().enumerate() {
            if i != 0 && i != 3 && i != 7 {
                decoder.set_symbol(i, symbol);
            }
        }
        for (i, symbol) in repair.iter().enumerate() {
            decoder.set_symbol(k + i, symbol);
        }

        for missing in [0usize, 3, 7] {
            assert_eq!(decoder.repair_symbol(missing).unwrap(), data[missing]);
        }
        decoder.end_block();
    }

    #[test]
    fn test_too_many_losses_fails() {
        let (k, r, size) = (4, 2, 16);
        let data = symbols(k, size);
        let repair = encode_block(k, r, size, &data);

        // Only 3 of 6 symbols arrive: unrecoverable.
        let mut decoder = Rs8mDecoder::new();
        decoder.begin_block(k, r, size).unwrap();
        decoder.set_symbol(1, &data[1]);
        decoder.set_symbol(4, &repair[0]);
        decoder.set_symbol(5, &repair[1]);

        assert!(decoder.repair_symbol(0).is_none());
    }

    #[test]
    fn test_rejects_bad_shapes() {
        let mut decoder = Rs8mDecoder::new();
        assert!(decoder.begin_block(0, 5, 16).is_err());
        assert!(decoder.begin_block(200, 100, 16).is_err());
        assert!(decoder.begin_block(10, 5, 0).is_err());
    }

    #[test]
    fn test_codec_reuse_across_blocks() {
        let (k, r, size) = (6, 3, 24);
        let mut decoder = Rs8mDecoder::new();

        for block in 0..3 {
            let data: Vec<Vec<u8>> = (0..k)
                .map(|i| (0..size).map(|j| (block * 7 + i * 13 + j) as u8).collect())
                .collect();
            let repair = encode_block(k, r, size, &data);

            decoder.begin_block(k, r, size).unwrap();
            for (i, symbol) in data.iter().enumerate().skip(1) {
                decoder.set_symbol(i, symbol);
            }
            for (i, symbol) in repair.iter().enumerate() {
                decoder.set_symbol(k + i, symbol);
            }
            assert_eq!(decoder.repair_symbol(0).unwrap(), data[0]);
            decoder.end_block();
        }
    }
}
