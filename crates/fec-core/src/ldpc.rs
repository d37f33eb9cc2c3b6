//! LDPC-Staircase block codec, RFC 6816.
//!
//! The parity-check matrix is `H = [H1 | H2]`: H1 is a pseudo-random
//! sparse matrix with three ones per source column, generated with the
//! RFC 5170 Park–Miller PRNG so that both ends derive the same matrix;
//! H2 is the staircase (double diagonal) over the repair columns.
//! Decoding is iterative erasure substitution: an equation with exactly
//! one unknown symbol solves it, repeated to a fixed point. This
//! recovers the common loss patterns; blocks the iterative pass cannot
//! solve keep their holes, which the block reader tolerates.

use tracing::trace;

use crate::scheme::{BlockDecoder, BlockEncoder, CodecError, CodecResult};

/// SBN and ESI are 16-bit on the wire.
const MAX_BLOCK_LENGTH: usize = 65_535;

/// Ones per source column in H1.
const N1: usize = 3;

/// Park–Miller minimal standard generator, per RFC 5170.
struct Prng {
    state: u64,
}

impl Prng {
    fn new(seed: u32) -> Self {
        Self {
            state: seed.max(1) as u64,
        }
    }

    fn next(&mut self, max: usize) -> usize {
        self.state = self.state * 16_807 % 2_147_483_647;
        (self.state % max as u64) as usize
    }
}

/// Build the parity equations: `rows[i]` lists the symbol indices
/// (source and repair) participating in parity equation `i`.
fn build_equations(n_source: usize, n_repair: usize) -> Vec<Vec<usize>> {
    let mut rows: Vec<Vec<usize>> = vec![Vec::new(); n_repair];
    let mut prng = Prng::new(1);

    // H1: three distinct equations per source column.
    for col in 0..n_source {
        let mut picked = [usize::MAX; N1];
        let mut count = 0;
        while count < N1.min(n_repair) {
            let row = prng.next(n_repair);
            if !picked[..count].contains(&row) {
                picked[count] = row;
                count += 1;
            }
        }
        for &row in &picked[..count] {
            rows[row].push(col);
        }
    }

    // H2: staircase over the repair columns.
    for (i, row) in rows.iter_mut().enumerate() {
        row.push(n_source + i);
        if i > 0 {
            row.push(n_source + i - 1);
        }
    }

    rows
}

fn xor_into(acc: &mut [u8], symbol: &[u8]) {
    for (a, &b) in acc.iter_mut().zip(symbol) {
        *a ^= b;
    }
}

/// LDPC-Staircase decoder state for one block.
pub struct LdpcDecoder {
    equations: Vec<Vec<usize>>,
    symbols: Vec<Option<Vec<u8>>>,
    n_source: usize,
    symbol_size: usize,
    decoded: bool,
}

impl LdpcDecoder {
    pub fn new() -> Self {
        Self {
            equations: Vec::new(),
            symbols: Vec::new(),
            n_source: 0,
            symbol_size: 0,
            decoded: false,
        }
    }

    /// Iterate the equations until no more symbols can be solved.
    fn solve(&mut self) {
        loop {
            let mut progress = false;

            for row in &self.equations {
                let mut unknown = None;
                let mut n_unknown = 0;
                for &col in row {
                    if self.symbols[col].is_none() {
                        unknown = Some(col);
                        n_unknown += 1;
                        if n_unknown > 1 {
                            break;
                        }
                    }
                }

                if n_unknown == 1 {
                    let col = unknown.unwrap();
                    let mut acc = vec![0u8; self.symbol_size];
                    for &other in row {
                        if other != col {
                            xor_into(&mut acc, self.symbols[other].as_ref().unwrap());
                        }
                    }
                    self.symbols[col] = Some(acc);
                    progress = true;
                }
            }

            if !progress {
                break;
            }
        }

        trace!(
            solved = self.symbols.iter().filter(|s| s.is_some()).count(),
            total = self.symbols.len(),
            "ldpc: iterative pass finished"
        );
    }
}

impl Default for LdpcDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockDecoder for LdpcDecoder {
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

        self.equations = build_equations(n_source, n_repair);
        self.symbols = vec![None; n_source + n_repair];
        self.n_source = n_source;
        self.symbol_size = symbol_size;
        self.decoded = false;
        Ok(())
    }

    fn set_symbol(&mut self, index: usize, symbol: &[u8]) {
        if index < self.symbols.len() && symbol.len() == self.symbol_size {
            self.symbols[index] = Some(symbol.to_vec());
        }
    }

    fn repair_symbol(&mut self, index: usize) -> Option<Vec<u8>> {
        if index >= self.n_source {
            return None;
        }
        if !self.decoded {
            self.solve();
            self.decoded = true;
        }
        self.symbols[index].clone()
    }

    fn end_block(&mut self) {
        self.equations.clear();
        self.symbols.clear();
        self.n_source = 0;
        self.symbol_size = 0;
        self.decoded = false;
    }
}

/// LDPC-Staircase encoder state for one block.
pub struct LdpcEncoder {
    equations: Vec<Vec<usize>>,
    source: Vec<Vec<u8>>,
    repair: Vec<Option<Vec<u8>>>,
    n_source: usize,
    symbol_size: usize,
    encoded: bool,
}

impl LdpcEncoder {
    pub fn new() -> Self {
        Self {
            equations: Vec::new(),
            source: Vec::new(),
            repair: Vec::new(),
            n_source: 0,
            symbol_size: 0,
            encoded: false,
        }
    }

    fn encode(&mut self) {
        // repair[i] = xor(sources in equation i) ^ repair[i-1].
        let mut prev: Option<Vec<u8>> = None;
        for (i, row) in self.equations.iter().enumerate() {
            let mut acc = vec![0u8; self.symbol_size];
            for &col in row {
                if col < self.n_source {
                    xor_into(&mut acc, &self.source[col]);
                }
            }
            if let Some(prev) = &prev {
                xor_into(&mut acc, prev);
            }
            self.repair[i] = Some(acc.clone());
            prev = Some(acc);
        }
    }
}

impl Default for LdpcEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockEncoder for LdpcEncoder {
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

        self.equations = build_equations(n_source, n_repair);
        self.source = vec![vec![0; symbol_size]; n_source];
        self.repair = vec![None; n_repair];
        self.n_source = n_source;
        self.symbol_size = symbol_size;
        self.encoded = false;
        Ok(())
    }

    fn set_symbol(&mut self, index: usize, symbol: &[u8]) {
        if index < self.n_source && symbol.len() == self.symbol_size {
            self.source[index].copy_from_slice(symbol);
        }
    }

    fn repair_symbol(&mut self, index: usize) -> Option<Vec<u8>> {
        if index < self.n_source || index >= self.n_source + self.repair.len() {
            return None;
        }
        if !self.encoded {
            self.encode();
            self.encoded = true;
        }
        self.repair[index - self.n_source].clone()
    }

    fn end_block(&mut self) {
        self.equations.clear();
        self.source.clear();
        self.repair.clear();
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
            .map(|i| (0..size).map(|j| (i * 17 + j * 3) as u8).collect())
            .collect()
    }

    fn encode_block(k: usize, r: usize, size: usize, data: &[Vec<u8>]) -> Vec<Vec<u8>> {
        let mut encoder = LdpcEncoder::new();
        encoder.begin_block(k, r, size).unwrap();
        for (i, symbol) in data.iter().enumerate() {
            encoder.set_symbol(i, symbol);
        }
        (k..k + r)
            .map(|i| encoder.repair_symbol(i).unwrap())
            .collect()
    }

    #[test]
    fn test_equations_are_deterministic() {
        let a = build_equations(20, 10);
        let b = build_equations(20, 10);
        assert_eq!(a, b);
    }

    #[test]
    fn test_staircase_structure() {
        let rows = build_equations(10, 5);
        for (i, row) in rows.iter().enumerate() {
            assert!(row.contains(&(10 + i)));
            if i > 0 {
                assert!(row.contains(&(10 + i - 1)));
            }
        }
    }

    #[test]
    fn test_recovers_single_loss() {
        let (k, r, size) = (10, 5, 32);
        let data = symbols(k, size);
        let repair = encode_block(k, r, size, &data);

        let mut decoder = LdpcDecoder::new();
        decoder.begin_block(k, r, size).unwrap();
        for (i, symbol) in data.iter().enumerate() {
            if i != 3 {
                decoder.set_symbol(i, symbol);
            }
        }
        for (i, symbol) in repair.iter().enumerate() {
            decoder.set_symbol(k + i, symbol);
        }

        assert_eq!(decoder.repair_symbol(3).unwrap(), data[3]);
    }

    #[test]
    fn test_recovers_scattered_losses() {
        let (k, r, size) = (20, 10, 16);
        let data = symbols(k, size);
        let repair = encode_block(k, r, size, &data);

        let lost = [2usize, 11];
        let mut decoder = LdpcDecoder::new();
        decoder.begin_block(k, r, size).unwrap();
        for (i, symbol) in data.iter().enumerate() {
            if !lost.contains(&i) {
                decoder.set_symbol(i, symbol);
            }
        }
        for (i, symbol) in repair.iter().enumerate() {
            decoder.set_symbol(k + i, symbol);
        }

        for &missing in &lost {
            assert_eq!(
                decoder.repair_symbol(missing).as_deref(),
                Some(&data[missing][..]),
                "symbol {missing} not recovered"
            );
        }
    }

    #[test]
    fn test_unrecoverable_block_keeps_holes() {
        let (k, r, size) = (10, 2, 16);
        let data = symbols(k, size);
        let repair = encode_block(k, r, size, &data);

        // Five losses against two repair symbols cannot be solved.
        let mut decoder = LdpcDecoder::new();
        decoder.begin_block(k, r, size).unwrap();
        for (i, symbol) in data.iter().enumerate().skip(5) {
            decoder.set_symbol(i, symbol);
        }
        for (i, symbol) in repair.iter().enumerate() {
            decoder.set_symbol(k + i, symbol);
        }

        let recovered = (0..5)
            .filter(|&i| decoder.repair_symbol(i).is_some())
            .count();
        assert!(recovered < 5);
    }
}
