//! Block codec contracts.

use thiserror::Error;

use audiolink_packet_core::FecScheme;

/// Result type for codec operations
pub type CodecResult<T> = std::result::Result<T, CodecError>;

/// Error types for codec operations
#[derive(Debug, Error)]
pub enum CodecError {
    /// Block shape the codec cannot handle
    #[error("unsupported block shape: k={k} r={r}")]
    UnsupportedShape { k: usize, r: usize },

    /// Symbol size mismatch or zero
    #[error("bad symbol size: {0}")]
    BadSymbolSize(usize),

    /// Internal codec failure
    #[error("codec failure: {0}")]
    Internal(String),
}

/// Decoder side of a block codec.
///
/// Usage per block: `begin_block`, then `set_symbol` for every symbol
/// that arrived (source symbols at `0..k`, repair at `k..k+r`), then
/// `repair_symbol` for each missing source index, then `end_block`.
/// The first `repair_symbol` call runs the actual decoding.
pub trait BlockDecoder: Send {
    /// Largest `k + r` this codec accepts.
    fn max_block_length(&self) -> usize;

    /// Start a block of `n_source + n_repair` symbols of `symbol_size`
    /// bytes.
    fn begin_block(
        &mut self,
        n_source: usize,
        n_repair: usize,
        symbol_size: usize,
    ) -> CodecResult<()>;

    /// Provide a received symbol.
    fn set_symbol(&mut self, index: usize, symbol: &[u8]);

    /// Reconstruct the source symbol at `index`, if the received symbols
    /// suffice. Returns `None` when the block is not decodable (yet).
    fn repair_symbol(&mut self, index: usize) -> Option<Vec<u8>>;

    /// Forget all block state.
    fn end_block(&mut self);
}

/// Encoder side of a block codec.
pub trait BlockEncoder: Send {
    /// Largest `k + r` this codec accepts.
    fn max_block_length(&self) -> usize;

    /// Start a block.
    fn begin_block(
        &mut self,
        n_source: usize,
        n_repair: usize,
        symbol_size: usize,
    ) -> CodecResult<()>;

    /// Provide a source symbol, `index < k`.
    fn set_symbol(&mut self, index: usize, symbol: &[u8]);

    /// Produce the repair symbol at `index`, `k <= index < k + r`.
    /// The first call runs the encoding.
    fn repair_symbol(&mut self, index: usize) -> Option<Vec<u8>>;

    /// Forget all block state.
    fn end_block(&mut self);
}

/// Build the decoder for a scheme.
pub fn new_block_decoder(scheme: FecScheme) -> Box<dyn BlockDecoder> {
    match scheme {
        FecScheme::Rs8m => Box::new(crate::rs8m::Rs8mDecoder::new()),
        FecScheme::LdpcStaircase => Box::new(crate::ldpc::LdpcDecoder::new()),
    }
}

/// Build the encoder for a scheme.
pub fn new_block_encoder(scheme: FecScheme) -> Box<dyn BlockEncoder> {
    match scheme {
        FecScheme::Rs8m => Box::new(crate::rs8m::Rs8mEncoder::new()),
        FecScheme::LdpcStaircase => Box::new(crate::ldpc::LdpcEncoder::new()),
    }
}
