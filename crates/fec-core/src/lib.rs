//! # FEC core for the AudioLink streaming toolkit
//!
//! Block forward-erasure correction: the codec contracts, two codec
//! implementations (Reed–Solomon over GF(2^8) per RFC 6865, and
//! LDPC-Staircase per RFC 6816), and the block reader that reconstructs
//! lost source packets from a pair of source/repair streams.
//!
//! Codecs are stateless across blocks; all block state lives in the
//! reader.

pub mod scheme;
pub mod rs8m;
pub mod ldpc;
pub mod block_reader;

pub use block_reader::{BlockReader, BlockReaderConfig};
pub use scheme::{new_block_decoder, new_block_encoder, BlockDecoder, BlockEncoder, CodecError};
