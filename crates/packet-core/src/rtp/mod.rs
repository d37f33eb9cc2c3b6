//! RTP support: header codec, payload-type registry, stream validation,
//! capture-timestamp injection.

pub mod header;
pub mod encoding;
pub mod filter;
pub mod timestamp_injector;

pub use encoding::{Encoding, EncodingMap, PayloadFormat};
pub use filter::{Filter, FilterConfig};
pub use header::RtpHeader;
pub use timestamp_injector::{ClockMapping, TimestampInjector};
