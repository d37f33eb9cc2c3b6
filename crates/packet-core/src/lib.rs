//! # Packet core for the AudioLink streaming toolkit
//!
//! `packet-core` provides the transport-side building blocks shared by the
//! receiver and sender pipelines:
//!
//! - **Packets**: pooled, reference-counted datagram views with UDP, RTP,
//!   and FEC layers
//! - **Pools**: fixed-size lock-free buffer pools sized at startup
//! - **Queues**: seqnum-ordered queues and lock-free ingress rings
//! - **RTP**: RFC 3550 header parsing/composing, payload-type registry,
//!   stream validation
//! - **Link metering**: per-flow loss, jitter, and RTT bookkeeping
//! - **RTCP report types**: the structs exchanged with the RTCP layer
//!   (wire encoding lives outside this crate)

pub mod error;
pub mod units;
pub mod packet;
pub mod pool;
pub mod queue;
pub mod stats;
pub mod rtp;
pub mod fec;
pub mod parser;
pub mod router;
pub mod delayed_reader;
pub mod link_meter;
pub mod rtcp;

pub use error::{Error, Result};
pub use fec::FecScheme;
pub use link_meter::{LinkMeter, LinkMetrics, SharedCounter};
pub use packet::{FecData, Packet, PacketPtr, RtpData, UdpData};
pub use parser::{PacketParser, ParserKind};
pub use pool::{BufferPool, BufferPoolStats, PooledBuffer};
pub use queue::{IngressQueue, SortedQueue};
pub use rtcp::{RecvReport, SendReport};
pub use units::{BlockNum, Nanos, Seqnum, SourceId, StreamTimestamp};

/// Default maximum size of a UDP datagram we accept.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 2048;

/// Read mode for packet readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Remove the packet from the stream.
    Fetch,
    /// Look at the next packet without consuming it.
    Peek,
}

/// Pull side of a packet pipeline stage.
///
/// `Ok(None)` means the stage has no packet to offer right now (drained);
/// an error means the stage is permanently broken and the owning session
/// must be torn down.
pub trait PacketReader {
    fn read(&mut self, mode: ReadMode) -> Result<Option<PacketPtr>>;
}

/// Push side of a packet pipeline stage.
pub trait PacketWriter {
    fn write(&mut self, packet: PacketPtr) -> Result<()>;
}
