//! Endpoint protocols, URIs, and ingress.
//!
//! An endpoint is where one packet stream enters the receiver. The
//! network layer writes raw datagrams through an [`IngressWriter`];
//! parsing happens right there on the network thread, and parsed packets
//! land in a lock-free ring drained by the pipeline thread.

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use audiolink_packet_core::packet::UdpData;
use audiolink_packet_core::units::Nanos;
use audiolink_packet_core::{
    BufferPool, FecScheme, IngressQueue, PacketParser, PacketPtr, ParserKind,
};

use crate::error::{Error, Result};

/// Wire protocol of one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Bare RTP.
    Rtp,
    /// RTP with Reed–Solomon source payload IDs.
    RtpRs8mSource,
    /// Reed–Solomon repair stream.
    Rs8mRepair,
    /// RTP with LDPC-Staircase source payload IDs.
    RtpLdpcSource,
    /// LDPC-Staircase repair stream.
    LdpcRepair,
    /// RTCP control stream.
    Rtcp,
}

impl Protocol {
    /// Scheme implied by the protocol, if any.
    pub fn fec_scheme(&self) -> Option<FecScheme> {
        match self {
            Protocol::Rtp | Protocol::Rtcp => None,
            Protocol::RtpRs8mSource | Protocol::Rs8mRepair => Some(FecScheme::Rs8m),
            Protocol::RtpLdpcSource | Protocol::LdpcRepair => Some(FecScheme::LdpcStaircase),
        }
    }

    pub fn is_source(&self) -> bool {
        matches!(
            self,
            Protocol::Rtp | Protocol::RtpRs8mSource | Protocol::RtpLdpcSource
        )
    }

    pub fn is_repair(&self) -> bool {
        matches!(self, Protocol::Rs8mRepair | Protocol::LdpcRepair)
    }

    pub fn is_control(&self) -> bool {
        matches!(self, Protocol::Rtcp)
    }

    fn scheme_str(&self) -> &'static str {
        match self {
            Protocol::Rtp => "rtp",
            Protocol::RtpRs8mSource => "rtp+rs8m",
            Protocol::Rs8mRepair => "rs8m",
            Protocol::RtpLdpcSource => "rtp+ldpc",
            Protocol::LdpcRepair => "ldpc",
            Protocol::Rtcp => "rtcp",
        }
    }
}

/// A parsed endpoint URI such as `rtp+rs8m://0.0.0.0:10001`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointUri {
    pub protocol: Protocol,
    pub addr: SocketAddr,
}

impl FromStr for EndpointUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| Error::InvalidUri(format!("missing scheme: {s}")))?;

        let protocol = match scheme {
            "rtp" => Protocol::Rtp,
            "rtp+rs8m" => Protocol::RtpRs8mSource,
            "rs8m" => Protocol::Rs8mRepair,
            "rtp+ldpc" => Protocol::RtpLdpcSource,
            "ldpc" => Protocol::LdpcRepair,
            "rtcp" => Protocol::Rtcp,
            other => return Err(Error::InvalidUri(format!("unknown scheme: {other}"))),
        };

        let addr = rest
            .parse()
            .map_err(|_| Error::InvalidUri(format!("bad address: {rest}")))?;

        Ok(Self { protocol, addr })
    }
}

impl std::fmt::Display for EndpointUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}", self.protocol.scheme_str(), self.addr)
    }
}

/// Writer handed to the network layer for one endpoint.
///
/// Parsing runs on the caller's thread; the pipeline is never blocked.
/// Malformed datagrams and pool exhaustion are counted, not propagated.
#[derive(Clone)]
pub struct IngressWriter {
    parser: PacketParser,
    pool: BufferPool,
    queue: IngressQueue,
    malformed: Arc<AtomicU64>,
}

impl IngressWriter {
    /// Parse and enqueue one received datagram.
    pub fn write_datagram(&self, data: &[u8], source_addr: SocketAddr, recv_time: Nanos) {
        let udp = UdpData {
            source_addr,
            queue_timestamp: recv_time,
        };

        match self.parser.parse_bytes(&self.pool, data, Some(udp)) {
            Ok(Some(packet)) => self.queue.push(packet),
            Ok(None) => {
                // Pool exhausted; the pool already counted it.
            }
            Err(err) => {
                let n = self.malformed.fetch_add(1, Ordering::Relaxed) + 1;
                if n == 1 || n % 1000 == 0 {
                    debug!(%err, malformed = n, "endpoint: dropping malformed datagram");
                }
            }
        }
    }

    /// Datagrams rejected by the parser.
    pub fn malformed(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }
}

/// One bound endpoint of a slot.
pub struct Endpoint {
    protocol: Protocol,
    uri: EndpointUri,
    queue: IngressQueue,
    writer: IngressWriter,
}

impl Endpoint {
    pub fn new(uri: EndpointUri, pool: BufferPool, ingress_len: usize) -> Self {
        let kind = match uri.protocol {
            Protocol::Rtp | Protocol::Rtcp => ParserKind::Rtp,
            Protocol::RtpRs8mSource => ParserKind::FecSource(FecScheme::Rs8m),
            Protocol::Rs8mRepair => ParserKind::FecRepair(FecScheme::Rs8m),
            Protocol::RtpLdpcSource => ParserKind::FecSource(FecScheme::LdpcStaircase),
            Protocol::LdpcRepair => ParserKind::FecRepair(FecScheme::LdpcStaircase),
        };

        let queue = IngressQueue::new(ingress_len);
        let writer = IngressWriter {
            parser: PacketParser::new(kind),
            pool,
            queue: queue.clone(),
            malformed: Arc::new(AtomicU64::new(0)),
        };

        Self {
            protocol: uri.protocol,
            uri,
            queue,
            writer,
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn uri(&self) -> &EndpointUri {
        &self.uri
    }

    pub fn writer(&self) -> IngressWriter {
        self.writer.clone()
    }

    /// Drain up to `max` packets on the pipeline thread.
    pub fn drain(&self, out: &mut Vec<PacketPtr>, max: usize) {
        for _ in 0..max {
            match self.queue.pop() {
                Some(packet) => out.push(packet),
                None => break,
            }
        }
    }

    pub fn malformed(&self) -> u64 {
        self.writer.malformed()
    }

    pub fn ingress_dropped(&self) -> u64 {
        self.queue.dropped() as u64
    }
}
