//! Packet queues: seqnum-ordered buffering and lock-free ingress.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering as MemOrdering};
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::packet::PacketPtr;
use crate::{PacketReader, PacketWriter, ReadMode};

/// Priority queue of packets ordered by stream position.
///
/// Insertion keeps packets sorted by their wrap-aware comparison (sequence
/// number for RTP, block/symbol index for repair packets). A packet that
/// compares equal to one already queued is a duplicate and the later
/// arrival is dropped.
pub struct SortedQueue {
    packets: VecDeque<PacketPtr>,

    /// Upper bound on buffered packets, 0 = unbounded.
    max_len: usize,

    /// Newest packet ever accepted, kept even after it is fetched.
    latest: Option<PacketPtr>,

    /// Duplicates dropped so far.
    dup_count: u64,
}

impl SortedQueue {
    /// Create a queue. `max_len` of zero means unbounded.
    pub fn new(max_len: usize) -> Self {
        Self {
            packets: VecDeque::new(),
            max_len,
            latest: None,
            dup_count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Oldest queued packet.
    pub fn head(&self) -> Option<PacketPtr> {
        self.packets.front().cloned()
    }

    /// Newest queued packet.
    pub fn tail(&self) -> Option<PacketPtr> {
        self.packets.back().cloned()
    }

    /// Newest packet ever written, regardless of whether it has been
    /// fetched since. This is what latency is measured against.
    pub fn latest(&self) -> Option<PacketPtr> {
        self.latest.clone()
    }

    /// Duplicates dropped so far.
    pub fn dup_count(&self) -> u64 {
        self.dup_count
    }
}

impl PacketWriter for SortedQueue {
    fn write(&mut self, packet: PacketPtr) -> Result<()> {
        if self.max_len != 0 && self.packets.len() >= self.max_len {
            return Err(Error::QueueFull(self.max_len));
        }

        match &self.latest {
            Some(latest) if latest.compare(&packet) != Ordering::Less => {}
            _ => self.latest = Some(packet.clone()),
        }

        // New packets usually belong at the tail, so scan from the back.
        let mut pos = self.packets.len();
        for (i, queued) in self.packets.iter().enumerate().rev() {
            match queued.compare(&packet) {
                Ordering::Less => {
                    pos = i + 1;
                    break;
                }
                Ordering::Equal => {
                    self.dup_count += 1;
                    trace!("sorted queue: dropping duplicate packet");
                    return Ok(());
                }
                Ordering::Greater => {
                    pos = i;
                }
            }
        }

        self.packets.insert(pos, packet);
        Ok(())
    }
}

impl PacketReader for SortedQueue {
    fn read(&mut self, mode: ReadMode) -> Result<Option<PacketPtr>> {
        match mode {
            ReadMode::Fetch => Ok(self.packets.pop_front()),
            ReadMode::Peek => Ok(self.packets.front().cloned()),
        }
    }
}

/// Lock-free multi-producer single-consumer ingress ring.
///
/// Network threads push parsed packets; the pipeline thread drains them at
/// refresh time. The ring is bounded: when full, packets are dropped and
/// counted instead of blocking the network thread.
#[derive(Clone)]
pub struct IngressQueue {
    inner: Arc<IngressInner>,
}

struct IngressInner {
    ring: ArrayQueue<PacketPtr>,
    pushed: AtomicUsize,
    dropped: AtomicUsize,
}

impl IngressQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(IngressInner {
                ring: ArrayQueue::new(capacity.max(1)),
                pushed: AtomicUsize::new(0),
                dropped: AtomicUsize::new(0),
            }),
        }
    }

    /// Push a packet from a network thread. Never blocks.
    pub fn push(&self, packet: PacketPtr) {
        match self.inner.ring.push(packet) {
            Ok(()) => {
                self.inner.pushed.fetch_add(1, MemOrdering::Relaxed);
            }
            Err(_) => {
                let n = self.inner.dropped.fetch_add(1, MemOrdering::Relaxed) + 1;
                if n == 1 || n % 1000 == 0 {
                    debug!(dropped = n, "ingress queue full, dropping packet");
                }
            }
        }
    }

    /// Pop one packet on the pipeline thread.
    pub fn pop(&self) -> Option<PacketPtr> {
        self.inner.ring.pop()
    }

    pub fn len(&self) -> usize {
        self.inner.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.ring.is_empty()
    }

    /// Packets dropped because the ring was full.
    pub fn dropped(&self) -> usize {
        self.inner.dropped.load(MemOrdering::Relaxed)
    }
}
