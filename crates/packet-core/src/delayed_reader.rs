//! Initial latency accumulation.
//!
//! Holds back the start of a session until enough packets are buffered to
//! span the target latency, so playback does not begin with an empty
//! queue and immediately underrun. Once the delay is established the
//! stage becomes transparent.

use tracing::{debug, info};

use crate::error::Result;
use crate::packet::PacketPtr;
use crate::queue::SortedQueue;
use crate::units::{stream_timestamp_diff, StreamTimestamp};
use crate::{PacketReader, PacketWriter, ReadMode};

/// Reader stage that delays session start until `delay` samples of
/// stream time are buffered.
pub struct DelayedReader {
    reader: Box<dyn PacketReader>,
    delay_queue: SortedQueue,
    delay: StreamTimestamp,
    loaded: bool,
    unloaded: bool,
}

impl DelayedReader {
    pub fn new(reader: Box<dyn PacketReader>, delay: StreamTimestamp) -> Self {
        debug!(delay, "delayed reader: initializing");
        Self {
            reader,
            delay_queue: SortedQueue::new(0),
            delay,
            loaded: false,
            unloaded: false,
        }
    }

    fn load_queue(&mut self) -> Result<bool> {
        // Pull everything available into the delay queue.
        while let Some(packet) = self.reader.read(ReadMode::Fetch)? {
            self.delay_queue.write(packet)?;
        }

        let initial = self.queue_duration();
        if initial < self.delay {
            // Not enough buffered yet, stay drained.
            return Ok(false);
        }

        // Trim overshoot from the front so we start close to the target.
        let mut trimmed = initial;
        let mut dropped = 0usize;
        while trimmed > self.delay {
            if self.delay_queue.read(ReadMode::Fetch)?.is_none() {
                break;
            }
            trimmed = self.queue_duration();
            dropped += 1;
        }

        info!(
            delay = self.delay,
            initial,
            trimmed,
            dropped,
            kept = self.delay_queue.len(),
            "delayed reader: starting"
        );

        Ok(true)
    }

    fn queue_duration(&self) -> StreamTimestamp {
        let (Some(head), Some(tail)) = (self.delay_queue.head(), self.delay_queue.tail()) else {
            return 0;
        };

        let span = stream_timestamp_diff(
            tail.rtp().map_or(0, |r| r.end_timestamp()),
            head.stream_timestamp(),
        );
        if span < 0 {
            debug!(span, "delayed reader: unexpected negative queue span");
            return 0;
        }
        span as StreamTimestamp
    }
}

impl PacketReader for DelayedReader {
    fn read(&mut self, mode: ReadMode) -> Result<Option<PacketPtr>> {
        if !self.loaded {
            if !self.load_queue()? {
                return Ok(None);
            }
            self.loaded = true;
        }

        if !self.unloaded {
            if !self.delay_queue.is_empty() {
                return self.delay_queue.read(mode);
            }
            self.unloaded = true;
        }

        self.reader.read(mode)
    }
}
