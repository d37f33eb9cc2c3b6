//! RTP stream validator.
//!
//! Sits between a sorted queue and its consumer. Non-RTP and out-of-place
//! packets are dropped and counted; sequence-number or timestamp jumps
//! beyond the configured thresholds are a protocol violation that kills
//! the whole session, not just the packet.

use tracing::debug;

use crate::error::{Error, Result};
use crate::packet::{PacketPtr, FLAG_AUDIO, FLAG_RTP};
use crate::rtp::encoding::Encoding;
use crate::units::{seqnum_diff, stream_timestamp_diff, Nanos, Seqnum, SourceId, StreamTimestamp, SECOND};
use crate::{PacketReader, ReadMode};

/// Validator thresholds.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Maximum allowed sequence number jump between consecutive packets.
    pub max_sn_jump: usize,

    /// Maximum allowed stream timestamp jump, in nanoseconds.
    pub max_ts_jump: Nanos,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            max_sn_jump: 100,
            max_ts_jump: SECOND,
        }
    }
}

struct PrevPacket {
    source_id: SourceId,
    payload_type: u8,
    seqnum: Seqnum,
    stream_timestamp: StreamTimestamp,
    capture_timestamp: Nanos,
}

/// Validating reader stage.
pub struct Filter {
    reader: Box<dyn PacketReader>,
    config: FilterConfig,
    encoding: Encoding,
    prev: Option<PrevPacket>,
    dropped: u64,
}

impl Filter {
    pub fn new(reader: Box<dyn PacketReader>, encoding: Encoding, config: FilterConfig) -> Self {
        Self {
            reader,
            config,
            encoding,
            prev: None,
            dropped: 0,
        }
    }

    /// Packets dropped for being out of place (not for jumps, which are
    /// fatal instead).
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn validate(&mut self, packet: &PacketPtr) -> Result<bool> {
        if !packet.has_flags(FLAG_RTP) || !packet.has_flags(FLAG_AUDIO) {
            debug!("rtp filter: unexpected non-audio packet");
            return Ok(false);
        }

        let rtp = packet.rtp().unwrap();

        let Some(prev) = &self.prev else {
            return Ok(true);
        };

        if rtp.source_id != prev.source_id {
            debug!(
                prev = prev.source_id,
                next = rtp.source_id,
                "rtp filter: source id jump"
            );
            return Ok(false);
        }

        if rtp.payload_type != prev.payload_type {
            debug!(
                prev = prev.payload_type,
                next = rtp.payload_type,
                "rtp filter: payload type jump"
            );
            return Ok(false);
        }

        let sn_dist = seqnum_diff(rtp.seqnum, prev.seqnum).unsigned_abs() as usize;
        if sn_dist > self.config.max_sn_jump {
            debug!(
                prev = prev.seqnum,
                next = rtp.seqnum,
                dist = sn_dist,
                max = self.config.max_sn_jump,
                "rtp filter: too long seqnum jump"
            );
            return Err(Error::SessionFatal(format!(
                "seqnum jump of {sn_dist} exceeds {}",
                self.config.max_sn_jump
            )));
        }

        let ts_dist =
            stream_timestamp_diff(rtp.stream_timestamp, prev.stream_timestamp).unsigned_abs();
        let ts_dist_ns = ts_dist as i64 * SECOND / self.encoding.sample_rate as i64;
        if ts_dist_ns > self.config.max_ts_jump {
            debug!(
                prev = prev.stream_timestamp,
                next = rtp.stream_timestamp,
                dist = ts_dist,
                "rtp filter: too long timestamp jump"
            );
            return Err(Error::SessionFatal(format!(
                "timestamp jump of {ts_dist} samples exceeds {} ns",
                self.config.max_ts_jump
            )));
        }

        let cts = rtp.capture_timestamp();
        if cts < 0 {
            debug!(cts, "rtp filter: invalid negative capture timestamp");
            return Ok(false);
        }
        if cts == 0 && prev.capture_timestamp != 0 {
            debug!("rtp filter: zero capture timestamp after non-zero");
            return Ok(false);
        }

        Ok(true)
    }

    fn remember(&mut self, packet: &PacketPtr) {
        let rtp = packet.rtp().unwrap();
        let newer = match &self.prev {
            None => true,
            Some(prev) => seqnum_diff(rtp.seqnum, prev.seqnum) > 0,
        };
        if newer {
            self.prev = Some(PrevPacket {
                source_id: rtp.source_id,
                payload_type: rtp.payload_type,
                seqnum: rtp.seqnum,
                stream_timestamp: rtp.stream_timestamp,
                capture_timestamp: rtp.capture_timestamp(),
            });
        }
    }

    fn populate(&self, packet: &PacketPtr) {
        let rtp = packet.rtp().unwrap();
        if rtp.duration() == 0 {
            let samples = self.encoding.samples_per_payload(rtp.payload_len);
            rtp.set_duration(samples as StreamTimestamp);
        }
    }
}

impl PacketReader for Filter {
    fn read(&mut self, mode: ReadMode) -> Result<Option<PacketPtr>> {
        loop {
            let Some(packet) = self.reader.read(mode)? else {
                return Ok(None);
            };

            if !self.validate(&packet)? {
                self.dropped += 1;
                if mode == ReadMode::Peek {
                    // Cannot consume in peek mode, report drained instead.
                    return Ok(None);
                }
                continue;
            }

            self.remember(&packet);
            self.populate(&packet);

            return Ok(Some(packet));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Packet, RtpData};
    use crate::pool::BufferPool;
    use crate::queue::SortedQueue;
    use crate::rtp::encoding::EncodingMap;
    use crate::PacketWriter;
    use std::sync::Arc;

    fn encoding() -> Encoding {
        EncodingMap::new().find_by_pt(10).unwrap().clone()
    }

    fn packet(pool: &BufferPool, seqnum: Seqnum, ts: StreamTimestamp) -> PacketPtr {
        Arc::new(Packet::new(
            FLAG_RTP | FLAG_AUDIO,
            None,
            Some(RtpData::new(0x5555, seqnum, ts, 10, false, 0, 400)),
            None,
            pool.acquire().unwrap(),
        ))
    }

    fn filter_over(packets: Vec<PacketPtr>) -> Filter {
        let mut queue = SortedQueue::new(0);
        for pkt in packets {
            queue.write(pkt).unwrap();
        }
        Filter::new(Box::new(queue), encoding(), FilterConfig::default())
    }

    #[test]
    fn test_accepts_ordered_stream() {
        let pool = BufferPool::new(512, 16);
        let mut filter = filter_over(vec![
            packet(&pool, 1, 0),
            packet(&pool, 2, 100),
            packet(&pool, 3, 200),
        ]);

        for expected in 1..=3u16 {
            let pkt = filter.read(ReadMode::Fetch).unwrap().unwrap();
            assert_eq!(pkt.rtp().unwrap().seqnum, expected);
            // Duration populated from the payload size: 400 bytes of
            // stereo S16 is 100 samples.
            assert_eq!(pkt.rtp().unwrap().duration(), 100);
        }
        assert!(filter.read(ReadMode::Fetch).unwrap().is_none());
    }

    #[test]
    fn test_seqnum_jump_is_session_fatal() {
        let pool = BufferPool::new(512, 16);
        let mut filter = filter_over(vec![packet(&pool, 1, 0), packet(&pool, 501, 100)]);

        assert!(filter.read(ReadMode::Fetch).unwrap().is_some());
        assert!(matches!(
            filter.read(ReadMode::Fetch),
            Err(Error::SessionFatal(_))
        ));
    }

    #[test]
    fn test_timestamp_jump_is_session_fatal() {
        let pool = BufferPool::new(512, 16);
        // Two seconds of timestamp jump at 44100 Hz.
        let mut filter = filter_over(vec![packet(&pool, 1, 0), packet(&pool, 2, 88_200)]);

        assert!(filter.read(ReadMode::Fetch).unwrap().is_some());
        assert!(matches!(
            filter.read(ReadMode::Fetch),
            Err(Error::SessionFatal(_))
        ));
    }

    #[test]
    fn test_foreign_ssrc_dropped_not_fatal() {
        let pool = BufferPool::new(512, 16);
        let good = packet(&pool, 1, 0);
        let foreign = Arc::new(Packet::new(
            FLAG_RTP | FLAG_AUDIO,
            None,
            Some(RtpData::new(0x6666, 2, 100, 10, false, 0, 400)),
            None,
            pool.acquire().unwrap(),
        ));
        let good2 = packet(&pool, 3, 200);

        let mut filter = filter_over(vec![good, foreign, good2]);

        assert_eq!(filter.read(ReadMode::Fetch).unwrap().unwrap().rtp().unwrap().seqnum, 1);
        // Foreign packet skipped, next good one returned.
        assert_eq!(filter.read(ReadMode::Fetch).unwrap().unwrap().rtp().unwrap().seqnum, 3);
        assert_eq!(filter.dropped(), 1);
    }
}
