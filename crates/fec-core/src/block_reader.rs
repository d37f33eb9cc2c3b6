//! Block FEC reader.
//!
//! Consumes two packet streams (source and repair) carrying a block
//! code and produces the source packets in symbol order, reconstructing
//! missing ones whenever enough symbols of the block have arrived.
//!
//! The reader keeps exactly one block of state. The first packet of a
//! block commits its shape `(k, r)` and payload size; packets
//! disagreeing with a committed value are dropped, and growth is only
//! allowed between blocks. Protocol violations (block number jumps
//! beyond the tolerance, shapes above the codec limit, codec failures)
//! mark the reader dead, which tears down the owning session.

use tracing::{debug, trace};

use audiolink_packet_core::units::{blknum_diff, blknum_le, blknum_lt, BlockNum};
use audiolink_packet_core::{
    packet::FLAG_RESTORED, BufferPool, Error, FecScheme, PacketParser, PacketPtr, PacketReader,
    PacketWriter, ReadMode, Result, SharedCounter, SortedQueue,
};

use crate::scheme::BlockDecoder;

/// Block reader tunables.
#[derive(Debug, Clone)]
pub struct BlockReaderConfig {
    /// Maximum tolerated block number jump between packets.
    pub max_sbn_jump: usize,
}

impl Default for BlockReaderConfig {
    fn default() -> Self {
        Self { max_sbn_jump: 100 }
    }
}

/// Reader stage reconstructing lost source packets.
pub struct BlockReader {
    decoder: Box<dyn BlockDecoder>,
    source_reader: Box<dyn PacketReader>,
    repair_reader: Box<dyn PacketReader>,
    parser: PacketParser,
    pool: BufferPool,
    recovered: SharedCounter,

    source_queue: SortedQueue,
    repair_queue: SortedQueue,

    /// Slot `i` holds the source packet with ESI `i` of the current
    /// block, or `None` while it is missing.
    source_block: Vec<Option<PacketPtr>>,
    repair_block: Vec<Option<PacketPtr>>,

    alive: bool,
    started: bool,
    can_repair: bool,

    head_index: usize,
    cur_sbn: BlockNum,
    payload_size: usize,

    /// Shape commitment latches, reset at each block boundary.
    source_block_resized: bool,
    repair_block_resized: bool,
    payload_resized: bool,

    n_packets: u64,
    max_sbn_jump: usize,
    scheme: FecScheme,
}

impl BlockReader {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &BlockReaderConfig,
        scheme: FecScheme,
        decoder: Box<dyn BlockDecoder>,
        source_reader: Box<dyn PacketReader>,
        repair_reader: Box<dyn PacketReader>,
        pool: BufferPool,
        recovered: SharedCounter,
    ) -> Self {
        Self {
            decoder,
            source_reader,
            repair_reader,
            parser: PacketParser::new(audiolink_packet_core::ParserKind::FecSource(scheme)),
            pool,
            recovered,
            source_queue: SortedQueue::new(0),
            repair_queue: SortedQueue::new(0),
            source_block: Vec::new(),
            repair_block: Vec::new(),
            alive: true,
            started: false,
            can_repair: false,
            head_index: 0,
            cur_sbn: 0,
            payload_size: 0,
            source_block_resized: false,
            repair_block_resized: false,
            payload_resized: false,
            n_packets: 0,
            max_sbn_jump: config.max_sbn_jump,
            scheme,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    fn die(&mut self, reason: &str) -> Error {
        self.alive = false;
        Error::SessionFatal(format!("fec block reader: {reason}"))
    }

    fn read_inner(&mut self, mode: ReadMode) -> Result<Option<PacketPtr>> {
        self.fetch_all_packets()?;

        if !self.started {
            self.started = self.try_start();
        }

        if !self.started {
            // Until started, just forward all source packets.
            return self.source_queue.read(mode);
        }

        self.get_next_packet(mode)
    }

    fn try_start(&mut self) -> bool {
        let Some(pp) = self.source_queue.head() else {
            return false;
        };

        let fec = pp.fec().expect("source packets carry fec data").clone();

        if !self.process_source_packet(&pp) {
            trace!(
                esi = fec.encoding_symbol_id,
                sblen = fec.source_block_length,
                payload_size = fec.payload_len,
                "fec block reader: dropping leading source packet"
            );
            return false;
        }

        self.cur_sbn = fec.source_block_number;
        self.drop_repair_packets_from_prev_blocks();

        if fec.encoding_symbol_id > 0 {
            // Wait until the first packet of a block (ESI 0) leads.
            return false;
        }

        debug!(
            n_packets_before = self.n_packets,
            sbn = self.cur_sbn,
            "fec block reader: got first packet in a block, start decoding"
        );

        true
    }

    fn get_next_packet(&mut self, mode: ReadMode) -> Result<Option<PacketPtr>> {
        self.fill_block();
        if !self.alive {
            return Err(self.die("protocol violation while filling block"));
        }

        let mut pkt = self.source_block[self.head_index].clone();

        while self.alive {
            let next_index;

            if pkt.is_some() {
                next_index = self.head_index + 1;
            } else {
                // Repair as much as possible and store it in the block.
                self.try_repair()?;

                // Find the first present packet, starting from head.
                let mut scan = self.head_index;
                while scan < self.source_block.len() {
                    if self.source_block[scan].is_some() {
                        pkt = self.source_block[scan].clone();
                        scan += 1;
                        break;
                    }
                    scan += 1;
                }
                next_index = scan;
            }

            if pkt.is_none() && self.source_queue.is_empty() {
                // No head packet and nothing queued: give up for now.
                break;
            }
            if mode == ReadMode::Peek {
                // Peeking never advances the block.
                break;
            }

            // Switch to the next packet, and maybe the next block.
            self.head_index = next_index;
            if self.head_index == self.source_block.len() {
                self.next_block();
                if !self.alive {
                    return Err(self.die("protocol violation while filling block"));
                }
            }

            if pkt.is_some() {
                break;
            }
        }

        if !self.alive {
            return Err(self.die("reader died during block walk"));
        }

        Ok(pkt)
    }

    fn next_block(&mut self) {
        trace!(sbn = self.cur_sbn, "fec block reader: next block");

        for slot in &mut self.source_block {
            *slot = None;
        }
        for slot in &mut self.repair_block {
            *slot = None;
        }

        self.cur_sbn = self.cur_sbn.wrapping_add(1);
        self.head_index = 0;

        self.source_block_resized = false;
        self.repair_block_resized = false;
        self.payload_resized = false;

        self.can_repair = false;

        self.fill_block();
    }

    fn is_block_resized(&self) -> bool {
        self.source_block_resized && self.repair_block_resized && self.payload_resized
    }

    fn try_repair(&mut self) -> Result<()> {
        if !self.can_repair || !self.is_block_resized() {
            return Ok(());
        }

        let k = self.source_block.len();
        let r = self.repair_block.len();

        if let Err(err) = self.decoder.begin_block(k, r, self.payload_size) {
            debug!(
                k,
                r,
                payload_size = self.payload_size,
                %err,
                "fec block reader: can't begin decoder block, shutting down"
            );
            return Err(self.die("decoder rejected block"));
        }

        for (n, slot) in self.source_block.iter().enumerate() {
            if let Some(pp) = slot {
                self.decoder.set_symbol(n, pp.fec_payload());
            }
        }
        for (n, slot) in self.repair_block.iter().enumerate() {
            if let Some(pp) = slot {
                self.decoder.set_symbol(k + n, pp.fec_payload());
            }
        }

        for n in 0..k {
            if self.source_block[n].is_some() {
                continue;
            }

            let Some(buffer) = self.decoder.repair_symbol(n) else {
                continue;
            };

            match self.parser.parse_restored(&self.pool, &buffer) {
                Ok(Some(pp)) => {
                    self.source_block[n] = Some(pp);
                }
                Ok(None) => {
                    debug!("fec block reader: no buffers for repaired packet");
                }
                Err(err) => {
                    debug!(%err, "fec block reader: can't parse repaired packet");
                }
            }
        }

        self.decoder.end_block();
        self.can_repair = false;
        Ok(())
    }

    fn fetch_all_packets(&mut self) -> Result<()> {
        loop {
            let packet = match self.source_reader.read(ReadMode::Fetch) {
                Ok(Some(pp)) => pp,
                Ok(None) => break,
                Err(err) => return Err(err),
            };
            if !self.validate_fec_packet(&packet) {
                return Err(self.die("unexpected packet scheme"));
            }
            self.source_queue.write(packet)?;
        }

        loop {
            let packet = match self.repair_reader.read(ReadMode::Fetch) {
                Ok(Some(pp)) => pp,
                Ok(None) => break,
                Err(err) => return Err(err),
            };
            if !self.validate_fec_packet(&packet) {
                return Err(self.die("unexpected packet scheme"));
            }
            self.repair_queue.write(packet)?;
        }

        Ok(())
    }

    fn fill_block(&mut self) {
        self.fill_source_block();
        if self.alive {
            self.fill_repair_block();
        }
    }

    fn fill_source_block(&mut self) {
        let mut n_fetched = 0u32;
        let mut n_added = 0u32;
        let mut n_dropped = 0u32;

        loop {
            let Some(pp) = self.source_queue.head() else {
                break;
            };

            if !self.validate_sbn_sequence(&pp) {
                break;
            }

            let fec = pp.fec().expect("source packets carry fec data").clone();

            if !blknum_le(fec.source_block_number, self.cur_sbn) {
                // Head belongs to a future block; stop here.
                break;
            }

            let _ = self.source_queue.read(ReadMode::Fetch);
            n_fetched += 1;

            if blknum_lt(fec.source_block_number, self.cur_sbn) {
                trace!(
                    cur_sbn = self.cur_sbn,
                    pkt_sbn = fec.source_block_number,
                    pkt_esi = fec.encoding_symbol_id,
                    "fec block reader: dropping source packet from previous block"
                );
                n_dropped += 1;
                continue;
            }

            if !self.process_source_packet(&pp) {
                trace!(
                    esi = fec.encoding_symbol_id,
                    sblen = fec.source_block_length,
                    blen = fec.block_length,
                    payload_size = fec.payload_len,
                    "fec block reader: dropping source packet from current block"
                );
                n_dropped += 1;
                continue;
            }
            if !self.alive {
                return;
            }

            let p_num = fec.encoding_symbol_id;

            if self.source_block[p_num].is_none() {
                self.can_repair = true;
                self.source_block[p_num] = Some(pp);
                n_added += 1;
            }
        }

        if n_dropped != 0 || n_fetched != n_added {
            debug!(
                fetched = n_fetched,
                added = n_added,
                dropped = n_dropped,
                "fec block reader: source queue"
            );
        }
    }

    fn fill_repair_block(&mut self) {
        let mut n_fetched = 0u32;
        let mut n_added = 0u32;
        let mut n_dropped = 0u32;

        loop {
            let Some(pp) = self.repair_queue.head() else {
                break;
            };

            if !self.validate_sbn_sequence(&pp) {
                break;
            }

            let fec = pp.fec().expect("repair packets carry fec data").clone();

            if !blknum_le(fec.source_block_number, self.cur_sbn) {
                break;
            }

            let _ = self.repair_queue.read(ReadMode::Fetch);
            n_fetched += 1;

            if blknum_lt(fec.source_block_number, self.cur_sbn) {
                // Late repair for a retired block: dropped silently.
                trace!(
                    cur_sbn = self.cur_sbn,
                    pkt_sbn = fec.source_block_number,
                    "fec block reader: dropping repair packet from previous block"
                );
                n_dropped += 1;
                continue;
            }

            if !self.process_repair_packet(&pp) {
                trace!(
                    esi = fec.encoding_symbol_id,
                    sblen = fec.source_block_length,
                    blen = fec.block_length,
                    payload_size = fec.payload_len,
                    "fec block reader: dropping repair packet from current block"
                );
                n_dropped += 1;
                continue;
            }
            if !self.alive {
                return;
            }

            let p_num = fec.encoding_symbol_id - fec.source_block_length;

            if self.repair_block[p_num].is_none() {
                self.can_repair = true;
                self.repair_block[p_num] = Some(pp);
                n_added += 1;
            }
        }

        if n_dropped != 0 || n_fetched != n_added {
            debug!(
                fetched = n_fetched,
                added = n_added,
                dropped = n_dropped,
                "fec block reader: repair queue"
            );
        }
    }

    fn process_source_packet(&mut self, pp: &PacketPtr) -> bool {
        let fec = pp.fec().expect("source packets carry fec data").clone();

        if !validate_incoming_source_packet(&fec) {
            return false;
        }
        if !self.can_update_payload_size(fec.payload_len) {
            return false;
        }
        if !self.can_update_source_block_size(fec.source_block_length) {
            return false;
        }

        self.update_payload_size(fec.payload_len);
        self.update_source_block_size(fec.source_block_length)
    }

    fn process_repair_packet(&mut self, pp: &PacketPtr) -> bool {
        let fec = pp.fec().expect("repair packets carry fec data").clone();

        if !validate_incoming_repair_packet(&fec) {
            return false;
        }
        if !self.can_update_payload_size(fec.payload_len) {
            return false;
        }
        if !self.can_update_source_block_size(fec.source_block_length) {
            return false;
        }
        if !self.can_update_repair_block_size(fec.block_length) {
            return false;
        }

        self.update_payload_size(fec.payload_len);
        if !self.update_source_block_size(fec.source_block_length) {
            return false;
        }
        self.update_repair_block_size(fec.block_length)
    }

    fn validate_fec_packet(&mut self, pp: &PacketPtr) -> bool {
        if pp.fec().is_none() {
            debug!("fec block reader: unexpected non-fec packet, shutting down");
            self.alive = false;
            return false;
        }
        true
    }

    fn validate_sbn_sequence(&mut self, pp: &PacketPtr) -> bool {
        let fec = pp.fec().expect("fec packets carry fec data");

        let blk_dist = blknum_diff(fec.source_block_number, self.cur_sbn).unsigned_abs() as usize;

        if blk_dist > self.max_sbn_jump {
            debug!(
                cur_sbn = self.cur_sbn,
                pkt_sbn = fec.source_block_number,
                dist = blk_dist,
                max = self.max_sbn_jump,
                "fec block reader: too long source block number jump, shutting down"
            );
            self.alive = false;
            return false;
        }

        true
    }

    fn can_update_payload_size(&mut self, new_payload_size: usize) -> bool {
        if self.payload_size == new_payload_size {
            return true;
        }

        if self.payload_resized {
            debug!(
                cur_size = self.payload_size,
                new_size = new_payload_size,
                "fec block reader: can't change payload size in the middle of a block"
            );
            return false;
        }

        true
    }

    fn update_payload_size(&mut self, new_payload_size: usize) {
        if self.payload_size != new_payload_size {
            debug!(
                cur_size = self.payload_size,
                new_size = new_payload_size,
                "fec block reader: update payload size"
            );
            self.payload_size = new_payload_size;
        }
        self.payload_resized = true;
    }

    fn can_update_source_block_size(&mut self, new_sblen: usize) -> bool {
        let cur_sblen = self.source_block.len();

        if cur_sblen == new_sblen {
            return true;
        }

        if self.source_block_resized {
            debug!(
                cur_sblen,
                new_sblen,
                "fec block reader: can't change source block size in the middle of a block"
            );
            return false;
        }

        if new_sblen > self.decoder.max_block_length()
            || new_sblen > self.scheme.max_block_length()
        {
            debug!(
                cur_sblen,
                new_sblen,
                max = self.decoder.max_block_length(),
                "fec block reader: source block size above maximum, shutting down"
            );
            self.alive = false;
            return false;
        }

        true
    }

    fn update_source_block_size(&mut self, new_sblen: usize) -> bool {
        let cur_sblen = self.source_block.len();

        if cur_sblen != new_sblen {
            debug!(
                cur_sblen,
                cur_rblen = self.repair_block.len(),
                new_sblen,
                "fec block reader: update source block size"
            );
            self.source_block.resize(new_sblen, None);
        }
        self.source_block_resized = true;
        true
    }

    fn can_update_repair_block_size(&mut self, new_blen: usize) -> bool {
        let cur_blen = self.source_block.len() + self.repair_block.len();

        if new_blen == cur_blen {
            return true;
        }

        if self.repair_block_resized {
            debug!(
                cur_blen,
                new_blen,
                "fec block reader: can't change repair block size in the middle of a block"
            );
            return false;
        }

        if new_blen > self.decoder.max_block_length() || new_blen > self.scheme.max_block_length()
        {
            debug!(
                cur_blen,
                new_blen,
                max = self.decoder.max_block_length(),
                "fec block reader: repair block size above maximum, shutting down"
            );
            self.alive = false;
            return false;
        }

        true
    }

    fn update_repair_block_size(&mut self, new_blen: usize) -> bool {
        let cur_sblen = self.source_block.len();
        let cur_rblen = self.repair_block.len();

        if new_blen != cur_sblen + cur_rblen {
            // Shape validation guarantees blen > sblen here.
            let new_rblen = new_blen - cur_sblen;
            debug!(
                cur_sblen,
                cur_rblen, new_rblen, "fec block reader: update repair block size"
            );
            self.repair_block.resize(new_rblen, None);
        }
        self.repair_block_resized = true;
        true
    }

    fn drop_repair_packets_from_prev_blocks(&mut self) {
        let mut n_dropped = 0u32;

        loop {
            let Some(pp) = self.repair_queue.head() else {
                break;
            };

            let fec = pp.fec().expect("repair packets carry fec data");

            if !blknum_lt(fec.source_block_number, self.cur_sbn) {
                break;
            }

            trace!(
                cur_sbn = self.cur_sbn,
                pkt_sbn = fec.source_block_number,
                "fec block reader: dropping repair packet from previous blocks"
            );

            let _ = self.repair_queue.read(ReadMode::Fetch);
            n_dropped += 1;
        }

        if n_dropped != 0 {
            debug!(dropped = n_dropped, "fec block reader: repair queue");
        }
    }
}

fn validate_incoming_source_packet(fec: &audiolink_packet_core::FecData) -> bool {
    if fec.encoding_symbol_id >= fec.source_block_length {
        return false;
    }
    if fec.source_block_length == 0 {
        return false;
    }
    if fec.block_length != 0 && fec.source_block_length > fec.block_length {
        return false;
    }
    if fec.payload_len == 0 {
        return false;
    }
    true
}

fn validate_incoming_repair_packet(fec: &audiolink_packet_core::FecData) -> bool {
    if fec.encoding_symbol_id < fec.source_block_length {
        return false;
    }
    if fec.source_block_length == 0 {
        return false;
    }
    if fec.block_length != 0 {
        if fec.encoding_symbol_id >= fec.block_length {
            return false;
        }
        if fec.source_block_length > fec.block_length {
            return false;
        }
    }
    if fec.payload_len == 0 {
        return false;
    }
    true
}

impl PacketReader for BlockReader {
    fn read(&mut self, mode: ReadMode) -> Result<Option<PacketPtr>> {
        if !self.alive {
            return Err(Error::SessionFatal("fec block reader is dead".into()));
        }

        let result = self.read_inner(mode)?;

        if !self.alive {
            return Err(Error::SessionFatal("fec block reader is dead".into()));
        }

        if let Some(pp) = &result {
            if mode == ReadMode::Fetch {
                self.n_packets += 1;
                if pp.has_flags(FLAG_RESTORED) {
                    self.recovered.increment();
                }
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheme::{new_block_decoder, new_block_encoder};
    use audiolink_packet_core::fec::{compose_repair_id, compose_source_id};
    use audiolink_packet_core::rtp::header::RtpHeader;
    use audiolink_packet_core::ParserKind;
    use bytes::BytesMut;
    use std::sync::Arc;

    const K: usize = 10;
    const R: usize = 5;
    const SAMPLES: usize = 20;

    struct BlockGen {
        pool: BufferPool,
        parser: PacketParser,
        repair_parser: PacketParser,
        encoder: Box<dyn crate::scheme::BlockEncoder>,
        seqnum: u16,
        repair_seqnum: u16,
        timestamp: u32,
    }

    impl BlockGen {
        fn new() -> Self {
            Self {
                pool: BufferPool::new(512, 256),
                parser: PacketParser::new(ParserKind::FecSource(FecScheme::Rs8m)),
                repair_parser: PacketParser::new(ParserKind::FecRepair(FecScheme::Rs8m)),
                encoder: new_block_encoder(FecScheme::Rs8m),
                seqnum: 1,
                repair_seqnum: 1,
                timestamp: 0,
            }
        }

        /// Build one block: K source packets and R repair packets.
        fn block(&mut self, sbn: BlockNum) -> (Vec<PacketPtr>, Vec<PacketPtr>) {
            let mut symbols = Vec::new();
            let mut source_packets = Vec::new();

            for esi in 0..K {
                let mut buf = BytesMut::new();
                RtpHeader {
                    payload_type: 10,
                    marker: false,
                    seqnum: self.seqnum,
                    timestamp: self.timestamp,
                    ssrc: 0x42,
                    payload_offset: 12,
                    padding: 0,
                }
                .compose(&mut buf);
                for s in 0..SAMPLES {
                    buf.extend_from_slice(
                        &((self.seqnum as i16).wrapping_mul(3).wrapping_add(s as i16))
                            .to_be_bytes(),
                    );
                }
                compose_source_id(FecScheme::Rs8m, &mut buf, sbn, esi, K);

                self.seqnum = self.seqnum.wrapping_add(1);
                self.timestamp += SAMPLES as u32;

                symbols.push(buf.to_vec());
                source_packets
                    .push(self.parser.parse_bytes(&self.pool, &buf, None).unwrap().unwrap());
            }

            self.encoder
                .begin_block(K, R, symbols[0].len())
                .unwrap();
            for (i, symbol) in symbols.iter().enumerate() {
                self.encoder.set_symbol(i, symbol);
            }

            let mut repair_packets = Vec::new();
            for esi in K..K + R {
                let symbol = self.encoder.repair_symbol(esi).unwrap();
                let mut buf = BytesMut::new();
                RtpHeader {
                    payload_type: 109,
                    marker: false,
                    seqnum: self.repair_seqnum,
                    timestamp: self.timestamp,
                    ssrc: 0x43,
                    payload_offset: 12,
                    padding: 0,
                }
                .compose(&mut buf);
                compose_repair_id(FecScheme::Rs8m, &mut buf, sbn, esi, K, K + R);
                buf.extend_from_slice(&symbol);
                self.repair_seqnum = self.repair_seqnum.wrapping_add(1);
                repair_packets.push(
                    self.repair_parser
                        .parse_bytes(&self.pool, &buf, None)
                        .unwrap()
                        .unwrap(),
                );
            }
            self.encoder.end_block();

            (source_packets, repair_packets)
        }
    }

    fn reader(
        source: Vec<PacketPtr>,
        repair: Vec<PacketPtr>,
        pool: &BufferPool,
    ) -> (BlockReader, SharedCounter) {
        let mut source_queue = SortedQueue::new(0);
        for pp in source {
            source_queue.write(pp).unwrap();
        }
        let mut repair_queue = SortedQueue::new(0);
        for pp in repair {
            repair_queue.write(pp).unwrap();
        }

        let counter = SharedCounter::new();
        let reader = BlockReader::new(
            &BlockReaderConfig::default(),
            FecScheme::Rs8m,
            new_block_decoder(FecScheme::Rs8m),
            Box::new(source_queue),
            Box::new(repair_queue),
            pool.clone(),
            counter.clone(),
        );
        (reader, counter)
    }

    fn drain(reader: &mut BlockReader) -> Vec<u16> {
        let mut seqnums = Vec::new();
        while let Ok(Some(pp)) = reader.read(ReadMode::Fetch) {
            seqnums.push(pp.rtp().unwrap().seqnum);
        }
        seqnums
    }

    #[test]
    fn test_lossless_block_passes_through() {
        let mut gen = BlockGen::new();
        let (source, repair) = gen.block(0);
        let (mut reader, counter) = reader(source, repair, &gen.pool);

        let seqnums = drain(&mut reader);
        assert_eq!(seqnums, (1..=K as u16).collect::<Vec<_>>());
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn test_restores_lost_source_packets() {
        let mut gen = BlockGen::new();
        let (mut source, repair) = gen.block(0);

        // Lose packets with ESI 2 and 6.
        source.remove(6);
        source.remove(2);

        let (mut reader, counter) = reader(source, repair, &gen.pool);
        let seqnums = drain(&mut reader);

        // All K packets come out, in order, including the restored ones.
        assert_eq!(seqnums, (1..=K as u16).collect::<Vec<_>>());
        assert_eq!(counter.get(), 2);
    }

    #[test]
    fn test_restored_packets_carry_payload() {
        let mut gen = BlockGen::new();
        let (mut source, repair) = gen.block(0);
        let original = source[3].clone();
        source.remove(3);

        let (mut reader, _) = reader(source, repair, &gen.pool);

        let mut restored = None;
        while let Ok(Some(pp)) = reader.read(ReadMode::Fetch) {
            if pp.rtp().unwrap().seqnum == original.rtp().unwrap().seqnum {
                restored = Some(pp);
            }
        }

        let restored = restored.expect("packet not restored");
        assert!(restored.has_flags(FLAG_RESTORED));
        assert_eq!(restored.rtp_payload(), original.rtp_payload());
        assert_eq!(
            restored.rtp().unwrap().stream_timestamp,
            original.rtp().unwrap().stream_timestamp
        );
    }

    #[test]
    fn test_unrecoverable_block_leaves_gap() {
        let mut gen = BlockGen::new();
        let (mut source, mut repair) = gen.block(0);

        // Lose more than R symbols: 6 sources gone, all repairs kept
        // minus 2 -> 10 - 6 + 3 = 7 < K.
        for _ in 0..6 {
            source.remove(2);
        }
        repair.truncate(3);

        let (mut reader, counter) = reader(source, repair, &gen.pool);
        let seqnums = drain(&mut reader);

        // The surviving packets come out in order; the hole is skipped.
        assert_eq!(seqnums.len(), 4);
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn test_multiple_blocks_in_sequence() {
        let mut gen = BlockGen::new();
        let (mut s0, r0) = gen.block(0);
        let (mut s1, r1) = gen.block(1);

        s0.remove(4);
        s1.remove(8);

        let mut source = s0;
        source.extend(s1);
        let mut repair = r0;
        repair.extend(r1);

        let (mut reader, counter) = reader(source, repair, &gen.pool);
        let seqnums = drain(&mut reader);

        assert_eq!(seqnums, (1..=(2 * K) as u16).collect::<Vec<_>>());
        assert_eq!(counter.get(), 2);
    }

    #[test]
    fn test_repair_only_block_never_starts() {
        let mut gen = BlockGen::new();
        let (_, repair) = gen.block(0);

        let (mut reader, _) = reader(Vec::new(), repair, &gen.pool);
        assert!(reader.read(ReadMode::Fetch).unwrap().is_none());
        assert!(!reader.is_started());
    }

    #[test]
    fn test_sbn_jump_kills_reader() {
        let mut gen = BlockGen::new();
        let (s0, r0) = gen.block(0);
        let (s_far, r_far) = gen.block(500);

        let mut source = s0;
        source.extend(s_far);
        let mut repair = r0;
        repair.extend(r_far);

        let (mut reader, _) = reader(source, repair, &gen.pool);

        let mut died = false;
        loop {
            match reader.read(ReadMode::Fetch) {
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(_) => {
                    died = true;
                    break;
                }
            }
        }
        assert!(died);
        assert!(!reader.is_alive());
    }

    #[test]
    fn test_late_repair_for_retired_block_dropped() {
        let mut gen = BlockGen::new();
        let (_, r0_stale) = gen.block(0);
        let (mut s1, r1) = gen.block(1);

        // The session starts at block 1; repairs for the already retired
        // block 0 linger in the repair stream and must be discarded
        // without affecting decoding of block 1.
        s1.remove(5);

        let mut repair = r0_stale;
        repair.extend(r1);

        let (mut reader, counter) = reader(s1, repair, &gen.pool);
        let seqnums = drain(&mut reader);

        assert_eq!(seqnums, ((K + 1) as u16..=(2 * K) as u16).collect::<Vec<_>>());
        assert_eq!(counter.get(), 1);
        assert!(reader.is_alive());
    }
}
