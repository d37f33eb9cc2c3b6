//! End-to-end receiver pipeline tests.
//!
//! Each test plays the sender role by composing real datagrams and
//! pushing them through an endpoint's ingress writer, then pulls mixed
//! frames out of the receiver and checks the output stream.

use bytes::{BufMut, BytesMut};

use audiolink_audio_core::{Frame, LatencyTunerProfile, FLAG_HAS_GAPS, FLAG_HAS_SIGNAL};
use audiolink_fec_core::{new_block_encoder, BlockEncoder};
use audiolink_packet_core::fec::{compose_repair_id, compose_source_id};
use audiolink_packet_core::rtp::header::RtpHeader;
use audiolink_packet_core::rtp::EncodingMap;
use audiolink_packet_core::units::SECOND;
use audiolink_packet_core::FecScheme;
use audiolink_pipeline_core::{Interface, Receiver, ReceiverConfig};

const SAMPLE_RATE: u32 = 44_100;
const SAMPLES_PER_PACKET: usize = 100;

/// Nanoseconds for `n` per-channel samples at the stream rate.
fn ns_for_samples(n: u64) -> i64 {
    (n as i128 * SECOND as i128 / SAMPLE_RATE as i128) as i64
}

/// Test configuration: fixed latency (3000 samples), no rate tuning, no
/// watchdog, so output is a bit-exact function of input.
fn test_config() -> ReceiverConfig {
    let mut config = ReceiverConfig::default();
    config.session.latency.target_latency = ns_for_samples(3_000);
    config.session.latency.tuner_profile = LatencyTunerProfile::Intact;
    config.session.watchdog.no_playback_timeout = -1;
    config.session.watchdog.choppy_playback_timeout = -1;
    config.session.watchdog.warmup_duration = -1;
    config
}

/// Sender side of one RTP flow.
struct RtpFlow {
    ssrc: u32,
    payload_type: u8,
    seqnum: u16,
    timestamp: u32,
    packets_sent: u64,
}

impl RtpFlow {
    fn new(ssrc: u32, payload_type: u8) -> Self {
        Self {
            ssrc,
            payload_type,
            seqnum: 1,
            timestamp: 0,
            packets_sent: 0,
        }
    }

    /// Compose one RTP datagram carrying interleaved L16 samples.
    fn datagram(&mut self, samples: &[i16]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        RtpHeader {
            payload_type: self.payload_type,
            marker: false,
            seqnum: self.seqnum,
            timestamp: self.timestamp,
            ssrc: self.ssrc,
            payload_offset: 12,
            padding: 0,
        }
        .compose(&mut buf);
        for &s in samples {
            buf.put_i16(s);
        }

        self.seqnum = self.seqnum.wrapping_add(1);
        self.timestamp = self
            .timestamp
            .wrapping_add((samples.len() / self.channels()) as u32);
        self.packets_sent += 1;

        buf.to_vec()
    }

    fn channels(&self) -> usize {
        if self.payload_type == 10 {
            2
        } else {
            1
        }
    }

    /// Skip ahead in the sequence number space without sending.
    fn jump_seqnum(&mut self, delta: u16) {
        self.seqnum = self.seqnum.wrapping_add(delta);
    }

    fn recv_time(&self) -> i64 {
        ns_for_samples(self.packets_sent * SAMPLES_PER_PACKET as u64)
    }
}

/// Deterministic stereo test signal for packet index `p`.
fn stereo_payload(p: usize) -> Vec<i16> {
    let mut samples = Vec::with_capacity(SAMPLES_PER_PACKET * 2);
    for s in 0..SAMPLES_PER_PACKET {
        let n = (p * SAMPLES_PER_PACKET + s) as i64;
        samples.push(((n * 7 + 13) % 30_000 - 15_000) as i16);
        samples.push(((n * 11 + 17) % 30_000 - 15_000) as i16);
    }
    samples
}

#[test]
fn bare_rtp_loopback() {
    const NUM_PACKETS: usize = 10_000;
    const PRIME_PACKETS: usize = 30; // exactly the 3000-sample delay

    let receiver = Receiver::new(test_config(), EncodingMap::new()).unwrap();
    let slot = receiver.create_slot().unwrap();
    let writer = receiver
        .add_endpoint(slot, Interface::AudioSource, "rtp://127.0.0.1:4000".parse().unwrap())
        .unwrap();

    let peer = "127.0.0.1:5000".parse().unwrap();
    let mut flow = RtpFlow::new(0x1001, 10);

    let mut next_packet = 0usize;
    let mut feed = |flow: &mut RtpFlow, next_packet: &mut usize| {
        if *next_packet < NUM_PACKETS {
            let data = flow.datagram(&stereo_payload(*next_packet));
            writer.write_datagram(&data, peer, flow.recv_time());
            *next_packet += 1;
        }
    };

    for _ in 0..PRIME_PACKETS {
        feed(&mut flow, &mut next_packet);
    }

    let mut frame = Frame::new();
    let mut output: Vec<f32> = Vec::with_capacity(NUM_PACKETS * SAMPLES_PER_PACKET * 2);
    let mut gap_frames = 0usize;

    for _ in 0..NUM_PACKETS {
        receiver.read(&mut frame, SAMPLES_PER_PACKET).unwrap();
        if frame.has_flags(FLAG_HAS_GAPS) {
            gap_frames += 1;
        }
        output.extend_from_slice(frame.samples());
        feed(&mut flow, &mut next_packet);
    }

    assert_eq!(gap_frames, 0, "no frame may be incomplete");
    assert_eq!(output.len(), NUM_PACKETS * SAMPLES_PER_PACKET * 2);
    assert_eq!(receiver.num_sessions(), 1);

    // Bit-exact: L16 decodes to s / 32768 with no further processing.
    for p in 0..NUM_PACKETS {
        let expected = stereo_payload(p);
        for (i, &s) in expected.iter().enumerate() {
            let got = output[p * SAMPLES_PER_PACKET * 2 + i];
            let want = s as f32 / 32_768.0;
            assert!(
                (got - want).abs() <= 1.0 / 32_768.0,
                "sample {i} of packet {p}: got {got}, want {want}"
            );
        }
    }
}

/// Sender side of an RTP + Reed-Solomon source/repair pair.
struct FecFlow {
    source: RtpFlow,
    repair_ssrc: u32,
    repair_seqnum: u16,
    encoder: Box<dyn BlockEncoder>,
    sbn: u16,
    k: usize,
    r: usize,
}

impl FecFlow {
    fn new(k: usize, r: usize) -> Self {
        Self {
            source: RtpFlow::new(0x2002, 10),
            repair_ssrc: 0x2003,
            repair_seqnum: 1,
            encoder: new_block_encoder(FecScheme::Rs8m),
            sbn: 0,
            k,
            r,
        }
    }

    /// Compose one block: `k` source datagrams followed by `r` repair
    /// datagrams. `first_packet` indexes the test signal.
    fn block(&mut self, first_packet: usize) -> (Vec<Vec<u8>>, Vec<Vec<u8>>) {
        let mut symbols = Vec::with_capacity(self.k);

        for esi in 0..self.k {
            let payload = stereo_payload(first_packet + esi);
            let rtp = self.source.datagram(&payload);

            let mut buf = BytesMut::from(&rtp[..]);
            compose_source_id(FecScheme::Rs8m, &mut buf, self.sbn as u16, esi, self.k);
            symbols.push(buf.to_vec());
        }

        let symbol_size = symbols[0].len();
        self.encoder.begin_block(self.k, self.r, symbol_size).unwrap();
        for (i, symbol) in symbols.iter().enumerate() {
            self.encoder.set_symbol(i, symbol);
        }

        let mut repair = Vec::with_capacity(self.r);
        for esi in self.k..self.k + self.r {
            let symbol = self.encoder.repair_symbol(esi).unwrap();
            let mut buf = BytesMut::new();
            RtpHeader {
                payload_type: 109,
                marker: false,
                seqnum: self.repair_seqnum,
                timestamp: 0,
                ssrc: self.repair_ssrc,
                payload_offset: 12,
                padding: 0,
            }
            .compose(&mut buf);
            compose_repair_id(
                FecScheme::Rs8m,
                &mut buf,
                self.sbn as u16,
                esi,
                self.k,
                self.k + self.r,
            );
            buf.extend_from_slice(&symbol);
            self.repair_seqnum = self.repair_seqnum.wrapping_add(1);
            repair.push(buf.to_vec());
        }
        self.encoder.end_block();

        self.sbn = self.sbn.wrapping_add(1);
        (symbols, repair)
    }
}

#[test]
fn fec_rs8m_with_losses() {
    const K: usize = 10;
    const R: usize = 5;
    const NUM_BLOCKS: usize = 50;
    const DROPPED_ESI: usize = 3;
    const PRIME_BLOCKS: usize = 3; // 3 blocks = the 3000-sample delay

    let receiver = Receiver::new(test_config(), EncodingMap::new()).unwrap();
    let slot = receiver.create_slot().unwrap();
    let source_writer = receiver
        .add_endpoint(
            slot,
            Interface::AudioSource,
            "rtp+rs8m://127.0.0.1:4000".parse().unwrap(),
        )
        .unwrap();
    let repair_writer = receiver
        .add_endpoint(
            slot,
            Interface::AudioRepair,
            "rs8m://127.0.0.1:4001".parse().unwrap(),
        )
        .unwrap();

    let peer = "127.0.0.1:5000".parse().unwrap();
    let mut flow = FecFlow::new(K, R);

    let mut feed_block = |flow: &mut FecFlow, block: usize| {
        let (source, repair) = flow.block(block * K);
        // The proxy drops source packet #3 of every block.
        for (esi, datagram) in source.iter().enumerate() {
            if esi != DROPPED_ESI {
                source_writer.write_datagram(datagram, peer, flow.source.recv_time());
            }
        }
        for datagram in &repair {
            repair_writer.write_datagram(datagram, peer, flow.source.recv_time());
        }
    };

    for block in 0..PRIME_BLOCKS {
        feed_block(&mut flow, block);
    }

    let mut frame = Frame::new();
    let mut output: Vec<f32> = Vec::new();
    let mut gap_frames = 0usize;

    for block in PRIME_BLOCKS..NUM_BLOCKS {
        feed_block(&mut flow, block);
        for _ in 0..K {
            receiver.read(&mut frame, SAMPLES_PER_PACKET).unwrap();
            if frame.has_flags(FLAG_HAS_GAPS) {
                gap_frames += 1;
            }
            output.extend_from_slice(frame.samples());
        }
    }
    // Drain the standing latency.
    for _ in 0..PRIME_BLOCKS * K {
        receiver.read(&mut frame, SAMPLES_PER_PACKET).unwrap();
        if frame.has_flags(FLAG_HAS_GAPS) {
            gap_frames += 1;
        }
        output.extend_from_slice(frame.samples());
    }

    assert_eq!(gap_frames, 0, "all dropped packets must be restored");

    // Every sample of every packet, including the dropped ones, must be
    // present in the output.
    for p in 0..NUM_BLOCKS * K {
        let expected = stereo_payload(p);
        for (i, &s) in expected.iter().enumerate() {
            let got = output[p * SAMPLES_PER_PACKET * 2 + i];
            let want = s as f32 / 32_768.0;
            assert!(
                (got - want).abs() <= 1.0 / 32_768.0,
                "sample {i} of packet {p}: got {got}, want {want}"
            );
        }
    }

    // The recovered counter equals the number of dropped packets.
    let metrics = receiver.query_slot_metrics(slot).unwrap();
    assert_eq!(metrics.num_sessions, 1);
    assert_eq!(metrics.sessions.len(), 1);
    assert_eq!(metrics.sessions[0].link.recovered_packets, NUM_BLOCKS as u64);
}

#[test]
fn validator_seq_jump() {
    const PRIME_PACKETS: usize = 10;

    let mut config = test_config();
    // 1000-sample delay so the session starts quickly.
    config.session.latency.target_latency = ns_for_samples(1_000);
    let receiver = Receiver::new(config, EncodingMap::new()).unwrap();
    let slot = receiver.create_slot().unwrap();
    let writer = receiver
        .add_endpoint(slot, Interface::AudioSource, "rtp://127.0.0.1:4000".parse().unwrap())
        .unwrap();

    let peer = "127.0.0.1:5000".parse().unwrap();
    let mut flow = RtpFlow::new(0x3003, 10);

    let mut frame = Frame::new();
    let mut packet = 0usize;

    // Clean warm-up of 100 packets, paced one per frame.
    for _ in 0..PRIME_PACKETS {
        let data = flow.datagram(&stereo_payload(packet));
        writer.write_datagram(&data, peer, flow.recv_time());
        packet += 1;
    }
    let mut signal_frames = 0;
    for _ in 0..100 - PRIME_PACKETS {
        let data = flow.datagram(&stereo_payload(packet));
        writer.write_datagram(&data, peer, flow.recv_time());
        packet += 1;

        receiver.read(&mut frame, SAMPLES_PER_PACKET).unwrap();
        if frame.has_flags(FLAG_HAS_SIGNAL) {
            signal_frames += 1;
        }
    }
    assert!(signal_frames > 0, "session must have been playing");
    assert_eq!(receiver.num_sessions(), 1);
    let before = receiver.query_slot_metrics(slot).unwrap();
    let first_session_start = before.sessions[0].link.ext_first_seqnum;

    // The jump: far beyond max_sn_jump of 100.
    flow.jump_seqnum(500);
    flow.timestamp = flow.timestamp.wrapping_add(500 * SAMPLES_PER_PACKET as u32);

    // Subsequent normal traffic from the jumped position.
    for _ in 0..60 {
        let data = flow.datagram(&stereo_payload(packet));
        writer.write_datagram(&data, peer, flow.recv_time());
        packet += 1;
        receiver.read(&mut frame, SAMPLES_PER_PACKET).unwrap();
    }

    // The old session was torn down and a new one created for the same
    // SSRC, starting at the post-jump sequence numbers.
    let after = receiver.query_slot_metrics(slot).unwrap();
    assert_eq!(after.num_sessions, 1);
    let second_session_start = after.sessions[0].link.ext_first_seqnum;
    assert!(
        second_session_start > first_session_start + 500,
        "expected a fresh session: {first_session_start} -> {second_session_start}"
    );

    // And the new session plays.
    let mut replaying = false;
    for _ in 0..40 {
        let data = flow.datagram(&stereo_payload(packet));
        writer.write_datagram(&data, peer, flow.recv_time());
        packet += 1;
        receiver.read(&mut frame, SAMPLES_PER_PACKET).unwrap();
        if frame.has_flags(FLAG_HAS_SIGNAL) {
            replaying = true;
        }
    }
    assert!(replaying);
}

#[test]
fn mix_two_sessions() {
    let receiver = Receiver::new(test_config(), EncodingMap::new()).unwrap();
    let slot = receiver.create_slot().unwrap();
    let writer = receiver
        .add_endpoint(slot, Interface::AudioSource, "rtp://127.0.0.1:4000".parse().unwrap())
        .unwrap();

    let peer_a = "127.0.0.1:5001".parse().unwrap();
    let peer_b = "127.0.0.1:5002".parse().unwrap();
    let mut flow_a = RtpFlow::new(0xAAAA, 10);
    let mut flow_b = RtpFlow::new(0xBBBB, 10);

    // Constant tones: 0.25 and 0.50 in L16.
    let tone_a = vec![8_192i16; SAMPLES_PER_PACKET * 2];
    let tone_b = vec![16_384i16; SAMPLES_PER_PACKET * 2];

    let mut feed = |flow_a: &mut RtpFlow, flow_b: &mut RtpFlow| {
        let a = flow_a.datagram(&tone_a);
        writer.write_datagram(&a, peer_a, flow_a.recv_time());
        let b = flow_b.datagram(&tone_b);
        writer.write_datagram(&b, peer_b, flow_b.recv_time());
    };

    for _ in 0..30 {
        feed(&mut flow_a, &mut flow_b);
    }

    let mut frame = Frame::new();
    for _ in 0..60 {
        receiver.read(&mut frame, SAMPLES_PER_PACKET).unwrap();
        feed(&mut flow_a, &mut flow_b);
    }

    assert_eq!(receiver.num_sessions(), 2);

    // Both sessions aligned and playing: the mix saturated-sums to 0.75.
    for &s in frame.samples() {
        assert!((s - 0.75).abs() < 1e-6, "mixed sample {s}");
    }
}
