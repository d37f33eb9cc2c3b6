//! Receiver session: the per-SSRC pipeline instance.
//!
//! A session owns two packet lanes (source and repair) and the chain
//! that turns them into frames:
//!
//! ```text
//! route_packet -> meter -> sorted queue
//!                             |
//!   filter -> delayed reader -> fec reader -> filter -> ts injector
//!                             |
//!   depacketizer -> watchdog -> channel mapper -> resampler -> latency monitor
//! ```
//!
//! The chain never raises on the audio path: a failure latches the
//! session into the broken state, reads return silence, and the group
//! reaps it at the next refresh.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, info};

use audiolink_audio_core::depacketizer::DepacketizerCounters;
use audiolink_audio_core::{
    AudioError, ChannelMapperReader, ChannelSet, Depacketizer, DepacketizerMetrics, Frame,
    FrameReader, LatencyMetrics, LatencyMonitor, LatencyProbe, PcmCodec, ResamplerReader,
    ResamplerRegistry, SampleSpec, ScalingHandle, Watchdog,
};
use audiolink_fec_core::{new_block_decoder, BlockReader};
use audiolink_packet_core::router::Router;
use audiolink_packet_core::rtp::{ClockMapping, Encoding, Filter, TimestampInjector};
use audiolink_packet_core::units::Nanos;
use audiolink_packet_core::{
    packet::{FLAG_AUDIO, FLAG_REPAIR},
    BufferPool, FecScheme, LinkMeter, LinkMetrics, PacketPtr, PacketReader, PacketWriter,
    ReadMode, Result as PacketResult, SendReport, SortedQueue, SourceId,
};

use crate::config::SessionConfig;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// Created, no packet routed yet.
    Created,
    /// Packets arriving, no audible frame emitted yet.
    Receiving,
    /// Emitting audible frames.
    Playing,
    /// Broken; waiting to be reaped.
    Dead,
}

/// Per-session metrics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct SessionMetrics {
    pub source_id: SourceId,
    pub state: SessionState,
    pub link: LinkMetrics,
    pub repair_link: Option<LinkMetrics>,
    pub latency: LatencyMetrics,
    pub depacketizer: DepacketizerMetrics,
}

/// Sorted queue shared between the session's write path and the boxed
/// reader chain.
#[derive(Clone)]
struct SharedQueue(Arc<Mutex<SortedQueue>>);

impl SharedQueue {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(SortedQueue::new(0))))
    }

    fn write(&self, packet: PacketPtr) -> PacketResult<()> {
        self.0.lock().unwrap().write(packet)
    }
}

impl PacketReader for SharedQueue {
    fn read(&mut self, mode: ReadMode) -> PacketResult<Option<PacketPtr>> {
        self.0.lock().unwrap().read(mode)
    }
}

/// One per-SSRC receiver pipeline.
pub struct Session {
    source_id: SourceId,
    encoding: Encoding,

    /// Locks each lane onto the source id of its first packet.
    router: Router,
    audio_lane: usize,
    repair_lane: Option<usize>,

    source_queue: SharedQueue,
    repair_queue: Option<SharedQueue>,

    source_meter: LinkMeter,
    repair_meter: Option<LinkMeter>,

    probe: LatencyProbe,
    clock_mapping: ClockMapping,
    depacketizer_counters: Arc<DepacketizerCounters>,

    /// Outermost stage of the frame chain.
    monitor: LatencyMonitor,

    state: SessionState,
    fail_reason: Option<String>,
}

impl Session {
    /// Build the full chain for one SSRC.
    ///
    /// `fec_scheme` is the scheme of the slot's repair endpoint, if one
    /// is bound.
    pub fn new(
        source_id: SourceId,
        encoding: Encoding,
        fec_scheme: Option<FecScheme>,
        config: &SessionConfig,
        output_spec: SampleSpec,
        pool: BufferPool,
        registry: &dyn ResamplerRegistry,
    ) -> crate::error::Result<Self> {
        let pkt_channels = packet_channel_set(&encoding);
        let in_spec = SampleSpec::new(encoding.sample_rate, pkt_channels);

        let source_queue = SharedQueue::new();
        let source_meter =
            LinkMeter::new(encoding.sample_rate, config.sliding_stat_window_length);

        let probe = LatencyProbe::new();
        let scaling = ScalingHandle::new();
        let clock_mapping = ClockMapping::new();

        let target_ticks = in_spec.ns_to_stream_timestamp(config.latency.target_latency);

        // Packet chain, innermost first.
        let mut pkt_reader: Box<dyn PacketReader> = Box::new(source_queue.clone());

        pkt_reader = Box::new(Filter::new(
            pkt_reader,
            encoding.clone(),
            config.filter.clone(),
        ));

        pkt_reader = Box::new(audiolink_packet_core::delayed_reader::DelayedReader::new(
            pkt_reader,
            target_ticks,
        ));

        let (repair_queue, repair_meter) = if let Some(scheme) = fec_scheme {
            let repair_queue = SharedQueue::new();
            let repair_meter =
                LinkMeter::new(encoding.sample_rate, config.sliding_stat_window_length);

            pkt_reader = Box::new(BlockReader::new(
                &config.fec_reader,
                scheme,
                new_block_decoder(scheme),
                pkt_reader,
                Box::new(repair_queue.clone()),
                pool.clone(),
                source_meter.recovered_counter(),
            ));

            // Restored packets re-enter validation before depacketizing.
            pkt_reader = Box::new(Filter::new(
                pkt_reader,
                encoding.clone(),
                config.filter.clone(),
            ));

            (Some(repair_queue), Some(repair_meter))
        } else {
            (None, None)
        };

        pkt_reader = Box::new(TimestampInjector::new(
            pkt_reader,
            encoding.sample_rate,
            clock_mapping.clone(),
        ));

        // Frame chain.
        let depacketizer = Depacketizer::new(
            pkt_reader,
            PcmCodec::new(encoding.format),
            in_spec,
            probe.clone(),
        );
        let depacketizer_counters = depacketizer.counters();
        let mut frm_reader: Box<dyn FrameReader> = Box::new(depacketizer);

        frm_reader = Box::new(
            Watchdog::new(frm_reader, in_spec, &config.watchdog)
                .map_err(crate::error::Error::Audio)?,
        );

        let mapped_spec = SampleSpec::new(encoding.sample_rate, output_spec.channel_set());
        if in_spec.channel_set() != output_spec.channel_set() {
            frm_reader = Box::new(ChannelMapperReader::new(frm_reader, in_spec, mapped_spec));
        }

        let needs_resampler = config.latency.tuner_profile
            != audiolink_audio_core::LatencyTunerProfile::Intact
            || encoding.sample_rate != output_spec.sample_rate();
        if needs_resampler {
            let resampler = registry.new_resampler(
                config.resampler_backend,
                config.resampler_profile,
                &mapped_spec,
                &output_spec,
            )?;
            frm_reader = Box::new(ResamplerReader::new(
                frm_reader,
                resampler,
                output_spec.num_channels(),
                scaling.clone(),
            ));
        }

        let monitor = LatencyMonitor::new(
            frm_reader,
            probe.clone(),
            scaling,
            &config.latency,
            config.freq_est.clone(),
            in_spec,
        )?;

        info!(
            source_id,
            payload_type = encoding.payload_type,
            sample_rate = encoding.sample_rate,
            fec = fec_scheme.map(|s| s.to_string()),
            "session: created"
        );

        let mut router = Router::new();
        let audio_lane = router.add_route(FLAG_AUDIO);
        let repair_lane = repair_queue
            .is_some()
            .then(|| router.add_route(FLAG_REPAIR));

        Ok(Self {
            source_id,
            encoding,
            router,
            audio_lane,
            repair_lane,
            source_queue,
            repair_queue,
            source_meter,
            repair_meter,
            probe,
            clock_mapping,
            depacketizer_counters,
            monitor,
            state: SessionState::Created,
            fail_reason: None,
        })
    }

    pub fn source_id(&self) -> SourceId {
        self.source_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_alive(&self) -> bool {
        self.state != SessionState::Dead
    }

    /// Whether this session can consume a repair flow.
    pub fn has_repair_lane(&self) -> bool {
        self.repair_queue.is_some()
    }

    /// Route one incoming packet into the matching lane. Lanes lock
    /// onto the source id of their first packet; foreign or unmatched
    /// packets are dropped.
    pub fn route_packet(&mut self, packet: PacketPtr) -> PacketResult<()> {
        if self.state == SessionState::Dead {
            return Ok(());
        }
        if self.state == SessionState::Created {
            self.state = SessionState::Receiving;
        }

        let Some(lane) = self.router.route(&packet) else {
            debug!(
                source_id = self.source_id,
                "session: dropping unroutable packet"
            );
            return Ok(());
        };

        if Some(lane) == self.repair_lane {
            let (Some(queue), Some(meter)) = (&self.repair_queue, &mut self.repair_meter)
            else {
                return Ok(());
            };
            meter.process_incoming(&packet);
            return queue.write(packet);
        }

        debug_assert_eq!(lane, self.audio_lane);

        // Populate the duration early so latency can be measured against
        // the packet's end.
        if let Some(rtp) = packet.rtp() {
            if rtp.duration() == 0 {
                let samples = self.encoding.samples_per_payload(rtp.payload_len);
                rtp.set_duration(samples as u32);
            }
            self.probe.update_tail(rtp.end_timestamp());
        }

        self.source_meter.process_incoming(&packet);
        self.source_queue.write(packet)
    }

    /// Pull `duration` per-channel output samples through the chain.
    ///
    /// A broken session fills silence and reports `false`; the caller
    /// excludes it from mixing and reaps it.
    pub fn read_frame(&mut self, frame: &mut Frame, duration: usize) -> bool {
        if self.state == SessionState::Dead {
            frame.prepare(duration);
            return false;
        }

        match self.monitor.read(frame, duration) {
            Ok(()) => {
                if self.state == SessionState::Receiving
                    && frame.has_flags(audiolink_audio_core::FLAG_HAS_SIGNAL)
                {
                    self.state = SessionState::Playing;
                }
                true
            }
            Err(err) => {
                self.fail(&err);
                frame.prepare(duration);
                false
            }
        }
    }

    fn fail(&mut self, err: &AudioError) {
        info!(source_id = self.source_id, %err, "session: terminating");
        self.state = SessionState::Dead;
        self.fail_reason = Some(err.to_string());
    }

    /// Why the session died, if it did.
    pub fn fail_reason(&self) -> Option<&str> {
        self.fail_reason.as_deref()
    }

    /// Ingest an RTCP sender report for this session's source flow.
    pub fn process_report(&mut self, report: &SendReport) {
        if report.sender_source_id != self.source_id {
            return;
        }
        self.source_meter.process_rtt(report.rtt);
        self.clock_mapping
            .update(report.report_timestamp, report.stream_timestamp);
    }

    /// Feed the playback wall-clock time for e2e latency accounting.
    pub fn reclock(&mut self, playback_time: Nanos) {
        if self.state != SessionState::Dead {
            self.monitor.reclock(playback_time);
        }
    }

    pub fn metrics(&self) -> SessionMetrics {
        SessionMetrics {
            source_id: self.source_id,
            state: self.state,
            link: self.source_meter.metrics(),
            repair_link: self.repair_meter.as_ref().map(|m| m.metrics()),
            latency: self.monitor.metrics(),
            depacketizer: self.depacketizer_counters.snapshot(),
        }
    }

    pub(crate) fn source_meter(&self) -> &LinkMeter {
        &self.source_meter
    }

    pub(crate) fn repair_meter(&self) -> Option<&LinkMeter> {
        self.repair_meter.as_ref()
    }

    pub(crate) fn encoding(&self) -> &Encoding {
        &self.encoding
    }

    pub(crate) fn latency_metrics(&self) -> LatencyMetrics {
        self.monitor.metrics()
    }
}

fn packet_channel_set(encoding: &Encoding) -> ChannelSet {
    match encoding.num_channels {
        1 => ChannelSet::mono(),
        2 => ChannelSet::stereo(),
        n => ChannelSet::multitrack(n),
    }
}
