//! Receiver source: slots behind a single frame source.

use std::sync::Arc;

use tracing::debug;

use audiolink_audio_core::{
    BuiltinResamplerRegistry, Frame, Mixer, ResamplerRegistry, SampleSpec,
};
use audiolink_packet_core::rtp::EncodingMap;
use audiolink_packet_core::units::Nanos;
use audiolink_packet_core::{BufferPool, RecvReport, SendReport, SourceId};

use crate::config::{Interface, ReceiverConfig, SlotMetrics};
use crate::endpoint::EndpointUri;
use crate::error::{Error, Result};
use crate::slot::{ReceiverSlot, SlotId};

/// The receiver pipeline behind the audio backend's `read` calls.
///
/// Owns all slots and mixes their session groups into one output
/// stream. All methods run on the pipeline thread; thread safety is
/// provided by the loop wrapper.
pub struct ReceiverSource {
    config: ReceiverConfig,
    output_spec: SampleSpec,

    slots: Vec<ReceiverSlot>,
    next_slot_id: SlotId,

    encoding_map: EncodingMap,
    pool: BufferPool,
    registry: Arc<dyn ResamplerRegistry>,

    mixer: Mixer,
    scratch: Frame,
    num_sessions: usize,
}

impl ReceiverSource {
    pub fn new(config: ReceiverConfig, encoding_map: EncodingMap) -> Result<Self> {
        Self::with_registry(config, encoding_map, Arc::new(BuiltinResamplerRegistry))
    }

    /// Construct with an injected resampler registry (tests substitute
    /// fakes here).
    pub fn with_registry(
        mut config: ReceiverConfig,
        encoding_map: EncodingMap,
        registry: Arc<dyn ResamplerRegistry>,
    ) -> Result<Self> {
        config.deduce_defaults();
        config.validate()?;

        let output_spec = SampleSpec::new(config.output_sample_rate, config.output_channels);
        let pool = BufferPool::new(config.max_packet_size, config.packet_pool_size);

        Ok(Self {
            config,
            output_spec,
            slots: Vec::new(),
            next_slot_id: 1,
            encoding_map,
            pool,
            registry,
            mixer: Mixer::new(),
            scratch: Frame::new(),
            num_sessions: 0,
        })
    }

    pub fn output_spec(&self) -> SampleSpec {
        self.output_spec
    }

    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    /// Create a slot and return its id.
    pub fn create_slot(&mut self) -> SlotId {
        let id = self.next_slot_id;
        self.next_slot_id += 1;
        self.slots.push(ReceiverSlot::new(
            id,
            &self.config,
            self.encoding_map.clone(),
            self.output_spec,
            self.pool.clone(),
            self.registry.clone(),
        ));
        id
    }

    /// Remove a slot, cancelling its pending packets.
    pub fn delete_slot(&mut self, id: SlotId) -> Result<()> {
        let before = self.slots.len();
        self.slots.retain(|slot| slot.id() != id);
        if self.slots.len() == before {
            return Err(Error::UnknownSlot(id));
        }
        debug!(slot = id, "receiver source: slot deleted");
        Ok(())
    }

    pub fn slot_mut(&mut self, id: SlotId) -> Result<&mut ReceiverSlot> {
        self.slots
            .iter_mut()
            .find(|slot| slot.id() == id)
            .ok_or(Error::UnknownSlot(id))
    }

    pub fn slot(&self, id: SlotId) -> Result<&ReceiverSlot> {
        self.slots
            .iter()
            .find(|slot| slot.id() == id)
            .ok_or(Error::UnknownSlot(id))
    }

    /// Bind an endpoint on a slot.
    pub fn add_endpoint(
        &mut self,
        slot_id: SlotId,
        iface: Interface,
        uri: EndpointUri,
    ) -> Result<crate::endpoint::IngressWriter> {
        let pool = self.pool.clone();
        let ingress_len = self.config.ingress_queue_len;
        self.slot_mut(slot_id)?
            .add_endpoint(iface, uri, pool, ingress_len)
    }

    /// Drain ingress and reap sessions on every slot.
    pub fn refresh(&mut self) {
        let max_packets = self.config.ingress_queue_len;
        for slot in &mut self.slots {
            slot.refresh(max_packets);
        }
    }

    /// Read one mixed frame of `duration` per-channel samples.
    pub fn read(&mut self, frame: &mut Frame, duration: usize) {
        self.mixer
            .begin(frame, duration * self.output_spec.num_channels());

        self.num_sessions = 0;
        for slot in &mut self.slots {
            slot.read_mixed(&mut self.scratch, duration);
            self.mixer.add(frame, &self.scratch);
            self.num_sessions += slot.num_sessions();
        }
    }

    /// Live sessions across all slots, as of the last read.
    pub fn num_sessions(&self) -> usize {
        self.num_sessions
    }

    /// Feed the playback wall-clock time to all sessions.
    pub fn reclock(&mut self, playback_time: Nanos) {
        for slot in &mut self.slots {
            slot.reclock(playback_time);
        }
    }

    /// Ingest an RTCP sender report.
    pub fn process_report(&mut self, report: &SendReport) {
        for slot in &mut self.slots {
            slot.process_report(report);
        }
    }

    /// Build receiver reports across all slots.
    pub fn generate_reports(
        &self,
        receiver_cname: &str,
        receiver_ssrc: SourceId,
        report_time: Nanos,
    ) -> Vec<RecvReport> {
        self.slots
            .iter()
            .flat_map(|slot| slot.generate_reports(receiver_cname, receiver_ssrc, report_time))
            .collect()
    }

    pub fn slot_metrics(&self, id: SlotId) -> Result<SlotMetrics> {
        Ok(self.slot(id)?.metrics())
    }
}
