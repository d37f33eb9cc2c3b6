//! Receiver slot: an endpoint binding group.
//!
//! A slot binds up to three endpoints (source, repair, control),
//! validates that their protocols pair up, and owns the session group
//! fed by them.

use std::sync::Arc;

use tracing::{debug, info};

use audiolink_audio_core::{Frame, ResamplerRegistry, SampleSpec};
use audiolink_packet_core::rtp::EncodingMap;
use audiolink_packet_core::units::Nanos;
use audiolink_packet_core::{BufferPool, PacketPtr, RecvReport, SendReport, SourceId};

use crate::config::{Interface, ReceiverConfig, SlotMetrics};
use crate::endpoint::{Endpoint, EndpointUri, IngressWriter};
use crate::error::{Error, Result};
use crate::session_group::SessionGroup;

/// Identifier of a slot within its receiver.
pub type SlotId = u64;

/// One endpoint binding group with its sessions.
pub struct ReceiverSlot {
    id: SlotId,

    source_endpoint: Option<Endpoint>,
    repair_endpoint: Option<Endpoint>,
    control_endpoint: Option<Endpoint>,

    group: SessionGroup,

    /// Scratch for ingress draining.
    drained: Vec<PacketPtr>,
}

impl ReceiverSlot {
    pub fn new(
        id: SlotId,
        config: &ReceiverConfig,
        encoding_map: EncodingMap,
        output_spec: SampleSpec,
        pool: BufferPool,
        registry: Arc<dyn ResamplerRegistry>,
    ) -> Self {
        info!(slot = id, "receiver slot: created");
        Self {
            id,
            source_endpoint: None,
            repair_endpoint: None,
            control_endpoint: None,
            group: SessionGroup::new(
                config.session.clone(),
                encoding_map,
                output_spec,
                config.max_sessions_per_slot,
                pool,
                registry,
            ),
            drained: Vec::new(),
        }
    }

    pub fn id(&self) -> SlotId {
        self.id
    }

    /// Bind an endpoint. Rejects duplicate interfaces and incompatible
    /// protocol pairings; the slot is left untouched on rejection.
    pub fn add_endpoint(
        &mut self,
        iface: Interface,
        uri: EndpointUri,
        pool: BufferPool,
        ingress_len: usize,
    ) -> Result<IngressWriter> {
        let slot = match iface {
            Interface::AudioSource => {
                if !uri.protocol.is_source() {
                    return Err(Error::SlotError(format!(
                        "protocol {} is not a source protocol",
                        uri
                    )));
                }
                &mut self.source_endpoint
            }
            Interface::AudioRepair => {
                if !uri.protocol.is_repair() {
                    return Err(Error::SlotError(format!(
                        "protocol {} is not a repair protocol",
                        uri
                    )));
                }
                &mut self.repair_endpoint
            }
            Interface::Control => {
                if !uri.protocol.is_control() {
                    return Err(Error::SlotError(format!(
                        "protocol {} is not a control protocol",
                        uri
                    )));
                }
                &mut self.control_endpoint
            }
        };

        if slot.is_some() {
            return Err(Error::SlotError(format!(
                "interface {iface:?} already bound"
            )));
        }

        // Source and repair must agree on the FEC scheme.
        match iface {
            Interface::AudioSource => {
                if let Some(repair) = &self.repair_endpoint {
                    if repair.protocol().fec_scheme() != uri.protocol.fec_scheme() {
                        return Err(Error::SlotError(format!(
                            "source {} does not match repair {}",
                            uri,
                            repair.uri()
                        )));
                    }
                }
            }
            Interface::AudioRepair => {
                if let Some(source) = &self.source_endpoint {
                    if source.protocol().fec_scheme() != uri.protocol.fec_scheme() {
                        return Err(Error::SlotError(format!(
                            "repair {} does not match source {}",
                            uri,
                            source.uri()
                        )));
                    }
                }
            }
            Interface::Control => {}
        }

        info!(slot = self.id, ?iface, %uri, "receiver slot: binding endpoint");

        let endpoint = Endpoint::new(uri, pool, ingress_len);
        let writer = endpoint.writer();

        if iface == Interface::AudioRepair {
            self.group
                .set_fec_scheme(endpoint.protocol().fec_scheme());
        }

        let slot = match iface {
            Interface::AudioSource => &mut self.source_endpoint,
            Interface::AudioRepair => &mut self.repair_endpoint,
            Interface::Control => &mut self.control_endpoint,
        };
        *slot = Some(endpoint);

        Ok(writer)
    }

    /// Drain ingress queues into the session group and reap dead
    /// sessions. Runs on the pipeline thread at frame boundaries.
    pub fn refresh(&mut self, max_packets: usize) {
        self.drained.clear();

        if let Some(endpoint) = &self.source_endpoint {
            endpoint.drain(&mut self.drained, max_packets);
        }
        if let Some(endpoint) = &self.repair_endpoint {
            endpoint.drain(&mut self.drained, max_packets);
        }
        if let Some(endpoint) = &self.control_endpoint {
            // Control payloads are consumed by the RTCP layer, not the
            // media path.
            let mut control = Vec::new();
            endpoint.drain(&mut control, max_packets);
            if !control.is_empty() {
                debug!(
                    slot = self.id,
                    n = control.len(),
                    "receiver slot: discarding control datagrams from media path"
                );
            }
        }

        for packet in self.drained.drain(..) {
            self.group.route_packet(packet);
        }

        self.group.reap_dead_sessions();
    }

    pub fn read_mixed(&mut self, frame: &mut Frame, duration: usize) {
        self.group.read_mixed(frame, duration);
    }

    pub fn reclock(&mut self, playback_time: Nanos) {
        self.group.reclock(playback_time);
    }

    pub fn num_sessions(&self) -> usize {
        self.group.num_sessions()
    }

    pub fn process_report(&mut self, report: &SendReport) {
        self.group.process_report(report);
    }

    pub fn link_flows(&mut self, source_id: SourceId, repair_id: SourceId) {
        self.group.link_flows(source_id, repair_id);
    }

    pub fn generate_reports(
        &self,
        receiver_cname: &str,
        receiver_ssrc: SourceId,
        report_time: Nanos,
    ) -> Vec<RecvReport> {
        self.group
            .generate_reports(receiver_cname, receiver_ssrc, report_time)
    }

    pub fn metrics(&self) -> SlotMetrics {
        let endpoint_stats = |ep: &Option<Endpoint>| {
            ep.as_ref()
                .map(|e| (e.malformed(), e.ingress_dropped()))
                .unwrap_or((0, 0))
        };
        let (m1, d1) = endpoint_stats(&self.source_endpoint);
        let (m2, d2) = endpoint_stats(&self.repair_endpoint);
        let (m3, d3) = endpoint_stats(&self.control_endpoint);

        SlotMetrics {
            num_sessions: self.group.num_sessions(),
            malformed_packets: m1 + m2 + m3,
            ingress_dropped: d1 + d2 + d3,
            sessions: self.group.session_metrics(),
        }
    }
}
