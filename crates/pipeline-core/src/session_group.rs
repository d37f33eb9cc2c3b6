//! Session group: demultiplexing and mixing for one slot.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use audiolink_audio_core::{Frame, Mixer, ResamplerRegistry, SampleSpec};
use audiolink_packet_core::rtp::EncodingMap;
use audiolink_packet_core::units::Nanos;
use audiolink_packet_core::{
    packet::FLAG_REPAIR, BufferPool, FecScheme, PacketPtr, RecvReport, SendReport, SourceId,
};

use crate::config::SessionConfig;
use crate::session::{Session, SessionMetrics};

/// Owns every session of one slot and demultiplexes packets to them by
/// SSRC.
pub struct SessionGroup {
    sessions: HashMap<SourceId, Session>,

    /// Repair-flow SSRC to source-flow SSRC bindings.
    repair_routes: HashMap<SourceId, SourceId>,

    session_config: SessionConfig,
    encoding_map: EncodingMap,
    output_spec: SampleSpec,
    fec_scheme: Option<FecScheme>,
    max_sessions: usize,

    pool: BufferPool,
    registry: Arc<dyn ResamplerRegistry>,

    mixer: Mixer,
    scratch: Frame,

    /// Packets dropped because no session could take them.
    unrouted: u64,
}

impl SessionGroup {
    pub fn new(
        session_config: SessionConfig,
        encoding_map: EncodingMap,
        output_spec: SampleSpec,
        max_sessions: usize,
        pool: BufferPool,
        registry: Arc<dyn ResamplerRegistry>,
    ) -> Self {
        Self {
            sessions: HashMap::new(),
            repair_routes: HashMap::new(),
            session_config,
            encoding_map,
            output_spec,
            fec_scheme: None,
            max_sessions,
            pool,
            registry,
            mixer: Mixer::new(),
            scratch: Frame::new(),
            unrouted: 0,
        }
    }

    /// Set once the slot binds a repair endpoint; new sessions then get
    /// a repair lane and a block reader.
    pub fn set_fec_scheme(&mut self, scheme: Option<FecScheme>) {
        self.fec_scheme = scheme;
    }

    pub fn num_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Bind a repair-flow SSRC to a source-flow SSRC, typically learned
    /// from RTCP SDES (both flows share a CNAME).
    pub fn link_flows(&mut self, source_id: SourceId, repair_id: SourceId) {
        self.repair_routes.insert(repair_id, source_id);
    }

    /// Route one parsed packet to its session, creating a session for a
    /// new source SSRC.
    pub fn route_packet(&mut self, packet: PacketPtr) {
        let Some(ssrc) = packet.rtp().map(|rtp| rtp.source_id) else {
            self.unrouted += 1;
            return;
        };

        if packet.has_flags(FLAG_REPAIR) {
            self.route_repair_packet(ssrc, packet);
            return;
        }

        if !self.sessions.contains_key(&ssrc) {
            if !self.create_session(ssrc, &packet) {
                self.unrouted += 1;
                return;
            }
        }

        let session = self.sessions.get_mut(&ssrc).unwrap();
        if let Err(err) = session.route_packet(packet) {
            if err.is_transient() {
                debug!(ssrc, %err, "session group: dropping packet");
            } else {
                warn!(ssrc, %err, "session group: session failed on packet route");
            }
        }
    }

    fn route_repair_packet(&mut self, repair_ssrc: SourceId, packet: PacketPtr) {
        // Explicit binding first; otherwise, when exactly one session
        // can consume repair, the association is unambiguous and the
        // flow is bound to it.
        let target = self.repair_routes.get(&repair_ssrc).copied().or_else(|| {
            let mut candidates = self
                .sessions
                .values()
                .filter(|s| s.is_alive() && s.has_repair_lane())
                .map(|s| s.source_id());
            match (candidates.next(), candidates.next()) {
                (Some(only), None) => {
                    debug!(
                        repair_ssrc,
                        source_ssrc = only,
                        "session group: binding repair flow to sole session"
                    );
                    self.repair_routes.insert(repair_ssrc, only);
                    Some(only)
                }
                _ => None,
            }
        });

        match target.and_then(|ssrc| self.sessions.get_mut(&ssrc)) {
            Some(session) => {
                if let Err(err) = session.route_packet(packet) {
                    debug!(repair_ssrc, %err, "session group: dropping repair packet");
                }
            }
            None => {
                self.unrouted += 1;
            }
        }
    }

    fn create_session(&mut self, ssrc: SourceId, packet: &PacketPtr) -> bool {
        if self.sessions.len() >= self.max_sessions {
            debug!(
                ssrc,
                limit = self.max_sessions,
                "session group: session limit reached, dropping"
            );
            return false;
        }

        let payload_type = packet.rtp().unwrap().payload_type;
        let Some(encoding) = self.encoding_map.find_by_pt(payload_type) else {
            debug!(ssrc, payload_type, "session group: unknown payload type");
            return false;
        };

        match Session::new(
            ssrc,
            encoding.clone(),
            self.fec_scheme,
            &self.session_config,
            self.output_spec,
            self.pool.clone(),
            self.registry.as_ref(),
        ) {
            Ok(session) => {
                self.sessions.insert(ssrc, session);
                true
            }
            Err(err) => {
                warn!(ssrc, %err, "session group: can't create session");
                false
            }
        }
    }

    /// Remove dead sessions. Returns how many were reaped.
    pub fn reap_dead_sessions(&mut self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|ssrc, session| {
            if session.is_alive() {
                true
            } else {
                info!(
                    ssrc,
                    reason = session.fail_reason().unwrap_or("unknown"),
                    "session group: removing dead session"
                );
                false
            }
        });
        before - self.sessions.len()
    }

    /// Read `duration` per-channel samples from every live session and
    /// mix them into `frame`.
    pub fn read_mixed(&mut self, frame: &mut Frame, duration: usize) {
        self.mixer
            .begin(frame, duration * self.output_spec.num_channels());

        for session in self.sessions.values_mut() {
            if session.read_frame(&mut self.scratch, duration) {
                self.mixer.add(frame, &self.scratch);
            }
        }
    }

    /// Feed the playback wall-clock time to every live session.
    pub fn reclock(&mut self, playback_time: Nanos) {
        for session in self.sessions.values_mut() {
            session.reclock(playback_time);
        }
    }

    /// Ingest an RTCP sender report; the owning session is found by the
    /// sender SSRC.
    pub fn process_report(&mut self, report: &SendReport) {
        for session in self.sessions.values_mut() {
            session.process_report(report);
        }
    }

    /// Build receiver reports for every session with metrics, the way
    /// the RTCP layer consumes them.
    pub fn generate_reports(
        &self,
        receiver_cname: &str,
        receiver_ssrc: SourceId,
        report_time: Nanos,
    ) -> Vec<RecvReport> {
        let mut reports = Vec::new();

        for session in self.sessions.values() {
            if !session.source_meter().has_metrics() {
                continue;
            }

            let link = session.source_meter().metrics();
            let latency = session.latency_metrics();

            reports.push(RecvReport {
                receiver_cname: receiver_cname.to_string(),
                receiver_source_id: receiver_ssrc,
                sender_source_id: session.source_id(),
                report_timestamp: report_time,
                sample_rate: session.encoding().sample_rate,
                ext_first_seqnum: link.ext_first_seqnum,
                ext_last_seqnum: link.ext_last_seqnum,
                packet_count: link.expected_packets,
                cum_loss: link.lost_packets,
                jitter: link.jitter,
                niq_latency: latency.niq_latency,
                e2e_latency: latency.e2e_latency,
            });

            // A metered repair flow gets its own report.
            if let Some(repair_meter) = session.repair_meter() {
                if repair_meter.has_metrics() {
                    let repair_link = repair_meter.metrics();
                    let repair_ssrc = self
                        .repair_routes
                        .iter()
                        .find(|(_, &src)| src == session.source_id())
                        .map(|(&repair, _)| repair)
                        .unwrap_or(session.source_id());

                    reports.push(RecvReport {
                        receiver_cname: receiver_cname.to_string(),
                        receiver_source_id: receiver_ssrc,
                        sender_source_id: repair_ssrc,
                        report_timestamp: report_time,
                        sample_rate: session.encoding().sample_rate,
                        ext_first_seqnum: repair_link.ext_first_seqnum,
                        ext_last_seqnum: repair_link.ext_last_seqnum,
                        packet_count: repair_link.expected_packets,
                        cum_loss: repair_link.lost_packets,
                        jitter: repair_link.jitter,
                        niq_latency: 0,
                        e2e_latency: 0,
                    });
                }
            }
        }

        reports
    }

    pub fn session_metrics(&self) -> Vec<SessionMetrics> {
        self.sessions.values().map(|s| s.metrics()).collect()
    }

    pub fn unrouted(&self) -> u64 {
        self.unrouted
    }
}
