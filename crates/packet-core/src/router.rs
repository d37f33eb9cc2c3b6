//! Packet lane routing.
//!
//! A session receives one mixed stream of parsed packets and splits it
//! into lanes (audio source, FEC repair) by packet flags. Each lane locks
//! onto the source id of the first packet it carries, so a flow cannot
//! silently change identity mid-session.

use tracing::debug;

use crate::packet::Packet;
use crate::units::SourceId;

struct Route {
    flags: u32,
    source_id: Option<SourceId>,
}

/// Flag-based lane router.
pub struct Router {
    routes: Vec<Route>,
    misrouted: u64,
}

impl Router {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            misrouted: 0,
        }
    }

    /// Register a lane matching the given packet flags. Returns the lane
    /// index used by `route`.
    pub fn add_route(&mut self, flags: u32) -> usize {
        self.routes.push(Route {
            flags,
            source_id: None,
        });
        self.routes.len() - 1
    }

    /// Select the lane for a packet, locking the lane's source id on
    /// first use. Returns `None` for packets that match no lane or that
    /// carry a foreign source id.
    pub fn route(&mut self, packet: &Packet) -> Option<usize> {
        for (index, route) in self.routes.iter_mut().enumerate() {
            if !packet.has_flags(route.flags) {
                continue;
            }

            let packet_source = packet.rtp().map(|rtp| rtp.source_id);

            match (route.source_id, packet_source) {
                (Some(locked), Some(actual)) if locked != actual => {
                    self.misrouted += 1;
                    debug!(locked, actual, "router: dropping foreign source id");
                    return None;
                }
                (None, Some(actual)) => {
                    route.source_id = Some(actual);
                }
                _ => {}
            }

            return Some(index);
        }

        self.misrouted += 1;
        None
    }

    /// Source id locked onto the lane matching `flags`, if any.
    pub fn source_id(&self, flags: u32) -> Option<SourceId> {
        self.routes
            .iter()
            .find(|route| route.flags == flags)
            .and_then(|route| route.source_id)
    }

    /// Packets that matched no lane or carried a foreign source id.
    pub fn misrouted(&self) -> u64 {
        self.misrouted
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}
