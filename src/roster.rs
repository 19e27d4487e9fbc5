//! Membership and presence tracking.
//!
//! DESIGN
//! ======
//! `PeerRoster` owns the peer set (other clients only, never self) and this
//! client's *belief* about who leads. The belief is derived, not
//! authoritative: it is recomputed from presence snapshots and incremental
//! events, and can lag other clients for short windows. `apply_event`
//! reports the leadership-relevant consequence of each event so the
//! coordinator can react (stand down, renegotiate) without re-deriving it.

use std::collections::HashSet;

use crate::channel::{PresenceAction, PresenceEntry};
use crate::election::{self, Role};

/// Leadership-relevant consequence of one presence event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterChange {
    /// Nothing election-relevant happened.
    None,
    /// Another client announced itself leader.
    LeaderClaimed { client_id: String },
    /// The client we believed to be leader left the session.
    LeaderLeft,
    /// The client we believed to be leader re-advertised without claiming
    /// leadership. Treated like a departure so elections reconverge.
    LeaderDemoted,
}

#[derive(Debug)]
pub struct PeerRoster {
    self_client_id: String,
    peers: HashSet<String>,
    current_lead: Option<String>,
}

impl PeerRoster {
    #[must_use]
    pub fn new(self_client_id: impl Into<String>) -> Self {
        Self { self_client_id: self_client_id.into(), peers: HashSet::new(), current_lead: None }
    }

    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// True when no other client shares the session; broadcasts are skipped.
    #[must_use]
    pub fn alone(&self) -> bool {
        self.peers.is_empty()
    }

    #[must_use]
    pub fn current_lead(&self) -> Option<&str> {
        self.current_lead.as_deref()
    }

    pub fn set_current_lead(&mut self, client_id: Option<String>) {
        self.current_lead = client_id;
    }

    /// Apply one live presence event and report what it means for
    /// leadership. Events about our own client id are ignored.
    pub fn apply_event(&mut self, action: PresenceAction, member: &PresenceEntry) -> RosterChange {
        if member.client_id == self.self_client_id {
            return RosterChange::None;
        }

        match action {
            PresenceAction::Leave => {
                self.peers.remove(&member.client_id);
                if self.current_lead.as_deref() == Some(member.client_id.as_str()) {
                    self.current_lead = None;
                    return RosterChange::LeaderLeft;
                }
                RosterChange::None
            }
            PresenceAction::Enter | PresenceAction::Update => {
                self.peers.insert(member.client_id.clone());
                if member.data.mode == Some(Role::Leader) {
                    self.current_lead = Some(member.client_id.clone());
                    return RosterChange::LeaderClaimed { client_id: member.client_id.clone() };
                }
                if self.current_lead.as_deref() == Some(member.client_id.as_str()) {
                    self.current_lead = None;
                    return RosterChange::LeaderDemoted;
                }
                RosterChange::None
            }
        }
    }

    /// Rebuild the roster from a full presence snapshot, resolving an
    /// already-elected leader with the same tie-break used during live
    /// negotiation.
    pub fn seed(&mut self, snapshot: &[PresenceEntry]) {
        self.peers = snapshot
            .iter()
            .filter(|entry| entry.client_id != self.self_client_id)
            .map(|entry| entry.client_id.clone())
            .collect();

        self.current_lead = election::best_claimant(snapshot).map(|entry| entry.client_id.clone());
    }

    /// Forget everything; used on channel teardown.
    pub fn clear(&mut self) {
        self.peers.clear();
        self.current_lead = None;
    }
}

#[cfg(test)]
#[path = "roster_test.rs"]
mod tests;
