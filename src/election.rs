//! Leader election rules.
//!
//! DESIGN
//! ======
//! Leadership is a continuously arbitrated claim, not a one-time outcome.
//! The deterministic pieces live here as pure functions over presence
//! entries so the coordinator (and tests) can apply them to any snapshot:
//!
//! 1. Priority claimants win, earliest `leader_since` first.
//! 2. Otherwise, existing claimants are ranked by lexical connection id.
//! 3. With no claimants at all, the lexically lowest connection id present
//!    (including our own) is elected.
//!
//! The randomized pre-negotiation delay elsewhere only reduces collision
//! probability; these comparators are what convergence rests on.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::channel::PresenceEntry;

/// This client's role within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// Authoritative timer; broadcasts state and configuration.
    Leader,
    /// Applies the leader's broadcasts without originating them.
    Follower,
    /// Observes and sends control signals, never claims leadership.
    RemoteViewer,
}

impl Role {
    #[must_use]
    pub fn is_leader(self) -> bool {
        matches!(self, Role::Leader)
    }

    /// Whether this role participates in election at all.
    #[must_use]
    pub fn can_lead(self) -> bool {
        !matches!(self, Role::RemoteViewer)
    }
}

/// Outcome of applying the election rules to a presence snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// This connection wins: promote to leader.
    Promote,
    /// Another client is (or becomes) leader; follow it.
    Follow { client_id: String },
}

/// Order two leadership claims: priority first, then earliest
/// `leader_since` (a missing timestamp ranks last), then lexical
/// connection id as the final tie-break.
#[must_use]
pub fn claim_order(a: &PresenceEntry, b: &PresenceEntry) -> Ordering {
    let prio = b.data.prio.cmp(&a.data.prio);
    if prio != Ordering::Equal {
        return prio;
    }
    let a_since = a.data.leader_since.unwrap_or(i64::MAX);
    let b_since = b.data.leader_since.unwrap_or(i64::MAX);
    a_since
        .cmp(&b_since)
        .then_with(|| a.connection_id.cmp(&b.connection_id))
}

/// The strongest leader claimant in a snapshot, if any entry claims
/// leadership. Used both for live negotiation and for resolving an
/// already-elected leader when seeding from a presence snapshot.
#[must_use]
pub fn best_claimant<'a>(entries: &'a [PresenceEntry]) -> Option<&'a PresenceEntry> {
    entries
        .iter()
        .filter(|entry| entry.data.mode == Some(Role::Leader))
        .min_by(|a, b| claim_order(a, b))
}

/// Apply the three-stage election to a snapshot of *other* clients
/// (entries for our own client id must already be excluded).
#[must_use]
pub fn decide(self_connection_id: &str, others: &[PresenceEntry]) -> Decision {
    let claimants: Vec<&PresenceEntry> = others
        .iter()
        .filter(|entry| entry.data.mode == Some(Role::Leader))
        .collect();

    // Stage 1: priority claimants, earliest leader_since first.
    let elected_prio = claimants
        .iter()
        .copied()
        .filter(|entry| entry.data.prio)
        .min_by(|a, b| claim_order(a, b));
    if let Some(elected) = elected_prio {
        // EDGE: the snapshot excludes our client id, but a stale entry for
        // our own connection can still appear during reconnects.
        if elected.connection_id == self_connection_id {
            return Decision::Promote;
        }
        return Decision::Follow { client_id: elected.client_id.clone() };
    }

    // Stage 2: claimants without priority; lowest connection id wins, and
    // we never self-promote over an existing claim.
    if let Some(elected) = claimants.iter().copied().min_by_key(|entry| &entry.connection_id) {
        return Decision::Follow { client_id: elected.client_id.clone() };
    }

    // Stage 3: no claimants anywhere. Deterministically elect the lowest
    // connection id among everyone present, ourselves included.
    let lowest_other = others.iter().min_by_key(|entry| &entry.connection_id);
    match lowest_other {
        Some(entry) if entry.connection_id.as_str() < self_connection_id => {
            Decision::Follow { client_id: entry.client_id.clone() }
        }
        _ => Decision::Promote,
    }
}

#[cfg(test)]
#[path = "election_test.rs"]
mod tests;
