//! Wire payloads exchanged over the session channel.
//!
//! DESIGN
//! ======
//! Two message shapes travel on the channel: a leader's [`SyncMessage`]
//! (configuration, timer state, or both) and a [`RemoteSignal`] from a
//! remote-control client. [`Payload`] is the tagged union over both;
//! anything that parses as neither is dropped by the coordinator rather
//! than crashing the reconciliation path.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::settings::KeyedTimerSettings;

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

// =============================================================================
// TYPES
// =============================================================================

/// The ticking/elapsed pair carried inside a sync message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickerState {
    pub ticking: bool,
    /// Elapsed milliseconds at `SyncMessage::timestamp`.
    pub time: i64,
}

/// Authoritative broadcast from the leader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMessage {
    /// Sender wall clock, milliseconds since Unix epoch.
    pub timestamp: i64,
    /// Full configuration replacement, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Vec<KeyedTimerSettings>>,
    /// Timer state, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<TickerState>,
}

/// Control request from a non-authoritative client; obeyed by the leader only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Resume,
    Pause,
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSignal {
    pub signal: Signal,
}

/// Every known channel payload. Signals are tried first: their single
/// `signal` field is what distinguishes them on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Signal(RemoteSignal),
    Sync(SyncMessage),
}

impl Payload {
    /// Parse a raw channel payload. Malformed or unknown shapes yield `None`.
    #[must_use]
    pub fn parse(value: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

// =============================================================================
// TESTS
// =============================================================================
