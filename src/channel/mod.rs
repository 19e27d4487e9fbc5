//! Channel provider interface — publish/subscribe plus presence.
//!
//! ARCHITECTURE
//! ============
//! The transport is an external collaborator: a named channel per session
//! offering fan-out publish (never echoed to the publisher), a presence
//! sub-channel, and a connection-state stream. The coordinator only ever
//! talks to this trait; [`LocalHub`] implements it in-process for tests and
//! the demo binary, and a hosted provider can be slotted in without touching
//! the core.
//!
//! Events are delivered on an `mpsc` receiver handed out when the channel is
//! attached, so the consumer owns exactly one ordered event stream per
//! connection.

mod local;

pub use local::{LocalChannel, LocalHub};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::election::Role;

// =============================================================================
// TYPES
// =============================================================================

/// Transport connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    /// Transient loss; the transport is still retrying.
    Disconnected,
    /// Prolonged loss; delivery guarantees are void until recovery.
    Suspended,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceAction {
    Enter,
    Leave,
    Update,
}

/// Data a client attaches to its presence record. Fields are optional on
/// the wire; absent fields deserialize to their defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceData {
    #[serde(default)]
    pub mode: Option<Role>,
    #[serde(default)]
    pub prio: bool,
    #[serde(default)]
    pub leader_since: Option<i64>,
}

/// One member of a channel's presence set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEntry {
    /// Stable per-device identity, persisted across reconnects.
    pub client_id: String,
    /// Per-connection identity; changes on every reconnect. Used only as a
    /// globally-unique lexical tie-breaker.
    pub connection_id: String,
    pub data: PresenceData,
}

/// Everything a channel can deliver to its consumer.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// A payload published by another member. Never our own publishes.
    Message {
        client_id: String,
        payload: serde_json::Value,
    },
    /// A presence transition, including our own (consumers filter by
    /// client id where self-echo is unwanted).
    Presence {
        action: PresenceAction,
        member: PresenceEntry,
    },
    Connection(ConnectionState),
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel is detached from its session")]
    Detached,
    #[error("transport failure: {0}")]
    Transport(String),
}

// =============================================================================
// TRAIT
// =============================================================================

/// A session-scoped channel: fan-out publish plus presence.
///
/// Implementations must deliver events from a single sender in send order;
/// no ordering across senders is assumed by consumers.
#[async_trait]
pub trait Channel: Send + Sync {
    /// The stable client identity this channel was attached with.
    fn client_id(&self) -> &str;

    /// The current connection id (unique per attach).
    fn connection_id(&self) -> &str;

    /// Publish a payload to all other subscribers. Never echoed to self.
    async fn publish(&self, payload: serde_json::Value) -> Result<(), ChannelError>;

    /// Enter the presence set with the given data.
    async fn presence_enter(&self, data: PresenceData) -> Result<(), ChannelError>;

    /// Update this client's presence data.
    async fn presence_update(&self, data: PresenceData) -> Result<(), ChannelError>;

    /// Leave the presence set (the connection stays attached).
    async fn presence_leave(&self) -> Result<(), ChannelError>;

    /// Fetch the current presence snapshot, self included.
    async fn presence_get(&self) -> Result<Vec<PresenceEntry>, ChannelError>;

    /// Release the connection. Terminal; the event stream ends after the
    /// closing notifications are delivered.
    async fn close(&self);
}
