//! In-process channel provider.
//!
//! DESIGN
//! ======
//! `LocalHub` keeps one member table per session behind an `RwLock`; each
//! member holds an `mpsc` sender for its event stream. Fan-out happens
//! synchronously under the lock, which gives per-sender ordering for free.
//! Delivery is best-effort: a member with a full queue misses the event.
//!
//! Tests and the demo use this hub in place of a hosted transport. It
//! implements the full contract — publisher exclusion, presence echo to all
//! members, live snapshots — and adds `set_connection_state` so tests can
//! inject transport degradation.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};
use tracing::warn;
use uuid::Uuid;

use super::{Channel, ChannelError, ChannelEvent, ConnectionState, PresenceAction, PresenceData, PresenceEntry};

const EVENT_QUEUE_CAPACITY: usize = 256;

// =============================================================================
// HUB
// =============================================================================

#[derive(Clone, Default)]
pub struct LocalHub {
    inner: Arc<RwLock<HubInner>>,
}

#[derive(Default)]
struct HubInner {
    sessions: HashMap<String, SessionMembers>,
}

#[derive(Default)]
struct SessionMembers {
    /// Keyed by connection id.
    members: HashMap<String, Member>,
}

struct Member {
    client_id: String,
    connection_id: String,
    /// Present only after the member entered presence.
    data: Option<PresenceData>,
    tx: mpsc::Sender<ChannelEvent>,
}

impl Member {
    fn entry(&self) -> Option<PresenceEntry> {
        self.data.as_ref().map(|data| PresenceEntry {
            client_id: self.client_id.clone(),
            connection_id: self.connection_id.clone(),
            data: data.clone(),
        })
    }
}

impl LocalHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a client to a session with a random connection id.
    pub async fn attach(
        &self,
        session_id: &str,
        client_id: &str,
    ) -> (LocalChannel, mpsc::Receiver<ChannelEvent>) {
        self.attach_with_connection(session_id, client_id, &Uuid::new_v4().to_string())
            .await
    }

    /// Attach with an explicit connection id. Tests use this to make the
    /// lexical tie-break deterministic.
    pub async fn attach_with_connection(
        &self,
        session_id: &str,
        client_id: &str,
        connection_id: &str,
    ) -> (LocalChannel, mpsc::Receiver<ChannelEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);

        {
            let mut inner = self.inner.write().await;
            let session = inner.sessions.entry(session_id.to_string()).or_default();
            session.members.insert(
                connection_id.to_string(),
                Member {
                    client_id: client_id.to_string(),
                    connection_id: connection_id.to_string(),
                    data: None,
                    tx: tx.clone(),
                },
            );
        }

        // The in-process transport connects immediately.
        deliver(&tx, ChannelEvent::Connection(ConnectionState::Connecting));
        deliver(&tx, ChannelEvent::Connection(ConnectionState::Connected));

        let channel = LocalChannel {
            hub: self.clone(),
            session_id: session_id.to_string(),
            client_id: client_id.to_string(),
            connection_id: connection_id.to_string(),
            detached: AtomicBool::new(false),
        };
        (channel, rx)
    }

    /// Deliver a connection-state transition to one member. Test hook for
    /// simulating transport degradation and recovery.
    pub async fn set_connection_state(&self, session_id: &str, connection_id: &str, state: ConnectionState) {
        let inner = self.inner.read().await;
        let Some(member) = inner
            .sessions
            .get(session_id)
            .and_then(|session| session.members.get(connection_id))
        else {
            return;
        };
        deliver(&member.tx, ChannelEvent::Connection(state));
    }

    async fn fan_out_presence(&self, session_id: &str, action: PresenceAction, member_entry: PresenceEntry) {
        let inner = self.inner.read().await;
        let Some(session) = inner.sessions.get(session_id) else {
            return;
        };
        // Presence transitions echo to every member, the actor included.
        for member in session.members.values() {
            deliver(
                &member.tx,
                ChannelEvent::Presence { action, member: member_entry.clone() },
            );
        }
    }
}

fn deliver(tx: &mpsc::Sender<ChannelEvent>, event: ChannelEvent) {
    // Best-effort: a member that stopped draining its queue misses events.
    if let Err(err) = tx.try_send(event) {
        warn!(error = %err, "local hub: dropping event for slow member");
    }
}

// =============================================================================
// CHANNEL
// =============================================================================

pub struct LocalChannel {
    hub: LocalHub,
    session_id: String,
    client_id: String,
    connection_id: String,
    detached: AtomicBool,
}

impl LocalChannel {
    fn ensure_attached(&self) -> Result<(), ChannelError> {
        if self.detached.load(Ordering::SeqCst) {
            return Err(ChannelError::Detached);
        }
        Ok(())
    }
}

#[async_trait]
impl Channel for LocalChannel {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn connection_id(&self) -> &str {
        &self.connection_id
    }

    async fn publish(&self, payload: serde_json::Value) -> Result<(), ChannelError> {
        self.ensure_attached()?;
        let inner = self.hub.inner.read().await;
        let Some(session) = inner.sessions.get(&self.session_id) else {
            return Err(ChannelError::Detached);
        };
        for member in session.members.values() {
            // Never echo a publish back to its own connection.
            if member.connection_id == self.connection_id {
                continue;
            }
            deliver(
                &member.tx,
                ChannelEvent::Message { client_id: self.client_id.clone(), payload: payload.clone() },
            );
        }
        Ok(())
    }

    async fn presence_enter(&self, data: PresenceData) -> Result<(), ChannelError> {
        self.set_presence(PresenceAction::Enter, data).await
    }

    async fn presence_update(&self, data: PresenceData) -> Result<(), ChannelError> {
        self.set_presence(PresenceAction::Update, data).await
    }

    async fn presence_leave(&self) -> Result<(), ChannelError> {
        self.ensure_attached()?;
        let entry = {
            let mut inner = self.hub.inner.write().await;
            let Some(member) = inner
                .sessions
                .get_mut(&self.session_id)
                .and_then(|session| session.members.get_mut(&self.connection_id))
            else {
                return Err(ChannelError::Detached);
            };
            let data = member.data.take().unwrap_or_default();
            PresenceEntry {
                client_id: self.client_id.clone(),
                connection_id: self.connection_id.clone(),
                data,
            }
        };
        self.hub
            .fan_out_presence(&self.session_id, PresenceAction::Leave, entry)
            .await;
        Ok(())
    }

    async fn presence_get(&self) -> Result<Vec<PresenceEntry>, ChannelError> {
        self.ensure_attached()?;
        let inner = self.hub.inner.read().await;
        let Some(session) = inner.sessions.get(&self.session_id) else {
            return Err(ChannelError::Detached);
        };
        let mut entries: Vec<PresenceEntry> =
            session.members.values().filter_map(Member::entry).collect();
        entries.sort_by(|a, b| a.connection_id.cmp(&b.connection_id));
        Ok(entries)
    }

    async fn close(&self) {
        if self.detached.swap(true, Ordering::SeqCst) {
            return;
        }

        let (removed, self_tx) = {
            let mut inner = self.hub.inner.write().await;
            let Some(session) = inner.sessions.get_mut(&self.session_id) else {
                return;
            };
            let Some(member) = session.members.remove(&self.connection_id) else {
                return;
            };
            if session.members.is_empty() {
                inner.sessions.remove(&self.session_id);
            }
            (member.entry(), member.tx)
        };

        // A member that was present leaves presence as it disconnects.
        if let Some(entry) = removed {
            self.hub
                .fan_out_presence(&self.session_id, PresenceAction::Leave, entry)
                .await;
        }
        deliver(&self_tx, ChannelEvent::Connection(ConnectionState::Closed));
    }
}

impl LocalChannel {
    async fn set_presence(&self, action: PresenceAction, data: PresenceData) -> Result<(), ChannelError> {
        self.ensure_attached()?;
        {
            let mut inner = self.hub.inner.write().await;
            let Some(member) = inner
                .sessions
                .get_mut(&self.session_id)
                .and_then(|session| session.members.get_mut(&self.connection_id))
            else {
                return Err(ChannelError::Detached);
            };
            member.data = Some(data.clone());
        }
        let entry = PresenceEntry {
            client_id: self.client_id.clone(),
            connection_id: self.connection_id.clone(),
            data,
        };
        self.hub.fan_out_presence(&self.session_id, action, entry).await;
        Ok(())
    }
}

#[cfg(test)]
#[path = "local_test.rs"]
mod tests;
