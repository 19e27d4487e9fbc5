//! Session coordinator — the per-client event loop.
//!
//! DESIGN
//! ======
//! One spawned task per client owns every mutable field (roster, role,
//! clock, configuration) and reacts to exactly four stimulus kinds: channel
//! events, local commands, internal continuations from fire-and-forget
//! work, and the refresh/debounce timers. Handlers mutate `&mut self` and
//! never block the loop: negotiation runs its jitter and presence fetch in
//! a spawned task and reports back through the internal queue.
//!
//! Consumers hold a [`SessionHandle`]: commands go over an `mpsc` queue,
//! reads come from a `watch`-published [`SessionView`] snapshot.
//!
//! LIFECYCLE
//! =========
//! 1. Attach a channel, `spawn` the coordinator.
//! 2. Transport connects → advertise presence → negotiate leadership.
//! 3. Leader broadcasts sync messages; followers reconcile them.
//! 4. `dispose` (or dropping every handle) leaves presence and releases
//!    the connection. Terminal.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::channel::{
    Channel, ChannelError, ChannelEvent, ConnectionState, PresenceAction, PresenceData, PresenceEntry,
};
use crate::clock::{Snapshot, TimerClock};
use crate::election::{self, Decision, Role};
use crate::message::{Payload, RemoteSignal, Signal, SyncMessage, TickerState, now_ms};
use crate::roster::{PeerRoster, RosterChange};
use crate::settings::{KeyedTimerSettings, default_timers};
use crate::store::{DeviceStore, KEY_GLOBAL_TIME, KEY_LEADER_SINCE, KEY_TIMERS, KEY_WAS_LEADER};

const COMMAND_QUEUE_CAPACITY: usize = 64;
const INTERNAL_QUEUE_CAPACITY: usize = 16;

// =============================================================================
// OPTIONS
// =============================================================================

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Join as a remote-viewer: observe and signal, never claim leadership.
    pub remote: bool,
    /// Start in offline (standalone self-leader) mode. Set by call sites
    /// after an authorization failure.
    pub start_offline: bool,
    /// Upper bound for the random pre-negotiation delay. Zero makes
    /// elections deterministic under test.
    pub negotiation_jitter_ms: u64,
    /// Coalescing window for configuration broadcasts.
    pub config_debounce_ms: u64,
    /// Display-refresh period while the timer runs. Correctness never
    /// depends on it; elapsed time is recomputed from the snapshot.
    pub refresh_interval_ms: u64,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            remote: false,
            start_offline: false,
            negotiation_jitter_ms: 200,
            config_debounce_ms: 1_000,
            refresh_interval_ms: 400,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session is disposed")]
    Disposed,
}

// =============================================================================
// VIEW
// =============================================================================

/// Read-only snapshot of coordinator state, published on every change.
#[derive(Debug, Clone)]
pub struct SessionView {
    pub role: Role,
    /// This client's belief about who leads. Derived, not authoritative.
    pub current_lead: Option<String>,
    pub connected: bool,
    pub offline: bool,
    pub peer_count: usize,
    pub ticking: bool,
    pub snapshot: Snapshot,
    pub timers: Vec<KeyedTimerSettings>,
}

impl SessionView {
    /// Elapsed milliseconds extrapolated to `now`.
    #[must_use]
    pub fn elapsed_at(&self, now: i64) -> i64 {
        if self.ticking {
            self.snapshot.time + (now - self.snapshot.timestamp)
        } else {
            self.snapshot.time
        }
    }
}

// =============================================================================
// HANDLE
// =============================================================================

enum Command {
    Resume,
    Pause,
    Reset,
    Toggle,
    Takeover,
    SetTime(i64),
    Nudge(i64),
    UpdateConfig(Vec<KeyedTimerSettings>),
    Flush,
    SendSignal(Signal),
    SetOffline(bool),
    Dispose,
}

/// Cheap handle to a running coordinator.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<SessionView>,
}

impl SessionHandle {
    async fn send(&self, command: Command) -> Result<(), SessionError> {
        self.commands.send(command).await.map_err(|_| SessionError::Disposed)
    }

    /// Start the timer.
    ///
    /// # Errors
    ///
    /// Fails once the session is disposed; likewise for every command below.
    pub async fn resume(&self) -> Result<(), SessionError> {
        self.send(Command::Resume).await
    }

    pub async fn pause(&self) -> Result<(), SessionError> {
        self.send(Command::Pause).await
    }

    pub async fn reset(&self) -> Result<(), SessionError> {
        self.send(Command::Reset).await
    }

    pub async fn toggle(&self) -> Result<(), SessionError> {
        self.send(Command::Toggle).await
    }

    /// Claim leadership from follower role, dethroning any current leader.
    pub async fn takeover(&self) -> Result<(), SessionError> {
        self.send(Command::Takeover).await
    }

    /// Overwrite the elapsed time (leader only).
    pub async fn set_time(&self, elapsed_ms: i64) -> Result<(), SessionError> {
        self.send(Command::SetTime(elapsed_ms)).await
    }

    /// Adjust the elapsed time by a delta (leader only).
    pub async fn nudge(&self, delta_ms: i64) -> Result<(), SessionError> {
        self.send(Command::Nudge(delta_ms)).await
    }

    /// Replace the timer configuration list.
    pub async fn update_config(&self, timers: Vec<KeyedTimerSettings>) -> Result<(), SessionError> {
        self.send(Command::UpdateConfig(timers)).await
    }

    /// Publish any pending debounced sync immediately (e.g. on key release).
    pub async fn flush(&self) -> Result<(), SessionError> {
        self.send(Command::Flush).await
    }

    /// Ask the leader (whoever that is) to change timer state.
    pub async fn send_signal(&self, signal: Signal) -> Result<(), SessionError> {
        self.send(Command::SendSignal(signal)).await
    }

    pub async fn set_offline(&self, offline: bool) -> Result<(), SessionError> {
        self.send(Command::SetOffline(offline)).await
    }

    /// Leave presence and release the transport. Terminal.
    pub async fn dispose(&self) -> Result<(), SessionError> {
        self.send(Command::Dispose).await
    }

    #[must_use]
    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.view.borrow().role
    }

    #[must_use]
    pub fn current_lead(&self) -> Option<String> {
        self.view.borrow().current_lead.clone()
    }

    #[must_use]
    pub fn ticking(&self) -> bool {
        self.view.borrow().ticking
    }

    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.view.borrow().peer_count
    }

    #[must_use]
    pub fn connected(&self) -> bool {
        self.view.borrow().connected
    }

    /// Elapsed milliseconds, extrapolated to the current wall clock.
    #[must_use]
    pub fn elapsed_time(&self) -> i64 {
        self.view.borrow().elapsed_at(now_ms())
    }

    /// Subscribe to view changes.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }
}

// =============================================================================
// SPAWN
// =============================================================================

/// Spawn a coordinator over an attached channel. The store, when present,
/// seeds timer state and leadership history and receives updates on change.
#[must_use]
pub fn spawn(
    channel: Arc<dyn Channel>,
    events: mpsc::Receiver<ChannelEvent>,
    store: Option<DeviceStore>,
    options: SessionOptions,
) -> SessionHandle {
    let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
    let (internal_tx, internal_rx) = mpsc::channel(INTERNAL_QUEUE_CAPACITY);

    let initial_role = if options.remote { Role::RemoteViewer } else { Role::Follower };
    let now = now_ms();
    let (view_tx, view_rx) = watch::channel(SessionView {
        role: initial_role,
        current_lead: None,
        connected: false,
        offline: options.start_offline,
        peer_count: 0,
        ticking: false,
        snapshot: Snapshot { timestamp: now, time: 0 },
        timers: default_timers(),
    });

    let roster = PeerRoster::new(channel.client_id());
    let coordinator = Coordinator {
        channel,
        events,
        events_closed: false,
        commands: command_rx,
        internal_tx,
        internal_rx,
        view_tx,
        store,
        options,
        roster,
        role: initial_role,
        leader_since: None,
        clock: TimerClock::new(0, now),
        timers: default_timers(),
        last_sync: None,
        connected: false,
        offline: false,
        negotiating: false,
        renegotiate_pending: false,
        disposing: false,
        disposed: false,
        config_deadline: None,
    };
    tokio::spawn(coordinator.run());

    SessionHandle { commands: command_tx, view: view_rx }
}

// =============================================================================
// COORDINATOR
// =============================================================================

enum Internal {
    /// Presence snapshot fetched by a spawned negotiation task.
    Snapshot(Result<Vec<PresenceEntry>, ChannelError>),
}

struct Coordinator {
    channel: Arc<dyn Channel>,
    events: mpsc::Receiver<ChannelEvent>,
    events_closed: bool,
    commands: mpsc::Receiver<Command>,
    internal_tx: mpsc::Sender<Internal>,
    internal_rx: mpsc::Receiver<Internal>,
    view_tx: watch::Sender<SessionView>,
    store: Option<DeviceStore>,
    options: SessionOptions,

    roster: PeerRoster,
    role: Role,
    leader_since: Option<i64>,
    clock: TimerClock,
    timers: Vec<KeyedTimerSettings>,
    last_sync: Option<SyncMessage>,

    connected: bool,
    offline: bool,
    negotiating: bool,
    /// A renegotiation trigger arrived while one was in flight; run once
    /// more when it completes instead of dropping the trigger.
    renegotiate_pending: bool,
    disposing: bool,
    disposed: bool,
    config_deadline: Option<Instant>,
}

impl Coordinator {
    async fn run(mut self) {
        self.bootstrap().await;

        let mut refresh = tokio::time::interval(Duration::from_millis(self.options.refresh_interval_ms.max(1)));
        refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let config_deadline = self.config_deadline;
            tokio::select! {
                maybe_command = self.commands.recv() => {
                    match maybe_command {
                        Some(command) => self.handle_command(command).await,
                        // Every handle dropped: tear down like an explicit dispose.
                        None => self.dispose().await,
                    }
                }
                maybe_event = self.events.recv(), if !self.events_closed => {
                    match maybe_event {
                        Some(event) => self.handle_channel_event(event).await,
                        None => self.on_events_closed(),
                    }
                }
                Some(internal) = self.internal_rx.recv() => {
                    match internal {
                        Internal::Snapshot(result) => self.finish_negotiation(result).await,
                    }
                }
                _ = refresh.tick() => self.on_refresh_tick(),
                () = async {
                    match config_deadline {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => std::future::pending().await,
                    }
                }, if config_deadline.is_some() => {
                    self.flush_pending_sync().await;
                }
            }

            if self.disposed {
                break;
            }
        }

        debug!(client_id = %self.channel.client_id(), "coordinator stopped");
    }

    /// Load persisted device state before processing the first event.
    async fn bootstrap(&mut self) {
        if let Some(store) = self.store.clone() {
            match store.get(KEY_GLOBAL_TIME).await {
                Ok(Some(value)) => {
                    if let Ok(elapsed) = value.parse::<i64>() {
                        self.clock.set_time(now_ms(), elapsed);
                    }
                }
                Ok(None) => {}
                Err(err) => warn!(error = %err, "device store read failed"),
            }

            if let Ok(Some(value)) = store.get(KEY_LEADER_SINCE).await {
                self.leader_since = value.parse::<i64>().ok();
            }

            // A reloaded ex-leader rejoins claiming leadership; negotiation
            // and the duplicate-leader rule arbitrate from there.
            if let Ok(Some(value)) = store.get(KEY_WAS_LEADER).await {
                if value == "true" && self.role.can_lead() {
                    self.role = Role::Leader;
                    self.roster.set_current_lead(Some(self.channel.client_id().to_string()));
                }
            }

            match store.get(KEY_TIMERS).await {
                Ok(Some(json)) => match serde_json::from_str::<Vec<KeyedTimerSettings>>(&json) {
                    Ok(timers) => self.timers = timers,
                    Err(err) => warn!(error = %err, "ignoring unreadable persisted timers"),
                },
                Ok(None) => {}
                Err(err) => warn!(error = %err, "device store read failed"),
            }
        }

        if self.options.start_offline {
            self.offline = true;
            self.become_standalone_leader();
        }
        self.publish_view();
    }

    // =========================================================================
    // COMMANDS
    // =========================================================================

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Resume => self.resume(false).await,
            Command::Pause => self.pause(false).await,
            Command::Reset => self.reset(false).await,
            Command::Toggle => {
                if self.clock.ticking() {
                    self.pause(false).await;
                } else {
                    self.resume(false).await;
                }
            }
            Command::Takeover => self.takeover().await,
            Command::SetTime(elapsed_ms) => self.set_time(elapsed_ms),
            Command::Nudge(delta_ms) => {
                let target = self.clock.elapsed(now_ms()) + delta_ms;
                self.set_time(target);
            }
            Command::UpdateConfig(timers) => self.update_config(timers),
            Command::Flush => self.flush_pending_sync().await,
            Command::SendSignal(signal) => self.send_signal(signal).await,
            Command::SetOffline(true) => self.go_offline().await,
            Command::SetOffline(false) => self.go_online().await,
            Command::Dispose => self.dispose().await,
        }
    }

    async fn resume(&mut self, quiet: bool) {
        if !self.clock.resume(now_ms()) {
            return;
        }
        if !quiet {
            self.broadcast_state().await;
        }
        self.publish_view();
    }

    async fn pause(&mut self, quiet: bool) {
        let now = now_ms();
        if !self.clock.pause(now) {
            return;
        }
        self.persist_global_time(self.clock.elapsed(now));
        if !quiet {
            self.broadcast_state().await;
        }
        self.publish_view();
    }

    async fn reset(&mut self, quiet: bool) {
        self.clock.reset(now_ms());
        self.persist_global_time(0);
        if !quiet {
            self.broadcast_state().await;
        }
        self.publish_view();
    }

    async fn takeover(&mut self) {
        // Only a follower may take over; leaders already lead and
        // remote-viewers never do.
        if self.role != Role::Follower {
            return;
        }
        info!(client_id = %self.channel.client_id(), "manual takeover");
        self.promote().await;
    }

    fn set_time(&mut self, elapsed_ms: i64) {
        if !self.role.is_leader() {
            return;
        }
        self.clock.set_time(now_ms(), elapsed_ms);
        self.persist_global_time(elapsed_ms);
        // Bursts of adjustments coalesce; `flush` publishes the final value.
        self.schedule_debounced_sync();
        self.publish_view();
    }

    fn update_config(&mut self, timers: Vec<KeyedTimerSettings>) {
        self.timers = timers;
        self.persist_timers();
        if self.role.is_leader() {
            self.schedule_debounced_sync();
        }
        self.publish_view();
    }

    async fn send_signal(&mut self, signal: Signal) {
        if self.offline || !self.connected {
            return;
        }
        match serde_json::to_value(RemoteSignal { signal }) {
            Ok(payload) => {
                if let Err(err) = self.channel.publish(payload).await {
                    warn!(error = %err, "signal publish failed");
                }
            }
            Err(err) => warn!(error = %err, "signal serialize failed"),
        }
    }

    async fn go_offline(&mut self) {
        if self.offline {
            return;
        }
        info!("switching offline");
        self.offline = true;
        if self.connected {
            if let Err(err) = self.channel.presence_leave().await {
                debug!(error = %err, "presence leave failed while going offline");
            }
        }
        self.roster.clear();
        self.become_standalone_leader();
        self.publish_view();
    }

    async fn go_online(&mut self) {
        if !self.offline {
            return;
        }
        info!("switching online");
        self.offline = false;
        if self.connected {
            self.ensure_presence(self.role, self.role.is_leader()).await;
            self.negotiate();
        }
        self.publish_view();
    }

    async fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposing = true;
        // Best-effort teardown; failures are swallowed.
        if let Err(err) = self.channel.presence_leave().await {
            debug!(error = %err, "presence leave failed during dispose");
        }
        self.channel.close().await;
        self.persist_global_time(self.clock.elapsed(now_ms()));
        self.disposed = true;
    }

    // =========================================================================
    // CHANNEL EVENTS
    // =========================================================================

    async fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Message { client_id, payload } => {
                // The channel never echoes, but stale transports might.
                if client_id == self.channel.client_id() {
                    return;
                }
                match Payload::parse(&payload) {
                    Some(Payload::Sync(msg)) => self.reconcile_sync(msg),
                    Some(Payload::Signal(msg)) => self.obey_signal(msg.signal).await,
                    None => warn!(%client_id, "dropping malformed channel payload"),
                }
            }
            ChannelEvent::Presence { action, member } => self.handle_presence(action, member).await,
            ChannelEvent::Connection(state) => self.handle_connection(state).await,
        }
    }

    /// Apply a leader broadcast to local state. Quiet by construction: the
    /// update originates from the network, so nothing is rebroadcast.
    fn reconcile_sync(&mut self, msg: SyncMessage) {
        if self.role.is_leader() {
            return;
        }
        if let Some(config) = msg.config {
            self.timers = config;
            self.persist_timers();
        }
        if let Some(state) = msg.state {
            self.clock.reconcile(state, msg.timestamp, now_ms());
        }
        self.publish_view();
    }

    /// Remote signals are obeyed by the leader only; everyone else drops
    /// them so a single command changes state exactly once per session.
    async fn obey_signal(&mut self, signal: Signal) {
        if !self.role.is_leader() {
            return;
        }
        match signal {
            Signal::Resume => self.resume(false).await,
            Signal::Pause => self.pause(false).await,
            Signal::Reset => self.reset(false).await,
        }
    }

    async fn handle_presence(&mut self, action: PresenceAction, member: PresenceEntry) {
        if member.client_id == self.channel.client_id() {
            return;
        }

        match self.roster.apply_event(action, &member) {
            RosterChange::LeaderClaimed { client_id } => {
                // Leadership is continuously arbitrated: a rival claim makes
                // a sitting leader stand down rather than split the session.
                if self.role.is_leader() {
                    self.stand_down(&client_id).await;
                }
            }
            RosterChange::LeaderLeft | RosterChange::LeaderDemoted => {
                if self.role.can_lead() {
                    self.negotiate();
                }
            }
            RosterChange::None => {}
        }

        // Greet arriving or re-announcing peers with full state so they do
        // not wait out the debounce window.
        if self.role.is_leader() && action != PresenceAction::Leave {
            let msg = self.full_sync_message();
            self.publish_sync(msg).await;
        }
        self.publish_view();
    }

    async fn handle_connection(&mut self, state: ConnectionState) {
        match state {
            ConnectionState::Connecting => {}
            ConnectionState::Connected => {
                self.connected = true;
                // Ignore the handshake if the user flipped offline mid-way.
                if !self.offline {
                    self.ensure_presence(self.role, self.role.is_leader()).await;
                    self.negotiate();
                    if let Some(last) = self.last_sync.clone() {
                        self.publish_sync(last).await;
                    }
                }
            }
            ConnectionState::Disconnected => {
                self.connected = false;
            }
            ConnectionState::Suspended | ConnectionState::Failed => {
                // The timer must stay usable standalone while the transport
                // is gone; normal negotiation reconciles this on recovery.
                self.connected = false;
                self.become_standalone_leader();
            }
            ConnectionState::Closed => {
                self.connected = false;
                self.roster.clear();
            }
        }
        self.publish_view();
    }

    fn on_events_closed(&mut self) {
        self.events_closed = true;
        self.connected = false;
        if !self.disposing {
            warn!("channel event stream ended unexpectedly");
            self.become_standalone_leader();
        }
        self.publish_view();
    }

    // =========================================================================
    // ELECTION
    // =========================================================================

    /// Kick off negotiation: random jitter, then a live presence snapshot,
    /// applied on arrival. A call while one is in flight does not spawn a
    /// second run; it queues exactly one follow-up, because the in-flight
    /// snapshot predates whatever event triggered the call.
    fn negotiate(&mut self) {
        if self.disposing || self.offline || !self.connected {
            return;
        }
        if self.negotiating {
            self.renegotiate_pending = true;
            return;
        }
        self.negotiating = true;

        let jitter = self.options.negotiation_jitter_ms;
        let delay = if jitter == 0 { 0 } else { rand::rng().random_range(0..=jitter) };
        let channel = Arc::clone(&self.channel);
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            let snapshot = channel.presence_get().await;
            let _ = tx.send(Internal::Snapshot(snapshot)).await;
        });
    }

    async fn finish_negotiation(&mut self, result: Result<Vec<PresenceEntry>, ChannelError>) {
        self.negotiating = false;
        self.apply_negotiation(result).await;
        if self.renegotiate_pending {
            self.renegotiate_pending = false;
            self.negotiate();
        }
    }

    async fn apply_negotiation(&mut self, result: Result<Vec<PresenceEntry>, ChannelError>) {
        if self.disposing || self.offline {
            return;
        }

        let snapshot = match result {
            Ok(entries) => entries,
            Err(err) => {
                // Swallowed: the next negotiation trigger retries.
                warn!(error = %err, "presence snapshot failed during negotiation");
                return;
            }
        };

        self.roster.seed(&snapshot);

        // Settled roles only re-advertise.
        if self.role == Role::Leader || self.role == Role::RemoteViewer {
            self.ensure_presence(self.role, self.role.is_leader()).await;
            if self.role.is_leader() {
                self.roster.set_current_lead(Some(self.channel.client_id().to_string()));
            }
            self.publish_view();
            return;
        }

        self.role = Role::Follower;
        self.ensure_presence(Role::Follower, false).await;

        let others: Vec<PresenceEntry> = snapshot
            .into_iter()
            .filter(|entry| entry.client_id != self.channel.client_id())
            .collect();

        match election::decide(self.channel.connection_id(), &others) {
            Decision::Promote => self.promote().await,
            Decision::Follow { client_id } => {
                debug!(lead = %client_id, "following elected leader");
                self.roster.set_current_lead(Some(client_id));
                self.persist_leadership();
                self.publish_view();
            }
        }
    }

    async fn promote(&mut self) {
        self.role = Role::Leader;
        self.leader_since = Some(now_ms());
        self.roster.set_current_lead(Some(self.channel.client_id().to_string()));
        self.persist_leadership();
        self.ensure_presence(Role::Leader, true).await;
        info!(client_id = %self.channel.client_id(), "promoted to leader");

        // Late observers receive state immediately instead of waiting for
        // the next local mutation.
        if let Some(last) = self.last_sync.clone() {
            self.publish_sync(last).await;
        }
        self.publish_view();
    }

    async fn stand_down(&mut self, rival: &str) {
        info!(%rival, "duplicate leader detected; standing down");
        self.role = Role::Follower;
        self.leader_since = None;
        self.persist_leadership();
        self.ensure_presence(Role::Follower, false).await;
        self.publish_view();
    }

    /// Transport loss or explicit offline mode: keep the local timer usable
    /// by acting as our own leader. No presence is published.
    fn become_standalone_leader(&mut self) {
        if !self.role.can_lead() {
            return;
        }
        if self.role != Role::Leader {
            self.role = Role::Leader;
            info!(client_id = %self.channel.client_id(), "acting as standalone leader");
        }
        if self.leader_since.is_none() {
            self.leader_since = Some(now_ms());
        }
        self.roster.set_current_lead(Some(self.channel.client_id().to_string()));
        self.persist_leadership();
        self.publish_view();
    }

    /// Advertise (or re-advertise) our presence data. Presence faults are
    /// logged and swallowed; the next negotiation cycle retries.
    async fn ensure_presence(&mut self, mode: Role, prio: bool) {
        if self.offline || !self.connected {
            return;
        }
        let data = PresenceData { mode: Some(mode), prio, leader_since: self.leader_since };

        let already_present = match self.channel.presence_get().await {
            Ok(entries) => entries.iter().any(|entry| entry.client_id == self.channel.client_id()),
            Err(err) => {
                warn!(error = %err, "presence lookup failed");
                false
            }
        };

        let result = if already_present {
            self.channel.presence_update(data).await
        } else {
            self.channel.presence_enter(data).await
        };
        if let Err(err) = result {
            warn!(error = %err, "presence announce failed");
        }
    }

    // =========================================================================
    // SYNC PUBLICATION
    // =========================================================================

    /// Publish a state-only sync, leader only.
    async fn broadcast_state(&mut self) {
        if !self.role.is_leader() {
            return;
        }
        let snapshot = self.clock.snapshot();
        let msg = SyncMessage {
            timestamp: snapshot.timestamp,
            config: None,
            state: Some(TickerState { ticking: self.clock.ticking(), time: snapshot.time }),
        };
        self.publish_sync(msg).await;
    }

    fn full_sync_message(&self) -> SyncMessage {
        let now = now_ms();
        SyncMessage {
            timestamp: now,
            config: Some(self.timers.clone()),
            state: Some(TickerState { ticking: self.clock.ticking(), time: self.clock.elapsed(now) }),
        }
    }

    /// Record and (when appropriate) publish a sync message. The last sync
    /// is always remembered so promotions and reconnects can re-broadcast
    /// it, even while publishing itself is suppressed.
    async fn publish_sync(&mut self, msg: SyncMessage) {
        self.last_sync = Some(msg.clone());
        if self.offline || !self.connected || self.disposing {
            return;
        }
        if self.roster.alone() {
            debug!("alone in session; skipping sync publish");
            return;
        }
        match serde_json::to_value(&msg) {
            Ok(payload) => {
                if let Err(err) = self.channel.publish(payload).await {
                    warn!(error = %err, "sync publish failed");
                }
            }
            Err(err) => warn!(error = %err, "sync serialize failed"),
        }
    }

    fn schedule_debounced_sync(&mut self) {
        self.config_deadline = Some(Instant::now() + Duration::from_millis(self.options.config_debounce_ms));
    }

    async fn flush_pending_sync(&mut self) {
        self.config_deadline = None;
        if !self.role.is_leader() {
            return;
        }
        let msg = self.full_sync_message();
        self.publish_sync(msg).await;
    }

    // =========================================================================
    // VIEW + PERSISTENCE
    // =========================================================================

    fn on_refresh_tick(&mut self) {
        if !self.clock.ticking() {
            return;
        }
        self.publish_view();
        if self.role.is_leader() {
            self.persist_global_time(self.clock.elapsed(now_ms()));
        }
    }

    fn publish_view(&self) {
        self.view_tx.send_replace(SessionView {
            role: self.role,
            current_lead: self.roster.current_lead().map(str::to_string),
            connected: self.connected,
            offline: self.offline,
            peer_count: self.roster.peer_count(),
            ticking: self.clock.ticking(),
            snapshot: self.clock.snapshot(),
            timers: self.timers.clone(),
        });
    }

    fn persist_global_time(&self, elapsed_ms: i64) {
        let Some(store) = self.store.clone() else { return };
        tokio::spawn(async move {
            if let Err(err) = store.put(KEY_GLOBAL_TIME, &elapsed_ms.to_string()).await {
                warn!(error = %err, "global time persist failed");
            }
        });
    }

    fn persist_leadership(&self) {
        let Some(store) = self.store.clone() else { return };
        let was_leader = self.role.is_leader();
        let leader_since = self.leader_since;
        tokio::spawn(async move {
            let flag = if was_leader { "true" } else { "false" };
            if let Err(err) = store.put(KEY_WAS_LEADER, flag).await {
                warn!(error = %err, "leadership persist failed");
            }
            let result = match leader_since {
                Some(since) => store.put(KEY_LEADER_SINCE, &since.to_string()).await,
                None => store.delete(KEY_LEADER_SINCE).await,
            };
            if let Err(err) = result {
                warn!(error = %err, "leadership persist failed");
            }
        });
    }

    fn persist_timers(&self) {
        let Some(store) = self.store.clone() else { return };
        let json = match serde_json::to_string(&self.timers) {
            Ok(json) => json,
            Err(err) => {
                warn!(error = %err, "timers serialize failed");
                return;
            }
        };
        tokio::spawn(async move {
            if let Err(err) = store.put(KEY_TIMERS, &json).await {
                warn!(error = %err, "timers persist failed");
            }
        });
    }
}

#[cfg(test)]
#[path = "coordinator_test.rs"]
mod tests;
