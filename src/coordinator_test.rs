use super::*;
use crate::channel::LocalHub;
use crate::settings::TimerSettings;
use crate::store::DeviceStore;

const SESSION: &str = "test-session";

fn test_options() -> SessionOptions {
    SessionOptions {
        // Deterministic elections: correctness rests on the comparators,
        // not the collision-avoidance jitter.
        negotiation_jitter_ms: 0,
        config_debounce_ms: 100,
        refresh_interval_ms: 50,
        ..SessionOptions::default()
    }
}

async fn spawn_client(
    hub: &LocalHub,
    client_id: &str,
    connection_id: &str,
    store: Option<DeviceStore>,
    options: SessionOptions,
) -> SessionHandle {
    let (channel, events) = hub.attach_with_connection(SESSION, client_id, connection_id).await;
    spawn(Arc::new(channel), events, store, options)
}

/// Let queued events, spawned negotiations, and presence fan-out drain.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(300)).await;
}

fn custom_config(name: &str) -> Vec<KeyedTimerSettings> {
    vec![KeyedTimerSettings::new(TimerSettings {
        name: name.into(),
        offset: 5,
        on_time: 20,
        off_time: 10,
        rounds: 3,
        voice: "M1".into(),
    })]
}

// =============================================================================
// ELECTION
// =============================================================================

#[tokio::test(start_paused = true)]
async fn lone_client_promotes_itself() {
    let hub = LocalHub::new();
    let a = spawn_client(&hub, "a", "conn-a", None, test_options()).await;
    settle().await;

    assert_eq!(a.role(), Role::Leader);
    assert_eq!(a.current_lead().as_deref(), Some("a"));
    assert_eq!(a.peer_count(), 0);
    assert!(a.connected());
}

#[tokio::test(start_paused = true)]
async fn sequential_join_elects_lowest_connection_and_converges() {
    let hub = LocalHub::new();
    let a = spawn_client(&hub, "a", "conn-a", None, test_options()).await;
    settle().await;
    let b = spawn_client(&hub, "b", "conn-b", None, test_options()).await;
    settle().await;
    let c = spawn_client(&hub, "c", "conn-c", None, test_options()).await;
    settle().await;

    let leaders = [&a, &b, &c]
        .iter()
        .filter(|h| h.role() == Role::Leader)
        .count();
    assert_eq!(leaders, 1, "exactly one leader");
    assert_eq!(a.role(), Role::Leader);
    assert_eq!(b.role(), Role::Follower);
    assert_eq!(c.role(), Role::Follower);

    // Everyone agrees on who leads.
    for handle in [&a, &b, &c] {
        assert_eq!(handle.current_lead().as_deref(), Some("a"));
    }
    assert_eq!(a.peer_count(), 2);
    assert_eq!(b.peer_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn takeover_dethrones_current_leader() {
    let hub = LocalHub::new();
    let a = spawn_client(&hub, "a", "conn-a", None, test_options()).await;
    settle().await;
    let b = spawn_client(&hub, "b", "conn-b", None, test_options()).await;
    settle().await;
    assert_eq!(a.role(), Role::Leader);
    assert_eq!(b.role(), Role::Follower);

    b.takeover().await.unwrap();
    settle().await;

    assert_eq!(b.role(), Role::Leader);
    assert_eq!(a.role(), Role::Follower, "old leader must cede to the claimant");
    assert_eq!(a.current_lead().as_deref(), Some("b"));
    assert_eq!(b.current_lead().as_deref(), Some("b"));
}

// Real time: the store round-trips through SQLite's worker thread, which a
// paused clock would race past.
#[tokio::test]
async fn forced_duplicate_leaders_converge_to_one() {
    let hub = LocalHub::new();

    // Persisted leadership history forces both clients to rejoin claiming
    // leader. Client "a" holds the earlier tenure and the lower connection
    // id, so every tie-break resolves to it.
    let store_a = DeviceStore::open_in_memory().await.unwrap();
    store_a.put(crate::store::KEY_WAS_LEADER, "true").await.unwrap();
    store_a.put(crate::store::KEY_LEADER_SINCE, "100").await.unwrap();
    let store_b = DeviceStore::open_in_memory().await.unwrap();
    store_b.put(crate::store::KEY_WAS_LEADER, "true").await.unwrap();
    store_b.put(crate::store::KEY_LEADER_SINCE, "200").await.unwrap();

    let a = spawn_client(&hub, "a", "conn-a", Some(store_a), test_options()).await;
    let b = spawn_client(&hub, "b", "conn-b", Some(store_b), test_options()).await;
    settle().await;
    settle().await;

    let a_role = a.role();
    let b_role = b.role();
    assert!(
        (a_role == Role::Leader) ^ (b_role == Role::Leader),
        "exactly one leader after convergence, got {a_role:?}/{b_role:?}"
    );
    assert_eq!(a_role, Role::Leader);
    assert_eq!(a.current_lead().as_deref(), Some("a"));
    assert_eq!(b.current_lead().as_deref(), Some("a"));
}

#[tokio::test(start_paused = true)]
async fn leader_departure_triggers_renegotiation() {
    let hub = LocalHub::new();
    let a = spawn_client(&hub, "a", "conn-a", None, test_options()).await;
    settle().await;
    let b = spawn_client(&hub, "b", "conn-b", None, test_options()).await;
    settle().await;
    let c = spawn_client(&hub, "c", "conn-c", None, test_options()).await;
    settle().await;

    a.dispose().await.unwrap();
    settle().await;

    assert_eq!(b.role(), Role::Leader, "lowest remaining connection takes over");
    assert_eq!(c.role(), Role::Follower);
    assert_eq!(b.current_lead().as_deref(), Some("b"));
    assert_eq!(c.current_lead().as_deref(), Some("b"));
    assert_eq!(b.peer_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn remote_viewer_never_claims_leadership() {
    let hub = LocalHub::new();
    let options = SessionOptions { remote: true, ..test_options() };
    let r = spawn_client(&hub, "r", "conn-r", None, options).await;
    settle().await;

    assert_eq!(r.role(), Role::RemoteViewer);
    assert_eq!(r.current_lead(), None);
}

// Real time, like `forced_duplicate_leaders_converge_to_one`.
#[tokio::test]
async fn leadership_history_restores_leader_role() {
    let hub = LocalHub::new();
    let store = DeviceStore::open_in_memory().await.unwrap();
    store.put(crate::store::KEY_WAS_LEADER, "true").await.unwrap();
    store.put(crate::store::KEY_LEADER_SINCE, "123").await.unwrap();
    store.put(crate::store::KEY_GLOBAL_TIME, "45000").await.unwrap();

    let a = spawn_client(&hub, "a", "conn-a", Some(store), test_options()).await;
    settle().await;

    assert_eq!(a.role(), Role::Leader);
    assert_eq!(a.current_lead().as_deref(), Some("a"));
    assert!(!a.ticking());
    assert_eq!(a.view().snapshot.time, 45_000);
}

// =============================================================================
// TRANSPORT DEGRADATION
// =============================================================================

#[tokio::test(start_paused = true)]
async fn suspension_promotes_follower_to_standalone_leader() {
    let hub = LocalHub::new();
    let a = spawn_client(&hub, "a", "conn-a", None, test_options()).await;
    settle().await;
    let b = spawn_client(&hub, "b", "conn-b", None, test_options()).await;
    settle().await;
    assert_eq!(b.role(), Role::Follower);

    hub.set_connection_state(SESSION, "conn-b", ConnectionState::Suspended).await;
    settle().await;

    assert_eq!(b.role(), Role::Leader, "degraded transport must not stall the local timer");
    assert!(!b.connected());
    assert_eq!(b.current_lead().as_deref(), Some("b"));
    // The other side is unaffected.
    assert_eq!(a.role(), Role::Leader);
}

#[tokio::test(start_paused = true)]
async fn suspension_leaves_remote_viewer_alone() {
    let hub = LocalHub::new();
    let options = SessionOptions { remote: true, ..test_options() };
    let r = spawn_client(&hub, "r", "conn-r", None, options).await;
    settle().await;

    hub.set_connection_state(SESSION, "conn-r", ConnectionState::Suspended).await;
    settle().await;

    assert_eq!(r.role(), Role::RemoteViewer);
}

#[tokio::test(start_paused = true)]
async fn start_offline_acts_as_standalone_leader() {
    let hub = LocalHub::new();
    let options = SessionOptions { start_offline: true, ..test_options() };
    let a = spawn_client(&hub, "a", "conn-a", None, options).await;
    settle().await;

    assert_eq!(a.role(), Role::Leader);
    assert_eq!(a.current_lead().as_deref(), Some("a"));

    // Offline clients do not advertise presence.
    let (probe, _events) = hub.attach_with_connection(SESSION, "probe", "conn-p").await;
    assert!(probe.presence_get().await.unwrap().is_empty());
}

// =============================================================================
// SYNC + RECONCILIATION
// =============================================================================

#[tokio::test(start_paused = true)]
async fn followers_reconcile_leader_state() {
    let hub = LocalHub::new();
    let a = spawn_client(&hub, "a", "conn-a", None, test_options()).await;
    settle().await;
    let b = spawn_client(&hub, "b", "conn-b", None, test_options()).await;
    settle().await;

    a.resume().await.unwrap();
    settle().await;

    assert!(a.ticking());
    assert!(b.ticking(), "follower applies the leader's running state");
    let drift = (a.elapsed_time() - b.elapsed_time()).abs();
    assert!(drift < 100, "elapsed drift {drift}ms");

    a.pause().await.unwrap();
    settle().await;

    assert!(!a.ticking());
    assert!(!b.ticking());
    let drift = (a.elapsed_time() - b.elapsed_time()).abs();
    assert!(drift < 100, "paused drift {drift}ms");
}

#[tokio::test(start_paused = true)]
async fn new_peer_is_greeted_with_full_state() {
    let hub = LocalHub::new();
    let a = spawn_client(&hub, "a", "conn-a", None, test_options()).await;
    settle().await;
    assert_eq!(a.role(), Role::Leader);

    let config = custom_config("Greeting");
    a.update_config(config.clone()).await.unwrap();
    a.flush().await.unwrap();
    settle().await;

    // The config broadcast above went nowhere (alone in session); a joining
    // peer must still receive it immediately via the greeting path.
    let b = spawn_client(&hub, "b", "conn-b", None, test_options()).await;
    settle().await;

    assert_eq!(b.view().timers, config);
}

#[tokio::test(start_paused = true)]
async fn config_broadcast_is_debounced_and_coalesced() {
    let hub = LocalHub::new();
    let a = spawn_client(&hub, "a", "conn-a", None, test_options()).await;
    settle().await;
    let b = spawn_client(&hub, "b", "conn-b", None, test_options()).await;
    settle().await;
    let before = b.view().timers.clone();

    a.update_config(custom_config("first")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    let latest = custom_config("second");
    a.update_config(latest.clone()).await.unwrap();

    // Inside the window nothing has been published yet.
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(b.view().timers, before);

    // After the window the burst collapses into one publish of the latest.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(b.view().timers, latest);
}

#[tokio::test(start_paused = true)]
async fn manual_adjustment_is_leader_only_and_flushable() {
    let hub = LocalHub::new();
    let a = spawn_client(&hub, "a", "conn-a", None, test_options()).await;
    settle().await;
    let b = spawn_client(&hub, "b", "conn-b", None, test_options()).await;
    settle().await;

    a.set_time(60_000).await.unwrap();
    a.flush().await.unwrap();
    settle().await;
    assert_eq!(a.view().snapshot.time, 60_000);
    let drift = (b.elapsed_time() - 60_000).abs();
    assert!(drift < 100, "follower should land at 60s, drift {drift}ms");

    // A follower's adjustment is refused locally and changes nothing.
    b.set_time(5).await.unwrap();
    settle().await;
    let drift = (b.elapsed_time() - 60_000).abs();
    assert!(drift < 100, "non-leader set_time must be ignored, drift {drift}ms");
}

#[tokio::test(start_paused = true)]
async fn nudge_moves_relative_to_current_elapsed() {
    let hub = LocalHub::new();
    let a = spawn_client(&hub, "a", "conn-a", None, test_options()).await;
    settle().await;

    a.set_time(10_000).await.unwrap();
    a.nudge(1_000).await.unwrap();
    a.nudge(-500).await.unwrap();
    settle().await;

    assert_eq!(a.view().snapshot.time, 10_500);
}

#[tokio::test(start_paused = true)]
async fn remote_signal_is_obeyed_by_leader_only() {
    let hub = LocalHub::new();
    let a = spawn_client(&hub, "a", "conn-a", None, test_options()).await;
    settle().await;
    let b = spawn_client(&hub, "b", "conn-b", None, test_options()).await;
    settle().await;
    let r = spawn_client(&hub, "r", "conn-r", None, SessionOptions { remote: true, ..test_options() }).await;
    settle().await;

    r.send_signal(Signal::Resume).await.unwrap();
    settle().await;

    assert!(a.ticking(), "leader obeys the signal");
    assert!(b.ticking(), "follower sees the resulting broadcast");
    assert!(r.ticking(), "remote sees it too");

    r.send_signal(Signal::Reset).await.unwrap();
    settle().await;

    assert!(!a.ticking());
    assert_eq!(a.view().snapshot.time, 0);
    assert!(!b.ticking());
}

#[tokio::test(start_paused = true)]
async fn reapplied_sync_is_idempotent() {
    let hub = LocalHub::new();
    let a = spawn_client(&hub, "a", "conn-a", None, test_options()).await;
    settle().await;
    let b = spawn_client(&hub, "b", "conn-b", None, test_options()).await;
    settle().await;

    a.set_time(30_000).await.unwrap();
    a.flush().await.unwrap();
    settle().await;
    let first = b.elapsed_time();

    // The leader re-flushes the identical state; the follower's elapsed
    // value must not jump.
    a.flush().await.unwrap();
    settle().await;
    let second = b.elapsed_time();
    assert!((second - first).abs() < 100, "duplicate sync moved elapsed by {}ms", second - first);
}

// =============================================================================
// LIFECYCLE
// =============================================================================

#[tokio::test(start_paused = true)]
async fn dispose_is_terminal() {
    let hub = LocalHub::new();
    let a = spawn_client(&hub, "a", "conn-a", None, test_options()).await;
    settle().await;

    a.dispose().await.unwrap();
    settle().await;

    assert!(matches!(a.resume().await, Err(SessionError::Disposed)));
}

#[tokio::test(start_paused = true)]
async fn toggle_alternates_run_state() {
    let hub = LocalHub::new();
    let a = spawn_client(&hub, "a", "conn-a", None, test_options()).await;
    settle().await;

    a.toggle().await.unwrap();
    settle().await;
    assert!(a.ticking());

    a.toggle().await.unwrap();
    settle().await;
    assert!(!a.ticking());
}
