//! Demo driver: a local multi-client session on one machine.
//!
//! Spawns `CLIENTS` coordinated clients over the in-process hub, waits for
//! the election to settle, starts the shared timer, and prints the
//! timetable status of the first configured timer while it runs.
//!
//! Environment:
//! - `CLIENTS` — number of simulated clients (default 3)
//! - `SESSION_ID` — session name (default: persisted or random)
//! - `LIFTSYNC_DB` — device store path (default: in-memory)
//! - `TOKEN_ENDPOINT_URL` — optional token endpoint; a failing fetch
//!   demonstrates the offline fallback, exactly like a hosted deployment.

use std::sync::Arc;
use std::time::Duration;

use liftsync::auth::TokenClient;
use liftsync::coordinator::{self, SessionHandle, SessionOptions};
use liftsync::store::DeviceStore;
use liftsync::{LocalHub, Role, build_timetable, status_at};

fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let clients: usize = env_parse("CLIENTS", 3).max(1);

    // The device store remembers identity and timer state across runs.
    let store = match std::env::var("LIFTSYNC_DB") {
        Ok(path) => DeviceStore::open(std::path::Path::new(&path)).await,
        Err(_) => DeviceStore::open_in_memory().await,
    }
    .expect("device store init failed");

    let (stored_session, client_id) = store
        .load_or_create_identity()
        .await
        .expect("identity load failed");
    let session_id = std::env::var("SESSION_ID").unwrap_or(stored_session);

    // Token endpoint is optional here; when configured, a failed fetch
    // forces offline (standalone leader) mode like a hosted deployment.
    let mut start_offline = false;
    match TokenClient::from_env() {
        Ok(token_client) => match token_client.request_token(&session_id, &client_id).await {
            Ok(grant) => tracing::info!(key_name = %grant.key_name, expires = grant.expires, "channel token issued"),
            Err(e) => {
                tracing::warn!(error = %e, "token fetch failed — starting offline");
                start_offline = true;
            }
        },
        Err(e) => tracing::info!(reason = %e, "no token endpoint configured; using local hub directly"),
    }

    let hub = LocalHub::new();
    let mut handles: Vec<SessionHandle> = Vec::with_capacity(clients);

    // The first client carries the device store; extra clients simulate
    // other devices joining the same session.
    let (channel, events) = hub.attach(&session_id, &client_id).await;
    handles.push(coordinator::spawn(
        Arc::new(channel),
        events,
        Some(store),
        SessionOptions { start_offline, ..SessionOptions::default() },
    ));
    for n in 1..clients {
        let peer_id = format!("{client_id}-peer{n}");
        let (channel, events) = hub.attach(&session_id, &peer_id).await;
        handles.push(coordinator::spawn(Arc::new(channel), events, None, SessionOptions::default()));
    }

    // Let join + negotiation settle.
    tokio::time::sleep(Duration::from_millis(500)).await;
    for handle in &handles {
        tracing::info!(role = ?handle.role(), lead = ?handle.current_lead(), peers = handle.peer_count(), "client settled");
    }

    let Some(leader) = handles.iter().find(|h| h.role() == Role::Leader) else {
        tracing::error!("no leader elected; aborting demo");
        return;
    };

    leader.reset().await.expect("reset failed");
    leader.resume().await.expect("resume failed");
    tracing::info!("timer started");

    let timers = leader.view().timers;
    let Some(first_timer) = timers.first() else {
        tracing::error!("no timer configured; aborting demo");
        return;
    };
    let timetable = build_timetable(&first_timer.settings);
    for _ in 0..10 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let follower = handles.last().expect("at least one client");
        #[allow(clippy::cast_precision_loss)]
        let t = follower.elapsed_time() as f64 / 1_000.0;
        let status = status_at(&timetable, t);
        tracing::info!(
            timer = %first_timer.settings.name,
            elapsed_s = t,
            state = ?status.state,
            round = status.current_round,
            remaining = status.remaining_seconds,
            next_cue = ?status.next_voice_cue.map(|cue| cue.text),
            "status"
        );
    }

    for handle in &handles {
        let _ = handle.dispose().await;
    }
    tracing::info!("session disposed");
}
