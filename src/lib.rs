//! `LiftSync` — session coordination for a shared workout timer.
//!
//! ARCHITECTURE
//! ============
//! Several clients sharing a session id agree on a single authoritative
//! timer. One client is elected leader; its timer state is broadcast over a
//! publish/subscribe channel and reconciled by followers. A pure timetable
//! engine turns timer configuration into phases, round markers, and voice
//! cue timestamps for downstream audio/UI.
//!
//! Each client runs one [`coordinator`] task that owns every mutable field
//! and reacts to channel events, local commands, and timers. Consumers hold
//! a cheap [`coordinator::SessionHandle`] for commands and a `watch`-based
//! view for reads.
//!
//! BOUNDARIES
//! ==========
//! The transport is the [`channel::Channel`] trait; [`channel::LocalHub`]
//! is the in-process implementation used by tests and the demo binary.
//! Token issuing ([`auth`]) and per-device persistence ([`store`]) are
//! external collaborators bound at the call site.

pub mod auth;
pub mod channel;
pub mod clock;
pub mod coordinator;
pub mod election;
pub mod message;
pub mod roster;
pub mod settings;
pub mod store;
pub mod timetable;

pub use channel::{
    Channel, ChannelError, ChannelEvent, ConnectionState, LocalHub, PresenceAction, PresenceData, PresenceEntry,
};
pub use clock::{Snapshot, TimerClock};
pub use coordinator::{SessionError, SessionHandle, SessionOptions, SessionView, spawn};
pub use election::Role;
pub use message::{Payload, RemoteSignal, Signal, SyncMessage, TickerState};
pub use settings::{KeyedTimerSettings, TimerSettings};
pub use timetable::{Cue, Phase, PhaseKind, RoundMarker, RuntimeStatus, Timetable, VoiceCue, build_timetable, status_at};
