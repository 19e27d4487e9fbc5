//! Timer configuration types.
//!
//! DESIGN
//! ======
//! A session carries an ordered list of keyed timer configurations; the key
//! is stable across edits so followers can correlate entries when the leader
//! replaces the list wholesale. All durations are whole seconds.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Configuration for a single interval timer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSettings {
    /// Display name, e.g. "Team 1".
    pub name: String,
    /// Seconds of rest before round 1 starts.
    pub offset: u32,
    /// Seconds of work per round.
    pub on_time: u32,
    /// Seconds of rest per round.
    pub off_time: u32,
    /// Number of rounds. Meaningful values are >= 1.
    pub rounds: u32,
    /// Voice preset consumed by the audio layer (e.g. "M1", "F1").
    pub voice: String,
}

/// A timer configuration with a stable identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyedTimerSettings {
    pub id: Uuid,
    pub settings: TimerSettings,
}

impl KeyedTimerSettings {
    #[must_use]
    pub fn new(settings: TimerSettings) -> Self {
        Self { id: Uuid::new_v4(), settings }
    }
}

/// The default two-team session preset.
#[must_use]
pub fn default_timers() -> Vec<KeyedTimerSettings> {
    vec![
        KeyedTimerSettings::new(TimerSettings {
            name: "Team 1".into(),
            offset: 10,
            on_time: 60,
            off_time: 30,
            rounds: 4,
            voice: "M1".into(),
        }),
        KeyedTimerSettings::new(TimerSettings {
            name: "Team 2".into(),
            offset: 110,
            on_time: 60,
            off_time: 30,
            rounds: 4,
            voice: "F1".into(),
        }),
    ]
}
