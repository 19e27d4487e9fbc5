//! Timetable engine — configuration in, schedule and point-in-time status out.
//!
//! DESIGN
//! ======
//! `build_timetable` expands a [`TimerSettings`] into a contiguous list of
//! on/off phases covering `[0, total_duration)`, round-start markers, and
//! sorted voice-cue timestamps. `status_at` answers "what is happening at
//! time t" for any real-valued t, including t before the start and past the
//! end, so audio scheduling and countdown displays can query between ticks.
//!
//! Both functions are pure; nothing here touches the channel or the clock.

use serde::{Deserialize, Serialize};

use crate::settings::TimerSettings;

// =============================================================================
// TYPES
// =============================================================================

/// Phase kind: lifting or resting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseKind {
    On,
    Off,
}

/// One contiguous block of the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub state: PhaseKind,
    /// Phase start, seconds from workout start.
    pub start: f64,
    /// Phase length in seconds.
    pub duration: f64,
}

/// Spoken cue text. Closed set matching the audio sprite keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cue {
    #[serde(rename = "3")]
    Three,
    #[serde(rename = "2")]
    Two,
    #[serde(rename = "1")]
    One,
    Lift,
    Rest,
}

/// A spoken cue and when to play it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoiceCue {
    pub text: Cue,
    /// Seconds from workout start.
    pub timestamp: f64,
}

/// Marks the start of a round.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoundMarker {
    /// 1-based round index.
    pub round: u32,
    /// Seconds from workout start.
    pub timestamp: f64,
}

/// The derived schedule for one timer configuration. Never mutated in place;
/// rebuild it when the configuration changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timetable {
    /// All on/off blocks in temporal order, contiguous over the whole workout.
    pub phases: Vec<Phase>,
    /// Spoken cues sorted ascending by timestamp.
    pub voice_cues: Vec<VoiceCue>,
    /// Round-start markers in temporal order.
    pub rounds: Vec<RoundMarker>,
    /// Full length of the workout in seconds.
    pub total_duration: f64,
}

/// Point-in-time answer from [`status_at`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuntimeStatus {
    /// `On` when lifting, `Off` when resting (and before/after the workout).
    pub state: PhaseKind,
    /// Seconds elapsed in the current phase.
    pub time_in_phase: f64,
    /// Whole seconds left until the phase changes (time until start when
    /// queried before the workout, 0 once it is over).
    pub remaining_seconds: u64,
    /// 1-based round index; 0 before round 1, `rounds + 1` once finished.
    pub current_round: u32,
    /// The next voice cue to fire, if any remains after `t`.
    pub next_voice_cue: Option<VoiceCue>,
}

// =============================================================================
// BUILD
// =============================================================================

/// Expand a configuration into its timetable.
#[must_use]
pub fn build_timetable(settings: &TimerSettings) -> Timetable {
    let offset = f64::from(settings.offset);
    let on_time = f64::from(settings.on_time);
    let off_time = f64::from(settings.off_time);
    let cycle = on_time + off_time;
    let total_duration = offset + f64::from(settings.rounds) * cycle;

    let mut phases = Vec::new();
    let mut voice_cues = Vec::new();
    let mut rounds = Vec::new();

    // Optional rest block before round 1.
    if settings.offset > 0 {
        phases.push(Phase { state: PhaseKind::Off, start: 0.0, duration: offset });
        voice_cues.push(VoiceCue { text: Cue::Rest, timestamp: 0.0 });
    }

    let mut t = offset;
    for r in 1..=settings.rounds {
        let lift_start = t;
        phases.push(Phase { state: PhaseKind::On, start: lift_start, duration: on_time });
        rounds.push(RoundMarker { round: r, timestamp: lift_start });

        // Countdown 3-2-1, clipped at the workout start.
        for (n, cue) in [(3.0, Cue::Three), (2.0, Cue::Two), (1.0, Cue::One)] {
            if lift_start - n >= 0.0 {
                voice_cues.push(VoiceCue { text: cue, timestamp: lift_start - n });
            }
        }
        voice_cues.push(VoiceCue { text: Cue::Lift, timestamp: lift_start });
        t += on_time;

        phases.push(Phase { state: PhaseKind::Off, start: t, duration: off_time });
        voice_cues.push(VoiceCue { text: Cue::Rest, timestamp: t });
        t += off_time;
    }

    voice_cues.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

    Timetable { phases, voice_cues, rounds, total_duration }
}

// =============================================================================
// QUERY
// =============================================================================

/// Schedule state at `t` seconds from workout start.
///
/// Total over all finite `t`: negative values report time until start,
/// values past the end report the completed sentinel round.
#[must_use]
pub fn status_at(timetable: &Timetable, t: f64) -> RuntimeStatus {
    if t < 0.0 {
        return RuntimeStatus {
            state: PhaseKind::Off,
            time_in_phase: 0.0,
            remaining_seconds: seconds_ceil(-t),
            current_round: 0,
            next_voice_cue: timetable.voice_cues.first().copied(),
        };
    }

    if t >= timetable.total_duration {
        return RuntimeStatus {
            state: PhaseKind::Off,
            time_in_phase: 0.0,
            remaining_seconds: 0,
            current_round: u32::try_from(timetable.rounds.len()).unwrap_or(u32::MAX).saturating_add(1),
            next_voice_cue: None,
        };
    }

    // Phases are sorted and contiguous, so exactly one interval contains t.
    let phase = find_phase(&timetable.phases, t);
    let time_in_phase = t - phase.start;
    let remaining_seconds = seconds_ceil(phase.duration - time_in_phase);

    let current_round = timetable
        .rounds
        .iter()
        .rev()
        .find(|marker| t >= marker.timestamp)
        .map_or(0, |marker| marker.round);

    let next_voice_cue = timetable.voice_cues.iter().find(|cue| cue.timestamp > t).copied();

    RuntimeStatus { state: phase.state, time_in_phase, remaining_seconds, current_round, next_voice_cue }
}

fn find_phase(phases: &[Phase], t: f64) -> Phase {
    let mut lo = 0usize;
    let mut hi = phases.len().saturating_sub(1);

    while lo <= hi {
        let mid = usize::midpoint(lo, hi);
        let p = phases[mid];
        if t < p.start {
            // EDGE: mid == 0 cannot underflow here because callers guarantee
            // t >= 0 and the first phase starts at 0.
            hi = mid - 1;
        } else if t >= p.start + p.duration {
            lo = mid + 1;
        } else {
            return p;
        }
    }

    // Unreachable for contiguous phase lists; fall back to the first block.
    phases.first().copied().unwrap_or(Phase { state: PhaseKind::Off, start: 0.0, duration: 0.0 })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn seconds_ceil(seconds: f64) -> u64 {
    if seconds <= 0.0 { 0 } else { seconds.ceil() as u64 }
}

#[cfg(test)]
#[path = "timetable_test.rs"]
mod tests;
