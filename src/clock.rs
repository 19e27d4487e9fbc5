//! Snapshot-based timer clock.
//!
//! DESIGN
//! ======
//! The clock never accumulates tick deltas. It stores one authoritative
//! `{timestamp, time}` snapshot and extrapolates `elapsed = time +
//! (now - timestamp)` while running, so display-refresh jitter cannot
//! drift the timer. Every caller passes `now` explicitly, which keeps the
//! transition functions deterministic under test.

use crate::message::TickerState;

/// The authoritative pair elapsed time is extrapolated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    /// Wall clock when the snapshot was taken, milliseconds since Unix epoch.
    pub timestamp: i64,
    /// Elapsed milliseconds at that instant.
    pub time: i64,
}

#[derive(Debug, Clone)]
pub struct TimerClock {
    snapshot: Snapshot,
    ticking: bool,
}

impl TimerClock {
    #[must_use]
    pub fn new(initial_time: i64, now: i64) -> Self {
        Self { snapshot: Snapshot { timestamp: now, time: initial_time }, ticking: false }
    }

    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot
    }

    #[must_use]
    pub fn ticking(&self) -> bool {
        self.ticking
    }

    /// Elapsed milliseconds at `now`.
    #[must_use]
    pub fn elapsed(&self, now: i64) -> i64 {
        if self.ticking {
            self.snapshot.time + (now - self.snapshot.timestamp)
        } else {
            self.snapshot.time
        }
    }

    /// Start running. Returns false (no-op) if already running.
    pub fn resume(&mut self, now: i64) -> bool {
        if self.ticking {
            return false;
        }
        self.snapshot = Snapshot { timestamp: now, time: self.snapshot.time };
        self.ticking = true;
        true
    }

    /// Stop running, freezing the snapshot at the current elapsed value.
    /// Returns false (no-op) if already stopped.
    pub fn pause(&mut self, now: i64) -> bool {
        if !self.ticking {
            return false;
        }
        self.snapshot = Snapshot { timestamp: now, time: self.elapsed(now) };
        self.ticking = false;
        true
    }

    /// Pause and force elapsed time back to zero. Not a no-op: resetting an
    /// already-zeroed stopped clock still refreshes the snapshot timestamp.
    pub fn reset(&mut self, now: i64) {
        self.pause(now);
        self.snapshot = Snapshot { timestamp: now, time: 0 };
    }

    /// Overwrite the elapsed value, keeping the run state.
    pub fn set_time(&mut self, now: i64, time: i64) {
        self.snapshot = Snapshot { timestamp: now, time };
    }

    /// Apply a received leader state. The message age is clamped at zero to
    /// tolerate a local clock behind the sender's, and the snapshot is
    /// rebased onto the receiver's clock.
    pub fn reconcile(&mut self, state: TickerState, message_timestamp: i64, received_at: i64) {
        let message_age = (received_at - message_timestamp).max(0);
        self.snapshot = Snapshot { timestamp: received_at, time: state.time + message_age };
        self.ticking = state.ticking;
    }
}
