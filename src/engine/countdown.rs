// src/engine/countdown.rs

use crate::config::SessionSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownState {
    Stopped,
    Running,
    Expired,
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    pub remaining: u64,
    /// The low-time banner appeared on this tick.
    pub banner_shown: bool,
    /// The low-time banner auto-dismissed on this tick.
    pub banner_hidden: bool,
    /// The clock reached zero on this tick.
    pub expired: bool,
}

/// Authoritative local clock of a session.
///
/// Seeded once from the loader; never re-synchronized with the server.
/// The low-time warning is an orthogonal one-shot flag, not a state.
#[derive(Debug, Clone)]
pub struct Countdown {
    remaining: u64,
    state: CountdownState,
    threshold: u64,
    banner_secs: u64,
    warned: bool,
    banner_left: u64,
}

impl Countdown {
    pub fn new(remaining: u64, settings: &SessionSettings) -> Self {
        Self {
            remaining,
            state: CountdownState::Stopped,
            threshold: settings.low_time_threshold_secs,
            banner_secs: settings.low_time_banner_secs,
            warned: false,
            banner_left: 0,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn state(&self) -> CountdownState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == CountdownState::Running
    }

    pub fn is_expired(&self) -> bool {
        self.state == CountdownState::Expired
    }

    pub fn banner_visible(&self) -> bool {
        self.banner_left > 0
    }

    /// Moves `Stopped` to `Running`. Returns `false` if it was not stopped,
    /// so a second start never adds a second tick source.
    pub fn start(&mut self) -> bool {
        if self.state != CountdownState::Stopped {
            return false;
        }
        if self.remaining == 0 {
            self.state = CountdownState::Expired;
            return false;
        }
        self.state = CountdownState::Running;
        true
    }

    /// Halts ticking without expiring (session ended some other way).
    pub fn stop(&mut self) {
        if self.state == CountdownState::Running {
            self.state = CountdownState::Stopped;
        }
        self.banner_left = 0;
    }

    /// Advances the clock by one second. A no-op unless running.
    pub fn tick(&mut self) -> Option<TickOutcome> {
        if self.state != CountdownState::Running {
            return None;
        }

        let previous = self.remaining;
        self.remaining = previous.saturating_sub(1);

        let mut outcome = TickOutcome {
            remaining: self.remaining,
            banner_shown: false,
            banner_hidden: false,
            expired: false,
        };

        if self.banner_left > 0 {
            self.banner_left -= 1;
            outcome.banner_hidden = self.banner_left == 0;
        }

        if !self.warned && previous > self.threshold && self.remaining <= self.threshold {
            self.warned = true;
            if self.banner_secs > 0 {
                self.banner_left = self.banner_secs;
                outcome.banner_shown = true;
                outcome.banner_hidden = false;
            }
        }

        if self.remaining == 0 {
            self.state = CountdownState::Expired;
            outcome.expired = true;
        }

        Some(outcome)
    }

    /// `m:ss` rendering of the remaining time.
    pub fn display(&self) -> String {
        format_time(self.remaining)
    }
}

pub fn format_time(seconds: u64) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}
