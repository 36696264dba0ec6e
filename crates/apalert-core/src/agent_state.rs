//! Per-(session, agent) admission state.
//!
//! Every agent kind shares the same rules: a one-hour rate limit after each
//! successful attempt, a sticky disable once the source proves unusable,
//! and, for the HTML agent only, a 24-hour backoff after a timeout.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

// ─── Constants ───────────────────────────────────────────────────────

/// Minimum gap between two unforced refreshes of the same agent.
pub const RATE_LIMIT: TimeDelta = TimeDelta::hours(1);

/// Backoff imposed on the HTML agent after a connection timeout.
pub const HTML_TIMEOUT_BACKOFF: TimeDelta = TimeDelta::hours(24);

// ─── Admission ───────────────────────────────────────────────────────

/// Outcome of asking an agent whether it may do network work now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Go,
    /// Refreshed less than [`RATE_LIMIT`] ago.
    RateLimited,
    /// Inside a timeout backoff window; `force` does not override it.
    BackedOff,
    /// Permanently unusable for this session.
    Disabled,
}

impl Admission {
    pub fn is_go(self) -> bool {
        self == Self::Go
    }
}

// ─── Agent State ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentState {
    pub enabled: bool,
    pub last_refreshed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub backoff_until: Option<DateTime<Utc>>,
}

impl Default for AgentState {
    fn default() -> Self {
        Self {
            enabled: true,
            last_refreshed: None,
            backoff_until: None,
        }
    }
}

impl AgentState {
    pub fn admission(&self, now: DateTime<Utc>, force: bool) -> Admission {
        if !self.enabled {
            return Admission::Disabled;
        }
        if self.backoff_until.is_some_and(|until| now < until) {
            return Admission::BackedOff;
        }
        if force {
            return Admission::Go;
        }
        match self.last_refreshed {
            Some(last) if now - last < RATE_LIMIT => Admission::RateLimited,
            _ => Admission::Go,
        }
    }

    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.last_refreshed = Some(now);
        self.backoff_until = None;
    }

    /// Sticky: only a manual re-enable clears it.
    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn back_off(&mut self, now: DateTime<Utc>, window: TimeDelta) {
        self.backoff_until = Some(now + window);
    }

    pub fn reenable(&mut self) {
        *self = Self::default();
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
