//! Time source for the `now` activation variable.

use chrono::{DateTime, SecondsFormat, Utc};

/// Supplies the current time to a gate.
///
/// Injected into [`crate::PolicyStage`] so that checks comparing against
/// `now` can be tested with a fixed instant.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(DateTime<Utc>);

impl FixedClock {
    /// Creates a clock that always returns `at`.
    pub fn new(at: DateTime<Utc>) -> Self {
        Self(at)
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Formats an instant the way it appears under the `now` key (RFC 3339, whole seconds).
pub fn format_now(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}
