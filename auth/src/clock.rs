//! Time source for token timestamps and record expiry.

use chrono::{DateTime, Utc};

/// Clock abstraction.
///
/// Production code uses [`SystemClock`]; tests substitute a fixed or
/// steppable clock to exercise expiry without sleeping.
pub trait Clock: Send + Sync {
    /// Get the current time
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
