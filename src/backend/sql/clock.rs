//! Millisecond timestamps for `expires` and `last_access`.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

fn wall_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Wall clock in epoch milliseconds that never repeats a reading.
///
/// Two accesses in the same millisecond still get distinct `last_access`
/// values, so recency order between them is preserved.
#[derive(Debug, Default)]
pub(crate) struct AccessClock {
    last: AtomicI64,
}

impl AccessClock {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Current time without advancing the clock.
    pub(crate) fn now(&self) -> i64 {
        wall_millis().max(self.last.load(Ordering::Acquire))
    }

    /// Next strictly increasing timestamp.
    pub(crate) fn tick(&self) -> i64 {
        let mut current = self.last.load(Ordering::Acquire);
        loop {
            let next = wall_millis().max(current.saturating_add(1));
            match self.last.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }
}
