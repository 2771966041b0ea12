//! Strictly monotonic notification timestamps
//!
//! Some clients use the timestamp of a value-changed event as its identity,
//! so no two notifications in the process may share one. Timestamps are
//! FILETIME-style 100 ns ticks since 1601-01-01.

use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// 100 ns ticks between 1601-01-01 and 1970-01-01
const FILETIME_UNIX_EPOCH: u64 = 116_444_736_000_000_000;

#[derive(Default)]
pub struct MonotonicClock {
    last: Mutex<u64>,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    fn now_ticks() -> u64 {
        let since_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| (d.as_nanos() / 100) as u64)
            .unwrap_or(0);
        FILETIME_UNIX_EPOCH + since_unix
    }

    /// Next timestamp; strictly greater than every earlier one from this clock.
    pub fn next(&self) -> u64 {
        let mut last = self.last.lock();
        let now = Self::now_ticks();
        *last = if now > *last { now } else { *last + 1 };
        *last
    }
}

/// The process-wide notification clock
pub fn notification_clock() -> &'static MonotonicClock {
    static CLOCK: OnceLock<MonotonicClock> = OnceLock::new();
    CLOCK.get_or_init(MonotonicClock::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_strictly_increasing() {
        let clock = MonotonicClock::new();
        let mut prev = clock.next();
        for _ in 0..10_000 {
            let t = clock.next();
            assert!(t > prev);
            prev = t;
        }
        assert!(prev > FILETIME_UNIX_EPOCH);
    }

    #[test]
    fn test_unique_across_threads() {
        let clock = Arc::new(MonotonicClock::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let clock = Arc::clone(&clock);
                std::thread::spawn(move || (0..1000).map(|_| clock.next()).collect::<Vec<_>>())
            })
            .collect();
        let mut all: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        let n = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), n);
    }
}
