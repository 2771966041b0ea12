//! Windows.Foundation building blocks shared by every facade class

pub mod async_op;
pub mod collections;
pub mod event;
pub mod object;
pub mod task;

use std::time::{SystemTime, UNIX_EPOCH};

pub use async_op::{AsyncOperation, AsyncStatus, CompletedHandler};
pub use collections::{VectorIterator, VectorView};
pub use event::{EventRegistrationToken, EventSource, TypedEventHandler};
pub use object::{ComPtr, InterfaceId, Inspectable};
pub use task::PollTask;

/// 100 ns intervals between 1601-01-01 and 1970-01-01
const UNIX_EPOCH_TICKS: i64 = 116_444_736_000_000_000;

/// `Windows.Foundation.DateTime`: 100 ns ticks since 1601-01-01 UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DateTime {
    pub universal_time: i64,
}

impl DateTime {
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    pub fn from_system_time(t: SystemTime) -> Self {
        let since_unix = match t.duration_since(UNIX_EPOCH) {
            Ok(d) => (d.as_nanos() / 100) as i64,
            Err(e) => -((e.duration().as_nanos() / 100) as i64),
        };
        Self {
            universal_time: UNIX_EPOCH_TICKS + since_unix,
        }
    }

    /// Milliseconds since the Unix epoch
    pub fn unix_millis(&self) -> i64 {
        (self.universal_time - UNIX_EPOCH_TICKS) / 10_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn unix_epoch_maps_onto_filetime_origin() {
        assert_eq!(DateTime::from_system_time(UNIX_EPOCH).universal_time, UNIX_EPOCH_TICKS);
        let later = UNIX_EPOCH + Duration::from_millis(1500);
        assert_eq!(DateTime::from_system_time(later).unix_millis(), 1500);
    }
}
