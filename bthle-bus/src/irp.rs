//! Pended request completion
//!
//! A handler that cannot finish synchronously returns `Pending` and parks a
//! [`Completion`]; whoever finishes the work later completes it exactly once
//! and the blocked caller wakes with the final status.

use std::sync::Arc;
use std::time::Duration;

use bthle_ioctl::IoStatus;
use bthle_unix::PairingToken;
use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
pub struct Completion {
    status: Mutex<Option<IoStatus>>,
    done: Condvar,
}

impl Completion {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Complete the request. Only the first completion counts; returns
    /// whether this call was it.
    pub fn complete(&self, status: IoStatus) -> bool {
        let mut slot = self.status.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(status);
        self.done.notify_all();
        true
    }

    pub fn is_complete(&self) -> bool {
        self.status.lock().is_some()
    }

    /// Block until completed
    pub fn wait(&self) -> IoStatus {
        let mut slot = self.status.lock();
        loop {
            if let Some(status) = *slot {
                return status;
            }
            self.done.wait(&mut slot);
        }
    }

    /// Block for at most `timeout`; `None` if still pending
    pub fn wait_timeout(&self, timeout: Duration) -> Option<IoStatus> {
        let mut slot = self.status.lock();
        if slot.is_none() {
            self.done.wait_for(&mut slot, timeout);
        }
        *slot
    }
}

/// A START_AUTH request parked on its radio until `PairingFinished`
#[derive(Debug)]
pub struct PendingPairing {
    pub token: PairingToken,
    pub completion: Arc<Completion>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bthle_ioctl::NtStatus;

    #[test]
    fn test_first_completion_wins() {
        let c = Completion::new();
        assert!(c.wait_timeout(Duration::from_millis(1)).is_none());
        assert!(c.complete(IoStatus::status(NtStatus::SUCCESS)));
        assert!(!c.complete(IoStatus::status(NtStatus::DELETE_PENDING)));
        assert_eq!(c.wait().status, NtStatus::SUCCESS);
    }

    #[test]
    fn test_wait_wakes_on_completion() {
        let c = Completion::new();
        let waiter = {
            let c = Arc::clone(&c);
            std::thread::spawn(move || c.wait())
        };
        std::thread::sleep(Duration::from_millis(20));
        c.complete(IoStatus::status(NtStatus::ACCESS_DENIED));
        assert_eq!(waiter.join().unwrap().status, NtStatus::ACCESS_DENIED);
    }
}
