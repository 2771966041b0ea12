//! Per-characteristic notification task
//!
//! Idle → Running → Stopping → Idle. While running, one named thread blocks
//! in a cancellable read, wraps each non-empty value with a process-wide
//! strictly increasing timestamp and hands it to the observer. Empty values
//! and transient failures back off for the retry interval; anything else
//! ends the task.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use std::time::Duration;

use bthle_ioctl::NtStatus;
use bthle_unix::BluetoothAddress;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, trace, warn};

use crate::clock::notification_clock;
use crate::config::BusConfig;
use crate::error::BusError;

/// Identity of a characteristic across the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PumpKey {
    pub address: BluetoothAddress,
    pub service: u16,
    pub characteristic: u16,
}

/// One delivered notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationValue {
    pub value: Vec<u8>,
    /// FILETIME ticks; strictly increasing across the process
    pub timestamp: u64,
}

pub type ReadFn = Box<dyn FnMut() -> Result<Vec<u8>, NtStatus> + Send>;
pub type CancelFn = Arc<dyn Fn() + Send + Sync>;

fn running_pumps() -> &'static Mutex<HashSet<PumpKey>> {
    static PUMPS: OnceLock<Mutex<HashSet<PumpKey>>> = OnceLock::new();
    PUMPS.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Registry slot; released when the task thread exits
struct Claim(PumpKey);

impl Claim {
    fn acquire(key: PumpKey) -> Result<Self, BusError> {
        if !running_pumps().lock().insert(key) {
            return Err(BusError::Busy(format!(
                "notification task already running for {} {:#06x}",
                key.address, key.characteristic
            )));
        }
        Ok(Self(key))
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        running_pumps().lock().remove(&self.0);
    }
}

/// Whether a task is running for `key`
pub fn is_pumping(key: &PumpKey) -> bool {
    running_pumps().lock().contains(key)
}

fn is_transient(status: NtStatus) -> bool {
    matches!(
        status,
        NtStatus::IO_TIMEOUT | NtStatus::DEVICE_BUSY | NtStatus::CANCELLED
    )
}

#[derive(Default)]
struct Exit {
    done: Mutex<bool>,
    cv: Condvar,
}

pub struct NotificationPump {
    key: PumpKey,
    stop: Arc<AtomicBool>,
    cancel: CancelFn,
    exit: Arc<Exit>,
    thread: Option<JoinHandle<()>>,
    stop_timeout: Duration,
}

impl NotificationPump {
    /// Start the task. Fails with `Busy` if one already runs for `key`.
    pub fn start<H>(
        key: PumpKey,
        config: &BusConfig,
        mut read: ReadFn,
        cancel: CancelFn,
        mut handler: H,
    ) -> Result<Self, BusError>
    where
        H: FnMut(NotificationValue) + Send + 'static,
    {
        let claim = Claim::acquire(key)?;
        let stop = Arc::new(AtomicBool::new(false));
        let exit = Arc::new(Exit::default());
        let retry = config.notify_retry();

        let thread_stop = Arc::clone(&stop);
        let thread_exit = Arc::clone(&exit);
        let thread = std::thread::Builder::new()
            .name(format!("notify-{:04x}", key.characteristic))
            .spawn(move || {
                {
                    let _claim = claim;
                    debug!("notification task for {} {:#06x} started", key.address, key.characteristic);
                    while !thread_stop.load(Ordering::Acquire) {
                        match read() {
                            Ok(value) if !value.is_empty() => {
                                let timestamp = notification_clock().next();
                                trace!("notification {:02X?} at {}", value, timestamp);
                                handler(NotificationValue { value, timestamp });
                            }
                            Ok(_) => std::thread::sleep(retry),
                            Err(status) if is_transient(status) => {
                                if !thread_stop.load(Ordering::Acquire) {
                                    std::thread::sleep(retry);
                                }
                            }
                            Err(status) => {
                                warn!("notification task for {} ends: {}", key.address, status);
                                break;
                            }
                        }
                    }
                    debug!("notification task for {} {:#06x} exits", key.address, key.characteristic);
                }
                *thread_exit.done.lock() = true;
                thread_exit.cv.notify_all();
            })?;

        Ok(Self {
            key,
            stop,
            cancel,
            exit,
            thread: Some(thread),
            stop_timeout: config.notify_stop_timeout(),
        })
    }

    pub fn key(&self) -> PumpKey {
        self.key
    }

    pub fn is_running(&self) -> bool {
        !*self.exit.done.lock()
    }

    /// Stop the task and wait for it to exit. Returns `false` if it did not
    /// exit in time; the thread is then leaked.
    pub fn stop(mut self) -> bool {
        self.shutdown()
    }

    fn shutdown(&mut self) -> bool {
        let Some(thread) = self.thread.take() else {
            return true;
        };
        self.stop.store(true, Ordering::Release);
        (self.cancel)();

        // Stopped from the observer itself: the loop sees the flag on return
        if thread.thread().id() == std::thread::current().id() {
            return true;
        }

        let mut done = self.exit.done.lock();
        if !*done {
            self.exit.cv.wait_for(&mut done, self.stop_timeout);
        }
        if *done {
            drop(done);
            let _ = thread.join();
            true
        } else {
            error!(
                "notification task for {} {:#06x} did not exit within {:?}; leaking it",
                self.key.address, self.key.characteristic, self.stop_timeout
            );
            false
        }
    }
}

impl Drop for NotificationPump {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Instant;

    fn key(characteristic: u16) -> PumpKey {
        PumpKey {
            address: BluetoothAddress::from_u64(0x0102_0304_0506),
            service: 1,
            characteristic,
        }
    }

    fn fast_config() -> BusConfig {
        BusConfig {
            notify_retry_ms: 5,
            notify_stop_timeout_ms: 500,
            ..Default::default()
        }
    }

    /// Read closure fed from a channel; cancel wakes it with CANCELLED
    fn channel_reader() -> (mpsc::Sender<Result<Vec<u8>, NtStatus>>, ReadFn, CancelFn) {
        let (tx, rx) = mpsc::channel::<Result<Vec<u8>, NtStatus>>();
        let cancel_tx = Mutex::new(tx.clone());
        let read: ReadFn = Box::new(move || {
            rx.recv_timeout(Duration::from_millis(20))
                .unwrap_or(Err(NtStatus::IO_TIMEOUT))
        });
        let cancel: CancelFn = Arc::new(move || {
            let _ = cancel_tx.lock().send(Err(NtStatus::CANCELLED));
        });
        (tx, read, cancel)
    }

    #[test]
    fn test_delivers_in_order_with_increasing_timestamps() {
        let (tx, read, cancel) = channel_reader();
        let (seen_tx, seen_rx) = mpsc::channel();
        let pump = NotificationPump::start(key(0x10), &fast_config(), read, cancel, move |v| {
            let _ = seen_tx.send(v);
        })
        .unwrap();

        tx.send(Ok(vec![0x01])).unwrap();
        tx.send(Ok(Vec::new())).unwrap();
        tx.send(Err(NtStatus::DEVICE_BUSY)).unwrap();
        tx.send(Ok(vec![0x02])).unwrap();
        tx.send(Ok(vec![0x03])).unwrap();

        let values: Vec<NotificationValue> = (0..3)
            .map(|_| seen_rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(
            values.iter().map(|v| v.value.clone()).collect::<Vec<_>>(),
            vec![vec![0x01], vec![0x02], vec![0x03]]
        );
        assert!(values.windows(2).all(|w| w[0].timestamp < w[1].timestamp));

        let started = Instant::now();
        assert!(pump.stop());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!is_pumping(&key(0x10)));
    }

    #[test]
    fn test_second_pump_is_busy() {
        let (_tx, read, cancel) = channel_reader();
        let pump = NotificationPump::start(key(0x20), &fast_config(), read, cancel, |_| {}).unwrap();
        let (_tx2, read2, cancel2) = channel_reader();
        let err = NotificationPump::start(key(0x20), &fast_config(), read2, cancel2, |_| {});
        assert!(matches!(err, Err(BusError::Busy(_))));
        assert!(pump.stop());

        let (_tx3, read3, cancel3) = channel_reader();
        let again = NotificationPump::start(key(0x20), &fast_config(), read3, cancel3, |_| {});
        assert!(again.is_ok());
    }

    #[test]
    fn test_fatal_status_ends_task() {
        let (tx, read, cancel) = channel_reader();
        let pump = NotificationPump::start(key(0x30), &fast_config(), read, cancel, |_| {}).unwrap();
        tx.send(Err(NtStatus::DEVICE_REMOVED)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while pump.is_running() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!pump.is_running());
        assert!(pump.stop());
    }

    #[test]
    fn test_stuck_task_is_leaked_after_timeout() {
        let config = BusConfig {
            notify_stop_timeout_ms: 50,
            ..fast_config()
        };
        let release = Arc::new(AtomicBool::new(false));
        let read_release = Arc::clone(&release);
        let (entered_tx, entered_rx) = mpsc::channel();
        let read: ReadFn = Box::new(move || {
            let _ = entered_tx.send(());
            while !read_release.load(Ordering::Acquire) {
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(NtStatus::CANCELLED)
        });
        // Cancel does nothing: the read ignores it
        let pump = NotificationPump::start(key(0x40), &config, read, Arc::new(|| {}), |_| {}).unwrap();
        entered_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let started = Instant::now();
        assert!(!pump.stop());
        assert!(started.elapsed() >= Duration::from_millis(50));
        release.store(true, Ordering::Release);
    }
}
