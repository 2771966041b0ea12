//! Background poll tasks owned by facade objects

use std::ops::ControlFlow;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::error::WinrtError;

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    cv: Condvar,
}

impl StopSignal {
    /// Sleep for `interval`; returns true if stopped meanwhile
    fn wait(&self, interval: Duration) -> bool {
        let mut stopped = self.stopped.lock();
        if !*stopped {
            self.cv.wait_for(&mut stopped, interval);
        }
        *stopped
    }

    fn raise(&self) {
        *self.stopped.lock() = true;
        self.cv.notify_all();
    }
}

/// A named thread calling `tick` every `interval` until stopped
pub struct PollTask {
    signal: Arc<StopSignal>,
    thread: Option<JoinHandle<()>>,
}

impl PollTask {
    pub fn spawn<F>(name: &str, interval: Duration, mut tick: F) -> Result<Self, WinrtError>
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        let signal = Arc::new(StopSignal::default());
        let task_signal = Arc::clone(&signal);
        let task_name = name.to_string();
        let thread = thread::Builder::new().name(task_name.clone()).spawn(move || {
            debug!("{task_name} started");
            loop {
                if tick().is_break() || task_signal.wait(interval) {
                    break;
                }
            }
            debug!("{task_name} exiting");
        })?;
        Ok(Self {
            signal,
            thread: Some(thread),
        })
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Signal the task and join it, unless called from the task itself
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.signal.raise();
        let Some(thread) = self.thread.take() else {
            return;
        };
        if thread.thread().id() == thread::current().id() {
            // Stopped from inside a tick; the loop exits on its own
            return;
        }
        if thread.join().is_err() {
            warn!("poll task panicked");
        }
    }
}

impl Drop for PollTask {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    #[test]
    fn ticks_until_stopped() {
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&ticks);
        let task = PollTask::spawn("test-poll", Duration::from_millis(5), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            ControlFlow::Continue(())
        })
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while ticks.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(ticks.load(Ordering::SeqCst) >= 3);

        let started = Instant::now();
        task.stop();
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn stop_interrupts_a_long_sleep() {
        let task = PollTask::spawn("test-sleepy", Duration::from_secs(60), || ControlFlow::Continue(()))
            .unwrap();
        let started = Instant::now();
        task.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn break_ends_the_task() {
        let task = PollTask::spawn("test-once", Duration::from_secs(60), || ControlFlow::Break(()))
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while !task.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(task.is_finished());
    }
}
