//! `IAsyncOperation<T>`
//!
//! Operations are either born finished (`completed` / `failed`, the common
//! case for calls that reduce to one synchronous IOCTL) or run a closure on
//! a named worker thread (`spawn`). A completion handler installed after
//! the operation finished runs inline on the installing thread.

use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use super::object::{ComPtr, Inspectable, InterfaceId};
use crate::error::{WinrtError, E_ILLEGAL_DELEGATE_ASSIGNMENT};
use bthle_ioctl::HResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum AsyncStatus {
    Started = 0,
    Completed = 1,
    Canceled = 2,
    Error = 3,
}

pub type CompletedHandler<T> = Box<dyn FnOnce(&AsyncOperation<T>, AsyncStatus) + Send>;

static NEXT_ID: AtomicU32 = AtomicU32::new(1);

struct OpState<T> {
    status: AsyncStatus,
    result: Option<T>,
    error: Option<WinrtError>,
    handler: Option<CompletedHandler<T>>,
    handler_assigned: bool,
    closed: bool,
}

pub struct AsyncOperation<T> {
    id: u32,
    state: Mutex<OpState<T>>,
    finished: Condvar,
}

impl<T> Inspectable for AsyncOperation<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn runtime_class_name(&self) -> &'static str {
        "Windows.Foundation.IAsyncOperation`1"
    }

    fn interfaces(&self) -> &'static [InterfaceId] {
        &[InterfaceId::AsyncOperation, InterfaceId::AsyncInfo]
    }
}

impl<T> AsyncOperation<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn with_state(status: AsyncStatus, result: Option<T>, error: Option<WinrtError>) -> Self {
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(OpState {
                status,
                result,
                error,
                handler: None,
                handler_assigned: false,
                closed: false,
            }),
            finished: Condvar::new(),
        }
    }

    /// Already completed with `value`
    pub fn completed(value: T) -> ComPtr<Self> {
        ComPtr::new(Self::with_state(AsyncStatus::Completed, Some(value), None))
    }

    /// Already failed with `error`
    pub fn failed(error: WinrtError) -> ComPtr<Self> {
        ComPtr::new(Self::with_state(AsyncStatus::Error, None, Some(error)))
    }

    /// Finished operation from a synchronous result
    pub fn ready(result: Result<T, WinrtError>) -> ComPtr<Self> {
        match result {
            Ok(value) => Self::completed(value),
            Err(e) => Self::failed(e),
        }
    }

    /// Run `work` on a worker thread named `name`
    pub fn spawn<F>(name: &str, work: F) -> Result<ComPtr<Self>, WinrtError>
    where
        F: FnOnce() -> Result<T, WinrtError> + Send + 'static,
    {
        let op = ComPtr::new(Self::with_state(AsyncStatus::Started, None, None));
        let worker = op.clone();
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let result = work();
                worker.finish(result);
            })?;
        Ok(op)
    }

    fn finish(&self, result: Result<T, WinrtError>) {
        let (handler, status) = {
            let mut state = self.state.lock();
            if state.status != AsyncStatus::Started {
                debug!("async op {} finished after cancel, result dropped", self.id);
                return;
            }
            match result {
                Ok(value) => {
                    state.status = AsyncStatus::Completed;
                    state.result = Some(value);
                }
                Err(e) => {
                    state.status = AsyncStatus::Error;
                    state.error = Some(e);
                }
            }
            self.finished.notify_all();
            (state.handler.take(), state.status)
        };
        if let Some(handler) = handler {
            handler(self, status);
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn status(&self) -> AsyncStatus {
        self.state.lock().status
    }

    /// `S_OK` unless the operation failed or was canceled
    pub fn error_code(&self) -> HResult {
        let state = self.state.lock();
        match state.status {
            AsyncStatus::Error => state.error.map(|e| e.code()).unwrap_or(HResult::E_FAIL),
            AsyncStatus::Canceled => HResult::E_ABORT,
            _ => HResult::S_OK,
        }
    }

    /// `put_Completed`. Only one assignment is allowed.
    pub fn set_completed(&self, handler: CompletedHandler<T>) -> Result<(), WinrtError> {
        let status = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(WinrtError::illegal_method_call());
            }
            if state.handler_assigned {
                return Err(WinrtError::new(E_ILLEGAL_DELEGATE_ASSIGNMENT));
            }
            state.handler_assigned = true;
            if state.status == AsyncStatus::Started {
                state.handler = Some(handler);
                return Ok(());
            }
            state.status
        };
        handler(self, status);
        Ok(())
    }

    /// `GetResults`; only valid once completed
    pub fn get_results(&self) -> Result<T, WinrtError> {
        let state = self.state.lock();
        if state.closed {
            return Err(WinrtError::illegal_method_call());
        }
        match state.status {
            AsyncStatus::Completed => state.result.clone().ok_or_else(WinrtError::illegal_method_call),
            AsyncStatus::Error => Err(state.error.unwrap_or(WinrtError::new(HResult::E_FAIL))),
            AsyncStatus::Started | AsyncStatus::Canceled => Err(WinrtError::illegal_method_call()),
        }
    }

    pub fn cancel(&self) {
        let handler = {
            let mut state = self.state.lock();
            if state.status != AsyncStatus::Started {
                return;
            }
            state.status = AsyncStatus::Canceled;
            self.finished.notify_all();
            state.handler.take()
        };
        if let Some(handler) = handler {
            handler(self, AsyncStatus::Canceled);
        }
    }

    /// `IAsyncInfo::Close`; illegal while still running
    pub fn close(&self) -> Result<(), WinrtError> {
        let mut state = self.state.lock();
        if state.status == AsyncStatus::Started {
            return Err(WinrtError::new(HResult::E_ILLEGAL_STATE_CHANGE));
        }
        state.closed = true;
        state.result = None;
        Ok(())
    }

    /// Block until the operation leaves `Started`, then `GetResults`
    pub fn get(&self) -> Result<T, WinrtError> {
        {
            let mut state = self.state.lock();
            while state.status == AsyncStatus::Started {
                self.finished.wait(&mut state);
            }
            if state.status == AsyncStatus::Canceled {
                return Err(WinrtError::new(HResult::E_ABORT));
            }
        }
        self.get_results()
    }

    /// `get` with an upper bound; `None` if still running at the deadline
    pub fn wait(&self, timeout: Duration) -> Option<AsyncStatus> {
        let mut state = self.state.lock();
        if state.status == AsyncStatus::Started {
            self.finished.wait_for(&mut state, timeout);
        }
        (state.status != AsyncStatus::Started).then_some(state.status)
    }
}
