//! Facade error type
//!
//! Every failure the WinRT surface reports is an `HRESULT`. Lower layers
//! speak NTSTATUS; the conversions below go through the Win32 code so that
//! callers see `HRESULT_FROM_WIN32(...)` values, as they would on Windows.

use bthle_bus::BusError;
use bthle_ioctl::{HResult, IoctlError, NtStatus, Win32Error};
use bthle_unix::UnixError;
use thiserror::Error;

/// A delegate was assigned to a slot that only accepts one
pub const E_ILLEGAL_DELEGATE_ASSIGNMENT: HResult = HResult(0x8000_0018_u32 as i32);

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("HRESULT {code}")]
pub struct WinrtError {
    code: HResult,
}

impl WinrtError {
    pub const fn new(code: HResult) -> Self {
        Self { code }
    }

    pub const fn code(&self) -> HResult {
        self.code
    }

    pub const fn bounds() -> Self {
        Self::new(HResult::E_BOUNDS)
    }

    pub const fn invalid_arg() -> Self {
        Self::new(HResult::E_INVALIDARG)
    }

    pub const fn illegal_method_call() -> Self {
        Self::new(HResult::E_ILLEGAL_METHOD_CALL)
    }

    pub const fn closed() -> Self {
        Self::new(HResult::RO_E_CLOSED)
    }

    /// Win32 code for errors built from one, `None` for pure COM codes.
    pub fn win32(&self) -> Option<Win32Error> {
        let raw = self.code.0 as u32;
        (raw & 0xFFFF_0000 == 0x8007_0000).then(|| Win32Error(raw & 0xFFFF))
    }
}

impl From<HResult> for WinrtError {
    fn from(code: HResult) -> Self {
        Self::new(code)
    }
}

impl From<Win32Error> for WinrtError {
    fn from(err: Win32Error) -> Self {
        Self::new(HResult::from_win32(err))
    }
}

impl From<NtStatus> for WinrtError {
    fn from(status: NtStatus) -> Self {
        Self::new(status.to_hresult())
    }
}

impl From<IoctlError> for WinrtError {
    fn from(err: IoctlError) -> Self {
        err.status().into()
    }
}

impl From<BusError> for WinrtError {
    fn from(err: BusError) -> Self {
        err.status().into()
    }
}

impl From<UnixError> for WinrtError {
    fn from(err: UnixError) -> Self {
        NtStatus::from(&err).into()
    }
}

impl From<std::io::Error> for WinrtError {
    /// Worker thread spawn failures
    fn from(_: std::io::Error) -> Self {
        Self::new(HResult::E_OUTOFMEMORY)
    }
}
