//! NTSTATUS, Win32 error and HRESULT values
//!
//! Every error kind crossing the IOCTL boundary is an [`NtStatus`]. The
//! Win32 functional API converts it to a Win32 error code and the WinRT
//! facade to an [`HResult`] via `HRESULT_FROM_WIN32`.

use std::fmt;

use bthle_unix::UnixError;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NtStatus(pub u32);

impl NtStatus {
    pub const SUCCESS: Self = Self(0x0000_0000);
    pub const PENDING: Self = Self(0x0000_0103);
    pub const MORE_ENTRIES: Self = Self(0x0000_0105);
    pub const DEVICE_BUSY: Self = Self(0x8000_0011);
    pub const UNSUCCESSFUL: Self = Self(0xC000_0001);
    pub const INVALID_PARAMETER: Self = Self(0xC000_000D);
    pub const INVALID_DEVICE_REQUEST: Self = Self(0xC000_0010);
    pub const NO_MEMORY: Self = Self(0xC000_0017);
    pub const ACCESS_DENIED: Self = Self(0xC000_0022);
    pub const BUFFER_TOO_SMALL: Self = Self(0xC000_0023);
    pub const DELETE_PENDING: Self = Self(0xC000_0056);
    pub const DEVICE_NOT_CONNECTED: Self = Self(0xC000_009D);
    pub const IO_TIMEOUT: Self = Self(0xC000_00B5);
    pub const NOT_SUPPORTED: Self = Self(0xC000_00BB);
    pub const INVALID_USER_BUFFER: Self = Self(0xC000_00E8);
    pub const CANCELLED: Self = Self(0xC000_0120);
    pub const NOT_FOUND: Self = Self(0xC000_0225);
    pub const DEVICE_REMOVED: Self = Self(0xC000_02B6);

    /// NT_SUCCESS: success and informational severities
    pub const fn is_success(&self) -> bool {
        (self.0 as i32) >= 0
    }

    pub const fn is_error(&self) -> bool {
        self.0 >> 30 == 3
    }

    pub fn name(&self) -> Option<&'static str> {
        Some(match *self {
            Self::SUCCESS => "STATUS_SUCCESS",
            Self::PENDING => "STATUS_PENDING",
            Self::MORE_ENTRIES => "STATUS_MORE_ENTRIES",
            Self::DEVICE_BUSY => "STATUS_DEVICE_BUSY",
            Self::UNSUCCESSFUL => "STATUS_UNSUCCESSFUL",
            Self::INVALID_PARAMETER => "STATUS_INVALID_PARAMETER",
            Self::INVALID_DEVICE_REQUEST => "STATUS_INVALID_DEVICE_REQUEST",
            Self::NO_MEMORY => "STATUS_NO_MEMORY",
            Self::ACCESS_DENIED => "STATUS_ACCESS_DENIED",
            Self::BUFFER_TOO_SMALL => "STATUS_BUFFER_TOO_SMALL",
            Self::DELETE_PENDING => "STATUS_DELETE_PENDING",
            Self::DEVICE_NOT_CONNECTED => "STATUS_DEVICE_NOT_CONNECTED",
            Self::IO_TIMEOUT => "STATUS_IO_TIMEOUT",
            Self::NOT_SUPPORTED => "STATUS_NOT_SUPPORTED",
            Self::INVALID_USER_BUFFER => "STATUS_INVALID_USER_BUFFER",
            Self::CANCELLED => "STATUS_CANCELLED",
            Self::NOT_FOUND => "STATUS_NOT_FOUND",
            Self::DEVICE_REMOVED => "STATUS_DEVICE_REMOVED",
            _ => return None,
        })
    }

    /// Win32 error code as reported by `GetLastError` after `DeviceIoControl`
    pub fn to_win32(&self) -> Win32Error {
        match *self {
            Self::SUCCESS => Win32Error::SUCCESS,
            Self::PENDING => Win32Error::IO_PENDING,
            Self::MORE_ENTRIES => Win32Error::MORE_DATA,
            Self::DEVICE_BUSY => Win32Error::BUSY,
            Self::INVALID_PARAMETER => Win32Error::INVALID_PARAMETER,
            Self::INVALID_DEVICE_REQUEST => Win32Error::INVALID_FUNCTION,
            Self::NO_MEMORY => Win32Error::NOT_ENOUGH_MEMORY,
            Self::ACCESS_DENIED => Win32Error::ACCESS_DENIED,
            Self::BUFFER_TOO_SMALL => Win32Error::INSUFFICIENT_BUFFER,
            Self::DELETE_PENDING => Win32Error::DELETE_PENDING,
            Self::DEVICE_NOT_CONNECTED => Win32Error::DEVICE_NOT_CONNECTED,
            Self::IO_TIMEOUT => Win32Error::TIMEOUT,
            Self::NOT_SUPPORTED => Win32Error::NOT_SUPPORTED,
            Self::INVALID_USER_BUFFER => Win32Error::INVALID_USER_BUFFER,
            Self::CANCELLED => Win32Error::OPERATION_ABORTED,
            Self::NOT_FOUND => Win32Error::NOT_FOUND,
            Self::DEVICE_REMOVED => Win32Error::DEVICE_REMOVED,
            _ => Win32Error::GEN_FAILURE,
        }
    }

    pub fn to_hresult(&self) -> HResult {
        HResult::from_win32(self.to_win32())
    }
}

impl fmt::Debug for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "NtStatus({:#010x})", self.0),
        }
    }
}

impl fmt::Display for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} ({:#010x})", self.0),
            None => write!(f, "{:#010x}", self.0),
        }
    }
}

impl From<&UnixError> for NtStatus {
    fn from(err: &UnixError) -> Self {
        match err {
            UnixError::NotSupported => Self::NOT_SUPPORTED,
            UnixError::NotFound(_) => Self::NOT_FOUND,
            UnixError::DeviceNotConnected => Self::DEVICE_NOT_CONNECTED,
            UnixError::InvalidParameter(_) => Self::INVALID_PARAMETER,
            UnixError::AccessDenied(_) => Self::ACCESS_DENIED,
            UnixError::Busy => Self::DEVICE_BUSY,
            UnixError::Timeout => Self::IO_TIMEOUT,
            UnixError::Cancelled => Self::CANCELLED,
            UnixError::Shutdown => Self::DEVICE_REMOVED,
            UnixError::NoMemory => Self::NO_MEMORY,
            UnixError::Failed(_) => Self::UNSUCCESSFUL,
        }
    }
}

impl From<UnixError> for NtStatus {
    fn from(err: UnixError) -> Self {
        Self::from(&err)
    }
}

/// Win32 error code (`GetLastError` value)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Win32Error(pub u32);

impl Win32Error {
    pub const SUCCESS: Self = Self(0);
    pub const INVALID_FUNCTION: Self = Self(1);
    pub const ACCESS_DENIED: Self = Self(5);
    pub const INVALID_HANDLE: Self = Self(6);
    pub const NOT_ENOUGH_MEMORY: Self = Self(8);
    pub const GEN_FAILURE: Self = Self(31);
    pub const NOT_SUPPORTED: Self = Self(50);
    pub const INVALID_PARAMETER: Self = Self(87);
    pub const INSUFFICIENT_BUFFER: Self = Self(122);
    pub const BUSY: Self = Self(170);
    pub const MORE_DATA: Self = Self(234);
    pub const NO_MORE_ITEMS: Self = Self(259);
    pub const DELETE_PENDING: Self = Self(303);
    pub const OPERATION_ABORTED: Self = Self(995);
    pub const IO_PENDING: Self = Self(997);
    pub const DEVICE_NOT_CONNECTED: Self = Self(1167);
    pub const NOT_FOUND: Self = Self(1168);
    pub const TIMEOUT: Self = Self(1460);
    pub const DEVICE_REMOVED: Self = Self(1617);
    pub const INVALID_USER_BUFFER: Self = Self(1784);
}

impl fmt::Display for Win32Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Win32 error {}", self.0)
    }
}

/// COM result code
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct HResult(pub i32);

impl HResult {
    pub const S_OK: Self = Self(0);
    pub const S_FALSE: Self = Self(1);
    pub const E_NOTIMPL: Self = Self(0x8000_4001_u32 as i32);
    pub const E_NOINTERFACE: Self = Self(0x8000_4002_u32 as i32);
    pub const E_POINTER: Self = Self(0x8000_4003_u32 as i32);
    pub const E_ABORT: Self = Self(0x8000_4004_u32 as i32);
    pub const E_FAIL: Self = Self(0x8000_4005_u32 as i32);
    pub const E_UNEXPECTED: Self = Self(0x8000_FFFF_u32 as i32);
    pub const E_BOUNDS: Self = Self(0x8000_000B_u32 as i32);
    pub const E_CHANGED_STATE: Self = Self(0x8000_000C_u32 as i32);
    pub const E_ILLEGAL_METHOD_CALL: Self = Self(0x8000_000E_u32 as i32);
    pub const E_ILLEGAL_STATE_CHANGE: Self = Self(0x8000_000D_u32 as i32);
    pub const RO_E_CLOSED: Self = Self(0x8000_0013_u32 as i32);
    pub const E_ACCESSDENIED: Self = Self(0x8007_0005_u32 as i32);
    pub const E_OUTOFMEMORY: Self = Self(0x8007_000E_u32 as i32);
    pub const E_INVALIDARG: Self = Self(0x8007_0057_u32 as i32);

    /// `HRESULT_FROM_WIN32`
    pub const fn from_win32(err: Win32Error) -> Self {
        if err.0 == 0 || (err.0 as i32) < 0 {
            Self(err.0 as i32)
        } else {
            Self(((err.0 & 0xFFFF) | 0x8007_0000) as i32)
        }
    }

    pub const fn is_ok(&self) -> bool {
        self.0 >= 0
    }

    pub const fn is_err(&self) -> bool {
        self.0 < 0
    }
}

impl fmt::Debug for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HResult({:#010x})", self.0 as u32)
    }
}

impl fmt::Display for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0 as u32)
    }
}

/// Completion record of one IOCTL: final status plus bytes written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoStatus {
    pub status: NtStatus,
    pub information: usize,
}

impl IoStatus {
    pub const fn new(status: NtStatus, information: usize) -> Self {
        Self { status, information }
    }

    pub const fn status(status: NtStatus) -> Self {
        Self::new(status, 0)
    }

    pub const fn success(information: usize) -> Self {
        Self::new(NtStatus::SUCCESS, information)
    }
}

impl From<NtStatus> for IoStatus {
    fn from(status: NtStatus) -> Self {
        Self::status(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity() {
        assert!(NtStatus::SUCCESS.is_success());
        assert!(NtStatus::MORE_ENTRIES.is_success());
        assert!(!NtStatus::MORE_ENTRIES.is_error());
        assert!(NtStatus::NOT_FOUND.is_error());
        assert!(!NtStatus::DEVICE_BUSY.is_success());
    }

    #[test]
    fn test_hresult_from_win32() {
        assert_eq!(HResult::from_win32(Win32Error::SUCCESS), HResult::S_OK);
        assert_eq!(
            HResult::from_win32(Win32Error::NOT_FOUND).0 as u32,
            0x8007_0490
        );
        assert_eq!(
            NtStatus::INVALID_PARAMETER.to_hresult(),
            HResult::E_INVALIDARG
        );
    }

    #[test]
    fn test_unix_errors_map_one_to_one() {
        let errors = [
            UnixError::NotSupported,
            UnixError::NotFound(String::new()),
            UnixError::DeviceNotConnected,
            UnixError::InvalidParameter(String::new()),
            UnixError::AccessDenied(String::new()),
            UnixError::Busy,
            UnixError::Timeout,
            UnixError::Cancelled,
            UnixError::Shutdown,
            UnixError::NoMemory,
            UnixError::Failed(String::new()),
        ];
        let mut seen: Vec<NtStatus> = errors.iter().map(NtStatus::from).collect();
        seen.sort_by_key(|s| s.0);
        seen.dedup();
        assert_eq!(seen.len(), errors.len());
        assert!(seen.iter().all(|s| s.name().is_some()));
    }

    #[test]
    fn test_display_names_known_status() {
        assert_eq!(
            NtStatus::MORE_ENTRIES.to_string(),
            "STATUS_MORE_ENTRIES (0x00000105)"
        );
        assert_eq!(format!("{:?}", NtStatus(0xC0DE_0000)), "NtStatus(0xc0de0000)");
    }
}
