//! Backend error types

use thiserror::Error;

/// Errors reported by the host BLE backend.
///
/// Every variant is preserved verbatim through the IOCTL layer, where it maps
/// onto exactly one NTSTATUS value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnixError {
    /// Backend not initialised, or the command is refused by the host stack
    #[error("Operation not supported by the backend")]
    NotSupported,

    #[error("Backend object not found: {0}")]
    NotFound(String),

    #[error("Device not connected")]
    DeviceNotConnected,

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Backend busy")]
    Busy,

    #[error("Operation timed out")]
    Timeout,

    #[error("Operation cancelled")]
    Cancelled,

    /// `get_event` observed a backend shutdown
    #[error("Backend shut down")]
    Shutdown,

    #[error("Out of memory")]
    NoMemory,

    #[error("Backend failure: {0}")]
    Failed(String),
}

impl UnixError {
    /// Errors after which a blocking reader may simply retry
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Busy)
    }
}
