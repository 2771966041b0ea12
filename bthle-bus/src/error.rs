//! Bus error types

use bthle_ioctl::{IoctlError, NtStatus};
use bthle_unix::UnixError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Lookup failed, or the node is being removed
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A notification task already runs for this characteristic
    #[error("Busy: {0}")]
    Busy(String),

    #[error("Illegal lifecycle transition {from:?} -> {to:?}")]
    Lifecycle {
        from: crate::graph::Lifecycle,
        to: crate::graph::Lifecycle,
    },

    #[error("Backend error: {0}")]
    Backend(#[from] UnixError),

    #[error("IOCTL error: {0}")]
    Ioctl(#[from] IoctlError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Out of resources: {0}")]
    NoMemory(String),
}

impl BusError {
    pub fn status(&self) -> NtStatus {
        match self {
            Self::NotFound(_) | Self::Lifecycle { .. } => NtStatus::NOT_FOUND,
            Self::InvalidParameter(_) | Self::Config(_) => NtStatus::INVALID_PARAMETER,
            Self::Busy(_) => NtStatus::DEVICE_BUSY,
            Self::Backend(e) => NtStatus::from(e),
            Self::Ioctl(e) => e.status(),
            Self::NoMemory(_) => NtStatus::NO_MEMORY,
        }
    }
}

impl From<std::io::Error> for BusError {
    /// Thread spawn failures surface as out-of-resources
    fn from(e: std::io::Error) -> Self {
        Self::NoMemory(e.to_string())
    }
}
