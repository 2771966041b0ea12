//! IOCTL layer error types

use thiserror::Error;

use crate::status::NtStatus;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IoctlError {
    /// The request completed with a failure status
    #[error("IOCTL failed: {0}")]
    Status(NtStatus),

    #[error("{record} record truncated: expected {expected} bytes, got {got}")]
    Truncated {
        record: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Invalid {field} value {value}")]
    InvalidValue { field: &'static str, value: u32 },

    /// `header + element * count` does not fit in `usize`
    #[error("Reply size overflow for {count} entries")]
    SizeOverflow { count: usize },

    /// The list kept growing between the size probe and the fetch
    #[error("List size did not settle after {attempts} attempts")]
    Unsettled { attempts: usize },
}

impl IoctlError {
    /// Status reported to the caller of the request
    pub fn status(&self) -> NtStatus {
        match self {
            Self::Status(status) => *status,
            Self::Truncated { .. } | Self::InvalidValue { .. } => NtStatus::INVALID_PARAMETER,
            Self::SizeOverflow { .. } => NtStatus::INVALID_USER_BUFFER,
            Self::Unsettled { .. } => NtStatus::MORE_ENTRIES,
        }
    }
}

impl From<NtStatus> for IoctlError {
    fn from(status: NtStatus) -> Self {
        Self::Status(status)
    }
}
