//! IOCTL protocol between user-mode callers and the bthle bus
//!
//! - `codes`: control codes and the GATT operation table
//! - `wire`: packed request/reply records
//! - `sizing`: call-twice sizing and in-place reply writers (bus side)
//! - `client`: typed requests with the retry loop (caller side)
//! - `status`: NTSTATUS / Win32 / HRESULT taxonomy

pub mod client;
pub mod codes;
pub mod error;
pub mod sizing;
pub mod status;
pub mod transport;
pub mod wire;

pub use codes::GattOp;
pub use error::IoctlError;
pub use status::{HResult, IoStatus, NtStatus, Win32Error};
pub use transport::DeviceIoControl;
pub use wire::{GattCharacteristicRecord, GattServiceRecord, Route};
