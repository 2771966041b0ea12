//! Device-file transport seam
//!
//! User-mode code never touches the bus directly: it opens a device
//! interface and sends control requests through this trait, exactly like
//! `DeviceIoControl` on a file handle.

use tracing::trace;

use crate::codes::ioctl_name;
use crate::error::IoctlError;
use crate::status::{IoStatus, NtStatus};

pub trait DeviceIoControl: Send + Sync {
    /// Issue one METHOD_BUFFERED control request. Blocks until the request
    /// completes; `output[..information]` holds the reply.
    fn device_io_control(&self, code: u32, input: &[u8], output: &mut [u8]) -> IoStatus;
}

impl<T: DeviceIoControl + ?Sized> DeviceIoControl for std::sync::Arc<T> {
    fn device_io_control(&self, code: u32, input: &[u8], output: &mut [u8]) -> IoStatus {
        (**self).device_io_control(code, input, output)
    }
}

/// Send a request expecting a fixed-size reply of `out_len` bytes.
pub fn ioctl<D: DeviceIoControl + ?Sized>(
    dev: &D,
    code: u32,
    input: &[u8],
    out_len: usize,
) -> Result<Vec<u8>, IoctlError> {
    let mut output = vec![0u8; out_len];
    let st = dev.device_io_control(code, input, &mut output);
    trace!("{} -> {:?} ({} bytes)", ioctl_name(code), st.status, st.information);
    if st.status != NtStatus::SUCCESS {
        return Err(IoctlError::Status(st.status));
    }
    output.truncate(st.information.min(out_len));
    Ok(output)
}
