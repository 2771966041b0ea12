//! `Windows.Storage.Streams.Buffer`
//!
//! A fixed-capacity byte array with a separate valid-length mark. The
//! `IBufferByteAccess` personality hands internal code the whole backing
//! array without copying.

use parking_lot::Mutex;

use crate::error::WinrtError;
use crate::foundation::{ComPtr, Inspectable, InterfaceId};

struct Storage {
    bytes: Box<[u8]>,
    length: u32,
}

pub struct Buffer {
    storage: Mutex<Storage>,
}

impl Inspectable for Buffer {
    fn runtime_class_name(&self) -> &'static str {
        "Windows.Storage.Streams.Buffer"
    }

    fn interfaces(&self) -> &'static [InterfaceId] {
        &[InterfaceId::Buffer, InterfaceId::BufferByteAccess]
    }
}

impl Buffer {
    /// `Buffer(capacity)`, initially empty
    pub fn new(capacity: u32) -> ComPtr<Self> {
        ComPtr::new(Self {
            storage: Mutex::new(Storage {
                bytes: vec![0u8; capacity as usize].into_boxed_slice(),
                length: 0,
            }),
        })
    }

    /// Buffer whose capacity and length are both `data.len()`
    pub fn from_bytes(data: &[u8]) -> ComPtr<Self> {
        ComPtr::new(Self {
            storage: Mutex::new(Storage {
                bytes: data.into(),
                length: data.len() as u32,
            }),
        })
    }

    pub fn capacity(&self) -> u32 {
        self.storage.lock().bytes.len() as u32
    }

    pub fn length(&self) -> u32 {
        self.storage.lock().length
    }

    /// `put_Length`; cannot grow past capacity
    pub fn set_length(&self, length: u32) -> Result<(), WinrtError> {
        let mut storage = self.storage.lock();
        if length as usize > storage.bytes.len() {
            return Err(WinrtError::invalid_arg());
        }
        storage.length = length;
        Ok(())
    }

    /// Copy of the valid bytes
    pub fn to_vec(&self) -> Vec<u8> {
        let storage = self.storage.lock();
        storage.bytes[..storage.length as usize].to_vec()
    }

    /// `IBufferByteAccess::Buffer`: run `f` over the full backing array
    pub fn with_bytes<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        f(&mut self.storage.lock().bytes)
    }

    /// Run `f` over the valid bytes only
    pub fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let storage = self.storage.lock();
        f(&storage.bytes[..storage.length as usize])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_cannot_exceed_capacity() {
        let buf = Buffer::new(4);
        assert_eq!(buf.capacity(), 4);
        assert_eq!(buf.length(), 0);
        assert_eq!(buf.set_length(5), Err(WinrtError::invalid_arg()));
        buf.set_length(4).unwrap();
        assert_eq!(buf.to_vec(), vec![0; 4]);
    }

    #[test]
    fn byte_access_writes_through() {
        let buf = Buffer::new(3);
        buf.with_bytes(|b| b.copy_from_slice(&[7, 8, 9]));
        buf.set_length(2).unwrap();
        assert_eq!(buf.to_vec(), vec![7, 8]);

        let access = buf.query(InterfaceId::BufferByteAccess).unwrap();
        assert!(access.ptr_eq(&buf));
        assert_eq!(access.with_bytes(|b| b.len()), 3);
    }

    #[test]
    fn from_bytes_is_full() {
        let buf = Buffer::from_bytes(&[1, 2]);
        assert_eq!(buf.capacity(), 2);
        assert_eq!(buf.length(), 2);
        assert_eq!(buf.with_data(|d| d.to_vec()), vec![1, 2]);
    }
}
