//! `Windows.Security.Cryptography.CryptographicBuffer` statics

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::buffer::Buffer;
use crate::error::WinrtError;
use crate::foundation::ComPtr;

pub struct CryptographicBuffer;

impl CryptographicBuffer {
    pub fn create_from_byte_array(bytes: &[u8]) -> ComPtr<Buffer> {
        Buffer::from_bytes(bytes)
    }

    pub fn copy_to_byte_array(buffer: &Buffer) -> Vec<u8> {
        buffer.to_vec()
    }

    /// Lowercase hex, two digits per byte
    pub fn encode_to_hex_string(buffer: &Buffer) -> String {
        buffer.with_data(|data| hex::encode(data))
    }

    pub fn decode_from_hex_string(value: &str) -> Result<ComPtr<Buffer>, WinrtError> {
        let bytes = hex::decode(value).map_err(|_| WinrtError::invalid_arg())?;
        Ok(Buffer::from_bytes(&bytes))
    }

    pub fn encode_to_base64_string(buffer: &Buffer) -> String {
        buffer.with_data(|data| STANDARD.encode(data))
    }

    pub fn decode_from_base64_string(value: &str) -> Result<ComPtr<Buffer>, WinrtError> {
        let bytes = STANDARD.decode(value).map_err(|_| WinrtError::invalid_arg())?;
        Ok(Buffer::from_bytes(&bytes))
    }

    /// Byte-for-byte equality of the valid regions
    pub fn compare(a: &Buffer, b: &Buffer) -> bool {
        a.to_vec() == b.to_vec()
    }
}
