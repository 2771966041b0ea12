//! `Windows.Storage.Streams.DataReader` over an in-memory buffer

use parking_lot::Mutex;

use super::buffer::Buffer;
use crate::error::WinrtError;
use crate::foundation::{ComPtr, Inspectable, InterfaceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    LittleEndian,
    BigEndian,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnicodeEncoding {
    #[default]
    Utf8,
    Utf16LE,
    Utf16BE,
}

struct Cursor {
    data: Vec<u8>,
    pos: usize,
    byte_order: ByteOrder,
    encoding: UnicodeEncoding,
}

impl Cursor {
    fn take(&mut self, n: usize) -> Result<&[u8], WinrtError> {
        let end = self.pos.checked_add(n).ok_or_else(WinrtError::bounds)?;
        let bytes = self.data.get(self.pos..end).ok_or_else(WinrtError::bounds)?;
        self.pos = end;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], WinrtError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        if self.byte_order == ByteOrder::BigEndian {
            out.reverse();
        }
        Ok(out)
    }
}

pub struct DataReader {
    cursor: Mutex<Cursor>,
}

impl Inspectable for DataReader {
    fn runtime_class_name(&self) -> &'static str {
        "Windows.Storage.Streams.DataReader"
    }

    fn interfaces(&self) -> &'static [InterfaceId] {
        &[InterfaceId::DataReader, InterfaceId::Closable]
    }
}

impl DataReader {
    /// `DataReader.FromBuffer`: snapshot of the buffer's valid bytes
    pub fn from_buffer(buffer: &Buffer) -> ComPtr<Self> {
        ComPtr::new(Self {
            cursor: Mutex::new(Cursor {
                data: buffer.to_vec(),
                pos: 0,
                byte_order: ByteOrder::default(),
                encoding: UnicodeEncoding::default(),
            }),
        })
    }

    pub fn unconsumed_buffer_length(&self) -> u32 {
        let cursor = self.cursor.lock();
        (cursor.data.len() - cursor.pos) as u32
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.cursor.lock().byte_order
    }

    pub fn set_byte_order(&self, order: ByteOrder) {
        self.cursor.lock().byte_order = order;
    }

    pub fn unicode_encoding(&self) -> UnicodeEncoding {
        self.cursor.lock().encoding
    }

    pub fn set_unicode_encoding(&self, encoding: UnicodeEncoding) {
        self.cursor.lock().encoding = encoding;
    }

    pub fn read_byte(&self) -> Result<u8, WinrtError> {
        Ok(self.cursor.lock().take(1)?[0])
    }

    /// Fill `out` completely, or fail without consuming anything
    pub fn read_bytes(&self, out: &mut [u8]) -> Result<(), WinrtError> {
        out.copy_from_slice(self.cursor.lock().take(out.len())?);
        Ok(())
    }

    pub fn read_boolean(&self) -> Result<bool, WinrtError> {
        Ok(self.read_byte()? != 0)
    }

    pub fn read_u16(&self) -> Result<u16, WinrtError> {
        self.cursor.lock().take_array().map(u16::from_le_bytes)
    }

    pub fn read_u32(&self) -> Result<u32, WinrtError> {
        self.cursor.lock().take_array().map(u32::from_le_bytes)
    }

    pub fn read_u64(&self) -> Result<u64, WinrtError> {
        self.cursor.lock().take_array().map(u64::from_le_bytes)
    }

    pub fn read_i16(&self) -> Result<i16, WinrtError> {
        self.cursor.lock().take_array().map(i16::from_le_bytes)
    }

    pub fn read_i32(&self) -> Result<i32, WinrtError> {
        self.cursor.lock().take_array().map(i32::from_le_bytes)
    }

    /// Read `code_units` units in the current encoding (bytes for UTF-8,
    /// 16-bit units for UTF-16)
    pub fn read_string(&self, code_units: u32) -> Result<String, WinrtError> {
        let mut cursor = self.cursor.lock();
        let encoding = cursor.encoding;
        match encoding {
            UnicodeEncoding::Utf8 => {
                let bytes = cursor.take(code_units as usize)?;
                String::from_utf8(bytes.to_vec()).map_err(|_| WinrtError::invalid_arg())
            }
            UnicodeEncoding::Utf16LE | UnicodeEncoding::Utf16BE => {
                let len = (code_units as usize).checked_mul(2).ok_or_else(WinrtError::bounds)?;
                let bytes = cursor.take(len)?;
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|c| match encoding {
                        UnicodeEncoding::Utf16BE => u16::from_be_bytes([c[0], c[1]]),
                        _ => u16::from_le_bytes([c[0], c[1]]),
                    })
                    .collect();
                String::from_utf16(&units).map_err(|_| WinrtError::invalid_arg())
            }
        }
    }

    /// Remaining bytes as a new buffer of exactly `length` bytes
    pub fn read_buffer(&self, length: u32) -> Result<ComPtr<Buffer>, WinrtError> {
        let mut cursor = self.cursor.lock();
        Ok(Buffer::from_bytes(cursor.take(length as usize)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heart_rate_measurement_parses() {
        // flags=0 (u8 rate), 72 bpm
        let reader = DataReader::from_buffer(&Buffer::from_bytes(&[0x00, 0x48]));
        assert_eq!(reader.unconsumed_buffer_length(), 2);
        assert_eq!(reader.read_byte(), Ok(0));
        assert_eq!(reader.read_byte(), Ok(72));
        assert_eq!(reader.unconsumed_buffer_length(), 0);
        assert_eq!(reader.read_byte(), Err(WinrtError::bounds()));
    }

    #[test]
    fn byte_order_applies_to_integers() {
        let buf = Buffer::from_bytes(&[0x12, 0x34, 0x12, 0x34, 0x01, 0x00, 0x00, 0x00]);
        let reader = DataReader::from_buffer(&buf);
        assert_eq!(reader.read_u16(), Ok(0x3412));
        reader.set_byte_order(ByteOrder::BigEndian);
        assert_eq!(reader.read_u16(), Ok(0x1234));
        reader.set_byte_order(ByteOrder::LittleEndian);
        assert_eq!(reader.read_u32(), Ok(1));
    }

    #[test]
    fn short_read_consumes_nothing() {
        let reader = DataReader::from_buffer(&Buffer::from_bytes(&[1, 2, 3]));
        assert_eq!(reader.read_u32(), Err(WinrtError::bounds()));
        assert_eq!(reader.unconsumed_buffer_length(), 3);
        let mut out = [0u8; 3];
        reader.read_bytes(&mut out).unwrap();
        assert_eq!(out, [1, 2, 3]);
    }

    #[test]
    fn strings_in_both_encodings() {
        let reader = DataReader::from_buffer(&Buffer::from_bytes(b"HRM\x48\x00\x69\x00"));
        assert_eq!(reader.read_string(3).unwrap(), "HRM");
        reader.set_unicode_encoding(UnicodeEncoding::Utf16LE);
        assert_eq!(reader.read_string(2).unwrap(), "Hi");
    }

    #[test]
    fn signed_and_wide_reads() {
        let reader = DataReader::from_buffer(&Buffer::from_bytes(&[
            0xFE, 0xFF, 0x01, 0, 0, 0, 0, 0, 0, 0x80, 0x01,
        ]));
        assert_eq!(reader.read_i16(), Ok(-2));
        assert_eq!(reader.read_u64(), Ok(0x8000_0000_0000_0001));
        assert_eq!(reader.read_boolean(), Ok(true));
    }
}
