//! Byte buffers and readers (Windows.Storage.Streams, CryptographicBuffer)

pub mod buffer;
pub mod crypto;
pub mod data_reader;

pub use buffer::Buffer;
pub use crypto::CryptographicBuffer;
pub use data_reader::{ByteOrder, DataReader, UnicodeEncoding};
