//! Call-twice sizing and in-place reply writers
//!
//! A handler receives one system buffer holding the input and writes its
//! reply over it. Variable-length replies follow the same rule everywhere:
//!
//! - output shorter than the header: `INVALID_USER_BUFFER`
//! - header fits but the payload does not: write the required count into
//!   the header and return `MORE_ENTRIES` with only the header transferred
//! - otherwise write header and payload and return `SUCCESS`

use zerocopy::{Immutable, IntoBytes};

use crate::status::{IoStatus, NtStatus};

/// `offset_of(header, array[0]) + size_of(element) * count`, overflow-checked
pub fn required_size(header_len: usize, elem_len: usize, count: usize) -> Option<usize> {
    elem_len.checked_mul(count)?.checked_add(header_len)
}

fn put_u32(buf: &mut [u8], offset: usize, value: u32) -> bool {
    match buf.get_mut(offset..offset + 4) {
        Some(dst) => {
            dst.copy_from_slice(&value.to_ne_bytes());
            true
        }
        None => false,
    }
}

/// Read a host-endian u32 field of a reply header
pub fn get_u32(buf: &[u8], offset: usize) -> Option<u32> {
    let src = buf.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_ne_bytes([src[0], src[1], src[2], src[3]]))
}

/// Write a counted list reply.
///
/// `buf` is the system buffer, `out_len` the caller's output length,
/// `count_offset` the position of the header's count field.
pub fn reply_list<T: IntoBytes + Immutable>(
    buf: &mut [u8],
    out_len: usize,
    header_len: usize,
    count_offset: usize,
    items: &[T],
) -> IoStatus {
    if out_len < header_len || buf.len() < out_len {
        return IoStatus::status(NtStatus::INVALID_USER_BUFFER);
    }
    let Ok(count) = u32::try_from(items.len()) else {
        return IoStatus::status(NtStatus::INVALID_PARAMETER);
    };
    if !put_u32(buf, count_offset, count) {
        return IoStatus::status(NtStatus::INVALID_USER_BUFFER);
    }
    let elem_len = std::mem::size_of::<T>();
    let Some(required) = required_size(header_len, elem_len, items.len()) else {
        return IoStatus::status(NtStatus::INVALID_PARAMETER);
    };
    if required > out_len {
        return IoStatus::new(NtStatus::MORE_ENTRIES, header_len);
    }
    for (i, item) in items.iter().enumerate() {
        let at = header_len + i * elem_len;
        buf[at..at + elem_len].copy_from_slice(item.as_bytes());
    }
    IoStatus::success(required)
}

/// Write a sized byte-blob reply (`data_size` + `data[]`).
pub fn reply_value(
    buf: &mut [u8],
    out_len: usize,
    header_len: usize,
    size_offset: usize,
    value: &[u8],
) -> IoStatus {
    reply_list(buf, out_len, header_len, size_offset, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_size_overflow() {
        assert_eq!(required_size(4, 24, 2), Some(52));
        assert_eq!(required_size(4, 24, 0), Some(4));
        assert_eq!(required_size(4, usize::MAX, 2), None);
        assert_eq!(required_size(usize::MAX, 1, 1), None);
    }

    #[test]
    fn test_header_only_buffer() {
        let mut buf = vec![0u8; 4];
        let st = reply_list::<u16>(&mut buf, 4, 4, 0, &[]);
        assert_eq!(st, IoStatus::success(4));

        let st = reply_list(&mut buf, 4, 4, 0, &[7u16, 8]);
        assert_eq!(st, IoStatus::new(NtStatus::MORE_ENTRIES, 4));
        assert_eq!(get_u32(&buf, 0), Some(2));
    }

    #[test]
    fn test_short_buffer_is_invalid() {
        let mut buf = vec![0u8; 3];
        let st = reply_list(&mut buf, 3, 4, 0, &[1u16]);
        assert_eq!(st.status, NtStatus::INVALID_USER_BUFFER);
    }

    #[test]
    fn test_full_reply() {
        let mut buf = vec![0u8; 8];
        let st = reply_value(&mut buf, 8, 4, 0, &[0x06, 0x48]);
        assert_eq!(st, IoStatus::success(6));
        assert_eq!(get_u32(&buf, 0), Some(2));
        assert_eq!(&buf[4..6], &[0x06, 0x48]);
    }
}
