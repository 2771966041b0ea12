//! Typed request builders and reply parsers for the caller side
//!
//! List requests follow the call-twice convention: the first call probes
//! with room for the header only, a `MORE_ENTRIES` reply carries the
//! required count, and the retry uses a buffer sized for it.

use std::mem::{offset_of, size_of};

use bthle_unix::{BluetoothAddress, WriteType};
use tracing::debug;
use zerocopy::{FromBytes, IntoBytes};

use crate::codes::*;
use crate::error::IoctlError;
use crate::sizing::{get_u32, required_size};
use crate::status::NtStatus;
use crate::transport::{ioctl, DeviceIoControl};
use crate::wire::*;

/// Largest attribute value the ATT protocol allows
pub const MAX_ATTRIBUTE_LEN: usize = 512;

/// Retries after `MORE_ENTRIES` before giving up on a list that keeps growing
const MAX_ATTEMPTS: usize = 4;

/// Run a counted-list request to completion.
///
/// `header` is the routed request header, `count_offset` the position of the
/// count field inside it, `initial` the number of entries to make room for
/// on the first call.
pub fn call_list<D: DeviceIoControl + ?Sized>(
    dev: &D,
    code: u32,
    header: &[u8],
    count_offset: usize,
    elem_len: usize,
    initial: usize,
) -> Result<(Vec<u8>, Vec<u8>), IoctlError> {
    let header_len = header.len();
    let mut capacity = initial;
    for attempt in 0..MAX_ATTEMPTS {
        let size = required_size(header_len, elem_len, capacity)
            .ok_or(IoctlError::SizeOverflow { count: capacity })?;
        let mut out = vec![0u8; size];
        let st = dev.device_io_control(code, header, &mut out);
        let count = get_u32(&out, count_offset).ok_or(IoctlError::Truncated {
            record: "list header",
            expected: count_offset + 4,
            got: out.len(),
        })? as usize;
        match st.status {
            NtStatus::MORE_ENTRIES => {
                debug!(
                    "{}: {} entries, retrying (attempt {})",
                    ioctl_name(code),
                    count,
                    attempt + 1
                );
                capacity = count;
            }
            NtStatus::SUCCESS => {
                let end = required_size(header_len, elem_len, count)
                    .ok_or(IoctlError::SizeOverflow { count })?;
                if end > out.len() || end > st.information {
                    return Err(IoctlError::Truncated {
                        record: "list payload",
                        expected: end,
                        got: st.information,
                    });
                }
                let items = out[header_len..end].to_vec();
                out.truncate(header_len);
                return Ok((out, items));
            }
            status => return Err(IoctlError::Status(status)),
        }
    }
    Err(IoctlError::Unsettled {
        attempts: MAX_ATTEMPTS,
    })
}

fn parse_items<T: FromBytes>(record: &'static str, raw: &[u8]) -> Result<Vec<T>, IoctlError> {
    raw.chunks_exact(size_of::<T>())
        .map(|chunk| read_record::<T>(record, chunk))
        .collect()
}

// Radio-scoped requests

pub fn get_local_info<D: DeviceIoControl + ?Sized>(dev: &D) -> Result<LocalRadioInfo, IoctlError> {
    let out = ioctl(dev, IOCTL_BTH_GET_LOCAL_INFO, &[], size_of::<LocalRadioInfo>())?;
    read_record("local radio info", &out)
}

pub fn get_device_info<D: DeviceIoControl + ?Sized>(dev: &D) -> Result<Vec<DeviceInfo>, IoctlError> {
    let header = DeviceInfoListHeader::default();
    let (_, items) = call_list(
        dev,
        IOCTL_BTH_GET_DEVICE_INFO,
        header.as_bytes(),
        offset_of!(DeviceInfoListHeader, count),
        size_of::<DeviceInfo>(),
        0,
    )?;
    parse_items("device info", &items)
}

fn address_request<D: DeviceIoControl + ?Sized>(
    dev: &D,
    code: u32,
    address: BluetoothAddress,
) -> Result<(), IoctlError> {
    ioctl(dev, code, AddressRecord::new(address).as_bytes(), 0).map(drop)
}

pub fn disconnect_device<D: DeviceIoControl + ?Sized>(
    dev: &D,
    address: BluetoothAddress,
) -> Result<(), IoctlError> {
    address_request(dev, IOCTL_BTH_DISCONNECT_DEVICE, address)
}

pub fn remove_device<D: DeviceIoControl + ?Sized>(
    dev: &D,
    address: BluetoothAddress,
) -> Result<(), IoctlError> {
    address_request(dev, IOCTL_BTHLE_RADIO_REMOVE_DEVICE, address)
}

/// Pair with `address`. Blocks until the bus completes the pended request.
pub fn start_auth<D: DeviceIoControl + ?Sized>(
    dev: &D,
    address: BluetoothAddress,
) -> Result<(), IoctlError> {
    address_request(dev, IOCTL_BTHLE_RADIO_START_AUTH, address)
}

pub fn start_discovery<D: DeviceIoControl + ?Sized>(dev: &D) -> Result<(), IoctlError> {
    ioctl(dev, IOCTL_BTHLE_RADIO_START_DISCOVERY, &[], 0).map(drop)
}

pub fn stop_discovery<D: DeviceIoControl + ?Sized>(dev: &D) -> Result<(), IoctlError> {
    ioctl(dev, IOCTL_BTHLE_RADIO_STOP_DISCOVERY, &[], 0).map(drop)
}

pub fn set_flag<D: DeviceIoControl + ?Sized>(dev: &D, flag: u32, enable: bool) -> Result<(), IoctlError> {
    let req = SetFlagRequest {
        flag,
        enable: enable.into(),
    };
    ioctl(dev, IOCTL_BTHLE_RADIO_SET_FLAG, req.as_bytes(), 0).map(drop)
}

/// Relay a pairing answer; returns whether the peer is now authenticated.
pub fn send_auth_response<D: DeviceIoControl + ?Sized>(
    dev: &D,
    address: BluetoothAddress,
    method: u32,
    value: u32,
    negative: bool,
) -> Result<bool, IoctlError> {
    let req = AuthResponseRecord::new(address, method, value, negative);
    let out = ioctl(
        dev,
        IOCTL_BTHLE_RADIO_SEND_AUTH_RESPONSE,
        req.as_bytes(),
        size_of::<AuthResponseRecord>(),
    )?;
    let reply: AuthResponseRecord = read_record("auth response", &out)?;
    Ok(reply.authenticated != 0)
}

// GATT requests, device-scoped or address-routed through the radio

fn gatt_code(op: GattOp, route: Route) -> u32 {
    match route {
        Route::Device => op.device_code(),
        Route::Radio(_) => op.radio_code(),
    }
}

pub fn get_services<D: DeviceIoControl + ?Sized>(
    dev: &D,
    route: Route,
) -> Result<Vec<GattServiceRecord>, IoctlError> {
    let inner = GetServicesHeader::default();
    let header = route.encode(inner.as_bytes());
    let (_, items) = call_list(
        dev,
        gatt_code(GattOp::GetServices, route),
        &header,
        route.inner_offset() + offset_of!(GetServicesHeader, count),
        size_of::<GattServiceRecord>(),
        0,
    )?;
    parse_items("service", &items)
}

pub fn get_characteristics<D: DeviceIoControl + ?Sized>(
    dev: &D,
    route: Route,
    service: &GattServiceRecord,
) -> Result<Vec<GattCharacteristicRecord>, IoctlError> {
    let inner = GetCharacteristicsHeader {
        service: *service,
        count: 0,
    };
    let header = route.encode(inner.as_bytes());
    let (_, items) = call_list(
        dev,
        gatt_code(GattOp::GetCharacteristics, route),
        &header,
        route.inner_offset() + offset_of!(GetCharacteristicsHeader, count),
        size_of::<GattCharacteristicRecord>(),
        0,
    )?;
    parse_items("characteristic", &items)
}

fn read_value<D: DeviceIoControl + ?Sized>(
    dev: &D,
    op: GattOp,
    route: Route,
    service: &GattServiceRecord,
    characteristic: &GattCharacteristicRecord,
) -> Result<Vec<u8>, IoctlError> {
    let inner = ReadValueHeader {
        service: *service,
        characteristic: *characteristic,
        data_size: 0,
    };
    let header = route.encode(inner.as_bytes());
    let (_, data) = call_list(
        dev,
        gatt_code(op, route),
        &header,
        route.inner_offset() + offset_of!(ReadValueHeader, data_size),
        1,
        MAX_ATTRIBUTE_LEN,
    )?;
    Ok(data)
}

pub fn read_characteristic<D: DeviceIoControl + ?Sized>(
    dev: &D,
    route: Route,
    service: &GattServiceRecord,
    characteristic: &GattCharacteristicRecord,
) -> Result<Vec<u8>, IoctlError> {
    read_value(dev, GattOp::Read, route, service, characteristic)
}

/// Block until the next notification value arrives (or the bus times out).
pub fn read_notification<D: DeviceIoControl + ?Sized>(
    dev: &D,
    route: Route,
    service: &GattServiceRecord,
    characteristic: &GattCharacteristicRecord,
) -> Result<Vec<u8>, IoctlError> {
    read_value(dev, GattOp::ReadNotification, route, service, characteristic)
}

pub fn write_characteristic<D: DeviceIoControl + ?Sized>(
    dev: &D,
    route: Route,
    service: &GattServiceRecord,
    characteristic: &GattCharacteristicRecord,
    value: &[u8],
    write_type: WriteType,
) -> Result<(), IoctlError> {
    let data_size = u32::try_from(value.len()).map_err(|_| IoctlError::InvalidValue {
        field: "data_size",
        value: u32::MAX,
    })?;
    let inner = WriteValueHeader {
        service: *service,
        characteristic: *characteristic,
        write_type: write_type as u32,
        data_size,
    };
    let mut input = route.encode(inner.as_bytes());
    input.extend_from_slice(value);
    ioctl(dev, gatt_code(GattOp::Write, route), &input, 0).map(drop)
}

pub fn set_notify<D: DeviceIoControl + ?Sized>(
    dev: &D,
    route: Route,
    service: &GattServiceRecord,
    characteristic: &GattCharacteristicRecord,
    enable: bool,
) -> Result<(), IoctlError> {
    let inner = SetNotifyRequest::new(*service, *characteristic, enable);
    let input = route.encode(inner.as_bytes());
    ioctl(dev, gatt_code(GattOp::SetNotify, route), &input, 0).map(drop)
}

pub fn get_connection_status<D: DeviceIoControl + ?Sized>(
    dev: &D,
    route: Route,
) -> Result<bool, IoctlError> {
    let input = match route {
        Route::Device => Vec::new(),
        Route::Radio(address) => AddressRecord::new(address).as_bytes().to_vec(),
    };
    let out = ioctl(dev, gatt_code(GattOp::ConnectionStatus, route), &input, 1)?;
    match out.first() {
        Some(&b) => Ok(b != 0),
        None => Err(IoctlError::Truncated {
            record: "connection status",
            expected: 1,
            got: 0,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sizing::reply_list;
    use crate::status::IoStatus;
    use bthle_unix::uuid_from_u16;
    use parking_lot::Mutex;

    /// Serves a fixed service list and records every output size it saw
    struct FixedServices {
        services: Vec<GattServiceRecord>,
        sizes: Mutex<Vec<usize>>,
    }

    impl DeviceIoControl for FixedServices {
        fn device_io_control(&self, code: u32, input: &[u8], output: &mut [u8]) -> IoStatus {
            assert_eq!(code, IOCTL_BTHLE_GET_GATT_SERVICES);
            self.sizes.lock().push(output.len());
            let mut buf = vec![0u8; input.len().max(output.len())];
            buf[..input.len()].copy_from_slice(input);
            let st = reply_list(&mut buf, output.len(), 4, 0, &self.services);
            let n = st.information.min(output.len());
            output[..n].copy_from_slice(&buf[..n]);
            st
        }
    }

    #[test]
    fn test_call_twice_probes_then_fetches() {
        let dev = FixedServices {
            services: vec![
                GattServiceRecord::new(&uuid_from_u16(0x1800), 1),
                GattServiceRecord::new(&uuid_from_u16(0x180F), 9),
            ],
            sizes: Mutex::new(Vec::new()),
        };
        let services = get_services(&dev, Route::Device).unwrap();
        assert_eq!(services.len(), 2);
        assert_eq!(services[0].uuid(), uuid_from_u16(0x1800));
        assert_eq!(services[1].attribute_handle, 9);
        assert_eq!(*dev.sizes.lock(), vec![4, 4 + 2 * 24]);
    }

    #[test]
    fn test_empty_list_needs_one_call() {
        let dev = FixedServices {
            services: Vec::new(),
            sizes: Mutex::new(Vec::new()),
        };
        assert!(get_services(&dev, Route::Device).unwrap().is_empty());
        assert_eq!(dev.sizes.lock().len(), 1);
    }
}
