//! Packed IOCTL wire records (zerocopy)
//!
//! Every payload is a fixed header followed by a variable-length array or
//! byte blob. Integers are host-endian; every record is `#[repr(C)]` with its
//! padding spelled out so the layouts have no implicit holes.
//!
//! Address-routed radio variants prefix the device-scoped header with the
//! 64-bit `BTH_ADDR` of the target; see [`Route`].

use bthle_unix::{
    uuid_from_u16, uuid_to_u16, BluetoothAddress, CharacteristicInfo, CharacteristicProperties,
    MAX_NAME_SIZE,
};
use uuid::Uuid;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::IoctlError;

/// `BTH_LE_UUID`: short SIG alias or full 128-bit GUID
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoBytes, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct BthLeUuid {
    pub is_short: u8,
    _pad: [u8; 3],
    /// Short form: little-endian u16 in the first two bytes; long form: GUID layout
    pub value: [u8; 16],
}

impl BthLeUuid {
    pub fn from_uuid(uuid: &Uuid) -> Self {
        let mut value = [0u8; 16];
        let is_short = match uuid_to_u16(uuid) {
            Some(short) => {
                value[..2].copy_from_slice(&short.to_le_bytes());
                1
            }
            None => {
                value = uuid.to_bytes_le();
                0
            }
        };
        Self {
            is_short,
            _pad: [0; 3],
            value,
        }
    }

    /// Full 128-bit UUID (short aliases expanded onto the base UUID)
    pub fn to_uuid(&self) -> Uuid {
        if self.is_short != 0 {
            uuid_from_u16(u16::from_le_bytes([self.value[0], self.value[1]]))
        } else {
            Uuid::from_bytes_le(self.value)
        }
    }
}

/// `BTH_LE_GATT_SERVICE`
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoBytes, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct GattServiceRecord {
    pub uuid: BthLeUuid,
    pub attribute_handle: u16,
    _pad: [u8; 2],
}

impl GattServiceRecord {
    pub fn new(uuid: &Uuid, attribute_handle: u16) -> Self {
        Self {
            uuid: BthLeUuid::from_uuid(uuid),
            attribute_handle,
            _pad: [0; 2],
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid.to_uuid()
    }
}

/// `BTH_LE_GATT_CHARACTERISTIC`
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoBytes, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct GattCharacteristicRecord {
    pub service_handle: u16,
    _pad0: [u8; 2],
    pub uuid: BthLeUuid,
    pub attribute_handle: u16,
    pub value_handle: u16,
    pub is_broadcastable: u8,
    pub is_readable: u8,
    pub is_writable: u8,
    pub is_writable_without_response: u8,
    pub is_signed_writable: u8,
    pub is_notifiable: u8,
    pub is_indicatable: u8,
    pub has_extended_properties: u8,
}

impl GattCharacteristicRecord {
    pub fn new(service_handle: u16, info: &CharacteristicInfo) -> Self {
        let p = &info.props;
        Self {
            service_handle,
            _pad0: [0; 2],
            uuid: BthLeUuid::from_uuid(&info.uuid),
            attribute_handle: info.handle,
            value_handle: info.value_handle,
            is_broadcastable: p.broadcast.into(),
            is_readable: p.read.into(),
            is_writable: p.write.into(),
            is_writable_without_response: p.write_without_response.into(),
            is_signed_writable: 0,
            is_notifiable: p.notify.into(),
            is_indicatable: p.indicate.into(),
            has_extended_properties: 0,
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid.to_uuid()
    }

    pub fn properties(&self) -> CharacteristicProperties {
        CharacteristicProperties {
            broadcast: self.is_broadcastable != 0,
            read: self.is_readable != 0,
            write: self.is_writable != 0,
            write_without_response: self.is_writable_without_response != 0,
            notify: self.is_notifiable != 0,
            indicate: self.is_indicatable != 0,
        }
    }

    pub fn info(&self) -> CharacteristicInfo {
        CharacteristicInfo {
            uuid: self.uuid(),
            handle: self.attribute_handle,
            value_handle: self.value_handle,
            props: self.properties(),
        }
    }
}

/// `LOCAL_RADIO_DISCOVERABLE`
pub const LOCAL_RADIO_DISCOVERABLE: u32 = 0x0001;
/// `LOCAL_RADIO_CONNECTABLE`
pub const LOCAL_RADIO_CONNECTABLE: u32 = 0x0002;
pub const LOCAL_RADIO_PAIRABLE: u32 = 0x0004;
pub const LOCAL_RADIO_DISCOVERING: u32 = 0x0008;

/// `BTH_LOCAL_RADIO_INFO` (flattened)
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct LocalRadioInfo {
    pub address: u64,
    pub class_of_device: u32,
    pub flags: u32,
    pub manufacturer: u16,
    pub lmp_subversion: u16,
    pub hci_revision: u16,
    pub lmp_version: u8,
    pub hci_version: u8,
    pub name: [u8; MAX_NAME_SIZE],
}

impl LocalRadioInfo {
    pub fn name(&self) -> String {
        decode_name(&self.name)
    }
}

pub const BDIF_ADDRESS: u32 = 0x0000_0001;
pub const BDIF_COD: u32 = 0x0000_0002;
pub const BDIF_NAME: u32 = 0x0000_0004;
pub const BDIF_PAIRED: u32 = 0x0000_0008;
pub const BDIF_PERSONAL: u32 = 0x0000_0010;
pub const BDIF_CONNECTED: u32 = 0x0000_0020;
/// The device has an LE facet
pub const BDIF_LE: u32 = 0x0000_0040;

/// `BTH_DEVICE_INFO`
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct DeviceInfo {
    pub flags: u32,
    _pad0: u32,
    pub address: u64,
    pub class_of_device: u32,
    pub name: [u8; MAX_NAME_SIZE],
    _pad1: [u8; 4],
}

impl DeviceInfo {
    pub fn new(flags: u32, address: BluetoothAddress, class_of_device: u32, name: &str) -> Self {
        Self {
            flags,
            _pad0: 0,
            address: address.as_u64(),
            class_of_device,
            name: encode_name(name),
            _pad1: [0; 4],
        }
    }

    pub fn address(&self) -> BluetoothAddress {
        BluetoothAddress::from_u64(self.address)
    }

    pub fn name(&self) -> String {
        decode_name(&self.name)
    }
}

/// `BTH_DEVICE_INFO_LIST` header
#[derive(Debug, Clone, Copy, Default, IntoBytes, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct DeviceInfoListHeader {
    pub count: u32,
    _pad: u32,
}

/// GET_GATT_SERVICES header, followed by `count` [`GattServiceRecord`]s
#[derive(Debug, Clone, Copy, Default, IntoBytes, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct GetServicesHeader {
    pub count: u32,
}

/// GET_GATT_CHARACTERISTICS header, followed by `count` [`GattCharacteristicRecord`]s
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct GetCharacteristicsHeader {
    pub service: GattServiceRecord,
    pub count: u32,
}

/// READ_CHARACTERISTIC and READ_NOTIFICATION header, followed by `data_size` bytes
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct ReadValueHeader {
    pub service: GattServiceRecord,
    pub characteristic: GattCharacteristicRecord,
    pub data_size: u32,
}

/// WRITE_CHARACTERISTIC header, followed by `data_size` bytes
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct WriteValueHeader {
    pub service: GattServiceRecord,
    pub characteristic: GattCharacteristicRecord,
    /// 0 = with response, 1 = without response
    pub write_type: u32,
    pub data_size: u32,
}

#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct SetNotifyRequest {
    pub service: GattServiceRecord,
    pub characteristic: GattCharacteristicRecord,
    pub enable: u8,
    _pad: [u8; 3],
}

impl SetNotifyRequest {
    pub fn new(
        service: GattServiceRecord,
        characteristic: GattCharacteristicRecord,
        enable: bool,
    ) -> Self {
        Self {
            service,
            characteristic,
            enable: enable.into(),
            _pad: [0; 3],
        }
    }
}

/// Radio flag selectors for SET_FLAG
pub const RADIO_FLAG_DISCOVERABLE: u32 = 1;
pub const RADIO_FLAG_CONNECTABLE: u32 = 2;
pub const RADIO_FLAG_PAIRABLE: u32 = 3;

#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct SetFlagRequest {
    pub flag: u32,
    pub enable: u32,
}

/// SEND_AUTH_RESPONSE input and output
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct AuthResponseRecord {
    pub address: u64,
    pub method: u32,
    pub numeric_value_or_passkey: u32,
    pub negative: u8,
    /// Output: peer authenticated
    pub authenticated: u8,
    _pad: [u8; 6],
}

impl AuthResponseRecord {
    pub fn new(address: BluetoothAddress, method: u32, value: u32, negative: bool) -> Self {
        Self {
            address: address.as_u64(),
            method,
            numeric_value_or_passkey: value,
            negative: negative.into(),
            authenticated: 0,
            _pad: [0; 6],
        }
    }
}

/// Input of every address-only request (disconnect, remove, start auth,
/// connection status)
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct AddressRecord {
    pub address: u64,
}

impl AddressRecord {
    pub fn new(address: BluetoothAddress) -> Self {
        Self {
            address: address.as_u64(),
        }
    }
}

/// Target of a GATT request: the BLE device PDO itself, or a device looked
/// up by address through its radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Device,
    Radio(BluetoothAddress),
}

impl Route {
    pub const ADDRESS_PREFIX: usize = std::mem::size_of::<u64>();

    /// Size of a routed header whose device-scoped form is `inner` bytes.
    /// Radio-routed headers are the address followed by the inner header,
    /// padded to 8-byte alignment.
    pub const fn header_len(&self, inner: usize) -> usize {
        match self {
            Self::Device => inner,
            Self::Radio(_) => (Self::ADDRESS_PREFIX + inner + 7) & !7,
        }
    }

    /// Offset of the inner header within a routed header
    pub const fn inner_offset(&self) -> usize {
        match self {
            Self::Device => 0,
            Self::Radio(_) => Self::ADDRESS_PREFIX,
        }
    }

    /// Serialise a routed header from its device-scoped form.
    pub fn encode(&self, inner: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; self.header_len(inner.len())];
        if let Self::Radio(address) = self {
            buf[..Self::ADDRESS_PREFIX].copy_from_slice(address.as_u64().as_bytes());
        }
        let off = self.inner_offset();
        buf[off..off + inner.len()].copy_from_slice(inner);
        buf
    }

    /// Read the routing address from a radio-routed buffer.
    pub fn decode_address(buf: &[u8]) -> Result<BluetoothAddress, IoctlError> {
        let (address, _) = u64::read_from_prefix(buf).map_err(|_| IoctlError::Truncated {
            record: "address",
            expected: Self::ADDRESS_PREFIX,
            got: buf.len(),
        })?;
        Ok(BluetoothAddress::from_u64(address))
    }
}

/// Read a record from the start of `buf`.
pub fn read_record<T: FromBytes>(record: &'static str, buf: &[u8]) -> Result<T, IoctlError> {
    T::read_from_prefix(buf)
        .map(|(value, _)| value)
        .map_err(|_| IoctlError::Truncated {
            record,
            expected: std::mem::size_of::<T>(),
            got: buf.len(),
        })
}

/// Write a record to the start of `buf`.
pub fn write_record<T: IntoBytes + Immutable>(
    record: &'static str,
    value: &T,
    buf: &mut [u8],
) -> Result<(), IoctlError> {
    let got = buf.len();
    value.write_to_prefix(buf).map_err(|_| IoctlError::Truncated {
        record,
        expected: std::mem::size_of::<T>(),
        got,
    })
}

fn encode_name(name: &str) -> [u8; MAX_NAME_SIZE] {
    let mut out = [0u8; MAX_NAME_SIZE];
    let truncated = bthle_unix::truncate_name(name);
    // Keep one byte for the terminator
    let n = truncated.len().min(MAX_NAME_SIZE - 1);
    out[..n].copy_from_slice(&truncated.as_bytes()[..n]);
    out
}

pub fn encode_radio_name(name: &str) -> [u8; MAX_NAME_SIZE] {
    encode_name(name)
}

fn decode_name(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}
