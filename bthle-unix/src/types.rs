//! Common types shared by every layer of the stack

use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::error::UnixError;

/// Maximum length of a Bluetooth device or radio name in bytes (BTH_MAX_NAME_SIZE)
pub const MAX_NAME_SIZE: usize = 248;

/// Bluetooth SIG base UUID (`00000000-0000-1000-8000-00805F9B34FB`)
pub const BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5F9B_34FB;

/// 48-bit Bluetooth device address, stored in the low bits of a BTH_ADDR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BluetoothAddress(u64);

impl BluetoothAddress {
    const MASK: u64 = 0xFFFF_FFFF_FFFF;

    /// Build from a BTH_ADDR; the top 16 bits are discarded.
    pub const fn from_u64(raw: u64) -> Self {
        Self(raw & Self::MASK)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Octets in display order (most significant first)
    pub fn octets(&self) -> [u8; 6] {
        let b = self.0.to_be_bytes();
        [b[2], b[3], b[4], b[5], b[6], b[7]]
    }

    pub fn from_octets(octets: [u8; 6]) -> Self {
        let mut b = [0u8; 8];
        b[2..].copy_from_slice(&octets);
        Self(u64::from_be_bytes(b))
    }

    /// 12 lowercase hex digits, as embedded in device-interface paths
    pub fn to_hex12(&self) -> String {
        format!("{:012x}", self.0)
    }
}

impl From<u64> for BluetoothAddress {
    fn from(raw: u64) -> Self {
        Self::from_u64(raw)
    }
}

impl From<BluetoothAddress> for u64 {
    fn from(addr: BluetoothAddress) -> Self {
        addr.0
    }
}

impl fmt::Display for BluetoothAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.octets();
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl FromStr for BluetoothAddress {
    type Err = UnixError;

    /// Accepts `AA:BB:CC:DD:EE:FF`, `AA-BB-...`, `AA_BB_...` or 12 bare hex digits.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s
            .chars()
            .filter(|c| !matches!(c, ':' | '-' | '_'))
            .collect();
        if digits.len() != 12 {
            return Err(UnixError::InvalidParameter(format!(
                "bad Bluetooth address \"{s}\""
            )));
        }
        u64::from_str_radix(&digits, 16)
            .map(Self::from_u64)
            .map_err(|_| UnixError::InvalidParameter(format!("bad Bluetooth address \"{s}\"")))
    }
}

/// Expand a 16-bit SIG-assigned UUID onto the Bluetooth base UUID.
pub fn uuid_from_u16(short: u16) -> Uuid {
    Uuid::from_u128(BASE_UUID | ((short as u128) << 96))
}

/// Return the 16-bit alias if `uuid` sits on the Bluetooth base UUID.
pub fn uuid_to_u16(uuid: &Uuid) -> Option<u16> {
    let v = uuid.as_u128();
    let mask = !(0xFFFF_FFFFu128 << 96);
    if v & mask == BASE_UUID && v >> 112 == 0 {
        Some((v >> 96) as u16)
    } else {
        None
    }
}

/// Parse a GATT UUID: either a 4-hex-digit SIG alias (`180D`) or a full UUID.
pub fn parse_gatt_uuid(s: &str) -> Result<Uuid, UnixError> {
    let trimmed = s.trim().trim_start_matches("0x");
    if trimmed.len() == 4 {
        return u16::from_str_radix(trimmed, 16)
            .map(uuid_from_u16)
            .map_err(|_| UnixError::InvalidParameter(format!("bad UUID \"{s}\"")));
    }
    Uuid::parse_str(trimmed).map_err(|e| UnixError::InvalidParameter(format!("bad UUID \"{s}\": {e}")))
}

/// Bit set recording which properties of a snapshot are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct PropMask(u32);

impl PropMask {
    pub const EMPTY: Self = Self(0);

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub const fn intersects(&self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for PropMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitAnd for PropMask {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

/// Radio property presence bits
pub mod radio_prop {
    use super::PropMask;

    pub const ADDRESS: PropMask = PropMask::from_bits(1 << 0);
    pub const NAME: PropMask = PropMask::from_bits(1 << 1);
    pub const CLASS: PropMask = PropMask::from_bits(1 << 2);
    pub const MANUFACTURER: PropMask = PropMask::from_bits(1 << 3);
    pub const VERSION: PropMask = PropMask::from_bits(1 << 4);
    pub const DISCOVERABLE: PropMask = PropMask::from_bits(1 << 5);
    pub const CONNECTABLE: PropMask = PropMask::from_bits(1 << 6);
    pub const PAIRABLE: PropMask = PropMask::from_bits(1 << 7);
    pub const DISCOVERING: PropMask = PropMask::from_bits(1 << 8);
    pub const ALL: PropMask = PropMask::from_bits((1 << 9) - 1);
}

/// Device property presence bits
pub mod device_prop {
    use super::PropMask;

    pub const ADDRESS: PropMask = PropMask::from_bits(1 << 0);
    pub const NAME: PropMask = PropMask::from_bits(1 << 1);
    pub const CLASS: PropMask = PropMask::from_bits(1 << 2);
    pub const CONNECTED: PropMask = PropMask::from_bits(1 << 3);
    pub const PAIRED: PropMask = PropMask::from_bits(1 << 4);
    pub const TRUSTED: PropMask = PropMask::from_bits(1 << 5);
    pub const LEGACY_PAIRING: PropMask = PropMask::from_bits(1 << 6);
    /// Bearer hint: the backend already knows the peer has an LE facet
    pub const LE: PropMask = PropMask::from_bits(1 << 7);
    /// Properties mirrored into the Windows property store
    pub const VISIBLE: PropMask = PropMask::from_bits(
        ADDRESS.bits() | NAME.bits() | CLASS.bits() | CONNECTED.bits() | PAIRED.bits(),
    );
    pub const ALL: PropMask = PropMask::from_bits((1 << 8) - 1);
}

/// Snapshot of local radio properties. Fields not marked in `present` are never read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RadioProperties {
    pub present: PropMask,
    pub address: BluetoothAddress,
    pub name: String,
    pub class: u32,
    pub manufacturer: u16,
    pub version: u8,
    pub discoverable: bool,
    pub connectable: bool,
    pub pairable: bool,
    pub discovering: bool,
}

impl RadioProperties {
    pub fn address(&self) -> Option<BluetoothAddress> {
        self.present.contains(radio_prop::ADDRESS).then_some(self.address)
    }

    pub fn name(&self) -> Option<&str> {
        self.present.contains(radio_prop::NAME).then_some(self.name.as_str())
    }

    pub fn class(&self) -> Option<u32> {
        self.present.contains(radio_prop::CLASS).then_some(self.class)
    }

    pub fn manufacturer(&self) -> Option<u16> {
        self.present.contains(radio_prop::MANUFACTURER).then_some(self.manufacturer)
    }

    pub fn version(&self) -> Option<u8> {
        self.present.contains(radio_prop::VERSION).then_some(self.version)
    }

    pub fn flag(&self, bit: PropMask) -> Option<bool> {
        if !self.present.contains(bit) {
            return None;
        }
        match bit {
            b if b == radio_prop::DISCOVERABLE => Some(self.discoverable),
            b if b == radio_prop::CONNECTABLE => Some(self.connectable),
            b if b == radio_prop::PAIRABLE => Some(self.pairable),
            b if b == radio_prop::DISCOVERING => Some(self.discovering),
            _ => None,
        }
    }

    /// Apply a change notification: copy `changed` fields from `update`, then
    /// drop the `invalidated` ones.
    pub fn merge(&mut self, changed: PropMask, update: &RadioProperties, invalidated: PropMask) {
        let copy = changed & update.present;
        if copy.contains(radio_prop::ADDRESS) {
            self.address = update.address;
        }
        if copy.contains(radio_prop::NAME) {
            self.name = truncate_name(&update.name);
        }
        if copy.contains(radio_prop::CLASS) {
            self.class = update.class & 0x00FF_FFFF;
        }
        if copy.contains(radio_prop::MANUFACTURER) {
            self.manufacturer = update.manufacturer;
        }
        if copy.contains(radio_prop::VERSION) {
            self.version = update.version;
        }
        if copy.contains(radio_prop::DISCOVERABLE) {
            self.discoverable = update.discoverable;
        }
        if copy.contains(radio_prop::CONNECTABLE) {
            self.connectable = update.connectable;
        }
        if copy.contains(radio_prop::PAIRABLE) {
            self.pairable = update.pairable;
        }
        if copy.contains(radio_prop::DISCOVERING) {
            self.discovering = update.discovering;
        }
        self.present.insert(copy);
        self.present.remove(invalidated);
    }
}

/// Snapshot of remote device properties. Fields not marked in `present` are never read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceProperties {
    pub present: PropMask,
    pub address: BluetoothAddress,
    pub name: String,
    pub class: u32,
    pub connected: bool,
    pub paired: bool,
    pub trusted: bool,
    pub legacy_pairing: bool,
    pub le: bool,
}

impl DeviceProperties {
    pub fn address(&self) -> Option<BluetoothAddress> {
        self.present.contains(device_prop::ADDRESS).then_some(self.address)
    }

    /// Name, if present and non-empty
    pub fn name(&self) -> Option<&str> {
        if self.present.contains(device_prop::NAME) && !self.name.is_empty() {
            Some(self.name.as_str())
        } else {
            None
        }
    }

    pub fn class(&self) -> Option<u32> {
        self.present.contains(device_prop::CLASS).then_some(self.class)
    }

    pub fn connected(&self) -> bool {
        self.present.contains(device_prop::CONNECTED) && self.connected
    }

    pub fn paired(&self) -> bool {
        self.present.contains(device_prop::PAIRED) && self.paired
    }

    pub fn trusted(&self) -> bool {
        self.present.contains(device_prop::TRUSTED) && self.trusted
    }

    pub fn legacy_pairing(&self) -> bool {
        self.present.contains(device_prop::LEGACY_PAIRING) && self.legacy_pairing
    }

    pub fn le_hint(&self) -> bool {
        self.present.contains(device_prop::LE) && self.le
    }

    /// Apply a change notification: copy `changed` fields from `update`, then
    /// drop the `invalidated` ones. Returns the set of bits whose value moved.
    pub fn merge(
        &mut self,
        changed: PropMask,
        update: &DeviceProperties,
        invalidated: PropMask,
    ) -> PropMask {
        let before = self.clone();
        let copy = changed & update.present;
        if copy.contains(device_prop::ADDRESS) {
            self.address = update.address;
        }
        if copy.contains(device_prop::NAME) {
            self.name = truncate_name(&update.name);
        }
        if copy.contains(device_prop::CLASS) {
            self.class = update.class & 0x00FF_FFFF;
        }
        if copy.contains(device_prop::CONNECTED) {
            self.connected = update.connected;
        }
        if copy.contains(device_prop::PAIRED) {
            self.paired = update.paired;
        }
        if copy.contains(device_prop::TRUSTED) {
            self.trusted = update.trusted;
        }
        if copy.contains(device_prop::LEGACY_PAIRING) {
            self.legacy_pairing = update.legacy_pairing;
        }
        if copy.contains(device_prop::LE) {
            self.le = update.le;
        }
        self.present.insert(copy);
        self.present.remove(invalidated);
        before.diff(self)
    }

    fn diff(&self, other: &DeviceProperties) -> PropMask {
        let mut moved = PropMask::EMPTY;
        let checks = [
            (device_prop::ADDRESS, self.address() != other.address()),
            (device_prop::NAME, self.name() != other.name()),
            (device_prop::CLASS, self.class() != other.class()),
            (device_prop::CONNECTED, self.connected() != other.connected()),
            (device_prop::PAIRED, self.paired() != other.paired()),
            (device_prop::TRUSTED, self.trusted() != other.trusted()),
            (
                device_prop::LEGACY_PAIRING,
                self.legacy_pairing() != other.legacy_pairing(),
            ),
            (device_prop::LE, self.le_hint() != other.le_hint()),
        ];
        for (bit, differs) in checks {
            if differs {
                moved.insert(bit);
            }
        }
        moved
    }
}

/// Clamp a UTF-8 name to [`MAX_NAME_SIZE`] bytes on a character boundary.
pub fn truncate_name(name: &str) -> String {
    if name.len() <= MAX_NAME_SIZE {
        return name.to_string();
    }
    let mut end = MAX_NAME_SIZE;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}

/// The six GATT characteristic capability bits carried by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct CharacteristicProperties {
    pub broadcast: bool,
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
    pub indicate: bool,
}

impl CharacteristicProperties {
    /// Parse a capability name as used in simulated-host descriptions
    pub fn set_by_name(&mut self, name: &str) -> Result<(), UnixError> {
        match name {
            "broadcast" => self.broadcast = true,
            "read" => self.read = true,
            "write" => self.write = true,
            "write-without-response" | "write_without_response" => {
                self.write_without_response = true
            }
            "notify" => self.notify = true,
            "indicate" => self.indicate = true,
            other => {
                return Err(UnixError::InvalidParameter(format!(
                    "unknown characteristic property \"{other}\""
                )))
            }
        }
        Ok(())
    }
}

/// Full characteristic descriptor delivered with `GattCharacteristicAdded`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub uuid: uuid::Uuid,
    pub handle: u16,
    pub value_handle: u16,
    pub props: CharacteristicProperties,
}

/// GATT write procedure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum WriteType {
    #[default]
    WithResponse = 0,
    WithoutResponse = 1,
}

impl TryFrom<u32> for WriteType {
    type Error = UnixError;

    fn try_from(v: u32) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::WithResponse),
            1 => Ok(Self::WithoutResponse),
            other => Err(UnixError::InvalidParameter(format!("write type {other}"))),
        }
    }
}

/// Pairing authentication method (BLUETOOTH_AUTHENTICATION_METHOD values)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum AuthMethod {
    Legacy = 1,
    OutOfBand = 2,
    NumericComparison = 3,
    PasskeyNotification = 4,
    Passkey = 5,
}

impl TryFrom<u32> for AuthMethod {
    type Error = UnixError;

    fn try_from(v: u32) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(Self::Legacy),
            2 => Ok(Self::OutOfBand),
            3 => Ok(Self::NumericComparison),
            4 => Ok(Self::PasskeyNotification),
            5 => Ok(Self::Passkey),
            other => Err(UnixError::InvalidParameter(format!("auth method {other}"))),
        }
    }
}

/// One writable radio property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioPropValue {
    Discoverable(bool),
    Connectable(bool),
    Pairable(bool),
}

/// Opaque token that correlates a pended pairing request with `PairingFinished`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PairingToken(pub u64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display_and_parse() {
        let addr = BluetoothAddress::from_u64(0xC034_9911_2233);
        assert_eq!(addr.to_string(), "C0:34:99:11:22:33");
        assert_eq!(addr.to_hex12(), "c03499112233");
        assert_eq!("C0:34:99:11:22:33".parse::<BluetoothAddress>().unwrap(), addr);
        assert_eq!("c03499112233".parse::<BluetoothAddress>().unwrap(), addr);
        assert!("C0:34:99".parse::<BluetoothAddress>().is_err());
    }

    #[test]
    fn test_address_masks_high_bits() {
        let addr = BluetoothAddress::from_u64(0xFFFF_0000_0000_0001);
        assert_eq!(addr.as_u64(), 1);
        assert_eq!(addr.octets(), [0, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn test_short_uuid_expansion() {
        let uuid = uuid_from_u16(0x180D);
        assert_eq!(uuid.to_string(), "0000180d-0000-1000-8000-00805f9b34fb");
        assert_eq!(uuid_to_u16(&uuid), Some(0x180D));
        assert_eq!(uuid_to_u16(&uuid::Uuid::from_u128(1)), None);
        assert_eq!(parse_gatt_uuid("180F").unwrap(), uuid_from_u16(0x180F));
    }

    #[test]
    fn test_device_merge_reports_moved_bits() {
        let mut props = DeviceProperties {
            present: device_prop::ADDRESS | device_prop::CONNECTED,
            address: BluetoothAddress::from_u64(1),
            ..Default::default()
        };
        let update = DeviceProperties {
            present: device_prop::CONNECTED | device_prop::NAME,
            connected: true,
            name: "Sensor".into(),
            ..Default::default()
        };
        let moved = props.merge(device_prop::CONNECTED, &update, PropMask::EMPTY);
        assert_eq!(moved, device_prop::CONNECTED);
        assert!(props.connected());
        // NAME was present in the update but not in the changed mask
        assert_eq!(props.name(), None);

        let moved = props.merge(PropMask::EMPTY, &update, device_prop::CONNECTED);
        assert_eq!(moved, device_prop::CONNECTED);
        assert!(!props.connected());
    }

    #[test]
    fn test_radio_flag_requires_presence() {
        let mut props = RadioProperties::default();
        props.discoverable = true;
        assert_eq!(props.flag(radio_prop::DISCOVERABLE), None);
        props.present.insert(radio_prop::DISCOVERABLE);
        assert_eq!(props.flag(radio_prop::DISCOVERABLE), Some(true));
    }

    #[test]
    fn test_truncate_name_on_char_boundary() {
        let long = "é".repeat(200);
        let cut = truncate_name(&long);
        assert!(cut.len() <= MAX_NAME_SIZE);
        assert!(cut.chars().all(|c| c == 'é'));
    }
}
