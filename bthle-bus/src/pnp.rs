//! Device-interface namespace and bus relations
//!
//! Radios expose the classic-port and general radio interfaces; remote
//! devices with an LE facet expose the BLE device interface once their PDO
//! is started. Interface paths embed the 12-hex-digit device address after
//! a `&`, `_` or `#` delimiter.

use std::fmt;

use bthle_unix::BluetoothAddress;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// `GUID_BTHPORT_DEVICE_INTERFACE`
pub const GUID_BTHPORT_DEVICE_INTERFACE: Uuid = Uuid::from_u128(0x0850302a_b344_4fda_9be9_90576b8d46f0);
/// `GUID_BLUETOOTH_RADIO_INTERFACE`
pub const GUID_BLUETOOTH_RADIO_INTERFACE: Uuid = Uuid::from_u128(0x92383b0e_f90e_4ac9_8d44_8c2d0d0ebda2);
/// `GUID_BLUETOOTHLE_DEVICE_INTERFACE`
pub const GUID_BLUETOOTHLE_DEVICE_INTERFACE: Uuid = Uuid::from_u128(0x781aee18_7733_4ce4_add0_91f41c67b592);

/// Interface arrival/removal channel depth
const INTERFACE_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterfaceClass {
    BthPort,
    BthRadio,
    BthLeDevice,
}

impl InterfaceClass {
    pub const fn guid(self) -> Uuid {
        match self {
            Self::BthPort => GUID_BTHPORT_DEVICE_INTERFACE,
            Self::BthRadio => GUID_BLUETOOTH_RADIO_INTERFACE,
            Self::BthLeDevice => GUID_BLUETOOTHLE_DEVICE_INTERFACE,
        }
    }

    pub fn from_guid(guid: &Uuid) -> Option<Self> {
        [Self::BthPort, Self::BthRadio, Self::BthLeDevice]
            .into_iter()
            .find(|c| &c.guid() == guid)
    }
}

/// Physical device object a file handle is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PdoId {
    Radio(u32),
    Device { radio: u32, index: u32 },
}

impl fmt::Display for PdoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Radio(index) => write!(f, "radio {index}"),
            Self::Device { radio, index } => write!(f, "device {radio}&{index}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub class: InterfaceClass,
    pub symlink: String,
    pub pdo: PdoId,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub enum InterfaceEvent {
    Arrival(InterfaceInfo),
    Removal(InterfaceInfo),
}

pub fn radio_symlink(class: InterfaceClass, hw_name: &str, index: u32) -> String {
    format!(
        "\\\\?\\BTHLE#RADIO_{hw_name}#{index}#{{{}}}",
        class.guid()
    )
}

pub fn device_symlink(address: BluetoothAddress, radio_hw_name: &str, radio: u32, index: u32) -> String {
    format!(
        "\\\\?\\BTHLE#Dev_{}#{radio_hw_name}&{radio}&{index}#{{{}}}",
        address.to_hex12(),
        GUID_BLUETOOTHLE_DEVICE_INTERFACE
    )
}

/// Extract the device address from an interface path. The address is the
/// first run of exactly 12 hex digits that follows `&`, `_` or `#`.
pub fn address_from_symlink(path: &str) -> Option<BluetoothAddress> {
    let bytes = path.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if !matches!(b, b'&' | b'_' | b'#') {
            continue;
        }
        let start = i + 1;
        let run = bytes[start..]
            .iter()
            .take_while(|c| c.is_ascii_hexdigit())
            .count();
        if run == 12 {
            let digits = &path[start..start + 12];
            if let Ok(raw) = u64::from_str_radix(digits, 16) {
                return Some(BluetoothAddress::from_u64(raw));
            }
        }
    }
    None
}

/// Sanitise a backend adapter name into a stable hardware name
pub fn hardware_name(unique: &str, index: u32) -> String {
    let name: String = unique
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if name.is_empty() {
        format!("RADIO{index}")
    } else {
        name
    }
}

pub struct InterfaceRegistry {
    entries: RwLock<Vec<InterfaceInfo>>,
    tx: broadcast::Sender<InterfaceEvent>,
}

impl Default for InterfaceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InterfaceRegistry {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(INTERFACE_CHANNEL_CAPACITY);
        Self {
            entries: RwLock::new(Vec::new()),
            tx,
        }
    }

    /// Register an interface, initially disabled
    pub fn register(&self, class: InterfaceClass, symlink: String, pdo: PdoId) {
        let mut entries = self.entries.write();
        if entries.iter().any(|e| e.symlink.eq_ignore_ascii_case(&symlink)) {
            return;
        }
        debug!("register interface {symlink} for {pdo}");
        entries.push(InterfaceInfo {
            class,
            symlink,
            pdo,
            enabled: false,
        });
    }

    /// Enable or disable an interface, announcing the transition
    pub fn set_enabled(&self, symlink: &str, enabled: bool) {
        let event = {
            let mut entries = self.entries.write();
            let Some(entry) = entries
                .iter_mut()
                .find(|e| e.symlink.eq_ignore_ascii_case(symlink))
            else {
                return;
            };
            if entry.enabled == enabled {
                return;
            }
            entry.enabled = enabled;
            if enabled {
                InterfaceEvent::Arrival(entry.clone())
            } else {
                InterfaceEvent::Removal(entry.clone())
            }
        };
        // No subscribers is fine
        let _ = self.tx.send(event);
    }

    /// Disable and forget every interface of a PDO
    pub fn remove_pdo(&self, pdo: PdoId) {
        let removed: Vec<InterfaceInfo> = {
            let mut entries = self.entries.write();
            let (gone, kept): (Vec<_>, Vec<_>) = entries.drain(..).partition(|e| e.pdo == pdo);
            *entries = kept;
            gone
        };
        for mut entry in removed {
            debug!("remove interface {}", entry.symlink);
            if entry.enabled {
                entry.enabled = false;
                let _ = self.tx.send(InterfaceEvent::Removal(entry));
            }
        }
    }

    /// Enabled interfaces of one class, in registration order
    pub fn list(&self, class: InterfaceClass) -> Vec<String> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.enabled && e.class == class)
            .map(|e| e.symlink.clone())
            .collect()
    }

    /// Resolve an enabled interface path
    pub fn lookup(&self, symlink: &str) -> Option<InterfaceInfo> {
        self.entries
            .read()
            .iter()
            .find(|e| e.enabled && e.symlink.eq_ignore_ascii_case(symlink))
            .cloned()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InterfaceEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_from_symlink_delimiters() {
        let addr = BluetoothAddress::from_u64(0xC034_9911_2233);
        let path = device_symlink(addr, "HCI0", 0, 3);
        assert_eq!(address_from_symlink(&path), Some(addr));
        assert_eq!(
            address_from_symlink("BTHLE\\DEV&c03499112233\\7&1"),
            Some(addr)
        );
        assert_eq!(address_from_symlink("x#C03499112233"), Some(addr));
        // 13 digits is not an address
        assert_eq!(address_from_symlink("x_c034991122334"), None);
        assert_eq!(address_from_symlink(&radio_symlink(InterfaceClass::BthRadio, "HCI0", 0)), None);
    }

    #[test]
    fn test_hardware_name() {
        assert_eq!(hardware_name("hci0", 0), "HCI0");
        assert_eq!(hardware_name("/org/bluez/hci1", 1), "ORGBLUEZHCI1");
        assert_eq!(hardware_name("--", 4), "RADIO4");
    }

    #[test]
    fn test_enable_announces_arrival_and_removal() {
        let registry = InterfaceRegistry::new();
        let mut rx = registry.subscribe();
        let path = radio_symlink(InterfaceClass::BthRadio, "HCI0", 0);
        registry.register(InterfaceClass::BthRadio, path.clone(), PdoId::Radio(0));
        assert!(registry.list(InterfaceClass::BthRadio).is_empty());

        registry.set_enabled(&path, true);
        assert_eq!(registry.list(InterfaceClass::BthRadio), vec![path.clone()]);
        assert!(matches!(rx.try_recv(), Ok(InterfaceEvent::Arrival(i)) if i.symlink == path));
        assert_eq!(registry.lookup(&path.to_lowercase()).map(|i| i.pdo), Some(PdoId::Radio(0)));

        registry.remove_pdo(PdoId::Radio(0));
        assert!(matches!(rx.try_recv(), Ok(InterfaceEvent::Removal(_))));
        assert!(registry.lookup(&path).is_none());
    }

    #[test]
    fn test_class_guid_round_trip() {
        for class in [InterfaceClass::BthPort, InterfaceClass::BthRadio, InterfaceClass::BthLeDevice] {
            assert_eq!(InterfaceClass::from_guid(&class.guid()), Some(class));
        }
    }
}
