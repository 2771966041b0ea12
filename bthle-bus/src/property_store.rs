//! Per-PDO device property store
//!
//! Mirrors the visible remote-device properties the way the Windows
//! property store exposes them to SetupAPI consumers.

use std::collections::{BTreeMap, HashMap};

use bthle_unix::{device_prop, DeviceProperties, PropMask};
use parking_lot::RwLock;

use crate::pnp::PdoId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PropertyKey {
    /// `DEVPKEY_Bluetooth_DeviceAddress`
    Address,
    /// `DEVPKEY_NAME` / friendly name
    Name,
    /// `DEVPKEY_Bluetooth_ClassOfDevice`
    Class,
    Connected,
    Paired,
    /// The device has an LE facet
    Le,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    U64(u64),
    U32(u32),
    Bool(bool),
    String(String),
}

#[derive(Default)]
pub struct PropertyStore {
    entries: RwLock<HashMap<PdoId, BTreeMap<PropertyKey, PropertyValue>>>,
}

impl PropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, pdo: PdoId, key: PropertyKey) -> Option<PropertyValue> {
        self.entries.read().get(&pdo).and_then(|m| m.get(&key)).cloned()
    }

    pub fn set(&self, pdo: PdoId, key: PropertyKey, value: PropertyValue) {
        self.entries.write().entry(pdo).or_default().insert(key, value);
    }

    pub fn remove(&self, pdo: PdoId, key: PropertyKey) {
        if let Some(m) = self.entries.write().get_mut(&pdo) {
            m.remove(&key);
        }
    }

    /// Drop every property of a PDO
    pub fn clear(&self, pdo: PdoId) {
        self.entries.write().remove(&pdo);
    }

    /// Push the visible properties named in `mask`; absent ones are removed.
    pub fn publish_device(&self, pdo: PdoId, props: &DeviceProperties, le: bool, mask: PropMask) {
        let mut entries = self.entries.write();
        let map = entries.entry(pdo).or_default();
        let mut put = |key: PropertyKey, value: Option<PropertyValue>| match value {
            Some(v) => {
                map.insert(key, v);
            }
            None => {
                map.remove(&key);
            }
        };
        if mask.contains(device_prop::ADDRESS) {
            put(PropertyKey::Address, props.address().map(|a| PropertyValue::U64(a.as_u64())));
        }
        if mask.contains(device_prop::NAME) {
            put(PropertyKey::Name, props.name().map(|n| PropertyValue::String(n.to_string())));
        }
        if mask.contains(device_prop::CLASS) {
            put(PropertyKey::Class, props.class().map(PropertyValue::U32));
        }
        if mask.contains(device_prop::CONNECTED) {
            put(PropertyKey::Connected, Some(PropertyValue::Bool(props.connected())));
        }
        if mask.contains(device_prop::PAIRED) {
            put(PropertyKey::Paired, Some(PropertyValue::Bool(props.paired())));
        }
        put(PropertyKey::Le, Some(PropertyValue::Bool(le)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bthle_unix::BluetoothAddress;

    #[test]
    fn test_publish_visible_subset() {
        let store = PropertyStore::new();
        let pdo = PdoId::Device { radio: 0, index: 1 };
        let mut props = DeviceProperties {
            present: device_prop::ADDRESS | device_prop::NAME | device_prop::CONNECTED,
            address: BluetoothAddress::from_u64(0xC034_9911_2233),
            name: "HRM".into(),
            connected: true,
            ..Default::default()
        };
        store.publish_device(pdo, &props, false, device_prop::VISIBLE);
        assert_eq!(store.get(pdo, PropertyKey::Name), Some(PropertyValue::String("HRM".into())));
        assert_eq!(store.get(pdo, PropertyKey::Connected), Some(PropertyValue::Bool(true)));
        assert_eq!(store.get(pdo, PropertyKey::Class), None);

        props.present.remove(device_prop::NAME);
        store.publish_device(pdo, &props, true, device_prop::NAME);
        assert_eq!(store.get(pdo, PropertyKey::Name), None);
        assert_eq!(store.get(pdo, PropertyKey::Le), Some(PropertyValue::Bool(true)));

        store.clear(pdo);
        assert_eq!(store.get(pdo, PropertyKey::Address), None);
    }
}
