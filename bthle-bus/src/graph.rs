//! Radio → device → service → characteristic object graph
//!
//! Locking: one graph mutex guards every list, every lifecycle transition
//! and the radio property bags. Each remote device has its own node lock for
//! its property bag and service list; a service's characteristic list has a
//! read/write lock but is effectively immutable once populated.
//!
//! Lock order is graph → node. A thread holding a node lock never takes the
//! graph lock or a second node lock, and no lock is held across a call into
//! the backend.
//!
//! Nodes are shared as `Arc`s: the parent list holds the creator reference,
//! lookups clone the `Arc` under the graph lock after checking the node is
//! `Active`, and the node is freed when the last clone drops after it has
//! been unlinked.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use bthle_unix::{
    BluetoothAddress, CharacteristicHandle, CharacteristicInfo, DeviceHandle, DeviceProperties,
    RadioHandle, RadioProperties, ServiceHandle,
};
use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::BusError;
use crate::irp::PendingPairing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Lifecycle {
    Initializing = 0,
    Active = 1,
    Removing = 2,
}

impl Lifecycle {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Initializing,
            1 => Self::Active,
            _ => Self::Removing,
        }
    }
}

/// Lifecycle cell of one node. Readable anywhere; writable only with the
/// graph lock held.
pub struct NodeState(AtomicU8);

impl NodeState {
    fn new() -> Self {
        Self(AtomicU8::new(Lifecycle::Initializing as u8))
    }

    pub fn get(&self) -> Lifecycle {
        Lifecycle::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn is_active(&self) -> bool {
        self.get() == Lifecycle::Active
    }

    /// Move to `to`. The `GraphState` borrow proves the graph lock is held.
    pub(crate) fn transition(&self, _graph: &GraphState, to: Lifecycle) -> Result<(), BusError> {
        let from = self.get();
        let legal = matches!(
            (from, to),
            (Lifecycle::Initializing, Lifecycle::Active) | (Lifecycle::Active, Lifecycle::Removing)
        );
        if !legal {
            return Err(BusError::Lifecycle { from, to });
        }
        self.0.store(to as u8, Ordering::Release);
        Ok(())
    }
}

impl std::fmt::Debug for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.get())
    }
}

/// A local adapter
#[derive(Debug)]
pub struct RadioNode {
    pub handle: RadioHandle,
    /// Bus-wide instance index
    pub index: u32,
    /// Sanitised hardware name (uppercase alphanumerics, or `RADIO{index}`)
    pub hw_name: String,
    pub state: NodeState,
}

impl Drop for RadioNode {
    fn drop(&mut self) {
        trace!("free radio {} ({})", self.hw_name, self.handle);
    }
}

/// Node-locked part of a remote device
#[derive(Debug, Default)]
pub struct DeviceInner {
    pub props: DeviceProperties,
    /// The device has an LE facet; always set once services are known
    pub le: bool,
    pub services: Vec<Arc<ServiceNode>>,
    /// BLE device interface, once the PDO has been started
    pub symlink: Option<String>,
}

/// A remote device
#[derive(Debug)]
pub struct DeviceNode {
    pub handle: DeviceHandle,
    pub address: BluetoothAddress,
    pub radio_index: u32,
    /// Per-radio monotonically increasing instance index
    pub index: u32,
    pub state: NodeState,
    inner: Mutex<DeviceInner>,
}

impl DeviceNode {
    /// Take the node lock. Callers must hold a strong reference obtained
    /// under the graph lock, or the graph lock itself.
    pub fn lock(&self) -> MutexGuard<'_, DeviceInner> {
        self.inner.lock()
    }

    pub fn props(&self) -> DeviceProperties {
        self.lock().props.clone()
    }

    pub fn is_le(&self) -> bool {
        self.lock().le
    }

    pub fn is_connected(&self) -> bool {
        self.lock().props.connected()
    }

    pub fn symlink(&self) -> Option<String> {
        self.lock().symlink.clone()
    }

    /// Active services, in insertion order
    pub fn services(&self) -> Vec<Arc<ServiceNode>> {
        self.lock()
            .services
            .iter()
            .filter(|s| s.state.is_active())
            .cloned()
            .collect()
    }

    /// Find a service by UUID and attribute handle (handle 0 matches any)
    pub fn find_service(&self, uuid: &Uuid, attr: u16) -> Option<Arc<ServiceNode>> {
        self.lock()
            .services
            .iter()
            .find(|s| s.state.is_active() && &s.uuid == uuid && (attr == 0 || s.attr == attr))
            .cloned()
    }
}

impl Drop for DeviceNode {
    fn drop(&mut self) {
        trace!("free device {} ({})", self.address, self.handle);
    }
}

/// A GATT service
#[derive(Debug)]
pub struct ServiceNode {
    pub handle: ServiceHandle,
    pub uuid: Uuid,
    pub attr: u16,
    pub primary: bool,
    pub state: NodeState,
    characteristics: RwLock<Vec<Arc<CharNode>>>,
}

impl ServiceNode {
    /// Active characteristics, in insertion order
    pub fn characteristics(&self) -> Vec<Arc<CharNode>> {
        self.characteristics
            .read()
            .iter()
            .filter(|c| c.state.is_active())
            .cloned()
            .collect()
    }

    /// Active characteristics sorted by UUID (128-bit big-endian value)
    pub fn characteristics_sorted(&self) -> Vec<Arc<CharNode>> {
        let mut chars = self.characteristics();
        chars.sort_by_key(|c| c.info.uuid.as_u128());
        chars
    }

    pub fn find_characteristic(&self, attr: u16) -> Option<Arc<CharNode>> {
        self.characteristics
            .read()
            .iter()
            .find(|c| c.state.is_active() && c.info.handle == attr)
            .cloned()
    }
}

impl Drop for ServiceNode {
    fn drop(&mut self) {
        trace!("free service {} ({})", self.uuid, self.handle);
    }
}

/// A GATT characteristic
#[derive(Debug)]
pub struct CharNode {
    pub handle: CharacteristicHandle,
    pub info: CharacteristicInfo,
    pub state: NodeState,
    /// Notification value that did not fit the caller's buffer; returned
    /// first by the next READ_NOTIFICATION
    pub(crate) stash: Mutex<Option<Vec<u8>>>,
}

impl Drop for CharNode {
    fn drop(&mut self) {
        trace!("free characteristic {} ({})", self.info.uuid, self.handle);
    }
}

/// Graph-locked radio record
#[derive(Debug)]
pub struct RadioEntry {
    pub node: Arc<RadioNode>,
    pub props: RadioProperties,
    pub devices: Vec<Arc<DeviceNode>>,
    pub(crate) pending: Vec<PendingPairing>,
    pub(crate) next_device_index: u32,
}

#[derive(Debug, Default)]
pub struct GraphState {
    pub radios: Vec<RadioEntry>,
    pub(crate) next_radio_index: u32,
}

impl GraphState {
    pub fn radio(&self, index: u32) -> Option<&RadioEntry> {
        self.radios.iter().find(|r| r.node.index == index)
    }

    pub fn radio_mut(&mut self, index: u32) -> Option<&mut RadioEntry> {
        self.radios.iter_mut().find(|r| r.node.index == index)
    }

    pub fn radio_by_handle_mut(&mut self, handle: &RadioHandle) -> Option<&mut RadioEntry> {
        self.radios.iter_mut().find(|r| &r.node.handle == handle)
    }

    /// Locate a device by backend handle: (radio position, device position)
    pub fn locate_device(&self, handle: &DeviceHandle) -> Option<(usize, usize)> {
        self.radios.iter().enumerate().find_map(|(ri, r)| {
            r.devices
                .iter()
                .position(|d| &d.handle == handle)
                .map(|di| (ri, di))
        })
    }

    pub fn find_service(&self, handle: &ServiceHandle) -> Option<(Arc<DeviceNode>, Arc<ServiceNode>)> {
        for radio in &self.radios {
            for device in &radio.devices {
                let inner = device.lock();
                if let Some(s) = inner.services.iter().find(|s| &s.handle == handle) {
                    return Some((Arc::clone(device), Arc::clone(s)));
                }
            }
        }
        None
    }

    pub fn find_characteristic(
        &self,
        handle: &CharacteristicHandle,
    ) -> Option<(Arc<ServiceNode>, Arc<CharNode>)> {
        for radio in &self.radios {
            for device in &radio.devices {
                let inner = device.lock();
                for service in &inner.services {
                    let chars = service.characteristics.read();
                    if let Some(c) = chars.iter().find(|c| &c.handle == handle) {
                        return Some((Arc::clone(service), Arc::clone(c)));
                    }
                }
            }
        }
        None
    }
}

pub struct Graph {
    state: Mutex<GraphState>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GraphState::default()),
        }
    }

    /// Take the graph lock
    pub fn lock(&self) -> MutexGuard<'_, GraphState> {
        self.state.lock()
    }

    pub fn radios(&self) -> Vec<Arc<RadioNode>> {
        self.lock()
            .radios
            .iter()
            .filter(|r| r.node.state.is_active())
            .map(|r| Arc::clone(&r.node))
            .collect()
    }

    /// Earliest-inserted active radio
    pub fn first_radio(&self) -> Option<Arc<RadioNode>> {
        self.lock()
            .radios
            .iter()
            .find(|r| r.node.state.is_active())
            .map(|r| Arc::clone(&r.node))
    }

    pub fn radio(&self, index: u32) -> Option<Arc<RadioNode>> {
        let state = self.lock();
        state
            .radio(index)
            .filter(|r| r.node.state.is_active())
            .map(|r| Arc::clone(&r.node))
    }

    pub fn radio_props(&self, index: u32) -> Option<RadioProperties> {
        let state = self.lock();
        state
            .radio(index)
            .filter(|r| r.node.state.is_active())
            .map(|r| r.props.clone())
    }

    /// Active devices of a radio, in list order
    pub fn devices(&self, radio_index: u32) -> Vec<Arc<DeviceNode>> {
        let state = self.lock();
        state
            .radio(radio_index)
            .map(|r| {
                r.devices
                    .iter()
                    .filter(|d| d.state.is_active())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// `find_and_incref` by address
    pub fn device_by_address(
        &self,
        radio_index: u32,
        address: BluetoothAddress,
    ) -> Option<Arc<DeviceNode>> {
        let state = self.lock();
        state.radio(radio_index).and_then(|r| {
            r.devices
                .iter()
                .find(|d| d.state.is_active() && d.address == address)
                .cloned()
        })
    }

    /// `find_and_incref` by instance index
    pub fn device(&self, radio_index: u32, index: u32) -> Option<Arc<DeviceNode>> {
        let state = self.lock();
        state.radio(radio_index).and_then(|r| {
            r.devices
                .iter()
                .find(|d| d.state.is_active() && d.index == index)
                .cloned()
        })
    }

    /// `find_and_incref` by backend handle
    pub fn device_by_handle(&self, handle: &DeviceHandle) -> Option<Arc<DeviceNode>> {
        let state = self.lock();
        state
            .locate_device(handle)
            .map(|(ri, di)| Arc::clone(&state.radios[ri].devices[di]))
            .filter(|d| d.state.is_active())
    }
}

// Node constructors; every node starts `Initializing` with the creator's reference.

pub(crate) fn new_radio(handle: RadioHandle, index: u32, hw_name: String) -> Arc<RadioNode> {
    Arc::new(RadioNode {
        handle,
        index,
        hw_name,
        state: NodeState::new(),
    })
}

pub(crate) fn new_device(
    handle: DeviceHandle,
    radio_index: u32,
    index: u32,
    props: DeviceProperties,
) -> Arc<DeviceNode> {
    let address = props.address().unwrap_or_default();
    let le = props.le_hint();
    Arc::new(DeviceNode {
        handle,
        address,
        radio_index,
        index,
        state: NodeState::new(),
        inner: Mutex::new(DeviceInner {
            props,
            le,
            services: Vec::new(),
            symlink: None,
        }),
    })
}

pub(crate) fn new_service(handle: ServiceHandle, uuid: Uuid, attr: u16, primary: bool) -> Arc<ServiceNode> {
    Arc::new(ServiceNode {
        handle,
        uuid,
        attr,
        primary,
        state: NodeState::new(),
        characteristics: RwLock::new(Vec::new()),
    })
}

pub(crate) fn new_characteristic(handle: CharacteristicHandle, info: CharacteristicInfo) -> Arc<CharNode> {
    Arc::new(CharNode {
        handle,
        info,
        state: NodeState::new(),
        stash: Mutex::new(None),
    })
}

impl ServiceNode {
    /// Append a characteristic; rejects duplicate attribute handles.
    pub(crate) fn insert_characteristic(
        &self,
        graph: &GraphState,
        node: Arc<CharNode>,
    ) -> Result<(), BusError> {
        let mut chars = self.characteristics.write();
        if chars
            .iter()
            .any(|c| c.state.is_active() && c.info.handle == node.info.handle)
        {
            return Err(BusError::InvalidParameter(format!(
                "duplicate characteristic handle {:#06x}",
                node.info.handle
            )));
        }
        node.state.transition(graph, Lifecycle::Active)?;
        chars.push(node);
        Ok(())
    }

    pub(crate) fn remove_characteristic(
        &self,
        graph: &GraphState,
        handle: &CharacteristicHandle,
    ) -> Option<Arc<CharNode>> {
        let mut chars = self.characteristics.write();
        let pos = chars.iter().position(|c| &c.handle == handle)?;
        let node = chars.remove(pos);
        if let Err(e) = node.state.transition(graph, Lifecycle::Removing) {
            debug!("characteristic {}: {}", node.handle, e);
        }
        Some(node)
    }

    /// Mark every characteristic `Removing` (service teardown)
    pub(crate) fn retire_children(&self, graph: &GraphState) {
        for c in self.characteristics.write().drain(..) {
            if let Err(e) = c.state.transition(graph, Lifecycle::Removing) {
                debug!("characteristic {}: {}", c.handle, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bthle_unix::{device_prop, uuid_from_u16, CharacteristicProperties, NameTable};

    fn char_info(uuid: u16, handle: u16) -> CharacteristicInfo {
        CharacteristicInfo {
            uuid: uuid_from_u16(uuid),
            handle,
            value_handle: handle + 1,
            props: CharacteristicProperties::default(),
        }
    }

    #[test]
    fn test_lifecycle_transitions() {
        let graph = Graph::new();
        let names = NameTable::new();
        let node = new_radio(RadioHandle::new(names.intern("/org/bluez/hci0")), 0, "HCI0".into());
        let state = graph.lock();
        assert_eq!(node.state.get(), Lifecycle::Initializing);
        assert!(node.state.transition(&state, Lifecycle::Removing).is_err());
        node.state.transition(&state, Lifecycle::Active).unwrap();
        assert!(node.state.transition(&state, Lifecycle::Active).is_err());
        node.state.transition(&state, Lifecycle::Removing).unwrap();
        assert!(node.state.transition(&state, Lifecycle::Active).is_err());
    }

    #[test]
    fn test_characteristics_sorted_by_uuid() {
        let graph = Graph::new();
        let names = NameTable::new();
        let svc = new_service(ServiceHandle::new(names.intern("/s")), uuid_from_u16(0x180D), 1, true);
        let state = graph.lock();
        for (uuid, handle) in [(0x2A39, 0x14), (0x2A37, 0x10), (0x2A38, 0x12)] {
            let c = new_characteristic(
                CharacteristicHandle::new(names.intern(&format!("/s/char{handle:04x}"))),
                char_info(uuid, handle),
            );
            svc.insert_characteristic(&state, c).unwrap();
        }
        let dup = new_characteristic(
            CharacteristicHandle::new(names.intern("/s/dup")),
            char_info(0x2A00, 0x10),
        );
        assert!(svc.insert_characteristic(&state, dup).is_err());

        let insertion: Vec<u16> = svc.characteristics().iter().map(|c| c.info.handle).collect();
        assert_eq!(insertion, vec![0x14, 0x10, 0x12]);
        let sorted: Vec<u16> = svc.characteristics_sorted().iter().map(|c| c.info.handle).collect();
        assert_eq!(sorted, vec![0x10, 0x12, 0x14]);
    }

    #[test]
    fn test_removed_characteristics_are_retired() {
        let graph = Graph::new();
        let names = NameTable::new();
        let svc = new_service(ServiceHandle::new(names.intern("/s")), uuid_from_u16(0x180D), 1, true);
        let state = graph.lock();
        let handles: Vec<CharacteristicHandle> = [0x10u16, 0x12]
            .iter()
            .map(|h| CharacteristicHandle::new(names.intern(&format!("/s/char{h:04x}"))))
            .collect();
        for (handle, raw) in handles.iter().zip([0x10u16, 0x12]) {
            svc.insert_characteristic(&state, new_characteristic(handle.clone(), char_info(0x2A37 + raw, raw)))
                .unwrap();
        }

        let removed = svc.remove_characteristic(&state, &handles[0]).unwrap();
        assert_eq!(removed.state.get(), Lifecycle::Removing);
        assert!(svc.remove_characteristic(&state, &handles[0]).is_none());

        let kept = Arc::clone(&svc.characteristics()[0]);
        svc.retire_children(&state);
        assert_eq!(kept.state.get(), Lifecycle::Removing);
        assert!(svc.characteristics().is_empty());
    }

    #[test]
    fn test_device_le_hint() {
        let names = NameTable::new();
        let props = DeviceProperties {
            present: device_prop::ADDRESS | device_prop::LE,
            address: BluetoothAddress::from_u64(0xC034_9911_2233),
            le: true,
            ..Default::default()
        };
        let dev = new_device(DeviceHandle::new(names.intern("/d")), 0, 0, props);
        assert!(dev.is_le());
        assert_eq!(dev.address.as_u64(), 0xC034_9911_2233);
    }
}
