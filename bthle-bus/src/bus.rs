//! The bus: owns the backend connection, the object graph and the event
//! pump thread, and hands out file handles on published interfaces.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use bthle_ioctl::{DeviceIoControl, IoStatus};
use bthle_unix::{
    AuthMethod, BluetoothAddress, CharacteristicHandle, UnixConnection, UnixError,
};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::BusConfig;
use crate::error::BusError;
use crate::graph::{DeviceNode, Graph, RadioNode};
use crate::pnp::{InterfaceClass, InterfaceEvent, InterfaceRegistry, PdoId};
use crate::property_store::{PropertyKey, PropertyStore, PropertyValue};

/// A pairing prompt relayed from the backend's agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequestInfo {
    pub radio: u32,
    pub address: BluetoothAddress,
    pub method: AuthMethod,
    pub numeric_value: u32,
}

pub type AuthCallback = Arc<dyn Fn(&AuthRequestInfo) + Send + Sync>;

#[derive(Default)]
struct AuthState {
    subscribers: Vec<(u64, AuthCallback)>,
    next_id: u64,
    agent_enabled: bool,
    last: Option<AuthRequestInfo>,
}

pub struct Bus {
    pub(crate) conn: Arc<UnixConnection>,
    pub(crate) config: BusConfig,
    pub(crate) graph: Graph,
    pub(crate) interfaces: InterfaceRegistry,
    pub(crate) properties: PropertyStore,
    running: AtomicBool,
    applied: AtomicU64,
    pump: Mutex<Option<JoinHandle<()>>>,
    next_token: AtomicU64,
    open_handles: Mutex<HashMap<PdoId, usize>>,
    auth: Mutex<AuthState>,
}

impl Bus {
    /// Take over an initialised backend connection and start the event pump.
    pub fn start(conn: Arc<UnixConnection>, config: BusConfig) -> Result<Arc<Self>, BusError> {
        if !conn.is_initialized() {
            return Err(BusError::Backend(UnixError::NotSupported));
        }
        let bus = Arc::new(Self {
            conn: Arc::clone(&conn),
            config,
            graph: Graph::new(),
            interfaces: InterfaceRegistry::new(),
            properties: PropertyStore::new(),
            running: AtomicBool::new(true),
            applied: AtomicU64::new(0),
            pump: Mutex::new(None),
            next_token: AtomicU64::new(1),
            open_handles: Mutex::new(HashMap::new()),
            auth: Mutex::new(AuthState::default()),
        });

        let weak = Arc::downgrade(&bus);
        let handle = std::thread::Builder::new()
            .name("bthle-event-pump".into())
            .spawn(move || event_pump_loop(conn, weak))?;
        *bus.pump.lock() = Some(handle);
        info!("bus started");
        Ok(bus)
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn connection(&self) -> &Arc<UnixConnection> {
        &self.conn
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Number of backend events the pump has processed
    pub fn events_applied(&self) -> u64 {
        self.applied.load(Ordering::Acquire)
    }

    /// Stop the pump and release the backend. Idempotent.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.conn.shutdown();
        let handle = self.pump.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
        info!("bus stopped");
    }

    pub(crate) fn next_pairing_token(&self) -> u64 {
        self.next_token.fetch_add(1, Ordering::Relaxed)
    }

    // Device-interface namespace

    /// Enabled interface paths of one class
    pub fn interfaces(&self, class: InterfaceClass) -> Vec<String> {
        self.interfaces.list(class)
    }

    /// Enabled interface paths for a class GUID
    pub fn interfaces_by_guid(&self, guid: &Uuid) -> Vec<String> {
        InterfaceClass::from_guid(guid)
            .map(|class| self.interfaces.list(class))
            .unwrap_or_default()
    }

    pub fn subscribe_interfaces(&self) -> broadcast::Receiver<InterfaceEvent> {
        self.interfaces.subscribe()
    }

    pub fn device_property(&self, pdo: PdoId, key: PropertyKey) -> Option<PropertyValue> {
        self.properties.get(pdo, key)
    }

    /// Open an interface path, like `CreateFile` on a device symlink.
    pub fn open(self: &Arc<Self>, symlink: &str) -> Result<FileHandle, BusError> {
        let info = self
            .interfaces
            .lookup(symlink)
            .ok_or_else(|| BusError::NotFound(symlink.to_string()))?;
        debug!("open {} -> {}", symlink, info.pdo);
        Ok(FileHandle::new(Arc::clone(self), info.pdo))
    }

    /// Open file handles routed to a PDO
    pub fn open_count(&self, pdo: PdoId) -> usize {
        self.open_handles.lock().get(&pdo).copied().unwrap_or(0)
    }

    fn track_open(&self, pdo: PdoId) {
        *self.open_handles.lock().entry(pdo).or_insert(0) += 1;
    }

    fn track_close(&self, pdo: PdoId) {
        let mut handles = self.open_handles.lock();
        if let Some(n) = handles.get_mut(&pdo) {
            *n -= 1;
            if *n == 0 {
                handles.remove(&pdo);
            }
        }
    }

    pub(crate) fn radio_node(&self, pdo: PdoId) -> Option<Arc<RadioNode>> {
        match pdo {
            PdoId::Radio(index) => self.graph.radio(index),
            PdoId::Device { .. } => None,
        }
    }

    pub(crate) fn device_node(&self, pdo: PdoId) -> Option<Arc<DeviceNode>> {
        match pdo {
            PdoId::Device { radio, index } => self.graph.device(radio, index),
            PdoId::Radio(_) => None,
        }
    }

    /// The backend's unique name for a radio
    pub fn radio_unique_name(&self, radio: u32) -> Result<String, BusError> {
        let node = self
            .graph
            .radio(radio)
            .ok_or_else(|| BusError::NotFound(format!("radio {radio}")))?;
        Ok(self.conn.radio_unique_name(&node.handle)?)
    }

    // Pairing prompts

    /// Subscribe to pairing prompts. The first subscription enables the
    /// backend agent for incoming requests.
    pub fn register_for_authentication(
        self: &Arc<Self>,
        callback: AuthCallback,
    ) -> Result<AuthRegistration, BusError> {
        let enable = {
            let auth = self.auth.lock();
            !auth.agent_enabled
        };
        if enable {
            self.conn.auth_agent_enable_incoming()?;
        }
        let mut auth = self.auth.lock();
        auth.agent_enabled = true;
        let id = auth.next_id;
        auth.next_id += 1;
        auth.subscribers.push((id, callback));
        debug!("auth subscriber {} registered", id);
        Ok(AuthRegistration {
            bus: Arc::downgrade(self),
            id,
        })
    }

    /// Most recent pairing prompt
    pub fn last_auth_request(&self) -> Option<AuthRequestInfo> {
        self.auth.lock().last.clone()
    }

    pub(crate) fn deliver_auth_request(&self, info: AuthRequestInfo) {
        let subscribers: Vec<AuthCallback> = {
            let mut auth = self.auth.lock();
            auth.last = Some(info.clone());
            auth.subscribers.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };
        if subscribers.is_empty() {
            debug!("auth request for {} with no subscribers", info.address);
        }
        for callback in subscribers {
            callback(&info);
        }
    }
}

impl Drop for Bus {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Serial consumer of backend events
fn event_pump_loop(conn: Arc<UnixConnection>, bus: Weak<Bus>) {
    debug!("event pump running");
    loop {
        let event = match conn.get_event() {
            Ok(event) => event,
            Err(UnixError::Shutdown) | Err(UnixError::NotSupported) => break,
            Err(e) => {
                warn!("get_event failed: {}", e);
                let Some(bus) = bus.upgrade() else {
                    break;
                };
                std::thread::sleep(bus.config().notify_retry());
                continue;
            }
        };
        let Some(bus) = bus.upgrade() else {
            break;
        };
        let kind = event.kind();
        if let Err(e) = bus.apply_event(event) {
            warn!("failed to apply {}: {}", kind, e);
        }
        bus.applied.fetch_add(1, Ordering::AcqRel);
    }
    debug!("event pump exits");
}

/// Keeps a pairing-prompt subscription alive
pub struct AuthRegistration {
    bus: Weak<Bus>,
    id: u64,
}

impl Drop for AuthRegistration {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.auth.lock().subscribers.retain(|(id, _)| *id != self.id);
        }
    }
}

/// An open device-interface file
pub struct FileHandle {
    bus: Arc<Bus>,
    pdo: PdoId,
    /// Characteristics with a READ_NOTIFICATION blocked on this handle
    inflight: Mutex<Vec<CharacteristicHandle>>,
}

impl FileHandle {
    fn new(bus: Arc<Bus>, pdo: PdoId) -> Self {
        bus.track_open(pdo);
        Self {
            bus,
            pdo,
            inflight: Mutex::new(Vec::new()),
        }
    }

    pub fn pdo(&self) -> PdoId {
        self.pdo
    }

    pub fn bus(&self) -> &Arc<Bus> {
        &self.bus
    }

    /// Independent handle on the same PDO
    pub fn duplicate(&self) -> FileHandle {
        FileHandle::new(Arc::clone(&self.bus), self.pdo)
    }

    /// Cancel this handle's blocked READ_NOTIFICATION requests
    pub fn cancel_io(&self) {
        let inflight = self.inflight.lock().clone();
        for characteristic in inflight {
            self.bus.conn.cancel_read_notification(&characteristic);
        }
    }

    pub(crate) fn begin_read(&self, characteristic: &CharacteristicHandle) {
        self.inflight.lock().push(characteristic.clone());
    }

    pub(crate) fn end_read(&self, characteristic: &CharacteristicHandle) {
        let mut inflight = self.inflight.lock();
        if let Some(pos) = inflight.iter().position(|c| c == characteristic) {
            inflight.remove(pos);
        }
    }
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle")
            .field("pdo", &self.pdo)
            .field("inflight", &self.inflight.lock().len())
            .finish()
    }
}

impl DeviceIoControl for FileHandle {
    fn device_io_control(&self, code: u32, input: &[u8], output: &mut [u8]) -> IoStatus {
        self.bus.dispatch(self, code, input, output)
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        self.bus.track_close(self.pdo);
    }
}
