//! In-memory host BLE backend
//!
//! Behaves like a BlueZ adapter: object paths look like
//! `/org/bluez/hci0/dev_C0_34_99_11_22_33/service0001/char0010`, cached
//! devices are announced with `init_entry` on init, and connecting a device
//! runs service discovery which is reported as a burst of events.
//!
//! Tests script the host through the `add_*`, `notify` and `set_*` methods and
//! inspect the command log afterwards.

mod host;

pub use host::{SimAdapterDesc, SimCharacteristicDesc, SimDeviceDesc, SimHost, SimServiceDesc};

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::backend::{Backend, UnixFunc};
use crate::error::UnixError;
use crate::event::Event;
use crate::name::{CharacteristicHandle, DeviceHandle, NameTable, RadioHandle, ServiceHandle};
use crate::types::{
    device_prop, radio_prop, AuthMethod, BluetoothAddress, CharacteristicInfo,
    CharacteristicProperties, DeviceProperties, PairingToken, PropMask, RadioPropValue,
    RadioProperties, WriteType,
};

/// One entry of the command log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimCommand {
    pub func: UnixFunc,
    /// Canonical name of the target object (empty for global commands)
    pub target: String,
}

struct SimCharacteristic {
    handle: CharacteristicHandle,
    info: CharacteristicInfo,
    value: Vec<u8>,
    notifying: bool,
    pending: VecDeque<Vec<u8>>,
    /// Values queued automatically whenever notifications get enabled
    scripted: Vec<Vec<u8>>,
    cancel_gen: u64,
}

struct SimService {
    handle: ServiceHandle,
    uuid: Uuid,
    primary: bool,
    attr: u16,
    characteristics: Vec<SimCharacteristic>,
}

struct PendingAuth {
    method: AuthMethod,
    value: u32,
    token: Option<PairingToken>,
}

struct SimDevice {
    handle: DeviceHandle,
    radio: RadioHandle,
    props: DeviceProperties,
    services: Vec<SimService>,
    /// Services have been reported to the client
    resolved: bool,
    auth: Option<(AuthMethod, u32)>,
    pending_auth: Option<PendingAuth>,
}

struct SimAdapter {
    handle: RadioHandle,
    path: String,
    unique: String,
    props: RadioProperties,
}

#[derive(Default)]
struct SimState {
    initialized: bool,
    shutdown: bool,
    events: VecDeque<Event>,
    delivered: u64,
    adapters: Vec<SimAdapter>,
    devices: Vec<SimDevice>,
    agent_incoming: bool,
    failures: HashMap<UnixFunc, UnixError>,
    commands: Vec<SimCommand>,
    next_path: u32,
}

impl SimState {
    fn emit(&mut self, event: Event) {
        trace!("sim event {}", event.kind());
        if self.initialized {
            self.events.push_back(event);
        }
    }

    fn log(&mut self, func: UnixFunc, target: &str) {
        self.commands.push(SimCommand {
            func,
            target: target.to_string(),
        });
    }

    fn take_failure(&mut self, func: UnixFunc) -> Result<(), UnixError> {
        match self.failures.remove(&func) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn adapter_mut(&mut self, radio: &RadioHandle) -> Result<&mut SimAdapter, UnixError> {
        self.adapters
            .iter_mut()
            .find(|a| &a.handle == radio)
            .ok_or_else(|| UnixError::NotFound(radio.to_string()))
    }

    fn device_mut(&mut self, device: &DeviceHandle) -> Result<&mut SimDevice, UnixError> {
        self.devices
            .iter_mut()
            .find(|d| &d.handle == device)
            .ok_or_else(|| UnixError::NotFound(device.to_string()))
    }

    /// Locate a characteristic together with its device's connection state
    fn characteristic_mut(
        &mut self,
        characteristic: &CharacteristicHandle,
    ) -> Result<(bool, &mut SimCharacteristic), UnixError> {
        for device in &mut self.devices {
            let connected = device.props.connected();
            for service in &mut device.services {
                if let Some(c) = service
                    .characteristics
                    .iter_mut()
                    .find(|c| &c.handle == characteristic)
                {
                    return Ok((connected, c));
                }
            }
        }
        Err(UnixError::NotFound(characteristic.to_string()))
    }

    fn set_device_flag(&mut self, index: usize, bit: PropMask, value: bool) {
        let device = &mut self.devices[index];
        let mut update = DeviceProperties {
            present: bit,
            ..Default::default()
        };
        match bit {
            b if b == device_prop::CONNECTED => update.connected = value,
            b if b == device_prop::PAIRED => update.paired = value,
            b if b == device_prop::TRUSTED => update.trusted = value,
            _ => return,
        }
        let moved = device.props.merge(bit, &update, PropMask::EMPTY);
        if moved.is_empty() {
            return;
        }
        let event = Event::DevicePropsChanged {
            device: device.handle.clone(),
            changed: bit,
            props: update,
            invalidated: PropMask::EMPTY,
        };
        self.emit(event);
    }

    fn discovery_events(device: &SimDevice) -> Vec<Event> {
        let mut events = Vec::new();
        for service in &device.services {
            events.push(Event::GattServiceAdded {
                device: device.handle.clone(),
                service: service.handle.clone(),
                uuid: service.uuid,
                primary: service.primary,
                handle: service.attr,
            });
            for c in &service.characteristics {
                events.push(Event::GattCharacteristicAdded {
                    service: service.handle.clone(),
                    characteristic: c.handle.clone(),
                    info: c.info.clone(),
                });
            }
        }
        events
    }

    fn resolve_services(&mut self, index: usize) {
        if self.devices[index].resolved {
            return;
        }
        self.devices[index].resolved = true;
        for event in Self::discovery_events(&self.devices[index]) {
            self.emit(event);
        }
    }

    fn finish_pairing(&mut self, index: usize, token: Option<PairingToken>, result: Result<(), UnixError>) {
        if result.is_ok() {
            self.set_device_flag(index, device_prop::PAIRED, true);
        }
        if let Some(token) = token {
            self.emit(Event::PairingFinished { token, result });
        }
    }
}

/// Simulated host backend
pub struct SimBackend {
    names: Arc<NameTable>,
    state: Mutex<SimState>,
    events_cv: Condvar,
    notify_cv: Condvar,
}

impl SimBackend {
    pub fn new(names: Arc<NameTable>) -> Self {
        Self {
            names,
            state: Mutex::new(SimState::default()),
            events_cv: Condvar::new(),
            notify_cv: Condvar::new(),
        }
    }

    pub fn names(&self) -> &Arc<NameTable> {
        &self.names
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut SimState) -> R) -> R {
        let mut state = self.state.lock();
        let had = state.events.len();
        let r = f(&mut *state);
        if state.events.len() != had {
            self.events_cv.notify_all();
        }
        r
    }

    /// Add a local adapter; announced immediately if the backend is running.
    pub fn add_adapter(&self, unique: &str, address: BluetoothAddress) -> RadioHandle {
        let path = format!("/org/bluez/{unique}");
        let handle = RadioHandle::new(self.names.intern(&path));
        let props = RadioProperties {
            present: radio_prop::ALL,
            address,
            name: unique.to_string(),
            class: 0x00_010C,
            manufacturer: 0x0002,
            version: 0x0A,
            discoverable: false,
            connectable: true,
            pairable: true,
            discovering: false,
        };
        self.with_state(|state| {
            state.emit(Event::RadioAdded {
                radio: handle.clone(),
                props: props.clone(),
            });
            state.adapters.push(SimAdapter {
                handle: handle.clone(),
                path,
                unique: unique.to_string(),
                props,
            });
        });
        handle
    }

    /// Override the alias advertised for an adapter
    pub fn set_adapter_alias(&self, radio: &RadioHandle, alias: &str) -> Result<(), UnixError> {
        self.with_state(|state| {
            let adapter = state.adapter_mut(radio)?;
            adapter.props.name = alias.to_string();
            let update = RadioProperties {
                present: radio_prop::NAME,
                name: alias.to_string(),
                ..Default::default()
            };
            let radio = adapter.handle.clone();
            state.emit(Event::RadioPropsChanged {
                radio,
                changed: radio_prop::NAME,
                props: update,
                invalidated: PropMask::EMPTY,
            });
            Ok(())
        })
    }

    pub fn remove_adapter(&self, radio: &RadioHandle) {
        self.with_state(|state| {
            state.devices.retain(|d| &d.radio != radio);
            if let Some(pos) = state.adapters.iter().position(|a| &a.handle == radio) {
                let adapter = state.adapters.remove(pos);
                state.emit(Event::RadioRemoved {
                    radio: adapter.handle,
                });
            }
        })
    }

    /// Add a remote device seen by `radio`. Every call mints a new backend
    /// handle, even for an address that is already known.
    pub fn add_device(
        &self,
        radio: &RadioHandle,
        address: BluetoothAddress,
        name: Option<&str>,
    ) -> Result<DeviceHandle, UnixError> {
        self.with_state(|state| {
            let base = format!(
                "{}/dev_{}",
                state.adapter_mut(radio)?.path,
                address.to_string().replace(':', "_")
            );
            let exists = state.devices.iter().any(|d| {
                d.handle.name().as_str() == NameTable::canonicalize(&base)
            });
            let path = if exists {
                state.next_path += 1;
                format!("{base}_{}", state.next_path)
            } else {
                base
            };
            let handle = DeviceHandle::new(self.names.intern(&path));
            let mut props = DeviceProperties {
                present: device_prop::ADDRESS
                    | device_prop::CLASS
                    | device_prop::CONNECTED
                    | device_prop::PAIRED
                    | device_prop::TRUSTED
                    | device_prop::LEGACY_PAIRING,
                address,
                ..Default::default()
            };
            if let Some(name) = name {
                props.present.insert(device_prop::NAME);
                props.name = name.to_string();
            }
            state.emit(Event::DeviceAdded {
                radio: radio.clone(),
                device: handle.clone(),
                props: props.clone(),
                init_entry: false,
            });
            state.devices.push(SimDevice {
                handle: handle.clone(),
                radio: radio.clone(),
                props,
                services: Vec::new(),
                resolved: false,
                auth: None,
                pending_auth: None,
            });
            Ok(handle)
        })
    }

    pub fn remove_device(&self, device: &DeviceHandle) {
        self.with_state(|state| {
            if let Some(pos) = state.devices.iter().position(|d| &d.handle == device) {
                let removed = state.devices.remove(pos);
                state.emit(Event::DeviceRemoved {
                    device: removed.handle,
                });
            }
        })
    }

    /// Add a GATT service to a device's database. Reported right away only
    /// once the device's services have been resolved.
    pub fn add_service(
        &self,
        device: &DeviceHandle,
        uuid: Uuid,
        attr: u16,
        primary: bool,
    ) -> Result<ServiceHandle, UnixError> {
        self.with_state(|state| {
            let dev = state.device_mut(device)?;
            let path = format!("{}/service{attr:04x}", dev.handle.name().as_str());
            let handle = ServiceHandle::new(self.names.intern(&path));
            dev.services.push(SimService {
                handle: handle.clone(),
                uuid,
                primary,
                attr,
                characteristics: Vec::new(),
            });
            if dev.resolved {
                let event = Event::GattServiceAdded {
                    device: dev.handle.clone(),
                    service: handle.clone(),
                    uuid,
                    primary,
                    handle: attr,
                };
                state.emit(event);
            }
            Ok(handle)
        })
    }

    pub fn add_characteristic(
        &self,
        service: &ServiceHandle,
        info: CharacteristicInfo,
        value: &[u8],
    ) -> Result<CharacteristicHandle, UnixError> {
        self.with_state(|state| {
            let mut found = None;
            for device in &mut state.devices {
                let resolved = device.resolved;
                if let Some(svc) = device.services.iter_mut().find(|s| &s.handle == service) {
                    let path = format!("{}/char{:04x}", svc.handle.name().as_str(), info.handle);
                    let handle = CharacteristicHandle::new(self.names.intern(&path));
                    svc.characteristics.push(SimCharacteristic {
                        handle: handle.clone(),
                        info: info.clone(),
                        value: value.to_vec(),
                        notifying: false,
                        pending: VecDeque::new(),
                        scripted: Vec::new(),
                        cancel_gen: 0,
                    });
                    found = Some((handle, resolved));
                    break;
                }
            }
            let (handle, resolved) = found.ok_or_else(|| UnixError::NotFound(service.to_string()))?;
            if resolved {
                state.emit(Event::GattCharacteristicAdded {
                    service: service.clone(),
                    characteristic: handle.clone(),
                    info,
                });
            }
            Ok(handle)
        })
    }

    /// Report the device's services now (as after a completed discovery).
    pub fn resolve_services(&self, device: &DeviceHandle) -> Result<(), UnixError> {
        self.with_state(|state| {
            let index = state
                .devices
                .iter()
                .position(|d| &d.handle == device)
                .ok_or_else(|| UnixError::NotFound(device.to_string()))?;
            state.resolve_services(index);
            Ok(())
        })
    }

    /// Mark a device's services as known before `init`, so `init` reports them.
    pub fn set_cached(&self, device: &DeviceHandle) -> Result<(), UnixError> {
        self.with_state(|state| {
            let dev = state.device_mut(device)?;
            dev.resolved = true;
            Ok(())
        })
    }

    pub fn set_connected(&self, device: &DeviceHandle, connected: bool) -> Result<(), UnixError> {
        self.set_flag(device, device_prop::CONNECTED, connected)
    }

    pub fn set_paired(&self, device: &DeviceHandle, paired: bool) -> Result<(), UnixError> {
        self.set_flag(device, device_prop::PAIRED, paired)
    }

    fn set_flag(&self, device: &DeviceHandle, bit: PropMask, value: bool) -> Result<(), UnixError> {
        self.with_state(|state| {
            let index = state
                .devices
                .iter()
                .position(|d| &d.handle == device)
                .ok_or_else(|| UnixError::NotFound(device.to_string()))?;
            state.set_device_flag(index, bit, value);
            Ok(())
        })
    }

    pub fn set_device_name(&self, device: &DeviceHandle, name: &str) -> Result<(), UnixError> {
        self.with_state(|state| {
            let dev = state.device_mut(device)?;
            let update = DeviceProperties {
                present: device_prop::NAME,
                name: name.to_string(),
                ..Default::default()
            };
            dev.props.merge(device_prop::NAME, &update, PropMask::EMPTY);
            let device = dev.handle.clone();
            state.emit(Event::DevicePropsChanged {
                device,
                changed: device_prop::NAME,
                props: update,
                invalidated: PropMask::EMPTY,
            });
            Ok(())
        })
    }

    /// Require user confirmation when pairing `device`.
    pub fn require_auth(
        &self,
        device: &DeviceHandle,
        method: AuthMethod,
        value: u32,
    ) -> Result<(), UnixError> {
        self.with_state(|state| {
            state.device_mut(device)?.auth = Some((method, value));
            Ok(())
        })
    }

    /// Deliver a notification. Dropped unless notifications are enabled.
    pub fn notify(&self, characteristic: &CharacteristicHandle, value: &[u8]) -> bool {
        let mut state = self.state.lock();
        match state.characteristic_mut(characteristic) {
            Ok((_, c)) if c.notifying => {
                c.pending.push_back(value.to_vec());
                self.notify_cv.notify_all();
                true
            }
            _ => false,
        }
    }

    /// Values to deliver each time notifications are enabled
    pub fn script_notifications(
        &self,
        characteristic: &CharacteristicHandle,
        values: Vec<Vec<u8>>,
    ) -> Result<(), UnixError> {
        let mut state = self.state.lock();
        let (_, c) = state.characteristic_mut(characteristic)?;
        c.scripted = values;
        Ok(())
    }

    pub fn characteristic_value(&self, characteristic: &CharacteristicHandle) -> Option<Vec<u8>> {
        let mut state = self.state.lock();
        state
            .characteristic_mut(characteristic)
            .ok()
            .map(|(_, c)| c.value.clone())
    }

    pub fn is_notifying(&self, characteristic: &CharacteristicHandle) -> bool {
        let mut state = self.state.lock();
        state
            .characteristic_mut(characteristic)
            .map(|(_, c)| c.notifying)
            .unwrap_or(false)
    }

    /// Make the next call of `func` fail with `err`.
    pub fn fail_next(&self, func: UnixFunc, err: UnixError) {
        self.state.lock().failures.insert(func, err);
    }

    /// Queue an arbitrary event.
    pub fn push_event(&self, event: Event) {
        self.with_state(|state| state.emit(event));
    }

    pub fn commands(&self) -> Vec<SimCommand> {
        self.state.lock().commands.clone()
    }

    /// Number of logged calls of `func`
    pub fn command_count(&self, func: UnixFunc) -> usize {
        self.state
            .lock()
            .commands
            .iter()
            .filter(|c| c.func == func)
            .count()
    }

    pub fn clear_commands(&self) {
        self.state.lock().commands.clear();
    }

    /// Events queued but not yet taken by `get_event`
    pub fn pending_events(&self) -> usize {
        self.state.lock().events.len()
    }

    /// Events handed out by `get_event` so far
    pub fn delivered_events(&self) -> u64 {
        self.state.lock().delivered
    }

    pub fn incoming_auth_enabled(&self) -> bool {
        self.state.lock().agent_incoming
    }
}

impl Backend for SimBackend {
    fn init(&self) -> Result<(), UnixError> {
        self.with_state(|state| {
            state.log(UnixFunc::Init, "");
            state.take_failure(UnixFunc::Init)?;
            state.initialized = true;
            state.shutdown = false;
            let mut events = Vec::new();
            for adapter in &state.adapters {
                events.push(Event::RadioAdded {
                    radio: adapter.handle.clone(),
                    props: adapter.props.clone(),
                });
            }
            for device in &state.devices {
                events.push(Event::DeviceAdded {
                    radio: device.radio.clone(),
                    device: device.handle.clone(),
                    props: device.props.clone(),
                    init_entry: true,
                });
                if device.resolved {
                    events.extend(SimState::discovery_events(device));
                }
            }
            debug!("sim backend init: {} startup events", events.len());
            for event in events {
                state.emit(event);
            }
            Ok(())
        })
    }

    fn shutdown(&self) {
        let mut state = self.state.lock();
        state.log(UnixFunc::Shutdown, "");
        state.shutdown = true;
        state.initialized = false;
        self.events_cv.notify_all();
        self.notify_cv.notify_all();
    }

    fn adapter_set_prop(&self, radio: &RadioHandle, value: RadioPropValue) -> Result<(), UnixError> {
        self.with_state(|state| {
            state.log(UnixFunc::AdapterSetProp, radio.name().as_str());
            state.take_failure(UnixFunc::AdapterSetProp)?;
            let adapter = state.adapter_mut(radio)?;
            let mut update = RadioProperties::default();
            let bit = match value {
                RadioPropValue::Discoverable(v) => {
                    update.discoverable = v;
                    radio_prop::DISCOVERABLE
                }
                RadioPropValue::Connectable(v) => {
                    update.connectable = v;
                    radio_prop::CONNECTABLE
                }
                RadioPropValue::Pairable(v) => {
                    update.pairable = v;
                    radio_prop::PAIRABLE
                }
            };
            update.present = bit;
            adapter.props.merge(bit, &update, PropMask::EMPTY);
            let radio = adapter.handle.clone();
            state.emit(Event::RadioPropsChanged {
                radio,
                changed: bit,
                props: update,
                invalidated: PropMask::EMPTY,
            });
            Ok(())
        })
    }

    fn adapter_unique_name(&self, radio: &RadioHandle) -> Result<String, UnixError> {
        self.with_state(|state| {
            state.log(UnixFunc::AdapterGetUniqueName, radio.name().as_str());
            state.take_failure(UnixFunc::AdapterGetUniqueName)?;
            Ok(state.adapter_mut(radio)?.unique.clone())
        })
    }

    fn adapter_start_discovery(&self, radio: &RadioHandle) -> Result<(), UnixError> {
        self.set_discovering(radio, UnixFunc::AdapterStartDiscovery, true)
    }

    fn adapter_stop_discovery(&self, radio: &RadioHandle) -> Result<(), UnixError> {
        self.set_discovering(radio, UnixFunc::AdapterStopDiscovery, false)
    }

    fn adapter_remove_device(&self, radio: &RadioHandle, device: &DeviceHandle) -> Result<(), UnixError> {
        self.with_state(|state| {
            state.log(UnixFunc::AdapterRemoveDevice, device.name().as_str());
            state.take_failure(UnixFunc::AdapterRemoveDevice)?;
            let pos = state
                .devices
                .iter()
                .position(|d| &d.handle == device && &d.radio == radio)
                .ok_or_else(|| UnixError::NotFound(device.to_string()))?;
            let removed = state.devices.remove(pos);
            state.emit(Event::DeviceRemoved {
                device: removed.handle,
            });
            Ok(())
        })
    }

    fn device_disconnect(&self, device: &DeviceHandle) -> Result<(), UnixError> {
        self.with_state(|state| {
            state.log(UnixFunc::DeviceDisconnect, device.name().as_str());
            state.take_failure(UnixFunc::DeviceDisconnect)?;
            let index = state
                .devices
                .iter()
                .position(|d| &d.handle == device)
                .ok_or_else(|| UnixError::NotFound(device.to_string()))?;
            state.set_device_flag(index, device_prop::CONNECTED, false);
            Ok(())
        })
    }

    fn device_start_pairing(
        &self,
        device: &DeviceHandle,
        token: Option<PairingToken>,
    ) -> Result<(), UnixError> {
        self.with_state(|state| {
            state.log(UnixFunc::DeviceStartPairing, device.name().as_str());
            state.take_failure(UnixFunc::DeviceStartPairing)?;
            let index = state
                .devices
                .iter()
                .position(|d| &d.handle == device)
                .ok_or_else(|| UnixError::NotFound(device.to_string()))?;
            state.set_device_flag(index, device_prop::CONNECTED, true);
            state.resolve_services(index);
            if token.is_none() && state.devices[index].props.paired() {
                return Ok(());
            }
            let auth = state.devices[index].auth;
            match auth {
                Some((method, value)) => {
                    state.devices[index].pending_auth = Some(PendingAuth {
                        method,
                        value,
                        token,
                    });
                    let device = state.devices[index].handle.clone();
                    state.emit(Event::AuthRequest {
                        device,
                        method,
                        numeric_value: value,
                    });
                }
                None if token.is_some() => state.finish_pairing(index, token, Ok(())),
                None => {}
            }
            Ok(())
        })
    }

    fn auth_agent_enable_incoming(&self) -> Result<(), UnixError> {
        self.with_state(|state| {
            state.log(UnixFunc::AuthAgentEnableIncoming, "");
            state.take_failure(UnixFunc::AuthAgentEnableIncoming)?;
            state.agent_incoming = true;
            Ok(())
        })
    }

    fn auth_send_response(
        &self,
        device: &DeviceHandle,
        method: AuthMethod,
        numeric_value_or_passkey: u32,
        negative: bool,
    ) -> Result<bool, UnixError> {
        self.with_state(|state| {
            state.log(UnixFunc::AuthSendResponse, device.name().as_str());
            state.take_failure(UnixFunc::AuthSendResponse)?;
            let index = state
                .devices
                .iter()
                .position(|d| &d.handle == device)
                .ok_or_else(|| UnixError::NotFound(device.to_string()))?;
            let pending = state.devices[index]
                .pending_auth
                .take()
                .ok_or_else(|| UnixError::InvalidParameter("no authentication in progress".into()))?;
            if pending.method != method {
                state.devices[index].pending_auth = Some(pending);
                return Err(UnixError::InvalidParameter(format!("unexpected method {method:?}")));
            }
            let accepted = !negative
                && (method != AuthMethod::Passkey || numeric_value_or_passkey == pending.value);
            let result = if accepted {
                Ok(())
            } else {
                Err(UnixError::AccessDenied("authentication rejected".into()))
            };
            state.finish_pairing(index, pending.token, result);
            Ok(accepted)
        })
    }

    fn characteristic_read(&self, characteristic: &CharacteristicHandle) -> Result<Vec<u8>, UnixError> {
        let mut state = self.state.lock();
        state.log(UnixFunc::GattCharacteristicRead, characteristic.name().as_str());
        state.take_failure(UnixFunc::GattCharacteristicRead)?;
        let (connected, c) = state.characteristic_mut(characteristic)?;
        if !connected {
            return Err(UnixError::DeviceNotConnected);
        }
        if !c.info.props.read {
            return Err(UnixError::AccessDenied("characteristic is not readable".into()));
        }
        Ok(c.value.clone())
    }

    fn characteristic_write(
        &self,
        characteristic: &CharacteristicHandle,
        value: &[u8],
        write_type: WriteType,
    ) -> Result<(), UnixError> {
        let mut state = self.state.lock();
        state.log(UnixFunc::GattCharacteristicWrite, characteristic.name().as_str());
        state.take_failure(UnixFunc::GattCharacteristicWrite)?;
        let (connected, c) = state.characteristic_mut(characteristic)?;
        if !connected {
            return Err(UnixError::DeviceNotConnected);
        }
        let allowed = match write_type {
            WriteType::WithResponse => c.info.props.write,
            WriteType::WithoutResponse => c.info.props.write_without_response || c.info.props.write,
        };
        if !allowed {
            return Err(UnixError::AccessDenied("characteristic is not writable".into()));
        }
        c.value = value.to_vec();
        Ok(())
    }

    fn characteristic_set_notify(
        &self,
        characteristic: &CharacteristicHandle,
        enable: bool,
    ) -> Result<(), UnixError> {
        let mut state = self.state.lock();
        state.log(UnixFunc::GattCharacteristicSetNotify, characteristic.name().as_str());
        state.take_failure(UnixFunc::GattCharacteristicSetNotify)?;
        let (connected, c) = state.characteristic_mut(characteristic)?;
        if !connected {
            return Err(UnixError::DeviceNotConnected);
        }
        if !(c.info.props.notify || c.info.props.indicate) {
            return Err(UnixError::AccessDenied("characteristic cannot notify".into()));
        }
        if enable && !c.notifying {
            let scripted = c.scripted.clone();
            c.pending.extend(scripted);
        }
        if !enable {
            c.pending.clear();
        }
        c.notifying = enable;
        self.notify_cv.notify_all();
        Ok(())
    }

    fn characteristic_read_notification(
        &self,
        characteristic: &CharacteristicHandle,
        timeout: Duration,
    ) -> Result<Vec<u8>, UnixError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        state.take_failure(UnixFunc::GattCharacteristicReadNotification)?;
        let start_gen = state.characteristic_mut(characteristic)?.1.cancel_gen;
        loop {
            if state.shutdown {
                return Err(UnixError::Shutdown);
            }
            let (_, c) = state.characteristic_mut(characteristic)?;
            if c.cancel_gen != start_gen {
                return Err(UnixError::Cancelled);
            }
            if let Some(value) = c.pending.pop_front() {
                return Ok(value);
            }
            if self.notify_cv.wait_until(&mut state, deadline).timed_out() {
                return Err(UnixError::Timeout);
            }
        }
    }

    fn cancel_read_notification(&self, characteristic: &CharacteristicHandle) {
        let mut state = self.state.lock();
        if let Ok((_, c)) = state.characteristic_mut(characteristic) {
            c.cancel_gen += 1;
            self.notify_cv.notify_all();
        }
    }

    fn get_event(&self) -> Result<Event, UnixError> {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return Err(UnixError::Shutdown);
            }
            state.take_failure(UnixFunc::GetEvent)?;
            if let Some(event) = state.events.pop_front() {
                state.delivered += 1;
                return Ok(event);
            }
            self.events_cv.wait(&mut state);
        }
    }
}

impl SimBackend {
    fn set_discovering(&self, radio: &RadioHandle, func: UnixFunc, on: bool) -> Result<(), UnixError> {
        self.with_state(|state| {
            state.log(func, radio.name().as_str());
            state.take_failure(func)?;
            let adapter = state.adapter_mut(radio)?;
            if adapter.props.discovering == on {
                return Ok(());
            }
            let update = RadioProperties {
                present: radio_prop::DISCOVERING,
                discovering: on,
                ..Default::default()
            };
            adapter.props.merge(radio_prop::DISCOVERING, &update, PropMask::EMPTY);
            let radio = adapter.handle.clone();
            state.emit(Event::RadioPropsChanged {
                radio,
                changed: radio_prop::DISCOVERING,
                props: update,
                invalidated: PropMask::EMPTY,
            });
            Ok(())
        })
    }
}

/// Convenience constructor for characteristic descriptors
pub fn characteristic(uuid: Uuid, handle: u16, props: &[&str]) -> Result<CharacteristicInfo, UnixError> {
    let mut caps = CharacteristicProperties::default();
    for p in props {
        caps.set_by_name(p)?;
    }
    Ok(CharacteristicInfo {
        uuid,
        handle,
        value_handle: handle.wrapping_add(1),
        props: caps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::uuid_from_u16;

    fn addr(s: &str) -> BluetoothAddress {
        s.parse().unwrap()
    }

    fn drain(sim: &SimBackend) -> Vec<Event> {
        let mut out = Vec::new();
        while sim.pending_events() > 0 {
            out.push(sim.get_event().unwrap());
        }
        out
    }

    #[test]
    fn test_init_announces_cached_objects() {
        let sim = SimBackend::new(NameTable::new());
        let radio = sim.add_adapter("hci0", addr("00:1A:7D:DA:71:13"));
        let dev = sim
            .add_device(&radio, addr("C0:34:99:11:22:33"), Some("HRM"))
            .unwrap();
        let svc = sim.add_service(&dev, uuid_from_u16(0x180D), 1, true).unwrap();
        sim.add_characteristic(&svc, characteristic(uuid_from_u16(0x2A37), 0x10, &["notify"]).unwrap(), &[])
            .unwrap();
        sim.set_cached(&dev).unwrap();
        assert_eq!(sim.pending_events(), 0);

        sim.init().unwrap();
        let kinds: Vec<_> = drain(&sim).iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            ["RadioAdded", "DeviceAdded", "GattServiceAdded", "GattCharacteristicAdded"]
        );
    }

    #[test]
    fn test_pairing_connects_and_discovers() {
        let sim = SimBackend::new(NameTable::new());
        let radio = sim.add_adapter("hci0", addr("00:1A:7D:DA:71:13"));
        let dev = sim.add_device(&radio, addr("C0:34:99:11:22:33"), None).unwrap();
        sim.add_service(&dev, uuid_from_u16(0x180F), 9, true).unwrap();
        sim.init().unwrap();
        drain(&sim);

        sim.device_start_pairing(&dev, Some(PairingToken(7))).unwrap();
        let events = drain(&sim);
        assert!(matches!(events[0], Event::DevicePropsChanged { .. }));
        assert!(matches!(events[1], Event::GattServiceAdded { handle: 9, .. }));
        assert!(matches!(
            events.last(),
            Some(Event::PairingFinished { token: PairingToken(7), result: Ok(()) })
        ));
        assert_eq!(sim.command_count(UnixFunc::DeviceStartPairing), 1);
    }

    #[test]
    fn test_read_requires_connection() {
        let sim = SimBackend::new(NameTable::new());
        let radio = sim.add_adapter("hci0", addr("00:1A:7D:DA:71:13"));
        let dev = sim.add_device(&radio, addr("C0:34:99:11:22:33"), None).unwrap();
        let svc = sim.add_service(&dev, uuid_from_u16(0x180D), 1, true).unwrap();
        let chr = sim
            .add_characteristic(&svc, characteristic(uuid_from_u16(0x2A38), 0x10, &["read"]).unwrap(), &[0x06, 0x48])
            .unwrap();
        sim.init().unwrap();
        assert_eq!(sim.characteristic_read(&chr), Err(UnixError::DeviceNotConnected));
        sim.set_connected(&dev, true).unwrap();
        assert_eq!(sim.characteristic_read(&chr).unwrap(), vec![0x06, 0x48]);
    }

    #[test]
    fn test_read_notification_times_out_and_cancels() {
        let sim = Arc::new(SimBackend::new(NameTable::new()));
        let radio = sim.add_adapter("hci0", addr("00:1A:7D:DA:71:13"));
        let dev = sim.add_device(&radio, addr("C0:34:99:11:22:33"), None).unwrap();
        let svc = sim.add_service(&dev, uuid_from_u16(0x180D), 1, true).unwrap();
        let chr = sim
            .add_characteristic(&svc, characteristic(uuid_from_u16(0x2A37), 0x10, &["notify"]).unwrap(), &[])
            .unwrap();
        sim.init().unwrap();
        sim.set_connected(&dev, true).unwrap();
        sim.characteristic_set_notify(&chr, true).unwrap();

        assert_eq!(
            sim.characteristic_read_notification(&chr, Duration::from_millis(20)),
            Err(UnixError::Timeout)
        );

        assert!(sim.notify(&chr, &[1]));
        assert_eq!(
            sim.characteristic_read_notification(&chr, Duration::from_millis(20)).unwrap(),
            vec![1]
        );

        let reader = {
            let sim = Arc::clone(&sim);
            let chr = chr.clone();
            std::thread::spawn(move || sim.characteristic_read_notification(&chr, Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(50));
        sim.cancel_read_notification(&chr);
        assert_eq!(reader.join().unwrap(), Err(UnixError::Cancelled));
    }

    #[test]
    fn test_get_event_returns_shutdown() {
        let sim = Arc::new(SimBackend::new(NameTable::new()));
        sim.init().unwrap();
        let waiter = {
            let sim = Arc::clone(&sim);
            std::thread::spawn(move || sim.get_event())
        };
        std::thread::sleep(Duration::from_millis(20));
        sim.shutdown();
        assert_eq!(waiter.join().unwrap().unwrap_err(), UnixError::Shutdown);
    }

    #[test]
    fn test_duplicate_address_gets_new_handle() {
        let sim = SimBackend::new(NameTable::new());
        let radio = sim.add_adapter("hci0", addr("00:1A:7D:DA:71:13"));
        let a = sim.add_device(&radio, addr("C0:34:99:11:22:33"), None).unwrap();
        let b = sim.add_device(&radio, addr("C0:34:99:11:22:33"), None).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.name().as_str(), "_org_bluez_hci0_dev_C0_34_99_11_22_33");
    }
}
