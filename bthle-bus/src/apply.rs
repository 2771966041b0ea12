//! Event application: the pump thread's view of the backend becomes the
//! object graph.
//!
//! The pump is the only writer of list structure and lifecycle fields.
//! Interface and property-store updates happen after the graph lock is
//! released.

use std::sync::Arc;

use bthle_ioctl::{IoStatus, NtStatus};
use bthle_unix::{
    device_prop, AuthMethod, CharacteristicHandle, CharacteristicInfo, DeviceHandle,
    DeviceProperties, Event, PairingToken, PropMask, RadioHandle, RadioProperties, ServiceHandle,
    UnixError,
};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::bus::{AuthRequestInfo, Bus};
use crate::error::BusError;
use crate::graph::{
    new_characteristic, new_device, new_radio, new_service, DeviceNode, GraphState, Lifecycle,
    RadioEntry,
};
use crate::pnp::{device_symlink, hardware_name, radio_symlink, InterfaceClass, PdoId};

impl Bus {
    pub(crate) fn apply_event(&self, event: Event) -> Result<(), BusError> {
        trace!("apply {}", event.kind());
        match event {
            Event::RadioAdded { radio, props } => self.radio_added(radio, props),
            Event::RadioRemoved { radio } => self.radio_removed(&radio),
            Event::RadioPropsChanged {
                radio,
                changed,
                props,
                invalidated,
            } => self.radio_props_changed(&radio, changed, &props, invalidated),
            Event::DeviceAdded {
                radio,
                device,
                props,
                init_entry,
            } => self.device_added(&radio, device, props, init_entry),
            Event::DeviceRemoved { device } => self.device_removed(&device),
            Event::DevicePropsChanged {
                device,
                changed,
                props,
                invalidated,
            } => self.device_props_changed(&device, changed, &props, invalidated),
            Event::GattServiceAdded {
                device,
                service,
                uuid,
                primary,
                handle,
            } => self.service_added(&device, service, uuid, primary, handle),
            Event::GattServiceRemoved { service } => self.service_removed(&service),
            Event::GattCharacteristicAdded {
                service,
                characteristic,
                info,
            } => self.characteristic_added(&service, characteristic, info),
            Event::GattCharacteristicRemoved { characteristic } => {
                self.characteristic_removed(&characteristic)
            }
            Event::PairingFinished { token, result } => self.pairing_finished(token, result),
            Event::AuthRequest {
                device,
                method,
                numeric_value,
            } => self.auth_request(&device, method, numeric_value),
        }
    }

    fn radio_added(&self, radio: RadioHandle, props: RadioProperties) -> Result<(), BusError> {
        let unique = match self.conn.radio_unique_name(&radio) {
            Ok(name) => name,
            Err(e) => {
                debug!("no unique name for {}: {}", radio, e);
                radio.name().as_str().rsplit('_').next().unwrap_or_default().to_string()
            }
        };
        let (index, hw_name) = {
            let mut state = self.graph.lock();
            if state.radios.iter().any(|r| r.node.handle == radio) {
                return Err(BusError::InvalidParameter(format!("radio {radio} already known")));
            }
            let index = state.next_radio_index;
            state.next_radio_index += 1;
            let hw_name = hardware_name(&unique, index);
            let node = new_radio(radio, index, hw_name.clone());
            node.state.transition(&state, Lifecycle::Active)?;
            state.radios.push(RadioEntry {
                node,
                props,
                devices: Vec::new(),
                pending: Vec::new(),
                next_device_index: 0,
            });
            (index, hw_name)
        };

        for class in [InterfaceClass::BthPort, InterfaceClass::BthRadio] {
            let symlink = radio_symlink(class, &hw_name, index);
            self.interfaces.register(class, symlink.clone(), PdoId::Radio(index));
            self.interfaces.set_enabled(&symlink, true);
        }
        info!("radio {} added as {}", index, hw_name);
        self.refresh_relations();
        Ok(())
    }

    fn radio_removed(&self, radio: &RadioHandle) -> Result<(), BusError> {
        let (entry, devices) = {
            let mut state = self.graph.lock();
            let pos = state
                .radios
                .iter()
                .position(|r| &r.node.handle == radio)
                .ok_or_else(|| BusError::NotFound(radio.to_string()))?;
            state.radios[pos].node.state.transition(&state, Lifecycle::Removing)?;
            let mut entry = state.radios.remove(pos);
            let devices: Vec<Arc<DeviceNode>> = entry.devices.drain(..).collect();
            for device in &devices {
                retire_device(&state, device);
            }
            (entry, devices)
        };

        for pending in &entry.pending {
            debug!("completing pairing {:?} with DELETE_PENDING", pending.token);
            pending
                .completion
                .complete(IoStatus::status(NtStatus::DELETE_PENDING));
        }
        for device in &devices {
            let pdo = PdoId::Device {
                radio: device.radio_index,
                index: device.index,
            };
            self.interfaces.remove_pdo(pdo);
            self.properties.clear(pdo);
        }
        self.interfaces.remove_pdo(PdoId::Radio(entry.node.index));
        info!("radio {} removed", entry.node.index);
        Ok(())
    }

    fn radio_props_changed(
        &self,
        radio: &RadioHandle,
        changed: PropMask,
        props: &RadioProperties,
        invalidated: PropMask,
    ) -> Result<(), BusError> {
        let mut state = self.graph.lock();
        let entry = state
            .radio_by_handle_mut(radio)
            .ok_or_else(|| BusError::NotFound(radio.to_string()))?;
        entry.props.merge(changed, props, invalidated);
        Ok(())
    }

    fn device_added(
        &self,
        radio: &RadioHandle,
        device: DeviceHandle,
        props: DeviceProperties,
        init_entry: bool,
    ) -> Result<(), BusError> {
        let (pdo, snapshot, le) = {
            let mut state = self.graph.lock();
            let entry = state
                .radio_by_handle_mut(radio)
                .ok_or_else(|| BusError::NotFound(radio.to_string()))?;
            let radio_index = entry.node.index;
            let existing = props.address().and_then(|address| {
                entry
                    .devices
                    .iter()
                    .find(|d| d.state.is_active() && d.address == address)
                    .cloned()
            });

            if let Some(existing) = existing {
                // Same address under this radio: merge and let the new handle go
                let mut inner = existing.lock();
                inner.props.merge(props.present, &props, PropMask::EMPTY);
                if props.le_hint() {
                    inner.le = true;
                }
                debug!(
                    "device {} re-announced as {}, merged into {}",
                    existing.address, device, existing.handle
                );
                let pdo = PdoId::Device {
                    radio: radio_index,
                    index: existing.index,
                };
                (pdo, inner.props.clone(), inner.le)
            } else {
                let index = entry.next_device_index;
                entry.next_device_index += 1;
                let named = props.name().is_some();
                let node = new_device(device, radio_index, index, props);
                let (snapshot, le) = {
                    let inner = node.lock();
                    (inner.props.clone(), inner.le)
                };
                let state_ref: &GraphState = &state;
                node.state.transition(state_ref, Lifecycle::Active)?;
                let entry = state
                    .radio_by_handle_mut(radio)
                    .ok_or_else(|| BusError::NotFound(radio.to_string()))?;
                if named {
                    entry.devices.insert(0, node);
                } else {
                    entry.devices.push(node);
                }
                debug!(
                    "device {} added to radio {} as {} (init_entry={})",
                    snapshot.address, radio_index, index, init_entry
                );
                (
                    PdoId::Device {
                        radio: radio_index,
                        index,
                    },
                    snapshot,
                    le,
                )
            }
        };

        self.properties
            .publish_device(pdo, &snapshot, le, device_prop::VISIBLE);
        if le {
            self.refresh_relations();
        }
        Ok(())
    }

    fn device_removed(&self, device: &DeviceHandle) -> Result<(), BusError> {
        let node = {
            let mut state = self.graph.lock();
            let (ri, di) = state
                .locate_device(device)
                .ok_or_else(|| BusError::NotFound(device.to_string()))?;
            state.radios[ri].devices[di]
                .state
                .transition(&state, Lifecycle::Removing)?;
            let node = state.radios[ri].devices.remove(di);
            retire_device(&state, &node);
            node
        };
        let pdo = PdoId::Device {
            radio: node.radio_index,
            index: node.index,
        };
        self.interfaces.remove_pdo(pdo);
        self.properties.clear(pdo);
        debug!("device {} removed", node.address);
        Ok(())
    }

    fn device_props_changed(
        &self,
        device: &DeviceHandle,
        changed: PropMask,
        props: &DeviceProperties,
        invalidated: PropMask,
    ) -> Result<(), BusError> {
        let (pdo, snapshot, le, moved, became_le) = {
            let state = self.graph.lock();
            let (ri, di) = state
                .locate_device(device)
                .ok_or_else(|| BusError::NotFound(device.to_string()))?;
            let node = &state.radios[ri].devices[di];
            let mut inner = node.lock();
            let moved = inner.props.merge(changed, props, invalidated);
            let became_le = !inner.le && inner.props.le_hint();
            if became_le {
                inner.le = true;
            }
            if moved.contains(device_prop::CONNECTED) {
                debug!(
                    "device {} {}",
                    node.address,
                    if inner.props.connected() { "connected" } else { "disconnected" }
                );
            }
            (
                PdoId::Device {
                    radio: node.radio_index,
                    index: node.index,
                },
                inner.props.clone(),
                inner.le,
                moved,
                became_le,
            )
        };

        let visible = moved & device_prop::VISIBLE;
        if !visible.is_empty() || became_le {
            self.properties.publish_device(pdo, &snapshot, le, visible);
        }
        if became_le {
            self.refresh_relations();
        }
        Ok(())
    }

    fn service_added(
        &self,
        device: &DeviceHandle,
        service: ServiceHandle,
        uuid: Uuid,
        primary: bool,
        attr: u16,
    ) -> Result<(), BusError> {
        let newly_le = {
            let state = self.graph.lock();
            let (ri, di) = state
                .locate_device(device)
                .ok_or_else(|| BusError::NotFound(device.to_string()))?;
            let node = &state.radios[ri].devices[di];
            let mut inner = node.lock();
            if inner
                .services
                .iter()
                .any(|s| s.state.is_active() && s.uuid == uuid && s.attr == attr)
            {
                return Err(BusError::InvalidParameter(format!(
                    "duplicate service {uuid} at {attr:#06x} on {}",
                    node.address
                )));
            }
            let svc = new_service(service, uuid, attr, primary);
            svc.state.transition(&state, Lifecycle::Active)?;
            inner.services.push(svc);
            let newly_le = !inner.le;
            inner.le = true;
            trace!("service {} at {:#06x} added to {}", uuid, attr, node.address);
            newly_le
        };
        if newly_le {
            self.refresh_relations();
        }
        Ok(())
    }

    fn service_removed(&self, service: &ServiceHandle) -> Result<(), BusError> {
        let state = self.graph.lock();
        let (device, svc) = state
            .find_service(service)
            .ok_or_else(|| BusError::NotFound(service.to_string()))?;
        let mut inner = device.lock();
        inner.services.retain(|s| &s.handle != service);
        svc.state.transition(&state, Lifecycle::Removing)?;
        svc.retire_children(&state);
        Ok(())
    }

    fn characteristic_added(
        &self,
        service: &ServiceHandle,
        characteristic: CharacteristicHandle,
        info: CharacteristicInfo,
    ) -> Result<(), BusError> {
        let state = self.graph.lock();
        let (_, svc) = state
            .find_service(service)
            .ok_or_else(|| BusError::NotFound(service.to_string()))?;
        svc.insert_characteristic(&state, new_characteristic(characteristic, info))
    }

    fn characteristic_removed(&self, characteristic: &CharacteristicHandle) -> Result<(), BusError> {
        let state = self.graph.lock();
        let (svc, _) = state
            .find_characteristic(characteristic)
            .ok_or_else(|| BusError::NotFound(characteristic.to_string()))?;
        svc.remove_characteristic(&state, characteristic);
        Ok(())
    }

    fn pairing_finished(
        &self,
        token: PairingToken,
        result: Result<(), UnixError>,
    ) -> Result<(), BusError> {
        let pending = {
            let mut state = self.graph.lock();
            state.radios.iter_mut().find_map(|r| {
                let pos = r.pending.iter().position(|p| p.token == token)?;
                Some(r.pending.remove(pos))
            })
        };
        let pending =
            pending.ok_or_else(|| BusError::NotFound(format!("pairing token {}", token.0)))?;
        let status = match &result {
            Ok(()) => NtStatus::SUCCESS,
            Err(e) => NtStatus::from(e),
        };
        debug!("pairing {} finished: {}", token.0, status);
        pending.completion.complete(IoStatus::status(status));
        Ok(())
    }

    fn auth_request(
        &self,
        device: &DeviceHandle,
        method: AuthMethod,
        numeric_value: u32,
    ) -> Result<(), BusError> {
        let node = self
            .graph
            .device_by_handle(device)
            .ok_or_else(|| BusError::NotFound(device.to_string()))?;
        info!("pairing prompt {:?} for {}", method, node.address);
        self.deliver_auth_request(AuthRequestInfo {
            radio: node.radio_index,
            address: node.address,
            method,
            numeric_value,
        });
        Ok(())
    }

    /// Bus relations: start every LE device PDO that has not been started,
    /// publishing its BLE device interface.
    pub(crate) fn refresh_relations(&self) {
        let to_start: Vec<(Arc<DeviceNode>, String)> = {
            let state = self.graph.lock();
            state
                .radios
                .iter()
                .filter(|r| r.node.state.is_active())
                .flat_map(|r| {
                    r.devices
                        .iter()
                        .filter(|d| {
                            d.state.is_active() && {
                                let inner = d.lock();
                                inner.le && inner.symlink.is_none()
                            }
                        })
                        .map(|d| (Arc::clone(d), r.node.hw_name.clone()))
                        .collect::<Vec<_>>()
                })
                .collect()
        };

        for (device, hw_name) in to_start {
            let pdo = PdoId::Device {
                radio: device.radio_index,
                index: device.index,
            };
            let symlink = device_symlink(device.address, &hw_name, device.radio_index, device.index);
            let snapshot = {
                let mut inner = device.lock();
                inner.symlink = Some(symlink.clone());
                inner.props.clone()
            };
            self.interfaces
                .register(InterfaceClass::BthLeDevice, symlink.clone(), pdo);
            self.interfaces.set_enabled(&symlink, true);
            self.properties
                .publish_device(pdo, &snapshot, true, PropMask::EMPTY);
            debug!("started BLE device {} at {}", device.address, symlink);
        }
    }
}

/// Mark a device's services and characteristics `Removing`
fn retire_device(state: &GraphState, device: &DeviceNode) {
    let services: Vec<_> = device.lock().services.drain(..).collect();
    for svc in services {
        if svc.state.transition(state, Lifecycle::Removing).is_err() {
            warn!("service {} was not active at teardown", svc.uuid);
        }
        svc.retire_children(state);
    }
}
