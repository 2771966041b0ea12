//! IOCTL dispatch for radio and BLE device PDOs
//!
//! Requests are METHOD_BUFFERED: one system buffer, `max(in, out)` bytes,
//! holds the input on entry and the reply on exit. GATT requests that
//! arrive on a radio carry the target address in front of the
//! device-scoped header.

use std::mem::{offset_of, size_of};
use std::sync::Arc;

use bthle_ioctl::codes::*;
use bthle_ioctl::sizing::{reply_list, reply_value};
use bthle_ioctl::wire::*;
use bthle_ioctl::{GattOp, IoStatus, NtStatus, Route};
use bthle_unix::{
    AuthMethod, BluetoothAddress, PairingToken, RadioPropValue, WriteType,
};
use tracing::{debug, trace, warn};
use zerocopy::{FromBytes, Immutable, IntoBytes};

use crate::bus::{Bus, FileHandle};
use crate::graph::{CharNode, DeviceNode, RadioNode, ServiceNode};
use crate::irp::{Completion, PendingPairing};
use crate::pnp::PdoId;

pub(crate) enum DispatchResult {
    Complete(IoStatus),
    /// Parked; the caller blocks until someone completes it
    Pending(Arc<Completion>),
}

impl From<IoStatus> for DispatchResult {
    fn from(status: IoStatus) -> Self {
        Self::Complete(status)
    }
}

impl From<NtStatus> for DispatchResult {
    fn from(status: NtStatus) -> Self {
        Self::Complete(IoStatus::status(status))
    }
}

/// One request's system buffer
struct Irp<'a> {
    buf: &'a mut [u8],
    in_len: usize,
    out_len: usize,
}

impl Irp<'_> {
    fn input<T: FromBytes>(&self, offset: usize) -> Result<T, NtStatus> {
        if self.in_len < offset + size_of::<T>() {
            return Err(NtStatus::INVALID_PARAMETER);
        }
        read_record("request", &self.buf[offset..self.in_len]).map_err(|e| e.status())
    }

    /// Write a fixed-size reply record
    fn reply<T: IntoBytes + Immutable>(&mut self, value: &T) -> IoStatus {
        let len = size_of::<T>();
        if self.out_len < len {
            return IoStatus::status(NtStatus::INVALID_USER_BUFFER);
        }
        match write_record("reply", value, &mut self.buf[..len]) {
            Ok(()) => IoStatus::success(len),
            Err(e) => IoStatus::status(e.status()),
        }
    }
}

fn status_of<T>(result: Result<T, NtStatus>) -> Result<T, DispatchResult> {
    result.map_err(DispatchResult::from)
}

impl Bus {
    pub(crate) fn dispatch(
        &self,
        file: &FileHandle,
        code: u32,
        input: &[u8],
        output: &mut [u8],
    ) -> IoStatus {
        let mut buf = vec![0u8; input.len().max(output.len())];
        buf[..input.len()].copy_from_slice(input);
        let mut irp = Irp {
            buf: &mut buf,
            in_len: input.len(),
            out_len: output.len(),
        };

        let result = match file.pdo() {
            PdoId::Radio(_) => self.dispatch_radio(file, code, &mut irp),
            PdoId::Device { .. } => self.dispatch_device(file, code, &mut irp),
        };
        let st = match result {
            DispatchResult::Complete(st) => st,
            DispatchResult::Pending(completion) => {
                trace!("{} pending", ioctl_name(code));
                completion.wait()
            }
        };
        let n = st.information.min(output.len());
        output[..n].copy_from_slice(&buf[..n]);
        if st.status.is_error() {
            debug!("{} -> {}", ioctl_name(code), st.status);
        }
        st
    }

    fn dispatch_radio(&self, file: &FileHandle, code: u32, irp: &mut Irp<'_>) -> DispatchResult {
        let Some(radio) = self.radio_node(file.pdo()) else {
            return NtStatus::NOT_FOUND.into();
        };
        let radio_index = radio.index;
        match code {
            IOCTL_BTH_GET_LOCAL_INFO => self.get_local_info(radio_index, irp).into(),
            IOCTL_BTH_GET_DEVICE_INFO => self.get_device_info(radio_index, irp).into(),
            IOCTL_BTH_DISCONNECT_DEVICE => match self.device_for_address(radio_index, irp) {
                Ok(device) => self.backend_status(self.conn.device_disconnect(&device.handle)),
                Err(st) => st.into(),
            },
            IOCTL_BTHLE_RADIO_START_DISCOVERY => {
                self.backend_status(self.conn.radio_start_discovery(&radio.handle))
            }
            IOCTL_BTHLE_RADIO_STOP_DISCOVERY => {
                self.backend_status(self.conn.radio_stop_discovery(&radio.handle))
            }
            IOCTL_BTHLE_RADIO_SET_FLAG => self.set_flag(&radio, irp),
            IOCTL_BTHLE_RADIO_SEND_AUTH_RESPONSE => self.send_auth_response(radio_index, irp).into(),
            IOCTL_BTHLE_RADIO_START_AUTH => self.start_auth(&radio, irp),
            IOCTL_BTHLE_RADIO_REMOVE_DEVICE => match self.device_for_address(radio_index, irp) {
                Ok(device) => {
                    self.backend_status(self.conn.radio_remove_device(&radio.handle, &device.handle))
                }
                Err(st) => st.into(),
            },
            _ => match GattOp::from_radio_code(code) {
                Some(op) => {
                    let address = match Route::decode_address(&irp.buf[..irp.in_len]) {
                        Ok(address) => address,
                        Err(_) => return NtStatus::INVALID_PARAMETER.into(),
                    };
                    let Some(device) = self.graph.device_by_address(radio_index, address) else {
                        return NtStatus::NOT_FOUND.into();
                    };
                    self.dispatch_gatt(file, op, Route::Radio(address), &device, irp)
                }
                None => {
                    warn!("unsupported radio IOCTL {:#010x}", code);
                    NtStatus::INVALID_DEVICE_REQUEST.into()
                }
            },
        }
    }

    fn dispatch_device(&self, file: &FileHandle, code: u32, irp: &mut Irp<'_>) -> DispatchResult {
        let Some(op) = GattOp::from_device_code(code) else {
            warn!("unsupported device IOCTL {:#010x}", code);
            return NtStatus::INVALID_DEVICE_REQUEST.into();
        };
        let Some(device) = self.device_node(file.pdo()) else {
            return NtStatus::NOT_FOUND.into();
        };
        self.dispatch_gatt(file, op, Route::Device, &device, irp)
    }

    fn backend_status(&self, result: Result<(), bthle_unix::UnixError>) -> DispatchResult {
        match result {
            Ok(()) => IoStatus::success(0).into(),
            Err(e) => NtStatus::from(&e).into(),
        }
    }

    fn device_for_address(&self, radio: u32, irp: &Irp<'_>) -> Result<Arc<DeviceNode>, NtStatus> {
        let record: AddressRecord = irp.input(0)?;
        self.graph
            .device_by_address(radio, BluetoothAddress::from_u64(record.address))
            .ok_or(NtStatus::NOT_FOUND)
    }

    // Radio requests

    fn get_local_info(&self, radio: u32, irp: &mut Irp<'_>) -> IoStatus {
        let Some(props) = self.graph.radio_props(radio) else {
            return IoStatus::status(NtStatus::NOT_FOUND);
        };
        let mut flags = 0;
        for (bit, flag) in [
            (bthle_unix::radio_prop::DISCOVERABLE, LOCAL_RADIO_DISCOVERABLE),
            (bthle_unix::radio_prop::CONNECTABLE, LOCAL_RADIO_CONNECTABLE),
            (bthle_unix::radio_prop::PAIRABLE, LOCAL_RADIO_PAIRABLE),
            (bthle_unix::radio_prop::DISCOVERING, LOCAL_RADIO_DISCOVERING),
        ] {
            if props.flag(bit) == Some(true) {
                flags |= flag;
            }
        }
        let version = props.version().unwrap_or(0);
        let info = LocalRadioInfo {
            address: props.address().map(|a| a.as_u64()).unwrap_or(0),
            class_of_device: props.class().unwrap_or(0),
            flags,
            manufacturer: props.manufacturer().unwrap_or(0),
            lmp_subversion: 0,
            hci_revision: 0,
            lmp_version: version,
            hci_version: version,
            name: encode_radio_name(props.name().unwrap_or_default()),
        };
        irp.reply(&info)
    }

    fn get_device_info(&self, radio: u32, irp: &mut Irp<'_>) -> IoStatus {
        let items: Vec<DeviceInfo> = self
            .graph
            .devices(radio)
            .iter()
            .map(|device| {
                let inner = device.lock();
                let p = &inner.props;
                let mut flags = 0;
                if p.address().is_some() {
                    flags |= BDIF_ADDRESS;
                }
                if p.class().is_some() {
                    flags |= BDIF_COD;
                }
                if p.name().is_some() {
                    flags |= BDIF_NAME;
                }
                if p.paired() {
                    flags |= BDIF_PAIRED;
                }
                if p.trusted() {
                    flags |= BDIF_PERSONAL;
                }
                if p.connected() {
                    flags |= BDIF_CONNECTED;
                }
                if inner.le {
                    flags |= BDIF_LE;
                }
                DeviceInfo::new(
                    flags,
                    device.address,
                    p.class().unwrap_or(0),
                    p.name().unwrap_or_default(),
                )
            })
            .collect();
        reply_list(
            irp.buf,
            irp.out_len,
            size_of::<DeviceInfoListHeader>(),
            offset_of!(DeviceInfoListHeader, count),
            &items,
        )
    }

    fn set_flag(&self, radio: &RadioNode, irp: &mut Irp<'_>) -> DispatchResult {
        let req: SetFlagRequest = match irp.input(0) {
            Ok(req) => req,
            Err(st) => return st.into(),
        };
        let enable = req.enable != 0;
        let value = match req.flag {
            RADIO_FLAG_DISCOVERABLE => RadioPropValue::Discoverable(enable),
            RADIO_FLAG_CONNECTABLE => RadioPropValue::Connectable(enable),
            RADIO_FLAG_PAIRABLE => RadioPropValue::Pairable(enable),
            _ => return NtStatus::INVALID_PARAMETER.into(),
        };
        self.backend_status(self.conn.radio_set_property(&radio.handle, value))
    }

    fn send_auth_response(&self, radio: u32, irp: &mut Irp<'_>) -> IoStatus {
        let mut req: AuthResponseRecord = match irp.input(0) {
            Ok(req) => req,
            Err(st) => return IoStatus::status(st),
        };
        if irp.out_len < size_of::<AuthResponseRecord>() {
            return IoStatus::status(NtStatus::INVALID_USER_BUFFER);
        }
        let Ok(method) = AuthMethod::try_from(req.method) else {
            return IoStatus::status(NtStatus::INVALID_PARAMETER);
        };
        let Some(device) = self
            .graph
            .device_by_address(radio, BluetoothAddress::from_u64(req.address))
        else {
            return IoStatus::status(NtStatus::NOT_FOUND);
        };
        match self.conn.auth_send_response(
            &device.handle,
            method,
            req.numeric_value_or_passkey,
            req.negative != 0,
        ) {
            Ok(authenticated) => {
                req.authenticated = authenticated.into();
                irp.reply(&req)
            }
            Err(e) => IoStatus::status(NtStatus::from(&e)),
        }
    }

    fn start_auth(&self, radio: &RadioNode, irp: &mut Irp<'_>) -> DispatchResult {
        let device = match self.device_for_address(radio.index, irp) {
            Ok(device) => device,
            Err(st) => return st.into(),
        };
        let token = PairingToken(self.next_pairing_token());
        let completion = Completion::new();
        {
            let mut state = self.graph.lock();
            let Some(entry) = state.radio_mut(radio.index) else {
                return NtStatus::NOT_FOUND.into();
            };
            entry.pending.push(PendingPairing {
                token,
                completion: Arc::clone(&completion),
            });
        }
        debug!("pairing {} with {} pended", token.0, device.address);
        if let Err(e) = self.conn.device_start_pairing(&device.handle, Some(token)) {
            let mut state = self.graph.lock();
            if let Some(entry) = state.radio_mut(radio.index) {
                entry.pending.retain(|p| p.token != token);
            }
            return NtStatus::from(&e).into();
        }
        DispatchResult::Pending(completion)
    }

    // GATT requests

    /// Connect and let discovery run once if the device has nothing to show.
    fn discovery_barrier(&self, device: &DeviceNode) {
        if !device.services().is_empty() || device.is_connected() {
            return;
        }
        debug!("{} has no services, starting discovery", device.address);
        if let Err(e) = self.conn.device_start_pairing(&device.handle, None) {
            debug!("discovery for {} failed to start: {}", device.address, e);
        }
        std::thread::sleep(self.config.discovery_barrier());
    }

    fn dispatch_gatt(
        &self,
        file: &FileHandle,
        op: GattOp,
        route: Route,
        device: &DeviceNode,
        irp: &mut Irp<'_>,
    ) -> DispatchResult {
        let result = match op {
            GattOp::GetServices => self.get_services(route, device, irp),
            GattOp::GetCharacteristics => self.get_characteristics(route, device, irp),
            GattOp::Read => self.read_characteristic(route, device, irp),
            GattOp::Write => self.write_characteristic(route, device, irp),
            GattOp::SetNotify => self.set_notify(route, device, irp),
            GattOp::ReadNotification => self.read_notification(file, route, device, irp),
            GattOp::ConnectionStatus => self.connection_status(device, irp),
        };
        match result {
            Ok(st) => st.into(),
            Err(st) => st,
        }
    }

    fn get_services(
        &self,
        route: Route,
        device: &DeviceNode,
        irp: &mut Irp<'_>,
    ) -> Result<IoStatus, DispatchResult> {
        let header_len = route.header_len(size_of::<GetServicesHeader>());
        if matches!(route, Route::Radio(_)) && irp.in_len < header_len {
            return Err(NtStatus::INVALID_PARAMETER.into());
        }
        self.discovery_barrier(device);
        let items: Vec<GattServiceRecord> = device
            .services()
            .iter()
            .filter(|s| s.primary)
            .map(|s| GattServiceRecord::new(&s.uuid, s.attr))
            .collect();
        Ok(reply_list(
            irp.buf,
            irp.out_len,
            header_len,
            route.inner_offset() + offset_of!(GetServicesHeader, count),
            &items,
        ))
    }

    fn get_characteristics(
        &self,
        route: Route,
        device: &DeviceNode,
        irp: &mut Irp<'_>,
    ) -> Result<IoStatus, DispatchResult> {
        let header_len = route.header_len(size_of::<GetCharacteristicsHeader>());
        let header: GetCharacteristicsHeader = status_of(irp.input(route.inner_offset()))?;
        self.discovery_barrier(device);
        let service = device
            .find_service(&header.service.uuid(), header.service.attribute_handle)
            .ok_or(DispatchResult::from(NtStatus::INVALID_PARAMETER))?;
        let items: Vec<GattCharacteristicRecord> = service
            .characteristics_sorted()
            .iter()
            .map(|c| GattCharacteristicRecord::new(service.attr, &c.info))
            .collect();
        Ok(reply_list(
            irp.buf,
            irp.out_len,
            header_len,
            route.inner_offset() + offset_of!(GetCharacteristicsHeader, count),
            &items,
        ))
    }

    fn resolve(
        &self,
        device: &DeviceNode,
        service: &GattServiceRecord,
        characteristic: &GattCharacteristicRecord,
    ) -> Result<(Arc<ServiceNode>, Arc<CharNode>), DispatchResult> {
        let svc = device
            .find_service(&service.uuid(), service.attribute_handle)
            .ok_or(DispatchResult::from(NtStatus::INVALID_PARAMETER))?;
        let chr = svc
            .find_characteristic(characteristic.attribute_handle)
            .ok_or(DispatchResult::from(NtStatus::INVALID_PARAMETER))?;
        Ok((svc, chr))
    }

    fn read_characteristic(
        &self,
        route: Route,
        device: &DeviceNode,
        irp: &mut Irp<'_>,
    ) -> Result<IoStatus, DispatchResult> {
        let header_len = route.header_len(size_of::<ReadValueHeader>());
        let header: ReadValueHeader = status_of(irp.input(route.inner_offset()))?;
        self.discovery_barrier(device);
        let (_, chr) = self.resolve(device, &header.service, &header.characteristic)?;
        let value = self
            .conn
            .characteristic_read(&chr.handle)
            .map_err(|e| DispatchResult::from(NtStatus::from(&e)))?;
        trace!("read {:#06x}: {} bytes", chr.info.handle, value.len());
        Ok(reply_value(
            irp.buf,
            irp.out_len,
            header_len,
            route.inner_offset() + offset_of!(ReadValueHeader, data_size),
            &value,
        ))
    }

    fn write_characteristic(
        &self,
        route: Route,
        device: &DeviceNode,
        irp: &mut Irp<'_>,
    ) -> Result<IoStatus, DispatchResult> {
        let header_len = route.header_len(size_of::<WriteValueHeader>());
        let header: WriteValueHeader = status_of(irp.input(route.inner_offset()))?;
        let data_end = header_len
            .checked_add(header.data_size as usize)
            .filter(|&end| end <= irp.in_len)
            .ok_or(DispatchResult::from(NtStatus::INVALID_PARAMETER))?;
        let write_type = WriteType::try_from(header.write_type)
            .map_err(|_| DispatchResult::from(NtStatus::INVALID_PARAMETER))?;
        self.discovery_barrier(device);
        let (_, chr) = self.resolve(device, &header.service, &header.characteristic)?;
        let value = irp.buf[header_len..data_end].to_vec();
        self.conn
            .characteristic_write(&chr.handle, &value, write_type)
            .map_err(|e| DispatchResult::from(NtStatus::from(&e)))?;
        Ok(IoStatus::success(0))
    }

    fn set_notify(
        &self,
        route: Route,
        device: &DeviceNode,
        irp: &mut Irp<'_>,
    ) -> Result<IoStatus, DispatchResult> {
        let req: SetNotifyRequest = status_of(irp.input(route.inner_offset()))?;
        self.discovery_barrier(device);
        let (_, chr) = self.resolve(device, &req.service, &req.characteristic)?;
        let enable = req.enable != 0;
        self.conn
            .characteristic_set_notify(&chr.handle, enable)
            .map_err(|e| DispatchResult::from(NtStatus::from(&e)))?;
        if !enable {
            chr.stash.lock().take();
        }
        Ok(IoStatus::success(0))
    }

    fn read_notification(
        &self,
        file: &FileHandle,
        route: Route,
        device: &DeviceNode,
        irp: &mut Irp<'_>,
    ) -> Result<IoStatus, DispatchResult> {
        let header_len = route.header_len(size_of::<ReadValueHeader>());
        let size_offset = route.inner_offset() + offset_of!(ReadValueHeader, data_size);
        let header: ReadValueHeader = status_of(irp.input(route.inner_offset()))?;
        let (_, chr) = self.resolve(device, &header.service, &header.characteristic)?;

        // A value that did not fit last time goes out first
        let stashed = chr.stash.lock().take();
        let value = match stashed {
            Some(value) => value,
            None => {
                file.begin_read(&chr.handle);
                let result = self
                    .conn
                    .characteristic_read_notification(&chr.handle, self.config.notification_read_timeout());
                file.end_read(&chr.handle);
                result.map_err(|e| DispatchResult::from(NtStatus::from(&e)))?
            }
        };
        let st = reply_value(irp.buf, irp.out_len, header_len, size_offset, &value);
        if st.status == NtStatus::MORE_ENTRIES {
            *chr.stash.lock() = Some(value);
        }
        Ok(st)
    }

    fn connection_status(&self, device: &DeviceNode, irp: &mut Irp<'_>) -> Result<IoStatus, DispatchResult> {
        if irp.out_len < 1 {
            return Err(NtStatus::INVALID_USER_BUFFER.into());
        }
        irp.buf[0] = device.is_connected().into();
        Ok(IoStatus::success(1))
    }
}
