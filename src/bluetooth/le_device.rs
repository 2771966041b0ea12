//! `Windows.Devices.Bluetooth.BluetoothLEDevice`

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;

use bthle_bus::PdoId;
use bthle_ioctl::wire::BDIF_NAME;
use bthle_ioctl::{client, Route, Win32Error};
use bthle_unix::BluetoothAddress;
use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::{device_info, id_address, open_radio, radio_address, BluetoothConnectionStatus, DeviceLink};
use crate::error::WinrtError;
use crate::foundation::{
    AsyncOperation, ComPtr, EventRegistrationToken, EventSource, Inspectable, InterfaceId, PollTask,
    TypedEventHandler, VectorView,
};
use crate::gatt::{GattCommunicationStatus, GattDeviceService, GattDeviceServicesResult};
use crate::runtime::Runtime;

pub type ConnectionStatusHandler = TypedEventHandler<ComPtr<BluetoothLEDevice>, ()>;

pub struct BluetoothLEDevice {
    this: Weak<BluetoothLEDevice>,
    rt: Runtime,
    address: BluetoothAddress,
    device_id: String,
    link: DeviceLink,
    services: Mutex<Option<Vec<ComPtr<GattDeviceService>>>>,
    status_changed: EventSource<ComPtr<BluetoothLEDevice>, ()>,
    poll: Mutex<Option<PollTask>>,
    closed: AtomicBool,
}

impl Inspectable for BluetoothLEDevice {
    fn runtime_class_name(&self) -> &'static str {
        "Windows.Devices.Bluetooth.BluetoothLEDevice"
    }

    fn interfaces(&self) -> &'static [InterfaceId] {
        &[
            InterfaceId::BluetoothLEDevice,
            InterfaceId::BluetoothLEDevice2,
            InterfaceId::BluetoothLEDevice3,
            InterfaceId::Closable,
        ]
    }
}

impl BluetoothLEDevice {
    /// `FromBluetoothAddressAsync`. Completes immediately; the result is
    /// `None` when no radio knows the address.
    pub fn from_bluetooth_address_async(
        rt: &Runtime,
        address: u64,
    ) -> ComPtr<AsyncOperation<Option<ComPtr<Self>>>> {
        AsyncOperation::ready(Self::open(rt, BluetoothAddress::from_u64(address)))
    }

    fn open(rt: &Runtime, address: BluetoothAddress) -> Result<Option<ComPtr<Self>>, WinrtError> {
        let link = match rt.open_le_device(address)? {
            Some((path, file)) => {
                debug!("{} opened through {}", address, path);
                DeviceLink {
                    file,
                    route: Route::Device,
                }
            }
            None => {
                // Not published as a BLE device yet (no services known):
                // address it through the radio that lists it
                let Ok(radio) = rt.open_first_radio() else {
                    return Ok(None);
                };
                if device_info(&radio, address)?.is_none() {
                    return Ok(None);
                }
                debug!("{} addressed through its radio", address);
                DeviceLink {
                    file: radio,
                    route: Route::Radio(address),
                }
            }
        };

        let local = radio_address(rt, link.radio_index()).unwrap_or_default();
        let device_id = format!("BluetoothLE#BluetoothLE{}-{}", id_address(local), id_address(address));
        info!("BLE device {}", device_id);
        Ok(Some(ComPtr::new_cyclic(|this| Self {
            this: this.clone(),
            rt: rt.clone(),
            address,
            device_id,
            link,
            services: Mutex::new(None),
            status_changed: EventSource::new(),
            poll: Mutex::new(None),
            closed: AtomicBool::new(false),
        })))
    }

    fn this(&self) -> Result<ComPtr<Self>, WinrtError> {
        ComPtr::upgrade(&self.this).ok_or_else(WinrtError::closed)
    }

    fn check_open(&self) -> Result<(), WinrtError> {
        if self.closed.load(Ordering::Acquire) {
            Err(WinrtError::closed())
        } else {
            Ok(())
        }
    }

    pub(crate) fn runtime(&self) -> &Runtime {
        &self.rt
    }

    pub(crate) fn link(&self) -> &DeviceLink {
        &self.link
    }

    pub(crate) fn address(&self) -> BluetoothAddress {
        self.address
    }

    pub fn bluetooth_address(&self) -> u64 {
        self.address.as_u64()
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Friendly name from the radio's device cache; empty when unnamed
    pub fn name(&self) -> Result<String, WinrtError> {
        self.check_open()?;
        let radio = open_radio(&self.rt, self.link.radio_index())?;
        Ok(device_info(&radio, self.address)?
            .filter(|info| info.flags & BDIF_NAME != 0)
            .map(|info| info.name())
            .unwrap_or_default())
    }

    pub fn connection_status(&self) -> Result<BluetoothConnectionStatus, WinrtError> {
        self.check_open()?;
        let connected = client::get_connection_status(&self.link.file, self.link.route)?;
        Ok(connected.into())
    }

    /// `add_ConnectionStatusChanged`. The first handler starts a task that
    /// samples the connection state and fires on every change.
    pub fn add_connection_status_changed(
        &self,
        handler: ConnectionStatusHandler,
    ) -> Result<EventRegistrationToken, WinrtError> {
        self.check_open()?;
        let this = self.this()?;
        let (token, first) = self.status_changed.add(handler);
        if !first {
            return Ok(token);
        }

        let mut last = self.connection_status().ok();
        let interval = self.rt.config().connection_poll();
        let task = PollTask::spawn("le-conn-poll", interval, move || {
            let now = this.connection_status().ok();
            if now != last {
                debug!("{} connection status {:?} -> {:?}", this.address, last, now);
                last = now;
                this.status_changed.invoke(&this, &());
            }
            ControlFlow::Continue(())
        });
        match task {
            Ok(task) => {
                *self.poll.lock() = Some(task);
                Ok(token)
            }
            Err(e) => {
                self.status_changed.remove(token);
                Err(e)
            }
        }
    }

    pub fn remove_connection_status_changed(&self, token: EventRegistrationToken) {
        let (found, empty) = self.status_changed.remove(token);
        if found && empty {
            self.stop_polling();
        }
    }

    fn stop_polling(&self) {
        let task = self.poll.lock().take();
        if let Some(task) = task {
            task.stop();
        }
    }

    /// `GattServices` (v1): cached services, fetched on first use
    pub fn gatt_services(&self) -> Result<ComPtr<VectorView<ComPtr<GattDeviceService>>>, WinrtError> {
        let (status, services) = self.fetch_services(None)?;
        if status != GattCommunicationStatus::Success {
            return Err(WinrtError::from(Win32Error::DEVICE_NOT_CONNECTED));
        }
        Ok(VectorView::new(services))
    }

    pub fn get_gatt_services_async(&self) -> ComPtr<AsyncOperation<ComPtr<GattDeviceServicesResult>>> {
        AsyncOperation::ready(self.services_result(None))
    }

    pub fn get_gatt_services_for_uuid_async(
        &self,
        uuid: Uuid,
    ) -> ComPtr<AsyncOperation<ComPtr<GattDeviceServicesResult>>> {
        AsyncOperation::ready(self.services_result(Some(uuid)))
    }

    fn services_result(&self, filter: Option<Uuid>) -> Result<ComPtr<GattDeviceServicesResult>, WinrtError> {
        let (status, services) = self.fetch_services(filter)?;
        Ok(GattDeviceServicesResult::new(status, services))
    }

    fn fetch_services(
        &self,
        filter: Option<Uuid>,
    ) -> Result<(GattCommunicationStatus, Vec<ComPtr<GattDeviceService>>), WinrtError> {
        self.check_open()?;
        let matches = |s: &ComPtr<GattDeviceService>| filter.map_or(true, |u| s.uuid() == u);

        if let Some(cached) = self.services.lock().as_ref() {
            return Ok((
                GattCommunicationStatus::Success,
                cached.iter().filter(|s| matches(*s)).cloned().collect(),
            ));
        }

        let records = match client::get_services(&self.link.file, self.link.route) {
            Ok(records) => records,
            Err(e) => {
                debug!("{} service query failed: {}", self.address, e);
                return Ok((GattCommunicationStatus::from_status(e.status()), Vec::new()));
            }
        };
        let this = self.this()?;
        let services: Vec<_> = records
            .iter()
            .map(|record| GattDeviceService::new(&this, *record))
            .collect();
        if !services.is_empty() {
            *self.services.lock() = Some(services.clone());
        }
        Ok((
            GattCommunicationStatus::Success,
            services.into_iter().filter(|s| matches(s)).collect(),
        ))
    }

    /// Whether the device is reached through its own BLE interface
    pub fn is_published(&self) -> bool {
        matches!(self.link.file.pdo(), PdoId::Device { .. })
    }

    /// `IClosable::Close`: stops the status task and drops cached services
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.status_changed.clear();
        self.stop_polling();
        self.services.lock().take();
        debug!("{} closed", self.device_id);
    }
}

impl Drop for BluetoothLEDevice {
    fn drop(&mut self) {
        debug!("releasing {}", self.device_id);
    }
}
