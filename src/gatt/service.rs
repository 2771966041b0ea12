//! `GattDeviceService`

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;

use bthle_ioctl::{client, GattServiceRecord, Win32Error};
use bthle_unix::BluetoothAddress;
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::characteristic::GattCharacteristic;
use super::results::{GattCharacteristicsResult, GattCommunicationStatus};
use crate::bluetooth::{BluetoothLEDevice, DeviceLink};
use crate::error::WinrtError;
use crate::foundation::{AsyncOperation, ComPtr, Inspectable, InterfaceId, VectorView};
use crate::runtime::Runtime;

type Characteristics = Vec<ComPtr<GattCharacteristic>>;

pub struct GattDeviceService {
    this: Weak<GattDeviceService>,
    device: Weak<BluetoothLEDevice>,
    rt: Runtime,
    address: BluetoothAddress,
    device_id: String,
    record: GattServiceRecord,
    link: DeviceLink,
    characteristics: Mutex<Option<Characteristics>>,
    closed: AtomicBool,
}

impl Inspectable for GattDeviceService {
    fn runtime_class_name(&self) -> &'static str {
        "Windows.Devices.Bluetooth.GenericAttributeProfile.GattDeviceService"
    }

    fn interfaces(&self) -> &'static [InterfaceId] {
        &[
            InterfaceId::GattDeviceService,
            InterfaceId::GattDeviceService3,
            InterfaceId::Closable,
        ]
    }
}

impl GattDeviceService {
    pub(crate) fn new(device: &ComPtr<BluetoothLEDevice>, record: GattServiceRecord) -> ComPtr<Self> {
        ComPtr::new_cyclic(|this| Self {
            this: this.clone(),
            device: device.downgrade(),
            rt: device.runtime().clone(),
            address: device.address(),
            device_id: device.device_id().to_string(),
            record,
            link: device.link().duplicate(),
            characteristics: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
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

    pub(crate) fn record(&self) -> &GattServiceRecord {
        &self.record
    }

    pub fn uuid(&self) -> Uuid {
        self.record.uuid()
    }

    pub fn attribute_handle(&self) -> u16 {
        self.record.attribute_handle
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Owning device, while it is still alive
    pub fn device(&self) -> Option<ComPtr<BluetoothLEDevice>> {
        ComPtr::upgrade(&self.device)
    }

    /// `GetCharacteristics(uuid)` (v1): synchronous, filtered by UUID
    pub fn get_characteristics(&self, uuid: Uuid) -> Result<ComPtr<VectorView<ComPtr<GattCharacteristic>>>, WinrtError> {
        let (status, _, list) = self.fetch(Some(uuid))?;
        if status != GattCommunicationStatus::Success {
            return Err(WinrtError::from(Win32Error::DEVICE_NOT_CONNECTED));
        }
        Ok(VectorView::new(list))
    }

    pub fn get_characteristics_async(&self) -> ComPtr<AsyncOperation<ComPtr<GattCharacteristicsResult>>> {
        AsyncOperation::ready(self.result(None))
    }

    pub fn get_characteristics_for_uuid_async(
        &self,
        uuid: Uuid,
    ) -> ComPtr<AsyncOperation<ComPtr<GattCharacteristicsResult>>> {
        AsyncOperation::ready(self.result(Some(uuid)))
    }

    fn result(&self, filter: Option<Uuid>) -> Result<ComPtr<GattCharacteristicsResult>, WinrtError> {
        let (status, protocol_error, list) = self.fetch(filter)?;
        Ok(GattCharacteristicsResult::new(status, protocol_error, list))
    }

    /// Characteristics come from the driver once; the first unfiltered
    /// success is kept and serves every later call.
    fn fetch(&self, filter: Option<Uuid>) -> Result<(GattCommunicationStatus, Option<u8>, Characteristics), WinrtError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WinrtError::closed());
        }
        let keep = |c: &ComPtr<GattCharacteristic>| filter.map_or(true, |u| c.uuid() == u);

        if let Some(cached) = self.characteristics.lock().as_ref() {
            return Ok((
                GattCommunicationStatus::Success,
                None,
                cached.iter().filter(|c| keep(*c)).cloned().collect(),
            ));
        }

        let records = match client::get_characteristics(&self.link.file, self.link.route, &self.record) {
            Ok(records) => records,
            Err(e) => {
                let status = e.status();
                debug!("characteristics of {} failed: {}", self.uuid(), status);
                return Ok((
                    GattCommunicationStatus::from_status(status),
                    GattCommunicationStatus::protocol_error(status),
                    Vec::new(),
                ));
            }
        };
        let this = ComPtr::upgrade(&self.this).ok_or_else(WinrtError::closed)?;
        let all: Characteristics = records
            .iter()
            .map(|record| GattCharacteristic::new(&this, *record))
            .collect();
        if filter.is_none() {
            *self.characteristics.lock() = Some(all.clone());
        }
        Ok((
            GattCommunicationStatus::Success,
            None,
            all.into_iter().filter(|c| keep(c)).collect(),
        ))
    }

    /// `IClosable::Close`; cached characteristics stay usable on their own
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.characteristics.lock().take();
        }
    }
}
