//! `GattCharacteristic`
//!
//! Reads and writes map one-to-one onto IOCTLs on the characteristic's own
//! duplicate of the device handle. `ValueChanged` subscriptions drive a
//! notification task; while it runs, the task holds the facade alive.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bthle_bus::{NotificationPump, PumpKey};
use bthle_ioctl::{client, GattCharacteristicRecord, GattServiceRecord, NtStatus};
use bthle_unix::{BluetoothAddress, WriteType};
use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use super::results::{
    GattClientCharacteristicConfigurationDescriptorValue, GattCommunicationStatus, GattReadClientCharacteristicConfigurationDescriptorResult,
    GattReadResult, GattValueChangedEventArgs, GattWriteResult,
};
use super::service::GattDeviceService;
use crate::bluetooth::DeviceLink;
use crate::error::WinrtError;
use crate::foundation::{
    AsyncOperation, ComPtr, EventRegistrationToken, EventSource, Inspectable, InterfaceId, TypedEventHandler,
};
use crate::runtime::Runtime;
use crate::streams::Buffer;

/// `GattCharacteristicProperties` flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GattCharacteristicProperties(pub u32);

impl GattCharacteristicProperties {
    pub const NONE: Self = Self(0);
    pub const BROADCAST: Self = Self(0x1);
    pub const READ: Self = Self(0x2);
    pub const WRITE_WITHOUT_RESPONSE: Self = Self(0x4);
    pub const WRITE: Self = Self(0x8);
    pub const NOTIFY: Self = Self(0x10);
    pub const INDICATE: Self = Self(0x20);
    pub const AUTHENTICATED_SIGNED_WRITES: Self = Self(0x40);
    pub const EXTENDED_PROPERTIES: Self = Self(0x80);

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    fn from_record(record: &GattCharacteristicRecord) -> Self {
        [
            (record.is_broadcastable, Self::BROADCAST),
            (record.is_readable, Self::READ),
            (record.is_writable_without_response, Self::WRITE_WITHOUT_RESPONSE),
            (record.is_writable, Self::WRITE),
            (record.is_notifiable, Self::NOTIFY),
            (record.is_indicatable, Self::INDICATE),
            (record.is_signed_writable, Self::AUTHENTICATED_SIGNED_WRITES),
            (record.has_extended_properties, Self::EXTENDED_PROPERTIES),
        ]
        .into_iter()
        .filter(|(set, _)| *set != 0)
        .fold(Self::NONE, |acc, (_, flag)| Self(acc.0 | flag.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GattProtectionLevel {
    #[default]
    Plain = 0,
    AuthenticationRequired = 1,
    EncryptionRequired = 2,
    EncryptionAndAuthenticationRequired = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GattWriteOption {
    #[default]
    WriteWithResponse = 0,
    WriteWithoutResponse = 1,
}

/// Both modes go to the device; the bus keeps no value cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BluetoothCacheMode {
    #[default]
    Cached = 0,
    Uncached = 1,
}

pub type ValueChangedHandler = TypedEventHandler<ComPtr<GattCharacteristic>, ComPtr<GattValueChangedEventArgs>>;

pub struct GattCharacteristic {
    this: Weak<GattCharacteristic>,
    service: Weak<GattDeviceService>,
    rt: Runtime,
    address: BluetoothAddress,
    service_record: GattServiceRecord,
    record: GattCharacteristicRecord,
    link: DeviceLink,
    protection_level: Mutex<GattProtectionLevel>,
    cccd: Mutex<GattClientCharacteristicConfigurationDescriptorValue>,
    value_changed: EventSource<ComPtr<GattCharacteristic>, ComPtr<GattValueChangedEventArgs>>,
    pump: Mutex<Option<NotificationPump>>,
    notifying: AtomicBool,
}

impl Inspectable for GattCharacteristic {
    fn runtime_class_name(&self) -> &'static str {
        "Windows.Devices.Bluetooth.GenericAttributeProfile.GattCharacteristic"
    }

    fn interfaces(&self) -> &'static [InterfaceId] {
        &[InterfaceId::GattCharacteristic]
    }
}

impl GattCharacteristic {
    pub(crate) fn new(service: &ComPtr<GattDeviceService>, record: GattCharacteristicRecord) -> ComPtr<Self> {
        ComPtr::new_cyclic(|this| Self {
            this: this.clone(),
            service: service.downgrade(),
            rt: service.runtime().clone(),
            address: service.address(),
            service_record: *service.record(),
            record,
            link: service.link().duplicate(),
            protection_level: Mutex::new(GattProtectionLevel::default()),
            cccd: Mutex::new(GattClientCharacteristicConfigurationDescriptorValue::None),
            value_changed: EventSource::new(),
            pump: Mutex::new(None),
            notifying: AtomicBool::new(false),
        })
    }

    pub fn uuid(&self) -> Uuid {
        self.record.uuid()
    }

    pub fn attribute_handle(&self) -> u16 {
        self.record.attribute_handle
    }

    pub fn characteristic_properties(&self) -> GattCharacteristicProperties {
        GattCharacteristicProperties::from_record(&self.record)
    }

    pub fn service(&self) -> Option<ComPtr<GattDeviceService>> {
        ComPtr::upgrade(&self.service)
    }

    pub fn protection_level(&self) -> GattProtectionLevel {
        *self.protection_level.lock()
    }

    pub fn set_protection_level(&self, level: GattProtectionLevel) {
        *self.protection_level.lock() = level;
    }

    fn read(&self) -> Result<Vec<u8>, NtStatus> {
        client::read_characteristic(&self.link.file, self.link.route, &self.service_record, &self.record)
            .map_err(|e| e.status())
    }

    fn write(&self, value: &Buffer, option: GattWriteOption) -> Result<(), NtStatus> {
        let write_type = match option {
            GattWriteOption::WriteWithResponse => WriteType::WithResponse,
            GattWriteOption::WriteWithoutResponse => WriteType::WithoutResponse,
        };
        value
            .with_data(|data| {
                client::write_characteristic(
                    &self.link.file,
                    self.link.route,
                    &self.service_record,
                    &self.record,
                    data,
                    write_type,
                )
            })
            .map_err(|e| e.status())
    }

    pub fn read_value_async(&self) -> ComPtr<AsyncOperation<ComPtr<GattReadResult>>> {
        AsyncOperation::completed(GattReadResult::from_read(self.read()))
    }

    pub fn read_value_with_cache_mode_async(
        &self,
        _mode: BluetoothCacheMode,
    ) -> ComPtr<AsyncOperation<ComPtr<GattReadResult>>> {
        self.read_value_async()
    }

    pub fn write_value_async(&self, value: &Buffer) -> ComPtr<AsyncOperation<GattCommunicationStatus>> {
        self.write_value_with_option_async(value, GattWriteOption::WriteWithResponse)
    }

    pub fn write_value_with_option_async(
        &self,
        value: &Buffer,
        option: GattWriteOption,
    ) -> ComPtr<AsyncOperation<GattCommunicationStatus>> {
        let status = match self.write(value, option) {
            Ok(()) => GattCommunicationStatus::Success,
            Err(st) => GattCommunicationStatus::from_status(st),
        };
        AsyncOperation::completed(status)
    }

    pub fn write_value_with_result_async(&self, value: &Buffer) -> ComPtr<AsyncOperation<ComPtr<GattWriteResult>>> {
        AsyncOperation::completed(GattWriteResult::from_write(
            self.write(value, GattWriteOption::WriteWithResponse),
        ))
    }

    /// The descriptor value last written through this facade
    pub fn read_client_characteristic_configuration_descriptor_async(
        &self,
    ) -> ComPtr<AsyncOperation<ComPtr<GattReadClientCharacteristicConfigurationDescriptorResult>>> {
        AsyncOperation::completed(GattReadClientCharacteristicConfigurationDescriptorResult::new(
            GattCommunicationStatus::Success,
            *self.cccd.lock(),
        ))
    }

    pub fn write_client_characteristic_configuration_descriptor_async(
        &self,
        value: GattClientCharacteristicConfigurationDescriptorValue,
    ) -> ComPtr<AsyncOperation<GattCommunicationStatus>> {
        let status = match self.set_notify(value != GattClientCharacteristicConfigurationDescriptorValue::None) {
            Ok(()) => {
                *self.cccd.lock() = value;
                GattCommunicationStatus::Success
            }
            Err(st) => GattCommunicationStatus::from_status(st),
        };
        AsyncOperation::completed(status)
    }

    fn set_notify(&self, enable: bool) -> Result<(), NtStatus> {
        client::set_notify(&self.link.file, self.link.route, &self.service_record, &self.record, enable)
            .map_err(|e| e.status())?;
        self.notifying.store(enable, Ordering::Release);
        Ok(())
    }

    /// `add_ValueChanged`. The first handler enables notifications on the
    /// device and starts the notification task.
    pub fn add_value_changed(&self, handler: ValueChangedHandler) -> Result<EventRegistrationToken, WinrtError> {
        let (token, first) = self.value_changed.add(handler);
        if first {
            if let Err(e) = self.start_notifications() {
                self.value_changed.remove(token);
                return Err(e);
            }
        }
        Ok(token)
    }

    /// `remove_ValueChanged`. Removing the last handler stops the task and
    /// disables notifications again.
    pub fn remove_value_changed(&self, token: EventRegistrationToken) {
        let (found, empty) = self.value_changed.remove(token);
        if !(found && empty) {
            return;
        }
        let pump = self.pump.lock().take();
        if let Some(pump) = pump {
            if !pump.stop() {
                warn!("notification task for {} did not stop", self.uuid());
            }
        }
        if let Err(st) = self.set_notify(false) {
            debug!("disabling notifications on {} failed: {}", self.uuid(), st);
        }
        *self.cccd.lock() = GattClientCharacteristicConfigurationDescriptorValue::None;
    }

    fn start_notifications(&self) -> Result<(), WinrtError> {
        let this = ComPtr::upgrade(&self.this).ok_or_else(WinrtError::closed)?;

        // Reads block on their own handle so cancelling them leaves ours alone
        let reader = Arc::new(self.link.file.duplicate());
        let read_handle = Arc::clone(&reader);
        let route = self.link.route;
        let service = self.service_record;
        let record = self.record;
        let key = PumpKey {
            address: self.address,
            service: service.attribute_handle,
            characteristic: record.attribute_handle,
        };

        let pump = NotificationPump::start(
            key,
            self.rt.config(),
            Box::new(move || {
                client::read_notification(&*read_handle, route, &service, &record).map_err(|e| e.status())
            }),
            Arc::new(move || reader.cancel_io()),
            move |notification| {
                let args = GattValueChangedEventArgs::new(notification);
                this.value_changed.invoke(&this, &args);
            },
        )?;
        // Until SET_NOTIFY the task only sees timeouts; a busy key must not
        // reach the device
        if !self.notifying.load(Ordering::Acquire) {
            if let Err(st) = self.set_notify(true) {
                if !pump.stop() {
                    warn!("notification task for {} did not stop", self.uuid());
                }
                return Err(st.into());
            }
        }
        debug!("{} {} notifying", self.address, self.uuid());
        *self.pump.lock() = Some(pump);
        let mut cccd = self.cccd.lock();
        if *cccd == GattClientCharacteristicConfigurationDescriptorValue::None {
            *cccd = GattClientCharacteristicConfigurationDescriptorValue::Notify;
        }
        Ok(())
    }

    /// Whether a notification task is delivering values for this facade
    pub fn is_notifying(&self) -> bool {
        self.pump.lock().as_ref().is_some_and(|p| p.is_running())
    }
}
