//! GATT result objects and communication status

use bthle_ioctl::NtStatus;
use bthle_bus::NotificationValue;

use super::characteristic::GattCharacteristic;
use super::service::GattDeviceService;
use crate::foundation::{ComPtr, DateTime, Inspectable, InterfaceId, VectorView};
use crate::streams::Buffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattCommunicationStatus {
    Success = 0,
    Unreachable = 1,
    ProtocolError = 2,
    AccessDenied = 3,
}

/// ATT error codes reported alongside `ProtocolError`
pub mod protocol_error {
    pub const INVALID_HANDLE: u8 = 0x01;
    pub const READ_NOT_PERMITTED: u8 = 0x02;
    pub const WRITE_NOT_PERMITTED: u8 = 0x03;
    pub const INSUFFICIENT_AUTHORIZATION: u8 = 0x08;
}

impl GattCommunicationStatus {
    /// Link-level failures read as unreachable, rejected requests as
    /// protocol errors.
    pub fn from_status(status: NtStatus) -> Self {
        match status {
            NtStatus::SUCCESS => Self::Success,
            NtStatus::ACCESS_DENIED | NtStatus::INVALID_PARAMETER => Self::ProtocolError,
            _ => Self::Unreachable,
        }
    }

    pub(crate) fn protocol_error(status: NtStatus) -> Option<u8> {
        match status {
            NtStatus::INVALID_PARAMETER => Some(protocol_error::INVALID_HANDLE),
            NtStatus::ACCESS_DENIED => Some(protocol_error::INSUFFICIENT_AUTHORIZATION),
            _ => None,
        }
    }
}

macro_rules! gatt_class {
    ($ty:ident, $iface:ident) => {
        impl Inspectable for $ty {
            fn runtime_class_name(&self) -> &'static str {
                concat!(
                    "Windows.Devices.Bluetooth.GenericAttributeProfile.",
                    stringify!($ty)
                )
            }

            fn interfaces(&self) -> &'static [InterfaceId] {
                &[InterfaceId::$iface]
            }
        }
    };
}

pub struct GattDeviceServicesResult {
    status: GattCommunicationStatus,
    protocol_error: Option<u8>,
    services: ComPtr<VectorView<ComPtr<GattDeviceService>>>,
}

gatt_class!(GattDeviceServicesResult, GattDeviceServicesResult);

impl GattDeviceServicesResult {
    pub(crate) fn new(status: GattCommunicationStatus, services: Vec<ComPtr<GattDeviceService>>) -> ComPtr<Self> {
        ComPtr::new(Self {
            status,
            protocol_error: None,
            services: VectorView::new(services),
        })
    }

    pub fn status(&self) -> GattCommunicationStatus {
        self.status
    }

    pub fn protocol_error(&self) -> Option<u8> {
        self.protocol_error
    }

    pub fn services(&self) -> ComPtr<VectorView<ComPtr<GattDeviceService>>> {
        self.services.clone()
    }
}

pub struct GattCharacteristicsResult {
    status: GattCommunicationStatus,
    protocol_error: Option<u8>,
    characteristics: ComPtr<VectorView<ComPtr<GattCharacteristic>>>,
}

gatt_class!(GattCharacteristicsResult, GattCharacteristicsResult);

impl GattCharacteristicsResult {
    pub(crate) fn new(
        status: GattCommunicationStatus,
        protocol_error: Option<u8>,
        characteristics: Vec<ComPtr<GattCharacteristic>>,
    ) -> ComPtr<Self> {
        ComPtr::new(Self {
            status,
            protocol_error,
            characteristics: VectorView::new(characteristics),
        })
    }

    pub fn status(&self) -> GattCommunicationStatus {
        self.status
    }

    pub fn protocol_error(&self) -> Option<u8> {
        self.protocol_error
    }

    pub fn characteristics(&self) -> ComPtr<VectorView<ComPtr<GattCharacteristic>>> {
        self.characteristics.clone()
    }
}

pub struct GattReadResult {
    status: GattCommunicationStatus,
    protocol_error: Option<u8>,
    value: Option<ComPtr<Buffer>>,
}

gatt_class!(GattReadResult, GattReadResult);

impl GattReadResult {
    pub(crate) fn from_read(result: Result<Vec<u8>, NtStatus>) -> ComPtr<Self> {
        let (status, protocol_error, value) = match result {
            Ok(bytes) => (GattCommunicationStatus::Success, None, Some(Buffer::from_bytes(&bytes))),
            Err(st) => (
                GattCommunicationStatus::from_status(st),
                GattCommunicationStatus::protocol_error(st),
                None,
            ),
        };
        ComPtr::new(Self {
            status,
            protocol_error,
            value,
        })
    }

    pub fn status(&self) -> GattCommunicationStatus {
        self.status
    }

    pub fn protocol_error(&self) -> Option<u8> {
        self.protocol_error
    }

    /// The value read; `None` unless the read succeeded
    pub fn value(&self) -> Option<ComPtr<Buffer>> {
        self.value.clone()
    }
}

pub struct GattWriteResult {
    status: GattCommunicationStatus,
    protocol_error: Option<u8>,
}

gatt_class!(GattWriteResult, GattWriteResult);

impl GattWriteResult {
    pub(crate) fn from_write(result: Result<(), NtStatus>) -> ComPtr<Self> {
        let (status, protocol_error) = match result {
            Ok(()) => (GattCommunicationStatus::Success, None),
            Err(st) => (
                GattCommunicationStatus::from_status(st),
                GattCommunicationStatus::protocol_error(st),
            ),
        };
        ComPtr::new(Self {
            status,
            protocol_error,
        })
    }

    pub fn status(&self) -> GattCommunicationStatus {
        self.status
    }

    pub fn protocol_error(&self) -> Option<u8> {
        self.protocol_error
    }
}

/// Value of the Client Characteristic Configuration descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GattClientCharacteristicConfigurationDescriptorValue {
    #[default]
    None = 0,
    Notify = 1,
    Indicate = 2,
}

pub struct GattReadClientCharacteristicConfigurationDescriptorResult {
    status: GattCommunicationStatus,
    value: GattClientCharacteristicConfigurationDescriptorValue,
}

gatt_class!(
    GattReadClientCharacteristicConfigurationDescriptorResult,
    GattReadClientCharacteristicConfigurationDescriptorResult
);

impl GattReadClientCharacteristicConfigurationDescriptorResult {
    pub(crate) fn new(
        status: GattCommunicationStatus,
        value: GattClientCharacteristicConfigurationDescriptorValue,
    ) -> ComPtr<Self> {
        ComPtr::new(Self { status, value })
    }

    pub fn status(&self) -> GattCommunicationStatus {
        self.status
    }

    pub fn client_characteristic_configuration_descriptor(
        &self,
    ) -> GattClientCharacteristicConfigurationDescriptorValue {
        self.value
    }
}

pub struct GattValueChangedEventArgs {
    value: ComPtr<Buffer>,
    timestamp: DateTime,
}

gatt_class!(GattValueChangedEventArgs, GattValueChangedEventArgs);

impl GattValueChangedEventArgs {
    pub(crate) fn new(notification: NotificationValue) -> ComPtr<Self> {
        ComPtr::new(Self {
            value: Buffer::from_bytes(&notification.value),
            timestamp: DateTime {
                universal_time: notification.timestamp as i64,
            },
        })
    }

    pub fn characteristic_value(&self) -> ComPtr<Buffer> {
        self.value.clone()
    }

    pub fn timestamp(&self) -> DateTime {
        self.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            GattCommunicationStatus::from_status(NtStatus::DEVICE_NOT_CONNECTED),
            GattCommunicationStatus::Unreachable
        );
        assert_eq!(
            GattCommunicationStatus::from_status(NtStatus::ACCESS_DENIED),
            GattCommunicationStatus::ProtocolError
        );
        assert_eq!(
            GattCommunicationStatus::from_status(NtStatus::INVALID_PARAMETER),
            GattCommunicationStatus::ProtocolError
        );
        assert_eq!(
            GattCommunicationStatus::from_status(NtStatus::IO_TIMEOUT),
            GattCommunicationStatus::Unreachable
        );
    }

    #[test]
    fn read_result_carries_value_only_on_success() {
        let ok = GattReadResult::from_read(Ok(vec![0x06, 0x48]));
        assert_eq!(ok.status(), GattCommunicationStatus::Success);
        assert_eq!(ok.value().unwrap().to_vec(), vec![0x06, 0x48]);

        let failed = GattReadResult::from_read(Err(NtStatus::INVALID_PARAMETER));
        assert_eq!(failed.status(), GattCommunicationStatus::ProtocolError);
        assert_eq!(failed.protocol_error(), Some(protocol_error::INVALID_HANDLE));
        assert!(failed.value().is_none());
    }

    #[test]
    fn class_names_are_fully_qualified() {
        let result = GattWriteResult::from_write(Ok(()));
        assert_eq!(
            result.runtime_class_name(),
            "Windows.Devices.Bluetooth.GenericAttributeProfile.GattWriteResult"
        );
    }
}
