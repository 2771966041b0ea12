//! Windows.Devices.Bluetooth.GenericAttributeProfile

pub mod characteristic;
pub mod results;
pub mod service;

pub use characteristic::{
    BluetoothCacheMode, GattCharacteristic, GattCharacteristicProperties, GattProtectionLevel, GattWriteOption,
    ValueChangedHandler,
};
pub use results::{
    protocol_error, GattCharacteristicsResult, GattClientCharacteristicConfigurationDescriptorValue,
    GattCommunicationStatus, GattDeviceServicesResult, GattReadClientCharacteristicConfigurationDescriptorResult,
    GattReadResult, GattValueChangedEventArgs, GattWriteResult,
};
pub use service::GattDeviceService;
