// bthle - Windows Bluetooth LE surfaces over a Unix Bluetooth backend
// WinRT facade classes, the Win32 GATT functional API, and the runtime
// context tying them to a running bus.

pub mod advertisement;
pub mod bluetooth;
pub mod error;
pub mod foundation;
pub mod gatt;
pub mod runtime;
pub mod streams;
pub mod win32;

pub use advertisement::{
    BluetoothLEAdvertisement, BluetoothLEAdvertisementFilter, BluetoothLEAdvertisementReceivedEventArgs,
    BluetoothLEAdvertisementWatcher, BluetoothLEAdvertisementWatcherStatus,
    BluetoothLEAdvertisementWatcherStoppedEventArgs, BluetoothSignalStrengthFilter,
};
pub use bluetooth::{
    BluetoothAdapter, BluetoothConnectionStatus, BluetoothDevice, BluetoothError, BluetoothLEDevice,
};
pub use error::WinrtError;
pub use foundation::{AsyncOperation, AsyncStatus, ComPtr, DateTime, EventRegistrationToken, Inspectable, VectorView};
pub use gatt::{
    GattCharacteristic, GattCharacteristicProperties, GattCommunicationStatus, GattDeviceService,
    GattReadResult, GattValueChangedEventArgs, GattWriteResult,
};
pub use runtime::Runtime;
pub use streams::{Buffer, CryptographicBuffer, DataReader};
