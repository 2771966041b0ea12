//! Host BLE backend layer for the bthle bus driver
//!
//! This crate hides the host BLE API (BlueZ, CoreBluetooth, or the in-memory
//! simulator) behind one narrow command interface:
//!
//! - `UnixConnection`: the unix-call dispatcher and its typed wrappers
//! - `Event`: the asynchronous event stream consumed by the bus pump
//! - `NameTable`: refcounted interning of backend object paths

pub mod backend;
pub mod error;
pub mod event;
pub mod name;
pub mod sim;
pub mod types;

pub use backend::{Backend, UnixConnection, UnixFunc, UnixOutput, UnixParams};
pub use error::UnixError;
pub use event::Event;
pub use name::{CharacteristicHandle, DeviceHandle, NameTable, RadioHandle, ServiceHandle, UnixName};
pub use sim::{SimBackend, SimCommand, SimHost};
pub use types::{
    device_prop, parse_gatt_uuid, radio_prop, truncate_name, uuid_from_u16, uuid_to_u16,
    AuthMethod, BluetoothAddress, CharacteristicInfo, CharacteristicProperties, DeviceProperties,
    PairingToken, PropMask, RadioPropValue, RadioProperties, WriteType, MAX_NAME_SIZE,
};
