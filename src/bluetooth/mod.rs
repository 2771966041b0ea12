//! Windows.Devices.Bluetooth classes

pub mod adapter;
pub mod device;
pub mod le_device;

use bthle_bus::pnp::radio_symlink;
use bthle_bus::{FileHandle, InterfaceClass, PdoId};
use bthle_ioctl::wire::DeviceInfo;
use bthle_ioctl::{client, Route, Win32Error};
use bthle_unix::BluetoothAddress;

use crate::error::WinrtError;
use crate::runtime::Runtime;

pub use adapter::BluetoothAdapter;
pub use device::BluetoothDevice;
pub use le_device::BluetoothLEDevice;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BluetoothConnectionStatus {
    Disconnected = 0,
    Connected = 1,
}

impl From<bool> for BluetoothConnectionStatus {
    fn from(connected: bool) -> Self {
        if connected {
            Self::Connected
        } else {
            Self::Disconnected
        }
    }
}

/// `Windows.Devices.Bluetooth.BluetoothError`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BluetoothError {
    Success = 0,
    RadioNotAvailable = 1,
    ResourceInUse = 2,
    DeviceNotConnected = 3,
    OtherError = 4,
    DisabledByPolicy = 5,
    NotSupported = 6,
    DisabledByUser = 7,
    ConsentRequired = 8,
    TransportNotSupported = 9,
}

impl From<WinrtError> for BluetoothError {
    fn from(err: WinrtError) -> Self {
        match err.win32() {
            Some(Win32Error::NOT_FOUND) | Some(Win32Error::DEVICE_REMOVED) => Self::RadioNotAvailable,
            Some(Win32Error::BUSY) => Self::ResourceInUse,
            Some(Win32Error::DEVICE_NOT_CONNECTED) => Self::DeviceNotConnected,
            Some(Win32Error::NOT_SUPPORTED) => Self::NotSupported,
            _ => Self::OtherError,
        }
    }
}

/// An open device file plus how GATT requests on it are addressed: the
/// device's own BLE interface, or a radio with the address prefixed.
pub(crate) struct DeviceLink {
    pub file: FileHandle,
    pub route: Route,
}

impl DeviceLink {
    /// Independently closeable link to the same device
    pub fn duplicate(&self) -> Self {
        Self {
            file: self.file.duplicate(),
            route: self.route,
        }
    }

    pub fn radio_index(&self) -> u32 {
        match self.file.pdo() {
            PdoId::Radio(index) => index,
            PdoId::Device { radio, .. } => radio,
        }
    }
}

/// Lowercase colon form used inside device ids
pub(crate) fn id_address(address: BluetoothAddress) -> String {
    address.to_string().to_lowercase()
}

pub(crate) fn open_radio(rt: &Runtime, index: u32) -> Result<FileHandle, WinrtError> {
    let radio = rt
        .bus()
        .graph()
        .radio(index)
        .ok_or(WinrtError::from(Win32Error::NOT_FOUND))?;
    let path = radio_symlink(InterfaceClass::BthRadio, &radio.hw_name, radio.index);
    Ok(rt.bus().open(&path)?)
}

/// The radio driver's cached record for `address` (`IOCTL_BTH_GET_DEVICE_INFO`)
pub(crate) fn device_info(radio: &FileHandle, address: BluetoothAddress) -> Result<Option<DeviceInfo>, WinrtError> {
    Ok(client::get_device_info(radio)?
        .into_iter()
        .find(|info| info.address() == address))
}

/// Local radio address for device ids
pub(crate) fn radio_address(rt: &Runtime, index: u32) -> Option<BluetoothAddress> {
    rt.bus().graph().radio_props(index)?.address()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn radio_loss_maps_to_radio_not_available() {
        let err = WinrtError::from(Win32Error::NOT_FOUND);
        assert_eq!(BluetoothError::from(err), BluetoothError::RadioNotAvailable);
        let err = WinrtError::from(Win32Error::GEN_FAILURE);
        assert_eq!(BluetoothError::from(err), BluetoothError::OtherError);
    }

    #[test]
    fn connection_status_from_flag() {
        assert_eq!(BluetoothConnectionStatus::from(true), BluetoothConnectionStatus::Connected);
        assert_eq!(BluetoothConnectionStatus::from(false), BluetoothConnectionStatus::Disconnected);
    }
}
