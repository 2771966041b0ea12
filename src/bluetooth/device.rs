//! `Windows.Devices.Bluetooth.BluetoothDevice`
//!
//! Classic view of a remote device. Everything comes from the radio's
//! device cache, so it works for devices that never exposed GATT.

use bthle_bus::FileHandle;
use bthle_ioctl::wire::{BDIF_CONNECTED, BDIF_NAME};
use bthle_unix::BluetoothAddress;

use super::{device_info, id_address, BluetoothConnectionStatus};
use crate::error::WinrtError;
use crate::foundation::{AsyncOperation, ComPtr, Inspectable, InterfaceId};
use crate::runtime::Runtime;

pub struct BluetoothDevice {
    radio: FileHandle,
    address: BluetoothAddress,
    class_of_device: u32,
    device_id: String,
}

impl Inspectable for BluetoothDevice {
    fn runtime_class_name(&self) -> &'static str {
        "Windows.Devices.Bluetooth.BluetoothDevice"
    }

    fn interfaces(&self) -> &'static [InterfaceId] {
        &[InterfaceId::BluetoothDevice, InterfaceId::Closable]
    }
}

impl BluetoothDevice {
    /// `FromBluetoothAddressAsync`; `None` when the radio does not know it
    pub fn from_bluetooth_address_async(
        rt: &Runtime,
        address: u64,
    ) -> Result<ComPtr<AsyncOperation<Option<ComPtr<Self>>>>, WinrtError> {
        let rt = rt.clone();
        AsyncOperation::spawn("device-from-address", move || {
            let address = BluetoothAddress::from_u64(address);
            let Ok(radio) = rt.open_first_radio() else {
                return Ok(None);
            };
            let Some(info) = device_info(&radio, address)? else {
                return Ok(None);
            };
            Ok(Some(ComPtr::new(Self {
                radio,
                address,
                class_of_device: info.class_of_device,
                device_id: format!("Bluetooth#Bluetooth{}", id_address(address)),
            })))
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn bluetooth_address(&self) -> u64 {
        self.address.as_u64()
    }

    pub fn class_of_device(&self) -> u32 {
        self.class_of_device
    }

    pub fn name(&self) -> Result<String, WinrtError> {
        Ok(device_info(&self.radio, self.address)?
            .filter(|info| info.flags & BDIF_NAME != 0)
            .map(|info| info.name())
            .unwrap_or_default())
    }

    /// Disconnected once the radio forgets the device
    pub fn connection_status(&self) -> Result<BluetoothConnectionStatus, WinrtError> {
        let connected = device_info(&self.radio, self.address)?
            .is_some_and(|info| info.flags & BDIF_CONNECTED != 0);
        Ok(connected.into())
    }
}
