//! `Windows.Devices.Bluetooth.BluetoothAdapter`

use bthle_bus::FileHandle;
use bthle_ioctl::client;
use bthle_ioctl::wire::LocalRadioInfo;
use bthle_unix::BluetoothAddress;
use tracing::debug;

use super::id_address;
use crate::error::WinrtError;
use crate::foundation::{AsyncOperation, ComPtr, Inspectable, InterfaceId};
use crate::runtime::Runtime;

pub struct BluetoothAdapter {
    radio: FileHandle,
    info: LocalRadioInfo,
    device_id: String,
}

impl Inspectable for BluetoothAdapter {
    fn runtime_class_name(&self) -> &'static str {
        "Windows.Devices.Bluetooth.BluetoothAdapter"
    }

    fn interfaces(&self) -> &'static [InterfaceId] {
        &[InterfaceId::BluetoothAdapter]
    }
}

impl BluetoothAdapter {
    /// `GetDefaultAsync`: the first radio, or `None` without one
    pub fn get_default_async(rt: &Runtime) -> Result<ComPtr<AsyncOperation<Option<ComPtr<Self>>>>, WinrtError> {
        let rt = rt.clone();
        AsyncOperation::spawn("adapter-default", move || {
            let Ok(radio) = rt.open_first_radio() else {
                debug!("no radio for the default adapter");
                return Ok(None);
            };
            let info = client::get_local_info(&radio)?;
            let device_id = format!(
                "BluetoothAdapter#{}",
                id_address(BluetoothAddress::from_u64(info.address))
            );
            Ok(Some(ComPtr::new(Self {
                radio,
                info,
                device_id,
            })))
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn bluetooth_address(&self) -> u64 {
        self.info.address
    }

    /// Current radio name, re-read from the driver
    pub fn name(&self) -> Result<String, WinrtError> {
        Ok(client::get_local_info(&self.radio)?.name())
    }

    pub fn is_low_energy_supported(&self) -> bool {
        true
    }

    /// BR/EDR profiles are outside this stack
    pub fn is_classic_supported(&self) -> bool {
        false
    }

    pub fn is_central_role_supported(&self) -> bool {
        true
    }

    pub fn is_peripheral_role_supported(&self) -> bool {
        false
    }

    pub fn is_advertisement_offload_supported(&self) -> bool {
        false
    }

    pub fn manufacturer(&self) -> u16 {
        self.info.manufacturer
    }
}
