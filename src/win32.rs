//! Win32 `BluetoothGATT*` functional API
//!
//! Thin wrappers over the IOCTL client with the Win32 calling
//! conventions: errors are Win32 codes, and list or value getters take a
//! caller buffer and report `ERROR_MORE_DATA` with the required count when
//! it is too small.

use std::sync::Arc;

use bthle_bus::{AuthCallback, AuthRegistration, FileHandle, InterfaceClass};
use bthle_ioctl::wire::{
    DeviceInfo, BDIF_CONNECTED, BDIF_NAME, BDIF_PAIRED, BDIF_PERSONAL, LOCAL_RADIO_CONNECTABLE,
    LOCAL_RADIO_DISCOVERABLE,
};
use bthle_ioctl::{client, GattCharacteristicRecord, GattServiceRecord, IoctlError, Route, Win32Error};
use bthle_unix::{BluetoothAddress, WriteType};
use thiserror::Error;
use tracing::debug;

use crate::runtime::Runtime;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Win32ApiError {
    /// Buffer too small; retry with room for `required` entries
    #[error("more data: {required} entries required")]
    MoreData { required: usize },

    #[error("{0}")]
    Win32(Win32Error),
}

impl Win32ApiError {
    pub fn code(&self) -> Win32Error {
        match self {
            Self::MoreData { .. } => Win32Error::MORE_DATA,
            Self::Win32(e) => *e,
        }
    }
}

impl From<Win32Error> for Win32ApiError {
    fn from(e: Win32Error) -> Self {
        Self::Win32(e)
    }
}

impl From<IoctlError> for Win32ApiError {
    fn from(e: IoctlError) -> Self {
        Self::Win32(e.status().to_win32())
    }
}

pub type Result<T> = std::result::Result<T, Win32ApiError>;

/// `BLUETOOTH_RADIO_INFO`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioInfo {
    pub address: BluetoothAddress,
    pub name: String,
    pub class_of_device: u32,
    pub lmp_subversion: u16,
    pub manufacturer: u16,
    pub discoverable: bool,
    pub connectable: bool,
}

/// `BLUETOOTH_DEVICE_INFO`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub address: BluetoothAddress,
    pub class_of_device: u32,
    pub connected: bool,
    pub remembered: bool,
    pub authenticated: bool,
    pub name: String,
}

impl From<&DeviceInfo> for DeviceRecord {
    fn from(info: &DeviceInfo) -> Self {
        Self {
            address: info.address(),
            class_of_device: info.class_of_device,
            connected: info.flags & BDIF_CONNECTED != 0,
            remembered: info.flags & BDIF_PERSONAL != 0,
            authenticated: info.flags & BDIF_PAIRED != 0,
            name: if info.flags & BDIF_NAME != 0 {
                info.name()
            } else {
                String::new()
            },
        }
    }
}

/// `BLUETOOTH_DEVICE_SEARCH_PARAMS`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSearchParams {
    pub return_authenticated: bool,
    pub return_remembered: bool,
    pub return_unknown: bool,
    pub return_connected: bool,
}

impl Default for DeviceSearchParams {
    fn default() -> Self {
        Self {
            return_authenticated: true,
            return_remembered: true,
            return_unknown: true,
            return_connected: true,
        }
    }
}

impl DeviceSearchParams {
    fn admits(&self, device: &DeviceRecord) -> bool {
        (self.return_authenticated && device.authenticated)
            || (self.return_remembered && device.remembered)
            || (self.return_connected && device.connected)
            || (self.return_unknown && !device.remembered && !device.authenticated)
    }
}

/// `BluetoothFindFirstRadio`/`BluetoothFindNextRadio`: open every radio
pub fn find_radios(rt: &Runtime) -> Result<Vec<FileHandle>> {
    let paths = rt.bus().interfaces(InterfaceClass::BthRadio);
    if paths.is_empty() {
        return Err(Win32Error::NO_MORE_ITEMS.into());
    }
    paths
        .iter()
        .map(|path| rt.bus().open(path).map_err(|e| Win32ApiError::Win32(e.status().to_win32())))
        .collect()
}

/// `BluetoothGetRadioInfo`
pub fn get_radio_info(radio: &FileHandle) -> Result<RadioInfo> {
    let info = client::get_local_info(radio)?;
    Ok(RadioInfo {
        address: BluetoothAddress::from_u64(info.address),
        name: info.name(),
        class_of_device: info.class_of_device,
        lmp_subversion: info.lmp_subversion,
        manufacturer: info.manufacturer,
        discoverable: info.flags & LOCAL_RADIO_DISCOVERABLE != 0,
        connectable: info.flags & LOCAL_RADIO_CONNECTABLE != 0,
    })
}

/// `BluetoothFindFirstDevice`/`BluetoothFindNextDevice` over one radio
pub fn find_devices(radio: &FileHandle, params: &DeviceSearchParams) -> Result<Vec<DeviceRecord>> {
    let devices: Vec<DeviceRecord> = client::get_device_info(radio)?
        .iter()
        .map(DeviceRecord::from)
        .filter(|d| params.admits(d))
        .collect();
    if devices.is_empty() {
        return Err(Win32Error::NO_MORE_ITEMS.into());
    }
    Ok(devices)
}

/// Copy `items` into `out` or report how many entries are needed
fn fill<T: Copy>(items: &[T], out: &mut [T]) -> Result<usize> {
    if items.len() > out.len() {
        return Err(Win32ApiError::MoreData {
            required: items.len(),
        });
    }
    out[..items.len()].copy_from_slice(items);
    Ok(items.len())
}

/// `BluetoothGATTGetServices`
pub fn gatt_get_services(device: &FileHandle, out: &mut [GattServiceRecord]) -> Result<usize> {
    fill(&client::get_services(device, Route::Device)?, out)
}

/// `BluetoothGATTGetCharacteristics`
pub fn gatt_get_characteristics(
    device: &FileHandle,
    service: &GattServiceRecord,
    out: &mut [GattCharacteristicRecord],
) -> Result<usize> {
    fill(&client::get_characteristics(device, Route::Device, service)?, out)
}

/// The service a characteristic record belongs to
fn owning_service(device: &FileHandle, characteristic: &GattCharacteristicRecord) -> Result<GattServiceRecord> {
    client::get_services(device, Route::Device)?
        .into_iter()
        .find(|s| s.attribute_handle == characteristic.service_handle)
        .ok_or(Win32ApiError::Win32(Win32Error::NOT_FOUND))
}

/// `BluetoothGATTGetCharacteristicValue`; returns the value length
pub fn gatt_get_characteristic_value(
    device: &FileHandle,
    characteristic: &GattCharacteristicRecord,
    out: &mut [u8],
) -> Result<usize> {
    let service = owning_service(device, characteristic)?;
    let value = client::read_characteristic(device, Route::Device, &service, characteristic)?;
    fill(&value, out)
}

/// `BluetoothGATTSetCharacteristicValue`
pub fn gatt_set_characteristic_value(
    device: &FileHandle,
    characteristic: &GattCharacteristicRecord,
    value: &[u8],
    write_type: WriteType,
) -> Result<()> {
    let service = owning_service(device, characteristic)?;
    client::write_characteristic(device, Route::Device, &service, characteristic, value, write_type)?;
    Ok(())
}

/// Enable or disable notifications (`BluetoothGATTRegisterEvent` without
/// the callback, which the notification task supplies)
pub fn gatt_set_notify(device: &FileHandle, characteristic: &GattCharacteristicRecord, enable: bool) -> Result<()> {
    let service = owning_service(device, characteristic)?;
    client::set_notify(device, Route::Device, &service, characteristic, enable)?;
    Ok(())
}

/// `BluetoothRemoveDevice`, through the first radio
pub fn remove_device(rt: &Runtime, address: BluetoothAddress) -> Result<()> {
    let radio = rt
        .open_first_radio()
        .map_err(|e| Win32ApiError::Win32(e.win32().unwrap_or(Win32Error::NOT_FOUND)))?;
    client::remove_device(&radio, address)?;
    debug!("removed {}", address);
    Ok(())
}

/// `BluetoothSendAuthenticationResponseEx`. A response that matches no
/// pending request fails with `ERROR_NOT_FOUND`.
pub fn send_auth_response(
    radio: &FileHandle,
    address: BluetoothAddress,
    method: u32,
    value: u32,
    negative: bool,
) -> Result<()> {
    if client::send_auth_response(radio, address, method, value, negative)? {
        Ok(())
    } else {
        Err(Win32Error::NOT_FOUND.into())
    }
}

/// `BluetoothRegisterForAuthenticationEx`; dropping the registration
/// unregisters
pub fn register_for_authentication(rt: &Runtime, callback: AuthCallback) -> Result<AuthRegistration> {
    Arc::clone(rt.bus())
        .register_for_authentication(callback)
        .map_err(|e| Win32ApiError::Win32(e.status().to_win32()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bthle_bus::BusConfig;
    use bthle_unix::sim::characteristic;
    use bthle_unix::SimHost;
    use uuid::Uuid;

    const HRM: u64 = 0xC034_9911_2233;

    fn demo() -> Runtime {
        Runtime::from_host(&SimHost::demo(), BusConfig::default()).unwrap()
    }

    fn blank_service() -> GattServiceRecord {
        GattServiceRecord::new(&Uuid::nil(), 0)
    }

    fn open_hrm(rt: &Runtime) -> FileHandle {
        rt.open_le_device(BluetoothAddress::from_u64(HRM)).unwrap().unwrap().1
    }

    #[test]
    fn radios_and_devices() {
        let rt = demo();
        let radios = find_radios(&rt).unwrap();
        assert_eq!(radios.len(), 1);
        let info = get_radio_info(&radios[0]).unwrap();
        assert_eq!(info.address, BluetoothAddress::from_u64(0x001A_7DDA_7113));

        let devices = find_devices(&radios[0], &DeviceSearchParams::default()).unwrap();
        let hrm = devices
            .iter()
            .find(|d| d.address == BluetoothAddress::from_u64(HRM))
            .unwrap();
        assert_eq!(hrm.name, "Heart Rate Sensor");
        assert!(hrm.connected);
        rt.shutdown();
    }

    #[test]
    fn services_are_fetched_in_two_calls() {
        let rt = demo();
        let device = open_hrm(&rt);

        let err = gatt_get_services(&device, &mut []).unwrap_err();
        assert_eq!(err, Win32ApiError::MoreData { required: 2 });
        assert_eq!(err.code(), Win32Error::MORE_DATA);

        let mut services = [blank_service(); 2];
        assert_eq!(gatt_get_services(&device, &mut services).unwrap(), 2);
        assert_eq!(services[0].attribute_handle, 1);
        assert_eq!(services[1].attribute_handle, 9);
        rt.shutdown();
    }

    #[test]
    fn characteristic_value_round_trip() {
        let rt = demo();
        let device = open_hrm(&rt);
        let mut services = [blank_service(); 2];
        gatt_get_services(&device, &mut services).unwrap();

        let blank = GattCharacteristicRecord::new(0, &characteristic(Uuid::nil(), 0, &[]).unwrap());
        let mut chars = [blank; 8];
        let n = gatt_get_characteristics(&device, &services[1], &mut chars).unwrap();
        assert_eq!(n, 3);
        let location = chars[..n]
            .iter()
            .find(|c| c.attribute_handle == 0x12)
            .copied()
            .unwrap();

        let err = gatt_get_characteristic_value(&device, &location, &mut []).unwrap_err();
        assert_eq!(err, Win32ApiError::MoreData { required: 1 });
        let mut value = [0u8; 4];
        assert_eq!(gatt_get_characteristic_value(&device, &location, &mut value).unwrap(), 1);
        assert_eq!(value[0], 0x01);
        rt.shutdown();
    }

    #[test]
    fn remove_unknown_device_fails() {
        let rt = demo();
        assert!(remove_device(&rt, BluetoothAddress::from_u64(0x0102_0304_0506)).is_err());
        rt.shutdown();
    }
}
