//! Windows.Devices.Bluetooth.Advertisement

pub mod watcher;

use std::time::Duration;

use bthle_unix::BluetoothAddress;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::bluetooth::BluetoothError;
use crate::foundation::{ComPtr, DateTime, Inspectable, InterfaceId};

pub use watcher::{
    BluetoothLEAdvertisementWatcher, BluetoothLEAdvertisementWatcherStatus, BluetoothLEScanningMode,
    ReceivedHandler, StoppedHandler,
};

/// Placeholder the driver reports for devices that never sent a name
pub const PLACEHOLDER_NAME: &str = "BLE Device";

/// Signal strength reported for every received advertisement. The bus
/// does not carry RSSI, so the watcher reports a constant mid-range value.
pub const REPORTED_RSSI: i16 = -60;

macro_rules! advertisement_class {
    ($ty:ident, $($iface:ident),+) => {
        impl Inspectable for $ty {
            fn runtime_class_name(&self) -> &'static str {
                concat!("Windows.Devices.Bluetooth.Advertisement.", stringify!($ty))
            }

            fn interfaces(&self) -> &'static [InterfaceId] {
                &[$(InterfaceId::$iface),+]
            }
        }
    };
}

/// Advertisement payload as far as the bus exposes it
#[derive(Default)]
pub struct BluetoothLEAdvertisement {
    local_name: Mutex<String>,
    service_uuids: Mutex<Vec<Uuid>>,
}

advertisement_class!(BluetoothLEAdvertisement, BluetoothLEAdvertisement);

impl BluetoothLEAdvertisement {
    pub fn new() -> ComPtr<Self> {
        ComPtr::new(Self::default())
    }

    pub(crate) fn with(local_name: String, service_uuids: Vec<Uuid>) -> ComPtr<Self> {
        ComPtr::new(Self {
            local_name: Mutex::new(local_name),
            service_uuids: Mutex::new(service_uuids),
        })
    }

    pub fn local_name(&self) -> String {
        self.local_name.lock().clone()
    }

    pub fn set_local_name(&self, name: &str) {
        *self.local_name.lock() = name.to_string();
    }

    pub fn service_uuids(&self) -> Vec<Uuid> {
        self.service_uuids.lock().clone()
    }

    pub fn add_service_uuid(&self, uuid: Uuid) {
        let mut uuids = self.service_uuids.lock();
        if !uuids.contains(&uuid) {
            uuids.push(uuid);
        }
    }
}

/// Matches advertisements against a pattern advertisement. An empty local
/// name matches any name; every pattern UUID must be advertised.
pub struct BluetoothLEAdvertisementFilter {
    advertisement: Mutex<ComPtr<BluetoothLEAdvertisement>>,
}

advertisement_class!(BluetoothLEAdvertisementFilter, BluetoothLEAdvertisementFilter);

impl BluetoothLEAdvertisementFilter {
    pub fn new() -> ComPtr<Self> {
        ComPtr::new(Self {
            advertisement: Mutex::new(BluetoothLEAdvertisement::new()),
        })
    }

    pub fn advertisement(&self) -> ComPtr<BluetoothLEAdvertisement> {
        self.advertisement.lock().clone()
    }

    pub fn set_advertisement(&self, advertisement: ComPtr<BluetoothLEAdvertisement>) {
        *self.advertisement.lock() = advertisement;
    }

    pub fn matches(&self, advertisement: &BluetoothLEAdvertisement) -> bool {
        let pattern = self.advertisement();
        let name = pattern.local_name();
        if !name.is_empty() && name != advertisement.local_name() {
            return false;
        }
        let advertised = advertisement.service_uuids();
        pattern.service_uuids().iter().all(|u| advertised.contains(u))
    }
}

/// In-range/out-of-range RSSI thresholds
#[derive(Default)]
pub struct BluetoothSignalStrengthFilter {
    in_range_threshold: Mutex<Option<i16>>,
    out_of_range_threshold: Mutex<Option<i16>>,
    out_of_range_timeout: Mutex<Option<Duration>>,
    sampling_interval: Mutex<Option<Duration>>,
}

impl Inspectable for BluetoothSignalStrengthFilter {
    fn runtime_class_name(&self) -> &'static str {
        "Windows.Devices.Bluetooth.BluetoothSignalStrengthFilter"
    }

    fn interfaces(&self) -> &'static [InterfaceId] {
        &[InterfaceId::BluetoothSignalStrengthFilter]
    }
}

impl BluetoothSignalStrengthFilter {
    pub fn new() -> ComPtr<Self> {
        ComPtr::new(Self::default())
    }

    pub fn in_range_threshold(&self) -> Option<i16> {
        *self.in_range_threshold.lock()
    }

    pub fn set_in_range_threshold(&self, value: Option<i16>) {
        *self.in_range_threshold.lock() = value;
    }

    pub fn out_of_range_threshold(&self) -> Option<i16> {
        *self.out_of_range_threshold.lock()
    }

    pub fn set_out_of_range_threshold(&self, value: Option<i16>) {
        *self.out_of_range_threshold.lock() = value;
    }

    pub fn out_of_range_timeout(&self) -> Option<Duration> {
        *self.out_of_range_timeout.lock()
    }

    pub fn set_out_of_range_timeout(&self, value: Option<Duration>) {
        *self.out_of_range_timeout.lock() = value;
    }

    pub fn sampling_interval(&self) -> Option<Duration> {
        *self.sampling_interval.lock()
    }

    pub fn set_sampling_interval(&self, value: Option<Duration>) {
        *self.sampling_interval.lock() = value;
    }

    /// Whether a device seen at `rssi` counts as in range. Values at or
    /// below the out-of-range threshold never do; values under the
    /// in-range threshold are not reported either.
    pub fn admits(&self, rssi: i16) -> bool {
        if self.out_of_range_threshold().is_some_and(|t| rssi <= t) {
            return false;
        }
        self.in_range_threshold().map_or(true, |t| rssi >= t)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BluetoothLEAdvertisementType {
    ConnectableUndirected = 0,
    ConnectableDirected = 1,
    ScannableUndirected = 2,
    NonConnectableUndirected = 3,
    ScanResponse = 4,
    Extended = 5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BluetoothAddressType {
    Public = 0,
    Random = 1,
    Unspecified = 2,
}

pub struct BluetoothLEAdvertisementReceivedEventArgs {
    address: BluetoothAddress,
    rssi: i16,
    timestamp: DateTime,
    advertisement: ComPtr<BluetoothLEAdvertisement>,
}

advertisement_class!(
    BluetoothLEAdvertisementReceivedEventArgs,
    BluetoothLEAdvertisementReceivedEventArgs,
    BluetoothLEAdvertisementReceivedEventArgs2
);

impl BluetoothLEAdvertisementReceivedEventArgs {
    pub(crate) fn new(address: BluetoothAddress, rssi: i16, advertisement: ComPtr<BluetoothLEAdvertisement>) -> ComPtr<Self> {
        ComPtr::new(Self {
            address,
            rssi,
            timestamp: DateTime::now(),
            advertisement,
        })
    }

    pub fn bluetooth_address(&self) -> u64 {
        self.address.as_u64()
    }

    pub fn raw_signal_strength_in_dbm(&self) -> i16 {
        self.rssi
    }

    pub fn timestamp(&self) -> DateTime {
        self.timestamp
    }

    pub fn advertisement(&self) -> ComPtr<BluetoothLEAdvertisement> {
        self.advertisement.clone()
    }

    pub fn advertisement_type(&self) -> BluetoothLEAdvertisementType {
        BluetoothLEAdvertisementType::ConnectableUndirected
    }

    pub fn bluetooth_address_type(&self) -> BluetoothAddressType {
        BluetoothAddressType::Public
    }

    pub fn is_connectable(&self) -> bool {
        true
    }

    pub fn is_scannable(&self) -> bool {
        false
    }

    pub fn is_directed(&self) -> bool {
        false
    }

    pub fn is_scan_response(&self) -> bool {
        false
    }

    pub fn transmit_power_level_in_dbm(&self) -> Option<i16> {
        None
    }
}

pub struct BluetoothLEAdvertisementWatcherStoppedEventArgs {
    error: BluetoothError,
}

advertisement_class!(
    BluetoothLEAdvertisementWatcherStoppedEventArgs,
    BluetoothLEAdvertisementWatcherStoppedEventArgs
);

impl BluetoothLEAdvertisementWatcherStoppedEventArgs {
    pub(crate) fn new(error: BluetoothError) -> ComPtr<Self> {
        ComPtr::new(Self { error })
    }

    pub fn error(&self) -> BluetoothError {
        self.error
    }
}
