//! `BluetoothLEAdvertisementWatcher`
//!
//! There is no advertisement stream below the facade. While started, the
//! watcher keeps the radio discovering and polls the published BLE device
//! interfaces, reporting each one as a received advertisement.

use std::ops::ControlFlow;
use std::sync::Weak;

use bthle_bus::FileHandle;
use bthle_ioctl::client;
use bthle_ioctl::wire::{DeviceInfo, BDIF_NAME};
use bthle_unix::BluetoothAddress;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    BluetoothLEAdvertisement, BluetoothLEAdvertisementFilter, BluetoothLEAdvertisementReceivedEventArgs,
    BluetoothLEAdvertisementWatcherStoppedEventArgs, BluetoothSignalStrengthFilter, PLACEHOLDER_NAME, REPORTED_RSSI,
};
use crate::bluetooth::BluetoothError;
use crate::error::WinrtError;
use crate::foundation::{
    ComPtr, EventRegistrationToken, EventSource, Inspectable, InterfaceId, PollTask, TypedEventHandler,
};
use crate::runtime::Runtime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BluetoothLEAdvertisementWatcherStatus {
    Created = 0,
    Started = 1,
    Stopping = 2,
    Stopped = 3,
    Aborted = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BluetoothLEScanningMode {
    #[default]
    Passive = 0,
    Active = 1,
    None = 2,
}

pub type ReceivedHandler =
    TypedEventHandler<ComPtr<BluetoothLEAdvertisementWatcher>, ComPtr<BluetoothLEAdvertisementReceivedEventArgs>>;
pub type StoppedHandler = TypedEventHandler<
    ComPtr<BluetoothLEAdvertisementWatcher>,
    ComPtr<BluetoothLEAdvertisementWatcherStoppedEventArgs>,
>;

struct Scan {
    radio: FileHandle,
    task: PollTask,
}

pub struct BluetoothLEAdvertisementWatcher {
    this: Weak<BluetoothLEAdvertisementWatcher>,
    rt: Runtime,
    status: Mutex<BluetoothLEAdvertisementWatcherStatus>,
    scanning_mode: Mutex<BluetoothLEScanningMode>,
    allow_extended: Mutex<bool>,
    advertisement_filter: Mutex<ComPtr<BluetoothLEAdvertisementFilter>>,
    signal_strength_filter: Mutex<ComPtr<BluetoothSignalStrengthFilter>>,
    received: EventSource<ComPtr<BluetoothLEAdvertisementWatcher>, ComPtr<BluetoothLEAdvertisementReceivedEventArgs>>,
    stopped:
        EventSource<ComPtr<BluetoothLEAdvertisementWatcher>, ComPtr<BluetoothLEAdvertisementWatcherStoppedEventArgs>>,
    scan: Mutex<Option<Scan>>,
}

impl Inspectable for BluetoothLEAdvertisementWatcher {
    fn runtime_class_name(&self) -> &'static str {
        "Windows.Devices.Bluetooth.Advertisement.BluetoothLEAdvertisementWatcher"
    }

    fn interfaces(&self) -> &'static [InterfaceId] {
        &[
            InterfaceId::BluetoothLEAdvertisementWatcher,
            InterfaceId::BluetoothLEAdvertisementWatcher2,
        ]
    }
}

impl BluetoothLEAdvertisementWatcher {
    pub fn new(rt: &Runtime) -> ComPtr<Self> {
        Self::with_filter(rt, BluetoothLEAdvertisementFilter::new())
    }

    pub fn with_filter(rt: &Runtime, filter: ComPtr<BluetoothLEAdvertisementFilter>) -> ComPtr<Self> {
        ComPtr::new_cyclic(|this| Self {
            this: this.clone(),
            rt: rt.clone(),
            status: Mutex::new(BluetoothLEAdvertisementWatcherStatus::Created),
            scanning_mode: Mutex::new(BluetoothLEScanningMode::default()),
            allow_extended: Mutex::new(false),
            advertisement_filter: Mutex::new(filter),
            signal_strength_filter: Mutex::new(BluetoothSignalStrengthFilter::new()),
            received: EventSource::new(),
            stopped: EventSource::new(),
            scan: Mutex::new(None),
        })
    }

    pub fn status(&self) -> BluetoothLEAdvertisementWatcherStatus {
        *self.status.lock()
    }

    pub fn scanning_mode(&self) -> BluetoothLEScanningMode {
        *self.scanning_mode.lock()
    }

    pub fn set_scanning_mode(&self, mode: BluetoothLEScanningMode) {
        *self.scanning_mode.lock() = mode;
    }

    /// Stored only; extended advertisements are never reported
    pub fn allow_extended_advertisements(&self) -> bool {
        *self.allow_extended.lock()
    }

    pub fn set_allow_extended_advertisements(&self, allow: bool) {
        *self.allow_extended.lock() = allow;
    }

    pub fn advertisement_filter(&self) -> ComPtr<BluetoothLEAdvertisementFilter> {
        self.advertisement_filter.lock().clone()
    }

    pub fn set_advertisement_filter(&self, filter: ComPtr<BluetoothLEAdvertisementFilter>) {
        *self.advertisement_filter.lock() = filter;
    }

    pub fn signal_strength_filter(&self) -> ComPtr<BluetoothSignalStrengthFilter> {
        self.signal_strength_filter.lock().clone()
    }

    pub fn set_signal_strength_filter(&self, filter: ComPtr<BluetoothSignalStrengthFilter>) {
        *self.signal_strength_filter.lock() = filter;
    }

    pub fn add_received(&self, handler: ReceivedHandler) -> EventRegistrationToken {
        self.received.add(handler).0
    }

    pub fn remove_received(&self, token: EventRegistrationToken) {
        self.received.remove(token);
    }

    pub fn add_stopped(&self, handler: StoppedHandler) -> EventRegistrationToken {
        self.stopped.add(handler).0
    }

    pub fn remove_stopped(&self, token: EventRegistrationToken) {
        self.stopped.remove(token);
    }

    /// Begin scanning. Without a radio the watcher aborts, fires `Stopped`
    /// with `RadioNotAvailable` and fails with `ERROR_NOT_FOUND`.
    pub fn start(&self) -> Result<(), WinrtError> {
        let this = ComPtr::upgrade(&self.this).ok_or_else(WinrtError::closed)?;
        let mut scan = self.scan.lock();
        if scan.is_some() {
            return Ok(());
        }

        let radio = match self.rt.open_first_radio().and_then(|radio| {
            client::start_discovery(&radio)?;
            Ok(radio)
        }) {
            Ok(radio) => radio,
            Err(e) => {
                drop(scan);
                warn!("advertisement watcher aborted: {}", e);
                self.abort(&this, e);
                return Err(e);
            }
        };

        let weak = this.downgrade();
        let tick_radio = radio.duplicate();
        let task = PollTask::spawn("adv-watcher", self.rt.config().watcher_poll(), move || {
            let Some(watcher) = ComPtr::upgrade(&weak) else {
                return ControlFlow::Break(());
            };
            watcher.scan_once(&tick_radio);
            ControlFlow::Continue(())
        });
        let task = match task {
            Ok(task) => task,
            Err(e) => {
                let _ = client::stop_discovery(&radio);
                drop(scan);
                self.abort(&this, e);
                return Err(e);
            }
        };

        *scan = Some(Scan { radio, task });
        *self.status.lock() = BluetoothLEAdvertisementWatcherStatus::Started;
        info!("advertisement watcher started");
        Ok(())
    }

    /// Stop scanning and fire `Stopped` with `Success`
    pub fn stop(&self) {
        let Some(scan) = self.scan.lock().take() else {
            return;
        };
        *self.status.lock() = BluetoothLEAdvertisementWatcherStatus::Stopping;
        scan.task.stop();
        if let Err(e) = client::stop_discovery(&scan.radio) {
            debug!("stop discovery failed: {}", e);
        }
        *self.status.lock() = BluetoothLEAdvertisementWatcherStatus::Stopped;
        info!("advertisement watcher stopped");
        if let Some(this) = ComPtr::upgrade(&self.this) {
            let args = BluetoothLEAdvertisementWatcherStoppedEventArgs::new(BluetoothError::Success);
            self.stopped.invoke(&this, &args);
        }
    }

    fn abort(&self, this: &ComPtr<Self>, err: WinrtError) {
        *self.status.lock() = BluetoothLEAdvertisementWatcherStatus::Aborted;
        let args = BluetoothLEAdvertisementWatcherStoppedEventArgs::new(BluetoothError::from(err));
        self.stopped.invoke(this, &args);
    }

    fn scan_once(&self, radio: &FileHandle) {
        let Some(this) = ComPtr::upgrade(&self.this) else {
            return;
        };
        let cache = match client::get_device_info(radio) {
            Ok(cache) => cache,
            Err(e) => {
                debug!("device cache unavailable: {}", e);
                Vec::new()
            }
        };
        let radio_index = match radio.pdo() {
            bthle_bus::PdoId::Radio(index) => index,
            bthle_bus::PdoId::Device { radio, .. } => radio,
        };
        let filter = self.advertisement_filter();
        let signal = self.signal_strength_filter();

        for (path, address) in self.rt.le_device_interfaces() {
            let advertisement =
                BluetoothLEAdvertisement::with(local_name(&cache, address), self.service_uuids(radio_index, address));
            if !filter.matches(&advertisement) || !signal.admits(REPORTED_RSSI) {
                continue;
            }
            debug!("advertisement from {} ({})", address, path);
            let args = BluetoothLEAdvertisementReceivedEventArgs::new(address, REPORTED_RSSI, advertisement);
            self.received.invoke(&this, &args);
        }
    }

    /// Services the bus has already discovered on the device
    fn service_uuids(&self, radio_index: u32, address: BluetoothAddress) -> Vec<Uuid> {
        self.rt
            .bus()
            .graph()
            .device_by_address(radio_index, address)
            .map(|device| device.services().iter().map(|s| s.uuid).collect())
            .unwrap_or_default()
    }
}

impl Drop for BluetoothLEAdvertisementWatcher {
    fn drop(&mut self) {
        if let Some(scan) = self.scan.get_mut().take() {
            scan.task.stop();
            let _ = client::stop_discovery(&scan.radio);
        }
    }
}

/// Name from the radio's device cache. The placeholder name counts as no
/// name at all.
fn local_name(cache: &[DeviceInfo], address: BluetoothAddress) -> String {
    cache
        .iter()
        .find(|info| info.address() == address && info.flags & BDIF_NAME != 0)
        .map(|info| info.name())
        .filter(|name| name != PLACEHOLDER_NAME)
        .unwrap_or_default()
}
