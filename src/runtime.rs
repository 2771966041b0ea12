//! Process-side context the facade classes run against
//!
//! On Windows the facade finds the bus driver through SetupAPI. Here the
//! running [`Bus`] is passed in explicitly; everything else goes through
//! interface paths and IOCTLs the same way.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bthle_bus::pnp::{address_from_symlink, radio_symlink};
use bthle_bus::{Bus, BusConfig, FileHandle, InterfaceClass};
use bthle_ioctl::Win32Error;
use bthle_unix::{Backend, BluetoothAddress, NameTable, SimBackend, SimHost, UnixConnection};
use tracing::{debug, info};

use crate::error::WinrtError;

#[derive(Clone)]
pub struct Runtime {
    bus: Arc<Bus>,
    sim: Option<Arc<SimBackend>>,
}

impl Runtime {
    pub fn new(bus: Arc<Bus>) -> Self {
        Self { bus, sim: None }
    }

    /// Bring up a connection and bus over `backend`
    pub fn start(
        backend: Arc<dyn Backend>,
        names: Arc<NameTable>,
        config: BusConfig,
    ) -> Result<Self, WinrtError> {
        let conn = UnixConnection::init(backend, names)?;
        let bus = Bus::start(conn, config)?;
        Ok(Self::new(bus))
    }

    /// Run over a simulated host; returns once the initial events are applied.
    pub fn simulated(sim: Arc<SimBackend>, config: BusConfig) -> Result<Self, WinrtError> {
        let names = Arc::clone(sim.names());
        let backend: Arc<dyn Backend> = sim.clone();
        let mut rt = Self::start(backend, names, config)?;
        rt.sim = Some(sim);
        rt.settle();
        Ok(rt)
    }

    /// Build `host` and run over it
    pub fn from_host(host: &SimHost, config: BusConfig) -> Result<Self, WinrtError> {
        let sim = Arc::new(host.build(NameTable::new())?);
        info!("simulated host with {} adapter(s)", host.adapter.len());
        Self::simulated(sim, config)
    }

    pub fn bus(&self) -> &Arc<Bus> {
        &self.bus
    }

    pub fn config(&self) -> &BusConfig {
        self.bus.config()
    }

    pub fn sim(&self) -> Option<&Arc<SimBackend>> {
        self.sim.as_ref()
    }

    /// Wait until every event the simulated backend queued is applied.
    /// Always true for a real backend, which cannot be observed this way.
    pub fn settle(&self) -> bool {
        let Some(sim) = &self.sim else {
            return true;
        };
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if sim.pending_events() == 0 && self.bus.events_applied() == sim.delivered_events() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        false
    }

    /// Interface path of the earliest-inserted active radio
    pub fn first_radio_path(&self) -> Option<String> {
        let radio = self.bus.graph().first_radio()?;
        Some(radio_symlink(InterfaceClass::BthRadio, &radio.hw_name, radio.index))
    }

    /// `BluetoothFindFirstRadio`; `ERROR_NOT_FOUND` when there is none
    pub fn open_first_radio(&self) -> Result<FileHandle, WinrtError> {
        let path = self
            .first_radio_path()
            .ok_or(WinrtError::from(Win32Error::NOT_FOUND))?;
        debug!("opening first radio {}", path);
        Ok(self.bus.open(&path)?)
    }

    /// Every published BLE device interface with the address in its path
    pub fn le_device_interfaces(&self) -> Vec<(String, BluetoothAddress)> {
        self.bus
            .interfaces(InterfaceClass::BthLeDevice)
            .into_iter()
            .filter_map(|path| address_from_symlink(&path).map(|a| (path, a)))
            .collect()
    }

    /// Open the BLE device interface whose path carries `address`
    pub fn open_le_device(&self, address: BluetoothAddress) -> Result<Option<(String, FileHandle)>, WinrtError> {
        match self.le_device_interfaces().into_iter().find(|(_, a)| *a == address) {
            Some((path, _)) => {
                let file = self.bus.open(&path)?;
                Ok(Some((path, file)))
            }
            None => Ok(None),
        }
    }

    pub fn shutdown(&self) {
        self.bus.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_host_exposes_radio_and_le_device() {
        let rt = Runtime::from_host(&SimHost::demo(), BusConfig::default()).unwrap();
        assert!(rt.first_radio_path().unwrap().contains("RADIO_HCI0"));
        let radio = rt.open_first_radio().unwrap();
        assert_eq!(radio.pdo(), bthle_bus::PdoId::Radio(0));

        let hrm = BluetoothAddress::from_u64(0xC034_9911_2233);
        let (path, _file) = rt.open_le_device(hrm).unwrap().unwrap();
        assert!(path.contains("Dev_c03499112233"));
        assert!(rt
            .open_le_device(BluetoothAddress::from_u64(0x1))
            .unwrap()
            .is_none());
        rt.shutdown();
    }

    #[test]
    fn no_radio_is_not_found() {
        let rt = Runtime::simulated(Arc::new(SimBackend::new(NameTable::new())), BusConfig::default())
            .unwrap();
        let err = rt.open_first_radio().unwrap_err();
        assert_eq!(err.win32(), Some(Win32Error::NOT_FOUND));
    }
}
