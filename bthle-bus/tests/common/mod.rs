//! Shared fixtures for bus integration tests
#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use bthle_bus::{Bus, BusConfig, FileHandle, InterfaceClass};
use bthle_unix::sim::characteristic;
use bthle_unix::{
    uuid_from_u16, BluetoothAddress, CharacteristicHandle, DeviceHandle, NameTable, RadioHandle,
    SimBackend, UnixConnection,
};

pub const HRM: u64 = 0xC034_9911_2233;

pub fn addr(raw: u64) -> BluetoothAddress {
    BluetoothAddress::from_u64(raw)
}

/// Short timings so tests do not sit in barriers
pub fn fast_config() -> BusConfig {
    BusConfig {
        discovery_barrier_ms: 100,
        notify_retry_ms: 5,
        notification_read_timeout_ms: 100,
        notify_stop_timeout_ms: 2000,
        connection_poll_ms: 10,
        watcher_poll_ms: 20,
    }
}

pub fn new_sim() -> Arc<SimBackend> {
    Arc::new(SimBackend::new(NameTable::new()))
}

pub fn start_bus(sim: &Arc<SimBackend>, config: BusConfig) -> Arc<Bus> {
    let conn = UnixConnection::init(sim.clone(), Arc::clone(sim.names())).unwrap();
    let bus = Bus::start(conn, config).unwrap();
    settle(sim, &bus);
    bus
}

/// Wait until the pump has applied every event the backend queued
pub fn settle(sim: &SimBackend, bus: &Bus) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if sim.pending_events() == 0 && bus.events_applied() == sim.delivered_events() {
            return;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    panic!("bus did not settle");
}

/// Poll `cond` for up to two seconds
pub fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

pub fn open_radio(bus: &Arc<Bus>) -> FileHandle {
    let path = bus.interfaces(InterfaceClass::BthRadio)[0].clone();
    bus.open(&path).unwrap()
}

pub fn open_device(bus: &Arc<Bus>, address: BluetoothAddress) -> FileHandle {
    let path = bus
        .interfaces(InterfaceClass::BthLeDevice)
        .into_iter()
        .find(|p| bthle_bus::pnp::address_from_symlink(p) == Some(address))
        .unwrap();
    bus.open(&path).unwrap()
}

/// Heart-rate monitor fixture
pub struct HrmHost {
    pub sim: Arc<SimBackend>,
    pub radio: RadioHandle,
    pub device: DeviceHandle,
    /// 2A37 heart rate measurement (notify) at 0x10
    pub measurement: CharacteristicHandle,
    /// 2A38 body sensor location (read) at 0x12
    pub location: CharacteristicHandle,
    /// 2A39 control point (read, write) at 0x14
    pub control: CharacteristicHandle,
}

/// One adapter and a heart-rate monitor with services 1800@1, 180F@9 and
/// 180D@0x0c. `cached` devices report their services at init.
pub fn hrm_host(cached: bool) -> HrmHost {
    let sim = new_sim();
    let radio = sim.add_adapter("hci0", addr(0x001A_7DDA_7113));
    let device = sim.add_device(&radio, addr(HRM), Some("HRM")).unwrap();

    let gap = sim.add_service(&device, uuid_from_u16(0x1800), 1, true).unwrap();
    sim.add_characteristic(&gap, characteristic(uuid_from_u16(0x2A00), 2, &["read"]).unwrap(), b"HRM")
        .unwrap();
    sim.add_service(&device, uuid_from_u16(0x180F), 9, true).unwrap();
    let hr = sim.add_service(&device, uuid_from_u16(0x180D), 0x0c, true).unwrap();
    // Inserted out of UUID order on purpose
    let control = sim
        .add_characteristic(&hr, characteristic(uuid_from_u16(0x2A39), 0x14, &["read", "write"]).unwrap(), &[0])
        .unwrap();
    let measurement = sim
        .add_characteristic(&hr, characteristic(uuid_from_u16(0x2A37), 0x10, &["notify"]).unwrap(), &[])
        .unwrap();
    let location = sim
        .add_characteristic(&hr, characteristic(uuid_from_u16(0x2A38), 0x12, &["read"]).unwrap(), &[0x06, 0x48])
        .unwrap();
    if cached {
        sim.set_cached(&device).unwrap();
    }
    HrmHost {
        sim,
        radio,
        device,
        measurement,
        location,
        control,
    }
}
