//! Notification pump driven over READ_NOTIFICATION

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use bthle_bus::notify::is_pumping;
use bthle_bus::{BusError, NotificationPump, PumpKey};
use bthle_ioctl::wire::{GattCharacteristicRecord, GattServiceRecord};
use bthle_ioctl::{client, Route};
use bthle_unix::sim::characteristic;
use bthle_unix::uuid_from_u16;
use parking_lot::Mutex;

use common::*;

#[test]
fn pump_delivers_values_in_order_and_stops() {
    let host = hrm_host(true);
    host.sim.set_connected(&host.device, true).unwrap();
    let config = fast_config();
    let bus = start_bus(&host.sim, config.clone());
    let file = open_device(&bus, addr(HRM));

    let service = GattServiceRecord::new(&uuid_from_u16(0x180D), 0x0c);
    let measurement = GattCharacteristicRecord::new(
        0x0c,
        &characteristic(uuid_from_u16(0x2A37), 0x10, &["notify"]).unwrap(),
    );
    client::set_notify(&file, Route::Device, &service, &measurement, true).unwrap();

    // The task reads through its own handle so cancel_io only hits it
    let reader = Arc::new(file.duplicate());
    let read_handle = Arc::clone(&reader);
    let cancel_handle = Arc::clone(&reader);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let key = PumpKey {
        address: addr(HRM),
        service: 0x0c,
        characteristic: 0x10,
    };

    let pump = NotificationPump::start(
        key,
        &config,
        Box::new(move || {
            client::read_notification(&*read_handle, Route::Device, &service, &measurement)
                .map_err(|e| e.status())
        }),
        Arc::new(move || cancel_handle.cancel_io()),
        move |value| sink.lock().push(value),
    )
    .unwrap();
    assert!(is_pumping(&key));

    let again = NotificationPump::start(
        key,
        &config,
        Box::new(|| Ok(Vec::new())),
        Arc::new(|| {}),
        |_| {},
    );
    assert!(matches!(again, Err(BusError::Busy(_))));

    for value in [[0x00, 0x48], [0x00, 0x49], [0x00, 0x4A]] {
        assert!(host.sim.notify(&host.measurement, &value));
    }
    assert!(wait_for(|| seen.lock().len() == 3));
    {
        let seen = seen.lock();
        let values: Vec<Vec<u8>> = seen.iter().map(|v| v.value.clone()).collect();
        assert_eq!(values, vec![vec![0x00, 0x48], vec![0x00, 0x49], vec![0x00, 0x4A]]);
        assert!(seen.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    // Stop while the task is blocked in a read
    let started = Instant::now();
    assert!(pump.stop());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!is_pumping(&key));

    // The original handle still works after the task's reads were cancelled
    assert!(host.sim.notify(&host.measurement, &[0x00, 0x50]));
    assert_eq!(
        client::read_notification(&file, Route::Device, &service, &measurement).unwrap(),
        vec![0x00, 0x50]
    );
}

#[test]
fn pump_survives_timeouts() {
    let host = hrm_host(true);
    host.sim.set_connected(&host.device, true).unwrap();
    let config = fast_config();
    let bus = start_bus(&host.sim, config.clone());
    let file = Arc::new(open_device(&bus, addr(HRM)));

    let service = GattServiceRecord::new(&uuid_from_u16(0x180D), 0x0c);
    let measurement = GattCharacteristicRecord::new(
        0x0c,
        &characteristic(uuid_from_u16(0x2A37), 0x10, &["notify"]).unwrap(),
    );
    client::set_notify(&*file, Route::Device, &service, &measurement, true).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let read_handle = Arc::clone(&file);
    let cancel_handle = Arc::clone(&file);
    let key = PumpKey {
        address: addr(HRM),
        service: 0x0c,
        characteristic: 0x11,
    };
    let pump = NotificationPump::start(
        key,
        &config,
        Box::new(move || {
            client::read_notification(&*read_handle, Route::Device, &service, &measurement)
                .map_err(|e| e.status())
        }),
        Arc::new(move || cancel_handle.cancel_io()),
        move |value| sink.lock().push(value.value),
    )
    .unwrap();

    // Several read timeouts pass before anything arrives
    std::thread::sleep(Duration::from_millis(350));
    assert!(pump.is_running());
    assert!(host.sim.notify(&host.measurement, &[0x06]));
    assert!(wait_for(|| seen.lock().len() == 1));
    assert!(pump.stop());
}
