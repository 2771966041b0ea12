//! IOCTL dispatch through opened device interfaces

mod common;

use std::mem::{offset_of, size_of};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bthle_bus::{BusConfig, InterfaceClass, PdoId};
use bthle_ioctl::codes::*;
use bthle_ioctl::sizing::get_u32;
use bthle_ioctl::wire::*;
use bthle_ioctl::{client, DeviceIoControl, IoctlError, NtStatus, Route};
use bthle_unix::sim::characteristic;
use bthle_unix::{uuid_from_u16, UnixError, UnixFunc, WriteType};
use zerocopy::IntoBytes;

use common::*;

fn hr_service() -> GattServiceRecord {
    GattServiceRecord::new(&uuid_from_u16(0x180D), 0x0c)
}

fn hr_char(uuid: u16, handle: u16, props: &[&str]) -> GattCharacteristicRecord {
    GattCharacteristicRecord::new(0x0c, &characteristic(uuid_from_u16(uuid), handle, props).unwrap())
}

#[test]
fn service_list_is_sized_then_filled() {
    let sim = new_sim();
    let radio = sim.add_adapter("hci0", addr(0x001A_7DDA_7113));
    let device = sim.add_device(&radio, addr(HRM), Some("HRM")).unwrap();
    sim.add_service(&device, uuid_from_u16(0x1800), 1, true).unwrap();
    sim.add_service(&device, uuid_from_u16(0x180F), 9, true).unwrap();
    sim.set_cached(&device).unwrap();
    let bus = start_bus(&sim, fast_config());
    let file = open_device(&bus, addr(HRM));

    let header = GetServicesHeader::default();
    let mut out = vec![0u8; size_of::<GetServicesHeader>()];
    let st = file.device_io_control(
        IOCTL_BTHLE_GET_GATT_SERVICES,
        header.as_bytes(),
        &mut out,
    );
    assert_eq!(st.status, NtStatus::MORE_ENTRIES);
    assert_eq!(get_u32(&out, 0), Some(2));

    let full = size_of::<GetServicesHeader>() + 2 * size_of::<GattServiceRecord>();
    let mut out = vec![0u8; full];
    let st = file.device_io_control(
        IOCTL_BTHLE_GET_GATT_SERVICES,
        header.as_bytes(),
        &mut out,
    );
    assert_eq!(st.status, NtStatus::SUCCESS);
    assert_eq!(st.information, full);

    let services = client::get_services(&file, Route::Device).unwrap();
    let listed: Vec<(u16, u16)> = services
        .iter()
        .map(|s| (bthle_unix::uuid_to_u16(&s.uuid()).unwrap(), s.attribute_handle))
        .collect();
    assert_eq!(listed, vec![(0x1800, 1), (0x180F, 9)]);
}

#[test]
fn read_through_radio_waits_for_discovery() {
    let host = hrm_host(false);
    let bus = start_bus(&host.sim, BusConfig::default());
    let radio = open_radio(&bus);
    let location = hr_char(0x2A38, 0x12, &["read"]);

    let started = Instant::now();
    let value =
        client::read_characteristic(&radio, Route::Radio(addr(HRM)), &hr_service(), &location).unwrap();
    assert!(started.elapsed() >= Duration::from_millis(500));
    assert_eq!(value, vec![0x06, 0x48]);
    assert_eq!(host.sim.command_count(UnixFunc::DeviceStartPairing), 1);

    // Discovery made it LE; the second read skips the barrier
    settle(&host.sim, &bus);
    assert_eq!(bus.interfaces(InterfaceClass::BthLeDevice).len(), 1);
    let started = Instant::now();
    client::read_characteristic(&radio, Route::Radio(addr(HRM)), &hr_service(), &location).unwrap();
    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(host.sim.command_count(UnixFunc::DeviceStartPairing), 1);
}

#[test]
fn characteristics_come_back_sorted_by_uuid() {
    let host = hrm_host(true);
    let bus = start_bus(&host.sim, fast_config());
    let file = open_device(&bus, addr(HRM));

    let chars = client::get_characteristics(&file, Route::Device, &hr_service()).unwrap();
    let uuids: Vec<u16> = chars
        .iter()
        .map(|c| bthle_unix::uuid_to_u16(&c.uuid()).unwrap())
        .collect();
    assert_eq!(uuids, vec![0x2A37, 0x2A38, 0x2A39]);
    assert_eq!(chars[0].attribute_handle, 0x10);
    assert_eq!(chars[0].service_handle, 0x0c);
    assert!(chars[0].properties().notify);
    assert!(chars[2].properties().write);
}

#[test]
fn unknown_service_is_invalid_parameter() {
    let host = hrm_host(true);
    let bus = start_bus(&host.sim, fast_config());
    let file = open_device(&bus, addr(HRM));

    let bogus = GattServiceRecord::new(&uuid_from_u16(0x1810), 0x40);
    assert_eq!(
        client::get_characteristics(&file, Route::Device, &bogus),
        Err(IoctlError::Status(NtStatus::INVALID_PARAMETER))
    );
}

#[test]
fn unknown_address_on_radio_is_not_found() {
    let host = hrm_host(true);
    let bus = start_bus(&host.sim, fast_config());
    let radio = open_radio(&bus);
    assert_eq!(
        client::get_services(&radio, Route::Radio(addr(0x0102_0304_0506))),
        Err(IoctlError::Status(NtStatus::NOT_FOUND))
    );
}

#[test]
fn unsupported_code_is_rejected() {
    let host = hrm_host(true);
    let bus = start_bus(&host.sim, fast_config());
    let file = open_device(&bus, addr(HRM));
    let st = file.device_io_control(IOCTL_BTH_GET_LOCAL_INFO, &[], &mut [0u8; 8]);
    assert_eq!(st.status, NtStatus::INVALID_DEVICE_REQUEST);
}

#[test]
fn write_then_read_back() {
    let host = hrm_host(true);
    host.sim.set_connected(&host.device, true).unwrap();
    let bus = start_bus(&host.sim, fast_config());
    let file = open_device(&bus, addr(HRM));
    let control = hr_char(0x2A39, 0x14, &["read", "write"]);

    client::write_characteristic(&file, Route::Device, &hr_service(), &control, &[0x01, 0x02], WriteType::WithResponse)
        .unwrap();
    assert_eq!(host.sim.characteristic_value(&host.control), Some(vec![0x01, 0x02]));
    let value = client::read_characteristic(&file, Route::Device, &hr_service(), &control).unwrap();
    assert_eq!(value, vec![0x01, 0x02]);

    client::write_characteristic(&file, Route::Device, &hr_service(), &control, &[], WriteType::WithoutResponse)
        .unwrap();
    assert_eq!(host.sim.characteristic_value(&host.control), Some(vec![]));
}

#[test]
fn write_with_short_payload_is_rejected() {
    let host = hrm_host(true);
    host.sim.set_connected(&host.device, true).unwrap();
    let bus = start_bus(&host.sim, fast_config());
    let file = open_device(&bus, addr(HRM));
    let control = hr_char(0x2A39, 0x14, &["read", "write"]);

    let header = WriteValueHeader {
        service: hr_service(),
        characteristic: control,
        write_type: 0,
        data_size: 4,
    };
    let mut input = header.as_bytes().to_vec();
    input.extend_from_slice(&[0xAA, 0xBB]);
    let st = file.device_io_control(IOCTL_BTHLE_WRITE_CHARACTERISTIC, &input, &mut []);
    assert_eq!(st.status, NtStatus::INVALID_PARAMETER);

    let header = WriteValueHeader {
        write_type: 7,
        data_size: 0,
        ..header
    };
    let st = file.device_io_control(IOCTL_BTHLE_WRITE_CHARACTERISTIC, header.as_bytes(), &mut []);
    assert_eq!(st.status, NtStatus::INVALID_PARAMETER);
}

#[test]
fn backend_failure_maps_to_status() {
    let host = hrm_host(true);
    host.sim.set_connected(&host.device, true).unwrap();
    let bus = start_bus(&host.sim, fast_config());
    let file = open_device(&bus, addr(HRM));
    let location = hr_char(0x2A38, 0x12, &["read"]);

    host.sim.fail_next(UnixFunc::GattCharacteristicRead, UnixError::Busy);
    assert_eq!(
        client::read_characteristic(&file, Route::Device, &hr_service(), &location),
        Err(IoctlError::Status(NtStatus::DEVICE_BUSY))
    );
    host.sim.set_connected(&host.device, false).unwrap();
    settle(&host.sim, &bus);
    assert_eq!(
        client::read_characteristic(&file, Route::Device, &hr_service(), &location),
        Err(IoctlError::Status(NtStatus::DEVICE_NOT_CONNECTED))
    );
}

#[test]
fn read_notification_times_out_without_values() {
    let host = hrm_host(true);
    host.sim.set_connected(&host.device, true).unwrap();
    let bus = start_bus(&host.sim, fast_config());
    let file = open_device(&bus, addr(HRM));
    let measurement = hr_char(0x2A37, 0x10, &["notify"]);

    client::set_notify(&file, Route::Device, &hr_service(), &measurement, true).unwrap();
    assert!(host.sim.is_notifying(&host.measurement));
    assert_eq!(
        client::read_notification(&file, Route::Device, &hr_service(), &measurement),
        Err(IoctlError::Status(NtStatus::IO_TIMEOUT))
    );

    assert!(host.sim.notify(&host.measurement, &[0x16, 0x4E]));
    assert_eq!(
        client::read_notification(&file, Route::Device, &hr_service(), &measurement).unwrap(),
        vec![0x16, 0x4E]
    );
}

#[test]
fn oversized_notification_is_kept_for_the_retry() {
    let host = hrm_host(true);
    host.sim.set_connected(&host.device, true).unwrap();
    let bus = start_bus(&host.sim, fast_config());
    let file = open_device(&bus, addr(HRM));
    let measurement = hr_char(0x2A37, 0x10, &["notify"]);
    client::set_notify(&file, Route::Device, &hr_service(), &measurement, true).unwrap();

    let payload: Vec<u8> = (0..20).collect();
    assert!(host.sim.notify(&host.measurement, &payload));

    let header = ReadValueHeader {
        service: hr_service(),
        characteristic: measurement,
        data_size: 0,
    };
    let header_len = size_of::<ReadValueHeader>();
    let mut out = vec![0u8; header_len];
    let st = file.device_io_control(IOCTL_BTHLE_READ_NOTIFICATION, header.as_bytes(), &mut out);
    assert_eq!(st.status, NtStatus::MORE_ENTRIES);
    assert_eq!(get_u32(&out, offset_of!(ReadValueHeader, data_size)), Some(20));

    // The backend queue is drained; the retry is served from the stash
    let mut out = vec![0u8; header_len + 20];
    let st = file.device_io_control(IOCTL_BTHLE_READ_NOTIFICATION, header.as_bytes(), &mut out);
    assert_eq!(st.status, NtStatus::SUCCESS);
    assert_eq!(&out[header_len..], &payload[..]);
}

#[test]
fn cancel_io_ends_a_blocked_read() {
    let host = hrm_host(true);
    host.sim.set_connected(&host.device, true).unwrap();
    let config = BusConfig {
        notification_read_timeout_ms: 5000,
        ..fast_config()
    };
    let bus = start_bus(&host.sim, config);
    let file = Arc::new(open_device(&bus, addr(HRM)));
    let measurement = hr_char(0x2A37, 0x10, &["notify"]);
    client::set_notify(&*file, Route::Device, &hr_service(), &measurement, true).unwrap();

    let reader = {
        let file = Arc::clone(&file);
        std::thread::spawn(move || {
            client::read_notification(&*file, Route::Device, &hr_service(), &measurement)
        })
    };
    std::thread::sleep(Duration::from_millis(50));
    let started = Instant::now();
    file.cancel_io();
    assert_eq!(
        reader.join().unwrap(),
        Err(IoctlError::Status(NtStatus::CANCELLED))
    );
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn local_info_reports_radio_state() {
    let host = hrm_host(true);
    let bus = start_bus(&host.sim, fast_config());
    let radio = open_radio(&bus);

    let info = client::get_local_info(&radio).unwrap();
    assert_eq!(info.address, 0x001A_7DDA_7113);
    assert_eq!(info.name(), "hci0");
    assert_eq!(info.flags & LOCAL_RADIO_CONNECTABLE, LOCAL_RADIO_CONNECTABLE);
    assert_eq!(info.flags & LOCAL_RADIO_DISCOVERING, 0);

    client::start_discovery(&radio).unwrap();
    client::set_flag(&radio, RADIO_FLAG_DISCOVERABLE, true).unwrap();
    settle(&host.sim, &bus);
    let info = client::get_local_info(&radio).unwrap();
    assert_ne!(info.flags & LOCAL_RADIO_DISCOVERING, 0);
    assert_ne!(info.flags & LOCAL_RADIO_DISCOVERABLE, 0);

    client::stop_discovery(&radio).unwrap();
    settle(&host.sim, &bus);
    let info = client::get_local_info(&radio).unwrap();
    assert_eq!(info.flags & LOCAL_RADIO_DISCOVERING, 0);

    assert_eq!(
        client::set_flag(&radio, 9, true),
        Err(IoctlError::Status(NtStatus::INVALID_PARAMETER))
    );
}

#[test]
fn device_info_lists_flags() {
    let host = hrm_host(true);
    host.sim.add_device(&host.radio, addr(0x1111_2222_3333), None).unwrap();
    let bus = start_bus(&host.sim, fast_config());
    let radio = open_radio(&bus);

    let devices = client::get_device_info(&radio).unwrap();
    assert_eq!(devices.len(), 2);
    let hrm = devices.iter().find(|d| d.address() == addr(HRM)).unwrap();
    assert_eq!(hrm.name(), "HRM");
    assert_ne!(hrm.flags & BDIF_NAME, 0);
    assert_ne!(hrm.flags & BDIF_LE, 0);
    assert_eq!(hrm.flags & BDIF_CONNECTED, 0);
    let other = devices.iter().find(|d| d.address() == addr(0x1111_2222_3333)).unwrap();
    assert_eq!(other.flags & BDIF_NAME, 0);
    assert_eq!(other.flags & BDIF_LE, 0);
    assert_ne!(other.flags & BDIF_ADDRESS, 0);
}

#[test]
fn connection_status_follows_device() {
    let host = hrm_host(true);
    let bus = start_bus(&host.sim, fast_config());
    let file = open_device(&bus, addr(HRM));
    let radio = open_radio(&bus);

    assert_eq!(client::get_connection_status(&file, Route::Device), Ok(false));
    host.sim.set_connected(&host.device, true).unwrap();
    settle(&host.sim, &bus);
    assert_eq!(client::get_connection_status(&file, Route::Device), Ok(true));
    assert_eq!(client::get_connection_status(&radio, Route::Radio(addr(HRM))), Ok(true));

    client::disconnect_device(&radio, addr(HRM)).unwrap();
    settle(&host.sim, &bus);
    assert_eq!(client::get_connection_status(&file, Route::Device), Ok(false));
}

#[test]
fn remove_device_drops_it_from_the_radio() {
    let host = hrm_host(true);
    let bus = start_bus(&host.sim, fast_config());
    let radio = open_radio(&bus);

    client::remove_device(&radio, addr(HRM)).unwrap();
    settle(&host.sim, &bus);
    assert!(client::get_device_info(&radio).unwrap().is_empty());
    assert_eq!(
        client::remove_device(&radio, addr(HRM)),
        Err(IoctlError::Status(NtStatus::NOT_FOUND))
    );
}

#[test]
fn open_handles_are_counted_per_pdo() {
    let host = hrm_host(true);
    let bus = start_bus(&host.sim, fast_config());
    let pdo = PdoId::Device { radio: 0, index: 0 };

    let first = open_device(&bus, addr(HRM));
    let second = first.duplicate();
    assert_eq!(first.pdo(), pdo);
    assert_eq!(bus.open_count(pdo), 2);
    assert!(format!("{second:?}").contains("Device"));
    drop(first);
    assert_eq!(bus.open_count(pdo), 1);
    drop(second);
    assert_eq!(bus.open_count(pdo), 0);

    let path = bus.interfaces(InterfaceClass::BthLeDevice)[0].to_lowercase();
    assert!(bus.open(&path).is_ok());
    assert!(bus.open("\\\\?\\BTHLE#Dev_000000000000#nothing").is_err());
}
