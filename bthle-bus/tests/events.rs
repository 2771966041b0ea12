//! Event application against the simulated backend

mod common;

use std::sync::Arc;

use bthle_bus::{InterfaceClass, InterfaceEvent, Lifecycle, PdoId, PropertyKey, PropertyValue};
use bthle_ioctl::{client, IoctlError, NtStatus};
use bthle_unix::{device_prop, AuthMethod, DeviceProperties, Event, UnixError, UnixFunc};
use parking_lot::Mutex;

use common::*;

#[test]
fn radio_publishes_both_radio_interfaces() {
    let sim = new_sim();
    sim.add_adapter("hci0", addr(0x001A_7DDA_7113));
    let bus = start_bus(&sim, fast_config());

    let radios = bus.graph().radios();
    assert_eq!(radios.len(), 1);
    assert_eq!(radios[0].hw_name, "HCI0");
    assert_eq!(radios[0].state.get(), Lifecycle::Active);
    assert_eq!(bus.interfaces(InterfaceClass::BthRadio).len(), 1);
    assert_eq!(bus.interfaces(InterfaceClass::BthPort).len(), 1);
    assert!(bus.interfaces(InterfaceClass::BthRadio)[0].contains("RADIO_HCI0"));
    assert_eq!(bus.radio_unique_name(0).unwrap(), "hci0");
    assert!(sim.command_count(UnixFunc::AdapterGetUniqueName) >= 1);
}

#[test]
fn radio_name_falls_back_to_path_when_lookup_fails() {
    let sim = new_sim();
    sim.fail_next(UnixFunc::AdapterGetUniqueName, UnixError::Busy);
    sim.add_adapter("hci1", addr(0x001A_7DDA_7114));
    let bus = start_bus(&sim, fast_config());

    assert_eq!(bus.graph().radios()[0].hw_name, "HCI1");
    assert!(bus.interfaces(InterfaceClass::BthRadio)[0].contains("RADIO_HCI1"));
}

#[test]
fn event_pump_survives_get_event_failure() {
    let sim = new_sim();
    let bus = start_bus(&sim, fast_config());

    sim.fail_next(UnixFunc::GetEvent, UnixError::Busy);
    sim.add_adapter("hci0", addr(0x001A_7DDA_7113));
    settle(&sim, &bus);
    assert_eq!(bus.graph().radios().len(), 1);
    assert_eq!(bus.interfaces(InterfaceClass::BthRadio).len(), 1);
}

#[test]
fn duplicate_device_is_merged_and_second_handle_freed() {
    let sim = new_sim();
    let radio = sim.add_adapter("hci0", addr(0x001A_7DDA_7113));
    let bus = start_bus(&sim, fast_config());

    sim.add_device(&radio, addr(HRM), None).unwrap();
    let second = sim.add_device(&radio, addr(HRM), Some("Polar H10")).unwrap();
    settle(&sim, &bus);

    let devices = bus.graph().devices(0);
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].address, addr(HRM));
    assert_eq!(devices[0].props().name(), Some("Polar H10"));
    assert!(devices[0].props().present.contains(device_prop::CONNECTED));
    assert_ne!(devices[0].handle, second);
    assert!(bus.graph().device_by_handle(&second).is_none());
}

#[test]
fn named_devices_go_to_the_head() {
    let sim = new_sim();
    let radio = sim.add_adapter("hci0", addr(0x001A_7DDA_7113));
    let bus = start_bus(&sim, fast_config());

    sim.add_device(&radio, addr(0x1111_1111_1111), None).unwrap();
    sim.add_device(&radio, addr(0x2222_2222_2222), Some("Named")).unwrap();
    sim.add_device(&radio, addr(0x3333_3333_3333), None).unwrap();
    settle(&sim, &bus);

    let order: Vec<u64> = bus.graph().devices(0).iter().map(|d| d.address.as_u64()).collect();
    assert_eq!(order, vec![0x2222_2222_2222, 0x1111_1111_1111, 0x3333_3333_3333]);
    let indices: Vec<u32> = bus.graph().devices(0).iter().map(|d| d.index).collect();
    assert_eq!(indices, vec![1, 0, 2]);
}

#[test]
fn services_make_device_le_and_publish_interface() {
    let host = hrm_host(false);
    let bus = start_bus(&host.sim, fast_config());
    let mut arrivals = bus.subscribe_interfaces();
    assert!(bus.interfaces(InterfaceClass::BthLeDevice).is_empty());

    host.sim.resolve_services(&host.device).unwrap();
    settle(&host.sim, &bus);

    let paths = bus.interfaces(InterfaceClass::BthLeDevice);
    assert_eq!(paths.len(), 1);
    assert_eq!(bthle_bus::pnp::address_from_symlink(&paths[0]), Some(addr(HRM)));
    assert!(matches!(arrivals.try_recv(), Ok(InterfaceEvent::Arrival(i)) if i.symlink == paths[0]));

    let device = bus.graph().device_by_address(0, addr(HRM)).unwrap();
    assert!(device.is_le());
    assert_eq!(device.services().len(), 3);
    let pdo = PdoId::Device { radio: 0, index: 0 };
    assert_eq!(bus.device_property(pdo, PropertyKey::Le), Some(PropertyValue::Bool(true)));
    assert_eq!(
        bus.device_property(pdo, PropertyKey::Name),
        Some(PropertyValue::String("HRM".into()))
    );
}

#[test]
fn duplicate_service_and_characteristic_are_rejected() {
    let host = hrm_host(true);
    let bus = start_bus(&host.sim, fast_config());
    let device = bus.graph().device_by_address(0, addr(HRM)).unwrap();
    let before = device.services().len();
    let hr_chars = device
        .find_service(&bthle_unix::uuid_from_u16(0x180D), 0x0c)
        .unwrap()
        .characteristics()
        .len();

    // Re-announce the same service and characteristic with fresh handles
    let names = host.sim.names();
    host.sim.push_event(Event::GattServiceAdded {
        device: host.device.clone(),
        service: bthle_unix::ServiceHandle::new(names.intern("/dup/service")),
        uuid: bthle_unix::uuid_from_u16(0x180F),
        primary: true,
        handle: 9,
    });
    let svc = device.find_service(&bthle_unix::uuid_from_u16(0x180D), 0x0c).unwrap();
    host.sim.push_event(Event::GattCharacteristicAdded {
        service: svc.handle.clone(),
        characteristic: bthle_unix::CharacteristicHandle::new(names.intern("/dup/char")),
        info: svc.characteristics()[0].info.clone(),
    });
    settle(&host.sim, &bus);

    assert_eq!(device.services().len(), before);
    assert_eq!(svc.characteristics().len(), hr_chars);
}

#[test]
fn props_changed_updates_store_and_connection() {
    let host = hrm_host(true);
    let bus = start_bus(&host.sim, fast_config());
    let pdo = PdoId::Device { radio: 0, index: 0 };
    assert_eq!(bus.device_property(pdo, PropertyKey::Connected), Some(PropertyValue::Bool(false)));

    host.sim.set_connected(&host.device, true).unwrap();
    host.sim.set_device_name(&host.device, "HRM Pro").unwrap();
    settle(&host.sim, &bus);

    let device = bus.graph().device_by_address(0, addr(HRM)).unwrap();
    assert!(device.is_connected());
    assert_eq!(bus.device_property(pdo, PropertyKey::Connected), Some(PropertyValue::Bool(true)));
    assert_eq!(
        bus.device_property(pdo, PropertyKey::Name),
        Some(PropertyValue::String("HRM Pro".into()))
    );

    // Invalidating the name drops it
    host.sim.push_event(Event::DevicePropsChanged {
        device: host.device.clone(),
        changed: bthle_unix::PropMask::EMPTY,
        props: DeviceProperties::default(),
        invalidated: device_prop::NAME,
    });
    settle(&host.sim, &bus);
    assert_eq!(device.props().name(), None);
    assert_eq!(bus.device_property(pdo, PropertyKey::Name), None);
}

#[test]
fn device_removal_retires_nodes_and_interface() {
    let host = hrm_host(true);
    let bus = start_bus(&host.sim, fast_config());
    let device = bus.graph().device_by_address(0, addr(HRM)).unwrap();
    let service = device.services()[0].clone();
    let characteristic = service.characteristics()[0].clone();
    assert_eq!(bus.interfaces(InterfaceClass::BthLeDevice).len(), 1);

    host.sim.remove_device(&host.device);
    settle(&host.sim, &bus);

    // Our references keep the nodes alive, marked for removal
    assert_eq!(device.state.get(), Lifecycle::Removing);
    assert_eq!(service.state.get(), Lifecycle::Removing);
    assert_eq!(characteristic.state.get(), Lifecycle::Removing);
    assert!(bus.graph().device_by_address(0, addr(HRM)).is_none());
    assert!(bus.interfaces(InterfaceClass::BthLeDevice).is_empty());
}

#[test]
fn radio_removal_fails_pending_pairing_with_delete_pending() {
    let host = hrm_host(true);
    host.sim
        .require_auth(&host.device, AuthMethod::NumericComparison, 123_456)
        .unwrap();
    let bus = start_bus(&host.sim, fast_config());
    let radio_file = Arc::new(open_radio(&bus));

    let pairing = {
        let radio_file = Arc::clone(&radio_file);
        std::thread::spawn(move || client::start_auth(&*radio_file, addr(HRM)))
    };
    assert!(wait_for(|| host.sim.command_count(UnixFunc::DeviceStartPairing) == 1));
    settle(&host.sim, &bus);

    host.sim.remove_adapter(&host.radio);
    settle(&host.sim, &bus);

    let result = pairing.join().unwrap();
    assert_eq!(result, Err(IoctlError::Status(NtStatus::DELETE_PENDING)));
    assert!(bus.graph().radios().is_empty());
    assert!(bus.interfaces(InterfaceClass::BthRadio).is_empty());
}

#[test]
fn auth_prompt_reaches_subscriber_and_pairing_completes() {
    let host = hrm_host(true);
    host.sim.require_auth(&host.device, AuthMethod::Passkey, 4321).unwrap();
    let bus = start_bus(&host.sim, fast_config());

    let prompts = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&prompts);
    let _registration = bus
        .register_for_authentication(Arc::new(move |info| sink.lock().push(info.clone())))
        .unwrap();
    assert!(host.sim.incoming_auth_enabled());

    let radio_file = Arc::new(open_radio(&bus));
    let pairing = {
        let radio_file = Arc::clone(&radio_file);
        std::thread::spawn(move || client::start_auth(&*radio_file, addr(HRM)))
    };
    assert!(wait_for(|| !prompts.lock().is_empty()));
    let prompt = prompts.lock()[0].clone();
    assert_eq!(prompt.address, addr(HRM));
    assert_eq!(prompt.method, AuthMethod::Passkey);

    let authenticated =
        client::send_auth_response(&*radio_file, addr(HRM), AuthMethod::Passkey as u32, 4321, false)
            .unwrap();
    assert!(authenticated);
    assert_eq!(pairing.join().unwrap(), Ok(()));
    settle(&host.sim, &bus);
    assert!(bus.graph().device_by_address(0, addr(HRM)).unwrap().props().paired());
}

#[test]
fn rejected_passkey_fails_pairing() {
    let host = hrm_host(true);
    host.sim.require_auth(&host.device, AuthMethod::Passkey, 4321).unwrap();
    let bus = start_bus(&host.sim, fast_config());
    let radio_file = Arc::new(open_radio(&bus));

    let pairing = {
        let radio_file = Arc::clone(&radio_file);
        std::thread::spawn(move || client::start_auth(&*radio_file, addr(HRM)))
    };
    assert!(wait_for(|| bus.last_auth_request().is_some()));
    let authenticated =
        client::send_auth_response(&*radio_file, addr(HRM), AuthMethod::Passkey as u32, 1, false)
            .unwrap();
    assert!(!authenticated);
    assert_eq!(
        pairing.join().unwrap(),
        Err(IoctlError::Status(NtStatus::ACCESS_DENIED))
    );
}

#[test]
fn shutdown_stops_pump() {
    let host = hrm_host(true);
    let bus = start_bus(&host.sim, fast_config());
    assert!(bus.is_running());
    bus.shutdown();
    bus.shutdown();
    assert!(!bus.is_running());
    assert!(!bus.connection().is_initialized());
}
