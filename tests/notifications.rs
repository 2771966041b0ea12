//! One notification task per characteristic across facade objects

mod common;

use std::sync::Arc;

use bthle_ioctl::Win32Error;
use parking_lot::Mutex;

use common::*;

#[test]
fn second_subscriber_on_same_characteristic_is_busy() {
    let host = hrm_host(true, true);
    let rt = runtime(&host, fast_config());

    let first = characteristic_of(&service(&open_hrm(&rt), 0x180D), 0x2A37);
    let second = characteristic_of(&service(&open_hrm(&rt), 0x180D), 0x2A37);
    assert!(first != second);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let token = first
        .add_value_changed(Arc::new(move |_, args| sink.lock().push(args.characteristic_value().to_vec())))
        .unwrap();
    let issued = host.sim.command_count(bthle_unix::UnixFunc::GattCharacteristicSetNotify);

    let err = second.add_value_changed(Arc::new(|_, _| {})).unwrap_err();
    assert_eq!(err.win32(), Some(Win32Error::BUSY));
    assert!(!second.is_notifying());
    // The rejected subscriber never touched the device
    assert_eq!(host.sim.command_count(bthle_unix::UnixFunc::GattCharacteristicSetNotify), issued);

    // The first one keeps receiving
    assert!(first.is_notifying());
    assert!(host.sim.notify(&host.measurement, &[0x2A]));
    assert!(wait_for(|| seen.lock().len() == 1));

    first.remove_value_changed(token);
    assert!(!host.sim.notify(&host.measurement, &[0x2B]));
    rt.shutdown();
}
