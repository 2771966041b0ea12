//! Advertisement scanning.

use super::{setup_interrupt_handler, CommandResult, Session};
use bthle::advertisement::BluetoothLEAdvertisementFilter;
use bthle::BluetoothLEAdvertisementWatcher;
use bthle_unix::BluetoothAddress;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Serialize, Clone)]
struct Sighting {
    address: String,
    name: String,
    rssi: i16,
    seen: u32,
}

/// Scan for `seconds`, then print one line per device seen
pub fn watch(session: &Session, seconds: u64, name: Option<&str>, min_rssi: Option<i16>) -> CommandResult {
    let filter = BluetoothLEAdvertisementFilter::new();
    if let Some(name) = name {
        filter.advertisement().set_local_name(name);
    }
    let watcher = BluetoothLEAdvertisementWatcher::with_filter(&session.rt, filter);
    watcher.signal_strength_filter().set_in_range_threshold(min_rssi);

    let seen: Arc<parking_lot::Mutex<BTreeMap<u64, Sighting>>> = Arc::default();
    let sink = Arc::clone(&seen);
    watcher.add_received(Arc::new(move |_, args| {
        let address = args.bluetooth_address();
        let mut seen = sink.lock();
        let entry = seen.entry(address).or_insert_with(|| Sighting {
            address: BluetoothAddress::from_u64(address).to_string(),
            name: String::new(),
            rssi: args.raw_signal_strength_in_dbm(),
            seen: 0,
        });
        let local_name = args.advertisement().local_name();
        if !local_name.is_empty() {
            entry.name = local_name;
        }
        entry.rssi = args.raw_signal_strength_in_dbm();
        entry.seen += 1;
    }));

    let running = setup_interrupt_handler();
    watcher.start()?;
    eprintln!("Scanning for {seconds}s (Ctrl-C to stop)");
    let deadline = Instant::now() + Duration::from_secs(seconds);
    while Instant::now() < deadline && running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }
    watcher.stop();

    let rows: Vec<Sighting> = seen.lock().values().cloned().collect();
    session.emit(&rows, |rows| {
        if rows.is_empty() {
            println!("Nothing seen");
        }
        for row in rows.iter() {
            let name = if row.name.is_empty() { "(anonymous)" } else { row.name.as_str() };
            println!("{}  {:<24} {:>4} dBm  x{}", row.address, name, row.rssi, row.seen);
        }
    })
}
