//! Characteristic read, write and notification handlers.

use super::{setup_interrupt_handler, uuid_label, CommandResult, Session};
use anyhow::{bail, Context};
use bthle::gatt::{GattCommunicationStatus, GattWriteOption};
use bthle::{CryptographicBuffer, DataReader};
use bthle_unix::BluetoothAddress;
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::sync::{mpsc, Arc};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

#[derive(Serialize)]
struct ValueRow {
    characteristic: Uuid,
    hex: String,
    base64: String,
}

pub fn read(session: &Session, address: BluetoothAddress, service: Uuid, characteristic: Uuid) -> CommandResult {
    let chr = session.resolve(address, service, characteristic)?;
    let result = chr.read_value_async().get()?;
    if result.status() != GattCommunicationStatus::Success {
        bail!(
            "read failed: {:?} (protocol error {:?})",
            result.status(),
            result.protocol_error()
        );
    }
    let value = result.value().context("read returned no value")?;
    let row = ValueRow {
        characteristic,
        hex: CryptographicBuffer::encode_to_hex_string(&value),
        base64: CryptographicBuffer::encode_to_base64_string(&value),
    };
    session.emit(&row, |row| {
        println!("{} = {}", uuid_label(&row.characteristic), row.hex);
        // Single-byte values are usually enums or flags
        if value.length() == 1 {
            if let Ok(byte) = DataReader::from_buffer(&value).read_byte() {
                println!("  ({byte})");
            }
        }
    })
}

pub fn write(
    session: &Session,
    address: BluetoothAddress,
    service: Uuid,
    characteristic: Uuid,
    value: &str,
    no_response: bool,
) -> CommandResult {
    let buffer = CryptographicBuffer::decode_from_hex_string(value).context("value must be hex")?;
    let chr = session.resolve(address, service, characteristic)?;
    let option = if no_response {
        GattWriteOption::WriteWithoutResponse
    } else {
        GattWriteOption::WriteWithResponse
    };
    let status = chr.write_value_with_option_async(&buffer, option).get()?;
    if status != GattCommunicationStatus::Success {
        bail!("write failed: {status:?}");
    }
    println!("Wrote {} byte(s) to {}", buffer.length(), uuid_label(&characteristic));
    Ok(())
}

#[derive(Serialize)]
struct NotificationRow {
    timestamp: i64,
    hex: String,
}

/// Print notifications until `count` arrived or Ctrl-C
pub fn notify(
    session: &Session,
    address: BluetoothAddress,
    service: Uuid,
    characteristic: Uuid,
    count: usize,
) -> CommandResult {
    let chr = session.resolve(address, service, characteristic)?;
    let running = setup_interrupt_handler();

    let (tx, rx) = mpsc::channel();
    let tx = parking_lot::Mutex::new(tx);
    let token = chr.add_value_changed(Arc::new(move |_, args| {
        let row = NotificationRow {
            timestamp: args.timestamp().universal_time,
            hex: CryptographicBuffer::encode_to_hex_string(&args.characteristic_value()),
        };
        let _ = tx.lock().send(row);
    }))?;
    eprintln!("Listening on {} (Ctrl-C to stop)", uuid_label(&characteristic));

    let mut received = 0;
    while received < count && running.load(Ordering::SeqCst) {
        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(row) => {
                received += 1;
                session.emit(&row, |row| println!("[{}] {}", row.timestamp, row.hex))?;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    chr.remove_value_changed(token);
    debug!("received {} notification(s)", received);
    Ok(())
}
