//! Command handlers for the CLI application.
//!
//! - `query`: radios, devices, services, characteristics, config
//! - `gatt`: read, write, notify
//! - `watch`: advertisement scanning

pub mod gatt;
pub mod query;
pub mod watch;

use anyhow::{anyhow, bail, Context};
use bthle::gatt::GattCommunicationStatus;
use bthle::{BluetoothLEDevice, ComPtr, GattCharacteristic, GattDeviceService, Runtime};
use bthle_unix::BluetoothAddress;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::cli::OutputFormat;

/// Result type for command handlers
pub type CommandResult = anyhow::Result<()>;

/// Everything a command needs: the running stack and how to print
pub struct Session {
    pub rt: Runtime,
    pub format: OutputFormat,
}

impl Session {
    /// Print `value` as JSON, or through `text` in text mode
    pub fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce(&T)) -> CommandResult {
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
            OutputFormat::Text => text(value),
        }
        Ok(())
    }

    pub fn device(&self, address: BluetoothAddress) -> anyhow::Result<ComPtr<BluetoothLEDevice>> {
        BluetoothLEDevice::from_bluetooth_address_async(&self.rt, address.as_u64())
            .get()?
            .ok_or_else(|| anyhow!("no device at {address}"))
    }

    pub fn service(&self, device: &BluetoothLEDevice, uuid: Uuid) -> anyhow::Result<ComPtr<GattDeviceService>> {
        let result = device.get_gatt_services_for_uuid_async(uuid).get()?;
        if result.status() != GattCommunicationStatus::Success {
            bail!("service discovery failed: {:?}", result.status());
        }
        result
            .services()
            .get_at(0)
            .with_context(|| format!("service {uuid} not found"))
    }

    pub fn characteristic(
        &self,
        service: &GattDeviceService,
        uuid: Uuid,
    ) -> anyhow::Result<ComPtr<GattCharacteristic>> {
        let result = service.get_characteristics_for_uuid_async(uuid).get()?;
        if result.status() != GattCommunicationStatus::Success {
            bail!("characteristic discovery failed: {:?}", result.status());
        }
        result
            .characteristics()
            .get_at(0)
            .with_context(|| format!("characteristic {uuid} not found"))
    }

    /// Resolve device, service and characteristic in one go
    pub fn resolve(
        &self,
        address: BluetoothAddress,
        service: Uuid,
        characteristic: Uuid,
    ) -> anyhow::Result<ComPtr<GattCharacteristic>> {
        let device = self.device(address)?;
        let service = self.service(&device, service)?;
        self.characteristic(&service, characteristic)
    }
}

/// Set up a Ctrl-C handler that sets the given flag to false when triggered.
/// Returns the Arc<AtomicBool> for use in the main loop.
pub fn setup_interrupt_handler() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    ctrlc::set_handler(move || {
        running_clone.store(false, Ordering::SeqCst);
    })
    .ok();

    running
}

/// Short form for SIG UUIDs, full form otherwise
pub fn uuid_label(uuid: &Uuid) -> String {
    match bthle_unix::uuid_to_u16(uuid) {
        Some(short) => format!("{short:04X}"),
        None => uuid.to_string(),
    }
}
