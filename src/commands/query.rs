//! Query (read-only) command handlers.

use super::{uuid_label, CommandResult, Session};
use anyhow::bail;
use bthle::gatt::{GattCharacteristicProperties, GattCommunicationStatus};
use bthle::win32::{self, DeviceSearchParams};
use bthle::BluetoothAdapter;
use bthle_bus::BusConfig;
use bthle_unix::BluetoothAddress;
use serde::Serialize;
use std::path::Path;
use uuid::Uuid;

#[derive(Serialize)]
struct RadioRow {
    address: String,
    name: String,
    manufacturer: u16,
    lmp_subversion: u16,
    discoverable: bool,
    connectable: bool,
}

/// List radios via the Win32 API, plus the default adapter's id
pub fn radios(session: &Session) -> CommandResult {
    let rows = win32::find_radios(&session.rt)?
        .iter()
        .map(|radio| {
            win32::get_radio_info(radio).map(|info| RadioRow {
                address: info.address.to_string(),
                name: info.name,
                manufacturer: info.manufacturer,
                lmp_subversion: info.lmp_subversion,
                discoverable: info.discoverable,
                connectable: info.connectable,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let default_id = BluetoothAdapter::get_default_async(&session.rt)?
        .get()?
        .map(|adapter| adapter.device_id().to_string());

    session.emit(&rows, |rows| {
        for row in rows.iter() {
            println!("{}  {}", row.address, row.name);
            println!("  Manufacturer:  0x{:04X}", row.manufacturer);
            println!("  LMP subver:    0x{:04X}", row.lmp_subversion);
            println!("  Discoverable:  {}", row.discoverable);
            println!("  Connectable:   {}", row.connectable);
        }
        if let Some(id) = &default_id {
            println!("Default adapter: {id}");
        }
    })
}

#[derive(Serialize)]
struct DeviceRow {
    address: String,
    name: String,
    class_of_device: u32,
    connected: bool,
    paired: bool,
}

/// List devices the first radio knows about
pub fn devices(session: &Session) -> CommandResult {
    let radios = win32::find_radios(&session.rt)?;
    let Some(radio) = radios.first() else {
        bail!("no radio");
    };
    let rows: Vec<DeviceRow> = match win32::find_devices(radio, &DeviceSearchParams::default()) {
        Ok(devices) => devices
            .into_iter()
            .map(|d| DeviceRow {
                address: d.address.to_string(),
                name: d.name,
                class_of_device: d.class_of_device,
                connected: d.connected,
                paired: d.authenticated,
            })
            .collect(),
        Err(e) if e.code() == bthle_ioctl::Win32Error::NO_MORE_ITEMS => Vec::new(),
        Err(e) => return Err(e.into()),
    };
    session.emit(&rows, |rows| {
        if rows.is_empty() {
            println!("No devices");
        }
        for row in rows.iter() {
            let mut flags = Vec::new();
            if row.connected {
                flags.push("connected");
            }
            if row.paired {
                flags.push("paired");
            }
            println!("{}  {:<24} {}", row.address, row.name, flags.join(","));
        }
    })
}

#[derive(Serialize)]
struct ServiceRow {
    uuid: Uuid,
    handle: u16,
}

/// List GATT services through `BluetoothLEDevice`
pub fn services(session: &Session, address: BluetoothAddress) -> CommandResult {
    let device = session.device(address)?;
    let result = device.get_gatt_services_async().get()?;
    if result.status() != GattCommunicationStatus::Success {
        bail!("service discovery failed: {:?}", result.status());
    }
    let rows: Vec<ServiceRow> = result
        .services()
        .iter()
        .map(|s| ServiceRow {
            uuid: s.uuid(),
            handle: s.attribute_handle(),
        })
        .collect();
    let name = device.name().unwrap_or_default();
    session.emit(&rows, |rows| {
        println!("{} {}", address, name);
        for row in rows.iter() {
            println!("  0x{:04X}  {}", row.handle, uuid_label(&row.uuid));
        }
    })
}

#[derive(Serialize)]
struct CharacteristicRow {
    uuid: Uuid,
    handle: u16,
    properties: Vec<&'static str>,
}

fn property_names(props: GattCharacteristicProperties) -> Vec<&'static str> {
    [
        (GattCharacteristicProperties::BROADCAST, "broadcast"),
        (GattCharacteristicProperties::READ, "read"),
        (GattCharacteristicProperties::WRITE_WITHOUT_RESPONSE, "write-without-response"),
        (GattCharacteristicProperties::WRITE, "write"),
        (GattCharacteristicProperties::NOTIFY, "notify"),
        (GattCharacteristicProperties::INDICATE, "indicate"),
        (GattCharacteristicProperties::AUTHENTICATED_SIGNED_WRITES, "signed-write"),
        (GattCharacteristicProperties::EXTENDED_PROPERTIES, "extended"),
    ]
    .into_iter()
    .filter(|(flag, _)| props.contains(*flag))
    .map(|(_, name)| name)
    .collect()
}

/// List the characteristics of one service
pub fn characteristics(session: &Session, address: BluetoothAddress, service: Uuid) -> CommandResult {
    let device = session.device(address)?;
    let service = session.service(&device, service)?;
    let result = service.get_characteristics_async().get()?;
    if result.status() != GattCommunicationStatus::Success {
        bail!("characteristic discovery failed: {:?}", result.status());
    }
    let rows: Vec<CharacteristicRow> = result
        .characteristics()
        .iter()
        .map(|c| CharacteristicRow {
            uuid: c.uuid(),
            handle: c.attribute_handle(),
            properties: property_names(c.characteristic_properties()),
        })
        .collect();
    session.emit(&rows, |rows| {
        for row in rows.iter() {
            println!(
                "  0x{:04X}  {:<6} {}",
                row.handle,
                uuid_label(&row.uuid),
                row.properties.join(",")
            );
        }
    })
}

/// Print the effective bus configuration, optionally saving it
pub fn config(session: &Session, path: &Path, save: bool) -> CommandResult {
    let config: &BusConfig = session.rt.config();
    if save {
        config.save(path)?;
        eprintln!("Saved to {}", path.display());
    }
    session.emit(config, |config| match toml::to_string_pretty(config) {
        Ok(text) => print!("{text}"),
        Err(e) => eprintln!("cannot render config: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_names_follow_flags() {
        let props = GattCharacteristicProperties(
            GattCharacteristicProperties::READ.0 | GattCharacteristicProperties::NOTIFY.0,
        );
        assert_eq!(property_names(props), vec!["read", "notify"]);
        assert!(property_names(GattCharacteristicProperties::NONE).is_empty());
    }

    #[test]
    fn config_save_writes_loadable_file() {
        let wanted = BusConfig {
            watcher_poll_ms: 250,
            ..BusConfig::default()
        };
        let rt = bthle::Runtime::from_host(&bthle_unix::SimHost::demo(), wanted.clone()).unwrap();
        let session = Session {
            rt,
            format: crate::cli::OutputFormat::Json,
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("bus.toml");

        config(&session, &path, true).unwrap();
        assert_eq!(BusConfig::load(&path).unwrap(), wanted);
        session.rt.shutdown();
    }
}
