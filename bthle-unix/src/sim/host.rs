//! TOML description of a simulated host
//!
//! ```toml
//! [[adapter]]
//! name = "hci0"
//! address = "00:1A:7D:DA:71:13"
//!
//! [[adapter.device]]
//! address = "C0:34:99:11:22:33"
//! name = "Heart Rate Sensor"
//! cached = true
//!
//! [[adapter.device.service]]
//! uuid = "180D"
//! handle = 1
//!
//! [[adapter.device.service.characteristic]]
//! uuid = "2A37"
//! handle = 16
//! properties = ["read", "notify"]
//! value = "0648"
//! notifications = ["01", "02", "03"]
//! ```

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::SimBackend;
use crate::error::UnixError;
use crate::name::NameTable;
use crate::types::{parse_gatt_uuid, AuthMethod, BluetoothAddress, CharacteristicInfo, CharacteristicProperties};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimHost {
    #[serde(default)]
    pub adapter: Vec<SimAdapterDesc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimAdapterDesc {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub device: Vec<SimDeviceDesc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimDeviceDesc {
    pub address: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub connected: bool,
    #[serde(default)]
    pub paired: bool,
    /// Services already known to the host before init
    #[serde(default)]
    pub cached: bool,
    /// Passkey the peer expects during pairing
    #[serde(default)]
    pub passkey: Option<u32>,
    #[serde(default)]
    pub service: Vec<SimServiceDesc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimServiceDesc {
    pub uuid: String,
    pub handle: u16,
    #[serde(default = "default_primary")]
    pub primary: bool,
    #[serde(default)]
    pub characteristic: Vec<SimCharacteristicDesc>,
}

fn default_primary() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimCharacteristicDesc {
    pub uuid: String,
    pub handle: u16,
    #[serde(default)]
    pub value_handle: Option<u16>,
    #[serde(default)]
    pub properties: Vec<String>,
    /// Initial value, hex encoded
    #[serde(default)]
    pub value: String,
    /// Values delivered once notifications are enabled, hex encoded
    #[serde(default)]
    pub notifications: Vec<String>,
}

fn decode_hex(field: &str, s: &str) -> Result<Vec<u8>, UnixError> {
    hex::decode(s.trim()).map_err(|e| UnixError::InvalidParameter(format!("{field}: {e}")))
}

impl SimHost {
    pub fn parse(text: &str) -> Result<Self, UnixError> {
        toml::from_str(text).map_err(|e| UnixError::InvalidParameter(format!("sim host: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self, UnixError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| UnixError::NotFound(format!("{}: {e}", path.display())))?;
        Self::parse(&text)
    }

    /// A single adapter with one heart-rate sensor, used when no description is given.
    pub fn demo() -> Self {
        let hrm = SimDeviceDesc {
            address: "C0:34:99:11:22:33".into(),
            name: Some("Heart Rate Sensor".into()),
            connected: true,
            paired: false,
            cached: true,
            passkey: None,
            service: vec![
                SimServiceDesc {
                    uuid: "1800".into(),
                    handle: 1,
                    primary: true,
                    characteristic: vec![SimCharacteristicDesc {
                        uuid: "2A00".into(),
                        handle: 2,
                        value_handle: None,
                        properties: vec!["read".into()],
                        value: hex::encode("Heart Rate Sensor"),
                        notifications: Vec::new(),
                    }],
                },
                SimServiceDesc {
                    uuid: "180D".into(),
                    handle: 9,
                    primary: true,
                    characteristic: vec![
                        SimCharacteristicDesc {
                            uuid: "2A37".into(),
                            handle: 0x10,
                            value_handle: None,
                            properties: vec!["notify".into()],
                            value: String::new(),
                            notifications: vec!["0648".into(), "064a".into(), "064c".into()],
                        },
                        SimCharacteristicDesc {
                            uuid: "2A38".into(),
                            handle: 0x12,
                            value_handle: None,
                            properties: vec!["read".into()],
                            value: "01".into(),
                            notifications: Vec::new(),
                        },
                        SimCharacteristicDesc {
                            uuid: "2A39".into(),
                            handle: 0x14,
                            value_handle: None,
                            properties: vec!["write".into()],
                            value: String::new(),
                            notifications: Vec::new(),
                        },
                    ],
                },
            ],
        };
        let beacon = SimDeviceDesc {
            address: "D4:F5:13:00:AB:CD".into(),
            name: None,
            connected: false,
            paired: false,
            cached: false,
            passkey: None,
            service: Vec::new(),
        };
        Self {
            adapter: vec![SimAdapterDesc {
                name: "hci0".into(),
                address: "00:1A:7D:DA:71:13".into(),
                alias: None,
                device: vec![hrm, beacon],
            }],
        }
    }

    /// Populate a fresh backend with this host. Call before `init` so the
    /// objects are reported as startup entries.
    pub fn build(&self, names: Arc<NameTable>) -> Result<SimBackend, UnixError> {
        let sim = SimBackend::new(names);
        for adapter in &self.adapter {
            let address: BluetoothAddress = adapter.address.parse()?;
            let radio = sim.add_adapter(&adapter.name, address);
            if let Some(alias) = &adapter.alias {
                sim.set_adapter_alias(&radio, alias)?;
            }
            for device in &adapter.device {
                let address: BluetoothAddress = device.address.parse()?;
                let handle = sim.add_device(&radio, address, device.name.as_deref())?;
                for service in &device.service {
                    let svc = sim.add_service(
                        &handle,
                        parse_gatt_uuid(&service.uuid)?,
                        service.handle,
                        service.primary,
                    )?;
                    for c in &service.characteristic {
                        let mut props = CharacteristicProperties::default();
                        for p in &c.properties {
                            props.set_by_name(p)?;
                        }
                        let info = CharacteristicInfo {
                            uuid: parse_gatt_uuid(&c.uuid)?,
                            handle: c.handle,
                            value_handle: c.value_handle.unwrap_or(c.handle.wrapping_add(1)),
                            props,
                        };
                        let chr = sim.add_characteristic(&svc, info, &decode_hex("value", &c.value)?)?;
                        let scripted = c
                            .notifications
                            .iter()
                            .map(|n| decode_hex("notifications", n))
                            .collect::<Result<Vec<_>, _>>()?;
                        if !scripted.is_empty() {
                            sim.script_notifications(&chr, scripted)?;
                        }
                    }
                }
                if device.cached {
                    sim.set_cached(&handle)?;
                }
                if device.connected {
                    sim.set_connected(&handle, true)?;
                }
                if device.paired {
                    sim.set_paired(&handle, true)?;
                }
                if let Some(passkey) = device.passkey {
                    sim.require_auth(&handle, AuthMethod::Passkey, passkey)?;
                }
            }
        }
        info!(
            "simulated host: {} adapter(s), {} device(s)",
            self.adapter.len(),
            self.adapter.iter().map(|a| a.device.len()).sum::<usize>()
        );
        Ok(sim)
    }
}
