//! Unix-call surface between the bus driver and the host BLE backend
//!
//! ```text
//! [bus driver]  ── UnixConnection::call(UnixParams) ──▶  [dyn Backend]
//!                                                        (BlueZ / CoreBluetooth / sim)
//! ```
//!
//! All commands block the calling thread. Every command except `init` fails
//! with [`UnixError::NotSupported`] while the backend is not initialised.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, trace};

use crate::error::UnixError;
use crate::event::Event;
use crate::name::{CharacteristicHandle, DeviceHandle, NameTable, RadioHandle, ServiceHandle};
use crate::types::{AuthMethod, PairingToken, RadioPropValue, WriteType};

/// The host BLE API, hidden behind one narrow interface.
pub trait Backend: Send + Sync {
    /// Start the backend and register the pairing-agent callback.
    fn init(&self) -> Result<(), UnixError>;

    /// Stop the backend; any blocked `get_event` returns `Shutdown`. Idempotent.
    fn shutdown(&self);

    fn adapter_set_prop(&self, radio: &RadioHandle, value: RadioPropValue)
        -> Result<(), UnixError>;

    /// Backend-specific unique adapter name (e.g. `hci0`)
    fn adapter_unique_name(&self, radio: &RadioHandle) -> Result<String, UnixError>;

    fn adapter_start_discovery(&self, radio: &RadioHandle) -> Result<(), UnixError>;

    fn adapter_stop_discovery(&self, radio: &RadioHandle) -> Result<(), UnixError>;

    fn adapter_remove_device(
        &self,
        radio: &RadioHandle,
        device: &DeviceHandle,
    ) -> Result<(), UnixError>;

    fn device_disconnect(&self, device: &DeviceHandle) -> Result<(), UnixError>;

    /// Begin pairing (which also connects and runs discovery). When `token`
    /// is given the outcome arrives as `PairingFinished`.
    fn device_start_pairing(
        &self,
        device: &DeviceHandle,
        token: Option<PairingToken>,
    ) -> Result<(), UnixError>;

    fn auth_agent_enable_incoming(&self) -> Result<(), UnixError>;

    /// Relay the user's answer; returns whether the peer is now authenticated.
    fn auth_send_response(
        &self,
        device: &DeviceHandle,
        method: AuthMethod,
        numeric_value_or_passkey: u32,
        negative: bool,
    ) -> Result<bool, UnixError>;

    fn characteristic_read(&self, characteristic: &CharacteristicHandle)
        -> Result<Vec<u8>, UnixError>;

    fn characteristic_write(
        &self,
        characteristic: &CharacteristicHandle,
        value: &[u8],
        write_type: WriteType,
    ) -> Result<(), UnixError>;

    fn characteristic_set_notify(
        &self,
        characteristic: &CharacteristicHandle,
        enable: bool,
    ) -> Result<(), UnixError>;

    /// Block until the next notification value, `timeout` elapses, or the
    /// read is cancelled.
    fn characteristic_read_notification(
        &self,
        characteristic: &CharacteristicHandle,
        timeout: Duration,
    ) -> Result<Vec<u8>, UnixError>;

    /// Wake every reader blocked in `characteristic_read_notification` on
    /// `characteristic` with `Cancelled`.
    fn cancel_read_notification(&self, characteristic: &CharacteristicHandle);

    /// Block until the next event or shutdown.
    fn get_event(&self) -> Result<Event, UnixError>;
}

/// Dispatcher function indices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum UnixFunc {
    Init = 0,
    Shutdown,
    AdapterSetProp,
    AdapterGetUniqueName,
    AdapterStartDiscovery,
    AdapterStopDiscovery,
    AdapterRemoveDevice,
    AdapterFree,
    AdapterDup,
    DeviceFree,
    DeviceDup,
    DeviceDisconnect,
    DeviceStartPairing,
    AuthAgentEnableIncoming,
    AuthSendResponse,
    GattServiceFree,
    GattCharacteristicFree,
    GattCharacteristicDup,
    GattCharacteristicRead,
    GattCharacteristicWrite,
    GattCharacteristicSetNotify,
    GattCharacteristicReadNotification,
    GetEvent,
}

impl UnixFunc {
    pub const COUNT: usize = 23;
}

/// Parameter block for one dispatcher call
#[derive(Debug)]
pub enum UnixParams {
    Init,
    Shutdown,
    AdapterSetProp {
        radio: RadioHandle,
        value: RadioPropValue,
    },
    AdapterGetUniqueName {
        radio: RadioHandle,
    },
    AdapterStartDiscovery {
        radio: RadioHandle,
    },
    AdapterStopDiscovery {
        radio: RadioHandle,
    },
    AdapterRemoveDevice {
        radio: RadioHandle,
        device: DeviceHandle,
    },
    AdapterFree {
        radio: RadioHandle,
    },
    AdapterDup {
        radio: RadioHandle,
    },
    DeviceFree {
        device: DeviceHandle,
    },
    DeviceDup {
        device: DeviceHandle,
    },
    DeviceDisconnect {
        device: DeviceHandle,
    },
    DeviceStartPairing {
        device: DeviceHandle,
        token: Option<PairingToken>,
    },
    AuthAgentEnableIncoming,
    AuthSendResponse {
        device: DeviceHandle,
        method: AuthMethod,
        numeric_value_or_passkey: u32,
        negative: bool,
    },
    GattServiceFree {
        service: ServiceHandle,
    },
    GattCharacteristicFree {
        characteristic: CharacteristicHandle,
    },
    GattCharacteristicDup {
        characteristic: CharacteristicHandle,
    },
    GattCharacteristicRead {
        characteristic: CharacteristicHandle,
    },
    GattCharacteristicWrite {
        characteristic: CharacteristicHandle,
        value: Vec<u8>,
        write_type: WriteType,
    },
    GattCharacteristicSetNotify {
        characteristic: CharacteristicHandle,
        enable: bool,
    },
    GattCharacteristicReadNotification {
        characteristic: CharacteristicHandle,
        timeout: Duration,
    },
    GetEvent,
}

impl UnixParams {
    pub fn func(&self) -> UnixFunc {
        match self {
            Self::Init => UnixFunc::Init,
            Self::Shutdown => UnixFunc::Shutdown,
            Self::AdapterSetProp { .. } => UnixFunc::AdapterSetProp,
            Self::AdapterGetUniqueName { .. } => UnixFunc::AdapterGetUniqueName,
            Self::AdapterStartDiscovery { .. } => UnixFunc::AdapterStartDiscovery,
            Self::AdapterStopDiscovery { .. } => UnixFunc::AdapterStopDiscovery,
            Self::AdapterRemoveDevice { .. } => UnixFunc::AdapterRemoveDevice,
            Self::AdapterFree { .. } => UnixFunc::AdapterFree,
            Self::AdapterDup { .. } => UnixFunc::AdapterDup,
            Self::DeviceFree { .. } => UnixFunc::DeviceFree,
            Self::DeviceDup { .. } => UnixFunc::DeviceDup,
            Self::DeviceDisconnect { .. } => UnixFunc::DeviceDisconnect,
            Self::DeviceStartPairing { .. } => UnixFunc::DeviceStartPairing,
            Self::AuthAgentEnableIncoming => UnixFunc::AuthAgentEnableIncoming,
            Self::AuthSendResponse { .. } => UnixFunc::AuthSendResponse,
            Self::GattServiceFree { .. } => UnixFunc::GattServiceFree,
            Self::GattCharacteristicFree { .. } => UnixFunc::GattCharacteristicFree,
            Self::GattCharacteristicDup { .. } => UnixFunc::GattCharacteristicDup,
            Self::GattCharacteristicRead { .. } => UnixFunc::GattCharacteristicRead,
            Self::GattCharacteristicWrite { .. } => UnixFunc::GattCharacteristicWrite,
            Self::GattCharacteristicSetNotify { .. } => UnixFunc::GattCharacteristicSetNotify,
            Self::GattCharacteristicReadNotification { .. } => {
                UnixFunc::GattCharacteristicReadNotification
            }
            Self::GetEvent => UnixFunc::GetEvent,
        }
    }
}

/// Result block of one dispatcher call
#[derive(Debug)]
pub enum UnixOutput {
    None,
    Name(String),
    Radio(RadioHandle),
    Device(DeviceHandle),
    Characteristic(CharacteristicHandle),
    Value(Vec<u8>),
    Authenticated(bool),
    Event(Event),
}

/// Opaque connection to an initialised backend
pub struct UnixConnection {
    backend: Arc<dyn Backend>,
    names: Arc<NameTable>,
    initialized: AtomicBool,
}

impl UnixConnection {
    /// Run `init` on the backend and return the connection.
    pub fn init(backend: Arc<dyn Backend>, names: Arc<NameTable>) -> Result<Arc<Self>, UnixError> {
        let conn = Arc::new(Self {
            backend,
            names,
            initialized: AtomicBool::new(false),
        });
        conn.call(UnixParams::Init)?;
        Ok(conn)
    }

    /// Connection that has not been initialised; every command but `init`
    /// fails with `NotSupported`.
    pub fn uninitialized(backend: Arc<dyn Backend>, names: Arc<NameTable>) -> Arc<Self> {
        Arc::new(Self {
            backend,
            names,
            initialized: AtomicBool::new(false),
        })
    }

    pub fn names(&self) -> &Arc<NameTable> {
        &self.names
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// The single dispatcher.
    pub fn call(&self, params: UnixParams) -> Result<UnixOutput, UnixError> {
        let func = params.func();
        if func != UnixFunc::Init && func != UnixFunc::Shutdown && !self.is_initialized() {
            debug!("unix call {:?} before init", func);
            return Err(UnixError::NotSupported);
        }
        if func != UnixFunc::GetEvent && func != UnixFunc::GattCharacteristicReadNotification {
            trace!("unix call {:?}", func);
        }

        let backend = &self.backend;
        match params {
            UnixParams::Init => {
                if !self.initialized.swap(true, Ordering::AcqRel) {
                    if let Err(e) = backend.init() {
                        self.initialized.store(false, Ordering::Release);
                        return Err(e);
                    }
                    info!("BLE backend initialised");
                }
                Ok(UnixOutput::None)
            }
            UnixParams::Shutdown => {
                if self.initialized.swap(false, Ordering::AcqRel) {
                    backend.shutdown();
                    info!("BLE backend shut down");
                }
                Ok(UnixOutput::None)
            }
            UnixParams::AdapterSetProp { radio, value } => {
                backend.adapter_set_prop(&radio, value)?;
                Ok(UnixOutput::None)
            }
            UnixParams::AdapterGetUniqueName { radio } => {
                backend.adapter_unique_name(&radio).map(UnixOutput::Name)
            }
            UnixParams::AdapterStartDiscovery { radio } => {
                backend.adapter_start_discovery(&radio)?;
                Ok(UnixOutput::None)
            }
            UnixParams::AdapterStopDiscovery { radio } => {
                backend.adapter_stop_discovery(&radio)?;
                Ok(UnixOutput::None)
            }
            UnixParams::AdapterRemoveDevice { radio, device } => {
                backend.adapter_remove_device(&radio, &device)?;
                Ok(UnixOutput::None)
            }
            UnixParams::AdapterDup { radio } => Ok(UnixOutput::Radio(radio.clone())),
            UnixParams::DeviceDup { device } => Ok(UnixOutput::Device(device.clone())),
            UnixParams::GattCharacteristicDup { characteristic } => {
                Ok(UnixOutput::Characteristic(characteristic.clone()))
            }
            // Dropping the handle releases its interned name
            UnixParams::AdapterFree { .. }
            | UnixParams::DeviceFree { .. }
            | UnixParams::GattServiceFree { .. }
            | UnixParams::GattCharacteristicFree { .. } => Ok(UnixOutput::None),
            UnixParams::DeviceDisconnect { device } => {
                backend.device_disconnect(&device)?;
                Ok(UnixOutput::None)
            }
            UnixParams::DeviceStartPairing { device, token } => {
                backend.device_start_pairing(&device, token)?;
                Ok(UnixOutput::None)
            }
            UnixParams::AuthAgentEnableIncoming => {
                backend.auth_agent_enable_incoming()?;
                Ok(UnixOutput::None)
            }
            UnixParams::AuthSendResponse {
                device,
                method,
                numeric_value_or_passkey,
                negative,
            } => backend
                .auth_send_response(&device, method, numeric_value_or_passkey, negative)
                .map(UnixOutput::Authenticated),
            UnixParams::GattCharacteristicRead { characteristic } => {
                backend.characteristic_read(&characteristic).map(UnixOutput::Value)
            }
            UnixParams::GattCharacteristicWrite {
                characteristic,
                value,
                write_type,
            } => {
                backend.characteristic_write(&characteristic, &value, write_type)?;
                Ok(UnixOutput::None)
            }
            UnixParams::GattCharacteristicSetNotify {
                characteristic,
                enable,
            } => {
                backend.characteristic_set_notify(&characteristic, enable)?;
                Ok(UnixOutput::None)
            }
            UnixParams::GattCharacteristicReadNotification {
                characteristic,
                timeout,
            } => backend
                .characteristic_read_notification(&characteristic, timeout)
                .map(UnixOutput::Value),
            UnixParams::GetEvent => backend.get_event().map(UnixOutput::Event),
        }
    }

    pub fn shutdown(&self) {
        // Shutdown never fails
        let _ = self.call(UnixParams::Shutdown);
    }

    pub fn radio_set_property(
        &self,
        radio: &RadioHandle,
        value: RadioPropValue,
    ) -> Result<(), UnixError> {
        self.call(UnixParams::AdapterSetProp {
            radio: radio.clone(),
            value,
        })
        .map(drop)
    }

    pub fn radio_unique_name(&self, radio: &RadioHandle) -> Result<String, UnixError> {
        match self.call(UnixParams::AdapterGetUniqueName {
            radio: radio.clone(),
        })? {
            UnixOutput::Name(name) => Ok(name),
            other => Err(unexpected(other)),
        }
    }

    pub fn radio_start_discovery(&self, radio: &RadioHandle) -> Result<(), UnixError> {
        self.call(UnixParams::AdapterStartDiscovery {
            radio: radio.clone(),
        })
        .map(drop)
    }

    pub fn radio_stop_discovery(&self, radio: &RadioHandle) -> Result<(), UnixError> {
        self.call(UnixParams::AdapterStopDiscovery {
            radio: radio.clone(),
        })
        .map(drop)
    }

    pub fn radio_remove_device(
        &self,
        radio: &RadioHandle,
        device: &DeviceHandle,
    ) -> Result<(), UnixError> {
        self.call(UnixParams::AdapterRemoveDevice {
            radio: radio.clone(),
            device: device.clone(),
        })
        .map(drop)
    }

    pub fn device_disconnect(&self, device: &DeviceHandle) -> Result<(), UnixError> {
        self.call(UnixParams::DeviceDisconnect {
            device: device.clone(),
        })
        .map(drop)
    }

    pub fn device_start_pairing(
        &self,
        device: &DeviceHandle,
        token: Option<PairingToken>,
    ) -> Result<(), UnixError> {
        self.call(UnixParams::DeviceStartPairing {
            device: device.clone(),
            token,
        })
        .map(drop)
    }

    pub fn auth_agent_enable_incoming(&self) -> Result<(), UnixError> {
        self.call(UnixParams::AuthAgentEnableIncoming).map(drop)
    }

    pub fn auth_send_response(
        &self,
        device: &DeviceHandle,
        method: AuthMethod,
        numeric_value_or_passkey: u32,
        negative: bool,
    ) -> Result<bool, UnixError> {
        match self.call(UnixParams::AuthSendResponse {
            device: device.clone(),
            method,
            numeric_value_or_passkey,
            negative,
        })? {
            UnixOutput::Authenticated(authenticated) => Ok(authenticated),
            other => Err(unexpected(other)),
        }
    }

    pub fn characteristic_read(
        &self,
        characteristic: &CharacteristicHandle,
    ) -> Result<Vec<u8>, UnixError> {
        match self.call(UnixParams::GattCharacteristicRead {
            characteristic: characteristic.clone(),
        })? {
            UnixOutput::Value(value) => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    pub fn characteristic_write(
        &self,
        characteristic: &CharacteristicHandle,
        value: &[u8],
        write_type: WriteType,
    ) -> Result<(), UnixError> {
        self.call(UnixParams::GattCharacteristicWrite {
            characteristic: characteristic.clone(),
            value: value.to_vec(),
            write_type,
        })
        .map(drop)
    }

    pub fn characteristic_set_notify(
        &self,
        characteristic: &CharacteristicHandle,
        enable: bool,
    ) -> Result<(), UnixError> {
        self.call(UnixParams::GattCharacteristicSetNotify {
            characteristic: characteristic.clone(),
            enable,
        })
        .map(drop)
    }

    pub fn characteristic_read_notification(
        &self,
        characteristic: &CharacteristicHandle,
        timeout: Duration,
    ) -> Result<Vec<u8>, UnixError> {
        match self.call(UnixParams::GattCharacteristicReadNotification {
            characteristic: characteristic.clone(),
            timeout,
        })? {
            UnixOutput::Value(value) => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    /// Not a dispatcher index: cancellation goes straight to the backend so
    /// it can interrupt a call already blocked in the dispatcher.
    pub fn cancel_read_notification(&self, characteristic: &CharacteristicHandle) {
        self.backend.cancel_read_notification(characteristic);
    }

    pub fn get_event(&self) -> Result<Event, UnixError> {
        match self.call(UnixParams::GetEvent)? {
            UnixOutput::Event(event) => Ok(event),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(output: UnixOutput) -> UnixError {
    UnixError::Failed(format!("unexpected unix call output {output:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimBackend;

    #[test]
    fn test_commands_fail_before_init() {
        let names = NameTable::new();
        let sim = Arc::new(SimBackend::new(Arc::clone(&names)));
        let radio = sim.add_adapter("hci0", "00:1A:7D:DA:71:13".parse().unwrap());
        let conn = UnixConnection::uninitialized(sim, names);
        assert_eq!(
            conn.radio_start_discovery(&radio),
            Err(UnixError::NotSupported)
        );
        conn.call(UnixParams::Init).unwrap();
        assert!(conn.radio_start_discovery(&radio).is_ok());
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let names = NameTable::new();
        let sim = Arc::new(SimBackend::new(Arc::clone(&names)));
        let conn = UnixConnection::init(sim, names).unwrap();
        conn.shutdown();
        conn.shutdown();
        assert!(!conn.is_initialized());
        assert_eq!(conn.get_event().unwrap_err(), UnixError::NotSupported);
    }

    #[test]
    fn test_dup_returns_equal_handle() {
        let names = NameTable::new();
        let sim = Arc::new(SimBackend::new(Arc::clone(&names)));
        let radio = sim.add_adapter("hci0", "00:1A:7D:DA:71:13".parse().unwrap());
        let conn = UnixConnection::init(sim, Arc::clone(&names)).unwrap();
        match conn.call(UnixParams::AdapterDup { radio: radio.clone() }).unwrap() {
            UnixOutput::Radio(dup) => assert_eq!(dup, radio),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_func_indices_are_dense() {
        assert_eq!(UnixFunc::GetEvent as usize + 1, UnixFunc::COUNT);
    }
}
