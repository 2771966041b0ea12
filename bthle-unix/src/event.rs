//! Events produced by `get_event`
//!
//! Events for a given handle arrive in the order the backend produced them;
//! ordering across handles is unspecified.

use uuid::Uuid;

use crate::error::UnixError;
use crate::name::{CharacteristicHandle, DeviceHandle, RadioHandle, ServiceHandle};
use crate::types::{
    AuthMethod, CharacteristicInfo, DeviceProperties, PairingToken, PropMask, RadioProperties,
};

#[derive(Debug, Clone)]
pub enum Event {
    /// A local adapter appeared. `props.present` is the presence mask.
    RadioAdded {
        radio: RadioHandle,
        props: RadioProperties,
    },
    RadioRemoved {
        radio: RadioHandle,
    },
    RadioPropsChanged {
        radio: RadioHandle,
        changed: PropMask,
        props: RadioProperties,
        invalidated: PropMask,
    },
    /// A remote device appeared. `init_entry` marks devices the backend
    /// already knew about when it was initialised.
    DeviceAdded {
        radio: RadioHandle,
        device: DeviceHandle,
        props: DeviceProperties,
        init_entry: bool,
    },
    DeviceRemoved {
        device: DeviceHandle,
    },
    DevicePropsChanged {
        device: DeviceHandle,
        changed: PropMask,
        props: DeviceProperties,
        invalidated: PropMask,
    },
    GattServiceAdded {
        device: DeviceHandle,
        service: ServiceHandle,
        uuid: Uuid,
        primary: bool,
        handle: u16,
    },
    GattServiceRemoved {
        service: ServiceHandle,
    },
    GattCharacteristicAdded {
        service: ServiceHandle,
        characteristic: CharacteristicHandle,
        info: CharacteristicInfo,
    },
    GattCharacteristicRemoved {
        characteristic: CharacteristicHandle,
    },
    PairingFinished {
        token: PairingToken,
        result: Result<(), UnixError>,
    },
    AuthRequest {
        device: DeviceHandle,
        method: AuthMethod,
        numeric_value: u32,
    },
}

impl Event {
    /// Short name for log lines
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RadioAdded { .. } => "RadioAdded",
            Self::RadioRemoved { .. } => "RadioRemoved",
            Self::RadioPropsChanged { .. } => "RadioPropsChanged",
            Self::DeviceAdded { .. } => "DeviceAdded",
            Self::DeviceRemoved { .. } => "DeviceRemoved",
            Self::DevicePropsChanged { .. } => "DevicePropsChanged",
            Self::GattServiceAdded { .. } => "GattServiceAdded",
            Self::GattServiceRemoved { .. } => "GattServiceRemoved",
            Self::GattCharacteristicAdded { .. } => "GattCharacteristicAdded",
            Self::GattCharacteristicRemoved { .. } => "GattCharacteristicRemoved",
            Self::PairingFinished { .. } => "PairingFinished",
            Self::AuthRequest { .. } => "AuthRequest",
        }
    }
}
