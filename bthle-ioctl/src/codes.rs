//! IOCTL control codes (device type `FILE_DEVICE_BLUETOOTH`)

pub const FILE_DEVICE_BLUETOOTH: u32 = 0x0041;
pub const METHOD_BUFFERED: u32 = 0;
pub const FILE_ANY_ACCESS: u32 = 0;

/// `CTL_CODE(device, function, method, access)`
pub const fn ctl_code(device: u32, function: u32, method: u32, access: u32) -> u32 {
    (device << 16) | (access << 14) | (function << 2) | method
}

const fn bth(function: u32) -> u32 {
    ctl_code(FILE_DEVICE_BLUETOOTH, function, METHOD_BUFFERED, FILE_ANY_ACCESS)
}

/// Extract the function number of a control code
pub const fn function_of(code: u32) -> u32 {
    (code >> 2) & 0x0FFF
}

// Radio-scoped, standard bthioctl.h numbers
pub const IOCTL_BTH_GET_LOCAL_INFO: u32 = bth(0x00);
pub const IOCTL_BTH_GET_DEVICE_INFO: u32 = bth(0x02);
pub const IOCTL_BTH_DISCONNECT_DEVICE: u32 = bth(0x03);

// Radio-scoped, private to the bus
pub const IOCTL_BTHLE_RADIO_START_DISCOVERY: u32 = bth(0x800);
pub const IOCTL_BTHLE_RADIO_STOP_DISCOVERY: u32 = bth(0x801);
pub const IOCTL_BTHLE_RADIO_SET_FLAG: u32 = bth(0x802);
pub const IOCTL_BTHLE_RADIO_SEND_AUTH_RESPONSE: u32 = bth(0x803);
pub const IOCTL_BTHLE_RADIO_START_AUTH: u32 = bth(0x804);
pub const IOCTL_BTHLE_RADIO_REMOVE_DEVICE: u32 = bth(0x805);
pub const IOCTL_BTHLE_RADIO_GET_LE_DEVICE_GATT_SERVICES: u32 = bth(0x810);
pub const IOCTL_BTHLE_RADIO_GET_LE_DEVICE_GATT_CHARACTERISTICS: u32 = bth(0x811);
pub const IOCTL_BTHLE_RADIO_READ_CHARACTERISTIC: u32 = bth(0x812);
pub const IOCTL_BTHLE_RADIO_WRITE_CHARACTERISTIC: u32 = bth(0x813);
pub const IOCTL_BTHLE_RADIO_SET_NOTIFY: u32 = bth(0x814);
pub const IOCTL_BTHLE_RADIO_READ_NOTIFICATION: u32 = bth(0x815);
pub const IOCTL_BTHLE_RADIO_GET_DEVICE_CONNECTION_STATUS: u32 = bth(0x816);

// Device-scoped (BLE device PDO)
pub const IOCTL_BTHLE_GET_GATT_SERVICES: u32 = bth(0x820);
pub const IOCTL_BTHLE_GET_GATT_CHARACTERISTICS: u32 = bth(0x821);
pub const IOCTL_BTHLE_READ_CHARACTERISTIC: u32 = bth(0x822);
pub const IOCTL_BTHLE_WRITE_CHARACTERISTIC: u32 = bth(0x823);
pub const IOCTL_BTHLE_SET_NOTIFY: u32 = bth(0x824);
pub const IOCTL_BTHLE_READ_NOTIFICATION: u32 = bth(0x825);
pub const IOCTL_BTHLE_GET_CONNECTION_STATUS: u32 = bth(0x826);

/// GATT operations available both on the radio (address-routed) and on the
/// BLE device PDO
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GattOp {
    GetServices,
    GetCharacteristics,
    Read,
    Write,
    SetNotify,
    ReadNotification,
    ConnectionStatus,
}

impl GattOp {
    pub const ALL: [GattOp; 7] = [
        GattOp::GetServices,
        GattOp::GetCharacteristics,
        GattOp::Read,
        GattOp::Write,
        GattOp::SetNotify,
        GattOp::ReadNotification,
        GattOp::ConnectionStatus,
    ];

    pub const fn device_code(self) -> u32 {
        match self {
            Self::GetServices => IOCTL_BTHLE_GET_GATT_SERVICES,
            Self::GetCharacteristics => IOCTL_BTHLE_GET_GATT_CHARACTERISTICS,
            Self::Read => IOCTL_BTHLE_READ_CHARACTERISTIC,
            Self::Write => IOCTL_BTHLE_WRITE_CHARACTERISTIC,
            Self::SetNotify => IOCTL_BTHLE_SET_NOTIFY,
            Self::ReadNotification => IOCTL_BTHLE_READ_NOTIFICATION,
            Self::ConnectionStatus => IOCTL_BTHLE_GET_CONNECTION_STATUS,
        }
    }

    pub const fn radio_code(self) -> u32 {
        match self {
            Self::GetServices => IOCTL_BTHLE_RADIO_GET_LE_DEVICE_GATT_SERVICES,
            Self::GetCharacteristics => IOCTL_BTHLE_RADIO_GET_LE_DEVICE_GATT_CHARACTERISTICS,
            Self::Read => IOCTL_BTHLE_RADIO_READ_CHARACTERISTIC,
            Self::Write => IOCTL_BTHLE_RADIO_WRITE_CHARACTERISTIC,
            Self::SetNotify => IOCTL_BTHLE_RADIO_SET_NOTIFY,
            Self::ReadNotification => IOCTL_BTHLE_RADIO_READ_NOTIFICATION,
            Self::ConnectionStatus => IOCTL_BTHLE_RADIO_GET_DEVICE_CONNECTION_STATUS,
        }
    }

    pub fn from_device_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.device_code() == code)
    }

    pub fn from_radio_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.radio_code() == code)
    }
}

/// Symbolic name of a control code, for log lines
pub fn ioctl_name(code: u32) -> &'static str {
    match code {
        IOCTL_BTH_GET_LOCAL_INFO => "IOCTL_BTH_GET_LOCAL_INFO",
        IOCTL_BTH_GET_DEVICE_INFO => "IOCTL_BTH_GET_DEVICE_INFO",
        IOCTL_BTH_DISCONNECT_DEVICE => "IOCTL_BTH_DISCONNECT_DEVICE",
        IOCTL_BTHLE_RADIO_START_DISCOVERY => "IOCTL_BTHLE_RADIO_START_DISCOVERY",
        IOCTL_BTHLE_RADIO_STOP_DISCOVERY => "IOCTL_BTHLE_RADIO_STOP_DISCOVERY",
        IOCTL_BTHLE_RADIO_SET_FLAG => "IOCTL_BTHLE_RADIO_SET_FLAG",
        IOCTL_BTHLE_RADIO_SEND_AUTH_RESPONSE => "IOCTL_BTHLE_RADIO_SEND_AUTH_RESPONSE",
        IOCTL_BTHLE_RADIO_START_AUTH => "IOCTL_BTHLE_RADIO_START_AUTH",
        IOCTL_BTHLE_RADIO_REMOVE_DEVICE => "IOCTL_BTHLE_RADIO_REMOVE_DEVICE",
        IOCTL_BTHLE_RADIO_GET_LE_DEVICE_GATT_SERVICES => {
            "IOCTL_BTHLE_RADIO_GET_LE_DEVICE_GATT_SERVICES"
        }
        IOCTL_BTHLE_RADIO_GET_LE_DEVICE_GATT_CHARACTERISTICS => {
            "IOCTL_BTHLE_RADIO_GET_LE_DEVICE_GATT_CHARACTERISTICS"
        }
        IOCTL_BTHLE_RADIO_READ_CHARACTERISTIC => "IOCTL_BTHLE_RADIO_READ_CHARACTERISTIC",
        IOCTL_BTHLE_RADIO_WRITE_CHARACTERISTIC => "IOCTL_BTHLE_RADIO_WRITE_CHARACTERISTIC",
        IOCTL_BTHLE_RADIO_SET_NOTIFY => "IOCTL_BTHLE_RADIO_SET_NOTIFY",
        IOCTL_BTHLE_RADIO_READ_NOTIFICATION => "IOCTL_BTHLE_RADIO_READ_NOTIFICATION",
        IOCTL_BTHLE_RADIO_GET_DEVICE_CONNECTION_STATUS => {
            "IOCTL_BTHLE_RADIO_GET_DEVICE_CONNECTION_STATUS"
        }
        IOCTL_BTHLE_GET_GATT_SERVICES => "IOCTL_BTHLE_GET_GATT_SERVICES",
        IOCTL_BTHLE_GET_GATT_CHARACTERISTICS => "IOCTL_BTHLE_GET_GATT_CHARACTERISTICS",
        IOCTL_BTHLE_READ_CHARACTERISTIC => "IOCTL_BTHLE_READ_CHARACTERISTIC",
        IOCTL_BTHLE_WRITE_CHARACTERISTIC => "IOCTL_BTHLE_WRITE_CHARACTERISTIC",
        IOCTL_BTHLE_SET_NOTIFY => "IOCTL_BTHLE_SET_NOTIFY",
        IOCTL_BTHLE_READ_NOTIFICATION => "IOCTL_BTHLE_READ_NOTIFICATION",
        IOCTL_BTHLE_GET_CONNECTION_STATUS => "IOCTL_BTHLE_GET_CONNECTION_STATUS",
        _ => "IOCTL_UNKNOWN",
    }
}
