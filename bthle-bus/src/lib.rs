//! BLE bus: object graph, event pump and IOCTL dispatch
//!
//! The pump thread applies backend events to a radio → device → service →
//! characteristic graph; callers open published device interfaces and talk
//! to the graph through IOCTLs, exactly as a Windows client would talk to
//! the Bluetooth bus driver.

mod apply;
pub mod bus;
pub mod clock;
pub mod config;
mod dispatch;
pub mod error;
pub mod graph;
pub mod irp;
pub mod notify;
pub mod pnp;
pub mod property_store;

pub use bus::{AuthCallback, AuthRegistration, AuthRequestInfo, Bus, FileHandle};
pub use clock::notification_clock;
pub use config::BusConfig;
pub use error::BusError;
pub use graph::Lifecycle;
pub use notify::{NotificationPump, NotificationValue, PumpKey};
pub use pnp::{InterfaceClass, InterfaceEvent, PdoId};
pub use property_store::{PropertyKey, PropertyValue};
