//! Refcounted runtime objects with several interface personalities
//!
//! A runtime class is one Rust struct. Every interface it implements is a
//! personality of that struct, so querying one interface from another
//! yields the same allocation and bumps the same counter.

use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Weak};

use crate::error::WinrtError;
use bthle_ioctl::HResult;

/// Interfaces the facade knows how to answer `QueryInterface` for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterfaceId {
    Unknown,
    Inspectable,
    AgileObject,
    Closable,
    AsyncInfo,
    AsyncOperation,
    VectorView,
    Iterable,
    Iterator,
    Buffer,
    BufferByteAccess,
    DataReader,
    BluetoothAdapter,
    BluetoothDevice,
    BluetoothLEDevice,
    BluetoothLEDevice2,
    BluetoothLEDevice3,
    GattDeviceService,
    GattDeviceService3,
    GattDeviceServicesResult,
    GattCharacteristic,
    GattCharacteristicsResult,
    GattReadResult,
    GattWriteResult,
    GattReadClientCharacteristicConfigurationDescriptorResult,
    GattValueChangedEventArgs,
    BluetoothLEAdvertisement,
    BluetoothLEAdvertisementFilter,
    BluetoothSignalStrengthFilter,
    BluetoothLEAdvertisementWatcher,
    BluetoothLEAdvertisementWatcher2,
    BluetoothLEAdvertisementReceivedEventArgs,
    BluetoothLEAdvertisementReceivedEventArgs2,
    BluetoothLEAdvertisementWatcherStoppedEventArgs,
}

impl InterfaceId {
    /// Interfaces every object answers for
    const UNIVERSAL: [InterfaceId; 3] = [Self::Unknown, Self::Inspectable, Self::AgileObject];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Unknown => "IUnknown",
            Self::Inspectable => "IInspectable",
            Self::AgileObject => "IAgileObject",
            Self::Closable => "Windows.Foundation.IClosable",
            Self::AsyncInfo => "Windows.Foundation.IAsyncInfo",
            Self::AsyncOperation => "Windows.Foundation.IAsyncOperation`1",
            Self::VectorView => "Windows.Foundation.Collections.IVectorView`1",
            Self::Iterable => "Windows.Foundation.Collections.IIterable`1",
            Self::Iterator => "Windows.Foundation.Collections.IIterator`1",
            Self::Buffer => "Windows.Storage.Streams.IBuffer",
            Self::BufferByteAccess => "IBufferByteAccess",
            Self::DataReader => "Windows.Storage.Streams.IDataReader",
            Self::BluetoothAdapter => "Windows.Devices.Bluetooth.IBluetoothAdapter",
            Self::BluetoothDevice => "Windows.Devices.Bluetooth.IBluetoothDevice",
            Self::BluetoothLEDevice => "Windows.Devices.Bluetooth.IBluetoothLEDevice",
            Self::BluetoothLEDevice2 => "Windows.Devices.Bluetooth.IBluetoothLEDevice2",
            Self::BluetoothLEDevice3 => "Windows.Devices.Bluetooth.IBluetoothLEDevice3",
            Self::GattDeviceService => {
                "Windows.Devices.Bluetooth.GenericAttributeProfile.IGattDeviceService"
            }
            Self::GattDeviceService3 => {
                "Windows.Devices.Bluetooth.GenericAttributeProfile.IGattDeviceService3"
            }
            Self::GattDeviceServicesResult => {
                "Windows.Devices.Bluetooth.GenericAttributeProfile.IGattDeviceServicesResult"
            }
            Self::GattCharacteristic => {
                "Windows.Devices.Bluetooth.GenericAttributeProfile.IGattCharacteristic"
            }
            Self::GattCharacteristicsResult => {
                "Windows.Devices.Bluetooth.GenericAttributeProfile.IGattCharacteristicsResult"
            }
            Self::GattReadResult => "Windows.Devices.Bluetooth.GenericAttributeProfile.IGattReadResult",
            Self::GattWriteResult => "Windows.Devices.Bluetooth.GenericAttributeProfile.IGattWriteResult",
            Self::GattReadClientCharacteristicConfigurationDescriptorResult => {
                "Windows.Devices.Bluetooth.GenericAttributeProfile.IGattReadClientCharacteristicConfigurationDescriptorResult"
            }
            Self::GattValueChangedEventArgs => {
                "Windows.Devices.Bluetooth.GenericAttributeProfile.IGattValueChangedEventArgs"
            }
            Self::BluetoothLEAdvertisement => {
                "Windows.Devices.Bluetooth.Advertisement.IBluetoothLEAdvertisement"
            }
            Self::BluetoothLEAdvertisementFilter => {
                "Windows.Devices.Bluetooth.Advertisement.IBluetoothLEAdvertisementFilter"
            }
            Self::BluetoothSignalStrengthFilter => "Windows.Devices.Bluetooth.IBluetoothSignalStrengthFilter",
            Self::BluetoothLEAdvertisementWatcher => {
                "Windows.Devices.Bluetooth.Advertisement.IBluetoothLEAdvertisementWatcher"
            }
            Self::BluetoothLEAdvertisementWatcher2 => {
                "Windows.Devices.Bluetooth.Advertisement.IBluetoothLEAdvertisementWatcher2"
            }
            Self::BluetoothLEAdvertisementReceivedEventArgs => {
                "Windows.Devices.Bluetooth.Advertisement.IBluetoothLEAdvertisementReceivedEventArgs"
            }
            Self::BluetoothLEAdvertisementReceivedEventArgs2 => {
                "Windows.Devices.Bluetooth.Advertisement.IBluetoothLEAdvertisementReceivedEventArgs2"
            }
            Self::BluetoothLEAdvertisementWatcherStoppedEventArgs => {
                "Windows.Devices.Bluetooth.Advertisement.IBluetoothLEAdvertisementWatcherStoppedEventArgs"
            }
        }
    }
}

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The `IInspectable` personality every runtime object carries.
pub trait Inspectable: Send + Sync + 'static {
    /// Fixed Windows type name, e.g.
    /// `Windows.Devices.Bluetooth.GenericAttributeProfile.GattCharacteristic`
    fn runtime_class_name(&self) -> &'static str;

    /// Class-specific interfaces, not counting the universal ones
    fn interfaces(&self) -> &'static [InterfaceId];

    /// `GetIids`
    fn iids(&self) -> Vec<InterfaceId> {
        InterfaceId::UNIVERSAL
            .iter()
            .chain(self.interfaces())
            .copied()
            .collect()
    }

    fn supports(&self, iid: InterfaceId) -> bool {
        InterfaceId::UNIVERSAL.contains(&iid) || self.interfaces().contains(&iid)
    }
}

/// Owning pointer to a runtime object. Cloning is `AddRef`, dropping is
/// `Release`.
pub struct ComPtr<T: ?Sized>(Arc<T>);

impl<T: Inspectable> ComPtr<T> {
    pub fn new(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Build an object that keeps a weak pointer to itself, for classes
    /// that pass themselves as the sender of their events.
    pub fn new_cyclic(build: impl FnOnce(&Weak<T>) -> T) -> Self {
        Self(Arc::new_cyclic(build))
    }

    /// Upcast to the bare inspectable personality
    pub fn as_inspectable(&self) -> ComPtr<dyn Inspectable> {
        ComPtr(self.0.clone() as Arc<dyn Inspectable>)
    }
}

impl<T: Inspectable + ?Sized> ComPtr<T> {
    /// `QueryInterface`: another reference to the same object when it
    /// implements `iid`, `E_NOINTERFACE` otherwise.
    pub fn query(&self, iid: InterfaceId) -> Result<Self, WinrtError> {
        if self.0.supports(iid) {
            Ok(self.clone())
        } else {
            Err(WinrtError::new(HResult::E_NOINTERFACE))
        }
    }
}

impl<T: ?Sized> ComPtr<T> {
    pub fn from_arc(inner: Arc<T>) -> Self {
        Self(inner)
    }

    /// Current reference count, shared by every personality
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Same underlying object
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn downgrade(&self) -> Weak<T> {
        Arc::downgrade(&self.0)
    }

    pub fn upgrade(weak: &Weak<T>) -> Option<Self> {
        weak.upgrade().map(Self)
    }
}

impl<T: ?Sized> Clone for ComPtr<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: ?Sized> Deref for ComPtr<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: ?Sized> PartialEq for ComPtr<T> {
    /// Identity, like comparing interface pointers
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<T: ?Sized> Eq for ComPtr<T> {}

impl<T: Inspectable + ?Sized> fmt::Debug for ComPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:p}", self.runtime_class_name(), Arc::as_ptr(&self.0))
    }
}
