//! Stable-name interning for backend object paths
//!
//! Backend objects are identified by their object path (e.g. a BlueZ D-Bus
//! path). Paths are canonicalised once and kept in a refcounted table so that
//! every handle to the same object shares one allocation and handle equality
//! is a pointer compare.
//!
//! `Clone` on a [`UnixName`] is the `dup` operation and `Drop` is `free`; both
//! adjust the shared count under the table mutex.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

struct Entry {
    name: Arc<str>,
    refs: usize,
}

/// Refcounted intern table keyed by canonical path
#[derive(Default)]
pub struct NameTable {
    entries: Mutex<HashMap<String, Entry>>,
}

impl NameTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Canonical form of a backend path: slashes become underscores.
    pub fn canonicalize(path: &str) -> String {
        path.replace('/', "_")
    }

    /// Intern `path`, taking one reference on the entry.
    pub fn intern(self: &Arc<Self>, path: &str) -> UnixName {
        let key = Self::canonicalize(path);
        let mut entries = self.entries.lock();
        let entry = entries.entry(key).or_insert_with_key(|k| Entry {
            name: Arc::from(k.as_str()),
            refs: 0,
        });
        entry.refs += 1;
        trace!("intern {} (refs={})", entry.name, entry.refs);
        UnixName {
            name: Arc::clone(&entry.name),
            table: Arc::clone(self),
        }
    }

    /// Number of live interned names
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current reference count of a canonical name, if interned
    pub fn refcount(&self, canonical: &str) -> Option<usize> {
        self.entries.lock().get(canonical).map(|e| e.refs)
    }

    fn dup(&self, name: &Arc<str>) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&**name) {
            entry.refs += 1;
        }
    }

    fn free(&self, name: &Arc<str>) {
        let mut entries = self.entries.lock();
        let remove = match entries.get_mut(&**name) {
            Some(entry) => {
                entry.refs -= 1;
                entry.refs == 0
            }
            None => false,
        };
        if remove {
            trace!("release {}", name);
            entries.remove(&**name);
        }
    }
}

/// An interned backend object name
pub struct UnixName {
    name: Arc<str>,
    table: Arc<NameTable>,
}

impl UnixName {
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Opaque 64-bit identity (stable for the lifetime of the entry)
    pub fn as_raw(&self) -> u64 {
        Arc::as_ptr(&self.name) as *const u8 as usize as u64
    }
}

impl Clone for UnixName {
    fn clone(&self) -> Self {
        self.table.dup(&self.name);
        Self {
            name: Arc::clone(&self.name),
            table: Arc::clone(&self.table),
        }
    }
}

impl Drop for UnixName {
    fn drop(&mut self) {
        self.table.free(&self.name);
    }
}

impl PartialEq for UnixName {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.name, &other.name)
    }
}

impl Eq for UnixName {}

impl Hash for UnixName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_raw().hash(state);
    }
}

impl fmt::Debug for UnixName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnixName({})", self.name)
    }
}

impl fmt::Display for UnixName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

macro_rules! unix_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, Debug)]
        pub struct $name(UnixName);

        impl $name {
            pub fn new(name: UnixName) -> Self {
                Self(name)
            }

            pub fn name(&self) -> &UnixName {
                &self.0
            }

            pub fn as_raw(&self) -> u64 {
                self.0.as_raw()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

unix_handle!(
    /// Backend handle of a local adapter
    RadioHandle
);
unix_handle!(
    /// Backend handle of a remote device
    DeviceHandle
);
unix_handle!(
    /// Backend handle of a GATT service
    ServiceHandle
);
unix_handle!(
    /// Backend handle of a GATT characteristic
    CharacteristicHandle
);
