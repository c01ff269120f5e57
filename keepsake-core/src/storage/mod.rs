/*!
Key/value storage backends for save records.

This module defines the storage abstraction (port) and its adapters. The
save store only ever talks to [`KeyValueStore`]; whether entries land in a
directory, in process memory, or in memory because the real store went away
is decided by which adapter is plugged in.
*/

pub mod fallback;
#[cfg(feature = "file")]
pub mod file;
pub mod memory;

pub use fallback::FallbackStore;
#[cfg(feature = "file")]
pub use file::FileStore;
pub use memory::MemoryStore;

use crate::{KeepsakeError, Result};

/// Suffix of the rolling backup entry kept beside each primary record
pub const BACKUP_SUFFIX: &str = "_backup";

/// Reserved prefix for transient self-test keys
pub const PROBE_PREFIX: &str = "__keepsake_probe__";

/// Joins namespace and slot in a key; namespaces may not contain it
pub const KEY_SEPARATOR: char = '_';

/// Native capacity figures reported by a backend that can measure itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaEstimate {
    pub quota: u64,
    pub usage: u64,
}

/// Storage abstraction for string entries addressed by key
///
/// A missing key is `Ok(None)`, not an error. Backends that cannot be reached
/// at all report [`KeepsakeError::StorageUnavailable`]; backends that are full
/// report [`KeepsakeError::QuotaExceeded`].
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`; removing an absent key succeeds
    fn remove(&self, key: &str) -> Result<()>;

    /// Every key currently stored, sorted
    fn keys(&self) -> Result<Vec<String>>;

    /// Capacity reported by the backend itself, when it has such an API
    fn quota_estimate(&self) -> Option<QuotaEstimate> {
        None
    }

    fn backend_name(&self) -> &str;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Box<T> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key)
    }

    fn keys(&self) -> Result<Vec<String>> {
        (**self).keys()
    }

    fn quota_estimate(&self) -> Option<QuotaEstimate> {
        (**self).quota_estimate()
    }

    fn backend_name(&self) -> &str {
        (**self).backend_name()
    }
}

/// Naming convention for entries: `<namespace>_<slot>` and `<namespace>_<slot>_backup`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    namespace: String,
}

impl KeyLayout {
    /// A layout for `namespace`, rejected if it could be confused with another
    /// namespace sharing the same store
    pub fn new<S: Into<String>>(namespace: S) -> Result<Self> {
        let namespace = namespace.into();
        Self::check_namespace(&namespace)?;
        Ok(Self { namespace })
    }

    /// A namespace must be non-empty and free of the key separator, otherwise
    /// `game` would claim the entries of `game_x`
    pub fn check_namespace(namespace: &str) -> Result<()> {
        if namespace.is_empty() {
            return Err(KeepsakeError::validation("Storage namespace cannot be empty"));
        }
        if namespace.contains(KEY_SEPARATOR) {
            return Err(KeepsakeError::validation(format!(
                "Storage namespace '{namespace}' cannot contain '{KEY_SEPARATOR}'"
            )));
        }
        Ok(())
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn primary(&self, slot: &str) -> String {
        format!("{}{KEY_SEPARATOR}{}", self.namespace, slot)
    }

    pub fn backup(&self, slot: &str) -> String {
        format!("{}{KEY_SEPARATOR}{}{}", self.namespace, slot, BACKUP_SUFFIX)
    }

    /// Whether `key` is a backup entry in this namespace
    pub fn is_backup(&self, key: &str) -> bool {
        self.strip_namespace(key)
            .is_some_and(|rest| rest.len() > BACKUP_SUFFIX.len() && rest.ends_with(BACKUP_SUFFIX))
    }

    /// Slot name of a primary entry in this namespace
    pub fn slot_of(&self, key: &str) -> Option<String> {
        let rest = self.strip_namespace(key)?;
        (!rest.is_empty() && !rest.ends_with(BACKUP_SUFFIX)).then(|| rest.to_string())
    }

    /// Reject slot names that would collide with the key convention
    pub fn check_slot(&self, slot: &str) -> Result<()> {
        if slot.is_empty() {
            return Err(KeepsakeError::validation("slot name cannot be empty"));
        }
        if slot.ends_with(BACKUP_SUFFIX) {
            return Err(KeepsakeError::validation(format!(
                "slot name '{slot}' cannot end with '{BACKUP_SUFFIX}'"
            )));
        }
        if slot.starts_with(PROBE_PREFIX) {
            return Err(KeepsakeError::validation(format!(
                "slot name '{slot}' uses the reserved probe prefix"
            )));
        }
        Ok(())
    }

    /// A fresh key for a self-test probe
    pub fn probe_key() -> String {
        format!("{PROBE_PREFIX}{}", uuid::Uuid::new_v4().simple())
    }

    fn strip_namespace<'k>(&self, key: &'k str) -> Option<&'k str> {
        key.strip_prefix(self.namespace.as_str())?.strip_prefix(KEY_SEPARATOR)
    }
}

impl Default for KeyLayout {
    fn default() -> Self {
        Self {
            namespace: crate::config::DEFAULT_NAMESPACE.to_string(),
        }
    }
}

/// Sum of key and value sizes in UTF-8 bytes
pub fn entry_size(key: &str, value: &str) -> u64 {
    (key.len() + value.len()) as u64
}
