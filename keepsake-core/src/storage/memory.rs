/*!
In-process storage adapter.

Backs tests, serves as the degraded-mode fallback inside [`FallbackStore`](super::FallbackStore),
and can be given a byte capacity to behave like a size-limited browser store.
*/

use super::{entry_size, KeyValueStore, QuotaEstimate};
use crate::{KeepsakeError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Memory-based storage adapter
///
/// Clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, String>>>,
    capacity: Option<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that rejects writes once key+value bytes would exceed `capacity`
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            entries: Arc::default(),
            capacity: Some(capacity),
        }
    }

    pub fn usage_bytes(&self) -> u64 {
        self.entries
            .read()
            .iter()
            .map(|(key, value)| entry_size(key, value))
            .sum()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write();
        if let Some(capacity) = self.capacity {
            let current: u64 = entries.iter().map(|(k, v)| entry_size(k, v)).sum();
            let replaced = entries.get(key).map_or(0, |old| entry_size(key, old));
            let required = entry_size(key, value);
            let after = current - replaced + required;
            if after > capacity {
                return Err(KeepsakeError::QuotaExceeded {
                    required,
                    remaining: capacity.saturating_sub(current - replaced),
                });
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    fn quota_estimate(&self) -> Option<QuotaEstimate> {
        self.capacity.map(|quota| QuotaEstimate {
            quota,
            usage: self.usage_bytes(),
        })
    }

    fn backend_name(&self) -> &str {
        "memory"
    }
}
