/*!
Degrading wrapper that keeps the application alive when its durable store goes away.

On construction the wrapped store is probed with a write/read/remove cycle.
If the probe fails, or any later write reports
[`KeepsakeError::StorageUnavailable`], entries are kept in process memory
instead. Data written while degraded does not survive a restart.
*/

use super::{KeyLayout, KeyValueStore, MemoryStore, QuotaEstimate};
use crate::{KeepsakeError, Result};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

const PROBE_VALUE: &str = "1";

pub struct FallbackStore<S> {
    primary: S,
    memory: MemoryStore,
    degraded: AtomicBool,
}

impl<S: KeyValueStore> FallbackStore<S> {
    /// Wrap `primary`, probing it once
    pub fn new(primary: S) -> Self {
        let degraded = match self_test(&primary) {
            Ok(()) => false,
            Err(e) => {
                warn!(
                    backend = primary.backend_name(),
                    error = %e,
                    "storage self-test failed; using in-memory fallback"
                );
                true
            }
        };
        Self {
            primary,
            memory: MemoryStore::new(),
            degraded: AtomicBool::new(degraded),
        }
    }

    /// Whether entries are currently being kept in memory only
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    pub fn primary(&self) -> &S {
        &self.primary
    }

    fn degrade(&self, reason: &KeepsakeError) {
        if !self.degraded.swap(true, Ordering::Relaxed) {
            warn!(
                backend = self.primary.backend_name(),
                error = %reason,
                "storage became unavailable; switching to in-memory fallback"
            );
        }
    }
}

/// Write, read back and remove a uniquely named probe key.
/// The probe key is removed even when the read-back fails.
fn self_test<S: KeyValueStore>(store: &S) -> Result<()> {
    let key = KeyLayout::probe_key();
    let outcome = store.set(&key, PROBE_VALUE).and_then(|()| store.get(&key));
    let cleanup = store.remove(&key);

    match outcome? {
        Some(value) if value == PROBE_VALUE => {}
        _ => return Err(KeepsakeError::unavailable("probe value did not read back")),
    }
    cleanup?;
    info!(backend = store.backend_name(), "storage self-test passed");
    Ok(())
}

impl<S: KeyValueStore> KeyValueStore for FallbackStore<S> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some(value) = self.memory.get(key)? {
            return Ok(Some(value));
        }
        if self.is_degraded() {
            return match self.primary.get(key) {
                Err(KeepsakeError::StorageUnavailable(_)) => Ok(None),
                other => other,
            };
        }
        self.primary.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        if self.is_degraded() {
            return self.memory.set(key, value);
        }
        match self.primary.set(key, value) {
            Err(e @ KeepsakeError::StorageUnavailable(_)) => {
                self.degrade(&e);
                self.memory.set(key, value)
            }
            other => other,
        }
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.memory.remove(key)?;
        match self.primary.remove(key) {
            Err(KeepsakeError::StorageUnavailable(_)) if self.is_degraded() => Ok(()),
            other => other,
        }
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys: BTreeSet<String> = self.memory.keys()?.into_iter().collect();
        match self.primary.keys() {
            Ok(primary) => keys.extend(primary),
            Err(KeepsakeError::StorageUnavailable(_)) if self.is_degraded() => {}
            Err(e) => return Err(e),
        }
        Ok(keys.into_iter().collect())
    }

    fn quota_estimate(&self) -> Option<QuotaEstimate> {
        if self.is_degraded() {
            None
        } else {
            self.primary.quota_estimate()
        }
    }

    fn backend_name(&self) -> &str {
        if self.is_degraded() {
            self.memory.backend_name()
        } else {
            self.primary.backend_name()
        }
    }
}

impl<S> std::fmt::Debug for FallbackStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackStore")
            .field("degraded", &self.degraded.load(Ordering::Relaxed))
            .field("memory_entries", &self.memory.len())
            .finish()
    }
}
