/*!
Capacity gating for writes to a size-limited store.

[`QuotaGuard`] estimates how full the store is and, before each write, makes
room by evicting rolling backups that are past the retention window. It
never touches primary records: only keys matching the backup naming
convention of its namespace are eligible for eviction.
*/

use crate::config::QuotaConfig;
use crate::record::SaveRecord;
use crate::storage::{entry_size, KeyLayout, KeyValueStore};
use crate::{KeepsakeError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Point-in-time capacity estimate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageInfo {
    pub quota: u64,
    pub usage: u64,
    /// Usage as a percentage of quota, 0 to 100
    pub usage_percent: f64,
    pub remaining: u64,
    pub is_near_limit: bool,
    pub is_at_limit: bool,
}

impl StorageInfo {
    fn compute(quota: u64, usage: u64, config: &QuotaConfig) -> Self {
        let fraction = if quota == 0 {
            1.0
        } else {
            (usage as f64 / quota as f64).min(1.0)
        };
        Self {
            quota,
            usage,
            usage_percent: fraction * 100.0,
            remaining: quota.saturating_sub(usage),
            is_near_limit: fraction >= config.soft_limit,
            is_at_limit: fraction >= config.hard_limit,
        }
    }
}

/// Outcome of one eviction pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    pub evicted: Vec<String>,
    pub freed_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct QuotaGuard {
    config: QuotaConfig,
    layout: KeyLayout,
}

impl QuotaGuard {
    pub fn new(config: QuotaConfig, layout: KeyLayout) -> Self {
        Self { config, layout }
    }

    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    /// Prefer the backend's own estimate; otherwise sum key and value bytes
    /// against the configured fallback quota.
    pub fn get_storage_info<S: KeyValueStore + ?Sized>(&self, store: &S) -> Result<StorageInfo> {
        if let Some(estimate) = store.quota_estimate() {
            return Ok(StorageInfo::compute(estimate.quota, estimate.usage, &self.config));
        }

        let mut usage = 0;
        for key in store.keys()? {
            if let Some(value) = store.get(&key)? {
                usage += entry_size(&key, &value);
            }
        }
        Ok(StorageInfo::compute(self.config.quota_bytes, usage, &self.config))
    }

    /// Make sure `required` more bytes can be written
    ///
    /// Stale backups are evicted first when usage is past the soft limit or
    /// when there is less free space than the configured headroom. The write
    /// is refused with [`KeepsakeError::QuotaExceeded`] if the store is still
    /// at its hard limit or cannot fit `required` afterwards.
    pub fn ensure_room<S: KeyValueStore + ?Sized>(
        &self,
        store: &S,
        required: u64,
    ) -> Result<StorageInfo> {
        self.ensure_room_at(store, required, Utc::now())
    }

    pub fn ensure_room_at<S: KeyValueStore + ?Sized>(
        &self,
        store: &S,
        required: u64,
        now: DateTime<Utc>,
    ) -> Result<StorageInfo> {
        let mut info = self.get_storage_info(store)?;
        let headroom = (required as f64 * self.config.headroom_factor).ceil() as u64;

        if info.is_near_limit || info.remaining < headroom {
            debug!(
                usage_percent = info.usage_percent,
                remaining = info.remaining,
                required,
                "storage nearly full; evicting stale backups"
            );
            let report = self.evict_stale_backups_at(store, now)?;
            if !report.evicted.is_empty() {
                info = self.get_storage_info(store)?;
            }
        }

        if info.is_at_limit || info.remaining < required {
            warn!(
                usage_percent = info.usage_percent,
                remaining = info.remaining,
                required,
                "write refused: storage quota exceeded"
            );
            return Err(KeepsakeError::QuotaExceeded {
                required,
                remaining: info.remaining,
            });
        }
        Ok(info)
    }

    /// Delete backups older than the retention window
    pub fn evict_stale_backups<S: KeyValueStore + ?Sized>(&self, store: &S) -> Result<EvictionReport> {
        self.evict_stale_backups_at(store, Utc::now())
    }

    /// Delete backups older than the retention window as seen at `now`.
    /// Backups that cannot be parsed at all are evicted too since they can
    /// never be restored.
    pub fn evict_stale_backups_at<S: KeyValueStore + ?Sized>(
        &self,
        store: &S,
        now: DateTime<Utc>,
    ) -> Result<EvictionReport> {
        let retention = Duration::days(i64::from(self.config.backup_retention_days));
        let mut report = EvictionReport::default();

        for key in store.keys()? {
            if !self.layout.is_backup(&key) {
                continue;
            }
            let Some(value) = store.get(&key)? else {
                continue;
            };
            let stale = match SaveRecord::from_json(&value) {
                Ok(record) => record.age_millis(now) > retention.num_milliseconds(),
                Err(_) => true,
            };
            if stale {
                store.remove(&key)?;
                report.freed_bytes += entry_size(&key, &value);
                report.evicted.push(key);
            }
        }

        if !report.evicted.is_empty() {
            info!(
                count = report.evicted.len(),
                freed_bytes = report.freed_bytes,
                "evicted stale backups"
            );
        }
        Ok(report)
    }
}

impl Default for QuotaGuard {
    fn default() -> Self {
        Self::new(QuotaConfig::default(), KeyLayout::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn guard(quota_bytes: u64) -> QuotaGuard {
        QuotaGuard::new(
            QuotaConfig {
                quota_bytes,
                ..QuotaConfig::default()
            },
            KeyLayout::new("game").unwrap(),
        )
    }

    fn record_at(now: DateTime<Utc>, days_ago: i64, filler: usize) -> String {
        let timestamp = (now - Duration::days(days_ago)).timestamp_millis();
        SaveRecord::with_timestamp("1.0.0", "x".repeat(filler), false, timestamp)
            .to_json()
            .unwrap()
    }

    #[test]
    fn test_storage_info_from_entry_sizes() {
        let store = MemoryStore::new();
        store.set("game_a", "0123456789").unwrap();

        let info = guard(100).get_storage_info(&store).unwrap();
        assert_eq!(info.quota, 100);
        assert_eq!(info.usage, 16);
        assert_eq!(info.remaining, 84);
        assert!((info.usage_percent - 16.0).abs() < 1e-9);
        assert!(!info.is_near_limit);
        assert!(!info.is_at_limit);
    }

    #[test]
    fn test_storage_info_prefers_native_estimate() {
        let store = MemoryStore::with_capacity(50);
        store.set("k", "x".repeat(39).as_str()).unwrap();

        let info = guard(1_000_000).get_storage_info(&store).unwrap();
        assert_eq!(info.quota, 50);
        assert_eq!(info.usage, 40);
        assert!(info.is_near_limit);
        assert!(!info.is_at_limit);
    }

    #[test]
    fn test_eviction_only_removes_stale_backups() {
        let now = Utc::now();
        let store = MemoryStore::new();
        store.set("game_a", &record_at(now, 90, 10)).unwrap();
        store.set("game_a_backup", &record_at(now, 45, 10)).unwrap();
        store.set("game_b_backup", &record_at(now, 2, 10)).unwrap();
        store.set("other_c_backup", &record_at(now, 90, 10)).unwrap();
        store.set("game_d_backup", "not a record").unwrap();

        let report = guard(1_000).evict_stale_backups_at(&store, now).unwrap();
        assert_eq!(
            report.evicted,
            vec!["game_a_backup".to_string(), "game_d_backup".to_string()]
        );
        assert!(report.freed_bytes > 0);
        assert!(store.get("game_a").unwrap().is_some());
        assert!(store.get("game_b_backup").unwrap().is_some());
        assert!(store.get("other_c_backup").unwrap().is_some());
    }

    #[test]
    fn test_ensure_room_evicts_near_soft_limit() {
        let now = Utc::now();
        let store = MemoryStore::new();
        let backup = record_at(now, 60, 700);
        store.set("game_a_backup", &backup).unwrap();
        let quota = (entry_size("game_a_backup", &backup) as f64 / 0.85) as u64;

        let info = guard(quota).ensure_room_at(&store, 10, now).unwrap();
        assert!(store.get("game_a_backup").unwrap().is_none());
        assert_eq!(info.usage, 0);
    }

    #[test]
    fn test_ensure_room_refuses_when_nothing_to_evict() {
        let store = MemoryStore::new();
        store.set("game_a", &"x".repeat(96)).unwrap();

        let err = guard(100).ensure_room(&store, 1).unwrap_err();
        assert!(matches!(err, KeepsakeError::QuotaExceeded { required: 1, remaining: 0 }));
    }

    #[test]
    fn test_ensure_room_refuses_oversized_write() {
        let store = MemoryStore::new();
        let err = guard(100).ensure_room(&store, 150).unwrap_err();
        assert!(matches!(err, KeepsakeError::QuotaExceeded { required: 150, remaining: 100 }));
        assert!(guard(100).ensure_room(&store, 60).is_ok());
    }

    #[test]
    fn test_eviction_survives_extreme_timestamps() {
        let store = MemoryStore::new();
        let ancient = SaveRecord::with_timestamp("1.0.0", "{}".to_string(), false, i64::MIN);
        let future = SaveRecord::with_timestamp("1.0.0", "{}".to_string(), false, i64::MAX);
        store.set("game_main_backup", &ancient.to_json().unwrap()).unwrap();
        store.set("game_next_backup", &future.to_json().unwrap()).unwrap();

        let report = guard(1_000).evict_stale_backups(&store).unwrap();
        assert_eq!(report.evicted, vec!["game_main_backup".to_string()]);
        assert!(store.get("game_next_backup").unwrap().is_some());
    }

    #[test]
    fn test_eviction_ignores_other_namespaces() {
        let now = Utc::now();
        let store = MemoryStore::new();
        store.set("gamex_main_backup", &record_at(now, 90, 10)).unwrap();
        store.set("game2_main_backup", &record_at(now, 90, 10)).unwrap();
        store.set("game_main_backup", &record_at(now, 90, 10)).unwrap();

        let report = guard(1_000).evict_stale_backups_at(&store, now).unwrap();
        assert_eq!(report.evicted, vec!["game_main_backup".to_string()]);
        assert_eq!(store.len(), 2);
    }
}
