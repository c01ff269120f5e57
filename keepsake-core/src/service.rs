/*!
The persistence service: one object owning the save store and the live state.

An application constructs a single [`PersistenceService`] at startup and
passes it to whatever needs to save, load or undo. Nothing in the core looks
up a global instance.
*/

use crate::config::{KeepsakeConfig, StorageBackend};
use crate::ledger::{Snapshot, SnapshotLedger};
use crate::quota::StorageInfo;
use crate::save_store::{
    LoadOptions, LoadOutcome, RecoveryAction, SaveOptions, SaveStore, SlotDiagnosis,
};
use crate::schema::Schema;
use crate::storage::{FallbackStore, KeyValueStore, MemoryStore};
use crate::Result;
use serde_json::Value;
use tracing::info;

/// Save store plus snapshot ledger behind the public persistence surface
pub struct PersistenceService<S: KeyValueStore> {
    store: SaveStore<S>,
    ledger: SnapshotLedger,
}

impl<S: KeyValueStore> PersistenceService<S> {
    /// Build a service whose live state starts as the store schema's
    /// document shape with every default filled in
    pub fn new(store: SaveStore<S>, snapshot_capacity: usize) -> Self {
        let initial = store.validator().repair_data(&Value::Object(Default::default())).data;
        Self {
            store,
            ledger: SnapshotLedger::with_capacity(initial, snapshot_capacity),
        }
    }

    pub fn save_store(&self) -> &SaveStore<S> {
        &self.store
    }

    pub fn save_store_mut(&mut self) -> &mut SaveStore<S> {
        &mut self.store
    }

    pub fn ledger(&self) -> &SnapshotLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut SnapshotLedger {
        &mut self.ledger
    }

    pub fn state(&self) -> &Value {
        self.ledger.state()
    }

    pub fn state_mut(&mut self) -> &mut Value {
        self.ledger.state_mut()
    }

    pub fn save(&self, slot: &str, doc: &Value, options: SaveOptions) -> Result<bool> {
        self.store.save(slot, doc, options)
    }

    pub fn load(&self, slot: &str, options: LoadOptions) -> Result<Option<Value>> {
        self.store.load(slot, options)
    }

    pub fn delete(&self, slot: &str) -> Result<bool> {
        self.store.delete(slot)
    }

    pub fn create_snapshot(&mut self, label: &str) -> String {
        self.ledger.create_snapshot(label)
    }

    pub fn rollback(&mut self, snapshot_id: &str) -> bool {
        self.ledger.rollback(snapshot_id)
    }

    pub fn get_snapshots(&self) -> impl Iterator<Item = &Snapshot> + '_ {
        self.ledger.get_snapshots()
    }

    pub fn clear_snapshots(&mut self, confirmed: bool) -> bool {
        self.ledger.clear_snapshots(confirmed)
    }

    pub fn get_storage_info(&self) -> Result<StorageInfo> {
        self.store.get_storage_info()
    }

    /// Persist the live state to `slot`
    pub fn save_current(&self, slot: &str, options: SaveOptions) -> Result<bool> {
        self.store.save(slot, self.ledger.state(), options)
    }

    /// Load `slot` into the live state, taking an automatic snapshot of the
    /// state being replaced first. The live state is untouched when nothing
    /// usable was loaded.
    pub fn load_into(&mut self, slot: &str, options: LoadOptions) -> Result<LoadOutcome> {
        let mut outcome = self.store.load_detailed(slot, options)?;
        if let Some(data) = outcome.data.take() {
            self.ledger.create_auto_snapshot(&format!("load {slot}"));
            self.ledger.replace_state(data.clone());
            outcome.data = Some(data);
            info!(slot, repaired = outcome.was_repaired(), "live state replaced from storage");
        }
        Ok(outcome)
    }

    /// Diagnose `slot`, preferring an in-session snapshot over a reset
    pub fn diagnose(&self, slot: &str) -> Result<SlotDiagnosis> {
        let mut diagnosis = self.store.diagnose(slot)?;
        if diagnosis.recommended == RecoveryAction::Reset && !self.ledger.is_empty() {
            diagnosis.recommended = RecoveryAction::RollbackSnapshot;
        }
        Ok(diagnosis)
    }
}

impl<S: KeyValueStore> std::fmt::Debug for PersistenceService<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceService")
            .field("store", &self.store)
            .field("snapshots", &self.ledger.len())
            .finish()
    }
}

/// Service type returned by [`create_service_from_config`]
pub type DynPersistenceService = PersistenceService<Box<dyn KeyValueStore>>;

/// Convenience function to create an in-memory service with an empty schema
///
/// # Example
/// ```rust
/// use keepsake_core::{create_default_service, SaveOptions};
/// use serde_json::json;
///
/// let service = create_default_service();
/// assert!(service.save("main", &json!({"anything": 1}), SaveOptions::default())?);
/// # Ok::<(), keepsake_core::KeepsakeError>(())
/// ```
pub fn create_default_service() -> PersistenceService<MemoryStore> {
    let config = KeepsakeConfig::default();
    PersistenceService::new(
        SaveStore::new(MemoryStore::new(), Schema::empty("1.0.0")),
        config.snapshot_capacity,
    )
}

/// Create a service based on configuration
///
/// File-backed stores are wrapped in a [`FallbackStore`] so an unwritable
/// directory degrades to memory instead of failing every save.
pub fn create_service_from_config(
    config: &KeepsakeConfig,
    schema: Schema,
) -> Result<DynPersistenceService> {
    config.validate()?;

    let backend: Box<dyn KeyValueStore> = match config.storage.backend {
        StorageBackend::Memory => Box::new(MemoryStore::new()),
        #[cfg(feature = "file")]
        StorageBackend::File => Box::new(FallbackStore::new(crate::storage::FileStore::new(
            config.storage.resolved_base_path(),
        ))),
        #[cfg(not(feature = "file"))]
        StorageBackend::File => {
            return Err(crate::KeepsakeError::validation(
                "File backend requested but the 'file' feature is disabled",
            ))
        }
    };

    Ok(PersistenceService::new(
        SaveStore::with_config(backend, schema, config)?,
        config.snapshot_capacity,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::schema::FieldRule;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::new(
            "1.0.0",
            vec![
                FieldRule::number("jade").required().min(0.0),
                FieldRule::integer("qi.level").required().range(1.0, 100.0).default_value(json!(1)),
            ],
        )
        .unwrap()
    }

    fn service() -> DynPersistenceService {
        create_service_from_config(&KeepsakeConfig::default(), schema()).unwrap()
    }

    #[test]
    fn test_initial_state_is_schema_defaults() {
        assert_eq!(service().state(), &json!({"jade": 0, "qi": {"level": 1}}));
    }

    #[test]
    fn test_save_current_and_load_into() {
        let mut service = service();
        service.state_mut()["jade"] = json!(42);
        assert!(service.save_current("main", SaveOptions::default()).unwrap());

        service.state_mut()["jade"] = json!(7);
        let outcome = service.load_into("main", LoadOptions::default()).unwrap();
        assert!(outcome.is_clean());
        assert_eq!(service.state()["jade"], json!(42));

        // The overwritten live state can be recovered.
        let snapshot = service.get_snapshots().last().unwrap();
        assert!(snapshot.automatic);
        assert_eq!(snapshot.state["jade"], json!(7));
    }

    #[test]
    fn test_load_into_missing_slot_keeps_state() {
        let mut service = service();
        service.state_mut()["jade"] = json!(3);
        let outcome = service.load_into("nothing", LoadOptions::default()).unwrap();
        assert!(outcome.data.is_none());
        assert_eq!(service.state()["jade"], json!(3));
        assert!(service.ledger().is_empty());
    }

    #[test]
    fn test_snapshot_and_rollback() {
        let mut service = service();
        let id = service.create_snapshot("manual");
        service.state_mut()["qi"]["level"] = json!(50);
        assert!(service.rollback(&id));
        assert_eq!(service.state()["qi"]["level"], json!(1));
        assert!(!service.rollback("unknown"));
    }

    #[test]
    fn test_diagnose_prefers_snapshot_over_reset() {
        let mut service = service();
        service
            .save_store()
            .store()
            .set("keepsake_main", "broken")
            .unwrap();
        assert_eq!(service.diagnose("main").unwrap().recommended, RecoveryAction::Reset);

        service.create_snapshot("safe point");
        assert_eq!(
            service.diagnose("main").unwrap().recommended,
            RecoveryAction::RollbackSnapshot
        );
    }

    #[test]
    fn test_file_backed_service() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = KeepsakeConfig {
            storage: StorageConfig::file(dir.path()),
            ..KeepsakeConfig::default()
        };
        let service = create_service_from_config(&config, schema()).unwrap();
        assert_eq!(service.save_store().store().backend_name(), "file");

        let doc = json!({"jade": 1, "qi": {"level": 2}});
        assert!(service.save("main", &doc, SaveOptions::default()).unwrap());
        assert_eq!(service.load("main", LoadOptions::default()).unwrap(), Some(doc));
        assert!(service.delete("main").unwrap());
        assert_eq!(service.get_storage_info().unwrap().usage, 0);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = KeepsakeConfig {
            snapshot_capacity: 0,
            ..KeepsakeConfig::default()
        };
        assert!(create_service_from_config(&config, schema()).is_err());
    }
}
