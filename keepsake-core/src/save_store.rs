/*!
Durable, per-slot save records with a rolling backup.

This module contains the core save/load logic, orchestrating validation,
compression, checksums, quota checks and migration around a
[`KeyValueStore`]. Each slot owns exactly one primary record
(`<namespace>_<slot>`) and at most one backup (`<namespace>_<slot>_backup`)
holding the previous good record.
*/

use crate::compression::CompressionEngine;
use crate::config::KeepsakeConfig;
use crate::migration::Migrator;
use crate::quota::{QuotaGuard, StorageInfo};
use crate::record::SaveRecord;
use crate::schema::Schema;
use crate::storage::{entry_size, KeyLayout, KeyValueStore};
use crate::validator::{CorruptionReport, RepairAction, Severity, StateValidator, ValidationError};
use crate::{KeepsakeError, Result};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Options for [`SaveStore::save`]; everything is on by default
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOptions {
    /// Refuse to persist a document that fails schema validation
    pub validate: bool,
    /// Copy the previous good record to the slot's backup entry first
    pub backup: bool,
    /// Compress the serialized document when it is large enough to benefit
    pub compress: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            validate: true,
            backup: true,
            compress: true,
        }
    }
}

/// Options for [`SaveStore::load`]; everything is on by default
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    pub validate: bool,
    /// Repair an invalid document instead of rejecting it. Needs `validate`.
    pub repair: bool,
    /// Bring documents written under an older schema version up to date
    pub migrate: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            validate: true,
            repair: true,
            migrate: true,
        }
    }
}

/// Which entry a loaded document came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordSource {
    Primary,
    Backup,
}

/// Why a load produced no document
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum LoadFailure {
    /// Neither the primary nor the backup entry exists
    NotFound,
    /// Every existing entry failed its checksum or could not be decoded
    Unreadable { reason: String },
    /// The document is invalid and repair was not requested
    Invalid {
        violations: Vec<ValidationError>,
        corruption: CorruptionReport,
    },
    /// Repair ran but the result still does not validate
    RepairFailed { violations: Vec<ValidationError> },
    MigrationFailed { reason: String },
}

/// Everything a load found out, for callers that need more than the document
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadOutcome {
    pub data: Option<Value>,
    pub source: Option<RecordSource>,
    /// Version the record was written under, when it was migrated
    pub migrated_from: Option<String>,
    pub repairs: Vec<RepairAction>,
    /// Damage found before repair, when the document did not validate
    pub corruption: Option<CorruptionReport>,
    pub failure: Option<LoadFailure>,
}

impl LoadOutcome {
    fn failed(failure: LoadFailure, source: Option<RecordSource>) -> Self {
        Self {
            data: None,
            source,
            migrated_from: None,
            repairs: Vec::new(),
            corruption: None,
            failure: Some(failure),
        }
    }

    /// The document was altered by repair on its way out
    pub fn was_repaired(&self) -> bool {
        !self.repairs.is_empty()
    }

    /// A document came from the primary record without any repair
    pub fn is_clean(&self) -> bool {
        self.data.is_some()
            && self.failure.is_none()
            && self.repairs.is_empty()
            && self.source == Some(RecordSource::Primary)
    }
}

/// Facts about a completed save
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveReceipt {
    pub key: String,
    pub bytes: u64,
    pub compressed: bool,
    pub checksum: String,
    pub backed_up: bool,
}

/// Health of one stored entry as seen by [`SaveStore::diagnose`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum RecordHealth {
    Missing,
    /// Fails its checksum, or cannot be parsed or decoded
    Damaged { reason: String },
    Intact {
        version: String,
        timestamp: i64,
        valid: bool,
        corruption: CorruptionReport,
    },
}

impl RecordHealth {
    pub fn is_intact(&self) -> bool {
        matches!(self, RecordHealth::Intact { .. })
    }

    pub fn is_usable(&self) -> bool {
        matches!(self, RecordHealth::Intact { valid: true, .. })
    }
}

/// Recovery step suggested for a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RecoveryAction {
    /// Nothing to do: the slot is healthy or has never been written
    None,
    /// Load with repair enabled
    Repair,
    /// Replace the primary with the backup
    RestoreBackup,
    /// Roll live state back to an in-memory snapshot
    RollbackSnapshot,
    /// Nothing recoverable remains; start over
    Reset,
}

/// Per-slot diagnosis for recovery tooling
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotDiagnosis {
    pub slot: String,
    pub primary: RecordHealth,
    pub backup: RecordHealth,
    pub recommended: RecoveryAction,
}

/// Checksummed, decoded entry
struct Decoded {
    record: SaveRecord,
    doc: Value,
}

/// Save store over a key/value backend
///
/// # Example
/// ```rust
/// use keepsake_core::{FieldRule, LoadOptions, MemoryStore, SaveOptions, SaveStore, Schema};
/// use serde_json::json;
///
/// let schema = Schema::new("1.0.0", vec![FieldRule::number("jade").required().min(0.0)])?;
/// let store = SaveStore::new(MemoryStore::new(), schema);
///
/// assert!(store.save("main", &json!({"jade": 40}), SaveOptions::default())?);
/// assert_eq!(store.load("main", LoadOptions::default())?, Some(json!({"jade": 40})));
/// # Ok::<(), keepsake_core::KeepsakeError>(())
/// ```
pub struct SaveStore<S: KeyValueStore> {
    store: S,
    layout: KeyLayout,
    validator: StateValidator,
    compressor: CompressionEngine,
    quota: QuotaGuard,
    migrator: Migrator,
}

impl<S: KeyValueStore> SaveStore<S> {
    /// Create a save store with default configuration
    pub fn new(store: S, schema: Schema) -> Self {
        Self::assemble(store, schema, &KeepsakeConfig::default(), KeyLayout::default())
    }

    /// Create a save store from `config`
    ///
    /// # Errors
    /// * `KeepsakeError::Validation` - If the configured namespace is unusable
    pub fn with_config(store: S, schema: Schema, config: &KeepsakeConfig) -> Result<Self> {
        let layout = KeyLayout::new(config.storage.namespace.as_str())?;
        Ok(Self::assemble(store, schema, config, layout))
    }

    fn assemble(store: S, schema: Schema, config: &KeepsakeConfig, layout: KeyLayout) -> Self {
        let migrator = Migrator::new(schema.version());
        Self {
            store,
            quota: QuotaGuard::new(config.quota.clone(), layout.clone()),
            layout,
            validator: StateValidator::new(schema),
            compressor: CompressionEngine::new(&config.compression),
            migrator,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn layout(&self) -> &KeyLayout {
        &self.layout
    }

    pub fn schema(&self) -> &Schema {
        self.validator.schema()
    }

    pub fn validator(&self) -> &StateValidator {
        &self.validator
    }

    pub fn compressor(&self) -> &CompressionEngine {
        &self.compressor
    }

    pub fn quota_guard(&self) -> &QuotaGuard {
        &self.quota
    }

    /// Register a custom step run when loading records older than `version`
    pub fn register_migration<F>(&mut self, version: &str, step: F) -> Result<()>
    where
        F: Fn(&mut Value) -> Result<()> + Send + Sync + 'static,
    {
        self.migrator.register(version, step)
    }

    /// Save `doc` to `slot`, returning `Ok(false)` when validation refuses it
    ///
    /// # Errors
    /// * `KeepsakeError::QuotaExceeded` - If the store is full even after eviction
    /// * `KeepsakeError::Validation` - If `slot` is not a usable slot name
    /// * `KeepsakeError::Storage` - If the backend fails to write
    pub fn save(&self, slot: &str, doc: &Value, options: SaveOptions) -> Result<bool> {
        match self.try_save(slot, doc, options) {
            Ok(_) => Ok(true),
            Err(KeepsakeError::ValidationFailed { violations }) => {
                warn!(
                    slot,
                    violations = violations.len(),
                    "save refused: document failed validation"
                );
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Save `doc` to `slot`, surfacing every failure as an error
    ///
    /// This method:
    /// 1. Validates the document against the schema (when requested)
    /// 2. Serializes and compresses it
    /// 3. Wraps it in a checksummed record
    /// 4. Makes room through the quota guard
    /// 5. Copies the previous record to the backup entry if it verifies
    /// 6. Writes the new primary record
    pub fn try_save(&self, slot: &str, doc: &Value, options: SaveOptions) -> Result<SaveReceipt> {
        self.layout.check_slot(slot)?;

        if options.validate {
            let result = self.validator.validate(doc);
            if !result.is_valid {
                return Err(KeepsakeError::ValidationFailed {
                    violations: result.errors,
                });
            }
        }

        let text = serde_json::to_string(doc)?;
        let payload = if options.compress {
            self.compressor.compress(&text)
        } else {
            text
        };
        let compressed = CompressionEngine::is_compressed(&payload);
        let record = SaveRecord::new(self.schema().version(), payload, compressed);
        let record_json = record.to_json()?;

        let primary_key = self.layout.primary(slot);
        let backup_key = self.layout.backup(slot);
        let previous = self.store.get(&primary_key)?;

        let backup = match (&previous, options.backup) {
            (Some(raw), true) => match self.decode(&primary_key, raw) {
                Ok(_) => Some(raw.as_str()),
                Err(e) => {
                    warn!(
                        slot,
                        error = %e,
                        "previous record is damaged; keeping the existing backup"
                    );
                    None
                }
            },
            _ => None,
        };

        let mut written = entry_size(&primary_key, &record_json);
        let mut replaced = previous
            .as_deref()
            .map_or(0, |raw| entry_size(&primary_key, raw));
        if let Some(raw) = backup {
            written += entry_size(&backup_key, raw);
            replaced += self
                .store
                .get(&backup_key)?
                .map_or(0, |old| entry_size(&backup_key, &old));
        }
        self.quota
            .ensure_room(&self.store, written.saturating_sub(replaced))?;

        if let Some(raw) = backup {
            self.store.set(&backup_key, raw)?;
        }
        self.store.set(&primary_key, &record_json)?;

        info!(
            slot,
            bytes = record_json.len(),
            compressed,
            backed_up = backup.is_some(),
            "state saved"
        );
        Ok(SaveReceipt {
            key: primary_key,
            bytes: record_json.len() as u64,
            compressed,
            checksum: record.checksum,
            backed_up: backup.is_some(),
        })
    }

    /// Load the document in `slot`, or `None` when nothing usable is stored
    pub fn load(&self, slot: &str, options: LoadOptions) -> Result<Option<Value>> {
        Ok(self.load_detailed(slot, options)?.data)
    }

    /// Load the document in `slot` and report how it was obtained
    ///
    /// A primary record that fails its checksum, or cannot be parsed or
    /// decoded, is skipped in favour of the backup. Only backend errors are
    /// returned as `Err`; every data problem is described by the outcome.
    pub fn load_detailed(&self, slot: &str, options: LoadOptions) -> Result<LoadOutcome> {
        self.layout.check_slot(slot)?;

        let (decoded, source) = match self.read_with_fallback(slot)? {
            Ok(found) => found,
            Err(failure) => return Ok(LoadOutcome::failed(failure, None)),
        };
        let Decoded { record, mut doc } = decoded;

        let mut migrated_from = None;
        if options.migrate && self.migrator.needs_migration(&record.version) {
            if let Err(e) = self.migrator.migrate(&mut doc, &record.version, self.schema()) {
                warn!(slot, error = %e, "migration failed");
                return Ok(LoadOutcome::failed(
                    LoadFailure::MigrationFailed {
                        reason: e.to_string(),
                    },
                    Some(source),
                ));
            }
            migrated_from = Some(record.version.clone());
        }

        let mut outcome = LoadOutcome {
            data: None,
            source: Some(source),
            migrated_from,
            repairs: Vec::new(),
            corruption: None,
            failure: None,
        };

        if !options.validate {
            outcome.data = Some(doc);
            return Ok(outcome);
        }

        let result = self.validator.validate(&doc);
        if result.is_valid {
            outcome.data = Some(doc);
            return Ok(outcome);
        }

        let corruption = self.validator.check_corruption(&doc);
        if corruption.severity == Severity::Severe {
            warn!(slot, issues = ?corruption.issues, "loaded document is severely corrupted");
        }
        outcome.corruption = Some(corruption.clone());

        if !options.repair {
            debug!(slot, violations = result.errors.len(), "loaded document is invalid; repair disabled");
            outcome.failure = Some(LoadFailure::Invalid {
                violations: result.errors,
                corruption,
            });
            return Ok(outcome);
        }

        let repaired = self.validator.repair_data(&doc);
        if !repaired.success {
            let violations = self.validator.validate(&repaired.data).errors;
            warn!(slot, remaining = violations.len(), "repair did not produce a valid document");
            outcome.failure = Some(LoadFailure::RepairFailed { violations });
            return Ok(outcome);
        }

        info!(slot, repairs = repaired.repairs.len(), "loaded document was repaired");
        outcome.repairs = repaired.repairs;
        outcome.data = Some(repaired.data);
        Ok(outcome)
    }

    /// Load the document in `slot`, surfacing data problems as errors.
    /// A slot with nothing stored is `Ok(None)`.
    ///
    /// # Errors
    /// * `KeepsakeError::Corruption` - If a damaged document was not repaired
    /// * `KeepsakeError::ValidationFailed` - If an invalid document was not repaired,
    ///   or repair did not make it valid
    /// * `KeepsakeError::InvalidFormat` - If neither entry could be decoded
    /// * `KeepsakeError::Validation` - If migration failed
    pub fn try_load(&self, slot: &str, options: LoadOptions) -> Result<Option<Value>> {
        let outcome = self.load_detailed(slot, options)?;
        let Some(failure) = outcome.failure else {
            return Ok(outcome.data);
        };
        Err(match failure {
            LoadFailure::NotFound => return Ok(None),
            LoadFailure::Unreadable { reason } => KeepsakeError::InvalidFormat(reason),
            LoadFailure::Invalid { corruption, .. } if corruption.is_corrupted => {
                KeepsakeError::Corruption {
                    severity: corruption.severity,
                    issues: corruption.issues,
                }
            }
            LoadFailure::Invalid { violations, .. } | LoadFailure::RepairFailed { violations } => {
                KeepsakeError::ValidationFailed { violations }
            }
            LoadFailure::MigrationFailed { reason } => KeepsakeError::Validation(reason),
        })
    }

    /// Remove the primary and backup entries; succeeds when either is absent
    pub fn delete(&self, slot: &str) -> Result<bool> {
        self.layout.check_slot(slot)?;
        self.store.remove(&self.layout.primary(slot))?;
        self.store.remove(&self.layout.backup(slot))?;
        info!(slot, "slot deleted");
        Ok(true)
    }

    pub fn exists(&self, slot: &str) -> Result<bool> {
        self.layout.check_slot(slot)?;
        Ok(self.store.get(&self.layout.primary(slot))?.is_some())
    }

    /// Slots with a primary record in this namespace, sorted
    pub fn list_slots(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .keys()?
            .iter()
            .filter_map(|key| self.layout.slot_of(key))
            .collect())
    }

    /// Primary record of `slot` as stored, without verifying it
    pub fn read_record(&self, slot: &str) -> Result<Option<SaveRecord>> {
        self.layout.check_slot(slot)?;
        self.store
            .get(&self.layout.primary(slot))?
            .map(|raw| SaveRecord::from_json(&raw))
            .transpose()
    }

    pub fn get_storage_info(&self) -> Result<StorageInfo> {
        self.quota.get_storage_info(&self.store)
    }

    /// Replace the primary record with the backup, if the backup verifies.
    /// Returns `Ok(false)` when there is no usable backup.
    pub fn restore_from_backup(&self, slot: &str) -> Result<bool> {
        self.layout.check_slot(slot)?;
        let primary_key = self.layout.primary(slot);
        let backup_key = self.layout.backup(slot);

        let Some(raw) = self.store.get(&backup_key)? else {
            debug!(slot, "no backup to restore");
            return Ok(false);
        };
        if let Err(e) = self.decode(&backup_key, &raw) {
            warn!(slot, error = %e, "backup is damaged; not restoring");
            return Ok(false);
        }

        let replaced = self
            .store
            .get(&primary_key)?
            .map_or(0, |old| entry_size(&primary_key, &old));
        self.quota.ensure_room(
            &self.store,
            entry_size(&primary_key, &raw).saturating_sub(replaced),
        )?;
        self.store.set(&primary_key, &raw)?;
        info!(slot, "primary record restored from backup");
        Ok(true)
    }

    /// Inspect both entries of `slot` and recommend a recovery step
    pub fn diagnose(&self, slot: &str) -> Result<SlotDiagnosis> {
        self.layout.check_slot(slot)?;
        let primary = self.health(&self.layout.primary(slot))?;
        let backup = self.health(&self.layout.backup(slot))?;

        let recommended = match (&primary, &backup) {
            (RecordHealth::Intact { valid: true, .. }, _) => RecoveryAction::None,
            (RecordHealth::Missing, RecordHealth::Missing) => RecoveryAction::None,
            (RecordHealth::Intact { corruption, .. }, backup)
                if corruption.severity == Severity::Severe && backup.is_usable() =>
            {
                RecoveryAction::RestoreBackup
            }
            (RecordHealth::Intact { .. }, _) => RecoveryAction::Repair,
            (_, backup) if backup.is_intact() => RecoveryAction::RestoreBackup,
            _ => RecoveryAction::Reset,
        };

        Ok(SlotDiagnosis {
            slot: slot.to_string(),
            primary,
            backup,
            recommended,
        })
    }

    fn health(&self, key: &str) -> Result<RecordHealth> {
        let Some(raw) = self.store.get(key)? else {
            return Ok(RecordHealth::Missing);
        };
        Ok(match self.decode(key, &raw) {
            Ok(Decoded { record, mut doc }) => {
                if self.migrator.needs_migration(&record.version) {
                    // Judge the document as a load would see it.
                    if let Err(e) = self.migrator.migrate(&mut doc, &record.version, self.schema()) {
                        return Ok(RecordHealth::Damaged {
                            reason: e.to_string(),
                        });
                    }
                }
                RecordHealth::Intact {
                    version: record.version,
                    timestamp: record.timestamp,
                    valid: self.validator.validate(&doc).is_valid,
                    corruption: self.validator.check_corruption(&doc),
                }
            }
            Err(e) => RecordHealth::Damaged {
                reason: e.to_string(),
            },
        })
    }

    /// Read the primary entry, falling back to the backup when the primary is
    /// missing or damaged. Backend errors propagate; data problems are
    /// returned as the inner `Err`.
    fn read_with_fallback(
        &self,
        slot: &str,
    ) -> Result<std::result::Result<(Decoded, RecordSource), LoadFailure>> {
        let primary_key = self.layout.primary(slot);
        let primary_problem = match self.store.get(&primary_key)? {
            Some(raw) => match self.decode(&primary_key, &raw) {
                Ok(decoded) => return Ok(Ok((decoded, RecordSource::Primary))),
                Err(e) => {
                    warn!(slot, error = %e, "primary record failed integrity check; trying backup");
                    Some(e.to_string())
                }
            },
            None => None,
        };

        let backup_key = self.layout.backup(slot);
        let backup_problem = match self.store.get(&backup_key)? {
            Some(raw) => match self.decode(&backup_key, &raw) {
                Ok(decoded) => {
                    info!(slot, "loaded state from backup record");
                    return Ok(Ok((decoded, RecordSource::Backup)));
                }
                Err(e) => {
                    warn!(slot, error = %e, "backup record failed integrity check");
                    Some(e.to_string())
                }
            },
            None => None,
        };

        Ok(Err(match (primary_problem, backup_problem) {
            (None, None) => LoadFailure::NotFound,
            (primary, backup) => LoadFailure::Unreadable {
                reason: [primary, backup]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join("; "),
            },
        }))
    }

    /// Parse, verify and decompress one stored entry
    fn decode(&self, key: &str, raw: &str) -> Result<Decoded> {
        let record = SaveRecord::from_json(raw)?;
        record.verify(key)?;
        let text = self.compressor.decompress(&record.payload);
        let doc = serde_json::from_str(&text).map_err(|e| {
            KeepsakeError::invalid_format(format!("payload of '{key}' is not valid JSON: {e}"))
        })?;
        Ok(Decoded { record, doc })
    }
}

impl<S: KeyValueStore> std::fmt::Debug for SaveStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaveStore")
            .field("backend", &self.store.backend_name())
            .field("namespace", &self.layout.namespace())
            .field("schema_version", &self.schema().version())
            .finish()
    }
}
