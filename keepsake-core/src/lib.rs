/*!
# Keepsake Core

Persistence and recovery core for a single large JSON state document kept in
a size-constrained key/value store.

This crate guarantees that state surviving a crash, a corrupted write, a
quota overflow or a schema change is never silently wrong. It provides:

- Schema-driven validation that reports every violation at once
- Corruption diagnosis and idempotent repair from schema defaults
- Compression with a self-describing header and ranked method fallback
- SHA-256 checksummed save records with a rolling per-slot backup
- Quota checks that evict stale backups before refusing a write
- Forward migration of documents written under older schema versions
- A bounded, in-memory snapshot ledger for session-local undo

## Architecture

The core follows hexagonal architecture principles:
- Storage is a port ([`KeyValueStore`]) with memory, file and degrading
  fallback adapters
- Compression codecs sit behind a uniform [`compression::Codec`] interface
- [`PersistenceService`] is constructed once and passed to consumers; the
  core has no global state

## Usage

```rust
use keepsake_core::{FieldRule, LoadOptions, MemoryStore, SaveOptions, SaveStore, Schema};
use serde_json::json;

let schema = Schema::new(
    "1.0.0",
    vec![
        FieldRule::number("jade").required().min(0.0),
        FieldRule::integer("qi.level").required().range(1.0, 100.0).default_value(json!(1)),
    ],
)?;
let store = SaveStore::new(MemoryStore::new(), schema);

let doc = json!({"jade": 120, "qi": {"level": 9}});
assert!(store.save("main", &doc, SaveOptions::default())?);
assert_eq!(store.load("main", LoadOptions::default())?, Some(doc));
# Ok::<(), keepsake_core::KeepsakeError>(())
```
*/

pub mod compression;
pub mod config;
pub mod error;
pub mod ledger;
pub mod migration;
pub mod observability;
pub mod quota;
pub mod record;
pub mod save_store;
pub mod schema;
pub mod service;
pub mod storage;
pub mod validator;


pub use compression::{CompressOptions, CompressionEngine, CompressionStats};
pub use config::{CompressionConfig, KeepsakeConfig, QuotaConfig, StorageBackend, StorageConfig};
pub use error::{KeepsakeError, Result};
pub use ledger::{Snapshot, SnapshotLedger};
pub use migration::{MigrationReport, SchemaVersion};
pub use observability::{init_default_observability, init_observability};
pub use quota::{QuotaGuard, StorageInfo};
pub use record::SaveRecord;
pub use save_store::{
    LoadFailure, LoadOptions, LoadOutcome, RecordHealth, RecordSource, RecoveryAction,
    SaveOptions, SaveReceipt, SaveStore, SlotDiagnosis,
};
pub use schema::{FieldRule, FieldType, Schema};
pub use service::{
    create_default_service, create_service_from_config, DynPersistenceService, PersistenceService,
};
#[cfg(feature = "file")]
pub use storage::FileStore;
pub use storage::{FallbackStore, KeyValueStore, MemoryStore};
pub use validator::{
    CorruptionReport, RepairAction, RepairResult, Severity, StateValidator, ValidationError,
    ValidationResult, Violation,
};
