/*!
Forward migration of documents written against an older schema version.

Two kinds of change are applied, in order:

1. Custom steps registered for a version, run in ascending version order for
   every version newer than the record's and not newer than the current one.
2. Additive filling: every required field that is absent (or null) under an
   existing parent object receives its schema default.
*/

use crate::schema::{parent_object_mut, Schema};
use crate::{KeepsakeError, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Semantic version with optional `v` prefix and optional minor/patch parts
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct SchemaVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl SchemaVersion {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self { major, minor, patch }
    }
}

impl FromStr for SchemaVersion {
    type Err = KeepsakeError;

    fn from_str(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        let trimmed = trimmed.strip_prefix(['v', 'V']).unwrap_or(trimmed);
        // Pre-release and build suffixes do not affect ordering here.
        let core = trimmed.split(['-', '+']).next().unwrap_or_default();

        let parts: Vec<&str> = core.split('.').collect();
        if core.is_empty() || parts.len() > 3 {
            return Err(KeepsakeError::validation(format!("invalid version '{text}'")));
        }
        let mut numbers = [0u64; 3];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            *slot = part
                .parse()
                .map_err(|_| KeepsakeError::validation(format!("invalid version '{text}'")))?;
        }
        Ok(Self::new(numbers[0], numbers[1], numbers[2]))
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// A custom transformation run when upgrading past a version
pub type MigrationFn = Box<dyn Fn(&mut Value) -> Result<()> + Send + Sync>;

/// What a migration changed
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub from: String,
    pub to: String,
    pub steps_applied: Vec<String>,
    pub filled: Vec<String>,
}

impl MigrationReport {
    pub fn is_empty(&self) -> bool {
        self.steps_applied.is_empty() && self.filled.is_empty()
    }
}

pub struct Migrator {
    current: SchemaVersion,
    steps: BTreeMap<SchemaVersion, MigrationFn>,
}

impl Migrator {
    /// A migrator targeting `current`; an unparseable target counts as `0.0.0`
    pub fn new(current: &str) -> Self {
        let current = current.parse().unwrap_or_else(|e| {
            warn!(version = current, error = %e, "schema version is not semantic; migrations disabled");
            SchemaVersion::default()
        });
        Self {
            current,
            steps: BTreeMap::new(),
        }
    }

    pub fn current(&self) -> SchemaVersion {
        self.current
    }

    /// Register `step` to run when upgrading a document past `version`
    pub fn register<F>(&mut self, version: &str, step: F) -> Result<()>
    where
        F: Fn(&mut Value) -> Result<()> + Send + Sync + 'static,
    {
        let version: SchemaVersion = version.parse()?;
        if version > self.current {
            return Err(KeepsakeError::validation(format!(
                "migration for {version} is newer than the current schema {}",
                self.current
            )));
        }
        if self.steps.insert(version, Box::new(step)).is_some() {
            debug!(%version, "replaced existing migration step");
        }
        Ok(())
    }

    /// Whether a record written at `version` is older than the current schema.
    /// Versions that cannot be parsed are treated as older.
    pub fn needs_migration(&self, version: &str) -> bool {
        match version.parse::<SchemaVersion>() {
            Ok(v) => v < self.current,
            Err(_) => {
                warn!(version, "record version is not semantic; treating it as outdated");
                true
            }
        }
    }

    /// Upgrade `doc` from `from` to the current version in place
    pub fn migrate(&self, doc: &mut Value, from: &str, schema: &Schema) -> Result<MigrationReport> {
        let start = from.parse::<SchemaVersion>().unwrap_or_default();
        let mut report = MigrationReport {
            from: from.to_string(),
            to: self.current.to_string(),
            ..MigrationReport::default()
        };

        let pending: Vec<_> = if start < self.current {
            self.steps
                .range((Bound::Excluded(start), Bound::Included(self.current)))
                .collect()
        } else {
            Vec::new()
        };
        for (version, step) in pending {
            step(doc).map_err(|e| {
                KeepsakeError::validation(format!("migration step {version} failed: {e}"))
            })?;
            report.steps_applied.push(version.to_string());
        }

        for rule in schema.rules().iter().filter(|rule| rule.required) {
            let Some((parent, key)) = parent_object_mut(doc, &rule.path) else {
                continue;
            };
            if parent.get(key).map_or(true, Value::is_null) {
                parent.insert(key.to_string(), rule.default.clone());
                report.filled.push(rule.path.clone());
            }
        }

        if !report.is_empty() {
            info!(
                from = %report.from,
                to = %report.to,
                steps = report.steps_applied.len(),
                filled = report.filled.len(),
                "migrated state document"
            );
        }
        Ok(report)
    }
}

impl fmt::Debug for Migrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migrator")
            .field("current", &self.current)
            .field("steps", &self.steps.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldRule;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::new(
            "1.2.0",
            vec![
                FieldRule::number("jade").required().min(0.0),
                FieldRule::integer("qi.level").required().range(1.0, 100.0).default_value(json!(1)),
                FieldRule::string("sect.name").required().default_value(json!("none")),
                FieldRule::object("sect").optional(),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_parse_versions() {
        assert_eq!("1.2.3".parse::<SchemaVersion>().unwrap(), SchemaVersion::new(1, 2, 3));
        assert_eq!("v2".parse::<SchemaVersion>().unwrap(), SchemaVersion::new(2, 0, 0));
        assert_eq!("1.4".parse::<SchemaVersion>().unwrap(), SchemaVersion::new(1, 4, 0));
        assert_eq!("1.0.0-beta.1".parse::<SchemaVersion>().unwrap(), SchemaVersion::new(1, 0, 0));
        assert!("".parse::<SchemaVersion>().is_err());
        assert!("1.2.3.4".parse::<SchemaVersion>().is_err());
        assert!("one".parse::<SchemaVersion>().is_err());
        assert!(SchemaVersion::new(1, 10, 0) > SchemaVersion::new(1, 9, 9));
    }

    #[test]
    fn test_needs_migration() {
        let migrator = Migrator::new("1.2.0");
        assert!(migrator.needs_migration("1.1.9"));
        assert!(migrator.needs_migration("garbage"));
        assert!(!migrator.needs_migration("1.2.0"));
        assert!(!migrator.needs_migration("2.0.0"));
    }

    #[test]
    fn test_additive_fill() {
        let migrator = Migrator::new("1.2.0");
        let mut doc = json!({"jade": 5, "qi": {}, "extra": true});

        let report = migrator.migrate(&mut doc, "1.0.0", &schema()).unwrap();
        assert_eq!(doc["qi"]["level"], json!(1));
        assert_eq!(doc["jade"], json!(5));
        assert_eq!(doc["extra"], json!(true));
        // Optional parent absent: its required children are not invented.
        assert!(doc.get("sect").is_none());
        assert_eq!(report.filled, vec!["qi.level".to_string()]);
    }

    #[test]
    fn test_custom_steps_run_in_order() {
        let mut migrator = Migrator::new("1.2.0");
        migrator
            .register("1.2.0", |doc| {
                doc["order"].as_array_mut().unwrap().push(json!("1.2.0"));
                Ok(())
            })
            .unwrap();
        migrator
            .register("1.1.0", |doc| {
                doc["order"] = json!(["1.1.0"]);
                Ok(())
            })
            .unwrap();
        migrator.register("1.0.0", |_| panic!("already applied")).unwrap();

        let mut doc = json!({"jade": 1, "qi": {"level": 3}});
        let report = migrator.migrate(&mut doc, "1.0.0", &schema()).unwrap();
        assert_eq!(doc["order"], json!(["1.1.0", "1.2.0"]));
        assert_eq!(report.steps_applied, vec!["1.1.0".to_string(), "1.2.0".to_string()]);
    }

    #[test]
    fn test_register_rejects_future_versions() {
        let mut migrator = Migrator::new("1.2.0");
        assert!(migrator.register("1.3.0", |_| Ok(())).is_err());
        assert!(migrator.register("nope", |_| Ok(())).is_err());
    }

    #[test]
    fn test_failing_step_surfaces_error() {
        let mut migrator = Migrator::new("2.0.0");
        migrator
            .register("2.0.0", |_| Err(KeepsakeError::validation("bad shape")))
            .unwrap();
        let mut doc = json!({});
        let err = migrator.migrate(&mut doc, "1.0.0", &schema()).unwrap_err();
        assert!(err.to_string().contains("2.0.0"));
    }
}
