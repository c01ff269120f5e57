/*!
In-memory undo history for the live state document.

Snapshots are deep copies kept in a bounded ledger for the current session
only; they are never written to storage. When the ledger is full the oldest
snapshot is evicted first.
*/

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_SNAPSHOT_CAPACITY: usize = 20;

const AUTO_LABEL_PREFIX: &str = "auto: ";

/// A deep copy of the state at one point in time
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: String,
    pub label: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    /// Taken automatically before a risky mutation
    pub automatic: bool,
    pub state: Value,
}

/// Live state plus its bounded snapshot history
///
/// # Example
/// ```rust
/// use keepsake_core::SnapshotLedger;
/// use serde_json::json;
///
/// let mut ledger = SnapshotLedger::new(json!({"jade": 10}));
/// let id = ledger.create_snapshot("before shop");
/// ledger.state_mut()["jade"] = json!(0);
///
/// assert!(ledger.rollback(&id));
/// assert_eq!(ledger.state()["jade"], json!(10));
/// ```
#[derive(Debug, Clone)]
pub struct SnapshotLedger {
    state: Value,
    snapshots: VecDeque<Snapshot>,
    capacity: usize,
}

impl SnapshotLedger {
    pub fn new(state: Value) -> Self {
        Self::with_capacity(state, DEFAULT_SNAPSHOT_CAPACITY)
    }

    /// A ledger keeping at most `capacity` snapshots (at least one)
    pub fn with_capacity(state: Value, capacity: usize) -> Self {
        Self {
            state,
            snapshots: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn state(&self) -> &Value {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut Value {
        &mut self.state
    }

    /// Replace the live state, returning the previous one
    pub fn replace_state(&mut self, state: Value) -> Value {
        std::mem::replace(&mut self.state, state)
    }

    /// Copy the live state into the ledger and return the snapshot id
    pub fn create_snapshot(&mut self, label: &str) -> String {
        self.push(label.to_string(), false)
    }

    /// Snapshot taken on the caller's behalf before a risky operation
    pub(crate) fn create_auto_snapshot(&mut self, reason: &str) -> String {
        self.push(format!("{AUTO_LABEL_PREFIX}{reason}"), true)
    }

    /// Take an automatic snapshot, then run `mutation` against the live state.
    /// The snapshot id is returned alongside the mutation's result so the
    /// caller can roll back if it is unhappy with the outcome.
    pub fn guard<T, F>(&mut self, reason: &str, mutation: F) -> (String, T)
    where
        F: FnOnce(&mut Value) -> T,
    {
        let id = self.create_auto_snapshot(reason);
        let result = mutation(&mut self.state);
        (id, result)
    }

    /// Restore the live state from snapshot `id`. The snapshot stays in the
    /// ledger so the same point can be rolled back to again.
    pub fn rollback(&mut self, id: &str) -> bool {
        match self.snapshots.iter().find(|snapshot| snapshot.id == id) {
            Some(snapshot) => {
                self.state = snapshot.state.clone();
                info!(snapshot = id, label = %snapshot.label, "state rolled back");
                true
            }
            None => {
                warn!(snapshot = id, "rollback target not found");
                false
            }
        }
    }

    /// Roll back to the most recent snapshot, returning its id
    pub fn undo(&mut self) -> Option<String> {
        let id = self.snapshots.back()?.id.clone();
        self.rollback(&id).then_some(id)
    }

    pub fn get_snapshot(&self, id: &str) -> Option<&Snapshot> {
        self.snapshots.iter().find(|snapshot| snapshot.id == id)
    }

    /// Snapshots, oldest first
    pub fn get_snapshots(&self) -> impl Iterator<Item = &Snapshot> + '_ {
        self.snapshots.iter()
    }

    /// Drop every snapshot. Nothing happens unless `confirmed` is true.
    pub fn clear_snapshots(&mut self, confirmed: bool) -> bool {
        if !confirmed {
            debug!("clear_snapshots called without confirmation; ignoring");
            return false;
        }
        let dropped = self.snapshots.len();
        self.snapshots.clear();
        info!(dropped, "snapshots cleared");
        true
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn push(&mut self, label: String, automatic: bool) -> String {
        while self.snapshots.len() >= self.capacity {
            if let Some(evicted) = self.snapshots.pop_front() {
                debug!(snapshot = %evicted.id, label = %evicted.label, "evicted oldest snapshot");
            }
        }
        let snapshot = Snapshot {
            id: Uuid::new_v4().to_string(),
            label,
            timestamp: Utc::now().timestamp_millis(),
            automatic,
            state: self.state.clone(),
        };
        let id = snapshot.id.clone();
        debug!(snapshot = %id, label = %snapshot.label, "snapshot created");
        self.snapshots.push_back(snapshot);
        id
    }
}

impl Default for SnapshotLedger {
    fn default() -> Self {
        Self::new(Value::Object(Default::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rollback_restores_touched_fields() {
        let mut ledger = SnapshotLedger::new(json!({"jade": 10, "qi": {"level": 3}}));
        let id = ledger.create_snapshot("before breakthrough");

        ledger.state_mut()["jade"] = json!(0);
        ledger.state_mut()["qi"]["level"] = json!(4);
        ledger.state_mut()["new"] = json!(true);

        assert!(ledger.rollback(&id));
        assert_eq!(ledger.state(), &json!({"jade": 10, "qi": {"level": 3}}));

        // The snapshot survives for a second rollback.
        ledger.state_mut()["jade"] = json!(5);
        assert!(ledger.rollback(&id));
        assert_eq!(ledger.state()["jade"], json!(10));
    }

    #[test]
    fn test_snapshot_is_a_deep_copy() {
        let mut ledger = SnapshotLedger::new(json!({"items": [1, 2]}));
        let id = ledger.create_snapshot("copy");
        ledger.state_mut()["items"].as_array_mut().unwrap().push(json!(3));
        assert_eq!(ledger.get_snapshot(&id).unwrap().state, json!({"items": [1, 2]}));
    }

    #[test]
    fn test_unknown_id() {
        let mut ledger = SnapshotLedger::default();
        assert!(!ledger.rollback("nope"));
        assert_eq!(ledger.undo(), None);
    }

    #[test]
    fn test_oldest_snapshot_evicted_first() {
        let mut ledger = SnapshotLedger::with_capacity(json!({}), 3);
        let ids: Vec<String> = (0..5).map(|i| ledger.create_snapshot(&format!("s{i}"))).collect();

        assert_eq!(ledger.len(), 3);
        let labels: Vec<&str> = ledger.get_snapshots().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["s2", "s3", "s4"]);
        assert!(ledger.get_snapshot(&ids[0]).is_none());
        assert!(!ledger.rollback(&ids[1]));
    }

    #[test]
    fn test_guard_takes_auto_snapshot() {
        let mut ledger = SnapshotLedger::new(json!({"jade": 10}));
        let (id, spent) = ledger.guard("buy sword", |state| {
            state["jade"] = json!(2);
            8
        });
        assert_eq!(spent, 8);

        let snapshot = ledger.get_snapshot(&id).unwrap();
        assert!(snapshot.automatic);
        assert_eq!(snapshot.label, "auto: buy sword");

        assert_eq!(ledger.undo(), Some(id));
        assert_eq!(ledger.state()["jade"], json!(10));
    }

    #[test]
    fn test_clear_requires_confirmation() {
        let mut ledger = SnapshotLedger::default();
        ledger.create_snapshot("a");
        assert!(!ledger.clear_snapshots(false));
        assert_eq!(ledger.len(), 1);
        assert!(ledger.clear_snapshots(true));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_zero_capacity_keeps_one() {
        let mut ledger = SnapshotLedger::with_capacity(json!({}), 0);
        ledger.create_snapshot("a");
        ledger.create_snapshot("b");
        assert_eq!(ledger.capacity(), 1);
        assert_eq!(ledger.get_snapshots().next().unwrap().label, "b");
    }
}
