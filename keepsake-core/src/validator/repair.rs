/*!
Automatic repair: substitute schema defaults for invalid fields, keep the rest.
*/

use super::{check_value, Violation};
use crate::schema::{parent_object_mut, FieldType, Schema, ROOT_PATH};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One change made during repair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairAction {
    pub path: String,
    /// `None` when the field was absent
    pub old_value: Option<Value>,
    pub new_value: Value,
    pub reason: String,
}

/// Repaired copy of a document plus an audit trail of what changed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairResult {
    pub success: bool,
    pub repairs: Vec<RepairAction>,
    pub data: Value,
}

impl RepairResult {
    pub fn is_unchanged(&self) -> bool {
        self.repairs.is_empty()
    }
}

/// Try to convert `value` into `target` without losing meaning
pub(super) fn coerce(target: FieldType, value: &Value) -> Option<Value> {
    match (target, value) {
        (FieldType::Number, Value::String(s)) => parse_number(s.trim()),
        (FieldType::Integer, Value::String(s)) => {
            let trimmed = s.trim();
            match trimmed.parse::<i64>() {
                Ok(i) => Some(Value::from(i)),
                Err(_) => round_to_integer(trimmed.parse::<f64>().ok()?),
            }
        }
        (FieldType::Integer, Value::Number(n)) => round_to_integer(n.as_f64()?),
        (FieldType::String, Value::Number(n)) => Some(Value::String(n.to_string())),
        (FieldType::String, Value::Bool(b)) => Some(Value::String(b.to_string())),
        (FieldType::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        (FieldType::Boolean, Value::Number(n)) => match n.as_f64()? {
            f if f == 0.0 => Some(Value::Bool(false)),
            f if f == 1.0 => Some(Value::Bool(true)),
            _ => None,
        },
        _ => None,
    }
}

fn parse_number(text: &str) -> Option<Value> {
    if let Ok(i) = text.parse::<i64>() {
        return Some(Value::from(i));
    }
    let f = text.parse::<f64>().ok().filter(|f| f.is_finite())?;
    serde_json::Number::from_f64(f).map(Value::Number)
}

fn round_to_integer(f: f64) -> Option<Value> {
    if !f.is_finite() || f.abs() > i64::MAX as f64 {
        return None;
    }
    Some(Value::from(f.round() as i64))
}

fn reason_for(violation: &Violation) -> String {
    match violation {
        Violation::Missing => "required field was missing".to_string(),
        other => other.to_string(),
    }
}

/// Repair a copy of `doc`.
///
/// Rules are visited parents-first, so a replaced parent object is in place
/// before its children are examined. Fields without rules are never touched.
pub(super) fn repair(schema: &Schema, doc: &Value) -> super::RepairResult {
    let mut data = doc.clone();
    let mut repairs = Vec::new();

    if !data.is_object() {
        repairs.push(RepairAction {
            path: ROOT_PATH.to_string(),
            old_value: Some(data.clone()),
            new_value: Value::Object(Map::new()),
            reason: "document root was not an object".to_string(),
        });
        data = Value::Object(Map::new());
    }

    for rule in schema.rules() {
        let Some((parent, key)) = parent_object_mut(&mut data, &rule.path) else {
            continue;
        };

        match parent.get(key) {
            None | Some(Value::Null) => {
                if rule.required {
                    let old_value = parent.get(key).cloned();
                    parent.insert(key.to_string(), rule.default.clone());
                    repairs.push(RepairAction {
                        path: rule.path.clone(),
                        old_value,
                        new_value: rule.default.clone(),
                        reason: reason_for(&Violation::Missing),
                    });
                }
            }
            Some(value) => {
                let Some(violation) = check_value(rule, value) else {
                    continue;
                };

                let coerced = matches!(violation, Violation::WrongType { .. })
                    .then(|| coerce(rule.field_type, value))
                    .flatten()
                    .filter(|candidate| check_value(rule, candidate).is_none());

                let (new_value, reason) = match coerced {
                    Some(candidate) => (candidate, format!("coerced: {violation}")),
                    None => (rule.default.clone(), reason_for(&violation)),
                };

                let old_value = parent.insert(key.to_string(), new_value.clone());
                repairs.push(RepairAction {
                    path: rule.path.clone(),
                    old_value,
                    new_value,
                    reason,
                });
            }
        }
    }

    super::RepairResult {
        success: true,
        repairs,
        data,
    }
}
