/*!
Corruption detection: a stricter diagnosis than validation.

An out-of-range level is a validation problem; a missing top-level block, a
NaN, a negative counter or a string where a number belongs is corruption.
*/

use crate::schema::{parent_object, type_name, FieldType, Schema};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// How badly a document is damaged
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    None,
    Minor,
    Moderate,
    Severe,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::None => "none",
            Severity::Minor => "minor",
            Severity::Moderate => "moderate",
            Severity::Severe => "severe",
        };
        f.write_str(name)
    }
}

/// Result of [`StateValidator::check_corruption`](super::StateValidator::check_corruption)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorruptionReport {
    pub is_corrupted: bool,
    pub severity: Severity,
    pub issues: Vec<String>,
}

impl CorruptionReport {
    pub fn clean() -> Self {
        Self {
            is_corrupted: false,
            severity: Severity::None,
            issues: Vec::new(),
        }
    }
}

const WEIGHT_MISSING_BLOCK: u32 = 3;
const WEIGHT_TOP_LEVEL: u32 = 2;
const WEIGHT_NESTED: u32 = 1;

/// Text values a JavaScript-era writer leaves behind for non-finite numbers
const NON_FINITE_MARKERS: [&str; 4] = ["NaN", "Infinity", "+Infinity", "-Infinity"];

pub(super) fn inspect(schema: &Schema, doc: &Value) -> CorruptionReport {
    if !doc.is_object() {
        return CorruptionReport {
            is_corrupted: true,
            severity: Severity::Severe,
            issues: vec![format!(
                "document root is {}, expected object",
                type_name(doc)
            )],
        };
    }

    let mut issues = Vec::new();
    let mut score = 0u32;
    let mut missing_block = false;

    for rule in schema.rules() {
        let Some((parent, key)) = parent_object(doc, &rule.path) else {
            continue;
        };
        let depth = rule.depth();
        let weight = if depth == 1 { WEIGHT_TOP_LEVEL } else { WEIGHT_NESTED };
        let value = parent.get(key);

        if depth == 1 && rule.required && rule.field_type == FieldType::Object {
            match value {
                Some(v) if v.is_object() => {}
                Some(v) if !v.is_null() => {
                    missing_block = true;
                    score += WEIGHT_MISSING_BLOCK;
                    issues.push(format!(
                        "required block '{}' is {} instead of an object",
                        rule.path,
                        type_name(v)
                    ));
                    continue;
                }
                _ => {
                    missing_block = true;
                    score += WEIGHT_MISSING_BLOCK;
                    issues.push(format!("required block '{}' is missing", rule.path));
                    continue;
                }
            }
        }

        let Some(value) = value else {
            continue;
        };

        if rule.field_type.is_numeric() {
            match value {
                Value::Null => {
                    score += weight;
                    issues.push(format!("'{}' is NaN or null", rule.path));
                }
                Value::String(s) if NON_FINITE_MARKERS.contains(&s.trim()) => {
                    score += weight;
                    issues.push(format!("'{}' is NaN ({s:?})", rule.path));
                }
                Value::Number(n) => {
                    let negative = n.as_f64().is_some_and(|f| f < 0.0);
                    if negative && rule.is_non_negative() {
                        score += weight;
                        issues.push(format!(
                            "'{}' is negative ({n}) but must be non-negative",
                            rule.path
                        ));
                    }
                }
                other => {
                    score += weight;
                    issues.push(format!(
                        "'{}' has type {}, expected {}",
                        rule.path,
                        type_name(other),
                        rule.field_type
                    ));
                }
            }
        } else if !value.is_null() && !rule.field_type.matches(value) {
            score += weight;
            issues.push(format!(
                "'{}' has type {}, expected {}",
                rule.path,
                type_name(value),
                rule.field_type
            ));
        }
    }

    let severity = if missing_block {
        Severity::Severe
    } else {
        match score {
            0 => Severity::None,
            1..=2 => Severity::Minor,
            3..=5 => Severity::Moderate,
            _ => Severity::Severe,
        }
    };

    CorruptionReport {
        is_corrupted: !issues.is_empty(),
        severity,
        issues,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldRule;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::new(
            "1.0.0",
            vec![
                FieldRule::object("meta").required(),
                FieldRule::number("jade").required().min(0.0),
                FieldRule::number("spiritCrystals").required().min(0.0),
                FieldRule::object("qi").required(),
                FieldRule::integer("qi.level").required().range(1.0, 100.0).default_value(json!(1)),
                FieldRule::number("qi.current").min(0.0),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_clean_document() {
        let doc = json!({"meta": {}, "jade": 1, "spiritCrystals": 2, "qi": {"level": 3}});
        assert_eq!(inspect(&schema(), &doc), CorruptionReport::clean());
    }

    #[test]
    fn test_out_of_range_is_not_corruption() {
        let doc = json!({"meta": {}, "jade": 1, "spiritCrystals": 2, "qi": {"level": 300}});
        assert!(!inspect(&schema(), &doc).is_corrupted);
    }

    #[test]
    fn test_nested_negative_is_minor() {
        let doc = json!({"meta": {}, "jade": 1, "spiritCrystals": 2, "qi": {"level": 3, "current": -4}});
        let report = inspect(&schema(), &doc);
        assert!(report.is_corrupted);
        assert_eq!(report.severity, Severity::Minor);
    }

    #[test]
    fn test_top_level_issues_escalate() {
        let doc = json!({"meta": {}, "jade": -1, "spiritCrystals": "lots", "qi": {"level": 3}});
        let report = inspect(&schema(), &doc);
        assert_eq!(report.issues.len(), 2);
        assert_eq!(report.severity, Severity::Moderate);
    }

    #[test]
    fn test_nan_markers() {
        let doc = json!({"meta": {}, "jade": "NaN", "spiritCrystals": null, "qi": {"level": 3}});
        let report = inspect(&schema(), &doc);
        assert_eq!(report.issues.len(), 2);
        assert!(report.issues.iter().all(|issue| issue.contains("NaN")));
    }

    #[test]
    fn test_missing_block_is_severe() {
        let doc = json!({"jade": 1, "spiritCrystals": 2, "qi": {"level": 3}});
        let report = inspect(&schema(), &doc);
        assert_eq!(report.severity, Severity::Severe);
        assert!(report.issues[0].contains("meta"));
    }

    #[test]
    fn test_non_object_root() {
        let report = inspect(&schema(), &json!("garbage"));
        assert_eq!(report.severity, Severity::Severe);
    }
}
