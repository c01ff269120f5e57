/*!
Schema-driven validation, corruption detection and repair of state documents.

[`StateValidator::validate`] takes the document by shared reference and can
never modify it. In-place normalisation is only available through
[`StateValidator::sanitize`], and [`StateValidator::repair_data`] always works
on a copy.
*/

mod corruption;
mod repair;

pub use corruption::{CorruptionReport, Severity};
pub use repair::{RepairAction, RepairResult};

use crate::schema::{parent_object, parent_object_mut, type_name, FieldRule, FieldType, Schema, ROOT_PATH};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// What is wrong with a single field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Violation {
    /// Required field is absent or null
    Missing,
    /// Value has the wrong JSON type
    WrongType { expected: FieldType, found: String },
    /// Numeric value outside the declared bounds
    OutOfRange {
        value: f64,
        min: Option<f64>,
        max: Option<f64>,
    },
    /// Value not in the declared enumeration
    NotAllowed,
    /// String or array longer than permitted
    TooLong { length: usize, max: usize },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::Missing => write!(f, "required field is missing"),
            Violation::WrongType { expected, found } => {
                write!(f, "expected {expected}, found {found}")
            }
            Violation::OutOfRange { value, min, max } => {
                write!(f, "value {value} is outside ")?;
                match (min, max) {
                    (Some(min), Some(max)) => write!(f, "[{min}, {max}]"),
                    (Some(min), None) => write!(f, "[{min}, ∞)"),
                    (None, Some(max)) => write!(f, "(-∞, {max}]"),
                    (None, None) => write!(f, "its bounds"),
                }
            }
            Violation::NotAllowed => write!(f, "value is not one of the allowed values"),
            Violation::TooLong { length, max } => {
                write!(f, "length {length} exceeds maximum {max}")
            }
        }
    }
}

/// A single schema violation found in a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    pub path: String,
    pub violation: Violation,
}

impl ValidationError {
    pub fn new<P: Into<String>>(path: P, violation: Violation) -> Self {
        Self {
            path: path.into(),
            violation,
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.violation)
    }
}

/// Outcome of a validation pass. Every violation is collected; validation
/// never stops at the first problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ValidationError>,
}

impl ValidationResult {
    fn from_errors(errors: Vec<ValidationError>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
        }
    }

    pub fn error_paths(&self) -> Vec<&str> {
        self.errors.iter().map(|e| e.path.as_str()).collect()
    }
}

/// Check a present, non-null value against a rule.
///
/// Type is checked first; range, enumeration and length only apply to values
/// of the right type.
pub(crate) fn check_value(rule: &FieldRule, value: &Value) -> Option<Violation> {
    if !rule.field_type.matches(value) {
        return Some(Violation::WrongType {
            expected: rule.field_type,
            found: type_name(value).to_string(),
        });
    }

    if rule.field_type.is_numeric() {
        let number = value.as_f64()?;
        let below = rule.min.is_some_and(|min| number < min);
        let above = rule.max.is_some_and(|max| number > max);
        if below || above {
            return Some(Violation::OutOfRange {
                value: number,
                min: rule.min,
                max: rule.max,
            });
        }
    }

    if let Some(allowed) = &rule.allowed {
        if !allowed.contains(value) {
            return Some(Violation::NotAllowed);
        }
    }

    if let Some(max) = rule.max_length {
        let length = match value {
            Value::String(s) => s.chars().count(),
            Value::Array(items) => items.len(),
            _ => 0,
        };
        if length > max {
            return Some(Violation::TooLong { length, max });
        }
    }

    None
}

/// Validates, sanitizes and repairs documents against a [`Schema`]
///
/// # Example
/// ```rust
/// use keepsake_core::schema::{FieldRule, Schema};
/// use keepsake_core::StateValidator;
/// use serde_json::json;
///
/// let schema = Schema::new("1.0.0", vec![FieldRule::number("jade").required().min(0.0)])?;
/// let validator = StateValidator::new(schema);
///
/// let result = validator.validate(&json!({"jade": -5}));
/// assert!(!result.is_valid);
///
/// let repaired = validator.repair_data(&json!({"jade": -5}));
/// assert_eq!(repaired.data["jade"], json!(0));
/// # Ok::<(), keepsake_core::KeepsakeError>(())
/// ```
#[derive(Debug, Clone)]
pub struct StateValidator {
    schema: Schema,
}

impl StateValidator {
    pub fn new(schema: Schema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Walk every rule and collect all violations
    pub fn validate(&self, doc: &Value) -> ValidationResult {
        if !doc.is_object() {
            return ValidationResult::from_errors(vec![ValidationError::new(
                ROOT_PATH,
                Violation::WrongType {
                    expected: FieldType::Object,
                    found: type_name(doc).to_string(),
                },
            )]);
        }

        let mut errors = Vec::new();
        for rule in self.schema.rules() {
            // Rules are parents-first; a broken or absent parent has already
            // been reported (or is optional), so its children are skipped.
            let Some((parent, key)) = parent_object(doc, &rule.path) else {
                continue;
            };
            match parent.get(key) {
                None | Some(Value::Null) => {
                    if rule.required {
                        errors.push(ValidationError::new(&rule.path, Violation::Missing));
                    }
                }
                Some(value) => {
                    if let Some(violation) = check_value(rule, value) {
                        errors.push(ValidationError::new(&rule.path, violation));
                    }
                }
            }
        }

        ValidationResult::from_errors(errors)
    }

    /// Normalise `doc` in place, then validate it.
    ///
    /// Coercible values are converted (`"42"` to `42`), numbers are clamped
    /// into range and over-long strings are truncated. Missing fields are
    /// left alone; filling them is repair's job.
    pub fn sanitize(&self, doc: &mut Value) -> ValidationResult {
        for rule in self.schema.rules() {
            let Some((parent, key)) = parent_object_mut(doc, &rule.path) else {
                continue;
            };
            let Some(value) = parent.get_mut(key) else {
                continue;
            };
            if value.is_null() || check_value(rule, value).is_none() {
                continue;
            }

            if !rule.field_type.matches(value) {
                match repair::coerce(rule.field_type, value) {
                    Some(coerced) => *value = coerced,
                    None => continue,
                }
            }
            if let Some(clamped) = clamp(rule, value) {
                *value = clamped;
            }
        }

        self.validate(doc)
    }

    /// Structural damage check, stronger than [`validate`](Self::validate)
    pub fn check_corruption(&self, doc: &Value) -> CorruptionReport {
        corruption::inspect(&self.schema, doc)
    }

    /// Repair a copy of `doc`, substituting defaults for invalid fields
    pub fn repair_data(&self, doc: &Value) -> RepairResult {
        let result = repair::repair(&self.schema, doc);
        let success = self.validate(&result.data).is_valid;
        RepairResult { success, ..result }
    }
}

fn clamp(rule: &FieldRule, value: &Value) -> Option<Value> {
    match value {
        Value::Number(_) if rule.field_type.is_numeric() => {
            let number = value.as_f64()?;
            let mut clamped = number;
            if let Some(min) = rule.min {
                clamped = clamped.max(min);
            }
            if let Some(max) = rule.max {
                clamped = clamped.min(max);
            }
            if clamped == number {
                return None;
            }
            if rule.field_type == FieldType::Integer {
                let lower = rule.min.map(f64::ceil).unwrap_or(f64::MIN);
                let upper = rule.max.map(f64::floor).unwrap_or(f64::MAX);
                let whole = clamped.round().clamp(lower, upper);
                Some(Value::from(whole as i64))
            } else {
                serde_json::Number::from_f64(clamped).map(Value::Number)
            }
        }
        Value::String(s) => {
            let max = rule.max_length?;
            (s.chars().count() > max).then(|| Value::String(s.chars().take(max).collect()))
        }
        Value::Array(items) => {
            let max = rule.max_length?;
            (items.len() > max).then(|| Value::Array(items[..max].to_vec()))
        }
        _ => None,
    }
}
