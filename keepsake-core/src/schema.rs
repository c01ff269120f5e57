/*!
Data-driven schema describing the fields of a state document.

A schema is a flat list of [`FieldRule`]s addressed by dotted paths
(`"qi.level"`). The validator interprets the rules; no per-field code is
written for any particular document shape.
*/

use crate::{KeepsakeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Path label used when a violation concerns the document root itself.
pub const ROOT_PATH: &str = "$";

/// Primitive or container type a field must hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
}

impl FieldType {
    /// Whether `value` has this type. Integers accept whole-valued floats.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Integer => match value {
                Value::Number(n) => {
                    n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
                }
                _ => false,
            },
            FieldType::Boolean => value.is_boolean(),
            FieldType::Object => value.is_object(),
            FieldType::Array => value.is_array(),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldType::Number | FieldType::Integer)
    }

    pub fn is_container(&self) -> bool {
        matches!(self, FieldType::Object | FieldType::Array)
    }

    pub fn name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Integer => "integer",
            FieldType::Boolean => "boolean",
            FieldType::Object => "object",
            FieldType::Array => "array",
        }
    }

    /// Neutral default used when a rule does not declare one
    pub fn zero_value(&self) -> Value {
        match self {
            FieldType::String => Value::String(String::new()),
            FieldType::Number | FieldType::Integer => Value::from(0),
            FieldType::Boolean => Value::Bool(false),
            FieldType::Object => Value::Object(Map::new()),
            FieldType::Array => Value::Array(Vec::new()),
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// JSON-level type name of a value, for diagnostics
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Declarative constraint on a single field of the document
///
/// # Example
/// ```rust
/// use keepsake_core::schema::FieldRule;
/// use serde_json::json;
///
/// let level = FieldRule::integer("qi.level")
///     .required()
///     .range(1.0, 100.0)
///     .default_value(json!(1));
/// assert_eq!(level.depth(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldRule {
    /// Dotted path from the document root
    pub path: String,

    #[serde(rename = "type")]
    pub field_type: FieldType,

    #[serde(default)]
    pub required: bool,

    /// Inclusive lower bound for numeric fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,

    /// Inclusive upper bound for numeric fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,

    /// Enumerated set of permitted values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,

    /// Maximum character count (strings) or element count (arrays)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,

    /// Value substituted on repair. Defaults to the type's zero value.
    #[serde(default)]
    pub default: Value,
}

impl FieldRule {
    pub fn new<P: Into<String>>(path: P, field_type: FieldType) -> Self {
        Self {
            path: path.into(),
            field_type,
            required: false,
            min: None,
            max: None,
            allowed: None,
            max_length: None,
            default: field_type.zero_value(),
        }
    }

    pub fn string<P: Into<String>>(path: P) -> Self {
        Self::new(path, FieldType::String)
    }

    pub fn number<P: Into<String>>(path: P) -> Self {
        Self::new(path, FieldType::Number)
    }

    pub fn integer<P: Into<String>>(path: P) -> Self {
        Self::new(path, FieldType::Integer)
    }

    pub fn boolean<P: Into<String>>(path: P) -> Self {
        Self::new(path, FieldType::Boolean)
    }

    pub fn object<P: Into<String>>(path: P) -> Self {
        Self::new(path, FieldType::Object)
    }

    pub fn array<P: Into<String>>(path: P) -> Self {
        Self::new(path, FieldType::Array)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    pub fn range(self, min: f64, max: f64) -> Self {
        self.min(min).max(max)
    }

    pub fn allowed<I: IntoIterator<Item = Value>>(mut self, values: I) -> Self {
        self.allowed = Some(values.into_iter().collect());
        self
    }

    pub fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn default_value(mut self, default: Value) -> Self {
        self.default = default;
        self
    }

    /// Number of path segments (`"a"` is 1, `"a.b"` is 2)
    pub fn depth(&self) -> usize {
        self.path.split('.').count()
    }

    /// Fields that may never legitimately be negative
    pub fn is_non_negative(&self) -> bool {
        self.field_type.is_numeric() && self.min.is_some_and(|min| min >= 0.0)
    }
}

/// On-disk representation of a schema
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SchemaDefinition {
    version: String,
    fields: Vec<FieldRule>,
}

/// Validated, ordered set of field rules plus the document version it describes
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    version: String,
    rules: Vec<FieldRule>,
}

impl Schema {
    /// Build a schema, checking that every rule is self-consistent.
    ///
    /// Intermediate path segments without an explicit rule get an implicit
    /// object rule (required when any descendant is required). Rules are
    /// ordered parents-first so a single pass over them can repair a document.
    pub fn new<V: Into<String>>(version: V, rules: Vec<FieldRule>) -> Result<Self> {
        let version = version.into();
        if version.trim().is_empty() {
            return Err(KeepsakeError::invalid_schema("schema version cannot be empty"));
        }

        let mut by_path: BTreeMap<String, FieldRule> = BTreeMap::new();
        for mut rule in rules {
            if rule.default.is_null() {
                rule.default = rule.field_type.zero_value();
            }
            check_rule(&rule)?;
            if by_path.contains_key(&rule.path) {
                return Err(KeepsakeError::invalid_schema(format!(
                    "duplicate rule for path '{}'",
                    rule.path
                )));
            }
            by_path.insert(rule.path.clone(), rule);
        }

        let mut implicit: BTreeMap<String, bool> = BTreeMap::new();
        for rule in by_path.values() {
            let segments: Vec<&str> = rule.path.split('.').collect();
            for end in 1..segments.len() {
                let prefix = segments[..end].join(".");
                match by_path.get(&prefix) {
                    Some(parent) if parent.field_type != FieldType::Object => {
                        return Err(KeepsakeError::invalid_schema(format!(
                            "'{}' has child rules but is declared as {}",
                            prefix, parent.field_type
                        )));
                    }
                    Some(_) => {}
                    None => {
                        let required = implicit.entry(prefix).or_insert(false);
                        *required |= rule.required;
                    }
                }
            }
        }
        for (path, required) in implicit {
            let mut rule = FieldRule::object(path);
            rule.required = required;
            by_path.insert(rule.path.clone(), rule);
        }

        let mut rules: Vec<FieldRule> = by_path.into_values().collect();
        rules.sort_by_key(FieldRule::depth);

        Ok(Self { version, rules })
    }

    /// Schema with no field rules; every object document is valid
    pub fn empty<V: Into<String>>(version: V) -> Self {
        Self {
            version: version.into(),
            rules: Vec::new(),
        }
    }

    /// Parse a schema from `{"version": "...", "fields": [...]}`
    pub fn from_json(json: &str) -> Result<Self> {
        let definition: SchemaDefinition = serde_json::from_str(json)?;
        Self::new(definition.version, definition.fields)
    }

    pub fn to_json(&self) -> Result<String> {
        let definition = SchemaDefinition {
            version: self.version.clone(),
            fields: self.rules.clone(),
        };
        Ok(serde_json::to_string_pretty(&definition)?)
    }

    /// Version stamped on every record written under this schema
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Rules ordered parents-first
    pub fn rules(&self) -> &[FieldRule] {
        &self.rules
    }

    pub fn rule(&self, path: &str) -> Option<&FieldRule> {
        self.rules.iter().find(|rule| rule.path == path)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn check_rule(rule: &FieldRule) -> Result<()> {
    if rule.path.is_empty() || rule.path.split('.').any(str::is_empty) {
        return Err(KeepsakeError::invalid_schema(format!(
            "invalid field path '{}'",
            rule.path
        )));
    }
    if (rule.min.is_some() || rule.max.is_some()) && !rule.field_type.is_numeric() {
        return Err(KeepsakeError::invalid_schema(format!(
            "'{}' declares numeric bounds on a {} field",
            rule.path, rule.field_type
        )));
    }
    if let (Some(min), Some(max)) = (rule.min, rule.max) {
        if min > max {
            return Err(KeepsakeError::invalid_schema(format!(
                "'{}' has min {} greater than max {}",
                rule.path, min, max
            )));
        }
    }
    if let Some(violation) = crate::validator::check_value(rule, &rule.default) {
        return Err(KeepsakeError::invalid_schema(format!(
            "default for '{}' is itself invalid: {}",
            rule.path, violation
        )));
    }
    Ok(())
}

/// Resolve a dotted path to a value
pub fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(doc, |current, segment| current.as_object()?.get(segment))
}

/// The object that holds the last segment of `path`, plus that segment.
/// `None` when any ancestor is missing or is not an object.
pub(crate) fn parent_object<'d, 'p>(
    doc: &'d Value,
    path: &'p str,
) -> Option<(&'d Map<String, Value>, &'p str)> {
    let (parent, key) = match path.rsplit_once('.') {
        Some((parent, key)) => (lookup(doc, parent)?, key),
        None => (doc, path),
    };
    parent.as_object().map(|map| (map, key))
}

pub(crate) fn parent_object_mut<'d, 'p>(
    doc: &'d mut Value,
    path: &'p str,
) -> Option<(&'d mut Map<String, Value>, &'p str)> {
    let (parent_path, key) = match path.rsplit_once('.') {
        Some((parent, key)) => (Some(parent), key),
        None => (None, path),
    };
    let mut current = doc;
    if let Some(parent_path) = parent_path {
        for segment in parent_path.split('.') {
            current = current.as_object_mut()?.get_mut(segment)?;
        }
    }
    current.as_object_mut().map(|map| (map, key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rules_are_ordered_parents_first() {
        let schema = Schema::new(
            "1.0.0",
            vec![
                FieldRule::integer("qi.level").required().range(1.0, 10.0).default_value(json!(1)),
                FieldRule::object("qi").required(),
                FieldRule::number("jade").required().min(0.0),
            ],
        )
        .unwrap();

        let depths: Vec<usize> = schema.rules().iter().map(FieldRule::depth).collect();
        let mut sorted = depths.clone();
        sorted.sort();
        assert_eq!(depths, sorted);
    }

    #[test]
    fn test_implicit_parent_rules() {
        let schema = Schema::new(
            "1.0.0",
            vec![FieldRule::string("profile.settings.theme").required()],
        )
        .unwrap();

        let profile = schema.rule("profile").unwrap();
        assert_eq!(profile.field_type, FieldType::Object);
        assert!(profile.required);
        assert!(schema.rule("profile.settings").unwrap().required);
    }

    #[test]
    fn test_invalid_default_is_rejected() {
        let result = Schema::new(
            "1.0.0",
            vec![FieldRule::integer("level").range(1.0, 100.0)],
        );
        assert!(matches!(result, Err(KeepsakeError::InvalidSchema(_))));
    }

    #[test]
    fn test_duplicate_and_malformed_paths() {
        let duplicate = Schema::new(
            "1.0.0",
            vec![FieldRule::number("a"), FieldRule::number("a")],
        );
        assert!(duplicate.is_err());

        let malformed = Schema::new("1.0.0", vec![FieldRule::number("a..b")]);
        assert!(malformed.is_err());
    }

    #[test]
    fn test_child_of_primitive_rejected() {
        let result = Schema::new(
            "1.0.0",
            vec![FieldRule::number("a"), FieldRule::number("a.b")],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_schema_json_roundtrip() {
        let json = r#"{
            "version": "2.1.0",
            "fields": [
                {"path": "jade", "type": "number", "required": true, "min": 0},
                {"path": "realm", "type": "string", "allowed": ["mortal", "immortal"], "default": "mortal"}
            ]
        }"#;
        let schema = Schema::from_json(json).unwrap();
        assert_eq!(schema.version(), "2.1.0");
        assert_eq!(schema.rules().len(), 2);

        let reparsed = Schema::from_json(&schema.to_json().unwrap()).unwrap();
        assert_eq!(schema, reparsed);
    }

    #[test]
    fn test_lookup_and_parent_object() {
        let doc = json!({"qi": {"level": 3}, "jade": 10});
        assert_eq!(lookup(&doc, "qi.level"), Some(&json!(3)));
        assert_eq!(lookup(&doc, "qi.missing"), None);
        assert_eq!(lookup(&doc, "jade.x"), None);

        let (parent, key) = parent_object(&doc, "qi.level").unwrap();
        assert_eq!(key, "level");
        assert!(parent.contains_key("level"));
        assert!(parent_object(&doc, "jade.x").is_none());
    }

    #[test]
    fn test_integer_accepts_whole_floats() {
        assert!(FieldType::Integer.matches(&json!(3)));
        assert!(FieldType::Integer.matches(&json!(3.0)));
        assert!(!FieldType::Integer.matches(&json!(3.5)));
        assert!(!FieldType::Integer.matches(&json!("3")));
    }
}
