// ABOUTME: In-memory entity snapshots: field name to scalar value at a point in time
// ABOUTME: Built from JSON rows whose foreign keys are already reduced to global identifiers

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde_json::{Map, Value};

use crate::error::{Result, SyncError};

/// Suffix marking a field that holds a reference to another entity.
pub const REFERENCE_SUFFIX: &str = "Uuid";

const TIMESTAMP_OUTPUT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    /// Wall-clock time in the host's local zone.
    Timestamp(NaiveDateTime),
    /// Global identifier of a referenced entity.
    Reference(String),
    /// Anything without a canonical scalar form (JSON arrays and objects).
    Unsupported(Value),
}

impl FieldValue {
    fn to_json(&self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Text(s) | FieldValue::Reference(s) => Value::String(s.clone()),
            FieldValue::Integer(i) => Value::from(*i),
            FieldValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(f.to_string())),
            FieldValue::Boolean(b) => Value::Bool(*b),
            FieldValue::Timestamp(ts) => {
                Value::String(ts.format(TIMESTAMP_OUTPUT_FORMAT).to_string())
            }
            FieldValue::Unsupported(v) => v.clone(),
        }
    }
}

/// Projection of one domain row. Field iteration order is by name.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySnapshot {
    entity_type: String,
    fields: BTreeMap<String, FieldValue>,
}

impl EntitySnapshot {
    pub fn new(entity_type: &str) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: FieldValue) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: FieldValue) {
        self.fields.insert(name.to_string(), value);
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Build a snapshot from a JSON object.
    ///
    /// Fields ending in `Uuid` are treated as references and reduced to the bare
    /// identifier, accepting either `abc-123` or the decomposed `Person(abc-123)`
    /// form. Timestamp fields arrive as strings and are resolved against the
    /// entity registry during canonicalization.
    pub fn from_json(entity_type: &str, row: &Value) -> Result<Self> {
        let object = row.as_object().ok_or_else(|| {
            SyncError::type_error(entity_type, "<root>", "snapshot must be a JSON object")
        })?;
        let mut snapshot = Self::new(entity_type);
        for (name, value) in object {
            let field = if name.ends_with(REFERENCE_SUFFIX) {
                reference_from_json(entity_type, name, value)?
            } else {
                scalar_from_json(value)
            };
            snapshot.fields.insert(name.clone(), field);
        }
        Ok(snapshot)
    }

    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        for (name, value) in &self.fields {
            object.insert(name.clone(), value.to_json());
        }
        Value::Object(object)
    }
}

fn scalar_from_json(value: &Value) -> FieldValue {
    match value {
        Value::Null => FieldValue::Null,
        Value::Bool(b) => FieldValue::Boolean(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                FieldValue::Integer(i)
            } else if n.is_u64() {
                // beyond i64; keep the exact digits
                FieldValue::Text(n.to_string())
            } else {
                FieldValue::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => FieldValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => FieldValue::Unsupported(value.clone()),
    }
}

fn reference_from_json(entity_type: &str, field: &str, value: &Value) -> Result<FieldValue> {
    match value {
        Value::Null => Ok(FieldValue::Null),
        // blank and null references normalize alike
        Value::String(raw) if raw.trim().is_empty() => Ok(FieldValue::Null),
        Value::String(raw) => decompose_reference(raw)
            .map(|uuid| FieldValue::Reference(uuid.to_string()))
            .ok_or_else(|| {
                SyncError::type_error(entity_type, field, format!("invalid reference '{raw}'"))
            }),
        other => Err(SyncError::type_error(
            entity_type,
            field,
            format!("reference must be a string, got {other}"),
        )),
    }
}

/// Extracts the identifier from `Type(identifier)` or a bare identifier.
pub fn decompose_reference(raw: &str) -> Option<&str> {
    let raw = raw.trim();
    let identifier = match raw.strip_suffix(')') {
        Some(head) => {
            let open = head.find('(')?;
            if open == 0 {
                return None;
            }
            &head[open + 1..]
        }
        None => raw,
    };
    let identifier = identifier.trim();
    if identifier.is_empty() || identifier.contains(['(', ')']) {
        return None;
    }
    Some(identifier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_maps_scalars() {
        let snapshot = EntitySnapshot::from_json(
            "person",
            &json!({
                "gender": "M",
                "age": 30,
                "weight": 72.5,
                "dead": false,
                "deathDate": null,
                "names": ["a", "b"],
            }),
        )
        .unwrap();
        assert_eq!(snapshot.get("gender"), Some(&FieldValue::Text("M".into())));
        assert_eq!(snapshot.get("age"), Some(&FieldValue::Integer(30)));
        assert_eq!(snapshot.get("weight"), Some(&FieldValue::Float(72.5)));
        assert_eq!(snapshot.get("dead"), Some(&FieldValue::Boolean(false)));
        assert_eq!(snapshot.get("deathDate"), Some(&FieldValue::Null));
        assert!(matches!(snapshot.get("names"), Some(FieldValue::Unsupported(_))));
    }

    #[test]
    fn test_from_json_decomposes_references() {
        let snapshot = EntitySnapshot::from_json(
            "visit",
            &json!({
                "patientUuid": "org.openmrs.Patient(2b3a9c1e-0001)",
                "locationUuid": "8d6c993e-c2cc-11de",
                "changedByUuid": null,
            }),
        )
        .unwrap();
        assert_eq!(
            snapshot.get("patientUuid"),
            Some(&FieldValue::Reference("2b3a9c1e-0001".into()))
        );
        assert_eq!(
            snapshot.get("locationUuid"),
            Some(&FieldValue::Reference("8d6c993e-c2cc-11de".into()))
        );
        assert_eq!(snapshot.get("changedByUuid"), Some(&FieldValue::Null));
    }

    #[test]
    fn test_from_json_rejects_bad_references() {
        let err = EntitySnapshot::from_json("visit", &json!({"patientUuid": 12})).unwrap_err();
        assert!(matches!(err, SyncError::Type { .. }));
        let err = EntitySnapshot::from_json("visit", &json!({"patientUuid": "Patient()"}))
            .unwrap_err();
        assert!(err.to_string().contains("patientUuid"));
    }

    #[test]
    fn test_from_json_requires_object() {
        assert!(EntitySnapshot::from_json("visit", &json!([1, 2])).is_err());
    }

    #[test]
    fn test_decompose_reference() {
        assert_eq!(decompose_reference("Person(abc)"), Some("abc"));
        assert_eq!(decompose_reference(" abc "), Some("abc"));
        assert_eq!(decompose_reference("(abc)"), None);
        assert_eq!(decompose_reference(""), None);
    }

    #[test]
    fn test_to_json_renders_timestamps() {
        let ts = NaiveDateTime::parse_from_str("2024-03-01 10:15:00", "%Y-%m-%d %H:%M:%S")
            .unwrap();
        let snapshot = EntitySnapshot::new("visit")
            .with_field("dateStarted", FieldValue::Timestamp(ts))
            .with_field("locationUuid", FieldValue::Reference("loc-1".into()));
        let value = snapshot.to_json();
        assert_eq!(value["dateStarted"], "2024-03-01T10:15:00.000");
        assert_eq!(value["locationUuid"], "loc-1");
    }
}
