use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncOperation {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown sync operation: {0}")]
pub struct ParseOperationError(pub String);

impl SyncOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOperation::Insert => "INSERT",
            SyncOperation::Update => "UPDATE",
            SyncOperation::Delete => "DELETE",
        }
    }
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncOperation {
    type Err = ParseOperationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "INSERT" => Ok(SyncOperation::Insert),
            "UPDATE" => Ok(SyncOperation::Update),
            "DELETE" => Ok(SyncOperation::Delete),
            other => Err(ParseOperationError(other.to_string())),
        }
    }
}

/// One entity change to be replicated to another site.
///
/// The JSON body uses the field names `tableName`, `operation`, `sourceSite`,
/// `globalIdentifier` and `payload`. Events are never mutated once enqueued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    pub table_name: String,
    pub operation: SyncOperation,
    pub source_site: String,
    pub global_identifier: String,
    /// Post-change entity state; absent for deletes.
    pub payload: Option<Value>,
}

impl SyncEvent {
    pub fn delete(table_name: &str, source_site: &str, global_identifier: &str) -> Self {
        Self {
            table_name: table_name.to_string(),
            operation: SyncOperation::Delete,
            source_site: source_site.to_string(),
            global_identifier: global_identifier.to_string(),
            payload: None,
        }
    }

    pub fn to_body(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_body(body: &str) -> serde_json::Result<Self> {
        serde_json::from_str(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn body_uses_wire_field_names() {
        let event = SyncEvent {
            table_name: "person".into(),
            operation: SyncOperation::Update,
            source_site: "remote-1".into(),
            global_identifier: "0001".into(),
            payload: Some(json!({"name": "Bob"})),
        };
        let body: Value = serde_json::from_str(&event.to_body().unwrap()).unwrap();
        assert_eq!(body["tableName"], "person");
        assert_eq!(body["operation"], "UPDATE");
        assert_eq!(body["sourceSite"], "remote-1");
        // leading zeros survive: the identifier stays a string
        assert_eq!(body["globalIdentifier"], json!("0001"));
        assert_eq!(SyncEvent::from_body(&event.to_body().unwrap()).unwrap(), event);
    }

    #[test]
    fn rejects_unknown_operation_tokens() {
        let body = r#"{"tableName":"t","operation":"UPSERT","sourceSite":"s","globalIdentifier":"g","payload":null}"#;
        assert!(SyncEvent::from_body(body).is_err());
        assert!("insert".parse::<SyncOperation>().is_err());
        assert_eq!("DELETE".parse::<SyncOperation>().unwrap(), SyncOperation::Delete);
    }

    #[test]
    fn delete_has_no_payload() {
        let event = SyncEvent::delete("person", "site-a", "abc");
        assert_eq!(event.operation, SyncOperation::Delete);
        assert!(event.payload.is_none());
    }
}
