// ABOUTME: Canonicalizer - reduces entity snapshots to a deterministic payload and content hash
// ABOUTME: Drops nulls, resolves timestamps to epoch millis, sorts by field name, trims values

use std::sync::Arc;

use chrono::{Local, NaiveDateTime, TimeZone};
use md5::{Digest, Md5};

use super::registry::{EntityDescriptor, EntityRegistry};
use super::snapshot::{EntitySnapshot, FieldValue};
use crate::error::{Result, SyncError};

const TIMESTAMP_INPUT_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Digest of arbitrary bytes as 32 lowercase hex characters.
pub fn digest_hex(bytes: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Turns snapshots into canonical payloads and content hashes.
///
/// Pure and side-effect free; cheap to clone and safe to share across threads
/// since the registry is immutable after startup.
#[derive(Debug, Clone)]
pub struct Canonicalizer {
    registry: Arc<EntityRegistry>,
}

impl Canonicalizer {
    pub fn new(registry: Arc<EntityRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// Reduce a snapshot to its canonical payload string.
    ///
    /// Null fields are dropped, references contribute their identifier,
    /// timestamps their epoch milliseconds in the host zone, and every remaining
    /// value is stringified and trimmed. Values are concatenated in field-name
    /// order with no delimiter, so distinct snapshots may share a payload
    /// (e.g. `{a: "12", b: "3"}` and `{a: "1", b: "23"}`). Stored hashes depend
    /// on this exact layout.
    pub fn canonicalize(&self, snapshot: &EntitySnapshot) -> Result<String> {
        let descriptor = self.registry.require(snapshot.entity_type())?;
        let mut payload = String::new();
        for (name, value) in snapshot.fields() {
            if let Some(normalized) = normalize_field(descriptor, name, value)? {
                payload.push_str(normalized.trim());
            }
        }
        Ok(payload)
    }

    pub fn hash(&self, snapshot: &EntitySnapshot) -> Result<String> {
        let payload = self.canonicalize(snapshot)?;
        Ok(digest_hex(payload.as_bytes()))
    }
}

fn normalize_field(
    descriptor: &EntityDescriptor,
    name: &str,
    value: &FieldValue,
) -> Result<Option<String>> {
    let entity_type = descriptor.name();
    if descriptor.is_timestamp_field(name) {
        return match value {
            FieldValue::Null => Ok(None),
            FieldValue::Text(raw) if raw.trim().is_empty() => Ok(None),
            FieldValue::Timestamp(ts) => epoch_millis(entity_type, name, ts).map(Some),
            FieldValue::Text(raw) => {
                let ts = parse_timestamp(raw).ok_or_else(|| {
                    SyncError::type_error(entity_type, name, format!("invalid timestamp '{raw}'"))
                })?;
                epoch_millis(entity_type, name, &ts).map(Some)
            }
            // already epoch millis
            FieldValue::Integer(millis) => Ok(Some(millis.to_string())),
            other => Err(SyncError::type_error(
                entity_type,
                name,
                format!("expected a timestamp, got {other:?}"),
            )),
        };
    }

    let normalized = match value {
        FieldValue::Null => return Ok(None),
        FieldValue::Text(s) | FieldValue::Reference(s) => s.clone(),
        FieldValue::Integer(i) => i.to_string(),
        FieldValue::Float(f) => format_float(*f),
        FieldValue::Boolean(b) => b.to_string(),
        FieldValue::Timestamp(ts) => epoch_millis(entity_type, name, ts)?,
        FieldValue::Unsupported(v) => {
            return Err(SyncError::type_error(
                entity_type,
                name,
                format!("unsupported value {v}"),
            ))
        }
    };
    Ok(Some(normalized))
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    TIMESTAMP_INPUT_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
}

fn epoch_millis(entity_type: &str, field: &str, ts: &NaiveDateTime) -> Result<String> {
    // Ambiguous wall-clock times (DST fall-back) take the earlier instant.
    Local
        .from_local_datetime(ts)
        .earliest()
        .map(|dt| dt.timestamp_millis().to_string())
        .ok_or_else(|| {
            SyncError::type_error(
                entity_type,
                field,
                format!("{ts} does not exist in the local time zone"),
            )
        })
}

fn format_float(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}
