/*!
Persistence primitives for serializing/deserializing checkpoints (used by
durable checkpointer backends).

Design goals:
- Provide explicit serde-facing structs decoupled from the in-memory
  representations, with deterministic (sorted) map ordering so stored
  payloads diff cleanly.
- Keep conversion logic localized (From / TryFrom impls) so backend code
  stays lean and declarative.

This module intentionally does NOT perform I/O. It is pure data
transformation and (de)serialization glue. Binary payloads inside channel
values are a backend concern (length-prefixing, compression, base64); the
core serializes JSON-native values only.
*/

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::checkpoint::{Checkpoint, CheckpointMetadata, PendingWrite, CHECKPOINT_SCHEMA_VERSION};
use crate::types::ChannelVersion;

/// Conversion and serialization errors for persistence models.
#[derive(Debug, Error, Diagnostic)]
pub enum PersistenceError {
    #[error("missing field: {0}")]
    #[diagnostic(
        code(stepgraph::persistence::missing_field),
        help("Populate the field in the persisted JSON before conversion.")
    )]
    MissingField(&'static str),

    #[error("unsupported checkpoint schema v{0}")]
    #[diagnostic(
        code(stepgraph::persistence::schema),
        help("Checkpoints newer than v4 cannot be loaded by this runtime.")
    )]
    UnsupportedSchema(u32),

    #[error("JSON serialization/deserialization failed: {source}")]
    #[diagnostic(code(stepgraph::persistence::serde))]
    Serde {
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Wire shape of a checkpoint: tagged JSON record with sorted maps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedCheckpoint {
    pub v: u32,
    pub id: String,
    pub ts: String,
    #[serde(default)]
    pub channel_values: BTreeMap<String, Value>,
    #[serde(default)]
    pub channel_versions: BTreeMap<String, ChannelVersion>,
    #[serde(default)]
    pub versions_seen: BTreeMap<String, BTreeMap<String, ChannelVersion>>,
}

/// Wire shape of checkpoint metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedMetadata {
    pub source: String,
    pub step: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writes: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    pub parents: BTreeMap<String, String>,
}

/// Wire shape of one pending write row. The index preserves caller order
/// and keys idempotent re-persistence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedWrite {
    pub task_id: String,
    pub index: usize,
    pub channel: String,
    pub value: Value,
}

impl PersistedWrite {
    #[must_use]
    pub fn from_pending(index: usize, write: &PendingWrite) -> Self {
        PersistedWrite {
            task_id: write.task_id.clone(),
            index,
            channel: write.channel.clone(),
            value: write.value.clone(),
        }
    }

    #[must_use]
    pub fn into_pending(self) -> PendingWrite {
        PendingWrite {
            task_id: self.task_id,
            channel: self.channel,
            value: self.value,
        }
    }
}

/* ---------- Checkpoint <-> PersistedCheckpoint ---------- */

impl From<&Checkpoint> for PersistedCheckpoint {
    fn from(cp: &Checkpoint) -> Self {
        PersistedCheckpoint {
            v: cp.v,
            id: cp.id.clone(),
            ts: cp.ts.clone(),
            channel_values: cp
                .channel_values
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            channel_versions: cp
                .channel_versions
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            versions_seen: cp
                .versions_seen
                .iter()
                .map(|(node, seen)| {
                    (
                        node.clone(),
                        seen.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                    )
                })
                .collect(),
        }
    }
}

impl TryFrom<PersistedCheckpoint> for Checkpoint {
    type Error = PersistenceError;

    fn try_from(p: PersistedCheckpoint) -> Result<Self> {
        if p.id.is_empty() {
            return Err(PersistenceError::MissingField("id"));
        }
        if p.v > CHECKPOINT_SCHEMA_VERSION {
            return Err(PersistenceError::UnsupportedSchema(p.v));
        }
        Ok(Checkpoint {
            v: p.v,
            id: p.id,
            ts: p.ts,
            channel_values: p.channel_values.into_iter().collect(),
            channel_versions: p.channel_versions.into_iter().collect(),
            versions_seen: p
                .versions_seen
                .into_iter()
                .map(|(node, seen)| (node, seen.into_iter().collect()))
                .collect(),
        })
    }
}

/* ---------- CheckpointMetadata <-> PersistedMetadata ---------- */

impl From<&CheckpointMetadata> for PersistedMetadata {
    fn from(m: &CheckpointMetadata) -> Self {
        let source = serde_json::to_value(m.source)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "loop".to_string());
        PersistedMetadata {
            source,
            step: m.step,
            writes: m
                .writes
                .as_ref()
                .map(|w| w.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
            parents: m
                .parents
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

impl TryFrom<PersistedMetadata> for CheckpointMetadata {
    type Error = PersistenceError;

    fn try_from(p: PersistedMetadata) -> Result<Self> {
        let source = serde_json::from_value(Value::String(p.source))
            .map_err(|source| PersistenceError::Serde { source })?;
        Ok(CheckpointMetadata {
            source,
            step: p.step,
            writes: p.writes.map(|w| w.into_iter().collect()),
            parents: p.parents.into_iter().collect(),
        })
    }
}

/// Serialize any persisted shape to a JSON string.
pub fn to_json_string<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|source| PersistenceError::Serde { source })
}

/// Deserialize any persisted shape from a JSON string.
pub fn from_json_str<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T> {
    serde_json::from_str(s).map_err(|source| PersistenceError::Serde { source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointSource;
    use serde_json::json;

    #[test]
    fn checkpoint_round_trips_through_wire_shape() {
        let mut cp = Checkpoint::empty();
        cp.channel_values.insert("count".into(), json!(3));
        cp.channel_versions
            .insert("count".into(), ChannelVersion::Int(2));
        cp.versions_seen.entry("worker".into()).or_default().insert(
            "count".into(),
            ChannelVersion::Int(2),
        );

        let wire = PersistedCheckpoint::from(&cp);
        let json = to_json_string(&wire).unwrap();
        let back: PersistedCheckpoint = from_json_str(&json).unwrap();
        let restored = Checkpoint::try_from(back).unwrap();
        assert_eq!(restored, cp);
    }

    #[test]
    fn metadata_source_round_trips_as_snake_case() {
        let meta = CheckpointMetadata::new(CheckpointSource::Input, -1);
        let wire = PersistedMetadata::from(&meta);
        assert_eq!(wire.source, "input");
        let back = CheckpointMetadata::try_from(wire).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn future_schema_is_rejected() {
        let wire = PersistedCheckpoint {
            v: CHECKPOINT_SCHEMA_VERSION + 1,
            id: "x".into(),
            ts: "t".into(),
            channel_values: BTreeMap::new(),
            channel_versions: BTreeMap::new(),
            versions_seen: BTreeMap::new(),
        };
        assert!(matches!(
            Checkpoint::try_from(wire),
            Err(PersistenceError::UnsupportedSchema(_))
        ));
    }
}
