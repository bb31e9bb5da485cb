//! Checkpoint records: durable snapshots of channel state at superstep
//! boundaries.
//!
//! A checkpoint captures everything a loop needs to resume a thread: the
//! serialized channel values, the per-channel version tokens, and the
//! per-node `versions_seen` bookkeeping that drives task selection. Pending
//! writes produced by partially completed supersteps are persisted
//! separately (see [`PendingWrite`]) so they survive a crash and can be
//! re-attached to the exact tasks that produced them.
//!
//! Checkpoint ids are time-ordered (UUIDv7), so sorting ids
//! lexicographically yields chronological order.

use chrono::Utc;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::channels::{Channel, ChannelSpec};
use crate::types::{ChannelVersion, TASKS};
use crate::utils::ids;

/// Current checkpoint schema version.
///
/// Checkpoints with `v < 4` stored ad-hoc sends in the legacy
/// [`TASKS`] channel via the parent's pending writes; the loader migrates
/// them with [`migrate_pending_sends`].
pub const CHECKPOINT_SCHEMA_VERSION: u32 = 4;

/// Map of channel name to version token.
pub type VersionMap = FxHashMap<String, ChannelVersion>;

/// Serializable snapshot of all channel values, versions, and seen-versions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Schema version.
    pub v: u32,
    /// Time-ordered identifier; lexicographic sort equals chronological.
    pub id: String,
    /// RFC3339 creation timestamp.
    pub ts: String,
    /// Channel name to checkpointed value. Untracked channels never appear.
    #[serde(default)]
    pub channel_values: FxHashMap<String, Value>,
    /// Channel name to version token; monotone per channel.
    #[serde(default)]
    pub channel_versions: VersionMap,
    /// Node name to (channel name to last version observed on that trigger).
    /// The pseudo-node `__interrupt__` records interrupt acknowledgements.
    #[serde(default)]
    pub versions_seen: FxHashMap<String, VersionMap>,
}

impl Checkpoint {
    /// A fresh, empty checkpoint for a thread with no history.
    #[must_use]
    pub fn empty() -> Self {
        Checkpoint {
            v: CHECKPOINT_SCHEMA_VERSION,
            id: ids::checkpoint_id(),
            ts: Utc::now().to_rfc3339(),
            channel_values: FxHashMap::default(),
            channel_versions: VersionMap::default(),
            versions_seen: FxHashMap::default(),
        }
    }

    /// The highest version token across all channels, if any.
    #[must_use]
    pub fn max_channel_version(&self) -> Option<&ChannelVersion> {
        self.channel_versions.values().max()
    }
}

/// Where a checkpoint came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointSource {
    /// Produced while applying mapped input writes, before step 0.
    Input,
    /// Produced by a completed superstep.
    Loop,
    /// Produced by an out-of-band state update.
    Update,
    /// Produced by forking a thread for time-travel.
    Fork,
}

/// Metadata stored alongside each checkpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub source: CheckpointSource,
    /// Superstep number; `-2` marks the synthesized empty checkpoint and
    /// `-1` the input checkpoint of a fresh run.
    pub step: i64,
    /// Per-task output writes for `Loop` checkpoints, keyed by task name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writes: Option<FxHashMap<String, Value>>,
    /// Parent checkpoint ids keyed by checkpoint namespace.
    #[serde(default)]
    pub parents: FxHashMap<String, String>,
}

impl CheckpointMetadata {
    #[must_use]
    pub fn new(source: CheckpointSource, step: i64) -> Self {
        CheckpointMetadata {
            source,
            step,
            writes: None,
            parents: FxHashMap::default(),
        }
    }
}

/// Addresses a checkpoint (or the latest one) within a thread.
///
/// `checkpoint_ns` partitions checkpoints belonging to parent vs. subgraph
/// invocations under a single thread id; the root namespace is the empty
/// string.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckpointRef {
    pub thread_id: String,
    #[serde(default)]
    pub checkpoint_ns: String,
    /// `None` addresses the latest checkpoint in the thread + namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<String>,
}

impl CheckpointRef {
    #[must_use]
    pub fn latest(thread_id: impl Into<String>, checkpoint_ns: impl Into<String>) -> Self {
        CheckpointRef {
            thread_id: thread_id.into(),
            checkpoint_ns: checkpoint_ns.into(),
            checkpoint_id: None,
        }
    }

    /// The same thread + namespace, pinned to a specific checkpoint id.
    #[must_use]
    pub fn with_id(&self, checkpoint_id: &str) -> Self {
        CheckpointRef {
            thread_id: self.thread_id.clone(),
            checkpoint_ns: self.checkpoint_ns.clone(),
            checkpoint_id: Some(checkpoint_id.to_string()),
        }
    }
}

/// A write produced by a task, persisted out-of-band from checkpoints so
/// that in-flight supersteps survive a crash.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingWrite {
    pub task_id: String,
    pub channel: String,
    pub value: Value,
}

/// Everything a checkpointer returns for one checkpoint.
#[derive(Clone, Debug)]
pub struct CheckpointTuple {
    /// Config referencing this checkpoint.
    pub config: CheckpointRef,
    pub checkpoint: Checkpoint,
    pub metadata: CheckpointMetadata,
    /// Config referencing the parent checkpoint, when one exists.
    pub parent_config: Option<CheckpointRef>,
    /// Writes persisted against this checkpoint by partially completed
    /// supersteps.
    pub pending_writes: Vec<PendingWrite>,
}

/// Materialize channels from graph specs, rehydrating from a checkpoint.
#[must_use]
pub fn channels_from_checkpoint(
    specs: &FxHashMap<String, ChannelSpec>,
    checkpoint: &Checkpoint,
) -> FxHashMap<String, Channel> {
    specs
        .iter()
        .map(|(name, spec)| {
            let snapshot = checkpoint.channel_values.get(name).cloned();
            (name.clone(), spec.restore(name, snapshot))
        })
        .collect()
}

/// Produce the next checkpoint in a thread: fresh id and timestamp, current
/// channel values, carried-forward versions and seen-versions.
#[must_use]
pub fn create_checkpoint(
    previous: &Checkpoint,
    channels: &FxHashMap<String, Channel>,
) -> Checkpoint {
    let mut channel_values = FxHashMap::default();
    for (name, channel) in channels {
        if let Some(value) = channel.checkpoint() {
            channel_values.insert(name.clone(), value);
        }
    }
    Checkpoint {
        v: CHECKPOINT_SCHEMA_VERSION,
        id: ids::checkpoint_id(),
        ts: Utc::now().to_rfc3339(),
        channel_values,
        channel_versions: previous.channel_versions.clone(),
        versions_seen: previous.versions_seen.clone(),
    }
}

/// Migrate a pre-v4 checkpoint's ad-hoc sends.
///
/// Old writers stored sends as the parent checkpoint's pending writes on the
/// legacy [`TASKS`] channel, newest-first; the wire-format invariant is that
/// restoring emission order requires reversing them. The migrated sends are
/// injected into `channel_values[TASKS]` and the channel's version is bumped
/// past every existing version so the sends register as fresh.
pub fn migrate_pending_sends(checkpoint: &mut Checkpoint, parent_pending: &[PendingWrite]) {
    if checkpoint.v >= CHECKPOINT_SCHEMA_VERSION {
        return;
    }
    let mut sends: Vec<Value> = parent_pending
        .iter()
        .filter(|w| w.channel == TASKS)
        .map(|w| w.value.clone())
        .collect();
    sends.reverse();
    if !sends.is_empty() {
        checkpoint
            .channel_values
            .insert(TASKS.to_string(), Value::Array(sends));
        let bumped = ChannelVersion::next(checkpoint.max_channel_version());
        checkpoint
            .channel_versions
            .insert(TASKS.to_string(), bumped);
    }
    checkpoint.v = CHECKPOINT_SCHEMA_VERSION;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_checkpoint_has_current_schema() {
        let cp = Checkpoint::empty();
        assert_eq!(cp.v, CHECKPOINT_SCHEMA_VERSION);
        assert!(cp.channel_values.is_empty());
    }

    #[test]
    fn migrate_reverses_parent_sends_and_bumps_version() {
        let mut cp = Checkpoint::empty();
        cp.v = 3;
        cp.channel_versions
            .insert("messages".into(), ChannelVersion::Int(7));
        let parent_pending = vec![
            PendingWrite {
                task_id: "t1".into(),
                channel: TASKS.into(),
                value: json!("second"),
            },
            PendingWrite {
                task_id: "t1".into(),
                channel: "messages".into(),
                value: json!("ignored"),
            },
            PendingWrite {
                task_id: "t2".into(),
                channel: TASKS.into(),
                value: json!("first"),
            },
        ];
        migrate_pending_sends(&mut cp, &parent_pending);
        assert_eq!(cp.v, CHECKPOINT_SCHEMA_VERSION);
        assert_eq!(
            cp.channel_values.get(TASKS),
            Some(&json!(["first", "second"]))
        );
        assert_eq!(
            cp.channel_versions.get(TASKS),
            Some(&ChannelVersion::Int(8))
        );
    }

    #[test]
    fn migrate_is_a_noop_for_current_schema() {
        let mut cp = Checkpoint::empty();
        let before = cp.clone();
        migrate_pending_sends(
            &mut cp,
            &[PendingWrite {
                task_id: "t".into(),
                channel: TASKS.into(),
                value: json!("x"),
            }],
        );
        assert_eq!(cp, before);
    }
}
