//! The write barrier: applying one superstep's writes to the channel set.
//!
//! All writes produced by a superstep's tasks are applied together, per
//! channel, in one deterministic pass. Channels report whether they mutated;
//! only mutated channels get a new version token, assigned externally via
//! the checkpointer-supplied `next_version` function, and only their values
//! are mirrored into the checkpoint.
//!
//! Write order: entries are applied in the deterministic task order the
//! scheduler produced (node name, then trigger name), and each task's writes
//! keep their caller-supplied order per channel. Multiple tasks writing the
//! same channel therefore interleave in task-emission order.

use rustc_hash::FxHashMap;
use serde_json::Value;
use std::sync::Arc;

use crate::channels::{Channel, ChannelError};
use crate::checkpoint::Checkpoint;
use crate::types::ChannelVersion;

/// Version successor function, sourced from the checkpointer.
pub type NextVersionFn = Arc<dyn Fn(Option<&ChannelVersion>) -> ChannelVersion + Send + Sync>;

/// The default integer-increment version scheme.
#[must_use]
pub fn default_next_version() -> NextVersionFn {
    Arc::new(|current| ChannelVersion::next(current))
}

/// One write-producing participant of a superstep: a task, or a pseudo-task
/// such as the input applier.
#[derive(Clone, Debug)]
pub struct WriteEntry {
    /// Task name (node name, or a pseudo-task marker).
    pub name: String,
    /// Trigger channels whose observed versions this entry acknowledges.
    pub triggers: Vec<String>,
    /// Writes in emission order.
    pub writes: Vec<(String, Value)>,
}

/// Apply one superstep's writes.
///
/// 1. Record `versions_seen[name][trigger]` for every entry, using the
///    pre-bump versions that made the entry fire.
/// 2. Group writes by channel, preserving entry order, and hand each written
///    channel its whole batch.
/// 3. Assign fresh versions to mutated channels and mirror their
///    checkpointed values.
/// 4. Offer an empty update to every previously versioned channel that
///    received no writes, so self-clearing variants reset. Clearing is not
///    a write: the channel's version stays put (a bump would spuriously
///    re-trigger its subscribers), only the mirrored value is dropped.
///
/// Returns the names of version-bumped channels, in update order.
///
/// # Errors
///
/// Propagates [`ChannelError::InvalidUpdate`]; fatal for the superstep.
/// Writes to pseudo-channels that are not part of the channel set (error and
/// interrupt bookkeeping) are ignored here.
pub fn apply_writes(
    checkpoint: &mut Checkpoint,
    channels: &mut FxHashMap<String, Channel>,
    entries: &[WriteEntry],
    next_version: &NextVersionFn,
) -> Result<Vec<String>, ChannelError> {
    for entry in entries {
        let seen = checkpoint
            .versions_seen
            .entry(entry.name.clone())
            .or_default();
        for trigger in &entry.triggers {
            if let Some(version) = checkpoint.channel_versions.get(trigger) {
                seen.insert(trigger.clone(), version.clone());
            }
        }
    }

    // Group by channel in first-write order so the update pass is
    // deterministic for a fixed entry order.
    let mut order: Vec<String> = Vec::new();
    let mut grouped: FxHashMap<String, Vec<Value>> = FxHashMap::default();
    for entry in entries {
        for (channel, value) in &entry.writes {
            if !channels.contains_key(channel) {
                continue;
            }
            if !grouped.contains_key(channel) {
                order.push(channel.clone());
            }
            grouped.entry(channel.clone()).or_default().push(value.clone());
        }
    }

    let mut updated = Vec::new();
    for name in &order {
        let channel = channels
            .get_mut(name)
            .expect("grouped writes only reference known channels");
        let values = grouped.remove(name).unwrap_or_default();
        if channel.update(values)? {
            bump(checkpoint, name, channel, next_version);
            updated.push(name.clone());
        }
    }

    // Sweep: previously written channels that saw no writes this superstep
    // get an empty update so self-clearing variants can reset.
    let mut untouched: Vec<String> = checkpoint
        .channel_versions
        .keys()
        .filter(|name| !order.contains(name) && channels.contains_key(*name))
        .cloned()
        .collect();
    untouched.sort_unstable();
    for name in untouched {
        let channel = channels.get_mut(&name).expect("filtered on presence");
        if channel.update(Vec::new())? {
            mirror(checkpoint, &name, channel);
        }
    }

    tracing::debug!(updated = ?updated, "applied superstep writes");
    Ok(updated)
}

fn bump(
    checkpoint: &mut Checkpoint,
    name: &str,
    channel: &Channel,
    next_version: &NextVersionFn,
) {
    let next = next_version(checkpoint.channel_versions.get(name));
    checkpoint
        .channel_versions
        .insert(name.to_string(), next);
    mirror(checkpoint, name, channel);
}

fn mirror(checkpoint: &mut Checkpoint, name: &str, channel: &Channel) {
    match channel.checkpoint() {
        Some(value) => {
            checkpoint.channel_values.insert(name.to_string(), value);
        }
        None => {
            checkpoint.channel_values.remove(name);
        }
    }
}
