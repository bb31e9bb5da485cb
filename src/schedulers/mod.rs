//! Task selection: which nodes fire in the next superstep.
//!
//! A node with trigger set `T` fires iff some channel in `T` carries a
//! version newer than the version the node last observed
//! (`versions_seen[node][channel]`). Selection is deterministic — tasks are
//! produced sorted by node name, then trigger name — so replays of the same
//! checkpoint produce the same batch, and task ids (a hash of checkpoint id,
//! node name, and triggers) line up across restarts.

use rustc_hash::FxHashMap;
use serde_json::{Map, Value};

use crate::channels::Channel;
use crate::checkpoint::Checkpoint;
use crate::graph::{Graph, ReadSpec};
use crate::utils::ids;

/// One unit of work selected for a superstep.
///
/// Created by [`prepare_next_tasks`], mutated in place as its writes arrive
/// via the loop's `put_writes`, and discarded when the superstep commits.
#[derive(Clone, Debug)]
pub struct PregelTask {
    /// Deterministic id: hash of `(checkpoint_id, name, sorted triggers)`.
    pub id: String,
    /// Node name.
    pub name: String,
    /// Input assembled from the node's join channels.
    pub input: Value,
    /// Channels whose fresh versions caused this task to fire.
    pub triggers: Vec<String>,
    /// Writes received so far, in arrival order.
    pub writes: Vec<(String, Value)>,
}

/// The discard form: a task that *would* run, without its input.
///
/// Used when fresh input arrives on a thread with tasks still pending: the
/// pending tasks are discarded, but their trigger versions must still be
/// recorded as seen or they would spuriously re-fire after the input.
#[derive(Clone, Debug)]
pub struct TaskPreview {
    pub name: String,
    pub triggers: Vec<String>,
}

/// Select the tasks for the next superstep, in deterministic order.
///
/// Skips are silent by design: a node whose required read channel is empty,
/// or whose `when` predicate rejects the assembled input, simply does not
/// fire this step.
#[must_use]
pub fn prepare_next_tasks(
    checkpoint: &Checkpoint,
    graph: &Graph,
    channels: &FxHashMap<String, Channel>,
) -> Vec<PregelTask> {
    let mut tasks = Vec::new();
    for (name, spec) in sorted_nodes(graph) {
        let Some(triggers) = fresh_triggers(checkpoint, name, spec.triggers()) else {
            continue;
        };
        let Some(input) = assemble_input(spec.reads(), channels) else {
            tracing::debug!(node = %name, "skipping node: required read channel is empty");
            continue;
        };
        if let Some(when) = spec.when() {
            if !when(&input) {
                tracing::debug!(node = %name, "skipping node: `when` predicate rejected input");
                continue;
            }
        }
        tasks.push(PregelTask {
            id: ids::task_id(&checkpoint.id, name, &triggers),
            name: name.to_string(),
            input,
            triggers,
            writes: Vec::new(),
        });
    }
    tasks
}

/// The discard form of task selection: triggered nodes only, no inputs.
#[must_use]
pub fn prepare_task_preview(checkpoint: &Checkpoint, graph: &Graph) -> Vec<TaskPreview> {
    let mut previews = Vec::new();
    for (name, spec) in sorted_nodes(graph) {
        if let Some(triggers) = fresh_triggers(checkpoint, name, spec.triggers()) {
            previews.push(TaskPreview {
                name: name.to_string(),
                triggers,
            });
        }
    }
    previews
}

fn sorted_nodes(graph: &Graph) -> Vec<(&str, &crate::graph::NodeSpec)> {
    let mut nodes: Vec<_> = graph
        .nodes()
        .iter()
        .map(|(name, spec)| (name.as_str(), spec))
        .collect();
    nodes.sort_by_key(|(name, _)| *name);
    nodes
}

/// The subset of `triggers` carrying versions newer than the node has seen,
/// sorted by channel name. `None` when the node is not fresh.
fn fresh_triggers(
    checkpoint: &Checkpoint,
    node: &str,
    triggers: &[String],
) -> Option<Vec<String>> {
    let seen = checkpoint.versions_seen.get(node);
    let mut fresh: Vec<String> = triggers
        .iter()
        .filter(|channel| {
            let Some(current) = checkpoint.channel_versions.get(*channel) else {
                return false;
            };
            match seen.and_then(|s| s.get(*channel)) {
                Some(observed) => current > observed,
                None => true,
            }
        })
        .cloned()
        .collect();
    if fresh.is_empty() {
        return None;
    }
    fresh.sort_unstable();
    Some(fresh)
}

/// Build a node's input from its join channels.
///
/// Single-channel reads are required: `None` skips the node this step.
/// Map reads are optional per entry; empty channels contribute nothing.
fn assemble_input(reads: &ReadSpec, channels: &FxHashMap<String, Channel>) -> Option<Value> {
    match reads {
        ReadSpec::Single(name) => channels.get(name).and_then(|ch| ch.get().ok()),
        ReadSpec::Map(entries) => {
            let mut object = Map::new();
            for (alias, channel) in entries {
                if let Some(value) = channels.get(channel).and_then(|ch| ch.get().ok()) {
                    object.insert(alias.clone(), value);
                }
            }
            Some(Value::Object(object))
        }
    }
}
