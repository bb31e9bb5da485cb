//! Core identifier types for the stepgraph runtime.
//!
//! This module defines the fundamental vocabulary shared by every subsystem:
//! channel version tokens, stream modes, and the reserved channel names the
//! loop uses for bookkeeping. These are the core domain concepts that define
//! what a superstep *is*; runtime infrastructure types live under
//! [`crate::runtimes`].
//!
//! # Key Types
//!
//! - [`ChannelVersion`]: Opaque, monotonically increasing per-channel token
//! - [`StreamMode`]: Output modes a consumer can subscribe to
//!
//! # Examples
//!
//! ```rust
//! use stepgraph::types::{ChannelVersion, StreamMode};
//!
//! let v1 = ChannelVersion::Int(1);
//! let v2 = ChannelVersion::Int(2);
//! assert!(v2 > v1);
//!
//! let mode = StreamMode::Values;
//! println!("subscribed to {mode}");
//! ```

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Pseudo-task name used when the loop applies mapped input writes.
pub const INPUT: &str = "__input__";

/// Pseudo-node key in `versions_seen` used for interrupt bookkeeping, and the
/// pseudo-channel interrupted tasks write their payload to.
pub const INTERRUPT: &str = "__interrupt__";

/// Pseudo-channel recording a failed task's error payload. Writes to this
/// channel are never re-applied on resume.
pub const ERROR: &str = "__error__";

/// Pseudo-channel carrying resume payloads routed back into suspended tasks.
pub const RESUME: &str = "__resume__";

/// Marker write recorded for a task that completed without producing any
/// channel writes, so completion is still observable.
pub const NO_WRITES: &str = "__no_writes__";

/// Legacy channel that pre-v4 checkpoints used to stash ad-hoc sends. The
/// loader migrates it; see [`crate::checkpoint::migrate_pending_sends`].
pub const TASKS: &str = "__pregel_tasks";

/// Prefix for the per-node routing channels that realize `Command::goto`.
pub const BRANCH_PREFIX: &str = "branch:to:";

/// Name of the implicit ephemeral channel that triggers `node` when another
/// node (or the caller) routes to it explicitly.
#[must_use]
pub fn branch_channel(node: &str) -> String {
    format!("{BRANCH_PREFIX}{node}")
}

/// Returns `true` for channel names the runtime reserves for itself.
#[must_use]
pub fn is_reserved_channel(name: &str) -> bool {
    name.starts_with("__") || name.starts_with(BRANCH_PREFIX)
}

/// Opaque version token for one channel.
///
/// Versions are assigned externally by the checkpointer's `next_version`
/// function, never by channels themselves. The only requirement is that a
/// newly assigned token compares strictly greater than its predecessor.
/// Backends that need lexicographic ordering can supply [`Text`](Self::Text)
/// tokens; the default scheme is integer increment.
///
/// A single backend must not mix the two encodings within one thread; when a
/// mixed comparison does occur, integer tokens order before text tokens.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelVersion {
    /// Default integer-increment token.
    Int(u64),
    /// Lexicographically ordered token supplied by a backend.
    Text(String),
}

impl ChannelVersion {
    /// The first token handed out by the default integer scheme.
    #[must_use]
    pub fn initial() -> Self {
        ChannelVersion::Int(1)
    }

    /// Default successor function: integer increment, or a lexicographic
    /// extension for text tokens (a longer string sharing the prefix sorts
    /// strictly after it).
    #[must_use]
    pub fn next(current: Option<&ChannelVersion>) -> Self {
        match current {
            None => ChannelVersion::initial(),
            Some(ChannelVersion::Int(n)) => ChannelVersion::Int(n.saturating_add(1)),
            Some(ChannelVersion::Text(t)) => ChannelVersion::Text(format!("{t}0")),
        }
    }
}

impl PartialOrd for ChannelVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ChannelVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (ChannelVersion::Int(a), ChannelVersion::Int(b)) => a.cmp(b),
            (ChannelVersion::Text(a), ChannelVersion::Text(b)) => a.cmp(b),
            (ChannelVersion::Int(_), ChannelVersion::Text(_)) => Ordering::Less,
            (ChannelVersion::Text(_), ChannelVersion::Int(_)) => Ordering::Greater,
        }
    }
}

impl fmt::Display for ChannelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelVersion::Int(n) => write!(f, "{n}"),
            ChannelVersion::Text(t) => write!(f, "{t}"),
        }
    }
}

/// Output modes the stream multiplexer can produce.
///
/// Consumers subscribe to any subset; the loop emits only subscribed modes
/// so the queue stays small.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamMode {
    /// Full output-channel snapshot after each completed superstep.
    Values,
    /// Per-task write map as task results arrive.
    Updates,
    /// Task-start / task-result / checkpoint lifecycle events.
    Debug,
}

impl fmt::Display for StreamMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Values => write!(f, "values"),
            Self::Updates => write!(f, "updates"),
            Self::Debug => write!(f, "debug"),
        }
    }
}
