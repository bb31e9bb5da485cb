//! Checkpointer protocol and the in-memory reference backends.
//!
//! A checkpointer persists checkpoints and pending writes for a thread and
//! hands them back on resume. Implementations must keep per-thread ordering:
//! a `put` must be durable before a subsequent `get_tuple` can observe it,
//! and `put_writes` must be idempotent per `(task_id, index)` so crash-retry
//! never duplicates a write.
//!
//! Two reference backends ship with the runtime:
//!
//! - [`InMemorySaver`] — full history per `(thread_id, checkpoint_ns)`;
//!   suitable for tests and ephemeral runs.
//! - [`ShallowInMemorySaver`] — at most one checkpoint per thread and
//!   namespace; each `put` overwrites the previous checkpoint and purges
//!   pending writes that belong to stale checkpoints.
//!
//! Durable database backends implement this same trait out of tree; retry
//! and backoff against their stores is their concern, not the loop's.

use async_trait::async_trait;
use miette::Diagnostic;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::checkpoint::{
    Checkpoint, CheckpointMetadata, CheckpointRef, CheckpointTuple, PendingWrite,
};
use crate::types::ChannelVersion;

/// Errors from checkpointer operations.
#[derive(Debug, Error, Diagnostic)]
pub enum CheckpointerError {
    /// The referenced checkpoint does not exist.
    #[error("checkpoint not found: {reference}")]
    #[diagnostic(
        code(stepgraph::checkpointer::not_found),
        help("Ensure the thread id, namespace, and checkpoint id are correct.")
    )]
    NotFound { reference: String },

    /// Backend storage error (database, filesystem, etc.).
    #[error("backend error: {message}")]
    #[diagnostic(code(stepgraph::checkpointer::backend))]
    Backend { message: String },

    /// (De)serialization failure while persisting or loading.
    #[error("serialization error: {source}")]
    #[diagnostic(code(stepgraph::checkpointer::serde))]
    Serde {
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, CheckpointerError>;

/// Options for [`Checkpointer::list`].
#[derive(Clone, Debug, Default)]
pub struct ListOptions {
    /// Maximum number of tuples to yield.
    pub limit: Option<usize>,
    /// Only yield checkpoints with id strictly before this id.
    pub before: Option<String>,
    /// Metadata equality filter: every entry must match the serialized
    /// metadata field of the same name.
    pub filter: Option<FxHashMap<String, Value>>,
}

/// Durable, per-thread ordered persistence of checkpoints and pending
/// writes.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// The checkpoint referenced by `config.checkpoint_id`, or the latest
    /// under the thread + namespace when unspecified. `None` when the thread
    /// has no checkpoints.
    async fn get_tuple(&self, config: &CheckpointRef) -> Result<Option<CheckpointTuple>>;

    /// Tuples newest-first by checkpoint id within the thread + namespace.
    async fn list(&self, config: &CheckpointRef, options: ListOptions)
        -> Result<Vec<CheckpointTuple>>;

    /// Persist `checkpoint`. `config` references the parent checkpoint; the
    /// returned config references the newly stored one. `new_versions`
    /// carries only the channel versions that changed since the parent, for
    /// backends that store sparse deltas.
    async fn put(
        &self,
        config: &CheckpointRef,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
        new_versions: FxHashMap<String, ChannelVersion>,
    ) -> Result<CheckpointRef>;

    /// Persist a task's writes against `config.checkpoint_id`. Idempotent
    /// per `(task_id, index)`.
    async fn put_writes(
        &self,
        config: &CheckpointRef,
        task_id: &str,
        writes: &[(String, Value)],
    ) -> Result<()>;

    /// Remove every checkpoint and pending write belonging to a thread.
    async fn delete_thread(&self, thread_id: &str) -> Result<()>;

    /// Produce a version token strictly greater than `current`. The default
    /// scheme is integer increment; backends needing lexicographic ordering
    /// override this with text tokens.
    fn next_version(&self, current: Option<&ChannelVersion>) -> ChannelVersion {
        ChannelVersion::next(current)
    }
}

type ThreadKey = (String, String);

#[derive(Clone, Debug)]
struct StoredCheckpoint {
    checkpoint: Checkpoint,
    metadata: CheckpointMetadata,
    parent_id: Option<String>,
    /// Keyed by `(task_id, index)` for idempotent re-persistence.
    writes: BTreeMap<(String, usize), PendingWrite>,
}

impl StoredCheckpoint {
    fn tuple(&self, config: &CheckpointRef) -> CheckpointTuple {
        CheckpointTuple {
            config: config.with_id(&self.checkpoint.id),
            checkpoint: self.checkpoint.clone(),
            metadata: self.metadata.clone(),
            parent_config: self
                .parent_id
                .as_ref()
                .map(|id| config.with_id(id)),
            pending_writes: self.writes.values().cloned().collect(),
        }
    }

    fn matches(&self, filter: Option<&FxHashMap<String, Value>>) -> bool {
        let Some(filter) = filter else {
            return true;
        };
        let Ok(Value::Object(meta)) = serde_json::to_value(&self.metadata) else {
            return false;
        };
        filter
            .iter()
            .all(|(key, expected)| meta.get(key) == Some(expected))
    }
}

/// Full-history in-memory checkpointer.
#[derive(Default)]
pub struct InMemorySaver {
    threads: RwLock<FxHashMap<ThreadKey, Vec<StoredCheckpoint>>>,
}

impl InMemorySaver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn key_of(config: &CheckpointRef) -> ThreadKey {
    (config.thread_id.clone(), config.checkpoint_ns.clone())
}

#[async_trait]
impl Checkpointer for InMemorySaver {
    async fn get_tuple(&self, config: &CheckpointRef) -> Result<Option<CheckpointTuple>> {
        let threads = self.threads.read();
        let Some(stored) = threads.get(&key_of(config)) else {
            return Ok(None);
        };
        let found = match &config.checkpoint_id {
            Some(id) => stored.iter().find(|s| &s.checkpoint.id == id),
            None => stored.iter().max_by(|a, b| a.checkpoint.id.cmp(&b.checkpoint.id)),
        };
        Ok(found.map(|s| s.tuple(config)))
    }

    async fn list(
        &self,
        config: &CheckpointRef,
        options: ListOptions,
    ) -> Result<Vec<CheckpointTuple>> {
        let threads = self.threads.read();
        let Some(stored) = threads.get(&key_of(config)) else {
            return Ok(Vec::new());
        };
        let mut tuples: Vec<&StoredCheckpoint> = stored
            .iter()
            .filter(|s| {
                options
                    .before
                    .as_ref()
                    .is_none_or(|before| s.checkpoint.id < *before)
            })
            .filter(|s| s.matches(options.filter.as_ref()))
            .collect();
        tuples.sort_by(|a, b| b.checkpoint.id.cmp(&a.checkpoint.id));
        if let Some(limit) = options.limit {
            tuples.truncate(limit);
        }
        Ok(tuples.into_iter().map(|s| s.tuple(config)).collect())
    }

    async fn put(
        &self,
        config: &CheckpointRef,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
        _new_versions: FxHashMap<String, ChannelVersion>,
    ) -> Result<CheckpointRef> {
        let next = config.with_id(&checkpoint.id);
        let mut threads = self.threads.write();
        threads.entry(key_of(config)).or_default().push(StoredCheckpoint {
            checkpoint,
            metadata,
            parent_id: config.checkpoint_id.clone(),
            writes: BTreeMap::new(),
        });
        Ok(next)
    }

    async fn put_writes(
        &self,
        config: &CheckpointRef,
        task_id: &str,
        writes: &[(String, Value)],
    ) -> Result<()> {
        let Some(checkpoint_id) = &config.checkpoint_id else {
            return Err(CheckpointerError::Backend {
                message: "put_writes requires a checkpoint id".into(),
            });
        };
        let mut threads = self.threads.write();
        let stored = threads
            .get_mut(&key_of(config))
            .and_then(|v| v.iter_mut().find(|s| &s.checkpoint.id == checkpoint_id))
            .ok_or_else(|| CheckpointerError::NotFound {
                reference: checkpoint_id.clone(),
            })?;
        for (index, (channel, value)) in writes.iter().enumerate() {
            stored
                .writes
                .entry((task_id.to_string(), index))
                .or_insert_with(|| PendingWrite {
                    task_id: task_id.to_string(),
                    channel: channel.clone(),
                    value: value.clone(),
                });
        }
        Ok(())
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        let mut threads = self.threads.write();
        threads.retain(|(thread, _), _| thread != thread_id);
        Ok(())
    }
}

#[derive(Clone, Debug)]
struct ShallowStored {
    checkpoint: Checkpoint,
    metadata: CheckpointMetadata,
    /// Keyed by `(checkpoint_id, task_id, index)`; stale checkpoint ids are
    /// purged on every `put`.
    writes: BTreeMap<(String, String, usize), PendingWrite>,
}

/// Shallow in-memory checkpointer: one checkpoint per thread + namespace.
#[derive(Default)]
pub struct ShallowInMemorySaver {
    threads: RwLock<FxHashMap<ThreadKey, ShallowStored>>,
}

impl ShallowInMemorySaver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Checkpointer for ShallowInMemorySaver {
    async fn get_tuple(&self, config: &CheckpointRef) -> Result<Option<CheckpointTuple>> {
        let threads = self.threads.read();
        let Some(stored) = threads.get(&key_of(config)) else {
            return Ok(None);
        };
        if let Some(id) = &config.checkpoint_id {
            if id != &stored.checkpoint.id {
                return Ok(None);
            }
        }
        Ok(Some(CheckpointTuple {
            config: config.with_id(&stored.checkpoint.id),
            checkpoint: stored.checkpoint.clone(),
            metadata: stored.metadata.clone(),
            parent_config: None,
            pending_writes: stored.writes.values().cloned().collect(),
        }))
    }

    async fn list(
        &self,
        config: &CheckpointRef,
        options: ListOptions,
    ) -> Result<Vec<CheckpointTuple>> {
        if options.limit == Some(0) {
            return Ok(Vec::new());
        }
        let tuple = self.get_tuple(&CheckpointRef::latest(
            config.thread_id.clone(),
            config.checkpoint_ns.clone(),
        ))
        .await?;
        Ok(tuple
            .into_iter()
            .filter(|t| {
                options
                    .before
                    .as_ref()
                    .is_none_or(|before| t.checkpoint.id < *before)
            })
            .collect())
    }

    async fn put(
        &self,
        config: &CheckpointRef,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
        _new_versions: FxHashMap<String, ChannelVersion>,
    ) -> Result<CheckpointRef> {
        let next = config.with_id(&checkpoint.id);
        let new_id = checkpoint.id.clone();
        let mut threads = self.threads.write();
        let entry = threads.entry(key_of(config)).or_insert_with(|| ShallowStored {
            checkpoint: checkpoint.clone(),
            metadata: metadata.clone(),
            writes: BTreeMap::new(),
        });
        entry.checkpoint = checkpoint;
        entry.metadata = metadata;
        entry.writes.retain(|(ckpt, _, _), _| ckpt == &new_id);
        Ok(next)
    }

    async fn put_writes(
        &self,
        config: &CheckpointRef,
        task_id: &str,
        writes: &[(String, Value)],
    ) -> Result<()> {
        let Some(checkpoint_id) = &config.checkpoint_id else {
            return Err(CheckpointerError::Backend {
                message: "put_writes requires a checkpoint id".into(),
            });
        };
        let mut threads = self.threads.write();
        let stored = threads
            .get_mut(&key_of(config))
            .ok_or_else(|| CheckpointerError::NotFound {
                reference: checkpoint_id.clone(),
            })?;
        for (index, (channel, value)) in writes.iter().enumerate() {
            stored
                .writes
                .entry((checkpoint_id.clone(), task_id.to_string(), index))
                .or_insert_with(|| PendingWrite {
                    task_id: task_id.to_string(),
                    channel: channel.clone(),
                    value: value.clone(),
                });
        }
        Ok(())
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        let mut threads = self.threads.write();
        threads.retain(|(thread, _), _| thread != thread_id);
        Ok(())
    }
}
