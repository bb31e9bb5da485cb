//! Per-run configuration.

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::checkpoint::CheckpointRef;

/// Default superstep budget beyond the starting step.
pub const DEFAULT_RECURSION_LIMIT: usize = 25;

/// Separator between checkpoint-namespace segments of nested subgraphs.
pub const NS_SEP: &str = "|";

/// Configuration for one run of a graph on a thread.
#[derive(Clone, Debug)]
pub struct RunnerConfig {
    /// Unit of long-running state; all checkpoints of a thread form a causal
    /// chain.
    pub thread_id: String,
    /// Partitions parent vs. subgraph checkpoints under one thread id.
    /// Empty string for the root graph.
    pub checkpoint_ns: String,
    /// Pin the run to a specific checkpoint (time travel); `None` resumes
    /// from the latest.
    pub checkpoint_id: Option<String>,
    /// Superstep budget: the run stops with an out-of-steps status after
    /// `start + recursion_limit + 1` steps.
    pub recursion_limit: usize,
    /// Explicit resume marker, set when re-entering a thread that paused.
    pub resuming: bool,
    /// Cancellation token propagated into node execution contexts.
    pub cancellation: CancellationToken,
    /// Optional wall-clock budget for a single superstep's task batch.
    pub step_timeout: Option<std::time::Duration>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        RunnerConfig {
            thread_id: Uuid::new_v4().to_string(),
            checkpoint_ns: String::new(),
            checkpoint_id: None,
            recursion_limit: resolve_recursion_limit(),
            resuming: false,
            cancellation: CancellationToken::new(),
            step_timeout: None,
        }
    }
}

fn resolve_recursion_limit() -> usize {
    dotenvy::dotenv().ok();
    std::env::var("STEPGRAPH_RECURSION_LIMIT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_RECURSION_LIMIT)
}

impl RunnerConfig {
    /// A config bound to an explicit thread id, otherwise default.
    #[must_use]
    pub fn for_thread(thread_id: impl Into<String>) -> Self {
        RunnerConfig {
            thread_id: thread_id.into(),
            ..RunnerConfig::default()
        }
    }

    #[must_use]
    pub fn with_checkpoint_id(mut self, checkpoint_id: impl Into<String>) -> Self {
        self.checkpoint_id = Some(checkpoint_id.into());
        self
    }

    #[must_use]
    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    #[must_use]
    pub fn with_resuming(mut self, resuming: bool) -> Self {
        self.resuming = resuming;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    #[must_use]
    pub fn with_step_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.step_timeout = Some(timeout);
        self
    }

    /// Config for a subgraph invoked under this run: same thread, child
    /// namespace, shared cancellation. Nested loops detect themselves by
    /// their non-root namespace.
    #[must_use]
    pub fn child(&self, ns_segment: &str) -> Self {
        let checkpoint_ns = if self.checkpoint_ns.is_empty() {
            ns_segment.to_string()
        } else {
            format!("{}{NS_SEP}{}", self.checkpoint_ns, ns_segment)
        };
        RunnerConfig {
            thread_id: self.thread_id.clone(),
            checkpoint_ns,
            checkpoint_id: None,
            recursion_limit: self.recursion_limit,
            resuming: self.resuming,
            cancellation: self.cancellation.clone(),
            step_timeout: self.step_timeout,
        }
    }

    /// Whether this config addresses a nested subgraph.
    #[must_use]
    pub fn is_nested(&self) -> bool {
        !self.checkpoint_ns.is_empty()
    }

    /// Namespace path segments, root-first.
    #[must_use]
    pub fn namespace(&self) -> Vec<String> {
        if self.checkpoint_ns.is_empty() {
            Vec::new()
        } else {
            self.checkpoint_ns
                .split(NS_SEP)
                .map(str::to_string)
                .collect()
        }
    }

    /// The checkpoint reference this run starts from.
    #[must_use]
    pub fn checkpoint_ref(&self) -> CheckpointRef {
        CheckpointRef {
            thread_id: self.thread_id.clone(),
            checkpoint_ns: self.checkpoint_ns.clone(),
            checkpoint_id: self.checkpoint_id.clone(),
        }
    }
}
