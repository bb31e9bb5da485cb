//! Execution context handed to every node invocation.
//!
//! Rather than smuggling `read`/`send`/`resuming` callables through a
//! configuration mapping, the runtime passes an explicit [`ExecutionContext`]
//! with typed methods. The context is distinct from user configuration: it
//! carries only what a node needs at run time — channel reads against the
//! pre-tick snapshot, incremental writes, resume payloads for suspended
//! interrupts, and the run's cancellation token.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::channels::ChannelError;
use crate::node::NodeError;

/// Per-task view of the run handed to [`Node::run`](crate::node::Node::run).
#[derive(Clone)]
pub struct ExecutionContext {
    task_id: String,
    node: String,
    step: i64,
    resuming: bool,
    resume_value: Option<Value>,
    /// Channel values as of the superstep's start.
    snapshot: Arc<FxHashMap<String, Value>>,
    /// Writes sent incrementally by this task, shared with the task runner.
    sends: Arc<Mutex<Vec<(String, Value)>>>,
    cancellation: CancellationToken,
}

impl ExecutionContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        task_id: String,
        node: String,
        step: i64,
        resuming: bool,
        resume_value: Option<Value>,
        snapshot: Arc<FxHashMap<String, Value>>,
        sends: Arc<Mutex<Vec<(String, Value)>>>,
        cancellation: CancellationToken,
    ) -> Self {
        ExecutionContext {
            task_id,
            node,
            step,
            resuming,
            resume_value,
            snapshot,
            sends,
            cancellation,
        }
    }

    /// Deterministic id of the task this context belongs to.
    #[must_use]
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Name of the node being executed.
    #[must_use]
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Current superstep number.
    #[must_use]
    pub fn step(&self) -> i64 {
        self.step
    }

    /// Whether this run resumed from persisted state rather than fresh input.
    #[must_use]
    pub fn is_resuming(&self) -> bool {
        self.resuming
    }

    /// Read a channel's value.
    ///
    /// With `fresh = false` the read sees the pre-tick snapshot the task's
    /// input was assembled from. With `fresh = true` the task's own writes
    /// so far are overlaid (last write wins), which is what a node wants
    /// when it re-reads a channel it just wrote.
    ///
    /// # Errors
    ///
    /// [`ChannelError::EmptyChannel`] when the channel holds no value from
    /// this task's point of view.
    pub fn read(&self, channel: &str, fresh: bool) -> Result<Value, ChannelError> {
        if fresh {
            let sends = self.sends.lock();
            if let Some((_, value)) = sends.iter().rev().find(|(c, _)| c == channel) {
                return Ok(value.clone());
            }
        }
        self.snapshot
            .get(channel)
            .cloned()
            .ok_or_else(|| ChannelError::EmptyChannel {
                channel: channel.to_string(),
            })
    }

    /// Send a write without waiting for the node to return. Order is
    /// preserved and the write lands in the same superstep as the node's
    /// returned writes.
    pub fn send(&self, channel: impl Into<String>, value: Value) {
        self.sends.lock().push((channel.into(), value));
    }

    /// Suspend this node, surfacing `value` to the caller.
    ///
    /// On the first execution this raises the interrupt signal; the task is
    /// reported incomplete and the loop stops with the interrupt payload.
    /// When the caller resumes with `Command::resume(x)`, the node re-runs
    /// and this call returns `x` instead of signalling.
    pub fn interrupt(&self, value: Value) -> Result<Value, NodeError> {
        match &self.resume_value {
            Some(resume) => Ok(resume.clone()),
            None => Err(NodeError::Interrupted { value }),
        }
    }

    /// The run's cancellation token. Long-running nodes should check it and
    /// exit promptly when it fires.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Shorthand for `cancellation().is_cancelled()`.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("task_id", &self.task_id)
            .field("node", &self.node)
            .field("step", &self.step)
            .field("resuming", &self.resuming)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx_with(snapshot: FxHashMap<String, Value>, resume: Option<Value>) -> ExecutionContext {
        ExecutionContext::new(
            "task-1".into(),
            "worker".into(),
            0,
            false,
            resume,
            Arc::new(snapshot),
            Arc::new(Mutex::new(Vec::new())),
            CancellationToken::new(),
        )
    }

    #[test]
    fn fresh_read_overlays_own_sends() {
        let mut snap = FxHashMap::default();
        snap.insert("count".to_string(), json!(1));
        let ctx = ctx_with(snap, None);
        assert_eq!(ctx.read("count", false).unwrap(), json!(1));
        ctx.send("count", json!(2));
        assert_eq!(ctx.read("count", false).unwrap(), json!(1));
        assert_eq!(ctx.read("count", true).unwrap(), json!(2));
    }

    #[test]
    fn interrupt_returns_resume_value_when_staged() {
        let ctx = ctx_with(FxHashMap::default(), Some(json!("blue")));
        assert_eq!(ctx.interrupt(json!("pick color")).unwrap(), json!("blue"));

        let fresh = ctx_with(FxHashMap::default(), None);
        let err = fresh.interrupt(json!("pick color")).unwrap_err();
        assert!(err.is_interrupt());
    }
}
