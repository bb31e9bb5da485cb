//! Node execution primitives: the [`Node`] trait, its output shape, and the
//! node-level error taxonomy.
//!
//! A node is a unit of user computation fired by the scheduler when one of
//! its trigger channels advances. Nodes receive the input assembled from
//! their join channels and an [`ExecutionContext`]; they return channel
//! writes and, optionally, a [`Command`] steering the next superstep.
//!
//! # Error Handling
//!
//! [`NodeError::Interrupted`] is a control-flow signal, not a failure: it is
//! produced by [`ExecutionContext::interrupt`] and handled by the task
//! runner, which records the interrupt payload as a pending write and marks
//! the task incomplete. Every other variant is a genuine node failure; the
//! task runner records it on the error channel and the run surfaces the
//! first failure once the superstep's tasks have settled.

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use miette::Diagnostic;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::context::ExecutionContext;
use crate::control::Command;

/// Core trait for executable graph nodes.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use serde_json::{json, Value};
/// use stepgraph::context::ExecutionContext;
/// use stepgraph::node::{Node, NodeError, NodeOutput};
///
/// struct Doubler;
///
/// #[async_trait]
/// impl Node for Doubler {
///     async fn run(
///         &self,
///         input: Value,
///         _ctx: ExecutionContext,
///     ) -> Result<NodeOutput, NodeError> {
///         let n = input.as_i64().unwrap_or(0);
///         Ok(NodeOutput::new().with_write("doubled", json!(n * 2)))
///     }
/// }
/// ```
#[async_trait]
pub trait Node: Send + Sync {
    /// Execute this node against the input assembled from its join channels.
    async fn run(&self, input: Value, ctx: ExecutionContext) -> Result<NodeOutput, NodeError>;
}

/// Channel writes and optional control flow returned by a node.
#[derive(Clone, Debug, Default)]
pub struct NodeOutput {
    /// Writes in emission order; order is preserved per channel.
    pub writes: Vec<(String, Value)>,
    /// Optional command steering the next superstep.
    pub command: Option<Command>,
}

impl NodeOutput {
    #[must_use]
    pub fn new() -> Self {
        NodeOutput::default()
    }

    #[must_use]
    pub fn with_write(mut self, channel: impl Into<String>, value: Value) -> Self {
        self.writes.push((channel.into(), value));
        self
    }

    #[must_use]
    pub fn with_command(mut self, command: Command) -> Self {
        self.command = Some(command);
        self
    }
}

impl From<Command> for NodeOutput {
    fn from(command: Command) -> Self {
        NodeOutput {
            writes: Vec::new(),
            command: Some(command),
        }
    }
}

/// Errors produced by node execution.
#[derive(Debug, Error, Diagnostic)]
pub enum NodeError {
    /// Dynamic suspension signal carrying the interrupt payload. Raised by
    /// [`ExecutionContext::interrupt`]; never a failure.
    #[error("node requested an interrupt")]
    #[diagnostic(code(stepgraph::node::interrupted))]
    Interrupted { value: Value },

    /// Expected input data was missing.
    #[error("missing expected input: {what}")]
    #[diagnostic(
        code(stepgraph::node::missing_input),
        help("Check that an upstream node wrote the required channel: {what}.")
    )]
    MissingInput { what: String },

    /// Input validation failed.
    #[error("validation failed: {0}")]
    #[diagnostic(code(stepgraph::node::validation))]
    ValidationFailed(String),

    /// JSON (de)serialization error inside node code.
    #[error(transparent)]
    #[diagnostic(code(stepgraph::node::serde_json))]
    Serde(#[from] serde_json::Error),

    /// The run's cancellation token fired while the node was executing.
    #[error("node execution cancelled")]
    #[diagnostic(code(stepgraph::node::cancelled))]
    Cancelled,

    /// Any other node failure.
    #[error("{message}")]
    #[diagnostic(code(stepgraph::node::failed))]
    Failed { message: String },
}

impl NodeError {
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        NodeError::Failed {
            message: message.into(),
        }
    }

    /// Whether this error is the interrupt control-flow signal.
    #[must_use]
    pub fn is_interrupt(&self) -> bool {
        matches!(self, NodeError::Interrupted { .. })
    }
}

type NodeFnInner = Arc<
    dyn Fn(Value, ExecutionContext) -> BoxFuture<'static, Result<NodeOutput, NodeError>>
        + Send
        + Sync,
>;

/// A [`Node`] backed by an async closure; the quickest way to define nodes
/// in tests and small graphs.
#[derive(Clone)]
pub struct FnNode {
    inner: NodeFnInner,
}

#[async_trait]
impl Node for FnNode {
    async fn run(&self, input: Value, ctx: ExecutionContext) -> Result<NodeOutput, NodeError> {
        (self.inner)(input, ctx).await
    }
}

/// Wrap an async closure as a [`Node`].
///
/// ```rust
/// use serde_json::json;
/// use stepgraph::node::{node_fn, NodeOutput};
///
/// let greet = node_fn(|_input, _ctx| async move {
///     Ok(NodeOutput::new().with_write("greeting", json!("hello")))
/// });
/// # let _ = greet;
/// ```
pub fn node_fn<F, Fut>(f: F) -> FnNode
where
    F: Fn(Value, ExecutionContext) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<NodeOutput, NodeError>> + Send + 'static,
{
    FnNode {
        inner: Arc::new(move |input, ctx| Box::pin(f(input, ctx))),
    }
}
