//! # Stepgraph: Pregel-style Superstep Execution Runtime
//!
//! Stepgraph drives a user-defined directed graph of async *nodes*
//! communicating through versioned *channels*, with durable checkpointing,
//! interrupt/resume semantics, and multi-mode streaming output.
//!
//! ## Core Concepts
//!
//! - **Channels**: Typed mutable cells of graph state; each accepts one
//!   batch of writes per superstep and checkpoints itself
//! - **Nodes**: Async units of work fired when a trigger channel's version
//!   advances past what the node last observed
//! - **Supersteps**: One cycle of apply writes → checkpoint → select tasks →
//!   execute → collect writes
//! - **Checkpoints**: Durable, time-ordered snapshots enabling crash
//!   recovery, human-in-the-loop pauses, and time travel
//! - **Streaming**: `values` / `updates` / `debug` events multiplexed to the
//!   subscribed consumer
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use serde_json::json;
//! use stepgraph::channels::ChannelSpec;
//! use stepgraph::graphs::{GraphBuilder, NodeBuilder};
//! use stepgraph::node::{node_fn, NodeOutput};
//! use stepgraph::runtimes::{GraphInput, GraphRunner, RunnerConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let increment = node_fn(|input, _ctx| async move {
//!     let count = input.as_i64().unwrap_or(0);
//!     Ok(NodeOutput::new().with_write("count", json!(count + 1)))
//! });
//!
//! let graph = GraphBuilder::new()
//!     .add_channel("start", ChannelSpec::last_value())
//!     .add_channel(
//!         "count",
//!         ChannelSpec::aggregate(
//!             |a, b| json!(a.as_i64().unwrap_or(0) + b.as_i64().unwrap_or(0)),
//!             || json!(0),
//!         ),
//!     )
//!     .add_node(
//!         NodeBuilder::new("increment", increment)
//!             .with_triggers(["start"])
//!             .reads_channel("count"),
//!     )
//!     .with_input_channels(["start"])
//!     .with_output_channels(["count"])
//!     .compile()?;
//!
//! let runner = GraphRunner::new(graph);
//! let outcome = runner
//!     .invoke(GraphInput::Values(json!({"start": true})), RunnerConfig::default())
//!     .await?;
//! assert_eq!(outcome.values.get("count"), Some(&json!(1)));
//! # Ok(())
//! # }
//! ```
//!
//! ## Interrupts and Resumption
//!
//! Static interrupts pause a thread before or after named nodes; dynamic
//! interrupts let a running node suspend itself mid-execution via
//! [`context::ExecutionContext::interrupt`]. Either way the thread's state
//! is durable: a later run on the same thread with
//! [`runtimes::GraphInput::Resume`] (or a
//! [`control::Command::resume`] payload) picks up exactly where it stopped,
//! re-attaching any persisted pending writes to their tasks by
//! deterministic task id.
//!
//! ## Module Guide
//!
//! - [`channels`] - Channel variants and update semantics
//! - [`checkpoint`] - Checkpoint records, pending writes, migration
//! - [`graphs`] - Graph construction and validation
//! - [`node`] - Node trait and execution primitives
//! - [`context`] - Execution context handed to nodes
//! - [`control`] - Commands, interrupts, routing
//! - [`schedulers`] - Version-gated task selection
//! - [`runtimes`] - Loop, driver, checkpointers, persistence
//! - [`stream`] - Multi-mode output streaming
//! - [`types`] - Version tokens and reserved names

pub mod channels;
pub mod checkpoint;
pub mod context;
pub mod control;
pub mod graph;
pub mod graphs;
pub mod node;
pub mod runtimes;
pub mod schedulers;
pub mod stream;
pub mod telemetry;
pub mod types;
pub mod utils;
