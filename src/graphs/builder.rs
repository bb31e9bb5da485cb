//! Fluent construction of workflow graphs.
//!
//! The builder collects channel specs and node wiring, then `compile()`
//! validates the topology and produces an immutable [`Graph`]. Validation
//! catches the configuration mistakes that otherwise surface as silent
//! no-op runs: triggers on undeclared channels, reads of unknown channels,
//! interrupts naming nodes that do not exist.

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::channels::ChannelSpec;
use crate::control::InterruptNodes;
use crate::graph::{Graph, NodeSpec, ReadSpec, WhenFn};
use crate::node::Node;
use crate::types::{branch_channel, is_reserved_channel, StreamMode};

/// Errors raised when a graph fails to compile.
#[derive(Debug, Error, Diagnostic)]
pub enum CompileError {
    #[error("graph has no nodes")]
    #[diagnostic(
        code(stepgraph::graphs::empty),
        help("Add at least one node before compiling.")
    )]
    EmptyGraph,

    #[error("node `{name}` registered twice")]
    #[diagnostic(code(stepgraph::graphs::duplicate_node))]
    DuplicateNode { name: String },

    #[error("channel `{name}` declared twice")]
    #[diagnostic(code(stepgraph::graphs::duplicate_channel))]
    DuplicateChannel { name: String },

    #[error("channel name `{name}` is reserved")]
    #[diagnostic(
        code(stepgraph::graphs::reserved_channel),
        help("Names starting with `__` or `branch:to:` belong to the runtime.")
    )]
    ReservedChannel { name: String },

    #[error("node `{node}` triggers on undeclared channel `{channel}`")]
    #[diagnostic(code(stepgraph::graphs::unknown_trigger))]
    UnknownTrigger { node: String, channel: String },

    #[error("node `{node}` reads undeclared channel `{channel}`")]
    #[diagnostic(code(stepgraph::graphs::unknown_read))]
    UnknownRead { node: String, channel: String },

    #[error("{role} channel `{channel}` is not declared")]
    #[diagnostic(code(stepgraph::graphs::unknown_io_channel))]
    UnknownIoChannel { role: &'static str, channel: String },

    #[error("interrupt references unknown node `{node}`")]
    #[diagnostic(code(stepgraph::graphs::unknown_interrupt_node))]
    UnknownInterruptNode { node: String },
}

/// Wiring for one node, fed to [`GraphBuilder::add_node`].
pub struct NodeBuilder {
    name: String,
    node: Arc<dyn Node>,
    triggers: Vec<String>,
    reads: Option<ReadSpec>,
    when: Option<WhenFn>,
}

impl NodeBuilder {
    #[must_use]
    pub fn new(name: impl Into<String>, node: impl Node + 'static) -> Self {
        NodeBuilder {
            name: name.into(),
            node: Arc::new(node),
            triggers: Vec::new(),
            reads: None,
            when: None,
        }
    }

    /// Channels whose version changes make this node eligible to fire.
    #[must_use]
    pub fn with_triggers<I, S>(mut self, triggers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.triggers.extend(triggers.into_iter().map(Into::into));
        self
    }

    /// Read a single required channel; its bare value becomes the input.
    #[must_use]
    pub fn reads_channel(mut self, channel: impl Into<String>) -> Self {
        self.reads = Some(ReadSpec::Single(channel.into()));
        self
    }

    /// Read several optional channels into an object keyed by channel name.
    #[must_use]
    pub fn reads_channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reads = Some(ReadSpec::Map(
            channels
                .into_iter()
                .map(Into::into)
                .map(|ch: String| (ch.clone(), ch))
                .collect(),
        ));
        self
    }

    /// Read several optional channels into an object with explicit aliases.
    #[must_use]
    pub fn reads_aliased<I, A, C>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = (A, C)>,
        A: Into<String>,
        C: Into<String>,
    {
        self.reads = Some(ReadSpec::Map(
            entries
                .into_iter()
                .map(|(a, c)| (a.into(), c.into()))
                .collect(),
        ));
        self
    }

    /// Gate firing on a predicate over the assembled input.
    #[must_use]
    pub fn when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.when = Some(Arc::new(predicate));
        self
    }
}

/// Builder for workflow graphs.
///
/// # Examples
///
/// ```rust
/// use serde_json::json;
/// use stepgraph::channels::ChannelSpec;
/// use stepgraph::graphs::{GraphBuilder, NodeBuilder};
/// use stepgraph::node::{node_fn, NodeOutput};
///
/// let counter = node_fn(|input, _ctx| async move {
///     let n = input.as_i64().unwrap_or(0);
///     Ok(NodeOutput::new().with_write("count", json!(n + 1)))
/// });
///
/// let graph = GraphBuilder::new()
///     .add_channel("start", ChannelSpec::last_value())
///     .add_channel(
///         "count",
///         ChannelSpec::aggregate(
///             |a, b| json!(a.as_i64().unwrap_or(0) + b.as_i64().unwrap_or(0)),
///             || json!(0),
///         ),
///     )
///     .add_node(
///         NodeBuilder::new("increment", counter)
///             .with_triggers(["start"])
///             .reads_channel("count"),
///     )
///     .with_input_channels(["start"])
///     .with_output_channels(["count"])
///     .compile()
///     .expect("valid graph");
/// # let _ = graph;
/// ```
pub struct GraphBuilder {
    channels: FxHashMap<String, ChannelSpec>,
    channel_order: Vec<String>,
    nodes: Vec<NodeBuilder>,
    input_channels: Option<Vec<String>>,
    output_channels: Option<Vec<String>>,
    stream_modes: Vec<StreamMode>,
    interrupt_before: InterruptNodes,
    interrupt_after: InterruptNodes,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuilder {
    #[must_use]
    pub fn new() -> Self {
        GraphBuilder {
            channels: FxHashMap::default(),
            channel_order: Vec::new(),
            nodes: Vec::new(),
            input_channels: None,
            output_channels: None,
            stream_modes: vec![StreamMode::Values],
            interrupt_before: InterruptNodes::default(),
            interrupt_after: InterruptNodes::default(),
        }
    }

    /// Declare a channel. Names starting with `__` or `branch:to:` are
    /// rejected at compile time.
    #[must_use]
    pub fn add_channel(mut self, name: impl Into<String>, spec: ChannelSpec) -> Self {
        let name = name.into();
        self.channels.insert(name.clone(), spec);
        // Declaration order is kept verbatim, duplicates included, so
        // compile() can report a duplicate instead of silently replacing it.
        self.channel_order.push(name);
        self
    }

    /// Register a node.
    #[must_use]
    pub fn add_node(mut self, node: NodeBuilder) -> Self {
        self.nodes.push(node);
        self
    }

    /// Restrict which channels external input maps through. Defaults to all
    /// declared channels.
    #[must_use]
    pub fn with_input_channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_channels = Some(channels.into_iter().map(Into::into).collect());
        self
    }

    /// Restrict which channels run output projects. Defaults to all declared
    /// channels.
    #[must_use]
    pub fn with_output_channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_channels = Some(channels.into_iter().map(Into::into).collect());
        self
    }

    /// Stream modes runs of this graph emit. Defaults to `values` only.
    #[must_use]
    pub fn with_stream_modes<I>(mut self, modes: I) -> Self
    where
        I: IntoIterator<Item = StreamMode>,
    {
        self.stream_modes = modes.into_iter().collect();
        self
    }

    /// Pause before the named nodes fire.
    #[must_use]
    pub fn with_interrupt_before(mut self, spec: InterruptNodes) -> Self {
        self.interrupt_before = spec;
        self
    }

    /// Pause after the named nodes complete.
    #[must_use]
    pub fn with_interrupt_after(mut self, spec: InterruptNodes) -> Self {
        self.interrupt_after = spec;
        self
    }

    /// Validate and produce the immutable [`Graph`].
    pub fn compile(self) -> Result<Graph, CompileError> {
        if self.nodes.is_empty() {
            return Err(CompileError::EmptyGraph);
        }

        let mut seen = FxHashMap::default();
        for name in &self.channel_order {
            if is_reserved_channel(name) {
                return Err(CompileError::ReservedChannel { name: name.clone() });
            }
            if seen.insert(name.clone(), ()).is_some() {
                return Err(CompileError::DuplicateChannel { name: name.clone() });
            }
        }

        let declared: Vec<String> = self.channel_order.clone();
        let mut channels = self.channels;

        // Every node gets an implicit ephemeral routing channel so
        // `Command::goto` can target it directly.
        for node in &self.nodes {
            channels.insert(branch_channel(&node.name), ChannelSpec::ephemeral());
        }

        let mut nodes: FxHashMap<String, NodeSpec> = FxHashMap::default();
        for builder in self.nodes {
            let NodeBuilder {
                name,
                node,
                mut triggers,
                reads,
                when,
            } = builder;
            if nodes.contains_key(&name) {
                return Err(CompileError::DuplicateNode { name });
            }
            for trigger in &triggers {
                if !channels.contains_key(trigger) {
                    return Err(CompileError::UnknownTrigger {
                        node: name.clone(),
                        channel: trigger.clone(),
                    });
                }
            }
            triggers.push(branch_channel(&name));
            let reads = reads.unwrap_or_else(|| {
                ReadSpec::Map(declared.iter().map(|c| (c.clone(), c.clone())).collect())
            });
            for channel in reads.channels() {
                if !channels.contains_key(channel) {
                    return Err(CompileError::UnknownRead {
                        node: name.clone(),
                        channel: channel.to_string(),
                    });
                }
            }
            if triggers.len() == 1 {
                tracing::warn!(
                    node = %name,
                    "node has no declared triggers; it only fires via explicit routing"
                );
            }
            nodes.insert(
                name,
                NodeSpec {
                    node,
                    triggers,
                    reads,
                    when,
                },
            );
        }

        for spec in [&self.interrupt_before, &self.interrupt_after] {
            if let InterruptNodes::Nodes(names) = spec {
                for name in names {
                    if !nodes.contains_key(name) {
                        return Err(CompileError::UnknownInterruptNode { node: name.clone() });
                    }
                }
            }
        }

        let input_channels = self.input_channels.unwrap_or_else(|| declared.clone());
        for channel in &input_channels {
            if !channels.contains_key(channel) {
                return Err(CompileError::UnknownIoChannel {
                    role: "input",
                    channel: channel.clone(),
                });
            }
        }
        let output_channels = self.output_channels.unwrap_or_else(|| declared.clone());
        for channel in &output_channels {
            if !channels.contains_key(channel) {
                return Err(CompileError::UnknownIoChannel {
                    role: "output",
                    channel: channel.clone(),
                });
            }
        }

        Ok(Graph {
            nodes,
            channels,
            input_channels,
            output_channels,
            stream_modes: self.stream_modes,
            interrupt_before: self.interrupt_before,
            interrupt_after: self.interrupt_after,
        })
    }
}
