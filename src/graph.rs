//! The compiled graph: the loop's read-only view of topology.
//!
//! A [`Graph`] holds channel specs, node specs keyed by name, the
//! input/output channel subsets used to map run input and output, the
//! subscribed stream modes, and the static interrupt configuration. It is
//! produced by [`GraphBuilder`](crate::graphs::GraphBuilder) and shared
//! immutably by every run.

use rustc_hash::FxHashMap;
use serde_json::Value;
use std::sync::Arc;

use crate::channels::ChannelSpec;
use crate::control::InterruptNodes;
use crate::node::Node;
use crate::types::StreamMode;

/// Predicate gating whether a triggered node actually fires on its input.
pub type WhenFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// How a node's input is assembled from its join channels.
#[derive(Clone, Debug)]
pub enum ReadSpec {
    /// Read a single channel; its bare value becomes the node input. The
    /// channel is required: if it is empty the node is skipped this step.
    Single(String),
    /// Read several channels into a JSON object keyed by alias. Each entry
    /// is optional: empty channels simply contribute nothing.
    Map(Vec<(String, String)>),
}

impl ReadSpec {
    /// Channel names this spec reads.
    pub fn channels(&self) -> Vec<&str> {
        match self {
            ReadSpec::Single(name) => vec![name.as_str()],
            ReadSpec::Map(entries) => entries.iter().map(|(_, ch)| ch.as_str()).collect(),
        }
    }
}

/// One node's wiring: executable, trigger channels, join channels, and an
/// optional firing predicate.
#[derive(Clone)]
pub struct NodeSpec {
    pub(crate) node: Arc<dyn Node>,
    pub(crate) triggers: Vec<String>,
    pub(crate) reads: ReadSpec,
    pub(crate) when: Option<WhenFn>,
}

impl NodeSpec {
    /// Trigger channels: a version change on any of these makes the node
    /// eligible to fire.
    #[must_use]
    pub fn triggers(&self) -> &[String] {
        &self.triggers
    }

    /// Join channels the node reads as input.
    #[must_use]
    pub fn reads(&self) -> &ReadSpec {
        &self.reads
    }

    #[must_use]
    pub fn executable(&self) -> Arc<dyn Node> {
        Arc::clone(&self.node)
    }

    #[must_use]
    pub fn when(&self) -> Option<&WhenFn> {
        self.when.as_ref()
    }
}

impl std::fmt::Debug for NodeSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSpec")
            .field("triggers", &self.triggers)
            .field("reads", &self.reads)
            .field("when", &self.when.is_some())
            .finish()
    }
}

/// Compiled workflow topology consumed by the loop.
#[derive(Clone, Debug)]
pub struct Graph {
    pub(crate) nodes: FxHashMap<String, NodeSpec>,
    pub(crate) channels: FxHashMap<String, ChannelSpec>,
    pub(crate) input_channels: Vec<String>,
    pub(crate) output_channels: Vec<String>,
    pub(crate) stream_modes: Vec<StreamMode>,
    pub(crate) interrupt_before: InterruptNodes,
    pub(crate) interrupt_after: InterruptNodes,
}

impl Graph {
    /// Registered nodes keyed by name.
    #[must_use]
    pub fn nodes(&self) -> &FxHashMap<String, NodeSpec> {
        &self.nodes
    }

    /// Channel specs keyed by name, including the implicit branch channels.
    #[must_use]
    pub fn channels(&self) -> &FxHashMap<String, ChannelSpec> {
        &self.channels
    }

    /// Channels external input is mapped through.
    #[must_use]
    pub fn input_channels(&self) -> &[String] {
        &self.input_channels
    }

    /// Channels projected into run output and `values` stream events.
    #[must_use]
    pub fn output_channels(&self) -> &[String] {
        &self.output_channels
    }

    /// Stream modes runs of this graph emit.
    #[must_use]
    pub fn stream_modes(&self) -> &[StreamMode] {
        &self.stream_modes
    }

    #[must_use]
    pub fn interrupt_before(&self) -> &InterruptNodes {
        &self.interrupt_before
    }

    #[must_use]
    pub fn interrupt_after(&self) -> &InterruptNodes {
        &self.interrupt_after
    }
}
