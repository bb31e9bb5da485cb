//! Control-flow values exchanged between nodes, the loop, and the caller.
//!
//! Commands are kept separate from ordinary channel writes so nodes and
//! callers can express routing and resumption intent without reaching into
//! loop state directly. The loop turns `update` entries into normal writes,
//! `goto` entries into writes on the target nodes' branch channels, and
//! `resume` payloads into return values for suspended `interrupt` calls.

use serde_json::Value;

use crate::types::branch_channel;

/// An explicit routing target, optionally carrying a payload for the target
/// node's branch channel.
#[derive(Clone, Debug, PartialEq)]
pub struct SendTo {
    pub node: String,
    pub input: Value,
}

impl SendTo {
    #[must_use]
    pub fn new(node: impl Into<String>) -> Self {
        SendTo {
            node: node.into(),
            input: Value::Null,
        }
    }

    #[must_use]
    pub fn with_input(node: impl Into<String>, input: Value) -> Self {
        SendTo {
            node: node.into(),
            input,
        }
    }

    /// The write realizing this routing decision.
    #[must_use]
    pub fn into_write(self) -> (String, Value) {
        (branch_channel(&self.node), self.input)
    }
}

/// A structured instruction from a node's return value or from the caller
/// when (re)starting a run.
///
/// All fields compose: a single command may update state, reroute the next
/// superstep, and resume a suspended interrupt.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Command {
    /// Channel writes applied as if produced by a regular task.
    pub update: Vec<(String, Value)>,
    /// Next-task overrides, realized as branch-channel writes.
    pub goto: Vec<SendTo>,
    /// Value injected into the suspended `interrupt` call on resume.
    pub resume: Option<Value>,
}

impl Command {
    #[must_use]
    pub fn new() -> Self {
        Command::default()
    }

    /// A command that resumes a suspended interrupt with `value`.
    #[must_use]
    pub fn resume(value: Value) -> Self {
        Command {
            resume: Some(value),
            ..Command::default()
        }
    }

    #[must_use]
    pub fn with_update(mut self, channel: impl Into<String>, value: Value) -> Self {
        self.update.push((channel.into(), value));
        self
    }

    #[must_use]
    pub fn with_goto(mut self, target: impl Into<String>) -> Self {
        self.goto.push(SendTo::new(target));
        self
    }

    #[must_use]
    pub fn with_send(mut self, send: SendTo) -> Self {
        self.goto.push(send);
        self
    }

    /// Flatten `update` and `goto` into the write list the loop applies.
    #[must_use]
    pub fn into_writes(self) -> Vec<(String, Value)> {
        let mut writes = self.update;
        writes.extend(self.goto.into_iter().map(SendTo::into_write));
        writes
    }
}

/// A dynamic suspension raised by a running node via
/// [`ExecutionContext::interrupt`](crate::context::ExecutionContext::interrupt).
///
/// The id is the interrupted task's deterministic id, so it is stable across
/// restarts and a caller can correlate the interrupt with its resume.
#[derive(Clone, Debug, PartialEq)]
pub struct Interrupt {
    pub id: String,
    pub value: Value,
}

/// Which nodes a static interrupt applies to.
#[derive(Clone, Debug, PartialEq)]
pub enum InterruptNodes {
    /// Interrupt around every node.
    All,
    /// Interrupt around the named nodes only. Empty = never.
    Nodes(Vec<String>),
}

impl Default for InterruptNodes {
    fn default() -> Self {
        InterruptNodes::Nodes(Vec::new())
    }
}

impl InterruptNodes {
    #[must_use]
    pub fn nodes<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        InterruptNodes::Nodes(names.into_iter().map(Into::into).collect())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, InterruptNodes::Nodes(names) if names.is_empty())
    }

    #[must_use]
    pub fn matches(&self, node: &str) -> bool {
        match self {
            InterruptNodes::All => true,
            InterruptNodes::Nodes(names) => names.iter().any(|n| n == node),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn command_flattens_goto_into_branch_writes() {
        let writes = Command::new()
            .with_update("color", json!("blue"))
            .with_goto("painter")
            .into_writes();
        assert_eq!(writes[0], ("color".into(), json!("blue")));
        assert_eq!(writes[1].0, "branch:to:painter");
    }

    #[test]
    fn interrupt_nodes_matching() {
        assert!(InterruptNodes::All.matches("anything"));
        let some = InterruptNodes::nodes(["approve"]);
        assert!(some.matches("approve"));
        assert!(!some.matches("other"));
        assert!(InterruptNodes::default().is_empty());
    }
}
