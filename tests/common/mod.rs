//! Shared fixtures for integration tests.

#![allow(dead_code)]

use serde_json::{json, Value};
use stepgraph::channels::ChannelSpec;
use stepgraph::node::{node_fn, FnNode, NodeOutput};

/// An integer-sum aggregate channel seeded at zero.
pub fn sum_channel() -> ChannelSpec {
    ChannelSpec::aggregate(
        |a, b| json!(a.as_i64().unwrap_or(0) + b.as_i64().unwrap_or(0)),
        || json!(0),
    )
}

/// A node that writes a fixed value to a fixed channel.
pub fn writer(channel: &str, value: Value) -> FnNode {
    let channel = channel.to_string();
    node_fn(move |_input, _ctx| {
        let channel = channel.clone();
        let value = value.clone();
        async move { Ok(NodeOutput::new().with_write(channel, value)) }
    })
}

/// A node that echoes its assembled input onto a channel.
pub fn echo_input(channel: &str) -> FnNode {
    let channel = channel.to_string();
    node_fn(move |input, _ctx| {
        let channel = channel.clone();
        async move { Ok(NodeOutput::new().with_write(channel, input)) }
    })
}
