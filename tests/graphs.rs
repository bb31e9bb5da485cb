mod common;

use serde_json::json;

use stepgraph::channels::ChannelSpec;
use stepgraph::control::InterruptNodes;
use stepgraph::graphs::{CompileError, GraphBuilder, NodeBuilder};
use stepgraph::types::branch_channel;

fn worker() -> stepgraph::node::FnNode {
    common::writer("out", json!(1))
}

#[test]
fn empty_graph_does_not_compile() {
    let err = GraphBuilder::new().compile().unwrap_err();
    assert!(matches!(err, CompileError::EmptyGraph));
}

#[test]
fn duplicate_nodes_are_rejected() {
    let err = GraphBuilder::new()
        .add_channel("start", ChannelSpec::last_value())
        .add_node(NodeBuilder::new("w", worker()).with_triggers(["start"]))
        .add_node(NodeBuilder::new("w", worker()).with_triggers(["start"]))
        .compile()
        .unwrap_err();
    assert!(matches!(err, CompileError::DuplicateNode { name } if name == "w"));
}

#[test]
fn duplicate_channels_are_rejected() {
    let err = GraphBuilder::new()
        .add_channel("start", ChannelSpec::last_value())
        .add_channel("start", ChannelSpec::any_value())
        .add_node(NodeBuilder::new("w", worker()).with_triggers(["start"]))
        .compile()
        .unwrap_err();
    assert!(matches!(err, CompileError::DuplicateChannel { name } if name == "start"));
}

#[test]
fn reserved_channel_names_are_rejected() {
    for reserved in ["__private".to_string(), branch_channel("x")] {
        let err = GraphBuilder::new()
            .add_channel(reserved.as_str(), ChannelSpec::last_value())
            .add_node(NodeBuilder::new("w", worker()))
            .compile()
            .unwrap_err();
        assert!(
            matches!(err, CompileError::ReservedChannel { .. }),
            "{reserved} should be reserved"
        );
    }
}

#[test]
fn unknown_trigger_and_read_channels_are_rejected() {
    let err = GraphBuilder::new()
        .add_channel("start", ChannelSpec::last_value())
        .add_node(NodeBuilder::new("w", worker()).with_triggers(["missing"]))
        .compile()
        .unwrap_err();
    assert!(matches!(
        err,
        CompileError::UnknownTrigger { node, channel } if node == "w" && channel == "missing"
    ));

    let err = GraphBuilder::new()
        .add_channel("start", ChannelSpec::last_value())
        .add_node(
            NodeBuilder::new("w", worker())
                .with_triggers(["start"])
                .reads_channel("missing"),
        )
        .compile()
        .unwrap_err();
    assert!(matches!(err, CompileError::UnknownRead { .. }));
}

#[test]
fn io_channels_must_be_declared() {
    let err = GraphBuilder::new()
        .add_channel("start", ChannelSpec::last_value())
        .add_node(NodeBuilder::new("w", worker()).with_triggers(["start"]))
        .with_input_channels(["nope"])
        .compile()
        .unwrap_err();
    assert!(matches!(
        err,
        CompileError::UnknownIoChannel { role: "input", .. }
    ));
}

#[test]
fn interrupts_must_reference_known_nodes() {
    let err = GraphBuilder::new()
        .add_channel("start", ChannelSpec::last_value())
        .add_node(NodeBuilder::new("w", worker()).with_triggers(["start"]))
        .with_interrupt_before(InterruptNodes::nodes(["ghost"]))
        .compile()
        .unwrap_err();
    assert!(matches!(err, CompileError::UnknownInterruptNode { node } if node == "ghost"));
}

#[test]
fn every_node_gets_an_implicit_branch_channel_trigger() {
    let graph = GraphBuilder::new()
        .add_channel("start", ChannelSpec::last_value())
        .add_node(NodeBuilder::new("w", worker()).with_triggers(["start"]))
        .compile()
        .unwrap();

    let spec = graph.nodes().get("w").unwrap();
    assert!(spec.triggers().contains(&branch_channel("w")));
    assert!(graph.channels().contains_key(&branch_channel("w")));
}
