mod common;

use serde_json::json;

use stepgraph::channels::ChannelSpec;
use stepgraph::checkpoint::{channels_from_checkpoint, Checkpoint};
use stepgraph::graph::Graph;
use stepgraph::graphs::{GraphBuilder, NodeBuilder};
use stepgraph::schedulers::{prepare_next_tasks, prepare_task_preview};
use stepgraph::types::ChannelVersion;

fn two_node_graph() -> Graph {
    GraphBuilder::new()
        .add_channel("start", ChannelSpec::last_value())
        .add_channel("other", ChannelSpec::last_value())
        .add_node(
            NodeBuilder::new("alpha", common::writer("other", json!("a")))
                .with_triggers(["start"])
                .reads_channels(["start"]),
        )
        .add_node(
            NodeBuilder::new("zeta", common::writer("start", json!("z")))
                .with_triggers(["other"])
                .reads_channels(["other"]),
        )
        .compile()
        .expect("valid graph")
}

fn checkpoint_with(versions: &[(&str, u64)], values: &[(&str, serde_json::Value)]) -> Checkpoint {
    let mut cp = Checkpoint::empty();
    for (name, v) in versions {
        cp.channel_versions
            .insert((*name).to_string(), ChannelVersion::Int(*v));
    }
    for (name, value) in values {
        cp.channel_values.insert((*name).to_string(), value.clone());
    }
    cp
}

#[test]
fn nothing_fires_without_channel_versions() {
    let graph = two_node_graph();
    let cp = Checkpoint::empty();
    let channels = channels_from_checkpoint(graph.channels(), &cp);
    assert!(prepare_next_tasks(&cp, &graph, &channels).is_empty());
}

#[test]
fn a_node_fires_when_its_trigger_version_is_unseen() {
    let graph = two_node_graph();
    let cp = checkpoint_with(&[("start", 1)], &[("start", json!(true))]);
    let channels = channels_from_checkpoint(graph.channels(), &cp);

    let tasks = prepare_next_tasks(&cp, &graph, &channels);
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].name, "alpha");
    assert_eq!(tasks[0].triggers, vec!["start".to_string()]);
    assert_eq!(tasks[0].input, json!({"start": true}));
}

#[test]
fn versions_seen_gates_refiring() {
    let graph = two_node_graph();
    let mut cp = checkpoint_with(&[("start", 3)], &[("start", json!(true))]);
    cp.versions_seen
        .entry("alpha".into())
        .or_default()
        .insert("start".into(), ChannelVersion::Int(3));
    let channels = channels_from_checkpoint(graph.channels(), &cp);
    assert!(prepare_next_tasks(&cp, &graph, &channels).is_empty());

    // A newer version on the trigger makes the node fresh again.
    cp.channel_versions
        .insert("start".into(), ChannelVersion::Int(4));
    let tasks = prepare_next_tasks(&cp, &graph, &channels);
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].name, "alpha");
}

#[test]
fn tasks_are_ordered_by_node_name() {
    let graph = two_node_graph();
    let cp = checkpoint_with(
        &[("start", 1), ("other", 1)],
        &[("start", json!(1)), ("other", json!(2))],
    );
    let channels = channels_from_checkpoint(graph.channels(), &cp);
    let tasks = prepare_next_tasks(&cp, &graph, &channels);
    let names: Vec<&str> = tasks.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["alpha", "zeta"]);
}

#[test]
fn task_ids_are_stable_across_replays() {
    let graph = two_node_graph();
    let cp = checkpoint_with(&[("start", 1)], &[("start", json!(true))]);
    let channels = channels_from_checkpoint(graph.channels(), &cp);
    let first = prepare_next_tasks(&cp, &graph, &channels);
    let second = prepare_next_tasks(&cp, &graph, &channels);
    assert_eq!(first[0].id, second[0].id);

    // A different checkpoint id produces a different task id.
    let other = checkpoint_with(&[("start", 1)], &[("start", json!(true))]);
    let other_tasks = prepare_next_tasks(&other, &graph, &channels);
    assert_ne!(first[0].id, other_tasks[0].id);
}

#[test]
fn missing_required_read_skips_the_node_silently() {
    let graph = GraphBuilder::new()
        .add_channel("start", ChannelSpec::last_value())
        .add_channel("payload", ChannelSpec::last_value())
        .add_node(
            NodeBuilder::new("consumer", common::echo_input("out_unused"))
                .with_triggers(["start"])
                .reads_channel("payload"),
        )
        .add_channel("out_unused", ChannelSpec::any_value())
        .compile()
        .expect("valid graph");
    let cp = checkpoint_with(&[("start", 1)], &[("start", json!(true))]);
    let channels = channels_from_checkpoint(graph.channels(), &cp);
    assert!(prepare_next_tasks(&cp, &graph, &channels).is_empty());
}

#[test]
fn when_predicate_vetoes_firing() {
    let graph = GraphBuilder::new()
        .add_channel("start", ChannelSpec::last_value())
        .add_node(
            NodeBuilder::new("guarded", common::writer("start", json!(1)))
                .with_triggers(["start"])
                .reads_channels(["start"])
                .when(|input| input.get("start") == Some(&json!("go"))),
        )
        .compile()
        .expect("valid graph");

    let cp = checkpoint_with(&[("start", 1)], &[("start", json!("halt"))]);
    let channels = channels_from_checkpoint(graph.channels(), &cp);
    assert!(prepare_next_tasks(&cp, &graph, &channels).is_empty());

    let cp = checkpoint_with(&[("start", 1)], &[("start", json!("go"))]);
    let channels = channels_from_checkpoint(graph.channels(), &cp);
    assert_eq!(prepare_next_tasks(&cp, &graph, &channels).len(), 1);
}

#[test]
fn preview_lists_triggered_nodes_without_inputs() {
    let graph = two_node_graph();
    let cp = checkpoint_with(&[("start", 1), ("other", 2)], &[]);
    let previews = prepare_task_preview(&cp, &graph);
    let names: Vec<&str> = previews.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["alpha", "zeta"]);
}
