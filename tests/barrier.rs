use rustc_hash::FxHashMap;
use serde_json::json;

use stepgraph::channels::{Channel, ChannelError, ChannelSpec};
use stepgraph::checkpoint::Checkpoint;
use stepgraph::runtimes::{apply_writes, default_next_version, WriteEntry};
use stepgraph::types::ChannelVersion;

fn channel_set(specs: &[(&str, ChannelSpec)]) -> FxHashMap<String, Channel> {
    specs
        .iter()
        .map(|(name, spec)| ((*name).to_string(), spec.restore(name, None)))
        .collect()
}

fn entry(name: &str, triggers: &[&str], writes: &[(&str, serde_json::Value)]) -> WriteEntry {
    WriteEntry {
        name: name.to_string(),
        triggers: triggers.iter().map(|t| (*t).to_string()).collect(),
        writes: writes
            .iter()
            .map(|(c, v)| ((*c).to_string(), v.clone()))
            .collect(),
    }
}

#[test]
fn mutated_channels_get_fresh_versions_and_mirrored_values() {
    let mut cp = Checkpoint::empty();
    let mut channels = channel_set(&[("a", ChannelSpec::last_value())]);
    let next = default_next_version();

    let updated = apply_writes(
        &mut cp,
        &mut channels,
        &[entry("writer", &[], &[("a", json!("x"))])],
        &next,
    )
    .unwrap();

    assert_eq!(updated, vec!["a".to_string()]);
    assert_eq!(cp.channel_versions.get("a"), Some(&ChannelVersion::Int(1)));
    assert_eq!(cp.channel_values.get("a"), Some(&json!("x")));
}

#[test]
fn versions_seen_records_the_versions_that_fired_the_task() {
    let mut cp = Checkpoint::empty();
    cp.channel_versions
        .insert("trigger".into(), ChannelVersion::Int(5));
    let mut channels = channel_set(&[
        ("trigger", ChannelSpec::last_value()),
        ("out", ChannelSpec::last_value()),
    ]);
    let next = default_next_version();

    apply_writes(
        &mut cp,
        &mut channels,
        &[entry("worker", &["trigger"], &[("out", json!(1))])],
        &next,
    )
    .unwrap();

    // The pre-bump version is recorded, so a task writing its own trigger
    // channel fires again next superstep.
    assert_eq!(
        cp.versions_seen.get("worker").and_then(|s| s.get("trigger")),
        Some(&ChannelVersion::Int(5))
    );
}

#[test]
fn same_channel_writes_preserve_task_emission_order() {
    let mut cp = Checkpoint::empty();
    let mut channels = channel_set(&[("log", ChannelSpec::topic(false, true))]);
    let next = default_next_version();

    apply_writes(
        &mut cp,
        &mut channels,
        &[
            entry("a", &[], &[("log", json!("first")), ("log", json!("second"))]),
            entry("b", &[], &[("log", json!("third"))]),
        ],
        &next,
    )
    .unwrap();

    assert_eq!(
        channels.get("log").unwrap().get().unwrap(),
        json!(["first", "second", "third"])
    );
}

#[test]
fn sweep_clears_self_clearing_channels_without_bumping_versions() {
    let mut cp = Checkpoint::empty();
    let mut channels = channel_set(&[
        ("eph", ChannelSpec::ephemeral()),
        ("keep", ChannelSpec::last_value()),
    ]);
    let next = default_next_version();

    // Superstep 1: both channels written.
    apply_writes(
        &mut cp,
        &mut channels,
        &[entry("w", &[], &[("eph", json!("x")), ("keep", json!("y"))])],
        &next,
    )
    .unwrap();
    assert_eq!(cp.channel_versions.get("eph"), Some(&ChannelVersion::Int(1)));
    assert_eq!(cp.channel_values.get("eph"), Some(&json!("x")));

    // Superstep 2: neither written; the ephemeral clears (value dropped
    // from the checkpoint, version untouched so subscribers do not
    // re-fire), the last-value keeps both value and version.
    let updated = apply_writes(&mut cp, &mut channels, &[], &next).unwrap();
    assert!(updated.is_empty());
    assert_eq!(cp.channel_versions.get("eph"), Some(&ChannelVersion::Int(1)));
    assert!(!cp.channel_values.contains_key("eph"));
    assert!(!channels.get("eph").unwrap().is_available());
    assert_eq!(cp.channel_versions.get("keep"), Some(&ChannelVersion::Int(1)));
    assert_eq!(channels.get("keep").unwrap().get().unwrap(), json!("y"));
}

#[test]
fn invalid_update_aborts_the_superstep() {
    let mut cp = Checkpoint::empty();
    let mut channels = channel_set(&[("single", ChannelSpec::last_value())]);
    let next = default_next_version();

    let err = apply_writes(
        &mut cp,
        &mut channels,
        &[
            entry("a", &[], &[("single", json!(1))]),
            entry("b", &[], &[("single", json!(2))]),
        ],
        &next,
    )
    .unwrap_err();
    assert!(matches!(err, ChannelError::InvalidUpdate { .. }));
}

#[test]
fn writes_to_pseudo_channels_are_ignored() {
    let mut cp = Checkpoint::empty();
    let mut channels = channel_set(&[("real", ChannelSpec::last_value())]);
    let next = default_next_version();

    let updated = apply_writes(
        &mut cp,
        &mut channels,
        &[entry(
            "w",
            &[],
            &[
                ("real", json!(1)),
                (stepgraph::types::ERROR, json!("boom")),
                (stepgraph::types::INTERRUPT, json!("pause")),
            ],
        )],
        &next,
    )
    .unwrap();

    assert_eq!(updated, vec!["real".to_string()]);
    assert!(!cp.channel_versions.contains_key(stepgraph::types::ERROR));
}

#[test]
fn versions_never_decrease_across_supersteps() {
    let mut cp = Checkpoint::empty();
    let mut channels = channel_set(&[("a", ChannelSpec::any_value())]);
    let next = default_next_version();

    let mut last = ChannelVersion::Int(0);
    for step in 0..10 {
        apply_writes(
            &mut cp,
            &mut channels,
            &[entry("w", &[], &[("a", json!(step))])],
            &next,
        )
        .unwrap();
        let current = cp.channel_versions.get("a").unwrap().clone();
        assert!(current > last, "version regressed at step {step}");
        last = current;
    }
}
