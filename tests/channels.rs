use serde_json::json;

use stepgraph::channels::{ChannelError, ChannelSpec};

/********************
 * LastValue laws
 ********************/

#[test]
fn last_value_without_default_is_empty() {
    let ch = ChannelSpec::last_value().restore("cfg", None);
    assert!(!ch.is_available());
    assert!(matches!(
        ch.get(),
        Err(ChannelError::EmptyChannel { .. })
    ));
}

#[test]
fn last_value_accepts_every_falsy_value() {
    for falsy in [json!(0), json!(""), json!(false), json!(null)] {
        let mut ch = ChannelSpec::last_value().restore("cfg", None);
        assert!(ch.update(vec![falsy.clone()]).unwrap());
        assert!(ch.is_available(), "falsy value {falsy} must count as written");
        assert_eq!(ch.get().unwrap(), falsy);
    }
}

#[test]
fn last_value_empty_update_is_noop() {
    let mut ch = ChannelSpec::last_value().restore("cfg", Some(json!("kept")));
    assert!(!ch.update(vec![]).unwrap());
    assert_eq!(ch.get().unwrap(), json!("kept"));
}

#[test]
fn last_value_two_updates_in_one_superstep_fail() {
    let mut ch = ChannelSpec::last_value().restore("cfg", None);
    let err = ch.update(vec![json!(1), json!(2)]).unwrap_err();
    assert!(matches!(err, ChannelError::InvalidUpdate { channel, .. } if channel == "cfg"));
}

/********************
 * AnyValue
 ********************/

#[test]
fn any_value_keeps_the_final_update() {
    let mut ch = ChannelSpec::any_value().restore("latest", None);
    assert!(ch.update(vec![json!(1), json!(2), json!(3)]).unwrap());
    assert_eq!(ch.get().unwrap(), json!(3));
}

/********************
 * Topic options
 ********************/

#[test]
fn topic_accumulate_retains_across_supersteps() {
    let mut ch = ChannelSpec::topic(false, true).restore("log", None);
    ch.update(vec![json!("a")]).unwrap();
    ch.update(vec![json!("b")]).unwrap();
    assert_eq!(ch.get().unwrap(), json!(["a", "b"]));
    // Empty update leaves an accumulating topic unchanged.
    assert!(!ch.update(vec![]).unwrap());
    assert_eq!(ch.get().unwrap(), json!(["a", "b"]));
}

#[test]
fn topic_non_accumulate_resets_each_superstep() {
    let mut ch = ChannelSpec::topic(false, false).restore("batch", None);
    ch.update(vec![json!("a"), json!("b")]).unwrap();
    ch.update(vec![json!("c")]).unwrap();
    assert_eq!(ch.get().unwrap(), json!(["c"]));
    // Empty update clears a non-accumulating topic.
    assert!(ch.update(vec![]).unwrap());
    assert!(!ch.is_available());
}

#[test]
fn topic_unique_deduplicates() {
    let mut ch = ChannelSpec::topic(true, true).restore("seen", None);
    ch.update(vec![json!(1), json!(1), json!(2)]).unwrap();
    ch.update(vec![json!(2), json!(3)]).unwrap();
    assert_eq!(ch.get().unwrap(), json!([1, 2, 3]));
}

/********************
 * Ephemeral
 ********************/

#[test]
fn ephemeral_value_survives_exactly_one_superstep() {
    let mut ch = ChannelSpec::ephemeral().restore("tmp", None);
    ch.update(vec![json!("x")]).unwrap();
    assert_eq!(ch.get().unwrap(), json!("x"));
    // The per-superstep sweep clears it.
    assert!(ch.update(vec![]).unwrap());
    assert!(matches!(ch.get(), Err(ChannelError::EmptyChannel { .. })));
}

/********************
 * Aggregate
 ********************/

#[test]
fn aggregate_reduces_with_factory_seed() {
    let mut ch = ChannelSpec::aggregate(
        |a, b| json!(a.as_i64().unwrap_or(0) + b.as_i64().unwrap_or(0)),
        || json!(10),
    )
    .restore("sum", None);
    assert!(ch.is_available());
    assert_eq!(ch.get().unwrap(), json!(10));
    ch.update(vec![json!(1), json!(2)]).unwrap();
    assert_eq!(ch.get().unwrap(), json!(13));
}

#[test]
fn aggregate_restores_from_checkpoint_value() {
    let spec = ChannelSpec::aggregate(
        |a, b| json!(a.as_i64().unwrap_or(0) + b.as_i64().unwrap_or(0)),
        || json!(0),
    );
    let mut ch = spec.restore("sum", None);
    ch.update(vec![json!(5)]).unwrap();
    let snapshot = ch.checkpoint().unwrap();
    let restored = spec.restore("sum", Some(snapshot));
    assert_eq!(restored.get().unwrap(), json!(5));
}

/********************
 * Untracked
 ********************/

#[test]
fn untracked_checkpoint_is_always_empty() {
    let mut ch = ChannelSpec::untracked(|| json!({"conn": "local"})).restore("scratch", None);
    ch.update(vec![json!({"conn": "remote"})]).unwrap();
    assert_eq!(ch.checkpoint(), None);
    assert_eq!(ch.get().unwrap(), json!({"conn": "remote"}));
}

#[test]
fn untracked_restore_resets_to_factory() {
    let restored =
        ChannelSpec::untracked(|| json!("fresh")).restore("scratch", Some(json!("stale")));
    assert_eq!(restored.get().unwrap(), json!("fresh"));
}
