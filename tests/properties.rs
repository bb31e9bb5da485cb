use proptest::prelude::*;
use rustc_hash::FxHashMap;
use serde_json::json;

use stepgraph::channels::{Channel, ChannelSpec};
use stepgraph::checkpoint::Checkpoint;
use stepgraph::runtimes::{
    apply_writes, default_next_version, from_json_str, to_json_string, PersistedCheckpoint,
    WriteEntry,
};
use stepgraph::types::ChannelVersion;

const CHANNEL_NAMES: [&str; 3] = ["alpha", "beta", "gamma"];

fn channel_set() -> FxHashMap<String, Channel> {
    CHANNEL_NAMES
        .iter()
        .map(|name| {
            (
                (*name).to_string(),
                ChannelSpec::any_value().restore(name, None),
            )
        })
        .collect()
}

proptest! {
    #[test]
    fn integer_versions_are_strictly_increasing(start in 0u64..1_000_000u64) {
        let current = ChannelVersion::Int(start);
        let next = ChannelVersion::next(Some(&current));
        prop_assert!(next > current);
    }

    #[test]
    fn text_versions_are_strictly_increasing(token in "[a-z0-9]{1,16}") {
        let current = ChannelVersion::Text(token);
        let next = ChannelVersion::next(Some(&current));
        prop_assert!(next > current);
    }

    #[test]
    fn channel_versions_never_decrease_under_random_writes(
        batches in prop::collection::vec(
            prop::collection::vec((0usize..3, any::<i64>()), 0..4),
            1..16,
        )
    ) {
        let mut checkpoint = Checkpoint::empty();
        let mut channels = channel_set();
        let next = default_next_version();
        let mut high_water: FxHashMap<String, ChannelVersion> = FxHashMap::default();

        for batch in batches {
            let writes: Vec<(String, serde_json::Value)> = batch
                .into_iter()
                .map(|(idx, value)| (CHANNEL_NAMES[idx].to_string(), json!(value)))
                .collect();
            let entry = WriteEntry {
                name: "writer".to_string(),
                triggers: Vec::new(),
                writes,
            };
            apply_writes(&mut checkpoint, &mut channels, &[entry], &next).unwrap();

            for (name, version) in &checkpoint.channel_versions {
                if let Some(previous) = high_water.get(name) {
                    prop_assert!(version >= previous, "version of {name} regressed");
                }
                high_water.insert(name.clone(), version.clone());
            }
        }
    }

    #[test]
    fn checkpoints_round_trip_through_the_wire_format(
        entries in prop::collection::vec(("[a-z]{1,8}", any::<i64>()), 0..8)
    ) {
        let mut checkpoint = Checkpoint::empty();
        for (index, (name, value)) in entries.into_iter().enumerate() {
            checkpoint.channel_values.insert(name.clone(), json!(value));
            checkpoint
                .channel_versions
                .insert(name.clone(), ChannelVersion::Int(index as u64 + 1));
            checkpoint
                .versions_seen
                .entry("node".to_string())
                .or_default()
                .insert(name, ChannelVersion::Int(index as u64 + 1));
        }

        let wire = PersistedCheckpoint::from(&checkpoint);
        let encoded = to_json_string(&wire).unwrap();
        let decoded: PersistedCheckpoint = from_json_str(&encoded).unwrap();
        let restored = Checkpoint::try_from(decoded).unwrap();
        prop_assert_eq!(restored, checkpoint);
    }
}
