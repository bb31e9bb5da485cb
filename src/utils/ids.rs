//! Identifier generation for checkpoints and tasks.
//!
//! Checkpoint ids are UUIDv7: the timestamp sits in the high bits, so the
//! hyphenated string form sorts lexicographically in chronological order and
//! a plain string sort over ids is a time-travel ordering. A process-wide
//! guard keeps ids strictly increasing even when two checkpoints land in the
//! same millisecond.
//!
//! Task ids are UUIDv5 over `(checkpoint_id, node_name, sorted triggers)`
//! under a fixed namespace, so identical tasks across restarts hash to the
//! same id and previously persisted writes can be re-attached on resume.

use parking_lot::Mutex;
use uuid::Uuid;

/// Namespace for deterministic task ids. Fixed forever; changing it would
/// orphan every persisted pending write.
const TASK_ID_NAMESPACE: Uuid = Uuid::from_u128(0x3e6f_89a2_41d7_4c5b_9b1e_7d2a_5c48_f0a1);

static LAST_CHECKPOINT_ID: Mutex<Option<String>> = Mutex::new(None);

/// A fresh, monotonically increasing checkpoint id.
#[must_use]
pub fn checkpoint_id() -> String {
    let mut last = LAST_CHECKPOINT_ID.lock();
    loop {
        let candidate = Uuid::now_v7().to_string();
        if last.as_deref().is_none_or(|prev| candidate.as_str() > prev) {
            *last = Some(candidate.clone());
            return candidate;
        }
        // Same-millisecond collision with unlucky random bits; retry.
        std::hint::spin_loop();
    }
}

/// Deterministic task id for `(checkpoint_id, node, triggers)`.
///
/// Trigger order is normalized by sorting, so the id is stable however the
/// scheduler enumerated the channels.
#[must_use]
pub fn task_id(checkpoint_id: &str, node: &str, triggers: &[String]) -> String {
    let mut sorted: Vec<&str> = triggers.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    let seed = format!("{checkpoint_id}|{node}|{}", sorted.join(","));
    Uuid::new_v5(&TASK_ID_NAMESPACE, seed.as_bytes()).to_string()
}
