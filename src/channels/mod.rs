//! Channel-based state storage with externally assigned versions.
//!
//! A channel is one cell of graph state. Each superstep, the write applier
//! hands a channel the full batch of values written to it and the channel
//! decides what its new value is; per-channel rules such as "at most one
//! writer" are enforceable because the batch arrives whole.
//!
//! The capability set is small and closed, so channels are a tagged sum type
//! rather than an open trait hierarchy:
//!
//! - [`Channel::update`] — apply a batch of writes, report whether the value
//!   changed
//! - [`Channel::get`] — current value, or [`ChannelError::EmptyChannel`]
//! - [`Channel::is_available`] — distinguishes "never written, no default"
//!   from "holds a falsy value" (0, "", false and null are all valid values)
//! - [`Channel::checkpoint`] — opaque serializable snapshot (`None` = do not
//!   persist)
//! - [`ChannelSpec::restore`] — rebuild from a snapshot, honoring
//!   initial-value factories when the snapshot is absent
//!
//! Channels never bump their own versions; the write applier assigns
//! versions through the checkpointer's `next_version` function.

pub mod errors;

pub use errors::ChannelError;

use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Factory for a channel's initial value.
pub type InitFn = Arc<dyn Fn() -> Value + Send + Sync>;

/// Binary reduction operator for [`ChannelSpec::Aggregate`] channels.
pub type ReducerFn = Arc<dyn Fn(Value, Value) -> Value + Send + Sync>;

/// Blueprint for a channel: variant plus options, without runtime state.
///
/// Specs live on the compiled graph; the loop materializes them into
/// [`Channel`]s at initialization (possibly rehydrating from a checkpoint)
/// and drops them when the run exits.
#[derive(Clone)]
pub enum ChannelSpec {
    /// At most one update per superstep; keeps the last written value.
    LastValue { default: Option<InitFn> },
    /// Accepts any number of updates per superstep; keeps the final one.
    AnyValue,
    /// Accumulates a list of values.
    Topic { unique: bool, accumulate: bool },
    /// Like `LastValue`, but cleared at the end of every superstep.
    Ephemeral,
    /// Running reduction `acc = op(acc, next)`, seeded from a factory.
    Aggregate { op: ReducerFn, init: InitFn },
    /// Per-process scratch value, never checkpointed.
    Untracked { init: InitFn },
}

impl ChannelSpec {
    /// A `LastValue` channel with no default.
    #[must_use]
    pub fn last_value() -> Self {
        ChannelSpec::LastValue { default: None }
    }

    /// A `LastValue` channel seeded from an initial-value factory.
    #[must_use]
    pub fn last_value_with_default<F>(default: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        ChannelSpec::LastValue {
            default: Some(Arc::new(default)),
        }
    }

    /// An `AnyValue` channel.
    #[must_use]
    pub fn any_value() -> Self {
        ChannelSpec::AnyValue
    }

    /// A `Topic` channel; `unique` deduplicates within the checkpointed
    /// value, `accumulate` retains entries across supersteps instead of
    /// resetting.
    #[must_use]
    pub fn topic(unique: bool, accumulate: bool) -> Self {
        ChannelSpec::Topic { unique, accumulate }
    }

    /// An `Ephemeral` channel.
    #[must_use]
    pub fn ephemeral() -> Self {
        ChannelSpec::Ephemeral
    }

    /// An `Aggregate` channel reducing with `op`, seeded by `init`.
    #[must_use]
    pub fn aggregate<O, F>(op: O, init: F) -> Self
    where
        O: Fn(Value, Value) -> Value + Send + Sync + 'static,
        F: Fn() -> Value + Send + Sync + 'static,
    {
        ChannelSpec::Aggregate {
            op: Arc::new(op),
            init: Arc::new(init),
        }
    }

    /// An `Untracked` channel seeded by `init`.
    #[must_use]
    pub fn untracked<F>(init: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        ChannelSpec::Untracked {
            init: Arc::new(init),
        }
    }

    /// Materialize a channel from this spec and an optional checkpoint
    /// snapshot. A missing snapshot yields the initial-value-factory result
    /// where the variant has one, so defaulted channels are immediately
    /// readable. `Untracked` ignores the snapshot and resets to its factory.
    #[must_use]
    pub fn restore(&self, name: &str, snapshot: Option<Value>) -> Channel {
        let state = match self {
            ChannelSpec::LastValue { default } => ChannelState::LastValue {
                value: snapshot.or_else(|| default.as_ref().map(|f| f())),
                default: default.clone(),
            },
            ChannelSpec::AnyValue => ChannelState::AnyValue { value: snapshot },
            ChannelSpec::Topic { unique, accumulate } => ChannelState::Topic {
                items: match snapshot {
                    Some(Value::Array(items)) => items,
                    Some(other) => vec![other],
                    None => Vec::new(),
                },
                unique: *unique,
                accumulate: *accumulate,
            },
            ChannelSpec::Ephemeral => ChannelState::Ephemeral { value: snapshot },
            ChannelSpec::Aggregate { op, init } => ChannelState::Aggregate {
                acc: snapshot.unwrap_or_else(|| init()),
                op: op.clone(),
                init: init.clone(),
            },
            ChannelSpec::Untracked { init } => ChannelState::Untracked {
                value: init(),
                init: init.clone(),
            },
        };
        Channel {
            name: name.to_string(),
            state,
        }
    }
}

impl fmt::Debug for ChannelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelSpec::LastValue { default } => f
                .debug_struct("LastValue")
                .field("default", &default.is_some())
                .finish(),
            ChannelSpec::AnyValue => f.write_str("AnyValue"),
            ChannelSpec::Topic { unique, accumulate } => f
                .debug_struct("Topic")
                .field("unique", unique)
                .field("accumulate", accumulate)
                .finish(),
            ChannelSpec::Ephemeral => f.write_str("Ephemeral"),
            ChannelSpec::Aggregate { .. } => f.write_str("Aggregate"),
            ChannelSpec::Untracked { .. } => f.write_str("Untracked"),
        }
    }
}

/// A materialized channel: spec variant plus runtime state.
#[derive(Clone)]
pub struct Channel {
    name: String,
    state: ChannelState,
}

#[derive(Clone)]
enum ChannelState {
    LastValue {
        value: Option<Value>,
        default: Option<InitFn>,
    },
    AnyValue {
        value: Option<Value>,
    },
    Topic {
        items: Vec<Value>,
        unique: bool,
        accumulate: bool,
    },
    Ephemeral {
        value: Option<Value>,
    },
    Aggregate {
        acc: Value,
        op: ReducerFn,
        init: InitFn,
    },
    Untracked {
        value: Value,
        init: InitFn,
    },
}

impl Channel {
    /// The channel's name within the graph.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Apply one superstep's batch of writes, in caller order.
    ///
    /// Returns `Ok(true)` when the channel's value changed. An empty batch
    /// is the per-superstep sweep: self-clearing variants (`Ephemeral`,
    /// non-accumulating `Topic`) reset and report mutation; everything else
    /// is a no-op.
    ///
    /// # Errors
    ///
    /// [`ChannelError::InvalidUpdate`] when the batch violates the variant's
    /// update rule; fatal for the superstep.
    pub fn update(&mut self, updates: Vec<Value>) -> Result<bool, ChannelError> {
        match &mut self.state {
            ChannelState::LastValue { value, .. } => {
                if updates.is_empty() {
                    return Ok(false);
                }
                if updates.len() > 1 {
                    return Err(ChannelError::invalid(
                        self.name.as_str(),
                        format!("LastValue accepts one update per superstep, got {}", updates.len()),
                    ));
                }
                *value = updates.into_iter().next();
                Ok(true)
            }
            ChannelState::AnyValue { value } => {
                if updates.is_empty() {
                    return Ok(false);
                }
                *value = updates.into_iter().next_back();
                Ok(true)
            }
            ChannelState::Topic {
                items,
                unique,
                accumulate,
            } => {
                let before = items.clone();
                if !*accumulate {
                    items.clear();
                }
                for v in updates {
                    if *unique && items.contains(&v) {
                        continue;
                    }
                    items.push(v);
                }
                Ok(*items != before)
            }
            ChannelState::Ephemeral { value } => {
                if updates.is_empty() {
                    let had = value.is_some();
                    *value = None;
                    return Ok(had);
                }
                if updates.len() > 1 {
                    return Err(ChannelError::invalid(
                        self.name.as_str(),
                        format!("Ephemeral accepts one update per superstep, got {}", updates.len()),
                    ));
                }
                *value = updates.into_iter().next();
                Ok(true)
            }
            ChannelState::Aggregate { acc, op, .. } => {
                if updates.is_empty() {
                    return Ok(false);
                }
                let mut next = acc.clone();
                for v in updates {
                    next = op(next, v);
                }
                *acc = next;
                Ok(true)
            }
            ChannelState::Untracked { value, .. } => {
                if updates.is_empty() {
                    return Ok(false);
                }
                *value = updates.into_iter().next_back().unwrap_or(Value::Null);
                Ok(true)
            }
        }
    }

    /// Current value.
    ///
    /// # Errors
    ///
    /// [`ChannelError::EmptyChannel`] iff [`is_available`](Self::is_available)
    /// is false. Falsy values are valid; only the genuinely empty state
    /// errors.
    pub fn get(&self) -> Result<Value, ChannelError> {
        match &self.state {
            ChannelState::LastValue { value, .. }
            | ChannelState::AnyValue { value }
            | ChannelState::Ephemeral { value } => {
                value.clone().ok_or_else(|| ChannelError::empty(self.name.as_str()))
            }
            ChannelState::Topic { items, .. } => {
                if items.is_empty() {
                    Err(ChannelError::empty(self.name.as_str()))
                } else {
                    Ok(Value::Array(items.clone()))
                }
            }
            ChannelState::Aggregate { acc, .. } => Ok(acc.clone()),
            ChannelState::Untracked { value, .. } => Ok(value.clone()),
        }
    }

    /// Whether [`get`](Self::get) would succeed.
    #[must_use]
    pub fn is_available(&self) -> bool {
        match &self.state {
            ChannelState::LastValue { value, .. }
            | ChannelState::AnyValue { value }
            | ChannelState::Ephemeral { value } => value.is_some(),
            ChannelState::Topic { items, .. } => !items.is_empty(),
            ChannelState::Aggregate { .. } | ChannelState::Untracked { .. } => true,
        }
    }

    /// Opaque serializable snapshot for checkpointing.
    ///
    /// `None` means "nothing to persist": the empty state for value
    /// variants, and always for `Untracked` channels regardless of state.
    #[must_use]
    pub fn checkpoint(&self) -> Option<Value> {
        match &self.state {
            ChannelState::LastValue { value, .. }
            | ChannelState::AnyValue { value }
            | ChannelState::Ephemeral { value } => value.clone(),
            ChannelState::Topic { items, .. } => Some(Value::Array(items.clone())),
            ChannelState::Aggregate { acc, .. } => Some(acc.clone()),
            ChannelState::Untracked { .. } => None,
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let variant = match &self.state {
            ChannelState::LastValue { .. } => "LastValue",
            ChannelState::AnyValue { .. } => "AnyValue",
            ChannelState::Topic { .. } => "Topic",
            ChannelState::Ephemeral { .. } => "Ephemeral",
            ChannelState::Aggregate { .. } => "Aggregate",
            ChannelState::Untracked { .. } => "Untracked",
        };
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("variant", &variant)
            .field("available", &self.is_available())
            .finish()
    }
}
