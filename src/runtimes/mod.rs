//! Runtime infrastructure: the superstep driver, write barrier,
//! checkpointer protocol, serial persistence queue, and run configuration.
//!
//! # Architecture
//!
//! - [`PregelLoop`] — the superstep state machine; sole mutator of channels
//!   and checkpoint state
//! - [`GraphRunner`] — in-process driver pairing the loop with a concurrent
//!   task runner
//! - [`Checkpointer`] — pluggable durable persistence, with in-memory
//!   reference backends
//! - [`CommitQueue`] — per-thread serial persistence worker with an error
//!   sink
//! - Persistence models — serde-facing types for backend serialization

pub mod barrier;
pub mod checkpointer;
pub mod commit;
pub mod persistence;
pub mod runner;
pub mod runtime_config;

pub use barrier::{apply_writes, default_next_version, NextVersionFn, WriteEntry};
pub use checkpointer::{
    Checkpointer, CheckpointerError, InMemorySaver, ListOptions, ShallowInMemorySaver,
};
pub use commit::CommitQueue;
pub use persistence::{
    from_json_str, to_json_string, PersistedCheckpoint, PersistedMetadata, PersistedWrite,
    PersistenceError,
};
pub use runner::{
    ExecutableTask, GraphInput, GraphRunner, InputPhase, LoopError, LoopStatus, PregelLoop,
    RunOutcome,
};
pub use runtime_config::{RunnerConfig, DEFAULT_RECURSION_LIMIT, NS_SEP};
