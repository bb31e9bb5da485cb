//! Graph construction: the fluent [`GraphBuilder`] and its compile-time
//! validation.

pub mod builder;

pub use builder::{CompileError, GraphBuilder, NodeBuilder};
