use miette::Diagnostic;
use thiserror::Error;

/// Errors raised by channel operations.
///
/// The two variants propagate very differently and must never be conflated:
///
/// - [`EmptyChannel`](ChannelError::EmptyChannel) is raised by `get()` on a
///   channel that was never written and has no default. Task input assembly
///   catches it and skips the node for the step; it is never surfaced to the
///   caller.
/// - [`InvalidUpdate`](ChannelError::InvalidUpdate) means a write batch
///   violated the channel's update rule (e.g. two writers racing a
///   single-value channel in one superstep). It is fatal for the superstep.
#[derive(Debug, Error, Diagnostic)]
pub enum ChannelError {
    /// `get()` on a channel with no value and no initial-value factory.
    #[error("channel `{channel}` is empty")]
    #[diagnostic(
        code(stepgraph::channels::empty),
        help("Write to `{channel}` first, or give the channel a default value.")
    )]
    EmptyChannel { channel: String },

    /// An update batch violated the channel's update rule.
    #[error("invalid update for channel `{channel}`: {message}")]
    #[diagnostic(
        code(stepgraph::channels::invalid_update),
        help("Check how many tasks write to `{channel}` within one superstep.")
    )]
    InvalidUpdate { channel: String, message: String },
}

impl ChannelError {
    pub(crate) fn empty(channel: impl Into<String>) -> Self {
        ChannelError::EmptyChannel {
            channel: channel.into(),
        }
    }

    pub(crate) fn invalid(channel: impl Into<String>, message: impl Into<String>) -> Self {
        ChannelError::InvalidUpdate {
            channel: channel.into(),
            message: message.into(),
        }
    }
}
