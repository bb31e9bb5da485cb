//! Multi-mode output streaming.
//!
//! The loop is the single producer: it pushes `(mode, payload)` events into
//! a bounded queue, and only for the modes the consumer subscribed to, so an
//! idle subscription costs nothing. Nested subgraph loops emit through a
//! child handle that prefixes each event with the subgraph's namespace path.
//!
//! Event ordering within one superstep is fixed: `debug` task-start events,
//! then (after external execution) `updates` per task, then `values`, then
//! the `debug` checkpoint event. Across supersteps the step number strictly
//! increases.

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::control::Interrupt;
use crate::types::StreamMode;

/// Lifecycle events emitted in `debug` mode.
#[derive(Clone, Debug, PartialEq)]
pub enum DebugEvent {
    /// A task was selected and is about to run.
    TaskStart {
        id: String,
        name: String,
        input: Value,
    },
    /// A task delivered its writes.
    TaskResult {
        id: String,
        name: String,
        writes: Vec<(String, Value)>,
    },
    /// A checkpoint was produced for this superstep.
    Checkpoint { checkpoint_id: String },
}

/// Payload of one stream event.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamPayload {
    /// Full output-channel snapshot after a completed superstep.
    Values(FxHashMap<String, Value>),
    /// One task's writes, keyed by task name.
    Updates(FxHashMap<String, Vec<(String, Value)>>),
    /// Task / checkpoint lifecycle.
    Debug(DebugEvent),
    /// Dynamic interrupts raised during the superstep.
    Interrupt(Vec<Interrupt>),
}

impl StreamPayload {
    /// The subscription mode gating this payload. Interrupt events ride the
    /// `updates` mode, mirroring how callers consume them.
    #[must_use]
    pub fn mode(&self) -> StreamMode {
        match self {
            StreamPayload::Values(_) => StreamMode::Values,
            StreamPayload::Updates(_) | StreamPayload::Interrupt(_) => StreamMode::Updates,
            StreamPayload::Debug(_) => StreamMode::Debug,
        }
    }
}

/// One event produced by a run.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamEvent {
    /// Superstep the event belongs to.
    pub step: i64,
    /// Subgraph path; empty for the root graph.
    pub namespace: Vec<String>,
    pub payload: StreamPayload,
}

/// Default bound of the event queue.
pub const DEFAULT_STREAM_CAPACITY: usize = 1024;

/// Single-producer handle the loop emits through.
#[derive(Clone)]
pub struct StreamMux {
    tx: Option<flume::Sender<StreamEvent>>,
    modes: Vec<StreamMode>,
    namespace: Vec<String>,
}

impl StreamMux {
    /// A mux emitting the given modes into a bounded queue, plus the
    /// consumer half.
    #[must_use]
    pub fn bounded(modes: Vec<StreamMode>, capacity: usize) -> (Self, StreamReceiver) {
        let (tx, rx) = flume::bounded(capacity.max(1));
        (
            StreamMux {
                tx: Some(tx),
                modes,
                namespace: Vec::new(),
            },
            StreamReceiver { rx },
        )
    }

    /// A mux that emits nothing; used by `invoke` when no consumer exists.
    #[must_use]
    pub fn disabled() -> Self {
        StreamMux {
            tx: None,
            modes: Vec::new(),
            namespace: Vec::new(),
        }
    }

    /// A handle for a nested subgraph loop: same queue and modes, with the
    /// subgraph segment appended to the namespace path.
    #[must_use]
    pub fn child(&self, ns_segment: impl Into<String>) -> Self {
        let mut namespace = self.namespace.clone();
        namespace.push(ns_segment.into());
        StreamMux {
            tx: self.tx.clone(),
            modes: self.modes.clone(),
            namespace,
        }
    }

    /// Whether `mode` has a subscriber; the loop skips building payloads for
    /// unsubscribed modes.
    #[must_use]
    pub fn wants(&self, mode: StreamMode) -> bool {
        self.tx.is_some() && self.modes.contains(&mode)
    }

    /// Emit one event. A disconnected or unsubscribed consumer makes this a
    /// no-op; the loop never fails because nobody is listening.
    pub async fn emit(&self, step: i64, payload: StreamPayload) {
        if !self.wants(payload.mode()) {
            return;
        }
        if let Some(tx) = &self.tx {
            let event = StreamEvent {
                step,
                namespace: self.namespace.clone(),
                payload,
            };
            if tx.send_async(event).await.is_err() {
                tracing::debug!("stream consumer disconnected; dropping event");
            }
        }
    }

    /// Close the queue; consumers observe end-of-stream. Called on run exit
    /// and on cancellation.
    pub fn close(&mut self) {
        self.tx = None;
    }
}

/// Consumer half of the stream.
pub struct StreamReceiver {
    rx: flume::Receiver<StreamEvent>,
}

impl StreamReceiver {
    /// Next event, or `None` once the producer closed the stream.
    pub async fn next(&self) -> Option<StreamEvent> {
        self.rx.recv_async().await.ok()
    }

    /// Drain whatever is buffered without waiting.
    #[must_use]
    pub fn drain(&self) -> Vec<StreamEvent> {
        self.rx.try_iter().collect()
    }

    /// Collect every remaining event until the stream closes.
    pub async fn collect(self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.recv_async().await {
            events.push(event);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn unsubscribed_modes_are_not_emitted() {
        let (mux, rx) = StreamMux::bounded(vec![StreamMode::Values], 8);
        mux.emit(
            0,
            StreamPayload::Debug(DebugEvent::Checkpoint {
                checkpoint_id: "c".into(),
            }),
        )
        .await;
        let mut values = FxHashMap::default();
        values.insert("count".to_string(), json!(1));
        mux.emit(0, StreamPayload::Values(values)).await;
        drop(mux);

        let events = rx.collect().await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0].payload, StreamPayload::Values(_)));
    }

    #[tokio::test]
    async fn child_handles_prefix_namespace() {
        let (mux, rx) = StreamMux::bounded(vec![StreamMode::Updates], 8);
        let child = mux.child("subflow");
        child
            .emit(1, StreamPayload::Updates(FxHashMap::default()))
            .await;
        drop(mux);
        drop(child);

        let events = rx.collect().await;
        assert_eq!(events[0].namespace, vec!["subflow".to_string()]);
    }
}
