//! Serial per-thread persistence queue.
//!
//! Checkpoint `put`s must land in the order they were produced, but the loop
//! must not block on durable-write latency. Instead of chaining futures, a
//! single background worker drains a channel of commit jobs strictly in
//! submission order. A failed job is forwarded to the error sink and does
//! not poison subsequent jobs, so the next persist neither deadlocks nor
//! inherits the failure.

use flume::{Receiver, Sender};
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::checkpoint::{Checkpoint, CheckpointMetadata, CheckpointRef};
use crate::runtimes::checkpointer::{Checkpointer, CheckpointerError};
use crate::types::ChannelVersion;

enum CommitJob {
    Put {
        config: CheckpointRef,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
        new_versions: FxHashMap<String, ChannelVersion>,
    },
    PutWrites {
        config: CheckpointRef,
        task_id: String,
        writes: Vec<(String, Value)>,
    },
    Flush {
        ack: oneshot::Sender<()>,
    },
}

/// Handle to a thread's serial persistence worker.
pub struct CommitQueue {
    tx: Sender<CommitJob>,
    worker: JoinHandle<()>,
}

impl CommitQueue {
    /// Spawn the worker. Returns the queue and the sink receiving background
    /// persistence errors; dropping the receiver discards them.
    #[must_use]
    pub fn new(checkpointer: Arc<dyn Checkpointer>) -> (Self, Receiver<CheckpointerError>) {
        let (tx, rx) = flume::unbounded::<CommitJob>();
        let (err_tx, err_rx) = flume::unbounded();
        let worker = tokio::spawn(Self::run_worker(checkpointer, rx, err_tx));
        (CommitQueue { tx, worker }, err_rx)
    }

    async fn run_worker(
        checkpointer: Arc<dyn Checkpointer>,
        rx: Receiver<CommitJob>,
        errors: Sender<CheckpointerError>,
    ) {
        while let Ok(job) = rx.recv_async().await {
            match job {
                CommitJob::Put {
                    config,
                    checkpoint,
                    metadata,
                    new_versions,
                } => {
                    let step = metadata.step;
                    if let Err(err) = checkpointer
                        .put(&config, checkpoint, metadata, new_versions)
                        .await
                    {
                        tracing::warn!(step, error = %err, "background checkpoint put failed");
                        let _ = errors.send(err);
                    }
                }
                CommitJob::PutWrites {
                    config,
                    task_id,
                    writes,
                } => {
                    if let Err(err) = checkpointer.put_writes(&config, &task_id, &writes).await {
                        tracing::warn!(
                            task = %task_id,
                            error = %err,
                            "background pending-write persist failed"
                        );
                        let _ = errors.send(err);
                    }
                }
                CommitJob::Flush { ack } => {
                    let _ = ack.send(());
                }
            }
        }
    }

    /// Enqueue a checkpoint persist. Non-blocking; ordering is the
    /// submission order.
    pub fn submit_put(
        &self,
        config: CheckpointRef,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
        new_versions: FxHashMap<String, ChannelVersion>,
    ) {
        let _ = self.tx.send(CommitJob::Put {
            config,
            checkpoint,
            metadata,
            new_versions,
        });
    }

    /// Enqueue a pending-write persist for one task.
    pub fn submit_writes(
        &self,
        config: CheckpointRef,
        task_id: String,
        writes: Vec<(String, Value)>,
    ) {
        let _ = self.tx.send(CommitJob::PutWrites {
            config,
            task_id,
            writes,
        });
    }

    /// Wait until every job submitted so far has been executed.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(CommitJob::Flush { ack }).is_ok() {
            let _ = done.await;
        }
    }

    /// Drain outstanding jobs and stop the worker.
    pub async fn shutdown(self) {
        self.flush().await;
        drop(self.tx);
        let _ = self.worker.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointSource;
    use crate::runtimes::checkpointer::InMemorySaver;
    use serde_json::json;

    #[tokio::test]
    async fn jobs_execute_in_submission_order() {
        let saver = Arc::new(InMemorySaver::new());
        let (queue, _errors) = CommitQueue::new(saver.clone());
        let config = CheckpointRef::latest("t1", "");

        let first = Checkpoint::empty();
        let second = Checkpoint::empty();
        let first_ref = config.with_id(&first.id);
        queue.submit_put(
            config.clone(),
            first.clone(),
            CheckpointMetadata::new(CheckpointSource::Input, -1),
            FxHashMap::default(),
        );
        queue.submit_writes(first_ref, "task-1".into(), vec![("c".into(), json!(1))]);
        queue.submit_put(
            config.with_id(&first.id),
            second.clone(),
            CheckpointMetadata::new(CheckpointSource::Loop, 0),
            FxHashMap::default(),
        );
        queue.flush().await;

        let latest = saver.get_tuple(&config).await.unwrap().unwrap();
        assert_eq!(latest.checkpoint.id, second.id);
        let first_tuple = saver
            .get_tuple(&config.with_id(&first.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first_tuple.pending_writes.len(), 1);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn failed_jobs_reach_the_error_sink_without_blocking_later_jobs() {
        let saver = Arc::new(InMemorySaver::new());
        let (queue, errors) = CommitQueue::new(saver.clone());
        let config = CheckpointRef::latest("t2", "");

        // Writes against a checkpoint that was never stored fail.
        queue.submit_writes(
            config.with_id("missing"),
            "task-1".into(),
            vec![("c".into(), json!(1))],
        );
        let checkpoint = Checkpoint::empty();
        queue.submit_put(
            config.clone(),
            checkpoint.clone(),
            CheckpointMetadata::new(CheckpointSource::Input, -1),
            FxHashMap::default(),
        );
        queue.flush().await;

        assert!(matches!(
            errors.try_recv(),
            Ok(CheckpointerError::NotFound { .. })
        ));
        let stored = saver.get_tuple(&config).await.unwrap().unwrap();
        assert_eq!(stored.checkpoint.id, checkpoint.id);
        queue.shutdown().await;
    }
}
