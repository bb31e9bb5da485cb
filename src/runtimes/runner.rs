//! The superstep driver.
//!
//! [`PregelLoop`] is the single mutator of channels and checkpoint state: a
//! cooperative state machine whose `tick` applies the previous superstep's
//! writes, persists a checkpoint, selects the next task batch, and
//! coordinates suspension and resumption. Task execution itself happens
//! outside the loop; the external runner interacts with it only through
//! [`PregelLoop::put_writes`].
//!
//! [`GraphRunner`] is the in-process driver: it owns the tick/execute cycle,
//! runs prepared tasks concurrently, converts node failures and interrupt
//! signals into the corresponding pending writes, and returns the mapped
//! output once the loop reaches a terminal status.

use rustc_hash::FxHashMap;
use serde_json::Value;
use std::sync::Arc;

use miette::Diagnostic;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tracing::instrument;

use crate::channels::{Channel, ChannelError};
use crate::checkpoint::{
    channels_from_checkpoint, create_checkpoint, migrate_pending_sends, Checkpoint,
    CheckpointMetadata, CheckpointRef, CheckpointSource, PendingWrite,
};
use crate::context::ExecutionContext;
use crate::control::{Command, Interrupt, InterruptNodes};
use crate::graph::Graph;
use crate::node::{Node, NodeError};
use crate::runtimes::barrier::{apply_writes, default_next_version, NextVersionFn, WriteEntry};
use crate::runtimes::checkpointer::{Checkpointer, CheckpointerError};
use crate::runtimes::commit::CommitQueue;
use crate::runtimes::runtime_config::RunnerConfig;
use crate::schedulers::{prepare_next_tasks, prepare_task_preview, PregelTask};
use crate::stream::{DebugEvent, StreamMux, StreamPayload, StreamReceiver, DEFAULT_STREAM_CAPACITY};
use crate::types::{StreamMode, ERROR, INPUT, INTERRUPT, RESUME};

/// Terminal and non-terminal loop states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopStatus {
    /// More work may remain; `tick` may be called.
    Pending,
    /// No node is eligible to fire; the run is complete.
    Done,
    /// A static interrupt fired before the pending tasks executed.
    InterruptBefore,
    /// A static interrupt fired after a superstep committed.
    InterruptAfter,
    /// The superstep budget was exhausted; a non-error terminal state.
    OutOfSteps,
}

/// Where the loop is in consuming its run input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputPhase {
    /// Input not yet examined; the next tick is the first.
    Pending,
    /// Fresh input was mapped and applied.
    Done,
    /// The run resumed from persisted state instead of consuming input.
    Resuming,
}

/// What a run starts from.
#[derive(Clone, Debug)]
pub enum GraphInput {
    /// A value mapped through the graph's input channels: an object keyed by
    /// channel name, or a bare value when exactly one input channel exists.
    Values(Value),
    /// A structured command: updates, routing overrides, and/or a resume
    /// payload for a suspended interrupt.
    Command(Command),
    /// Resume from the thread's persisted state without new input.
    Resume,
}

/// Errors surfaced by the loop and its driver.
#[derive(Debug, Error, Diagnostic)]
pub enum LoopError {
    /// Input mapping produced no writes at loop start.
    #[error("input produced no channel writes")]
    #[diagnostic(
        code(stepgraph::runner::empty_input),
        help("Check that the input object keys match the graph's input channels.")
    )]
    EmptyInput,

    /// `tick` was called on a loop that already reached a terminal status.
    #[error("loop is not pending (status: {status:?})")]
    #[diagnostic(code(stepgraph::runner::illegal_state))]
    IllegalState { status: LoopStatus },

    /// An interrupt triggered inside a nested subgraph; propagated up so the
    /// outer loop can surface it. The root loop converts this into a
    /// graceful stop instead.
    #[error("interrupt raised in nested graph")]
    #[diagnostic(code(stepgraph::runner::graph_interrupt))]
    GraphInterrupt(Vec<Interrupt>),

    /// A user node failed. The failure was recorded on the error channel
    /// before being surfaced.
    #[error("node `{node}` failed at step {step}: {source}")]
    #[diagnostic(code(stepgraph::runner::node))]
    NodeRun {
        node: String,
        step: i64,
        #[source]
        source: NodeError,
    },

    /// The caller-supplied cancellation token fired.
    #[error("run cancelled")]
    #[diagnostic(code(stepgraph::runner::cancelled))]
    Cancelled,

    /// A superstep's task batch exceeded the configured step timeout.
    #[error("superstep {step} timed out")]
    #[diagnostic(code(stepgraph::runner::step_timeout))]
    StepTimeout { step: i64 },

    #[error(transparent)]
    #[diagnostic(code(stepgraph::runner::checkpointer))]
    Checkpointer(#[from] CheckpointerError),

    #[error(transparent)]
    #[diagnostic(code(stepgraph::runner::channel))]
    Channel(#[from] ChannelError),

    #[error("task join error: {0}")]
    #[diagnostic(code(stepgraph::runner::join))]
    Join(#[from] JoinError),
}

/// Final result of a run.
#[derive(Debug)]
pub struct RunOutcome {
    pub status: LoopStatus,
    /// Output-channel values at exit.
    pub values: FxHashMap<String, Value>,
    /// Dynamic interrupts awaiting a `Command::resume`.
    pub interrupts: Vec<Interrupt>,
    /// Persistence failures routed to the background error sink during the
    /// run. The run itself is unaffected by them.
    pub background_errors: Vec<CheckpointerError>,
}

/// One task handed to the external runner for execution.
pub struct ExecutableTask {
    pub id: String,
    pub name: String,
    pub input: Value,
    node: Arc<dyn Node>,
    ctx: ExecutionContext,
    sends: Arc<Mutex<Vec<(String, Value)>>>,
}

/// The superstep state machine.
pub struct PregelLoop {
    graph: Arc<Graph>,
    config: RunnerConfig,
    commit: Option<CommitQueue>,
    background_errors: Option<flume::Receiver<CheckpointerError>>,
    next_version: NextVersionFn,
    checkpoint: Checkpoint,
    /// Reference to the last persisted checkpoint; parent of the next put.
    checkpoint_config: CheckpointRef,
    channels: FxHashMap<String, Channel>,
    step: i64,
    stop: i64,
    status: LoopStatus,
    input_phase: InputPhase,
    input: Option<GraphInput>,
    tasks: Vec<PregelTask>,
    pending_writes: Vec<PendingWrite>,
    previous_versions: FxHashMap<String, crate::types::ChannelVersion>,
    resume_map: FxHashMap<String, Value>,
    interrupts: Vec<Interrupt>,
    mux: StreamMux,
    nested: bool,
}

impl PregelLoop {
    /// Load (or synthesize) the thread's checkpoint and materialize channels.
    #[instrument(skip_all, fields(thread = %config.thread_id, ns = %config.checkpoint_ns))]
    pub async fn initialize(
        graph: Arc<Graph>,
        config: RunnerConfig,
        input: Option<GraphInput>,
        checkpointer: Option<Arc<dyn Checkpointer>>,
        mux: StreamMux,
    ) -> Result<Self, LoopError> {
        let tuple = match &checkpointer {
            Some(cp) => cp.get_tuple(&config.checkpoint_ref()).await?,
            None => None,
        };

        let (checkpoint, metadata, pending_writes, checkpoint_config) = match tuple {
            Some(tuple) => {
                let mut checkpoint = tuple.checkpoint;
                if checkpoint.v < crate::checkpoint::CHECKPOINT_SCHEMA_VERSION {
                    let parent_pending = match (&checkpointer, &tuple.parent_config) {
                        (Some(cp), Some(parent)) => cp
                            .get_tuple(parent)
                            .await?
                            .map(|p| p.pending_writes)
                            .unwrap_or_default(),
                        _ => Vec::new(),
                    };
                    migrate_pending_sends(&mut checkpoint, &parent_pending);
                }
                (
                    checkpoint,
                    tuple.metadata,
                    tuple.pending_writes,
                    tuple.config,
                )
            }
            None => (
                Checkpoint::empty(),
                CheckpointMetadata::new(CheckpointSource::Input, -2),
                Vec::new(),
                config.checkpoint_ref(),
            ),
        };

        let channels = channels_from_checkpoint(graph.channels(), &checkpoint);
        let next_version: NextVersionFn = match &checkpointer {
            Some(cp) => {
                let cp = Arc::clone(cp);
                Arc::new(move |current| cp.next_version(current))
            }
            None => default_next_version(),
        };
        let (commit, background_errors) = match checkpointer {
            Some(cp) => {
                let (queue, errors) = CommitQueue::new(cp);
                (Some(queue), Some(errors))
            }
            None => (None, None),
        };

        let step = metadata.step + 1;
        let stop = step + config.recursion_limit as i64 + 1;
        let previous_versions = checkpoint.channel_versions.clone();
        let nested = config.is_nested();

        tracing::debug!(step, stop, nested, "loop initialized");
        Ok(PregelLoop {
            graph,
            config,
            commit,
            background_errors,
            next_version,
            checkpoint,
            checkpoint_config,
            channels,
            step,
            stop,
            status: LoopStatus::Pending,
            input_phase: InputPhase::Pending,
            input,
            tasks: Vec::new(),
            pending_writes,
            previous_versions,
            resume_map: FxHashMap::default(),
            interrupts: Vec::new(),
            mux,
            nested,
        })
    }

    /// Current loop status.
    #[must_use]
    pub fn status(&self) -> LoopStatus {
        self.status
    }

    /// Current superstep number.
    #[must_use]
    pub fn step(&self) -> i64 {
        self.step
    }

    /// Dynamic interrupts raised and not yet resumed.
    #[must_use]
    pub fn interrupts(&self) -> &[Interrupt] {
        &self.interrupts
    }

    /// Advance one superstep boundary. Returns whether more iterations are
    /// needed: `true` means a task batch is prepared and awaiting execution,
    /// `false` means the loop stopped (terminal status reached, or writes
    /// are still outstanding).
    ///
    /// # Errors
    ///
    /// [`LoopError::IllegalState`] when called on a non-pending loop,
    /// [`LoopError::EmptyInput`] when input mapping produced nothing,
    /// [`LoopError::GraphInterrupt`] for interrupts inside nested graphs,
    /// and fatal channel errors from write application.
    #[instrument(skip(self), fields(step = self.step))]
    pub async fn tick(&mut self) -> Result<bool, LoopError> {
        loop {
            if self.status != LoopStatus::Pending {
                return Err(LoopError::IllegalState {
                    status: self.status,
                });
            }

            if self.input_phase == InputPhase::Pending {
                self.first_tick().await?;
            } else if !self.tasks.is_empty() {
                if !self.all_tasks_complete() {
                    // Writes are still outstanding; wait for put_writes.
                    return Ok(false);
                }
                self.finish_superstep().await?;
                if self.should_interrupt(self.graph.interrupt_after()) {
                    self.status = LoopStatus::InterruptAfter;
                    self.tasks.clear();
                    if self.nested {
                        return Err(LoopError::GraphInterrupt(self.interrupts.clone()));
                    }
                    return Ok(false);
                }
                self.tasks.clear();
            }

            if self.step > self.stop {
                self.status = LoopStatus::OutOfSteps;
                tracing::info!(step = self.step, stop = self.stop, "superstep budget exhausted");
                return Ok(false);
            }

            self.tasks = prepare_next_tasks(&self.checkpoint, &self.graph, &self.channels);
            if self.tasks.is_empty() {
                self.status = LoopStatus::Done;
                return Ok(false);
            }

            if self.reattach_pending_writes() && self.all_tasks_complete() {
                // Recovered writes completed the whole batch; advance again
                // without surfacing the tasks.
                continue;
            }

            if self.should_interrupt(self.graph.interrupt_before()) {
                self.status = LoopStatus::InterruptBefore;
                return Ok(false);
            }

            if self.mux.wants(StreamMode::Debug) {
                for task in &self.tasks {
                    self.mux
                        .emit(
                            self.step,
                            StreamPayload::Debug(DebugEvent::TaskStart {
                                id: task.id.clone(),
                                name: task.name.clone(),
                                input: task.input.clone(),
                            }),
                        )
                        .await;
                }
            }
            return Ok(true);
        }
    }

    /// Record a task's writes. Called by the external runner; writes arrive
    /// in any order across tasks but keep caller order within a task.
    pub async fn put_writes(&mut self, task_id: &str, writes: Vec<(String, Value)>) {
        if writes.is_empty() {
            return;
        }
        let Some(index) = self.tasks.iter().position(|t| t.id == task_id) else {
            tracing::warn!(task = %task_id, "dropping writes for unknown task");
            return;
        };
        self.tasks[index].writes.extend(writes.iter().cloned());
        for (channel, value) in &writes {
            self.pending_writes.push(PendingWrite {
                task_id: task_id.to_string(),
                channel: channel.clone(),
                value: value.clone(),
            });
        }
        if let Some(commit) = &self.commit {
            commit.submit_writes(
                self.checkpoint_config.clone(),
                task_id.to_string(),
                writes.clone(),
            );
        }

        let name = self.tasks[index].name.clone();
        if self.mux.wants(StreamMode::Updates) {
            let visible: Vec<(String, Value)> = writes
                .iter()
                .filter(|(channel, _)| !crate::types::is_reserved_channel(channel))
                .cloned()
                .collect();
            if !visible.is_empty() {
                let mut updates = FxHashMap::default();
                updates.insert(name.clone(), visible);
                self.mux
                    .emit(self.step, StreamPayload::Updates(updates))
                    .await;
            }
        }
        if self.mux.wants(StreamMode::Debug) {
            self.mux
                .emit(
                    self.step,
                    StreamPayload::Debug(DebugEvent::TaskResult {
                        id: task_id.to_string(),
                        name,
                        writes,
                    }),
                )
                .await;
        }
    }

    /// Record a dynamic interrupt raised by a task: persists the interrupt
    /// payload as a pending write and marks the task incomplete.
    pub async fn record_interrupt(&mut self, task_id: &str, value: Value) {
        let interrupt = Interrupt {
            id: task_id.to_string(),
            value: value.clone(),
        };
        self.put_writes(task_id, vec![(INTERRUPT.to_string(), value)])
            .await;
        self.mux
            .emit(
                self.step,
                StreamPayload::Interrupt(vec![interrupt.clone()]),
            )
            .await;
        self.interrupts.push(interrupt);
    }

    /// Record a task failure on the error channel. Error writes are never
    /// re-applied on resume, so the failed task re-runs.
    pub async fn record_error(&mut self, task_id: &str, error: &NodeError) {
        self.put_writes(
            task_id,
            vec![(
                ERROR.to_string(),
                serde_json::json!({ "error": error.to_string() }),
            )],
        )
        .await;
    }

    /// Whether any dynamic interrupts are awaiting resumption.
    #[must_use]
    pub fn has_interrupts(&self) -> bool {
        !self.interrupts.is_empty()
    }

    /// Tasks still awaiting execution, with ready-built contexts.
    #[must_use]
    pub fn take_executable_tasks(&self) -> Vec<ExecutableTask> {
        let mut snapshot = FxHashMap::default();
        for (name, channel) in &self.channels {
            if let Ok(value) = channel.get() {
                snapshot.insert(name.clone(), value);
            }
        }
        let snapshot = Arc::new(snapshot);
        self.tasks
            .iter()
            .filter(|task| task.writes.is_empty())
            .map(|task| {
                let sends = Arc::new(Mutex::new(Vec::new()));
                let ctx = ExecutionContext::new(
                    task.id.clone(),
                    task.name.clone(),
                    self.step,
                    self.input_phase == InputPhase::Resuming,
                    self.resume_map.get(&task.id).cloned(),
                    Arc::clone(&snapshot),
                    Arc::clone(&sends),
                    self.config.cancellation.clone(),
                );
                let node = self
                    .graph
                    .nodes()
                    .get(&task.name)
                    .expect("task selected from graph nodes")
                    .executable();
                ExecutableTask {
                    id: task.id.clone(),
                    name: task.name.clone(),
                    input: task.input.clone(),
                    node,
                    ctx,
                    sends,
                }
            })
            .collect()
    }

    /// Flush persistence, close the stream, and produce the final outcome.
    pub async fn finish(mut self, result: Result<(), LoopError>) -> Result<RunOutcome, LoopError> {
        if let Some(commit) = self.commit.take() {
            commit.shutdown().await;
        }
        self.mux.close();
        let background_errors: Vec<CheckpointerError> = self
            .background_errors
            .take()
            .map(|rx| rx.try_iter().collect())
            .unwrap_or_default();
        for err in &background_errors {
            tracing::warn!(error = %err, "background persistence error");
        }
        result?;
        let values = self.output_values();
        Ok(RunOutcome {
            status: self.status,
            values,
            interrupts: self.interrupts,
            background_errors,
        })
    }

    fn output_values(&self) -> FxHashMap<String, Value> {
        let mut values = FxHashMap::default();
        for name in self.graph.output_channels() {
            if let Some(channel) = self.channels.get(name) {
                if let Ok(value) = channel.get() {
                    values.insert(name.clone(), value);
                }
            }
        }
        values
    }

    fn all_tasks_complete(&self) -> bool {
        self.tasks.iter().all(|task| {
            task.writes
                .iter()
                .any(|(channel, _)| channel != INTERRUPT)
        })
    }

    /// First-tick branch: decide between resuming persisted state and
    /// mapping fresh input.
    async fn first_tick(&mut self) -> Result<(), LoopError> {
        let has_state = !self.checkpoint.channel_versions.is_empty();
        let input = self.input.take();
        let resume_requested = self.config.resuming
            || match &input {
                None | Some(GraphInput::Resume) => true,
                Some(GraphInput::Command(cmd)) => cmd.resume.is_some(),
                Some(GraphInput::Values(_)) => false,
            };

        if (has_state && resume_requested) || input.is_none() {
            // Acknowledge any pending interrupts so they do not re-fire.
            self.checkpoint
                .versions_seen
                .insert(INTERRUPT.to_string(), self.checkpoint.channel_versions.clone());
            // Resume payloads persisted by an earlier (crashed) resume
            // attempt come back first.
            for write in &self.pending_writes {
                if write.channel == RESUME {
                    self.resume_map
                        .insert(write.task_id.clone(), write.value.clone());
                }
            }
            if let Some(GraphInput::Command(cmd)) = &input {
                if let Some(resume) = &cmd.resume {
                    let suspended: Vec<String> = self
                        .pending_writes
                        .iter()
                        .filter(|w| w.channel == INTERRUPT)
                        .map(|w| w.task_id.clone())
                        .collect();
                    for task_id in suspended {
                        if let Some(commit) = &self.commit {
                            commit.submit_writes(
                                self.checkpoint_config.clone(),
                                task_id.clone(),
                                vec![(RESUME.to_string(), resume.clone())],
                            );
                        }
                        self.resume_map.insert(task_id, resume.clone());
                    }
                    self.pending_writes.retain(|w| w.channel != INTERRUPT);
                }
            }
            self.input_phase = InputPhase::Resuming;
            tracing::debug!("resuming from persisted state");
            return Ok(());
        }

        let writes: Vec<(String, Value)> = match input {
            Some(GraphInput::Values(Value::Object(map))) => map
                .into_iter()
                .filter(|(key, _)| self.graph.input_channels().iter().any(|c| c == key))
                .collect(),
            Some(GraphInput::Values(bare)) => {
                if let [only] = self.graph.input_channels() {
                    vec![(only.clone(), bare)]
                } else {
                    Vec::new()
                }
            }
            Some(GraphInput::Command(cmd)) => cmd.into_writes(),
            Some(GraphInput::Resume) | None => Vec::new(),
        };
        if writes.is_empty() {
            return Err(LoopError::EmptyInput);
        }

        // Fresh input discards whatever superstep was in flight: pending
        // writes are dropped, and the would-have-run tasks acknowledge their
        // trigger versions so they do not spuriously re-fire afterwards.
        self.pending_writes.clear();
        let mut entries: Vec<WriteEntry> = prepare_task_preview(&self.checkpoint, &self.graph)
            .into_iter()
            .map(|preview| WriteEntry {
                name: preview.name,
                triggers: preview.triggers,
                writes: Vec::new(),
            })
            .collect();
        entries.push(WriteEntry {
            name: INPUT.to_string(),
            triggers: Vec::new(),
            writes,
        });
        apply_writes(
            &mut self.checkpoint,
            &mut self.channels,
            &entries,
            &self.next_version,
        )?;

        self.save_checkpoint(CheckpointSource::Input, None).await;
        self.input_phase = InputPhase::Done;
        Ok(())
    }

    /// Completion branch: commit the finished superstep.
    async fn finish_superstep(&mut self) -> Result<(), LoopError> {
        let entries: Vec<WriteEntry> = self
            .tasks
            .iter()
            .map(|task| WriteEntry {
                name: task.name.clone(),
                triggers: task.triggers.clone(),
                writes: task.writes.clone(),
            })
            .collect();
        apply_writes(
            &mut self.checkpoint,
            &mut self.channels,
            &entries,
            &self.next_version,
        )?;

        if self.mux.wants(StreamMode::Values) {
            self.mux
                .emit(self.step, StreamPayload::Values(self.output_values()))
                .await;
        }
        self.pending_writes.clear();

        let mut writes_meta = FxHashMap::default();
        for task in &self.tasks {
            let visible: serde_json::Map<String, Value> = task
                .writes
                .iter()
                .filter(|(channel, _)| !crate::types::is_reserved_channel(channel))
                .map(|(channel, value)| (channel.clone(), value.clone()))
                .collect();
            writes_meta.insert(task.name.clone(), Value::Object(visible));
        }
        self.save_checkpoint(CheckpointSource::Loop, Some(writes_meta))
            .await;
        Ok(())
    }

    /// Produce and enqueue the next checkpoint; advances the step counter.
    async fn save_checkpoint(
        &mut self,
        source: CheckpointSource,
        writes: Option<FxHashMap<String, Value>>,
    ) {
        self.checkpoint = create_checkpoint(&self.checkpoint, &self.channels);
        let mut metadata = CheckpointMetadata::new(source, self.step);
        metadata.writes = writes;
        if let Some(parent_id) = &self.checkpoint_config.checkpoint_id {
            metadata
                .parents
                .insert(self.checkpoint_config.checkpoint_ns.clone(), parent_id.clone());
        }

        let new_versions: FxHashMap<_, _> = self
            .checkpoint
            .channel_versions
            .iter()
            .filter(|(name, version)| self.previous_versions.get(*name) != Some(*version))
            .map(|(name, version)| (name.clone(), version.clone()))
            .collect();
        self.previous_versions = self.checkpoint.channel_versions.clone();

        if let Some(commit) = &self.commit {
            commit.submit_put(
                self.checkpoint_config.clone(),
                self.checkpoint.clone(),
                metadata,
                new_versions,
            );
        }
        self.checkpoint_config = self.checkpoint_config.with_id(&self.checkpoint.id);

        if self.mux.wants(StreamMode::Debug) {
            self.mux
                .emit(
                    self.step,
                    StreamPayload::Debug(DebugEvent::Checkpoint {
                        checkpoint_id: self.checkpoint.id.clone(),
                    }),
                )
                .await;
        }
        self.step += 1;
    }

    /// Re-attach persisted pending writes to the freshly prepared tasks by
    /// deterministic task id. Error, interrupt, and resume bookkeeping
    /// writes are skipped: failed tasks re-run, suspended tasks re-raise
    /// unless a resume value was staged.
    fn reattach_pending_writes(&mut self) -> bool {
        if self.pending_writes.is_empty() {
            return false;
        }
        let mut any = false;
        for task in &mut self.tasks {
            if !task.writes.is_empty() {
                continue;
            }
            let recovered: Vec<(String, Value)> = self
                .pending_writes
                .iter()
                .filter(|w| {
                    w.task_id == task.id
                        && w.channel != ERROR
                        && w.channel != INTERRUPT
                        && w.channel != RESUME
                })
                .map(|w| (w.channel.clone(), w.value.clone()))
                .collect();
            if !recovered.is_empty() {
                tracing::debug!(task = %task.name, writes = recovered.len(), "re-attached persisted writes");
                task.writes = recovered;
                any = true;
            }
        }
        any
    }

    /// Interrupt predicate: the spec names a firing task (or `*`), and that
    /// task's trigger channels carry versions the interrupt bookkeeping has
    /// not yet acknowledged.
    fn should_interrupt(&self, spec: &InterruptNodes) -> bool {
        if spec.is_empty() {
            return false;
        }
        let seen = self.checkpoint.versions_seen.get(INTERRUPT);
        self.tasks.iter().any(|task| {
            spec.matches(&task.name)
                && task.triggers.iter().any(|channel| {
                    let Some(current) = self.checkpoint.channel_versions.get(channel) else {
                        return false;
                    };
                    match seen.and_then(|s| s.get(channel)) {
                        Some(acknowledged) => current > acknowledged,
                        None => true,
                    }
                })
        })
    }
}

struct TaskRunResult {
    id: String,
    name: String,
    outcome: Result<Vec<(String, Value)>, NodeError>,
}

/// In-process driver for a compiled graph.
///
/// One `GraphRunner` can serve many runs and threads; each `invoke` builds a
/// fresh loop over the thread's persisted state.
#[derive(Clone)]
pub struct GraphRunner {
    graph: Arc<Graph>,
    checkpointer: Option<Arc<dyn Checkpointer>>,
}

impl GraphRunner {
    #[must_use]
    pub fn new(graph: Graph) -> Self {
        GraphRunner {
            graph: Arc::new(graph),
            checkpointer: None,
        }
    }

    /// Attach durable persistence.
    #[must_use]
    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn Checkpointer>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    /// Run to a terminal status without streaming.
    #[instrument(skip(self, input, config), fields(thread = %config.thread_id), err)]
    pub async fn invoke(
        &self,
        input: GraphInput,
        config: RunnerConfig,
    ) -> Result<RunOutcome, LoopError> {
        self.run_with_mux(input, config, StreamMux::disabled()).await
    }

    /// Run while yielding stream events. Returns the receiver and a handle
    /// resolving to the outcome; the stream closes when the run exits.
    pub async fn stream(
        &self,
        input: GraphInput,
        config: RunnerConfig,
    ) -> (StreamReceiver, JoinHandle<Result<RunOutcome, LoopError>>) {
        let (mux, receiver) = StreamMux::bounded(
            self.graph.stream_modes().to_vec(),
            DEFAULT_STREAM_CAPACITY,
        );
        let runner = self.clone();
        let handle =
            tokio::spawn(async move { runner.run_with_mux(input, config, mux).await });
        (receiver, handle)
    }

    async fn run_with_mux(
        &self,
        input: GraphInput,
        config: RunnerConfig,
        mux: StreamMux,
    ) -> Result<RunOutcome, LoopError> {
        let mux = config
            .namespace()
            .into_iter()
            .fold(mux, |m, segment| m.child(segment));
        let mut pregel = PregelLoop::initialize(
            Arc::clone(&self.graph),
            config.clone(),
            Some(input),
            self.checkpointer.clone(),
            mux,
        )
        .await?;
        let result = Self::drive(&mut pregel, &config).await;
        pregel.finish(result).await
    }

    async fn drive(pregel: &mut PregelLoop, config: &RunnerConfig) -> Result<(), LoopError> {
        while pregel.tick().await? {
            if config.cancellation.is_cancelled() {
                return Err(LoopError::Cancelled);
            }
            let batch = pregel.take_executable_tasks();
            if batch.is_empty() {
                // Every prepared task already carries writes; nothing to run.
                return Ok(());
            }
            let step = pregel.step();
            let execution = Self::execute_batch(batch, config);
            let results = match config.step_timeout {
                Some(timeout) => match tokio::time::timeout(timeout, execution).await {
                    Ok(results) => results?,
                    Err(_) => {
                        config.cancellation.cancel();
                        return Err(LoopError::StepTimeout { step });
                    }
                },
                None => execution.await?,
            };

            let mut fatal: Option<(String, NodeError)> = None;
            for result in results {
                match result.outcome {
                    Ok(writes) => pregel.put_writes(&result.id, writes).await,
                    Err(NodeError::Interrupted { value }) => {
                        pregel.record_interrupt(&result.id, value).await;
                    }
                    Err(error) => {
                        pregel.record_error(&result.id, &error).await;
                        if fatal.is_none() {
                            fatal = Some((result.name, error));
                        }
                    }
                }
            }
            if let Some((node, source)) = fatal {
                return Err(LoopError::NodeRun { node, step, source });
            }
            if pregel.has_interrupts() {
                // Suspended mid-superstep; the caller resumes with a Command.
                return Ok(());
            }
        }
        Ok(())
    }

    /// Run a batch of tasks concurrently. A failing task does not cut the
    /// others short; every task settles before results are reported.
    async fn execute_batch(
        batch: Vec<ExecutableTask>,
        config: &RunnerConfig,
    ) -> Result<Vec<TaskRunResult>, LoopError> {
        let mut handles = Vec::with_capacity(batch.len());
        for task in batch {
            let cancellation = config.cancellation.clone();
            handles.push(tokio::spawn(async move {
                let ExecutableTask {
                    id,
                    name,
                    input,
                    node,
                    ctx,
                    sends,
                } = task;
                let run = node.run(input, ctx);
                let output = tokio::select! {
                    () = cancellation.cancelled() => Err(NodeError::Cancelled),
                    result = run => result,
                };
                let outcome = output.map(|output| {
                    // Incremental sends land first, then returned writes,
                    // then command-derived writes.
                    let mut writes: Vec<(String, Value)> = sends.lock().drain(..).collect();
                    writes.extend(output.writes);
                    if let Some(command) = output.command {
                        if command.resume.is_some() {
                            tracing::warn!(node = %name, "ignoring resume on a node-returned command");
                        }
                        writes.extend(command.into_writes());
                    }
                    if writes.is_empty() {
                        // A write-less task still has to register completion.
                        writes.push((crate::types::NO_WRITES.to_string(), Value::Null));
                    }
                    writes
                });
                TaskRunResult { id, name, outcome }
            }));
        }
        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.await?);
        }
        Ok(results)
    }
}
