use std::{
    fs,
    path::PathBuf,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{error, info, warn};
use model_runtime::{ModelRuntime, Parameters};
use parking_lot::{Mutex, RwLock};

use crate::{
    ContributionLedger, ContributionSummary, Contributions, InitErr, LedgerErr,
    MembershipRegistry, MembershipErr, ParticipantId, PartitionTable, PersistenceErr, RoundRecord,
    SnapshotStore, StatusCell, TaskConfig, TaskState, TaskStatus, UnitId,
    orchestration::{CompletionCallback, RoundRunner, RoundWorker, TaskShared},
    signal::Latch,
};

/// What the hosting application receives when a task completes.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionReport {
    pub task_id: String,
    pub rounds: u64,
    pub final_ratios: Contributions,
}

/// The result of asking a task's worker to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    /// The worker didn't exit in time, the task must still be treated as active.
    StillRunning,
}

enum PartitionSource {
    Table(PartitionTable),
    Path(PathBuf),
}

/// Builds new tasks, loading or initializing their persisted artifacts.
pub struct TaskBuilder {
    config: TaskConfig,
    runtime: Arc<dyn ModelRuntime>,
    partitions: Option<PartitionSource>,
    on_complete: Option<CompletionCallback>,
}

impl TaskBuilder {
    /// Creates a new `TaskBuilder`.
    ///
    /// # Arguments
    /// * `config` - The task configuration.
    /// * `runtime` - The model runtime that trains and evaluates the task's model.
    pub fn new(config: TaskConfig, runtime: Arc<dyn ModelRuntime>) -> Self {
        Self {
            config,
            runtime,
            partitions: None,
            on_complete: None,
        }
    }

    /// Uses an already loaded partition table.
    pub fn partitions(mut self, table: PartitionTable) -> Self {
        self.partitions = Some(PartitionSource::Table(table));
        self
    }

    /// Loads the partition table from a json document when building.
    pub fn partitions_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.partitions = Some(PartitionSource::Path(path.into()));
        self
    }

    /// Registers the callback invoked once the task completes.
    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(CompletionReport) + Send + 'static,
    {
        self.on_complete = Some(Box::new(callback));
        self
    }

    /// Builds the task, its worker is not started.
    ///
    /// An existing ledger is reopened and an existing snapshot becomes the initial global
    /// model, the task then resumes after the latest round either of them reached.
    ///
    /// # Returns
    /// The task handle, or an error if the partition source is missing or the persisted
    /// artifacts can't be used.
    pub fn build(self) -> Result<TaskHandle, InitErr> {
        let Self {
            config,
            runtime,
            partitions,
            on_complete,
        } = self;

        let partitions = match partitions {
            Some(PartitionSource::Table(table)) => table,
            Some(PartitionSource::Path(path)) => PartitionTable::from_path(path)?,
            None => {
                return Err(InitErr::InvalidConfig(
                    "no data partition source was given".into(),
                ));
            }
        };

        if let Some((unit, index)) = partitions.first_out_of_range(runtime.train_len()) {
            return Err(InitErr::SampleOutOfRange {
                unit: unit.clone(),
                index,
                len: runtime.train_len(),
            });
        }

        let dir = config.task_dir();
        fs::create_dir_all(&dir)?;

        let ledger = ContributionLedger::open(&dir, &config.task_id).map_err(|e| match e {
            LedgerErr::Persistence(e) => InitErr::Persistence(e),
            other => InitErr::InvalidConfig(other.to_string()),
        })?;

        let snapshots = SnapshotStore::new(&dir, &config.task_id, &config.name);
        let initial = runtime.initial_parameters();

        let (params, snapshot_round) = match snapshots.load()? {
            Some(snapshot) if !snapshot.params.same_layout(&initial) => {
                return Err(PersistenceErr::Corrupt(format!(
                    "{} doesn't match the runtime's model layout",
                    snapshots.path().display()
                ))
                .into());
            }
            Some(snapshot) => (snapshot.params, snapshot.round),
            None => (initial, 0),
        };

        let current_round = ledger.last_round().unwrap_or(0).max(snapshot_round) + 1;
        if current_round > 1 {
            info!(task_id = config.task_id.as_str(), round = current_round; "resuming task");
        }

        let status = Arc::new(StatusCell::new(TaskStatus {
            current_round,
            ..Default::default()
        }));

        let placeholder_len = config.placeholder_samples.min(runtime.train_len());
        let membership = MembershipRegistry::new(
            config.task_id.clone(),
            partitions,
            placeholder_len,
            config.quorum_minimum.get(),
            config.max_active.get(),
            Arc::clone(&status),
        );

        info!(
            task_id = config.task_id.as_str(),
            name = config.name.as_str(),
            total_rounds = config.total_rounds.get();
            "task created"
        );

        let shared = TaskShared {
            config,
            status,
            membership,
            global: RwLock::new(Arc::new(params)),
            ledger: Mutex::new(ledger),
            history: Mutex::new(Vec::new()),
            snapshots,
            on_complete: Mutex::new(on_complete),
            stop: Latch::new(),
            exited: Latch::new(),
        };

        Ok(TaskHandle {
            shared: Arc::new(shared),
            runtime,
            worker: None,
        })
    }
}

/// Creates a task whose data partitions are loaded from a json document.
///
/// # Arguments
/// * `config` - The task configuration.
/// * `runtime` - The model runtime.
/// * `partitions_path` - The data partition source, a missing document fails the creation.
pub fn create_task(
    config: TaskConfig,
    runtime: Arc<dyn ModelRuntime>,
    partitions_path: impl Into<PathBuf>,
) -> Result<TaskHandle, InitErr> {
    TaskBuilder::new(config, runtime)
        .partitions_path(partitions_path)
        .build()
}

/// The caller's handle over a single training task.
///
/// Every operation on the task goes through it. Dropping the handle asks the worker to stop
/// without waiting for it.
pub struct TaskHandle {
    shared: Arc<TaskShared>,
    runtime: Arc<dyn ModelRuntime>,
    worker: Option<JoinHandle<()>>,
}

impl TaskHandle {
    pub fn config(&self) -> &TaskConfig {
        &self.shared.config
    }

    /// Spawns the task's round worker.
    ///
    /// # Returns
    /// `InitErr::AlreadyStarted` if a worker is still alive, or `InitErr::Terminal` if the task
    /// already completed or failed.
    pub fn start(&mut self) -> Result<(), InitErr> {
        if let Some(worker) = self.worker.take() {
            if !self.shared.exited.is_set() {
                self.worker = Some(worker);
                return Err(InitErr::AlreadyStarted);
            }

            Self::join_worker(worker, &self.shared.config.task_id);
        }

        let state = self.shared.status.snapshot().state;
        if state.is_terminal() {
            return Err(InitErr::Terminal(state));
        }

        let shared = Arc::clone(&self.shared);
        let config = &shared.config;

        shared.stop.reset();
        shared.exited.reset();
        shared.status.update(|s| {
            s.state = TaskState::Running;
            s.apply_quorum(config.quorum_minimum.get());
        });

        let runner = RoundRunner::new(
            Arc::clone(&self.runtime),
            config.eta,
            config.coalition_baseline,
        );
        let worker = RoundWorker::new(Arc::clone(&shared), runner);

        let handle = thread::Builder::new()
            .name(format!("round-worker-{}", config.task_id))
            .spawn(move || worker.run())
            .inspect_err(|_| shared.status.update(|s| s.state = TaskState::Idle))?;

        self.worker = Some(handle);
        Ok(())
    }

    /// Asks the worker to stop and waits for it at most `timeout`.
    ///
    /// # Returns
    /// `StillRunning` if the worker didn't exit in time, it's left running and a later call can
    /// wait for it again.
    pub fn stop(&mut self, timeout: Duration) -> StopOutcome {
        let Some(worker) = self.worker.take() else {
            return StopOutcome::Stopped;
        };

        self.shared.stop.set();

        if !self.shared.exited.wait_timeout(timeout) {
            warn!(task_id = self.shared.config.task_id.as_str(); "round worker didn't stop in time");
            self.worker = Some(worker);
            return StopOutcome::StillRunning;
        }

        Self::join_worker(worker, &self.shared.config.task_id);
        StopOutcome::Stopped
    }

    fn join_worker(worker: JoinHandle<()>, task_id: &str) {
        if worker.join().is_err() {
            error!(task_id = task_id; "round worker panicked");
        }
    }

    /// Moves a participant into the active set.
    pub fn join_task(&self, participant: ParticipantId) -> Result<(), MembershipErr> {
        self.shared
            .membership
            .add(participant)
            .inspect_err(|e| warn!(participant = participant.0, error:% = e; "join rejected"))
    }

    /// Moves a participant back into the pool.
    pub fn leave_task(&self, participant: ParticipantId) -> Result<(), MembershipErr> {
        self.shared
            .membership
            .remove(participant)
            .inspect_err(|e| warn!(participant = participant.0, error:% = e; "leave rejected"))
    }

    /// Assigns data units to a participant, see `MembershipRegistry::assign`.
    pub fn assign_units(
        &self,
        participant: ParticipantId,
        units: Vec<UnitId>,
    ) -> Result<(), InitErr> {
        self.shared.membership.assign(participant, units)
    }

    pub fn is_active(&self, participant: ParticipantId) -> bool {
        self.shared.membership.is_active(participant)
    }

    pub fn active_participants(&self) -> Vec<ParticipantId> {
        self.shared.membership.active_participants()
    }

    pub fn status(&self) -> TaskStatus {
        self.shared.status.snapshot()
    }

    /// Returns the authoritative global model.
    pub fn global_parameters(&self) -> Arc<Parameters> {
        self.shared.global.read().clone()
    }

    /// Returns the accuracy of every round committed by this handle's workers.
    pub fn accuracy_history(&self) -> Vec<(u64, f32)> {
        self.shared.history.lock().clone()
    }

    pub fn round_record(&self, round: u64) -> Option<RoundRecord> {
        self.shared.ledger.lock().record(round).cloned()
    }

    pub fn final_ratios(&self) -> Contributions {
        self.shared.ledger.lock().final_ratios()
    }

    pub fn contribution_summary(&self) -> ContributionSummary {
        self.shared.ledger.lock().summary()
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.shared.stop.set();
    }
}
