use std::{sync::Arc, time::Instant};

use log::{debug, error, info, warn};

use super::{RoundOutcome, RoundRunner, TaskShared};
use crate::{CompletionReport, LedgerErr, TaskState, schedule::Schedule, signal::Latch};

/// Why the worker loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Stopped,
    Completed,
    Failed,
}

/// Sets the exit latch when the worker returns, or unwinds.
struct ExitGuard<'a>(&'a Latch);

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        self.0.set();
    }
}

/// The dedicated background worker of a task, it drives rounds until the task completes, fails
/// or is stopped.
pub(crate) struct RoundWorker {
    shared: Arc<TaskShared>,
    runner: RoundRunner,
    schedule: Schedule,
}

impl RoundWorker {
    pub fn new(shared: Arc<TaskShared>, runner: RoundRunner) -> Self {
        let schedule = Schedule::new(shared.config.hyperparameters, shared.config.lr_decay);

        Self {
            shared,
            runner,
            schedule,
        }
    }

    /// Runs the training loop on the current thread.
    pub fn run(self) {
        let shared = Arc::clone(&self.shared);
        let _guard = ExitGuard(&shared.exited);
        let task_id = shared.config.task_id.as_str();

        info!(task_id = task_id; "round worker started");

        match self.train() {
            Exit::Stopped => {
                shared.status.update(|s| s.state = TaskState::Idle);
                info!(task_id = task_id; "round worker stopped");
            }
            Exit::Completed | Exit::Failed => {}
        }
    }

    fn train(&self) -> Exit {
        let shared = &self.shared;
        let config = &shared.config;
        let task_id = config.task_id.as_str();
        let total_rounds = config.total_rounds.get();

        loop {
            if shared.stop.is_set() {
                return Exit::Stopped;
            }

            let round = shared.status.snapshot().current_round;
            if round > total_rounds {
                self.complete();
                return Exit::Completed;
            }

            let Some(roster) = shared.membership.roster() else {
                debug!(task_id = task_id, round = round; "below quorum, waiting");
                if shared.stop.wait_timeout(config.timing.poll) {
                    return Exit::Stopped;
                }
                continue;
            };

            let base = shared.global.read().clone();
            let hyper = self.schedule.hyperparameters(round);
            let start = Instant::now();

            match self.runner.run(round, &base, &roster, &hyper) {
                Ok(outcome) => {
                    let accuracy = outcome.accuracy;

                    if let Err(e) = self.commit(round, outcome) {
                        error!(task_id = task_id, round = round, error:% = e; "round can't be committed");
                        self.fail();
                        return Exit::Failed;
                    }

                    info!(
                        task_id = task_id,
                        round = round,
                        participants = roster.len(),
                        accuracy = accuracy,
                        elapsed_ms = start.elapsed().as_millis() as u64;
                        "round completed"
                    );

                    if round >= total_rounds {
                        self.complete();
                        return Exit::Completed;
                    }

                    if shared.stop.wait_timeout(config.timing.round_delay) {
                        return Exit::Stopped;
                    }
                }
                Err(e) => {
                    let failures = shared.status.update(|s| {
                        s.consecutive_failures += 1;
                        s.consecutive_failures
                    });

                    error!(task_id = task_id, round = round, failures = failures, error:% = e; "round failed");

                    if config
                        .max_consecutive_failures
                        .is_some_and(|max| failures >= max.get())
                    {
                        self.fail();
                        return Exit::Failed;
                    }

                    if shared.stop.wait_timeout(config.timing.retry_backoff) {
                        return Exit::Stopped;
                    }
                }
            }
        }
    }

    /// Makes a round's outcome authoritative: contributions, global model, accuracy and round
    /// counter.
    ///
    /// # Returns
    /// An error if the round was already recorded, in which case nothing is published.
    fn commit(&self, round: u64, outcome: RoundOutcome) -> Result<(), LedgerErr> {
        let shared = &self.shared;
        let config = &shared.config;
        let task_id = config.task_id.as_str();

        let RoundOutcome {
            params,
            accuracy,
            contributions,
        } = outcome;

        {
            let mut ledger = shared.ledger.lock();
            ledger.record_round(round, contributions)?;

            if let Err(e) = ledger.flush() {
                warn!(task_id = task_id, round = round, error:% = e; "contribution ledger not persisted");
            }
        }

        let params = Arc::new(params);
        *shared.global.write() = Arc::clone(&params);
        shared.history.lock().push((round, accuracy));

        shared.status.update(|s| {
            s.current_round = round + 1;
            s.last_accuracy = Some(accuracy);
            s.consecutive_failures = 0;
        });

        if round % config.snapshot_every.get() == 0 || round == config.total_rounds.get() {
            if let Err(e) = shared.snapshots.save(round, &params) {
                warn!(task_id = task_id, round = round, error:% = e; "global model snapshot not persisted");
            }
        }

        Ok(())
    }

    /// Enters `Completed` and hands the final distribution to the completion callback.
    fn complete(&self) {
        let shared = &self.shared;
        let final_ratios = shared.ledger.lock().final_ratios();

        shared.status.update(|s| s.state = TaskState::Completed);
        info!(task_id = shared.config.task_id.as_str(), participants = final_ratios.len(); "task completed");

        let callback = shared.on_complete.lock().take();
        if let Some(callback) = callback {
            callback(CompletionReport {
                task_id: shared.config.task_id.clone(),
                rounds: shared.config.total_rounds.get(),
                final_ratios,
            });
        }
    }

    fn fail(&self) {
        self.shared.status.update(|s| s.state = TaskState::Failed);
        error!(task_id = self.shared.config.task_id.as_str(); "task failed");
    }
}
