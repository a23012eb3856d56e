use parking_lot::RwLock;

/// The lifecycle of a task's round worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TaskState {
    #[default]
    Idle,
    Running,
    Paused,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

/// A read-only snapshot of a task's progress, polled by the hosting application.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskStatus {
    pub current_round: u64,
    pub active_participant_count: usize,
    pub available_participant_count: usize,
    pub registered_participant_count: usize,
    pub is_paused: bool,
    pub state: TaskState,
    pub last_accuracy: Option<f32>,
    pub consecutive_failures: u32,
}

impl TaskStatus {
    /// Whether the round worker is alive, paused or not.
    pub fn is_running(&self) -> bool {
        matches!(self.state, TaskState::Running | TaskState::Paused)
    }

    /// Recomputes the pause flag from the active count, moving between `Running` and `Paused`.
    ///
    /// # Arguments
    /// * `quorum_minimum` - The minimum amount of active participants to train.
    pub(crate) fn apply_quorum(&mut self, quorum_minimum: usize) {
        self.is_paused = self.active_participant_count < quorum_minimum;

        self.state = match (self.state, self.is_paused) {
            (TaskState::Running, true) => TaskState::Paused,
            (TaskState::Paused, false) => TaskState::Running,
            (state, _) => state,
        };
    }
}

/// The lock protected status cell, the round worker and the membership registry write it and
/// any amount of pollers read it.
#[derive(Debug, Default)]
pub struct StatusCell {
    inner: RwLock<TaskStatus>,
}

impl StatusCell {
    pub fn new(status: TaskStatus) -> Self {
        Self {
            inner: RwLock::new(status),
        }
    }

    pub fn snapshot(&self) -> TaskStatus {
        self.inner.read().clone()
    }

    /// Mutates the status under the write lock.
    ///
    /// # Returns
    /// Whatever `f` returns.
    pub fn update<T, F: FnOnce(&mut TaskStatus) -> T>(&self, f: F) -> T {
        f(&mut *self.inner.write())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quorum_moves_between_running_and_paused() {
        let mut status = TaskStatus {
            state: TaskState::Running,
            active_participant_count: 1,
            ..Default::default()
        };

        status.apply_quorum(2);
        assert!(status.is_paused);
        assert_eq!(status.state, TaskState::Paused);

        status.active_participant_count = 2;
        status.apply_quorum(2);
        assert!(!status.is_paused);
        assert_eq!(status.state, TaskState::Running);
    }

    #[test]
    fn quorum_keeps_other_states() {
        for state in [TaskState::Idle, TaskState::Completed, TaskState::Failed] {
            let mut status = TaskStatus {
                state,
                ..Default::default()
            };

            status.apply_quorum(2);
            assert!(status.is_paused);
            assert_eq!(status.state, state);
        }
    }
}
