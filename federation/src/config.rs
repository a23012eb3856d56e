use std::{
    fs,
    num::{NonZeroU32, NonZeroU64, NonZeroUsize},
    path::{Path, PathBuf},
    time::Duration,
};

use model_runtime::Hyperparameters;
use serde::{Deserialize, Serialize};

use crate::{InitErr, ShapleyAttributor};

/// What the empty coalition is worth when computing contributions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoalitionBaseline {
    #[default]
    Zero,
    BaseModel,
}

/// Step decay of the learning rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LrDecaySpec {
    pub every: u64,
    pub gamma: f32,
}

/// Sleep intervals of the round worker, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSpec {
    pub poll_ms: u64,
    pub round_delay_ms: u64,
    pub retry_backoff_ms: u64,
}

impl Default for TimingSpec {
    fn default() -> Self {
        Self {
            poll_ms: 5000,
            round_delay_ms: 15000,
            retry_backoff_ms: 10000,
        }
    }
}

/// The raw, deserializable description of a training task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TaskSpec {
    pub task_id: String,
    pub name: String,
    pub total_rounds: u64,
    #[serde(default = "default_quorum_minimum")]
    pub quorum_minimum: usize,
    #[serde(default = "default_max_active")]
    pub max_active: usize,
    #[serde(default = "default_snapshot_every")]
    pub snapshot_every: u64,
    #[serde(default = "default_eta")]
    pub eta: f32,
    #[serde(default)]
    pub hyperparameters: Hyperparameters,
    #[serde(default)]
    pub lr_decay: Option<LrDecaySpec>,
    #[serde(default)]
    pub coalition_baseline: CoalitionBaseline,
    #[serde(default = "default_placeholder_samples")]
    pub placeholder_samples: usize,
    #[serde(default)]
    pub timing: TimingSpec,
    #[serde(default)]
    pub max_consecutive_failures: Option<u32>,
    pub storage_dir: PathBuf,
}

fn default_quorum_minimum() -> usize {
    2
}

fn default_max_active() -> usize {
    10
}

fn default_snapshot_every() -> u64 {
    100
}

fn default_eta() -> f32 {
    1.0
}

fn default_placeholder_samples() -> usize {
    100
}

/// Step decay of the learning rate, validated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LrDecay {
    pub every: NonZeroU64,
    pub gamma: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timing {
    pub poll: Duration,
    pub round_delay: Duration,
    pub retry_backoff: Duration,
}

/// A validated `TaskSpec`.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskConfig {
    pub task_id: String,
    pub name: String,
    pub total_rounds: NonZeroU64,
    pub quorum_minimum: NonZeroUsize,
    pub max_active: NonZeroUsize,
    pub snapshot_every: NonZeroU64,
    pub eta: f32,
    pub hyperparameters: Hyperparameters,
    pub lr_decay: Option<LrDecay>,
    pub coalition_baseline: CoalitionBaseline,
    pub placeholder_samples: usize,
    pub timing: Timing,
    pub max_consecutive_failures: Option<NonZeroU32>,
    pub storage_dir: PathBuf,
}

impl TaskSpec {
    /// Creates a spec with every optional field set to its default.
    ///
    /// # Arguments
    /// * `task_id` - The task identifier, it names the task's storage directory.
    /// * `name` - A human readable name.
    /// * `total_rounds` - The amount of rounds to train for.
    /// * `storage_dir` - The directory persisted artifacts are written under.
    pub fn new(
        task_id: impl Into<String>,
        name: impl Into<String>,
        total_rounds: u64,
        storage_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            name: name.into(),
            total_rounds,
            quorum_minimum: default_quorum_minimum(),
            max_active: default_max_active(),
            snapshot_every: default_snapshot_every(),
            eta: default_eta(),
            hyperparameters: Hyperparameters::default(),
            lr_decay: None,
            coalition_baseline: CoalitionBaseline::default(),
            placeholder_samples: default_placeholder_samples(),
            timing: TimingSpec::default(),
            max_consecutive_failures: None,
            storage_dir: storage_dir.into(),
        }
    }

    /// Reads a spec from a json file.
    ///
    /// # Arguments
    /// * `path` - The path of the file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, InitErr> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Checks every field and converts this spec into a `TaskConfig`.
    ///
    /// # Returns
    /// The config or `InitErr::InvalidConfig` naming the first offending field.
    pub fn validate(self) -> Result<TaskConfig, InitErr> {
        let invalid = |reason: String| InitErr::InvalidConfig(reason);

        if self.task_id.is_empty()
            || self.task_id == "."
            || self.task_id == ".."
            || self.task_id.contains(['/', '\\'])
        {
            return Err(invalid(format!(
                "task_id {:?} can't be used as a directory name",
                self.task_id
            )));
        }

        let total_rounds = NonZeroU64::new(self.total_rounds)
            .ok_or_else(|| invalid("total_rounds must be at least 1".into()))?;

        let quorum_minimum = NonZeroUsize::new(self.quorum_minimum)
            .filter(|q| q.get() >= 2)
            .ok_or_else(|| invalid("quorum_minimum must be at least 2".into()))?;

        let max_attributed = ShapleyAttributor::MAX_PARTICIPANTS;
        let max_active = NonZeroUsize::new(self.max_active)
            .filter(|m| *m >= quorum_minimum && m.get() <= max_attributed)
            .ok_or_else(|| {
                invalid(format!(
                    "max_active must be between quorum_minimum ({quorum_minimum}) and {max_attributed}"
                ))
            })?;

        let snapshot_every = NonZeroU64::new(self.snapshot_every)
            .ok_or_else(|| invalid("snapshot_every must be at least 1".into()))?;

        if !(self.eta.is_finite() && self.eta > 0.0) {
            return Err(invalid(format!("eta must be positive, got {}", self.eta)));
        }

        let lr = self.hyperparameters.learning_rate;
        if !(lr.is_finite() && lr > 0.0) {
            return Err(invalid(format!("learning_rate must be positive, got {lr}")));
        }

        let lr_decay = match self.lr_decay {
            None => None,
            Some(LrDecaySpec { every, gamma }) => {
                let every = NonZeroU64::new(every)
                    .ok_or_else(|| invalid("lr_decay.every must be at least 1".into()))?;

                if !(gamma.is_finite() && gamma > 0.0) {
                    return Err(invalid(format!(
                        "lr_decay.gamma must be positive, got {gamma}"
                    )));
                }

                Some(LrDecay { every, gamma })
            }
        };

        let TimingSpec {
            poll_ms,
            round_delay_ms,
            retry_backoff_ms,
        } = self.timing;

        Ok(TaskConfig {
            task_id: self.task_id,
            name: self.name,
            total_rounds,
            quorum_minimum,
            max_active,
            snapshot_every,
            eta: self.eta,
            hyperparameters: self.hyperparameters,
            lr_decay,
            coalition_baseline: self.coalition_baseline,
            placeholder_samples: self.placeholder_samples,
            timing: Timing {
                poll: Duration::from_millis(poll_ms),
                round_delay: Duration::from_millis(round_delay_ms),
                retry_backoff: Duration::from_millis(retry_backoff_ms),
            },
            max_consecutive_failures: self.max_consecutive_failures.and_then(NonZeroU32::new),
            storage_dir: self.storage_dir,
        })
    }
}

impl TaskConfig {
    /// The directory holding this task's persisted artifacts.
    pub fn task_dir(&self) -> PathBuf {
        self.storage_dir.join(&self.task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> TaskSpec {
        TaskSpec::new("t1", "digits", 3, "/tmp/federation")
    }

    #[test]
    fn minimal_json_gets_defaults() {
        let spec: TaskSpec = serde_json::from_str(
            r#"{ "task_id": "t1", "name": "digits", "total_rounds": 3, "storage_dir": "/tmp/x" }"#,
        )
        .unwrap();

        assert_eq!(spec.quorum_minimum, 2);
        assert_eq!(spec.max_active, 10);
        assert_eq!(spec.snapshot_every, 100);
        assert_eq!(spec.eta, 1.0);
        assert_eq!(spec.placeholder_samples, 100);
        assert_eq!(spec.coalition_baseline, CoalitionBaseline::Zero);
        assert_eq!(spec.timing, TimingSpec::default());
        assert_eq!(spec.lr_decay, None);
    }

    #[test]
    fn nested_fields_parse() {
        let spec: TaskSpec = serde_json::from_str(
            r#"{
                "task_id": "t1",
                "name": "digits",
                "total_rounds": 3,
                "storage_dir": "/tmp/x",
                "coalition_baseline": "base_model",
                "lr_decay": { "every": 10, "gamma": 0.5 },
                "timing": { "poll_ms": 10 }
            }"#,
        )
        .unwrap();

        assert_eq!(spec.coalition_baseline, CoalitionBaseline::BaseModel);
        assert_eq!(spec.lr_decay, Some(LrDecaySpec { every: 10, gamma: 0.5 }));
        assert_eq!(spec.timing.poll_ms, 10);
        assert_eq!(spec.timing.round_delay_ms, 15000);
    }

    #[test]
    fn validation_converts_timings() {
        let config = spec().validate().unwrap();
        assert_eq!(config.timing.poll, Duration::from_secs(5));
        assert_eq!(config.timing.round_delay, Duration::from_secs(15));
        assert_eq!(config.timing.retry_backoff, Duration::from_secs(10));
        assert_eq!(config.task_dir(), PathBuf::from("/tmp/federation/t1"));
    }

    #[test]
    fn quorum_below_two_is_rejected() {
        let mut spec = spec();
        spec.quorum_minimum = 1;
        assert!(matches!(spec.validate(), Err(InitErr::InvalidConfig(_))));
    }

    #[test]
    fn max_active_below_quorum_is_rejected() {
        let mut spec = spec();
        spec.quorum_minimum = 4;
        spec.max_active = 3;
        assert!(matches!(spec.validate(), Err(InitErr::InvalidConfig(_))));
    }

    #[test]
    fn max_active_is_bounded() {
        let mut spec = spec();
        spec.max_active = ShapleyAttributor::MAX_PARTICIPANTS + 1;
        assert!(matches!(spec.validate(), Err(InitErr::InvalidConfig(_))));
    }

    #[test]
    fn zero_rounds_is_rejected() {
        let mut spec = spec();
        spec.total_rounds = 0;
        assert!(matches!(spec.validate(), Err(InitErr::InvalidConfig(_))));
    }

    #[test]
    fn task_id_must_be_a_plain_name() {
        let mut spec = spec();
        spec.task_id = "../escape".into();
        assert!(matches!(spec.validate(), Err(InitErr::InvalidConfig(_))));
    }

    #[test]
    fn non_positive_gamma_is_rejected() {
        let mut spec = spec();
        spec.lr_decay = Some(LrDecaySpec { every: 5, gamma: 0.0 });
        assert!(matches!(spec.validate(), Err(InitErr::InvalidConfig(_))));
    }

    #[test]
    fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let res = TaskSpec::from_path(dir.path().join("task.json"));
        assert!(matches!(res, Err(InitErr::Io(_))));
    }
}
