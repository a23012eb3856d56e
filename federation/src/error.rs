use std::{
    error::Error,
    fmt::{self, Display},
    io,
    path::PathBuf,
};

use model_runtime::RuntimeErr;

use crate::{AggregationErr, ParticipantId, PersistenceErr, TaskState, UnitId};

/// Failures that prevent a task from being created or started.
///
/// No task is left running when one of these is returned.
#[derive(Debug)]
pub enum InitErr {
    MissingPartitions(PathBuf),
    InvalidConfig(String),
    UnknownDataUnit {
        participant: ParticipantId,
        unit: UnitId,
    },
    SampleOutOfRange {
        unit: UnitId,
        index: usize,
        len: usize,
    },
    AlreadyStarted,
    /// The task already completed or failed, it can't be started again.
    Terminal(TaskState),
    Persistence(PersistenceErr),
    Io(io::Error),
    Json(serde_json::Error),
}

impl Display for InitErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitErr::MissingPartitions(path) => {
                write!(f, "missing data partition source: {}", path.display())
            }
            InitErr::InvalidConfig(reason) => write!(f, "invalid task configuration: {reason}"),
            InitErr::UnknownDataUnit { participant, unit } => {
                write!(f, "participant {participant} references unknown data unit {unit:?}")
            }
            InitErr::SampleOutOfRange { unit, index, len } => write!(
                f,
                "data unit {unit:?} references sample {index} but the runtime has {len} samples"
            ),
            InitErr::AlreadyStarted => f.write_str("task worker is already running"),
            InitErr::Terminal(state) => write!(f, "task is {state:?} and can't be restarted"),
            InitErr::Persistence(e) => write!(f, "persistence error: {e}"),
            InitErr::Io(e) => write!(f, "io error: {e}"),
            InitErr::Json(e) => write!(f, "json error: {e}"),
        }
    }
}

impl Error for InitErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            InitErr::Persistence(e) => Some(e),
            InitErr::Io(e) => Some(e),
            InitErr::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for InitErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for InitErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<PersistenceErr> for InitErr {
    fn from(value: PersistenceErr) -> Self {
        Self::Persistence(value)
    }
}

/// A failure inside a single round's pipeline.
///
/// It's absorbed by the round worker: the round is abandoned and retried after a backoff.
#[derive(Debug)]
pub enum RoundErr {
    Runtime {
        participant: Option<ParticipantId>,
        source: RuntimeErr,
    },
    Aggregation(AggregationErr),
    EmptyRoster,
    Panicked(String),
}

impl Display for RoundErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundErr::Runtime {
                participant: Some(p),
                source,
            } => write!(f, "local training of participant {p} failed: {source}"),
            RoundErr::Runtime {
                participant: None,
                source,
            } => write!(f, "model runtime failed: {source}"),
            RoundErr::Aggregation(e) => write!(f, "aggregation failed: {e}"),
            RoundErr::EmptyRoster => f.write_str("round started without active participants"),
            RoundErr::Panicked(msg) => write!(f, "model runtime panicked: {msg}"),
        }
    }
}

impl Error for RoundErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RoundErr::Runtime { source, .. } => Some(source),
            RoundErr::Aggregation(e) => Some(e),
            _ => None,
        }
    }
}

impl From<AggregationErr> for RoundErr {
    fn from(value: AggregationErr) -> Self {
        Self::Aggregation(value)
    }
}

impl From<RuntimeErr> for RoundErr {
    fn from(source: RuntimeErr) -> Self {
        Self::Runtime {
            participant: None,
            source,
        }
    }
}
