use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

use safetensors::SafeTensorError;

/// The storage module's result type.
pub type Result<T> = std::result::Result<T, PersistenceErr>;

/// A failure reading or writing a persisted artifact.
///
/// Write failures are logged by the round worker and never abort a round.
#[derive(Debug)]
pub enum PersistenceErr {
    Io(io::Error),
    Json(serde_json::Error),
    Safetensors(SafeTensorError),
    Corrupt(String),
}

impl Display for PersistenceErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistenceErr::Io(e) => write!(f, "io error: {e}"),
            PersistenceErr::Json(e) => write!(f, "json error: {e}"),
            PersistenceErr::Safetensors(e) => write!(f, "safetensors error: {e}"),
            PersistenceErr::Corrupt(reason) => write!(f, "corrupt artifact: {reason}"),
        }
    }
}

impl Error for PersistenceErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PersistenceErr::Io(e) => Some(e),
            PersistenceErr::Json(e) => Some(e),
            PersistenceErr::Safetensors(e) => Some(e),
            PersistenceErr::Corrupt(_) => None,
        }
    }
}

impl From<io::Error> for PersistenceErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for PersistenceErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<SafeTensorError> for PersistenceErr {
    fn from(value: SafeTensorError) -> Self {
        Self::Safetensors(value)
    }
}
