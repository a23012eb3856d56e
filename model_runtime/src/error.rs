use std::{
    error::Error,
    fmt::{self, Display},
};

/// The result type used in the entire model runtime crate.
pub type Result<T> = std::result::Result<T, RuntimeErr>;

/// The model runtime's error type.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeErr {
    EmptySamples,
    IndexOutOfRange {
        index: usize,
        len: usize,
    },
    MissingParameter(String),
    ShapeMismatch {
        name: String,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    InvalidDataset(String),
    Diverged,
    Other(String),
}

impl Display for RuntimeErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeErr::EmptySamples => f.write_str("no samples were provided"),
            RuntimeErr::IndexOutOfRange { index, len } => {
                write!(f, "sample index {index} is out of range for {len} samples")
            }
            RuntimeErr::MissingParameter(name) => write!(f, "missing parameter '{name}'"),
            RuntimeErr::ShapeMismatch {
                name,
                got,
                expected,
            } => write!(
                f,
                "parameter '{name}' has shape {got:?}, expected {expected:?}"
            ),
            RuntimeErr::InvalidDataset(msg) => write!(f, "invalid dataset: {msg}"),
            RuntimeErr::Diverged => f.write_str("training produced non-finite parameters"),
            RuntimeErr::Other(msg) => f.write_str(msg),
        }
    }
}

impl Error for RuntimeErr {}
