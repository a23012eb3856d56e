use std::{
    error::Error,
    fmt::{self, Display},
};

use model_runtime::RuntimeErr;

use crate::AggregationErr;

/// The attribution module's result type.
pub type Result<T> = std::result::Result<T, AttributionErr>;

#[derive(Debug, Clone, PartialEq)]
pub enum AttributionErr {
    TooFewParticipants,
    TooManyParticipants { got: usize, max: usize },
    Runtime(RuntimeErr),
    Aggregation(AggregationErr),
    NonFinite,
}

impl Display for AttributionErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributionErr::TooFewParticipants => f.write_str("there are no participants to attribute"),
            AttributionErr::TooManyParticipants { got, max } => {
                write!(f, "can't attribute {got} participants, the maximum is {max}")
            }
            AttributionErr::Runtime(e) => write!(f, "coalition evaluation failed: {e}"),
            AttributionErr::Aggregation(e) => write!(f, "coalition aggregation failed: {e}"),
            AttributionErr::NonFinite => f.write_str("a coalition value is not finite"),
        }
    }
}

impl Error for AttributionErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AttributionErr::Runtime(e) => Some(e),
            AttributionErr::Aggregation(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RuntimeErr> for AttributionErr {
    fn from(value: RuntimeErr) -> Self {
        Self::Runtime(value)
    }
}

impl From<AggregationErr> for AttributionErr {
    fn from(value: AggregationErr) -> Self {
        Self::Aggregation(value)
    }
}
