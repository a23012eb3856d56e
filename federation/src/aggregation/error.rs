use std::{
    error::Error,
    fmt::{self, Display},
};

/// The aggregation module's result type.
pub type Result<T> = std::result::Result<T, AggregationErr>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregationErr {
    NoUpdates,
    WeightCountMismatch { updates: usize, weights: usize },
    LayoutMismatch { name: String },
    NonPositiveWeights,
}

impl Display for AggregationErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregationErr::NoUpdates => f.write_str("there are no updates to aggregate"),
            AggregationErr::WeightCountMismatch { updates, weights } => {
                write!(f, "got {updates} updates but {weights} weights")
            }
            AggregationErr::LayoutMismatch { name } => {
                write!(f, "parameter {name:?} doesn't match the base model's layout")
            }
            AggregationErr::NonPositiveWeights => {
                f.write_str("weights must be finite, non negative and add up to a positive value")
            }
        }
    }
}

impl Error for AggregationErr {}
