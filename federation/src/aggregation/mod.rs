mod aggregator;
mod error;

pub use aggregator::Aggregator;
pub use error::AggregationErr;
