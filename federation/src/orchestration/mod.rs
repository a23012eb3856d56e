mod round;
mod shared;
mod worker;

pub use round::{RoundOutcome, RoundRunner};
pub(crate) use shared::{CompletionCallback, TaskShared};
pub(crate) use worker::RoundWorker;
