mod error;
mod shapley;

use std::collections::BTreeMap;

use crate::ParticipantId;

pub use error::AttributionErr;
pub use shapley::ShapleyAttributor;

/// A participant to score mapping, for a single round or accumulated.
pub type Contributions = BTreeMap<ParticipantId, f64>;

/// The equal split over the given participants.
///
/// # Arguments
/// * `participants` - The participants to split between.
pub fn uniform<I: IntoIterator<Item = ParticipantId>>(participants: I) -> Contributions {
    let mut out: Contributions = participants.into_iter().map(|p| (p, 0.0)).collect();
    let share = 1.0 / out.len() as f64;
    out.values_mut().for_each(|v| *v = share);
    out
}
