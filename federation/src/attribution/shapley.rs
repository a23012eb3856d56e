use std::panic::{self, AssertUnwindSafe};

use log::{debug, warn};
use model_runtime::{ModelRuntime, Parameters};
use rayon::prelude::*;

use super::{AttributionErr, Contributions, error::Result, uniform};
use crate::{Aggregator, CoalitionBaseline, ParticipantId};

/// Scores every participant of a round with its Shapley value over coalition models.
///
/// The value of a coalition is the accuracy of the uniform aggregate of its members' updates.
/// Since that aggregate doesn't depend on the order members joined in, every distinct coalition
/// is evaluated once and the permutation walk reads the memoized values.
#[derive(Debug, Clone, Copy)]
pub struct ShapleyAttributor {
    aggregator: Aggregator,
    baseline: CoalitionBaseline,
}

impl ShapleyAttributor {
    /// The largest participant set that can be attributed, `2^n` coalitions and `n!` permutations.
    pub const MAX_PARTICIPANTS: usize = 10;

    /// Creates a new `ShapleyAttributor`.
    ///
    /// # Arguments
    /// * `aggregator` - Builds coalition models, it should be the round's own aggregator.
    /// * `baseline` - The value given to the empty coalition.
    pub fn new(aggregator: Aggregator, baseline: CoalitionBaseline) -> Self {
        Self {
            aggregator,
            baseline,
        }
    }

    /// Computes the normalized contributions of a round.
    ///
    /// # Arguments
    /// * `runtime` - Evaluates coalition models.
    /// * `base` - The parameters the round started from.
    /// * `updates` - Every participant's locally trained parameters.
    ///
    /// # Returns
    /// A distribution over the participants that sums to 1, the uniform one if the Shapley values
    /// don't add up to a positive amount.
    pub fn attribute(
        &self,
        runtime: &dyn ModelRuntime,
        base: &Parameters,
        updates: &[(ParticipantId, &Parameters)],
    ) -> Result<Contributions> {
        let values = self.shapley_values(runtime, base, updates)?;
        let total: f64 = values.values().sum();

        if !(total > 0.0) {
            warn!(total = total; "shapley values don't add up to a positive amount, splitting uniformly");
            return Ok(uniform(values.into_keys()));
        }

        Ok(values.into_iter().map(|(p, v)| (p, v / total)).collect())
    }

    /// Same as `attribute`, but any failure, panics included, degrades to the uniform split.
    pub fn attribute_or_uniform(
        &self,
        runtime: &dyn ModelRuntime,
        base: &Parameters,
        updates: &[(ParticipantId, &Parameters)],
    ) -> Contributions {
        let res = panic::catch_unwind(AssertUnwindSafe(|| self.attribute(runtime, base, updates)));

        match res {
            Ok(Ok(contributions)) => contributions,
            Ok(Err(e)) => {
                warn!(error:% = e; "attribution failed, splitting uniformly");
                uniform(updates.iter().map(|(p, _)| *p))
            }
            Err(_) => {
                warn!("attribution panicked, splitting uniformly");
                uniform(updates.iter().map(|(p, _)| *p))
            }
        }
    }

    /// Computes the raw Shapley value of every participant.
    ///
    /// Each value is the mean, over every ordering of the participants, of the accuracy gained
    /// when the participant joins the coalition of the ones before it.
    pub fn shapley_values(
        &self,
        runtime: &dyn ModelRuntime,
        base: &Parameters,
        updates: &[(ParticipantId, &Parameters)],
    ) -> Result<Contributions> {
        let n = updates.len();
        if n == 0 {
            return Err(AttributionErr::TooFewParticipants);
        }

        if n > Self::MAX_PARTICIPANTS {
            return Err(AttributionErr::TooManyParticipants {
                got: n,
                max: Self::MAX_PARTICIPANTS,
            });
        }

        let values = self.coalition_values(runtime, base, updates)?;

        let mut marginals = vec![0.0; n];
        let mut order: Vec<usize> = (0..n).collect();
        let mut permutations = 0u64;

        loop {
            let mut coalition = 0usize;
            for &i in &order {
                let before = values[coalition];
                coalition |= 1 << i;
                marginals[i] += values[coalition] - before;
            }

            permutations += 1;
            if !next_permutation(&mut order) {
                break;
            }
        }

        debug!(participants = n, permutations = permutations; "shapley values computed");

        let permutations = permutations as f64;
        Ok(updates
            .iter()
            .zip(marginals)
            .map(|((p, _), m)| (*p, m / permutations))
            .collect())
    }

    /// Evaluates every coalition, indexed by the bitmask of its members.
    fn coalition_values(
        &self,
        runtime: &dyn ModelRuntime,
        base: &Parameters,
        updates: &[(ParticipantId, &Parameters)],
    ) -> Result<Vec<f64>> {
        let n = updates.len();
        let coalitions = 1usize << n;

        let empty = match self.baseline {
            CoalitionBaseline::Zero => 0.0,
            CoalitionBaseline::BaseModel => finite(runtime.evaluate(base)?)?,
        };

        debug!(participants = n, coalitions = coalitions - 1; "evaluating coalition models");

        let values = (1..coalitions)
            .into_par_iter()
            .map(|mask| -> Result<f64> {
                let members: Vec<&Parameters> = (0..n)
                    .filter(|i| mask & (1 << i) != 0)
                    .map(|i| updates[i].1)
                    .collect();

                let model = self.aggregator.aggregate_uniform(base, &members)?;
                finite(runtime.evaluate(&model)?)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut out = Vec::with_capacity(coalitions);
        out.push(empty);
        out.extend(values);
        Ok(out)
    }
}

fn finite(accuracy: f32) -> Result<f64> {
    if accuracy.is_finite() {
        Ok(accuracy as f64)
    } else {
        Err(AttributionErr::NonFinite)
    }
}

/// Rearranges `order` into its lexicographic successor.
///
/// # Returns
/// `false` once `order` was the last permutation, leaving it untouched.
fn next_permutation(order: &mut [usize]) -> bool {
    let Some(pivot) = order.windows(2).rposition(|w| w[0] < w[1]) else {
        return false;
    };

    let Some(successor) = order.iter().rposition(|&v| v > order[pivot]) else {
        return false;
    };

    order.swap(pivot, successor);
    order[pivot + 1..].reverse();
    true
}
