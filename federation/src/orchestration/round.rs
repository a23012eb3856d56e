use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use log::debug;
use model_runtime::{Hyperparameters, ModelRuntime, Parameters, RuntimeErr};
use rayon::prelude::*;

use crate::{
    Aggregator, CoalitionBaseline, Contributions, ParticipantId, RoundErr, ShapleyAttributor,
    membership::Roster,
};

/// What a successful round produced, nothing of it is authoritative until committed.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundOutcome {
    pub params: Parameters,
    pub accuracy: f32,
    pub contributions: Contributions,
}

/// Runs the train, aggregate, evaluate and attribute steps of a round.
pub struct RoundRunner {
    runtime: Arc<dyn ModelRuntime>,
    aggregator: Aggregator,
    attributor: ShapleyAttributor,
}

impl RoundRunner {
    /// Creates a new `RoundRunner`.
    ///
    /// # Arguments
    /// * `runtime` - The model runtime shared by every participant.
    /// * `eta` - The aggregation scale.
    /// * `baseline` - The value of the empty coalition during attribution.
    pub fn new(runtime: Arc<dyn ModelRuntime>, eta: f32, baseline: CoalitionBaseline) -> Self {
        let aggregator = Aggregator::new(eta);

        Self {
            runtime,
            aggregator,
            attributor: ShapleyAttributor::new(aggregator, baseline),
        }
    }

    /// Runs a round over a captured roster.
    ///
    /// # Arguments
    /// * `round` - The round number.
    /// * `base` - The global parameters at the start of the round.
    /// * `roster` - The round's participants.
    /// * `hyper` - The local training hyperparameters.
    ///
    /// # Returns
    /// The candidate model, its accuracy and the participants' contributions, or the error that
    /// abandoned the round. Panics of the model runtime are returned as `RoundErr::Panicked`.
    pub fn run(
        &self,
        round: u64,
        base: &Parameters,
        roster: &Roster,
        hyper: &Hyperparameters,
    ) -> Result<RoundOutcome, RoundErr> {
        panic::catch_unwind(AssertUnwindSafe(|| self.run_steps(round, base, roster, hyper)))
            .unwrap_or_else(|payload| Err(RoundErr::Panicked(panic_message(payload))))
    }

    fn run_steps(
        &self,
        round: u64,
        base: &Parameters,
        roster: &Roster,
        hyper: &Hyperparameters,
    ) -> Result<RoundOutcome, RoundErr> {
        if roster.is_empty() {
            return Err(RoundErr::EmptyRoster);
        }

        let members: Vec<_> = roster.iter().collect();
        let updates = members
            .into_par_iter()
            .map(|(participant, samples)| {
                debug!(round = round, participant = participant.0, samples = samples.len(); "local training");

                self.runtime
                    .train(base, samples, hyper)
                    .map(|update| (participant, update))
                    .map_err(|source| RoundErr::Runtime {
                        participant: Some(participant),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let locals: Vec<&Parameters> = updates.iter().map(|(_, u)| u).collect();
        let params = self.aggregator.aggregate_uniform(base, &locals)?;

        if !params.is_finite() {
            return Err(RuntimeErr::Diverged.into());
        }

        let accuracy = self.runtime.evaluate(&params)?;

        let pairs: Vec<(ParticipantId, &Parameters)> =
            updates.iter().map(|(p, u)| (*p, u)).collect();
        let contributions = self
            .attributor
            .attribute_or_uniform(self.runtime.as_ref(), base, &pairs);

        Ok(RoundOutcome {
            params,
            accuracy,
            contributions,
        })
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".into()
    }
}
