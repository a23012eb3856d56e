use model_runtime::Hyperparameters;

use crate::LrDecay;

/// Derives the local training hyperparameters of every round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Schedule {
    base: Hyperparameters,
    decay: Option<LrDecay>,
}

impl Schedule {
    pub fn new(base: Hyperparameters, decay: Option<LrDecay>) -> Self {
        Self { base, decay }
    }

    /// Returns the learning rate of a round, `lr * gamma^⌊round / every⌋` when decaying.
    #[inline]
    pub fn learning_rate(&self, round: u64) -> f32 {
        let lr = self.base.learning_rate;

        match self.decay {
            None => lr,
            Some(LrDecay { every, gamma }) => {
                let steps = round / every.get();
                lr * gamma.powi(i32::try_from(steps).unwrap_or(i32::MAX))
            }
        }
    }

    /// Returns the hyperparameters of a round.
    ///
    /// The shuffling seed is offset by the round so consecutive rounds see different batches.
    pub fn hyperparameters(&self, round: u64) -> Hyperparameters {
        Hyperparameters {
            seed: self.base.seed.wrapping_add(round),
            ..self.base.with_learning_rate(self.learning_rate(round))
        }
    }
}
