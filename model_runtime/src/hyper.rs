use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

const fn nonzero(n: usize) -> NonZeroUsize {
    match NonZeroUsize::new(n) {
        Some(n) => n,
        None => panic!("value must be non zero"),
    }
}

/// Local training hyperparameters handed to the runtime on every `train` call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Hyperparameters {
    pub learning_rate: f32,
    pub local_epochs: NonZeroUsize,
    pub batch_size: NonZeroUsize,
    pub seed: u64,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            local_epochs: nonzero(2),
            batch_size: nonzero(128),
            seed: 1,
        }
    }
}

impl Hyperparameters {
    /// Returns a copy of these hyperparameters with another learning rate.
    ///
    /// # Arguments
    /// * `learning_rate` - The new learning rate.
    pub fn with_learning_rate(self, learning_rate: f32) -> Self {
        Self {
            learning_rate,
            ..self
        }
    }
}
