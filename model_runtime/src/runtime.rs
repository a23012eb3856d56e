use crate::{Hyperparameters, Parameters, Result};

/// The model runtime: it knows how to train and evaluate a parameterized model.
///
/// Calls are stateless from the caller's point of view, the same runtime is shared by every
/// participant of a round and may be invoked from several threads at once.
pub trait ModelRuntime: Send + Sync {
    /// Returns the parameters of a freshly initialized model.
    fn initial_parameters(&self) -> Parameters;

    /// Trains a copy of `base` over the given training samples.
    ///
    /// # Arguments
    /// * `base` - The parameters to start from.
    /// * `samples` - Indices into the runtime's training set.
    /// * `hyper` - The local training hyperparameters.
    ///
    /// # Returns
    /// The locally trained parameters, with the same layout as `base`.
    fn train(
        &self,
        base: &Parameters,
        samples: &[usize],
        hyper: &Hyperparameters,
    ) -> Result<Parameters>;

    /// Evaluates the parameters against the runtime's held-out set.
    ///
    /// Repeated evaluations of identical parameters must yield identical results.
    ///
    /// # Returns
    /// The accuracy, in `[0, 1]`.
    fn evaluate(&self, params: &Parameters) -> Result<f32>;

    /// Returns the amount of addressable training samples.
    fn train_len(&self) -> usize;
}
