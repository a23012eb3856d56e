use model_runtime::{Parameters, Tensor};
use ndarray::ArrayD;
use rayon::prelude::*;

use super::{AggregationErr, error::Result};

/// Combines participant updates into a new global model with a weighted mean of their deltas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aggregator {
    eta: f32,
}

impl Aggregator {
    /// Creates a new `Aggregator`.
    ///
    /// # Arguments
    /// * `eta` - The scale applied to the mean delta before adding it to the base.
    pub fn new(eta: f32) -> Self {
        Self { eta }
    }

    pub fn eta(&self) -> f32 {
        self.eta
    }

    /// Aggregates the updates giving every one of them the same weight.
    ///
    /// # Arguments
    /// * `base` - The parameters every update was trained from.
    /// * `updates` - The locally trained parameters.
    pub fn aggregate_uniform(
        &self,
        base: &Parameters,
        updates: &[&Parameters],
    ) -> Result<Parameters> {
        self.aggregate(base, updates, &vec![1.0; updates.len()])
    }

    /// Computes `base + eta * Σ wᵢ (updateᵢ - base) / Σ wᵢ` for every float tensor.
    ///
    /// Count tensors are copied from `base` untouched. The result only depends on the inputs,
    /// tensors are reduced in name order and updates in the order given.
    ///
    /// # Arguments
    /// * `base` - The parameters every update was trained from.
    /// * `updates` - The locally trained parameters, with the same layout as `base`.
    /// * `weights` - One weight per update.
    ///
    /// # Returns
    /// The new parameters or an error if the inputs are inconsistent.
    pub fn aggregate(
        &self,
        base: &Parameters,
        updates: &[&Parameters],
        weights: &[f32],
    ) -> Result<Parameters> {
        if updates.is_empty() {
            return Err(AggregationErr::NoUpdates);
        }

        if updates.len() != weights.len() {
            return Err(AggregationErr::WeightCountMismatch {
                updates: updates.len(),
                weights: weights.len(),
            });
        }

        let total: f32 = weights.iter().sum();
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) || !(total > 0.0) {
            return Err(AggregationErr::NonPositiveWeights);
        }

        for update in updates {
            if let Some(name) = Self::first_mismatch(base, update) {
                return Err(AggregationErr::LayoutMismatch { name });
            }
        }

        let tensors: Vec<_> = base.iter().collect();
        let merged = tensors
            .into_par_iter()
            .map(|(name, tensor)| -> Result<(String, Tensor)> {
                let merged = match tensor {
                    Tensor::Count(_) => tensor.clone(),
                    Tensor::Float(b) => {
                        Tensor::Float(self.merge_float(name, b, updates, weights, total)?)
                    }
                };
                Ok((name.clone(), merged))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(merged.into_iter().collect())
    }

    fn merge_float(
        &self,
        name: &str,
        base: &ArrayD<f32>,
        updates: &[&Parameters],
        weights: &[f32],
        total: f32,
    ) -> Result<ArrayD<f32>> {
        let mut acc = ArrayD::<f32>::zeros(base.raw_dim());

        for (update, &w) in updates.iter().zip(weights) {
            let local = update
                .get(name)
                .and_then(Tensor::as_float)
                .ok_or_else(|| AggregationErr::LayoutMismatch { name: name.into() })?;

            acc.scaled_add(w, &(local - base));
        }

        acc.mapv_inplace(|v| v / total * self.eta);
        Ok(acc + base)
    }

    /// Returns the first parameter name where `update` differs in layout from `base`.
    fn first_mismatch(base: &Parameters, update: &Parameters) -> Option<String> {
        if base.same_layout(update) {
            return None;
        }

        base.iter()
            .find(|(name, tensor)| {
                update
                    .get(name)
                    .is_none_or(|other| !tensor.same_layout(other))
            })
            .map(|(name, _)| name.clone())
            .or_else(|| {
                update
                    .names()
                    .find(|name| base.get(name).is_none())
                    .map(String::from)
            })
    }
}
