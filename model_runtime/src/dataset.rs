use ndarray::{Array2, ArrayView2, Axis};
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::{Result, RuntimeErr};

/// An in-memory labeled dataset, one row of features per sample.
#[derive(Debug, Clone)]
pub struct Dataset {
    features: Array2<f32>,
    labels: Vec<usize>,
    classes: usize,
}

impl Dataset {
    /// Creates a new `Dataset`.
    ///
    /// # Arguments
    /// * `features` - A `(samples, dim)` matrix.
    /// * `labels` - One class label per sample.
    /// * `classes` - The amount of classes.
    ///
    /// # Returns
    /// An error if the dataset is empty, the amount of labels doesn't match the amount of rows
    /// or a label is not a valid class.
    pub fn new(features: Array2<f32>, labels: Vec<usize>, classes: usize) -> Result<Self> {
        if labels.is_empty() {
            return Err(RuntimeErr::InvalidDataset("dataset must be non-empty".into()));
        }

        if features.nrows() != labels.len() {
            return Err(RuntimeErr::InvalidDataset(format!(
                "{} feature rows but {} labels",
                features.nrows(),
                labels.len()
            )));
        }

        if let Some(label) = labels.iter().find(|&&l| l >= classes) {
            return Err(RuntimeErr::InvalidDataset(format!(
                "label {label} is out of range for {classes} classes"
            )));
        }

        Ok(Self {
            features,
            labels,
            classes,
        })
    }

    /// Generates a dataset of gaussian blobs, one blob per class.
    ///
    /// The center of class `c` has a `3.0` in every feature `j` where `j % classes == c`, so
    /// blobs are linearly separable for a small enough `spread`.
    ///
    /// # Arguments
    /// * `rng` - A random number generator.
    /// * `samples` - The amount of samples, labels are assigned round robin.
    /// * `dim` - The amount of features per sample.
    /// * `classes` - The amount of classes.
    /// * `spread` - The standard deviation of every blob.
    pub fn synthetic_blobs<R: Rng>(
        rng: &mut R,
        samples: usize,
        dim: usize,
        classes: usize,
        spread: f32,
    ) -> Result<Self> {
        let noise = Normal::new(0.0, spread)
            .map_err(|e| RuntimeErr::InvalidDataset(format!("invalid spread: {e}")))?;

        let labels: Vec<usize> = (0..samples).map(|i| i % classes.max(1)).collect();
        let features = Array2::from_shape_fn((samples, dim), |(i, j)| {
            let center = if j % classes.max(1) == labels[i] { 3.0 } else { 0.0 };
            center + noise.sample(&mut *rng)
        });

        Self::new(features, labels, classes)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Returns the amount of features per sample.
    pub fn dim(&self) -> usize {
        self.features.ncols()
    }

    pub fn classes(&self) -> usize {
        self.classes
    }

    pub fn features(&self) -> ArrayView2<'_, f32> {
        self.features.view()
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Gathers the given rows into an owned batch.
    ///
    /// # Arguments
    /// * `indices` - The sample indices to gather, in order.
    ///
    /// # Returns
    /// The features and labels of the batch, or an error if an index is out of range.
    pub fn subset(&self, indices: &[usize]) -> Result<(Array2<f32>, Vec<usize>)> {
        let len = self.len();
        if let Some(&index) = indices.iter().find(|&&i| i >= len) {
            return Err(RuntimeErr::IndexOutOfRange { index, len });
        }

        let x = self.features.select(Axis(0), indices);
        let y = indices.iter().map(|&i| self.labels[i]).collect();
        Ok((x, y))
    }
}
