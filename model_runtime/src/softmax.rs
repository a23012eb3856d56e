use log::debug;
use ndarray::{Array1, Array2, ArrayD, ArrayView1, ArrayView2, Axis, Ix1, Ix2};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use rand_distr::{Distribution, Normal};

use crate::{Dataset, Hyperparameters, ModelRuntime, Parameters, Result, RuntimeErr, Tensor};

/// A multinomial logistic regression runtime.
///
/// It's the reference `ModelRuntime`: small enough to train many times per round while still
/// carrying a count tensor next to its float tensors.
#[derive(Debug, Clone)]
pub struct SoftmaxRegression {
    train: Dataset,
    test: Dataset,
    init_std: f32,
    init_seed: u64,
}

impl SoftmaxRegression {
    pub const WEIGHT: &'static str = "weight";
    pub const BIAS: &'static str = "bias";
    pub const STEPS: &'static str = "steps_tracked";

    /// Creates a new `SoftmaxRegression`.
    ///
    /// # Arguments
    /// * `train` - The dataset local training draws samples from.
    /// * `test` - The held-out dataset used for evaluation.
    ///
    /// # Returns
    /// An error if both datasets don't agree on features and classes.
    pub fn new(train: Dataset, test: Dataset) -> Result<Self> {
        if train.dim() != test.dim() || train.classes() != test.classes() {
            return Err(RuntimeErr::InvalidDataset(format!(
                "train is ({}, {} classes) but test is ({}, {} classes)",
                train.dim(),
                train.classes(),
                test.dim(),
                test.classes()
            )));
        }

        Ok(Self {
            train,
            test,
            init_std: 0.01,
            init_seed: 0,
        })
    }

    /// Sets how the initial weights are sampled.
    ///
    /// # Arguments
    /// * `std_dev` - The standard deviation of the normal the weights are drawn from.
    /// * `seed` - The seed of the sampling rng.
    pub fn with_init(mut self, std_dev: f32, seed: u64) -> Self {
        self.init_std = std_dev;
        self.init_seed = seed;
        self
    }

    fn shape(&self) -> (usize, usize) {
        (self.train.dim(), self.train.classes())
    }

    /// Borrows the weights, biases and step counter out of `params`.
    fn unpack<'a>(
        &self,
        params: &'a Parameters,
    ) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>, i64)> {
        let (dim, classes) = self.shape();

        let mismatch = |name: &str, got: &[usize], expected: Vec<usize>| RuntimeErr::ShapeMismatch {
            name: name.to_string(),
            got: got.to_vec(),
            expected,
        };

        let weight = float_param(params, Self::WEIGHT)?;
        let weight = weight
            .view()
            .into_dimensionality::<Ix2>()
            .ok()
            .filter(|w| w.dim() == (dim, classes))
            .ok_or_else(|| mismatch(Self::WEIGHT, weight.shape(), vec![dim, classes]))?;

        let bias = float_param(params, Self::BIAS)?;
        let bias = bias
            .view()
            .into_dimensionality::<Ix1>()
            .ok()
            .filter(|b| b.len() == classes)
            .ok_or_else(|| mismatch(Self::BIAS, bias.shape(), vec![classes]))?;

        let steps = params
            .get(Self::STEPS)
            .and_then(Tensor::as_count)
            .and_then(|s| s.iter().next().copied())
            .ok_or_else(|| RuntimeErr::MissingParameter(Self::STEPS.to_string()))?;

        Ok((weight, bias, steps))
    }

    /// Computes the row-wise softmax of `x · w + b`.
    fn probabilities(x: ArrayView2<f32>, w: ArrayView2<f32>, b: ArrayView1<f32>) -> Array2<f32> {
        let mut z = x.dot(&w) + &b;

        for mut row in z.rows_mut() {
            let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
            row.mapv_inplace(|v| (v - max).exp());
            let sum = row.sum();
            row.mapv_inplace(|v| v / sum);
        }

        z
    }

    fn pack(w: Array2<f32>, b: Array1<f32>, steps: i64) -> Parameters {
        let mut params = Parameters::new();
        params.insert(Self::WEIGHT, Tensor::Float(w.into_dyn()));
        params.insert(Self::BIAS, Tensor::Float(b.into_dyn()));
        params.insert(Self::STEPS, Tensor::scalar_count(steps));
        params
    }
}

fn float_param<'a>(params: &'a Parameters, name: &str) -> Result<&'a ArrayD<f32>> {
    params
        .get(name)
        .and_then(Tensor::as_float)
        .ok_or_else(|| RuntimeErr::MissingParameter(name.to_string()))
}

impl ModelRuntime for SoftmaxRegression {
    fn initial_parameters(&self) -> Parameters {
        let (dim, classes) = self.shape();
        let mut rng = StdRng::seed_from_u64(self.init_seed);

        let w = match Normal::new(0.0, self.init_std) {
            Ok(normal) => Array2::from_shape_fn((dim, classes), |_| normal.sample(&mut rng)),
            Err(_) => Array2::zeros((dim, classes)),
        };

        Self::pack(w, Array1::zeros(classes), 0)
    }

    fn train(
        &self,
        base: &Parameters,
        samples: &[usize],
        hyper: &Hyperparameters,
    ) -> Result<Parameters> {
        if samples.is_empty() {
            return Err(RuntimeErr::EmptySamples);
        }

        let (w, b, mut steps) = self.unpack(base)?;
        let mut w = w.to_owned();
        let mut b = b.to_owned();

        let mut order = samples.to_vec();
        let mut rng = StdRng::seed_from_u64(hyper.seed);
        let lr = hyper.learning_rate;

        for _ in 0..hyper.local_epochs.get() {
            order.shuffle(&mut rng);

            for batch in order.chunks(hyper.batch_size.get()) {
                let (x, y) = self.train.subset(batch)?;
                let mut d = Self::probabilities(x.view(), w.view(), b.view());

                for (mut row, &label) in d.rows_mut().into_iter().zip(&y) {
                    row[label] -= 1.0;
                }

                let n = batch.len() as f32;
                let grad_w = x.t().dot(&d) / n;
                let grad_b = d.sum_axis(Axis(0)) / n;

                w.scaled_add(-lr, &grad_w);
                b.scaled_add(-lr, &grad_b);
                steps += 1;
            }
        }

        if !w.iter().chain(b.iter()).all(|v| v.is_finite()) {
            return Err(RuntimeErr::Diverged);
        }

        debug!(samples = samples.len(), steps = steps; "local training finished");
        Ok(Self::pack(w, b, steps))
    }

    fn evaluate(&self, params: &Parameters) -> Result<f32> {
        let (w, b, _) = self.unpack(params)?;
        let p = Self::probabilities(self.test.features(), w, b);

        let correct = p
            .rows()
            .into_iter()
            .zip(self.test.labels())
            .filter(|(row, label)| {
                let predicted = row
                    .iter()
                    .enumerate()
                    .fold((0, f32::NEG_INFINITY), |best, (i, &v)| {
                        if v > best.1 { (i, v) } else { best }
                    })
                    .0;
                predicted == **label
            })
            .count();

        Ok(correct as f32 / self.test.len() as f32)
    }

    fn train_len(&self) -> usize {
        self.train.len()
    }
}
