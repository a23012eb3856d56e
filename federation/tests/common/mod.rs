#![allow(dead_code)]

use std::{
    num::NonZeroUsize,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use federation::{PartitionTable, TaskSpec};
use model_runtime::{
    Dataset, Hyperparameters, ModelRuntime, Parameters, RuntimeErr, SoftmaxRegression,
};
use rand::{SeedableRng, rngs::StdRng};

pub const WAIT: Duration = Duration::from_secs(30);

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// The reference runtime, counting how often it's asked to train.
pub struct CountingRuntime {
    inner: SoftmaxRegression,
    pub train_calls: AtomicUsize,
}

impl CountingRuntime {
    pub fn new(train_len: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(11);
        let train = Dataset::synthetic_blobs(&mut rng, train_len, 4, 3, 0.8).unwrap();
        let test = Dataset::synthetic_blobs(&mut rng, 90, 4, 3, 0.8).unwrap();

        Self {
            inner: SoftmaxRegression::new(train, test).unwrap(),
            train_calls: AtomicUsize::new(0),
        }
    }

    pub fn train_calls(&self) -> usize {
        self.train_calls.load(Ordering::SeqCst)
    }
}

impl ModelRuntime for CountingRuntime {
    fn initial_parameters(&self) -> Parameters {
        self.inner.initial_parameters()
    }

    fn train(
        &self,
        base: &Parameters,
        samples: &[usize],
        hyper: &Hyperparameters,
    ) -> Result<Parameters, RuntimeErr> {
        self.train_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.train(base, samples, hyper)
    }

    fn evaluate(&self, params: &Parameters) -> Result<f32, RuntimeErr> {
        self.inner.evaluate(params)
    }

    fn train_len(&self) -> usize {
        self.inner.train_len()
    }
}

/// Disjoint, consecutive data units named `u0`, `u1`, ...
pub fn partitions(sizes: &[usize]) -> PartitionTable {
    let mut next = 0;
    sizes
        .iter()
        .enumerate()
        .map(|(i, &len)| {
            let indices = (next..next + len).collect();
            next += len;
            (format!("u{i}"), indices)
        })
        .collect()
}

/// A task spec with millisecond timings.
pub fn spec(dir: &Path, task_id: &str, rounds: u64) -> TaskSpec {
    let mut spec = TaskSpec::new(task_id, "blobs", rounds, dir);
    spec.hyperparameters.learning_rate = 0.5;
    spec.hyperparameters.batch_size = NonZeroUsize::new(16).unwrap();
    spec.hyperparameters.local_epochs = NonZeroUsize::new(1).unwrap();
    spec.timing.poll_ms = 5;
    spec.timing.round_delay_ms = 0;
    spec.timing.retry_backoff_ms = 5;
    spec
}

pub fn runtime(train_len: usize) -> Arc<CountingRuntime> {
    Arc::new(CountingRuntime::new(train_len))
}

/// Polls `f` until it holds or `WAIT` elapses.
pub fn wait_until(f: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < WAIT {
        if f() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    f()
}
