use std::{borrow::Cow, collections::HashMap, fs, io, path::PathBuf};

use log::info;
use model_runtime::{Parameters, Tensor};
use ndarray::{ArrayD, IxDyn};
use safetensors::{Dtype, SafeTensors, View, tensor::TensorView};

use super::{PersistenceErr, error::Result, write_atomic};

const ROUND_KEY: &str = "round";
const TASK_ID_KEY: &str = "task_id";
const TASK_NAME_KEY: &str = "task_name";

/// A persisted global model and the round that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub round: u64,
    pub params: Parameters,
}

/// A tensor already laid out as safetensors bytes.
struct Encoded {
    dtype: Dtype,
    shape: Vec<usize>,
    bytes: Vec<u8>,
}

impl Encoded {
    fn new(tensor: &Tensor) -> Self {
        match tensor {
            Tensor::Float(a) => {
                let values: Vec<f32> = a.iter().copied().collect();
                Self {
                    dtype: Dtype::F32,
                    shape: a.shape().to_vec(),
                    bytes: bytemuck::cast_slice(&values).to_vec(),
                }
            }
            Tensor::Count(a) => {
                let values: Vec<i64> = a.iter().copied().collect();
                Self {
                    dtype: Dtype::I64,
                    shape: a.shape().to_vec(),
                    bytes: bytemuck::cast_slice(&values).to_vec(),
                }
            }
        }
    }
}

impl View for Encoded {
    fn dtype(&self) -> Dtype {
        self.dtype
    }

    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn data(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(&self.bytes)
    }

    fn data_len(&self) -> usize {
        self.bytes.len()
    }
}

/// Stores the single, periodically overwritten global model snapshot of a task.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
    task_id: String,
    task_name: String,
}

impl SnapshotStore {
    pub const FILE_NAME: &'static str = "global_model.safetensors";

    /// Creates a new `SnapshotStore`.
    ///
    /// # Arguments
    /// * `dir` - The task directory the snapshot lives in.
    /// * `task_id` - The task id, stored as metadata.
    /// * `task_name` - The task name, stored as metadata.
    pub fn new(
        dir: impl Into<PathBuf>,
        task_id: impl Into<String>,
        task_name: impl Into<String>,
    ) -> Self {
        Self {
            path: dir.into().join(Self::FILE_NAME),
            task_id: task_id.into(),
            task_name: task_name.into(),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Overwrites the persisted snapshot.
    ///
    /// # Arguments
    /// * `round` - The round that produced `params`.
    /// * `params` - The global model.
    pub fn save(&self, round: u64, params: &Parameters) -> Result<()> {
        let metadata = HashMap::from([
            (ROUND_KEY.to_string(), round.to_string()),
            (TASK_ID_KEY.to_string(), self.task_id.clone()),
            (TASK_NAME_KEY.to_string(), self.task_name.clone()),
        ]);

        let tensors = params.iter().map(|(name, t)| (name.as_str(), Encoded::new(t)));
        let bytes = safetensors::serialize(tensors, &Some(metadata))?;
        write_atomic(&self.path, &bytes)?;

        info!(task_id = self.task_id.as_str(), round = round, path:? = self.path; "global model snapshot persisted");
        Ok(())
    }

    /// Loads the persisted snapshot.
    ///
    /// # Returns
    /// `None` if nothing was persisted yet.
    pub fn load(&self) -> Result<Option<Snapshot>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let (_, metadata) = SafeTensors::read_metadata(&bytes)?;
        let round = metadata
            .metadata()
            .as_ref()
            .and_then(|m| m.get(ROUND_KEY))
            .and_then(|r| r.parse().ok())
            .ok_or_else(|| PersistenceErr::Corrupt("snapshot has no round metadata".into()))?;

        let tensors = SafeTensors::deserialize(&bytes)?;
        let params = tensors
            .tensors()
            .into_iter()
            .map(|(name, view)| -> Result<(String, Tensor)> { Ok((name, decode(&view)?)) })
            .collect::<Result<Parameters>>()?;

        Ok(Some(Snapshot { round, params }))
    }
}

fn decode(view: &TensorView<'_>) -> Result<Tensor> {
    let shape = IxDyn(view.shape());
    let data = view.data();

    let corrupt = |e: ndarray::ShapeError| PersistenceErr::Corrupt(e.to_string());

    match view.dtype() {
        Dtype::F32 => {
            let values = data.chunks_exact(4).map(bytemuck::pod_read_unaligned).collect();
            Ok(Tensor::Float(ArrayD::from_shape_vec(shape, values).map_err(corrupt)?))
        }
        Dtype::I64 => {
            let values = data.chunks_exact(8).map(bytemuck::pod_read_unaligned).collect();
            Ok(Tensor::Count(ArrayD::from_shape_vec(shape, values).map_err(corrupt)?))
        }
        other => Err(PersistenceErr::Corrupt(format!(
            "unsupported tensor dtype {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use ndarray::arr2;

    use super::*;

    fn params() -> Parameters {
        let mut params = Parameters::new();
        params.insert(
            "weight",
            Tensor::Float(arr2(&[[1.0, -2.5], [0.0, 3.25]]).into_dyn()),
        );
        params.insert("steps_tracked", Tensor::scalar_count(42));
        params
    }

    #[test]
    fn nothing_persisted_yet() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path(), "t", "task");
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn latest_snapshot_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("t"), "t", "task");

        store.save(100, &Parameters::new()).unwrap();
        store.save(200, &params()).unwrap();

        let snapshot = store.load().unwrap().unwrap();
        assert_eq!(snapshot.round, 200);
        assert_eq!(snapshot.params, params());
    }

    #[test]
    fn metadata_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path(), "t7", "digits");
        store.save(3, &params()).unwrap();

        let bytes = fs::read(store.path()).unwrap();
        let (_, metadata) = SafeTensors::read_metadata(&bytes).unwrap();
        let metadata = metadata.metadata().clone().unwrap();
        assert_eq!(metadata[ROUND_KEY], "3");
        assert_eq!(metadata[TASK_ID_KEY], "t7");
        assert_eq!(metadata[TASK_NAME_KEY], "digits");
    }

    #[test]
    fn garbage_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path(), "t", "task");
        fs::write(store.path(), b"definitely not safetensors").unwrap();
        assert!(store.load().is_err());
    }
}
