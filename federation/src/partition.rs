use std::{collections::BTreeMap, fs, io, path::Path};

use serde::{Deserialize, Serialize};

use crate::{InitErr, UnitId};

/// The data partition source: which training samples make up every data unit.
///
/// Units are immutable once loaded, the table is only ever read by the membership registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartitionTable {
    indices_per_participant: BTreeMap<UnitId, Vec<usize>>,
}

impl PartitionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a partition table from a json document.
    ///
    /// # Arguments
    /// * `path` - The path of the document.
    ///
    /// # Returns
    /// The table, `InitErr::MissingPartitions` if there is no such document or another `InitErr`
    /// if it can't be read or parsed.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, InitErr> {
        let path = path.as_ref();

        let raw = fs::read_to_string(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => InitErr::MissingPartitions(path.to_path_buf()),
            _ => InitErr::Io(e),
        })?;

        Ok(serde_json::from_str(&raw)?)
    }

    /// Adds a data unit, replacing any previous unit with the same id.
    ///
    /// # Arguments
    /// * `unit` - The id of the unit.
    /// * `indices` - The training sample indices the unit holds.
    pub fn insert(&mut self, unit: impl Into<UnitId>, indices: Vec<usize>) {
        self.indices_per_participant.insert(unit.into(), indices);
    }

    pub fn contains(&self, unit: &str) -> bool {
        self.indices_per_participant.contains_key(unit)
    }

    pub fn indices(&self, unit: &str) -> Option<&[usize]> {
        self.indices_per_participant.get(unit).map(Vec::as_slice)
    }

    /// Finds the first sample index that doesn't address one of `len` training samples.
    ///
    /// # Returns
    /// The offending unit and index, or `None` if every unit fits.
    pub fn first_out_of_range(&self, len: usize) -> Option<(&UnitId, usize)> {
        self.indices_per_participant
            .iter()
            .find_map(|(unit, indices)| indices.iter().find(|&&i| i >= len).map(|&i| (unit, i)))
    }

    pub fn len(&self) -> usize {
        self.indices_per_participant.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices_per_participant.is_empty()
    }
}

impl<U: Into<UnitId>> FromIterator<(U, Vec<usize>)> for PartitionTable {
    fn from_iter<I: IntoIterator<Item = (U, Vec<usize>)>>(iter: I) -> Self {
        Self {
            indices_per_participant: iter.into_iter().map(|(u, i)| (u.into(), i)).collect(),
        }
    }
}
