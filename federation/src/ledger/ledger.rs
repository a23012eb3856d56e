use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

use super::{LedgerErr, error::Result};
use crate::{Contributions, PersistenceErr, attribution, storage};

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// The contributions of a single round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub timestamp: u64,
    pub contributions: Contributions,
}

/// The persisted form of a task's ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerDocument {
    pub task_id: String,
    pub created_at: u64,
    pub round_records: BTreeMap<u64, RoundRecord>,
    pub totals: Contributions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributionSummary {
    pub total_rounds: usize,
    pub total_participants: usize,
    pub totals: Contributions,
}

/// Append-only per round contribution records plus a running total per participant.
#[derive(Debug, Clone)]
pub struct ContributionLedger {
    doc: LedgerDocument,
    path: Option<PathBuf>,
}

impl ContributionLedger {
    pub const FILE_NAME: &'static str = "contributions.json";

    /// Creates an empty, in memory only, ledger.
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            doc: LedgerDocument {
                task_id: task_id.into(),
                created_at: unix_now(),
                round_records: BTreeMap::new(),
                totals: Contributions::new(),
            },
            path: None,
        }
    }

    /// Opens the ledger persisted under `dir`, creating it if there is none.
    ///
    /// # Arguments
    /// * `dir` - The task directory.
    /// * `task_id` - The id of the task the ledger belongs to.
    ///
    /// # Returns
    /// The ledger, or an error if the existing document can't be read or belongs to another
    /// task.
    pub fn open(dir: &Path, task_id: &str) -> Result<Self> {
        let path = dir.join(Self::FILE_NAME);

        let ledger = match storage::read_json::<LedgerDocument>(&path)? {
            Some(doc) if doc.task_id != task_id => {
                return Err(PersistenceErr::Corrupt(format!(
                    "{} belongs to task {:?}",
                    path.display(),
                    doc.task_id
                ))
                .into());
            }
            Some(doc) => Self {
                doc,
                path: Some(path),
            },
            None => {
                let mut ledger = Self::new(task_id);
                ledger.path = Some(path);
                ledger.flush()?;
                ledger
            }
        };

        Ok(ledger)
    }

    /// Appends the record of a round and adds its values into the running totals.
    ///
    /// # Arguments
    /// * `round` - The round number.
    /// * `contributions` - The contribution of every participant of the round.
    ///
    /// # Returns
    /// `DuplicateRound` if the round was already recorded, in which case nothing changes.
    pub fn record_round(&mut self, round: u64, contributions: Contributions) -> Result<()> {
        if self.doc.round_records.contains_key(&round) {
            return Err(LedgerErr::DuplicateRound(round));
        }

        for (participant, value) in &contributions {
            *self.doc.totals.entry(*participant).or_default() += value;
        }

        self.doc.round_records.insert(
            round,
            RoundRecord {
                timestamp: unix_now(),
                contributions,
            },
        );

        Ok(())
    }

    /// Writes the whole document over the persisted one, if this ledger is persisted.
    pub fn flush(&self) -> Result<()> {
        if let Some(path) = &self.path {
            storage::write_json(path, &self.doc)?;
        }

        Ok(())
    }

    pub fn record(&self, round: u64) -> Option<&RoundRecord> {
        self.doc.round_records.get(&round)
    }

    pub fn last_round(&self) -> Option<u64> {
        self.doc.round_records.keys().next_back().copied()
    }

    pub fn totals(&self) -> &Contributions {
        &self.doc.totals
    }

    pub fn document(&self) -> &LedgerDocument {
        &self.doc
    }

    /// Derives every recorded participant's share of the accumulated contributions.
    ///
    /// Every participant that appears in a round record is kept, one whose total is exactly zero
    /// gets a ratio of zero so the distribution still lists everyone who trained.
    ///
    /// # Returns
    /// `total / grand total` per participant, or the uniform split over recorded participants
    /// if the grand total is not positive.
    pub fn final_ratios(&self) -> Contributions {
        let grand: f64 = self.doc.totals.values().sum();

        if !(grand > 0.0) {
            return attribution::uniform(self.doc.totals.keys().copied());
        }

        self.doc
            .totals
            .iter()
            .map(|(p, total)| (*p, total / grand))
            .collect()
    }

    pub fn summary(&self) -> ContributionSummary {
        ContributionSummary {
            total_rounds: self.doc.round_records.len(),
            total_participants: self.doc.totals.len(),
            totals: self.doc.totals.clone(),
        }
    }
}
