use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use log::{info, warn};
use parking_lot::Mutex;

use super::{MembershipErr, NotEligibleReason, error::Result};
use crate::{InitErr, ParticipantId, PartitionTable, StatusCell, TaskState, UnitId};

/// The participants of a round, captured under the membership lock, each with its training
/// sample indices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Roster {
    members: Vec<(ParticipantId, Arc<[usize]>)>,
}

impl Roster {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Returns the participants in ascending id order.
    pub fn participants(&self) -> impl Iterator<Item = ParticipantId> + '_ {
        self.members.iter().map(|(p, _)| *p)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ParticipantId, &[usize])> + '_ {
        self.members.iter().map(|(p, s)| (*p, &**s))
    }
}

#[derive(Debug, Default)]
struct Membership {
    units: BTreeMap<ParticipantId, Vec<UnitId>>,
    active: BTreeSet<ParticipantId>,
    index: BTreeMap<ParticipantId, Arc<[usize]>>,
}

/// Tracks which participants exist, which are active, and the training samples of the active
/// ones.
///
/// Every operation runs under a single per task lock, and the pause flag of the task status is
/// recomputed before that lock is released.
#[derive(Debug)]
pub struct MembershipRegistry {
    task_id: String,
    state: Mutex<Membership>,
    partitions: PartitionTable,
    placeholder: Arc<[usize]>,
    quorum_minimum: usize,
    max_active: usize,
    status: Arc<StatusCell>,
}

impl MembershipRegistry {
    /// Creates a new `MembershipRegistry` without participants.
    ///
    /// # Arguments
    /// * `task_id` - The owning task, for logging.
    /// * `partitions` - The data units participants can be assigned.
    /// * `placeholder_len` - The length of the sample range used when a participant's units hold
    ///   no samples.
    /// * `quorum_minimum` - The minimum amount of active participants to train.
    /// * `max_active` - The maximum amount of active participants.
    /// * `status` - The task status cell to keep in sync.
    pub fn new(
        task_id: impl Into<String>,
        partitions: PartitionTable,
        placeholder_len: usize,
        quorum_minimum: usize,
        max_active: usize,
        status: Arc<StatusCell>,
    ) -> Self {
        let registry = Self {
            task_id: task_id.into(),
            state: Mutex::new(Membership::default()),
            partitions,
            placeholder: (0..placeholder_len).collect(),
            quorum_minimum,
            max_active,
            status,
        };

        registry.publish(&registry.state.lock());
        registry
    }

    /// Assigns data units to a participant, registering it if it's new.
    ///
    /// The previous assignment is replaced. An active participant left without units is moved
    /// back to the pool.
    ///
    /// # Arguments
    /// * `participant` - The participant.
    /// * `units` - The ids of its data units, in the order their samples are concatenated.
    ///
    /// # Returns
    /// `InitErr::UnknownDataUnit` if a unit is not in the partition table, in which case
    /// nothing is assigned.
    pub fn assign(
        &self,
        participant: ParticipantId,
        units: Vec<UnitId>,
    ) -> std::result::Result<(), InitErr> {
        if let Some(unit) = units.iter().find(|u| !self.partitions.contains(u)) {
            return Err(InitErr::UnknownDataUnit {
                participant,
                unit: unit.clone(),
            });
        }

        let mut state = self.state.lock();

        if units.is_empty() && state.active.remove(&participant) {
            warn!(task_id = self.task_id.as_str(), participant = participant.0; "participant lost its data units, moved back to the pool");
        }

        state.units.insert(participant, units);
        self.rebuild_index(&mut state);
        self.publish(&state);
        Ok(())
    }

    /// Moves a participant from the pool into the active set.
    ///
    /// # Arguments
    /// * `participant` - The participant joining.
    ///
    /// # Returns
    /// `NotEligible` if it's unknown, has no data units or is already active, and
    /// `CapacityReached` if the active set is full.
    pub fn add(&self, participant: ParticipantId) -> Result<()> {
        let mut state = self.state.lock();

        let not_eligible = |reason| MembershipErr::NotEligible {
            participant,
            reason,
        };

        match state.units.get(&participant) {
            None => return Err(not_eligible(NotEligibleReason::Unknown)),
            Some(units) if units.is_empty() => {
                return Err(not_eligible(NotEligibleReason::NoDataUnits));
            }
            Some(_) => {}
        }

        if state.active.contains(&participant) {
            return Err(not_eligible(NotEligibleReason::AlreadyActive));
        }

        if state.active.len() >= self.max_active {
            return Err(MembershipErr::CapacityReached {
                participant,
                max_active: self.max_active,
            });
        }

        state.active.insert(participant);
        self.rebuild_index(&mut state);
        self.publish(&state);

        info!(task_id = self.task_id.as_str(), participant = participant.0, active = state.active.len(); "participant joined");
        Ok(())
    }

    /// Moves a participant from the active set back into the pool.
    ///
    /// # Arguments
    /// * `participant` - The participant leaving.
    ///
    /// # Returns
    /// `NotActive` if the participant is not active.
    pub fn remove(&self, participant: ParticipantId) -> Result<()> {
        let mut state = self.state.lock();

        if !state.active.remove(&participant) {
            return Err(MembershipErr::NotActive(participant));
        }

        self.rebuild_index(&mut state);
        self.publish(&state);

        info!(task_id = self.task_id.as_str(), participant = participant.0, active = state.active.len(); "participant left");
        Ok(())
    }

    /// Captures the participants of the next round.
    ///
    /// # Returns
    /// The roster, or `None` if the active set is below quorum.
    pub fn roster(&self) -> Option<Roster> {
        let state = self.state.lock();
        self.publish(&state);

        if state.active.len() < self.quorum_minimum {
            return None;
        }

        let members = state
            .index
            .iter()
            .map(|(p, samples)| (*p, Arc::clone(samples)))
            .collect();

        Some(Roster { members })
    }

    pub fn is_active(&self, participant: ParticipantId) -> bool {
        self.state.lock().active.contains(&participant)
    }

    pub fn active_participants(&self) -> Vec<ParticipantId> {
        self.state.lock().active.iter().copied().collect()
    }

    /// Returns the training samples of an active participant.
    pub fn samples(&self, participant: ParticipantId) -> Option<Arc<[usize]>> {
        self.state.lock().index.get(&participant).cloned()
    }

    /// Rebuilds the training data index of the active set.
    fn rebuild_index(&self, state: &mut Membership) {
        let index = state
            .active
            .iter()
            .map(|p| {
                let units = state.units.get(p).map(Vec::as_slice).unwrap_or_default();
                (*p, self.concat_samples(*p, units))
            })
            .collect();

        state.index = index;
    }

    /// Concatenates the sample indices of the given units, in order.
    fn concat_samples(&self, participant: ParticipantId, units: &[UnitId]) -> Arc<[usize]> {
        let mut samples = Vec::new();

        for unit in units {
            match self.partitions.indices(unit) {
                Some(indices) => samples.extend_from_slice(indices),
                None => {
                    warn!(task_id = self.task_id.as_str(), participant = participant.0, unit = unit.as_str(); "data unit missing from the partition table, skipped");
                }
            }
        }

        if samples.is_empty() {
            warn!(task_id = self.task_id.as_str(), participant = participant.0, placeholder = self.placeholder.len(); "participant has no samples, using the placeholder range");
            return Arc::clone(&self.placeholder);
        }

        samples.into()
    }

    /// Writes the membership counts into the status cell and recomputes the pause flag.
    fn publish(&self, state: &Membership) {
        let active = state.active.len();
        let registered = state.units.len();
        let available = state
            .units
            .iter()
            .filter(|(p, units)| !units.is_empty() && !state.active.contains(p))
            .count();

        let (before, after) = self.status.update(|s| {
            let before = s.state;
            s.active_participant_count = active;
            s.available_participant_count = available;
            s.registered_participant_count = registered;
            s.apply_quorum(self.quorum_minimum);
            (before, s.state)
        });

        match (before, after) {
            (TaskState::Running, TaskState::Paused) => {
                info!(task_id = self.task_id.as_str(), active = active; "below quorum, task paused");
            }
            (TaskState::Paused, TaskState::Running) => {
                info!(task_id = self.task_id.as_str(), active = active; "quorum restored, task resumed");
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(quorum: usize, max_active: usize) -> (MembershipRegistry, Arc<StatusCell>) {
        let partitions: PartitionTable = [
            ("u1", vec![0, 1, 2]),
            ("u2", vec![3, 4]),
            ("u3", vec![5]),
            ("empty", vec![]),
        ]
        .into_iter()
        .collect();

        let status = Arc::new(StatusCell::default());
        let registry =
            MembershipRegistry::new("t", partitions, 4, quorum, max_active, Arc::clone(&status));
        (registry, status)
    }

    fn p(id: u64) -> ParticipantId {
        ParticipantId(id)
    }

    #[test]
    fn join_is_idempotent_with_not_eligible() {
        let (registry, _) = registry(2, 10);
        registry.assign(p(1), vec!["u1".into()]).unwrap();

        assert_eq!(registry.add(p(1)), Ok(()));
        assert_eq!(
            registry.add(p(1)),
            Err(MembershipErr::NotEligible {
                participant: p(1),
                reason: NotEligibleReason::AlreadyActive
            })
        );
    }

    #[test]
    fn leave_is_idempotent_with_not_active() {
        let (registry, _) = registry(2, 10);
        registry.assign(p(1), vec!["u1".into()]).unwrap();
        registry.add(p(1)).unwrap();

        assert_eq!(registry.remove(p(1)), Ok(()));
        assert_eq!(registry.remove(p(1)), Err(MembershipErr::NotActive(p(1))));
    }

    #[test]
    fn participants_without_units_are_not_eligible() {
        let (registry, _) = registry(2, 10);
        registry.assign(p(2), vec![]).unwrap();

        assert_eq!(
            registry.add(p(2)),
            Err(MembershipErr::NotEligible {
                participant: p(2),
                reason: NotEligibleReason::NoDataUnits
            })
        );
        assert_eq!(
            registry.add(p(3)),
            Err(MembershipErr::NotEligible {
                participant: p(3),
                reason: NotEligibleReason::Unknown
            })
        );
    }

    #[test]
    fn unknown_units_are_rejected() {
        let (registry, status) = registry(2, 10);

        let res = registry.assign(p(1), vec!["u1".into(), "nope".into()]);
        assert!(matches!(
            res,
            Err(InitErr::UnknownDataUnit { participant, ref unit }) if participant == p(1) && unit == "nope"
        ));
        assert_eq!(status.snapshot().registered_participant_count, 0);
    }

    #[test]
    fn capacity_is_enforced() {
        let (registry, _) = registry(2, 2);
        for id in 1..=3 {
            registry.assign(p(id), vec!["u1".into()]).unwrap();
        }

        registry.add(p(1)).unwrap();
        registry.add(p(2)).unwrap();
        assert_eq!(
            registry.add(p(3)),
            Err(MembershipErr::CapacityReached {
                participant: p(3),
                max_active: 2
            })
        );
    }

    #[test]
    fn samples_concatenate_in_unit_order() {
        let (registry, _) = registry(2, 10);
        registry
            .assign(p(1), vec!["u3".into(), "u1".into()])
            .unwrap();
        registry.add(p(1)).unwrap();

        assert_eq!(registry.samples(p(1)).unwrap().as_ref(), &[5, 0, 1, 2]);
    }

    #[test]
    fn empty_units_fall_back_to_placeholder() {
        let (registry, _) = registry(2, 10);
        registry.assign(p(1), vec!["empty".into()]).unwrap();
        registry.add(p(1)).unwrap();

        assert_eq!(registry.samples(p(1)).unwrap().as_ref(), &[0, 1, 2, 3]);
    }

    #[test]
    fn reassigning_rebuilds_the_index() {
        let (registry, _) = registry(2, 10);
        registry.assign(p(1), vec!["u1".into()]).unwrap();
        registry.add(p(1)).unwrap();

        registry.assign(p(1), vec!["u2".into()]).unwrap();
        assert_eq!(registry.samples(p(1)).unwrap().as_ref(), &[3, 4]);
    }

    #[test]
    fn clearing_units_deactivates() {
        let (registry, status) = registry(2, 10);
        registry.assign(p(1), vec!["u1".into()]).unwrap();
        registry.add(p(1)).unwrap();

        registry.assign(p(1), vec![]).unwrap();
        assert!(!registry.is_active(p(1)));
        assert_eq!(status.snapshot().active_participant_count, 0);
        assert_eq!(status.snapshot().available_participant_count, 0);
    }

    #[test]
    fn pause_flag_follows_quorum_synchronously() {
        let (registry, status) = registry(2, 10);
        status.update(|s| s.state = TaskState::Running);
        for id in 1..=2 {
            registry.assign(p(id), vec!["u1".into()]).unwrap();
        }
        assert!(status.snapshot().is_paused);

        registry.add(p(1)).unwrap();
        assert!(status.snapshot().is_paused);
        assert_eq!(status.snapshot().state, TaskState::Paused);

        registry.add(p(2)).unwrap();
        let snapshot = status.snapshot();
        assert!(!snapshot.is_paused);
        assert_eq!(snapshot.state, TaskState::Running);
        assert_eq!(snapshot.active_participant_count, 2);
        assert_eq!(snapshot.available_participant_count, 0);

        registry.remove(p(2)).unwrap();
        let snapshot = status.snapshot();
        assert!(snapshot.is_paused);
        assert_eq!(snapshot.available_participant_count, 1);
    }

    #[test]
    fn roster_requires_quorum() {
        let (registry, _) = registry(2, 10);
        registry.assign(p(1), vec!["u1".into()]).unwrap();
        registry.assign(p(2), vec!["u2".into()]).unwrap();
        registry.add(p(2)).unwrap();
        assert_eq!(registry.roster(), None);

        registry.add(p(1)).unwrap();
        let roster = registry.roster().unwrap();
        let members: Vec<_> = roster.iter().collect();
        assert_eq!(members, [(p(1), &[0, 1, 2][..]), (p(2), &[3, 4][..])]);
    }
}
