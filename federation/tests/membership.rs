mod common;

use std::{
    sync::{Arc, Barrier},
    thread,
};

use common::{init_logger, partitions, runtime, spec};
use federation::{MembershipErr, NotEligibleReason, ParticipantId, TaskBuilder, TaskHandle};
use model_runtime::ModelRuntime;
use rand::{Rng, SeedableRng, rngs::StdRng};

const PARTICIPANTS: u64 = 8;
const QUORUM: usize = 3;

/// Participants `0..8` own one unit each, `8` is registered without data.
fn task(dir: &std::path::Path) -> TaskHandle {
    let mut spec = spec(dir, "membership", 1);
    spec.quorum_minimum = QUORUM;
    spec.max_active = 6;

    let rt = runtime(800);
    let handle = TaskBuilder::new(spec.validate().unwrap(), rt as Arc<dyn ModelRuntime>)
        .partitions(partitions(&[100; PARTICIPANTS as usize]))
        .build()
        .unwrap();

    for i in 0..PARTICIPANTS {
        handle
            .assign_units(ParticipantId(i), vec![format!("u{i}")])
            .unwrap();
    }
    handle.assign_units(ParticipantId(8), vec![]).unwrap();

    handle
}

fn assert_quorum_invariant(handle: &TaskHandle) {
    let status = handle.status();
    let active = handle.active_participants();

    assert_eq!(status.active_participant_count, active.len());
    assert_eq!(status.is_paused, active.len() < QUORUM);
    assert!(active.len() <= 6);
    assert!(!active.contains(&ParticipantId(8)));
}

#[test]
fn random_joins_and_leaves_keep_the_invariants() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let handle = task(dir.path());
    let mut rng = StdRng::seed_from_u64(5);

    assert_quorum_invariant(&handle);

    for _ in 0..500 {
        let participant = ParticipantId(rng.random_range(0..=PARTICIPANTS));
        let was_active = handle.is_active(participant);

        if rng.random_bool(0.5) {
            match handle.join_task(participant) {
                Ok(()) => assert!(!was_active),
                Err(MembershipErr::NotEligible { reason, .. }) => match reason {
                    NotEligibleReason::AlreadyActive => assert!(was_active),
                    NotEligibleReason::NoDataUnits => assert_eq!(participant, ParticipantId(8)),
                    NotEligibleReason::Unknown => panic!("{participant} is registered"),
                },
                Err(MembershipErr::CapacityReached { .. }) => {
                    assert_eq!(handle.active_participants().len(), 6)
                }
                Err(e) => panic!("unexpected join error: {e}"),
            }
        } else {
            match handle.leave_task(participant) {
                Ok(()) => assert!(was_active),
                Err(MembershipErr::NotActive(p)) => {
                    assert_eq!(p, participant);
                    assert!(!was_active);
                }
                Err(e) => panic!("unexpected leave error: {e}"),
            }
        }

        assert_quorum_invariant(&handle);
    }
}

#[test]
fn repeated_joins_and_leaves_are_idempotent() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let handle = task(dir.path());
    let p = ParticipantId(1);

    handle.join_task(p).unwrap();
    let once = handle.status();
    assert!(handle.join_task(p).is_err());
    assert_eq!(handle.status(), once);
    assert_eq!(handle.active_participants(), vec![p]);

    handle.leave_task(p).unwrap();
    let left = handle.status();
    assert!(handle.leave_task(p).is_err());
    assert_eq!(handle.status(), left);
    assert!(handle.active_participants().is_empty());
}

#[test]
fn unknown_participants_are_rejected() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let handle = task(dir.path());

    assert_eq!(
        handle.join_task(ParticipantId(42)),
        Err(MembershipErr::NotEligible {
            participant: ParticipantId(42),
            reason: NotEligibleReason::Unknown,
        })
    );
    assert!(!handle.status().is_running());
}

#[test]
fn concurrent_joins_and_leaves_keep_the_invariants() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let handle = task(dir.path());
    let barrier = Barrier::new(PARTICIPANTS as usize + 1);

    thread::scope(|s| {
        for seed in 0..PARTICIPANTS {
            let handle = &handle;
            let barrier = &barrier;

            s.spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed);
                barrier.wait();

                for _ in 0..200 {
                    let participant = ParticipantId(rng.random_range(0..=PARTICIPANTS));
                    if rng.random_bool(0.5) {
                        let _ = handle.join_task(participant);
                    } else {
                        let _ = handle.leave_task(participant);
                    }
                }
            });
        }

        // Counts and the pause flag are published together.
        let handle = &handle;
        let barrier = &barrier;
        s.spawn(move || {
            barrier.wait();
            for _ in 0..2000 {
                let status = handle.status();
                assert_eq!(status.is_paused, status.active_participant_count < QUORUM);
                assert!(status.active_participant_count <= 6);
            }
        });
    });

    assert_quorum_invariant(&handle);
}
