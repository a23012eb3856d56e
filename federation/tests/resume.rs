mod common;

use std::{fs, sync::Arc};

use common::{CountingRuntime, WAIT, init_logger, partitions, runtime, spec, wait_until};
use federation::{
    InitErr, LedgerDocument, ParticipantId, PersistenceErr, SnapshotStore, StopOutcome,
    TaskBuilder, TaskHandle, TaskSpec, TaskState,
};
use model_runtime::{ModelRuntime, Parameters, Tensor};

const TASK_ID: &str = "resumable";

fn build(spec: TaskSpec, rt: &Arc<CountingRuntime>) -> Result<TaskHandle, InitErr> {
    let handle = TaskBuilder::new(
        spec.validate().unwrap(),
        Arc::clone(rt) as Arc<dyn ModelRuntime>,
    )
    .partitions(partitions(&[100, 100]))
    .build()?;

    for i in 0..2 {
        handle
            .assign_units(ParticipantId(i), vec![format!("u{i}")])
            .unwrap();
        handle.join_task(ParticipantId(i)).unwrap();
    }

    Ok(handle)
}

fn run_to_completion(handle: &mut TaskHandle) {
    handle.start().unwrap();
    assert!(wait_until(|| handle.status().state == TaskState::Completed));
    assert_eq!(handle.stop(WAIT), StopOutcome::Stopped);
}

#[test]
fn resumes_after_the_last_committed_round() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let rt = runtime(200);

    let mut first_spec = spec(dir.path(), TASK_ID, 2);
    first_spec.snapshot_every = 1;

    let mut first = build(first_spec, &rt).unwrap();
    run_to_completion(&mut first);
    let trained = first.global_parameters();
    let first_summary = first.contribution_summary();
    drop(first);

    let task_dir = dir.path().join(TASK_ID);
    let raw = fs::read_to_string(task_dir.join("contributions.json")).unwrap();
    let doc: LedgerDocument = serde_json::from_str(&raw).unwrap();
    assert_eq!(doc.task_id, TASK_ID);
    assert_eq!(doc.round_records.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
    assert!(task_dir.join(SnapshotStore::FILE_NAME).exists());

    let mut second_spec = spec(dir.path(), TASK_ID, 4);
    second_spec.snapshot_every = 1;
    let mut second = build(second_spec, &rt).unwrap();

    assert_eq!(second.status().current_round, 3);
    let resumed = second.contribution_summary();
    assert_eq!(resumed.total_rounds, first_summary.total_rounds);
    for (participant, total) in &first_summary.totals {
        assert!((resumed.totals[participant] - total).abs() < 1e-12);
    }
    assert_eq!(*second.global_parameters(), *trained);

    run_to_completion(&mut second);
    let summary = second.contribution_summary();
    assert_eq!(summary.total_rounds, 4);
    assert_eq!(second.status().current_round, 5);

    // Only the resumed rounds are in this handle's history.
    let rounds: Vec<u64> = second.accuracy_history().iter().map(|(r, _)| *r).collect();
    assert_eq!(rounds, vec![3, 4]);
}

#[test]
fn snapshots_follow_the_cadence_and_the_final_round() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let rt = runtime(200);
    let store = SnapshotStore::new(dir.path().join(TASK_ID), TASK_ID, "blobs");

    let mut spec = spec(dir.path(), TASK_ID, 5);
    spec.snapshot_every = 2;
    spec.timing.round_delay_ms = 300;
    let mut handle = build(spec, &rt).unwrap();

    handle.start().unwrap();
    assert!(wait_until(|| handle.status().current_round >= 4));
    assert_eq!(handle.stop(WAIT), StopOutcome::Stopped);

    // Round 3 is committed but only round 2 was persisted.
    assert_eq!(handle.status().current_round, 4);
    assert_eq!(store.load().unwrap().unwrap().round, 2);

    run_to_completion(&mut handle);
    let snapshot = store.load().unwrap().unwrap();
    assert_eq!(snapshot.round, 5);
    assert_eq!(snapshot.params, *handle.global_parameters());
}

#[test]
fn completed_tasks_complete_again_without_training() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let rt = runtime(200);

    let mut first = build(spec(dir.path(), TASK_ID, 1), &rt).unwrap();
    run_to_completion(&mut first);
    drop(first);
    let calls = rt.train_calls();

    let mut again = build(spec(dir.path(), TASK_ID, 1), &rt).unwrap();
    run_to_completion(&mut again);

    assert_eq!(rt.train_calls(), calls);
    assert_eq!(again.contribution_summary().total_rounds, 1);
}

#[test]
fn foreign_snapshots_are_rejected() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let rt = runtime(200);

    let mut foreign = Parameters::new();
    foreign.insert("kernel", Tensor::scalar_count(7));
    SnapshotStore::new(dir.path().join(TASK_ID), TASK_ID, "foreign")
        .save(3, &foreign)
        .unwrap();

    let res = build(spec(dir.path(), TASK_ID, 1), &rt);
    assert!(matches!(
        res,
        Err(InitErr::Persistence(PersistenceErr::Corrupt(_)))
    ));
}

#[test]
fn ledgers_of_other_tasks_are_rejected() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let rt = runtime(200);

    let task_dir = dir.path().join(TASK_ID);
    fs::create_dir_all(&task_dir).unwrap();
    fs::write(
        task_dir.join("contributions.json"),
        r#"{"task_id": "someone-else", "created_at": 0, "round_records": {}, "totals": {}}"#,
    )
    .unwrap();

    let res = build(spec(dir.path(), TASK_ID, 1), &rt);
    assert!(matches!(res, Err(InitErr::Persistence(_))));
}
