use std::sync::Arc;

use model_runtime::Parameters;
use parking_lot::{Mutex, RwLock};

use crate::{
    CompletionReport, ContributionLedger, MembershipRegistry, SnapshotStore, StatusCell,
    TaskConfig, signal::Latch,
};

/// Invoked once, when a task completes.
pub(crate) type CompletionCallback = Box<dyn FnOnce(CompletionReport) + Send>;

/// The state a task handle shares with its round worker.
pub(crate) struct TaskShared {
    pub config: TaskConfig,
    pub status: Arc<StatusCell>,
    pub membership: MembershipRegistry,
    pub global: RwLock<Arc<Parameters>>,
    pub ledger: Mutex<ContributionLedger>,
    pub history: Mutex<Vec<(u64, f32)>>,
    pub snapshots: SnapshotStore,
    pub on_complete: Mutex<Option<CompletionCallback>>,
    pub stop: Latch,
    pub exited: Latch,
}
