//! The coordinator: task inventory, assignment, and fault recovery.
//!
//! State lives behind `Arc<Mutex<..>>` and is cloned into every accepted RPC connection.
//! Each task carries a full state machine (lease-based reassignment, phase tracking,
//! idempotent completion) rather than a bare counter.

use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tarpc::context;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::mr::error::{CoordinatorError, CoordinatorResult};
use crate::mr::task::{Task, TaskKind};
use crate::mr::transport::{self, CompleteAck, CoordinatorService};

/// A task's lease timeout: an IN_PROGRESS task idle past this long is reassigned.
pub const LEASE_TIMEOUT: Duration = Duration::from_secs(10);
/// How often the background monitor scans for expired leases.
pub const MONITOR_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskStatus {
    Idle,
    InProgress,
    Completed,
}

#[derive(Debug, Clone)]
struct TaskInfo {
    task: Task,
    status: TaskStatus,
    worker_id: Option<String>,
    start_time: Option<Instant>,
    #[allow(dead_code)] // retained for observability/debugging, not read by any invariant
    completion_time: Option<Instant>,
}

impl TaskInfo {
    fn new(task: Task) -> Self {
        Self {
            task,
            status: TaskStatus::Idle,
            worker_id: None,
            start_time: None,
            completion_time: None,
        }
    }

    fn reset_to_idle(&mut self) {
        self.status = TaskStatus::Idle;
        self.worker_id = None;
        self.start_time = None;
    }
}

struct JobState {
    map_tasks: BTreeMap<u32, TaskInfo>,
    reduce_tasks: BTreeMap<u32, TaskInfo>,
    map_phase_complete: bool,
    all_tasks_complete: bool,
    active_workers: HashSet<String>,
}

impl JobState {
    /// The phase-qualified task table: map tasks while the map phase is open, otherwise
    /// reduce tasks.
    fn active_phase_tasks(&mut self) -> &mut BTreeMap<u32, TaskInfo> {
        if self.map_phase_complete {
            &mut self.reduce_tasks
        } else {
            &mut self.map_tasks
        }
    }

    fn find_task_info_mut(&mut self, task_id: u32) -> Option<&mut TaskInfo> {
        self.map_tasks
            .get_mut(&task_id)
            .or_else(|| self.reduce_tasks.get_mut(&task_id))
    }

    fn check_phase_completion(&mut self) {
        if !self.map_phase_complete
            && self
                .map_tasks
                .values()
                .all(|info| info.status == TaskStatus::Completed)
        {
            self.map_phase_complete = true;
            info!("map phase complete, reduce phase begins");
        }

        if self.map_phase_complete
            && self
                .reduce_tasks
                .values()
                .all(|info| info.status == TaskStatus::Completed)
        {
            self.all_tasks_complete = true;
            info!("all tasks complete");
        }
    }
}

/// Owns a MapReduce job's task inventory, serves the coordinator RPC methods, and runs the
/// lease-expiry monitor. Cheaply `Clone`-able: internal state lives behind `Arc<Mutex<_>>`
/// so every accepted RPC connection gets its own handle to the same job.
#[derive(Clone)]
pub struct Coordinator {
    state: Arc<Mutex<JobState>>,
    n_reduce: u32,
    info_path: Arc<PathBuf>,
    background: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Coordinator {
    /// Build the task inventory for `files` (one MAP task per file) and `n_reduce` REDUCE
    /// tasks, all IDLE. `info_path` is where `start` will publish `host:port` (parameterized
    /// rather than hardcoded to the CWD, so tests can run in isolation).
    pub fn new(files: &[String], n_reduce: u32, info_path: PathBuf) -> CoordinatorResult<Self> {
        if files.is_empty() {
            return Err(CoordinatorError::Configuration(
                "at least one input file is required".to_string(),
            ));
        }
        if n_reduce == 0 {
            return Err(CoordinatorError::Configuration(
                "n_reduce must be at least 1".to_string(),
            ));
        }

        let n_map = files.len() as u32;
        let mut map_tasks = BTreeMap::new();
        for (i, filename) in files.iter().enumerate() {
            let i = i as u32;
            map_tasks.insert(i, TaskInfo::new(Task::map(i, i, filename.clone(), n_reduce)));
        }

        let mut reduce_tasks = BTreeMap::new();
        for j in 0..n_reduce {
            let input_files = (0..n_map).map(|m| format!("mr-{m}-{j}")).collect();
            let task_id = n_map + j;
            reduce_tasks.insert(
                task_id,
                TaskInfo::new(Task::reduce(
                    task_id,
                    j,
                    input_files,
                    format!("mr-out-{j}"),
                    n_reduce,
                )),
            );
        }

        Ok(Self {
            state: Arc::new(Mutex::new(JobState {
                map_tasks,
                reduce_tasks,
                map_phase_complete: false,
                all_tasks_complete: false,
                active_workers: HashSet::new(),
            })),
            n_reduce,
            info_path: Arc::new(info_path),
            background: Arc::new(Mutex::new(Vec::new())),
        })
    }

    fn state(&self) -> std::sync::MutexGuard<'_, JobState> {
        self.state.lock().expect("coordinator state mutex poisoned")
    }

    /// Bind the RPC server to an ephemeral loopback port, publish the discovery file, and
    /// spawn the lease monitor. Returns the bound address.
    pub async fn start(&self) -> anyhow::Result<SocketAddr> {
        let bind_addr: SocketAddr = "127.0.0.1:0".parse().expect("valid loopback address");
        let (addr, server_handle) = transport::serve(bind_addr, self.clone()).await?;
        transport::write_discovery_file(&self.info_path, addr)?;
        info!(
            "coordinator listening on {addr}, discovery file at {}",
            self.info_path.display()
        );

        let monitor_handle = tokio::spawn(self.clone().monitor_loop());

        let mut background = self.background.lock().expect("background handle mutex poisoned");
        background.push(server_handle);
        background.push(monitor_handle);

        Ok(addr)
    }

    /// Stop serving and best-effort remove the discovery file.
    pub fn stop(&self) {
        for handle in self
            .background
            .lock()
            .expect("background handle mutex poisoned")
            .drain(..)
        {
            handle.abort();
        }
        transport::remove_discovery_file(&self.info_path);
    }

    /// Whether every map and reduce task has completed at least once.
    pub fn done(&self) -> bool {
        self.state().all_tasks_complete
    }

    async fn monitor_loop(self) {
        loop {
            tokio::time::sleep(MONITOR_PERIOD).await;

            let mut state = self.state();
            if state.all_tasks_complete {
                return;
            }

            let now = Instant::now();
            for (task_id, info) in state.active_phase_tasks().iter_mut() {
                if info.status == TaskStatus::InProgress {
                    if let Some(start_time) = info.start_time {
                        if now.duration_since(start_time) > LEASE_TIMEOUT {
                            warn!("task {task_id} lease expired, reassigning");
                            info.reset_to_idle();
                        }
                    }
                }
            }
        }
    }
}

#[tarpc::server]
impl CoordinatorService for Coordinator {
    async fn request_task(self, _: context::Context, worker_id: String) -> Task {
        let mut state = self.state();
        state.active_workers.insert(worker_id.clone());

        if state.all_tasks_complete {
            return Task::exit(self.n_reduce);
        }

        let phase_tasks = state.active_phase_tasks();
        let idle = phase_tasks
            .iter_mut()
            .find(|(_, info)| info.status == TaskStatus::Idle);

        match idle {
            Some((task_id, info)) => {
                info.status = TaskStatus::InProgress;
                info.worker_id = Some(worker_id.clone());
                info.start_time = Some(Instant::now());
                debug!("assigned task {task_id} to worker {worker_id}");
                info.task.clone()
            }
            None => Task::wait(self.n_reduce),
        }
    }

    async fn complete_task(
        self,
        _: context::Context,
        worker_id: String,
        task_id: u32,
        success: bool,
        error_message: String,
    ) -> CompleteAck {
        let mut state = self.state();

        let Some(info) = state.find_task_info_mut(task_id) else {
            warn!("worker {worker_id} reported unknown task {task_id}");
            return CompleteAck { acknowledged: false };
        };

        if success {
            let holds_lease = info.status == TaskStatus::InProgress
                && info.worker_id.as_deref() == Some(worker_id.as_str());
            if holds_lease {
                info.status = TaskStatus::Completed;
                info.completion_time = Some(Instant::now());
                debug!("task {task_id} completed by worker {worker_id}");
                state.check_phase_completion();
            } else {
                debug!(
                    "task {task_id} reported complete by {worker_id} after its lease was revoked; \
                     acknowledging without changing state"
                );
            }
        } else {
            warn!("task {task_id} failed on worker {worker_id}: {error_message}");
            info.reset_to_idle();
        }

        CompleteAck { acknowledged: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("input-{i}.txt")).collect()
    }

    fn new_coordinator(n_files: usize, n_reduce: u32) -> Coordinator {
        Coordinator::new(&files(n_files), n_reduce, PathBuf::from("unused.txt")).unwrap()
    }

    #[test]
    fn construction_rejects_empty_file_list() {
        assert!(Coordinator::new(&[], 1, PathBuf::from("x")).is_err());
    }

    #[test]
    fn construction_rejects_zero_reduce_tasks() {
        assert!(Coordinator::new(&files(1), 0, PathBuf::from("x")).is_err());
    }

    #[tokio::test]
    async fn request_task_never_returns_reduce_before_map_phase_is_done() {
        let coordinator = new_coordinator(2, 2);
        for _ in 0..2 {
            let task = coordinator
                .clone()
                .request_task(context::current(), "w1".to_string())
                .await;
            assert_eq!(task.kind, TaskKind::Map);
        }
        // Map tasks are all in progress now; further requests must WAIT, never jump to reduce.
        let task = coordinator
            .clone()
            .request_task(context::current(), "w2".to_string())
            .await;
        assert_eq!(task.kind, TaskKind::Wait);
    }

    #[tokio::test]
    async fn completing_all_map_tasks_unlocks_reduce_tasks() {
        let coordinator = new_coordinator(2, 2);
        let t0 = coordinator
            .clone()
            .request_task(context::current(), "w1".to_string())
            .await;
        let t1 = coordinator
            .clone()
            .request_task(context::current(), "w1".to_string())
            .await;

        coordinator
            .clone()
            .complete_task(context::current(), "w1".to_string(), t0.task_id, true, String::new())
            .await;
        coordinator
            .clone()
            .complete_task(context::current(), "w1".to_string(), t1.task_id, true, String::new())
            .await;

        let reduce_task = coordinator
            .clone()
            .request_task(context::current(), "w1".to_string())
            .await;
        assert_eq!(reduce_task.kind, TaskKind::Reduce);
    }

    #[tokio::test]
    async fn done_becomes_true_only_after_every_task_completes() {
        let coordinator = new_coordinator(1, 1);
        assert!(!coordinator.done());

        let map_task = coordinator
            .clone()
            .request_task(context::current(), "w1".to_string())
            .await;
        coordinator
            .clone()
            .complete_task(context::current(), "w1".to_string(), map_task.task_id, true, String::new())
            .await;
        assert!(!coordinator.done());

        let reduce_task = coordinator
            .clone()
            .request_task(context::current(), "w1".to_string())
            .await;
        coordinator
            .clone()
            .complete_task(
                context::current(),
                "w1".to_string(),
                reduce_task.task_id,
                true,
                String::new(),
            )
            .await;
        assert!(coordinator.done());
    }

    #[tokio::test]
    async fn failed_task_is_reassigned_to_the_next_requester() {
        let coordinator = new_coordinator(1, 1);
        let task = coordinator
            .clone()
            .request_task(context::current(), "w1".to_string())
            .await;
        coordinator
            .clone()
            .complete_task(
                context::current(),
                "w1".to_string(),
                task.task_id,
                false,
                "boom".to_string(),
            )
            .await;

        let reassigned = coordinator
            .clone()
            .request_task(context::current(), "w2".to_string())
            .await;
        assert_eq!(reassigned.task_id, task.task_id);
        assert_eq!(reassigned.kind, TaskKind::Map);
    }

    #[tokio::test]
    async fn late_completion_from_a_superseded_worker_is_acknowledged_but_inert() {
        let coordinator = new_coordinator(1, 1);
        let task = coordinator
            .clone()
            .request_task(context::current(), "w1".to_string())
            .await;

        // Simulate the monitor revoking w1's lease and w2 picking the task back up.
        {
            let mut state = coordinator.state();
            state
                .map_tasks
                .get_mut(&task.task_id)
                .unwrap()
                .reset_to_idle();
        }
        let reassigned = coordinator
            .clone()
            .request_task(context::current(), "w2".to_string())
            .await;
        assert_eq!(reassigned.task_id, task.task_id);

        // w1's late success must not flip status away from w2's in-progress lease.
        let ack = coordinator
            .clone()
            .complete_task(context::current(), "w1".to_string(), task.task_id, true, String::new())
            .await;
        assert!(ack.acknowledged);

        let status_after = {
            let mut state = coordinator.state();
            state.find_task_info_mut(task.task_id).unwrap().status
        };
        assert_eq!(status_after, TaskStatus::InProgress);
    }

    #[tokio::test]
    async fn unknown_task_id_is_not_acknowledged() {
        let coordinator = new_coordinator(1, 1);
        let ack = coordinator
            .clone()
            .complete_task(context::current(), "w1".to_string(), 999, true, String::new())
            .await;
        assert!(!ack.acknowledged);
    }
}
