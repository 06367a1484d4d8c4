//! The worker: task execution loop with atomic intermediate/output file production.
//!
//! A single worker process polls for MAP/REDUCE/WAIT/EXIT tasks, executes them with async
//! file I/O via `tokio::fs`, and writes every intermediate and output file through a
//! temp-file-then-rename so a crash mid-write never leaves a torn file in place.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::mr::error::{TaskError, TaskResult, WorkerResult};
use crate::mr::function::MapReduceApp;
use crate::mr::hash::partition_for_key;
use crate::mr::task::{group_by_key, sort_key_values, KeyValue, Task, TaskKind};
use crate::mr::transport;

/// How long a worker sleeps after a WAIT reply before asking again.
const WAIT_SLEEP: Duration = Duration::from_secs(1);

/// A single worker process: requests tasks from the coordinator, executes them with the
/// supplied [`MapReduceApp`], and reports outcomes back.
pub struct Worker {
    worker_id: String,
    coordinator_addr: SocketAddr,
    app: Arc<dyn MapReduceApp>,
}

impl Worker {
    pub fn new(coordinator_addr: SocketAddr, app: Arc<dyn MapReduceApp>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), coordinator_addr, app)
    }

    /// Build a worker with a caller-chosen id, e.g. to drive a specific in-flight task
    /// assignment through to completion under its original worker id.
    pub fn with_id(worker_id: String, coordinator_addr: SocketAddr, app: Arc<dyn MapReduceApp>) -> Self {
        Self {
            worker_id,
            coordinator_addr,
            app,
        }
    }

    /// Discover the coordinator's address from the discovery file and build a worker.
    pub fn discover(info_path: &Path, app: Arc<dyn MapReduceApp>) -> WorkerResult<Self> {
        let addr = transport::read_discovery_file(info_path)?;
        Ok(Self::new(addr, app))
    }

    /// Run the main loop until the coordinator signals EXIT, or a request fails
    /// irrecoverably.
    pub async fn run(&self) -> WorkerResult<()> {
        info!("worker {} started", self.worker_id);
        loop {
            let task = transport::request_task(self.coordinator_addr, self.worker_id.clone())
                .await
                .map_err(|e| {
                    warn!("failed to request task: {e}");
                    e
                })?;

            match task.kind {
                TaskKind::Exit => {
                    info!("received exit signal, worker {} terminating", self.worker_id);
                    return Ok(());
                }
                TaskKind::Wait => {
                    tokio::time::sleep(WAIT_SLEEP).await;
                }
                TaskKind::Map | TaskKind::Reduce => {
                    debug!("executing {:?} task {}", task.kind, task.task_id);
                    let outcome = self.execute(&task).await;
                    self.report_completion(&task, outcome).await;
                }
            }
        }
    }

    async fn execute(&self, task: &Task) -> TaskResult<()> {
        match task.kind {
            TaskKind::Map => self.execute_map(task).await,
            TaskKind::Reduce => self.execute_reduce(task).await,
            TaskKind::Wait | TaskKind::Exit => unreachable!("caller only executes Map/Reduce"),
        }
    }

    /// Execute one already-assigned MAP or REDUCE task and report its outcome, without
    /// entering the request/wait loop. Useful for driving a worker through exactly one task,
    /// e.g. to simulate a process that crashes right after finishing its first assignment.
    pub async fn run_one(&self, task: &Task) -> WorkerResult<()> {
        let outcome = self.execute(task).await;
        self.report_completion(task, outcome).await;
        Ok(())
    }

    /// Report the outcome of a task back to the coordinator. A failed RPC here is a
    /// transient transport error: log and move on, rather than terminating the
    /// worker, since the coordinator's lease monitor will reassign the task regardless.
    async fn report_completion(&self, task: &Task, outcome: TaskResult<()>) {
        let (success, error_message) = match outcome {
            Ok(()) => (true, String::new()),
            Err(e) => (false, e.to_string()),
        };

        if let Err(e) = transport::complete_task(
            self.coordinator_addr,
            self.worker_id.clone(),
            task.task_id,
            success,
            error_message,
        )
        .await
        {
            warn!("failed to report completion of task {}: {e}", task.task_id);
        }
    }

    /// Read the sole input file, apply the map function, partition by `ihash(key) % R`, and
    /// write each bucket through a `.tmp` file then an atomic rename, even when empty.
    async fn execute_map(&self, task: &Task) -> TaskResult<()> {
        let input_file = task
            .input_files
            .first()
            .expect("map task has exactly one input file");
        let m = task.map_index.expect("map task has map_index set");

        let raw = tokio::fs::read(input_file).await?;
        let contents = String::from_utf8_lossy(&raw).into_owned();

        let key_values = self.app.map(input_file, &contents);

        let n_reduce = task.n_reduce;
        let mut buckets: Vec<Vec<KeyValue>> = (0..n_reduce).map(|_| Vec::new()).collect();
        for kv in key_values {
            let bucket = partition_for_key(&kv.key, n_reduce) as usize;
            buckets[bucket].push(kv);
        }

        for (j, bucket) in buckets.into_iter().enumerate() {
            let final_path = format!("mr-{m}-{j}");
            let temp_path = format!("{final_path}.tmp");
            write_key_values(&temp_path, &bucket).await?;
            tokio::fs::rename(&temp_path, &final_path).await?;
        }

        Ok(())
    }

    /// Read every existing intermediate file, sort and group by key, apply the reduce
    /// function per group, and write the final output through a `.tmp` file then an atomic
    /// rename. An empty combined key/value list still produces an (empty) output file.
    async fn execute_reduce(&self, task: &Task) -> TaskResult<()> {
        let mut all_key_values = Vec::new();
        for path in &task.input_files {
            if tokio::fs::try_exists(path).await.unwrap_or(false) {
                all_key_values.extend(read_key_values(path).await?);
            }
        }

        let grouped = group_by_key(sort_key_values(all_key_values));

        let output_file = task
            .output_file
            .as_ref()
            .expect("reduce task has output_file set");
        let temp_path = format!("{output_file}.tmp");

        {
            let mut file = tokio::fs::File::create(&temp_path).await?;
            for (key, values) in grouped {
                let result = self.app.reduce(&key, &values);
                file.write_all(format!("{key} {result}\n").as_bytes()).await?;
            }
            file.flush().await?;
        }

        tokio::fs::rename(&temp_path, output_file).await?;
        Ok(())
    }
}

/// Write key/value pairs as newline-delimited JSON, one object per line.
async fn write_key_values(path: &str, key_values: &[KeyValue]) -> TaskResult<()> {
    let mut file = tokio::fs::File::create(path).await?;
    for kv in key_values {
        let line = serde_json::to_string(kv).map_err(TaskError::Serde)?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
    }
    file.flush().await?;
    Ok(())
}

/// Read newline-delimited JSON key/value pairs, skipping blank lines.
async fn read_key_values(path: &str) -> TaskResult<Vec<KeyValue>> {
    let contents = tokio::fs::read_to_string(path).await?;
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str::<KeyValue>(line).map_err(TaskError::Serde))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mr::function::WordCount;

    fn worker() -> Worker {
        Worker::new("127.0.0.1:1".parse().unwrap(), Arc::new(WordCount))
    }

    /// `execute_map` names its output files relative to the process's working directory, so
    /// this test (and it alone) temporarily chdirs into an isolated tempdir; both scenarios
    /// live in one test function to avoid racing the chdir against other parallel tests.
    #[tokio::test]
    async fn map_execution_partitions_keys_and_writes_every_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let previous = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();

        let input_path = dir.path().join("input-0.txt");
        std::fs::write(&input_path, "alpha beta alpha gamma").unwrap();
        let task = Task::map(0, 0, input_path.to_str().unwrap().to_string(), 3);
        worker().execute_map(&task).await.unwrap();
        for j in 0..3 {
            assert!(dir.path().join(format!("mr-0-{j}")).exists());
        }

        let solitary_path = dir.path().join("input-1.txt");
        std::fs::write(&solitary_path, "solitary").unwrap();
        let task = Task::map(1, 1, solitary_path.to_str().unwrap().to_string(), 4);
        worker().execute_map(&task).await.unwrap();
        let nonempty = (0..4)
            .filter(|j| {
                std::fs::metadata(dir.path().join(format!("mr-1-{j}")))
                    .unwrap()
                    .len()
                    > 0
            })
            .count();
        assert_eq!(nonempty, 1, "a single key must land in exactly one bucket");

        std::env::set_current_dir(previous).unwrap();
    }

    #[tokio::test]
    async fn reduce_execution_sorts_keys_and_skips_missing_inputs() {
        let dir = tempfile::tempdir().unwrap();

        let present = dir.path().join("mr-0-0");
        write_key_values(
            present.to_str().unwrap(),
            &[KeyValue::new("b", "1"), KeyValue::new("a", "1"), KeyValue::new("a", "1")],
        )
        .await
        .unwrap();
        let missing = dir.path().join("mr-1-0").to_str().unwrap().to_string();

        let output_path = dir.path().join("mr-out-0");
        let task = Task::reduce(
            1,
            0,
            vec![present.to_str().unwrap().to_string(), missing],
            output_path.to_str().unwrap().to_string(),
            1,
        );
        worker().execute_reduce(&task).await.unwrap();

        let contents = std::fs::read_to_string(&output_path).unwrap();
        assert_eq!(contents, "a 2\nb 1\n");
    }

    #[tokio::test]
    async fn reduce_execution_on_empty_input_produces_empty_output() {
        let dir = tempfile::tempdir().unwrap();

        let output_path = dir.path().join("mr-out-0");
        let task = Task::reduce(
            0,
            0,
            vec![dir.path().join("mr-0-0").to_str().unwrap().to_string()],
            output_path.to_str().unwrap().to_string(),
            1,
        );
        worker().execute_reduce(&task).await.unwrap();

        assert_eq!(std::fs::metadata(&output_path).unwrap().len(), 0);
    }
}
