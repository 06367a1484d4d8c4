//! Connection-per-call RPC transport between coordinator and worker.
//!
//! The wire contract is one length-delimited JSON frame per direction over a fresh TCP
//! connection per call, built on `tarpc` + `tokio-serde`: every logical call opens a fresh
//! connection, issues exactly one request, and drops the connection when the response
//! arrives, so no RPC's fate is tied to another's socket. See `request_task`/`complete_task`
//! below.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::{future, StreamExt};
use serde::{Deserialize, Serialize};
use tarpc::{client, context, server::{BaseChannel, Channel}, tokio_serde::formats::Json};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::mr::error::WorkerError;
use crate::mr::task::Task;

/// Per-call timeout: connect + request + response must complete within this window.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Acknowledgement returned by `complete_task`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteAck {
    pub acknowledged: bool,
}

/// The coordinator's RPC method registry.
#[tarpc::service]
pub trait CoordinatorService {
    async fn request_task(worker_id: String) -> Task;
    async fn complete_task(
        worker_id: String,
        task_id: u32,
        success: bool,
        error_message: String,
    ) -> CompleteAck;
}

/// Bind a server implementing [`CoordinatorService`] to `addr` and serve connections in the
/// background until the returned handle is aborted.
///
/// Each accepted connection gets its own channel; because clients open a fresh connection
/// per call and drop it after the response, each channel processes exactly one request.
pub async fn serve<S>(addr: SocketAddr, server: S) -> anyhow::Result<(SocketAddr, JoinHandle<()>)>
where
    S: CoordinatorService + Clone + Send + 'static,
{
    let mut listener = tarpc::serde_transport::tcp::listen(addr, Json::default).await?;
    listener.config_mut().max_frame_length(usize::MAX);
    let local_addr = listener.local_addr();

    let handle = tokio::spawn(async move {
        listener
            .filter_map(|r| future::ready(r.ok()))
            .map(BaseChannel::with_defaults)
            .map(|channel| {
                let server = server.clone();
                channel.execute(server.serve()).for_each(|response| async move {
                    tokio::spawn(response);
                })
            })
            .buffer_unordered(usize::MAX)
            .for_each(|()| async {})
            .await;
    });

    Ok((local_addr, handle))
}

async fn connect_once(addr: SocketAddr) -> anyhow::Result<CoordinatorServiceClient> {
    let transport = tarpc::serde_transport::tcp::connect(addr, Json::default).await?;
    Ok(CoordinatorServiceClient::new(client::Config::default(), transport).spawn())
}

/// Call `request_task`, opening and closing a dedicated connection for this call alone.
pub async fn request_task(addr: SocketAddr, worker_id: String) -> Result<Task, WorkerError> {
    let call = async {
        let client = connect_once(addr)
            .await
            .map_err(|e| WorkerError::Transport(e.to_string()))?;
        client
            .request_task(context::current(), worker_id)
            .await
            .map_err(|e| WorkerError::Transport(e.to_string()))
    };
    match tokio::time::timeout(CALL_TIMEOUT, call).await {
        Ok(result) => result,
        Err(_) => Err(WorkerError::Transport("request_task timed out".to_string())),
    }
}

/// Call `complete_task`, opening and closing a dedicated connection for this call alone.
pub async fn complete_task(
    addr: SocketAddr,
    worker_id: String,
    task_id: u32,
    success: bool,
    error_message: String,
) -> Result<CompleteAck, WorkerError> {
    let call = async {
        let client = connect_once(addr)
            .await
            .map_err(|e| WorkerError::Transport(e.to_string()))?;
        client
            .complete_task(context::current(), worker_id, task_id, success, error_message)
            .await
            .map_err(|e| WorkerError::Transport(e.to_string()))
    };
    match tokio::time::timeout(CALL_TIMEOUT, call).await {
        Ok(result) => result,
        Err(_) => Err(WorkerError::Transport("complete_task timed out".to_string())),
    }
}

/// Persist `addr` as `host:port\n` to the discovery file at `path`.
pub fn write_discovery_file(path: &Path, addr: SocketAddr) -> std::io::Result<()> {
    std::fs::write(path, format!("{}\n", addr))
}

/// Best-effort removal of the discovery file; absence is not an error.
pub fn remove_discovery_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("failed to remove discovery file {}: {e}", path.display());
        }
    }
}

/// Read and parse `host:port` out of the discovery file at `path`.
pub fn read_discovery_file(path: &Path) -> Result<SocketAddr, WorkerError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        WorkerError::Discovery(format!("could not read {}: {e}", path.display()))
    })?;
    let line = contents.trim();
    debug!("discovered coordinator at {line}");
    line.parse::<SocketAddr>()
        .map_err(|e| WorkerError::Discovery(format!("invalid endpoint '{line}': {e}")))
}

/// Default discovery file path, relative to the process's current working directory.
pub fn default_discovery_path() -> PathBuf {
    PathBuf::from("coordinator_info.txt")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_file_round_trips_through_write_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coordinator_info.txt");
        let addr: SocketAddr = "127.0.0.1:4242".parse().unwrap();

        write_discovery_file(&path, addr).unwrap();
        let parsed = read_discovery_file(&path).unwrap();

        assert_eq!(parsed, addr);
    }

    #[test]
    fn remove_discovery_file_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coordinator_info.txt");
        remove_discovery_file(&path);
        remove_discovery_file(&path);
        assert!(!path.exists());
    }

    #[test]
    fn read_discovery_file_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coordinator_info.txt");
        std::fs::write(&path, "not-a-host-port\n").unwrap();
        assert!(read_discovery_file(&path).is_err());
    }
}
