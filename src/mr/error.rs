//! Typed error taxonomy for the coordinator and worker.
//!
//! Internal call sites match on variant; at the RPC boundary every error is stringified
//! into the wire envelope's `error` field (see [`crate::mr::transport`]).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("task {0} is not known to this job")]
    UnknownTask(u32),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("transient transport error: {0}")]
    Transport(String),

    #[error("task execution error: {0}")]
    TaskExecution(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed coordinator_info.txt: {0}")]
    Discovery(String),
}

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("user callback error: {0}")]
    UserCallback(String),
}

pub type CoordinatorResult<T> = std::result::Result<T, CoordinatorError>;
pub type WorkerResult<T> = std::result::Result<T, WorkerError>;
pub type TaskResult<T> = std::result::Result<T, TaskError>;
