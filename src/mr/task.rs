//! Task records shared between coordinator and worker across the RPC boundary.

use serde::{Deserialize, Serialize};

/// What kind of work a [`Task`] represents, or a control signal from the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Map,
    Reduce,
    /// No task is available right now; ask again shortly.
    Wait,
    /// The job is done; the worker should terminate.
    Exit,
}

/// A unit of work handed from the coordinator to a worker.
///
/// `map_index` is set iff `kind == Map`; `reduce_index` is set iff `kind == Reduce`.
/// `Wait`/`Exit` tasks carry only `n_reduce`, the rest are sentinel defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: u32,
    #[serde(rename = "task_type")]
    pub kind: TaskKind,
    pub input_files: Vec<String>,
    pub output_file: Option<String>,
    pub n_reduce: u32,
    pub map_index: Option<u32>,
    pub reduce_index: Option<u32>,
}

impl Task {
    pub fn wait(n_reduce: u32) -> Self {
        Self {
            task_id: 0,
            kind: TaskKind::Wait,
            input_files: Vec::new(),
            output_file: None,
            n_reduce,
            map_index: None,
            reduce_index: None,
        }
    }

    pub fn exit(n_reduce: u32) -> Self {
        Self {
            task_id: 0,
            kind: TaskKind::Exit,
            input_files: Vec::new(),
            output_file: None,
            n_reduce,
            map_index: None,
            reduce_index: None,
        }
    }

    pub fn map(task_id: u32, map_index: u32, input_file: String, n_reduce: u32) -> Self {
        Self {
            task_id,
            kind: TaskKind::Map,
            input_files: vec![input_file],
            output_file: None,
            n_reduce,
            map_index: Some(map_index),
            reduce_index: None,
        }
    }

    pub fn reduce(
        task_id: u32,
        reduce_index: u32,
        input_files: Vec<String>,
        output_file: String,
        n_reduce: u32,
    ) -> Self {
        Self {
            task_id,
            kind: TaskKind::Reduce,
            input_files,
            output_file: Some(output_file),
            n_reduce,
            map_index: None,
            reduce_index: Some(reduce_index),
        }
    }
}

/// A single key/value pair as produced by a map function and consumed by a reduce function.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Sort key/value pairs by key, stably (equal keys keep their relative order).
pub fn sort_key_values(mut kvs: Vec<KeyValue>) -> Vec<KeyValue> {
    kvs.sort_by(|a, b| a.key.cmp(&b.key));
    kvs
}

/// Group consecutive equal keys from an already-sorted sequence.
///
/// Preserves intra-group order of values.
pub fn group_by_key(sorted: Vec<KeyValue>) -> Vec<(String, Vec<String>)> {
    let mut groups: Vec<(String, Vec<String>)> = Vec::new();
    for kv in sorted {
        match groups.last_mut() {
            Some((key, values)) if *key == kv.key => values.push(kv.value),
            _ => groups.push((kv.key, vec![kv.value])),
        }
    }
    groups
}
