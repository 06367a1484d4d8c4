//! Distributed MapReduce over a coordinator/worker RPC protocol.

pub mod mr;
