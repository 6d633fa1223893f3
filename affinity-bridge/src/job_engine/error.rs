// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use thiserror::Error;

use crate::job_engine::job::AffinityKey;

#[derive(Debug, Error)]
pub enum PoolError {
    /// The same key is watched by more than one worker. This is a routing
    /// defect and is never resolved by picking one of them.
    #[error("affinity key {key} is owned by more than one worker: {workers:?}")]
    AffinityConflict {
        key: AffinityKey,
        workers: Vec<usize>,
    },

    #[error("the pool has been shut down")]
    ShutDown,

    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Failure marker forwarded through the output sink.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task failed: {0:#}")]
    Failed(anyhow::Error),

    #[error("task panicked: {0}")]
    Panicked(String),
}
