// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>
//! # Design: Sync/Async Execution-Context Bridge
//!
//! Two adapters cross the boundary between blocking code (pool workers,
//! executor threads) and code running on an [`EventLoop`]:
//!
//! - [`SyncToAsync`] wraps an async operation into a blocking call. From a
//!   plain thread it schedules the operation onto the home loop and waits on a
//!   one-shot result cell. Without a running home loop it builds a private loop
//!   for the call. From a thread that drives a loop it fails with
//!   [`BridgeError::Reentrant`] instead of deadlocking that loop.
//! - [`AsyncToSync`] wraps a blocking operation into a future. The operation
//!   runs on a [`BlockingExecutor`] thread that records the caller's loop as its
//!   home, so nested `SyncToAsync` calls find their way back.
//!
//!
//! ```text
//!        loop thread                          executor thread
//!     +----------------+   AsyncToSync     +-------------------+
//!     | async caller   | ----------------> | blocking op       |
//!     |   .await       |                   |   home = caller's |
//!     |                | <---------------- |   SyncToAsync     |
//!     +----------------+  spawn + oneshot  +-------------------+
//! ```
//!
//! Errors and panics of the wrapped operation are handed to the caller as
//! [`BridgeError::Operation`] and [`BridgeError::Panicked`].

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod async_to_sync;
pub mod context;
pub mod error;
pub mod event_loop;
pub mod executor;
pub mod sync_to_async;

pub use async_to_sync::AsyncToSync;
pub use context::BridgeContext;
pub use error::BridgeError;
pub use event_loop::{EventLoop, LoopHandle, LoopThread};
pub use executor::BlockingExecutor;
pub use sync_to_async::SyncToAsync;

/// Environment variable that sizes the blocking executor.
pub const EXECUTOR_THREADS_ENV: &str = "BRIDGE_THREADS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Upper bound of blocking executor threads
    pub executor_threads: usize,
    /// Bound for both adapters' waits in milliseconds; unset waits forever
    pub timeout_ms: Option<u64>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        let executor_threads = std::env::var(EXECUTOR_THREADS_ENV)
            .ok()
            .and_then(|threads| threads.trim().parse::<usize>().ok())
            .filter(|threads| *threads > 0)
            .unwrap_or_else(default_executor_threads);
        Self {
            executor_threads,
            timeout_ms: None,
        }
    }
}

impl BridgeConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// `min(32, cpus + 4)`, the usual size for I/O bound blocking pools.
pub fn default_executor_threads() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cpus + 4).min(32)
}

/// Shorthand for [`SyncToAsync::new`].
pub fn sync_to_async<A, T, F, Fut>(op: F) -> SyncToAsync<A, T>
where
    A: Send + 'static,
    T: Send + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + 'static,
{
    SyncToAsync::new(op)
}

/// Shorthand for [`AsyncToSync::new`].
pub fn async_to_sync<A, T, F>(op: F) -> AsyncToSync<A, T>
where
    A: Send + 'static,
    T: Send + 'static,
    F: Fn(A) -> anyhow::Result<T> + Send + Sync + 'static,
{
    AsyncToSync::new(op)
}
