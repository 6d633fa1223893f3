// SPDX-License-Identifier: MIT
// affinity-bridge: key-affine worker pool with a sync/async call bridge
//
// - Spreads submitted jobs over a fixed set of worker threads.
// - Jobs that share an affinity key always run on the same worker, in order.
// - Lets blocking code call into an event loop and vice versa.
//
// Author: Johannes Leupolz <dev@leupolz.eu>

pub mod bridge;
pub mod global_config;
pub mod job_engine;

mod panic_payload;

pub use bridge::{
    async_to_sync, sync_to_async, AsyncToSync, BlockingExecutor, BridgeConfig, BridgeContext,
    BridgeError, EventLoop, LoopHandle, LoopThread, SyncToAsync,
};
pub use job_engine::{
    AffinityKey, AffinitySet, Args, ClosureJob, Job, Kwargs, Pool, PoolBuilder, PoolConfig,
    PoolError, Task, TaskError, TaskObserver, TaskOutcome,
};
