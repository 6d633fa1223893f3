// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>
//! # Design: Key-Affine Worker Pool
//!
//! ## Overview
//! A fixed set of worker threads, each draining its own FIFO queue.
//!
//! - The pool routes every submitted task to exactly one worker queue.
//! - Unkeyed tasks are spread round-robin.
//! - Keyed tasks stick to the worker that currently "watches" the key, so all
//!   tasks of one key run in submission order on one thread.
//! - Each worker watches at most `max_watching` keys. The oldest key is dropped
//!   first (FIFO, a repeated key does not move to the back).
//! - Queues are unbounded (no backpressure); submission never blocks.
//! - A failing or panicking task is reported as a [`TaskOutcome`] and the worker
//!   keeps running.
//! - `shutdown()` closes all queues and waits until every queued task ran.
//!
//!
//! ```text
//!         +--------------------------------------+
//!         |      Pool::submit / submit_keyed     |
//!         +----------+---------------------------+
//!                    |  affinity lookup / round-robin
//!         +----------v-----------+---------------+
//!         |   queue 0   |   queue 1   | queue 2  |
//!         +----+--------+------+------+----+-----+
//!              |               |           |
//!         +----v----+     +----v----+ +----v----+
//!         | worker 0|     | worker 1| | worker 2|
//!         +----+----+     +----+----+ +----+----+
//!              |               |           |
//!              +-------> output sink <-----+
//! ```

pub mod affinity;
pub mod closure_job;
pub mod error;
pub mod job;
pub mod pool;
mod worker;

pub use affinity::AffinitySet;
pub use closure_job::ClosureJob;
pub use error::{PoolError, TaskError};
pub use job::{AffinityKey, Args, Job, Kwargs, Task, TaskObserver, TaskOutcome};
pub use pool::{Pool, PoolBuilder, PoolConfig};

#[cfg(test)]
mod tests;
