// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use futures::channel::oneshot;

use crate::bridge::context::BridgeContext;
use crate::bridge::error::BridgeError;
use crate::bridge::executor::BlockingExecutor;
use crate::bridge::sync_to_async::wait_for;
use crate::global_config;
use crate::panic_payload::panic_message;

type BlockingOp<A, T> = Arc<dyn Fn(A) -> anyhow::Result<T> + Send + Sync>;

/// Lets async code await a blocking operation without stalling its loop.
///
/// The operation runs on a [`BlockingExecutor`] thread. While it runs, that
/// thread knows the caller's loop as its home loop, so a nested [`SyncToAsync`]
/// call is scheduled back onto the caller's loop.
///
/// [`SyncToAsync`]: crate::bridge::SyncToAsync
pub struct AsyncToSync<A, T> {
    op: BlockingOp<A, T>,
    executor: BlockingExecutor,
    timeout: Option<Duration>,
}

impl<A, T> Clone for AsyncToSync<A, T> {
    fn clone(&self) -> Self {
        Self {
            op: self.op.clone(),
            executor: self.executor.clone(),
            timeout: self.timeout,
        }
    }
}

impl<A: Send + 'static, T: Send + 'static> AsyncToSync<A, T> {
    /// Wraps `op`, running it on the process-wide executor.
    pub fn new<F>(op: F) -> Self
    where
        F: Fn(A) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self::with_executor(BlockingExecutor::global(), op)
    }

    pub fn with_executor<F>(executor: &BlockingExecutor, op: F) -> Self
    where
        F: Fn(A) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self {
            op: Arc::new(op),
            executor: executor.clone(),
            timeout: global_config::get_bridge_config().timeout(),
        }
    }

    /// Wraps an operation that needs its owner as first argument.
    pub fn bound<O, F>(owner: Arc<O>, op: F) -> Self
    where
        O: Send + Sync + 'static,
        F: Fn(&O, A) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self::new(move |args| op(owner.as_ref(), args))
    }

    /// Bounds the wait for the result; `None` waits forever.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn executor(&self) -> &BlockingExecutor {
        &self.executor
    }

    /// Runs the operation on the executor and waits for it without blocking
    /// the current thread.
    pub async fn call(&self, args: A) -> Result<T, BridgeError> {
        // evaluated on first poll, i.e. on the thread driving the caller
        let ctx = BridgeContext::current();
        self.call_in(&ctx, args).await
    }

    /// Like [`AsyncToSync::call`], recording `ctx` as the home of the executor
    /// thread.
    pub async fn call_in(&self, ctx: &BridgeContext, args: A) -> Result<T, BridgeError> {
        let ctx = ctx.clone();
        let op = self.op.clone();
        let (tx, rx) = oneshot::channel();

        self.executor.execute(move || {
            let _home = ctx.enter();
            let result = match panic::catch_unwind(AssertUnwindSafe(|| op(args))) {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(BridgeError::Operation(err)),
                Err(payload) => Err(BridgeError::Panicked(panic_message(&*payload))),
            };
            let _ = tx.send(result);
        })?;

        wait_for(rx, self.timeout, || BridgeError::ExecutorClosed).await
    }
}
