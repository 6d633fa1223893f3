// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_io::Timer;
use futures::channel::oneshot;
use futures::future::{select, Either, LocalBoxFuture};
use futures::FutureExt;
use log::debug;

use crate::bridge::context::{self, BridgeContext};
use crate::bridge::error::BridgeError;
use crate::bridge::event_loop::{EventLoop, LoopHandle};
use crate::global_config;
use crate::panic_payload::panic_message;

type AsyncOp<A, T> = Arc<dyn Fn(A) -> LocalBoxFuture<'static, anyhow::Result<T>> + Send + Sync>;

/// Lets blocking code call an async operation and wait for its result.
///
/// The operation runs on the home loop when one is running, otherwise on a
/// private loop built for the single call on the calling thread.
pub struct SyncToAsync<A, T> {
    op: AsyncOp<A, T>,
    home: Option<LoopHandle>,
    timeout: Option<Duration>,
}

impl<A, T> Clone for SyncToAsync<A, T> {
    fn clone(&self) -> Self {
        Self {
            op: self.op.clone(),
            home: self.home.clone(),
            timeout: self.timeout,
        }
    }
}

impl<A: Send + 'static, T: Send + 'static> SyncToAsync<A, T> {
    /// Wraps `op`. The home loop is taken from the creating thread's context:
    /// the loop it drives, or the one recorded by an enclosing [`AsyncToSync`].
    ///
    /// [`AsyncToSync`]: crate::bridge::AsyncToSync
    pub fn new<F, Fut>(op: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + 'static,
    {
        Self {
            op: Arc::new(move |args| op(args).boxed_local()),
            home: BridgeContext::current().home().cloned(),
            timeout: global_config::get_bridge_config().timeout(),
        }
    }

    /// Wraps an operation that needs its owner as first argument.
    pub fn bound<O, F, Fut>(owner: Arc<O>, op: F) -> Self
    where
        O: Send + Sync + 'static,
        F: Fn(Arc<O>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + 'static,
    {
        Self::new(move |args| op(owner.clone(), args))
    }

    pub fn with_home(mut self, home: LoopHandle) -> Self {
        self.home = Some(home);
        self
    }

    /// Bounds the wait for the result; `None` waits forever.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn home(&self) -> Option<&LoopHandle> {
        self.home.as_ref()
    }

    /// Runs the operation and blocks the calling thread until it finished.
    pub fn call(&self, args: A) -> Result<T, BridgeError> {
        self.call_in(&BridgeContext::current(), args)
    }

    /// Like [`SyncToAsync::call`], with the fallback home loop taken from `ctx`
    /// instead of the thread context.
    pub fn call_in(&self, ctx: &BridgeContext, args: A) -> Result<T, BridgeError> {
        if context::is_driving_loop() {
            return Err(BridgeError::Reentrant);
        }

        let home = self
            .home
            .iter()
            .chain(ctx.home())
            .find(|home| home.is_running() && !home.is_closed())
            .cloned();
        match home {
            Some(home) => self.schedule_on(&home, args),
            None => self.run_private(args),
        }
    }

    fn schedule_on(&self, home: &LoopHandle, args: A) -> Result<T, BridgeError> {
        let (tx, rx) = oneshot::channel();
        let op = self.op.clone();
        let mut args = Some(args);
        let spawned = home.while_running(|| match args.take() {
            Some(args) => home.spawn(move || async move {
                let result = run_guarded(op(args)).await;
                let _ = tx.send(result);
            }),
            None => Err(BridgeError::LoopClosed),
        });

        match (spawned, args) {
            (Some(spawned), _) => {
                spawned?;
                debug!("Scheduled async operation onto loop {}", home.name());
                async_io::block_on(wait_for(rx, self.timeout, || BridgeError::LoopClosed))
            }
            // the home loop stopped between the check and the hand-off
            (None, Some(args)) => self.run_private(args),
            (None, None) => Err(BridgeError::LoopClosed),
        }
    }

    fn run_private(&self, args: A) -> Result<T, BridgeError> {
        debug!("No running home loop, running async operation on a private loop");
        let mut private = EventLoop::new("private");
        let fut = run_guarded((self.op)(args));
        match self.timeout {
            None => private.block_on(fut),
            Some(limit) => private.block_on(async move {
                match select(fut.boxed_local(), Timer::after(limit)).await {
                    Either::Left((result, _)) => result,
                    Either::Right(_) => Err(BridgeError::TimedOut(limit)),
                }
            }),
        }
        // dropping `private` closes it; nothing can schedule onto it afterwards
    }
}

/// Runs an operation future, mapping its error and any panic into a
/// [`BridgeError`].
pub(crate) async fn run_guarded<T>(
    fut: impl Future<Output = anyhow::Result<T>>,
) -> Result<T, BridgeError> {
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(BridgeError::Operation(err)),
        Err(payload) => Err(BridgeError::Panicked(panic_message(&*payload))),
    }
}

/// Waits for a result cell, optionally bounded. `dropped` is the error used
/// when the producing side went away without setting the cell.
pub(crate) async fn wait_for<T>(
    rx: oneshot::Receiver<Result<T, BridgeError>>,
    timeout: Option<Duration>,
    dropped: fn() -> BridgeError,
) -> Result<T, BridgeError> {
    let received = match timeout {
        None => rx.await,
        Some(limit) => match select(rx, Timer::after(limit)).await {
            Either::Left((received, _)) => received,
            Either::Right(_) => return Err(BridgeError::TimedOut(limit)),
        },
    };
    received.map_err(|_canceled| dropped())?
}
