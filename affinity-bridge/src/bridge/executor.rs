// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::thread::{self, JoinHandle};

use async_channel::{Receiver, Sender};
use log::{debug, error, info, warn};

use crate::bridge::error::BridgeError;
use crate::global_config;
use crate::panic_payload::panic_message;

type Work = Box<dyn FnOnce() + Send>;

static GLOBAL_EXECUTOR: OnceLock<BlockingExecutor> = OnceLock::new();

struct Inner {
    tx: Sender<Work>,
    rx: Receiver<Work>,
    max_threads: usize,
    /// Work queued or running, not yet finished
    outstanding: Arc<AtomicUsize>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    #[cfg(test)]
    refuse_spawns: std::sync::atomic::AtomicBool,
}

/// Bounded thread pool for blocking operations called from async code.
///
/// Threads are started on demand up to `max_threads` and then reused. The size
/// is fixed at construction. Clones share the same threads.
#[derive(Clone)]
pub struct BlockingExecutor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for BlockingExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingExecutor")
            .field("max_threads", &self.inner.max_threads)
            .field("threads", &self.thread_count())
            .finish()
    }
}

impl BlockingExecutor {
    pub fn new(max_threads: usize) -> Self {
        let (tx, rx) = async_channel::unbounded();
        Self {
            inner: Arc::new(Inner {
                tx,
                rx,
                max_threads: max_threads.max(1),
                outstanding: Arc::new(AtomicUsize::new(0)),
                threads: Mutex::new(Vec::new()),
                #[cfg(test)]
                refuse_spawns: std::sync::atomic::AtomicBool::new(false),
            }),
        }
    }

    /// Process-wide executor, sized once from the global configuration on
    /// first use.
    pub fn global() -> &'static BlockingExecutor {
        GLOBAL_EXECUTOR.get_or_init(|| {
            let threads = global_config::get_bridge_config().executor_threads;
            info!("Creating process-wide blocking executor with {threads} threads");
            BlockingExecutor::new(threads)
        })
    }

    pub fn max_threads(&self) -> usize {
        self.inner.max_threads
    }

    /// Threads started so far.
    pub fn thread_count(&self) -> usize {
        self.threads().len()
    }

    /// Queues `work` and starts another thread if all running ones are busy.
    pub fn execute<F>(&self, work: F) -> Result<(), BridgeError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.inner.tx.is_closed() {
            return Err(BridgeError::ExecutorClosed);
        }
        // grow before queueing, so a failed spawn never strands queued work
        self.inner.outstanding.fetch_add(1, Ordering::AcqRel);
        if let Err(e) = self.grow() {
            let threads = self.thread_count();
            if threads == 0 {
                self.inner.outstanding.fetch_sub(1, Ordering::AcqRel);
                return Err(e);
            }
            warn!("Blocking executor cannot grow beyond {threads} threads: {e}");
        }
        if self.inner.tx.try_send(Box::new(work)).is_err() {
            self.inner.outstanding.fetch_sub(1, Ordering::AcqRel);
            return Err(BridgeError::ExecutorClosed);
        }
        Ok(())
    }

    fn grow(&self) -> Result<(), BridgeError> {
        let mut threads = self.threads();
        if self.inner.outstanding.load(Ordering::Acquire) <= threads.len()
            || threads.len() >= self.inner.max_threads
        {
            return Ok(());
        }

        #[cfg(test)]
        if self.inner.refuse_spawns.load(Ordering::Acquire) {
            return Err(std::io::Error::other("thread spawning disabled").into());
        }

        let id = threads.len();
        let rx = self.inner.rx.clone();
        let outstanding = self.inner.outstanding.clone();
        let thread = thread::Builder::new()
            .name(format!("bridge-executor-{id}"))
            .spawn(move || executor_loop(id, rx, outstanding))?;
        threads.push(thread);
        debug!(
            "Blocking executor grew to {} of {} threads",
            threads.len(),
            self.inner.max_threads
        );
        Ok(())
    }

    /// Rejects new work, lets queued work finish and joins all threads.
    pub fn shutdown(&self) {
        self.inner.tx.close();
        let threads: Vec<_> = self.threads().drain(..).collect();
        for thread in threads {
            if thread.join().is_err() {
                error!("Blocking executor thread terminated abnormally");
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn refuse_spawns(&self, refuse: bool) {
        self.inner.refuse_spawns.store(refuse, Ordering::Release);
    }

    fn threads(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.inner
            .threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn executor_loop(id: usize, rx: Receiver<Work>, outstanding: Arc<AtomicUsize>) {
    while let Ok(work) = rx.recv_blocking() {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(work)) {
            error!(
                "Blocking executor thread {id}: work panicked: {}",
                panic_message(&*payload)
            );
        }
        outstanding.fetch_sub(1, Ordering::AcqRel);
    }
    debug!("Blocking executor thread {id} stopped");
}
