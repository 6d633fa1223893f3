// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use async_channel::{Receiver, Sender};
use log::{debug, info, warn};

use crate::job_engine::error::PoolError;
use crate::job_engine::job::{Task, TaskObserver, TaskOutcome};
use crate::panic_payload::panic_message;

/// Number of tasks that were enqueued but have not finished yet.
///
/// Same pattern as a queue join: `wait_idle` returns once every claimed task
/// has completed and nothing is left in the queue.
#[derive(Debug, Default)]
struct Pending {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Pending {
    fn add(&self) {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner) += 1;
    }

    fn done(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    fn wait_idle(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        while *count > 0 {
            count = self
                .idle
                .wait(count)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Pool-side handle of one worker thread and its queue.
#[derive(Debug)]
pub(crate) struct Worker {
    id: usize,
    tx: Sender<Task>,
    pending: Arc<Pending>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    pub(crate) fn spawn(
        id: usize,
        sink: Option<Sender<TaskOutcome>>,
        observer: Option<Arc<dyn TaskObserver>>,
    ) -> Result<Self, PoolError> {
        let (tx, rx) = async_channel::unbounded();
        let pending = Arc::new(Pending::default());
        let pending_in_thread = pending.clone();

        let thread = thread::Builder::new()
            .name(format!("affinity-worker-{id}"))
            .spawn(move || worker_loop(id, rx, pending_in_thread, sink, observer))?;

        Ok(Self {
            id,
            tx,
            pending,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Enqueues without blocking; the queue is unbounded.
    pub(crate) fn enqueue(&self, task: Task) -> Result<(), PoolError> {
        self.pending.add();
        if self.tx.try_send(task).is_err() {
            self.pending.done();
            return Err(PoolError::ShutDown);
        }
        Ok(())
    }

    pub(crate) fn wait_idle(&self) {
        self.pending.wait_idle();
    }

    /// Stops accepting tasks. Already queued tasks still run.
    pub(crate) fn close(&self) {
        self.tx.close();
    }

    /// Waits for the worker thread to drain its queue and exit.
    pub(crate) fn join(&self) {
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Worker {} terminated abnormally", self.id);
            }
        }
    }
}

/// Marks the claimed task as finished, also when the worker unwinds.
struct Claimed<'a>(&'a Pending);

impl Drop for Claimed<'_> {
    fn drop(&mut self) {
        self.0.done();
    }
}

/// Runs an observer hook. A panicking observer is logged and otherwise ignored.
fn notify(id: usize, hook: &str, call: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(call)) {
        warn!(
            "Worker {id}: observer panicked in {hook}: {}",
            panic_message(&*payload)
        );
    }
}

/// The main loop of a single worker.
fn worker_loop(
    id: usize,
    rx: Receiver<Task>,
    pending: Arc<Pending>,
    sink: Option<Sender<TaskOutcome>>,
    observer: Option<Arc<dyn TaskObserver>>,
) {
    info!("Starting worker {id}");
    while let Ok(task) = rx.recv_blocking() {
        let _claimed = Claimed(&pending);
        if let Some(observer) = &observer {
            notify(id, "on_start", || observer.on_start(id, &task));
        }

        let started = Instant::now();
        let result = task.execute();
        debug!(
            "Worker {id} executed {} in {:.3?}",
            task.desc(),
            started.elapsed()
        );
        if let Err(e) = &result {
            warn!("Worker {id}: {} failed: {e}", task.desc());
        }

        let outcome = TaskOutcome {
            worker: id,
            desc: task.desc().to_string(),
            key: task.key().cloned(),
            result,
        };
        if let Some(observer) = &observer {
            notify(id, "on_finish", || observer.on_finish(&outcome));
        }
        if let Some(sink) = &sink {
            if let Err(e) = sink.send_blocking(outcome) {
                warn!("Worker {id}: output sink closed, dropping outcome of {}", e.0.desc);
            }
        }
    }
    info!("Worker {id} stopped, queue closed");
}
