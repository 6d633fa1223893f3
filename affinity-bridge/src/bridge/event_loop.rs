// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use async_channel::{Receiver, Sender};
use futures::executor::{LocalPool, LocalSpawner};
use futures::future::{select, Either, LocalBoxFuture};
use futures::task::LocalSpawnExt;
use futures::{pin_mut, FutureExt};
use log::{debug, error, info, warn};

use crate::bridge::context;
use crate::bridge::error::BridgeError;
use crate::panic_payload::panic_message;

/// Creates the future on the loop thread, so the future itself need not be `Send`.
type Remote = Box<dyn FnOnce() -> LocalBoxFuture<'static, ()> + Send>;

struct Shared {
    name: String,
    tx: Sender<Remote>,
    /// Written when a thread starts or stops driving the loop
    running: Mutex<bool>,
}

/// Thread-safe handle to an [`EventLoop`]. Cloning is cheap.
#[derive(Clone)]
pub struct LoopHandle {
    shared: Arc<Shared>,
}

impl LoopHandle {
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// True while some thread is driving the loop.
    pub fn is_running(&self) -> bool {
        *self.running()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.tx.is_closed()
    }

    /// Hands a task to the loop from any thread. The future is built by
    /// `factory` on the loop thread the next time the loop gets to it.
    pub fn spawn<F, Fut>(&self, factory: F) -> Result<(), BridgeError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        let remote: Remote = Box::new(move || factory().boxed_local());
        self.shared
            .tx
            .try_send(remote)
            .map_err(|_| BridgeError::LoopClosed)
    }

    /// Stops accepting new tasks. Returns false if it was already closed.
    pub fn close(&self) -> bool {
        self.shared.tx.close()
    }

    /// Runs `f` only while some thread drives the loop. The loop cannot stop
    /// before `f` returns, so whatever `f` spawns is either picked up or
    /// dropped when the loop stops.
    pub(crate) fn while_running<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let running = self.running();
        if !*running {
            return None;
        }
        Some(f())
    }

    fn running(&self) -> MutexGuard<'_, bool> {
        self.shared
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl PartialEq for LoopHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for LoopHandle {}

impl fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopHandle")
            .field("name", &self.name())
            .field("running", &self.is_running())
            .field("closed", &self.is_closed())
            .finish()
    }
}

struct Running {
    handle: LoopHandle,
    rx: Receiver<Remote>,
}

impl Running {
    fn enter(handle: &LoopHandle, rx: &Receiver<Remote>) -> Self {
        *handle.running() = true;
        Self {
            handle: handle.clone(),
            rx: rx.clone(),
        }
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        let mut running = self.handle.running();
        *running = false;
        // Nobody picks these up any more. Dropping them fails their callers'
        // result cells instead of leaving them waiting.
        let mut dropped = 0;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(
                "Loop {}: dropped {dropped} tasks handed in after it stopped",
                self.handle.name()
            );
        }
    }
}

/// Single-threaded event loop on top of [`LocalPool`].
///
/// Work arrives either as the future passed to [`EventLoop::block_on`] or from
/// other threads through [`LoopHandle::spawn`]. The loop is only "running"
/// while a thread is inside `block_on` or `run`.
pub struct EventLoop {
    pool: LocalPool,
    rx: Receiver<Remote>,
    handle: LoopHandle,
}

impl EventLoop {
    pub fn new(name: impl Into<String>) -> Self {
        let (tx, rx) = async_channel::unbounded();
        Self {
            pool: LocalPool::new(),
            rx,
            handle: LoopHandle {
                shared: Arc::new(Shared {
                    name: name.into(),
                    tx,
                    running: Mutex::new(false),
                }),
            },
        }
    }

    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    /// Drives the loop on the calling thread until `fut` completes. Tasks
    /// handed in from other threads run in the meantime. Tasks that have not
    /// finished when `fut` completes are dropped.
    ///
    /// # Panics
    /// When the calling thread is already inside an executor.
    pub fn block_on<F: Future>(&mut self, fut: F) -> F::Output {
        let _driving = context::enter_loop(self.handle.clone());
        let running = Running::enter(&self.handle, &self.rx);
        let drain = drain_remote(
            self.rx.clone(),
            self.pool.spawner(),
            self.handle.name().to_string(),
        );

        let output = self.pool.run_until(async move {
            pin_mut!(fut);
            pin_mut!(drain);
            match select(fut, drain).await {
                Either::Left((output, _)) => output,
                Either::Right(((), fut)) => fut.await,
            }
        });

        drop(running);
        self.pool = LocalPool::new();
        output
    }

    /// Drives the loop until its handle is closed, then lets every spawned task
    /// finish.
    pub fn run(&mut self) {
        let _driving = context::enter_loop(self.handle.clone());
        let _running = Running::enter(&self.handle, &self.rx);
        let drain = drain_remote(
            self.rx.clone(),
            self.pool.spawner(),
            self.handle.name().to_string(),
        );
        self.pool.run_until(drain);
        self.pool.run(); // blocks until all tasks complete
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.handle.close();
    }
}

/// Moves tasks handed in through the handle onto the local pool.
async fn drain_remote(rx: Receiver<Remote>, spawner: LocalSpawner, name: String) {
    while let Ok(remote) = rx.recv().await {
        let loop_name = name.clone();
        let task = AssertUnwindSafe(remote()).catch_unwind().map(move |result| {
            if let Err(payload) = result {
                error!(
                    "Loop {loop_name}: task panicked: {}",
                    panic_message(&*payload)
                );
            }
        });
        if let Err(e) = spawner.spawn_local(task) {
            warn!("Loop {name}: failed to spawn task: {e:?}");
        }
    }
    debug!("Loop {name}: channel has been closed");
}

/// An [`EventLoop`] running on a dedicated thread.
#[derive(Debug)]
pub struct LoopThread {
    handle: LoopHandle,
    thread: Option<JoinHandle<()>>,
}

impl LoopThread {
    /// Spawns the thread and returns once the loop is running.
    pub fn start(name: impl Into<String>) -> Result<Self, BridgeError> {
        let name = name.into();
        let (handle_tx, handle_rx) = async_channel::bounded(1);

        // run loop in a dedicated thread
        let thread = thread::Builder::new()
            .name(format!("loop-{name}"))
            .spawn(move || {
                let mut event_loop = EventLoop::new(name);
                if handle_tx.send_blocking(event_loop.handle()).is_err() {
                    return;
                }
                event_loop.run();
            })?;
        let handle: LoopHandle = handle_rx
            .recv_blocking()
            .map_err(|_| BridgeError::LoopClosed)?;

        let (ready_tx, ready_rx) = async_channel::bounded::<()>(1);
        handle.spawn(move || async move {
            let _ = ready_tx.try_send(());
        })?;
        ready_rx
            .recv_blocking()
            .map_err(|_| BridgeError::LoopClosed)?;

        info!("Started event loop {}", handle.name());
        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    /// Stops accepting new tasks; already spawned ones keep running.
    pub fn close(&self) {
        self.handle.close();
    }

    /// Closes the loop and joins its thread once all spawned tasks finished.
    pub fn wait_until_finished(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Event loop {} terminated abnormally", self.handle.name());
            }
        }
        info!("Event loop {} ended", self.handle.name());
    }
}

impl Drop for LoopThread {
    fn drop(&mut self) {
        self.handle.close();
    }
}
