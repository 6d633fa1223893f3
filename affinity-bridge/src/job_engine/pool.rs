// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_channel::Sender;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::job_engine::affinity::AffinitySet;
use crate::job_engine::error::PoolError;
use crate::job_engine::job::{AffinityKey, Args, Job, Kwargs, Task, TaskObserver, TaskOutcome};
use crate::job_engine::worker::Worker;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of worker threads
    pub workers: usize,
    /// Keys each worker keeps affinity for; 0 means pure round-robin
    pub max_watching: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_watching: 100,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.workers == 0 {
            return Err(PoolError::InvalidConfig(
                "the pool needs at least one worker".into(),
            ));
        }
        Ok(())
    }
}

pub struct PoolBuilder {
    config: PoolConfig,
    sink: Option<Sender<TaskOutcome>>,
    observer: Option<Arc<dyn TaskObserver>>,
}

impl PoolBuilder {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            sink: None,
            observer: None,
        }
    }

    /// Forward the outcome of every task to `sink`. Without a sink results are
    /// discarded.
    pub fn sink(mut self, sink: Sender<TaskOutcome>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn TaskObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn build(self) -> Result<Pool, PoolError> {
        self.config.validate()?;

        let workers = (0..self.config.workers)
            .map(|id| Worker::spawn(id, self.sink.clone(), self.observer.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        let watching = (0..self.config.workers)
            .map(|_| AffinitySet::new(self.config.max_watching))
            .collect();

        info!(
            "Started pool with {} workers, watching up to {} keys each",
            self.config.workers, self.config.max_watching
        );
        Ok(Pool {
            workers,
            routing: Mutex::new(Routing {
                cursor: 0,
                watching,
                closed: false,
            }),
        })
    }
}

/// Routing state. Enqueueing happens while this is locked, so routing and
/// queue order agree and `shutdown` sees a consistent cut.
#[derive(Debug)]
struct Routing {
    cursor: usize,
    watching: Vec<AffinitySet>,
    closed: bool,
}

/// Fixed set of workers with per-key affinity.
#[derive(Debug)]
pub struct Pool {
    workers: Vec<Worker>,
    routing: Mutex<Routing>,
}

impl Pool {
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        PoolBuilder::new(config).build()
    }

    pub fn builder(config: PoolConfig) -> PoolBuilder {
        PoolBuilder::new(config)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Enqueues an unkeyed task on the next worker in round-robin order and
    /// returns that worker's id.
    pub fn submit(&self, job: Arc<dyn Job>, args: Args, kwargs: Kwargs) -> Result<usize, PoolError> {
        self.enqueue(Task::new(job, args, kwargs, None))
    }

    /// Enqueues a task on the worker that owns `key`, assigning the key to the
    /// next round-robin worker if nobody owns it yet.
    pub fn submit_keyed(
        &self,
        key: impl Into<AffinityKey>,
        job: Arc<dyn Job>,
        args: Args,
        kwargs: Kwargs,
    ) -> Result<usize, PoolError> {
        self.enqueue(Task::new(job, args, kwargs, Some(key.into())))
    }

    /// Enqueues a prepared task, honoring its affinity key if it has one.
    pub fn enqueue(&self, task: Task) -> Result<usize, PoolError> {
        let mut routing = self.routing();
        if routing.closed {
            return Err(PoolError::ShutDown);
        }
        let worker = self.route(&mut routing, task.key())?;
        debug!(
            "Routing {} (key {:?}) to worker {worker}",
            task.desc(),
            task.key().map(AffinityKey::as_str)
        );
        self.workers[worker].enqueue(task)?;
        Ok(worker)
    }

    fn route(&self, routing: &mut Routing, key: Option<&AffinityKey>) -> Result<usize, PoolError> {
        if let Some(key) = key {
            let owners: SmallVec<[usize; 2]> = routing
                .watching
                .iter()
                .enumerate()
                .filter(|(_, watching)| watching.contains(key))
                .map(|(id, _)| id)
                .collect();
            match owners.as_slice() {
                [] => {}
                [owner] => return Ok(*owner),
                _ => {
                    error!("Affinity key {key} is owned by workers {owners:?}");
                    return Err(PoolError::AffinityConflict {
                        key: key.clone(),
                        workers: owners.to_vec(),
                    });
                }
            }
        }

        let worker = (routing.cursor + 1) % self.workers.len();
        routing.cursor = worker;

        if let Some(key) = key {
            if let Some(evicted) = routing.watching[worker].watch(key.clone()) {
                debug!("Worker {worker} no longer watches key {evicted}");
            }
        }
        Ok(worker)
    }

    /// The worker currently owning `key`, if any.
    pub fn owner_of(&self, key: &AffinityKey) -> Option<usize> {
        self.routing()
            .watching
            .iter()
            .position(|watching| watching.contains(key))
    }

    /// Keys watched by `worker`, oldest first.
    pub fn watching(&self, worker: usize) -> Vec<AffinityKey> {
        self.routing()
            .watching
            .get(worker)
            .map(|watching| watching.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_shut_down(&self) -> bool {
        self.routing().closed
    }

    /// Blocks until every queue is empty and no task is running. The pool keeps
    /// accepting work.
    pub fn wait_idle(&self) {
        for worker in &self.workers {
            worker.wait_idle();
        }
    }

    /// Rejects further submissions and blocks until every task enqueued before
    /// this call has finished. Calling it again is a no-op.
    pub fn shutdown(&self) {
        {
            let mut routing = self.routing();
            if routing.closed {
                return;
            }
            routing.closed = true;
        }
        info!("Shutting down pool, draining {} queues", self.workers.len());
        for worker in &self.workers {
            worker.close();
        }
        for worker in &self.workers {
            worker.join();
        }
        info!("Pool shut down");
    }

    fn routing(&self) -> MutexGuard<'_, Routing> {
        self.routing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub(crate) fn force_watch(&self, worker: usize, key: AffinityKey) {
        self.routing().watching[worker].watch(key);
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        // Workers finish what is queued and exit on their own.
        for worker in &self.workers {
            worker.close();
        }
    }
}
