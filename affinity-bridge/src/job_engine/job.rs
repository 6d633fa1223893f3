// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::job_engine::error::TaskError;
use crate::panic_payload::panic_message;

/// Positional arguments of a task.
pub type Args = Vec<Value>;

/// Named arguments of a task.
pub type Kwargs = Map<String, Value>;

/// Token that binds tasks to one worker, e.g. a session or connection id.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AffinityKey(String);

impl AffinityKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AffinityKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for AffinityKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<u64> for AffinityKey {
    fn from(key: u64) -> Self {
        Self(key.to_string())
    }
}

impl fmt::Display for AffinityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Callable executed by a worker.
pub trait Job: Send + Sync + 'static {
    /// Free-form description, used for logging or debugging
    fn desc(&self) -> &str;

    /// Runs the job with the arguments of one submission.
    fn run(&self, args: &[Value], kwargs: &Kwargs) -> anyhow::Result<Value>;
}

impl fmt::Debug for dyn Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").field("desc", &self.desc()).finish()
    }
}

/// One submission: a job reference plus the arguments it is called with.
///
/// A task is immutable once it has been handed to the pool.
#[derive(Debug, Clone)]
pub struct Task {
    job: Arc<dyn Job>,
    args: Args,
    kwargs: Kwargs,
    key: Option<AffinityKey>,
}

impl Task {
    pub fn new(job: Arc<dyn Job>, args: Args, kwargs: Kwargs, key: Option<AffinityKey>) -> Self {
        Self {
            job,
            args,
            kwargs,
            key,
        }
    }

    pub fn desc(&self) -> &str {
        self.job.desc()
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn kwargs(&self) -> &Kwargs {
        &self.kwargs
    }

    pub fn key(&self) -> Option<&AffinityKey> {
        self.key.as_ref()
    }

    /// Runs the job, turning errors and panics into a [`TaskError`].
    pub(crate) fn execute(&self) -> Result<Value, TaskError> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.job.run(&self.args, &self.kwargs))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(TaskError::Failed(err)),
            Err(payload) => Err(TaskError::Panicked(panic_message(&*payload))),
        }
    }
}

/// Result of one task, forwarded to the output sink.
#[derive(Debug)]
pub struct TaskOutcome {
    pub worker: usize,
    pub desc: String,
    pub key: Option<AffinityKey>,
    pub result: Result<Value, TaskError>,
}

impl TaskOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Hook points around every task a worker runs.
pub trait TaskObserver: Send + Sync + 'static {
    fn on_start(&self, _worker: usize, _task: &Task) {}

    fn on_finish(&self, _outcome: &TaskOutcome) {}
}
