// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::{Arc, Mutex};
use std::thread;

use affinity_bridge::{ClosureJob, Job};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub label: String,
    pub thread: String,
}

/// Records which thread ran which label, in execution order.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    entries: Arc<Mutex<Vec<Entry>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A job that appends `label` and the executing thread's name.
    pub fn job(&self, label: impl Into<String>) -> Arc<dyn Job> {
        let label = label.into();
        let entries = self.entries.clone();
        ClosureJob::shared(label.clone(), move |_, _| {
            entries.lock().unwrap().push(Entry {
                label: label.clone(),
                thread: thread::current().name().unwrap_or("unnamed").to_string(),
            });
            Ok(Value::String(label.clone()))
        })
    }

    pub fn entries(&self) -> Vec<Entry> {
        self.entries.lock().unwrap().clone()
    }

    /// Labels starting with `prefix`, in execution order.
    pub fn labels_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.label.starts_with(prefix))
            .map(|entry| entry.label)
            .collect()
    }

    /// Distinct threads that ran labels starting with `prefix`.
    pub fn threads_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut threads: Vec<String> = self
            .entries()
            .into_iter()
            .filter(|entry| entry.label.starts_with(prefix))
            .map(|entry| entry.thread)
            .collect();
        threads.sort();
        threads.dedup();
        threads
    }
}
