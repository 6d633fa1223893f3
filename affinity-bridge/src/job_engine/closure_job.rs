// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::Arc;

use serde_json::Value;

use crate::job_engine::job::{Job, Kwargs};

type Body = Box<dyn Fn(&[Value], &Kwargs) -> anyhow::Result<Value> + Send + Sync + 'static>;

pub struct ClosureJob {
    desc: String,
    body: Body,
}

impl ClosureJob {
    pub fn new<F>(desc: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[Value], &Kwargs) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            desc: desc.into(),
            body: Box::new(f),
        }
    }

    /// Wraps the closure directly into the shared form the pool accepts.
    pub fn shared<F>(desc: impl Into<String>, f: F) -> Arc<dyn Job>
    where
        F: Fn(&[Value], &Kwargs) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Arc::new(Self::new(desc, f))
    }
}

impl Job for ClosureJob {
    fn desc(&self) -> &str {
        &self.desc
    }

    fn run(&self, args: &[Value], kwargs: &Kwargs) -> anyhow::Result<Value> {
        (self.body)(args, kwargs)
    }
}
