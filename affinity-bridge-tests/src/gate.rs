// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::Arc;

use affinity_bridge::{ClosureJob, Job};
use async_channel::{Receiver, Sender};
use serde_json::Value;

/// Holds back every job created from it until [`Gate::open`] is called.
#[derive(Debug, Clone)]
pub struct Gate {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl Gate {
    pub fn new() -> Self {
        let (tx, rx) = async_channel::bounded(1);
        Self { tx, rx }
    }

    pub fn job(&self, desc: &str) -> Arc<dyn Job> {
        let rx = self.rx.clone();
        ClosureJob::shared(desc, move |_, _| {
            // returns once the channel is closed
            let _ = rx.recv_blocking();
            Ok(Value::Null)
        })
    }

    pub fn open(&self) {
        self.tx.close();
    }
}
