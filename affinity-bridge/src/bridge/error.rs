// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Blocking here would stall the loop the operation has to run on.
    #[error(
        "cannot block on an async operation from a thread that drives an event loop - \
         await the operation directly"
    )]
    Reentrant,

    #[error("operation failed: {0:#}")]
    Operation(anyhow::Error),

    #[error("operation panicked: {0}")]
    Panicked(String),

    #[error("the event loop is closed")]
    LoopClosed,

    #[error("the blocking executor is closed")]
    ExecutorClosed,

    #[error("operation did not finish within {0:?}")]
    TimedOut(Duration),

    #[error("failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl BridgeError {
    /// The error returned by the wrapped operation, if that is what failed.
    pub fn operation_error(&self) -> Option<&anyhow::Error> {
        match self {
            BridgeError::Operation(err) => Some(err),
            _ => None,
        }
    }
}
