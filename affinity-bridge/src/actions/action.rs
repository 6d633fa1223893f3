// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use affinity_bridge::{AffinityKey, Args, Kwargs, TaskOutcome};

/// One line of input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Call {
    #[serde(default)]
    pub id: Value,
    /// Calls sharing a key run on the same worker, in input order
    #[serde(default)]
    pub key: Option<AffinityKey>,
    pub method: Method,
    #[serde(default)]
    pub args: Args,
    #[serde(default)]
    pub kwargs: Kwargs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Method {
    Echo,
    Sum,
    Concat,
    /// Waits on the home loop for `args[0]` milliseconds
    Sleep,
    /// Sums on the blocking executor, reached from the home loop
    Relay,
    Fail,
}

/// One line of output.
#[derive(Debug, Serialize)]
pub struct Reply {
    pub id: Value,
    pub worker: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<AffinityKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn parse_call(line: &str) -> anyhow::Result<Call> {
    serde_json::from_str(line).with_context(|| format!("invalid call: {line}"))
}

/// Renders an outcome. The job description carries the call id as JSON.
pub fn render_outcome(outcome: &TaskOutcome) -> anyhow::Result<String> {
    let id = serde_json::from_str(&outcome.desc).unwrap_or(Value::Null);
    let (result, error) = match &outcome.result {
        Ok(value) => (Some(value.clone()), None),
        Err(e) => (None, Some(e.to_string())),
    };
    let reply = Reply {
        id,
        worker: outcome.worker,
        key: outcome.key.clone(),
        result,
        error,
    };
    Ok(serde_json::to_string(&reply)?)
}
