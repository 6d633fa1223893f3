// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use async_io::Timer;
use serde_json::{json, Value};

use affinity_bridge::{AsyncToSync, Job, Kwargs, LoopHandle, Pool, PoolError, SyncToAsync};

use super::action::{Call, Method};

/// Implementations of the built-in methods.
pub struct Handlers {
    sleep: SyncToAsync<u64, Value>,
    relay: SyncToAsync<Vec<Value>, Value>,
}

impl Handlers {
    pub fn new(home: LoopHandle) -> Self {
        let sleep = SyncToAsync::new(|ms: u64| async move {
            Timer::after(Duration::from_millis(ms)).await;
            Ok::<_, anyhow::Error>(json!(ms))
        })
        .with_home(home.clone());

        let summing = AsyncToSync::new(|args: Vec<Value>| sum(&args));
        let relay = SyncToAsync::new(move |args: Vec<Value>| {
            let summing = summing.clone();
            async move { Ok::<_, anyhow::Error>(summing.call(args).await?) }
        })
        .with_home(home);

        Self { sleep, relay }
    }

    pub fn run(&self, method: Method, args: &[Value], kwargs: &Kwargs) -> anyhow::Result<Value> {
        match method {
            Method::Echo => Ok(json!({ "args": args, "kwargs": kwargs })),
            Method::Sum => sum(args),
            Method::Concat => concat(args, kwargs),
            Method::Sleep => {
                let ms = args
                    .first()
                    .and_then(Value::as_u64)
                    .context("sleep expects milliseconds as first argument")?;
                Ok(self.sleep.call(ms)?)
            }
            Method::Relay => Ok(self.relay.call(args.to_vec())?),
            Method::Fail => {
                let message = kwargs
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("requested failure");
                bail!("{message}")
            }
        }
    }
}

fn sum(args: &[Value]) -> anyhow::Result<Value> {
    if let Some(ints) = args.iter().map(Value::as_i64).collect::<Option<Vec<_>>>() {
        let total = ints
            .into_iter()
            .try_fold(0i64, i64::checked_add)
            .context("sum overflows i64")?;
        return Ok(json!(total));
    }
    let floats = args
        .iter()
        .map(Value::as_f64)
        .collect::<Option<Vec<_>>>()
        .context("sum expects numbers only")?;
    Ok(json!(floats.iter().sum::<f64>()))
}

fn concat(args: &[Value], kwargs: &Kwargs) -> anyhow::Result<Value> {
    let sep = kwargs.get("sep").and_then(Value::as_str).unwrap_or("");
    let parts = args
        .iter()
        .map(|arg| match arg {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>();
    Ok(Value::String(parts.join(sep)))
}

/// A single call bound to the shared handlers.
struct CallJob {
    desc: String,
    method: Method,
    handlers: Arc<Handlers>,
}

impl Job for CallJob {
    fn desc(&self) -> &str {
        &self.desc
    }

    fn run(&self, args: &[Value], kwargs: &Kwargs) -> anyhow::Result<Value> {
        self.handlers.run(self.method, args, kwargs)
    }
}

/// Submits `call` to the pool, keyed when the call carries a key.
pub fn dispatch_call(
    pool: &Pool,
    handlers: &Arc<Handlers>,
    call: Call,
) -> Result<usize, PoolError> {
    let job: Arc<dyn Job> = Arc::new(CallJob {
        desc: call.id.to_string(),
        method: call.method,
        handlers: handlers.clone(),
    });
    match call.key {
        Some(key) => pool.submit_keyed(key, job, call.args, call.kwargs),
        None => pool.submit(job, call.args, call.kwargs),
    }
}
