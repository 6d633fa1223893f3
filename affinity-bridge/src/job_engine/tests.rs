use crate::job_engine::closure_job::ClosureJob;
use crate::job_engine::error::{PoolError, TaskError};
use crate::job_engine::job::{AffinityKey, Job, Kwargs, TaskOutcome};
use crate::job_engine::pool::{Pool, PoolConfig};

use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

/// Simple shared integer counter
fn shared_counter() -> Arc<Mutex<i64>> {
    Arc::new(Mutex::new(0))
}

fn config(workers: usize, max_watching: usize) -> PoolConfig {
    PoolConfig {
        workers,
        max_watching,
    }
}

fn noop() -> Arc<dyn Job> {
    ClosureJob::shared("noop", |_, _| Ok(Value::Null))
}

//
// 1. Ordering test
//
#[test]
fn test_job_ordering() {
    let pool = Pool::new(config(3, 10)).unwrap();
    let c = shared_counter();

    let c1 = c.clone();
    pool.submit_keyed(
        "session",
        ClosureJob::shared("set to 5", move |_, _| {
            *c1.lock().unwrap() = 5;
            Ok(Value::Null)
        }),
        vec![],
        Kwargs::new(),
    )
    .unwrap();

    let c2 = c.clone();
    pool.submit_keyed(
        "session",
        ClosureJob::shared("increment to 6", move |_, _| {
            *c2.lock().unwrap() += 1;
            Ok(Value::Null)
        }),
        vec![],
        Kwargs::new(),
    )
    .unwrap();

    pool.shutdown();

    assert_eq!(*c.lock().unwrap(), 6);
}

#[test]
fn test_first_unkeyed_submission_goes_to_cursor_plus_one() {
    let pool = Pool::new(config(3, 10)).unwrap();
    let order: Vec<usize> = (0..6)
        .map(|_| pool.submit(noop(), vec![], Kwargs::new()).unwrap())
        .collect();
    assert_eq!(order, vec![1, 2, 0, 1, 2, 0]);
    pool.shutdown();
}

#[test]
fn test_resident_key_does_not_advance_cursor() {
    let pool = Pool::new(config(3, 10)).unwrap();
    assert_eq!(pool.submit_keyed("k", noop(), vec![], Kwargs::new()).unwrap(), 1);
    assert_eq!(pool.submit_keyed("k", noop(), vec![], Kwargs::new()).unwrap(), 1);
    assert_eq!(pool.submit_keyed("k", noop(), vec![], Kwargs::new()).unwrap(), 1);
    // cursor is still on worker 1
    assert_eq!(pool.submit(noop(), vec![], Kwargs::new()).unwrap(), 2);
    pool.shutdown();
}

//
// 2. Invariant enforcement
//
#[test]
fn test_key_owned_twice_is_rejected() {
    let pool = Pool::new(config(3, 10)).unwrap();
    pool.force_watch(0, "dup".into());
    pool.force_watch(2, "dup".into());

    match pool.submit_keyed("dup", noop(), vec![], Kwargs::new()) {
        Err(PoolError::AffinityConflict { key, workers }) => {
            assert_eq!(key, AffinityKey::from("dup"));
            assert_eq!(workers, vec![0, 2]);
        }
        other => panic!("expected an affinity conflict, got {other:?}"),
    }
    pool.shutdown();
}

#[test]
fn test_zero_capacity_is_round_robin() {
    let pool = Pool::new(config(2, 0)).unwrap();
    let first = pool.submit_keyed("k", noop(), vec![], Kwargs::new()).unwrap();
    let second = pool.submit_keyed("k", noop(), vec![], Kwargs::new()).unwrap();
    assert_ne!(first, second);
    assert_eq!(pool.owner_of(&"k".into()), None);
    pool.shutdown();
}

#[test]
fn test_zero_workers_is_invalid() {
    assert!(matches!(
        Pool::new(config(0, 10)),
        Err(PoolError::InvalidConfig(_))
    ));
}

//
// 3. Failure isolation
//
#[test]
fn test_job_failure_does_not_kill_worker() {
    let (tx, rx) = async_channel::unbounded::<TaskOutcome>();
    let pool = Pool::builder(config(1, 10)).sink(tx).build().unwrap();

    pool.submit(
        ClosureJob::shared("panics", |_, _| panic!("intentional test panic")),
        vec![],
        Kwargs::new(),
    )
    .unwrap();
    pool.submit(
        ClosureJob::shared("errors", |_, _| anyhow::bail!("intentional test error")),
        vec![],
        Kwargs::new(),
    )
    .unwrap();
    pool.submit(
        ClosureJob::shared("survives", |args, _| Ok(args[0].clone())),
        vec![json!("still alive")],
        Kwargs::new(),
    )
    .unwrap();
    pool.shutdown();

    let outcomes: Vec<TaskOutcome> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
    assert_eq!(outcomes.len(), 3);
    assert!(matches!(
        &outcomes[0].result,
        Err(TaskError::Panicked(msg)) if msg == "intentional test panic"
    ));
    assert!(matches!(&outcomes[1].result, Err(TaskError::Failed(_))));
    assert_eq!(outcomes[2].result.as_ref().unwrap(), &json!("still alive"));
}

#[test]
fn test_no_jobs_after_shutdown() {
    let pool = Pool::new(config(2, 10)).unwrap();
    pool.shutdown();
    assert!(pool.is_shut_down());
    assert!(matches!(
        pool.submit(noop(), vec![], Kwargs::new()),
        Err(PoolError::ShutDown)
    ));
    // second shutdown returns immediately
    pool.shutdown();
}
