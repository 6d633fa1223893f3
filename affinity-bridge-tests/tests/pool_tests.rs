// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use affinity_bridge::{
    AffinityKey, ClosureJob, Kwargs, Pool, PoolConfig, PoolError, Task, TaskError, TaskObserver,
    TaskOutcome,
};
use affinity_bridge_tests::gate::Gate;
use affinity_bridge_tests::recorder::Recorder;
use serde_json::{json, Value};

fn config(workers: usize, max_watching: usize) -> PoolConfig {
    PoolConfig {
        workers,
        max_watching,
    }
}

fn drain(rx: &async_channel::Receiver<TaskOutcome>) -> Vec<TaskOutcome> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

#[test]
fn test_round_robin_is_fair() {
    let (tx, rx) = async_channel::unbounded();
    let pool = Pool::builder(config(4, 10)).sink(tx).build().unwrap();
    let noop = ClosureJob::shared("noop", |_, _| Ok(Value::Null));

    for _ in 0..20 {
        pool.submit(noop.clone(), vec![], Kwargs::new()).unwrap();
    }
    pool.shutdown();

    let mut per_worker = [0usize; 4];
    for outcome in drain(&rx) {
        per_worker[outcome.worker] += 1;
    }
    assert_eq!(per_worker, [5, 5, 5, 5]);
}

#[test]
fn test_same_key_runs_on_one_worker_in_order() {
    let recorder = Recorder::new();
    let pool = Pool::new(config(3, 100)).unwrap();

    for i in 0..10 {
        pool.submit_keyed("a", recorder.job(format!("A-{i}")), vec![], Kwargs::new())
            .unwrap();
        pool.submit(recorder.job(format!("U-{i}")), vec![], Kwargs::new())
            .unwrap();
        pool.submit_keyed("b", recorder.job(format!("B-{i}")), vec![], Kwargs::new())
            .unwrap();
    }
    pool.shutdown();

    // Each key must preserve *its* order:
    assert_eq!(
        recorder.labels_with_prefix("A-"),
        (0..10).map(|i| format!("A-{i}")).collect::<Vec<_>>()
    );
    assert_eq!(
        recorder.labels_with_prefix("B-"),
        (0..10).map(|i| format!("B-{i}")).collect::<Vec<_>>()
    );
    assert_eq!(recorder.threads_with_prefix("A-").len(), 1);
    assert_eq!(recorder.threads_with_prefix("B-").len(), 1);
    // unkeyed work still spreads over all workers
    assert_eq!(recorder.threads_with_prefix("U-").len(), 3);
}

#[test]
fn test_oldest_key_is_evicted_first() {
    let pool = Pool::new(config(2, 2)).unwrap();
    let noop = ClosureJob::shared("noop", |_, _| Ok(Value::Null));

    // keys alternate between worker 1 and worker 0
    let placed: Vec<usize> = ["k1", "k2", "k3", "k4", "k5"]
        .iter()
        .map(|key| {
            pool.submit_keyed(*key, noop.clone(), vec![], Kwargs::new())
                .unwrap()
        })
        .collect();
    assert_eq!(placed, vec![1, 0, 1, 0, 1]);

    let k1 = AffinityKey::from("k1");
    assert_eq!(
        pool.watching(1),
        vec![AffinityKey::from("k3"), AffinityKey::from("k5")]
    );
    assert_eq!(pool.owner_of(&k1), None);
    assert_eq!(pool.owner_of(&"k2".into()), Some(0));

    // the evicted key is routed like a new one
    let moved_to = pool
        .submit_keyed(k1.clone(), noop.clone(), vec![], Kwargs::new())
        .unwrap();
    assert_eq!(moved_to, 0);
    assert_eq!(pool.owner_of(&k1), Some(0));
    assert_eq!(
        pool.watching(0),
        vec![AffinityKey::from("k4"), AffinityKey::from("k1")]
    );
    pool.shutdown();
}

#[test]
fn test_shutdown_waits_for_queued_tasks() {
    let pool = Pool::new(config(3, 10)).unwrap();
    let done = Arc::new(AtomicUsize::new(0));

    for i in 0..30 {
        let done = done.clone();
        let job = ClosureJob::shared(format!("slow-{i}"), move |_, _| {
            thread::sleep(Duration::from_millis(2));
            done.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        });
        if i % 2 == 0 {
            pool.submit_keyed(format!("session-{}", i % 4), job, vec![], Kwargs::new())
                .unwrap();
        } else {
            pool.submit(job, vec![], Kwargs::new()).unwrap();
        }
    }
    pool.shutdown();

    assert_eq!(done.load(Ordering::SeqCst), 30);
    assert!(matches!(
        pool.submit_keyed(
            "late",
            ClosureJob::shared("late", |_, _| Ok(Value::Null)),
            vec![],
            Kwargs::new()
        ),
        Err(PoolError::ShutDown)
    ));
}

#[test]
fn test_submit_never_blocks_on_a_busy_worker() {
    let gate = Gate::new();
    let recorder = Recorder::new();
    let pool = Pool::new(config(1, 10)).unwrap();

    pool.submit(gate.job("blocker"), vec![], Kwargs::new())
        .unwrap();
    for i in 0..100 {
        pool.submit(recorder.job(format!("queued-{i}")), vec![], Kwargs::new())
            .unwrap();
    }
    assert!(recorder.entries().is_empty());

    gate.open();
    pool.shutdown();
    assert_eq!(recorder.entries().len(), 100);
}

#[test]
fn test_failed_tasks_are_reported_and_worker_survives() {
    let (tx, rx) = async_channel::unbounded();
    let pool = Pool::builder(config(2, 10)).sink(tx).build().unwrap();

    pool.submit_keyed(
        "x",
        ClosureJob::shared("error", |_, _| anyhow::bail!("no such record")),
        vec![],
        Kwargs::new(),
    )
    .unwrap();
    pool.submit_keyed(
        "x",
        ClosureJob::shared("panic", |args, _| {
            let index = args[0].as_u64().unwrap() as usize;
            let empty: Vec<u8> = Vec::new();
            Ok(json!(empty[index]))
        }),
        vec![json!(3)],
        Kwargs::new(),
    )
    .unwrap();
    pool.submit_keyed(
        "x",
        ClosureJob::shared("ok", |_, kwargs| Ok(kwargs["greeting"].clone())),
        vec![],
        [("greeting".to_string(), json!("hello"))].into_iter().collect(),
    )
    .unwrap();
    pool.shutdown();

    let outcomes = drain(&rx);
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(|o| o.worker == outcomes[0].worker));
    assert!(outcomes
        .iter()
        .all(|o| o.key.as_ref().map(AffinityKey::as_str) == Some("x")));

    assert_eq!(outcomes[0].desc, "error");
    assert!(matches!(&outcomes[0].result, Err(TaskError::Failed(e)) if e.to_string() == "no such record"));
    assert_eq!(outcomes[1].desc, "panic");
    assert!(matches!(&outcomes[1].result, Err(TaskError::Panicked(_))));
    assert_eq!(outcomes[2].result.as_ref().unwrap(), &json!("hello"));
}

#[derive(Default)]
struct CountingObserver {
    started: AtomicUsize,
    finished: AtomicUsize,
    failed: AtomicUsize,
}

impl TaskObserver for CountingObserver {
    fn on_start(&self, _worker: usize, _task: &Task) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn on_finish(&self, outcome: &TaskOutcome) {
        self.finished.fetch_add(1, Ordering::SeqCst);
        if !outcome.is_ok() {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[test]
fn test_observer_sees_every_task() {
    let observer = Arc::new(CountingObserver::default());
    let pool = Pool::builder(config(2, 10))
        .observer(observer.clone())
        .build()
        .unwrap();

    for i in 0..8 {
        let job = if i == 5 {
            ClosureJob::shared("fails", |_, _| anyhow::bail!("nope"))
        } else {
            ClosureJob::shared("works", |_, _| Ok(Value::Null))
        };
        pool.submit(job, vec![], Kwargs::new()).unwrap();
    }
    pool.shutdown();

    assert_eq!(observer.started.load(Ordering::SeqCst), 8);
    assert_eq!(observer.finished.load(Ordering::SeqCst), 8);
    assert_eq!(observer.failed.load(Ordering::SeqCst), 1);
}

/// Panics in both hooks for tasks described as "bad".
struct FaultyObserver;

impl TaskObserver for FaultyObserver {
    fn on_start(&self, _worker: usize, task: &Task) {
        if task.desc() == "bad" {
            panic!("observer failed to start");
        }
    }

    fn on_finish(&self, outcome: &TaskOutcome) {
        if outcome.desc == "bad" {
            panic!("observer failed to finish");
        }
    }
}

#[test]
fn test_panicking_observer_does_not_kill_the_worker() {
    let recorder = Recorder::new();
    let (tx, rx) = async_channel::unbounded();
    let pool = Arc::new(
        Pool::builder(config(1, 10))
            .sink(tx)
            .observer(Arc::new(FaultyObserver))
            .build()
            .unwrap(),
    );

    pool.submit_keyed("k", recorder.job("bad"), vec![], Kwargs::new())
        .unwrap();
    let worker = pool
        .submit_keyed("k", recorder.job("good"), vec![], Kwargs::new())
        .unwrap();
    assert_eq!(worker, 0);

    let (idle_tx, idle_rx) = std::sync::mpsc::channel();
    let waiter = {
        let pool = pool.clone();
        thread::spawn(move || {
            pool.wait_idle();
            let _ = idle_tx.send(());
        })
    };
    idle_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("wait_idle must return once both tasks ran");
    waiter.join().unwrap();

    assert!(!pool.is_shut_down());
    pool.submit(recorder.job("after"), vec![], Kwargs::new())
        .unwrap();
    pool.shutdown();

    let labels: Vec<String> = recorder.entries().into_iter().map(|e| e.label).collect();
    assert_eq!(labels, ["bad", "good", "after"]);
    let outcomes = drain(&rx);
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(TaskOutcome::is_ok));
}

#[test]
fn test_wait_idle_keeps_pool_open() {
    let recorder = Recorder::new();
    let pool = Pool::new(config(2, 10)).unwrap();

    for i in 0..6 {
        pool.submit(recorder.job(format!("first-{i}")), vec![], Kwargs::new())
            .unwrap();
    }
    pool.wait_idle();
    assert_eq!(recorder.labels_with_prefix("first-").len(), 6);

    pool.submit(recorder.job("second"), vec![], Kwargs::new())
        .unwrap();
    pool.shutdown();
    assert_eq!(recorder.entries().len(), 7);
}

#[test]
fn test_pool_is_shared_between_submitting_threads() {
    let recorder = Recorder::new();
    let pool = Arc::new(Pool::new(config(4, 100)).unwrap());

    let submitters: Vec<_> = (0..4)
        .map(|t| {
            let pool = pool.clone();
            let recorder = recorder.clone();
            thread::spawn(move || {
                for i in 0..25 {
                    pool.submit_keyed(
                        format!("conn-{t}"),
                        recorder.job(format!("conn-{t}/{i:02}")),
                        vec![],
                        Kwargs::new(),
                    )
                    .unwrap();
                }
            })
        })
        .collect();
    for submitter in submitters {
        submitter.join().unwrap();
    }
    pool.shutdown();

    for t in 0..4 {
        let prefix = format!("conn-{t}/");
        assert_eq!(
            recorder.labels_with_prefix(&prefix),
            (0..25).map(|i| format!("{prefix}{i:02}")).collect::<Vec<_>>()
        );
        assert_eq!(recorder.threads_with_prefix(&prefix).len(), 1);
    }
}
