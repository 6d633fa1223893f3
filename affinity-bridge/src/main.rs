// SPDX-License-Identifier: MIT
// affinityd: runs JSON calls on a key-affine worker pool
//
// - Reads one call per line from stdin.
// - Calls with the same key run on the same worker, in input order.
// - Prints one JSON reply per finished call to stdout.
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::io::BufRead;
use std::sync::Arc;
use std::thread;

use clap::Parser;
use log::{debug, info, warn};

use affinity_bridge::global_config::{self, GlobalConfig};
use affinity_bridge::{BridgeConfig, LoopThread, Pool, PoolConfig};

pub mod actions;

use crate::actions::action::{parse_call, render_outcome};
use crate::actions::handle_action::{dispatch_call, Handlers};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Number of worker threads
    #[arg(long, env = "AFFINITY_WORKERS", default_value_t = 4)]
    workers: usize,

    /// Keys each worker keeps affinity for (0 disables affinity)
    #[arg(long, env = "AFFINITY_MAX_WATCHING", default_value_t = 100)]
    max_watching: usize,

    /// Upper bound of threads running blocking operations for async callers
    #[arg(long, env = "BRIDGE_THREADS")]
    bridge_threads: Option<usize>,

    /// Give up waiting on bridged calls after this many milliseconds
    #[arg(long, env = "BRIDGE_TIMEOUT_MS")]
    bridge_timeout_ms: Option<u64>,
}

fn validate_args(args: &Args) -> Result<(), String> {
    if args.workers == 0 {
        return Err("--workers must be at least 1".into());
    }
    if args.bridge_threads == Some(0) {
        return Err("--bridge-threads must be at least 1".into());
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Err(e) = validate_args(&args) {
        eprintln!("Error: {e}");
        std::process::exit(2);
    }

    let mut bridge = BridgeConfig::default();
    if let Some(threads) = args.bridge_threads {
        bridge.executor_threads = threads;
    }
    bridge.timeout_ms = args.bridge_timeout_ms;
    let config = GlobalConfig {
        pool: PoolConfig {
            workers: args.workers,
            max_watching: args.max_watching,
        },
        bridge,
    };
    debug!("Effective configuration: {}", serde_json::to_string(&config)?);
    global_config::initialize_global_config(config)?;

    let mut home = LoopThread::start("home")?;
    let handlers = Arc::new(Handlers::new(home.handle()));

    let (sink_tx, sink_rx) = async_channel::unbounded();
    let pool = Pool::builder(global_config::get_pool_config())
        .sink(sink_tx)
        .build()?;

    let printer = thread::spawn(move || {
        while let Ok(outcome) = sink_rx.recv_blocking() {
            match render_outcome(&outcome) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!("Failed to render reply: {e:#}"),
            }
        }
    });

    info!("Starting affinityd, reading calls from stdin");
    for line in std::io::stdin().lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_call(&line) {
            Ok(call) => {
                if let Err(e) = dispatch_call(&pool, &handlers, call) {
                    warn!("Failed to submit call: {e}");
                }
            }
            Err(e) => warn!("{e:#}"),
        }
    }

    info!("Stopping affinityd");
    pool.shutdown();
    drop(pool);
    if printer.join().is_err() {
        warn!("Reply printer terminated abnormally");
    }
    home.close();
    home.wait_until_finished();

    Ok(())
}
