use anyhow::{Context, Result};
use log::{info, warn};
use std::io::BufRead;
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::Duration;

use crate::bus;
use crate::cli::{BusOpts, RunOpts, WorkerSpec};
use crate::console::{Console, TextGrid};
use crate::dispatch::{Control, Dca};
use crate::scheduler::WorkerPool;

const DASHBOARD_COL_WIDTH: usize = 42;
const DASHBOARD_INTERVAL: Duration = Duration::from_secs(1);

pub fn run(opts: RunOpts) -> Result<()> {
    let plan = opts.plan()?;
    let timing = opts.timing()?;
    let pool = open_pool(&opts.bus, plan.batch)?;

    let console = if opts.dashboard {
        Console::new(
            Box::new(TextGrid::new(3, DASHBOARD_COL_WIDTH)),
            DASHBOARD_INTERVAL,
        )
    } else {
        Console::quiet()
    };

    let mut dca = Dca::new(pool, plan, timing, console).with_deadline(opts.deadline());
    if opts.control {
        dca = dca.with_controls(spawn_stdin_controls(opts.bus.workers.clone()));
    }
    dca.run().context("dispatch loop")?;
    let results = dca.finish();
    println!("pi = {}", results.to_decimal());
    Ok(())
}

/// Operator lines from stdin, resolved against the worker names.
fn spawn_stdin_controls(workers: Vec<WorkerSpec>) -> Receiver<Control> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            match parse_control(&line, &workers) {
                Ok(Some(req)) => {
                    if tx.send(req).is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("[run] {}", e),
            }
        }
    });
    rx
}

/// `cancel <worker>`; blank lines are ignored.
pub fn parse_control(line: &str, workers: &[WorkerSpec]) -> Result<Option<Control>> {
    let mut words = line.split_whitespace();
    match (words.next(), words.next()) {
        (None, _) => Ok(None),
        (Some("cancel"), Some(name)) => workers
            .iter()
            .position(|w| w.name == name)
            .map(|idx| Some(Control::Cancel(idx)))
            .with_context(|| format!("no worker named {:?}", name)),
        _ => anyhow::bail!("unknown control line {:?} (expected `cancel <worker>`)", line.trim()),
    }
}

/// Open every configured worker. Any failure here aborts startup.
pub fn open_pool(opts: &BusOpts, batch: u8) -> Result<WorkerPool> {
    let mut pool = WorkerPool::create(opts.workers.len());
    for (idx, w) in opts.workers.iter().enumerate() {
        let transport = bus::open(w.device_type, &w.endpoint, &opts.bus, batch)
            .with_context(|| format!("opening {} ({} at {})", w.name, w.device_type, w.endpoint))?;
        info!("[run] {} -> {}", w.name, transport.describe());
        pool.bind(idx, transport, &w.name, w.device_type, w.endpoint.clone())?;
    }
    Ok(pool)
}
