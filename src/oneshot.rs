//! One-shot administrative requests: ping and cancel.

use anyhow::{Context, Result, bail};
use std::time::Duration;

use crate::bus;
use crate::cli::{OneShotOpts, WorkerSpec};
use crate::proto::efp::{self, EfpError};

/// Sim peers opened for a one-shot request never compute, so the batch size is irrelevant.
const ONESHOT_BATCH: u8 = 5;

pub fn ping(opts: OneShotOpts) -> Result<()> {
    let timeout = Duration::from_millis(opts.timeout_ms);
    let mut failed = 0;
    for w in &opts.bus.workers {
        match ping_worker(&opts.bus.bus, w, timeout) {
            Ok(()) => println!("{}: ok", w.name),
            Err(e) => {
                failed += 1;
                println!("{}: {:#}", w.name, e);
            }
        }
    }
    if failed > 0 {
        bail!("{} of {} workers unreachable", failed, opts.bus.workers.len());
    }
    Ok(())
}

pub fn cancel(opts: OneShotOpts) -> Result<()> {
    let timeout = Duration::from_millis(opts.timeout_ms);
    let mut failed = 0;
    for w in &opts.bus.workers {
        match cancel_worker(&opts.bus.bus, w, timeout) {
            Ok(true) => println!("{}: cancelled", w.name),
            Ok(false) => println!("{}: idle, nothing to cancel", w.name),
            Err(e) => {
                failed += 1;
                println!("{}: {:#}", w.name, e);
            }
        }
    }
    if failed > 0 {
        bail!("{} of {} workers did not answer", failed, opts.bus.workers.len());
    }
    Ok(())
}

pub fn ping_worker(bus_path: &str, w: &WorkerSpec, timeout: Duration) -> Result<()> {
    let mut port = bus::open(w.device_type, &w.endpoint, bus_path, ONESHOT_BATCH)
        .with_context(|| format!("opening {}", w.endpoint))?;
    efp::ping(&mut *port, timeout)?;
    Ok(())
}

/// `Ok(false)` when the peer refused because it had nothing running.
pub fn cancel_worker(bus_path: &str, w: &WorkerSpec, timeout: Duration) -> Result<bool> {
    let mut port = bus::open(w.device_type, &w.endpoint, bus_path, ONESHOT_BATCH)
        .with_context(|| format!("opening {}", w.endpoint))?;
    match efp::cancel(&mut *port, timeout) {
        Ok(()) => Ok(true),
        Err(EfpError::Rejected(_)) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(s: &str) -> WorkerSpec {
        s.parse().unwrap()
    }

    #[test]
    fn ping_sim_worker() {
        ping_worker("", &spec("s:sim"), Duration::from_millis(100)).unwrap();
    }

    #[test]
    fn cancel_on_idle_sim_is_not_an_error() {
        let cancelled = cancel_worker("", &spec("s:sim"), Duration::from_millis(100)).unwrap();
        assert!(!cancelled);
    }

    #[test]
    fn missing_device_is_reported() {
        let err = ping_worker(
            "",
            &spec("u:serial:/dev/does-not-exist-efp"),
            Duration::from_millis(10),
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("/dev/does-not-exist-efp"));
    }
}
