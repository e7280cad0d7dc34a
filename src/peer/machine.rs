//! Peripheral-side job state machine.
//!
//! Commands are answered synchronously by [`Peer::handle`]; digits are produced
//! by a separate compute thread. Both sides go through one mutex-guarded
//! [`JobState`], so a command never observes a half-written update.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

use log::{debug, info};

use crate::digits;
use crate::frame::{RawFrame, answer, decode_request};
use crate::proto::command::{AckStatus, Command};

pub type DigitFn = Arc<dyn Fn(u32) -> u8 + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Idle,
    Working,
    Done,
}

#[derive(Debug)]
struct JobState {
    mode: Mode,
    start: u8,
    progress: u8,
    results: Vec<u8>,
    /// Bumped on every accepted order so stale computations can tell they were dropped.
    generation: u64,
}

struct Shared {
    job: Mutex<JobState>,
    wake: Condvar,
    shutdown: AtomicBool,
    batch: u8,
    digit: DigitFn,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, JobState> {
        self.job.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A compute peripheral. Dropping it stops the compute thread.
pub struct Peer {
    shared: Arc<Shared>,
}

impl Peer {
    pub fn spawn(batch: u8, digit: DigitFn) -> Self {
        let shared = Arc::new(Shared {
            job: Mutex::new(JobState {
                mode: Mode::Idle,
                start: 0,
                progress: 0,
                results: vec![0; batch as usize],
                generation: 0,
            }),
            wake: Condvar::new(),
            shutdown: AtomicBool::new(false),
            batch,
            digit,
        });
        let worker = Arc::clone(&shared);
        thread::spawn(move || compute(worker));
        Self { shared }
    }

    /// Peer computing digits of pi.
    pub fn with_pi_digits(batch: u8) -> Self {
        Self::spawn(batch, Arc::new(digits::nth_digit))
    }

    pub fn batch(&self) -> u8 {
        self.shared.batch
    }

    pub fn mode(&self) -> Mode {
        self.shared.lock().mode
    }

    /// Handle one request frame and return it with ack (and data) filled in.
    pub fn handle(&self, request: RawFrame) -> RawFrame {
        let mut reply = request;
        match decode_request(&request) {
            Ok(cmd) => {
                let (ack, data) = self.apply(cmd);
                debug!("[peer] {} -> {:?}", cmd, ack);
                answer(&mut reply, ack, data);
            }
            Err(e) => {
                debug!("[peer] rejecting frame: {}", e);
                answer(&mut reply, AckStatus::Err, None);
            }
        }
        reply
    }

    fn apply(&self, cmd: Command) -> (AckStatus, Option<u8>) {
        let batch = self.shared.batch;
        let mut job = self.shared.lock();
        match cmd {
            Command::Ping => (AckStatus::Ok, None),
            Command::Status => (AckStatus::Ok, Some(job.progress)),
            Command::Order(n) => {
                if job.mode != Mode::Idle {
                    debug!("[peer] cannot accept work, not idle");
                    return (AckStatus::Err, None);
                }
                job.start = n;
                job.progress = 0;
                job.results.iter_mut().for_each(|r| *r = 0);
                job.mode = Mode::Working;
                job.generation += 1;
                drop(job);
                self.shared.wake.notify_all();
                (AckStatus::Ok, None)
            }
            Command::Result(idx) => {
                if job.mode != Mode::Done || idx == 0 || idx > batch {
                    return (AckStatus::Err, None);
                }
                (AckStatus::Ok, Some(job.results[idx as usize - 1]))
            }
            Command::Reset => {
                if job.mode != Mode::Done {
                    return (AckStatus::Err, None);
                }
                job.mode = Mode::Idle;
                (AckStatus::Ok, None)
            }
            Command::Cancel => {
                if job.mode == Mode::Idle {
                    return (AckStatus::Err, None);
                }
                info!("[peer] job {} cancelled at {}/{}", job.start, job.progress, batch);
                job.mode = Mode::Idle;
                (AckStatus::Ok, None)
            }
        }
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.wake.notify_all();
    }
}

fn compute(shared: Arc<Shared>) {
    let batch = shared.batch;
    let mut seen = 0u64;
    loop {
        let (generation, first) = {
            let mut job = shared.lock();
            loop {
                if shared.shutdown.load(Ordering::Acquire) {
                    return;
                }
                if job.mode == Mode::Working && job.generation != seen {
                    break;
                }
                job = shared
                    .wake
                    .wait(job)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            seen = job.generation;
            (job.generation, job.start as u32 * batch as u32 + 1)
        };
        debug!(
            "[peer] computing {} to {}",
            first,
            first + batch as u32 - 1
        );

        for i in 0..batch {
            if shared.shutdown.load(Ordering::Acquire) {
                return;
            }
            let digit = (shared.digit)(first + i as u32);
            let mut job = shared.lock();
            if job.generation != generation || job.mode != Mode::Working {
                break;
            }
            job.results[i as usize] = digit;
            job.progress = i + 1;
            if job.progress == batch {
                job.mode = Mode::Done;
                debug!("[peer] digits {:?}", job.results);
            }
        }
    }
}
