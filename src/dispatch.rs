//! Job dispatch loop.
//!
//! One control loop, one bus transaction at a time. Each pass hands the lowest
//! pending job to the first free worker, then polls every busy worker:
//! finished workers have their results collected, failing or stalled ones are
//! reset and their job goes back to the pending set. A job id is always in
//! exactly one place: pending, assigned to one worker, or completed.

use std::collections::BTreeSet;
use std::sync::mpsc::Receiver;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};
use thiserror::Error;

use crate::bus::{Transport, TransportError};
use crate::console::Console;
use crate::proto::efp::{self, EfpError};
use crate::scheduler::{JobId, PoolError, Worker, WorkerPool};
use crate::stats::{Progress, Tally};

/// Job ids travel in one byte.
pub const MAX_JOBS: usize = 256;

#[derive(Debug, Clone)]
pub struct Timing {
    pub acquire: Duration,
    pub order: Duration,
    pub reset: Duration,
    pub status: Duration,
    pub result: Duration,
    /// Sleep between poll passes.
    pub throttle: Duration,
    /// Polls without completion before a worker is forced back to idle.
    pub stall_limit: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            acquire: Duration::from_millis(500),
            order: Duration::from_millis(500),
            reset: Duration::from_millis(100),
            status: Duration::from_millis(5000),
            result: Duration::from_millis(100),
            throttle: Duration::from_millis(10),
            stall_limit: 100,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("batch size must be at least 1")]
    EmptyBatch,
    #[error("job count must be within 1..={MAX_JOBS}, got {0}")]
    JobCount(usize),
}

/// Shape of the work: `jobs` batches of `batch` digits each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
    pub batch: u8,
    pub jobs: usize,
}

impl Plan {
    pub fn new(batch: u8, jobs: usize) -> Result<Self, PlanError> {
        if batch == 0 {
            return Err(PlanError::EmptyBatch);
        }
        if jobs == 0 || jobs > MAX_JOBS {
            return Err(PlanError::JobCount(jobs));
        }
        Ok(Self { batch, jobs })
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job {job}: order failed: {source}")]
    Dispatch {
        job: JobId,
        #[source]
        source: EfpError,
    },
    #[error("job {job}: result fetch failed: {source}")]
    Fetch {
        job: JobId,
        #[source]
        source: EfpError,
    },
    #[error("job {job}: no completion after {polls} polls")]
    Stall { job: JobId, polls: u32 },
    #[error("job {job}: cancelled")]
    Cancelled { job: JobId },
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no worker has a transport bound")]
    NoWorkers,
    #[error("deadline of {limit:?} reached: {pending} jobs pending, {assigned} assigned")]
    Deadline {
        limit: Duration,
        pending: usize,
        assigned: usize,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResultError {
    #[error("job {0} is outside the result buffer")]
    OutOfRange(JobId),
    #[error("job {0} results already written")]
    AlreadyWritten(JobId),
    #[error("job {job}: expected {expected} digits, got {got}")]
    Length {
        job: JobId,
        expected: usize,
        got: usize,
    },
}

/// Final digit sequence, one slot of `batch` digits per job, each written once.
#[derive(Debug, Clone)]
pub struct ResultBuffer {
    batch: usize,
    digits: Vec<u8>,
    written: Vec<bool>,
}

impl ResultBuffer {
    pub fn new(jobs: usize, batch: usize) -> Self {
        Self {
            batch,
            digits: vec![0; jobs * batch],
            written: vec![false; jobs],
        }
    }

    pub fn fill(&mut self, job: JobId, digits: &[u8]) -> Result<(), ResultError> {
        let slot = self.written.get_mut(job).ok_or(ResultError::OutOfRange(job))?;
        if *slot {
            return Err(ResultError::AlreadyWritten(job));
        }
        if digits.len() != self.batch {
            return Err(ResultError::Length {
                job,
                expected: self.batch,
                got: digits.len(),
            });
        }
        *slot = true;
        let at = job * self.batch;
        self.digits[at..at + self.batch].copy_from_slice(digits);
        Ok(())
    }

    pub fn written_count(&self) -> usize {
        self.written.iter().filter(|w| **w).count()
    }

    /// `3.` followed by the digits, `?` for anything that is not a digit.
    pub fn to_decimal(&self) -> String {
        let mut s = String::from("3.");
        s.extend(
            self.digits
                .iter()
                .map(|d| char::from_digit(*d as u32, 10).unwrap_or('?')),
        );
        s
    }
}

/// Job ids not yet handed to any worker. Lowest id goes out first.
#[derive(Debug, Clone)]
pub struct JobBook {
    pending: BTreeSet<JobId>,
}

impl JobBook {
    pub fn new(jobs: usize) -> Self {
        Self {
            pending: (0..jobs).collect(),
        }
    }

    pub fn next(&self) -> Option<JobId> {
        self.pending.first().copied()
    }

    pub fn take(&mut self, job: JobId) -> bool {
        self.pending.remove(&job)
    }

    /// Returns false if the job was already pending.
    pub fn requeue(&mut self, job: JobId) -> bool {
        self.pending.insert(job)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Operator requests delivered to a running loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Abort the job on this worker slot and requeue it.
    Cancel(usize),
}

/// Everything one run owns: the pool, the job book, the results and the console.
pub struct Dca {
    pool: WorkerPool,
    plan: Plan,
    timing: Timing,
    book: JobBook,
    results: ResultBuffer,
    tallies: Vec<Tally>,
    progress: Progress,
    console: Console,
    deadline: Option<Duration>,
    started: Instant,
    controls: Option<Receiver<Control>>,
    /// Slot whose last order failed; passed over for one dispatch.
    cooldown: Option<usize>,
}

impl Dca {
    pub fn new(pool: WorkerPool, plan: Plan, timing: Timing, console: Console) -> Self {
        let tallies = vec![Tally::default(); pool.len()];
        Self {
            book: JobBook::new(plan.jobs),
            results: ResultBuffer::new(plan.jobs, plan.batch as usize),
            progress: Progress::new(plan.jobs),
            pool,
            plan,
            timing,
            tallies,
            console,
            deadline: None,
            started: Instant::now(),
            controls: None,
            cooldown: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_controls(mut self, controls: Receiver<Control>) -> Self {
        self.controls = Some(controls);
        self
    }

    /// Loop until every job is completed.
    pub fn run(&mut self) -> Result<(), DispatchError> {
        if !self.pool.workers().iter().any(Worker::is_bound) {
            return Err(DispatchError::NoWorkers);
        }
        self.started = Instant::now();
        self.console.system(format!(
            "Dispatching {} jobs of {} digits to {} workers",
            self.plan.jobs,
            self.plan.batch,
            self.pool.len()
        ));

        while !self.is_finished() {
            if let Some(limit) = self.deadline
                && self.started.elapsed() > limit
            {
                return Err(DispatchError::Deadline {
                    limit,
                    pending: self.book.len(),
                    assigned: self.assigned(),
                });
            }
            self.step();
        }

        let line = format!(
            "Computation complete: {} of {} jobs collected",
            self.results.written_count(),
            self.plan.jobs
        );
        self.console.system(line);
        for idx in 0..self.pool.len() {
            let line = self.tallies[idx].summary(&self.name(idx));
            self.console.result(line);
        }
        self.console.render();
        Ok(())
    }

    /// One pass: apply operator requests, dispatch at most one job, poll every
    /// busy worker, throttle.
    pub fn step(&mut self) {
        self.apply_controls();
        self.dispatch();
        self.poll();
        self.console.maybe_render();
        thread::sleep(self.timing.throttle);
    }

    pub fn is_finished(&self) -> bool {
        self.book.is_empty() && !self.pool.any_busy()
    }

    /// Externally triggered abort of whatever `idx` is computing.
    /// The job goes back to the pending set.
    pub fn cancel_worker(&mut self, idx: usize) -> Result<(), PoolError> {
        let w = self.pool.get(idx).ok_or(PoolError::NoSuchSlot(idx))?;
        let Some(job) = w.job else {
            return Ok(());
        };
        if let Err(e) = self.round_trip(idx, |port| efp::cancel(port, self.timing.reset)) {
            let line = format!("{}: cancel not acknowledged: {}", self.name(idx), e);
            self.console.warn(line);
        }
        if let Some(w) = self.pool.get_mut(idx) {
            w.job = None;
            w.stalls = 0;
        }
        self.pool.release(idx)?;
        self.book.requeue(job);
        self.fail(idx, JobError::Cancelled { job });
        Ok(())
    }

    /// Close the transports and hand back the results.
    pub fn finish(self) -> ResultBuffer {
        self.pool.destroy();
        self.results
    }

    fn apply_controls(&mut self) {
        let Some(rx) = &self.controls else {
            return;
        };
        let requests: Vec<Control> = rx.try_iter().collect();
        for req in requests {
            match req {
                Control::Cancel(idx) => {
                    if let Err(e) = self.cancel_worker(idx) {
                        warn!("[dispatch] cancel: {}", e);
                    }
                }
            }
        }
    }

    fn assigned(&self) -> usize {
        self.pool.workers().iter().filter(|w| w.job.is_some()).count()
    }

    fn name(&self, idx: usize) -> String {
        self.pool
            .get(idx)
            .map(|w| w.name.clone())
            .unwrap_or_else(|| format!("worker{}", idx))
    }

    /// Run `f` holding the worker's transport for its whole duration.
    fn round_trip<T>(
        &self,
        idx: usize,
        f: impl FnOnce(&mut dyn Transport) -> Result<T, EfpError>,
    ) -> Result<T, EfpError> {
        let mut port = self.pool.transport(idx).map_err(|e| {
            EfpError::Transport(TransportError::Open {
                target: self.name(idx),
                reason: e.to_string(),
            })
        })?;
        f(&mut **port)
    }

    fn dispatch(&mut self) {
        let Some(job) = self.book.next() else {
            return;
        };
        let skip = self.cooldown.take();
        let Some(idx) = self.pool.acquire_free(self.timing.acquire, skip) else {
            return;
        };
        if let Err(e) = self.pool.claim(idx) {
            self.console.warn(format!("dispatch: {}", e));
            return;
        }
        let name = self.name(idx);

        let ordered = self.round_trip(idx, |port| {
            // Clears a finished job nobody collected; an idle peer answers Err.
            if let Err(e) = efp::reset(port, self.timing.reset) {
                debug!("[dispatch] {} pre-order reset: {}", name, e);
            }
            // Plan caps job ids below MAX_JOBS, so the id fits the data byte.
            efp::order(port, job as u8, self.timing.order)
        });

        match ordered {
            Ok(()) => {
                self.book.take(job);
                if let Some(w) = self.pool.get_mut(idx) {
                    w.job = Some(job);
                    w.stalls = 0;
                }
                self.console
                    .system(format!("Ordered {} to compute from start index {}", name, job));
            }
            Err(source) => {
                let _ = self.pool.release(idx);
                self.cooldown = Some(idx);
                self.fail(idx, JobError::Dispatch { job, source });
            }
        }
    }

    fn poll(&mut self) {
        for idx in 0..self.pool.len() {
            let Some(w) = self.pool.get(idx) else {
                continue;
            };
            if !w.is_busy() {
                continue;
            }
            match w.job {
                Some(job) => self.poll_worker(idx, job),
                None => {
                    let line = format!("{} busy without a job, releasing", w.name);
                    self.console.warn(line);
                    let _ = self.pool.release(idx);
                }
            }
        }
    }

    fn poll_worker(&mut self, idx: usize, job: JobId) {
        let batch = self.plan.batch;
        match self.round_trip(idx, |port| efp::status(port, self.timing.status)) {
            Ok(p) if p == batch => self.collect(idx, job),
            Ok(p) => self.stall_tick(idx, job, format!("progress {}/{}", p, batch)),
            Err(e) => self.stall_tick(idx, job, e.to_string()),
        }
    }

    fn collect(&mut self, idx: usize, job: JobId) {
        let name = self.name(idx);
        let batch = self.plan.batch;
        self.console.system(format!("The {} has finished", name));

        let fetched = self.round_trip(idx, |port| {
            efp::result_range(port, 1, batch, self.timing.result)
        });
        match fetched {
            Ok(digits) => {
                if let Err(e) = self.results.fill(job, &digits) {
                    self.console.warn(format!("{}: {}", name, e));
                    self.free_worker(idx);
                    return;
                }
                self.free_worker(idx);
                self.tallies[idx].inc_solved();
                self.progress.inc();
                let shown: String = digits
                    .iter()
                    .map(|d| char::from_digit(*d as u32, 10).unwrap_or('?'))
                    .collect();
                self.console
                    .result(format!("job {} by {}: {}", job, name, shown));
                let line = self.progress.line();
                self.console.system(line);
            }
            Err(source) => {
                self.console.warn(format!(
                    "An error occurred fetching results from {}. Releasing to queue",
                    name
                ));
                self.requeue(idx, job, JobError::Fetch { job, source });
            }
        }
    }

    fn stall_tick(&mut self, idx: usize, job: JobId, why: String) {
        let limit = self.timing.stall_limit;
        let Some(w) = self.pool.get_mut(idx) else {
            return;
        };
        w.stalls += 1;
        let polls = w.stalls;
        let line = format!("{}: job {} {} (stall {}/{})", w.name, job, why, polls, limit);
        self.console.bus(line);
        if polls > limit {
            self.requeue(idx, job, JobError::Stall { job, polls });
        }
    }

    /// Reset the peer and give the slot back to the pool.
    fn free_worker(&mut self, idx: usize) {
        if let Err(e) = self.round_trip(idx, |port| efp::reset(port, self.timing.reset)) {
            let line = format!("{}: reset: {}", self.name(idx), e);
            self.console.bus(line);
        }
        if let Some(w) = self.pool.get_mut(idx) {
            w.job = None;
            w.stalls = 0;
        }
        let _ = self.pool.release(idx);
    }

    fn requeue(&mut self, idx: usize, job: JobId, err: JobError) {
        self.free_worker(idx);
        if !self.book.requeue(job) {
            self.console
                .warn(format!("job {} was already pending when requeued", job));
        }
        self.fail(idx, err);
    }

    fn fail(&mut self, idx: usize, err: JobError) {
        let line = format!("{}: {}", self.name(idx), err);
        self.console.warn(line);
        if let Some(t) = self.tallies.get_mut(idx) {
            t.record(&err);
        }
    }
}
