//! Fixed pool of worker slots, each bound to one bus transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use log::debug;
use thiserror::Error;

use crate::bus::{DeviceType, Endpoint, Transport};

/// Rescan interval while every slot is busy.
pub const ACQUIRE_POLL: Duration = Duration::from_millis(50);

pub type JobId = usize;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("no worker slot {0}")]
    NoSuchSlot(usize),
    #[error("worker {0} is already busy")]
    AlreadyBusy(usize),
    #[error("worker {0} has no transport bound")]
    Unbound(usize),
}

pub struct Worker {
    pub idx: usize,
    pub name: String,
    pub device_type: DeviceType,
    pub endpoint: Endpoint,
    /// Held for a whole request/ack round trip.
    transport: Option<Mutex<Box<dyn Transport>>>,
    busy: AtomicBool,
    pub job: Option<JobId>,
    pub stalls: u32,
}

impl Worker {
    fn vacant(idx: usize) -> Self {
        Self {
            idx,
            name: format!("worker{}", idx),
            device_type: DeviceType::Sim,
            endpoint: Endpoint::Local,
            transport: None,
            busy: AtomicBool::new(false),
            job: None,
            stalls: 0,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn is_bound(&self) -> bool {
        self.transport.is_some()
    }
}

pub struct WorkerPool {
    workers: Vec<Worker>,
}

impl WorkerPool {
    /// `num_workers` free, unbound slots with indices `0..num_workers`.
    pub fn create(num_workers: usize) -> Self {
        Self {
            workers: (0..num_workers).map(Worker::vacant).collect(),
        }
    }

    pub fn bind(
        &mut self,
        idx: usize,
        transport: Box<dyn Transport>,
        name: &str,
        device_type: DeviceType,
        endpoint: Endpoint,
    ) -> Result<(), PoolError> {
        let w = self.workers.get_mut(idx).ok_or(PoolError::NoSuchSlot(idx))?;
        debug!("[pool] slot {} -> {} ({})", idx, name, transport.describe());
        w.name = name.to_string();
        w.device_type = device_type;
        w.endpoint = endpoint;
        w.transport = Some(Mutex::new(transport));
        Ok(())
    }

    /// First free bound slot in index order, rescanning every [`ACQUIRE_POLL`]
    /// until `timeout` has elapsed. `skip` is passed over even when free.
    pub fn acquire_free(&self, timeout: Duration, skip: Option<usize>) -> Option<usize> {
        let start = Instant::now();
        loop {
            if let Some(w) = self
                .workers
                .iter()
                .find(|w| w.is_bound() && !w.is_busy() && Some(w.idx) != skip)
            {
                return Some(w.idx);
            }
            if start.elapsed() >= timeout {
                return None;
            }
            thread::sleep(ACQUIRE_POLL);
        }
    }

    pub fn claim(&self, idx: usize) -> Result<(), PoolError> {
        let w = self.get(idx).ok_or(PoolError::NoSuchSlot(idx))?;
        w.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| PoolError::AlreadyBusy(idx))
    }

    pub fn release(&self, idx: usize) -> Result<(), PoolError> {
        let w = self.get(idx).ok_or(PoolError::NoSuchSlot(idx))?;
        w.busy.store(false, Ordering::Release);
        Ok(())
    }

    /// Exclusive access to a slot's transport for one or more round trips.
    pub fn transport(&self, idx: usize) -> Result<MutexGuard<'_, Box<dyn Transport>>, PoolError> {
        let w = self.get(idx).ok_or(PoolError::NoSuchSlot(idx))?;
        let t = w.transport.as_ref().ok_or(PoolError::Unbound(idx))?;
        Ok(t.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn get(&self, idx: usize) -> Option<&Worker> {
        self.workers.get(idx)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut Worker> {
        self.workers.get_mut(idx)
    }

    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn any_busy(&self) -> bool {
        self.workers.iter().any(Worker::is_busy)
    }

    /// Close every transport.
    pub fn destroy(self) {
        for w in self.workers {
            if w.transport.is_some() {
                debug!("[pool] closing {}", w.name);
            }
        }
    }
}
