use std::time::Instant;

use crate::dispatch::JobError;

/// Per-worker outcome counters for one run.
#[derive(Debug, Clone, Default)]
pub struct Tally {
    pub solved: u64,
    pub failed: u64,
    pub stalls: u64,
    pub last_failure: Option<String>,
}

impl Tally {
    pub fn inc_solved(&mut self) {
        self.solved += 1;
    }

    pub fn record(&mut self, err: &JobError) {
        self.failed += 1;
        if matches!(err, JobError::Stall { .. }) {
            self.stalls += 1;
        }
        self.last_failure = Some(err.to_string());
    }

    pub fn summary(&self, name: &str) -> String {
        format!(
            "{}: solved={} failed={} stalls={} last_failure={}",
            name,
            self.solved,
            self.failed,
            self.stalls,
            self.last_failure.as_deref().unwrap_or("none"),
        )
    }
}

/// Run-wide progress line, e.g. `Status: 12 / 30 (4.1s)`.
#[derive(Debug, Clone)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
    t0: Instant,
}

impl Progress {
    pub fn new(total: usize) -> Self {
        Self {
            completed: 0,
            total,
            t0: Instant::now(),
        }
    }

    pub fn inc(&mut self) {
        self.completed += 1;
    }

    pub fn line(&self) -> String {
        format!(
            "Status: {} / {} ({:.1}s)",
            self.completed,
            self.total,
            self.t0.elapsed().as_secs_f64()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tally_counts_stalls_separately() {
        let mut t = Tally::default();
        t.inc_solved();
        t.record(&JobError::Stall { job: 2, polls: 101 });
        t.record(&JobError::Cancelled { job: 3 });
        assert_eq!((t.solved, t.failed, t.stalls), (1, 2, 1));
        assert_eq!(t.last_failure.as_deref(), Some("job 3: cancelled"));
        assert!(t.summary("photon").starts_with("photon: solved=1 failed=2 stalls=1"));
    }

    #[test]
    fn progress_line() {
        let mut p = Progress::new(30);
        p.inc();
        assert!(p.line().starts_with("Status: 1 / 30 ("));
    }
}
