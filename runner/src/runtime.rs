use crate::distributed::comm::{CollectiveExt, CommError, Communicator};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// elapsed times at or below this many seconds count as "did no work"
pub const EPSILON: f64 = 1e-9;

/// Accumulators owned by a single worker, only combined through [`aggregate`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub rank: usize,
    /// total compute time spent inside confrontations, in seconds
    pub elapsed: f64,
    pub error: bool,
    pub completed: u64,
    pub cached: u64,
    pub failed: u64,
}

impl WorkerStats {
    pub fn new(rank: usize) -> Self {
        Self {
            rank,
            ..Default::default()
        }
    }

    pub fn record_completed(&mut self, elapsed: Duration) {
        self.elapsed += elapsed.as_secs_f64();
        self.completed += 1;
    }

    pub fn record_cached(&mut self) {
        self.cached += 1;
    }

    pub fn record_failed(&mut self) {
        self.error = true;
        self.failed += 1;
    }
}

/// Group wide view of a finished run, only available on the reporting worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub workers: Vec<WorkerStats>,
    /// wall clock time of the whole run in seconds
    pub wall_clock: f64,
}

impl RunMetrics {
    pub fn new(workers: Vec<WorkerStats>, wall_clock: Duration) -> Self {
        Self {
            workers,
            wall_clock: wall_clock.as_secs_f64(),
        }
    }

    pub fn elapsed(&self) -> impl Iterator<Item = f64> + '_ {
        self.workers.iter().map(|worker| worker.elapsed)
    }

    pub fn total_elapsed(&self) -> f64 {
        self.elapsed().sum()
    }

    /// `max(elapsed) / min(elapsed)`, `None` if some worker did (next to) no work
    pub fn load_balance(&self) -> Option<f64> {
        let min = self.elapsed().fold(f64::INFINITY, f64::min);
        let max = self.elapsed().fold(0.0, f64::max);

        if self.workers.is_empty() || min <= EPSILON {
            None
        } else {
            Some(max / min)
        }
    }

    /// `sum(elapsed) / (P * wall_clock)`, `None` without a measurable wall clock
    pub fn parallel_efficiency(&self) -> Option<f64> {
        let capacity = self.workers.len() as f64 * self.wall_clock;

        if capacity <= EPSILON {
            None
        } else {
            Some(self.total_elapsed() / capacity)
        }
    }

    /// number of workers whose error flag is set
    pub fn failing_workers(&self) -> usize {
        self.workers.iter().filter(|worker| worker.error).count()
    }

    pub fn failed_units(&self) -> u64 {
        self.workers.iter().map(|worker| worker.failed).sum()
    }

    pub fn has_errors(&self) -> bool {
        self.failing_workers() > 0
    }
}

/// gather the stats of every worker on `root`, other ranks get `None`
pub fn aggregate<C: Communicator + ?Sized>(
    comm: &C,
    stats: &WorkerStats,
    wall_clock: Duration,
    root: usize,
) -> Result<Option<RunMetrics>, CommError> {
    let gathered = comm.gather(stats, root)?;

    debug!(
        elapsed = stats.elapsed,
        error = stats.error,
        "Contributed runtime stats"
    );

    Ok(gathered.map(|workers| RunMetrics::new(workers, wall_clock)))
}
