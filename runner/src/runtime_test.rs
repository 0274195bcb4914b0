use crate::{
    distributed::{comm::ROOT, Communicator, LocalGroup},
    runtime::{aggregate, RunMetrics, WorkerStats},
};
use std::time::Duration;

fn worker(rank: usize, elapsed: f64, error: bool) -> WorkerStats {
    WorkerStats {
        rank,
        elapsed,
        error,
        ..WorkerStats::new(rank)
    }
}

#[test]
pub fn balance_and_efficiency() {
    let metrics = RunMetrics::new(
        vec![worker(0, 2.0, false), worker(1, 4.0, false), worker(2, 6.0, true)],
        Duration::from_secs(8),
    );

    assert_eq!(metrics.load_balance(), Some(3.0));
    assert_eq!(metrics.parallel_efficiency(), Some(12.0 / 24.0));
    assert_eq!(metrics.failing_workers(), 1);
    assert!(metrics.has_errors());
}

#[test]
pub fn idle_worker_makes_balance_unavailable() {
    let metrics = RunMetrics::new(
        vec![worker(0, 0.0, false), worker(1, 4.0, false)],
        Duration::from_secs(4),
    );

    assert_eq!(metrics.load_balance(), None);
    assert_eq!(metrics.parallel_efficiency(), Some(0.5));
}

#[test]
pub fn zero_wall_clock_makes_efficiency_unavailable() {
    let metrics = RunMetrics::new(vec![worker(0, 1.0, false)], Duration::ZERO);

    assert_eq!(metrics.parallel_efficiency(), None);
}

#[test]
pub fn stats_accumulate_per_outcome() {
    let mut stats = WorkerStats::new(3);
    stats.record_completed(Duration::from_millis(1500));
    stats.record_completed(Duration::from_millis(500));
    stats.record_cached();
    stats.record_failed();

    assert_eq!(stats.elapsed, 2.0);
    assert_eq!((stats.completed, stats.cached, stats.failed), (2, 1, 1));
    assert!(stats.error);
}

#[test]
pub fn aggregate_collects_every_worker_on_root() {
    let results = LocalGroup::run(3, |comm| {
        let stats = worker(comm.rank(), comm.rank() as f64 + 1.0, comm.rank() == 1);

        aggregate(&comm, &stats, Duration::from_secs(3), ROOT).unwrap()
    });
    let results: Vec<_> = results.into_iter().map(Result::unwrap).collect();

    let metrics = results[0].as_ref().expect("root holds the metrics");
    assert_eq!(
        metrics.workers.iter().map(|worker| worker.rank).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert_eq!(metrics.total_elapsed(), 6.0);
    assert_eq!(metrics.failing_workers(), 1);
    assert_eq!(metrics.load_balance(), Some(3.0));
    assert!(results[1..].iter().all(Option::is_none));
}
