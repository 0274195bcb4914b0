use super::comm::{CollectiveExt, CommError, Communicator, ROOT};
use crate::work::{Task, WorkUnit};
use tracing::{debug, info};

/// number of units per task in `units`
pub fn local_counts(tasks: usize, units: &[WorkUnit]) -> Vec<u64> {
    units.iter().fold(vec![0; tasks], |mut counts, unit| {
        counts[unit.task] += 1;
        counts
    })
}

/// rank with the most units, the lowest rank wins ties
///
/// An all-zero (or empty) vector resolves to rank 0. That happens for a task no worker holds a
/// unit of and is kept as the fallback, the task then still has exactly one master.
pub fn first_argmax(counts: &[u64]) -> usize {
    counts
        .iter()
        .enumerate()
        .fold((0, 0), |(best, best_count), (rank, &count)| {
            if count > best_count {
                (rank, count)
            } else {
                (best, best_count)
            }
        })
        .0
}

/// turn per-rank rows of per-task counts into per-task rows of per-rank counts
fn transpose(per_rank: Vec<Vec<u64>>, tasks: usize) -> Vec<Vec<u64>> {
    (0..tasks)
        .map(|task| {
            per_rank
                .iter()
                .map(|counts| counts.get(task).copied().unwrap_or(0))
                .collect()
        })
        .collect()
}

/// Elect the master of every task with one gather and one broadcast
///
/// The root gathers the local counts and broadcasts the complete `[task][rank]` matrix instead
/// of the winners, every rank then derives the same winners on its own. Returns the master rank
/// per task.
pub fn elect_masters<C: Communicator + ?Sized>(
    comm: &C,
    tasks: &mut [Task],
    local: &[WorkUnit],
) -> Result<Vec<usize>, CommError> {
    let counts = local_counts(tasks.len(), local);
    let gathered = comm.gather(&counts, ROOT)?;
    let matrix = gathered.map(|per_rank| transpose(per_rank, tasks.len()));
    let matrix: Vec<Vec<u64>> = comm.broadcast(matrix.as_ref(), ROOT)?;

    let masters: Vec<usize> = matrix.iter().map(|counts| first_argmax(counts)).collect();

    for (task, &master) in tasks.iter_mut().zip(masters.iter()) {
        task.master = master == comm.rank();

        if task.master {
            info!(task = %task.name, "This worker is master");
        }
    }

    debug!(masters = ?masters, "Finished master election");

    Ok(masters)
}
