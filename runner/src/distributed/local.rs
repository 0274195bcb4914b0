use super::comm::{CommError, Communicator};
use parking_lot::{Condvar, Mutex};
use std::{
    any::Any,
    sync::Arc,
    thread,
};
use tracing::{debug, error};

/// Contributions of every rank for a single collective round, indexed by rank
type Round = Arc<Vec<Option<Vec<u8>>>>;

#[derive(Debug)]
struct Rendezvous {
    /// number of completed rounds, waiters watch it to detect completion
    generation: u64,
    arrived: usize,
    slots: Vec<Option<Vec<u8>>>,
    /// contributions of the last completed round
    published: Round,
    poisoned: bool,
}

#[derive(Debug)]
struct Shared {
    size: usize,
    state: Mutex<Rendezvous>,
    cond: Condvar,
}

/// In-process worker group, every rank is a thread and every collective a rendezvous
///
/// All collectives are built on one primitive: each rank deposits an optional payload, the last
/// rank to arrive publishes the round and wakes the others. A round can't be overwritten before
/// every rank has read it since the next round needs all ranks to arrive again.
#[derive(Debug, Clone)]
pub struct LocalGroup {
    shared: Arc<Shared>,
}

/// Handle of a single rank inside a [`LocalGroup`]
#[derive(Debug)]
pub struct LocalComm {
    rank: usize,
    shared: Arc<Shared>,
}

impl LocalGroup {
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "a worker group needs at least one rank");

        Self {
            shared: Arc::new(Shared {
                size,
                state: Mutex::new(Rendezvous {
                    generation: 0,
                    arrived: 0,
                    slots: vec![None; size],
                    published: Arc::new(Vec::new()),
                    poisoned: false,
                }),
                cond: Condvar::new(),
            }),
        }
    }

    pub fn size(&self) -> usize {
        self.shared.size
    }

    /// hand out one communicator per rank, in rank order
    pub fn communicators(&self) -> Vec<LocalComm> {
        (0..self.shared.size)
            .map(|rank| LocalComm {
                rank,
                shared: self.shared.clone(),
            })
            .collect()
    }

    /// run `worker` once per rank on its own thread and collect the results in rank order
    ///
    /// A worker that panics or returns early poisons the group, its peers get
    /// `CommError::Aborted` from their next collective instead of waiting forever.
    pub fn run<F, R>(size: usize, worker: F) -> Vec<thread::Result<R>>
    where
        F: Fn(LocalComm) -> R + Sync,
        R: Send,
    {
        let group = Self::new(size);
        let worker = &worker;

        thread::scope(|scope| {
            let handles = group
                .communicators()
                .into_iter()
                .map(|comm| {
                    thread::Builder::new()
                        .name(format!("worker-{}", comm.rank))
                        .spawn_scoped(scope, move || worker(comm))
                })
                .collect::<Vec<_>>();

            handles
                .into_iter()
                .map(|handle| match handle {
                    Ok(handle) => handle.join(),
                    Err(error) => {
                        // the communicator moved into the failed spawn is dropped, which already
                        // aborts the group for every spawned peer
                        error!(error = ?error, "Failed to spawn worker thread");

                        Err(Box::new(error) as Box<dyn Any + Send>)
                    }
                })
                .collect()
        })
    }
}

impl Shared {
    fn poison(&self) {
        let mut state = self.state.lock();
        state.poisoned = true;
        self.cond.notify_all();
    }

    fn exchange(&self, rank: usize, payload: Option<Vec<u8>>) -> Result<Round, CommError> {
        let mut state = self.state.lock();

        if state.poisoned {
            return Err(CommError::Aborted);
        }

        let generation = state.generation;
        state.slots[rank] = payload;
        state.arrived += 1;

        if state.arrived == self.size {
            let slots = std::mem::replace(&mut state.slots, vec![None; self.size]);
            state.published = Arc::new(slots);
            state.arrived = 0;
            state.generation += 1;
            self.cond.notify_all();

            return Ok(state.published.clone());
        }

        while state.generation == generation && !state.poisoned {
            self.cond.wait(&mut state);
        }

        if state.generation == generation {
            Err(CommError::Aborted)
        } else {
            Ok(state.published.clone())
        }
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn barrier(&self) -> Result<(), CommError> {
        self.shared.exchange(self.rank, None).map(|_| ())
    }

    fn gather_bytes(&self, send: Vec<u8>, root: usize) -> Result<Option<Vec<Vec<u8>>>, CommError> {
        self.check_root(root)?;
        let round = self.shared.exchange(self.rank, Some(send))?;

        if self.rank != root {
            return Ok(None);
        }

        round
            .iter()
            .enumerate()
            .map(|(rank, payload)| payload.clone().ok_or(CommError::MissingContribution(rank)))
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    fn broadcast_bytes(&self, send: Option<Vec<u8>>, root: usize) -> Result<Vec<u8>, CommError> {
        self.check_root(root)?;
        let send = if self.rank == root { send } else { None };
        let round = self.shared.exchange(self.rank, send)?;

        round
            .get(root)
            .cloned()
            .flatten()
            .ok_or(CommError::MissingContribution(root))
    }
}

impl Drop for LocalComm {
    /// a rank that is gone can't join any further collective, waiting peers are released
    fn drop(&mut self) {
        if thread::panicking() {
            debug!(rank = self.rank, "Worker panicked, aborting the group");
        }

        self.shared.poison();
    }
}
