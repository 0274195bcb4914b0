use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tracing::error;

/// Rank that gathers counts and metrics and broadcasts decisions
pub const ROOT: usize = 0;

#[derive(Error, Debug)]
pub enum CommError {
    #[error("Root rank {root} is outside of a group of size {size}")]
    InvalidRoot { root: usize, size: usize },
    #[error("Worker group was aborted by a failing peer")]
    Aborted,
    #[error("Rank {0} did not contribute to a collective it was expected in")]
    MissingContribution(usize),
    #[error("Failed to encode or decode a collective payload")]
    Payload(#[from] serde_json::Error),
}

/// Byte level collective primitives of a fixed group of workers
///
/// Every rank has to call the same collectives in the same order, a rank that skips one leaves
/// its peers waiting. Payloads are opaque, typed access is provided by [`CollectiveExt`].
pub trait Communicator: Send + Sync {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// block until every rank of the group reached the barrier
    fn barrier(&self) -> Result<(), CommError>;

    /// collect one payload per rank on `root`, indexed by rank; other ranks receive `None`
    fn gather_bytes(&self, send: Vec<u8>, root: usize) -> Result<Option<Vec<Vec<u8>>>, CommError>;

    /// distribute the payload of `root` to every rank; `send` is ignored on other ranks
    fn broadcast_bytes(&self, send: Option<Vec<u8>>, root: usize) -> Result<Vec<u8>, CommError>;

    fn is_root(&self) -> bool {
        self.rank() == ROOT
    }

    fn check_root(&self, root: usize) -> Result<(), CommError> {
        if root < self.size() {
            Ok(())
        } else {
            Err(CommError::InvalidRoot {
                root,
                size: self.size(),
            })
        }
    }
}

/// Typed collectives on top of [`Communicator`], payloads are encoded as JSON
pub trait CollectiveExt: Communicator {
    fn gather<T: Serialize + DeserializeOwned>(
        &self,
        value: &T,
        root: usize,
    ) -> Result<Option<Vec<T>>, CommError> {
        match self.gather_bytes(serde_json::to_vec(value)?, root)? {
            Some(payloads) => payloads
                .iter()
                .map(|payload| serde_json::from_slice(payload).map_err(CommError::from))
                .collect::<Result<Vec<T>, CommError>>()
                .map(Some),
            None => Ok(None),
        }
    }

    fn broadcast<T: Serialize + DeserializeOwned>(
        &self,
        value: Option<&T>,
        root: usize,
    ) -> Result<T, CommError> {
        let send = if self.rank() == root {
            match value {
                Some(value) => Some(serde_json::to_vec(value)?),
                None => {
                    error!(root, "Broadcast root has no value to distribute");

                    return Err(CommError::MissingContribution(root));
                }
            }
        } else {
            None
        };

        Ok(serde_json::from_slice(&self.broadcast_bytes(send, root)?)?)
    }

    /// fold the values of all ranks on `root` in rank order
    fn reduce<T, F>(&self, value: &T, root: usize, op: F) -> Result<Option<T>, CommError>
    where
        T: Serialize + DeserializeOwned,
        F: Fn(T, T) -> T,
    {
        Ok(self
            .gather(value, root)?
            .and_then(|values| values.into_iter().reduce(op)))
    }

    /// collective agreement: true on every rank iff every rank passed true
    ///
    /// Used before the work loop so that a configuration problem seen by one worker stops all
    /// of them instead of leaving the others waiting at the next barrier.
    fn all_agree(&self, ok: bool) -> Result<bool, CommError> {
        let verdict = self.reduce(&ok, ROOT, |left, right| left && right)?;

        self.broadcast(verdict.as_ref(), ROOT)
    }
}

impl<C: Communicator + ?Sized> CollectiveExt for C {}
