pub mod comm;
pub mod election;
pub mod local;
pub mod util;

#[cfg(test)]
mod election_test;
#[cfg(test)]
mod local_test;

/*
 * Coordination model of a run:
 * 1. Every worker builds the same (task x model) work list without talking to anyone
 * 2. Masters are elected per task with a single gather + broadcast round
 * 3. Phases are separated by full-group barriers, never by point-to-point messages
 * 4. Errors only leave a worker as aggregated flags, details go to the shared log
 *
 * The transport is hidden behind `comm::Communicator`, `local::LocalGroup` runs all ranks as
 * threads of one process.
 */

pub use comm::{CollectiveExt, CommError, Communicator};
pub use local::{LocalComm, LocalGroup};
