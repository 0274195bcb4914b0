use super::{
    comm::{CollectiveExt, CommError, Communicator, ROOT},
    local::LocalGroup,
};
use std::sync::atomic::{AtomicUsize, Ordering};

#[test]
pub fn barrier_waits_for_every_rank() {
    let before = AtomicUsize::new(0);

    let results = LocalGroup::run(4, |comm| {
        before.fetch_add(1, Ordering::SeqCst);
        comm.barrier().unwrap();

        // nobody passes the barrier before everyone arrived
        before.load(Ordering::SeqCst)
    });

    for result in results {
        assert_eq!(result.unwrap(), 4);
    }
}

#[test]
pub fn gather_orders_by_rank_on_root_only() {
    let results = LocalGroup::run(3, |comm| {
        let value = comm.rank() as u64 * 10;
        comm.gather(&value, ROOT).unwrap()
    });

    let results: Vec<_> = results.into_iter().map(Result::unwrap).collect();
    assert_eq!(results[0], Some(vec![0, 10, 20]));
    assert_eq!(results[1], None);
    assert_eq!(results[2], None);
}

#[test]
pub fn gather_to_non_zero_root() {
    let results = LocalGroup::run(3, |comm| comm.gather(&comm.rank(), 2).unwrap());
    let results: Vec<_> = results.into_iter().map(Result::unwrap).collect();

    assert_eq!(results, vec![None, None, Some(vec![0, 1, 2])]);
}

#[test]
pub fn broadcast_reaches_every_rank() {
    let results = LocalGroup::run(5, |comm| {
        let value = (comm.rank() == 1).then(|| String::from("from one"));
        comm.broadcast(value.as_ref(), 1).unwrap()
    });

    for result in results {
        assert_eq!(result.unwrap(), "from one");
    }
}

#[test]
pub fn reduce_folds_in_rank_order() {
    let results = LocalGroup::run(4, |comm| {
        comm.reduce(&(comm.rank() as f64 + 1.0), ROOT, f64::max)
            .unwrap()
    });
    let results: Vec<_> = results.into_iter().map(Result::unwrap).collect();

    assert_eq!(results[0], Some(4.0));
    assert!(results[1..].iter().all(Option::is_none));
}

#[test]
pub fn all_agree_is_a_logical_and() {
    let all_ok = LocalGroup::run(3, |comm| comm.all_agree(true).unwrap());
    assert!(all_ok.into_iter().all(|result| result.unwrap()));

    let one_failing = LocalGroup::run(3, |comm| comm.all_agree(comm.rank() != 2).unwrap());
    assert!(one_failing.into_iter().all(|result| !result.unwrap()));
}

#[test]
pub fn consecutive_collectives_do_not_mix() {
    let results = LocalGroup::run(4, |comm| {
        let mut seen = Vec::new();

        for round in 0..20u64 {
            let value = (comm.rank() == 0).then_some(round);
            seen.push(comm.broadcast(value.as_ref(), ROOT).unwrap());
            comm.barrier().unwrap();
        }

        seen
    });

    for result in results {
        assert_eq!(result.unwrap(), (0..20).collect::<Vec<u64>>());
    }
}

#[test]
pub fn single_rank_group() {
    let results = LocalGroup::run(1, |comm| {
        comm.barrier().unwrap();
        let gathered = comm.gather(&7u8, ROOT).unwrap();
        let broadcast: u8 = comm.broadcast(Some(&9u8), ROOT).unwrap();

        (gathered, broadcast)
    });

    assert_eq!(results[0].as_ref().unwrap(), &(Some(vec![7]), 9));
}

#[test]
pub fn invalid_root_is_rejected() {
    let results = LocalGroup::run(2, |comm| comm.gather(&1u8, 2));

    for result in results {
        assert!(matches!(
            result.unwrap(),
            Err(CommError::InvalidRoot { root: 2, size: 2 })
        ));
    }
}

#[test]
pub fn panicking_worker_aborts_peers() {
    let results = LocalGroup::run(3, |comm| {
        if comm.rank() == 1 {
            panic!("synthetic worker crash");
        }

        comm.barrier()
    });

    assert!(results[1].is_err());
    assert!(matches!(results[0], Ok(Err(CommError::Aborted))));
    assert!(matches!(results[2], Ok(Err(CommError::Aborted))));
}

#[test]
pub fn departed_worker_aborts_peers() {
    let results = LocalGroup::run(2, |comm| {
        if comm.rank() == 0 {
            // returns without joining the barrier
            return Ok(());
        }

        comm.barrier()
    });

    assert!(matches!(results[0], Ok(Ok(()))));
    assert!(matches!(results[1], Ok(Err(CommError::Aborted))));
}
