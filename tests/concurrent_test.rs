mod common;

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use micro_db::{
    error::Error,
    transaction::{IsolationLevel, TxnStatus},
};

#[test]
fn test_deadlock_one_victim_one_survivor() {
    let (_scratch, db) = common::fresh_db();
    let vs = db.version().clone();

    // two committed rows to fight over
    let setup = vs.begin(IsolationLevel::ReadCommitted).unwrap();
    let u1 = vs.insert(setup, b"x").unwrap();
    let u2 = vs.insert(setup, b"y").unwrap();
    vs.commit(setup).unwrap();

    let t1 = vs.begin(IsolationLevel::ReadCommitted).unwrap();
    let t2 = vs.begin(IsolationLevel::ReadCommitted).unwrap();
    assert!(vs.delete(t1, u1).unwrap());
    assert!(vs.delete(t2, u2).unwrap());

    // now cross over from two threads: one of them must lose
    let deadlocks = Arc::new(AtomicUsize::new(0));
    crossbeam::scope(|scope| {
        let vs_a = vs.clone();
        let dl = deadlocks.clone();
        let a = scope.spawn(move |_| match vs_a.delete(t1, u2) {
            Ok(true) => {
                vs_a.commit(t1).unwrap();
                true
            }
            Err(Error::Deadlock) => {
                dl.fetch_add(1, Ordering::SeqCst);
                false
            }
            other => panic!("unexpected outcome: {:?}", other),
        });

        let vs_b = vs.clone();
        let dl = deadlocks.clone();
        let b = scope.spawn(move |_| match vs_b.delete(t2, u1) {
            Ok(true) => {
                vs_b.commit(t2).unwrap();
                true
            }
            Err(Error::Deadlock) => {
                dl.fetch_add(1, Ordering::SeqCst);
                false
            }
            other => panic!("unexpected outcome: {:?}", other),
        });

        let a_won = a.join().unwrap();
        let b_won = b.join().unwrap();
        assert!(a_won != b_won, "exactly one side survives");
    })
    .unwrap();
    assert_eq!(deadlocks.load(Ordering::SeqCst), 1);

    // the victim was auto-aborted
    let (winner, loser) = if vs.txn_ids().status(t1).unwrap() == TxnStatus::Aborted {
        (t2, t1)
    } else {
        (t1, t2)
    };
    assert_eq!(vs.txn_ids().status(loser).unwrap(), TxnStatus::Aborted);
    assert_eq!(vs.txn_ids().status(winner).unwrap(), TxnStatus::Committed);
    db.close().unwrap();
}

#[test]
fn test_competing_deletes_exactly_one_wins() {
    let (_scratch, db) = common::fresh_db();
    let vs = db.version().clone();

    let setup = vs.begin(IsolationLevel::ReadCommitted).unwrap();
    let uid = vs.insert(setup, b"contested").unwrap();
    vs.commit(setup).unwrap();

    let wins = Arc::new(AtomicUsize::new(0));
    crossbeam::scope(|scope| {
        for _ in 0..4 {
            let vs = vs.clone();
            let wins = wins.clone();
            scope.spawn(move |_| {
                let xid = vs.begin(IsolationLevel::ReadCommitted).unwrap();
                match vs.delete(xid, uid) {
                    Ok(true) => {
                        wins.fetch_add(1, Ordering::SeqCst);
                        vs.commit(xid).unwrap();
                    }
                    Ok(false) => vs.commit(xid).unwrap(),
                    Err(e) if e.aborts_transaction() => {}
                    Err(e) => panic!("unexpected error: {:?}", e),
                }
            });
        }
    })
    .unwrap();

    assert_eq!(wins.load(Ordering::SeqCst), 1, "one delete succeeds");
    db.close().unwrap();
}

#[test]
fn test_parallel_inserts_all_readable() {
    let (_scratch, db) = common::fresh_db();
    let vs = db.version().clone();

    let uids: Vec<u64> = crossbeam::scope(|scope| {
        let mut handles = Vec::new();
        for worker in 0..4 {
            let vs = vs.clone();
            handles.push(scope.spawn(move |_| {
                let mut mine = Vec::new();
                let xid = vs.begin(IsolationLevel::ReadCommitted).unwrap();
                for i in 0..50 {
                    let payload = format!("w{}-{}", worker, i);
                    mine.push((vs.insert(xid, payload.as_bytes()).unwrap(), payload));
                }
                vs.commit(xid).unwrap();
                mine
            }));
        }
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .map(|(uid, payload)| {
                // every committed insert reads back exactly
                let reader = vs.begin(IsolationLevel::ReadCommitted).unwrap();
                let got = vs.read(reader, uid).unwrap().unwrap();
                assert_eq!(got, payload.as_bytes());
                vs.commit(reader).unwrap();
                uid
            })
            .collect()
    })
    .unwrap();

    // uids are unique even under contention
    let mut sorted = uids.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted.len(), uids.len());
    db.close().unwrap();
}

#[test]
fn test_blocked_delete_proceeds_after_commit() {
    let (_scratch, db) = common::fresh_db();
    let vs = db.version().clone();

    let setup = vs.begin(IsolationLevel::ReadCommitted).unwrap();
    let uid = vs.insert(setup, b"handoff").unwrap();
    vs.commit(setup).unwrap();

    let holder = vs.begin(IsolationLevel::ReadCommitted).unwrap();
    assert!(vs.delete(holder, uid).unwrap());

    crossbeam::scope(|scope| {
        let vs_w = vs.clone();
        let waiter = scope.spawn(move |_| {
            let xid = vs_w.begin(IsolationLevel::ReadCommitted).unwrap();
            // blocks on the record lock until the holder aborts, then
            // the version is live again and the delete goes through
            let outcome = vs_w.delete(xid, uid).unwrap();
            vs_w.commit(xid).unwrap();
            outcome
        });

        std::thread::sleep(std::time::Duration::from_millis(50));
        vs.abort(holder).unwrap();
        assert!(waiter.join().unwrap());
    })
    .unwrap();
    db.close().unwrap();
}
