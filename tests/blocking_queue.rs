//! Bounded rendezvous queues and entity batching.

use std::cell::RefCell;
use std::rc::Rc;

use prosim::prelude::*;

type Log = Rc<RefCell<Vec<(&'static str, f64)>>>;

/// Capacity-2 channel, three senders at t=0, one receiver at t=5: the
/// first two sends succeed at once, the third parks until the receiver
/// frees a slot.
#[test]
fn bounded_channel_blocks_the_overflowing_sender() {
    let mut sim: Simulation<u32> = Simulation::new();
    let bq = sim.create_blocking_queue("ch", 2);
    let log: Log = Rc::new(RefCell::new(Vec::new()));

    let labels = ["s1", "s2", "s3"];
    for (i, label) in labels.into_iter().enumerate() {
        let e = sim.create_entity(label);
        let l = log.clone();
        sim.activate(
            e,
            routine(move |p| {
                let l = l.clone();
                async move {
                    p.send(i as u32, bq).await?;
                    l.borrow_mut().push((label, p.now()));
                    Ok(())
                }
            }),
            0.0,
        )
        .unwrap();
    }

    let recv = sim.create_entity("recv");
    let l = log.clone();
    sim.activate(
        recv,
        routine(move |p| {
            let l = l.clone();
            async move {
                let items = p.wait_for_items(bq, 1).await?;
                l.borrow_mut().push(("recv", p.now()));
                assert_eq!(items, vec![0]);
                Ok(())
            }
        }),
        5.0,
    )
    .unwrap();

    sim.run(EndCondition::NoEvents).unwrap();
    assert_eq!(
        *log.borrow(),
        vec![("s1", 0.0), ("s2", 0.0), ("recv", 5.0), ("s3", 5.0)]
    );
    assert_eq!(sim.buffer_len(bq).unwrap(), 2);
}

#[test]
fn receiver_blocks_until_enough_items_arrive() {
    let mut sim: Simulation<u32> = Simulation::new();
    let bq = sim.create_blocking_queue("ch", 10);
    let log: Log = Rc::new(RefCell::new(Vec::new()));

    let recv = sim.create_entity("recv");
    let l = log.clone();
    sim.activate(
        recv,
        routine(move |p| {
            let l = l.clone();
            async move {
                let items = p.wait_for_items(bq, 3).await?;
                l.borrow_mut().push(("recv", p.now()));
                assert_eq!(items, vec![0, 1, 2]);
                Ok(())
            }
        }),
        0.0,
    )
    .unwrap();

    for i in 0u32..3 {
        let e = sim.create_entity(&format!("s{i}"));
        sim.activate(
            e,
            routine(move |p| async move {
                p.send(i, bq).await?;
                Ok(())
            }),
            (i + 1) as f64,
        )
        .unwrap();
    }

    sim.run(EndCondition::NoEvents).unwrap();
    // the third item lands at t=3
    assert_eq!(*log.borrow(), vec![("recv", 3.0)]);
    assert_eq!(sim.buffer_len(bq).unwrap(), 0);
}

#[test]
fn predicate_receive_takes_only_matching_items() {
    let mut sim: Simulation<u32> = Simulation::new();
    let bq = sim.create_blocking_queue("ch", 10);
    let log: Log = Rc::new(RefCell::new(Vec::new()));

    for (i, v) in [1u32, 2, 3, 4].into_iter().enumerate() {
        let e = sim.create_entity(&format!("s{i}"));
        sim.activate(
            e,
            routine(move |p| async move {
                p.send(v, bq).await?;
                Ok(())
            }),
            i as f64,
        )
        .unwrap();
    }

    let recv = sim.create_entity("recv");
    let l = log.clone();
    sim.activate(
        recv,
        routine(move |p| {
            let l = l.clone();
            async move {
                let even = Rc::new(|v: &u32| v % 2 == 0);
                let items = p
                    .wait_for_items_with(bq, 2, Some(even), priority::QUEUE, None)
                    .await?;
                assert_eq!(items, vec![2, 4]);
                l.borrow_mut().push(("recv", p.now()));
                Ok(())
            }
        }),
        0.5,
    )
    .unwrap();

    sim.run(EndCondition::NoEvents).unwrap();
    // the second even item (4) is sent at t=3
    assert_eq!(*log.borrow(), vec![("recv", 3.0)]);
    assert_eq!(sim.buffer_len(bq).unwrap(), 2);
}

#[test]
fn batch_queue_trigger_releases_members_first() {
    let mut sim: Simulation = Simulation::new();
    let bq = sim.create_batch_queue("kit", 3);
    let log: Log = Rc::new(RefCell::new(Vec::new()));

    let labels = ["m1", "m2", "m3"];
    for (i, label) in labels.into_iter().enumerate() {
        let e = sim.create_entity(label);
        let l = log.clone();
        sim.activate(
            e,
            routine(move |p| {
                let l = l.clone();
                async move {
                    match p.wait_for_batch(bq).await? {
                        Batch::Trigger(members) => {
                            assert_eq!(members.len(), 3);
                            l.borrow_mut().push(("trigger", p.now()));
                        }
                        Batch::Member => {
                            l.borrow_mut().push((label, p.now()));
                        }
                    }
                    Ok(())
                }
            }),
            i as f64,
        )
        .unwrap();
    }

    sim.run(EndCondition::NoEvents).unwrap();
    // the third arrival (t=2) forms the batch, yields, and only then
    // continues, so the members log before the trigger
    assert_eq!(
        *log.borrow(),
        vec![("m1", 2.0), ("m2", 2.0), ("trigger", 2.0)]
    );
}

#[test]
fn batch_predicate_excludes_non_matching_entities() {
    let mut sim: Simulation = Simulation::new();
    let log: Log = Rc::new(RefCell::new(Vec::new()));

    // only even-numbered entities may form the pair
    let matching = Rc::new(RefCell::new(Vec::new()));
    let allowed = matching.clone();
    let bq = sim.create_batch_queue_with(
        "kit",
        2,
        Rc::new(move |e| allowed.borrow().contains(&e)),
    );

    let odd = sim.create_entity("odd");
    let l = log.clone();
    sim.activate(
        odd,
        routine(move |p| {
            let l = l.clone();
            async move {
                p.wait_for_batch(bq).await?;
                l.borrow_mut().push(("odd", p.now()));
                Ok(())
            }
        }),
        0.0,
    )
    .unwrap();

    for (i, t) in [(0usize, 1.0), (1, 2.0)] {
        let e = sim.create_entity(&format!("even{i}"));
        matching.borrow_mut().push(e);
        let l = log.clone();
        sim.activate(
            e,
            routine(move |p| {
                let l = l.clone();
                async move {
                    match p.wait_for_batch(bq).await? {
                        Batch::Trigger(_) => l.borrow_mut().push(("trigger", p.now())),
                        Batch::Member => l.borrow_mut().push(("member", p.now())),
                    }
                    Ok(())
                }
            }),
            t,
        )
        .unwrap();
    }

    sim.run(EndCondition::NoEvents).unwrap();
    // the odd entity never batches; the two matching ones pair at t=2
    assert_eq!(*log.borrow(), vec![("member", 2.0), ("trigger", 2.0)]);
    assert_eq!(sim.num_suspended(), 1);
}
