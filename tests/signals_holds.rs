//! Signal fan-out order and hold-queue removal in both flavors.

use std::cell::RefCell;
use std::rc::Rc;

use prosim::prelude::*;

type Log = Rc<RefCell<Vec<(usize, f64)>>>;

#[test]
fn signal_fan_out_releases_in_fifo_order() {
    let mut sim: Simulation = Simulation::new();
    let sig = sim.create_signal("go");
    let log: Log = Rc::new(RefCell::new(Vec::new()));

    for i in 0..10 {
        let e = sim.create_entity(&format!("w{i}"));
        let l = log.clone();
        sim.activate(
            e,
            routine(move |p| {
                let l = l.clone();
                async move {
                    p.wait_for_signal(sig).await?;
                    l.borrow_mut().push((i, p.now()));
                    Ok(())
                }
            }),
            0.0,
        )
        .unwrap();
    }
    sim.schedule_signal(sig, 10.0).unwrap();

    sim.run(EndCondition::NoEvents).unwrap();
    let log = log.borrow();
    assert_eq!(log.len(), 10);
    for (i, &(who, when)) in log.iter().enumerate() {
        assert_eq!(who, i);
        assert_eq!(when, 10.0);
    }
}

#[test]
fn signal_priority_overrides_fifo() {
    let mut sim: Simulation = Simulation::new();
    let sig = sim.create_signal("go");
    let log: Log = Rc::new(RefCell::new(Vec::new()));

    // attach in order 0,1,2 but give the last one the best priority
    for (i, prio) in [(0, 5), (1, 5), (2, 1)] {
        let e = sim.create_entity(&format!("w{i}"));
        let l = log.clone();
        sim.activate(
            e,
            routine(move |p| {
                let l = l.clone();
                async move {
                    p.wait_for_signal_with(sig, prio, true, None).await?;
                    l.borrow_mut().push((i, p.now()));
                    Ok(())
                }
            }),
            0.0,
        )
        .unwrap();
    }
    sim.schedule_signal(sig, 1.0).unwrap();

    sim.run(EndCondition::NoEvents).unwrap();
    let order: Vec<usize> = log.borrow().iter().map(|&(i, _)| i).collect();
    assert_eq!(order, vec![2, 0, 1]);
}

#[test]
fn signal_fires_into_empty_waiter_set() {
    let mut sim: Simulation = Simulation::new();
    let sig = sim.create_signal("go");
    assert_eq!(sim.fire_signal(sig).unwrap(), 0);
}

#[test]
fn hold_queue_parks_until_scheduled_release() {
    let mut sim: Simulation = Simulation::new();
    let hq = sim.create_hold_queue("pen");
    let log: Log = Rc::new(RefCell::new(Vec::new()));

    for i in 0..3 {
        let e = sim.create_entity(&format!("h{i}"));
        let l = log.clone();
        sim.activate(
            e,
            routine(move |p| {
                let l = l.clone();
                async move {
                    p.hold(hq).await?;
                    l.borrow_mut().push((i, p.now()));
                    Ok(())
                }
            }),
            0.0,
        )
        .unwrap();
    }
    sim.schedule_hold_release(hq, 4.0).unwrap();

    sim.run(EndCondition::NoEvents).unwrap();
    // only the first was released; the others stay parked
    assert_eq!(*log.borrow(), vec![(0, 4.0)]);
    assert_eq!(sim.hold_queue_len(hq).unwrap(), 2);
    assert_eq!(sim.num_suspended(), 2);
}

#[test]
fn hold_release_all_preserves_queue_order() {
    let mut sim: Simulation = Simulation::new();
    let hq = sim.create_hold_queue("pen");
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let mut entities = Vec::new();

    for i in 0..3 {
        let e = sim.create_entity(&format!("h{i}"));
        entities.push(e);
        let l = log.clone();
        sim.activate(
            e,
            routine(move |p| {
                let l = l.clone();
                async move {
                    p.hold(hq).await?;
                    l.borrow_mut().push((i, p.now()));
                    Ok(())
                }
            }),
            i as f64,
        )
        .unwrap();
    }

    sim.run(EndCondition::NoEvents).unwrap();
    assert_eq!(sim.hold_queue_len(hq).unwrap(), 3);

    assert_eq!(sim.release_hold_all(hq).unwrap(), 3);
    sim.run(EndCondition::NoEvents).unwrap();
    let order: Vec<usize> = log.borrow().iter().map(|&(i, _)| i).collect();
    assert_eq!(order, vec![0, 1, 2]);
}

#[test]
fn hold_release_now_continues_within_the_call() {
    let mut sim: Simulation = Simulation::new();
    let hq = sim.create_hold_queue("pen");
    let log: Log = Rc::new(RefCell::new(Vec::new()));

    let e = sim.create_entity("h");
    let l = log.clone();
    let p = sim
        .activate(
            e,
            routine(move |p| {
                let l = l.clone();
                async move {
                    p.hold(hq).await?;
                    l.borrow_mut().push((0, p.now()));
                    Ok(())
                }
            }),
            0.0,
        )
        .unwrap();

    sim.run(EndCondition::NoEvents).unwrap();
    assert_eq!(sim.entity_state(e).unwrap(), EntityState::InHoldQueue);

    // immediate continuation: the process finishes inside this call, with
    // no event in between
    sim.release_hold_now(hq, e).unwrap();
    assert_eq!(*log.borrow(), vec![(0, 0.0)]);
    assert_eq!(sim.process_state(p).unwrap(), ProcessState::Completed);
    assert_eq!(sim.pending_events(), 0);
}

#[test]
fn a_process_can_release_a_held_peer_immediately() {
    let mut sim: Simulation = Simulation::new();
    let hq = sim.create_hold_queue("pen");
    let log: Log = Rc::new(RefCell::new(Vec::new()));

    let held = sim.create_entity("held");
    let l = log.clone();
    sim.activate(
        held,
        routine(move |p| {
            let l = l.clone();
            async move {
                p.hold(hq).await?;
                l.borrow_mut().push((1, p.now()));
                Ok(())
            }
        }),
        0.0,
    )
    .unwrap();

    let releaser = sim.create_entity("releaser");
    let l = log.clone();
    sim.activate(
        releaser,
        routine(move |p| {
            let l = l.clone();
            async move {
                p.delay(2.0).await?;
                // the peer runs to completion inside this call
                p.release_hold_now(hq, held)?;
                l.borrow_mut().push((2, p.now()));
                Ok(())
            }
        }),
        0.0,
    )
    .unwrap();

    sim.run(EndCondition::NoEvents).unwrap();
    assert_eq!(*log.borrow(), vec![(1, 2.0), (2, 2.0)]);
}

#[test]
fn a_process_can_fire_a_signal() {
    let mut sim: Simulation = Simulation::new();
    let sig = sim.create_signal("go");
    let log: Log = Rc::new(RefCell::new(Vec::new()));

    let waiter = sim.create_entity("waiter");
    let l = log.clone();
    sim.activate(
        waiter,
        routine(move |p| {
            let l = l.clone();
            async move {
                p.wait_for_signal(sig).await?;
                l.borrow_mut().push((1, p.now()));
                Ok(())
            }
        }),
        0.0,
    )
    .unwrap();

    let signaler = sim.create_entity("signaler");
    sim.activate(
        signaler,
        routine(move |p| async move {
            p.delay(3.0).await?;
            assert_eq!(p.fire_signal(sig)?, 1);
            Ok(())
        }),
        0.0,
    )
    .unwrap();

    sim.run(EndCondition::NoEvents).unwrap();
    assert_eq!(*log.borrow(), vec![(1, 3.0)]);
}

#[test]
fn releasing_an_absent_entity_fails() {
    let mut sim: Simulation = Simulation::new();
    let hq = sim.create_hold_queue("pen");
    let e = sim.create_entity("e");
    assert!(matches!(sim.release_hold(hq, e), Err(SimError::IllegalState(_))));
}
