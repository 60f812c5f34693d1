//! Same-instant determinism: clock monotonicity, yield semantics, delay
//! validation, and the release-beats-new-seize race.

use std::cell::RefCell;
use std::rc::Rc;

use prosim::prelude::*;

type Log = Rc<RefCell<Vec<(&'static str, f64)>>>;

#[test]
fn clock_never_moves_backwards() {
    let mut sim: Simulation = Simulation::new();
    let times = Rc::new(RefCell::new(Vec::new()));
    for (i, d) in [3.0, 1.0, 2.0, 1.0].into_iter().enumerate() {
        let e = sim.create_entity(&format!("e{i}"));
        let t = times.clone();
        sim.activate(
            e,
            routine(move |p| {
                let t = t.clone();
                async move {
                    p.delay(d).await?;
                    t.borrow_mut().push(p.now());
                    Ok(())
                }
            }),
            0.0,
        )
        .unwrap();
    }
    sim.run(EndCondition::NoEvents).unwrap();
    let times = times.borrow();
    assert_eq!(times.len(), 4);
    assert!(times.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn yield_defers_after_earlier_same_time_events() {
    let mut sim: Simulation = Simulation::new();
    let log: Log = Rc::new(RefCell::new(Vec::new()));

    let yielder = sim.create_entity("yielder");
    let l = log.clone();
    sim.activate(
        yielder,
        routine(move |p| {
            let l = l.clone();
            async move {
                // yield at the activation priority: every same-time event
                // at this priority scheduled earlier runs first
                p.yield_with(priority::WAIT_FOR).await?;
                l.borrow_mut().push(("yielder", p.now()));
                Ok(())
            }
        }),
        0.0,
    )
    .unwrap();

    let direct = sim.create_entity("direct");
    let l = log.clone();
    sim.activate(
        direct,
        routine(move |p| {
            let l = l.clone();
            async move {
                l.borrow_mut().push(("direct", p.now()));
                Ok(())
            }
        }),
        0.0,
    )
    .unwrap();

    sim.run(EndCondition::NoEvents).unwrap();
    // the yielder started first but gave way to the second activation
    assert_eq!(*log.borrow(), vec![("direct", 0.0), ("yielder", 0.0)]);
}

#[test]
fn delay_rejects_negative_and_non_finite_durations() {
    for bad in [-1.0, f64::INFINITY, f64::NAN] {
        let mut sim: Simulation = Simulation::new();
        let e = sim.create_entity("e");
        sim.activate(
            e,
            routine(move |p| async move {
                p.delay(bad).await?;
                Ok(())
            }),
            0.0,
        )
        .unwrap();
        let err = sim.run(EndCondition::NoEvents).unwrap_err();
        assert!(matches!(err, SimError::InvalidArgument(_)), "{bad}: {err}");
    }
}

#[test]
fn seize_amount_zero_is_rejected() {
    let mut sim: Simulation = Simulation::new();
    let r = sim.create_resource("r", 1).unwrap();
    let e = sim.create_entity("e");
    sim.activate(
        e,
        routine(move |p| async move {
            p.seize(r, 0).await?;
            Ok(())
        }),
        0.0,
    )
    .unwrap();
    assert!(matches!(
        sim.run(EndCondition::NoEvents),
        Err(SimError::InvalidArgument(_))
    ));
}

/// The scenario fixed by the priority constants: at the same instant, a
/// release (and the RESUME it schedules for the queue head) beats a newly
/// arriving seize, so the entity that was already waiting is served first.
#[test]
fn release_serves_waiting_entity_before_same_instant_arrival() {
    let mut sim: Simulation = Simulation::new();
    let r = sim.create_resource("r", 1).unwrap();
    let log: Log = Rc::new(RefCell::new(Vec::new()));

    let holder = sim.create_entity("holder");
    sim.activate(
        holder,
        routine(move |p| async move {
            let a = p.seize(r, 1).await?;
            p.delay(5.0).await?;
            p.release(a)?;
            Ok(())
        }),
        0.0,
    )
    .unwrap();

    let waiter = sim.create_entity("waiter");
    let l = log.clone();
    sim.activate(
        waiter,
        routine(move |p| {
            let l = l.clone();
            async move {
                let a = p.seize(r, 1).await?;
                l.borrow_mut().push(("waiter", p.now()));
                p.delay(1.0).await?;
                p.release(a)?;
                Ok(())
            }
        }),
        1.0,
    )
    .unwrap();

    // arrives exactly when the holder releases
    let arrival = sim.create_entity("arrival");
    let l = log.clone();
    sim.activate(
        arrival,
        routine(move |p| {
            let l = l.clone();
            async move {
                let a = p.seize(r, 1).await?;
                l.borrow_mut().push(("arrival", p.now()));
                p.release(a)?;
                Ok(())
            }
        }),
        5.0,
    )
    .unwrap();

    sim.run(EndCondition::NoEvents).unwrap();
    assert_eq!(*log.borrow(), vec![("waiter", 5.0), ("arrival", 6.0)]);
}

#[test]
fn named_delay_can_be_interrupted_and_continued() {
    let mut sim: Simulation = Simulation::new();
    let log: Log = Rc::new(RefCell::new(Vec::new()));

    let worker = sim.create_entity("worker");
    let l = log.clone();
    let wp = sim
        .activate(
            worker,
            routine(move |p| {
                let l = l.clone();
                async move {
                    p.delay_with(10.0, priority::DELAY, Some("service")).await?;
                    l.borrow_mut().push(("done", p.now()));
                    Ok(())
                }
            }),
            0.0,
        )
        .unwrap();

    let breaker = sim.create_entity("breaker");
    sim.activate(
        breaker,
        routine(move |p| async move {
            p.delay(4.0).await?;
            // stop the service for 3 units, then let the remaining 6 run
            p.interrupt_delay_and_continue(wp, "service", 3.0).await?;
            Ok(())
        }),
        0.0,
    )
    .unwrap();

    sim.run(EndCondition::NoEvents).unwrap();
    // interrupted at 4 with 6 remaining; resumes 4+3=7, finishes 7+6=13
    assert_eq!(*log.borrow(), vec![("done", 13.0)]);
}

#[test]
fn interrupting_a_missing_delay_is_a_no_op() {
    let mut sim: Simulation = Simulation::new();
    let log: Log = Rc::new(RefCell::new(Vec::new()));

    let worker = sim.create_entity("worker");
    let l = log.clone();
    let wp = sim
        .activate(
            worker,
            routine(move |p| {
                let l = l.clone();
                async move {
                    p.delay(2.0).await?;
                    l.borrow_mut().push(("done", p.now()));
                    Ok(())
                }
            }),
            0.0,
        )
        .unwrap();

    let breaker = sim.create_entity("breaker");
    sim.activate(
        breaker,
        routine(move |p| async move {
            // the worker's delay is unnamed, so nothing matches
            p.interrupt_delay(wp, "service", 1.0, 5.0).await?;
            Ok(())
        }),
        0.0,
    )
    .unwrap();

    sim.run(EndCondition::NoEvents).unwrap();
    assert_eq!(*log.borrow(), vec![("done", 2.0)]);
}

#[test]
fn restart_variant_reruns_the_full_delay() {
    let mut sim: Simulation = Simulation::new();
    let log: Log = Rc::new(RefCell::new(Vec::new()));

    let worker = sim.create_entity("worker");
    let l = log.clone();
    let wp = sim
        .activate(
            worker,
            routine(move |p| {
                let l = l.clone();
                async move {
                    p.delay_with(10.0, priority::DELAY, Some("service")).await?;
                    l.borrow_mut().push(("done", p.now()));
                    Ok(())
                }
            }),
            0.0,
        )
        .unwrap();

    let breaker = sim.create_entity("breaker");
    sim.activate(
        breaker,
        routine(move |p| async move {
            p.delay(4.0).await?;
            p.interrupt_delay_and_restart(wp, "service", 2.0).await?;
            Ok(())
        }),
        0.0,
    )
    .unwrap();

    sim.run(EndCondition::NoEvents).unwrap();
    // interrupted at 4, resumes the full 10 at 6, finishes at 16
    assert_eq!(*log.borrow(), vec![("done", 16.0)]);
}
