//! Replication lifecycle: end-of-replication cleanup, initialization
//! idempotence and warm-up.

use std::cell::RefCell;
use std::rc::Rc;

use prosim::prelude::*;

/// A run that ends with entities suspended in several different
/// primitives must close with nothing suspended, nothing left to fire and
/// every resource idle.
#[test]
fn after_replication_terminates_everything_still_suspended() {
    let mut sim: Simulation = Simulation::new();
    let r = sim.create_resource("r", 1).unwrap();
    let sig = sim.create_signal("never");
    let hq = sim.create_hold_queue("pen");

    // suspended holding a resource, mid-delay
    let sleeper = sim.create_entity("sleeper");
    sim.activate(
        sleeper,
        routine(move |p| async move {
            let _grip = p.seize(r, 1).await?;
            p.delay(100.0).await?;
            Ok(())
        }),
        0.0,
    )
    .unwrap();

    // suspended waiting for the resource
    let contender = sim.create_entity("contender");
    sim.activate(
        contender,
        routine(move |p| async move {
            let _grip = p.seize(r, 1).await?;
            Ok(())
        }),
        1.0,
    )
    .unwrap();

    // suspended on a signal that never fires
    let waiter = sim.create_entity("waiter");
    sim.activate(
        waiter,
        routine(move |p| async move {
            p.wait_for_signal(sig).await?;
            Ok(())
        }),
        2.0,
    )
    .unwrap();

    // parked in a hold queue
    let held = sim.create_entity("held");
    sim.activate(
        held,
        routine(move |p| async move {
            p.hold(hq).await?;
            Ok(())
        }),
        3.0,
    )
    .unwrap();

    sim.run_replication(EndCondition::Time(10.0)).unwrap();

    assert_eq!(sim.now(), 10.0);
    assert_eq!(sim.num_suspended(), 0);
    assert_eq!(sim.pending_events(), 0);
    assert_eq!(sim.num_busy(r).unwrap(), 0);
    assert_eq!(sim.hold_queue_len(hq).unwrap(), 0);
    assert_eq!(sim.num_allocations(sleeper).unwrap(), 0);
}

/// Terminating the sleeper frees the unit; the contender's seize must not
/// be resurrected by the cleanup since it is terminated in the same sweep.
#[test]
fn cleanup_is_idempotent_under_cascades() {
    let mut sim: Simulation = Simulation::new();

    let eb = sim.create_entity("b");
    let pb = sim
        .create_process(
            eb,
            routine(move |p| async move {
                p.delay(50.0).await?;
                Ok(())
            }),
            Some("b"),
        )
        .unwrap();

    let ea = sim.create_entity("a");
    let pa = sim
        .activate(
            ea,
            routine(move |p| async move {
                p.wait_for_process(pb, 0.0).await?;
                Ok(())
            }),
            0.0,
        )
        .unwrap();

    sim.run_replication(EndCondition::Time(5.0)).unwrap();
    // the sweep reaches one of the pair first and cascades to the other;
    // revisiting the second is a no-op
    assert_eq!(sim.process_state(pa).unwrap(), ProcessState::Terminated);
    assert_eq!(sim.process_state(pb).unwrap(), ProcessState::Terminated);
    assert_eq!(sim.num_suspended(), 0);
}

#[test]
fn termination_hook_fires_for_swept_entities() {
    let mut sim: Simulation = Simulation::new();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let s = seen.clone();
    sim.on_entity_terminated(move |e| s.borrow_mut().push(e));

    let e = sim.create_entity("e");
    sim.activate(
        e,
        routine(move |p| async move {
            p.delay(100.0).await?;
            Ok(())
        }),
        0.0,
    )
    .unwrap();

    sim.run_replication(EndCondition::Time(1.0)).unwrap();
    assert_eq!(*seen.borrow(), vec![e]);
}

#[test]
fn initialize_resets_resources_and_reprimes_generators() {
    let stats = Rc::new(RefCell::new(MemoryStats::new()));
    let mut sim: Simulation = Simulation::with_stats(stats.clone());
    let r = sim.create_resource("r", 2).unwrap();

    sim.add_generator_with(
        "part",
        || 1.0,
        routine(move |p| async move {
            let a = p.seize(r, 1).await?;
            p.delay(0.5).await?;
            p.release(a)?;
            Ok(())
        }),
        0,
        true,
        Some(4),
    )
    .unwrap();

    for replication in 0..2 {
        sim.initialize().unwrap();
        assert_eq!(sim.now(), 0.0);
        assert_eq!(sim.num_busy(r).unwrap(), 0);
        assert_eq!(sim.num_times_seized(r).unwrap(), 0);
        assert_eq!(sim.resource_state(r).unwrap(), ResourceState::Idle);

        sim.run_replication(EndCondition::NoEvents).unwrap();
        assert_eq!(sim.num_entities_created(), 4, "replication {replication}");
        assert_eq!(sim.num_times_seized(r).unwrap(), 4);
        assert_eq!(sim.num_busy(r).unwrap(), 0);
    }
}

#[test]
fn initialize_recovers_from_an_inactive_end_state() {
    let mut sim: Simulation = Simulation::new();
    let r = sim.create_resource("r", 1).unwrap();
    sim.set_capacity(r, 0).unwrap();
    assert_eq!(sim.resource_state(r).unwrap(), ResourceState::Inactive);

    sim.initialize().unwrap();
    assert_eq!(sim.resource_state(r).unwrap(), ResourceState::Idle);
    assert_eq!(sim.capacity(r).unwrap(), 1);
}

#[test]
fn warm_up_discards_history_but_keeps_levels() {
    let stats = Rc::new(RefCell::new(MemoryStats::new()));
    let mut sim: Simulation = Simulation::with_stats(stats.clone());
    let r = sim.create_resource("r", 1).unwrap();

    let e = sim.create_entity("e");
    sim.activate(
        e,
        routine(move |p| async move {
            let a = p.seize(r, 1).await?;
            p.delay(10.0).await?;
            p.release(a)?;
            Ok(())
        }),
        0.0,
    )
    .unwrap();

    // burn 4 time units, then forget them
    sim.run(EndCondition::Time(4.0)).unwrap();
    sim.warm_up().unwrap();
    sim.run(EndCondition::NoEvents).unwrap();

    let st = stats.borrow();
    // busy the whole post-warm-up window [4, 10]
    assert_eq!(st.time_weighted_average("r.util", 10.0), Some(1.0));
    // the seize happened before warm-up, so no wait samples survive
    assert_eq!(st.tally_count("r.q.time_in_q"), 0);
}

#[test]
fn halt_stops_the_run_before_the_next_event() {
    let mut sim: Simulation = Simulation::new();
    let e = sim.create_entity("e");
    sim.activate(
        e,
        routine(move |p| async move {
            p.delay(3.0).await?;
            Ok(())
        }),
        0.0,
    )
    .unwrap();

    sim.request_halt();
    sim.run(EndCondition::NoEvents).unwrap();
    assert_eq!(sim.now(), 0.0);
    assert!(sim.pending_events() > 0);

    // a fresh replication clears the halt
    sim.initialize().unwrap();
    assert_eq!(sim.pending_events(), 0);
}

#[test]
fn replication_end_hook_sees_the_final_clock() {
    let mut sim: Simulation = Simulation::new();
    let at = Rc::new(RefCell::new(None));
    let a = at.clone();
    sim.on_replication_end(move |t| *a.borrow_mut() = Some(t));

    let e = sim.create_entity("e");
    sim.activate(
        e,
        routine(move |p| async move {
            p.delay(3.0).await?;
            Ok(())
        }),
        0.0,
    )
    .unwrap();

    sim.run_replication(EndCondition::Time(8.0)).unwrap();
    assert_eq!(*at.borrow(), Some(8.0));
}
