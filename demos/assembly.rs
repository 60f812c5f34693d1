// An assembly line: a machining pool feeds finished parts through a
// bounded buffer to a single packer.
//
// Features shown in this example:
// * resource pools with the default selection/allocation rules
// * blocking queues (bounded sender/receiver rendezvous)
// * generators driven by rand_distr samplers
use std::cell::RefCell;
use std::rc::Rc;

use rand::{rngs::SmallRng as Rng, SeedableRng};
use rand_distr::{Distribution, Exp};

use prosim::prelude::*;

const BUFFER_SLOTS: usize = 5;
const SHIFT: f64 = 2_000.0;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let stats = Rc::new(RefCell::new(MemoryStats::new()));
    let mut sim: Simulation<u64> = Simulation::with_stats(stats.clone());

    let lathe = sim.create_resource("lathe", 2).unwrap();
    let mill = sim.create_resource("mill", 1).unwrap();
    let machines = sim.create_pool("machines", vec![lathe, mill]).unwrap();
    let buffer = sim.create_blocking_queue("buffer", BUFFER_SLOTS);

    let mut arrive_rng = Rng::seed_from_u64(7);
    let arrive = Exp::new(1.0 / 4.0).unwrap();
    let work_rng = Rc::new(RefCell::new(Rng::seed_from_u64(8)));
    let work = Exp::new(1.0 / 3.0).unwrap();
    let serial = Rc::new(RefCell::new(0u64));

    sim.add_generator(
        "part",
        move || arrive.sample(&mut arrive_rng),
        routine(move |p| {
            let rng = work_rng.clone();
            let serial = serial.clone();
            async move {
                let t_work = work.sample(&mut *rng.borrow_mut());
                let grip = p.seize_pool(machines, 1).await?;
                p.delay(t_work).await?;
                p.release_pool(grip)?;
                let id = {
                    let mut s = serial.borrow_mut();
                    *s += 1;
                    *s
                };
                // park here if the packer is behind and the buffer is full
                p.send(id, buffer).await?;
                Ok(())
            }
        }),
    )
    .unwrap();

    let packer = sim.create_entity_with("packer", 0, false);
    let packed = Rc::new(RefCell::new(0u64));
    let count = packed.clone();
    sim.activate(
        packer,
        routine(move |p| {
            let count = count.clone();
            async move {
                loop {
                    let batch = p.wait_for_items(buffer, 1).await?;
                    p.delay(2.5).await?;
                    *count.borrow_mut() += batch.len() as u64;
                }
            }
        }),
        0.0,
    )
    .unwrap();

    sim.run_replication(EndCondition::Time(SHIFT)).unwrap();

    let st = stats.borrow();
    println!("parts machined   {}", sim.num_entities_created());
    println!("parts packed     {}", packed.borrow());
    println!(
        "buffer level     {:.3}",
        st.time_weighted_average("buffer.num_in_buffer", SHIFT).unwrap_or(0.0)
    );
    println!(
        "lathe util       {:.3}",
        st.time_weighted_average("lathe.util", SHIFT).unwrap_or(0.0)
    );
    println!(
        "mill util        {:.3}",
        st.time_weighted_average("mill.util", SHIFT).unwrap_or(0.0)
    );
}
