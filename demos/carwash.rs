// Simulate cars arriving and being served at a carwash
use std::cell::RefCell;
use std::rc::Rc;

use rand::{rngs::SmallRng as Rng, SeedableRng};
use rand_distr::{Distribution, Exp};

use prosim::prelude::*;

const NUM_MACHINES: u32 = 4; // A carwash with 4 machines to wash cars
const SIM_TIME: f64 = 10_000.0; // Cars keep arriving for 10'000 minutes
const LAMBDA_ARRIVE: f64 = 5.0; // A new car shows up every ~5 minutes
const LAMBDA_WASH: f64 = 2.0; // It takes ~2 minutes to wash a car

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let stats = Rc::new(RefCell::new(MemoryStats::new()));
    let mut sim: Simulation = Simulation::with_stats(stats.clone());

    let carwash = sim.create_resource("carwash", NUM_MACHINES).unwrap();

    let mut arrive_rng = Rng::seed_from_u64(1);
    let arrive = Exp::new(1.0 / LAMBDA_ARRIVE).unwrap();
    let wash_rng = Rc::new(RefCell::new(Rng::seed_from_u64(2)));
    let wash = Exp::new(1.0 / LAMBDA_WASH).unwrap();

    sim.add_generator(
        "car",
        move || arrive.sample(&mut arrive_rng),
        routine(move |p| {
            let rng = wash_rng.clone();
            async move {
                let t_wash = wash.sample(&mut *rng.borrow_mut());
                let machine = p.seize(carwash, 1).await?;
                p.delay(t_wash).await?;
                p.release(machine)?;
                Ok(())
            }
        }),
    )
    .unwrap();

    sim.run_replication(EndCondition::Time(SIM_TIME)).unwrap();

    let st = stats.borrow();
    println!("cars washed          {}", sim.num_entities_disposed());
    println!(
        "machine utilization  {:.3}",
        st.time_weighted_average("carwash.util", SIM_TIME).unwrap_or(0.0)
    );
    println!(
        "mean wait in queue   {:.3} minutes",
        st.tally_mean("carwash.q.time_in_q").unwrap_or(0.0)
    );
    println!(
        "mean queue length    {:.3}",
        st.time_weighted_average("carwash.q.num_in_q", SIM_TIME).unwrap_or(0.0)
    );
}
