/* Copyright © 2018 Gianmarco Garrisi

This program is free software: you can redistribute it and/or modify
it under the terms of the GNU General Public License as published by
the Free Software Foundation, either version 3 of the License, or
(at your option) any later version.

This program is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
GNU General Public License for more details.

You should have received a copy of the GNU General Public License
along with this program.  If not, see <http://www.gnu.org/licenses/>. */

//! This crate implements a process-oriented discrete event simulation
//! kernel. A model is expressed as entities living through sequential
//! process routines that may suspend at well-defined points — delays,
//! resource seizes, signal waits, hold queues, blocking rendezvous,
//! inter-process waits — while a global executive advances a virtual clock
//! deterministically.
//!
//! # Simulation
//! A [`Simulation`] owns the event loop and every model element: entities,
//! resources, queues, signals, pools and blocking queues. Events fire in
//! `(time, priority, insertion order)` order, so races at one instant
//! resolve the same way on every run. The simulation can be advanced
//! step-by-step with [`Simulation::step`] or driven to an
//! [`EndCondition`] with [`Simulation::run`]; a full replication is closed
//! by [`Simulation::after_replication`], which terminates whatever is
//! still suspended.
//!
//! # Processes
//! A process routine is an `async` function over a [`ProcessContext`],
//! wrapped with [`routine`]. The executive polls it on a single thread; at
//! every suspension primitive the continuation is captured and control
//! returns to the event loop until a later event resumes it:
//!
//! ```
//! use prosim::prelude::*;
//!
//! let mut sim: Simulation = Simulation::new();
//! let machine = sim.create_resource("machine", 1).unwrap();
//! let part = sim.create_entity("part");
//! sim.activate(
//!     part,
//!     routine(move |p| async move {
//!         let grip = p.seize(machine, 1).await?;
//!         p.delay(5.0).await?;
//!         p.release(grip)?;
//!         Ok(())
//!     }),
//!     0.0,
//! )
//! .unwrap();
//! sim.run(EndCondition::NoEvents).unwrap();
//! assert_eq!(sim.now(), 5.0);
//! ```
//!
//! # Resources
//! A resource holds a finite number of identical units. A seize that
//! cannot be served parks the entity in a request queue; every release
//! walks that queue head-first and resumes the requests the freed units
//! can cover. Resources publish time-weighted `num_busy` and utilization
//! through the [`StatsSink`] the simulation was built with, and pools
//! spread one seize across several resources under injectable selection
//! and allocation rules.
//!
//! # Determinism
//! The kernel is single-threaded and cooperative. The fixed
//! [`priority`] constants order same-instant events so that, for example,
//! a release always serves its waiting queue before a newly arriving
//! seize at the same instant.

pub mod blocking;
pub mod entity;
pub mod error;
pub mod executive;
pub mod pool;
pub mod prelude;
pub mod process;
pub mod queue;
pub mod resource;
pub mod simulation;
pub mod stats;

pub use crate::blocking::{EntityPredicate, ItemPredicate};
pub use crate::entity::{
    BatchQueueId, BlockageId, BlockageState, BlockingQueueId, EntityId, EntityState, SignalId,
};
pub use crate::error::{SimError, SimResult};
pub use crate::executive::{priority, EventHandle};
pub use crate::pool::{
    AllocationRule, FirstAvailable, GreedySplit, MemberAvailability, PoolAllocation,
    PoolAllocationId, PoolId, SelectionRule,
};
pub use crate::process::{
    routine, Batch, ProcessContext, ProcessFuture, ProcessId, ProcessRoutine, ProcessState,
    SuspendKind,
};
pub use crate::queue::{Discipline, HoldQueueId, QueueId, SeizeTarget};
pub use crate::resource::{Allocation, AllocationId, ResourceId, ResourceState};
pub use crate::simulation::{EndCondition, GeneratorId, Simulation, VariateSource};
pub use crate::stats::{MemoryStats, NullStats, StatsSink};
