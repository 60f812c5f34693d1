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

//! The prosim prelude.
//!
//! The prelude is a list of things that you can import into your program
//! with a single `use`. It includes the types which appear in almost every
//! simulation program.
//!
//! To use the prelude in your simulation simply add in your source
//! ```rust
//! use prosim::prelude::*;
//! ```

pub use crate::entity::{EntityId, EntityState};
pub use crate::error::{SimError, SimResult};
pub use crate::executive::priority;
pub use crate::process::{routine, Batch, ProcessContext, ProcessId, ProcessState};
pub use crate::queue::Discipline;
pub use crate::resource::{AllocationId, ResourceId, ResourceState};
pub use crate::simulation::{EndCondition, Simulation, VariateSource};
pub use crate::stats::{MemoryStats, StatsSink};
