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

//! Finite-capacity resources.
//!
//! A resource holds a number of identical units that entities seize and
//! release. Units in use are tracked by allocation records; the resource
//! state (Idle/Busy/Inactive) follows `num_busy` and `capacity` through an
//! exit-current/enter-next protocol so time-in-state accumulators close
//! their intervals correctly.

use tracing::trace;

use crate::entity::EntityId;
use crate::error::{SimError, SimResult};
use crate::queue::QueueId;
use crate::stats::StatsSink;

/// Identifies a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId(pub(crate) usize);

/// Identifies an allocation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllocationId(pub(crate) usize);

/// Units of a resource held by one entity, created by a successful seize
/// and destroyed by deallocation.
#[derive(Debug, Clone)]
pub struct Allocation {
    pub(crate) id: AllocationId,
    pub(crate) entity: EntityId,
    pub(crate) resource: ResourceId,
    pub(crate) amount: u32,
    /// Queue the seize waited in; deallocation re-processes this queue even
    /// if the request was later moved elsewhere.
    pub(crate) queue: QueueId,
    pub(crate) name: Option<String>,
    pub(crate) alive: bool,
}

impl Allocation {
    pub fn entity(&self) -> EntityId {
        self.entity
    }

    pub fn resource(&self) -> ResourceId {
        self.resource
    }

    pub fn amount(&self) -> u32 {
        self.amount
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }
}

/// Resource state. `num_busy == 0` never coexists with `Busy`; a resource
/// with zero capacity and nothing busy is `Inactive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    Idle,
    Busy,
    Inactive,
}

impl ResourceState {
    fn label(self) -> &'static str {
        match self {
            ResourceState::Idle => "idle",
            ResourceState::Busy => "busy",
            ResourceState::Inactive => "inactive",
        }
    }
}

pub(crate) struct ResourceRecord {
    pub name: String,
    pub initial_capacity: u32,
    pub capacity: u32,
    pub num_busy: u32,
    pub num_times_seized: u64,
    pub num_times_released: u64,
    pub state: ResourceState,
    state_entered_at: f64,
    track_state_time: bool,
    /// Queue new seizes wait in when none is given explicitly.
    pub default_queue: QueueId,
    pub allocations: Vec<AllocationId>,
}

impl ResourceRecord {
    pub fn new(
        name: String,
        capacity: u32,
        track_state_time: bool,
        default_queue: QueueId,
    ) -> ResourceRecord {
        ResourceRecord {
            name,
            initial_capacity: capacity,
            capacity,
            num_busy: 0,
            num_times_seized: 0,
            num_times_released: 0,
            state: ResourceState::Idle,
            state_entered_at: 0.0,
            track_state_time,
            default_queue,
            allocations: Vec::new(),
        }
    }

    /// Units free right now. Negative transiently when a capacity shrink
    /// undercuts what is already allocated.
    pub fn num_available(&self) -> i64 {
        self.capacity as i64 - self.num_busy as i64
    }

    /// Whether `n` units could be allocated immediately.
    pub fn can_allocate(&self, n: u32) -> bool {
        n >= 1 && self.state != ResourceState::Inactive && (n as i64) <= self.num_available()
    }

    /// Exit the current state, enter `to`, closing the time-in-state
    /// interval when tracking is on.
    fn enter_state(&mut self, to: ResourceState, now: f64, stats: &mut dyn StatsSink) {
        if to == self.state {
            return;
        }
        if self.track_state_time {
            stats.tally_observe(
                &format!("{}.time_{}", self.name, self.state.label()),
                now - self.state_entered_at,
            );
        }
        trace!(resource = %self.name, from = self.state.label(), to = to.label(), now, "resource state");
        self.state = to;
        self.state_entered_at = now;
    }

    fn state_after_busy_change(&self) -> ResourceState {
        if self.num_busy > 0 {
            ResourceState::Busy
        } else if self.capacity == 0 {
            ResourceState::Inactive
        } else {
            ResourceState::Idle
        }
    }

    fn observe_load(&self, now: f64, stats: &mut dyn StatsSink) {
        stats.time_weighted_observe(&format!("{}.num_busy", self.name), self.num_busy as f64, now);
        let util = if self.capacity > 0 { self.num_busy as f64 / self.capacity as f64 } else { 0.0 };
        stats.time_weighted_observe(&format!("{}.util", self.name), util, now);
    }

    /// Bookkeeping half of an allocation: the caller has already verified
    /// `can_allocate` and created the allocation record.
    pub fn commit_seize(&mut self, alloc: AllocationId, amount: u32, now: f64, stats: &mut dyn StatsSink) {
        self.num_busy += amount;
        self.num_times_seized += 1;
        self.allocations.push(alloc);
        self.enter_state(self.state_after_busy_change(), now, stats);
        self.observe_load(now, stats);
    }

    /// Bookkeeping half of a deallocation.
    pub fn commit_release(&mut self, alloc: AllocationId, amount: u32, now: f64, stats: &mut dyn StatsSink) {
        debug_assert!(self.num_busy >= amount);
        self.num_busy -= amount;
        self.num_times_released += 1;
        self.allocations.retain(|a| *a != alloc);
        self.enter_state(self.state_after_busy_change(), now, stats);
        self.observe_load(now, stats);
    }

    /// Change capacity. Shrinking below `num_busy` is tolerated: available
    /// units go negative until enough releases come in. Dropping to zero
    /// with nothing busy deactivates the resource; raising it out of zero
    /// reactivates it.
    pub fn set_capacity(&mut self, capacity: u32, now: f64, stats: &mut dyn StatsSink) {
        self.capacity = capacity;
        self.enter_state(self.state_after_busy_change(), now, stats);
        self.observe_load(now, stats);
    }

    /// Replication reset: no allocations, counters zeroed, documented
    /// starting state (Idle at initial capacity).
    pub fn initialize(&mut self, stats: &mut dyn StatsSink) {
        self.capacity = self.initial_capacity;
        self.num_busy = 0;
        self.num_times_seized = 0;
        self.num_times_released = 0;
        self.allocations.clear();
        self.state = if self.capacity == 0 { ResourceState::Inactive } else { ResourceState::Idle };
        self.state_entered_at = 0.0;
        self.observe_load(0.0, stats);
    }

    /// Warm-up: re-enter the current state at the warm-up instant so the
    /// freshly reset accumulators start from here.
    pub fn warm_up(&mut self, now: f64, stats: &mut dyn StatsSink) {
        self.state_entered_at = now;
        self.observe_load(now, stats);
    }

    /// Close the open state interval at the end of a replication.
    pub fn finalize(&mut self, now: f64, stats: &mut dyn StatsSink) {
        if self.track_state_time {
            stats.tally_observe(
                &format!("{}.time_{}", self.name, self.state.label()),
                now - self.state_entered_at,
            );
            self.state_entered_at = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{MemoryStats, NullStats};

    fn resource(cap: u32) -> ResourceRecord {
        ResourceRecord::new("r".into(), cap, true, QueueId(0))
    }

    #[test]
    fn can_allocate_respects_bounds_and_state() {
        let mut r = resource(2);
        assert!(!r.can_allocate(0));
        assert!(r.can_allocate(2));
        assert!(!r.can_allocate(3));
        let mut ns = NullStats;
        r.set_capacity(0, 0.0, &mut ns);
        assert_eq!(r.state, ResourceState::Inactive);
        assert!(!r.can_allocate(1));
    }

    #[test]
    fn busy_count_drives_state() {
        let mut ns = NullStats;
        let mut r = resource(2);
        r.commit_seize(AllocationId(0), 2, 1.0, &mut ns);
        assert_eq!(r.state, ResourceState::Busy);
        assert_eq!(r.num_available(), 0);
        r.commit_release(AllocationId(0), 2, 3.0, &mut ns);
        assert_eq!(r.state, ResourceState::Idle);
        assert_eq!(r.num_times_seized, 1);
        assert_eq!(r.num_times_released, 1);
    }

    #[test]
    fn capacity_shrink_can_undercut_busy() {
        let mut ns = NullStats;
        let mut r = resource(2);
        r.commit_seize(AllocationId(0), 2, 0.0, &mut ns);
        r.set_capacity(1, 1.0, &mut ns);
        assert_eq!(r.num_available(), -1);
        assert_eq!(r.state, ResourceState::Busy);
        assert!(!r.can_allocate(1));
    }

    #[test]
    fn state_time_accumulates() {
        let mut ms = MemoryStats::new();
        let mut r = resource(1);
        r.commit_seize(AllocationId(0), 1, 2.0, &mut ms);
        r.commit_release(AllocationId(0), 1, 5.0, &mut ms);
        r.finalize(9.0, &mut ms);
        assert_eq!(ms.tally_mean("r.time_idle"), Some((2.0 + 4.0) / 2.0));
        assert_eq!(ms.tally_mean("r.time_busy"), Some(3.0));
    }

    #[test]
    fn initialize_restores_documented_state() {
        let mut ns = NullStats;
        let mut r = resource(3);
        r.commit_seize(AllocationId(0), 3, 0.0, &mut ns);
        r.set_capacity(0, 1.0, &mut ns);
        r.initialize(&mut ns);
        assert_eq!(r.capacity, 3);
        assert_eq!(r.num_busy, 0);
        assert_eq!(r.num_times_seized, 0);
        assert_eq!(r.state, ResourceState::Idle);
        assert!(r.allocations.is_empty());
    }

    #[test]
    fn utilization_is_published() {
        let mut ms = MemoryStats::new();
        let mut r = resource(4);
        r.initialize(&mut ms);
        r.commit_seize(AllocationId(0), 2, 0.0, &mut ms);
        assert_eq!(ms.last_value("r.util"), Some(0.5));
        assert_eq!(ms.last_value("r.num_busy"), Some(2.0));
    }
}
