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

//! Resource pools.
//!
//! A pool is a set of resources behind two injectable strategies: a
//! selection rule deciding which members may serve a request, and an
//! allocation rule deciding how to split the requested amount across the
//! selected members. A pooled seize produces a [`PoolAllocation`] that
//! aggregates one per-resource allocation per member touched; releasing it
//! through the pool re-processes the pool's waiting queue.

use crate::entity::EntityId;
use crate::queue::QueueId;
use crate::resource::{AllocationId, ResourceId};

/// Identifies a resource pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolId(pub(crate) usize);

/// Identifies a pooled allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolAllocationId(pub(crate) usize);

/// Current availability of one pool member, as handed to the rules. Members
/// that are inactive or fully busy are filtered out before the rules run.
#[derive(Debug, Clone, Copy)]
pub struct MemberAvailability {
    pub resource: ResourceId,
    pub available: u32,
}

/// Decides which members can satisfy `amount`. Returning an empty vector
/// means the pool cannot allocate right now.
pub trait SelectionRule {
    fn select(&self, members: &[MemberAvailability], amount: u32) -> Vec<ResourceId>;
}

/// Decides how to split `amount` across the selected members. Only called
/// with a selection whose total availability covers `amount`; must return
/// parts summing exactly to `amount`.
pub trait AllocationRule {
    fn split(&self, selected: &[MemberAvailability], amount: u32) -> Vec<(ResourceId, u32)>;
}

/// Selects members in pool order until their combined availability covers
/// the request.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstAvailable;

impl SelectionRule for FirstAvailable {
    fn select(&self, members: &[MemberAvailability], amount: u32) -> Vec<ResourceId> {
        let mut picked = Vec::new();
        let mut covered = 0u64;
        for m in members {
            if covered >= amount as u64 {
                break;
            }
            if m.available > 0 {
                picked.push(m.resource);
                covered += m.available as u64;
            }
        }
        if covered >= amount as u64 {
            picked
        } else {
            Vec::new()
        }
    }
}

/// Takes as much as possible from each selected member in order.
#[derive(Debug, Default, Clone, Copy)]
pub struct GreedySplit;

impl AllocationRule for GreedySplit {
    fn split(&self, selected: &[MemberAvailability], amount: u32) -> Vec<(ResourceId, u32)> {
        let mut parts = Vec::new();
        let mut remaining = amount;
        for m in selected {
            if remaining == 0 {
                break;
            }
            let take = remaining.min(m.available);
            if take > 0 {
                parts.push((m.resource, take));
                remaining -= take;
            }
        }
        debug_assert_eq!(remaining, 0, "selection did not cover the requested amount");
        parts
    }
}

pub(crate) struct PoolRec {
    pub name: String,
    pub members: Vec<ResourceId>,
    pub queue: QueueId,
    pub selection: Box<dyn SelectionRule>,
    pub allocation: Box<dyn AllocationRule>,
}

/// Aggregate of the per-resource allocations produced by one pooled seize.
#[derive(Debug, Clone)]
pub struct PoolAllocation {
    pub(crate) id: PoolAllocationId,
    pub(crate) entity: EntityId,
    pub(crate) pool: PoolId,
    pub(crate) parts: Vec<AllocationId>,
    pub(crate) alive: bool,
}

impl PoolAllocation {
    pub fn entity(&self) -> EntityId {
        self.entity
    }

    pub fn pool(&self) -> PoolId {
        self.pool
    }

    pub fn parts(&self) -> &[AllocationId] {
        &self.parts
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn avail(v: &[(usize, u32)]) -> Vec<MemberAvailability> {
        v.iter()
            .map(|&(r, a)| MemberAvailability { resource: ResourceId(r), available: a })
            .collect()
    }

    #[test]
    fn first_available_stops_once_covered() {
        let members = avail(&[(0, 1), (1, 3), (2, 5)]);
        let picked = FirstAvailable.select(&members, 3);
        assert_eq!(picked, vec![ResourceId(0), ResourceId(1)]);
    }

    #[test]
    fn first_available_reports_infeasible_as_empty() {
        let members = avail(&[(0, 1), (1, 1)]);
        assert!(FirstAvailable.select(&members, 3).is_empty());
    }

    #[test]
    fn greedy_split_sums_to_amount() {
        let members = avail(&[(0, 2), (1, 4)]);
        let parts = GreedySplit.split(&members, 5);
        assert_eq!(parts, vec![(ResourceId(0), 2), (ResourceId(1), 3)]);
        let total: u32 = parts.iter().map(|(_, n)| n).sum();
        assert_eq!(total, 5);
    }

    #[test]
    fn greedy_split_skips_exhausted_members() {
        let members = avail(&[(0, 0), (1, 2)]);
        let parts = GreedySplit.split(&members, 2);
        assert_eq!(parts, vec![(ResourceId(1), 2)]);
    }
}
