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

//! Entities and blockages.
//!
//! An entity is an actor whose behavior is a sequence of processes. It
//! carries its own state machine, distinct from the process state machine,
//! because one entity traverses many processes over its life. Every
//! suspension primitive moves the entity into the matching waiting state
//! and back to `Active` on resume; a transition the table does not allow is
//! a modeling bug and fails with `IllegalState`.

use crate::error::{SimError, SimResult};
use crate::pool::PoolAllocationId;
use crate::process::ProcessId;
use crate::queue::{HoldQueueId, QueueId, RequestId};
use crate::resource::AllocationId;

/// Identifies an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityId(pub(crate) usize);

/// Identifies a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignalId(pub(crate) usize);

/// Identifies a blocking queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockingQueueId(pub(crate) usize);

/// Identifies a batch queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatchQueueId(pub(crate) usize);

/// Identifies a blockage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockageId(pub(crate) usize);

/// Where a suspended entity is parked. At most one site at a time; cleared
/// on resume and used by termination to remove the entity silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitingSite {
    RequestQueue(QueueId),
    Hold(HoldQueueId),
    Signal(SignalId),
    Blockage { blockage: BlockageId, park: Option<HoldQueueId> },
    BlockingSend(BlockingQueueId),
    BlockingRecv(BlockingQueueId),
    Batch(BatchQueueId),
}

/// The entity state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    Created,
    /// A process activation or a delay/yield resume event is pending.
    Scheduled,
    /// Inside its process, holding control.
    Active,
    WaitingForSignal,
    InHoldQueue,
    WaitingForResource,
    WaitingForBatch,
    WaitingForConveyor,
    BlockedSending,
    BlockedReceiving,
    WaitForProcess,
    /// Waiting on a blockage or on the completion of other processes.
    BlockedUntilCompletion,
    ProcessEnded,
}

impl EntityState {
    fn is_waiting(self) -> bool {
        matches!(
            self,
            EntityState::WaitingForSignal
                | EntityState::InHoldQueue
                | EntityState::WaitingForResource
                | EntityState::WaitingForBatch
                | EntityState::WaitingForConveyor
                | EntityState::BlockedSending
                | EntityState::BlockedReceiving
                | EntityState::WaitForProcess
                | EntityState::BlockedUntilCompletion
        )
    }

    /// Whether the transition `self -> to` is legal.
    pub fn allows(self, to: EntityState) -> bool {
        use EntityState::*;
        match (self, to) {
            // termination may strike in any state
            (_, ProcessEnded) => true,
            (Created, Scheduled) => true,
            (ProcessEnded, Scheduled) => true,
            (Scheduled, Active) => true,
            (Active, Scheduled) => true,
            (Active, s) if s.is_waiting() => true,
            (s, Active) if s.is_waiting() => true,
            _ => false,
        }
    }
}

/// Per-entity record held in the core arena.
pub(crate) struct EntityRecord {
    pub id: EntityId,
    pub name: String,
    pub priority: i32,
    pub created_at: f64,
    pub state: EntityState,
    pub current_process: Option<ProcessId>,
    pub pending_process: Option<ProcessId>,
    pub previous_processes: Vec<ProcessId>,
    pub allocations: Vec<AllocationId>,
    pub pool_allocations: Vec<PoolAllocationId>,
    pub active_blockages: Vec<BlockageId>,
    pub waiting_in: Option<WaitingSite>,
    pub request: Option<RequestId>,
    pub use_sequence: bool,
    pub auto_dispose: bool,
    pub disposed: bool,
}

impl EntityRecord {
    pub fn new(id: EntityId, name: String, priority: i32, created_at: f64) -> EntityRecord {
        EntityRecord {
            id,
            name,
            priority,
            created_at,
            state: EntityState::Created,
            current_process: None,
            pending_process: None,
            previous_processes: Vec::new(),
            allocations: Vec::new(),
            pool_allocations: Vec::new(),
            active_blockages: Vec::new(),
            waiting_in: None,
            request: None,
            use_sequence: false,
            auto_dispose: true,
            disposed: false,
        }
    }

    /// Guarded state transition. The diagnostic names the offending pair.
    pub fn set_state(&mut self, to: EntityState) -> SimResult<()> {
        if !self.state.allows(to) {
            return Err(SimError::illegal(format!(
                "entity {} ({}): illegal transition {:?} -> {:?}",
                self.id.0, self.name, self.state, to
            )));
        }
        self.state = to;
        Ok(())
    }
}

/// Blockage lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockageState {
    Created,
    Active,
    Completed,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct BlockageWaiter {
    pub entity: EntityId,
    pub process: ProcessId,
    pub token: u64,
}

/// A named reusable guard owned by one entity. While Active, other entities
/// that `wait_for_blockage` it are parked until the owner clears it.
pub(crate) struct BlockageRec {
    pub name: String,
    pub owner: EntityId,
    pub state: BlockageState,
    /// Process that started the current activation; clearing must come from
    /// the same process invocation.
    pub started_by: Option<ProcessId>,
    pub waiters: Vec<BlockageWaiter>,
}

impl BlockageRec {
    pub fn new(name: String, owner: EntityId) -> BlockageRec {
        BlockageRec { name, owner, state: BlockageState::Created, started_by: None, waiters: Vec::new() }
    }
}
