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

//! The simulation environment.
//!
//! [`Simulation`] owns everything: the executive, the entity/process/
//! resource arenas and all waiting lines. It is the process model of the
//! run — it creates entities and generators, drives the event loop with
//! [`Simulation::run`], and closes each replication by terminating
//! whatever is still suspended in [`Simulation::after_replication`].
//!
//! All cross-references between elements are index handles into the arenas
//! owned here; events and queues carry handles, never owning references.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use tracing::{debug, trace};

use crate::blocking::{BatchQueueRec, BlockingQueueRec, EntityPredicate, ItemPredicate, ReceiverEntry, SenderEntry};
use crate::entity::{
    BatchQueueId, BlockageId, BlockageRec, BlockageState, BlockageWaiter, BlockingQueueId,
    EntityId, EntityRecord, EntityState, SignalId, WaitingSite,
};
use crate::error::{SimError, SimResult};
use crate::executive::{priority, EventAction, EventHandle, Executive};
use crate::pool::{
    AllocationRule, FirstAvailable, GreedySplit, MemberAvailability, PoolAllocation,
    PoolAllocationId, PoolId, PoolRec, SelectionRule,
};
use crate::process::{
    ProcessContext, ProcessFuture, ProcessId, ProcessRecord, ProcessRoutine, ProcessState,
    ResumeOutcome, SuspendKind, Suspension,
};
use crate::queue::{
    Discipline, HoldEntry, HoldQueueId, HoldQueueRec, QueueId, Request, RequestId,
    RequestQueueRec, SeizeTarget, WaitQueue,
};
use crate::resource::{Allocation, AllocationId, ResourceId, ResourceRecord, ResourceState};
use crate::stats::{NullStats, StatsSink};

/// Identifies an entity generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GeneratorId(pub(crate) usize);

/// Source of inter-event times for generators. Implemented by any
/// `FnMut() -> f64` closure, so `rand_distr` samplers plug in directly.
pub trait VariateSource {
    fn next(&mut self) -> f64;
}

impl<F: FnMut() -> f64> VariateSource for F {
    fn next(&mut self) -> f64 {
        self()
    }
}

/// Which condition ends a [`Simulation::run`].
pub enum EndCondition {
    /// Run until the clock reaches this replication length. Events strictly
    /// later stay unexecuted and the clock lands exactly on the length.
    Time(f64),
    /// Run until there are no more events scheduled.
    NoEvents,
    /// Execute this many events in total.
    NSteps(u64),
}

/// Outcome of a capacity request against either a resource or a pool.
pub(crate) enum SeizeGrant {
    Single(AllocationId),
    Pooled(PoolAllocationId),
}

pub(crate) struct SignalWaiter {
    pub entity: EntityId,
    pub process: ProcessId,
    pub token: u64,
    pub collect_stats: bool,
}

pub(crate) struct SignalRec {
    pub name: String,
    pub waiters: WaitQueue<SignalWaiter>,
}

pub(crate) struct GeneratorRec<M> {
    pub name: String,
    pub source: Box<dyn VariateSource>,
    pub routine: ProcessRoutine<M>,
    pub entity_priority: i32,
    pub auto_dispose: bool,
    pub limit: Option<u64>,
    pub created: u64,
}

type CompletionHook = Rc<dyn Fn(EntityId, ProcessId)>;
type TerminationHook = Rc<dyn Fn(EntityId)>;
type ReplicationHook = Rc<dyn Fn(f64)>;

#[derive(Default)]
pub(crate) struct Hooks {
    pub on_process_completed: Option<CompletionHook>,
    pub on_entity_terminated: Option<TerminationHook>,
    pub on_replication_end: Option<ReplicationHook>,
}

pub(crate) struct Core<M> {
    pub exec: Executive<M>,
    pub stats: Rc<RefCell<dyn StatsSink>>,
    pub entities: Vec<Option<EntityRecord>>,
    pub processes: Vec<Option<ProcessRecord>>,
    pub resources: Vec<ResourceRecord>,
    pub request_queues: Vec<RequestQueueRec>,
    pub hold_queues: Vec<HoldQueueRec>,
    pub signals: Vec<SignalRec>,
    pub blockages: Vec<BlockageRec>,
    pub pools: Vec<PoolRec>,
    pub bqueues: Vec<BlockingQueueRec<M>>,
    pub batch_queues: Vec<BatchQueueRec>,
    pub requests: Vec<Option<Request>>,
    pub allocations: Vec<Option<Allocation>>,
    pub pool_allocations: Vec<Option<PoolAllocation>>,
    pub generators: Vec<GeneratorRec<M>>,
    pub sequences: HashMap<usize, VecDeque<ProcessRoutine<M>>>,
    pub hooks: Hooks,
    pub steps: u64,
    pub num_created: u64,
    pub num_disposed: u64,
}

impl<M: 'static> Core<M> {
    fn new(stats: Rc<RefCell<dyn StatsSink>>) -> Core<M> {
        Core {
            exec: Executive::new(),
            stats,
            entities: Vec::new(),
            processes: Vec::new(),
            resources: Vec::new(),
            request_queues: Vec::new(),
            hold_queues: Vec::new(),
            signals: Vec::new(),
            blockages: Vec::new(),
            pools: Vec::new(),
            bqueues: Vec::new(),
            batch_queues: Vec::new(),
            requests: Vec::new(),
            allocations: Vec::new(),
            pool_allocations: Vec::new(),
            generators: Vec::new(),
            sequences: HashMap::new(),
            hooks: Hooks::default(),
            steps: 0,
            num_created: 0,
            num_disposed: 0,
        }
    }

    // --- arena accessors ---------------------------------------------------

    pub fn entity(&self, id: EntityId) -> SimResult<&EntityRecord> {
        self.entities
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| SimError::invalid(format!("no such entity {}", id.0)))
    }

    pub fn entity_mut(&mut self, id: EntityId) -> SimResult<&mut EntityRecord> {
        self.entities
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| SimError::invalid(format!("no such entity {}", id.0)))
    }

    pub fn process(&self, id: ProcessId) -> SimResult<&ProcessRecord> {
        self.processes
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| SimError::invalid(format!("no such process {}", id.0)))
    }

    pub fn process_mut(&mut self, id: ProcessId) -> SimResult<&mut ProcessRecord> {
        self.processes
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| SimError::invalid(format!("no such process {}", id.0)))
    }

    pub fn request(&self, id: RequestId) -> SimResult<&Request> {
        self.requests
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| SimError::invalid(format!("no such request {}", id.0)))
    }

    pub fn request_mut(&mut self, id: RequestId) -> SimResult<&mut Request> {
        self.requests
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| SimError::invalid(format!("no such request {}", id.0)))
    }

    pub fn blockage_mut(&mut self, id: BlockageId) -> SimResult<&mut BlockageRec> {
        self.blockages
            .get_mut(id.0)
            .ok_or_else(|| SimError::invalid(format!("no such blockage {}", id.0)))
    }

    pub fn blocking_queue(&self, id: BlockingQueueId) -> SimResult<&BlockingQueueRec<M>> {
        self.bqueues
            .get(id.0)
            .ok_or_else(|| SimError::invalid(format!("no such blocking queue {}", id.0)))
    }

    fn blocking_queue_mut(&mut self, id: BlockingQueueId) -> SimResult<&mut BlockingQueueRec<M>> {
        self.bqueues
            .get_mut(id.0)
            .ok_or_else(|| SimError::invalid(format!("no such blocking queue {}", id.0)))
    }

    pub fn batch_queue(&self, id: BatchQueueId) -> SimResult<&BatchQueueRec> {
        self.batch_queues
            .get(id.0)
            .ok_or_else(|| SimError::invalid(format!("no such batch queue {}", id.0)))
    }

    // --- creation ----------------------------------------------------------

    pub fn create_entity_inner(
        &mut self,
        name: Option<&str>,
        priority: i32,
        auto_dispose: bool,
    ) -> EntityId {
        let id = EntityId(self.entities.len());
        let name = name.map(str::to_owned).unwrap_or_else(|| format!("entity{}", id.0));
        let now = self.exec.now();
        let mut rec = EntityRecord::new(id, name, priority, now);
        rec.auto_dispose = auto_dispose;
        self.entities.push(Some(rec));
        self.num_created += 1;
        id
    }

    pub fn create_process(
        &mut self,
        core_rc: Rc<RefCell<Core<M>>>,
        entity: EntityId,
        routine: ProcessRoutine<M>,
        name: Option<&str>,
    ) -> SimResult<ProcessId> {
        self.entity(entity)?;
        let id = ProcessId(self.processes.len());
        let name = name.map(str::to_owned).unwrap_or_else(|| format!("process{}", id.0));
        let mut rec = ProcessRecord::new(id, name, entity);
        let ctx = ProcessContext { core: core_rc, process: id, entity };
        rec.future = Some(routine(ctx));
        self.processes.push(Some(rec));
        Ok(id)
    }

    // --- suspension plumbing -----------------------------------------------

    /// Mint a fresh one-shot suspension for `pid` and park it.
    pub fn begin_suspension(
        &mut self,
        pid: ProcessId,
        kind: SuspendKind,
        name: Option<&str>,
    ) -> SimResult<u64> {
        let rec = self.process_mut(pid)?;
        match rec.state {
            ProcessState::Running => {}
            ProcessState::Terminated => return Err(SimError::ProcessTerminated),
            s => {
                return Err(SimError::illegal(format!(
                    "process {}: cannot suspend from {:?}",
                    rec.name, s
                )));
            }
        }
        let token = rec.next_token;
        rec.next_token += 1;
        rec.suspension = Some(Suspension {
            token,
            kind,
            name: name.map(str::to_owned),
            outcome: ResumeOutcome::Pending,
        });
        rec.state = ProcessState::Suspended;
        trace!(process = %rec.name, ?kind, token, "suspended");
        Ok(token)
    }

    pub fn schedule_resume(
        &mut self,
        pid: ProcessId,
        token: u64,
        delay: f64,
        priority: i32,
    ) -> SimResult<EventHandle> {
        self.exec.schedule(delay, priority, EventAction::Resume { process: pid, token })
    }

    /// Mark the suspension resumed if the token is still current. Returns
    /// whether the process should be polled; stale tokens are skipped.
    pub fn deliver_resume(&mut self, pid: ProcessId, token: u64) -> bool {
        let Some(rec) = self.processes.get_mut(pid.0).and_then(Option::as_mut) else {
            return false;
        };
        if rec.state != ProcessState::Suspended {
            return false;
        }
        match rec.suspension.as_mut() {
            Some(s) if s.token == token && s.outcome == ResumeOutcome::Pending => {
                s.outcome = ResumeOutcome::Resumed;
                true
            }
            _ => {
                trace!(process = %rec.name, token, "stale resume skipped");
                false
            }
        }
    }

    /// Schedule the activation of a Created process, enforcing the
    /// one-pending-process-per-entity rule.
    pub fn schedule_activation(
        &mut self,
        pid: ProcessId,
        delay: f64,
        priority: i32,
    ) -> SimResult<()> {
        let rec = self.process(pid)?;
        if rec.state != ProcessState::Created {
            return Err(SimError::illegal(format!(
                "cannot activate process {}: it is {:?}",
                rec.name, rec.state
            )));
        }
        let entity = rec.entity;
        let e = self.entity(entity)?;
        if e.pending_process.is_some() || e.current_process.is_some() {
            return Err(SimError::illegal(format!(
                "entity {} ({}): activating a process while another is pending or current",
                entity.0, e.name
            )));
        }
        let handle = self.exec.schedule(delay, priority, EventAction::StartProcess(pid))?;
        self.process_mut(pid)?.activation = Some(handle);
        let e = self.entity_mut(entity)?;
        e.pending_process = Some(pid);
        e.set_state(EntityState::Scheduled)?;
        Ok(())
    }

    // --- requests and allocation -------------------------------------------

    pub fn push_request(&mut self, req: Request) -> RequestId {
        let id = RequestId(self.requests.len());
        self.requests.push(Some(req));
        id
    }

    pub fn enqueue_request(&mut self, qid: QueueId, rid: RequestId, priority: i32) -> SimResult<()> {
        let now = self.exec.now();
        let q = self
            .request_queues
            .get_mut(qid.0)
            .ok_or_else(|| SimError::invalid(format!("no such queue {}", qid.0)))?;
        let mut stats = self.stats.borrow_mut();
        q.q.enqueue(rid, priority, now, &mut *stats);
        Ok(())
    }

    /// Remove a request from its current queue and retire it from the
    /// arena.
    pub fn remove_request(&mut self, rid: RequestId, collect_stats: bool) -> SimResult<Request> {
        let qid = self.request(rid)?.queue;
        let now = self.exec.now();
        if let Some(q) = self.request_queues.get_mut(qid.0) {
            let mut stats = self.stats.borrow_mut();
            q.q.remove_where(|r| *r == rid, collect_stats, now, &mut *stats);
        }
        self.requests
            .get_mut(rid.0)
            .and_then(Option::take)
            .ok_or_else(|| SimError::invalid(format!("no such request {}", rid.0)))
    }

    fn target_availability(&self, target: SeizeTarget) -> i64 {
        match target {
            SeizeTarget::Resource(r) => {
                self.resources.get(r.0).map_or(0, |rec| rec.num_available())
            }
            SeizeTarget::Pool(p) => self
                .pool_availabilities(p)
                .iter()
                .map(|m| m.available as i64)
                .sum(),
        }
    }

    pub fn can_allocate_target(&self, target: SeizeTarget, amount: u32) -> bool {
        match target {
            SeizeTarget::Resource(r) => {
                self.resources.get(r.0).is_some_and(|rec| rec.can_allocate(amount))
            }
            SeizeTarget::Pool(p) => {
                let avail = self.pool_availabilities(p);
                self.pools
                    .get(p.0)
                    .is_some_and(|pool| !pool.selection.select(&avail, amount).is_empty())
            }
        }
    }

    pub fn pool_availabilities(&self, pid: PoolId) -> Vec<MemberAvailability> {
        let Some(pool) = self.pools.get(pid.0) else {
            return Vec::new();
        };
        pool.members
            .iter()
            .filter_map(|r| self.resources.get(r.0).map(|rec| (*r, rec)))
            .filter(|(_, rec)| rec.state != ResourceState::Inactive)
            .map(|(r, rec)| MemberAvailability {
                resource: r,
                available: rec.num_available().max(0) as u32,
            })
            .collect()
    }

    /// Create allocation records for `amount` units of `target`. The
    /// precondition is `can_allocate`; violating it is a modeling bug.
    pub fn allocate(
        &mut self,
        entity: EntityId,
        target: SeizeTarget,
        amount: u32,
        originating_queue: QueueId,
        name: Option<String>,
    ) -> SimResult<SeizeGrant> {
        match target {
            SeizeTarget::Resource(rid) => {
                let aid = self.allocate_single(entity, rid, amount, originating_queue, name)?;
                Ok(SeizeGrant::Single(aid))
            }
            SeizeTarget::Pool(pid) => {
                let avail = self.pool_availabilities(pid);
                let pool = self
                    .pools
                    .get(pid.0)
                    .ok_or_else(|| SimError::invalid(format!("no such pool {}", pid.0)))?;
                let selected_ids = pool.selection.select(&avail, amount);
                if selected_ids.is_empty() {
                    return Err(SimError::invalid(format!(
                        "pool {}: cannot allocate {amount} units",
                        pool.name
                    )));
                }
                let selected: Vec<MemberAvailability> = selected_ids
                    .iter()
                    .filter_map(|id| avail.iter().find(|m| m.resource == *id).copied())
                    .collect();
                let parts = pool.allocation.split(&selected, amount);
                let split_total: u32 = parts.iter().map(|(_, n)| n).sum();
                if split_total != amount {
                    return Err(SimError::illegal(format!(
                        "pool {}: allocation rule split {split_total} units for a request of {amount}",
                        pool.name
                    )));
                }
                let mut part_ids = Vec::with_capacity(parts.len());
                for (r, n) in parts {
                    part_ids.push(self.allocate_single(
                        entity,
                        r,
                        n,
                        originating_queue,
                        name.clone(),
                    )?);
                }
                let paid = PoolAllocationId(self.pool_allocations.len());
                self.pool_allocations.push(Some(PoolAllocation {
                    id: paid,
                    entity,
                    pool: pid,
                    parts: part_ids,
                    alive: true,
                }));
                self.entity_mut(entity)?.pool_allocations.push(paid);
                Ok(SeizeGrant::Pooled(paid))
            }
        }
    }

    fn allocate_single(
        &mut self,
        entity: EntityId,
        rid: ResourceId,
        amount: u32,
        queue: QueueId,
        name: Option<String>,
    ) -> SimResult<AllocationId> {
        let r = self
            .resources
            .get(rid.0)
            .ok_or_else(|| SimError::invalid(format!("no such resource {}", rid.0)))?;
        if !r.can_allocate(amount) {
            return Err(SimError::invalid(format!(
                "resource {}: cannot allocate {amount} units (capacity {}, busy {}, state {:?})",
                r.name, r.capacity, r.num_busy, r.state
            )));
        }
        let aid = AllocationId(self.allocations.len());
        self.allocations.push(Some(Allocation {
            id: aid,
            entity,
            resource: rid,
            amount,
            queue,
            name,
            alive: true,
        }));
        let now = self.exec.now();
        {
            let mut stats = self.stats.borrow_mut();
            self.resources[rid.0].commit_seize(aid, amount, now, &mut *stats);
        }
        self.entity_mut(entity)?.allocations.push(aid);
        trace!(entity = entity.0, resource = rid.0, amount, "allocated");
        Ok(aid)
    }

    /// Destroy an allocation, return its units and (optionally) re-process
    /// the originating request queue against the freed capacity.
    pub fn deallocate(&mut self, aid: AllocationId, process_queue: bool) -> SimResult<()> {
        let alloc = self
            .allocations
            .get_mut(aid.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| SimError::invalid(format!("no such allocation {}", aid.0)))?;
        if !alloc.alive {
            return Err(SimError::illegal(format!("allocation {} was already released", aid.0)));
        }
        alloc.alive = false;
        let (entity, rid, amount, queue) = (alloc.entity, alloc.resource, alloc.amount, alloc.queue);
        let now = self.exec.now();
        {
            let mut stats = self.stats.borrow_mut();
            self.resources[rid.0].commit_release(aid, amount, now, &mut *stats);
        }
        self.entity_mut(entity)?.allocations.retain(|a| *a != aid);
        self.allocations[aid.0] = None;
        trace!(entity = entity.0, resource = rid.0, amount, "released");
        if process_queue {
            self.process_request_queue(queue)?;
        }
        Ok(())
    }

    /// Release a pooled allocation: give back every part, then re-process
    /// the pool's waiting queue once.
    pub fn deallocate_pool(&mut self, paid: PoolAllocationId) -> SimResult<()> {
        let pa = self
            .pool_allocations
            .get_mut(paid.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| SimError::invalid(format!("no such pool allocation {}", paid.0)))?;
        if !pa.alive {
            return Err(SimError::illegal(format!(
                "pool allocation {} was already released",
                paid.0
            )));
        }
        pa.alive = false;
        let (entity, pool, parts) = (pa.entity, pa.pool, pa.parts.clone());
        for part in parts {
            self.deallocate(part, false)?;
        }
        self.entity_mut(entity)?.pool_allocations.retain(|p| *p != paid);
        self.pool_allocations[paid.0] = None;
        let queue = self
            .pools
            .get(pool.0)
            .ok_or_else(|| SimError::invalid(format!("no such pool {}", pool.0)))?
            .queue;
        self.process_request_queue(queue)
    }

    /// Walk a request queue head first, scheduling a resume for every
    /// request the running availability can cover and stopping at the first
    /// it cannot. No allocation happens here: the resumed seize allocates
    /// from its own process context.
    pub fn process_request_queue(&mut self, qid: QueueId) -> SimResult<()> {
        let rids: Vec<RequestId> = match self.request_queues.get(qid.0) {
            Some(q) => q.q.iter().copied().collect(),
            None => return Ok(()),
        };
        let mut running: HashMap<SeizeTarget, i64> = HashMap::new();
        for rid in rids {
            let Some(req) = self.requests.get(rid.0).and_then(Option::as_ref) else {
                continue;
            };
            let (process, token, amount, target, pending) =
                (req.process, req.token, req.amount, req.target, req.resume_pending);
            let avail = match running.get(&target) {
                Some(v) => *v,
                None => self.target_availability(target),
            };
            if pending {
                // already promised; its units are spoken for
                running.insert(target, avail - amount as i64);
                continue;
            }
            if (amount as i64) <= avail && self.can_allocate_target(target, amount) {
                self.schedule_resume(process, token, 0.0, priority::RESUME)?;
                self.request_mut(rid)?.resume_pending = true;
                running.insert(target, avail - amount as i64);
            } else {
                break;
            }
        }
        Ok(())
    }

    // --- hold queues -------------------------------------------------------

    pub fn enqueue_hold(&mut self, hq: HoldQueueId, entry: HoldEntry, priority: i32) -> SimResult<()> {
        let now = self.exec.now();
        let q = self
            .hold_queues
            .get_mut(hq.0)
            .ok_or_else(|| SimError::invalid(format!("no such hold queue {}", hq.0)))?;
        let mut stats = self.stats.borrow_mut();
        q.q.enqueue(entry, priority, now, &mut *stats);
        Ok(())
    }

    pub fn remove_hold_entry(
        &mut self,
        hq: HoldQueueId,
        process: ProcessId,
        collect_stats: bool,
    ) -> SimResult<Option<HoldEntry>> {
        let now = self.exec.now();
        let q = self
            .hold_queues
            .get_mut(hq.0)
            .ok_or_else(|| SimError::invalid(format!("no such hold queue {}", hq.0)))?;
        let mut stats = self.stats.borrow_mut();
        Ok(q.q.remove_where(|e| e.process == process, collect_stats, now, &mut *stats))
    }

    /// Remove the hold-queue entry of `entity`, if any.
    pub fn remove_hold_entry_of(
        &mut self,
        hq: HoldQueueId,
        entity: EntityId,
        collect_stats: bool,
    ) -> SimResult<Option<HoldEntry>> {
        self.remove_hold_where(hq, |e| e.entity == entity, collect_stats)
    }

    // --- signals -----------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn attach_signal_waiter(
        &mut self,
        sig: SignalId,
        entity: EntityId,
        process: ProcessId,
        token: u64,
        priority: i32,
        collect_stats: bool,
    ) -> SimResult<()> {
        let now = self.exec.now();
        let s = self
            .signals
            .get_mut(sig.0)
            .ok_or_else(|| SimError::invalid(format!("no such signal {}", sig.0)))?;
        let mut stats = self.stats.borrow_mut();
        s.waiters.enqueue(
            SignalWaiter { entity, process, token, collect_stats },
            priority,
            now,
            &mut *stats,
        );
        Ok(())
    }

    /// Silently detach a terminated process from a signal's waiter set.
    pub fn remove_signal_waiter(&mut self, sig: SignalId, pid: ProcessId) -> SimResult<()> {
        let now = self.exec.now();
        if let Some(s) = self.signals.get_mut(sig.0) {
            let mut stats = self.stats.borrow_mut();
            s.waiters.remove_where(|w| w.process == pid, false, now, &mut *stats);
        }
        Ok(())
    }

    /// Release every current waiter of `sig` in priority+FIFO order. Each
    /// resume is scheduled at `resume_priority` and the insertion sequence
    /// keeps the waiter order. Returns how many were released.
    pub fn fire_signal_now(&mut self, sig: SignalId, resume_priority: i32) -> SimResult<usize> {
        let now = self.exec.now();
        let mut released = Vec::new();
        {
            let s = self
                .signals
                .get_mut(sig.0)
                .ok_or_else(|| SimError::invalid(format!("no such signal {}", sig.0)))?;
            let mut stats = self.stats.borrow_mut();
            while let Some(collect) = s.waiters.peek().map(|w| w.collect_stats) {
                if let Some(w) = s.waiters.pop_first(collect, now, &mut *stats) {
                    released.push(w);
                }
            }
        }
        let count = released.len();
        for w in released {
            self.entity_mut(w.entity)?.waiting_in = None;
            self.schedule_resume(w.process, w.token, 0.0, resume_priority)?;
        }
        debug!(signal = sig.0, count, "signal fired");
        Ok(count)
    }

    // --- blocking queues ---------------------------------------------------

    pub fn deposit_item(&mut self, bq: BlockingQueueId, item: M, now: f64) -> SimResult<()> {
        let rec = self
            .bqueues
            .get_mut(bq.0)
            .ok_or_else(|| SimError::invalid(format!("no such blocking queue {}", bq.0)))?;
        let mut stats = self.stats.borrow_mut();
        rec.deposit(item, now, &mut *stats);
        Ok(())
    }

    pub fn take_items(
        &mut self,
        bq: BlockingQueueId,
        amount: usize,
        pred: &Option<ItemPredicate<M>>,
        now: f64,
    ) -> SimResult<Vec<M>> {
        let rec = self
            .bqueues
            .get_mut(bq.0)
            .ok_or_else(|| SimError::invalid(format!("no such blocking queue {}", bq.0)))?;
        let items = rec.take_items(amount, pred);
        let mut stats = self.stats.borrow_mut();
        rec.observe_buffer(now, &mut *stats);
        Ok(items)
    }

    pub fn enqueue_sender(
        &mut self,
        bq: BlockingQueueId,
        entry: SenderEntry,
        priority: i32,
    ) -> SimResult<()> {
        let now = self.exec.now();
        let rec = self
            .bqueues
            .get_mut(bq.0)
            .ok_or_else(|| SimError::invalid(format!("no such blocking queue {}", bq.0)))?;
        let mut stats = self.stats.borrow_mut();
        rec.senders.enqueue(entry, priority, now, &mut *stats);
        Ok(())
    }

    pub fn remove_sender(
        &mut self,
        bq: BlockingQueueId,
        process: ProcessId,
        collect_stats: bool,
    ) -> SimResult<()> {
        let now = self.exec.now();
        let rec = self
            .bqueues
            .get_mut(bq.0)
            .ok_or_else(|| SimError::invalid(format!("no such blocking queue {}", bq.0)))?;
        let mut stats = self.stats.borrow_mut();
        rec.senders.remove_where(|s| s.process == process, collect_stats, now, &mut *stats);
        Ok(())
    }

    pub fn enqueue_receiver(
        &mut self,
        bq: BlockingQueueId,
        entry: ReceiverEntry<M>,
        priority: i32,
    ) -> SimResult<()> {
        let now = self.exec.now();
        let rec = self
            .bqueues
            .get_mut(bq.0)
            .ok_or_else(|| SimError::invalid(format!("no such blocking queue {}", bq.0)))?;
        let mut stats = self.stats.borrow_mut();
        rec.receivers.enqueue(entry, priority, now, &mut *stats);
        Ok(())
    }

    pub fn remove_receiver(
        &mut self,
        bq: BlockingQueueId,
        process: ProcessId,
        collect_stats: bool,
    ) -> SimResult<()> {
        let now = self.exec.now();
        let rec = self
            .bqueues
            .get_mut(bq.0)
            .ok_or_else(|| SimError::invalid(format!("no such blocking queue {}", bq.0)))?;
        let mut stats = self.stats.borrow_mut();
        rec.receivers.remove_where(|r| r.process == process, collect_stats, now, &mut *stats);
        Ok(())
    }

    /// Wake blocked senders while unreserved space remains, in line order.
    pub fn process_bq_senders(&mut self, bq: BlockingQueueId) -> SimResult<()> {
        let mut picks = Vec::new();
        {
            let rec = self.blocking_queue_mut(bq)?;
            let mut space = rec.unreserved_space();
            for s in rec.senders.iter_mut() {
                if s.resume_pending {
                    continue;
                }
                if space == 0 {
                    break;
                }
                s.resume_pending = true;
                space -= 1;
                picks.push((s.process, s.token));
            }
        }
        for (p, t) in picks {
            self.schedule_resume(p, t, 0.0, priority::RESUME)?;
        }
        Ok(())
    }

    /// Wake the first blocked receiver whose request the buffer can fill.
    /// Head-first: an unfillable head blocks everyone behind it.
    pub fn process_bq_receivers(&mut self, bq: BlockingQueueId) -> SimResult<()> {
        let pick = {
            let rec = self.blocking_queue(bq)?;
            match rec.receivers.iter().find(|r| !r.resume_pending) {
                None => None,
                Some(r) => {
                    if rec.can_fill(r.amount, &r.pred) {
                        Some((r.process, r.token))
                    } else {
                        None
                    }
                }
            }
        };
        if let Some((p, t)) = pick {
            {
                let rec = self.blocking_queue_mut(bq)?;
                for r in rec.receivers.iter_mut() {
                    if r.process == p {
                        r.resume_pending = true;
                    }
                }
            }
            self.schedule_resume(p, t, 0.0, priority::RESUME)?;
        }
        Ok(())
    }

    // --- batch queues ------------------------------------------------------

    pub fn enqueue_batch_entry(
        &mut self,
        id: BatchQueueId,
        entry: crate::blocking::BatchEntry,
    ) -> SimResult<()> {
        let now = self.exec.now();
        let rec = self
            .batch_queues
            .get_mut(id.0)
            .ok_or_else(|| SimError::invalid(format!("no such batch queue {}", id.0)))?;
        let mut stats = self.stats.borrow_mut();
        rec.q.enqueue(entry, 0, now, &mut *stats);
        Ok(())
    }

    /// Silent removal: batched peers leave the queue without closing a wait
    /// interval.
    pub fn remove_batch_entry(&mut self, id: BatchQueueId, process: ProcessId) -> SimResult<()> {
        let now = self.exec.now();
        let rec = self
            .batch_queues
            .get_mut(id.0)
            .ok_or_else(|| SimError::invalid(format!("no such batch queue {}", id.0)))?;
        let mut stats = self.stats.borrow_mut();
        rec.q.remove_where(|e| e.process == process, false, now, &mut *stats);
        Ok(())
    }
}

// --- the executive drive: polling, completion, termination -----------------

fn take_future<M: 'static>(core: &Rc<RefCell<Core<M>>>, pid: ProcessId) -> Option<ProcessFuture> {
    core.borrow_mut()
        .processes
        .get_mut(pid.0)
        .and_then(Option::as_mut)
        .and_then(|r| r.future.take())
}

/// Poll a process future once. `Pending` parks it back in its slot; `Ok`
/// runs the completion protocol; the termination error is absorbed here.
pub(crate) fn poll_process<M: 'static>(
    core: &Rc<RefCell<Core<M>>>,
    pid: ProcessId,
) -> SimResult<()> {
    let Some(mut fut) = take_future(core, pid) else {
        return Ok(());
    };
    let mut cx = Context::from_waker(Waker::noop());
    match fut.as_mut().poll(&mut cx) {
        Poll::Pending => {
            let mut c = core.borrow_mut();
            if let Some(rec) = c.processes.get_mut(pid.0).and_then(Option::as_mut) {
                if rec.state != ProcessState::Terminated {
                    rec.future = Some(fut);
                }
            }
            Ok(())
        }
        Poll::Ready(Ok(())) => complete_process(core, pid),
        Poll::Ready(Err(SimError::ProcessTerminated)) => Ok(()),
        Poll::Ready(Err(e)) => Err(e),
    }
}

/// Fire a Created process: move it to Running and poll until its first
/// suspension.
pub(crate) fn start_process<M: 'static>(
    core: &Rc<RefCell<Core<M>>>,
    pid: ProcessId,
) -> SimResult<()> {
    {
        let mut c = core.borrow_mut();
        let now = c.exec.now();
        let rec = c.process_mut(pid)?;
        match rec.state {
            ProcessState::Created => {}
            // the activation event raced a termination; nothing to start
            ProcessState::Terminated => return Ok(()),
            s => {
                return Err(SimError::illegal(format!(
                    "cannot start process {}: it is {:?}",
                    rec.name, s
                )));
            }
        }
        rec.state = ProcessState::Running;
        rec.activation = None;
        rec.start_time = Some(now);
        let entity = rec.entity;
        trace!(process = %rec.name, now, "process started");
        let e = c.entity_mut(entity)?;
        e.pending_process = None;
        e.current_process = Some(pid);
        e.set_state(EntityState::Active)?;
    }
    poll_process(core, pid)
}

/// The successful-completion protocol.
pub(crate) fn complete_process<M: 'static>(
    core: &Rc<RefCell<Core<M>>>,
    pid: ProcessId,
) -> SimResult<()> {
    let (entity, caller, listeners, hook) = {
        let mut c = core.borrow_mut();
        let now = c.exec.now();
        let rec = c.process_mut(pid)?;
        if rec.state == ProcessState::Terminated {
            return Ok(());
        }
        if rec.state != ProcessState::Running {
            return Err(SimError::illegal(format!(
                "process {} returned while {:?}",
                rec.name, rec.state
            )));
        }
        rec.state = ProcessState::Completed;
        rec.end_time = Some(now);
        let entity = rec.entity;
        let caller = rec.calling_process.take();
        let listeners: Vec<ProcessId> = rec.completion_listeners.drain(..).collect();
        let name = rec.name.clone();
        trace!(process = %name, now, "process completed");
        let e = c.entity_mut(entity)?;
        e.current_process = None;
        e.previous_processes.push(pid);
        if !e.active_blockages.is_empty() {
            return Err(SimError::illegal(format!(
                "process {name} completed while entity {} still owns active blockages",
                e.name
            )));
        }
        e.set_state(EntityState::ProcessEnded)?;
        (entity, caller, listeners, c.hooks.on_process_completed.clone())
    };
    if let Some(h) = hook {
        h(entity, pid);
    }
    // next process in the entity's sequence, or disposal
    let next = {
        let mut c = core.borrow_mut();
        let use_sequence = c.entity(entity)?.use_sequence;
        if use_sequence {
            c.sequences.get_mut(&entity.0).and_then(VecDeque::pop_front)
        } else {
            None
        }
    };
    match next {
        Some(r) => {
            let p = {
                let mut c = core.borrow_mut();
                c.create_process(Rc::clone(core), entity, r, None)?
            };
            core.borrow_mut().schedule_activation(p, 0.0, priority::WAIT_FOR)?;
        }
        None => {
            let mut c = core.borrow_mut();
            if c.entity(entity)?.auto_dispose {
                c.dispose_entity(entity)?;
            }
        }
    }
    // wake whoever was blocked on our completion
    {
        let mut c = core.borrow_mut();
        for l in listeners {
            let Ok(rec) = c.process_mut(l) else { continue };
            if rec.state != ProcessState::Suspended {
                continue;
            }
            rec.watching = rec.watching.saturating_sub(1);
            if rec.watching == 0 {
                if let Some(token) = rec.pending_token() {
                    c.schedule_resume(l, token, 0.0, priority::RESUME)?;
                }
            }
        }
        if let Some(caller) = caller {
            let token = match c.process_mut(caller) {
                Ok(rec) => {
                    rec.called_process = None;
                    if rec.state == ProcessState::Suspended { rec.pending_token() } else { None }
                }
                Err(_) => None,
            };
            if let Some(token) = token {
                c.schedule_resume(caller, token, 0.0, priority::RESUME)?;
            }
        }
    }
    Ok(())
}

/// Terminate a process: tear down everything it holds, deliver the
/// termination error into its continuation, cascade to linked processes.
/// A second terminate on the same process is a no-op.
pub(crate) fn terminate_process<M: 'static>(
    core: &Rc<RefCell<Core<M>>>,
    pid: ProcessId,
) -> SimResult<()> {
    let plan = {
        let mut c = core.borrow_mut();
        let now = c.exec.now();
        let rec = match c.processes.get_mut(pid.0).and_then(Option::as_mut) {
            None => return Err(SimError::invalid(format!("no such process {}", pid.0))),
            Some(r) => r,
        };
        match rec.state {
            ProcessState::Terminated => return Ok(()),
            ProcessState::Completed => {
                return Err(SimError::illegal(format!(
                    "cannot terminate completed process {}",
                    rec.name
                )));
            }
            _ => {}
        }
        let prev_state = rec.state;
        rec.state = ProcessState::Terminated;
        rec.end_time = Some(now);
        let entity = rec.entity;
        let caller = rec.calling_process.take();
        let called = rec.called_process.take();
        let listeners: Vec<ProcessId> = rec.completion_listeners.drain(..).collect();
        let activation = rec.activation.take();
        let delay = rec.delay.take();
        if let Some(s) = rec.suspension.as_mut() {
            s.outcome = ResumeOutcome::Terminated;
        }
        debug!(process = %rec.name, now, "process terminated");
        if let Some(h) = activation {
            c.exec.cancel(&h);
        }
        if let Some(d) = delay {
            c.exec.cancel(&d.handle);
        }
        // 1. full deallocation, waking queued requests on the freed units
        loop {
            let pa = c.entity(entity)?.pool_allocations.first().copied();
            match pa {
                Some(pa) => c.deallocate_pool(pa)?,
                None => break,
            }
        }
        loop {
            let a = c.entity(entity)?.allocations.first().copied();
            match a {
                Some(a) => c.deallocate(a, true)?,
                None => break,
            }
        }
        // 2. silent removal from whatever the entity waits in
        let site = c.entity_mut(entity)?.waiting_in.take();
        match site {
            Some(WaitingSite::RequestQueue(_)) => {
                if let Some(rid) = c.entity_mut(entity)?.request.take() {
                    c.remove_request(rid, false)?;
                }
            }
            Some(WaitingSite::Hold(h)) => {
                c.remove_hold_entry(h, pid, false)?;
            }
            Some(WaitingSite::Signal(s)) => {
                c.remove_signal_waiter(s, pid)?;
            }
            Some(WaitingSite::Blockage { blockage, park }) => {
                if let Ok(b) = c.blockage_mut(blockage) {
                    b.waiters.retain(|w| w.process != pid);
                }
                if let Some(h) = park {
                    c.remove_hold_entry(h, pid, false)?;
                }
            }
            Some(WaitingSite::BlockingSend(b)) => {
                c.remove_sender(b, pid, false)?;
            }
            Some(WaitingSite::BlockingRecv(b)) => {
                c.remove_receiver(b, pid, false)?;
            }
            Some(WaitingSite::Batch(b)) => {
                c.remove_batch_entry(b, pid)?;
            }
            None => {}
        }
        // owned active blockages are implicitly cleared
        let owned: Vec<BlockageId> = c.entity_mut(entity)?.active_blockages.drain(..).collect();
        for bid in owned {
            let waiters: Vec<BlockageWaiter> = {
                let b = c.blockage_mut(bid)?;
                b.state = BlockageState::Completed;
                b.started_by = None;
                b.waiters.drain(..).collect()
            };
            for w in waiters {
                c.schedule_resume(w.process, w.token, 0.0, priority::BLOCKAGE)?;
            }
        }
        let e = c.entity_mut(entity)?;
        e.current_process = None;
        if e.pending_process == Some(pid) {
            e.pending_process = None;
        }
        e.set_state(EntityState::ProcessEnded)?;
        (entity, prev_state, caller, called, listeners, c.hooks.on_entity_terminated.clone())
    };
    let (entity, prev_state, caller, called, listeners, hook) = plan;
    // deliver the termination error into the captured continuation so user
    // destructors run; a never-started future is simply dropped
    if let Some(mut fut) = take_future(core, pid) {
        if prev_state == ProcessState::Suspended {
            let mut cx = Context::from_waker(Waker::noop());
            match fut.as_mut().poll(&mut cx) {
                Poll::Ready(Err(SimError::ProcessTerminated)) | Poll::Ready(Ok(())) => {}
                Poll::Ready(Err(e)) => return Err(e),
                Poll::Pending => {
                    return Err(SimError::illegal(format!(
                        "process {} ignored its termination",
                        pid.0
                    )));
                }
            }
        }
    }
    // 4/5/6: cascade along the process links
    if let Some(p) = caller {
        terminate_process(core, p)?;
    }
    if let Some(p) = called {
        terminate_process(core, p)?;
    }
    for l in listeners {
        terminate_process(core, l)?;
    }
    if let Some(h) = hook {
        h(entity);
    }
    {
        let mut c = core.borrow_mut();
        if c.entity(entity)?.auto_dispose && !c.entity(entity)?.disposed {
            c.dispose_entity(entity)?;
        }
    }
    Ok(())
}

impl<M: 'static> Core<M> {
    /// Retire an entity. Disposing with live allocations is a modeling bug.
    pub fn dispose_entity(&mut self, entity: EntityId) -> SimResult<()> {
        let e = self.entity_mut(entity)?;
        if !e.allocations.is_empty() || !e.pool_allocations.is_empty() {
            return Err(SimError::illegal(format!(
                "disposing entity {} ({}) with live allocations",
                e.id.0, e.name
            )));
        }
        if e.disposed {
            return Ok(());
        }
        e.disposed = true;
        self.num_disposed += 1;
        Ok(())
    }
}

/// The simulation environment: process model, event loop and public API.
///
/// `M` is the item type carried by blocking queues; models that do not use
/// them can leave it at the default `()`.
pub struct Simulation<M = ()> {
    core: Rc<RefCell<Core<M>>>,
}

impl<M: 'static> Default for Simulation<M> {
    fn default() -> Self {
        Simulation::new()
    }
}

impl<M: 'static> Simulation<M> {
    /// Create a simulation that discards statistics.
    pub fn new() -> Simulation<M> {
        Simulation::with_stats(Rc::new(RefCell::new(NullStats)))
    }

    /// Create a simulation publishing statistics into `stats`. The caller
    /// keeps a clone of the `Rc` to read results after the run.
    pub fn with_stats(stats: Rc<RefCell<dyn StatsSink>>) -> Simulation<M> {
        Simulation { core: Rc::new(RefCell::new(Core::new(stats))) }
    }

    /// Current simulation time.
    pub fn now(&self) -> f64 {
        self.core.borrow().exec.now()
    }

    // --- model element constructors ----------------------------------------

    pub fn create_entity(&mut self, name: &str) -> EntityId {
        self.create_entity_with(name, 0, true)
    }

    pub fn create_entity_with(&mut self, name: &str, priority: i32, auto_dispose: bool) -> EntityId {
        self.core.borrow_mut().create_entity_inner(Some(name), priority, auto_dispose)
    }

    /// Give an entity an ordered sequence of routines; each completion
    /// activates the next one. Start the chain with
    /// [`start_sequence`](Self::start_sequence).
    pub fn use_process_sequence(
        &mut self,
        entity: EntityId,
        routines: Vec<ProcessRoutine<M>>,
    ) -> SimResult<()> {
        let mut c = self.core.borrow_mut();
        c.entity_mut(entity)?.use_sequence = true;
        c.sequences.insert(entity.0, routines.into());
        Ok(())
    }

    /// Activate the first routine of an entity's process sequence after
    /// `delay`; the rest follow as each one completes.
    pub fn start_sequence(&mut self, entity: EntityId, delay: f64) -> SimResult<ProcessId> {
        let first = {
            let mut c = self.core.borrow_mut();
            if !c.entity(entity)?.use_sequence {
                return Err(SimError::illegal(format!(
                    "entity {} has no process sequence",
                    entity.0
                )));
            }
            c.sequences.get_mut(&entity.0).and_then(VecDeque::pop_front).ok_or_else(|| {
                SimError::illegal(format!("entity {}: process sequence is empty", entity.0))
            })?
        };
        let p = self.create_process(entity, first, None)?;
        self.core.borrow_mut().schedule_activation(p, delay, priority::WAIT_FOR)?;
        Ok(p)
    }

    /// Create a resource with `capacity` units and a ranked default request
    /// queue.
    pub fn create_resource(&mut self, name: &str, capacity: u32) -> SimResult<ResourceId> {
        self.create_resource_with(name, capacity, false)
    }

    pub fn create_resource_with(
        &mut self,
        name: &str,
        capacity: u32,
        track_state_time: bool,
    ) -> SimResult<ResourceId> {
        if capacity < 1 {
            return Err(SimError::invalid(format!(
                "resource {name}: initial capacity must be >= 1, got {capacity}"
            )));
        }
        let mut c = self.core.borrow_mut();
        let queue = QueueId(c.request_queues.len());
        c.request_queues
            .push(RequestQueueRec { q: WaitQueue::new(format!("{name}.q"), Discipline::Ranked) });
        let id = ResourceId(c.resources.len());
        c.resources.push(ResourceRecord::new(name.to_owned(), capacity, track_state_time, queue));
        Ok(id)
    }

    /// Create a stand-alone request queue usable in `seize_with`.
    pub fn create_queue(&mut self, name: &str) -> QueueId {
        self.create_queue_with(name, Discipline::Ranked)
    }

    pub fn create_queue_with(&mut self, name: &str, discipline: Discipline) -> QueueId {
        let mut c = self.core.borrow_mut();
        let id = QueueId(c.request_queues.len());
        c.request_queues.push(RequestQueueRec { q: WaitQueue::new(name.to_owned(), discipline) });
        id
    }

    pub fn create_hold_queue(&mut self, name: &str) -> HoldQueueId {
        let mut c = self.core.borrow_mut();
        let id = HoldQueueId(c.hold_queues.len());
        c.hold_queues.push(HoldQueueRec { q: WaitQueue::new(name.to_owned(), Discipline::Ranked) });
        id
    }

    pub fn create_signal(&mut self, name: &str) -> SignalId {
        let mut c = self.core.borrow_mut();
        let id = SignalId(c.signals.len());
        c.signals.push(SignalRec {
            name: name.to_owned(),
            waiters: WaitQueue::new(format!("{name}.waiters"), Discipline::Ranked),
        });
        id
    }

    pub fn create_blockage(&mut self, name: &str, owner: EntityId) -> SimResult<BlockageId> {
        let mut c = self.core.borrow_mut();
        c.entity(owner)?;
        let id = BlockageId(c.blockages.len());
        c.blockages.push(BlockageRec::new(name.to_owned(), owner));
        Ok(id)
    }

    /// Create a pool over `members` with the default first-available /
    /// greedy rules.
    pub fn create_pool(&mut self, name: &str, members: Vec<ResourceId>) -> SimResult<PoolId> {
        self.create_pool_with(name, members, Box::new(FirstAvailable), Box::new(GreedySplit))
    }

    pub fn create_pool_with(
        &mut self,
        name: &str,
        members: Vec<ResourceId>,
        selection: Box<dyn SelectionRule>,
        allocation: Box<dyn AllocationRule>,
    ) -> SimResult<PoolId> {
        if members.is_empty() {
            return Err(SimError::invalid(format!("pool {name}: needs at least one member")));
        }
        let mut c = self.core.borrow_mut();
        for m in &members {
            if c.resources.get(m.0).is_none() {
                return Err(SimError::invalid(format!("pool {name}: no such resource {}", m.0)));
            }
        }
        let queue = QueueId(c.request_queues.len());
        c.request_queues
            .push(RequestQueueRec { q: WaitQueue::new(format!("{name}.q"), Discipline::Ranked) });
        let id = PoolId(c.pools.len());
        c.pools.push(PoolRec { name: name.to_owned(), members, queue, selection, allocation });
        Ok(id)
    }

    pub fn create_blocking_queue(&mut self, name: &str, capacity: usize) -> BlockingQueueId {
        let mut c = self.core.borrow_mut();
        let id = BlockingQueueId(c.bqueues.len());
        c.bqueues.push(BlockingQueueRec::new(name.to_owned(), capacity));
        id
    }

    pub fn create_batch_queue(&mut self, name: &str, size: usize) -> BatchQueueId {
        self.create_batch_queue_inner(name, size, None)
    }

    pub fn create_batch_queue_with(
        &mut self,
        name: &str,
        size: usize,
        pred: EntityPredicate,
    ) -> BatchQueueId {
        self.create_batch_queue_inner(name, size, Some(pred))
    }

    fn create_batch_queue_inner(
        &mut self,
        name: &str,
        size: usize,
        pred: Option<EntityPredicate>,
    ) -> BatchQueueId {
        let mut c = self.core.borrow_mut();
        let id = BatchQueueId(c.batch_queues.len());
        c.batch_queues.push(BatchQueueRec::new(name.to_owned(), size, pred));
        id
    }

    // --- processes ---------------------------------------------------------

    /// Create a process on `entity` without scheduling it.
    pub fn create_process(
        &mut self,
        entity: EntityId,
        routine: ProcessRoutine<M>,
        name: Option<&str>,
    ) -> SimResult<ProcessId> {
        let core_rc = Rc::clone(&self.core);
        self.core.borrow_mut().create_process(core_rc, entity, routine, name)
    }

    /// Create a process on `entity` and schedule it to start after `delay`.
    pub fn activate(
        &mut self,
        entity: EntityId,
        routine: ProcessRoutine<M>,
        delay: f64,
    ) -> SimResult<ProcessId> {
        self.activate_with(entity, routine, delay, priority::WAIT_FOR)
    }

    pub fn activate_with(
        &mut self,
        entity: EntityId,
        routine: ProcessRoutine<M>,
        delay: f64,
        priority: i32,
    ) -> SimResult<ProcessId> {
        let p = self.create_process(entity, routine, None)?;
        self.core.borrow_mut().schedule_activation(p, delay, priority)?;
        Ok(p)
    }

    /// Schedule a pre-created process.
    pub fn schedule_process(&mut self, process: ProcessId, delay: f64, priority: i32) -> SimResult<()> {
        self.core.borrow_mut().schedule_activation(process, delay, priority)
    }

    /// Terminate a process (no-op if already terminated), cascading along
    /// its caller/callee/completion links.
    pub fn terminate(&mut self, process: ProcessId) -> SimResult<()> {
        terminate_process(&self.core, process)
    }

    /// Add an entity generator: every `source.next()` time units a new
    /// entity is created and started on `routine`.
    pub fn add_generator(
        &mut self,
        name: &str,
        source: impl VariateSource + 'static,
        routine: ProcessRoutine<M>,
    ) -> SimResult<GeneratorId> {
        self.add_generator_with(name, source, routine, 0, true, None)
    }

    pub fn add_generator_with(
        &mut self,
        name: &str,
        source: impl VariateSource + 'static,
        routine: ProcessRoutine<M>,
        entity_priority: i32,
        auto_dispose: bool,
        limit: Option<u64>,
    ) -> SimResult<GeneratorId> {
        let mut c = self.core.borrow_mut();
        let id = GeneratorId(c.generators.len());
        c.generators.push(GeneratorRec {
            name: name.to_owned(),
            source: Box::new(source),
            routine,
            entity_priority,
            auto_dispose,
            limit,
            created: 0,
        });
        let first = c.generators[id.0].source.next();
        c.exec.schedule(first, priority::QUEUE, EventAction::Arrival(id))?;
        Ok(id)
    }

    fn arrival(&self, g: GeneratorId) -> SimResult<()> {
        let mut c = self.core.borrow_mut();
        let gen = c
            .generators
            .get_mut(g.0)
            .ok_or_else(|| SimError::invalid(format!("no such generator {}", g.0)))?;
        if let Some(limit) = gen.limit {
            if gen.created >= limit {
                return Ok(());
            }
        }
        gen.created += 1;
        let name = format!("{}{}", gen.name, gen.created);
        let routine = Rc::clone(&gen.routine);
        let entity_priority = gen.entity_priority;
        let auto_dispose = gen.auto_dispose;
        let next_delay =
            if gen.limit.map_or(true, |l| gen.created < l) { Some(gen.source.next()) } else { None };
        let e = c.create_entity_inner(Some(&name), entity_priority, auto_dispose);
        let p = c.create_process(Rc::clone(&self.core), e, routine, Some(&name))?;
        c.schedule_activation(p, 0.0, priority::WAIT_FOR)?;
        if let Some(d) = next_delay {
            c.exec.schedule(d, priority::QUEUE, EventAction::Arrival(g))?;
        }
        Ok(())
    }

    // --- scheduled external operations -------------------------------------

    /// Release every entity currently waiting for `signal`, in
    /// priority+FIFO order. Returns how many were released.
    pub fn fire_signal(&mut self, signal: SignalId) -> SimResult<usize> {
        self.fire_signal_with(signal, priority::RESUME)
    }

    pub fn fire_signal_with(&mut self, signal: SignalId, resume_priority: i32) -> SimResult<usize> {
        self.core.borrow_mut().fire_signal_now(signal, resume_priority)
    }

    /// Fire `signal` after `delay`.
    pub fn schedule_signal(&mut self, signal: SignalId, delay: f64) -> SimResult<EventHandle> {
        let mut c = self.core.borrow_mut();
        c.exec.schedule(
            delay,
            priority::RESUME,
            EventAction::Callback(Box::new(move |core: &mut Core<M>| {
                core.fire_signal_now(signal, priority::RESUME).map(|_| ())
            })),
        )
    }

    /// Change a resource's capacity now; growth re-processes its default
    /// request queue so pending seizes can succeed at this instant.
    pub fn set_capacity(&mut self, resource: ResourceId, capacity: u32) -> SimResult<()> {
        self.core.borrow_mut().set_capacity_inner(resource, capacity)
    }

    pub fn schedule_capacity_change(
        &mut self,
        resource: ResourceId,
        capacity: u32,
        delay: f64,
    ) -> SimResult<EventHandle> {
        let mut c = self.core.borrow_mut();
        c.exec.schedule(
            delay,
            priority::RELEASE,
            EventAction::Callback(Box::new(move |core: &mut Core<M>| {
                core.set_capacity_inner(resource, capacity)
            })),
        )
    }

    /// Remove `entity` from a hold queue and schedule its resume.
    pub fn release_hold(&mut self, queue: HoldQueueId, entity: EntityId) -> SimResult<()> {
        self.release_hold_with(queue, entity, priority::RESUME)
    }

    pub fn release_hold_with(
        &mut self,
        queue: HoldQueueId,
        entity: EntityId,
        resume_priority: i32,
    ) -> SimResult<()> {
        let mut c = self.core.borrow_mut();
        let entry = c.remove_hold_where(queue, |e| e.entity == entity, true)?.ok_or_else(|| {
            SimError::illegal(format!("entity {} is not in this hold queue", entity.0))
        })?;
        c.entity_mut(entity)?.waiting_in = None;
        c.schedule_resume(entry.process, entry.token, 0.0, resume_priority)?;
        Ok(())
    }

    /// Remove the head of a hold queue and schedule its resume.
    pub fn release_hold_first(&mut self, queue: HoldQueueId) -> SimResult<Option<EntityId>> {
        let mut c = self.core.borrow_mut();
        let Some(entry) = c.remove_hold_where(queue, |_| true, true)? else {
            return Ok(None);
        };
        c.entity_mut(entry.entity)?.waiting_in = None;
        c.schedule_resume(entry.process, entry.token, 0.0, priority::RESUME)?;
        Ok(Some(entry.entity))
    }

    /// Release everyone in the hold queue, in queue order.
    pub fn release_hold_all(&mut self, queue: HoldQueueId) -> SimResult<usize> {
        let mut n = 0;
        while self.release_hold_first(queue)?.is_some() {
            n += 1;
        }
        Ok(n)
    }

    /// Remove `entity` from a hold queue and continue its process
    /// immediately, within the current event.
    pub fn release_hold_now(&mut self, queue: HoldQueueId, entity: EntityId) -> SimResult<()> {
        let process = {
            let mut c = self.core.borrow_mut();
            let entry = c.remove_hold_where(queue, |e| e.entity == entity, true)?.ok_or_else(
                || SimError::illegal(format!("entity {} is not in this hold queue", entity.0)),
            )?;
            c.entity_mut(entity)?.waiting_in = None;
            if !c.deliver_resume(entry.process, entry.token) {
                return Ok(());
            }
            entry.process
        };
        poll_process(&self.core, process)
    }

    /// After `delay`, release the then-first entity of the hold queue.
    pub fn schedule_hold_release(
        &mut self,
        queue: HoldQueueId,
        delay: f64,
    ) -> SimResult<EventHandle> {
        let mut c = self.core.borrow_mut();
        c.exec.schedule(
            delay,
            priority::RESUME,
            EventAction::Callback(Box::new(move |core: &mut Core<M>| {
                if let Some(entry) = core.remove_hold_where(queue, |_| true, true)? {
                    core.entity_mut(entry.entity)?.waiting_in = None;
                    core.schedule_resume(entry.process, entry.token, 0.0, priority::RESUME)?;
                }
                Ok(())
            })),
        )
    }

    /// Move an entity's pending seize request to another queue, optionally
    /// re-targeting it. The suspended seize will allocate from the new
    /// target when it resumes; releases on the old target keep walking the
    /// request's originating queue.
    pub fn move_request(
        &mut self,
        entity: EntityId,
        to_queue: QueueId,
        new_target: Option<SeizeTarget>,
    ) -> SimResult<()> {
        self.core.borrow_mut().move_request_inner(entity, to_queue, new_target)
    }

    // --- queries -----------------------------------------------------------

    pub fn entity_state(&self, e: EntityId) -> SimResult<EntityState> {
        Ok(self.core.borrow().entity(e)?.state)
    }

    pub fn process_state(&self, p: ProcessId) -> SimResult<ProcessState> {
        Ok(self.core.borrow().process(p)?.state)
    }

    /// When the entity was created.
    pub fn entity_creation_time(&self, e: EntityId) -> SimResult<f64> {
        Ok(self.core.borrow().entity(e)?.created_at)
    }

    /// When the process first ran, if it has started.
    pub fn process_start_time(&self, p: ProcessId) -> SimResult<Option<f64>> {
        Ok(self.core.borrow().process(p)?.start_time)
    }

    /// When the process completed or was terminated, if it has ended.
    pub fn process_end_time(&self, p: ProcessId) -> SimResult<Option<f64>> {
        Ok(self.core.borrow().process(p)?.end_time)
    }

    pub fn resource_state(&self, r: ResourceId) -> SimResult<ResourceState> {
        Ok(self.resource(r)?.0)
    }

    fn resource(&self, r: ResourceId) -> SimResult<(ResourceState, u32, u32, u64, u64)> {
        let c = self.core.borrow();
        let rec = c
            .resources
            .get(r.0)
            .ok_or_else(|| SimError::invalid(format!("no such resource {}", r.0)))?;
        Ok((rec.state, rec.capacity, rec.num_busy, rec.num_times_seized, rec.num_times_released))
    }

    pub fn capacity(&self, r: ResourceId) -> SimResult<u32> {
        Ok(self.resource(r)?.1)
    }

    pub fn num_busy(&self, r: ResourceId) -> SimResult<u32> {
        Ok(self.resource(r)?.2)
    }

    pub fn num_available(&self, r: ResourceId) -> SimResult<i64> {
        let (_, capacity, busy, _, _) = self.resource(r)?;
        Ok(capacity as i64 - busy as i64)
    }

    pub fn num_times_seized(&self, r: ResourceId) -> SimResult<u64> {
        Ok(self.resource(r)?.3)
    }

    /// The request queue seizes of this resource wait in by default.
    pub fn default_queue(&self, r: ResourceId) -> SimResult<QueueId> {
        let c = self.core.borrow();
        c.resources
            .get(r.0)
            .map(|rec| rec.default_queue)
            .ok_or_else(|| SimError::invalid(format!("no such resource {}", r.0)))
    }

    pub fn num_times_released(&self, r: ResourceId) -> SimResult<u64> {
        Ok(self.resource(r)?.4)
    }

    /// Live allocations of `entity`, pool parts included.
    pub fn allocations(&self, entity: EntityId) -> SimResult<Vec<Allocation>> {
        let c = self.core.borrow();
        Ok(c.entity(entity)?
            .allocations
            .iter()
            .filter_map(|a| c.allocations.get(a.0).and_then(Option::as_ref))
            .cloned()
            .collect())
    }

    pub fn total_amount_allocated(&self, entity: EntityId, resource: ResourceId) -> SimResult<u32> {
        Ok(self
            .allocations(entity)?
            .iter()
            .filter(|a| a.resource() == resource)
            .map(Allocation::amount)
            .sum())
    }

    pub fn num_allocations(&self, entity: EntityId) -> SimResult<usize> {
        Ok(self.allocations(entity)?.len())
    }

    pub fn is_using(&self, entity: EntityId, resource: ResourceId) -> SimResult<bool> {
        Ok(self.total_amount_allocated(entity, resource)? > 0)
    }

    pub fn queue_len(&self, q: QueueId) -> SimResult<usize> {
        let c = self.core.borrow();
        c.request_queues
            .get(q.0)
            .map(|r| r.q.len())
            .ok_or_else(|| SimError::invalid(format!("no such queue {}", q.0)))
    }

    pub fn hold_queue_len(&self, q: HoldQueueId) -> SimResult<usize> {
        let c = self.core.borrow();
        c.hold_queues
            .get(q.0)
            .map(|r| r.q.len())
            .ok_or_else(|| SimError::invalid(format!("no such hold queue {}", q.0)))
    }

    pub fn buffer_len(&self, q: BlockingQueueId) -> SimResult<usize> {
        Ok(self.core.borrow().blocking_queue(q)?.items.len())
    }

    /// Live (non-cancelled) events still scheduled.
    pub fn pending_events(&self) -> usize {
        self.core.borrow().exec.pending_events()
    }

    /// Processes currently suspended.
    pub fn num_suspended(&self) -> usize {
        self.core
            .borrow()
            .processes
            .iter()
            .flatten()
            .filter(|r| r.state == ProcessState::Suspended)
            .count()
    }

    pub fn num_entities_created(&self) -> u64 {
        self.core.borrow().num_created
    }

    pub fn num_entities_disposed(&self) -> u64 {
        self.core.borrow().num_disposed
    }

    // --- hooks -------------------------------------------------------------

    /// Called after every successful process completion.
    pub fn on_process_completed(&mut self, f: impl Fn(EntityId, ProcessId) + 'static) {
        self.core.borrow_mut().hooks.on_process_completed = Some(Rc::new(f));
    }

    /// Called after every entity termination.
    pub fn on_entity_terminated(&mut self, f: impl Fn(EntityId) + 'static) {
        self.core.borrow_mut().hooks.on_entity_terminated = Some(Rc::new(f));
    }

    /// Called at the end of `after_replication` with the final clock value.
    pub fn on_replication_end(&mut self, f: impl Fn(f64) + 'static) {
        self.core.borrow_mut().hooks.on_replication_end = Some(Rc::new(f));
    }

    // --- lifecycle ---------------------------------------------------------

    /// Reset the environment for a fresh replication: clock to zero, event
    /// set empty, all entities and processes gone, every resource back in
    /// its documented starting state, statistics reset, generators
    /// re-primed.
    pub fn initialize(&mut self) -> SimResult<()> {
        let mut c = self.core.borrow_mut();
        c.exec.reset();
        c.steps = 0;
        c.num_created = 0;
        c.num_disposed = 0;
        c.entities.clear();
        c.processes.clear();
        c.requests.clear();
        c.allocations.clear();
        c.pool_allocations.clear();
        c.sequences.clear();
        c.stats.borrow_mut().reset(0.0);
        c.reset_elements();
        c.prime_generators()?;
        debug!("replication initialized");
        Ok(())
    }

    /// Discard accumulated statistics and re-enter every element's current
    /// state at this instant.
    pub fn warm_up(&mut self) -> SimResult<()> {
        let mut c = self.core.borrow_mut();
        let now = c.exec.now();
        c.stats.borrow_mut().reset(now);
        c.warm_up_elements(now);
        debug!(now, "warm-up");
        Ok(())
    }

    /// Execute one event. Returns `false` when the event set is empty.
    pub fn step(&mut self) -> SimResult<bool> {
        let popped = {
            let mut c = self.core.borrow_mut();
            let popped = c.exec.pop_next();
            if popped.is_some() {
                c.steps += 1;
            }
            popped
        };
        let Some((_, action)) = popped else {
            return Ok(false);
        };
        self.dispatch(action)
    }

    fn dispatch(&self, action: EventAction<M>) -> SimResult<bool> {
        match action {
            EventAction::StartProcess(p) => start_process(&self.core, p)?,
            EventAction::Resume { process, token } => {
                let live = self.core.borrow_mut().deliver_resume(process, token);
                if live {
                    poll_process(&self.core, process)?;
                }
            }
            EventAction::Arrival(g) => self.arrival(g)?,
            EventAction::Callback(f) => {
                let mut c = self.core.borrow_mut();
                f(&mut c)?;
            }
        }
        Ok(true)
    }

    /// Run the event loop until `until` is met, the event set drains, or an
    /// external halt is requested.
    pub fn run(&mut self, until: EndCondition) -> SimResult<()> {
        loop {
            {
                let mut c = self.core.borrow_mut();
                if c.exec.is_halted() {
                    break;
                }
                match until {
                    EndCondition::NoEvents => {
                        if c.exec.next_time().is_none() {
                            break;
                        }
                    }
                    EndCondition::NSteps(n) => {
                        if c.steps >= n {
                            break;
                        }
                    }
                    EndCondition::Time(t) => {
                        let past_end = match c.exec.next_time() {
                            None => true,
                            Some(tt) => tt > t,
                        };
                        if past_end {
                            if t > c.exec.now() {
                                c.exec.advance_to(t);
                            }
                            break;
                        }
                    }
                }
            }
            if !self.step()? {
                break;
            }
        }
        Ok(())
    }

    /// Ask the run loop to stop before the next event.
    pub fn request_halt(&mut self) {
        self.core.borrow_mut().exec.halt();
    }

    /// End-of-replication contract: terminate every still-suspended
    /// process (idempotently — cascades may get there first), close open
    /// statistics intervals at the final clock value and drop whatever
    /// events remain.
    pub fn after_replication(&mut self) -> SimResult<()> {
        loop {
            let next = {
                let c = self.core.borrow();
                c.processes
                    .iter()
                    .flatten()
                    .find(|r| r.state == ProcessState::Suspended)
                    .map(|r| r.id)
            };
            match next {
                Some(p) => terminate_process(&self.core, p)?,
                None => break,
            }
        }
        let hook = {
            let mut c = self.core.borrow_mut();
            let now = c.exec.now();
            c.finalize_stats(now);
            c.exec.clear_events();
            debug!(now, "replication ended");
            c.hooks.on_replication_end.clone()
        };
        if let Some(h) = hook {
            h(self.now());
        }
        Ok(())
    }

    /// Run a replication to `until` and close it with
    /// [`after_replication`](Self::after_replication). Call
    /// [`initialize`](Self::initialize) first when re-running.
    pub fn run_replication(&mut self, until: EndCondition) -> SimResult<()> {
        self.run(until)?;
        self.after_replication()
    }
}

impl<M: 'static> Core<M> {
    fn remove_hold_where(
        &mut self,
        hq: HoldQueueId,
        pred: impl Fn(&HoldEntry) -> bool,
        collect_stats: bool,
    ) -> SimResult<Option<HoldEntry>> {
        let now = self.exec.now();
        let q = self
            .hold_queues
            .get_mut(hq.0)
            .ok_or_else(|| SimError::invalid(format!("no such hold queue {}", hq.0)))?;
        let mut stats = self.stats.borrow_mut();
        Ok(q.q.remove_where(pred, collect_stats, now, &mut *stats))
    }

    /// Put every model element back into its documented replication start
    /// state and publish the fresh zero levels.
    fn reset_elements(&mut self) {
        {
            let mut stats = self.stats.borrow_mut();
            for r in &mut self.resources {
                r.initialize(&mut *stats);
            }
            for q in &mut self.request_queues {
                q.q.clear();
                q.q.observe_level(0.0, &mut *stats);
            }
            for q in &mut self.hold_queues {
                q.q.clear();
                q.q.observe_level(0.0, &mut *stats);
            }
            for bq in &mut self.bqueues {
                bq.clear();
                bq.observe_buffer(0.0, &mut *stats);
            }
        }
        for s in &mut self.signals {
            s.waiters.clear();
        }
        for b in &mut self.batch_queues {
            b.q.clear();
        }
        for b in &mut self.blockages {
            b.state = BlockageState::Created;
            b.started_by = None;
            b.waiters.clear();
        }
    }

    fn prime_generators(&mut self) -> SimResult<()> {
        for i in 0..self.generators.len() {
            self.generators[i].created = 0;
            let d = self.generators[i].source.next();
            self.exec.schedule(d, priority::QUEUE, EventAction::Arrival(GeneratorId(i)))?;
        }
        Ok(())
    }

    fn warm_up_elements(&mut self, now: f64) {
        let mut stats = self.stats.borrow_mut();
        for r in &mut self.resources {
            r.warm_up(now, &mut *stats);
        }
        for q in &self.request_queues {
            q.q.observe_level(now, &mut *stats);
        }
        for q in &self.hold_queues {
            q.q.observe_level(now, &mut *stats);
        }
        for bq in &self.bqueues {
            bq.observe_buffer(now, &mut *stats);
        }
    }

    fn finalize_stats(&mut self, now: f64) {
        let mut stats = self.stats.borrow_mut();
        for r in &mut self.resources {
            r.finalize(now, &mut *stats);
        }
    }

    fn set_capacity_inner(&mut self, resource: ResourceId, capacity: u32) -> SimResult<()> {
        let now = self.exec.now();
        let rec = self
            .resources
            .get_mut(resource.0)
            .ok_or_else(|| SimError::invalid(format!("no such resource {}", resource.0)))?;
        let queue = rec.default_queue;
        {
            let mut stats = self.stats.borrow_mut();
            rec.set_capacity(capacity, now, &mut *stats);
        }
        self.process_request_queue(queue)
    }

    fn move_request_inner(
        &mut self,
        entity: EntityId,
        to_queue: QueueId,
        new_target: Option<SeizeTarget>,
    ) -> SimResult<()> {
        let rid = self.entity(entity)?.request.ok_or_else(|| {
            SimError::illegal(format!("entity {} has no pending request", entity.0))
        })?;
        let now = self.exec.now();
        let from = self.request(rid)?.queue;
        if let Some(q) = self.request_queues.get_mut(from.0) {
            let mut stats = self.stats.borrow_mut();
            q.q.remove_where(|r| *r == rid, false, now, &mut *stats);
        }
        let prio = {
            let req = self.request_mut(rid)?;
            req.queue = to_queue;
            if let Some(t) = new_target {
                req.target = t;
            }
            req.priority
        };
        self.enqueue_request(to_queue, rid, prio)?;
        self.entity_mut(entity)?.waiting_in = Some(WaitingSite::RequestQueue(to_queue));
        let (target, amount, process, token, pending) = {
            let req = self.request(rid)?;
            (req.target, req.amount, req.process, req.token, req.resume_pending)
        };
        if !pending && self.can_allocate_target(target, amount) {
            self.schedule_resume(process, token, 0.0, priority::MOVE)?;
            self.request_mut(rid)?.resume_pending = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::routine;

    #[test]
    fn delays_advance_the_clock() {
        let mut s: Simulation = Simulation::new();
        let e = s.create_entity("ticker");
        s.activate(
            e,
            routine(|p| async move {
                let mut a = 0.0;
                for _ in 0..3 {
                    a += 1.0;
                    p.delay(a).await?;
                }
                Ok(())
            }),
            0.0,
        )
        .unwrap();
        s.run(EndCondition::NoEvents).unwrap();
        assert_eq!(s.now(), 6.0);
    }

    #[test]
    fn two_processes_share_a_resource() {
        let mut s: Simulation = Simulation::new();
        let r = s.create_resource("cpu", 1).unwrap();
        let e1 = s.create_entity("p1");
        let e2 = s.create_entity("p2");
        let worker = |hold: f64| {
            routine(move |p| async move {
                let a = p.seize(r, 1).await?;
                p.delay(hold).await?;
                p.release(a)?;
                Ok(())
            })
        };
        s.activate(e1, worker(7.0), 0.0).unwrap();
        s.activate(e2, worker(3.0), 2.0).unwrap();
        // p2 arrives at 2, waits until 7, finishes at 10
        s.run(EndCondition::NoEvents).unwrap();
        assert_eq!(s.now(), 10.0);
        assert_eq!(s.num_busy(r).unwrap(), 0);
        assert_eq!(s.num_times_seized(r).unwrap(), 2);
        assert_eq!(s.num_times_released(r).unwrap(), 2);
    }

    #[test]
    fn run_until_time_lands_exactly_on_the_length() {
        let mut s: Simulation = Simulation::new();
        let e = s.create_entity("ticker");
        s.activate(
            e,
            routine(|p| async move {
                loop {
                    p.delay(0.7).await?;
                }
            }),
            0.0,
        )
        .unwrap();
        s.run(EndCondition::Time(10.0)).unwrap();
        assert_eq!(s.now(), 10.0);
        // unexecuted events survive, the clock just stopped short of them
        assert!(s.pending_events() > 0);
    }

    #[test]
    fn generators_create_and_dispose_entities() {
        let mut s: Simulation = Simulation::new();
        s.add_generator_with(
            "arrival",
            || 1.0,
            routine(|p| async move {
                p.delay(0.25).await?;
                Ok(())
            }),
            0,
            true,
            Some(3),
        )
        .unwrap();
        s.run(EndCondition::NoEvents).unwrap();
        assert_eq!(s.num_entities_created(), 3);
        assert_eq!(s.num_entities_disposed(), 3);
    }

    #[test]
    fn nsteps_counts_fired_events() {
        let mut s: Simulation = Simulation::new();
        let e = s.create_entity("ticker");
        s.activate(
            e,
            routine(|p| async move {
                loop {
                    p.delay(1.0).await?;
                }
            }),
            0.0,
        )
        .unwrap();
        s.run(EndCondition::NSteps(4)).unwrap();
        let steps = s.core.borrow().steps;
        assert_eq!(steps, 4);
    }
}
