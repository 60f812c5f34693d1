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

//! The process coroutine runtime.
//!
//! A process is a resumable procedure bound to one entity. Process routines
//! are `async` functions over a [`ProcessContext`]; the executive polls the
//! resulting future, and each suspension primitive parks the process and
//! hands control back until some event resumes it. Only the primitives in
//! this module may be awaited inside a routine.
//!
//! Every suspension is a one-shot [`Suspension`] token pairing one suspend
//! with one resume; a stale resume event (the suspension was already
//! consumed or replaced) is skipped. Terminating a suspended process
//! resolves its pending suspension with [`SimError::ProcessTerminated`],
//! which travels out of the routine through `?` and is absorbed by the
//! executive.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use tracing::trace;

use crate::entity::{BlockageState, BlockageWaiter, EntityId, EntityState, WaitingSite};
use crate::entity::{BatchQueueId, BlockageId, BlockingQueueId, SignalId};
use crate::error::{SimError, SimResult};
use crate::executive::{priority, EventHandle};
use crate::blocking::{BatchEntry, ItemPredicate, ReceiverEntry, SenderEntry};
use crate::pool::{PoolAllocationId, PoolId};
use crate::queue::{HoldEntry, HoldQueueId, QueueId, Request, SeizeTarget};
use crate::resource::{AllocationId, ResourceId};
use crate::simulation::{Core, SeizeGrant};

/// Identifies a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(pub(crate) usize);

/// The process state machine:
///
/// ```text
/// Created ─start─▶ Running ─suspend─▶ Suspended ─resume─▶ Running ─▶ Completed
///                                 └──terminate──▶ Terminated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Created,
    Running,
    Suspended,
    Terminated,
    Completed,
}

/// Which primitive a process is suspended in, for tracing and directed
/// operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendKind {
    Delay,
    Seize,
    Hold,
    WaitForSignal,
    ReceiveItems,
    Send,
    WaitForProcess,
    BlockUntilCompleted,
    WaitForBlockage,
    Batch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResumeOutcome {
    Pending,
    Resumed,
    Terminated,
}

/// One-shot pairing of a suspend with its resume. Consumed when the resume
/// is delivered; a fresh suspend mints a fresh token.
#[derive(Debug)]
pub(crate) struct Suspension {
    pub token: u64,
    pub kind: SuspendKind,
    pub name: Option<String>,
    pub outcome: ResumeOutcome,
}

/// Bookkeeping for a live delay, kept so the delay can be cancelled or
/// interrupted by name.
#[derive(Debug)]
pub(crate) struct DelayInfo {
    pub name: Option<String>,
    pub handle: EventHandle,
    pub duration: f64,
    pub expected_at: f64,
    pub priority: i32,
    pub token: u64,
}

/// The boxed future a process routine produces.
pub type ProcessFuture = Pin<Box<dyn Future<Output = SimResult<()>>>>;

/// A reusable process routine: called once per process instance to produce
/// the future the executive drives.
pub type ProcessRoutine<M> = Rc<dyn Fn(ProcessContext<M>) -> ProcessFuture>;

/// Wrap an `async` closure as a [`ProcessRoutine`].
pub fn routine<M, F, Fut>(f: F) -> ProcessRoutine<M>
where
    F: Fn(ProcessContext<M>) -> Fut + 'static,
    Fut: Future<Output = SimResult<()>> + 'static,
{
    Rc::new(move |ctx| Box::pin(f(ctx)) as ProcessFuture)
}

pub(crate) struct ProcessRecord {
    pub id: ProcessId,
    pub name: String,
    pub entity: EntityId,
    pub state: ProcessState,
    pub future: Option<ProcessFuture>,
    pub suspension: Option<Suspension>,
    pub next_token: u64,
    pub delay: Option<DelayInfo>,
    /// Pending activation event while still Created.
    pub activation: Option<EventHandle>,
    pub calling_process: Option<ProcessId>,
    pub called_process: Option<ProcessId>,
    /// Processes blocked until this one completes.
    pub completion_listeners: Vec<ProcessId>,
    /// How many watched processes this one still waits on.
    pub watching: usize,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
}

impl ProcessRecord {
    pub fn new(id: ProcessId, name: String, entity: EntityId) -> ProcessRecord {
        ProcessRecord {
            id,
            name,
            entity,
            state: ProcessState::Created,
            future: None,
            suspension: None,
            next_token: 0,
            delay: None,
            activation: None,
            calling_process: None,
            called_process: None,
            completion_listeners: Vec::new(),
            watching: 0,
            start_time: None,
            end_time: None,
        }
    }

    /// Token of the current pending suspension, if any.
    pub fn pending_token(&self) -> Option<u64> {
        self.suspension
            .as_ref()
            .filter(|s| s.outcome == ResumeOutcome::Pending)
            .map(|s| s.token)
    }
}

/// Awaits the resume of one suspension token.
struct PendingResume<M> {
    core: Rc<RefCell<Core<M>>>,
    process: ProcessId,
    token: u64,
}

impl<M> Future for PendingResume<M> {
    type Output = SimResult<()>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut core = this.core.borrow_mut();
        let Some(rec) = core.processes.get_mut(this.process.0).and_then(|s| s.as_mut()) else {
            return Poll::Ready(Err(SimError::illegal(format!(
                "process {} vanished while suspended",
                this.process.0
            ))));
        };
        match &rec.suspension {
            Some(s) if s.token == this.token => match s.outcome {
                ResumeOutcome::Pending => Poll::Pending,
                ResumeOutcome::Resumed => {
                    rec.suspension = None;
                    rec.state = ProcessState::Running;
                    Poll::Ready(Ok(()))
                }
                ResumeOutcome::Terminated => {
                    rec.suspension = None;
                    Poll::Ready(Err(SimError::ProcessTerminated))
                }
            },
            // suspension replaced or gone underneath us: the process was
            // torn down while we slept
            _ => Poll::Ready(Err(SimError::ProcessTerminated)),
        }
    }
}

/// Outcome of a batch-queue wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Batch {
    /// This entity completed the batch; the members (peers first, trigger
    /// last) have been released.
    Trigger(Vec<EntityId>),
    /// This entity was absorbed into a batch formed by another trigger.
    Member,
}

/// Handle a process routine uses to talk to the simulation.
///
/// Cloning is cheap; the context stays bound to the same process/entity
/// pair.
pub struct ProcessContext<M> {
    pub(crate) core: Rc<RefCell<Core<M>>>,
    pub(crate) process: ProcessId,
    pub(crate) entity: EntityId,
}

impl<M> Clone for ProcessContext<M> {
    fn clone(&self) -> Self {
        ProcessContext { core: Rc::clone(&self.core), process: self.process, entity: self.entity }
    }
}

impl<M: 'static> ProcessContext<M> {
    /// Current simulation time.
    pub fn now(&self) -> f64 {
        self.core.borrow().exec.now()
    }

    /// The entity this process belongs to.
    pub fn entity(&self) -> EntityId {
        self.entity
    }

    /// This process.
    pub fn process(&self) -> ProcessId {
        self.process
    }

    /// The entity's queue-ranking priority.
    pub fn entity_priority(&self) -> i32 {
        self.core.borrow().entities[self.entity.0]
            .as_ref()
            .map(|e| e.priority)
            .unwrap_or_default()
    }

    /// Change the entity's queue-ranking priority. Takes effect on the next
    /// enqueue; queues the entity already waits in are not re-ordered.
    pub fn set_entity_priority(&self, priority: i32) {
        if let Some(e) = self.core.borrow_mut().entities[self.entity.0].as_mut() {
            e.priority = priority;
        }
    }

    fn suspend(&self, token: u64) -> PendingResume<M> {
        PendingResume { core: Rc::clone(&self.core), process: self.process, token }
    }

    // --- delay / yield -----------------------------------------------------

    /// Suspend for `duration` time units at the default `DELAY` priority.
    pub async fn delay(&self, duration: f64) -> SimResult<()> {
        self.delay_with(duration, priority::DELAY, None).await
    }

    /// Suspend for `duration`, resuming at `priority`. A named delay can be
    /// interrupted by [`interrupt_delay`](Self::interrupt_delay).
    pub async fn delay_with(
        &self,
        duration: f64,
        priority: i32,
        name: Option<&str>,
    ) -> SimResult<()> {
        if !duration.is_finite() || duration < 0.0 {
            return Err(SimError::invalid(format!(
                "delay duration must be finite and non-negative, got {duration}"
            )));
        }
        let token = {
            let mut core = self.core.borrow_mut();
            let token = core.begin_suspension(self.process, SuspendKind::Delay, name)?;
            let handle = core.schedule_resume(self.process, token, duration, priority)?;
            let now = core.exec.now();
            let rec = core.process_mut(self.process)?;
            rec.delay = Some(DelayInfo {
                name: name.map(str::to_owned),
                handle,
                duration,
                expected_at: now + duration,
                priority,
                token,
            });
            core.entity_mut(self.entity)?.set_state(EntityState::Scheduled)?;
            token
        };
        self.suspend(token).await?;
        {
            let mut core = self.core.borrow_mut();
            let now = core.exec.now();
            let rec = core.process_mut(self.process)?;
            let info = rec.delay.take().ok_or_else(|| {
                SimError::illegal(format!("process {}: delay resumed without delay info", rec.name))
            })?;
            if now != info.expected_at {
                return Err(SimError::illegal(format!(
                    "process {}: delay resumed at {now}, expected {}",
                    core.process(self.process)?.name,
                    info.expected_at
                )));
            }
            core.entity_mut(self.entity)?.set_state(EntityState::Active)?;
        }
        Ok(())
    }

    /// Give up control until all currently scheduled events at equal or
    /// better priority have fired. Equivalent to `delay(0)` at the `YIELD`
    /// priority.
    pub async fn yield_now(&self) -> SimResult<()> {
        self.delay_with(0.0, priority::YIELD, None).await
    }

    /// `delay(0)` at an explicit priority.
    pub async fn yield_with(&self, priority: i32) -> SimResult<()> {
        self.delay_with(0.0, priority, None).await
    }

    // --- seize / release ---------------------------------------------------

    /// Seize `amount` units of `resource`, waiting in its default request
    /// queue if they are not available.
    pub async fn seize(&self, resource: ResourceId, amount: u32) -> SimResult<AllocationId> {
        self.seize_with(resource, amount, priority::SEIZE, None, None).await
    }

    /// Seize with an explicit yield priority, request queue and suspension
    /// name. The seize yields first, then files a request ranked by entity
    /// priority, suspending only if the resource cannot serve it at once.
    pub async fn seize_with(
        &self,
        resource: ResourceId,
        amount: u32,
        seize_priority: i32,
        queue: Option<QueueId>,
        name: Option<&str>,
    ) -> SimResult<AllocationId> {
        let target = SeizeTarget::Resource(resource);
        let qid = {
            let core = self.core.borrow();
            let rec = core
                .resources
                .get(resource.0)
                .ok_or_else(|| SimError::invalid(format!("no such resource {}", resource.0)))?;
            queue.unwrap_or(rec.default_queue)
        };
        match self.request_capacity(target, amount, seize_priority, qid, name).await? {
            SeizeGrant::Single(a) => Ok(a),
            SeizeGrant::Pooled(_) => Err(SimError::illegal(
                "seize request was re-targeted to a pool; use seize_pool".to_string(),
            )),
        }
    }

    /// Seize `amount` units from a pool under its configured selection and
    /// allocation rules.
    pub async fn seize_pool(&self, pool: PoolId, amount: u32) -> SimResult<PoolAllocationId> {
        self.seize_pool_with(pool, amount, priority::SEIZE, None).await
    }

    pub async fn seize_pool_with(
        &self,
        pool: PoolId,
        amount: u32,
        seize_priority: i32,
        name: Option<&str>,
    ) -> SimResult<PoolAllocationId> {
        let qid = {
            let core = self.core.borrow();
            core.pools
                .get(pool.0)
                .ok_or_else(|| SimError::invalid(format!("no such pool {}", pool.0)))?
                .queue
        };
        match self.request_capacity(SeizeTarget::Pool(pool), amount, seize_priority, qid, name).await? {
            SeizeGrant::Pooled(p) => Ok(p),
            SeizeGrant::Single(_) => Err(SimError::illegal(
                "pooled seize request was re-targeted to a plain resource; use seize".to_string(),
            )),
        }
    }

    async fn request_capacity(
        &self,
        target: SeizeTarget,
        amount: u32,
        seize_priority: i32,
        qid: QueueId,
        name: Option<&str>,
    ) -> SimResult<SeizeGrant> {
        if amount < 1 {
            return Err(SimError::invalid(format!("seize amount must be >= 1, got {amount}")));
        }
        self.yield_with(seize_priority).await?;
        let wait_token = {
            let mut core = self.core.borrow_mut();
            let entity_priority = core.entity(self.entity)?.priority;
            let rid = core.push_request(Request {
                entity: self.entity,
                process: self.process,
                token: 0,
                amount,
                target,
                priority: entity_priority,
                queue: qid,
                resume_pending: false,
                name: name.map(str::to_owned),
            });
            core.entity_mut(self.entity)?.request = Some(rid);
            core.enqueue_request(qid, rid, entity_priority)?;
            if core.can_allocate_target(target, amount) {
                None
            } else {
                let token = core.begin_suspension(self.process, SuspendKind::Seize, name)?;
                core.request_mut(rid)?.token = token;
                let e = core.entity_mut(self.entity)?;
                e.set_state(EntityState::WaitingForResource)?;
                e.waiting_in = Some(WaitingSite::RequestQueue(qid));
                Some(token)
            }
        };
        if let Some(token) = wait_token {
            self.suspend(token).await?;
        }
        let grant = {
            let mut core = self.core.borrow_mut();
            let rid = core
                .entity_mut(self.entity)?
                .request
                .take()
                .ok_or_else(|| SimError::illegal("seize resumed without a pending request".to_string()))?;
            if wait_token.is_some() {
                let e = core.entity_mut(self.entity)?;
                e.waiting_in = None;
                e.set_state(EntityState::Active)?;
            }
            let req = core.remove_request(rid, true)?;
            core.allocate(self.entity, req.target, req.amount, qid, req.name)?
        };
        Ok(grant)
    }

    /// Return an allocation's units to its resource and re-process the
    /// originating request queue. Does not suspend.
    pub fn release(&self, allocation: AllocationId) -> SimResult<()> {
        self.core.borrow_mut().deallocate(allocation, true)
    }

    /// Release a pooled allocation through its pool.
    pub fn release_pool(&self, allocation: PoolAllocationId) -> SimResult<()> {
        self.core.borrow_mut().deallocate_pool(allocation)
    }

    // --- hold queues -------------------------------------------------------

    /// Park in a hold queue until some external removal resumes us.
    pub async fn hold(&self, queue: HoldQueueId) -> SimResult<()> {
        self.hold_with(queue, priority::QUEUE, None).await
    }

    pub async fn hold_with(
        &self,
        queue: HoldQueueId,
        queue_priority: i32,
        name: Option<&str>,
    ) -> SimResult<()> {
        let token = {
            let mut core = self.core.borrow_mut();
            let token = core.begin_suspension(self.process, SuspendKind::Hold, name)?;
            core.enqueue_hold(queue, HoldEntry { entity: self.entity, process: self.process, token }, queue_priority)?;
            let e = core.entity_mut(self.entity)?;
            e.set_state(EntityState::InHoldQueue)?;
            e.waiting_in = Some(WaitingSite::Hold(queue));
            token
        };
        self.suspend(token).await?;
        {
            let mut core = self.core.borrow_mut();
            let e = core.entity_mut(self.entity)?;
            e.waiting_in = None;
            e.set_state(EntityState::Active)?;
        }
        Ok(())
    }

    /// Remove `entity` from a hold queue and schedule its resume at the
    /// `RESUME` priority.
    pub fn release_hold(&self, queue: HoldQueueId, entity: EntityId) -> SimResult<()> {
        let mut core = self.core.borrow_mut();
        let entry = core
            .remove_hold_entry_of(queue, entity, true)?
            .ok_or_else(|| SimError::illegal(format!("entity {} is not in this hold queue", entity.0)))?;
        core.entity_mut(entity)?.waiting_in = None;
        core.schedule_resume(entry.process, entry.token, 0.0, priority::RESUME)?;
        Ok(())
    }

    /// Remove `entity` from a hold queue and continue its process
    /// immediately, before this process takes its next step.
    pub fn release_hold_now(&self, queue: HoldQueueId, entity: EntityId) -> SimResult<()> {
        let target = {
            let mut core = self.core.borrow_mut();
            let entry = core.remove_hold_entry_of(queue, entity, true)?.ok_or_else(|| {
                SimError::illegal(format!("entity {} is not in this hold queue", entity.0))
            })?;
            core.entity_mut(entity)?.waiting_in = None;
            if !core.deliver_resume(entry.process, entry.token) {
                return Ok(());
            }
            entry.process
        };
        crate::simulation::poll_process(&self.core, target)
    }

    // --- signals -----------------------------------------------------------

    /// Release everyone currently waiting for `signal`, in priority+FIFO
    /// order. Returns how many were released.
    pub fn fire_signal(&self, signal: SignalId) -> SimResult<usize> {
        self.fire_signal_with(signal, priority::RESUME)
    }

    pub fn fire_signal_with(&self, signal: SignalId, resume_priority: i32) -> SimResult<usize> {
        self.core.borrow_mut().fire_signal_now(signal, resume_priority)
    }

    /// Wait until `signal` fires.
    pub async fn wait_for_signal(&self, signal: SignalId) -> SimResult<()> {
        self.wait_for_signal_with(signal, priority::WAIT_FOR, true, None).await
    }

    /// Wait for a signal with an explicit waiter-set priority. With
    /// `collect_stats` off the wait leaves no trace in the signal's queue
    /// statistics.
    pub async fn wait_for_signal_with(
        &self,
        signal: SignalId,
        waiter_priority: i32,
        collect_stats: bool,
        name: Option<&str>,
    ) -> SimResult<()> {
        let token = {
            let mut core = self.core.borrow_mut();
            let token = core.begin_suspension(self.process, SuspendKind::WaitForSignal, name)?;
            core.attach_signal_waiter(signal, self.entity, self.process, token, waiter_priority, collect_stats)?;
            let e = core.entity_mut(self.entity)?;
            e.set_state(EntityState::WaitingForSignal)?;
            e.waiting_in = Some(WaitingSite::Signal(signal));
            token
        };
        self.suspend(token).await?;
        {
            let mut core = self.core.borrow_mut();
            let e = core.entity_mut(self.entity)?;
            e.waiting_in = None;
            e.set_state(EntityState::Active)?;
        }
        Ok(())
    }

    // --- blocking queues ---------------------------------------------------

    /// Deposit `item` into a blocking queue, suspending while it is full.
    pub async fn send(&self, item: M, queue: BlockingQueueId) -> SimResult<()> {
        self.send_with(item, queue, priority::QUEUE, None).await
    }

    pub async fn send_with(
        &self,
        item: M,
        queue: BlockingQueueId,
        sender_priority: i32,
        name: Option<&str>,
    ) -> SimResult<()> {
        let mut item = Some(item);
        // a resumed sender owns the slot the queue walk reserved for it, so
        // only a fresh arrival defers to senders already in line
        let mut was_resumed = false;
        loop {
            let wait_token = {
                let mut core = self.core.borrow_mut();
                let bq = core.blocking_queue(queue)?;
                let others_waiting = bq.senders.iter().any(|s| !s.resume_pending);
                if bq.unreserved_space() > 0 && (was_resumed || !others_waiting) {
                    let now = core.exec.now();
                    let item = item.take().ok_or_else(|| {
                        SimError::illegal("send deposited its item twice".to_string())
                    })?;
                    core.deposit_item(queue, item, now)?;
                    None
                } else {
                    let token = core.begin_suspension(self.process, SuspendKind::Send, name)?;
                    core.enqueue_sender(
                        queue,
                        SenderEntry {
                            entity: self.entity,
                            process: self.process,
                            token,
                            resume_pending: false,
                        },
                        sender_priority,
                    )?;
                    let e = core.entity_mut(self.entity)?;
                    e.set_state(EntityState::BlockedSending)?;
                    e.waiting_in = Some(WaitingSite::BlockingSend(queue));
                    Some(token)
                }
            };
            match wait_token {
                None => {
                    self.core.borrow_mut().process_bq_receivers(queue)?;
                    return Ok(());
                }
                Some(token) => {
                    self.suspend(token).await?;
                    let mut core = self.core.borrow_mut();
                    core.remove_sender(queue, self.process, true)?;
                    let e = core.entity_mut(self.entity)?;
                    e.waiting_in = None;
                    e.set_state(EntityState::Active)?;
                    was_resumed = true;
                    // loop re-checks space; a same-instant competitor may
                    // have taken the slot, in which case we park again
                }
            }
        }
    }

    /// Take `amount` items from a blocking queue, suspending until they are
    /// all present.
    pub async fn wait_for_items(&self, queue: BlockingQueueId, amount: usize) -> SimResult<Vec<M>> {
        self.wait_for_items_with(queue, amount, None, priority::QUEUE, None).await
    }

    /// Take `amount` items matching `pred`, atomically at resume time.
    pub async fn wait_for_items_with(
        &self,
        queue: BlockingQueueId,
        amount: usize,
        pred: Option<ItemPredicate<M>>,
        receiver_priority: i32,
        name: Option<&str>,
    ) -> SimResult<Vec<M>> {
        if amount < 1 {
            return Err(SimError::invalid(format!("receive amount must be >= 1, got {amount}")));
        }
        // same reservation rule as send: a resumed receiver takes ahead of
        // anyone who queued behind it
        let mut was_resumed = false;
        loop {
            let outcome = {
                let mut core = self.core.borrow_mut();
                let now = core.exec.now();
                let bq = core.blocking_queue(queue)?;
                let others_waiting = bq.receivers.iter().any(|r| !r.resume_pending);
                if (was_resumed || !others_waiting) && bq.can_fill(amount, &pred) {
                    let items = core.take_items(queue, amount, &pred, now)?;
                    Some(items)
                } else {
                    let token = core.begin_suspension(self.process, SuspendKind::ReceiveItems, name)?;
                    core.enqueue_receiver(
                        queue,
                        ReceiverEntry {
                            entity: self.entity,
                            process: self.process,
                            token,
                            amount,
                            pred: pred.clone(),
                            resume_pending: false,
                        },
                        receiver_priority,
                    )?;
                    let e = core.entity_mut(self.entity)?;
                    e.set_state(EntityState::BlockedReceiving)?;
                    e.waiting_in = Some(WaitingSite::BlockingRecv(queue));
                    None
                }
            };
            match outcome {
                Some(items) => {
                    self.core.borrow_mut().process_bq_senders(queue)?;
                    return Ok(items);
                }
                None => {
                    let token = {
                        let core = self.core.borrow();
                        core.process(self.process)?.pending_token().ok_or_else(|| {
                            SimError::illegal("receive parked without a suspension".to_string())
                        })?
                    };
                    self.suspend(token).await?;
                    let mut core = self.core.borrow_mut();
                    core.remove_receiver(queue, self.process, true)?;
                    let e = core.entity_mut(self.entity)?;
                    e.waiting_in = None;
                    e.set_state(EntityState::Active)?;
                    was_resumed = true;
                    // loop retries the take against the current buffer
                }
            }
        }
    }

    // --- batch queues ------------------------------------------------------

    /// Join a batch queue. The arrival that completes a batch becomes the
    /// trigger: it releases its peers in queue order, yields once so they
    /// get moving, and receives the member list. Everyone else resumes as a
    /// plain member.
    pub async fn wait_for_batch(&self, queue: BatchQueueId) -> SimResult<Batch> {
        self.wait_for_batch_with(queue, priority::RESUME, None).await
    }

    pub async fn wait_for_batch_with(
        &self,
        queue: BatchQueueId,
        resume_priority: i32,
        name: Option<&str>,
    ) -> SimResult<Batch> {
        let trigger_members = {
            let mut core = self.core.borrow_mut();
            let bq = core.batch_queue(queue)?;
            let self_matches = bq.pred.as_ref().map_or(true, |p| p(self.entity));
            let waiting = bq.matching_entries();
            if self_matches && waiting.len() + 1 >= bq.size {
                let take = core.batch_queue(queue)?.size - 1;
                let peers: Vec<BatchEntry> = waiting.into_iter().take(take).collect();
                let mut members: Vec<EntityId> = Vec::with_capacity(take + 1);
                for peer in &peers {
                    core.remove_batch_entry(queue, peer.process)?;
                    core.schedule_resume(peer.process, peer.token, 0.0, resume_priority)?;
                    core.entity_mut(peer.entity)?.waiting_in = None;
                    members.push(peer.entity);
                }
                members.push(self.entity);
                Some(members)
            } else {
                let token = core.begin_suspension(self.process, SuspendKind::Batch, name)?;
                core.enqueue_batch_entry(
                    queue,
                    BatchEntry { entity: self.entity, process: self.process, token },
                )?;
                let e = core.entity_mut(self.entity)?;
                e.set_state(EntityState::WaitingForBatch)?;
                e.waiting_in = Some(WaitingSite::Batch(queue));
                None
            }
        };
        match trigger_members {
            Some(members) => {
                // let the released peers get back in motion first
                self.yield_now().await?;
                Ok(Batch::Trigger(members))
            }
            None => {
                let token = {
                    let core = self.core.borrow();
                    core.process(self.process)?.pending_token().ok_or_else(|| {
                        SimError::illegal("batch wait parked without a suspension".to_string())
                    })?
                };
                self.suspend(token).await?;
                let mut core = self.core.borrow_mut();
                let e = core.entity_mut(self.entity)?;
                e.waiting_in = None;
                e.set_state(EntityState::Active)?;
                Ok(Batch::Member)
            }
        }
    }

    // --- inter-process -----------------------------------------------------

    /// Create a process on another entity without scheduling it. The handle
    /// can be activated through [`wait_for_process`](Self::wait_for_process)
    /// or [`Simulation::activate`](crate::Simulation::activate).
    pub fn spawn_process(
        &self,
        entity: EntityId,
        routine: ProcessRoutine<M>,
        name: Option<&str>,
    ) -> SimResult<ProcessId> {
        self.core.borrow_mut().create_process(Rc::clone(&self.core), entity, routine, name)
    }

    /// Activate `target` after `delay` and suspend until it completes.
    /// Termination propagates both ways: terminating `target` terminates us
    /// and terminating us terminates `target`.
    pub async fn wait_for_process(&self, target: ProcessId, delay: f64) -> SimResult<()> {
        self.wait_for_process_with(target, delay, priority::WAIT_FOR, None).await
    }

    pub async fn wait_for_process_with(
        &self,
        target: ProcessId,
        delay: f64,
        activation_priority: i32,
        name: Option<&str>,
    ) -> SimResult<()> {
        let token = {
            let mut core = self.core.borrow_mut();
            let t = core.process(target)?;
            if t.state != ProcessState::Created {
                return Err(SimError::illegal(format!(
                    "wait_for_process: target {} is {:?}, not Created",
                    t.name, t.state
                )));
            }
            if t.entity == self.entity {
                return Err(SimError::illegal(
                    "wait_for_process: target runs on the waiting entity".to_string(),
                ));
            }
            core.schedule_activation(target, delay, activation_priority)?;
            core.process_mut(target)?.calling_process = Some(self.process);
            core.process_mut(self.process)?.called_process = Some(target);
            let token = core.begin_suspension(self.process, SuspendKind::WaitForProcess, name)?;
            core.entity_mut(self.entity)?.set_state(EntityState::WaitForProcess)?;
            token
        };
        self.suspend(token).await?;
        {
            let mut core = self.core.borrow_mut();
            core.entity_mut(self.entity)?.set_state(EntityState::Active)?;
        }
        Ok(())
    }

    /// Suspend until every process in `targets` has completed. Fails with
    /// `IllegalState` if any of them was terminated or never scheduled.
    pub async fn block_until_all_completed(&self, targets: &[ProcessId]) -> SimResult<()> {
        self.block_until_all_completed_with(targets, None).await
    }

    pub async fn block_until_all_completed_with(
        &self,
        targets: &[ProcessId],
        name: Option<&str>,
    ) -> SimResult<()> {
        let token = {
            let mut core = self.core.borrow_mut();
            let mut pending = 0usize;
            for &t in targets {
                let rec = core.process(t)?;
                match rec.state {
                    ProcessState::Terminated => {
                        return Err(SimError::illegal(format!(
                            "block_until_all_completed: {} was terminated",
                            rec.name
                        )));
                    }
                    ProcessState::Completed => continue,
                    ProcessState::Created if rec.activation.is_none() => {
                        return Err(SimError::illegal(format!(
                            "block_until_all_completed: {} was never scheduled",
                            rec.name
                        )));
                    }
                    _ => {
                        core.process_mut(t)?.completion_listeners.push(self.process);
                        pending += 1;
                    }
                }
            }
            if pending == 0 {
                return Ok(());
            }
            let token = core.begin_suspension(self.process, SuspendKind::BlockUntilCompleted, name)?;
            core.process_mut(self.process)?.watching = pending;
            core.entity_mut(self.entity)?.set_state(EntityState::BlockedUntilCompletion)?;
            token
        };
        self.suspend(token).await?;
        {
            let mut core = self.core.borrow_mut();
            core.entity_mut(self.entity)?.set_state(EntityState::Active)?;
        }
        Ok(())
    }

    // --- blockages ---------------------------------------------------------

    /// Mark `blockage` active. Must be owned by this entity and cleared by
    /// this same process invocation before it completes.
    pub fn start_blockage(&self, blockage: BlockageId) -> SimResult<()> {
        let mut core = self.core.borrow_mut();
        let owner_entity = self.entity;
        let b = core.blockage_mut(blockage)?;
        if b.owner != owner_entity {
            return Err(SimError::illegal(format!(
                "start_blockage: {} is owned by entity {}, not {}",
                b.name, b.owner.0, owner_entity.0
            )));
        }
        if b.state == BlockageState::Active {
            return Err(SimError::illegal(format!("start_blockage: {} is already active", b.name)));
        }
        b.state = BlockageState::Active;
        b.started_by = Some(self.process);
        core.entity_mut(self.entity)?.active_blockages.push(blockage);
        Ok(())
    }

    /// Complete `blockage` and resume everyone waiting on it at the
    /// `BLOCKAGE` priority.
    pub fn clear_blockage(&self, blockage: BlockageId) -> SimResult<()> {
        self.clear_blockage_with(blockage, priority::BLOCKAGE)
    }

    pub fn clear_blockage_with(&self, blockage: BlockageId, resume_priority: i32) -> SimResult<()> {
        let mut core = self.core.borrow_mut();
        let process = self.process;
        let b = core.blockage_mut(blockage)?;
        if b.owner != self.entity {
            return Err(SimError::illegal(format!(
                "clear_blockage: {} is owned by entity {}, not {}",
                b.name, b.owner.0, self.entity.0
            )));
        }
        if b.state != BlockageState::Active || b.started_by != Some(process) {
            return Err(SimError::illegal(format!(
                "clear_blockage: {} was not started by this process",
                b.name
            )));
        }
        b.state = BlockageState::Completed;
        b.started_by = None;
        let waiters: Vec<BlockageWaiter> = b.waiters.drain(..).collect();
        core.entity_mut(self.entity)?.active_blockages.retain(|x| *x != blockage);
        for w in waiters {
            core.schedule_resume(w.process, w.token, 0.0, resume_priority)?;
        }
        Ok(())
    }

    /// If `blockage` is active, wait until its owner clears it; otherwise
    /// pass straight through.
    pub async fn wait_for_blockage(&self, blockage: BlockageId) -> SimResult<()> {
        self.wait_for_blockage_with(blockage, None, false, priority::YIELD, None).await
    }

    /// Full-control blockage wait: optionally yield first, optionally park
    /// in `park` (a hold queue used purely for its waiting statistics).
    pub async fn wait_for_blockage_with(
        &self,
        blockage: BlockageId,
        park: Option<HoldQueueId>,
        yield_before: bool,
        yield_priority: i32,
        name: Option<&str>,
    ) -> SimResult<()> {
        if yield_before {
            self.yield_with(yield_priority).await?;
        }
        let token = {
            let mut core = self.core.borrow_mut();
            let active = core.blockage_mut(blockage)?.state == BlockageState::Active;
            if !active {
                if let Some(hq) = park {
                    // zero-length visit, recorded in the queue statistics
                    let entry = HoldEntry { entity: self.entity, process: self.process, token: 0 };
                    core.enqueue_hold(hq, entry, priority::QUEUE)?;
                    core.remove_hold_entry(hq, self.process, true)?;
                }
                return Ok(());
            }
            let token = core.begin_suspension(self.process, SuspendKind::WaitForBlockage, name)?;
            if let Some(hq) = park {
                let entry = HoldEntry { entity: self.entity, process: self.process, token };
                core.enqueue_hold(hq, entry, priority::QUEUE)?;
            }
            core.blockage_mut(blockage)?.waiters.push(BlockageWaiter {
                entity: self.entity,
                process: self.process,
                token,
            });
            let e = core.entity_mut(self.entity)?;
            e.set_state(EntityState::BlockedUntilCompletion)?;
            e.waiting_in = Some(WaitingSite::Blockage { blockage, park });
            token
        };
        self.suspend(token).await?;
        {
            let mut core = self.core.borrow_mut();
            if let Some(hq) = park {
                core.remove_hold_entry(hq, self.process, true)?;
            }
            let e = core.entity_mut(self.entity)?;
            e.waiting_in = None;
            e.set_state(EntityState::Active)?;
        }
        Ok(())
    }

    // --- delay interruption ------------------------------------------------

    /// Interrupt `target`'s named delay: cancel its resume, delay ourselves
    /// for `interrupt_duration`, then reschedule the target to resume after
    /// `post_delay` at the delay's original priority. No-op when the target
    /// is not currently in a delay named `delay_name`.
    pub async fn interrupt_delay(
        &self,
        target: ProcessId,
        delay_name: &str,
        interrupt_duration: f64,
        post_delay: f64,
    ) -> SimResult<()> {
        self.interrupt_delay_inner(target, delay_name, interrupt_duration, Post::Fixed(post_delay))
            .await
    }

    /// Interrupt variant that restarts the full original delay afterwards.
    pub async fn interrupt_delay_and_restart(
        &self,
        target: ProcessId,
        delay_name: &str,
        interrupt_duration: f64,
    ) -> SimResult<()> {
        self.interrupt_delay_inner(target, delay_name, interrupt_duration, Post::Restart).await
    }

    /// Interrupt variant that continues with the time remaining at the
    /// moment of interruption.
    pub async fn interrupt_delay_and_continue(
        &self,
        target: ProcessId,
        delay_name: &str,
        interrupt_duration: f64,
    ) -> SimResult<()> {
        self.interrupt_delay_inner(target, delay_name, interrupt_duration, Post::Remaining).await
    }

    async fn interrupt_delay_inner(
        &self,
        target: ProcessId,
        delay_name: &str,
        interrupt_duration: f64,
        post: Post,
    ) -> SimResult<()> {
        let plan = {
            let mut core = self.core.borrow_mut();
            let now = core.exec.now();
            let rec = core.process(target)?;
            let interruptible = rec.state == ProcessState::Suspended
                && rec.delay.as_ref().map_or(false, |d| d.name.as_deref() == Some(delay_name));
            if !interruptible {
                None
            } else {
                let info = core.process(target)?.delay.as_ref().ok_or_else(|| {
                    SimError::illegal("interrupt_delay: delay info vanished".to_string())
                })?;
                let plan = InterruptPlan {
                    token: info.token,
                    priority: info.priority,
                    original: info.duration,
                    remaining: info.expected_at - now,
                };
                let handle = info.handle.clone();
                core.exec.cancel(&handle);
                trace!(interrupted = target.0, delay_name, "delay interrupted");
                Some(plan)
            }
        };
        let Some(plan) = plan else {
            return Ok(());
        };
        self.delay(interrupt_duration).await?;
        {
            let mut core = self.core.borrow_mut();
            let now = core.exec.now();
            // the target may have been terminated while we were busy
            let still_parked = core
                .process(target)
                .map(|r| {
                    r.state == ProcessState::Suspended
                        && r.delay.as_ref().map_or(false, |d| d.token == plan.token)
                })
                .unwrap_or(false);
            if still_parked {
                let post_delay = match post {
                    Post::Fixed(d) => d,
                    Post::Restart => plan.original,
                    Post::Remaining => plan.remaining,
                };
                let handle = core.schedule_resume(target, plan.token, post_delay, plan.priority)?;
                let info = core.process_mut(target)?.delay.as_mut().ok_or_else(|| {
                    SimError::illegal("interrupt_delay: delay info vanished".to_string())
                })?;
                info.handle = handle;
                info.expected_at = now + post_delay;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Post {
    Fixed(f64),
    Restart,
    Remaining,
}

#[derive(Debug, Clone, Copy)]
struct InterruptPlan {
    token: u64,
    priority: i32,
    original: f64,
    remaining: f64,
}
