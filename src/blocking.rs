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

//! Blocking rendezvous queues and batch queues.
//!
//! A blocking queue is a bounded channel: senders suspend while the buffer
//! is full, receivers suspend until the items they ask for are present. A
//! receiver request names an amount and an optional predicate and takes its
//! matched items atomically when it resumes. Both waiting lines are
//! priority-ordered with FIFO among equals.
//!
//! A batch queue groups entities: arrivals park until enough matching
//! entities are present, then the arrival that completes the batch becomes
//! the trigger, releases its peers, and yields once so they get back in
//! motion before it continues.

use std::collections::VecDeque;
use std::rc::Rc;

use crate::entity::EntityId;
use crate::process::ProcessId;
use crate::queue::{Discipline, WaitQueue};
use crate::stats::StatsSink;

/// Filter applied by a predicate receive; only matching items are taken.
pub type ItemPredicate<M> = Rc<dyn Fn(&M) -> bool>;

/// Filter deciding which entities count towards a batch.
pub type EntityPredicate = Rc<dyn Fn(EntityId) -> bool>;

#[derive(Debug, Clone, Copy)]
pub(crate) struct SenderEntry {
    pub entity: EntityId,
    pub process: ProcessId,
    pub token: u64,
    /// A resume has been scheduled; the reserved slot is not offered again.
    pub resume_pending: bool,
}

pub(crate) struct ReceiverEntry<M> {
    pub entity: EntityId,
    pub process: ProcessId,
    pub token: u64,
    pub amount: usize,
    pub pred: Option<ItemPredicate<M>>,
    pub resume_pending: bool,
}

pub(crate) struct BlockingQueueRec<M> {
    pub name: String,
    pub capacity: usize,
    pub items: VecDeque<M>,
    pub senders: WaitQueue<SenderEntry>,
    pub receivers: WaitQueue<ReceiverEntry<M>>,
}

impl<M> BlockingQueueRec<M> {
    pub fn new(name: String, capacity: usize) -> BlockingQueueRec<M> {
        let senders = WaitQueue::new(format!("{name}.senders"), Discipline::Ranked);
        let receivers = WaitQueue::new(format!("{name}.receivers"), Discipline::Ranked);
        BlockingQueueRec { name, capacity, items: VecDeque::new(), senders, receivers }
    }

    pub fn has_space(&self) -> bool {
        self.items.len() < self.capacity
    }

    /// Free slots not already promised to a resumed-but-not-yet-deposited
    /// sender.
    pub fn unreserved_space(&self) -> usize {
        let pending = self.senders.iter().filter(|s| s.resume_pending).count();
        (self.capacity - self.items.len()).saturating_sub(pending)
    }

    fn matches(pred: &Option<ItemPredicate<M>>, item: &M) -> bool {
        pred.as_ref().map_or(true, |p| p(item))
    }

    /// Whether `amount` items matching `pred` are buffered right now.
    pub fn can_fill(&self, amount: usize, pred: &Option<ItemPredicate<M>>) -> bool {
        if amount == 0 {
            return true;
        }
        let mut found = 0;
        for item in &self.items {
            if Self::matches(pred, item) {
                found += 1;
                if found >= amount {
                    return true;
                }
            }
        }
        false
    }

    /// Remove and return the first `amount` matching items, keeping the
    /// relative order of everything left behind. Callers check `can_fill`
    /// first; a short take means the buffer changed since.
    pub fn take_items(&mut self, amount: usize, pred: &Option<ItemPredicate<M>>) -> Vec<M> {
        let mut taken = Vec::with_capacity(amount);
        let mut kept = VecDeque::with_capacity(self.items.len());
        while let Some(item) = self.items.pop_front() {
            if taken.len() < amount && Self::matches(pred, &item) {
                taken.push(item);
            } else {
                kept.push_back(item);
            }
        }
        self.items = kept;
        taken
    }

    pub fn deposit(&mut self, item: M, now: f64, stats: &mut dyn StatsSink) {
        debug_assert!(self.has_space());
        self.items.push_back(item);
        self.observe_buffer(now, stats);
    }

    pub fn observe_buffer(&self, now: f64, stats: &mut dyn StatsSink) {
        stats.time_weighted_observe(
            &format!("{}.num_in_buffer", self.name),
            self.items.len() as f64,
            now,
        );
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.senders.clear();
        self.receivers.clear();
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct BatchEntry {
    pub entity: EntityId,
    pub process: ProcessId,
    pub token: u64,
}

pub(crate) struct BatchQueueRec {
    pub name: String,
    pub size: usize,
    pub pred: Option<EntityPredicate>,
    pub q: WaitQueue<BatchEntry>,
}

impl BatchQueueRec {
    pub fn new(name: String, size: usize, pred: Option<EntityPredicate>) -> BatchQueueRec {
        let q = WaitQueue::new(name.clone(), Discipline::Fifo);
        BatchQueueRec { name, size, pred, q }
    }

    fn matches(&self, entity: EntityId) -> bool {
        self.pred.as_ref().map_or(true, |p| p(entity))
    }

    /// Entries that would take part in a batch right now, queue order.
    pub fn matching_entries(&self) -> Vec<BatchEntry> {
        self.q.iter().filter(|e| self.matches(e.entity)).copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::NullStats;

    fn bq(cap: usize) -> BlockingQueueRec<u32> {
        BlockingQueueRec::new("bq".into(), cap)
    }

    #[test]
    fn space_accounting_includes_pending_senders() {
        let mut ns = NullStats;
        let mut q = bq(2);
        q.deposit(1, 0.0, &mut ns);
        assert!(q.has_space());
        assert_eq!(q.unreserved_space(), 1);
        q.senders.enqueue(
            SenderEntry { entity: EntityId(0), process: ProcessId(0), token: 0, resume_pending: true },
            0,
            0.0,
            &mut ns,
        );
        assert_eq!(q.unreserved_space(), 0);
    }

    #[test]
    fn predicate_take_preserves_order_of_rest() {
        let mut ns = NullStats;
        let mut q = bq(10);
        for v in [1, 2, 3, 4, 5] {
            q.deposit(v, 0.0, &mut ns);
        }
        let even: ItemPredicate<u32> = Rc::new(|v| v % 2 == 0);
        let pred = Some(even);
        assert!(q.can_fill(2, &pred));
        assert!(!q.can_fill(3, &pred));
        let taken = q.take_items(2, &pred);
        assert_eq!(taken, vec![2, 4]);
        assert_eq!(q.items.iter().copied().collect::<Vec<_>>(), vec![1, 3, 5]);
    }

    #[test]
    fn take_without_predicate_is_fifo() {
        let mut ns = NullStats;
        let mut q = bq(10);
        for v in [7, 8, 9] {
            q.deposit(v, 0.0, &mut ns);
        }
        assert_eq!(q.take_items(2, &None), vec![7, 8]);
    }

    #[test]
    fn batch_matching_respects_predicate() {
        let odd: EntityPredicate = Rc::new(|e| e.0 % 2 == 1);
        let mut b = BatchQueueRec::new("b".into(), 2, Some(odd));
        let mut ns = NullStats;
        for i in 0..4 {
            b.q.enqueue(
                BatchEntry { entity: EntityId(i), process: ProcessId(i), token: 0 },
                0,
                0.0,
                &mut ns,
            );
        }
        let m = b.matching_entries();
        assert_eq!(m.len(), 2);
        assert_eq!(m[0].entity, EntityId(1));
        assert_eq!(m[1].entity, EntityId(3));
    }
}
