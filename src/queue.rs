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

//! Ordered waiting lines.
//!
//! Every waiting line in the kernel (request queues, hold queues, signal
//! waiter sets, blocked sender/receiver lines) is a [`WaitQueue`]: an
//! ordered collection of stamped entries publishing a time-weighted
//! number-in-queue statistic and a waiting-time tally. Entries can be
//! removed *with stats* (closing the wait interval into the tally) or
//! silently (termination and request movement).

use std::collections::VecDeque;

use crate::entity::EntityId;
use crate::pool::PoolId;
use crate::process::ProcessId;
use crate::resource::ResourceId;
use crate::stats::StatsSink;

/// Ordering discipline of a waiting line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Discipline {
    /// First in, first out.
    #[default]
    Fifo,
    /// Last in, first out.
    Lifo,
    /// Ordered by priority value ascending (lower value is served first),
    /// FIFO among equal priorities.
    Ranked,
}

#[derive(Debug)]
struct Entry<T> {
    value: T,
    priority: i32,
    seq: u64,
    entered_at: f64,
}

#[derive(Debug)]
pub(crate) struct WaitQueue<T> {
    name: String,
    discipline: Discipline,
    entries: VecDeque<Entry<T>>,
    next_seq: u64,
}

impl<T> WaitQueue<T> {
    pub fn new(name: impl Into<String>, discipline: Discipline) -> WaitQueue<T> {
        WaitQueue { name: name.into(), discipline, entries: VecDeque::new(), next_seq: 0 }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn enqueue(&mut self, value: T, priority: i32, now: f64, stats: &mut dyn StatsSink) {
        let entry = Entry { value, priority, seq: self.next_seq, entered_at: now };
        self.next_seq += 1;
        match self.discipline {
            Discipline::Fifo => self.entries.push_back(entry),
            Discipline::Lifo => self.entries.push_front(entry),
            Discipline::Ranked => {
                // stable: after every entry with priority <= the new one
                let pos = self
                    .entries
                    .iter()
                    .position(|e| e.priority > entry.priority)
                    .unwrap_or(self.entries.len());
                self.entries.insert(pos, entry);
            }
        }
        self.observe_level(now, stats);
    }

    pub fn peek(&self) -> Option<&T> {
        self.entries.front().map(|e| &e.value)
    }

    /// Iterate entries in queue order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|e| &e.value)
    }

    /// Iterate entries mutably in queue order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.entries.iter_mut().map(|e| &mut e.value)
    }

    /// Remove the first entry matching `pred`. With `collect_stats` the wait
    /// interval is tallied; a silent removal still updates the
    /// number-in-queue level (the physical count changed) but never the
    /// waiting-time tally.
    pub fn remove_where(
        &mut self,
        pred: impl Fn(&T) -> bool,
        collect_stats: bool,
        now: f64,
        stats: &mut dyn StatsSink,
    ) -> Option<T> {
        let pos = self.entries.iter().position(|e| pred(&e.value))?;
        let entry = self.entries.remove(pos).unwrap();
        self.close_entry(&entry, collect_stats, now, stats);
        Some(entry.value)
    }

    /// Remove the head of the queue.
    pub fn pop_first(
        &mut self,
        collect_stats: bool,
        now: f64,
        stats: &mut dyn StatsSink,
    ) -> Option<T> {
        let entry = self.entries.pop_front()?;
        self.close_entry(&entry, collect_stats, now, stats);
        Some(entry.value)
    }

    /// Remove every entry in queue order.
    pub fn drain_all(
        &mut self,
        collect_stats: bool,
        now: f64,
        stats: &mut dyn StatsSink,
    ) -> Vec<T> {
        let mut out = Vec::with_capacity(self.entries.len());
        while let Some(v) = self.pop_first(collect_stats, now, stats) {
            out.push(v);
        }
        out
    }

    fn close_entry(&self, entry: &Entry<T>, collect_stats: bool, now: f64, stats: &mut dyn StatsSink) {
        if collect_stats {
            stats.tally_observe(&format!("{}.time_in_q", self.name), now - entry.entered_at);
        }
        self.observe_level(now, stats);
    }

    /// Publish the current number-in-queue level. Called after every change
    /// and from warm-up to re-enter the level at the reset instant.
    pub fn observe_level(&self, now: f64, stats: &mut dyn StatsSink) {
        stats.time_weighted_observe(&format!("{}.num_in_q", self.name), self.len() as f64, now);
    }

    /// Drop all entries without touching statistics. Replication reset.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Identifies a request queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueId(pub(crate) usize);

/// Identifies a hold queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HoldQueueId(pub(crate) usize);

/// Identifies a pending seize request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub(crate) usize);

/// What a pending seize is asking capacity from. The target may be swapped
/// by request movement while the requester is suspended; the resumed seize
/// allocates from whatever the target is at resume time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeizeTarget {
    Resource(ResourceId),
    Pool(PoolId),
}

/// A pending need for capacity, alive only while its requester is between
/// the seize call and the allocation.
#[derive(Debug)]
pub(crate) struct Request {
    pub entity: EntityId,
    pub process: ProcessId,
    pub token: u64,
    pub amount: u32,
    pub target: SeizeTarget,
    pub priority: i32,
    /// Queue the request currently sits in (movement updates this).
    pub queue: QueueId,
    /// A resume event has been scheduled and not yet consumed.
    pub resume_pending: bool,
    pub name: Option<String>,
}

pub(crate) struct RequestQueueRec {
    pub q: WaitQueue<RequestId>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct HoldEntry {
    pub entity: EntityId,
    pub process: ProcessId,
    pub token: u64,
}

pub(crate) struct HoldQueueRec {
    pub q: WaitQueue<HoldEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{MemoryStats, NullStats};

    #[test]
    fn fifo_and_lifo_orders() {
        let mut ns = NullStats;
        let mut f: WaitQueue<u32> = WaitQueue::new("f", Discipline::Fifo);
        let mut l: WaitQueue<u32> = WaitQueue::new("l", Discipline::Lifo);
        for v in [1, 2, 3] {
            f.enqueue(v, 0, 0.0, &mut ns);
            l.enqueue(v, 0, 0.0, &mut ns);
        }
        assert_eq!(f.pop_first(false, 0.0, &mut ns), Some(1));
        assert_eq!(l.pop_first(false, 0.0, &mut ns), Some(3));
    }

    #[test]
    fn ranked_is_stable_among_equal_priorities() {
        let mut ns = NullStats;
        let mut q: WaitQueue<&str> = WaitQueue::new("r", Discipline::Ranked);
        q.enqueue("b1", 2, 0.0, &mut ns);
        q.enqueue("a", 1, 0.0, &mut ns);
        q.enqueue("b2", 2, 0.0, &mut ns);
        q.enqueue("c", 3, 0.0, &mut ns);
        let order: Vec<_> = q.drain_all(false, 0.0, &mut ns);
        assert_eq!(order, vec!["a", "b1", "b2", "c"]);
    }

    #[test]
    fn waiting_time_tallied_only_with_stats() {
        let mut ms = MemoryStats::new();
        let mut q: WaitQueue<u32> = WaitQueue::new("q", Discipline::Fifo);
        q.enqueue(1, 0, 0.0, &mut ms);
        q.enqueue(2, 0, 1.0, &mut ms);
        q.remove_where(|v| *v == 1, true, 4.0, &mut ms);
        q.remove_where(|v| *v == 2, false, 6.0, &mut ms);
        assert_eq!(ms.tally_count("q.time_in_q"), 1);
        assert_eq!(ms.tally_mean("q.time_in_q"), Some(4.0));
        // the silent removal still moved the level down
        assert_eq!(ms.last_value("q.num_in_q"), Some(0.0));
    }

    #[test]
    fn number_in_queue_is_time_weighted() {
        let mut ms = MemoryStats::new();
        let mut q: WaitQueue<u32> = WaitQueue::new("q", Discipline::Fifo);
        q.enqueue(1, 0, 0.0, &mut ms);
        q.enqueue(2, 0, 2.0, &mut ms);
        q.pop_first(true, 3.0, &mut ms);
        q.pop_first(true, 5.0, &mut ms);
        // levels: 1 on [0,2), 2 on [2,3), 1 on [3,5) -> area 6 over 5
        assert_eq!(ms.time_weighted_average("q.num_in_q", 5.0), Some(1.2));
    }
}
