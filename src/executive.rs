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

//! Virtual clock and ordered event set.
//!
//! Events are ordered by `(time, priority, insertion sequence)`: strictly by
//! time, ties broken by priority (smaller fires first), remaining ties by
//! insertion order. Cancellation sets a flag; cancelled events stay in the
//! heap and are discarded when popped.

use std::cell::Cell;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::rc::Rc;

use tracing::trace;

use crate::error::{SimError, SimResult};
use crate::process::ProcessId;
use crate::simulation::{Core, GeneratorId};

/// Default event priorities. Lower values fire first among events scheduled
/// at the same instant.
///
/// The relative order `RESUME < RELEASE < SEIZE < DELAY` is a public
/// contract: at one instant, a waiting entity resumed by a release is served
/// before the release finishes, which in turn precedes any newly arriving
/// seize, which precedes plain delay expirations.
pub mod priority {
    pub const RESUME: i32 = 5;
    pub const RELEASE: i32 = 10;
    pub const MOVE: i32 = 15;
    pub const BLOCKAGE: i32 = 20;
    pub const SEIZE: i32 = 25;
    pub const YIELD: i32 = 30;
    pub const WAIT_FOR: i32 = 35;
    pub const CONVEYOR_REQUEST: i32 = 40;
    pub const CONVEYOR_EXIT: i32 = 45;
    pub const TRANSPORT_REQUEST: i32 = 50;
    pub const DELAY: i32 = 55;
    pub const QUEUE: i32 = 60;
}

/// What happens when an event fires.
pub(crate) enum EventAction<M> {
    /// Start a process that is still in its Created state.
    StartProcess(ProcessId),
    /// Resume the suspension identified by `token` on `process`. Stale
    /// tokens (the suspension was already resumed or replaced) are skipped.
    Resume { process: ProcessId, token: u64 },
    /// Create the next entity of a generator and schedule the one after.
    Arrival(GeneratorId),
    /// Run an arbitrary action against the core. Used for the scheduled
    /// external operations (signals, capacity changes, hold releases).
    Callback(Box<dyn FnOnce(&mut Core<M>) -> SimResult<()>>),
}

pub(crate) struct ScheduledEvent<M> {
    pub time: f64,
    pub priority: i32,
    pub seq: u64,
    pub cancelled: Rc<Cell<bool>>,
    pub action: EventAction<M>,
}

/// Handle to a scheduled event, used to cancel it.
///
/// Cancelling is a flag write; the event stays in the queue and is skipped
/// when it reaches the front.
#[derive(Debug, Clone)]
pub struct EventHandle {
    seq: u64,
    cancelled: Rc<Cell<bool>>,
}

impl EventHandle {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }
}

impl<M> PartialEq for ScheduledEvent<M> {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl<M> Eq for ScheduledEvent<M> {}

impl<M> PartialOrd for ScheduledEvent<M> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<M> Ord for ScheduledEvent<M> {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.time.partial_cmp(&other.time) {
            Some(o) => o
                .then_with(|| self.priority.cmp(&other.priority))
                .then_with(|| self.seq.cmp(&other.seq)),
            None => panic!("Event time was uncomparable. Maybe a NaN"),
        }
    }
}

/// The event loop state: virtual clock, pending event set, halt flag.
///
/// The executive is the only writer of the clock; time advances exactly to
/// the time stamp of each fired event and never moves backwards.
pub(crate) struct Executive<M> {
    time: f64,
    seq: u64,
    events: BinaryHeap<Reverse<ScheduledEvent<M>>>,
    halted: bool,
}

impl<M> Executive<M> {
    pub fn new() -> Executive<M> {
        Executive { time: 0.0, seq: 0, events: BinaryHeap::new(), halted: false }
    }

    pub fn now(&self) -> f64 {
        self.time
    }

    pub fn halt(&mut self) {
        self.halted = true;
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Schedule `action` to fire `delay` from now at `priority`.
    ///
    /// A zero delay is legal: the event fires at the current time after all
    /// previously scheduled events with the same `(time, priority)` key.
    pub fn schedule(
        &mut self,
        delay: f64,
        priority: i32,
        action: EventAction<M>,
    ) -> SimResult<EventHandle> {
        if !delay.is_finite() || delay < 0.0 {
            return Err(SimError::invalid(format!(
                "event delay must be finite and non-negative, got {delay}"
            )));
        }
        let seq = self.seq;
        self.seq += 1;
        let cancelled = Rc::new(Cell::new(false));
        let time = self.time + delay;
        trace!(time, priority, seq, "event scheduled");
        self.events.push(Reverse(ScheduledEvent {
            time,
            priority,
            seq,
            cancelled: Rc::clone(&cancelled),
            action,
        }));
        Ok(EventHandle { seq, cancelled })
    }

    /// Flag `handle`'s event as cancelled. The event is discarded, not
    /// re-heaped, when it reaches the front of the queue.
    pub fn cancel(&mut self, handle: &EventHandle) {
        trace!(seq = handle.seq, "event cancelled");
        handle.cancelled.set(true);
    }

    /// Pop the next live event, advancing the clock to its time stamp.
    /// Cancelled events encountered on the way are popped and discarded
    /// without advancing the clock.
    pub fn pop_next(&mut self) -> Option<(f64, EventAction<M>)> {
        while let Some(Reverse(ev)) = self.events.pop() {
            if ev.cancelled.get() {
                continue;
            }
            debug_assert!(ev.time >= self.time, "clock would move backwards");
            self.time = ev.time;
            trace!(time = ev.time, priority = ev.priority, seq = ev.seq, "event fired");
            return Some((ev.time, ev.action));
        }
        None
    }

    /// Time stamp of the next live event, pruning cancelled ones from the
    /// front.
    pub fn next_time(&mut self) -> Option<f64> {
        loop {
            match self.events.peek() {
                Some(Reverse(ev)) if ev.cancelled.get() => {
                    self.events.pop();
                }
                Some(Reverse(ev)) => return Some(ev.time),
                None => return None,
            }
        }
    }

    /// Number of live (non-cancelled) events still scheduled.
    pub fn pending_events(&self) -> usize {
        self.events.iter().filter(|Reverse(e)| !e.cancelled.get()).count()
    }

    /// Move the clock forward without firing anything. Used to close a
    /// replication at its exact length.
    pub fn advance_to(&mut self, time: f64) {
        debug_assert!(time >= self.time);
        self.time = time;
    }

    /// Drop all pending events without touching the clock. Used when a
    /// replication closes.
    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    /// Drop all pending events and rewind the clock for a new replication.
    pub fn reset(&mut self) {
        self.events.clear();
        self.time = 0.0;
        self.halted = false;
    }
}
