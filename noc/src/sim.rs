// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

use crate::Cycle;

/// The components a wakeup can be delivered to.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum ComponentId {
    Router(usize),
    Interface(usize),
    /// the multicast liveness scan
    Watchdog,
}

#[derive(PartialEq, Eq, PartialOrd, Ord, Debug)]
struct Event {
    time: Cycle,
    seq: u64,
    target: ComponentId,
}

/// Ordered `(time, component)` wakeup queue driving the whole simulation.
///
/// All activity is cooperative: a component that cannot make progress
/// simply does not act and re-arms a future wakeup. Scheduling the same
/// component twice for one tick is a no-op, so wakeups stay one-per-tick
/// per component.
#[derive(Debug)]
pub struct EventQueue {
    now: Cycle,
    heap: BinaryHeap<Reverse<Event>>,
    scheduled: HashSet<(Cycle, ComponentId)>,
    seq: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            now: 0,
            heap: BinaryHeap::new(),
            scheduled: HashSet::new(),
            seq: 0,
        }
    }

    pub fn now(&self) -> Cycle {
        self.now
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Arm a wakeup for `target` at absolute tick `time`.
    pub fn schedule(&mut self, target: ComponentId, time: Cycle) {
        assert!(
            time >= self.now,
            "scheduling {:?} at {} in the past (now {})",
            target,
            time,
            self.now
        );
        if self.scheduled.insert((time, target)) {
            log::trace!("schedule {:?} at {}", target, time);
            self.heap.push(Reverse(Event {
                time,
                seq: self.seq,
                target,
            }));
            self.seq += 1;
        }
    }

    /// Arm a wakeup `delay` ticks from now.
    pub fn schedule_in(&mut self, target: ComponentId, delay: Cycle) {
        self.schedule(target, self.now + delay);
    }

    /// Pop the next wakeup not later than `end`, advancing `now` to it.
    pub fn pop_until(&mut self, end: Cycle) -> Option<(Cycle, ComponentId)> {
        match self.heap.peek() {
            Some(Reverse(ev)) if ev.time <= end => {}
            _ => return None,
        }
        let Reverse(ev) = self.heap.pop().unwrap();
        self.scheduled.remove(&(ev.time, ev.target));
        debug_assert!(ev.time >= self.now);
        self.now = ev.time;
        Some((ev.time, ev.target))
    }

    /// Advance the clock to `time` without processing anything.
    pub fn advance_to(&mut self, time: Cycle) {
        if time > self.now {
            self.now = time;
        }
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}
