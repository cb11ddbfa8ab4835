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

use bitvec::prelude::*;
use std::collections::{BTreeSet, VecDeque};
use std::rc::Rc;

use crate::sim::ComponentId;
use crate::{Cycle, NodeId};

/// A protocol-layer message: an immutable payload blob plus the set of
/// destination nodes.
///
/// The payload is reference counted so that flits and their multicast
/// replicas share one copy of the bits.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub payload: Rc<BitBox>,
    pub dests: BTreeSet<NodeId>,
}

impl Message {
    pub fn new(payload: BitBox, dests: BTreeSet<NodeId>) -> Self {
        assert!(!payload.is_empty(), "zero-sized message");
        assert!(!dests.is_empty(), "message with no destinations");
        Self {
            payload: Rc::new(payload),
            dests,
        }
    }

    /// An all-zero message of `size_bits` bits; handy for tests and
    /// traffic generators.
    pub fn zeroed(size_bits: usize, dests: BTreeSet<NodeId>) -> Self {
        Self::new(
            BitVec::repeat(false, size_bits).into_boxed_bitslice(),
            dests,
        )
    }

    pub fn size_bits(&self) -> usize {
        self.payload.len()
    }
}

/// Bounded message queue at the protocol/network boundary.
///
/// This is the interface the protocol layer exposes to the network: the
/// network only ever peeks/dequeues on the injection side and
/// enqueues-with-latency on the ejection side. A registered dequeue
/// callback names the component to wake when the protocol layer frees a
/// slot, which is what drives stall-queue retries.
#[derive(Debug)]
pub struct MessageBuffer {
    slots: usize,
    queue: VecDeque<(Cycle, Message)>,
    dequeue_callback: Option<ComponentId>,
}

impl MessageBuffer {
    pub fn new(slots: usize) -> Self {
        assert!(slots > 0);
        Self {
            slots,
            queue: VecDeque::new(),
            dequeue_callback: None,
        }
    }

    /// Unbounded variant, for injection-side queues the simulation
    /// harness fills.
    pub fn unbounded() -> Self {
        Self {
            slots: usize::MAX,
            queue: VecDeque::new(),
            dequeue_callback: None,
        }
    }

    pub fn is_ready(&self, now: Cycle) -> bool {
        self.queue.front().map_or(false, |&(t, _)| t <= now)
    }

    pub fn peek(&self) -> &Message {
        &self
            .queue
            .front()
            .expect("peek on an empty message buffer")
            .1
    }

    pub fn dequeue(&mut self, now: Cycle) -> Message {
        assert!(self.is_ready(now), "dequeue on a non-ready message buffer");
        self.queue.pop_front().unwrap().1
    }

    pub fn are_n_slots_available(&self, n: usize, _now: Cycle) -> bool {
        self.queue.len().saturating_add(n) <= self.slots
    }

    pub fn enqueue(&mut self, msg: Message, now: Cycle, latency: Cycle) {
        assert!(
            self.queue.len() < self.slots,
            "enqueue on a full message buffer"
        );
        self.queue.push_back((now + latency, msg));
    }

    pub fn register_dequeue_callback(&mut self, target: ComponentId) {
        self.dequeue_callback = Some(target);
    }

    pub fn unregister_dequeue_callback(&mut self) {
        self.dequeue_callback = None;
    }

    pub fn dequeue_callback(&self) -> Option<ComponentId> {
        self.dequeue_callback
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::iter::FromIterator;

    #[test]
    fn slots_and_readiness() {
        let mut buf = MessageBuffer::new(2);
        let dests = BTreeSet::from_iter(vec![3]);
        assert!(buf.are_n_slots_available(2, 0));
        buf.enqueue(Message::zeroed(8, dests.clone()), 0, 1);
        assert!(!buf.is_ready(0));
        assert!(buf.is_ready(1));
        buf.enqueue(Message::zeroed(8, dests.clone()), 0, 1);
        assert!(!buf.are_n_slots_available(1, 0));
        let msg = buf.dequeue(1);
        assert_eq!(msg.size_bits(), 8);
        assert!(buf.are_n_slots_available(1, 1));
    }

    #[test]
    fn callback_registration() {
        let mut buf = MessageBuffer::new(1);
        assert_eq!(buf.dequeue_callback(), None);
        buf.register_dequeue_callback(ComponentId::Interface(7));
        assert_eq!(buf.dequeue_callback(), Some(ComponentId::Interface(7)));
        buf.unregister_dequeue_callback();
        assert_eq!(buf.dequeue_callback(), None);
    }
}
