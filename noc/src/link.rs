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

use std::collections::VecDeque;

use crate::sim::ComponentId;
use crate::Cycle;

/// Point-to-point transport with a fixed latency, used for both flits
/// and credits.
///
/// Items become visible to the consumer `latency` ticks after they were
/// sent; the sender is responsible for waking `dst` at the arrival tick.
/// Delivery is strictly FIFO.
#[derive(Debug)]
pub struct Link<T> {
    latency: Cycle,
    dst: ComponentId,
    queue: VecDeque<(Cycle, T)>,
}

impl<T> Link<T> {
    pub fn new(latency: Cycle, dst: ComponentId) -> Self {
        assert!(latency >= 1, "links must have at least one tick of latency");
        Self {
            latency,
            dst,
            queue: VecDeque::new(),
        }
    }

    pub fn dst(&self) -> ComponentId {
        self.dst
    }

    /// Queue `item` for delivery and return its arrival tick.
    pub fn send(&mut self, now: Cycle, item: T) -> Cycle {
        let mut arrival = now + self.latency;
        // keep FIFO order even if the sender fell behind
        if let Some(&(last, _)) = self.queue.back() {
            if last > arrival {
                arrival = last;
            }
        }
        self.queue.push_back((arrival, item));
        arrival
    }

    pub fn is_ready(&self, now: Cycle) -> bool {
        self.queue.front().map_or(false, |&(t, _)| t <= now)
    }

    pub fn consume(&mut self) -> T {
        let (_, item) = self
            .queue
            .pop_front()
            .expect("consume on an empty link");
        item
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn next_arrival(&self) -> Option<Cycle> {
        self.queue.front().map(|&(t, _)| t)
    }
}
