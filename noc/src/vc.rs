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

use crate::flit::Flit;
use crate::{Cycle, PortId, VcId};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum VcState {
    Idle,
    Active,
}

/// Input-side virtual channel: flit FIFO plus the packet-lifetime state
/// machine `IDLE -> (head) -> ACTIVE -> (tail) -> IDLE`.
///
/// A head flit may only be admitted while idle; admitting into an active
/// VC is an invariant violation, not backpressure.
#[derive(Debug)]
pub struct VirtualChannel {
    state: VcState,
    buffer: VecDeque<Flit>,
    out_port: Option<PortId>,
    out_vc: Option<VcId>,
    enqueue_time: Option<Cycle>,
}

impl VirtualChannel {
    pub fn new() -> Self {
        Self {
            state: VcState::Idle,
            buffer: VecDeque::new(),
            out_port: None,
            out_vc: None,
            enqueue_time: None,
        }
    }

    pub fn state(&self) -> VcState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == VcState::Idle
    }

    pub fn set_active(&mut self, now: Cycle) {
        assert!(
            self.is_idle(),
            "head flit admitted into an active virtual channel"
        );
        self.state = VcState::Active;
        self.enqueue_time = Some(now);
    }

    pub fn set_idle(&mut self) {
        self.state = VcState::Idle;
        self.out_port = None;
        self.out_vc = None;
        self.enqueue_time = None;
    }

    /// All flits of the packet occupying this VC leave through one
    /// output port, fixed when the head is admitted.
    pub fn grant_outport(&mut self, port: PortId) {
        self.out_port = Some(port);
    }

    pub fn outport(&self) -> Option<PortId> {
        self.out_port
    }

    pub fn grant_outvc(&mut self, vc: VcId) {
        assert!(self.out_vc.is_none());
        self.out_vc = Some(vc);
    }

    pub fn outvc(&self) -> Option<VcId> {
        self.out_vc
    }

    pub fn insert_flit(&mut self, flit: Flit) {
        self.buffer.push_back(flit);
    }

    pub fn peek(&self) -> Option<&Flit> {
        self.buffer.front()
    }

    pub fn pop(&mut self) -> Flit {
        self.buffer.pop_front().expect("pop on an empty VC")
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for VirtualChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Sender-side view of one downstream virtual channel: remaining buffer
/// credits plus a mirror of the downstream idle/active state.
#[derive(Clone, Debug)]
pub struct OutVcState {
    state: VcState,
    credits: usize,
}

impl OutVcState {
    pub fn new(credits: usize) -> Self {
        Self {
            state: VcState::Idle,
            credits,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state == VcState::Idle
    }

    pub fn set_active(&mut self) {
        assert!(self.is_idle(), "allocating a busy outbound VC");
        self.state = VcState::Active;
    }

    pub fn set_idle(&mut self) {
        self.state = VcState::Idle;
    }

    pub fn has_credit(&self) -> bool {
        self.credits > 0
    }

    pub fn credits(&self) -> usize {
        self.credits
    }

    pub fn increment_credit(&mut self) {
        self.credits += 1;
    }

    pub fn decrement_credit(&mut self) {
        assert!(self.credits > 0, "sending without credit");
        self.credits -= 1;
    }
}
