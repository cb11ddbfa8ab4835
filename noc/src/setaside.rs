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

use std::collections::{BTreeMap, VecDeque};

use crate::flit::Flit;
use crate::{Cycle, PacketId, PortId, VcId};

/// A replicated flit waiting for its own downstream VC: it already knows
/// its output port but not yet its outbound VC.
#[derive(Debug)]
pub struct Replica {
    pub inport: PortId,
    pub outport: PortId,
    pub flit: Flit,
}

/// Second-stage input unit holding multicast replicas.
///
/// Unlike an ordinary input port it owns no VC state: outbound VC
/// assignments are keyed by `(packet_id, outport)`, established by the
/// head replica and erased when the tail replica leaves. This is what
/// lets one physical flit arrival fan out into several independent
/// downstream VC negotiations.
#[derive(Debug, Default)]
pub struct SetAsideBuffer {
    buffer: VecDeque<Replica>,
    outvc_map: BTreeMap<(PacketId, PortId), VcId>,
}

impl SetAsideBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_replicas(&mut self, replicas: Vec<Replica>) {
        for replica in replicas {
            self.buffer.push_back(replica);
        }
    }

    pub fn front(&self) -> Option<&Replica> {
        self.buffer.front()
    }

    /// Whole-packet readiness, as switch allocation asks ordinary input
    /// ports. The set-aside buffer interleaves many packets, so the
    /// answer is always no; allocation polls `front` explicitly instead.
    pub fn is_ready(&self, _now: Cycle) -> bool {
        false
    }

    /// The outbound VC of the front replica: None for a head flit
    /// (forcing allocation), the established mapping otherwise.
    pub fn get_outvc(&self) -> Option<VcId> {
        let replica = self.buffer.front().expect("get_outvc on empty buffer");
        let key = (replica.flit.packet_id, replica.outport);
        if replica.flit.is_head() {
            assert!(
                !self.outvc_map.contains_key(&key),
                "head replica of packet {} already has an outbound VC",
                replica.flit.packet_id
            );
            None
        } else {
            Some(*self.outvc_map.get(&key).unwrap_or_else(|| {
                panic!(
                    "no outbound VC established for packet {} outport {}",
                    replica.flit.packet_id, replica.outport
                )
            }))
        }
    }

    /// Record the VC allocated for the front replica's path. Only head
    /// flits establish a new path.
    pub fn grant_outvc(&mut self, outvc: VcId) {
        let replica = self.buffer.front().expect("grant_outvc on empty buffer");
        let key = (replica.flit.packet_id, replica.outport);
        if replica.flit.is_head() {
            let prev = self.outvc_map.insert(key, outvc);
            assert!(prev.is_none());
        } else {
            panic!("non-head flit can't set an outbound VC");
        }
    }

    /// Dequeue the front replica; a departing tail erases its path's VC
    /// mapping.
    pub fn pop(&mut self) -> Replica {
        let replica = self.buffer.pop_front().expect("pop on empty buffer");
        if replica.flit.is_tail() {
            let key = (replica.flit.packet_id, replica.outport);
            let removed = self.outvc_map.remove(&key);
            assert!(
                removed.is_some(),
                "tail replica of packet {} left without a VC mapping",
                replica.flit.packet_id
            );
        }
        replica
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
