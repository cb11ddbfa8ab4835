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

use std::collections::{BTreeSet, VecDeque};
use std::rc::Rc;

use crate::config::NetworkConfig;
use crate::error::Error;
use crate::flit::{flitize, Credit, Flit, RouteDescriptor};
use crate::message::{Message, MessageBuffer};
use crate::network::Shared;
use crate::partition::PartitionClassifier;
use crate::sim::ComponentId;
use crate::vc::OutVcState;
use crate::{Cycle, LinkId, NodeId, RouterId, VcId, VnetId};

/// Boundary between the protocol layer and the network.
///
/// On injection it splits a message into flits, allocating one virtual
/// channel per packet; a multicast whose destinations straddle the
/// north-going half of the mesh is split up front into a north-bound
/// packet and a non-north packet so the two halves never share a packet
/// id. The north packet travels in the upper half of the doubled vnet
/// space and is mapped back to its protocol vnet on ejection.
///
/// On ejection it reassembles messages, returns credits, and parks tail
/// flits in a stall queue when the protocol buffer is full, retrying on
/// the buffer's dequeue callback.
pub struct NetworkInterface {
    id: NodeId,
    router: RouterId,
    vnets: usize,
    vcs_per_vnet: usize,
    link_width: usize,
    deadlock_threshold: usize,
    classifier: PartitionClassifier,
    /// per protocol vnet, filled by the harness
    inject_bufs: Vec<MessageBuffer>,
    /// per protocol vnet, drained by the harness
    eject_bufs: Vec<MessageBuffer>,
    out_link: LinkId,
    in_link: LinkId,
    /// credits back to the router for ejected flits
    credit_out: LinkId,
    /// credits from the router for injected flits
    credit_in: LinkId,
    out_vcs: Vec<OutVcState>,
    /// flitized packets waiting for link bandwidth, per VC
    out_flits: Vec<VecDeque<Flit>>,
    rr: Vec<usize>,
    /// consecutive failed VC allocations, per doubled vnet
    busy: Vec<usize>,
    stall_queue: VecDeque<Flit>,
    /// stalled tail flits per protocol vnet
    stalled: Vec<usize>,
}

impl NetworkInterface {
    pub(crate) fn new(
        id: NodeId,
        router: RouterId,
        cfg: &NetworkConfig,
        out_link: LinkId,
        in_link: LinkId,
        credit_out: LinkId,
        credit_in: LinkId,
    ) -> Result<Self, Error> {
        let classifier = PartitionClassifier::new(cfg.rows, cfg.cols)?;
        Ok(Self {
            id,
            router,
            vnets: cfg.vnets,
            vcs_per_vnet: cfg.vcs_per_vnet,
            link_width: cfg.link_width_bits,
            deadlock_threshold: cfg.deadlock_threshold,
            classifier,
            inject_bufs: (0..cfg.vnets).map(|_| MessageBuffer::unbounded()).collect(),
            eject_bufs: (0..cfg.vnets)
                .map(|_| MessageBuffer::new(cfg.protocol_buffer_slots))
                .collect(),
            out_link,
            in_link,
            credit_out,
            credit_in,
            out_vcs: (0..cfg.total_vcs())
                .map(|_| OutVcState::new(cfg.vc_buffer_depth))
                .collect(),
            out_flits: (0..cfg.total_vcs()).map(|_| VecDeque::new()).collect(),
            rr: vec![0; cfg.total_vnets()],
            busy: vec![0; cfg.total_vnets()],
            stall_queue: VecDeque::new(),
            stalled: vec![0; cfg.vnets],
        })
    }

    pub(crate) fn wakeup(&mut self, shared: &mut Shared) {
        let mut enqueued = vec![false; self.vnets];
        for vnet in 0..self.vnets {
            self.flitisize(vnet, shared);
        }
        self.schedule_output_link(shared);
        self.check_stall_queue(&mut enqueued, shared);
        self.check_input_link(&mut enqueued, shared);
        self.check_credit_link(shared);
        self.check_reschedule(shared);
    }

    pub(crate) fn inject(&mut self, vnet: VnetId, msg: Message, now: Cycle) {
        self.inject_bufs[vnet].enqueue(msg, now, 1);
    }

    /// Hand the oldest delivered message of `vnet` to the protocol
    /// layer, along with the component to wake now that a slot freed.
    pub(crate) fn dequeue_delivery(
        &mut self,
        vnet: VnetId,
        now: Cycle,
    ) -> Option<(Message, Option<ComponentId>)> {
        if !self.eject_bufs[vnet].is_ready(now) {
            return None;
        }
        let msg = self.eject_bufs[vnet].dequeue(now);
        Some((msg, self.eject_bufs[vnet].dequeue_callback()))
    }

    /// Convert at most one waiting message of `vnet` into packets. The
    /// message commits only once every sub-packet has a VC; otherwise the
    /// busy streak grows and eventually trips the deadlock diagnostic.
    fn flitisize(&mut self, vnet: VnetId, shared: &mut Shared) {
        let now = shared.events.now();
        if !self.inject_bufs[vnet].is_ready(now) {
            return;
        }
        let dests = self.inject_bufs[vnet].peek().dests.clone();

        let (_, own_y) = self.classifier.coords(self.router);
        let mut north: BTreeSet<NodeId> = BTreeSet::new();
        let mut rest: BTreeSet<NodeId> = BTreeSet::new();
        for &node in &dests {
            let (_, dest_y) = self.classifier.coords(shared.topo.router_of(node));
            if dest_y > own_y {
                north.insert(node);
            } else {
                rest.insert(node);
            }
        }
        let mut subpackets: Vec<(VnetId, BTreeSet<NodeId>)> = Vec::new();
        if !rest.is_empty() {
            subpackets.push((vnet, rest));
        }
        if !north.is_empty() {
            subpackets.push((self.vnets + vnet, north));
        }

        let mut vcs: Vec<VcId> = Vec::new();
        for &(class, _) in &subpackets {
            match self.peek_vc(class) {
                Some(vc) => vcs.push(vc),
                None => {
                    self.busy[class] += 1;
                    if self.busy[class] > self.deadlock_threshold {
                        panic!(
                            "node {}: possible network deadlock, no VC for vnet {} \
                             after {} attempts\n{}",
                            self.id,
                            class,
                            self.busy[class],
                            shared.multicast.status()
                        );
                    }
                    return;
                }
            }
        }

        let msg = self.inject_bufs[vnet].dequeue(now);
        for ((class, nodes), vc) in subpackets.into_iter().zip(vcs) {
            self.busy[class] = 0;
            self.claim_vc(class, vc);
            let packet_id = shared.alloc_packet_id();
            let route = RouteDescriptor::new(vnet, self.id, self.router, nodes, &shared.topo);
            shared.track_packet(packet_id, route.dest_routers.clone());
            let flits = flitize(packet_id, vc, class, route, &msg, self.link_width, now);
            shared.stats.injected_packets[class] += 1;
            shared.stats.injected_flits[class] += flits.len() as u64;
            log::debug!(
                "node {} injecting packet {} on vnet {} vc {} ({} flits)",
                self.id,
                packet_id,
                class,
                vc,
                flits.len()
            );
            self.out_flits[vc].extend(flits);
        }
    }

    /// Next idle VC of `vnet`, without claiming it.
    fn peek_vc(&self, vnet: VnetId) -> Option<VcId> {
        let base = vnet * self.vcs_per_vnet;
        (0..self.vcs_per_vnet)
            .map(|k| base + (self.rr[vnet] + k) % self.vcs_per_vnet)
            .find(|&vc| self.out_vcs[vc].is_idle())
    }

    fn claim_vc(&mut self, vnet: VnetId, vc: VcId) {
        self.out_vcs[vc].set_active();
        self.rr[vnet] = (vc - vnet * self.vcs_per_vnet + 1) % self.vcs_per_vnet;
    }

    /// Send the flit that has been waiting longest among the VCs with
    /// credit; one flit per tick, the link is serial.
    fn schedule_output_link(&mut self, shared: &mut Shared) {
        let mut best: Option<(Cycle, VcId)> = None;
        for vc in 0..self.out_vcs.len() {
            if self.out_flits[vc].is_empty() || !self.out_vcs[vc].has_credit() {
                continue;
            }
            let t = self.out_flits[vc][0].enqueue_time;
            if best.map_or(true, |(earliest, _)| t < earliest) {
                best = Some((t, vc));
            }
        }
        if let Some((_, vc)) = best {
            let flit = self.out_flits[vc].pop_front().unwrap();
            debug_assert_eq!(flit.vc, vc);
            self.out_vcs[vc].decrement_credit();
            log::trace!("node {} sending {}", self.id, flit);
            shared.send_flit(self.out_link, flit);
        }
    }

    /// Retry stalled tail flits oldest first, still capped at one
    /// accepted message per vnet per tick.
    fn check_stall_queue(&mut self, enqueued: &mut [bool], shared: &mut Shared) {
        let now = shared.events.now();
        let mut remaining = VecDeque::new();
        while let Some(flit) = self.stall_queue.pop_front() {
            let vnet = self.protocol_vnet(flit.vnet);
            if !enqueued[vnet] && self.eject_bufs[vnet].are_n_slots_available(1, now) {
                enqueued[vnet] = true;
                self.stalled[vnet] -= 1;
                if self.stalled[vnet] == 0 {
                    self.eject_bufs[vnet].unregister_dequeue_callback();
                }
                self.eject(flit, shared);
            } else {
                remaining.push_back(flit);
            }
        }
        self.stall_queue = remaining;
    }

    fn check_input_link(&mut self, enqueued: &mut [bool], shared: &mut Shared) {
        let now = shared.events.now();
        while shared.flit_links[self.in_link].is_ready(now) {
            let flit = shared.flit_links[self.in_link].consume();
            shared.stats.ejected_flits[flit.vnet] += 1;
            if flit.is_tail() {
                let vnet = self.protocol_vnet(flit.vnet);
                if !enqueued[vnet] && self.eject_bufs[vnet].are_n_slots_available(1, now) {
                    self.eject(flit, shared);
                } else {
                    log::debug!("node {}: protocol buffer full, stalling {}", self.id, flit);
                    self.stalled[vnet] += 1;
                    self.eject_bufs[vnet]
                        .register_dequeue_callback(ComponentId::Interface(self.id));
                    self.stall_queue.push_back(flit);
                }
            } else {
                // non-tail flits free their buffer slot immediately; the
                // freeing credit waits for the tail's ejection
                shared.send_credit(self.credit_out, Credit { vc: flit.vc, free: false });
            }
        }
    }

    /// Deliver a completed packet to the protocol buffer, free the VC
    /// upstream, and clear this router from the packet's outstanding set.
    fn eject(&mut self, flit: Flit, shared: &mut Shared) {
        let now = shared.events.now();
        let vnet = self.protocol_vnet(flit.vnet);
        let msg = Message {
            payload: Rc::clone(&flit.payload),
            dests: flit.route.dest_nodes.clone(),
        };
        self.eject_bufs[vnet].enqueue(msg, now, 1);
        shared.send_credit(self.credit_out, Credit { vc: flit.vc, free: true });
        shared.stats.ejected_packets[flit.vnet] += 1;
        shared.stats.packet_latency[flit.vnet] += (now - flit.enqueue_time) as u64;
        shared.untrack_dest(flit.packet_id, self.router);
        log::debug!(
            "node {} delivered packet {} after {} ticks",
            self.id,
            flit.packet_id,
            now - flit.enqueue_time
        );
    }

    fn check_credit_link(&mut self, shared: &mut Shared) {
        let now = shared.events.now();
        while shared.credit_links[self.credit_in].is_ready(now) {
            let credit = shared.credit_links[self.credit_in].consume();
            self.out_vcs[credit.vc].increment_credit();
            if credit.free {
                self.out_vcs[credit.vc].set_idle();
            }
        }
    }

    fn check_reschedule(&self, shared: &mut Shared) {
        let now = shared.events.now();
        let pending_inject = self.inject_bufs.iter().any(|b| !b.is_empty());
        let pending_out = self.out_flits.iter().any(|q| !q.is_empty());
        // stalled flits wait for the dequeue callback unless a slot is
        // already free and only the per-tick cap deferred them
        let pending_stall = (0..self.vnets)
            .any(|v| self.stalled[v] > 0 && self.eject_bufs[v].are_n_slots_available(1, now));
        if pending_inject || pending_out || pending_stall {
            shared.events.schedule_in(ComponentId::Interface(self.id), 1);
        }
    }

    /// Protocol vnet of a (possibly north-bound) traffic class.
    fn protocol_vnet(&self, class: VnetId) -> VnetId {
        if class >= self.vnets {
            class - self.vnets
        } else {
            class
        }
    }
}
