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

use itertools::Itertools;
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{BTreeMap, BTreeSet};

use crate::config::NetworkConfig;
use crate::error::Error;
use crate::flit::{Credit, Flit};
use crate::interface::NetworkInterface;
use crate::link::Link;
use crate::message::Message;
use crate::partition::PartitionClassifier;
use crate::router::{InputPort, OutputPort, Router};
use crate::routing::{OutDir, RoutingUnit};
use crate::sim::{ComponentId, EventQueue};
use crate::topology::{TopoNode, Topology};
use crate::{Cycle, LinkId, NodeId, PacketId, RouterId, VnetId};

/// Counters per (doubled) virtual network.
#[derive(Clone, Debug)]
pub struct NetworkStats {
    pub injected_packets: Vec<u64>,
    pub injected_flits: Vec<u64>,
    pub ejected_packets: Vec<u64>,
    pub ejected_flits: Vec<u64>,
    pub buffer_reads: Vec<u64>,
    pub buffer_writes: Vec<u64>,
    /// sum of injection-to-delivery times, per vnet
    pub packet_latency: Vec<u64>,
}

impl NetworkStats {
    pub(crate) fn new(total_vnets: usize) -> Self {
        Self {
            injected_packets: vec![0; total_vnets],
            injected_flits: vec![0; total_vnets],
            ejected_packets: vec![0; total_vnets],
            ejected_flits: vec![0; total_vnets],
            buffer_reads: vec![0; total_vnets],
            buffer_writes: vec![0; total_vnets],
            packet_latency: vec![0; total_vnets],
        }
    }

    pub fn total_injected_packets(&self) -> u64 {
        self.injected_packets.iter().sum()
    }

    pub fn total_ejected_packets(&self) -> u64 {
        self.ejected_packets.iter().sum()
    }
}

#[derive(Debug)]
struct MulticastEntry {
    injected_at: Cycle,
    outstanding: BTreeSet<RouterId>,
}

/// Network-wide record of every in-flight packet's undelivered
/// destination routers, scanned by the liveness watchdog.
#[derive(Debug)]
pub struct MulticastTable {
    threshold: Cycle,
    entries: BTreeMap<PacketId, MulticastEntry>,
}

impl MulticastTable {
    pub(crate) fn new(threshold: Cycle) -> Self {
        Self {
            threshold,
            entries: BTreeMap::new(),
        }
    }

    pub(crate) fn threshold(&self) -> Cycle {
        self.threshold
    }

    pub(crate) fn insert(&mut self, id: PacketId, now: Cycle, dests: BTreeSet<RouterId>) {
        assert!(!dests.is_empty());
        let prev = self.entries.insert(
            id,
            MulticastEntry {
                injected_at: now,
                outstanding: dests,
            },
        );
        assert!(prev.is_none(), "packet {} tracked twice", id);
    }

    /// A delivery at `router` completed for packet `id`; the entry goes
    /// away with its last destination.
    pub(crate) fn remove_dest(&mut self, id: PacketId, router: RouterId) {
        let entry = self
            .entries
            .get_mut(&id)
            .unwrap_or_else(|| panic!("delivery for untracked packet {}", id));
        let removed = entry.outstanding.remove(&router);
        assert!(
            removed,
            "duplicate delivery of packet {} at router {}",
            id, router
        );
        if entry.outstanding.is_empty() {
            self.entries.remove(&id);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Operator-readable dump of every live entry.
    pub fn status(&self) -> String {
        let mut out = format!("multicast table: {} outstanding packets\n", self.entries.len());
        for (id, entry) in &self.entries {
            out.push_str(&format!(
                "  packet {}: injected at {}, outstanding routers {}\n",
                id,
                entry.injected_at,
                entry.outstanding.iter().format(" ")
            ));
        }
        out
    }

    /// Fatal if any entry has been live for the full threshold.
    pub(crate) fn scan(&self, now: Cycle) {
        for (id, entry) in &self.entries {
            if now - entry.injected_at >= self.threshold {
                panic!(
                    "multicast packet {} outstanding since tick {} (now {})\n{}",
                    id,
                    entry.injected_at,
                    now,
                    self.status()
                );
            }
        }
    }
}

/// State every component reaches through its wakeup: the wiring, the
/// transport links, the clock, and the network-wide bookkeeping.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) topo: Topology,
    pub(crate) flit_links: Vec<Link<Flit>>,
    pub(crate) credit_links: Vec<Link<Credit>>,
    pub(crate) events: EventQueue,
    pub(crate) multicast: MulticastTable,
    pub(crate) stats: NetworkStats,
    next_packet_id: PacketId,
    watchdog_armed: bool,
}

impl Shared {
    /// A shared block with the wiring graph but no links, for driving
    /// single components by hand.
    #[cfg(test)]
    pub(crate) fn new(cfg: &NetworkConfig) -> Result<Self, Error> {
        Ok(Self {
            topo: Topology::mesh(cfg)?,
            flit_links: Vec::new(),
            credit_links: Vec::new(),
            events: EventQueue::new(),
            multicast: MulticastTable::new(cfg.multicast_threshold),
            stats: NetworkStats::new(cfg.total_vnets()),
            next_packet_id: 0,
            watchdog_armed: false,
        })
    }

    pub(crate) fn alloc_packet_id(&mut self) -> PacketId {
        let id = self.next_packet_id;
        self.next_packet_id += 1;
        id
    }

    /// Queue a flit and wake the link's consumer at its arrival tick.
    pub(crate) fn send_flit(&mut self, link: LinkId, flit: Flit) {
        let now = self.events.now();
        let arrival = self.flit_links[link].send(now, flit);
        let dst = self.flit_links[link].dst();
        self.events.schedule(dst, arrival);
    }

    pub(crate) fn send_credit(&mut self, link: LinkId, credit: Credit) {
        let now = self.events.now();
        let arrival = self.credit_links[link].send(now, credit);
        let dst = self.credit_links[link].dst();
        self.events.schedule(dst, arrival);
    }

    /// Record a packet's outstanding destinations, arming the watchdog
    /// if it is not already running.
    pub(crate) fn track_packet(&mut self, id: PacketId, dests: BTreeSet<RouterId>) {
        let now = self.events.now();
        self.multicast.insert(id, now, dests);
        if !self.watchdog_armed {
            self.watchdog_armed = true;
            self.events
                .schedule_in(ComponentId::Watchdog, self.multicast.threshold());
        }
    }

    pub(crate) fn untrack_dest(&mut self, id: PacketId, router: RouterId) {
        self.multicast.remove_dest(id, router);
    }

    fn watchdog_wakeup(&mut self) {
        let now = self.events.now();
        self.multicast.scan(now);
        if self.multicast.is_empty() {
            self.watchdog_armed = false;
        } else {
            self.events
                .schedule_in(ComponentId::Watchdog, self.multicast.threshold());
        }
    }
}

/// The whole simulated interconnect: one router per mesh position, one
/// network interface per node, and the event loop that drives them.
pub struct Network {
    cfg: NetworkConfig,
    routers: Vec<Router>,
    ifaces: Vec<NetworkInterface>,
    shared: Shared,
}

fn component_of(node: TopoNode) -> ComponentId {
    match node {
        TopoNode::Router(r) => ComponentId::Router(r),
        TopoNode::Interface(n) => ComponentId::Interface(n),
    }
}

impl Network {
    pub fn new(cfg: NetworkConfig) -> Result<Self, Error> {
        cfg.validate()?;
        let topo = Topology::mesh(&cfg)?;
        let classifier = PartitionClassifier::new(cfg.rows, cfg.cols)?;
        let graph = topo.graph();

        // one flit link per wiring edge, with a credit link running the
        // opposite way
        let mut flit_links: Vec<Link<Flit>> = Vec::new();
        let mut credit_links: Vec<Link<Credit>> = Vec::new();
        let mut link_of: BTreeMap<petgraph::graph::EdgeIndex, (LinkId, LinkId)> = BTreeMap::new();
        for e in graph.edge_references() {
            let src = component_of(graph[e.source()]);
            let dst = component_of(graph[e.target()]);
            let flit_id = flit_links.len();
            flit_links.push(Link::new(1, dst));
            let credit_id = credit_links.len();
            credit_links.push(Link::new(1, src));
            link_of.insert(e.id(), (flit_id, credit_id));
        }

        let mut routers = Vec::with_capacity(topo.num_routers());
        for r in 0..topo.num_routers() {
            let idx = topo.router_node_index(r);
            let mut inports = Vec::new();
            let mut outports = Vec::new();
            let mut dir_out: BTreeMap<OutDir, usize> = BTreeMap::new();
            let mut local_out: BTreeMap<NodeId, usize> = BTreeMap::new();
            for e in graph.edges_directed(idx, Direction::Outgoing) {
                let (flit_id, credit_id) = link_of[&e.id()];
                let port = outports.len();
                let dir = e.weight().dir.expect("router out-edge without a direction");
                match graph[e.target()] {
                    TopoNode::Interface(n) => {
                        local_out.insert(n, port);
                    }
                    TopoNode::Router(_) => {
                        dir_out.insert(dir, port);
                    }
                }
                outports.push(OutputPort::new(
                    flit_id,
                    credit_id,
                    dir,
                    cfg.total_vcs(),
                    cfg.vc_buffer_depth,
                ));
            }
            for e in graph.edges_directed(idx, Direction::Incoming) {
                let (flit_id, credit_id) = link_of[&e.id()];
                inports.push(InputPort::new(flit_id, credit_id, cfg.total_vcs()));
            }
            routers.push(Router::new(
                r,
                &cfg,
                RoutingUnit::new(classifier),
                inports,
                outports,
                dir_out,
                local_out,
            ));
        }

        let mut ifaces = Vec::with_capacity(topo.num_nodes());
        for n in 0..topo.num_nodes() {
            let idx = topo.iface_node_index(n);
            let out_edge = graph
                .edges_directed(idx, Direction::Outgoing)
                .next()
                .expect("interface without an injection edge");
            let in_edge = graph
                .edges_directed(idx, Direction::Incoming)
                .next()
                .expect("interface without an ejection edge");
            let (out_link, credit_in) = link_of[&out_edge.id()];
            let (in_link, credit_out) = link_of[&in_edge.id()];
            ifaces.push(NetworkInterface::new(
                n,
                topo.router_of(n),
                &cfg,
                out_link,
                in_link,
                credit_out,
                credit_in,
            )?);
        }

        let shared = Shared {
            topo,
            flit_links,
            credit_links,
            events: EventQueue::new(),
            multicast: MulticastTable::new(cfg.multicast_threshold),
            stats: NetworkStats::new(cfg.total_vnets()),
            next_packet_id: 0,
            watchdog_armed: false,
        };
        Ok(Self {
            cfg,
            routers,
            ifaces,
            shared,
        })
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.cfg
    }

    pub fn now(&self) -> Cycle {
        self.shared.events.now()
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.shared.stats
    }

    pub fn topology(&self) -> &Topology {
        &self.shared.topo
    }

    pub fn multicast_status(&self) -> String {
        self.shared.multicast.status()
    }

    /// Packets injected but not yet delivered everywhere.
    pub fn in_flight(&self) -> usize {
        self.shared.multicast.len()
    }

    /// Hand a message to `node`'s interface for injection on a protocol
    /// vnet; the interface picks it up next tick.
    pub fn inject_message(
        &mut self,
        node: NodeId,
        vnet: VnetId,
        msg: Message,
    ) -> Result<(), Error> {
        if node >= self.ifaces.len() {
            return Err(Error::UnknownNode(node));
        }
        if vnet >= self.cfg.vnets {
            return Err(Error::UnknownVnet(vnet));
        }
        if let Some(&bad) = msg.dests.iter().find(|&&d| d >= self.ifaces.len()) {
            return Err(Error::UnknownNode(bad));
        }
        let now = self.shared.events.now();
        self.ifaces[node].inject(vnet, msg, now);
        self.shared
            .events
            .schedule(ComponentId::Interface(node), now + 1);
        Ok(())
    }

    /// Take the oldest delivered message for `(node, vnet)` out of the
    /// protocol buffer, waking the interface if deliveries were stalled
    /// on the freed slot.
    pub fn protocol_dequeue(&mut self, node: NodeId, vnet: VnetId) -> Option<Message> {
        if node >= self.ifaces.len() || vnet >= self.cfg.vnets {
            return None;
        }
        let now = self.shared.events.now();
        let (msg, callback) = self.ifaces[node].dequeue_delivery(vnet, now)?;
        if let Some(target) = callback {
            self.shared.events.schedule(target, now + 1);
        }
        Some(msg)
    }

    /// Process every wakeup up to and including `end`, leaving the clock
    /// at `end`.
    pub fn run_until(&mut self, end: Cycle) {
        let Self {
            routers,
            ifaces,
            shared,
            ..
        } = self;
        while let Some((_, target)) = shared.events.pop_until(end) {
            match target {
                ComponentId::Router(r) => routers[r].wakeup(shared),
                ComponentId::Interface(n) => ifaces[n].wakeup(shared),
                ComponentId::Watchdog => shared.watchdog_wakeup(),
            }
        }
        shared.events.advance_to(end);
    }
}
