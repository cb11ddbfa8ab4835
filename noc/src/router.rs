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

use std::collections::{BTreeMap, BTreeSet};

use crate::config::NetworkConfig;
use crate::flit::{Credit, Flit};
use crate::network::Shared;
use crate::routing::{OutDir, RoutingUnit};
use crate::setaside::{Replica, SetAsideBuffer};
use crate::sim::ComponentId;
use crate::topology::Topology;
use crate::vc::{OutVcState, VirtualChannel};
use crate::{Cycle, LinkId, NodeId, PortId, RouterId, VcId, VnetId};

/// Inbound side of one router port: the flit link it drains, the credit
/// link it replies on, and one virtual channel per (vnet, vc) lane.
#[derive(Debug)]
pub(crate) struct InputPort {
    link: LinkId,
    credit_link: LinkId,
    vcs: Vec<VirtualChannel>,
}

impl InputPort {
    pub(crate) fn new(link: LinkId, credit_link: LinkId, total_vcs: usize) -> Self {
        Self {
            link,
            credit_link,
            vcs: (0..total_vcs).map(|_| VirtualChannel::new()).collect(),
        }
    }
}

/// Outbound side of one router port; `vcs` mirrors the downstream input
/// buffers as credit counters.
#[derive(Debug)]
pub(crate) struct OutputPort {
    link: LinkId,
    credit_link: LinkId,
    dir: OutDir,
    vcs: Vec<OutVcState>,
}

impl OutputPort {
    pub(crate) fn new(
        link: LinkId,
        credit_link: LinkId,
        dir: OutDir,
        total_vcs: usize,
        depth: usize,
    ) -> Self {
        Self {
            link,
            credit_link,
            dir,
            vcs: (0..total_vcs).map(|_| OutVcState::new(depth)).collect(),
        }
    }
}

/// One mesh router: input ports with VC buffers, a set-aside buffer for
/// multicast replicas, and the switch that moves at most one flit per
/// output port per tick.
///
/// A flit arrival runs route computation immediately: the destination
/// set is split into per-direction groups, one replica per group. The
/// first group's replica is the primary and continues through this input
/// port's VC; the rest park in the set-aside buffer and negotiate their
/// own downstream VCs later.
#[derive(Debug)]
pub(crate) struct Router {
    id: RouterId,
    vcs_per_vnet: usize,
    pipe_stages: Cycle,
    routing: RoutingUnit,
    inports: Vec<InputPort>,
    outports: Vec<OutputPort>,
    /// mesh direction -> output port
    dir_out: BTreeMap<OutDir, PortId>,
    /// local consumer node -> ejection output port
    local_out: BTreeMap<NodeId, PortId>,
    /// one replica slot per physical inport, preserving provenance
    setaside: Vec<SetAsideBuffer>,
    rr_vc: Vec<usize>,
    rr_outvc: Vec<usize>,
}

impl Router {
    pub(crate) fn new(
        id: RouterId,
        cfg: &NetworkConfig,
        routing: RoutingUnit,
        inports: Vec<InputPort>,
        outports: Vec<OutputPort>,
        dir_out: BTreeMap<OutDir, PortId>,
        local_out: BTreeMap<NodeId, PortId>,
    ) -> Self {
        let rr_vc = vec![0; inports.len()];
        let rr_outvc = vec![0; outports.len()];
        let setaside = (0..inports.len()).map(|_| SetAsideBuffer::new()).collect();
        Self {
            id,
            vcs_per_vnet: cfg.vcs_per_vnet,
            pipe_stages: cfg.pipe_stages,
            routing,
            inports,
            outports,
            dir_out,
            local_out,
            setaside,
            rr_vc,
            rr_outvc,
        }
    }

    pub(crate) fn wakeup(&mut self, shared: &mut Shared) {
        self.consume_credits(shared);
        self.consume_inputs(shared);
        self.allocate_switch(shared);
        self.check_reschedule(shared);
    }

    fn consume_credits(&mut self, shared: &mut Shared) {
        let now = shared.events.now();
        for port in self.outports.iter_mut() {
            while shared.credit_links[port.credit_link].is_ready(now) {
                let credit = shared.credit_links[port.credit_link].consume();
                port.vcs[credit.vc].increment_credit();
                if credit.free {
                    port.vcs[credit.vc].set_idle();
                }
            }
        }
    }

    fn consume_inputs(&mut self, shared: &mut Shared) {
        let now = shared.events.now();
        for inport in 0..self.inports.len() {
            while shared.flit_links[self.inports[inport].link].is_ready(now) {
                let flit = shared.flit_links[self.inports[inport].link].consume();
                self.receive_flit(inport, flit, shared);
            }
        }
    }

    /// Route, replicate, and buffer one arriving flit. The primary
    /// replica takes the arrival's VC; any others go to the set-aside
    /// buffer tagged with their provenance.
    pub(crate) fn receive_flit(&mut self, inport: PortId, mut flit: Flit, shared: &mut Shared) {
        let now = shared.events.now();
        flit.hops += 1;
        flit.cur_router = Some(self.id);
        flit.ready_time = now + self.pipe_stages - 1;
        // a buffered arrival is written once and read once, no matter how
        // many replicas fan out of it
        shared.stats.buffer_writes[flit.vnet] += 1;
        shared.stats.buffer_reads[flit.vnet] += 1;
        log::debug!("router {} received {}", self.id, flit);

        let mut replicas = self.compute_replicas(&flit, &shared.topo);
        assert!(!replicas.is_empty());
        let (primary_port, primary) = replicas.remove(0);
        let vc = primary.vc;
        if primary.is_head() {
            self.inports[inport].vcs[vc].set_active(now);
            self.inports[inport].vcs[vc].grant_outport(primary_port);
        } else {
            // the route is identical for all flits of one packet, so the
            // primary group always matches the port granted at the head
            debug_assert_eq!(self.inports[inport].vcs[vc].outport(), Some(primary_port));
        }
        self.inports[inport].vcs[vc].insert_flit(primary);

        self.setaside[inport].insert_replicas(
            replicas
                .into_iter()
                .map(|(outport, flit)| Replica {
                    inport,
                    outport,
                    flit,
                })
                .collect(),
        );
    }

    /// One pruned clone of `flit` per output port its destinations fan
    /// out to. Local destinations are resolved node by node since several
    /// local consumers may hang off one router.
    pub(crate) fn compute_replicas(&self, flit: &Flit, topo: &Topology) -> Vec<(PortId, Flit)> {
        let groups = self.routing.compute(self.id, &flit.route);
        let mut replicas = Vec::new();
        for (dir, routers) in &groups {
            if *dir == OutDir::Local {
                let mut by_port: BTreeMap<PortId, BTreeSet<NodeId>> = BTreeMap::new();
                for &node in &flit.route.dest_nodes {
                    if topo.router_of(node) == self.id {
                        by_port.entry(self.local_out[&node]).or_default().insert(node);
                    }
                }
                for (port, nodes) in by_port {
                    let mut f = flit.clone();
                    f.route.retain_nodes(&nodes, topo);
                    replicas.push((port, f));
                }
            } else {
                replicas.push((self.dir_out[dir], flit.replicate(routers, topo)));
            }
        }
        replicas
    }

    fn allocate_switch(&mut self, shared: &mut Shared) {
        let mut used: BTreeSet<PortId> = BTreeSet::new();
        for inport in 0..self.inports.len() {
            self.send_from_inport(inport, &mut used, shared);
        }
        for slot in 0..self.setaside.len() {
            self.drain_setaside(slot, &mut used, shared);
        }
    }

    /// At most one flit leaves each input port per tick, round-robin
    /// over its VCs.
    fn send_from_inport(&mut self, inport: PortId, used: &mut BTreeSet<PortId>, shared: &mut Shared) {
        let now = shared.events.now();
        let total = self.inports[inport].vcs.len();
        for k in 0..total {
            let vc = (self.rr_vc[inport] + k) % total;
            if self.inports[inport].vcs[vc].is_idle() {
                continue;
            }
            let (ready, vnet) = match self.inports[inport].vcs[vc].peek() {
                Some(f) => (f.ready_time <= now, f.vnet),
                None => continue,
            };
            if !ready {
                continue;
            }
            let port = self.inports[inport].vcs[vc]
                .outport()
                .expect("active VC without an output port");
            if used.contains(&port) {
                continue;
            }
            let outvc = match self.inports[inport].vcs[vc].outvc() {
                Some(o) => o,
                None => match self.select_outvc(port, vnet) {
                    Some(o) => {
                        self.inports[inport].vcs[vc].grant_outvc(o);
                        o
                    }
                    None => continue,
                },
            };
            if !self.outports[port].vcs[outvc].has_credit() {
                continue;
            }

            let mut flit = self.inports[inport].vcs[vc].pop();
            let tail = flit.is_tail();
            flit.vc = outvc;
            self.outports[port].vcs[outvc].decrement_credit();
            log::trace!(
                "router {} forwarding {} via {:?}",
                self.id,
                flit,
                self.outports[port].dir
            );
            shared.send_flit(self.outports[port].link, flit);
            // the arrival's buffer slot frees with the primary replica
            shared.send_credit(
                self.inports[inport].credit_link,
                Credit { vc, free: tail },
            );
            if tail {
                self.inports[inport].vcs[vc].set_idle();
            }
            used.insert(port);
            self.rr_vc[inport] = (vc + 1) % total;
            return;
        }
    }

    /// Pop one slot's replicas in FIFO order as long as the front one can
    /// move. Replicas return no upstream credit; the primary already did.
    fn drain_setaside(&mut self, slot: usize, used: &mut BTreeSet<PortId>, shared: &mut Shared) {
        let now = shared.events.now();
        loop {
            let (port, ready, vnet) = match self.setaside[slot].front() {
                Some(r) => (r.outport, r.flit.ready_time <= now, r.flit.vnet),
                None => return,
            };
            if !ready || used.contains(&port) {
                return;
            }
            let outvc = match self.setaside[slot].get_outvc() {
                Some(o) => o,
                None => match self.select_outvc(port, vnet) {
                    Some(o) => {
                        self.setaside[slot].grant_outvc(o);
                        o
                    }
                    None => return,
                },
            };
            if !self.outports[port].vcs[outvc].has_credit() {
                return;
            }

            let replica = self.setaside[slot].pop();
            let mut flit = replica.flit;
            flit.vc = outvc;
            self.outports[port].vcs[outvc].decrement_credit();
            log::trace!(
                "router {} forwarding replica {} via {:?}",
                self.id,
                flit,
                self.outports[port].dir
            );
            shared.send_flit(self.outports[port].link, flit);
            used.insert(port);
        }
    }

    /// Round-robin over the idle outbound VCs of `vnet` on `port`.
    fn select_outvc(&mut self, port: PortId, vnet: VnetId) -> Option<VcId> {
        let base = vnet * self.vcs_per_vnet;
        for k in 0..self.vcs_per_vnet {
            let idx = (self.rr_outvc[port] + k) % self.vcs_per_vnet;
            let outvc = base + idx;
            if self.outports[port].vcs[outvc].is_idle() {
                self.outports[port].vcs[outvc].set_active();
                self.rr_outvc[port] = (idx + 1) % self.vcs_per_vnet;
                return Some(outvc);
            }
        }
        None
    }

    fn check_reschedule(&self, shared: &mut Shared) {
        let pending = self.setaside.iter().any(|s| !s.is_empty())
            || self
                .inports
                .iter()
                .any(|ip| ip.vcs.iter().any(|vc| !vc.is_empty()));
        if pending {
            shared.events.schedule_in(ComponentId::Router(self.id), 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flit::{flitize, RouteDescriptor};
    use crate::link::Link;
    use crate::message::Message;
    use crate::partition::PartitionClassifier;
    use std::iter::FromIterator;
    use std::rc::Rc;

    // port layout used by the tests: 0..4 mesh outports, 4 local
    fn test_router(id: RouterId) -> Router {
        let cfg = NetworkConfig::default();
        let routing = RoutingUnit::new(PartitionClassifier::new(4, 4).unwrap());
        let dirs = [
            OutDir::North,
            OutDir::East,
            OutDir::South,
            OutDir::West,
            OutDir::Local,
        ];
        let outports = dirs
            .iter()
            .map(|&d| OutputPort::new(0, 0, d, cfg.total_vcs(), cfg.vc_buffer_depth))
            .collect();
        let inports = (0..5)
            .map(|_| InputPort::new(0, 0, cfg.total_vcs()))
            .collect();
        let dir_out = dirs[..4].iter().enumerate().map(|(p, &d)| (d, p)).collect();
        let local_out = vec![(id, 4)].into_iter().collect();
        Router::new(id, &cfg, routing, inports, outports, dir_out, local_out)
    }

    fn flit_to(dests: &[NodeId], topo: &Topology, vc: VcId) -> Flit {
        let msg = Message::zeroed(64, BTreeSet::from_iter(dests.iter().copied()));
        let route = RouteDescriptor::new(0, 0, 0, msg.dests.clone(), topo);
        flitize(1, vc, 0, route, &msg, 128, 0).remove(0)
    }

    #[test]
    fn replication_splits_north_and_east() {
        let router = test_router(5);
        let topo = Topology::mesh(&NetworkConfig::default()).unwrap();
        // 9 and 13 are north of router 5, 6 is east
        let flit = flit_to(&[9, 13, 6], &topo, 0);
        let replicas = router.compute_replicas(&flit, &topo);
        assert_eq!(replicas.len(), 2);

        let (north_port, north) = &replicas[0];
        assert_eq!(*north_port, 0);
        assert_eq!(north.route.dest_routers, BTreeSet::from_iter(vec![9, 13]));
        let (east_port, east) = &replicas[1];
        assert_eq!(*east_port, 1);
        assert_eq!(east.route.dest_routers, BTreeSet::from_iter(vec![6]));
        // clones share the payload with the arrival
        assert!(Rc::ptr_eq(&north.payload, &flit.payload));
        assert!(Rc::ptr_eq(&east.payload, &flit.payload));
    }

    #[test]
    fn local_destination_resolves_to_ejection_port() {
        let router = test_router(5);
        let topo = Topology::mesh(&NetworkConfig::default()).unwrap();
        let flit = flit_to(&[5, 6], &topo, 0);
        let replicas = router.compute_replicas(&flit, &topo);
        assert_eq!(replicas.len(), 2);
        assert_eq!(replicas[0].0, 1); // east primary
        assert_eq!(replicas[1].0, 4); // local ejection port
        assert_eq!(
            replicas[1].1.route.dest_nodes,
            BTreeSet::from_iter(vec![5])
        );
    }

    #[test]
    fn arrival_parks_extra_replicas_in_the_setaside() {
        let mut router = test_router(5);
        let mut shared = Shared::new(&NetworkConfig::default()).unwrap();
        let topo = Topology::mesh(&NetworkConfig::default()).unwrap();
        let flit = flit_to(&[9, 13, 6], &topo, 2);
        router.receive_flit(0, flit, &mut shared);
        // primary (north) occupies the arrival VC, the east replica parks
        // in the arrival inport's slot
        assert!(!router.inports[0].vcs[2].is_idle());
        assert_eq!(router.inports[0].vcs[2].outport(), Some(0));
        assert_eq!(router.setaside[0].len(), 1);
        assert_eq!(router.setaside[0].front().unwrap().outport, 1);
        assert!(router.setaside[1..].iter().all(|s| s.is_empty()));
        assert_eq!(shared.stats.buffer_writes[0], 1);
    }

    #[test]
    fn buffer_stats_count_arrivals_not_replicas() {
        let mut router = test_router(5);
        let mut shared = Shared::new(&NetworkConfig::default()).unwrap();
        shared.flit_links.push(Link::new(1, ComponentId::Router(0)));
        shared.credit_links.push(Link::new(1, ComponentId::Router(0)));
        // one arrival fanning out north and east
        let flit = flit_to(&[9, 6], &shared.topo, 0);
        router.receive_flit(0, flit, &mut shared);
        assert_eq!(shared.stats.buffer_writes[0], 1);
        assert_eq!(shared.stats.buffer_reads[0], 1);

        // forwarding the primary and the replica adds no further reads
        router.allocate_switch(&mut shared);
        assert!(router.setaside[0].is_empty());
        assert!(router.inports[0].vcs[0].is_empty());
        assert_eq!(shared.stats.buffer_reads[0], 1);
    }

    #[test]
    #[should_panic(expected = "head flit admitted into an active virtual channel")]
    fn second_head_into_busy_vc_is_fatal() {
        let mut router = test_router(5);
        let mut shared = Shared::new(&NetworkConfig::default()).unwrap();
        let topo = Topology::mesh(&NetworkConfig::default()).unwrap();
        router.receive_flit(0, flit_to(&[6], &topo, 0), &mut shared);
        router.receive_flit(0, flit_to(&[7], &topo, 0), &mut shared);
    }

    #[test]
    fn outvc_round_robin_skips_busy_lanes() {
        let mut router = test_router(5);
        let first = router.select_outvc(1, 0).unwrap();
        let second = router.select_outvc(1, 0).unwrap();
        assert_ne!(first, second);
        // vnet 1 allocates from its own range
        let other = router.select_outvc(1, 1).unwrap();
        assert!(other >= 4 && other < 8);
        // exhausting a vnet's lanes yields None
        router.select_outvc(1, 0).unwrap();
        router.select_outvc(1, 0).unwrap();
        assert_eq!(router.select_outvc(1, 0), None);
    }
}
