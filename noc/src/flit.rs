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
use itertools::Itertools;
use num::Integer;
use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

use crate::message::Message;
use crate::topology::Topology;
use crate::{Cycle, NodeId, PacketId, RouterId, VcId, VnetId};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FlitKind {
    Head,
    Body,
    Tail,
    /// single-flit packet
    HeadTail,
}

impl FlitKind {
    pub fn is_head(self) -> bool {
        matches!(self, FlitKind::Head | FlitKind::HeadTail)
    }

    pub fn is_tail(self) -> bool {
        matches!(self, FlitKind::Tail | FlitKind::HeadTail)
    }

    /// Kind of flit `seq` in a packet of `num_flits`.
    pub fn for_position(seq: usize, num_flits: usize) -> Self {
        assert!(num_flits > 0 && seq < num_flits);
        if num_flits == 1 {
            FlitKind::HeadTail
        } else if seq == 0 {
            FlitKind::Head
        } else if seq == num_flits - 1 {
            FlitKind::Tail
        } else {
            FlitKind::Body
        }
    }
}

/// Immutable-per-packet addressing record carried by every flit.
///
/// `dest_routers` is always the router-level projection of `dest_nodes`
/// and stays non-empty for as long as the flit exists; pruning one prunes
/// the other.
#[derive(Clone, Debug)]
pub struct RouteDescriptor {
    /// the protocol vnet this packet belongs to (north-bound packets keep
    /// the protocol vnet here; the flit carries the doubled class)
    pub vnet: VnetId,
    pub src_node: NodeId,
    pub src_router: RouterId,
    pub dest_nodes: BTreeSet<NodeId>,
    pub dest_routers: BTreeSet<RouterId>,
}

impl RouteDescriptor {
    pub fn new(
        vnet: VnetId,
        src_node: NodeId,
        src_router: RouterId,
        dest_nodes: BTreeSet<NodeId>,
        topo: &Topology,
    ) -> Self {
        assert!(!dest_nodes.is_empty());
        let dest_routers = dest_nodes.iter().map(|&n| topo.router_of(n)).collect();
        Self {
            vnet,
            src_node,
            src_router,
            dest_nodes,
            dest_routers,
        }
    }

    /// Narrow the destination set to the routers in `keep`, keeping the
    /// node and router projections consistent.
    pub fn retain_routers(&mut self, keep: &BTreeSet<RouterId>, topo: &Topology) {
        self.dest_nodes.retain(|&n| keep.contains(&topo.router_of(n)));
        self.dest_routers.retain(|r| keep.contains(r));
        assert!(
            !self.dest_routers.is_empty(),
            "route pruned to an empty destination set"
        );
        debug_assert_eq!(
            self.dest_routers,
            self.dest_nodes
                .iter()
                .map(|&n| topo.router_of(n))
                .collect::<BTreeSet<_>>()
        );
    }

    /// Node-level variant of [`retain_routers`](Self::retain_routers),
    /// for local fan-out where several nodes share one router.
    pub fn retain_nodes(&mut self, keep: &BTreeSet<NodeId>, topo: &Topology) {
        self.dest_nodes.retain(|n| keep.contains(n));
        self.dest_routers = self.dest_nodes.iter().map(|&n| topo.router_of(n)).collect();
        assert!(
            !self.dest_routers.is_empty(),
            "route pruned to an empty destination set"
        );
    }
}

/// Atomic unit of flow-controlled transfer: a slice of a message plus
/// routing metadata.
#[derive(Clone, Debug)]
pub struct Flit {
    pub packet_id: PacketId,
    /// position within the packet
    pub seq: usize,
    pub kind: FlitKind,
    pub vc: VcId,
    /// the (doubled) virtual network class the flit travels in
    pub vnet: VnetId,
    pub route: RouteDescriptor,
    pub num_flits: usize,
    pub payload: Rc<BitBox>,
    pub width: usize,
    pub hops: u32,
    pub cur_router: Option<RouterId>,
    /// injection tick at the source interface
    pub enqueue_time: Cycle,
    /// earliest tick this flit may go for switch allocation
    pub ready_time: Cycle,
}

impl Flit {
    pub fn is_head(&self) -> bool {
        self.kind.is_head()
    }

    pub fn is_tail(&self) -> bool {
        self.kind.is_tail()
    }

    /// Clone the flit for one divergent path, narrowing the route to the
    /// destinations reachable that way. The payload is shared, not
    /// copied.
    pub fn replicate(&self, keep: &BTreeSet<RouterId>, topo: &Topology) -> Flit {
        let mut f = self.clone();
        f.route.retain_routers(keep, topo);
        f
    }
}

impl fmt::Display for Flit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "[flit:: PacketId={} Id={} Type={:?} Size={} Vnet={} VC={} \
             Src={}@{} Dest Nodes={} Dest Routers={} Width={} Cur Router={:?}]",
            self.packet_id,
            self.seq,
            self.kind,
            self.num_flits,
            self.vnet,
            self.vc,
            self.route.src_node,
            self.route.src_router,
            self.route.dest_nodes.iter().format(" "),
            self.route.dest_routers.iter().format(" "),
            self.width,
            self.cur_router,
        )
    }
}

/// Credit returned upstream for a freed buffer slot. `free` marks the
/// departure of a packet's last flit, returning the VC to idle.
#[derive(Clone, Copy, Debug)]
pub struct Credit {
    pub vc: VcId,
    pub free: bool,
}

/// Split a message into `ceil(size / width)` flits sharing its payload.
pub fn flitize(
    packet_id: PacketId,
    vc: VcId,
    vnet: VnetId,
    route: RouteDescriptor,
    msg: &Message,
    width: usize,
    now: Cycle,
) -> Vec<Flit> {
    assert!(width > 0);
    let num_flits = Integer::div_ceil(&msg.size_bits(), &width).max(1);
    (0..num_flits)
        .map(|seq| Flit {
            packet_id,
            seq,
            kind: FlitKind::for_position(seq, num_flits),
            vc,
            vnet,
            route: route.clone(),
            num_flits,
            payload: Rc::clone(&msg.payload),
            width,
            hops: 0,
            cur_router: None,
            enqueue_time: now,
            ready_time: now,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use std::iter::FromIterator;

    fn topo_4x4() -> Topology {
        Topology::mesh(&NetworkConfig::default()).unwrap()
    }

    fn route_to(dests: &[NodeId], topo: &Topology) -> RouteDescriptor {
        RouteDescriptor::new(0, 0, 0, BTreeSet::from_iter(dests.iter().copied()), topo)
    }

    #[test]
    fn flitize_counts_and_kinds() {
        let topo = topo_4x4();
        let msg = Message::zeroed(300, BTreeSet::from_iter(vec![6]));
        let flits = flitize(1, 0, 0, route_to(&[6], &topo), &msg, 128, 7);
        assert_eq!(flits.len(), 3);
        assert_eq!(flits[0].kind, FlitKind::Head);
        assert_eq!(flits[1].kind, FlitKind::Body);
        assert_eq!(flits[2].kind, FlitKind::Tail);
        assert!(flits.iter().all(|f| f.enqueue_time == 7));
        assert!(flits.iter().all(|f| Rc::ptr_eq(&f.payload, &msg.payload)));

        let small = Message::zeroed(64, BTreeSet::from_iter(vec![6]));
        let flits = flitize(2, 0, 0, route_to(&[6], &topo), &small, 128, 0);
        assert_eq!(flits.len(), 1);
        assert_eq!(flits[0].kind, FlitKind::HeadTail);
    }

    #[test]
    fn replicate_prunes_but_shares_payload() {
        let topo = topo_4x4();
        let msg = Message::zeroed(64, BTreeSet::from_iter(vec![2, 9, 10]));
        let flits = flitize(3, 0, 0, route_to(&[2, 9, 10], &topo), &msg, 128, 0);
        let original = &flits[0];

        let keep = BTreeSet::from_iter(vec![9, 10]);
        let replica = original.replicate(&keep, &topo);
        assert_eq!(replica.route.dest_routers, keep);
        assert_eq!(
            replica.route.dest_nodes,
            BTreeSet::from_iter(vec![9, 10])
        );
        assert!(Rc::ptr_eq(&replica.payload, &original.payload));
        assert_eq!(replica.kind, original.kind);
        assert_eq!(replica.packet_id, original.packet_id);
        // the original is untouched
        assert_eq!(original.route.dest_routers.len(), 3);
    }

    #[test]
    #[should_panic(expected = "empty destination set")]
    fn pruning_to_nothing_is_fatal() {
        let topo = topo_4x4();
        let mut route = route_to(&[2, 9], &topo);
        route.retain_routers(&BTreeSet::new(), &topo);
    }
}
