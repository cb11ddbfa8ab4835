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
use petgraph::graph::{DiGraph, NodeIndex};

use crate::config::NetworkConfig;
use crate::error::Error;
use crate::routing::OutDir;
use crate::{NodeId, RouterId};

/// A vertex of the wiring graph: a mesh router or a network interface.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum TopoNode {
    Router(RouterId),
    Interface(NodeId),
}

/// A directed port-to-port connection. `dir` is the direction of the
/// edge from the source's point of view (None for interface-to-router
/// injection edges, which routers see as inbound only).
#[derive(Clone, Copy, Debug)]
pub(crate) struct TopoEdge {
    pub dir: Option<OutDir>,
}

/// The physical shape of the network: an R x C mesh of routers, one
/// interface per router, and every directed connection between them.
///
/// Built on a petgraph graph so construction and inspection use plain
/// graph operations; the simulation flattens it into link tables.
#[derive(Debug)]
pub struct Topology {
    rows: usize,
    cols: usize,
    node_to_router: Vec<RouterId>,
    router_nodes: Vec<Vec<NodeId>>,
    graph: DiGraph<TopoNode, TopoEdge>,
    router_index: Vec<NodeIndex>,
    iface_index: Vec<NodeIndex>,
}

impl Topology {
    /// Standard mesh wiring: neighbor links in all four compass
    /// directions where they exist, plus a local link pair between each
    /// router and its interface.
    pub fn mesh(cfg: &NetworkConfig) -> Result<Self, Error> {
        if cfg.rows == 0 || cfg.cols == 0 {
            return Err(Error::InvalidMesh(cfg.rows, cfg.cols));
        }
        let (rows, cols) = (cfg.rows, cfg.cols);
        let num_routers = rows * cols;

        let mut graph = DiGraph::new();
        let router_index = (0..num_routers)
            .map(|r| graph.add_node(TopoNode::Router(r)))
            .collect::<Vec<_>>();
        // one interface per router; node id == router id
        let iface_index = (0..num_routers)
            .map(|n| graph.add_node(TopoNode::Interface(n)))
            .collect::<Vec<_>>();

        for (y, x) in (0..rows).cartesian_product(0..cols) {
            let r = y * cols + x;
            log::trace!("router {} at ({}, {})", r, x, y);
            // north is the next row up (larger y)
            let neighbors = [
                (
                    OutDir::North,
                    if y + 1 < rows { Some((y + 1) * cols + x) } else { None },
                ),
                (
                    OutDir::East,
                    if x + 1 < cols { Some(y * cols + x + 1) } else { None },
                ),
                (OutDir::South, y.checked_sub(1).map(|row| row * cols + x)),
                (OutDir::West, x.checked_sub(1).map(|col| y * cols + col)),
            ];
            for &(dir, neighbor) in neighbors.iter() {
                if let Some(neighbor) = neighbor {
                    graph.add_edge(
                        router_index[r],
                        router_index[neighbor],
                        TopoEdge { dir: Some(dir) },
                    );
                }
            }
            // local ejection and injection connections
            graph.add_edge(
                router_index[r],
                iface_index[r],
                TopoEdge {
                    dir: Some(OutDir::Local),
                },
            );
            graph.add_edge(iface_index[r], router_index[r], TopoEdge { dir: None });
        }

        let node_to_router = (0..num_routers).collect::<Vec<_>>();
        let router_nodes = (0..num_routers).map(|r| vec![r]).collect::<Vec<_>>();

        Ok(Self {
            rows,
            cols,
            node_to_router,
            router_nodes,
            graph,
            router_index,
            iface_index,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn num_routers(&self) -> usize {
        self.router_index.len()
    }

    pub fn num_nodes(&self) -> usize {
        self.node_to_router.len()
    }

    /// The router a node's interface hangs off.
    pub fn router_of(&self, node: NodeId) -> RouterId {
        self.node_to_router[node]
    }

    /// The nodes local to a router.
    pub fn nodes_of(&self, router: RouterId) -> &[NodeId] {
        &self.router_nodes[router]
    }

    pub(crate) fn graph(&self) -> &DiGraph<TopoNode, TopoEdge> {
        &self.graph
    }

    pub(crate) fn router_node_index(&self, router: RouterId) -> NodeIndex {
        self.router_index[router]
    }

    pub(crate) fn iface_node_index(&self, node: NodeId) -> NodeIndex {
        self.iface_index[node]
    }
}
