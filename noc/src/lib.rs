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

//! A flit-level, virtual-channel flow-controlled mesh interconnect
//! simulator with Recursive Partition Multicast (RPM) routing.
//!
//! A protocol-layer message entering a [`Network`] is split into flits at
//! a [`NetworkInterface`], injected into a virtual channel, and routed
//! hop by hop across the mesh. At every router the destination set is
//! partitioned into compass groups; flits are replicated once per
//! divergent output direction, the extra replicas parking in a
//! set-aside buffer until they win their own downstream virtual channel.
//! A network-wide multicast tracking table records outstanding
//! destinations per packet and a watchdog turns a stuck delivery into a
//! fatal diagnostic.

mod config;
mod error;
mod flit;
mod interface;
mod link;
mod message;
mod network;
mod partition;
mod router;
mod routing;
mod setaside;
mod sim;
mod topology;
mod vc;

// Public types
// type to use for simulation ticks
pub type Cycle = usize;
/// network-unique packet identifier
pub type PacketId = u64;
/// protocol-level endpoint (one network interface per node)
pub type NodeId = usize;
/// mesh router identifier, row-major over the mesh
pub type RouterId = usize;
/// port index local to one router or interface
pub type PortId = usize;
/// virtual channel index within the full VC space of a port
pub type VcId = usize;
/// virtual network index
pub type VnetId = usize;
/// index into the network's link tables
pub type LinkId = usize;

pub use crate::config::NetworkConfig;
pub use crate::error::Error;
pub use crate::flit::{flitize, Credit, Flit, FlitKind, RouteDescriptor};
pub use crate::interface::NetworkInterface;
pub use crate::message::{Message, MessageBuffer};
pub use crate::network::{MulticastTable, Network, NetworkStats};
pub use crate::partition::{Partition, PartitionClassifier};
pub use crate::routing::{OutDir, RoutingUnit};
pub use crate::setaside::{Replica, SetAsideBuffer};
pub use crate::sim::{ComponentId, EventQueue};
pub use crate::topology::Topology;
pub use crate::vc::{OutVcState, VcState, VirtualChannel};
