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

//! Multicast soak tests: an all-to-all broadcast storm and a seeded
//! random multicast mix, both checked for exactly-once delivery.

use noc::{Cycle, Message, Network, NetworkConfig, NodeId, VnetId};
use rand::seq::IteratorRandom;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;
use std::collections::{BTreeMap, BTreeSet};

/// Run the network in short slices, draining every protocol buffer
/// between slices so ejection never backs up for lack of a consumer.
fn run_and_drain(
    net: &mut Network,
    ticks: Cycle,
    delivered: &mut BTreeMap<(NodeId, VnetId), usize>,
) {
    let drain = |net: &mut Network, delivered: &mut BTreeMap<(NodeId, VnetId), usize>| {
        for node in 0..net.topology().num_nodes() {
            for vnet in 0..net.config().vnets {
                while let Some(msg) = net.protocol_dequeue(node, vnet) {
                    assert!(msg.dests.contains(&node));
                    *delivered.entry((node, vnet)).or_insert(0) += 1;
                }
            }
        }
    };
    let slices = ticks / 50;
    for _ in 0..slices {
        let t = net.now() + 50;
        net.run_until(t);
        drain(net, delivered);
        if net.in_flight() == 0 {
            break;
        }
    }
    // deliveries from the last slice become dequeueable a tick later
    net.run_until(net.now() + 2);
    drain(net, delivered);
}

/// Every node broadcasts to the whole mesh at once.
fn broadcast_storm() -> anyhow::Result<()> {
    let cfg = NetworkConfig::default();
    let nodes = cfg.num_routers();
    let mut net = Network::new(cfg)?;
    let all: BTreeSet<NodeId> = (0..nodes).collect();
    for node in 0..nodes {
        net.inject_message(node, 0, Message::zeroed(300, all.clone()))?;
    }

    let mut delivered = BTreeMap::new();
    run_and_drain(&mut net, 20_000, &mut delivered);
    assert_eq!(
        net.in_flight(),
        0,
        "undelivered packets remain\n{}",
        net.multicast_status()
    );
    // every node hears every sender exactly once
    for node in 0..nodes {
        assert_eq!(delivered[&(node, 0)], nodes);
    }
    assert_eq!(net.stats().total_ejected_packets() as usize, nodes * nodes);
    log::info!(
        "broadcast storm done at tick {} ({} deliveries)",
        net.now(),
        nodes * nodes
    );
    Ok(())
}

/// A seeded mix of random multicasts across meshes, vnets, and sizes.
fn random_multicasts(rows: usize, cols: usize, messages: usize) -> anyhow::Result<()> {
    let mut cfg = NetworkConfig::default();
    cfg.rows = rows;
    cfg.cols = cols;
    let nodes = cfg.num_routers();
    let vnets = cfg.vnets;
    let mut net = Network::new(cfg)?;

    let mut rng = Xoshiro256StarStar::seed_from_u64(0x5eed_cafe);
    let mut expected: BTreeMap<(NodeId, VnetId), usize> = BTreeMap::new();
    for _ in 0..messages {
        let src = rng.gen_range(0..nodes);
        let vnet = rng.gen_range(0..vnets);
        let fanout = rng.gen_range(1..=nodes);
        let dests: BTreeSet<NodeId> =
            (0..nodes).choose_multiple(&mut rng, fanout).into_iter().collect();
        let size = rng.gen_range(1..=4) * 100;
        for &d in &dests {
            *expected.entry((d, vnet)).or_insert(0) += 1;
        }
        net.inject_message(src, vnet, Message::zeroed(size, dests))?;
    }

    let mut delivered = BTreeMap::new();
    run_and_drain(&mut net, 200_000, &mut delivered);
    assert_eq!(
        net.in_flight(),
        0,
        "undelivered packets remain\n{}",
        net.multicast_status()
    );
    assert_eq!(delivered, expected);
    log::info!(
        "{}x{} random mix done at tick {} ({} messages, {} deliveries)",
        rows,
        cols,
        net.now(),
        messages,
        delivered.values().sum::<usize>()
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    log::info!("broadcast storm");
    broadcast_storm()?;
    log::info!("random multicast mix");
    random_multicasts(4, 4, 200)?;
    random_multicasts(8, 8, 400)?;
    Ok(())
}
