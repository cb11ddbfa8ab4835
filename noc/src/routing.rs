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

use crate::flit::RouteDescriptor;
use crate::partition::{Partition, PartitionClassifier, NUM_PARTITIONS};
use crate::RouterId;

/// Candidate output directions of a router.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum OutDir {
    North,
    East,
    South,
    West,
    Local,
}

/// Recursive-partition route computation.
///
/// Given a packet's destination set, classify every destination into its
/// partition relative to the current router, pick the active output
/// directions, and assign each destination to exactly one of them. The
/// result is a partition in the literal sense: disjoint groups covering
/// the whole destination set.
#[derive(Clone, Copy, Debug)]
pub struct RoutingUnit {
    classifier: PartitionClassifier,
}

impl RoutingUnit {
    pub fn new(classifier: PartitionClassifier) -> Self {
        Self { classifier }
    }

    pub fn classifier(&self) -> &PartitionClassifier {
        &self.classifier
    }

    /// Map each destination router to the one active direction that
    /// serves it.
    ///
    /// The precedence rules deciding which directions become active are
    /// a fixed tie-break policy; reordering them can reintroduce routing
    /// loops, so they are kept exactly as given. SE-only traffic rides
    /// East when nothing forces a South hop; NE-only traffic prefers
    /// North unless East is already active for an adjacent case; West
    /// and South hold symmetrically.
    pub fn compute(
        &self,
        router: RouterId,
        route: &RouteDescriptor,
    ) -> BTreeMap<OutDir, BTreeSet<RouterId>> {
        use Partition::*;

        // Step 1: collect the partitions the destinations fall into.
        let mut present = [false; NUM_PARTITIONS];
        for &dest in &route.dest_routers {
            present[self.classifier.classify(router, dest) as usize] = true;
        }
        let has = |p: Partition| present[p as usize];

        // Step 2: fix the active output directions.
        let mut active: BTreeSet<OutDir> = BTreeSet::new();
        if has(East) || (has(SouthEast) && !has(South) && !has(SouthWest)) {
            active.insert(OutDir::East);
        }
        if has(North)
            || (has(NorthEast) && (!has(East) || (!has(SouthWest) && has(SouthEast))))
            || (has(NorthEast) && has(NorthWest))
        {
            active.insert(OutDir::North);
        }
        if has(West) || (has(NorthWest) && !has(North) && !has(NorthEast)) {
            active.insert(OutDir::West);
        }
        if has(South)
            || (has(SouthWest) && (!has(West) || (!has(NorthEast) && has(SouthWest))))
            || (has(SouthWest) && has(SouthEast))
        {
            active.insert(OutDir::South);
        }
        if has(Local) {
            active.insert(OutDir::Local);
        }

        // Step 3: assign every destination to one active direction.
        let mut groups: BTreeMap<OutDir, BTreeSet<RouterId>> = BTreeMap::new();
        for &dest in &route.dest_routers {
            let preference: &[OutDir] = match self.classifier.classify(router, dest) {
                NorthEast => &[OutDir::North, OutDir::East],
                North => &[OutDir::North],
                NorthWest => &[OutDir::North, OutDir::West],
                West => &[OutDir::West],
                SouthWest => &[OutDir::South, OutDir::West],
                South => &[OutDir::South],
                SouthEast => &[OutDir::South, OutDir::East],
                East => &[OutDir::East],
                Local => &[OutDir::Local],
            };
            let dir = preference
                .iter()
                .copied()
                .find(|d| active.contains(d))
                .unwrap_or_else(|| {
                    panic!(
                        "router {}: destination {} not coverable by active directions {:?}",
                        router, dest, active
                    )
                });
            groups.entry(dir).or_default().insert(dest);
        }
        log::trace!("router {} route {:?} -> {:?}", router, route.dest_routers, groups);
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use crate::topology::Topology;
    use rand::seq::IteratorRandom;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256StarStar;
    use std::iter::FromIterator;

    fn unit() -> RoutingUnit {
        RoutingUnit::new(PartitionClassifier::new(4, 4).unwrap())
    }

    fn route(dests: &[RouterId]) -> RouteDescriptor {
        let topo = Topology::mesh(&NetworkConfig::default()).unwrap();
        RouteDescriptor::new(0, 0, 0, BTreeSet::from_iter(dests.iter().copied()), &topo)
    }

    #[test]
    fn se_only_rides_east() {
        // router 5 = (1,1); router 2 = (2,0) is SE with no S/SW present
        let groups = unit().compute(5, &route(&[2]));
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[&OutDir::East], BTreeSet::from_iter(vec![2]));
    }

    #[test]
    fn se_follows_south_when_south_present() {
        // 1 = (1,0) is S; 2 = (2,0) is SE: South becomes active, East
        // does not, and SE joins the South group.
        let groups = unit().compute(5, &route(&[1, 2]));
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[&OutDir::South], BTreeSet::from_iter(vec![1, 2]));
    }

    #[test]
    fn ne_prefers_north_unless_east_serves_it() {
        // 10 = (2,2) is NE of router 5; alone it goes North.
        let groups = unit().compute(5, &route(&[10]));
        assert_eq!(groups[&OutDir::North], BTreeSet::from_iter(vec![10]));

        // with 6 = (2,1) East also present, East is active and NE rides
        // along instead of opening North
        let groups = unit().compute(5, &route(&[10, 6]));
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[&OutDir::East], BTreeSet::from_iter(vec![6, 10]));
    }

    #[test]
    fn ne_and_nw_force_north() {
        // 10 = NE, 8 = NW: both exist, North must open even with East
        let groups = unit().compute(5, &route(&[10, 8, 6]));
        assert!(groups.contains_key(&OutDir::North));
        assert_eq!(groups[&OutDir::East], BTreeSet::from_iter(vec![6]));
        assert_eq!(groups[&OutDir::North], BTreeSet::from_iter(vec![8, 10]));
    }

    #[test]
    fn local_is_its_own_group() {
        let groups = unit().compute(5, &route(&[5, 6]));
        assert_eq!(groups[&OutDir::Local], BTreeSet::from_iter(vec![5]));
        assert_eq!(groups[&OutDir::East], BTreeSet::from_iter(vec![6]));
    }

    #[test]
    fn broadcast_groups_are_disjoint_and_covering() {
        let all = (0..16).collect::<Vec<_>>();
        for router in 0..16 {
            let groups = unit().compute(router, &route(&all));
            let mut seen = BTreeSet::new();
            for dests in groups.values() {
                for &d in dests {
                    assert!(seen.insert(d), "destination {} assigned twice", d);
                }
            }
            assert_eq!(seen, BTreeSet::from_iter(all.iter().copied()));
        }
    }

    #[test]
    fn random_sets_are_disjoint_and_covering() {
        let mut rng = Xoshiro256StarStar::seed_from_u64(0x2b75_61d1);
        for _ in 0..200 {
            let count = (1..=16).choose(&mut rng).unwrap();
            let dests = (0..16).choose_multiple(&mut rng, count);
            let expected = BTreeSet::from_iter(dests.iter().copied());
            for router in 0..16 {
                let groups = unit().compute(router, &route(&dests));
                let mut seen = BTreeSet::new();
                for set in groups.values() {
                    for &d in set {
                        assert!(seen.insert(d));
                    }
                }
                assert_eq!(seen, expected);
            }
        }
    }
}
