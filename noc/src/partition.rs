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

use std::collections::BTreeSet;

use crate::error::Error;
use crate::RouterId;

/// One of the nine directional classes of a destination relative to a
/// router on the mesh: the eight compass points plus Local.
///
/// The discriminants index the presence array built during route
/// computation.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Partition {
    NorthEast = 0,
    North = 1,
    NorthWest = 2,
    West = 3,
    SouthWest = 4,
    South = 5,
    SouthEast = 6,
    East = 7,
    Local = 8,
}

pub const NUM_PARTITIONS: usize = 9;

/// Maps destination routers to partitions by comparing row and column
/// offsets independently. Routers are numbered row-major: `x = id % cols`,
/// `y = id / cols`, with north meaning larger `y`.
#[derive(Clone, Copy, Debug)]
pub struct PartitionClassifier {
    rows: usize,
    cols: usize,
}

impl PartitionClassifier {
    pub fn new(rows: usize, cols: usize) -> Result<Self, Error> {
        if rows == 0 || cols == 0 {
            return Err(Error::InvalidMesh(rows, cols));
        }
        Ok(Self { rows, cols })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// (x, y) coordinates of a router.
    pub fn coords(&self, router: RouterId) -> (usize, usize) {
        debug_assert!(router < self.rows * self.cols);
        (router % self.cols, router / self.cols)
    }

    /// Exactly one partition per (router, destination) pair; Local iff
    /// the destination is the router itself.
    pub fn classify(&self, router: RouterId, dest: RouterId) -> Partition {
        let (router_x, router_y) = self.coords(router);
        let (dest_x, dest_y) = self.coords(dest);

        if router_y < dest_y {
            if router_x < dest_x {
                Partition::NorthEast
            } else if router_x == dest_x {
                Partition::North
            } else {
                Partition::NorthWest
            }
        } else if router_y == dest_y {
            if router_x < dest_x {
                Partition::East
            } else if router_x > dest_x {
                Partition::West
            } else {
                Partition::Local
            }
        } else {
            if router_x < dest_x {
                Partition::SouthEast
            } else if router_x == dest_x {
                Partition::South
            } else {
                Partition::SouthWest
            }
        }
    }

    /// Whether any destination lies strictly north of the router. Used
    /// by interfaces to split injected multicasts into a north-bound
    /// packet and a non-north packet.
    pub fn is_north(&self, router: RouterId, dests: &BTreeSet<RouterId>) -> bool {
        let (_, router_y) = self.coords(router);
        dests.iter().any(|&d| self.coords(d).1 > router_y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::iter::FromIterator;

    // 4x4 mesh, router ids:
    //   12 13 14 15   (north, y = 3)
    //    8  9 10 11
    //    4  5  6  7
    //    0  1  2  3   (south, y = 0)

    #[test]
    fn all_nine_partitions_on_a_4x4_mesh() {
        let clf = PartitionClassifier::new(4, 4).unwrap();
        let router = 5; // (1, 1)
        assert_eq!(clf.classify(router, 10), Partition::NorthEast);
        assert_eq!(clf.classify(router, 9), Partition::North);
        assert_eq!(clf.classify(router, 8), Partition::NorthWest);
        assert_eq!(clf.classify(router, 4), Partition::West);
        assert_eq!(clf.classify(router, 0), Partition::SouthWest);
        assert_eq!(clf.classify(router, 1), Partition::South);
        assert_eq!(clf.classify(router, 2), Partition::SouthEast);
        assert_eq!(clf.classify(router, 6), Partition::East);
        assert_eq!(clf.classify(router, 5), Partition::Local);
    }

    #[test]
    fn local_iff_same_coordinates() {
        let clf = PartitionClassifier::new(4, 4).unwrap();
        for router in 0..16 {
            for dest in 0..16 {
                let p = clf.classify(router, dest);
                assert_eq!(p == Partition::Local, router == dest);
            }
        }
    }

    #[test]
    fn north_predicate() {
        let clf = PartitionClassifier::new(4, 4).unwrap();
        let dests = BTreeSet::from_iter(vec![1, 2, 6]);
        assert!(!clf.is_north(5, &dests));
        let dests = BTreeSet::from_iter(vec![1, 10]);
        assert!(clf.is_north(5, &dests));
        // the whole top row is north of everything below it
        for router in 0..12 {
            assert!(clf.is_north(router, &BTreeSet::from_iter(vec![12, 13, 14, 15])));
        }
    }

    #[test]
    fn degenerate_mesh_is_rejected() {
        assert_eq!(
            PartitionClassifier::new(0, 4).unwrap_err(),
            Error::InvalidMesh(0, 4)
        );
        assert!(PartitionClassifier::new(4, 0).is_err());
    }
}
