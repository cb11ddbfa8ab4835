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

use std::fmt;

use crate::{NodeId, VnetId};

/// Construction and configuration failures.
///
/// Backpressure (no credit, no free VC, full buffer) is never an error;
/// it is "try again next tick". Broken routing or flow-control invariants
/// at simulation time are fatal and panic with a diagnostic instead.
#[derive(Debug, Eq, PartialEq)]
pub enum Error {
    InvalidMesh(usize, usize),
    InvalidConfig(&'static str),
    UnknownNode(NodeId),
    UnknownVnet(VnetId),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InvalidMesh(rows, cols) => {
                write!(f, "ERROR: Invalid mesh dimensions {}x{}", rows, cols)
            }
            Self::InvalidConfig(what) => {
                write!(f, "ERROR: Invalid configuration: {}", what)
            }
            Self::UnknownNode(n) => write!(f, "ERROR: Unknown node {}", n),
            Self::UnknownVnet(v) => write!(f, "ERROR: Unknown virtual network {}", v),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}
