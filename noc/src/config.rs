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

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::Error;
use crate::Cycle;

/// provides the set of parameters to configure a network
///
/// constructed programmatically or read from a config file.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NetworkConfig {
    /// mesh rows
    pub rows: usize,
    /// mesh columns
    pub cols: usize,
    /// protocol-visible virtual networks; the network internally runs
    /// twice as many, the upper half carrying north-bound multicast
    /// packets
    pub vnets: usize,
    /// virtual channels per virtual network
    pub vcs_per_vnet: usize,
    /// flit slots (credits) per virtual channel buffer
    pub vc_buffer_depth: usize,
    /// link bit width; a message of S bits becomes ceil(S / width) flits
    pub link_width_bits: usize,
    /// router pipeline depth; a flit waits pipe_stages - 1 ticks in the
    /// input buffer before it may go for switch allocation
    pub pipe_stages: Cycle,
    /// capacity of the protocol-layer ejection buffers, in messages
    pub protocol_buffer_slots: usize,
    /// consecutive failed VC allocations for one vnet before the
    /// interface declares a deadlock
    pub deadlock_threshold: usize,
    /// ticks a multicast packet may stay outstanding before the
    /// watchdog declares a liveness failure
    pub multicast_threshold: Cycle,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            rows: 4,
            cols: 4,
            vnets: 2,
            vcs_per_vnet: 4,
            vc_buffer_depth: 4,
            link_width_bits: 128,
            pipe_stages: 1,
            protocol_buffer_slots: 4,
            deadlock_threshold: 50_000,
            multicast_threshold: 5_000_000,
        }
    }
}

impl NetworkConfig {
    /// Total virtual networks actually run by the network, including the
    /// north-bound classes.
    pub fn total_vnets(&self) -> usize {
        self.vnets * 2
    }

    /// VC count of every port, over all (doubled) virtual networks.
    pub fn total_vcs(&self) -> usize {
        self.total_vnets() * self.vcs_per_vnet
    }

    pub fn num_routers(&self) -> usize {
        self.rows * self.cols
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.rows == 0 || self.cols == 0 {
            return Err(Error::InvalidMesh(self.rows, self.cols));
        }
        if self.vnets == 0 {
            return Err(Error::InvalidConfig("vnets must be positive"));
        }
        if self.vcs_per_vnet == 0 {
            return Err(Error::InvalidConfig("vcs_per_vnet must be positive"));
        }
        if self.vc_buffer_depth == 0 {
            return Err(Error::InvalidConfig("vc_buffer_depth must be positive"));
        }
        if self.link_width_bits == 0 {
            return Err(Error::InvalidConfig("link_width_bits must be positive"));
        }
        if self.pipe_stages == 0 {
            return Err(Error::InvalidConfig("pipe_stages must be at least 1"));
        }
        if self.protocol_buffer_slots == 0 {
            return Err(Error::InvalidConfig(
                "protocol_buffer_slots must be positive",
            ));
        }
        Ok(())
    }

    pub fn from_file(file_name: &str) -> anyhow::Result<Self> {
        let file = File::open(Path::new(file_name))
            .with_context(|| format!("config file {} not found", file_name))?;
        let reader = BufReader::new(file);
        let config: Self = serde_yaml::from_reader(reader)
            .with_context(|| format!("failed to parse config {}", file_name))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_str(config: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(config).context("failed to parse config")?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_yaml_config() {
        let conf_str = "---
rows: 8
cols: 8
vnets: 3
vcs_per_vnet: 2
vc_buffer_depth: 4
link_width_bits: 64
pipe_stages: 2
protocol_buffer_slots: 8
deadlock_threshold: 1000
multicast_threshold: 20000
";
        let config = NetworkConfig::from_str(&conf_str).unwrap();
        assert_eq!(config.rows, 8);
        assert_eq!(config.cols, 8);
        assert_eq!(config.vnets, 3);
        assert_eq!(config.total_vnets(), 6);
        assert_eq!(config.vcs_per_vnet, 2);
        assert_eq!(config.total_vcs(), 12);
        assert_eq!(config.link_width_bits, 64);
        assert_eq!(config.pipe_stages, 2);
        assert_eq!(config.protocol_buffer_slots, 8);
        assert_eq!(config.deadlock_threshold, 1000);
        assert_eq!(config.multicast_threshold, 20000);
    }

    #[test]
    fn write_yaml_config() {
        let config = NetworkConfig::default();
        let text = serde_yaml::to_string(&config).unwrap();
        let parsed = NetworkConfig::from_str(&text).unwrap();
        assert_eq!(parsed.rows, config.rows);
        assert_eq!(parsed.multicast_threshold, config.multicast_threshold);
    }

    #[test]
    fn reject_degenerate_mesh() {
        let mut config = NetworkConfig::default();
        config.rows = 0;
        assert_eq!(config.validate(), Err(Error::InvalidMesh(0, 4)));
        let mut config = NetworkConfig::default();
        config.vcs_per_vnet = 0;
        assert!(config.validate().is_err());
    }
}
