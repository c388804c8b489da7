// Copyright 2024-2025 Golem Cloud
//
// Licensed under the Golem Source License v1.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://license.golem.cloud/LICENSE
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings of the message endpoint, usually loaded from the `net` section
/// of the node configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct NetworkConfig {
    /// Address the connection listener binds to.
    pub address: String,
    /// Port the connection listener binds to.
    pub port: u16,
    /// Upper bound for concurrently running inbound handshakes.
    pub threads: usize,
    pub server: ServerConfig,
    pub node: NodeConfig,
    /// A connection attempt must complete the node-uuid exchange within this
    /// window.
    #[serde(with = "humantime_serde")]
    pub handshake_timeout: Duration,
    /// A silent connection is probed after this window and considered dead
    /// after a second one.
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
    /// Interval of the periodic job pruning unusable connections.
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ServerConfig {
    /// Whether the connection listener starts together with the endpoint.
    pub auto_init: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case", default)]
pub struct NodeConfig {
    /// Identity of this node, exchanged in connection handshakes. Generated
    /// at startup when not configured.
    pub id: Option<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 9000,
            threads: 1,
            server: ServerConfig::default(),
            node: NodeConfig::default(),
            handshake_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(5),
            cleanup_interval: Duration::from_secs(1),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { auto_init: true }
    }
}

impl NetworkConfig {
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_common::config::ConfigLoader;
    use std::path::Path;
    use test_r::test;

    #[test]
    fn defaults_cover_all_settings() {
        let config = NetworkConfig::default();
        assert_eq!(config.address, "127.0.0.1");
        assert_eq!(config.port, 9000);
        assert_eq!(config.threads, 1);
        assert!(config.server.auto_init);
        assert_eq!(config.node.id, None);
        assert_eq!(config.handshake_timeout, Duration::from_secs(5));
        assert_eq!(config.idle_timeout, Duration::from_secs(5));
        assert_eq!(config.cleanup_interval, Duration::from_secs(1));
    }

    #[test]
    fn the_section_loads_through_the_config_loader() {
        let loader: ConfigLoader<NetworkConfig> =
            ConfigLoader::new(Path::new("does-not-exist.toml"));
        let loaded = loader.load().unwrap();
        assert_eq!(loaded.port, NetworkConfig::default().port);
        assert_eq!(loaded.cleanup_interval, Duration::from_secs(1));
    }
}
