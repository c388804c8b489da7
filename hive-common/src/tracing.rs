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
use tracing_subscriber::EnvFilter;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TracingConfig {
    pub service_name: String,
    pub default_env_filter: String,
    pub pretty: bool,
    pub with_time: bool,
}

impl TracingConfig {
    pub fn new(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            default_env_filter: "info".to_string(),
            pretty: false,
            with_time: true,
        }
    }

    pub fn test_pretty_without_time(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            default_env_filter: "debug".to_string(),
            pretty: true,
            with_time: false,
        }
    }
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::new("hive")
    }
}

/// Installs the global tracing subscriber. Safe to call repeatedly (later
/// calls are no-ops), which keeps it usable from test fixtures.
pub fn init_tracing(config: &TracingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_env_filter.clone()));

    let builder = tracing_subscriber::fmt().with_env_filter(env_filter);

    let result = if config.pretty {
        if config.with_time {
            builder.pretty().try_init()
        } else {
            builder.pretty().without_time().try_init()
        }
    } else if config.with_time {
        builder.try_init()
    } else {
        builder.without_time().try_init()
    };

    if result.is_ok() {
        ::tracing::debug!(
            service_name = config.service_name.as_str(),
            "tracing initialized"
        );
    }
}

pub fn init_tracing_with_default_debug_env_filter(config: &TracingConfig) {
    let mut config = config.clone();
    config.default_env_filter = "debug".to_string();
    init_tracing(&config);
}
