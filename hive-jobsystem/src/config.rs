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

/// Settings of the job execution, usually loaded from the `jobs` section of
/// the node configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct JobsConfig {
    /// Number of worker tasks draining the job dispatch channel.
    pub concurrency: usize,
    /// Capacity of the job dispatch channel. Kicking jobs back-pressures the
    /// driver once this many jobs are waiting for a worker.
    pub queue_capacity: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            queue_capacity: 1024,
        }
    }
}
