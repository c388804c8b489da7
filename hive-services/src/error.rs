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

use hive_common::ownership::OwnershipError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ServicesError {
    #[error("no callable service found for '{0}'")]
    NoCallableServiceFound(String),
    #[error("service call failed: {0}")]
    CallFailed(String),
    #[error("connection to service endpoint '{0}' was closed mid-call")]
    ServiceEndpointDisconnected(String),
    #[error("request {0} is already being processed; duplicate it to retry")]
    RequestInProcess(String),
    #[error("job system is not available: {0}")]
    JobSystemUnavailable(#[from] OwnershipError),
}
