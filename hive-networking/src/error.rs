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
pub enum NetworkingError {
    #[error("malformed URL '{0}'")]
    UrlMalformed(String),
    #[error("cannot resolve host '{0}'")]
    CannotResolveHost(String),
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("connection closed: {0}")]
    ConnectionClosed(String),
    #[error("message sending failed: {0}")]
    MessageSending(String),
    #[error("message payload invalid: {0}")]
    MessagePayloadInvalid(String),
    #[error("no established connection to endpoint '{0}'")]
    NoSuchEndpoint(String),
    #[error("job system is not available: {0}")]
    JobSystemUnavailable(#[from] OwnershipError),
}
