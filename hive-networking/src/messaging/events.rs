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

/// Connection lifecycle notifications emitted by the message endpoint.
/// Subscribers (most prominently the service registry) use these to push
/// state to new peers and to cancel work bound to vanished ones.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    Established { endpoint_id: String },
    Closed { endpoint_id: String },
}
