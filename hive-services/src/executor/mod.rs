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

pub mod local;
pub mod remote;

use crate::future::ResponseFuture;
use crate::request::ServiceRequest;
use hive_common::ownership::Borrower;
use hive_jobsystem::JobManager;
use std::sync::Arc;

/// One bound implementation of a service. Services can be executed on this
/// node (direct call) or on another one (message-based call); the registry
/// treats both uniformly through this surface.
pub trait ServiceExecutor: Send + Sync {
    /// Unique id of this executor. For remote executors this is the id the
    /// providing node advertised.
    fn id(&self) -> &str;

    /// Name of the service this executor implements.
    fn service_name(&self) -> &str;

    /// Whether the service can currently be called at all.
    fn is_callable(&self) -> bool;

    /// Whether the service runs on this node.
    fn is_local(&self) -> bool;

    /// Maximum number of concurrent calls the implementation accepts.
    fn capacity(&self) -> usize;

    /// Enqueues the call as a job and returns the future response. With
    /// `async_call` set, the job is not awaited by the execution cycle.
    fn issue_call_as_job(
        &self,
        request: Arc<ServiceRequest>,
        job_manager: &Borrower<JobManager>,
        async_call: bool,
    ) -> ResponseFuture;
}
