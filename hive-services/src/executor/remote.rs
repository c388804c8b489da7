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

use crate::error::ServicesError;
use crate::executor::ServiceExecutor;
use crate::future::{response_channel, ResponseFuture};
use crate::registry::messages::request_to_message;
use crate::registry::response_consumer::ServiceResponseConsumer;
use crate::request::ServiceRequest;
use hive_common::ownership::{Borrower, Reference};
use hive_jobsystem::{Job, JobContinuation, JobExecutionPhase, JobManager};
use hive_networking::{ConnectionInfo, MessageEndpoint};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, error};

/// Calls a service provided by another node: sends a `service-request`
/// message to the providing endpoint and registers the call with the shared
/// response consumer, which resolves the promise once the correlated
/// `service-response` arrives (or the connection goes away).
pub struct RemoteServiceExecutor {
    /// Executor id advertised by the providing node.
    id: String,
    service_name: String,
    /// Capacity advertised by the providing node; enforced over there.
    capacity: usize,
    endpoint: Reference<MessageEndpoint>,
    remote_host_info: ConnectionInfo,
    response_consumer: Weak<ServiceResponseConsumer>,
}

impl RemoteServiceExecutor {
    pub fn new(
        service_name: impl Into<String>,
        id: impl Into<String>,
        capacity: usize,
        endpoint: Reference<MessageEndpoint>,
        remote_host_info: ConnectionInfo,
        response_consumer: Weak<ServiceResponseConsumer>,
    ) -> Self {
        Self {
            id: id.into(),
            service_name: service_name.into(),
            capacity,
            endpoint,
            remote_host_info,
            response_consumer,
        }
    }

    pub fn remote_endpoint_id(&self) -> &str {
        &self.remote_host_info.endpoint_id
    }
}

impl ServiceExecutor for RemoteServiceExecutor {
    fn id(&self) -> &str {
        &self.id
    }

    fn service_name(&self) -> &str {
        &self.service_name
    }

    fn is_callable(&self) -> bool {
        match self.endpoint.try_borrow() {
            Some(endpoint) => endpoint.has_connection_to(&self.remote_host_info.endpoint_id),
            None => false,
        }
    }

    fn is_local(&self) -> bool {
        false
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn issue_call_as_job(
        &self,
        request: Arc<ServiceRequest>,
        job_manager: &Borrower<JobManager>,
        async_call: bool,
    ) -> ResponseFuture {
        let (promise, future) = response_channel();

        if let Err(err) = request.begin_processing() {
            promise.reject(err);
            return future;
        }

        let promise_slot = Arc::new(Mutex::new(Some(promise)));
        let endpoint = self.endpoint.clone();
        let remote_host_info = self.remote_host_info.clone();
        let response_consumer = self.response_consumer.clone();
        let service_name = self.service_name.clone();

        let job_id = format!(
            "call-remote-service-{}-{}",
            self.service_name,
            request.transaction_id()
        );
        let workload = move |_context| {
            let promise_slot = promise_slot.clone();
            let endpoint = endpoint.clone();
            let remote_host_info = remote_host_info.clone();
            let response_consumer = response_consumer.clone();
            let service_name = service_name.clone();
            let request = request.clone();
            async move {
                let Some(promise) = promise_slot.lock().unwrap().take() else {
                    return JobContinuation::Dispose;
                };
                let transaction_id = request.transaction_id().to_string();

                let Some(endpoint) = endpoint.try_borrow() else {
                    request.end_processing();
                    promise.reject(ServicesError::CallFailed(format!(
                        "cannot call remote service '{service_name}': the local endpoint has been shut down"
                    )));
                    return JobContinuation::Dispose;
                };

                if !endpoint.has_connection_to(&remote_host_info.endpoint_id) {
                    error!(
                        service_name = service_name.as_str(),
                        endpoint_id = remote_host_info.endpoint_id.as_str(),
                        "cannot call remote service: no connection to providing endpoint"
                    );
                    request.end_processing();
                    promise.reject(ServicesError::CallFailed(format!(
                        "no connection to endpoint '{}' providing service '{service_name}'",
                        remote_host_info.endpoint_id
                    )));
                    return JobContinuation::Dispose;
                }

                let Some(response_consumer) = response_consumer.upgrade() else {
                    request.end_processing();
                    promise.reject(ServicesError::CallFailed(format!(
                        "cannot receive a response for service '{service_name}': the response consumer has been destroyed"
                    )));
                    return JobContinuation::Dispose;
                };

                debug!(
                    service_name = service_name.as_str(),
                    endpoint_id = remote_host_info.endpoint_id.as_str(),
                    transaction_id = transaction_id.as_str(),
                    "calling remote service"
                );

                // the pending entry must exist before the request leaves,
                // otherwise a fast response could find nothing to resolve
                response_consumer.add_pending_request(
                    request.clone(),
                    remote_host_info.clone(),
                    promise,
                );

                let message = request_to_message(&request);
                if let Err(err) = endpoint
                    .send(&remote_host_info.endpoint_id, &message)
                    .await
                {
                    error!(
                        service_name = service_name.as_str(),
                        transaction_id = transaction_id.as_str(),
                        %err,
                        "sending the service request failed"
                    );
                    if let Some(pending) = response_consumer.remove_pending_request(&transaction_id)
                    {
                        pending.request.end_processing();
                        pending.promise.reject(ServicesError::CallFailed(format!(
                            "sending request for service '{service_name}' failed: {err}"
                        )));
                    }
                }

                JobContinuation::Dispose
            }
        };

        let job = if async_call {
            Job::new_async(job_id, JobExecutionPhase::Main, workload)
        } else {
            Job::new(job_id, JobExecutionPhase::Main, workload)
        };
        job_manager.kick_job(Arc::new(job));

        future
    }
}
