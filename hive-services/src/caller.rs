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
use crate::request::ServiceRequest;
use crate::response::{ServiceResponse, ServiceResponseStatus};
use hive_common::ownership::Borrower;
use hive_jobsystem::{Job, JobContinuation, JobExecutionPhase, JobManager};
use indexmap::IndexMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Per-call retry behavior. Busy and internal-error responses are retried
/// with a duplicated request after `retry_interval`; transport failures are
/// retried only when the policy rotates executors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first one.
    pub max_retries: usize,
    /// Pause between attempts.
    pub retry_interval: Duration,
    /// Rotate to a different executor per attempt (skipping the previous
    /// one) instead of retrying the same executor.
    pub try_next_executor: bool,
}

impl RetryPolicy {
    pub const NONE: RetryPolicy = RetryPolicy {
        max_retries: 0,
        retry_interval: Duration::ZERO,
        try_next_executor: false,
    };
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::NONE
    }
}

/// The per-service-name load balancer: holds every known executor of one
/// service and distributes calls across the currently callable ones in
/// round-robin fashion, deterministic by insertion order.
pub struct RoundRobinServiceCaller {
    service_name: String,
    executors: Mutex<IndexMap<String, Arc<dyn ServiceExecutor>>>,
    cursor: AtomicUsize,
}

impl RoundRobinServiceCaller {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            executors: Mutex::new(IndexMap::new()),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Adds an executor to this caller. An executor with the same id
    /// replaces the previous registration (keeping its rotation slot).
    pub fn add_executor(&self, executor: Arc<dyn ServiceExecutor>) {
        self.executors
            .lock()
            .unwrap()
            .insert(executor.id().to_string(), executor);
    }

    /// Removes the executor with the given id. Returns whether it was
    /// registered.
    pub fn remove_executor(&self, executor_id: &str) -> bool {
        self.executors
            .lock()
            .unwrap()
            .shift_remove(executor_id)
            .is_some()
    }

    pub fn executor_count(&self) -> usize {
        self.executors.lock().unwrap().len()
    }

    pub fn callable_count(&self) -> usize {
        self.executors
            .lock()
            .unwrap()
            .values()
            .filter(|executor| executor.is_callable())
            .count()
    }

    pub fn is_callable(&self) -> bool {
        self.callable_count() > 0
    }

    pub fn contains_locally_callable(&self) -> bool {
        self.executors
            .lock()
            .unwrap()
            .values()
            .any(|executor| executor.is_local() && executor.is_callable())
    }

    pub(crate) fn local_executors(&self) -> Vec<Arc<dyn ServiceExecutor>> {
        self.executors
            .lock()
            .unwrap()
            .values()
            .filter(|executor| executor.is_local())
            .cloned()
            .collect()
    }

    /// Selects the next executor in rotation among the currently callable
    /// candidates. `skip` excludes the previously used executor when there
    /// is an alternative.
    fn select_next_executor(
        &self,
        only_local: bool,
        skip: Option<&str>,
    ) -> Option<Arc<dyn ServiceExecutor>> {
        let executors = self.executors.lock().unwrap();
        let mut candidates: Vec<&Arc<dyn ServiceExecutor>> = executors
            .values()
            .filter(|executor| executor.is_callable() && (!only_local || executor.is_local()))
            .collect();

        if let Some(skip_id) = skip {
            if candidates.len() > 1 {
                candidates.retain(|executor| executor.id() != skip_id);
            }
        }

        if candidates.is_empty() {
            return None;
        }

        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
        Some(candidates[index].clone())
    }

    /// Issues a call without retries; see [`Self::issue_call_with_retry`].
    pub fn issue_call_as_job(
        self: &Arc<Self>,
        request: Arc<ServiceRequest>,
        job_manager: &Borrower<JobManager>,
        only_local: bool,
        async_call: bool,
    ) -> ResponseFuture {
        self.issue_call_with_retry(request, job_manager, only_local, async_call, RetryPolicy::NONE)
    }

    /// Selects an executor and calls it as a job. On busy or internal-error
    /// responses (and on transport failures when the policy rotates
    /// executors) the call is re-issued with a duplicated request after the
    /// retry interval, up to `max_retries` additional attempts. The final
    /// response carries the number of attempts made.
    pub fn issue_call_with_retry(
        self: &Arc<Self>,
        request: Arc<ServiceRequest>,
        job_manager: &Borrower<JobManager>,
        only_local: bool,
        async_call: bool,
        retry_policy: RetryPolicy,
    ) -> ResponseFuture {
        let (promise, future) = response_channel();
        let promise_slot = Arc::new(Mutex::new(Some(promise)));
        let caller = self.clone();

        let job_id = format!(
            "resolve-service-call-{}-{}",
            self.service_name,
            Uuid::new_v4()
        );
        let workload = move |context: hive_jobsystem::JobContext| {
            let caller = caller.clone();
            let promise_slot = promise_slot.clone();
            let request = request.clone();
            async move {
                let Some(promise) = promise_slot.lock().unwrap().take() else {
                    return JobContinuation::Dispose;
                };

                let result = caller
                    .resolve_call(context, request, only_local, async_call, retry_policy)
                    .await;

                match result {
                    Ok(response) => promise.resolve(response),
                    Err(error) => promise.reject(error),
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

    /// The retry loop driving one logical call to resolution.
    async fn resolve_call(
        self: Arc<Self>,
        context: hive_jobsystem::JobContext,
        request: Arc<ServiceRequest>,
        only_local: bool,
        async_call: bool,
        retry_policy: RetryPolicy,
    ) -> Result<ServiceResponse, ServicesError> {
        let mut attempts: usize = 0;
        let mut current_request = request;
        let mut previous_executor_id: Option<String> = None;

        loop {
            attempts += 1;

            let skip = if retry_policy.try_next_executor {
                previous_executor_id.as_deref()
            } else {
                None
            };
            let Some(executor) = self.select_next_executor(only_local, skip) else {
                warn!(
                    service_name = self.service_name.as_str(),
                    "no callable executor available for service call"
                );
                return Err(ServicesError::NoCallableServiceFound(
                    self.service_name.clone(),
                ));
            };
            previous_executor_id = Some(executor.id().to_string());

            let result = {
                let job_manager = context.job_manager()?;
                let call_future =
                    executor.issue_call_as_job(current_request.clone(), &job_manager, async_call);
                drop(job_manager);
                call_future.await
            };

            let retry_applicable = match &result {
                Ok(response) => matches!(
                    response.status(),
                    ServiceResponseStatus::Busy | ServiceResponseStatus::InternalError
                ),
                Err(_) => retry_policy.try_next_executor,
            };

            if !retry_applicable || attempts > retry_policy.max_retries {
                return result.map(|mut response| {
                    response.set_resolution_attempts(attempts);
                    response
                });
            }

            debug!(
                service_name = self.service_name.as_str(),
                attempts, "service call attempt failed; retrying after interval"
            );
            context
                .job_manager()?
                .wait_for_duration(retry_policy.retry_interval)
                .await;
            current_request = Arc::new(current_request.duplicate());
        }
    }
}
