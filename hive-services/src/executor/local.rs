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

use crate::executor::ServiceExecutor;
use crate::future::{response_channel, ResponseFuture};
use crate::request::ServiceRequest;
use crate::response::{ServiceResponse, ServiceResponseStatus};
use futures::future::BoxFuture;
use futures::FutureExt;
use hive_common::ownership::Borrower;
use hive_jobsystem::{Job, JobContinuation, JobExecutionPhase, JobManager};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error};
use uuid::Uuid;

/// The function body of a locally provided service.
pub type ServiceFunctor =
    Arc<dyn Fn(Arc<ServiceRequest>) -> BoxFuture<'static, ServiceResponse> + Send + Sync>;

/// Executes a service with a direct function call on this node. Calls beyond
/// the configured capacity are answered with a `Busy` response immediately;
/// back-pressure is the caller's business (retry policy), not the
/// executor's.
pub struct LocalServiceExecutor {
    id: String,
    service_name: String,
    functor: ServiceFunctor,
    capacity: usize,
    current_calls: Arc<AtomicUsize>,
}

impl LocalServiceExecutor {
    pub fn new<F, Fut>(service_name: impl Into<String>, functor: F) -> Self
    where
        F: Fn(Arc<ServiceRequest>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResponse> + Send + 'static,
    {
        Self::with_capacity(service_name, usize::MAX, functor)
    }

    pub fn with_capacity<F, Fut>(
        service_name: impl Into<String>,
        capacity: usize,
        functor: F,
    ) -> Self
    where
        F: Fn(Arc<ServiceRequest>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResponse> + Send + 'static,
    {
        Self {
            id: Uuid::new_v4().to_string(),
            service_name: service_name.into(),
            functor: Arc::new(move |request| functor(request).boxed()),
            capacity,
            current_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Reserves one concurrency slot, unless the capacity is exhausted.
    fn try_acquire_slot(current_calls: &AtomicUsize, capacity: usize) -> bool {
        current_calls
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if current < capacity {
                    Some(current + 1)
                } else {
                    None
                }
            })
            .is_ok()
    }
}

impl ServiceExecutor for LocalServiceExecutor {
    fn id(&self) -> &str {
        &self.id
    }

    fn service_name(&self) -> &str {
        &self.service_name
    }

    fn is_callable(&self) -> bool {
        true
    }

    fn is_local(&self) -> bool {
        true
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
        let functor = self.functor.clone();
        let current_calls = self.current_calls.clone();
        let capacity = self.capacity;
        let service_name = self.service_name.clone();

        let job_id = format!(
            "call-service-{}-{}",
            self.service_name,
            request.transaction_id()
        );
        let workload = move |_context| {
            let promise_slot = promise_slot.clone();
            let functor = functor.clone();
            let current_calls = current_calls.clone();
            let service_name = service_name.clone();
            let request = request.clone();
            async move {
                let Some(promise) = promise_slot.lock().unwrap().take() else {
                    return JobContinuation::Dispose;
                };
                let transaction_id = request.transaction_id().to_string();

                if !Self::try_acquire_slot(&current_calls, capacity) {
                    debug!(
                        service_name = service_name.as_str(),
                        transaction_id = transaction_id.as_str(),
                        "local service is at capacity; answering busy"
                    );
                    request.end_processing();
                    promise.resolve(ServiceResponse::new(
                        transaction_id,
                        ServiceResponseStatus::Busy,
                        format!("service '{service_name}' is at capacity"),
                    ));
                    return JobContinuation::Dispose;
                }

                let outcome = AssertUnwindSafe(functor(request.clone())).catch_unwind().await;
                current_calls.fetch_sub(1, Ordering::AcqRel);

                let response = match outcome {
                    Ok(response) => response,
                    Err(_) => {
                        error!(
                            service_name = service_name.as_str(),
                            transaction_id = transaction_id.as_str(),
                            "local service implementation panicked"
                        );
                        ServiceResponse::new(
                            transaction_id,
                            ServiceResponseStatus::InternalError,
                            format!("service '{service_name}' failed internally"),
                        )
                    }
                };

                request.end_processing();
                promise.resolve(response);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServicesError;
    use hive_jobsystem::JobsConfig;
    use test_r::test;

    fn adding_executor() -> LocalServiceExecutor {
        LocalServiceExecutor::new("add", |request: Arc<ServiceRequest>| async move {
            let a = request.parameter("a").and_then(|v| v.parse::<i64>().ok());
            let b = request.parameter("b").and_then(|v| v.parse::<i64>().ok());
            match (a, b) {
                (Some(a), Some(b)) => {
                    let mut response = ServiceResponse::ok(request.transaction_id());
                    response.set_result("sum", a + b);
                    response
                }
                _ => ServiceResponse::new(
                    request.transaction_id(),
                    ServiceResponseStatus::ParameterError,
                    "parameters 'a' and 'b' must be integers",
                ),
            }
        })
    }

    #[test]
    async fn direct_local_call_resolves_with_the_functor_result() {
        let job_manager = JobManager::new(JobsConfig::default());
        job_manager.start_execution();

        let executor = adding_executor();
        let mut request = ServiceRequest::new("add");
        request.set_parameter("a", 6);
        request.set_parameter("b", 5);

        let future =
            executor.issue_call_as_job(Arc::new(request), &job_manager.borrow(), false);
        job_manager.invoke_cycle_and_wait().await;

        let response = future.await.unwrap();
        assert_eq!(response.status(), ServiceResponseStatus::Ok);
        assert_eq!(response.result("sum"), Some(&"11".to_string()));

        job_manager.stop_execution().await;
    }

    #[test]
    async fn missing_parameters_yield_a_parameter_error() {
        let job_manager = JobManager::new(JobsConfig::default());
        job_manager.start_execution();

        let executor = adding_executor();
        let future = executor.issue_call_as_job(
            Arc::new(ServiceRequest::new("add")),
            &job_manager.borrow(),
            false,
        );
        job_manager.invoke_cycle_and_wait().await;

        let response = future.await.unwrap();
        assert_eq!(response.status(), ServiceResponseStatus::ParameterError);

        job_manager.stop_execution().await;
    }

    #[test]
    async fn a_panicking_functor_yields_an_internal_error() {
        let job_manager = JobManager::new(JobsConfig::default());
        job_manager.start_execution();

        let executor =
            LocalServiceExecutor::new("exploding", |_request: Arc<ServiceRequest>| async move {
                panic!("service blew up");
            });
        let future = executor.issue_call_as_job(
            Arc::new(ServiceRequest::new("exploding")),
            &job_manager.borrow(),
            false,
        );
        job_manager.invoke_cycle_and_wait().await;

        let response = future.await.unwrap();
        assert_eq!(response.status(), ServiceResponseStatus::InternalError);

        job_manager.stop_execution().await;
    }

    #[test]
    async fn reissuing_an_in_flight_request_is_rejected() {
        let job_manager = JobManager::new(JobsConfig::default());
        job_manager.start_execution();

        let executor = adding_executor();
        let request = Arc::new(ServiceRequest::new("add"));
        request.begin_processing().unwrap();

        let future = executor.issue_call_as_job(request, &job_manager.borrow(), false);
        let result = future.await;
        assert!(matches!(result, Err(ServicesError::RequestInProcess(_))));

        job_manager.stop_execution().await;
    }
}
