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

pub mod messages;
pub(crate) mod registration_consumer;
pub(crate) mod request_consumer;
pub mod response_consumer;

use crate::caller::RoundRobinServiceCaller;
use crate::events::ServiceEvent;
use crate::executor::ServiceExecutor;
use crate::registry::messages::{registration_to_message, ServiceRegistrationInfo};
use crate::registry::registration_consumer::ServiceRegistrationConsumer;
use crate::registry::request_consumer::ServiceRequestConsumer;
use crate::registry::response_consumer::ServiceResponseConsumer;
use hive_common::ownership::{Borrower, Reference};
use hive_jobsystem::{Job, JobContinuation, JobExecutionPhase, JobManager};
use hive_networking::{ConnectionEvent, MessageEndpoint};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub(crate) struct RegistryInner {
    callers: Mutex<HashMap<String, Arc<RoundRobinServiceCaller>>>,
    job_manager: Reference<JobManager>,
    endpoint: Reference<MessageEndpoint>,
    events: broadcast::Sender<ServiceEvent>,
}

impl RegistryInner {
    pub(crate) fn job_manager(&self) -> &Reference<JobManager> {
        &self.job_manager
    }

    pub(crate) fn endpoint(&self) -> &Reference<MessageEndpoint> {
        &self.endpoint
    }

    fn fire_event(&self, event: ServiceEvent) {
        let _ = self.events.send(event);
    }

    /// Looks up the caller of a service, if it is callable at all (and
    /// locally callable when `only_local` is set).
    pub(crate) fn find(
        &self,
        service_name: &str,
        only_local: bool,
    ) -> Option<Arc<RoundRobinServiceCaller>> {
        let caller = self.callers.lock().unwrap().get(service_name).cloned()?;

        if !caller.is_callable() {
            warn!(
                service_name,
                "service is registered but no longer has a callable executor"
            );
            return None;
        }
        if only_local && !caller.contains_locally_callable() {
            warn!(
                service_name,
                "service is registered but not locally callable"
            );
            return None;
        }

        Some(caller)
    }

    /// Adds an executor to the caller of its service. Local executors are
    /// advertised to all currently connected peers; remote registrations are
    /// not re-broadcast.
    pub(crate) fn register_executor(&self, executor: Arc<dyn ServiceExecutor>) {
        let service_name = executor.service_name().to_string();

        let caller = {
            let mut callers = self.callers.lock().unwrap();
            callers
                .entry(service_name.clone())
                .or_insert_with(|| Arc::new(RoundRobinServiceCaller::new(service_name.clone())))
                .clone()
        };

        let is_local = executor.is_local();
        caller.add_executor(executor.clone());
        debug!(
            service_name = service_name.as_str(),
            executor_id = executor.id(),
            is_local,
            "service executor registered"
        );

        if is_local {
            self.broadcast_registration(executor.as_ref());
        }

        self.fire_event(ServiceEvent::Registered { service_name });
    }

    /// Removes the executor with the given id from every caller. Services
    /// left without executors vanish from the registry.
    pub(crate) fn unregister_executor(&self, executor_id: &str) {
        let affected: Vec<String> = {
            let mut callers = self.callers.lock().unwrap();
            let affected = callers
                .iter()
                .filter(|(_, caller)| caller.remove_executor(executor_id))
                .map(|(service_name, _)| service_name.clone())
                .collect();
            callers.retain(|_, caller| caller.executor_count() > 0);
            affected
        };

        for service_name in affected {
            debug!(
                service_name = service_name.as_str(),
                executor_id, "service executor unregistered"
            );
            self.fire_event(ServiceEvent::Unregistered { service_name });
        }
    }

    /// Advertises one local executor to every connected peer as a job.
    fn broadcast_registration(&self, executor: &dyn ServiceExecutor) {
        let info = ServiceRegistrationInfo {
            service_name: executor.service_name().to_string(),
            executor_id: executor.id().to_string(),
            capacity: executor.capacity(),
        };
        let endpoint = self.endpoint.clone();

        let job = Job::new(
            format!(
                "broadcast-service-registration-{}-{}",
                info.service_name, info.executor_id
            ),
            JobExecutionPhase::Main,
            move |_context| {
                let endpoint = endpoint.clone();
                let info = info.clone();
                async move {
                    let Some(endpoint) = endpoint.try_borrow() else {
                        warn!(
                            service_name = info.service_name.as_str(),
                            "cannot broadcast local service because the endpoint is gone"
                        );
                        return JobContinuation::Dispose;
                    };

                    let message = Arc::new(registration_to_message(&info));
                    let broadcast_result = endpoint.issue_broadcast_as_job(message);
                    drop(endpoint);

                    match broadcast_result {
                        Ok(receiver) => match receiver.await {
                            Ok(receivers) => debug!(
                                service_name = info.service_name.as_str(),
                                receivers, "broadcast local service to peers"
                            ),
                            Err(_) => warn!(
                                service_name = info.service_name.as_str(),
                                "broadcasting local service did not resolve"
                            ),
                        },
                        Err(err) => warn!(
                            service_name = info.service_name.as_str(),
                            %err,
                            "broadcasting local service failed"
                        ),
                    }
                    JobContinuation::Dispose
                }
            },
        );

        match self.job_manager.try_borrow() {
            Some(job_manager) => job_manager.kick_job(Arc::new(job)),
            None => warn!("cannot broadcast service registration: job system unavailable"),
        }
    }

    /// Pushes the full local service portfolio to one (newly connected)
    /// peer, one registration message job per local executor.
    fn send_portfolio_to(&self, endpoint_id: &str) {
        let local_infos: Vec<ServiceRegistrationInfo> = {
            let callers = self.callers.lock().unwrap();
            callers
                .values()
                .flat_map(|caller| caller.local_executors())
                .map(|executor| ServiceRegistrationInfo {
                    service_name: executor.service_name().to_string(),
                    executor_id: executor.id().to_string(),
                    capacity: executor.capacity(),
                })
                .collect()
        };

        if local_infos.is_empty() {
            return;
        }

        let Some(job_manager) = self.job_manager.try_borrow() else {
            warn!("cannot push service portfolio: job system unavailable");
            return;
        };

        debug!(
            endpoint_id,
            services = local_infos.len(),
            "pushing local service portfolio to newly connected peer"
        );

        for info in local_infos {
            let endpoint = self.endpoint.clone();
            let endpoint_id = endpoint_id.to_string();
            let job = Job::new(
                format!(
                    "register-service-{}-at-endpoint-{}",
                    info.service_name, endpoint_id
                ),
                JobExecutionPhase::Main,
                move |_context| {
                    let endpoint = endpoint.clone();
                    let endpoint_id = endpoint_id.clone();
                    let info = info.clone();
                    async move {
                        let Some(endpoint) = endpoint.try_borrow() else {
                            return JobContinuation::Dispose;
                        };
                        let message = registration_to_message(&info);
                        if let Err(err) = endpoint.send(&endpoint_id, &message).await {
                            warn!(
                                service_name = info.service_name.as_str(),
                                endpoint_id = endpoint_id.as_str(),
                                %err,
                                "failed to advertise service to peer"
                            );
                        }
                        JobContinuation::Dispose
                    }
                },
            );
            job_manager.kick_job(Arc::new(job));
        }
    }
}

/// The peer-to-peer service registry of a node: tracks one
/// [`RoundRobinServiceCaller`] per service name, advertises local executors
/// to connected peers, consumes remote registrations/requests/responses, and
/// converges with its peers purely through registration broadcast plus a
/// full portfolio push on every new connection. Connection close is the sole
/// liveness signal: pending calls to a vanished endpoint are rejected.
pub struct ServiceRegistry {
    inner: Arc<RegistryInner>,
    // the endpoint only holds weak references to consumers; the registry
    // keeps them alive
    _registration_consumer: Arc<ServiceRegistrationConsumer>,
    _request_consumer: Arc<ServiceRequestConsumer>,
    response_consumer: Arc<ServiceResponseConsumer>,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

impl ServiceRegistry {
    pub fn new(
        job_manager: Reference<JobManager>,
        endpoint: &Borrower<MessageEndpoint>,
    ) -> ServiceRegistry {
        let (events, _) = broadcast::channel(256);
        let inner = Arc::new(RegistryInner {
            callers: Mutex::new(HashMap::new()),
            job_manager,
            endpoint: endpoint.to_reference(),
            events,
        });

        let response_consumer = Arc::new(ServiceResponseConsumer::new());
        let registration_consumer = Arc::new(ServiceRegistrationConsumer::new(
            Arc::downgrade(&inner),
            endpoint.to_reference(),
            Arc::downgrade(&response_consumer),
        ));
        let request_consumer = Arc::new(ServiceRequestConsumer::new(Arc::downgrade(&inner)));

        let registration_weak: Weak<ServiceRegistrationConsumer> =
            Arc::downgrade(&registration_consumer);
        let request_weak: Weak<ServiceRequestConsumer> = Arc::downgrade(&request_consumer);
        let response_weak: Weak<ServiceResponseConsumer> = Arc::downgrade(&response_consumer);
        endpoint.add_message_consumer(registration_weak);
        endpoint.add_message_consumer(request_weak);
        endpoint.add_message_consumer(response_weak);

        let event_task = tokio::spawn(connection_event_loop(
            endpoint.subscribe_connection_events(),
            Arc::downgrade(&inner),
            Arc::downgrade(&response_consumer),
        ));

        ServiceRegistry {
            inner,
            _registration_consumer: registration_consumer,
            _request_consumer: request_consumer,
            response_consumer,
            event_task: Mutex::new(Some(event_task)),
        }
    }

    /// Registers a service executor. Local executors are broadcast to every
    /// connected peer.
    pub fn register(&self, executor: Arc<dyn ServiceExecutor>) {
        self.inner.register_executor(executor);
    }

    /// Removes the executor with the given id from every service.
    pub fn unregister(&self, executor_id: &str) {
        self.inner.unregister_executor(executor_id);
    }

    /// Looks up the caller for a service name, if one is callable.
    pub fn find(&self, service_name: &str, only_local: bool) -> Option<Arc<RoundRobinServiceCaller>> {
        self.inner.find(service_name, only_local)
    }

    pub fn subscribe_service_events(&self) -> broadcast::Receiver<ServiceEvent> {
        self.inner.events.subscribe()
    }

    /// Count of calls still waiting for a remote response.
    pub fn pending_remote_calls(&self) -> usize {
        self.response_consumer.pending_request_count()
    }
}

impl Drop for ServiceRegistry {
    fn drop(&mut self) {
        if let Some(task) = self.event_task.lock().unwrap().take() {
            task.abort();
        }
    }
}

/// Reacts to connection lifecycle events: pushes the service portfolio to
/// new peers and cancels pending calls of vanished ones.
async fn connection_event_loop(
    mut receiver: broadcast::Receiver<ConnectionEvent>,
    inner: Weak<RegistryInner>,
    response_consumer: Weak<ServiceResponseConsumer>,
) {
    loop {
        match receiver.recv().await {
            Ok(ConnectionEvent::Established { endpoint_id }) => match inner.upgrade() {
                Some(inner) => inner.send_portfolio_to(&endpoint_id),
                None => break,
            },
            Ok(ConnectionEvent::Closed { endpoint_id }) => match response_consumer.upgrade() {
                Some(response_consumer) => {
                    response_consumer.cancel_pending_requests_of_endpoint(&endpoint_id)
                }
                None => break,
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "service registry lagged behind connection events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
