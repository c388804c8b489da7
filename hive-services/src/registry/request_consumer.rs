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

use crate::registry::messages::{
    request_from_message, response_to_message, SERVICE_REQUEST_MESSAGE_TYPE,
};
use crate::registry::RegistryInner;
use crate::response::{ServiceResponse, ServiceResponseStatus};
use async_trait::async_trait;
use hive_networking::{ConnectionInfo, Message, MessageConsumer};
use std::sync::{Arc, Weak};
use tracing::{debug, error, warn};

/// Consumes `service-request` messages from peers, executes the requested
/// service locally and answers with a `service-response` message.
pub(crate) struct ServiceRequestConsumer {
    registry: Weak<RegistryInner>,
}

impl ServiceRequestConsumer {
    pub fn new(registry: Weak<RegistryInner>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl MessageConsumer for ServiceRequestConsumer {
    fn message_type(&self) -> &str {
        SERVICE_REQUEST_MESSAGE_TYPE
    }

    async fn process_message(&self, message: Arc<Message>, connection_info: ConnectionInfo) {
        let Some(request) = request_from_message(&message) else {
            warn!("received invalid service request; dropped");
            return;
        };
        let request = Arc::new(request);

        let Some(registry) = self.registry.upgrade() else {
            warn!("cannot process service request because the registry has been destroyed");
            return;
        };

        debug!(
            service_name = request.service_name(),
            transaction_id = request.transaction_id(),
            "received service request"
        );

        let response = match registry.find(request.service_name(), true) {
            Some(caller) => {
                // executed off-cycle: a slow service must not stall the
                // provider's execution cycles while this consumer waits
                let call_result = match registry.job_manager().borrow() {
                    Ok(job_manager) => {
                        let future = caller.issue_call_as_job(
                            request.clone(),
                            &job_manager,
                            true,
                            true,
                        );
                        drop(job_manager);
                        future.await
                    }
                    Err(err) => Err(err.into()),
                };

                match call_result {
                    Ok(response) => response,
                    Err(err) => {
                        error!(
                            service_name = request.service_name(),
                            transaction_id = request.transaction_id(),
                            %err,
                            "local execution of remotely requested service failed"
                        );
                        ServiceResponse::new(
                            request.transaction_id(),
                            ServiceResponseStatus::InternalError,
                            err.to_string(),
                        )
                    }
                }
            }
            None => {
                warn!(
                    service_name = request.service_name(),
                    "received request for a service that does not exist locally"
                );
                ServiceResponse::new(
                    request.transaction_id(),
                    ServiceResponseStatus::Gone,
                    "service does not exist (anymore)",
                )
            }
        };

        let response_message = response_to_message(&response);
        match registry.endpoint().try_borrow() {
            Some(endpoint) => {
                if let Err(err) = endpoint
                    .send(&connection_info.endpoint_id, &response_message)
                    .await
                {
                    error!(
                        transaction_id = response.transaction_id(),
                        %err,
                        "failed to send service response back to requesting endpoint"
                    );
                }
            }
            None => {
                error!(
                    transaction_id = response.transaction_id(),
                    "cannot send service response because the endpoint has been shut down"
                );
            }
        }
    }
}
