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
use crate::future::ResponsePromise;
use crate::registry::messages::{response_from_message, SERVICE_RESPONSE_MESSAGE_TYPE};
use crate::request::ServiceRequest;
use crate::response::ServiceResponseStatus;
use async_trait::async_trait;
use hive_networking::{ConnectionInfo, Message, MessageConsumer};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, warn};

/// One outbound call waiting for its `service-response`.
pub struct PendingRequest {
    pub request: Arc<ServiceRequest>,
    pub promise: ResponsePromise,
    pub endpoint_info: ConnectionInfo,
}

/// Consumes `service-response` messages and resolves the pending requests
/// they correlate to via transaction id. Calls whose providing endpoint
/// disconnects before responding are rejected through
/// [`ServiceResponseConsumer::cancel_pending_requests_of_endpoint`].
pub struct ServiceResponseConsumer {
    pending_requests: Mutex<HashMap<String, PendingRequest>>,
}

impl ServiceResponseConsumer {
    pub fn new() -> Self {
        Self {
            pending_requests: Mutex::new(HashMap::new()),
        }
    }

    pub fn add_pending_request(
        &self,
        request: Arc<ServiceRequest>,
        endpoint_info: ConnectionInfo,
        promise: ResponsePromise,
    ) {
        debug_assert!(
            request.is_currently_processed(),
            "pending requests must be in the processing state"
        );
        let transaction_id = request.transaction_id().to_string();
        let pending = PendingRequest {
            request,
            promise,
            endpoint_info,
        };

        let mut pending_requests = self.pending_requests.lock().unwrap();
        if pending_requests.insert(transaction_id.clone(), pending).is_some() {
            // forbidden by the request uniqueness contract
            error!(
                transaction_id = transaction_id.as_str(),
                "a pending request with this transaction id already existed and was replaced"
            );
        }
    }

    pub fn remove_pending_request(&self, transaction_id: &str) -> Option<PendingRequest> {
        self.pending_requests.lock().unwrap().remove(transaction_id)
    }

    pub fn pending_request_count(&self) -> usize {
        self.pending_requests.lock().unwrap().len()
    }

    /// Rejects every pending request bound to the given endpoint with
    /// [`ServicesError::ServiceEndpointDisconnected`].
    pub fn cancel_pending_requests_of_endpoint(&self, endpoint_id: &str) {
        let cancelled: Vec<PendingRequest> = {
            let mut pending_requests = self.pending_requests.lock().unwrap();
            let transaction_ids: Vec<String> = pending_requests
                .iter()
                .filter(|(_, pending)| pending.endpoint_info.endpoint_id == endpoint_id)
                .map(|(transaction_id, _)| transaction_id.clone())
                .collect();
            transaction_ids
                .into_iter()
                .filter_map(|transaction_id| pending_requests.remove(&transaction_id))
                .collect()
        };

        for pending in cancelled {
            error!(
                endpoint_id,
                transaction_id = pending.request.transaction_id(),
                "connection to remote endpoint closed mid service request; request cancelled"
            );
            pending.request.end_processing();
            pending.promise.reject(ServicesError::ServiceEndpointDisconnected(
                endpoint_id.to_string(),
            ));
        }
    }
}

impl Default for ServiceResponseConsumer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageConsumer for ServiceResponseConsumer {
    fn message_type(&self) -> &str {
        SERVICE_RESPONSE_MESSAGE_TYPE
    }

    async fn process_message(&self, message: Arc<Message>, connection_info: ConnectionInfo) {
        let Some(response) = response_from_message(&message) else {
            warn!("received message cannot be converted to a service response; dropped");
            return;
        };

        let transaction_id = response.transaction_id().to_string();
        let Some(pending) = self.remove_pending_request(&transaction_id) else {
            // also covers the defensive drop of duplicate responses
            warn!(
                transaction_id = transaction_id.as_str(),
                "received service response for an unknown request; dropped"
            );
            return;
        };

        match response.status() {
            ServiceResponseStatus::Ok => debug!(
                transaction_id = transaction_id.as_str(),
                hostname = connection_info.hostname.as_str(),
                "received service response for pending request"
            ),
            status => warn!(
                transaction_id = transaction_id.as_str(),
                hostname = connection_info.hostname.as_str(),
                %status,
                status_message = response.status_message(),
                "received non-ok service response for pending request"
            ),
        }

        pending.request.end_processing();
        pending.promise.resolve(response);
    }
}
