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

use crate::executor::remote::RemoteServiceExecutor;
use crate::registry::messages::{registration_from_message, SERVICE_REGISTRATION_MESSAGE_TYPE};
use crate::registry::response_consumer::ServiceResponseConsumer;
use crate::registry::RegistryInner;
use async_trait::async_trait;
use hive_common::ownership::Reference;
use hive_networking::{ConnectionInfo, Message, MessageConsumer, MessageEndpoint};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Consumes `register-remote-service` messages from peers and turns each one
/// into a [`RemoteServiceExecutor`] bound to the advertising endpoint.
/// Registrations received this way are not re-broadcast.
pub(crate) struct ServiceRegistrationConsumer {
    registry: Weak<RegistryInner>,
    endpoint: Reference<MessageEndpoint>,
    response_consumer: Weak<ServiceResponseConsumer>,
}

impl ServiceRegistrationConsumer {
    pub fn new(
        registry: Weak<RegistryInner>,
        endpoint: Reference<MessageEndpoint>,
        response_consumer: Weak<ServiceResponseConsumer>,
    ) -> Self {
        Self {
            registry,
            endpoint,
            response_consumer,
        }
    }
}

#[async_trait]
impl MessageConsumer for ServiceRegistrationConsumer {
    fn message_type(&self) -> &str {
        SERVICE_REGISTRATION_MESSAGE_TYPE
    }

    async fn process_message(&self, message: Arc<Message>, connection_info: ConnectionInfo) {
        let Some(info) = registration_from_message(&message) else {
            warn!("received invalid service registration message; dropped");
            return;
        };

        let Some(registry) = self.registry.upgrade() else {
            warn!("cannot register remote service because the registry has been destroyed");
            return;
        };

        debug!(
            service_name = info.service_name.as_str(),
            executor_id = info.executor_id.as_str(),
            endpoint_id = connection_info.endpoint_id.as_str(),
            "received remote service registration"
        );

        let executor = Arc::new(RemoteServiceExecutor::new(
            info.service_name,
            info.executor_id,
            info.capacity,
            self.endpoint.clone(),
            connection_info,
            self.response_consumer.clone(),
        ));

        registry.register_executor(executor);
    }
}
