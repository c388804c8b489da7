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

use crate::request::ServiceRequest;
use crate::response::{ServiceResponse, ServiceResponseStatus};
use bytes::Bytes;
use hive_networking::Message;
use tracing::warn;

pub const SERVICE_REGISTRATION_MESSAGE_TYPE: &str = "register-remote-service";
pub const SERVICE_REQUEST_MESSAGE_TYPE: &str = "service-request";
pub const SERVICE_RESPONSE_MESSAGE_TYPE: &str = "service-response";

const TRANSACTION_ID_ATTRIBUTE: &str = "transaction-id";
const SERVICE_ATTRIBUTE: &str = "service";
const STATUS_ATTRIBUTE: &str = "status";
const STATUS_MESSAGE_ATTRIBUTE: &str = "status-message";
const SERVICE_NAME_ATTRIBUTE: &str = "service-name";
const SERVICE_ID_ATTRIBUTE: &str = "service-id";
const CAPACITY_ATTRIBUTE: &str = "capacity";

/// Advertisement of one local service executor to a peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceRegistrationInfo {
    pub service_name: String,
    pub executor_id: String,
    pub capacity: usize,
}

pub fn registration_to_message(info: &ServiceRegistrationInfo) -> Message {
    let mut message = Message::new(SERVICE_REGISTRATION_MESSAGE_TYPE);
    message.set_attribute(SERVICE_NAME_ATTRIBUTE, info.service_name.clone());
    message.set_attribute(SERVICE_ID_ATTRIBUTE, info.executor_id.clone());
    message.set_attribute(CAPACITY_ATTRIBUTE, info.capacity.to_string());
    message
}

pub fn registration_from_message(message: &Message) -> Option<ServiceRegistrationInfo> {
    let service_name = message.attribute_str(SERVICE_NAME_ATTRIBUTE)?;
    let executor_id = message.attribute_str(SERVICE_ID_ATTRIBUTE)?;
    let capacity = match message.attribute_str(CAPACITY_ATTRIBUTE)?.parse::<usize>() {
        Ok(capacity) => capacity,
        Err(_) => {
            warn!("service registration message carries a non-numeric capacity");
            return None;
        }
    };

    if service_name.is_empty() || executor_id.is_empty() {
        return None;
    }

    Some(ServiceRegistrationInfo {
        service_name,
        executor_id,
        capacity,
    })
}

pub fn request_to_message(request: &ServiceRequest) -> Message {
    let mut message = Message::new(SERVICE_REQUEST_MESSAGE_TYPE);
    for (name, value) in request.parameters() {
        message.set_attribute(name.clone(), Bytes::from(value.clone()));
    }
    message.set_attribute(
        TRANSACTION_ID_ATTRIBUTE,
        request.transaction_id().to_string(),
    );
    message.set_attribute(SERVICE_ATTRIBUTE, request.service_name().to_string());
    message
}

pub fn request_from_message(message: &Message) -> Option<ServiceRequest> {
    let transaction_id = message.attribute_str(TRANSACTION_ID_ATTRIBUTE)?;
    let service_name = message.attribute_str(SERVICE_ATTRIBUTE)?;

    let mut request = ServiceRequest::with_transaction_id(service_name, transaction_id);
    for name in message.attribute_names() {
        if name == TRANSACTION_ID_ATTRIBUTE || name == SERVICE_ATTRIBUTE {
            continue;
        }
        if let Some(value) = message.attribute_str(name) {
            request.set_parameter(name.to_string(), value);
        }
    }

    Some(request)
}

pub fn response_to_message(response: &ServiceResponse) -> Message {
    let mut message = Message::new(SERVICE_RESPONSE_MESSAGE_TYPE);
    for (name, value) in response.results() {
        message.set_attribute(name.clone(), Bytes::from(value.clone()));
    }
    message.set_attribute(
        TRANSACTION_ID_ATTRIBUTE,
        response.transaction_id().to_string(),
    );
    message.set_attribute(STATUS_ATTRIBUTE, i32::from(response.status()).to_string());
    message.set_attribute(STATUS_MESSAGE_ATTRIBUTE, response.status_message().to_string());
    message
}

pub fn response_from_message(message: &Message) -> Option<ServiceResponse> {
    let transaction_id = message.attribute_str(TRANSACTION_ID_ATTRIBUTE)?;
    let status_code = match message.attribute_str(STATUS_ATTRIBUTE)?.parse::<i32>() {
        Ok(code) => code,
        Err(_) => {
            warn!("service response message carries a non-numeric status code");
            return None;
        }
    };
    let status = match ServiceResponseStatus::try_from(status_code) {
        Ok(status) => status,
        Err(err) => {
            warn!(%err, "service response message carries an unknown status code");
            return None;
        }
    };
    let status_message = message
        .attribute_str(STATUS_MESSAGE_ATTRIBUTE)
        .unwrap_or_default();

    let mut response = ServiceResponse::new(transaction_id, status, status_message);
    for name in message.attribute_names() {
        if name == TRANSACTION_ID_ATTRIBUTE
            || name == STATUS_ATTRIBUTE
            || name == STATUS_MESSAGE_ATTRIBUTE
        {
            continue;
        }
        if let Some(value) = message.attribute_str(name) {
            response.set_result(name.to_string(), value);
        }
    }

    Some(response)
}
