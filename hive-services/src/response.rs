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

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Success and error states of a service response. The discriminants are the
/// wire encoding used in `service-response` messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum ServiceResponseStatus {
    /// Successful service execution.
    Ok = 0,
    /// Parameters were missing or of the wrong type.
    ParameterError = 10,
    /// The service failed due to an internal error.
    InternalError = 20,
    /// The service implementation is no longer available.
    Gone = 30,
    /// The service is at capacity and did not accept the call.
    Busy = 40,
}

impl From<ServiceResponseStatus> for i32 {
    fn from(value: ServiceResponseStatus) -> Self {
        value as i32
    }
}

impl TryFrom<i32> for ServiceResponseStatus {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ServiceResponseStatus::Ok),
            10 => Ok(ServiceResponseStatus::ParameterError),
            20 => Ok(ServiceResponseStatus::InternalError),
            30 => Ok(ServiceResponseStatus::Gone),
            40 => Ok(ServiceResponseStatus::Busy),
            other => Err(format!("invalid service response status {other}")),
        }
    }
}

impl Display for ServiceResponseStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ServiceResponseStatus::Ok => "ok",
            ServiceResponseStatus::ParameterError => "parameter-error",
            ServiceResponseStatus::InternalError => "internal-error",
            ServiceResponseStatus::Gone => "gone",
            ServiceResponseStatus::Busy => "busy",
        };
        write!(f, "{name}")
    }
}

/// The response of a service call, correlated to its request by transaction
/// id.
#[derive(Clone, Debug)]
pub struct ServiceResponse {
    transaction_id: String,
    status: ServiceResponseStatus,
    status_message: String,
    results: BTreeMap<String, String>,
    /// How many attempts the resolving caller made for this call (retries
    /// included). Stamped by the caller, not transmitted over the wire.
    resolution_attempts: usize,
}

impl ServiceResponse {
    pub fn new(
        transaction_id: impl Into<String>,
        status: ServiceResponseStatus,
        status_message: impl Into<String>,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            status,
            status_message: status_message.into(),
            results: BTreeMap::new(),
            resolution_attempts: 0,
        }
    }

    pub fn ok(transaction_id: impl Into<String>) -> Self {
        Self::new(transaction_id, ServiceResponseStatus::Ok, "")
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    pub fn status(&self) -> ServiceResponseStatus {
        self.status
    }

    pub fn set_status(&mut self, status: ServiceResponseStatus) {
        self.status = status;
    }

    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    pub fn set_status_message(&mut self, status_message: impl Into<String>) {
        self.status_message = status_message.into();
    }

    pub fn set_result(&mut self, name: impl Into<String>, value: impl ToString) {
        self.results.insert(name.into(), value.to_string());
    }

    pub fn result(&self, name: &str) -> Option<&String> {
        self.results.get(name)
    }

    pub fn results(&self) -> &BTreeMap<String, String> {
        &self.results
    }

    pub fn resolution_attempts(&self) -> usize {
        self.resolution_attempts
    }

    pub fn set_resolution_attempts(&mut self, attempts: usize) {
        self.resolution_attempts = attempts;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[test]
    fn status_codes_match_the_wire_encoding() {
        for (status, code) in [
            (ServiceResponseStatus::Ok, 0),
            (ServiceResponseStatus::ParameterError, 10),
            (ServiceResponseStatus::InternalError, 20),
            (ServiceResponseStatus::Gone, 30),
            (ServiceResponseStatus::Busy, 40),
        ] {
            assert_eq!(i32::from(status), code);
            assert_eq!(ServiceResponseStatus::try_from(code).unwrap(), status);
        }
        assert!(ServiceResponseStatus::try_from(15).is_err());
    }
}
