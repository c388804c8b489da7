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
use std::collections::BTreeMap;
use std::sync::Mutex;
use uuid::Uuid;

/// A request for a specific service, carrying the parameters the service
/// implementation needs to do its work.
///
/// Each instance can only be processed once at a time: its transaction id
/// correlates it with its response, and executors cannot distinguish two
/// in-flight requests with the same id. To send the same parameters again
/// (e.g. for a retry), [`ServiceRequest::duplicate`] the request, which
/// assigns a fresh transaction id.
#[derive(Debug)]
pub struct ServiceRequest {
    service_name: String,
    transaction_id: String,
    parameters: BTreeMap<String, String>,
    currently_processed: Mutex<bool>,
}

impl ServiceRequest {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self::with_transaction_id(service_name, Uuid::new_v4().to_string())
    }

    pub fn with_transaction_id(
        service_name: impl Into<String>,
        transaction_id: impl Into<String>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            transaction_id: transaction_id.into(),
            parameters: BTreeMap::new(),
            currently_processed: Mutex::new(false),
        }
    }

    /// A copy of this request that is usable again: same service and
    /// parameters, fresh transaction id.
    pub fn duplicate(&self) -> ServiceRequest {
        Self {
            service_name: self.service_name.clone(),
            transaction_id: Uuid::new_v4().to_string(),
            parameters: self.parameters.clone(),
            currently_processed: Mutex::new(false),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    pub fn set_parameter(&mut self, name: impl Into<String>, value: impl ToString) {
        self.parameters.insert(name.into(), value.to_string());
    }

    pub fn parameter(&self, name: &str) -> Option<&String> {
        self.parameters.get(name)
    }

    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    pub fn is_currently_processed(&self) -> bool {
        *self.currently_processed.lock().unwrap()
    }

    /// Claims this request for one in-flight call. Fails when it is already
    /// being processed; callers must duplicate it instead.
    pub fn begin_processing(&self) -> Result<(), ServicesError> {
        let mut currently_processed = self.currently_processed.lock().unwrap();
        if *currently_processed {
            return Err(ServicesError::RequestInProcess(
                self.transaction_id.clone(),
            ));
        }
        *currently_processed = true;
        Ok(())
    }

    /// Releases the request once its response has been resolved (or the call
    /// was rejected).
    pub fn end_processing(&self) {
        *self.currently_processed.lock().unwrap() = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[test]
    fn duplicate_gets_a_fresh_transaction_id_and_keeps_parameters() {
        let mut request = ServiceRequest::new("add");
        request.set_parameter("a", 6);
        request.set_parameter("b", 5);
        request.begin_processing().unwrap();

        let duplicate = request.duplicate();

        assert_ne!(request.transaction_id(), duplicate.transaction_id());
        assert_eq!(duplicate.service_name(), "add");
        assert_eq!(duplicate.parameter("a"), Some(&"6".to_string()));
        assert_eq!(duplicate.parameter("b"), Some(&"5".to_string()));
        assert!(!duplicate.is_currently_processed());
    }

    #[test]
    fn a_request_cannot_be_claimed_twice() {
        let request = ServiceRequest::new("add");
        request.begin_processing().unwrap();

        assert!(matches!(
            request.begin_processing(),
            Err(ServicesError::RequestInProcess(_))
        ));

        request.end_processing();
        assert!(request.begin_processing().is_ok());
    }
}
