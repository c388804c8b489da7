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

pub mod caller;
pub mod error;
pub mod events;
pub mod executor;
pub mod future;
pub mod registry;
pub mod request;
pub mod response;

pub use caller::{RetryPolicy, RoundRobinServiceCaller};
pub use error::ServicesError;
pub use events::ServiceEvent;
pub use executor::local::LocalServiceExecutor;
pub use executor::remote::RemoteServiceExecutor;
pub use executor::ServiceExecutor;
pub use future::{ResponseFuture, ResponsePromise};
pub use registry::ServiceRegistry;
pub use request::ServiceRequest;
pub use response::{ServiceResponse, ServiceResponseStatus};

#[cfg(test)]
test_r::enable!();
