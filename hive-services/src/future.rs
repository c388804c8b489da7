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
use crate::response::ServiceResponse;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Creates a linked promise/future pair for one service call.
pub fn response_channel() -> (ResponsePromise, ResponseFuture) {
    let (sender, receiver) = oneshot::channel();
    (ResponsePromise { sender }, ResponseFuture { receiver })
}

/// The resolving side of a service call. Consumed by resolving with a
/// response or rejecting with an error.
pub struct ResponsePromise {
    sender: oneshot::Sender<Result<ServiceResponse, ServicesError>>,
}

impl ResponsePromise {
    pub fn resolve(self, response: ServiceResponse) {
        let _ = self.sender.send(Ok(response));
    }

    pub fn reject(self, error: ServicesError) {
        let _ = self.sender.send(Err(error));
    }
}

/// The awaiting side of a service call. Dropping it does not recall the
/// call; a late response is dropped at lookup instead.
pub struct ResponseFuture {
    receiver: oneshot::Receiver<Result<ServiceResponse, ServicesError>>,
}

impl Future for ResponseFuture {
    type Output = Result<ServiceResponse, ServicesError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(|result| {
            result.unwrap_or_else(|_| {
                Err(ServicesError::CallFailed(
                    "the response promise was dropped without resolution".to_string(),
                ))
            })
        })
    }
}
