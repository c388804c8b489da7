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

use crate::error::NetworkingError;
use crate::messaging::converter::to_multipart_form_data;
use crate::messaging::message::Message;
use bytes::Bytes;
use futures::SinkExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedWrite, LengthDelimitedCodec};

/// Single-byte liveness probe frame sent on an idle connection.
pub(crate) const PROBE_FRAME: u8 = 0x00;
/// Single-byte answer to a liveness probe.
pub(crate) const PONG_FRAME: u8 = 0x01;

/// Address information of an established connection to a remote endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Transport URI of the remote side (or its socket address for inbound
    /// connections).
    pub hostname: String,
    /// Node uuid of the remote endpoint, exchanged in the handshake.
    pub endpoint_id: String,
}

/// One established connection to a remote endpoint. Writes are serialized by
/// a per-connection lock to preserve frame boundaries; reads happen in a
/// dedicated loop owned by the endpoint.
pub struct Connection {
    info: ConnectionInfo,
    write: tokio::sync::Mutex<FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>>,
    usable: AtomicBool,
    read_task: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    pub(crate) fn new(
        info: ConnectionInfo,
        write: FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>,
    ) -> Self {
        Self {
            info,
            write: tokio::sync::Mutex::new(write),
            usable: AtomicBool::new(true),
            read_task: Mutex::new(None),
        }
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    pub fn endpoint_id(&self) -> &str {
        &self.info.endpoint_id
    }

    pub fn is_usable(&self) -> bool {
        self.usable.load(Ordering::Acquire)
    }

    pub(crate) fn mark_unusable(&self) {
        self.usable.store(false, Ordering::Release);
    }

    pub(crate) fn set_read_task(&self, handle: JoinHandle<()>) {
        *self.read_task.lock().unwrap() = Some(handle);
    }

    /// Sends one message over this connection.
    pub async fn send(&self, message: &Message) -> Result<(), NetworkingError> {
        if !self.is_usable() {
            return Err(NetworkingError::ConnectionClosed(format!(
                "connection to endpoint '{}' is no longer usable",
                self.info.endpoint_id
            )));
        }

        let payload = to_multipart_form_data(message)?;
        self.send_raw(payload).await
    }

    pub(crate) async fn send_raw(&self, payload: Bytes) -> Result<(), NetworkingError> {
        let mut write = self.write.lock().await;
        write.send(payload).await.map_err(|err| {
            self.mark_unusable();
            NetworkingError::MessageSending(format!(
                "sending to endpoint '{}' failed: {err}",
                self.info.endpoint_id
            ))
        })
    }

    /// Marks the connection unusable and stops its read loop. The underlying
    /// socket closes once the connection is dropped from the map.
    pub(crate) fn close(&self) {
        self.mark_unusable();
        if let Some(task) = self.read_task.lock().unwrap().take() {
            task.abort();
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}
