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

use crate::config::NetworkConfig;
use crate::error::NetworkingError;
use crate::messaging::connection::{Connection, ConnectionInfo, PONG_FRAME, PROBE_FRAME};
use crate::messaging::consumer::{message_consumer_job, MessageConsumer};
use crate::messaging::converter::from_multipart_form_data;
use crate::messaging::events::ConnectionEvent;
use crate::messaging::message::Message;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use hive_common::ownership::Reference;
use hive_jobsystem::{Job, JobContinuation, JobExecutionPhase, JobManager};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, oneshot, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

type FramedRead = tokio_util::codec::FramedRead<OwnedReadHalf, tokio_util::codec::LengthDelimitedCodec>;
type FramedWrite =
    tokio_util::codec::FramedWrite<OwnedWriteHalf, tokio_util::codec::LengthDelimitedCodec>;

/// The local message-oriented transport of a node. It owns inbound
/// connections from peers, establishes outbound connections to URIs, and
/// delivers typed messages to the consumers registered for their type.
///
/// Peers are addressed by their node uuid, exchanged during the connection
/// handshake. Received messages never run consumers on the I/O task; each
/// delivery is scheduled as a job.
pub struct MessageEndpoint {
    inner: Arc<EndpointInner>,
    listener_task: Mutex<Option<JoinHandle<()>>>,
}

struct EndpointInner {
    node_id: String,
    config: NetworkConfig,
    connections: RwLock<HashMap<String, Arc<Connection>>>,
    consumers: RwLock<HashMap<String, Vec<Weak<dyn MessageConsumer>>>>,
    events: broadcast::Sender<ConnectionEvent>,
    job_manager: Reference<JobManager>,
    running: AtomicBool,
}

impl MessageEndpoint {
    /// Starts the endpoint: binds the connection listener (unless disabled
    /// via `net.server.auto-init`) and schedules the periodic connection
    /// clean-up job.
    pub async fn start(
        config: NetworkConfig,
        job_manager: Reference<JobManager>,
    ) -> Result<MessageEndpoint, NetworkingError> {
        let node_id = match &config.node.id {
            Some(id) => id.clone(),
            None => Uuid::new_v4().to_string(),
        };

        let (events, _) = broadcast::channel(1024);

        let inner = Arc::new(EndpointInner {
            node_id,
            config: config.clone(),
            connections: RwLock::new(HashMap::new()),
            consumers: RwLock::new(HashMap::new()),
            events,
            job_manager,
            running: AtomicBool::new(true),
        });

        let listener_task = if config.server.auto_init {
            let bind_address = format!("{}:{}", config.address, config.port);
            let listener = TcpListener::bind(&bind_address).await.map_err(|err| {
                NetworkingError::ConnectionFailed(format!(
                    "cannot bind connection listener to {bind_address}: {err}"
                ))
            })?;
            info!(
                address = bind_address.as_str(),
                node_id = inner.node_id.as_str(),
                "message endpoint is listening for peers"
            );
            Some(tokio::spawn(accept_loop(inner.clone(), listener)))
        } else {
            None
        };

        let endpoint = MessageEndpoint {
            inner,
            listener_task: Mutex::new(listener_task),
        };
        endpoint.setup_clean_up_job();
        Ok(endpoint)
    }

    /// This endpoint's node uuid, presented to peers during handshakes.
    pub fn node_id(&self) -> &str {
        &self.inner.node_id
    }

    /// Subscribes to connection lifecycle events.
    pub fn subscribe_connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// Registers a consumer for its message type. The registration is weak:
    /// dropped consumers are pruned during clean-up.
    pub fn add_message_consumer(&self, consumer: Weak<dyn MessageConsumer>) {
        match consumer.upgrade() {
            Some(live_consumer) => {
                let message_type = live_consumer.message_type().to_string();
                self.inner
                    .consumers
                    .write()
                    .unwrap()
                    .entry(message_type.clone())
                    .or_default()
                    .push(consumer);
                debug!(
                    message_type = message_type.as_str(),
                    "added message consumer"
                );
            }
            None => {
                warn!("given message consumer has already expired and cannot be added");
            }
        }
    }

    /// Establishes a connection to another endpoint. The URI may be given as
    /// `host:port` or `tcp://host:port`.
    pub async fn establish_connection_to(
        &self,
        uri: &str,
    ) -> Result<ConnectionInfo, NetworkingError> {
        let (host, port) = parse_endpoint_uri(uri)?;

        let mut addresses = tokio::net::lookup_host((host.as_str(), port))
            .await
            .map_err(|_| NetworkingError::CannotResolveHost(host.clone()))?;
        let address = addresses
            .next()
            .ok_or_else(|| NetworkingError::CannotResolveHost(host.clone()))?;

        let stream = TcpStream::connect(address).await.map_err(|err| {
            NetworkingError::ConnectionFailed(format!("cannot connect to {uri}: {err}"))
        })?;

        let (read_half, write_half) = stream.into_split();
        let codec = tokio_util::codec::LengthDelimitedCodec::new();
        let mut framed_read = FramedRead::new(read_half, codec.clone());
        let mut framed_write = FramedWrite::new(write_half, codec);

        // write our node uuid first, then read the peer's
        let endpoint_id = timeout(self.inner.config.handshake_timeout, async {
            send_handshake_frame(&mut framed_write, &self.inner.node_id).await?;
            read_handshake_frame(&mut framed_read).await
        })
        .await
        .map_err(|_| {
            NetworkingError::ConnectionFailed(format!("handshake with {uri} timed out"))
        })??;

        let info = ConnectionInfo {
            hostname: uri.to_string(),
            endpoint_id: endpoint_id.clone(),
        };

        add_connection(&self.inner, info.clone(), framed_read, framed_write);
        Ok(info)
    }

    /// Closes the connection to the given endpoint (if one is established).
    pub fn close_connection_to(&self, endpoint_id: &str) {
        let removed = self
            .inner
            .connections
            .write()
            .unwrap()
            .remove(endpoint_id);
        if let Some(connection) = removed {
            connection.close();
            self.inner.fire_event(ConnectionEvent::Closed {
                endpoint_id: endpoint_id.to_string(),
            });
        }
    }

    pub fn has_connection_to(&self, endpoint_id: &str) -> bool {
        self.inner.has_usable_connection_to(endpoint_id)
    }

    /// Counts active and usable connections of this endpoint.
    pub fn active_connection_count(&self) -> usize {
        self.inner
            .connections
            .read()
            .unwrap()
            .values()
            .filter(|connection| connection.is_usable())
            .count()
    }

    /// Sends a message to the endpoint with the given node uuid. Fails with
    /// [`NetworkingError::NoSuchEndpoint`] when no usable connection exists.
    pub async fn send(&self, endpoint_id: &str, message: &Message) -> Result<(), NetworkingError> {
        let connection = self
            .inner
            .usable_connection_to(endpoint_id)
            .ok_or_else(|| NetworkingError::NoSuchEndpoint(endpoint_id.to_string()))?;
        connection.send(message).await
    }

    /// Enqueues a job that sends the message over every currently usable
    /// connection. The returned future resolves with the count of successful
    /// sends; partial failures do not abort the remaining sends.
    pub fn issue_broadcast_as_job(
        &self,
        message: Arc<Message>,
    ) -> Result<oneshot::Receiver<usize>, NetworkingError> {
        let (result_sender, result_receiver) = oneshot::channel();
        let result_sender = Arc::new(Mutex::new(Some(result_sender)));
        let weak_inner = Arc::downgrade(&self.inner);

        let job = Job::new(
            format!("broadcast-message-{}", message.id()),
            JobExecutionPhase::Main,
            move |_context| {
                let weak_inner = weak_inner.clone();
                let message = message.clone();
                let result_sender = result_sender.clone();
                async move {
                    let Some(inner) = weak_inner.upgrade() else {
                        return JobContinuation::Dispose;
                    };

                    let connections: Vec<Arc<Connection>> = {
                        let connections = inner.connections.read().unwrap();
                        connections
                            .values()
                            .filter(|connection| connection.is_usable())
                            .cloned()
                            .collect()
                    };

                    let mut sent = 0;
                    for connection in connections {
                        match connection.send(&message).await {
                            Ok(()) => sent += 1,
                            Err(err) => {
                                warn!(
                                    endpoint_id = connection.endpoint_id(),
                                    %err,
                                    "failed to broadcast message to endpoint"
                                );
                            }
                        }
                    }

                    if let Some(sender) = result_sender.lock().unwrap().take() {
                        let _ = sender.send(sent);
                    }
                    JobContinuation::Dispose
                }
            },
        );

        self.inner.job_manager.borrow()?.kick_job(Arc::new(job));
        Ok(result_receiver)
    }

    /// Shuts the endpoint down: stops the listener and closes every
    /// connection, firing `ConnectionClosed` for each.
    pub async fn shutdown(&self) {
        self.inner.running.store(false, Ordering::Release);

        if let Some(task) = self.listener_task.lock().unwrap().take() {
            task.abort();
        }

        let connections: Vec<(String, Arc<Connection>)> = {
            let mut connections = self.inner.connections.write().unwrap();
            connections.drain().collect()
        };
        for (endpoint_id, connection) in connections {
            connection.close();
            self.inner
                .fire_event(ConnectionEvent::Closed { endpoint_id });
        }

        debug!(
            node_id = self.inner.node_id.as_str(),
            "local message endpoint has been shut down"
        );
    }

    /// Periodically prunes unusable connections (firing `ConnectionClosed`)
    /// and expired consumer registrations.
    fn setup_clean_up_job(&self) {
        let weak_inner = Arc::downgrade(&self.inner);
        let clean_up_job = Job::timer(
            format!("endpoint-clean-up-{}", self.inner.config.port),
            self.inner.config.cleanup_interval,
            JobExecutionPhase::CleanUp,
            move |_context| {
                let weak_inner = weak_inner.clone();
                async move {
                    let Some(inner) = weak_inner.upgrade() else {
                        return JobContinuation::Dispose;
                    };

                    inner.prune_expired_consumers();

                    let dead: Vec<(String, Arc<Connection>)> = {
                        let mut connections = inner.connections.write().unwrap();
                        let dead_ids: Vec<String> = connections
                            .iter()
                            .filter(|(_, connection)| !connection.is_usable())
                            .map(|(id, _)| id.clone())
                            .collect();
                        dead_ids
                            .into_iter()
                            .filter_map(|id| connections.remove(&id).map(|conn| (id, conn)))
                            .collect()
                    };

                    if !dead.is_empty() {
                        info!("cleaned up {} unusable or dead connections", dead.len());
                    }
                    for (endpoint_id, connection) in dead {
                        connection.close();
                        inner.fire_event(ConnectionEvent::Closed { endpoint_id });
                    }

                    JobContinuation::Requeue
                }
            },
        );

        match self.inner.job_manager.try_borrow() {
            Some(job_manager) => job_manager.kick_job(Arc::new(clean_up_job)),
            None => warn!(
                "cannot set up connection clean-up job because the job system is not available"
            ),
        }
    }
}

impl Drop for MessageEndpoint {
    fn drop(&mut self) {
        self.inner.running.store(false, Ordering::Release);
        if let Some(task) = self.listener_task.lock().unwrap().take() {
            task.abort();
        }
        for connection in self.inner.connections.write().unwrap().values() {
            connection.close();
        }
    }
}

impl EndpointInner {
    fn fire_event(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }

    fn usable_connection_to(&self, endpoint_id: &str) -> Option<Arc<Connection>> {
        self.connections
            .read()
            .unwrap()
            .get(endpoint_id)
            .filter(|connection| connection.is_usable())
            .cloned()
    }

    fn has_usable_connection_to(&self, endpoint_id: &str) -> bool {
        self.usable_connection_to(endpoint_id).is_some()
    }

    fn prune_expired_consumers(&self) {
        let mut consumers = self.consumers.write().unwrap();
        for registrations in consumers.values_mut() {
            registrations.retain(|consumer| consumer.upgrade().is_some());
        }
        consumers.retain(|_, registrations| !registrations.is_empty());
    }

    fn consumers_of_message_type(&self, message_type: &str) -> Vec<Arc<dyn MessageConsumer>> {
        self.consumers
            .read()
            .unwrap()
            .get(message_type)
            .map(|registrations| {
                registrations
                    .iter()
                    .filter_map(|consumer| consumer.upgrade())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Accepts inbound connections, bounding concurrent handshakes by the
/// configured thread count.
async fn accept_loop(inner: Arc<EndpointInner>, listener: TcpListener) {
    let handshake_limit = Arc::new(Semaphore::new(inner.config.threads.max(1)));

    loop {
        match listener.accept().await {
            Ok((stream, peer_address)) => {
                if !inner.running.load(Ordering::Acquire) {
                    break;
                }
                let Ok(permit) = handshake_limit.clone().acquire_owned().await else {
                    break;
                };
                let inner = inner.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(err) =
                        handle_inbound_connection(inner, stream, peer_address).await
                    {
                        warn!(peer = %peer_address, %err, "inbound connection rejected");
                    }
                });
            }
            Err(err) => {
                if !inner.running.load(Ordering::Acquire) {
                    break;
                }
                warn!(%err, "failed to accept inbound connection");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn handle_inbound_connection(
    inner: Arc<EndpointInner>,
    stream: TcpStream,
    peer_address: SocketAddr,
) -> Result<(), NetworkingError> {
    let (read_half, write_half) = stream.into_split();
    let codec = tokio_util::codec::LengthDelimitedCodec::new();
    let mut framed_read = FramedRead::new(read_half, codec.clone());
    let mut framed_write = FramedWrite::new(write_half, codec);

    // the connecting side talks first: read the peer's node uuid, then
    // answer with ours
    let endpoint_id = timeout(inner.config.handshake_timeout, async {
        let peer_id = read_handshake_frame(&mut framed_read).await?;
        send_handshake_frame(&mut framed_write, &inner.node_id).await?;
        Ok::<_, NetworkingError>(peer_id)
    })
    .await
    .map_err(|_| {
        NetworkingError::ConnectionFailed(format!("handshake with {peer_address} timed out"))
    })??;

    let info = ConnectionInfo {
        hostname: peer_address.to_string(),
        endpoint_id,
    };
    add_connection(&inner, info, framed_read, framed_write);
    Ok(())
}

async fn send_handshake_frame(
    framed_write: &mut FramedWrite,
    node_id: &str,
) -> Result<(), NetworkingError> {
    framed_write
        .send(Bytes::copy_from_slice(node_id.as_bytes()))
        .await
        .map_err(|err| NetworkingError::ConnectionFailed(format!("handshake write failed: {err}")))
}

async fn read_handshake_frame(framed_read: &mut FramedRead) -> Result<String, NetworkingError> {
    let frame = framed_read
        .next()
        .await
        .ok_or_else(|| {
            NetworkingError::ConnectionFailed("connection closed during handshake".to_string())
        })?
        .map_err(|err| {
            NetworkingError::ConnectionFailed(format!("handshake read failed: {err}"))
        })?;

    let peer_id = std::str::from_utf8(&frame)
        .map_err(|_| {
            NetworkingError::ConnectionFailed("peer sent a non-UTF-8 node id".to_string())
        })?
        .to_string();

    Uuid::parse_str(&peer_id).map_err(|_| {
        NetworkingError::ConnectionFailed(format!("peer sent an invalid node id '{peer_id}'"))
    })?;

    Ok(peer_id)
}

/// Inserts a freshly handshaken connection into the map and starts its read
/// loop. An existing connection with the same remote endpoint id is closed
/// and replaced.
fn add_connection(
    inner: &Arc<EndpointInner>,
    info: ConnectionInfo,
    framed_read: FramedRead,
    framed_write: FramedWrite,
) {
    let connection = Arc::new(Connection::new(info.clone(), framed_write));

    let read_task = tokio::spawn(read_loop(
        inner.clone(),
        connection.clone(),
        framed_read,
    ));
    connection.set_read_task(read_task);

    let replaced = {
        let mut connections = inner.connections.write().unwrap();
        connections.insert(info.endpoint_id.clone(), connection)
    };
    if let Some(old_connection) = replaced {
        debug!(
            endpoint_id = info.endpoint_id.as_str(),
            "replacing existing connection to endpoint"
        );
        old_connection.close();
    }

    debug!(
        endpoint_id = info.endpoint_id.as_str(),
        hostname = info.hostname.as_str(),
        "connection established"
    );
    inner.fire_event(ConnectionEvent::Established {
        endpoint_id: info.endpoint_id,
    });
}

/// Reads frames off one connection until it breaks. Idle periods trigger a
/// liveness probe; a second silent period marks the connection unusable.
async fn read_loop(inner: Arc<EndpointInner>, connection: Arc<Connection>, mut read: FramedRead) {
    let idle_timeout = inner.config.idle_timeout;
    let mut probe_outstanding = false;

    loop {
        match timeout(idle_timeout, read.next()).await {
            Err(_elapsed) => {
                if probe_outstanding {
                    debug!(
                        endpoint_id = connection.endpoint_id(),
                        "connection stayed silent after liveness probe"
                    );
                    connection.mark_unusable();
                    break;
                }
                probe_outstanding = true;
                if connection
                    .send_raw(Bytes::from_static(&[PROBE_FRAME]))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Ok(None) => {
                debug!(
                    endpoint_id = connection.endpoint_id(),
                    "connection reached end of stream"
                );
                connection.mark_unusable();
                break;
            }
            Ok(Some(Err(err))) => {
                debug!(
                    endpoint_id = connection.endpoint_id(),
                    %err,
                    "connection read failed"
                );
                connection.mark_unusable();
                break;
            }
            Ok(Some(Ok(frame))) => {
                probe_outstanding = false;
                if frame.len() == 1 {
                    if frame[0] == PROBE_FRAME {
                        let _ = connection.send_raw(Bytes::from_static(&[PONG_FRAME])).await;
                    }
                    // PONG frames only reset the idle window
                    continue;
                }
                process_received_frame(&inner, &frame, &connection);
            }
        }
    }

    remove_closed_connection(&inner, &connection);
}

/// Deserializes a received frame and fans it out to the consumers of its
/// message type, one scheduled job per consumer.
fn process_received_frame(inner: &Arc<EndpointInner>, frame: &[u8], connection: &Arc<Connection>) {
    if !inner.running.load(Ordering::Acquire) {
        return;
    }

    let message = match from_multipart_form_data(frame) {
        Ok(message) => Arc::new(message),
        Err(err) => {
            warn!(
                hostname = connection.info().hostname.as_str(),
                %err,
                "received message contained invalid payload"
            );
            return;
        }
    };

    let consumers = inner.consumers_of_message_type(message.message_type());
    debug!(
        message_type = message.message_type(),
        consumer_count = consumers.len(),
        "received message"
    );
    if consumers.is_empty() {
        debug!(
            message_type = message.message_type(),
            "no consumer registered for received message type; message dropped"
        );
        return;
    }

    match inner.job_manager.try_borrow() {
        Some(job_manager) => {
            for consumer in consumers {
                let job =
                    message_consumer_job(consumer, message.clone(), connection.info().clone());
                job_manager.kick_job(Arc::new(job));
            }
        }
        None => {
            warn!("cannot dispatch received message because the job system is not available");
        }
    }
}

/// Removes a connection whose read loop has terminated, firing
/// `ConnectionClosed` if it was still the registered connection for its
/// endpoint id.
fn remove_closed_connection(inner: &Arc<EndpointInner>, connection: &Arc<Connection>) {
    if !inner.running.load(Ordering::Acquire) {
        return;
    }

    let removed = {
        let mut connections = inner.connections.write().unwrap();
        match connections.get(connection.endpoint_id()) {
            Some(current) if Arc::ptr_eq(current, connection) => {
                connections.remove(connection.endpoint_id())
            }
            _ => None,
        }
    };

    if removed.is_some() {
        inner.fire_event(ConnectionEvent::Closed {
            endpoint_id: connection.endpoint_id().to_string(),
        });
    }
}

/// Parses `host:port` or `scheme://host:port` into its parts.
fn parse_endpoint_uri(uri: &str) -> Result<(String, u16), NetworkingError> {
    let normalized = if uri.contains("://") {
        uri.to_string()
    } else {
        format!("tcp://{uri}")
    };

    let parsed = url::Url::parse(&normalized)
        .map_err(|_| NetworkingError::UrlMalformed(uri.to_string()))?;

    let host = parsed
        .host_str()
        .ok_or_else(|| NetworkingError::UrlMalformed(uri.to_string()))?
        .to_string();
    let port = parsed
        .port()
        .ok_or_else(|| NetworkingError::UrlMalformed(uri.to_string()))?;

    Ok((host, port))
}
