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

use async_trait::async_trait;
use bytes::Bytes;
use hive_common::ownership::Owner;
use hive_common::tracing::{init_tracing_with_default_debug_env_filter, TracingConfig};
use hive_jobsystem::{JobManager, JobsConfig};
use hive_networking::{
    ConnectionEvent, ConnectionInfo, Message, MessageConsumer, MessageEndpoint, NetworkConfig,
    NetworkingError,
};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use test_r::test;

test_r::enable!();

#[derive(Debug)]
pub struct Tracing;

impl Tracing {
    pub fn init() -> Self {
        init_tracing_with_default_debug_env_filter(&TracingConfig::test_pretty_without_time(
            "networking-tests",
        ));
        Self
    }
}

#[test_r::test_dep]
fn tracing() -> Tracing {
    Tracing::init()
}

struct TestNode {
    endpoint: Owner<MessageEndpoint>,
    job_manager: Owner<JobManager>,
}

async fn setup_node(port: u16) -> TestNode {
    let job_manager = JobManager::new(JobsConfig::default());
    job_manager.start_execution();

    let endpoint = MessageEndpoint::start(
        NetworkConfig::with_port(port),
        job_manager.create_reference(),
    )
    .await
    .expect("endpoint must start");

    TestNode {
        endpoint: Owner::new(endpoint),
        job_manager,
    }
}

struct RecordingConsumer {
    message_type: String,
    received: Mutex<Vec<(Arc<Message>, ConnectionInfo)>>,
}

impl RecordingConsumer {
    fn new(message_type: &str) -> Arc<Self> {
        Arc::new(Self {
            message_type: message_type.to_string(),
            received: Mutex::new(Vec::new()),
        })
    }

    fn received_count(&self) -> usize {
        self.received.lock().unwrap().len()
    }
}

#[async_trait]
impl MessageConsumer for RecordingConsumer {
    fn message_type(&self) -> &str {
        &self.message_type
    }

    async fn process_message(&self, message: Arc<Message>, connection_info: ConnectionInfo) {
        self.received.lock().unwrap().push((message, connection_info));
    }
}

async fn drive_until(nodes: &[&TestNode], deadline: Duration, condition: impl Fn() -> bool) {
    let give_up_at = Instant::now() + deadline;
    loop {
        for node in nodes {
            node.job_manager.invoke_cycle_and_wait().await;
        }
        if condition() {
            return;
        }
        assert!(
            Instant::now() < give_up_at,
            "condition did not become true within {deadline:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[test]
async fn connection_handshake_exchanges_node_ids(_tracing: &Tracing) {
    let node_a = setup_node(9701).await;
    let node_b = setup_node(9702).await;

    let info = node_b
        .endpoint
        .establish_connection_to("127.0.0.1:9701")
        .await
        .expect("connection must be established");

    assert_eq!(info.endpoint_id, node_a.endpoint.node_id());
    assert!(node_b.endpoint.has_connection_to(node_a.endpoint.node_id()));

    // the accepting side learns the connector's node id as well
    drive_until(&[&node_a, &node_b], Duration::from_secs(5), || {
        node_a.endpoint.has_connection_to(node_b.endpoint.node_id())
    })
    .await;

    node_a.endpoint.shutdown().await;
    node_b.endpoint.shutdown().await;
    node_a.job_manager.stop_execution().await;
    node_b.job_manager.stop_execution().await;
}

#[test]
async fn established_and_closed_events_are_emitted(_tracing: &Tracing) {
    let node_a = setup_node(9703).await;
    let node_b = setup_node(9704).await;

    let mut events = node_b.endpoint.subscribe_connection_events();

    let info = node_b
        .endpoint
        .establish_connection_to("127.0.0.1:9703")
        .await
        .unwrap();

    let established = events.recv().await.unwrap();
    assert_eq!(
        established,
        ConnectionEvent::Established {
            endpoint_id: info.endpoint_id.clone()
        }
    );

    node_b.endpoint.close_connection_to(&info.endpoint_id);
    let closed = events.recv().await.unwrap();
    assert_eq!(
        closed,
        ConnectionEvent::Closed {
            endpoint_id: info.endpoint_id
        }
    );

    node_a.endpoint.shutdown().await;
    node_b.endpoint.shutdown().await;
    node_a.job_manager.stop_execution().await;
    node_b.job_manager.stop_execution().await;
}

#[test]
async fn messages_reach_the_consumer_of_their_type(_tracing: &Tracing) {
    let node_a = setup_node(9705).await;
    let node_b = setup_node(9706).await;

    let matching_consumer = RecordingConsumer::new("test-message");
    let other_consumer = RecordingConsumer::new("other-type");
    node_a
        .endpoint
        .add_message_consumer(Arc::downgrade(
            &(matching_consumer.clone() as Arc<dyn MessageConsumer>),
        ));
    node_a
        .endpoint
        .add_message_consumer(Arc::downgrade(
            &(other_consumer.clone() as Arc<dyn MessageConsumer>),
        ));

    let info = node_b
        .endpoint
        .establish_connection_to("127.0.0.1:9705")
        .await
        .unwrap();

    let mut message = Message::new("test-message");
    message.set_attribute("content", Bytes::from("hello hive"));
    message.set_attribute("binary", Bytes::from(vec![1u8, 2, 3, 0, 255]));
    let sent_message = message.clone();
    node_b
        .endpoint
        .send(&info.endpoint_id, &message)
        .await
        .expect("send must succeed");

    drive_until(&[&node_a], Duration::from_secs(5), || {
        matching_consumer.received_count() == 1
    })
    .await;

    let received = matching_consumer.received.lock().unwrap();
    let (received_message, connection_info) = &received[0];
    assert_eq!(received_message.as_ref(), &sent_message);
    assert_eq!(connection_info.endpoint_id, node_b.endpoint.node_id());
    assert_eq!(other_consumer.received_count(), 0);
    drop(received);

    node_a.endpoint.shutdown().await;
    node_b.endpoint.shutdown().await;
    node_a.job_manager.stop_execution().await;
    node_b.job_manager.stop_execution().await;
}

#[test]
async fn sending_to_an_unknown_endpoint_fails(_tracing: &Tracing) {
    let node = setup_node(9707).await;

    let message = Message::new("test-message");
    let result = node
        .endpoint
        .send("00000000-0000-0000-0000-000000000000", &message)
        .await;

    assert!(matches!(result, Err(NetworkingError::NoSuchEndpoint(_))));

    node.endpoint.shutdown().await;
    node.job_manager.stop_execution().await;
}

#[test]
async fn broadcast_counts_successful_recipients(_tracing: &Tracing) {
    let central = setup_node(9708).await;

    let mut providers = Vec::new();
    for port in 9709..9714 {
        let provider = setup_node(port).await;
        central
            .endpoint
            .establish_connection_to(&format!("127.0.0.1:{port}"))
            .await
            .unwrap();
        providers.push(provider);
    }
    assert_eq!(central.endpoint.active_connection_count(), 5);

    let consumers: Vec<Arc<RecordingConsumer>> = providers
        .iter()
        .map(|provider| {
            let consumer = RecordingConsumer::new("announcement");
            provider
                .endpoint
                .add_message_consumer(Arc::downgrade(
                    &(consumer.clone() as Arc<dyn MessageConsumer>),
                ));
            consumer
        })
        .collect();

    let receiver = central
        .endpoint
        .issue_broadcast_as_job(Arc::new(Message::new("announcement")))
        .unwrap();

    central.job_manager.invoke_cycle_and_wait().await;
    let sent = receiver.await.unwrap();
    assert_eq!(sent, 5);

    let provider_refs: Vec<&TestNode> = providers.iter().collect();
    drive_until(&provider_refs, Duration::from_secs(5), || {
        consumers.iter().all(|consumer| consumer.received_count() == 1)
    })
    .await;

    central.endpoint.shutdown().await;
    central.job_manager.stop_execution().await;
    for provider in &providers {
        provider.endpoint.shutdown().await;
        provider.job_manager.stop_execution().await;
    }
}

#[test]
async fn broadcast_skips_unusable_connections(_tracing: &Tracing) {
    let central = setup_node(9714).await;

    let mut providers = Vec::new();
    for port in 9715..9720 {
        let provider = setup_node(port).await;
        central
            .endpoint
            .establish_connection_to(&format!("127.0.0.1:{port}"))
            .await
            .unwrap();
        providers.push(provider);
    }

    // sever two of the five peers; their read loops observe the reset
    for provider in providers.drain(0..2) {
        provider.endpoint.shutdown().await;
        provider.job_manager.stop_execution().await;
    }

    drive_until(&[&central], Duration::from_secs(5), || {
        central.endpoint.active_connection_count() == 3
    })
    .await;

    let receiver = central
        .endpoint
        .issue_broadcast_as_job(Arc::new(Message::new("announcement")))
        .unwrap();
    central.job_manager.invoke_cycle_and_wait().await;
    assert_eq!(receiver.await.unwrap(), 3);

    central.endpoint.shutdown().await;
    central.job_manager.stop_execution().await;
    for provider in &providers {
        provider.endpoint.shutdown().await;
        provider.job_manager.stop_execution().await;
    }
}

#[test]
async fn severed_connections_are_cleaned_up(_tracing: &Tracing) {
    let node_a = setup_node(9720).await;

    {
        let node_b = setup_node(9721).await;
        node_b
            .endpoint
            .establish_connection_to("127.0.0.1:9720")
            .await
            .unwrap();

        drive_until(&[&node_a, &node_b], Duration::from_secs(5), || {
            node_a.endpoint.active_connection_count() == 1
        })
        .await;

        node_b.endpoint.shutdown().await;
        node_b.job_manager.stop_execution().await;
    }

    drive_until(&[&node_a], Duration::from_secs(5), || {
        node_a.endpoint.active_connection_count() == 0
    })
    .await;

    node_a.endpoint.shutdown().await;
    node_a.job_manager.stop_execution().await;
}

#[test]
async fn duplicate_connection_replaces_the_older_one(_tracing: &Tracing) {
    let node_a = setup_node(9722).await;
    let node_b = setup_node(9723).await;

    let first = node_b
        .endpoint
        .establish_connection_to("127.0.0.1:9722")
        .await
        .unwrap();
    // let the accepting side finish registering the first connection before
    // the second one replaces it
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = node_b
        .endpoint
        .establish_connection_to("127.0.0.1:9722")
        .await
        .unwrap();

    assert_eq!(first.endpoint_id, second.endpoint_id);
    assert_eq!(
        node_b
            .endpoint
            .active_connection_count(),
        1
    );

    // the remaining connection must still work
    node_b
        .endpoint
        .send(&second.endpoint_id, &Message::new("test-message"))
        .await
        .expect("the replacing connection must be usable");

    node_a.endpoint.shutdown().await;
    node_b.endpoint.shutdown().await;
    node_a.job_manager.stop_execution().await;
    node_b.job_manager.stop_execution().await;
}
