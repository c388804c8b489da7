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

use crate::messaging::connection::ConnectionInfo;
use crate::messaging::message::Message;
use async_trait::async_trait;
use hive_jobsystem::{Job, JobContinuation, JobExecutionPhase};
use std::sync::Arc;

/// Receives messages of a single type from the endpoint. Consumers are
/// registered weakly; once the owning side drops its consumer, the endpoint
/// prunes the registration.
#[async_trait]
pub trait MessageConsumer: Send + Sync {
    /// The message type this consumer is subscribed to.
    fn message_type(&self) -> &str;

    /// Processes a received message. Runs as a scheduled job, never on the
    /// connection's I/O task.
    async fn process_message(&self, message: Arc<Message>, connection_info: ConnectionInfo);
}

/// Wraps the delivery of one message to one consumer into a job. Consumer
/// jobs are asynchronous: a consumer that suspends for a long time (e.g. on
/// a slow service execution) must not stall the execution cycle.
pub(crate) fn message_consumer_job(
    consumer: Arc<dyn MessageConsumer>,
    message: Arc<Message>,
    connection_info: ConnectionInfo,
) -> Job {
    let job_id = format!(
        "consume-{}-message-{}",
        message.message_type(),
        message.id()
    );
    Job::new_async(job_id, JobExecutionPhase::Main, move |_context| {
        let consumer = consumer.clone();
        let message = message.clone();
        let connection_info = connection_info.clone();
        async move {
            consumer.process_message(message, connection_info).await;
            JobContinuation::Dispose
        }
    })
}
