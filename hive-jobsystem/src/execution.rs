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

use futures::future::BoxFuture;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

pub(crate) type ExecutionItem = BoxFuture<'static, ()>;

/// The worker pool of the job system: a bounded dispatch channel drained by a
/// fixed number of worker tasks. Workers pop an execution item and run it as
/// a detached task, so a suspended job never occupies a worker.
pub(crate) struct JobExecution {
    sender: Mutex<Option<mpsc::Sender<ExecutionItem>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl JobExecution {
    pub fn new() -> Self {
        Self {
            sender: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn start(&self, concurrency: usize, queue_capacity: usize) {
        let mut sender = self.sender.lock().unwrap();
        if sender.is_some() {
            return;
        }

        let (tx, rx) = mpsc::channel::<ExecutionItem>(queue_capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut workers = self.workers.lock().unwrap();
        for worker_index in 0..concurrency.max(1) {
            let rx = rx.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    let item = { rx.lock().await.recv().await };
                    match item {
                        Some(work) => {
                            tokio::spawn(work);
                        }
                        None => break,
                    }
                }
                debug!(worker_index, "job worker stopped");
            }));
        }

        *sender = Some(tx);
    }

    pub fn is_running(&self) -> bool {
        self.sender.lock().unwrap().is_some()
    }

    /// Hands an execution item to the workers. Suspends when the dispatch
    /// channel is full. Returns false when the execution is stopped.
    pub async fn dispatch(&self, item: ExecutionItem) -> bool {
        let sender = self.sender.lock().unwrap().clone();
        match sender {
            Some(sender) => sender.send(item).await.is_ok(),
            None => false,
        }
    }

    /// Stops accepting new work and joins the worker tasks. Jobs already
    /// spawned by the workers keep running to completion on the runtime.
    pub async fn stop(&self) {
        let sender = self.sender.lock().unwrap().take();
        drop(sender);

        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        for worker in workers {
            let _ = worker.await;
        }
    }
}
