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

use std::sync::Mutex;
use tokio::sync::Notify;

/// Tracks the completion of a set of jobs. Every unfinished job attached to
/// the counter increments it, every finishing job decrements it; a value of
/// zero means all attached jobs have completed. This is the main
/// synchronization primitive of the job system.
pub struct JobCounter {
    count: Mutex<usize>,
    notify: Notify,
}

impl JobCounter {
    pub fn new() -> Self {
        Self {
            count: Mutex::new(0),
            notify: Notify::new(),
        }
    }

    pub fn increase(&self) {
        let mut count = self.count.lock().unwrap();
        *count += 1;
    }

    pub fn decrease(&self) {
        let mut count = self.count.lock().unwrap();
        debug_assert!(*count > 0, "job counter must not drop below zero");
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.notify.notify_waiters();
        }
    }

    pub fn is_finished(&self) -> bool {
        *self.count.lock().unwrap() == 0
    }

    /// Suspends the caller until the counter reaches zero. Returns
    /// immediately if no jobs are attached.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_finished() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for JobCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use test_r::test;

    #[test]
    async fn wait_returns_immediately_when_nothing_is_attached() {
        let counter = JobCounter::new();
        counter.wait().await;
        assert!(counter.is_finished());
    }

    #[test]
    async fn wait_resolves_once_all_decrements_arrived() {
        let counter = Arc::new(JobCounter::new());
        counter.increase();
        counter.increase();
        assert!(!counter.is_finished());

        let counter_clone = counter.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            counter_clone.decrease();
            counter_clone.decrease();
        });

        counter.wait().await;
        assert!(counter.is_finished());
    }
}
