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

use crate::config::JobsConfig;
use crate::context::JobContext;
use crate::counter::JobCounter;
use crate::execution::JobExecution;
use crate::job::{Job, JobContinuation, JobExecutionPhase, JobState};
use futures::FutureExt;
use hive_common::ownership::{Owner, Reference};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Current state of the job manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobManagerState {
    /// Collecting jobs; no execution cycle is running.
    Ready,
    /// Executing the initialization phase of a cycle.
    CycleInit,
    /// Executing the main phase of a cycle.
    CycleMain,
    /// Executing the clean-up phase of a cycle.
    CycleCleanUp,
}

/// Controls the progress of execution cycles and holds all job instances
/// that must be executed in the current or following cycles.
///
/// Jobs are collected in per-phase queues, executed phase by phase when
/// [`JobManager::invoke_cycle_and_wait`] is driven: the initialization phase
/// completes before the main phase starts, which completes before clean-up
/// starts. Jobs flagged as asynchronous are scheduled with their phase but
/// not awaited by the cycle.
pub struct JobManager {
    config: JobsConfig,
    init_queue: Mutex<VecDeque<Arc<Job>>>,
    main_queue: Mutex<VecDeque<Arc<Job>>>,
    clean_up_queue: Mutex<VecDeque<Arc<Job>>>,
    /// Jobs parked for an upcoming cycle (requeued or not yet ready).
    next_cycle_queue: Mutex<VecDeque<Arc<Job>>>,
    /// Jobs whose automatic requeue must be intercepted, typically because
    /// they were detached while already in flight.
    requeue_blacklist: Mutex<HashSet<String>>,
    /// Wakes a running phase when jobs are kicked mid-cycle, so follow-up
    /// jobs of suspended jobs get scheduled instead of deadlocking the phase.
    queue_activity: tokio::sync::Notify,
    state: Mutex<JobManagerState>,
    execution: JobExecution,
    total_cycle_count: AtomicU64,
    self_reference: Reference<JobManager>,
}

impl JobManager {
    pub fn new(config: JobsConfig) -> Owner<JobManager> {
        Owner::new_cyclic(|self_reference| JobManager {
            config,
            init_queue: Mutex::new(VecDeque::new()),
            main_queue: Mutex::new(VecDeque::new()),
            clean_up_queue: Mutex::new(VecDeque::new()),
            next_cycle_queue: Mutex::new(VecDeque::new()),
            requeue_blacklist: Mutex::new(HashSet::new()),
            queue_activity: tokio::sync::Notify::new(),
            state: Mutex::new(JobManagerState::Ready),
            execution: JobExecution::new(),
            total_cycle_count: AtomicU64::new(0),
            self_reference,
        })
    }

    /// Spins up the worker pool. Jobs are only processed while the execution
    /// is active; otherwise they pile up in their queues.
    pub fn start_execution(&self) {
        self.execution
            .start(self.config.concurrency, self.config.queue_capacity);
    }

    /// Stops the worker pool and joins its workers.
    pub async fn stop_execution(&self) {
        self.execution.stop().await;
    }

    pub fn state(&self) -> JobManagerState {
        *self.state.lock().unwrap()
    }

    pub fn total_cycle_count(&self) -> u64 {
        self.total_cycle_count.load(Ordering::Relaxed)
    }

    fn set_state(&self, state: JobManagerState) {
        *self.state.lock().unwrap() = state;
    }

    fn queue(&self, phase: JobExecutionPhase) -> &Mutex<VecDeque<Arc<Job>>> {
        match phase {
            JobExecutionPhase::Init => &self.init_queue,
            JobExecutionPhase::Main => &self.main_queue,
            JobExecutionPhase::CleanUp => &self.clean_up_queue,
        }
    }

    /// Enqueues a job for the phase queue of the current cycle (or the next
    /// one, if no cycle is currently running).
    pub fn kick_job(&self, job: Arc<Job>) {
        job.set_state(JobState::Queued);
        self.queue(job.phase()).lock().unwrap().push_back(job);
        self.queue_activity.notify_one();
    }

    /// Enqueues a job for the upcoming cycle, excluding it from the current
    /// one.
    pub fn kick_job_for_next_cycle(&self, job: Arc<Job>) {
        job.set_state(JobState::Queued);
        self.next_cycle_queue.lock().unwrap().push_back(job);
    }

    /// Ensures a job that is not yet executing will not be executed (again).
    /// Queued instances are removed; a job already in flight has its requeue
    /// intercepted instead. Best effort: an executing job runs to completion.
    pub fn detach_job(&self, job_id: &str) {
        let mut removed = false;
        for queue in [
            &self.init_queue,
            &self.main_queue,
            &self.clean_up_queue,
            &self.next_cycle_queue,
        ] {
            let mut queue = queue.lock().unwrap();
            let before = queue.len();
            queue.retain(|job| {
                if job.id() == job_id {
                    job.set_state(JobState::Detached);
                    false
                } else {
                    true
                }
            });
            removed |= queue.len() != before;
        }

        if !removed {
            self.requeue_blacklist
                .lock()
                .unwrap()
                .insert(job_id.to_string());
        }
    }

    fn is_requeue_blacklisted(&self, job_id: &str) -> bool {
        self.requeue_blacklist.lock().unwrap().contains(job_id)
    }

    fn handle_continuation(&self, job: Arc<Job>, continuation: JobContinuation) {
        match continuation {
            JobContinuation::Dispose => job.set_state(JobState::Detached),
            JobContinuation::Requeue => {
                if self.is_requeue_blacklisted(job.id()) {
                    debug!(job_id = job.id(), "requeue of detached job discarded");
                    job.set_state(JobState::Detached);
                } else {
                    self.kick_job_for_next_cycle(job);
                }
            }
        }
    }

    /// Schedules every ready job of the given phase queue, attaching
    /// `counter` to the synchronous ones. Jobs that are not ready yet are
    /// parked for an upcoming cycle. Returns the number of scheduled jobs.
    async fn schedule_all_jobs_in_queue(
        &self,
        phase: JobExecutionPhase,
        counter: &Arc<JobCounter>,
        cycle_number: u64,
    ) -> usize {
        let jobs: Vec<_> = {
            let mut queue = self.queue(phase).lock().unwrap();
            queue.drain(..).collect()
        };

        let mut scheduled = 0;
        for job in jobs {
            let context = JobContext::new(cycle_number, self.self_reference.clone());

            if !job.is_ready_for_execution(&context) {
                job.set_state(JobState::ReservedForNextCycle);
                self.next_cycle_queue.lock().unwrap().push_back(job);
                continue;
            }

            if !job.is_async() {
                job.add_counter(counter);
            }
            job.set_state(JobState::AwaitingExecution);

            let manager_reference = self.self_reference.clone();
            let execution_job = job.clone();
            let item = async move {
                let continuation = execution_job.execute(context).await;
                // the requeue decision must precede finish(): counters may
                // release the cycle driver, which clears the blacklist
                match manager_reference.try_borrow() {
                    Some(manager) => {
                        manager.handle_continuation(execution_job.clone(), continuation)
                    }
                    None => {
                        // manager is gone; the continuation has nowhere to go
                        execution_job.set_state(JobState::Detached);
                    }
                }
                execution_job.finish();
            }
            .boxed();

            if self.execution.dispatch(item).await {
                scheduled += 1;
            } else {
                warn!(
                    job_id = job.id(),
                    "cannot schedule job because the execution has been stopped"
                );
                job.finish();
                job.set_state(JobState::Detached);
            }
        }

        scheduled
    }

    /// Runs one phase to completion: schedules the queued jobs, waits for
    /// the synchronous ones, and keeps picking up jobs kicked into the same
    /// phase while it was running, so chains of follow-up jobs resolve within
    /// a single cycle.
    async fn run_phase(&self, phase: JobExecutionPhase, cycle_number: u64) {
        let counter = Arc::new(JobCounter::new());
        loop {
            self.schedule_all_jobs_in_queue(phase, &counter, cycle_number)
                .await;

            if counter.is_finished() && self.queue(phase).lock().unwrap().is_empty() {
                break;
            }

            let activity = self.queue_activity.notified();
            if !self.queue(phase).lock().unwrap().is_empty() {
                continue;
            }

            // wake up when the phase resolves or when a suspended job kicks
            // follow-up work into the queues
            tokio::select! {
                _ = counter.wait() => {}
                _ = activity => {}
            }
        }
    }

    /// Starts a new execution cycle and suspends the caller until all of its
    /// synchronous jobs are done. Asynchronous jobs are not waited for.
    pub async fn invoke_cycle_and_wait(&self) {
        if !self.execution.is_running() {
            warn!("cannot invoke cycle because the job execution has not been started");
            return;
        }

        let cycle_number = self.total_cycle_count.load(Ordering::Relaxed) + 1;

        self.set_state(JobManagerState::CycleInit);

        // move deferred jobs into their phase queues for this cycle
        let deferred: Vec<_> = {
            let mut queue = self.next_cycle_queue.lock().unwrap();
            queue.drain(..).collect()
        };
        for job in deferred {
            self.queue(job.phase()).lock().unwrap().push_back(job);
        }

        self.run_phase(JobExecutionPhase::Init, cycle_number).await;

        self.set_state(JobManagerState::CycleMain);
        self.run_phase(JobExecutionPhase::Main, cycle_number).await;

        self.set_state(JobManagerState::CycleCleanUp);
        self.run_phase(JobExecutionPhase::CleanUp, cycle_number).await;

        self.requeue_blacklist.lock().unwrap().clear();
        self.total_cycle_count.fetch_add(1, Ordering::Relaxed);
        self.set_state(JobManagerState::Ready);
    }

    /// Suspends the calling job for a fixed duration, yielding its execution
    /// to others in the meantime.
    pub async fn wait_for_duration(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
