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

use crate::context::JobContext;
use crate::counter::JobCounter;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::error;

/// Decides what happens with a job after it has completed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobContinuation {
    /// The job is done and will not be scheduled again unless it is kicked
    /// manually.
    Dispose,
    /// The job is automatically requeued for the next cycle. Useful for
    /// periodic jobs.
    Requeue,
}

/// Each execution cycle runs in multiple phases to avoid races between
/// resource initialization and use within the same cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobExecutionPhase {
    /// Prepare and initialize resources here before the main phase uses them.
    Init,
    /// The actual work of the cycle.
    Main,
    /// Shut down, release and delete things here.
    CleanUp,
}

/// Progress of a job instance through the execution cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    /// Not managed by any job manager (also the state after disposal).
    Detached,
    /// Kicked and waiting inside a queue.
    Queued,
    /// Queued, but not ready for the current cycle; parked for an upcoming
    /// one.
    ReservedForNextCycle,
    /// Handed to the execution, about to be processed.
    AwaitingExecution,
    /// The workload is currently running (possibly suspended at an await).
    InExecution,
    /// The workload completed successfully.
    ExecutionFinished,
    /// The workload panicked and was aborted.
    Failed,
}

pub type JobWorkload =
    Box<dyn Fn(JobContext) -> BoxFuture<'static, JobContinuation> + Send + Sync>;

struct JobTimer {
    interval: Duration,
    started_at: Mutex<Option<Instant>>,
}

impl JobTimer {
    /// The timer starts counting at the first scheduling attempt. Once the
    /// interval has elapsed it fires and immediately re-arms, so a requeued
    /// timer job runs periodically.
    fn check_ready(&self) -> bool {
        let mut started_at = self.started_at.lock().unwrap();
        match *started_at {
            None => {
                *started_at = Some(Instant::now());
                self.interval.is_zero()
            }
            Some(start) => {
                if start.elapsed() >= self.interval {
                    *started_at = Some(Instant::now());
                    true
                } else {
                    false
                }
            }
        }
    }

    fn restart(&self) {
        *self.started_at.lock().unwrap() = Some(Instant::now());
    }
}

/// The central unit of work of the job system: a workload executed in a given
/// phase of the execution cycle, plus the metadata used to track it.
pub struct Job {
    id: String,
    workload: JobWorkload,
    phase: JobExecutionPhase,
    /// Asynchronous jobs are not awaited by the cycle; they resolve whenever
    /// they can. Synchronous jobs block their phase until finished.
    is_async: bool,
    state: Mutex<JobState>,
    counters: Mutex<Vec<Arc<JobCounter>>>,
    timer: Option<JobTimer>,
}

impl Job {
    pub fn new<F, Fut>(id: impl Into<String>, phase: JobExecutionPhase, workload: F) -> Self
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobContinuation> + Send + 'static,
    {
        Self::build(id, phase, false, None, workload)
    }

    pub fn new_async<F, Fut>(id: impl Into<String>, phase: JobExecutionPhase, workload: F) -> Self
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobContinuation> + Send + 'static,
    {
        Self::build(id, phase, true, None, workload)
    }

    /// A job that refuses scheduling until `interval` has elapsed since its
    /// first scheduling attempt. Returning [`JobContinuation::Requeue`] from
    /// the workload turns it into a periodic job.
    pub fn timer<F, Fut>(
        id: impl Into<String>,
        interval: Duration,
        phase: JobExecutionPhase,
        workload: F,
    ) -> Self
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobContinuation> + Send + 'static,
    {
        Self::build(
            id,
            phase,
            false,
            Some(JobTimer {
                interval,
                started_at: Mutex::new(None),
            }),
            workload,
        )
    }

    fn build<F, Fut>(
        id: impl Into<String>,
        phase: JobExecutionPhase,
        is_async: bool,
        timer: Option<JobTimer>,
        workload: F,
    ) -> Self
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobContinuation> + Send + 'static,
    {
        Self {
            id: id.into(),
            workload: Box::new(move |context| workload(context).boxed()),
            phase,
            is_async,
            state: Mutex::new(JobState::Detached),
            counters: Mutex::new(Vec::new()),
            timer,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn phase(&self) -> JobExecutionPhase {
        self.phase
    }

    pub fn is_async(&self) -> bool {
        self.is_async
    }

    pub fn state(&self) -> JobState {
        *self.state.lock().unwrap()
    }

    pub fn set_state(&self, state: JobState) {
        *self.state.lock().unwrap() = state;
    }

    /// Attaches a counter tracking this job's completion, incrementing it.
    pub fn add_counter(&self, counter: &Arc<JobCounter>) {
        counter.increase();
        self.counters.lock().unwrap().push(counter.clone());
    }

    /// Notifies all attached counters that this job has finished and clears
    /// the counter list. Runs exactly once per execution, also on failure.
    pub fn finish(&self) {
        let counters = std::mem::take(&mut *self.counters.lock().unwrap());
        for counter in counters {
            counter.decrease();
        }
    }

    /// Checks if this job can be scheduled in the upcoming execution round.
    /// Jobs that are not ready are parked for a following cycle and asked
    /// again.
    pub fn is_ready_for_execution(&self, _context: &JobContext) -> bool {
        match &self.timer {
            Some(timer) => timer.check_ready(),
            None => true,
        }
    }

    /// Re-arms the timer of a timer job; no-op for ordinary jobs.
    pub fn restart_timer(&self) {
        if let Some(timer) = &self.timer {
            timer.restart();
        }
    }

    /// Runs the workload, tracking state transitions. A panicking workload
    /// marks the job as failed and behaves like a disposal. The scheduler
    /// calls [`Job::finish`] once the continuation has been handled, so
    /// counters resolve only after a requeue decision has been made.
    pub async fn execute(&self, context: JobContext) -> JobContinuation {
        self.set_state(JobState::InExecution);

        let result = AssertUnwindSafe((self.workload)(context)).catch_unwind().await;

        match result {
            Ok(continuation) => {
                self.set_state(JobState::ExecutionFinished);
                continuation
            }
            Err(_) => {
                error!(job_id = self.id.as_str(), "job workload panicked");
                self.set_state(JobState::Failed);
                JobContinuation::Dispose
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_common::ownership::Reference;
    use test_r::test;

    fn detached_context() -> JobContext {
        JobContext::new(0, Reference::dangling())
    }

    #[test]
    async fn execute_tracks_state_and_finish_decrements_counters() {
        let job = Job::new("noop", JobExecutionPhase::Main, |_context| async {
            JobContinuation::Dispose
        });
        let counter = Arc::new(JobCounter::new());
        job.add_counter(&counter);
        assert!(!counter.is_finished());

        let continuation = job.execute(detached_context()).await;
        assert_eq!(continuation, JobContinuation::Dispose);
        assert_eq!(job.state(), JobState::ExecutionFinished);
        assert!(!counter.is_finished());

        job.finish();
        assert!(counter.is_finished());
    }

    #[test]
    async fn panicking_workload_fails_and_is_disposed() {
        let job = Job::new("panics", JobExecutionPhase::Main, |_context| async {
            panic!("boom");
            #[allow(unreachable_code)]
            JobContinuation::Requeue
        });
        let counter = Arc::new(JobCounter::new());
        job.add_counter(&counter);

        let continuation = job.execute(detached_context()).await;
        assert_eq!(continuation, JobContinuation::Dispose);
        assert_eq!(job.state(), JobState::Failed);

        job.finish();
        assert!(counter.is_finished());
    }

    #[test]
    fn timer_job_is_not_ready_before_its_interval() {
        let job = Job::timer(
            "timed",
            Duration::from_secs(3600),
            JobExecutionPhase::CleanUp,
            |_context| async { JobContinuation::Requeue },
        );
        let context = detached_context();
        assert!(!job.is_ready_for_execution(&context));
        assert!(!job.is_ready_for_execution(&context));
    }

    #[test]
    fn zero_interval_timer_job_is_ready_immediately() {
        let job = Job::timer(
            "timed",
            Duration::ZERO,
            JobExecutionPhase::Main,
            |_context| async { JobContinuation::Dispose },
        );
        assert!(job.is_ready_for_execution(&detached_context()));
    }
}
