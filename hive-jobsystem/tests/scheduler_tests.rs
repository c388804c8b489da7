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

use hive_common::tracing::{init_tracing_with_default_debug_env_filter, TracingConfig};
use hive_jobsystem::{Job, JobContinuation, JobExecutionPhase, JobManager, JobsConfig};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use test_r::test;

test_r::enable!();

#[derive(Debug)]
pub struct Tracing;

impl Tracing {
    pub fn init() -> Self {
        init_tracing_with_default_debug_env_filter(&TracingConfig::test_pretty_without_time(
            "jobsystem-tests",
        ));
        Self
    }
}

#[test_r::test_dep]
fn tracing() -> Tracing {
    Tracing::init()
}

fn started_manager() -> hive_common::ownership::Owner<JobManager> {
    let manager = JobManager::new(JobsConfig::default());
    manager.start_execution();
    manager
}

#[test]
async fn kicked_job_runs_within_one_cycle(_tracing: &Tracing) {
    let manager = started_manager();

    let executed = Arc::new(AtomicBool::new(false));
    let executed_clone = executed.clone();
    manager.kick_job(Arc::new(Job::new(
        "single",
        JobExecutionPhase::Main,
        move |_context| {
            let executed = executed_clone.clone();
            async move {
                executed.store(true, Ordering::SeqCst);
                JobContinuation::Dispose
            }
        },
    )));

    manager.invoke_cycle_and_wait().await;

    assert!(executed.load(Ordering::SeqCst));
    assert_eq!(manager.total_cycle_count(), 1);
    manager.stop_execution().await;
}

#[test]
async fn phases_are_strictly_ordered_within_a_cycle(_tracing: &Tracing) {
    let manager = started_manager();

    let order = Arc::new(Mutex::new(Vec::new()));
    for (index, phase) in [
        JobExecutionPhase::CleanUp,
        JobExecutionPhase::Main,
        JobExecutionPhase::Init,
    ]
    .into_iter()
    .enumerate()
    {
        // several jobs per phase, kicked in reverse phase order
        for job_index in 0..3 {
            let order = order.clone();
            manager.kick_job(Arc::new(Job::new(
                format!("phase-{index}-{job_index}"),
                phase,
                move |_context| {
                    let order = order.clone();
                    async move {
                        order.lock().unwrap().push(phase);
                        JobContinuation::Dispose
                    }
                },
            )));
        }
    }

    manager.invoke_cycle_and_wait().await;

    let order = order.lock().unwrap().clone();
    assert_eq!(order.len(), 9);
    let first_main = order
        .iter()
        .position(|phase| *phase == JobExecutionPhase::Main)
        .unwrap();
    let last_init = order
        .iter()
        .rposition(|phase| *phase == JobExecutionPhase::Init)
        .unwrap();
    let first_clean_up = order
        .iter()
        .position(|phase| *phase == JobExecutionPhase::CleanUp)
        .unwrap();
    let last_main = order
        .iter()
        .rposition(|phase| *phase == JobExecutionPhase::Main)
        .unwrap();
    assert!(last_init < first_main);
    assert!(last_main < first_clean_up);

    manager.stop_execution().await;
}

#[test]
async fn requeued_job_runs_once_per_cycle(_tracing: &Tracing) {
    let manager = started_manager();

    let executions = Arc::new(AtomicUsize::new(0));
    let executions_clone = executions.clone();
    manager.kick_job(Arc::new(Job::new(
        "periodic",
        JobExecutionPhase::Main,
        move |_context| {
            let executions = executions_clone.clone();
            async move {
                executions.fetch_add(1, Ordering::SeqCst);
                JobContinuation::Requeue
            }
        },
    )));

    for _ in 0..3 {
        manager.invoke_cycle_and_wait().await;
    }

    assert_eq!(executions.load(Ordering::SeqCst), 3);
    manager.stop_execution().await;
}

#[test]
async fn detaching_a_queued_job_prevents_its_execution(_tracing: &Tracing) {
    let manager = started_manager();

    let executions = Arc::new(AtomicUsize::new(0));
    let executions_clone = executions.clone();
    manager.kick_job(Arc::new(Job::new(
        "doomed",
        JobExecutionPhase::Main,
        move |_context| {
            let executions = executions_clone.clone();
            async move {
                executions.fetch_add(1, Ordering::SeqCst);
                JobContinuation::Requeue
            }
        },
    )));

    manager.detach_job("doomed");
    manager.invoke_cycle_and_wait().await;

    assert_eq!(executions.load(Ordering::SeqCst), 0);
    manager.stop_execution().await;
}

#[test]
async fn detaching_a_requeueing_job_discards_its_continuation(_tracing: &Tracing) {
    let manager = started_manager();

    let executions = Arc::new(AtomicUsize::new(0));
    let executions_clone = executions.clone();
    manager.kick_job(Arc::new(Job::new(
        "requeueing",
        JobExecutionPhase::Main,
        move |context| {
            let executions = executions_clone.clone();
            async move {
                executions.fetch_add(1, Ordering::SeqCst);
                // detach from inside the execution: the job is no longer
                // queued, so only the requeue can be intercepted
                if let Ok(manager) = context.job_manager() {
                    manager.detach_job("requeueing");
                }
                JobContinuation::Requeue
            }
        },
    )));

    manager.invoke_cycle_and_wait().await;
    manager.invoke_cycle_and_wait().await;

    assert_eq!(executions.load(Ordering::SeqCst), 1);
    manager.stop_execution().await;
}

#[test]
async fn jobs_kicked_by_running_jobs_complete_in_the_same_phase(_tracing: &Tracing) {
    let manager = started_manager();

    let follow_up_done = Arc::new(AtomicBool::new(false));
    let follow_up_done_clone = follow_up_done.clone();
    manager.kick_job(Arc::new(Job::new(
        "parent",
        JobExecutionPhase::Main,
        move |context| {
            let follow_up_done = follow_up_done_clone.clone();
            async move {
                let (tx, rx) = tokio::sync::oneshot::channel::<()>();
                let tx = Arc::new(Mutex::new(Some(tx)));
                if let Ok(manager) = context.job_manager() {
                    let follow_up_done = follow_up_done.clone();
                    manager.kick_job(Arc::new(Job::new(
                        "child",
                        JobExecutionPhase::Main,
                        move |_context| {
                            let follow_up_done = follow_up_done.clone();
                            let tx = tx.clone();
                            async move {
                                follow_up_done.store(true, Ordering::SeqCst);
                                if let Some(tx) = tx.lock().unwrap().take() {
                                    let _ = tx.send(());
                                }
                                JobContinuation::Dispose
                            }
                        },
                    )));
                }
                // the parent suspends until the child resolves; both must
                // complete within this cycle's main phase
                let _ = rx.await;
                JobContinuation::Dispose
            }
        },
    )));

    tokio::time::timeout(Duration::from_secs(5), manager.invoke_cycle_and_wait())
        .await
        .expect("cycle must not deadlock on nested job chains");

    assert!(follow_up_done.load(Ordering::SeqCst));
    manager.stop_execution().await;
}

#[test]
async fn async_jobs_do_not_block_the_cycle(_tracing: &Tracing) {
    let manager = started_manager();

    let async_done = Arc::new(AtomicBool::new(false));
    let async_done_clone = async_done.clone();
    manager.kick_job(Arc::new(Job::new_async(
        "slow-async",
        JobExecutionPhase::Main,
        move |_context| {
            let async_done = async_done_clone.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                async_done.store(true, Ordering::SeqCst);
                JobContinuation::Dispose
            }
        },
    )));

    tokio::time::timeout(Duration::from_millis(150), manager.invoke_cycle_and_wait())
        .await
        .expect("the cycle must not wait for asynchronous jobs");
    assert!(!async_done.load(Ordering::SeqCst));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(async_done.load(Ordering::SeqCst));
    manager.stop_execution().await;
}

#[test]
async fn timer_job_fires_only_after_its_interval(_tracing: &Tracing) {
    let manager = started_manager();

    let executions = Arc::new(AtomicUsize::new(0));
    let executions_clone = executions.clone();
    manager.kick_job(Arc::new(Job::timer(
        "timed",
        Duration::from_millis(200),
        JobExecutionPhase::Main,
        move |_context| {
            let executions = executions_clone.clone();
            async move {
                executions.fetch_add(1, Ordering::SeqCst);
                JobContinuation::Requeue
            }
        },
    )));

    manager.invoke_cycle_and_wait().await;
    assert_eq!(executions.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_millis(250)).await;
    manager.invoke_cycle_and_wait().await;
    assert_eq!(executions.load(Ordering::SeqCst), 1);

    // the timer re-arms after firing, so the requeued job waits again
    manager.invoke_cycle_and_wait().await;
    assert_eq!(executions.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(250)).await;
    manager.invoke_cycle_and_wait().await;
    assert_eq!(executions.load(Ordering::SeqCst), 2);

    manager.stop_execution().await;
}

#[test]
async fn failing_job_resolves_its_counters_and_is_not_requeued(_tracing: &Tracing) {
    let manager = started_manager();

    let survivor_ran = Arc::new(AtomicBool::new(false));
    let survivor_ran_clone = survivor_ran.clone();

    manager.kick_job(Arc::new(Job::new(
        "panicking",
        JobExecutionPhase::Main,
        move |_context| async move {
            panic!("workload blew up");
            #[allow(unreachable_code)]
            JobContinuation::Requeue
        },
    )));
    manager.kick_job(Arc::new(Job::new(
        "survivor",
        JobExecutionPhase::Main,
        move |_context| {
            let survivor_ran = survivor_ran_clone.clone();
            async move {
                survivor_ran.store(true, Ordering::SeqCst);
                JobContinuation::Dispose
            }
        },
    )));

    // the panicking job must neither hang the cycle nor poison later ones
    tokio::time::timeout(Duration::from_secs(5), manager.invoke_cycle_and_wait())
        .await
        .expect("a panicking job must not hang the cycle");
    assert!(survivor_ran.load(Ordering::SeqCst));

    manager.invoke_cycle_and_wait().await;
    assert_eq!(manager.total_cycle_count(), 2);

    manager.stop_execution().await;
}

#[test]
async fn jobs_kicked_for_next_cycle_skip_the_current_one(_tracing: &Tracing) {
    let manager = started_manager();

    let executions = Arc::new(AtomicUsize::new(0));
    let executions_clone = executions.clone();
    manager.kick_job_for_next_cycle(Arc::new(Job::new(
        "deferred",
        JobExecutionPhase::Main,
        move |_context| {
            let executions = executions_clone.clone();
            async move {
                executions.fetch_add(1, Ordering::SeqCst);
                JobContinuation::Dispose
            }
        },
    )));

    manager.invoke_cycle_and_wait().await;
    assert_eq!(executions.load(Ordering::SeqCst), 1);

    manager.stop_execution().await;
}
