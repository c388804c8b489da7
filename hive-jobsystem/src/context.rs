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

use crate::manager::JobManager;
use hive_common::ownership::{Borrower, OwnershipError, Reference};

/// Handed to every workload; carries the current cycle number and lets
/// running jobs talk back to the job manager (kick follow-up jobs, wait for
/// durations, ...).
#[derive(Clone)]
pub struct JobContext {
    cycle_number: u64,
    job_manager: Reference<JobManager>,
}

impl JobContext {
    pub fn new(cycle_number: u64, job_manager: Reference<JobManager>) -> Self {
        Self {
            cycle_number,
            job_manager,
        }
    }

    pub fn cycle_number(&self) -> u64 {
        self.cycle_number
    }

    /// Borrows the managing job manager. Fails when the manager has already
    /// been shut down while this job was still in flight.
    pub fn job_manager(&self) -> Result<Borrower<JobManager>, OwnershipError> {
        self.job_manager.borrow()
    }

    pub fn job_manager_reference(&self) -> Reference<JobManager> {
        self.job_manager.clone()
    }
}
