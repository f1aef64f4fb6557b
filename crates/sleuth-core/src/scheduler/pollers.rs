//! Deployment watcher run by the frequent periodic task.

use sleuth_proto::{Job, JobStatus};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::notifier::Notifier;
use crate::store::{JobStore, StoreError};

/// True when the job log mentions any of `terms`, case-insensitively.
pub fn is_deployment_job(job: &Job, terms: &[String]) -> bool {
    let log = job.log.to_lowercase();
    terms
        .iter()
        .any(|term| !term.is_empty() && log.contains(&term.to_lowercase()))
}

/// Sends one notification per completed deployment-related job.
///
/// The set of notified ids lives as long as the watcher, so a job is
/// announced at most once per process lifetime. A failed send leaves the job
/// unmarked and it is retried on the next tick.
pub struct DeploymentWatcher {
    store: Arc<JobStore>,
    notifier: Arc<dyn Notifier>,
    terms: Vec<String>,
    message: String,
    notified: HashSet<String>,
}

impl DeploymentWatcher {
    pub fn new(
        store: Arc<JobStore>,
        notifier: Arc<dyn Notifier>,
        terms: Vec<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            store,
            notifier,
            terms,
            message: message.into(),
            notified: HashSet::new(),
        }
    }

    pub fn is_notified(&self, job_id: &str) -> bool {
        self.notified.contains(job_id)
    }

    /// Scans completed jobs and notifies the new deployment-related ones.
    ///
    /// Returns the number of jobs marked as notified during this tick.
    pub async fn tick(&mut self) -> Result<usize, StoreError> {
        let completed = self.store.try_scan(JobStatus::Complete).await?;
        let mut marked = 0;

        for job in &completed {
            if self.notified.contains(&job.job_id) || !is_deployment_job(job, &self.terms) {
                continue;
            }
            info!(job_id = %job.job_id, "Found completed deployment investigation");
            // Failures are logged by the notifier; the job stays unmarked.
            if let Ok(delivery) = self.notifier.notify(&self.message, &job.job_id).await {
                debug!(job_id = %job.job_id, ?delivery, "Marking job as notified");
                self.notified.insert(job.job_id.clone());
                marked += 1;
            }
        }
        Ok(marked)
    }
}
