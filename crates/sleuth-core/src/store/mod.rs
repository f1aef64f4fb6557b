//! Durable job store adapter.
//!
//! Wraps a [`JobTable`] (the source of truth) with a local read-through
//! cache keyed by job id. The plain methods (`put`, `get`, `scan`) log and
//! swallow store failures; the `try_*` variants return them.

mod attribute;
mod record;
mod table;

pub use attribute::{AttributeValue, Item, from_attribute, to_attribute};
pub use record::{job_from_item, job_to_item};
pub use table::{JobTable, JsonFileTable, MemoryTable, ScanFilter, ScanPage};

use sleuth_proto::{Job, JobStatus};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use crate::config::StoreConfig;

/// Errors raised by tables and the adapter.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store backend failed: {0}")]
    Backend(String),

    #[error("cannot convert value: {0}")]
    Conversion(String),

    #[error("job {job_id} already exists")]
    AlreadyExists { job_id: String },

    #[error("malformed item for job {job_id}: {reason}")]
    Malformed { job_id: String, reason: String },

    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("store document is invalid: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<StoreError> for sleuth_proto::Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conversion(msg) => sleuth_proto::Error::Conversion(msg),
            other => sleuth_proto::Error::Store(other.to_string()),
        }
    }
}

/// Opens the table described by `config`.
///
/// A JSON file table is used when a path is set, an in-memory table otherwise.
pub fn open_table(config: &StoreConfig) -> Arc<dyn JobTable> {
    match &config.path {
        Some(path) => {
            info!(
                table = %config.table,
                region = %config.region,
                path = %path.display(),
                "Using JSON file job table"
            );
            Arc::new(JsonFileTable::new(path, config.page_size))
        }
        None => {
            info!(table = %config.table, region = %config.region, "Using in-memory job table");
            Arc::new(MemoryTable::new(config.page_size))
        }
    }
}

/// Field changes applied by [`JobStore::update`].
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub log: Option<String>,
    pub iterations: Option<u32>,
}

/// CRUD over the durable table plus the local job cache.
pub struct JobStore {
    table: Arc<dyn JobTable>,
    cache: RwLock<HashMap<String, Job>>,
    job_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl JobStore {
    pub fn new(table: Arc<dyn JobTable>) -> Self {
        Self {
            table,
            cache: RwLock::new(HashMap::new()),
            job_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Upserts the full job. Last writer wins.
    pub async fn try_put(&self, job: &Job) -> Result<(), StoreError> {
        let item = job_to_item(job)?;
        self.table.put_item(item).await?;
        self.remember(job.clone());
        Ok(())
    }

    /// Writes a new job, refusing to replace one with the same id.
    pub async fn try_insert(&self, job: &Job) -> Result<(), StoreError> {
        let _guard = self.lock_job(&job.job_id).await;
        if self.table.get_item(&job.job_id).await?.is_some() {
            return Err(StoreError::AlreadyExists {
                job_id: job.job_id.clone(),
            });
        }
        self.try_put(job).await
    }

    /// Serializes read-modify-write cycles on one job within this process.
    ///
    /// Hold the guard from the read until the write lands.
    pub async fn lock_job(&self, job_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .job_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(job_id.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Upserts the job, returning `false` if the write failed.
    pub async fn put(&self, job: &Job) -> bool {
        match self.try_put(job).await {
            Ok(()) => true,
            Err(e) => {
                error!(job_id = %job.job_id, error = %e, "Failed to write job");
                false
            }
        }
    }

    /// Reads the job from the table, refreshing the cache.
    pub async fn try_get(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        let Some(item) = self.table.get_item(job_id).await? else {
            return Ok(None);
        };
        let job = job_from_item(&item)?;
        self.remember(job.clone());
        Ok(Some(job))
    }

    /// Reads the job, returning `None` when missing or on failure.
    pub async fn get(&self, job_id: &str) -> Option<Job> {
        match self.try_get(job_id).await {
            Ok(job) => job,
            Err(e) => {
                error!(job_id, error = %e, "Failed to read job");
                None
            }
        }
    }

    /// Returns every job with the given status, following pagination.
    ///
    /// Items that fail to decode are skipped with a warning.
    pub async fn try_scan(&self, status: JobStatus) -> Result<Vec<Job>, StoreError> {
        let filter = ScanFilter::attribute_eq(record::STATUS, status.as_str());
        let mut jobs = Vec::new();
        let mut seen = HashSet::new();
        let mut start_key: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = self.table.scan_page(&filter, start_key.as_deref()).await?;
            pages += 1;
            for item in &page.items {
                match job_from_item(item) {
                    Ok(job) => {
                        if seen.insert(job.job_id.clone()) {
                            jobs.push(job);
                        }
                    }
                    Err(e) => warn!(error = %e, "Skipping undecodable item"),
                }
            }
            match page.last_evaluated_key {
                Some(key) => start_key = Some(key),
                None => break,
            }
        }

        debug!(status = %status, count = jobs.len(), pages, "Scanned jobs");
        Ok(jobs)
    }

    /// Returns every job with the given status, or nothing on failure.
    pub async fn scan(&self, status: JobStatus) -> Vec<Job> {
        match self.try_scan(status).await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(status = %status, error = %e, "Failed to scan jobs");
                Vec::new()
            }
        }
    }

    /// Reads the current job, applies `update` and writes it back.
    ///
    /// Status can only move forward; an update asking for `Open` on a
    /// complete job leaves it complete. Returns `false` if the job is
    /// missing or either store call failed.
    pub async fn update(&self, job_id: &str, update: JobUpdate) -> bool {
        let _guard = self.lock_job(job_id).await;
        let Some(mut job) = self.get(job_id).await else {
            warn!(job_id, "Cannot update missing job");
            return false;
        };
        if let Some(status) = update.status {
            job.status = job.status.max(status);
        }
        if let Some(log) = update.log {
            job.log = log;
        }
        if let Some(iterations) = update.iterations {
            job.iterations = iterations;
        }
        job.touch();
        self.put(&job).await
    }

    /// Returns the cached copy without touching the table.
    pub fn cached(&self, job_id: &str) -> Option<Job> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_id)
            .cloned()
    }

    /// Open jobs known to the local cache.
    pub fn active_jobs(&self) -> Vec<Job> {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        let mut jobs: Vec<Job> = cache.values().filter(|job| job.is_open()).cloned().collect();
        jobs.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        jobs
    }

    fn remember(&self, job: Job) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job.job_id.clone(), job);
    }
}
