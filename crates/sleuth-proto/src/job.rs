//! Investigation job record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a job.
///
/// Ordered so that `Open < Complete`; a job's status never decreases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Open,
    Complete,
}

impl JobStatus {
    /// Returns the wire representation stored in the `status` attribute.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Open => "open",
            JobStatus::Complete => "complete",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(JobStatus::Open),
            "complete" => Ok(JobStatus::Complete),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

/// One investigation tracked by the supervisor.
///
/// The `log` is the job's entire memory: it holds the original question and
/// every iteration entry, and is fed back verbatim as the next prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub status: JobStatus,
    pub log: String,
    pub updated_at: DateTime<Utc>,

    /// Number of iterations the engine has applied.
    #[serde(default)]
    pub iterations: u32,

    /// Structured initial context supplied at creation.
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,
}

impl Job {
    /// Creates a new open job with the given initial log.
    pub fn new(job_id: impl Into<String>, log: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Open,
            log: log.into(),
            updated_at: Utc::now(),
            iterations: 0,
            context: serde_json::Map::new(),
        }
    }

    /// Attaches the structured initial context.
    #[must_use]
    pub fn with_context(mut self, context: serde_json::Map<String, serde_json::Value>) -> Self {
        self.context = context;
        self
    }

    pub fn is_open(&self) -> bool {
        self.status == JobStatus::Open
    }

    /// Extends the log. Existing content is never rewritten.
    pub fn append_log(&mut self, entry: &str) {
        self.log.push_str(entry);
        self.touch();
    }

    /// Moves the job to `Complete`. Has no effect on an already complete job.
    pub fn mark_complete(&mut self) {
        self.status = self.status.max(JobStatus::Complete);
        self.touch();
    }

    /// Refreshes `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
