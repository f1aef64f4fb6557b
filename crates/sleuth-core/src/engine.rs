//! Investigation engine.
//!
//! Owns the per-job state machine. One iteration feeds the job log to the
//! generation backend, interprets the reply, appends an entry to the log and
//! writes the job back. A job is closed when the reply is interpreted as
//! complete or when it reaches the iteration limit.

use chrono::Utc;
use sleuth_proto::{Interpretation, Job, JobStatus};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::backend::{CliBackend, GenerationBackend, Simulator};
use crate::config::SupervisorConfig;
use crate::interpreter::ResponseInterpreter;
use crate::store::{JobStore, JobUpdate, StoreError};

/// Appended to the job log to form each prompt.
const INSTRUCTIONS: &str = "\
You are an expert system administrator investigating this issue. Based on the context above:

1. If you have enough information to identify the root cause and solution, provide your final conclusion and recommendations.

2. If you need more information, describe what specific steps you would take next to continue the investigation.

3. Include any metrics, findings, or observations that are relevant to understanding the issue.

Be specific and actionable in your response. Focus on practical troubleshooting steps and measurable findings.

Mark up your reply with these tokens:
[STATUS:CONTINUING] or [STATUS:COMPLETE]
[ACTION:<what you are doing next>]
[FINDING:<name>=<value>] (repeat for each finding)
[ANSWER:<final conclusion>] (only with [STATUS:COMPLETE])
";

/// Result of one applied iteration.
#[derive(Debug, Clone)]
pub struct IterationOutcome {
    pub job_id: String,
    /// Job status after the iteration was written.
    pub status: JobStatus,
    pub interpretation: Interpretation,
    /// Name of the backend that produced the reply.
    pub backend: String,
}

/// Drives investigations through their iterations.
pub struct InvestigationEngine {
    store: Arc<JobStore>,
    interpreter: ResponseInterpreter,
    backend: Option<Arc<dyn GenerationBackend>>,
    max_iterations: u32,
}

impl InvestigationEngine {
    /// Creates an engine that only uses the simulator.
    pub fn new(store: Arc<JobStore>) -> Self {
        Self {
            store,
            interpreter: ResponseInterpreter::new(),
            backend: None,
            max_iterations: crate::config::EngineConfig::default().max_iterations,
        }
    }

    /// Creates an engine wired as `config` describes.
    pub fn from_config(store: Arc<JobStore>, config: &SupervisorConfig) -> Self {
        let mut engine = Self::new(store).with_max_iterations(config.engine.max_iterations);
        if config.backend.use_real_llm {
            engine = engine.with_backend(Arc::new(CliBackend::from_config(&config.backend)));
        }
        engine
    }

    /// Uses `backend` first, falling back to the simulator when it fails.
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn GenerationBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Creates an open job and returns its id.
    ///
    /// A job id is generated when none is supplied. An id that already
    /// exists is rejected with [`StoreError::AlreadyExists`].
    pub async fn create(
        &self,
        question: &str,
        initial_context: serde_json::Map<String, serde_json::Value>,
        job_id: Option<String>,
    ) -> Result<String, StoreError> {
        let job_id = job_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("investigation-{}", uuid::Uuid::new_v4()));

        let log = initial_log(question, &initial_context);
        let job = Job::new(job_id.clone(), log).with_context(initial_context);
        self.store.try_insert(&job).await?;

        info!(job_id = %job_id, question, "Created investigation");
        Ok(job_id)
    }

    /// Applies one iteration to `job`.
    ///
    /// The job is re-read from the store first so the entry is appended to
    /// the latest log. Returns `None` when the job no longer exists or is
    /// already complete.
    pub async fn process_one(&self, job: &Job) -> Result<Option<IterationOutcome>, StoreError> {
        let job_id = job.job_id.as_str();
        info!(job_id, iteration = job.iterations + 1, "Processing investigation");

        let prompt = build_prompt(&job.log);
        let (reply, backend) = self.generate(job_id, &prompt, job.iterations).await;
        let interpretation = self.interpreter.parse(&reply);

        let _guard = self.store.lock_job(job_id).await;
        let Some(mut current) = self.store.try_get(job_id).await? else {
            error!(job_id, "Investigation disappeared before update");
            return Ok(None);
        };
        if !current.is_open() {
            debug!(job_id, "Investigation closed while processing, dropping iteration");
            return Ok(None);
        }

        current.append_log(&format_entry(&interpretation));
        current.iterations += 1;

        if interpretation.status.is_complete() {
            current.mark_complete();
            info!(job_id, "Investigation completed");
        } else if current.iterations >= self.max_iterations {
            current.append_log(&format!(
                "\n\n--- {} ---\nStatus: complete\nAction: Iteration limit of {} reached, closing investigation\n",
                Utc::now().to_rfc3339(),
                self.max_iterations
            ));
            current.mark_complete();
            warn!(job_id, limit = self.max_iterations, "Investigation hit iteration limit");
        }

        self.store.try_put(&current).await?;

        Ok(Some(IterationOutcome {
            job_id: current.job_id,
            status: current.status,
            interpretation,
            backend,
        }))
    }

    /// Scans for open jobs and processes each in scan order.
    ///
    /// A failing job is logged and skipped; only a failed scan is returned as
    /// an error. Returns the number of iterations applied.
    pub async fn poll_open(&self) -> Result<usize, StoreError> {
        let jobs = self.store.try_scan(JobStatus::Open).await?;
        info!(count = jobs.len(), "Found open investigations");

        let mut applied = 0;
        for job in &jobs {
            match self.process_one(job).await {
                Ok(Some(_)) => applied += 1,
                Ok(None) => {}
                Err(e) => error!(job_id = %job.job_id, error = %e, "Error processing investigation"),
            }
        }
        Ok(applied)
    }

    /// Forces a job to `Complete` through the normal update path.
    pub async fn stop(&self, job_id: &str) -> bool {
        let stopped = self
            .store
            .update(
                job_id,
                JobUpdate {
                    status: Some(JobStatus::Complete),
                    ..JobUpdate::default()
                },
            )
            .await;
        if stopped {
            info!(job_id, "Investigation stopped");
        }
        stopped
    }

    /// Returns the reply text and the name of the backend that produced it.
    async fn generate(&self, job_id: &str, prompt: &str, iteration: u32) -> (String, String) {
        if let Some(backend) = &self.backend {
            match backend.generate(prompt, iteration).await {
                Ok(reply) => return (reply, backend.name().to_string()),
                Err(e) => warn!(
                    job_id,
                    backend = backend.name(),
                    error = %e,
                    "Backend call failed, falling back to simulation"
                ),
            }
        }
        (Simulator::reply(iteration), Simulator.name().to_string())
    }
}

/// Builds the creation-time log: question, timestamp and initial context.
pub fn initial_log(
    question: &str,
    initial_context: &serde_json::Map<String, serde_json::Value>,
) -> String {
    let mut log = format!(
        "Question: {question}\n\nCreated: {}\n\nInitial Context:\n",
        Utc::now().to_rfc3339()
    );
    for (key, value) in initial_context {
        match value {
            serde_json::Value::String(s) => log.push_str(&format!("- {key}: {s}\n")),
            other => log.push_str(&format!("- {key}: {other}\n")),
        }
    }
    log.push_str("\nInvestigation Log:\n");
    log
}

/// Current log followed by the standing instructions.
pub fn build_prompt(log: &str) -> String {
    format!("{log}\n\n{INSTRUCTIONS}")
}

/// Formats one iteration entry for the job log.
pub fn format_entry(interpretation: &Interpretation) -> String {
    let mut entry = format!(
        "\n\n--- {} ---\nStatus: {}\nAction: {}\n",
        Utc::now().to_rfc3339(),
        interpretation.status,
        interpretation.action
    );
    if !interpretation.findings.is_empty() {
        entry.push_str("Findings:\n");
        for (key, value) in interpretation.findings.iter() {
            entry.push_str(&format!("- {key}: {value}\n"));
        }
    }
    if let Some(answer) = &interpretation.answer {
        entry.push_str(&format!("Answer: {answer}\n"));
    }
    entry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendError;
    use crate::store::{Item, JobTable, MemoryTable, ScanFilter, ScanPage};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Backend that replays fixed replies and records prompts.
    struct ScriptedBackend {
        replies: Mutex<Vec<Result<String, String>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<Result<&str, &str>>) -> Self {
            Self {
                replies: Mutex::new(
                    replies
                        .into_iter()
                        .rev()
                        .map(|r| r.map(str::to_string).map_err(str::to_string))
                        .collect(),
                ),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl GenerationBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, prompt: &str, _iteration: u32) -> Result<String, BackendError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            match self.replies.lock().unwrap().pop() {
                Some(Ok(reply)) => Ok(reply),
                Some(Err(stderr)) => Err(BackendError::Failed {
                    cli: "scripted".into(),
                    status: "exit status: 1".into(),
                    stderr,
                }),
                None => panic!("scripted backend ran out of replies"),
            }
        }
    }

    /// Memory table whose reads yield first, so concurrent cycles overlap.
    struct SlowReads(MemoryTable);

    #[async_trait]
    impl JobTable for SlowReads {
        async fn put_item(&self, item: Item) -> Result<(), StoreError> {
            self.0.put_item(item).await
        }

        async fn get_item(&self, job_id: &str) -> Result<Option<Item>, StoreError> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.0.get_item(job_id).await
        }

        async fn scan_page(
            &self,
            filter: &ScanFilter,
            start_key: Option<&str>,
        ) -> Result<ScanPage, StoreError> {
            self.0.scan_page(filter, start_key).await
        }
    }

    fn engine() -> InvestigationEngine {
        let store = Arc::new(JobStore::new(Arc::new(MemoryTable::new(10))));
        InvestigationEngine::new(store)
    }

    async fn open_job(engine: &InvestigationEngine) -> Job {
        let id = engine
            .create("Why is memory high?", serde_json::Map::new(), Some("job-1".into()))
            .await
            .unwrap();
        engine.store().get(&id).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_builds_log_and_seeds_cache() {
        let engine = engine();
        let mut context = serde_json::Map::new();
        context.insert("service".into(), json!("checkout"));
        context.insert("memory_pct".into(), json!(91.5));

        let id = engine.create("Why is memory high?", context, None).await.unwrap();
        assert!(id.starts_with("investigation-"));

        let cached = engine.store().cached(&id).unwrap();
        assert_eq!(cached.status, JobStatus::Open);
        assert!(cached.log.starts_with("Question: Why is memory high?\n\nCreated: "));
        assert!(cached.log.contains("- service: checkout\n"));
        assert!(cached.log.contains("- memory_pct: 91.5\n"));
        assert!(cached.log.ends_with("\nInvestigation Log:\n"));
        assert_eq!(cached.context["memory_pct"], json!(91.5));
    }

    #[tokio::test]
    async fn test_create_rejects_existing_id() {
        let engine = engine();
        let job = open_job(&engine).await;
        engine.process_one(&job).await.unwrap();
        assert!(engine.stop("job-1").await);
        let before = engine.store().get("job-1").await.unwrap();

        let err = engine
            .create("second", serde_json::Map::new(), Some("job-1".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));

        let after = engine.store().get("job-1").await.unwrap();
        assert_eq!(after.status, JobStatus::Complete);
        assert_eq!(after.log, before.log);
        assert_eq!(after.iterations, 1);
    }

    #[test]
    fn test_initial_log_keeps_context_order() {
        let mut context = serde_json::Map::new();
        context.insert("zone".into(), json!("us-east-1a"));
        context.insert("alarm".into(), json!("HighMemory"));

        let log = initial_log("q", &context);
        let zone = log.find("- zone: us-east-1a\n").unwrap();
        let alarm = log.find("- alarm: HighMemory\n").unwrap();
        assert!(zone < alarm);
    }

    #[tokio::test]
    async fn test_stop_during_iteration_is_not_undone() {
        let store = Arc::new(JobStore::new(Arc::new(SlowReads(MemoryTable::default()))));
        let engine = InvestigationEngine::new(store);
        let job = open_job(&engine).await;

        let (outcome, stopped) = tokio::join!(engine.process_one(&job), engine.stop("job-1"));
        assert!(stopped);

        let stored = engine.store().get("job-1").await.unwrap();
        assert_eq!(stored.status, JobStatus::Complete);
        // Whichever cycle ran second saw the other's write.
        if outcome.unwrap().is_some() {
            assert_eq!(stored.iterations, 1);
            assert!(stored.log.contains("Status: continuing"));
        } else {
            assert_eq!(stored.iterations, 0);
        }
    }

    #[tokio::test]
    async fn test_simulated_job_completes_on_third_iteration() {
        let engine = engine();
        let mut job = open_job(&engine).await;

        for expected in [JobStatus::Open, JobStatus::Open, JobStatus::Complete] {
            let outcome = engine.process_one(&job).await.unwrap().unwrap();
            assert_eq!(outcome.status, expected);
            assert_eq!(outcome.backend, "simulator");
            job = engine.store().get("job-1").await.unwrap();
        }

        assert_eq!(job.iterations, 3);
        assert!(job.log.contains("Status: continuing\nAction: Analyzing metrics for iteration 1\n"));
        assert!(job.log.contains("Answer: The deployment issue is caused by high latency"));
        assert!(engine.process_one(&job).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_log_is_append_only() {
        let engine = engine();
        let job = open_job(&engine).await;
        let before = job.log.clone();

        engine.process_one(&job).await.unwrap();
        let after = engine.store().get("job-1").await.unwrap();
        assert!(after.log.starts_with(&before));
        assert!(after.log.len() > before.len());
        assert!(after.updated_at >= job.updated_at);
    }

    #[tokio::test]
    async fn test_backend_reply_drives_status_and_prompt() {
        let backend = Arc::new(ScriptedBackend::new(vec![Ok(
            "[STATUS:COMPLETE] [ACTION:Wrap up] [FINDING:cpu=97%] [ANSWER:Add a replica.]",
        )]));
        let engine = engine().with_backend(backend.clone());
        let job = open_job(&engine).await;

        let outcome = engine.process_one(&job).await.unwrap().unwrap();
        assert_eq!(outcome.backend, "scripted");
        assert_eq!(outcome.status, JobStatus::Complete);

        let prompts = backend.prompts.lock().unwrap();
        assert!(prompts[0].starts_with(&job.log));
        assert!(prompts[0].contains("[STATUS:CONTINUING] or [STATUS:COMPLETE]"));

        let stored = engine.store().get("job-1").await.unwrap();
        assert!(stored.log.contains("Findings:\n- cpu: 97%\nAnswer: Add a replica.\n"));
    }

    #[tokio::test]
    async fn test_backend_failure_falls_back_to_simulator() {
        let backend = Arc::new(ScriptedBackend::new(vec![Err("q: command not found")]));
        let engine = engine().with_backend(backend);
        let job = open_job(&engine).await;

        let outcome = engine.process_one(&job).await.unwrap().unwrap();
        assert_eq!(outcome.backend, "simulator");
        assert_eq!(outcome.status, JobStatus::Open);
        assert_eq!(engine.store().get("job-1").await.unwrap().iterations, 1);
    }

    #[tokio::test]
    async fn test_iteration_limit_closes_job() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Ok("[STATUS:CONTINUING] still digging"),
            Ok("[STATUS:CONTINUING] still digging"),
        ]));
        let engine = engine().with_backend(backend).with_max_iterations(2);
        let mut job = open_job(&engine).await;

        let first = engine.process_one(&job).await.unwrap().unwrap();
        assert_eq!(first.status, JobStatus::Open);
        job = engine.store().get("job-1").await.unwrap();

        let second = engine.process_one(&job).await.unwrap().unwrap();
        assert_eq!(second.status, JobStatus::Complete);
        let job = engine.store().get("job-1").await.unwrap();
        assert!(job.log.contains("Iteration limit of 2 reached"));
    }

    #[tokio::test]
    async fn test_stop_forces_complete() {
        let engine = engine();
        let job = open_job(&engine).await;

        assert!(engine.stop("job-1").await);
        assert!(!engine.stop("missing").await);
        assert_eq!(engine.store().get("job-1").await.unwrap().status, JobStatus::Complete);
        // A stale open snapshot must not reopen or extend the job.
        assert!(engine.process_one(&job).await.unwrap().is_none());
        assert_eq!(engine.store().get("job-1").await.unwrap().iterations, 0);
    }

    #[tokio::test]
    async fn test_poll_open_processes_each_open_job() {
        let engine = engine();
        for id in ["a", "b", "c"] {
            engine
                .create("q", serde_json::Map::new(), Some(id.into()))
                .await
                .unwrap();
        }
        engine.stop("b").await;

        assert_eq!(engine.poll_open().await.unwrap(), 2);
        assert_eq!(engine.store().get("a").await.unwrap().iterations, 1);
        assert_eq!(engine.store().get("b").await.unwrap().iterations, 0);
    }

    #[test]
    fn test_format_entry_omits_empty_sections() {
        let parsed = ResponseInterpreter::new().parse("nothing useful");
        let entry = format_entry(&parsed);
        assert!(entry.contains("Status: continuing\nAction: Analyzing investigation\n"));
        assert!(!entry.contains("Findings:"));
        assert!(!entry.contains("Answer:"));
    }
}
