//! Job commands that talk to the store directly, without the runtime host.

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde_json::{Map, Value};
use sleuth_core::{
    DeploymentWatcher, InvestigationEngine, JobStore, SlackNotifier, SupervisorConfig, open_table,
};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
pub struct CreateArgs {
    /// The question to investigate
    pub question: String,

    /// Initial context entry; numbers and booleans are stored as such
    #[arg(long = "context", value_name = "KEY=VALUE")]
    pub context: Vec<String>,

    /// Job id to use instead of a generated one
    #[arg(long)]
    pub id: Option<String>,
}

#[derive(Parser, Debug)]
pub struct JobArgs {
    /// Job id
    pub job_id: String,
}

fn engine(config: &SupervisorConfig) -> InvestigationEngine {
    if config.store.path.is_none() {
        warn!("No store path configured, changes are lost when this command exits");
    }
    let store = Arc::new(JobStore::new(open_table(&config.store)));
    InvestigationEngine::from_config(store, config)
}

/// Parses `key=value` pairs. Values that read as JSON scalars keep their type.
pub fn parse_context(entries: &[String]) -> Result<Map<String, Value>> {
    let mut context = Map::new();
    for entry in entries {
        let Some((key, raw)) = entry.split_once('=') else {
            bail!("context entry '{entry}' is not KEY=VALUE");
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("context entry '{entry}' has an empty key");
        }
        let value = match serde_json::from_str::<Value>(raw) {
            Ok(v @ (Value::Number(_) | Value::Bool(_))) => v,
            _ => Value::String(raw.to_string()),
        };
        context.insert(key.to_string(), value);
    }
    Ok(context)
}

pub async fn create(config: &SupervisorConfig, args: &CreateArgs) -> Result<()> {
    let context = parse_context(&args.context)?;
    let job_id = engine(config)
        .create(&args.question, context, args.id.clone())
        .await
        .context("Failed to create investigation")?;
    println!("{job_id}");
    Ok(())
}

pub async fn show(config: &SupervisorConfig, job_id: &str) -> Result<()> {
    let engine = engine(config);
    let Some(job) = engine
        .store()
        .try_get(job_id)
        .await
        .context("Failed to read investigation")?
    else {
        bail!("investigation '{job_id}' not found");
    };

    println!("Job:        {}", job.job_id);
    println!("Status:     {}", job.status);
    println!("Iterations: {}", job.iterations);
    println!("Updated:    {}", job.updated_at.to_rfc3339());
    println!();
    println!("{}", job.log);
    Ok(())
}

pub async fn stop(config: &SupervisorConfig, job_id: &str) -> Result<()> {
    if !engine(config).stop(job_id).await {
        bail!("investigation '{job_id}' could not be stopped");
    }
    println!("Stopped {job_id}");
    Ok(())
}

/// Runs one master poll then one deployment poll.
///
/// The notified set does not outlive the command, so every completed
/// deployment job is announced again on each `step`.
pub async fn step(config: &SupervisorConfig) -> Result<()> {
    let engine = engine(config);
    let applied = engine
        .poll_open()
        .await
        .context("Master poll failed")?;

    let notifier = Arc::new(
        SlackNotifier::from_config(&config.notify).context("Failed to build webhook client")?,
    );
    let mut watcher = DeploymentWatcher::new(
        engine.store().clone(),
        notifier,
        config.engine.deployment_terms.clone(),
        config.notify.message.clone(),
    );
    let notified = watcher.tick().await.context("Deployment poll failed")?;

    info!(applied, notified, "Step finished");
    println!("Applied {applied} iteration(s), notified {notified} job(s)");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_context_keeps_scalar_types() {
        let entries = vec![
            "service=checkout".to_string(),
            "memory_pct=91.5".to_string(),
            "paged=true".to_string(),
            "note=a=b".to_string(),
        ];
        let context = parse_context(&entries).unwrap();
        assert_eq!(context["service"], Value::String("checkout".into()));
        assert_eq!(context["memory_pct"], serde_json::json!(91.5));
        assert_eq!(context["paged"], Value::Bool(true));
        assert_eq!(context["note"], Value::String("a=b".into()));
    }

    #[test]
    fn test_parse_context_rejects_bad_entries() {
        assert!(parse_context(&["novalue".to_string()]).is_err());
        assert!(parse_context(&["=x".to_string()]).is_err());
    }

    #[tokio::test]
    async fn test_create_step_and_stop_against_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SupervisorConfig::default();
        config.store.path = Some(dir.path().join("jobs.json"));

        let args = CreateArgs {
            question: "Why did the deploy alarm fire?".into(),
            context: vec!["service=checkout".into()],
            id: Some("job-cli".into()),
        };
        create(&config, &args).await.unwrap();
        step(&config).await.unwrap();

        let store = JobStore::new(open_table(&config.store));
        let job = store.get("job-cli").await.unwrap();
        assert_eq!(job.iterations, 1);
        assert!(job.is_open());

        stop(&config, "job-cli").await.unwrap();
        assert!(!store.get("job-cli").await.unwrap().is_open());
        assert!(stop(&config, "missing").await.is_err());
    }
}
