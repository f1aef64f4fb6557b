//! Generation backends.
//!
//! A backend turns a prompt into raw reply text. [`CliBackend`] runs an
//! external CLI as a subprocess; [`Simulator`] returns canned replies so the
//! state machine can be exercised without one.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::BackendConfig;
use crate::text::truncate_with_ellipsis;

/// Simulated iterations that report `CONTINUING` before the simulator completes.
pub const SIMULATED_CONTINUING_ITERATIONS: u32 = 2;

/// Errors from a backend invocation.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("failed to launch '{cli}': {source}")]
    Spawn {
        cli: String,
        source: std::io::Error,
    },

    #[error("'{cli}' exited with {status}: {stderr}")]
    Failed {
        cli: String,
        status: String,
        stderr: String,
    },

    #[error("'{cli}' did not answer within {timeout:?}")]
    Timeout { cli: String, timeout: Duration },
}

impl From<BackendError> for sleuth_proto::Error {
    fn from(err: BackendError) -> Self {
        sleuth_proto::Error::Backend(err.to_string())
    }
}

/// Produces raw reply text for a prompt.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn name(&self) -> &str;

    /// `iteration` is the number of iterations already applied to the job.
    async fn generate(&self, prompt: &str, iteration: u32) -> Result<String, BackendError>;
}

/// External CLI invoked once per prompt.
///
/// `q` is called as `q chat <prompt>`; any other executable as `<cli> <prompt>`.
#[derive(Debug, Clone)]
pub struct CliBackend {
    cli: String,
    timeout: Duration,
}

impl CliBackend {
    pub fn new(cli: impl Into<String>, timeout: Duration) -> Self {
        Self {
            cli: cli.into(),
            timeout,
        }
    }

    pub fn from_config(config: &BackendConfig) -> Self {
        Self::new(config.cli.clone(), config.timeout())
    }

    /// Arguments passed to the executable for `prompt`.
    pub fn args<'a>(&self, prompt: &'a str) -> Vec<&'a str> {
        if self.cli == "q" {
            vec!["chat", prompt]
        } else {
            vec![prompt]
        }
    }
}

#[async_trait]
impl GenerationBackend for CliBackend {
    fn name(&self) -> &str {
        &self.cli
    }

    async fn generate(&self, prompt: &str, _iteration: u32) -> Result<String, BackendError> {
        info!(cli = %self.cli, prompt_chars = prompt.len(), "Calling generation CLI");

        let child = Command::new(&self.cli)
            .args(self.args(prompt))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| BackendError::Spawn {
                cli: self.cli.clone(),
                source,
            })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| BackendError::Timeout {
                cli: self.cli.clone(),
                timeout: self.timeout,
            })?
            .map_err(|source| BackendError::Spawn {
                cli: self.cli.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(BackendError::Failed {
                cli: self.cli.clone(),
                status: output.status.to_string(),
                stderr: if stderr.is_empty() {
                    "Unknown error".to_string()
                } else {
                    stderr
                },
            });
        }

        let reply = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!(cli = %self.cli, reply = %truncate_with_ellipsis(&reply, 200), "CLI replied");
        Ok(reply)
    }
}

/// Deterministic stand-in for a real backend.
///
/// Replies `CONTINUING` for the first [`SIMULATED_CONTINUING_ITERATIONS`]
/// iterations of a job and `COMPLETE` afterwards.
#[derive(Debug, Clone, Copy, Default)]
pub struct Simulator;

impl Simulator {
    pub fn reply(iteration: u32) -> String {
        if iteration < SIMULATED_CONTINUING_ITERATIONS {
            let step = iteration + 1;
            format!(
                "[STATUS:CONTINUING]\n\
                 [ACTION:Analyzing metrics for iteration {step}]\n\
                 [FINDING:metric_{iteration}=value_{iteration}]\n\
                 [FINDING:progress={progress}%]\n\n\
                 Based on the current findings, I need to continue gathering more data to identify the root cause.",
                progress = step * 33,
            )
        } else {
            "[STATUS:COMPLETE]\n\
             [ACTION:Investigation complete - root cause identified]\n\
             [FINDING:root_cause=High latency detected in service X]\n\
             [FINDING:recommendation=Scale up instances]\n\
             [FINDING:confidence=85%]\n\
             [ANSWER:The deployment issue is caused by high latency in service X. Recommend scaling up instances.]\n\n\
             The investigation has identified that service X is experiencing high latency under load."
                .to_string()
        }
    }
}

#[async_trait]
impl GenerationBackend for Simulator {
    fn name(&self) -> &str {
        "simulator"
    }

    async fn generate(&self, _prompt: &str, iteration: u32) -> Result<String, BackendError> {
        Ok(Self::reply(iteration))
    }
}
