//! Runtime host for the periodic tasks.
//!
//! [`Supervisor`] owns one dedicated thread running a single-threaded tokio
//! runtime. Two periodic tasks run on it: the master poll, which advances
//! every open investigation, and the deployment poll, which announces
//! completed deployment investigations. Callers on other threads only
//! enqueue work onto the loop ([`Supervisor::submit`]) or read the local
//! cache.

mod pollers;

pub use pollers::{DeploymentWatcher, is_deployment_job};

use sleuth_proto::{Error, Job, Result};
use std::future::Future;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::SupervisorConfig;
use crate::engine::InvestigationEngine;
use crate::notifier::{Notifier, SlackNotifier};
use crate::store::{JobStore, open_table};

/// Handles to a running host thread.
struct HostThread {
    handle: Handle,
    shutdown: watch::Sender<bool>,
    exited: std_mpsc::Receiver<()>,
    thread: JoinHandle<()>,
}

impl HostThread {
    fn is_alive(&self) -> bool {
        !self.thread.is_finished()
    }
}

/// Background investigation supervisor.
pub struct Supervisor {
    engine: Arc<InvestigationEngine>,
    notifier: Arc<dyn Notifier>,
    deployment_terms: Vec<String>,
    message: String,
    master_interval: Duration,
    deploy_interval: Duration,
    startup_wait: Duration,
    shutdown_timeout: Duration,
    host: Mutex<Option<HostThread>>,
}

impl Supervisor {
    pub fn new(
        engine: Arc<InvestigationEngine>,
        notifier: Arc<dyn Notifier>,
        config: &SupervisorConfig,
    ) -> Self {
        Self {
            engine,
            notifier,
            deployment_terms: config.engine.deployment_terms.clone(),
            message: config.notify.message.clone(),
            master_interval: config.scheduler.master_interval(),
            deploy_interval: config.scheduler.deploy_interval(),
            startup_wait: config.scheduler.startup_wait(),
            shutdown_timeout: config.scheduler.shutdown_timeout(),
            host: Mutex::new(None),
        }
    }

    /// Wires store, engine and webhook notifier from `config`.
    pub fn from_config(config: &SupervisorConfig) -> Result<Self> {
        let store = Arc::new(JobStore::new(open_table(&config.store)));
        let engine = Arc::new(InvestigationEngine::from_config(store, config));
        let notifier = Arc::new(SlackNotifier::from_config(&config.notify)?);
        if !notifier.is_enabled() {
            warn!("No webhook URL configured, deployment notifications are disabled");
        }
        Ok(Self::new(engine, notifier, config))
    }

    /// Overrides both poll periods.
    #[must_use]
    pub fn with_intervals(mut self, master: Duration, deploy: Duration) -> Self {
        self.master_interval = master;
        self.deploy_interval = deploy;
        self
    }

    pub fn engine(&self) -> &Arc<InvestigationEngine> {
        &self.engine
    }

    pub fn store(&self) -> &Arc<JobStore> {
        self.engine.store()
    }

    /// Starts the host thread and its periodic tasks.
    ///
    /// Calling `start` while already running does nothing. Blocks until the
    /// loop is live, for at most the configured startup wait.
    pub fn start(&self) -> Result<()> {
        let mut host = self.host.lock().unwrap_or_else(PoisonError::into_inner);
        if host.as_ref().is_some_and(HostThread::is_alive) {
            info!("Supervisor already running");
            return Ok(());
        }

        let (ready_tx, ready_rx) = std_mpsc::channel::<std::result::Result<Handle, String>>();
        let (exit_tx, exit_rx) = std_mpsc::channel::<()>();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let tasks = HostTasks {
            engine: self.engine.clone(),
            watcher: DeploymentWatcher::new(
                self.engine.store().clone(),
                self.notifier.clone(),
                self.deployment_terms.clone(),
                self.message.clone(),
            ),
            master_interval: self.master_interval,
            deploy_interval: self.deploy_interval,
        };

        let thread = std::thread::Builder::new()
            .name("sleuth-supervisor".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                runtime.block_on(tasks.run(shutdown_rx, ready_tx));
                runtime.shutdown_timeout(Duration::from_secs(1));
                let _ = exit_tx.send(());
            })
            .map_err(|e| Error::Join(format!("cannot spawn supervisor thread: {e}")))?;

        match ready_rx.recv_timeout(self.startup_wait) {
            Ok(Ok(handle)) => {
                *host = Some(HostThread {
                    handle,
                    shutdown: shutdown_tx,
                    exited: exit_rx,
                    thread,
                });
                info!(
                    master_secs = self.master_interval.as_secs_f64(),
                    deploy_secs = self.deploy_interval.as_secs_f64(),
                    "Supervisor started"
                );
                Ok(())
            }
            Ok(Err(reason)) => Err(Error::Join(format!("runtime failed to start: {reason}"))),
            Err(_) => {
                let _ = shutdown_tx.send(true);
                Err(Error::Timeout(self.startup_wait.as_millis() as u64))
            }
        }
    }

    /// Signals the loop to stop and waits for the thread, bounded by the
    /// shutdown timeout. Does nothing when not started.
    pub fn stop(&self) {
        let Some(host) = self
            .host
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            debug!("Supervisor not running, nothing to stop");
            return;
        };

        let _ = host.shutdown.send(true);
        match host.exited.recv_timeout(self.shutdown_timeout) {
            Ok(()) | Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                if host.thread.join().is_err() {
                    error!("Supervisor thread panicked");
                }
                info!("Supervisor stopped");
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                warn!(
                    timeout_secs = self.shutdown_timeout.as_secs(),
                    "Supervisor thread did not exit in time, detaching"
                );
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.host
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(HostThread::is_alive)
    }

    /// Runs `future` on the supervisor loop and blocks for its output.
    ///
    /// Must not be called from the loop thread itself.
    pub fn submit<F, T>(&self, future: F) -> Result<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let handle = self
            .host
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|host| host.is_alive())
            .map(|host| host.handle.clone())
            .ok_or(Error::NotRunning)?;

        let (tx, rx) = std_mpsc::channel();
        handle.spawn(async move {
            let _ = tx.send(future.await);
        });
        rx.recv()
            .map_err(|_| Error::Join("supervisor loop dropped the task".to_string()))
    }

    /// Creates an investigation on the loop and returns its id.
    pub fn create_investigation(
        &self,
        question: &str,
        initial_context: serde_json::Map<String, serde_json::Value>,
        job_id: Option<String>,
    ) -> Result<String> {
        let engine = self.engine.clone();
        let question = question.to_string();
        self.submit(async move { engine.create(&question, initial_context, job_id).await })?
            .map_err(Error::from)
    }

    /// Forces an investigation to complete. Returns `false` if it is unknown.
    pub fn stop_investigation(&self, job_id: &str) -> Result<bool> {
        let engine = self.engine.clone();
        let job_id = job_id.to_string();
        self.submit(async move { engine.stop(&job_id).await })
    }

    /// Cached state of one investigation.
    pub fn job(&self, job_id: &str) -> Option<Job> {
        self.store().cached(job_id)
    }

    /// Open investigations known to the local cache.
    pub fn active_jobs(&self) -> Vec<Job> {
        self.store().active_jobs()
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State moved onto the host thread.
struct HostTasks {
    engine: Arc<InvestigationEngine>,
    watcher: DeploymentWatcher,
    master_interval: Duration,
    deploy_interval: Duration,
}

impl HostTasks {
    async fn run(
        self,
        shutdown: watch::Receiver<bool>,
        ready: std_mpsc::Sender<std::result::Result<Handle, String>>,
    ) {
        let engine = self.engine;
        let master = tokio::spawn(periodic(
            "master_poll",
            self.master_interval,
            shutdown.clone(),
            move || {
                let engine = engine.clone();
                async move { engine.poll_open().await.map(|_| ()).map_err(Error::from) }
            },
        ));

        let watcher = Arc::new(AsyncMutex::new(self.watcher));
        let deploy = tokio::spawn(periodic(
            "deployment_poll",
            self.deploy_interval,
            shutdown,
            move || {
                let watcher = watcher.clone();
                async move {
                    watcher
                        .lock()
                        .await
                        .tick()
                        .await
                        .map(|_| ())
                        .map_err(Error::from)
                }
            },
        ));

        let _ = ready.send(Ok(Handle::current()));
        let _ = tokio::join!(master, deploy);
    }
}

/// Runs `tick` every `period` until shutdown is signalled.
///
/// The first run happens one period after start. Each run is spawned as its
/// own task, so an error or panic is logged and the schedule continues.
/// Missed ticks are skipped rather than bunched.
async fn periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        debug!(task = name, "Tick");
        let run = tokio::spawn(tick());
        tokio::select! {
            outcome = run => match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(task = name, error = %e, "Periodic task failed"),
                Err(e) => error!(task = name, error = %e, "Periodic task panicked"),
            },
            _ = shutdown.changed() => break,
        }
    }

    info!(task = name, "Periodic task stopped");
}
