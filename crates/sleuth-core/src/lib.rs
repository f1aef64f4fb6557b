//! # sleuth-core
//!
//! Background investigation supervisor.
//!
//! This crate provides:
//! - Interpretation of free-form generation replies into structured status
//! - The durable job store adapter with a local read-through cache
//! - The investigation engine that advances open jobs one iteration at a time
//! - Webhook notifications for completed deployment investigations
//! - The runtime host that runs both periodic polls on a dedicated thread

pub mod backend;
mod config;
pub mod engine;
mod interpreter;
pub mod notifier;
pub mod scheduler;
pub mod store;
pub mod text;

pub use backend::{BackendError, CliBackend, GenerationBackend, Simulator};
pub use config::{
    BackendConfig, CONFIG_FILE_CANDIDATES, ConfigError, EngineConfig, NotifyConfig,
    SchedulerConfig, StoreConfig, SupervisorConfig,
};
pub use engine::{InvestigationEngine, IterationOutcome};
pub use interpreter::{DEFAULT_ACTION, ResponseInterpreter};
pub use notifier::{Delivery, Notifier, NotifyError, SlackNotifier, build_payload};
pub use scheduler::{DeploymentWatcher, Supervisor, is_deployment_job};
pub use store::{
    JobStore, JobTable, JobUpdate, JsonFileTable, MemoryTable, StoreError, open_table,
};
