//! `sleuth`: operate the background investigation supervisor.

mod jobs;
mod parse_reply;
mod run;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sleuth_core::SupervisorConfig;
use std::future::Future;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sleuth", version, about = "Background investigation supervisor")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: sleuth.yml or sleuth.yaml in the current directory)
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run both periodic polls until Ctrl-C
    Run,
    /// Create an investigation
    Create(jobs::CreateArgs),
    /// Print one investigation
    Show(jobs::JobArgs),
    /// Force an investigation to complete
    Stop(jobs::JobArgs),
    /// Run one master poll and one deployment poll now
    Step,
    /// Interpret a backend reply and print the result as JSON
    Parse(parse_reply::ParseArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = || -> Result<SupervisorConfig> {
        let root = std::env::current_dir().context("Failed to get current directory")?;
        load_config(cli.config.as_deref(), &root)
    };

    match &cli.command {
        Commands::Run => run::execute(&config()?),
        Commands::Create(args) => block_on(jobs::create(&config()?, args)),
        Commands::Show(args) => block_on(jobs::show(&config()?, &args.job_id)),
        Commands::Stop(args) => block_on(jobs::stop(&config()?, &args.job_id)),
        Commands::Step => block_on(jobs::step(&config()?)),
        Commands::Parse(args) => parse_reply::execute(args),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(explicit: Option<&Path>, root: &Path) -> Result<SupervisorConfig> {
    SupervisorConfig::load(explicit, root).context("Failed to load configuration")
}

/// Drives `future` on a current-thread runtime owned by the caller.
fn block_on<F>(future: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start tokio runtime")?
        .block_on(future)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_create_with_context() {
        let cli = Cli::parse_from([
            "sleuth",
            "--verbose",
            "create",
            "Why is memory high?",
            "--context",
            "service=checkout",
            "--context",
            "memory_pct=91.5",
            "--id",
            "job-1",
        ]);
        assert!(cli.verbose);
        match cli.command {
            Commands::Create(args) => {
                assert_eq!(args.question, "Why is memory high?");
                assert_eq!(args.context.len(), 2);
                assert_eq!(args.id.as_deref(), Some("job-1"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_global_config_flag_after_subcommand() {
        let cli = Cli::parse_from(["sleuth", "step", "--config", "ops/sleuth.yml"]);
        assert_eq!(cli.config, Some(PathBuf::from("ops/sleuth.yml")));
        assert!(matches!(cli.command, Commands::Step));
    }
}
