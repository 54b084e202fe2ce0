//! MonoCF CLI - run wrangler dev/deploy across a workers monorepo

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use monocf::command::{self, CommandParams, WorkerOrchestrator, WorkerSelection};
use monocf::process::{Passthrough, ProcessRunner};
use monocf::project::{ProjectSettings, SettingsOverrides};
use monocf::{FixSuggestion, WorkerError};

/// Exit code after Ctrl-C
const INTERRUPTED: i32 = 130;

#[derive(Parser)]
#[command(name = "monocf")]
#[command(about = "MonoCF - run wrangler dev/deploy for workers in a monorepo")]
#[command(version)]
struct Cli {
    /// Debug logging (RUST_LOG takes precedence)
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run dev or deploy for one worker or every worker
    Worker(WorkerArgs),

    /// Show the account the tool is logged in with
    Whoami {
        /// Tool binary (default: wrangler)
        #[arg(long)]
        tool: Option<String>,
    },
}

#[derive(Args)]
struct WorkerArgs {
    /// Worker directory name
    name: Option<String>,

    /// Command to run
    #[arg(short, long, value_enum)]
    command: CommandKind,

    /// Run for every worker
    #[arg(short, long)]
    all: bool,

    /// Environment (dev, staging, production...)
    #[arg(short, long)]
    env: Option<String>,

    /// Base config, relative to the root dir
    #[arg(short, long)]
    base_config: Option<PathBuf>,

    /// Upload merged env files as secrets after deploy
    #[arg(short = 's', long)]
    deploy_secrets: bool,

    /// Project root directory
    #[arg(short, long)]
    root_dir: Option<PathBuf>,

    /// Workers directory name under the root
    #[arg(short, long = "workers-dir")]
    workers_dir: Option<String>,

    /// Tool binary (default: wrangler)
    #[arg(long)]
    tool: Option<String>,

    /// Kill the tool after this many seconds
    #[arg(long)]
    tool_timeout: Option<u64>,
}

#[derive(Clone, Copy, ValueEnum)]
enum CommandKind {
    Dev,
    Deploy,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "monocf=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    // Dropping the run future on Ctrl-C rolls back env files and removes
    // temp artifacts before exiting.
    let result = tokio::select! {
        result = run(cli.command) => Some(result),
        _ = interrupted() => None,
    };
    let Some(result) = result else {
        eprintln!("{}", "Interrupted".yellow());
        std::process::exit(INTERRUPTED);
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        if let Some(suggestion) = e.fix_suggestion() {
            eprintln!("  {} {}", "Fix:".yellow(), suggestion);
        }
        std::process::exit(e.process_exit_code());
    }
}

/// Resolves on Ctrl-C; never when the handler cannot be installed
async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn run(subcommand: Commands) -> Result<(), WorkerError> {
    let cwd = std::env::current_dir().map_err(|e| {
        WorkerError::configuration(format!("Cannot read current directory: {}", e))
    })?;

    match subcommand {
        Commands::Worker(args) => run_worker(&cwd, args).await,
        Commands::Whoami { tool } => {
            let overrides = SettingsOverrides {
                tool,
                ..Default::default()
            };
            let settings = ProjectSettings::load(&cwd, overrides)?;
            let runner = ProcessRunner::new(settings.tool).with_timeout(settings.tool_timeout);
            command::whoami(&runner, &mut Passthrough).await
        }
    }
}

async fn run_worker(cwd: &std::path::Path, args: WorkerArgs) -> Result<(), WorkerError> {
    let overrides = SettingsOverrides {
        root_dir: args.root_dir,
        workers_dir_name: args.workers_dir,
        base_config: args.base_config,
        deploy_secrets: args.deploy_secrets,
        tool: args.tool,
        tool_timeout_secs: args.tool_timeout,
    };
    let settings = ProjectSettings::load(cwd, overrides)?;

    let params = match args.command {
        CommandKind::Dev => CommandParams::Dev,
        CommandKind::Deploy => CommandParams::Deploy {
            deploy_secrets: settings.deploy_secrets,
        },
    };
    let selection = WorkerSelection::from_args(params, args.name, args.all)?;

    let runner = ProcessRunner::new(settings.tool.clone()).with_timeout(settings.tool_timeout);
    let orchestrator =
        WorkerOrchestrator::new(settings, runner, args.env).with_status_lines(true);
    orchestrator
        .execute(params, &selection, &mut Passthrough)
        .await
}
