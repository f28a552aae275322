use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use owo_colors::OwoColorize;

use modusnap_types::PolicyTier;

use crate::commands::ExitStatus;

mod commands;
mod logging;
mod printer;

#[derive(Parser)]
#[command(name = "modusnap", author, version, about)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Do not print any progress output.
    #[arg(global = true, long, short, conflicts_with = "verbose")]
    quiet: bool,

    /// Use verbose output.
    #[arg(global = true, long, short, conflicts_with = "quiet")]
    verbose: bool,

    /// The engine checkout to operate on; discovered when omitted.
    #[arg(global = true, long, env = "MODUSNAP_BACKEND_DIR")]
    backend_dir: Option<PathBuf>,

    /// Base URL of the engine's HTTP API.
    #[arg(global = true, long, env = "MODUSNAP_ENGINE_URL")]
    engine_url: Option<String>,

    /// Subscription tier gating pack policies.
    #[arg(global = true, long, env = "MODUSNAP_TIER", value_enum, default_value = "free")]
    tier: PolicyTierArg,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum PolicyTierArg {
    Free,
    Pro,
    Enterprise,
}

impl From<PolicyTierArg> for PolicyTier {
    fn from(tier: PolicyTierArg) -> Self {
        match tier {
            PolicyTierArg::Free => Self::Free,
            PolicyTierArg::Pro => Self::Pro,
            PolicyTierArg::Enterprise => Self::Enterprise,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Engine process and log inspection.
    #[command(subcommand)]
    Backend(BackendCommands),
    /// Environment transactions over the virtualenv.
    #[command(subcommand)]
    Env(EnvCommands),
    /// Probe the engine and derive typed issues.
    #[command(subcommand)]
    Diagnostics(DiagnosticsCommands),
    /// Catalog preflight, batches, and install sessions.
    #[command(subcommand)]
    Manager(ManagerCommands),
    /// Engine snapshot passthrough.
    #[command(subcommand)]
    Snapshot(SnapshotCommands),
    /// API keys for the control-plane surface.
    #[command(subcommand)]
    Keys(KeysCommands),
}

#[derive(Subcommand)]
enum BackendCommands {
    /// Whether the engine is up, and where it lives.
    Status,
    /// Tail the engine and restart logs.
    Logs {
        /// Lines per log, clamped to 20..=500.
        #[arg(long, default_value_t = 100)]
        lines: usize,
    },
    /// Engine settings passthrough.
    #[command(subcommand)]
    Settings(SettingsCommands),
}

#[derive(Subcommand)]
enum SettingsCommands {
    Get,
    Set {
        /// JSON body to post.
        body: String,
    },
}

#[derive(Subcommand)]
enum EnvCommands {
    /// Virtualenv health and the latest transaction.
    Status,
    /// Create a planned transaction.
    Plan(PlanArgs),
    /// Execute a planned (or failed) transaction.
    Apply { id: String },
    /// Undo a transaction from its before-freeze.
    Rollback { id: String },
    /// All retained transactions, oldest first.
    List,
    /// One transaction, in full.
    Get { id: String },
}

#[derive(Args)]
struct PlanArgs {
    /// What the plan does to the environment.
    #[arg(long, value_enum, default_value = "repair")]
    mode: PlanMode,

    /// Package specifiers to install; may be given more than once.
    #[arg(long = "package")]
    packages: Vec<String>,

    /// License policies of the requested packs.
    #[arg(long = "policy")]
    policies: Vec<String>,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum PlanMode {
    Repair,
    Install,
}

#[derive(Subcommand)]
enum DiagnosticsCommands {
    /// One diagnostics pass.
    Status {
        /// Run the full subprocess probes instead of the cached fast pass.
        #[arg(long)]
        deep: bool,
    },
    /// Apply the typed fix for an issue id.
    Fix { issue: String },
}

#[derive(Subcommand)]
enum ManagerCommands {
    /// Classify items against the hardware profile before installing.
    Preflight {
        #[arg(long, default_value = "install")]
        mode: String,
        /// JSON file with the catalog items; `-` reads stdin.
        #[arg(long)]
        items: String,
    },
    /// Submit one normalized batch to the engine queue.
    Batch {
        #[arg(long, default_value = "install")]
        mode: String,
        #[arg(long)]
        items: String,
    },
    /// Run a full install session.
    Install {
        #[arg(long, value_enum, default_value = "selected")]
        scope: ScopeArg,
        #[arg(long)]
        items: String,
    },
    /// Run a full uninstall session.
    Uninstall {
        #[arg(long, value_enum, default_value = "selected")]
        scope: ScopeArg,
        #[arg(long)]
        items: String,
    },
    /// Sum the advertised sizes of a batch.
    SizeEstimate {
        #[arg(long)]
        items: String,
    },
    /// Queue job history: all ids, or one job's result.
    QueueHistory {
        #[arg(long)]
        id: Option<String>,
    },
    /// Repository to node-class mappings.
    Mappings,
    /// The current compatibility set and its history.
    #[command(subcommand)]
    Compatibility(CompatibilityCommands),
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum ScopeArg {
    Selected,
    AllVisible,
}

#[derive(Subcommand)]
enum CompatibilityCommands {
    /// Read `current` plus the capped history.
    Get,
    /// Rebuild the set for the given items.
    Post {
        #[arg(long)]
        items: String,
    },
}

#[derive(Subcommand)]
enum SnapshotCommands {
    List,
    Current,
    Save,
    Restore { target: String },
    Remove { target: String },
}

#[derive(Subcommand)]
enum KeysCommands {
    /// Mint a new `msnp_` key.
    Generate {
        #[arg(long, default_value = "default")]
        label: String,
    },
    List,
    Revoke { id: String },
}

async fn inner() -> Result<ExitStatus> {
    let cli = Cli::parse();

    logging::setup_logging(if cli.verbose {
        logging::Level::Verbose
    } else {
        logging::Level::Default
    })?;

    let printer = if cli.quiet {
        printer::Printer::Quiet
    } else if cli.verbose {
        printer::Printer::Verbose
    } else {
        printer::Printer::Default
    };

    let context = commands::Context {
        backend_dir: cli.backend_dir,
        engine_url: cli.engine_url.unwrap_or_else(modusnap_locator::engine_url),
        tier: cli.tier.into(),
        printer,
    };

    match cli.command {
        Commands::Backend(BackendCommands::Status) => commands::backend::status(&context).await,
        Commands::Backend(BackendCommands::Logs { lines }) => {
            commands::backend::logs(&context, lines).await
        }
        Commands::Backend(BackendCommands::Settings(SettingsCommands::Get)) => {
            commands::backend::settings_get(&context).await
        }
        Commands::Backend(BackendCommands::Settings(SettingsCommands::Set { body })) => {
            commands::backend::settings_set(&context, &body).await
        }
        Commands::Env(EnvCommands::Status) => commands::env::status(&context).await,
        Commands::Env(EnvCommands::Plan(args)) => {
            let kind = match args.mode {
                PlanMode::Repair => modusnap_types::TxKind::Repair,
                PlanMode::Install => modusnap_types::TxKind::Install,
            };
            commands::env::plan(&context, kind, args.packages, args.policies)
        }
        Commands::Env(EnvCommands::Apply { id }) => commands::env::apply(&context, &id).await,
        Commands::Env(EnvCommands::Rollback { id }) => commands::env::rollback(&context, &id).await,
        Commands::Env(EnvCommands::List) => commands::env::list(&context),
        Commands::Env(EnvCommands::Get { id }) => commands::env::get(&context, &id),
        Commands::Diagnostics(DiagnosticsCommands::Status { deep }) => {
            commands::diagnostics::status(&context, deep).await
        }
        Commands::Diagnostics(DiagnosticsCommands::Fix { issue }) => {
            commands::diagnostics::fix(&context, &issue).await
        }
        Commands::Manager(ManagerCommands::Preflight { mode, items }) => {
            commands::manager::preflight(&context, &mode, &items).await
        }
        Commands::Manager(ManagerCommands::Batch { mode, items }) => {
            commands::manager::batch(&context, &mode, &items).await
        }
        Commands::Manager(ManagerCommands::Install { scope, items }) => {
            commands::manager::session(
                &context,
                modusnap_types::SessionMode::Install,
                scope.into(),
                &items,
            )
            .await
        }
        Commands::Manager(ManagerCommands::Uninstall { scope, items }) => {
            commands::manager::session(
                &context,
                modusnap_types::SessionMode::Uninstall,
                scope.into(),
                &items,
            )
            .await
        }
        Commands::Manager(ManagerCommands::SizeEstimate { items }) => {
            commands::manager::size_estimate(&context, &items)
        }
        Commands::Manager(ManagerCommands::QueueHistory { id }) => {
            commands::manager::queue_history(&context, id.as_deref()).await
        }
        Commands::Manager(ManagerCommands::Mappings) => commands::manager::mappings(&context).await,
        Commands::Manager(ManagerCommands::Compatibility(CompatibilityCommands::Get)) => {
            commands::manager::compatibility_get(&context)
        }
        Commands::Manager(ManagerCommands::Compatibility(CompatibilityCommands::Post { items })) => {
            commands::manager::compatibility_post(&context, &items).await
        }
        Commands::Snapshot(SnapshotCommands::List) => commands::snapshot::list(&context).await,
        Commands::Snapshot(SnapshotCommands::Current) => commands::snapshot::current(&context).await,
        Commands::Snapshot(SnapshotCommands::Save) => commands::snapshot::save(&context).await,
        Commands::Snapshot(SnapshotCommands::Restore { target }) => {
            commands::snapshot::restore(&context, &target).await
        }
        Commands::Snapshot(SnapshotCommands::Remove { target }) => {
            commands::snapshot::remove(&context, &target).await
        }
        Commands::Keys(KeysCommands::Generate { label }) => commands::keys::generate(&context, &label),
        Commands::Keys(KeysCommands::List) => commands::keys::list(&context),
        Commands::Keys(KeysCommands::Revoke { id }) => commands::keys::revoke(&context, &id),
    }
}

impl From<ScopeArg> for modusnap_types::SessionScope {
    fn from(scope: ScopeArg) -> Self {
        match scope {
            ScopeArg::Selected => Self::Selected,
            ScopeArg::AllVisible => Self::AllVisible,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match inner().await {
        Ok(status) => status.into(),
        Err(err) => {
            #[allow(clippy::print_stderr)]
            {
                let mut causes = err.chain();
                eprintln!("{}: {}", "error".red().bold(), causes.next().unwrap());
                for cause in causes {
                    eprintln!("  {}: {cause}", "Caused by".red().bold());
                }
            }
            ExitStatus::Error.into()
        }
    }
}
