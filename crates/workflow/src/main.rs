//! Forgeflow CLI - natural language to deployed contract.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::{DirectoryValidator, ForgeflowConfig, UploadScope};
use model::RagScope;
use workflow::{summary, Orchestrator, RunOptions};

/// Forgeflow - resilient contract generation workflows.
#[derive(Parser)]
#[command(name = "forgeflow")]
#[command(about = "Generate, compile, audit, deploy, and verify smart contracts from natural language")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to a JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Workspace root (defaults to the config's workspace_dir or `.`)
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum UploadScopeArg {
    None,
    Team,
    Community,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RagScopeArg {
    #[value(name = "official-only")]
    OfficialOnly,
    #[value(name = "community-allowed")]
    CommunityAllowed,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow from a natural-language prompt
    Run {
        /// What to build, e.g. "ERC20 token named TestToken symbol TEST"
        prompt: String,

        /// Target network name
        #[arg(long, default_value = "hyperion")]
        network: String,

        /// Skip deployment and verification
        #[arg(long)]
        test_only: bool,

        /// Deploy even when the audit reports high or critical findings
        #[arg(long)]
        allow_insecure: bool,

        /// Skip explorer verification after deployment
        #[arg(long)]
        no_verify: bool,

        /// Upload the workflow context to the artifact store
        #[arg(long, value_enum, default_value = "none")]
        upload_scope: UploadScopeArg,

        /// Which registries retrieval may draw context from
        #[arg(long, value_enum, default_value = "official-only")]
        rag_scope: RagScopeArg,
    },

    /// Inspect agent memory
    Memory {
        #[command(subcommand)]
        command: MemoryCommands,
    },

    /// Inspect model performance
    Models {
        #[command(subcommand)]
        command: ModelCommands,
    },
}

#[derive(Subcommand)]
enum MemoryCommands {
    /// Print aggregate memory statistics
    Stats,
}

#[derive(Subcommand)]
enum ModelCommands {
    /// Print per-model performance statistics
    Stats,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    let mut config = match &cli.config {
        Some(path) => match ForgeflowConfig::from_json_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("configuration error: {e}");
                return ExitCode::from(2);
            }
        },
        None => ForgeflowConfig::builtin(),
    };
    if let Some(workspace) = &cli.workspace {
        config.workspace_dir = Some(workspace.clone());
    }

    // Startup directory validation is fail-loud: missing directories are
    // created, anything unfixable aborts with the fix hints printed.
    let validator = DirectoryValidator::new(config.workspace_dir());
    if let Err(e) = validator.validate_or_fail() {
        eprintln!("{e}");
        return ExitCode::from(2);
    }

    match cli.command {
        Commands::Run {
            prompt,
            network,
            test_only,
            allow_insecure,
            no_verify,
            upload_scope,
            rag_scope,
        } => {
            let orchestrator = Orchestrator::new(config);

            // Ctrl-C cancels the in-flight stage and jumps to output.
            let cancel = orchestrator.cancel_handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Cancellation requested; finishing up");
                    cancel.send_replace(true);
                }
            });

            let options = RunOptions {
                network,
                auto_verification: !no_verify,
                test_only,
                allow_insecure,
                upload_scope: match upload_scope {
                    UploadScopeArg::None => UploadScope::None,
                    UploadScopeArg::Team => UploadScope::Team,
                    UploadScopeArg::Community => UploadScope::Community,
                },
                rag_scope: match rag_scope {
                    RagScopeArg::OfficialOnly => RagScope::OfficialOnly,
                    RagScopeArg::CommunityAllowed => RagScope::CommunityAllowed,
                },
            };

            let ctx = orchestrator.run(&prompt, options).await;
            summary::print_summary(&ctx);
            ExitCode::from(u8::try_from(summary::exit_code(&ctx)).unwrap_or(1))
        }

        Commands::Memory { command } => match command {
            MemoryCommands::Stats => {
                let orchestrator = Orchestrator::new(config);
                let stats = orchestrator.memory().statistics();
                match serde_json::to_string_pretty(&stats) {
                    Ok(rendered) => println!("{rendered}"),
                    Err(e) => eprintln!("failed to render statistics: {e}"),
                }
                ExitCode::SUCCESS
            }
        },

        Commands::Models { command } => match command {
            ModelCommands::Stats => {
                let orchestrator = Orchestrator::new(config);
                let stats = orchestrator.tracker().statistics();
                match serde_json::to_string_pretty(&stats) {
                    Ok(rendered) => println!("{rendered}"),
                    Err(e) => eprintln!("failed to render statistics: {e}"),
                }
                ExitCode::SUCCESS
            }
        },
    }
}
