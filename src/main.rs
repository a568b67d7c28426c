use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgGroup, Parser, Subcommand};

use ralph_autopilot::logging;

mod commands;

use commands::{Output, Project};

#[derive(Parser)]
#[command(
    name = "autopilot",
    about = "Drive a feature queue through an external coding agent",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project root (defaults to the current directory)
    #[arg(long, short = 'C', default_value = ".")]
    project: PathBuf,

    /// Log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Dispatch eligible features until the queue is done or stalls
    Run {
        /// Maximum concurrent workers
        #[arg(long)]
        max_concurrency: Option<usize>,

        /// Agent command to run per feature
        #[arg(long)]
        agent: Option<String>,

        /// Defer every blocker instead of prompting
        #[arg(long)]
        non_interactive: bool,
    },

    /// Request a drain: in-flight work finishes, nothing new starts
    Pause {
        /// Reason recorded in the control file
        #[arg(long, default_value = "manual pause")]
        reason: String,
    },

    /// Clear a drain request
    Resume,

    /// Show drain state, queue counts and the next eligible features
    Status {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Import features from a JSON array
    Import {
        /// Path to the features file
        file: PathBuf,
    },

    /// Re-detect dependencies across every feature
    AnalyzeDependencies,

    /// Resolve a feature's blockers and move it to the front of the queue
    #[command(group(ArgGroup::new("target").required(true).args(["feature_id", "all"])))]
    Unblock {
        /// Feature to unblock
        feature_id: Option<u64>,

        /// Unblock every blocked feature
        #[arg(long)]
        all: bool,
    },

    /// List blocked features grouped by blocker type
    ShowBlockers {
        /// Include blocker descriptions and required values
        #[arg(long = "verbose")]
        details: bool,
    },

    /// Show what a feature depends on and what depends on it
    ShowDependencies {
        feature_id: u64,
    },

    /// List recorded assumptions
    Assumptions,

    /// Mark an assumption valid or invalid
    #[command(group(ArgGroup::new("verdict").required(true).args(["valid", "invalid"])))]
    ResolveAssumption {
        id: u64,

        #[arg(long)]
        valid: bool,

        /// Reopens the feature that made the assumption
        #[arg(long)]
        invalid: bool,
    },

    /// Run the checkpoint quality gate now
    Checkpoint,

    /// List recorded checkpoint runs
    Checkpoints,

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let out = Output::detect();
    let project = match Project::open(&cli.project) {
        Ok(project) => project,
        Err(err) => {
            eprintln!("{} {}", out.error("error:"), err);
            return ExitCode::from(2);
        }
    };

    let result = match cli.command {
        Commands::Run {
            max_concurrency,
            agent,
            non_interactive,
        } => commands::queue::run(&project, &out, max_concurrency, agent, non_interactive).await,
        Commands::Pause { reason } => commands::queue::pause(&project, &out, &reason),
        Commands::Resume => commands::queue::resume(&project, &out),
        Commands::Status { json } => commands::queue::status(&project, &out, json),
        Commands::Import { file } => commands::queue::import(&project, &out, &file),
        Commands::AnalyzeDependencies => commands::queue::analyze_dependencies(&project, &out),
        Commands::Unblock { feature_id, all } => {
            commands::blockers::unblock(&project, &out, feature_id, all)
        }
        Commands::ShowBlockers { details } => {
            commands::blockers::show_blockers(&project, &out, details)
        }
        Commands::ShowDependencies { feature_id } => {
            commands::blockers::show_dependencies(&project, &out, feature_id)
        }
        Commands::Assumptions => commands::blockers::assumptions(&project, &out),
        Commands::ResolveAssumption { id, valid, .. } => {
            commands::blockers::resolve_assumption(&project, &out, id, valid)
        }
        Commands::Checkpoint => commands::checkpoints::checkpoint(&project, &out).await,
        Commands::Checkpoints => commands::checkpoints::checkpoints(&project, &out),
        Commands::Config => commands::checkpoints::config(&project),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if err.is_invalid_target() => {
            eprintln!("{} {}", out.error("error:"), err);
            ExitCode::from(1)
        }
        Err(err) => {
            eprintln!("{} {}", out.error("error:"), err);
            ExitCode::from(2)
        }
    }
}
