use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "skyform")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Declarative infrastructure: plan, apply and destroy resource stacks", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: <config dir>/skyform.toml)
    #[arg(long, global = true, env = "SKYFORM_CONFIG")]
    pub config: Option<PathBuf>,

    /// State directory, overriding config and SKYFORM_STATE_DIR
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show what applying a stack would change
    Plan(PlanArgs),

    /// Converge infrastructure to a stack
    Apply(ApplyArgs),

    /// Destroy every resource recorded in state
    Destroy(DestroyArgs),

    /// Inspect or edit recorded state
    #[command(subcommand)]
    State(StateCommand),

    /// List resource kinds and their properties
    Providers {
        /// Only show this kind
        kind: Option<String>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct PlanArgs {
    /// Stack file
    pub stack: PathBuf,

    /// Print the plan as JSON
    #[arg(long)]
    pub json: bool,
}

/// Options shared by commands that execute a plan
#[derive(Args)]
pub struct RunArgs {
    /// Number of changes applied in parallel
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Retries per provider call after the first attempt
    #[arg(long)]
    pub retries: Option<u32>,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Print the run result as JSON (requires --yes)
    #[arg(long, requires = "yes")]
    pub json: bool,
}

#[derive(Args)]
pub struct ApplyArgs {
    /// Stack file
    pub stack: PathBuf,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Args)]
pub struct DestroyArgs {
    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Subcommand)]
pub enum StateCommand {
    /// List recorded resources
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one record
    Show {
        /// Resource id
        id: String,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Forget a resource without destroying it
    Rm {
        /// Resource id
        id: String,

        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}
