use anyhow::Result;
use clap::{Parser, Subcommand};
use kiln_config::BuildConfiguration;
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;
mod logging;

/// Dependency manager and prebuilt-artifact cache for native projects.
///
/// kiln resolves the packages declared in kiln.toml, checks them out at
/// deterministic revisions, builds each library once per platform and
/// toolchain, and wires the artifacts into the project.
///
/// EXAMPLES:
///     kiln init --name Demo --target Demo-iOS    Create kiln.toml
///     kiln install                               Resolve (honouring kiln.lock) and build
///     kiln update                                Re-resolve ignoring kiln.lock
///     kiln cache stats                           Show artifact cache usage
///
/// ENVIRONMENT VARIABLES:
///     KILN_LOG               tracing filter, e.g. kiln_build=debug
///     KILN_CACHE_DIR         Local artifact cache directory
///     KILN_SHARED_CACHE_DIR  Shared artifact cache directory
///     KILN_JOBS              Parallel build limit
///     KILN_TOOLCHAIN         Toolchain version used in cache keys
///     KILN_TOOLCHAIN_COMMAND Command that prints the toolchain version
///     KILN_CONFIGURATION     debug or release
#[derive(Parser)]
#[command(name = "kiln")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Flags shared by every subcommand; they override config and environment
#[derive(clap::Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// More output (-v info, -vv debug)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
    /// Project directory (defaults to the current directory)
    #[arg(long, global = true)]
    pub project: Option<PathBuf>,
    /// Parallel build limit
    #[arg(long, short = 'j', global = true)]
    pub jobs: Option<usize>,
    /// Toolchain version recorded in cache keys
    #[arg(long, global = true)]
    pub toolchain: Option<String>,
    /// Build configuration
    #[arg(long, global = true)]
    pub configuration: Option<BuildConfiguration>,
    /// Keep building independent libraries after a failure
    #[arg(long, global = true)]
    pub keep_going: bool,
    /// Build command template ({checkout} {library} {platform} {toolchain} {configuration} {output} {dependencies})
    #[arg(long, env = "KILN_BUILD_COMMAND", global = true)]
    pub build_command: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a default kiln.toml unless one exists
    ///
    /// EXAMPLES:
    ///     kiln init                                  Project named after the directory
    ///     kiln init --name Demo --target Demo-iOS --target Demo-iOSTests
    Init {
        /// Project name (defaults to the directory name)
        #[arg(long)]
        name: Option<String>,
        /// Target names (defaults to the project name)
        #[arg(long = "target")]
        targets: Vec<String>,
    },

    /// Resolve dependencies, reusing kiln.lock, then build and integrate
    #[command(visible_alias = "i")]
    Install,

    /// Resolve dependencies ignoring kiln.lock, then build and integrate
    #[command(visible_alias = "up")]
    Update,

    /// Inspect or empty the artifact cache
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
}

#[derive(Subcommand)]
enum CacheCommand {
    /// Show entry count and size
    Stats,
    /// Remove every cached artifact
    Clear,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.global.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let global = cli.global;
    match cli.command {
        Commands::Init { name, targets } => commands::init::run(&global, name, targets),
        Commands::Install => commands::install::run(&global),
        Commands::Update => commands::update::run(&global),
        Commands::Cache { command } => match command {
            CacheCommand::Stats => commands::cache::stats(&global),
            CacheCommand::Clear => commands::cache::clear(&global),
        },
    }
}
