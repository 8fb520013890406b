use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use tracing_subscriber::EnvFilter;

mod command_flows;
mod completion;
mod core_flows;
mod dispatch;
mod launchers;
mod render;

use dispatch::{exit_code_for, run_cli};

/// pyappm - manage Python application projects and their environments
#[derive(Parser, Debug)]
#[command(name = "pyappm")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Project directory (default: nearest directory with a pyapp.toml)
    #[arg(long, global = true)]
    project: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a pyapp.toml for a new project
    Init {
        name: String,
        /// Do not create the virtual environment
        #[arg(long)]
        no_env: bool,
    },
    /// Install a dependency and record it in the manifest
    Add {
        name: String,
        /// Install from a local distribution file instead of the package index
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Uninstall a dependency and drop its record
    Remove { name: String },
    /// List recorded dependencies
    Deps,
    /// Manage the project's virtual environment
    Env {
        #[command(subcommand)]
        command: EnvCommands,
    },
    /// Rebuild the virtual environment from the manifest
    Sync {
        /// Destroy the existing environment first
        #[arg(long)]
        recreate: bool,
    },
    /// Manage application repositories
    Repo {
        #[command(subcommand)]
        command: RepoCommands,
    },
    /// List applications offered by all repositories
    Apps,
    /// Install an application from a repository or a local .pap archive
    Install {
        /// Application name, or path to a .pap archive
        name: String,
        #[arg(long = "version")]
        app_version: Option<String>,
        /// Only look in this repository
        #[arg(long)]
        repository: Option<String>,
        /// Download again even when a cached archive exists
        #[arg(long)]
        refresh: bool,
    },
    /// Remove an installed application and its launchers
    Uninstall { name: String },
    /// List installed applications
    List,
    /// Upload an application archive to a repository
    Publish {
        archive: PathBuf,
        #[arg(long)]
        repository: Option<String>,
        #[arg(long)]
        username: Option<String>,
        /// Session token (falls back to PYAPPM_TOKEN)
        #[arg(long)]
        token: Option<String>,
    },
    /// Print a shell completion script
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand, Debug)]
enum EnvCommands {
    Create,
    Destroy {
        /// Succeed when no environment exists
        #[arg(long)]
        missing_ok: bool,
    },
    /// List packages installed in the environment
    List,
}

#[derive(Subcommand, Debug)]
enum RepoCommands {
    List,
    Add { name: String, url: String },
    Remove { name: String },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run_cli(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("PYAPPM_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .try_init();
}

#[cfg(test)]
mod tests;
