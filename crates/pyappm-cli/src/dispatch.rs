use std::path::PathBuf;

use anyhow::{Context, Result};
use pyappm_core::{default_user_home, Error, GlobalConfig, UserLayout};

use crate::command_flows::{
    locate_project, run_add, run_deps, run_env_create, run_env_destroy, run_env_list, run_init,
    run_remove, run_sync, ProjectContext,
};
use crate::completion::write_completions_script;
use crate::core_flows::{
    open_registry, run_apps, run_install, run_list, run_publish, run_repo_add, run_repo_list,
    run_repo_remove, run_uninstall, InstallRequest, PublishRequest,
};
use crate::render::TerminalRenderer;
use crate::{Cli, Commands, EnvCommands, RepoCommands};

pub(crate) fn run_cli(cli: Cli) -> Result<()> {
    if let Commands::Completions { shell } = &cli.command {
        return write_completions_script(*shell, &mut std::io::stdout().lock());
    }

    let renderer = TerminalRenderer::current();
    let home = default_user_home()?;
    let layout = UserLayout::new(&home);
    let config = GlobalConfig::load_or_init(&layout.config_path())?;
    let cwd = std::env::current_dir().context("failed to read current directory")?;
    let project = || locate_project(cli.project.as_deref(), &cwd, Some(home.as_path()));

    match &cli.command {
        Commands::Init { name, no_env } => {
            let dir: PathBuf = cli.project.clone().unwrap_or_else(|| cwd.clone());
            run_init(&dir, name, *no_env, &config, renderer)?;
        }
        Commands::Add { name, file } => run_add(&project()?, name, file.clone(), renderer)?,
        Commands::Remove { name } => run_remove(&project()?, name, renderer)?,
        Commands::Deps => run_deps(&project()?, renderer)?,
        Commands::Env { command } => {
            let project: ProjectContext = project()?;
            match command {
                EnvCommands::Create => run_env_create(&project, renderer)?,
                EnvCommands::Destroy { missing_ok } => {
                    run_env_destroy(&project, *missing_ok, renderer)?
                }
                EnvCommands::List => run_env_list(&project, renderer)?,
            }
        }
        Commands::Sync { recreate } => run_sync(&project()?, *recreate, renderer)?,
        Commands::Repo { command } => {
            let registry = open_registry(&layout, &config);
            match command {
                RepoCommands::List => run_repo_list(&registry)?,
                RepoCommands::Add { name, url } => run_repo_add(&registry, name, url, renderer)?,
                RepoCommands::Remove { name } => run_repo_remove(&registry, name, renderer)?,
            }
        }
        Commands::Apps => run_apps(&open_registry(&layout, &config), renderer)?,
        Commands::Install {
            name,
            app_version,
            repository,
            refresh,
        } => {
            let request = InstallRequest {
                name,
                version: app_version.as_deref(),
                repository: repository.as_deref(),
                refresh: *refresh,
            };
            run_install(&layout, &open_registry(&layout, &config), &request, renderer)?;
        }
        Commands::Uninstall { name } => run_uninstall(&layout, name, renderer)?,
        Commands::List => run_list(&layout)?,
        Commands::Publish {
            archive,
            repository,
            username,
            token,
        } => {
            let request = PublishRequest {
                archive,
                repository: repository.as_deref(),
                username: username.as_deref(),
                token: token.clone().or_else(|| std::env::var("PYAPPM_TOKEN").ok()),
                password: std::env::var("PYAPPM_PASSWORD").ok(),
            };
            run_publish(&open_registry(&layout, &config), request, renderer)?;
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}

/// Process exit status for a failed command; library error kinds get distinct codes.
pub(crate) fn exit_code_for(err: &anyhow::Error) -> u8 {
    let Some(error) = err.chain().find_map(|cause| cause.downcast_ref::<Error>()) else {
        return 1;
    };
    match error {
        Error::ManifestNotFound { .. } | Error::ManifestExists { .. } => 2,
        Error::ManifestParse { .. } | Error::ConfigParse { .. } | Error::RegistryParse { .. } => 3,
        Error::EnvironmentCreation { .. }
        | Error::EnvironmentNotFound { .. }
        | Error::EnvironmentSnapshot { .. }
        | Error::EnvironmentActive { .. } => 4,
        Error::PackageInstall { .. } => 5,
        Error::DependencyNotFound { .. } => 6,
        Error::DuplicateRepository { .. }
        | Error::RepositoryNotFound { .. }
        | Error::InvalidRepository { .. } => 7,
        Error::RepositoryUnreachable { .. } | Error::RepositoryProtocol { .. } => 8,
        Error::ApplicationNotFound { .. } => 9,
        Error::Authentication { .. } | Error::UploadRejected { .. } => 10,
        Error::ToolCommand { .. } => 11,
        Error::Io { .. } => 12,
    }
}
