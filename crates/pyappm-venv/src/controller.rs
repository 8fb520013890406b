use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use pyappm_core::{Error, Result};

use crate::command::{describe_command, describe_output, ToolCommand};
use crate::layout::EnvironmentSpec;
use crate::snapshot::EnvironmentSnapshot;

/// What to hand the installer: a registry name or a local file such as a wheel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageRef {
    Registry(String),
    LocalFile(PathBuf),
}

impl PackageRef {
    pub fn registry(name: impl Into<String>) -> Self {
        Self::Registry(name.into())
    }

    /// Installer argument and the name used in error context.
    pub fn display_name(&self) -> String {
        match self {
            Self::Registry(name) => name.clone(),
            Self::LocalFile(path) => path.display().to_string(),
        }
    }
}

/// Operations the synchronizer and reconstructor need from a virtual environment.
pub trait PackageEnvironment {
    fn env_dir(&self) -> PathBuf;

    fn exists(&self) -> bool;

    /// No-op when the environment already exists.
    fn create(&mut self) -> Result<()>;

    fn destroy(&mut self, missing_ok: bool) -> Result<()>;

    fn install_package(&mut self, package: &PackageRef) -> Result<()>;

    /// Removing a package that is not installed succeeds.
    fn uninstall_package(&mut self, name: &str) -> Result<()>;

    fn snapshot(&self) -> Result<EnvironmentSnapshot>;
}

/// Drives the configured creation and installer tools for one project environment.
///
/// Every call is a single blocking process invocation. Nothing is retried.
#[derive(Debug, Clone)]
pub struct EnvironmentController {
    spec: EnvironmentSpec,
}

impl EnvironmentController {
    pub fn new(spec: EnvironmentSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &EnvironmentSpec {
        &self.spec
    }

    fn installer_command(&self) -> Result<Command> {
        let tool = ToolCommand::parse(&self.spec.tools().env_lib_installer)?;
        let bin_dir = self.spec.bin_dir();

        let mut command = Command::new(resolve_program(&bin_dir, tool.program()));
        command
            .args(tool.args())
            .current_dir(self.spec.project_dir())
            .env("VIRTUAL_ENV", self.spec.env_dir())
            .env_remove("PYTHONHOME");

        let mut search_path = vec![bin_dir];
        if let Some(current) = std::env::var_os("PATH") {
            search_path.extend(std::env::split_paths(&current));
        }
        if let Ok(joined) = std::env::join_paths(search_path) {
            command.env("PATH", joined);
        }
        Ok(command)
    }

    fn run_installer(&self, command: &mut Command) -> Result<Output> {
        tracing::debug!(command = %describe_command(command), "running installer");
        command.output().map_err(|err| Error::ToolCommand {
            command: describe_command(command),
            message: format!("command failed to start: {err}"),
        })
    }
}

impl PackageEnvironment for EnvironmentController {
    fn env_dir(&self) -> PathBuf {
        self.spec.env_dir()
    }

    fn exists(&self) -> bool {
        self.spec.env_dir().is_dir()
    }

    fn create(&mut self) -> Result<()> {
        let env_dir = self.spec.env_dir();
        if env_dir.exists() {
            tracing::debug!(env_dir = %env_dir.display(), "environment already exists");
            return Ok(());
        }

        let tool = ToolCommand::parse(&self.spec.tools().env_create_tool)?;
        let mut command = Command::new(tool.program());
        command
            .args(tool.args())
            .arg(&self.spec.tools().env_name)
            .current_dir(self.spec.project_dir());

        tracing::debug!(command = %describe_command(&command), "creating environment");
        let output = command.output().map_err(|err| Error::ToolCommand {
            command: describe_command(&command),
            message: format!("command failed to start: {err}"),
        })?;
        if !output.status.success() {
            return Err(Error::EnvironmentCreation {
                env_dir,
                message: describe_output(&output),
            });
        }
        if !env_dir.is_dir() {
            return Err(Error::EnvironmentCreation {
                env_dir,
                message: format!("'{tool}' finished but the environment directory did not appear"),
            });
        }

        tracing::info!(env_dir = %env_dir.display(), "created environment");
        Ok(())
    }

    fn destroy(&mut self, missing_ok: bool) -> Result<()> {
        let env_dir = self.spec.env_dir();
        if !env_dir.exists() {
            if missing_ok {
                return Ok(());
            }
            return Err(Error::EnvironmentNotFound { env_dir });
        }

        fs::remove_dir_all(&env_dir).map_err(|err| Error::io(&env_dir, err))?;
        tracing::info!(env_dir = %env_dir.display(), "destroyed environment");
        Ok(())
    }

    fn install_package(&mut self, package: &PackageRef) -> Result<()> {
        let mut command = self.installer_command()?;
        command.arg("install");
        match package {
            PackageRef::Registry(name) => command.arg(name),
            PackageRef::LocalFile(path) => command.arg(path),
        };

        let output = self.run_installer(&mut command)?;
        if !output.status.success() {
            return Err(Error::PackageInstall {
                operation: "install".to_string(),
                package: package.display_name(),
                output: describe_output(&output),
            });
        }
        Ok(())
    }

    fn uninstall_package(&mut self, name: &str) -> Result<()> {
        if !self.snapshot()?.contains(name) {
            tracing::debug!(package = name, "package already absent");
            return Ok(());
        }

        let mut command = self.installer_command()?;
        command.args(["uninstall", "-y", name]);
        let output = self.run_installer(&mut command)?;
        if !output.status.success() {
            return Err(Error::PackageInstall {
                operation: "uninstall".to_string(),
                package: name.to_string(),
                output: describe_output(&output),
            });
        }
        Ok(())
    }

    fn snapshot(&self) -> Result<EnvironmentSnapshot> {
        let env_dir = self.spec.env_dir();
        if !env_dir.is_dir() {
            return Err(Error::EnvironmentSnapshot {
                env_dir,
                message: "environment does not exist".to_string(),
            });
        }

        let mut command = self.installer_command()?;
        command.arg("freeze");
        let output = self.run_installer(&mut command)?;
        if !output.status.success() {
            return Err(Error::EnvironmentSnapshot {
                env_dir,
                message: describe_output(&output),
            });
        }

        EnvironmentSnapshot::from_freeze_output(env_dir, &String::from_utf8_lossy(&output.stdout))
    }
}

/// Fails when a virtual environment is active in the calling shell.
///
/// Creating or rebuilding an environment from inside another one makes the tools
/// resolve against the wrong interpreter.
pub fn ensure_no_active_environment() -> Result<()> {
    check_active_environment(std::env::var_os("VIRTUAL_ENV"))
}

pub(crate) fn check_active_environment(virtual_env: Option<OsString>) -> Result<()> {
    match virtual_env {
        Some(value) if !value.is_empty() => Err(Error::EnvironmentActive {
            env_dir: PathBuf::from(value),
        }),
        _ => Ok(()),
    }
}

fn resolve_program(bin_dir: &Path, program: &str) -> PathBuf {
    if Path::new(program).components().count() == 1 {
        let candidates = if cfg!(windows) {
            vec![bin_dir.join(format!("{program}.exe")), bin_dir.join(program)]
        } else {
            vec![bin_dir.join(program)]
        };
        if let Some(found) = candidates.into_iter().find(|candidate| candidate.is_file()) {
            return found;
        }
    }
    PathBuf::from(program)
}
