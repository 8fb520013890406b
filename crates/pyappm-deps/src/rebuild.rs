use std::path::PathBuf;

use pyappm_core::{Error, Manifest, Result};
use pyappm_venv::{PackageEnvironment, PackageRef};
use tracing::{debug, info};

/// Packages the application runtime itself needs; never recorded as dependencies.
pub const RUNTIME_PACKAGES: &[&str] = &["tomli", "tomli-w"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildOptions {
    /// Destroy an existing environment before creating it.
    pub recreate: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildReport {
    pub recreated: bool,
    pub runtime_packages: Vec<String>,
    pub dependencies: Vec<String>,
}

/// Replays a manifest's top-level dependency names into an environment.
///
/// Registry records install by name, then local records install from their file under
/// the project directory (the environment directory's parent). `new_packages` are never
/// installed directly; the installer resolves transitive requirements again. The first failing install aborts and the partly built
/// environment is left in place.
pub struct EnvironmentReconstructor<'a, E: PackageEnvironment> {
    env: &'a mut E,
    options: RebuildOptions,
}

impl<'a, E: PackageEnvironment> EnvironmentReconstructor<'a, E> {
    pub fn new(env: &'a mut E) -> Self {
        Self {
            env,
            options: RebuildOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RebuildOptions) -> Self {
        self.options = options;
        self
    }

    pub fn rebuild(&mut self, manifest: &Manifest) -> Result<RebuildReport> {
        let mut report = RebuildReport::default();

        if self.options.recreate && self.env.exists() {
            self.env.destroy(true)?;
            report.recreated = true;
        }
        self.env.create()?;

        for name in RUNTIME_PACKAGES {
            debug!(package = *name, "installing runtime package");
            self.env.install_package(&PackageRef::registry(*name))?;
            report.runtime_packages.push(name.to_string());
        }

        for record in manifest.dependencies() {
            debug!(package = %record.name, "installing recorded dependency");
            self.env.install_package(&PackageRef::registry(record.name.as_str()))?;
            report.dependencies.push(record.name.clone());
        }

        let project_dir = self
            .env
            .env_dir()
            .parent()
            .map(PathBuf::from)
            .unwrap_or_default();
        for record in manifest.local_dependencies() {
            let file = record.file.as_deref().ok_or_else(|| Error::PackageInstall {
                operation: "install".to_string(),
                package: record.name.clone(),
                output: "local dependency record does not name a file".to_string(),
            })?;
            let path = project_dir.join(file);
            debug!(package = %record.name, file = %path.display(), "installing local dependency");
            self.env.install_package(&PackageRef::LocalFile(path))?;
            report.dependencies.push(record.name.clone());
        }

        info!(
            project = %manifest.project.name,
            env_dir = %self.env.env_dir().display(),
            dependencies = report.dependencies.len(),
            "rebuilt environment"
        );
        Ok(report)
    }
}
