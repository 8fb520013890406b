use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use pyappm_core::{remove_file_if_exists, DependencyRecord, Error, Manifest, Result};
use pyappm_venv::{diff_snapshots, PackageEnvironment, PackageRef};
use tracing::{debug, info};

/// Project subdirectory holding copies of local distribution files.
pub const DEPS_DIR_NAME: &str = "deps";

/// Where an added dependency is installed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencySource {
    /// Resolve the dependency name against the installer's package index.
    Registry,
    /// Copy a local distribution file into the project's `deps/` directory and install it
    /// from there. Recorded under `local_dependencies`.
    LocalFile(PathBuf),
}

/// A local distribution file placed under `deps/` for one add.
struct StagedFile {
    path: PathBuf,
    relative: String,
    copied: bool,
}

impl StagedFile {
    fn discard(&self) {
        if self.copied {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Keeps a manifest's dependency records in step with one environment.
///
/// Each call loads the manifest fresh, mutates the environment, and saves the manifest
/// only after the environment change succeeded.
pub struct DependencySynchronizer<'a, E: PackageEnvironment> {
    env: &'a mut E,
    manifest_path: PathBuf,
}

impl<'a, E: PackageEnvironment> DependencySynchronizer<'a, E> {
    pub fn new(env: &'a mut E, manifest_path: impl Into<PathBuf>) -> Self {
        Self {
            env,
            manifest_path: manifest_path.into(),
        }
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    /// Installs `name` and appends a record listing the packages that appeared with it.
    pub fn add(&mut self, name: &str, source: &DependencySource) -> Result<DependencyRecord> {
        let mut manifest = Manifest::load(&self.manifest_path)?;
        let staged = match source {
            DependencySource::Registry => None,
            DependencySource::LocalFile(path) => Some(self.stage_local_file(path)?),
        };

        let recorded = self
            .install_and_diff(name, staged.as_ref())
            .and_then(|record| {
                let record = match &staged {
                    Some(staged) => {
                        let record = record.with_file(staged.relative.clone());
                        manifest.push_local_dependency(record.clone());
                        record
                    }
                    None => {
                        manifest.push_dependency(record.clone());
                        record
                    }
                };
                manifest.save(&self.manifest_path)?;
                Ok(record)
            });
        let record = match recorded {
            Ok(record) => record,
            Err(err) => {
                if let Some(staged) = &staged {
                    staged.discard();
                }
                return Err(err);
            }
        };

        info!(
            dependency = name,
            file = ?record.file,
            new_packages = ?record.new_packages,
            manifest = %self.manifest_path.display(),
            "recorded dependency"
        );
        Ok(record)
    }

    /// Uninstalls `name` and drops its most recent record.
    ///
    /// Registry records are looked up first, then local ones. Packages listed in the
    /// record's `new_packages` stay installed. A local record's copy under `deps/` is
    /// deleted once no other local record uses it.
    pub fn remove(&mut self, name: &str) -> Result<DependencyRecord> {
        let mut manifest = Manifest::load(&self.manifest_path)?;
        let named = |records: &[DependencyRecord]| records.iter().any(|record| record.name == name);
        let local = if named(manifest.dependencies()) {
            false
        } else if named(manifest.local_dependencies()) {
            true
        } else {
            return Err(self.not_found(name));
        };

        self.env.uninstall_package(name)?;

        let removed = if local {
            manifest.remove_local_dependency(name)
        } else {
            manifest.remove_dependency(name)
        };
        let record = removed.ok_or_else(|| self.not_found(name))?;
        manifest.save(&self.manifest_path)?;

        if let Some(file) = record.file.as_deref().filter(|_| local) {
            let shared = manifest
                .local_dependencies()
                .iter()
                .any(|other| other.file.as_deref() == Some(file));
            if !shared && Path::new(file).parent() == Some(Path::new(DEPS_DIR_NAME)) {
                remove_file_if_exists(&self.project_dir().join(file))?;
            }
        }

        info!(
            dependency = name,
            manifest = %self.manifest_path.display(),
            "removed dependency"
        );
        Ok(record)
    }

    fn install_and_diff(&mut self, name: &str, staged: Option<&StagedFile>) -> Result<DependencyRecord> {
        let package = match staged {
            Some(staged) => PackageRef::LocalFile(staged.path.clone()),
            None => PackageRef::registry(name),
        };

        let before = self.env.snapshot()?;
        debug!(package = %package.display_name(), installed = before.len(), "installing dependency");
        self.env.install_package(&package)?;
        let after = self.env.snapshot()?;

        if staged.is_none() && !after.contains(name) {
            return Err(Error::PackageInstall {
                operation: "install".to_string(),
                package: name.to_string(),
                output: "installer reported success but the package is not installed".to_string(),
            });
        }

        let new_packages = diff_snapshots(&before, &after, &[name]);
        Ok(DependencyRecord::new(name, new_packages))
    }

    fn stage_local_file(&self, source: &Path) -> Result<StagedFile> {
        if !source.is_file() {
            return Err(Error::io(
                source,
                io::Error::new(io::ErrorKind::NotFound, "local dependency file not found"),
            ));
        }
        let file_name = source
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                Error::io(
                    source,
                    io::Error::new(io::ErrorKind::InvalidInput, "local dependency file name is not valid UTF-8"),
                )
            })?;

        let deps_dir = self.project_dir().join(DEPS_DIR_NAME);
        let path = deps_dir.join(file_name);
        let already_staged = match (fs::canonicalize(source), fs::canonicalize(&path)) {
            (Ok(source), Ok(staged)) => source == staged,
            _ => false,
        };

        let mut copied = false;
        if !already_staged {
            fs::create_dir_all(&deps_dir).map_err(|err| Error::io(&deps_dir, err))?;
            copied = !path.exists();
            fs::copy(source, &path).map_err(|err| Error::io(&path, err))?;
            debug!(source = %source.display(), staged = %path.display(), "copied local dependency");
        }

        Ok(StagedFile {
            path,
            relative: format!("{DEPS_DIR_NAME}/{file_name}"),
            copied,
        })
    }

    fn project_dir(&self) -> PathBuf {
        self.manifest_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }

    fn not_found(&self, name: &str) -> Error {
        Error::DependencyNotFound {
            name: name.to_string(),
            manifest: self.manifest_path.clone(),
        }
    }
}
