use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::fs_utils::write_atomic;
use crate::{Error, Result};

pub const MANIFEST_FILE_NAME: &str = "pyapp.toml";

/// The project manifest (`pyapp.toml`).
///
/// Sections serialize in the order `tools`, `project`, `executable`, `includes`.
/// Keys this model does not know about are kept in the `extra` tables and written
/// back on save, so hand edits survive a load/save cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub tools: ToolCommands,
    pub project: ProjectMetadata,
    #[serde(default)]
    pub executable: BTreeMap<String, String>,
    #[serde(default)]
    pub includes: Includes,
    #[serde(flatten)]
    pub extra: toml::Table,
}

/// Per-project tool commands, copied from the global configuration at init time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCommands {
    #[serde(alias = "env-create-tool")]
    pub env_create_tool: String,
    #[serde(alias = "env-name")]
    pub env_name: String,
    #[serde(alias = "env-lib-installer")]
    pub env_lib_installer: String,
    #[serde(flatten)]
    pub extra: toml::Table,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectMetadata {
    pub name: String,
    pub version: String,
    #[serde(default = "default_readme")]
    pub readme: String,
    #[serde(default = "default_license")]
    pub license: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub authors: Vec<Author>,
    #[serde(default = "default_requires_python", alias = "requires-python")]
    pub requires_python: String,
    #[serde(default)]
    pub dependencies: Vec<DependencyRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty", alias = "local-dependencies")]
    pub local_dependencies: Vec<DependencyRecord>,
    #[serde(flatten)]
    pub extra: toml::Table,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    #[serde(alias = "author")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// One top-level dependency and the packages that first appeared when it was installed.
///
/// `new_packages` is computed once at add time and never refreshed. The same package
/// name may show up in several records. Records under `local_dependencies` also carry
/// `file`, the distribution path relative to the project directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "DependencyEntry")]
pub struct DependencyRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub new_packages: Vec<String>,
    #[serde(flatten)]
    pub extra: toml::Table,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DependencyEntry {
    Name(String),
    Record {
        name: String,
        #[serde(default)]
        file: Option<String>,
        #[serde(default)]
        new_packages: Vec<String>,
        #[serde(flatten)]
        extra: toml::Table,
    },
}

impl From<DependencyEntry> for DependencyRecord {
    fn from(entry: DependencyEntry) -> Self {
        match entry {
            DependencyEntry::Name(name) => Self::new(name, Vec::new()),
            DependencyEntry::Record {
                name,
                file,
                new_packages,
                extra,
            } => Self {
                file,
                extra,
                ..Self::new(name, new_packages)
            },
        }
    }
}

impl DependencyRecord {
    /// Builds a record, dropping repeated package names while keeping first-seen order.
    pub fn new(name: impl Into<String>, new_packages: Vec<String>) -> Self {
        let mut unique: Vec<String> = Vec::with_capacity(new_packages.len());
        for package in new_packages {
            if !unique.contains(&package) {
                unique.push(package);
            }
        }
        Self {
            name: name.into(),
            file: None,
            new_packages: unique,
            extra: toml::Table::new(),
        }
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Includes {
    #[serde(default)]
    pub directories: Vec<String>,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(flatten)]
    pub extra: toml::Table,
}

impl Manifest {
    pub fn from_toml_str(input: &str) -> std::result::Result<Self, String> {
        let manifest: Self = toml::from_str(input).map_err(|err| err.to_string())?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn to_toml_string(&self) -> std::result::Result<String, String> {
        toml::to_string(self).map_err(|err| err.to_string())
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::ManifestNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = fs::read_to_string(path).map_err(|err| Error::io(path, err))?;
        let manifest = Self::from_toml_str(&content).map_err(|message| Error::ManifestParse {
            path: path.to_path_buf(),
            message,
        })?;
        debug!(
            path = %path.display(),
            dependencies = manifest.project.dependencies.len(),
            "loaded manifest"
        );
        Ok(manifest)
    }

    /// Rewrites the whole document atomically; the previous file stays intact on failure.
    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate().map_err(|message| Error::ManifestParse {
            path: path.to_path_buf(),
            message,
        })?;
        let content = self.to_toml_string().map_err(|message| Error::ManifestParse {
            path: path.to_path_buf(),
            message: format!("failed serializing manifest: {message}"),
        })?;
        write_atomic(path, content.as_bytes())?;
        debug!(path = %path.display(), "saved manifest");
        Ok(())
    }

    pub fn dependencies(&self) -> &[DependencyRecord] {
        &self.project.dependencies
    }

    pub fn local_dependencies(&self) -> &[DependencyRecord] {
        &self.project.local_dependencies
    }

    /// True when a registry or local record carries exactly this name.
    pub fn has_dependency(&self, name: &str) -> bool {
        self.project
            .dependencies
            .iter()
            .chain(&self.project.local_dependencies)
            .any(|record| record.name == name)
    }

    pub fn push_dependency(&mut self, record: DependencyRecord) {
        self.project.dependencies.push(record);
    }

    pub fn push_local_dependency(&mut self, record: DependencyRecord) {
        self.project.local_dependencies.push(record);
    }

    /// Removes the most recently added record with exactly this name.
    pub fn remove_dependency(&mut self, name: &str) -> Option<DependencyRecord> {
        remove_last_named(&mut self.project.dependencies, name)
    }

    pub fn remove_local_dependency(&mut self, name: &str) -> Option<DependencyRecord> {
        remove_last_named(&mut self.project.local_dependencies, name)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.project.name.trim().is_empty() {
            return Err("project name must not be empty".to_string());
        }
        validate_env_name(&self.tools.env_name)?;
        for (tool, command) in [
            ("env_create_tool", &self.tools.env_create_tool),
            ("env_lib_installer", &self.tools.env_lib_installer),
        ] {
            if command.trim().is_empty() {
                return Err(format!("tools.{tool} must not be empty"));
            }
        }
        for record in &self.project.dependencies {
            if record.name.trim().is_empty() {
                return Err("dependency name must not be empty".to_string());
            }
        }
        for record in &self.project.local_dependencies {
            if record.name.trim().is_empty() {
                return Err("local dependency name must not be empty".to_string());
            }
            if !record
                .file
                .as_deref()
                .is_some_and(|file| !file.trim().is_empty())
            {
                return Err(format!(
                    "local dependency '{}' must name its distribution file",
                    record.name
                ));
            }
        }
        for (executable, entry_point) in &self.executable {
            validate_entry_point(executable, entry_point)?;
        }
        Ok(())
    }
}

fn remove_last_named(records: &mut Vec<DependencyRecord>, name: &str) -> Option<DependencyRecord> {
    let index = records.iter().rposition(|record| record.name == name)?;
    Some(records.remove(index))
}

/// Walks from `start` up through its parents looking for a manifest.
///
/// The search gives up after inspecting `stop` (usually the home directory) or the
/// filesystem root.
pub fn find_manifest(start: &Path, stop: Option<&Path>) -> Option<PathBuf> {
    let mut current = Some(start);
    while let Some(dir) = current {
        let candidate = dir.join(MANIFEST_FILE_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        if stop.is_some_and(|stop| stop == dir) {
            return None;
        }
        current = dir.parent();
    }
    None
}

fn validate_env_name(env_name: &str) -> std::result::Result<(), String> {
    let mut components = Path::new(env_name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(format!(
            "tools.env_name must be a single directory name: '{env_name}'"
        )),
    }
}

fn validate_entry_point(executable: &str, entry_point: &str) -> std::result::Result<(), String> {
    let valid = entry_point
        .split_once(':')
        .is_some_and(|(module, function)| {
            !module.trim().is_empty() && !function.trim().is_empty() && !function.contains(':')
        });
    if !valid {
        return Err(format!(
            "executable '{executable}' must map to 'module:function', got '{entry_point}'"
        ));
    }
    Ok(())
}

fn default_readme() -> String {
    "README.md".to_string()
}

fn default_license() -> String {
    "LICENSE.txt".to_string()
}

pub(crate) fn default_requires_python() -> String {
    ">=3.10".to_string()
}
