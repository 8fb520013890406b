use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::fs_utils::write_atomic;
use crate::manifest::default_requires_python;
use crate::{
    Author, DependencyRecord, Error, Includes, Manifest, ProjectMetadata, Result, ToolCommands,
};

pub const CONFIG_FILE_NAME: &str = "pyappmconfig.toml";
pub const DEFAULT_REPOSITORY_URL: &str = "https://pyappm.nl/api/v1";

/// User-level settings, loaded once per process and passed explicitly to project init.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub env_create_tool: String,
    pub default_env_name: String,
    pub env_lib_installer_tool: String,
    pub requires_python: String,
    pub default_app_version: String,
    pub authors: Vec<Author>,
    pub dependencies: Vec<String>,
    pub create_venv: bool,
    pub create_readme: bool,
    pub create_license: bool,
    pub create_changelog: bool,
    pub create_about: bool,
    pub create_init: bool,
    pub create_typed: bool,
    pub create_gitignore: bool,
    pub run_git_init: bool,
    pub repository_url: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            env_create_tool: "python3 -m venv".to_string(),
            default_env_name: "env".to_string(),
            env_lib_installer_tool: "python3 -m pip".to_string(),
            requires_python: default_requires_python(),
            default_app_version: "0.1.0".to_string(),
            authors: Vec::new(),
            dependencies: Vec::new(),
            create_venv: true,
            create_readme: true,
            create_license: true,
            create_changelog: true,
            create_about: true,
            create_init: false,
            create_typed: false,
            create_gitignore: false,
            run_git_init: false,
            repository_url: DEFAULT_REPOSITORY_URL.to_string(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct GlobalConfigFile {
    #[serde(default)]
    pyappm: GlobalConfig,
}

impl GlobalConfig {
    /// Reads the configuration file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "configuration missing, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|err| Error::io(path, err))?;
        let file: GlobalConfigFile =
            toml::from_str(&content).map_err(|err| Error::ConfigParse {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;
        Ok(file.pyappm)
    }

    /// Like [`GlobalConfig::load`], but persists the defaults when the file is missing.
    pub fn load_or_init(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }
        let config = Self::default();
        config.save(path)?;
        info!(path = %path.display(), "wrote default configuration");
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = GlobalConfigFile {
            pyappm: self.clone(),
        };
        let content = toml::to_string(&file).map_err(|err| Error::ConfigParse {
            path: path.to_path_buf(),
            message: format!("failed serializing configuration: {err}"),
        })?;
        write_atomic(path, content.as_bytes())
    }
}

impl Manifest {
    /// Builds the manifest of a freshly initialised project from the user defaults.
    ///
    /// Tool commands are copied here and stay fixed per project afterwards.
    pub fn for_new_project(name: &str, config: &GlobalConfig) -> Self {
        let mut executable = BTreeMap::new();
        executable.insert(name.to_string(), format!("{name}:run"));

        Self {
            tools: ToolCommands {
                env_create_tool: config.env_create_tool.clone(),
                env_name: config.default_env_name.clone(),
                env_lib_installer: config.env_lib_installer_tool.clone(),
                extra: toml::Table::new(),
            },
            project: ProjectMetadata {
                name: name.to_string(),
                version: config.default_app_version.clone(),
                readme: "README.md".to_string(),
                license: "LICENSE.txt".to_string(),
                description: String::new(),
                authors: config.authors.clone(),
                requires_python: config.requires_python.clone(),
                dependencies: config
                    .dependencies
                    .iter()
                    .map(|name| DependencyRecord::new(name.clone(), Vec::new()))
                    .collect(),
                local_dependencies: Vec::new(),
                extra: toml::Table::new(),
            },
            executable,
            includes: Includes::default(),
            extra: toml::Table::new(),
        }
    }

    /// Writes a new manifest for `name` into `project_dir`, refusing to overwrite one.
    pub fn init_in(project_dir: &Path, name: &str, config: &GlobalConfig) -> Result<Self> {
        let path = project_dir.join(crate::MANIFEST_FILE_NAME);
        if path.exists() {
            return Err(Error::ManifestExists { path });
        }
        let manifest = Self::for_new_project(name, config);
        manifest.save(&path)?;
        info!(path = %path.display(), project = name, "initialised manifest");
        Ok(manifest)
    }
}
