use std::path::{Component, Path, PathBuf};

use pyappm_core::{Error, Manifest, Result, ToolCommands};

/// Where a project's virtual environment lives and which tools manage it.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentSpec {
    project_dir: PathBuf,
    tools: ToolCommands,
}

impl EnvironmentSpec {
    pub fn new(project_dir: impl Into<PathBuf>, tools: ToolCommands) -> Result<Self> {
        let mut components = Path::new(&tools.env_name).components();
        if !matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        ) {
            return Err(Error::ToolCommand {
                command: tools.env_name.clone(),
                message: "environment name must be a single directory name".to_string(),
            });
        }

        Ok(Self {
            project_dir: project_dir.into(),
            tools,
        })
    }

    pub fn from_manifest(project_dir: impl Into<PathBuf>, manifest: &Manifest) -> Result<Self> {
        Self::new(project_dir, manifest.tools.clone())
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn tools(&self) -> &ToolCommands {
        &self.tools
    }

    pub fn env_dir(&self) -> PathBuf {
        self.project_dir.join(&self.tools.env_name)
    }

    pub fn bin_dir(&self) -> PathBuf {
        if cfg!(windows) {
            self.env_dir().join("Scripts")
        } else {
            self.env_dir().join("bin")
        }
    }
}
