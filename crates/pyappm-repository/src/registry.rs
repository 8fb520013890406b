use std::fs;
use std::path::PathBuf;

use pyappm_core::{write_atomic, Error, Result};
use tracing::info;

use crate::state::{
    default_entry, default_url, parse_state_file, validate_repository, RegistryStateFile,
};
use crate::RepositoryEntry;

pub const REGISTRY_FILE_NAME: &str = "repositories.toml";

/// The user's persisted list of repositories, kept in insertion order.
///
/// Every call reads the file fresh and every mutation rewrites it whole.
#[derive(Debug, Clone)]
pub struct RepositoryRegistry {
    state_root: PathBuf,
    seed_url: String,
}

impl RepositoryRegistry {
    pub fn new(state_root: impl Into<PathBuf>) -> Self {
        Self {
            state_root: state_root.into(),
            seed_url: default_url(),
        }
    }

    /// URL of the entry written when the registry file does not exist yet.
    pub fn with_seed_url(mut self, url: impl Into<String>) -> Self {
        self.seed_url = url.into();
        self
    }

    pub fn registry_path(&self) -> PathBuf {
        self.state_root.join(REGISTRY_FILE_NAME)
    }

    /// Reads the registry, creating and persisting the seeded default when missing.
    pub fn load(&self) -> Result<Vec<RepositoryEntry>> {
        Ok(self.load_state()?.repositories)
    }

    pub fn list(&self) -> Result<Vec<RepositoryEntry>> {
        self.load()
    }

    pub fn get(&self, name: &str) -> Result<RepositoryEntry> {
        self.load_state()?
            .repositories
            .into_iter()
            .find(|entry| entry.name == name)
            .ok_or_else(|| Error::RepositoryNotFound {
                name: name.to_string(),
            })
    }

    pub fn add(&self, entry: RepositoryEntry) -> Result<()> {
        validate_repository(&entry).map_err(|message| Error::InvalidRepository { message })?;

        let mut state = self.load_state()?;
        if state
            .repositories
            .iter()
            .any(|existing| existing.name == entry.name)
        {
            return Err(Error::DuplicateRepository { name: entry.name });
        }

        info!(name = %entry.name, url = %entry.url, "adding repository");
        state.repositories.push(entry);
        self.save_state(&state)
    }

    pub fn remove(&self, name: &str) -> Result<RepositoryEntry> {
        let mut state = self.load_state()?;
        let Some(index) = state
            .repositories
            .iter()
            .position(|entry| entry.name == name)
        else {
            return Err(Error::RepositoryNotFound {
                name: name.to_string(),
            });
        };

        let removed = state.repositories.remove(index);
        self.save_state(&state)?;
        info!(name = %removed.name, "removed repository");
        Ok(removed)
    }

    fn load_state(&self) -> Result<RegistryStateFile> {
        let path = self.registry_path();
        if !path.exists() {
            let state = RegistryStateFile {
                repositories: vec![default_entry(&self.seed_url)],
                ..RegistryStateFile::default()
            };
            self.save_state(&state)?;
            info!(path = %path.display(), url = %self.seed_url, "seeded repository registry");
            return Ok(state);
        }

        let content = fs::read_to_string(&path).map_err(|err| Error::io(&path, err))?;
        parse_state_file(&content).map_err(|message| Error::RegistryParse { path, message })
    }

    fn save_state(&self, state: &RegistryStateFile) -> Result<()> {
        fs::create_dir_all(&self.state_root).map_err(|err| Error::io(&self.state_root, err))?;

        let path = self.registry_path();
        let content = toml::to_string(state).map_err(|err| Error::RegistryParse {
            path: path.clone(),
            message: format!("failed serializing registry: {err}"),
        })?;
        write_atomic(&path, content.as_bytes())
    }
}
