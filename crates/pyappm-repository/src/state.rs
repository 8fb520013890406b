use std::collections::HashSet;

use pyappm_core::DEFAULT_REPOSITORY_URL;
use serde::{Deserialize, Serialize};

use crate::RepositoryEntry;

pub const DEFAULT_REPOSITORY_NAME: &str = "pyappm_main";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RegistryStateFile {
    #[serde(default = "state_file_version")]
    pub(crate) version: u32,
    #[serde(default)]
    pub(crate) repositories: Vec<RepositoryEntry>,
}

impl Default for RegistryStateFile {
    fn default() -> Self {
        Self {
            version: state_file_version(),
            repositories: Vec::new(),
        }
    }
}

pub(crate) fn parse_state_file(content: &str) -> Result<RegistryStateFile, String> {
    let state: RegistryStateFile = toml::from_str(content).map_err(|err| err.to_string())?;
    let expected = state_file_version();
    if state.version != expected {
        return Err(format!(
            "unsupported registry version {} (expected {expected})",
            state.version
        ));
    }

    let mut seen_names: HashSet<&str> = HashSet::with_capacity(state.repositories.len());
    for entry in &state.repositories {
        validate_repository(entry)?;
        if !seen_names.insert(entry.name.as_str()) {
            return Err(format!(
                "duplicate repository name '{}': remove or rename one entry",
                entry.name
            ));
        }
    }

    Ok(state)
}

pub(crate) fn state_file_version() -> u32 {
    1
}

pub(crate) fn default_entry(url: &str) -> RepositoryEntry {
    RepositoryEntry::new(DEFAULT_REPOSITORY_NAME, url)
}

pub(crate) fn default_url() -> String {
    DEFAULT_REPOSITORY_URL.to_string()
}

pub(crate) fn validate_repository(entry: &RepositoryEntry) -> Result<(), String> {
    let name = entry.name.as_str();
    if name.is_empty() || name.len() > 64 || name.chars().any(char::is_whitespace) {
        return Err(format!("invalid repository name: '{name}'"));
    }

    let url = entry.url.as_str();
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"));
    match rest {
        Some(host) if !host.is_empty() && !url.chars().any(char::is_whitespace) => Ok(()),
        _ => Err(format!(
            "invalid repository url for '{name}': '{url}' (expected http:// or https://)"
        )),
    }
}
