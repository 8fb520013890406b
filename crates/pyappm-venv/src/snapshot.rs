use std::collections::HashSet;
use std::path::{Path, PathBuf};

use pyappm_core::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPackage {
    pub name: String,
    pub version: String,
}

/// Packages installed in one virtual environment, in installer listing order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentSnapshot {
    env_dir: PathBuf,
    packages: Vec<InstalledPackage>,
}

impl EnvironmentSnapshot {
    /// Duplicate names (after normalisation) keep their first occurrence.
    pub fn new(env_dir: impl Into<PathBuf>, packages: Vec<InstalledPackage>) -> Self {
        let mut seen = HashSet::new();
        let packages = packages
            .into_iter()
            .filter(|package| seen.insert(normalize_package_name(&package.name)))
            .collect();

        Self {
            env_dir: env_dir.into(),
            packages,
        }
    }

    pub fn from_freeze_output(env_dir: impl Into<PathBuf>, output: &str) -> Result<Self> {
        let env_dir = env_dir.into();
        let packages = parse_freeze_output(output).map_err(|message| Error::EnvironmentSnapshot {
            env_dir: env_dir.clone(),
            message,
        })?;
        Ok(Self::new(env_dir, packages))
    }

    pub fn env_dir(&self) -> &Path {
        &self.env_dir
    }

    pub fn packages(&self) -> &[InstalledPackage] {
        &self.packages
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.packages.iter().map(|package| package.name.as_str())
    }

    fn find(&self, name: &str) -> Option<&InstalledPackage> {
        let wanted = normalize_package_name(name);
        self.packages
            .iter()
            .find(|package| normalize_package_name(&package.name) == wanted)
    }
}

/// Canonical form used to compare package names: lowercase, with runs of `-`, `_` and
/// `.` collapsed to a single `-`.
pub fn normalize_package_name(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut in_separator = false;
    for ch in name.trim().chars() {
        if matches!(ch, '-' | '_' | '.') {
            if !in_separator {
                normalized.push('-');
                in_separator = true;
            }
        } else {
            normalized.extend(ch.to_lowercase());
            in_separator = false;
        }
    }
    normalized
}

/// Parses requirement lines as printed by the installer's `freeze` mode.
///
/// Accepts `name==version`, `name===version`, `name @ url` and editable `-e` lines.
/// An editable line takes its name from `#egg=` or, failing that, from the
/// `# Editable ... (name==version)` comment the installer prints right above it.
/// Other comments and blank lines are skipped.
pub fn parse_freeze_output(output: &str) -> std::result::Result<Vec<InstalledPackage>, String> {
    let mut packages = Vec::new();
    let mut editable_hint: Option<(String, String)> = None;
    for (index, raw) in output.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with('#') {
            editable_hint = parse_editable_comment(line);
            continue;
        }
        let hint = editable_hint.take();

        let (name, version) = if let Some(editable) = line
            .strip_prefix("-e ")
            .or_else(|| line.strip_prefix("--editable "))
        {
            let egg = editable
                .rsplit_once("#egg=")
                .map(|(_, egg)| egg.split('&').next().unwrap_or(egg).trim());
            match (egg, hint) {
                (Some(egg), Some((_, version))) => (egg.to_string(), version),
                (Some(egg), None) => (egg.to_string(), "editable".to_string()),
                (None, Some(hint)) => hint,
                (None, None) => {
                    return Err(format!(
                        "line {}: editable requirement without a package name: '{line}'",
                        index + 1
                    ))
                }
            }
        } else if let Some((name, version)) = line.split_once("===") {
            (name.trim().to_string(), version.trim().to_string())
        } else if let Some((name, version)) = line.split_once("==") {
            (name.trim().to_string(), version.trim().to_string())
        } else if let Some((name, url)) = line.split_once(" @ ") {
            (name.trim().to_string(), url.trim().to_string())
        } else {
            return Err(format!("line {}: unrecognised requirement '{line}'", index + 1));
        };

        if !is_valid_package_name(&name) {
            return Err(format!("line {}: invalid package name '{name}'", index + 1));
        }
        if version.is_empty() {
            return Err(format!("line {}: missing version for '{name}'", index + 1));
        }

        packages.push(InstalledPackage { name, version });
    }
    Ok(packages)
}

/// `# Editable install with no version control (mytool==0.1.0)` -> `("mytool", "0.1.0")`.
fn parse_editable_comment(line: &str) -> Option<(String, String)> {
    let text = line.trim_start_matches('#').trim();
    if !text.starts_with("Editable") {
        return None;
    }
    let (_, requirement) = text.rsplit_once('(')?;
    let (name, version) = requirement.strip_suffix(')')?.split_once("==")?;
    let (name, version) = (name.trim(), version.trim());
    if name.is_empty() || version.is_empty() {
        return None;
    }
    Some((name.to_string(), version.to_string()))
}

fn is_valid_package_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            first.is_ascii_alphanumeric()
                && last.is_ascii_alphanumeric()
                && bytes
                    .iter()
                    .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
        }
        _ => false,
    }
}
