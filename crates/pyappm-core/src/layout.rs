use std::fs;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

pub const ARCHIVE_EXTENSION: &str = "pap";

/// User-level directories shared by every pyappm invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserLayout {
    home: PathBuf,
}

impl UserLayout {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn config_dir(&self) -> PathBuf {
        self.home.join(".config").join("pyappm")
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir().join(crate::CONFIG_FILE_NAME)
    }

    pub fn install_dir(&self) -> PathBuf {
        self.home.join(".pyappm")
    }

    pub fn apps_dir(&self) -> PathBuf {
        self.install_dir().join("share").join("applications")
    }

    pub fn app_dir(&self, name: &str) -> PathBuf {
        self.apps_dir().join(name)
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.home.join(".local").join("bin")
    }

    pub fn download_cache_dir(&self) -> PathBuf {
        self.home.join(".cache").join("pyappm")
    }

    pub fn cached_archive_path(&self, name: &str) -> PathBuf {
        self.download_cache_dir()
            .join(format!("{name}.{ARCHIVE_EXTENSION}"))
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.install_dir().join("tmp")
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [
            self.config_dir(),
            self.install_dir(),
            self.apps_dir(),
            self.bin_dir(),
            self.download_cache_dir(),
            self.tmp_dir(),
        ] {
            fs::create_dir_all(&dir).map_err(|err| Error::io(&dir, err))?;
        }
        Ok(())
    }

    /// Names of the applications currently installed under [`UserLayout::apps_dir`].
    pub fn installed_apps(&self) -> Result<Vec<String>> {
        let dir = self.apps_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|err| Error::io(&dir, err))? {
            let entry = entry.map_err(|err| Error::io(&dir, err))?;
            let file_type = entry.file_type().map_err(|err| Error::io(entry.path(), err))?;
            if file_type.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

pub fn default_user_home() -> Result<PathBuf> {
    let var = if cfg!(windows) { "USERPROFILE" } else { "HOME" };
    std::env::var_os(var)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| {
            Error::io(
                PathBuf::from(format!("${var}")),
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{var} is not set; cannot resolve user directories"),
                ),
            )
        })
}
