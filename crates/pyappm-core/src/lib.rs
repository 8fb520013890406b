mod config;
mod error;
mod fs_utils;
mod layout;
mod manifest;

pub use config::{GlobalConfig, CONFIG_FILE_NAME, DEFAULT_REPOSITORY_URL};
pub use error::{Error, Result};
pub use fs_utils::{remove_file_if_exists, write_atomic};
pub use layout::{default_user_home, UserLayout, ARCHIVE_EXTENSION};
pub use manifest::{
    find_manifest, Author, DependencyRecord, Includes, Manifest, ProjectMetadata, ToolCommands,
    MANIFEST_FILE_NAME,
};

#[cfg(test)]
mod tests;
