mod catalog;
mod client;
mod registry;
mod state;
mod types;

pub use catalog::{
    compare_versions, find_latest, list_all_applications, ApplicationMatch, Catalog,
    RepositoryFailure, RepositoryListing,
};
pub use client::RepositoryClient;
pub use registry::{RepositoryRegistry, REGISTRY_FILE_NAME};
pub use state::DEFAULT_REPOSITORY_NAME;
pub use types::{ApplicationListing, Credentials, RepositoryEntry};
