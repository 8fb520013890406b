use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

/// Every failure the pyappm libraries surface to their caller.
///
/// Variants carry enough context (target name, path, captured process output or
/// HTTP status) for a front end to render a distinct message per kind.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to create virtual environment at {env_dir}: {message}")]
    EnvironmentCreation { env_dir: PathBuf, message: String },

    #[error("virtual environment not found: {env_dir}")]
    EnvironmentNotFound { env_dir: PathBuf },

    #[error("failed to snapshot virtual environment at {env_dir}: {message}")]
    EnvironmentSnapshot { env_dir: PathBuf, message: String },

    #[error("a virtual environment is active ({env_dir}); deactivate it and try again")]
    EnvironmentActive { env_dir: PathBuf },

    #[error("failed to {operation} package '{package}': {output}")]
    PackageInstall {
        operation: String,
        package: String,
        output: String,
    },

    #[error("dependency '{name}' is not recorded in {manifest}")]
    DependencyNotFound { name: String, manifest: PathBuf },

    #[error("repository '{name}' already exists")]
    DuplicateRepository { name: String },

    #[error("repository '{name}' not found")]
    RepositoryNotFound { name: String },

    #[error("invalid repository: {message}")]
    InvalidRepository { message: String },

    #[error("repository at {url} is unreachable: {message}")]
    RepositoryUnreachable { url: String, message: String },

    #[error("unexpected response from {url}: {message}")]
    RepositoryProtocol { url: String, message: String },

    #[error("application '{name}' not found{}", version_suffix(.version))]
    ApplicationNotFound {
        name: String,
        version: Option<String>,
    },

    #[error("authentication with {url} failed: {message}")]
    Authentication { url: String, message: String },

    #[error("upload to {url} rejected (status {status}): {message}")]
    UploadRejected {
        url: String,
        status: u16,
        message: String,
    },

    #[error("manifest not found: {path}")]
    ManifestNotFound { path: PathBuf },

    #[error("manifest already exists: {path}")]
    ManifestExists { path: PathBuf },

    #[error("failed to parse manifest {path}: {message}")]
    ManifestParse { path: PathBuf, message: String },

    #[error("failed to parse configuration {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    #[error("failed to parse repository registry {path}: {message}")]
    RegistryParse { path: PathBuf, message: String },

    #[error("invalid tool command '{command}': {message}")]
    ToolCommand { command: String, message: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Stable code for this error kind, suitable for exit-code or message tables.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EnvironmentCreation { .. } => "environment-creation",
            Self::EnvironmentNotFound { .. } => "environment-not-found",
            Self::EnvironmentSnapshot { .. } => "environment-snapshot",
            Self::EnvironmentActive { .. } => "environment-active",
            Self::PackageInstall { .. } => "package-install",
            Self::DependencyNotFound { .. } => "dependency-not-found",
            Self::DuplicateRepository { .. } => "duplicate-repository",
            Self::RepositoryNotFound { .. } => "repository-not-found",
            Self::InvalidRepository { .. } => "invalid-repository",
            Self::RepositoryUnreachable { .. } => "repository-unreachable",
            Self::RepositoryProtocol { .. } => "repository-protocol",
            Self::ApplicationNotFound { .. } => "application-not-found",
            Self::Authentication { .. } => "authentication",
            Self::UploadRejected { .. } => "upload-rejected",
            Self::ManifestNotFound { .. } => "manifest-not-found",
            Self::ManifestExists { .. } => "manifest-exists",
            Self::ManifestParse { .. } => "manifest-parse",
            Self::ConfigParse { .. } => "config-parse",
            Self::RegistryParse { .. } => "registry-parse",
            Self::ToolCommand { .. } => "tool-command",
            Self::Io { .. } => "io",
        }
    }
}

fn version_suffix(version: &Option<String>) -> String {
    match version {
        Some(version) => format!(" (version {version})"),
        None => String::new(),
    }
}
