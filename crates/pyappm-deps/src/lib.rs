mod rebuild;
mod sync;

pub use rebuild::{EnvironmentReconstructor, RebuildOptions, RebuildReport, RUNTIME_PACKAGES};
pub use sync::{DependencySource, DependencySynchronizer, DEPS_DIR_NAME};
