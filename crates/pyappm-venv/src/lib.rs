mod command;
mod controller;
mod diff;
mod layout;
mod snapshot;

pub use command::ToolCommand;
pub use controller::{ensure_no_active_environment, EnvironmentController, PackageEnvironment, PackageRef};
pub use diff::diff_snapshots;
pub use layout::EnvironmentSpec;
pub use snapshot::{normalize_package_name, parse_freeze_output, EnvironmentSnapshot, InstalledPackage};
