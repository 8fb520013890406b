use std::collections::HashSet;

use crate::snapshot::{normalize_package_name, EnvironmentSnapshot};

/// Names present in `after` but not in `before`, minus `excluding`, in `after` order.
///
/// Identity is name-only: a package whose version changed between the snapshots is not
/// reported. Upgrades pulled in as a side effect are therefore invisible here.
pub fn diff_snapshots(
    before: &EnvironmentSnapshot,
    after: &EnvironmentSnapshot,
    excluding: &[&str],
) -> Vec<String> {
    if before.env_dir() != after.env_dir() {
        tracing::warn!(
            before = %before.env_dir().display(),
            after = %after.env_dir().display(),
            "comparing snapshots captured for different environments"
        );
    }

    let mut skip: HashSet<String> = before.names().map(normalize_package_name).collect();
    skip.extend(excluding.iter().map(|name| normalize_package_name(name)));

    after
        .names()
        .filter(|name| skip.insert(normalize_package_name(name)))
        .map(str::to_string)
        .collect()
}
