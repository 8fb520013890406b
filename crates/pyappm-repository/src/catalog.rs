use std::cmp::Ordering;

use pyappm_core::{Error, Result};
use semver::Version;
use tracing::warn;

use crate::{ApplicationListing, RepositoryClient, RepositoryEntry};

#[derive(Debug)]
pub struct RepositoryListing {
    pub repository: RepositoryEntry,
    pub applications: Vec<ApplicationListing>,
}

#[derive(Debug)]
pub struct RepositoryFailure {
    pub repository: RepositoryEntry,
    pub error: Error,
}

/// Listings gathered from every registered repository, in registry order.
#[derive(Debug, Default)]
pub struct Catalog {
    pub listings: Vec<RepositoryListing>,
    pub failures: Vec<RepositoryFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationMatch {
    pub repository: RepositoryEntry,
    pub application: ApplicationListing,
}

pub fn list_all_applications(entries: &[RepositoryEntry]) -> Catalog {
    let mut catalog = Catalog::default();
    for entry in entries {
        match RepositoryClient::new(entry.clone()).and_then(|client| client.list_applications()) {
            Ok(applications) => catalog.listings.push(RepositoryListing {
                repository: entry.clone(),
                applications,
            }),
            Err(error) => {
                warn!(repository = %entry.name, error = %error, "skipping repository");
                catalog.failures.push(RepositoryFailure {
                    repository: entry.clone(),
                    error,
                });
            }
        }
    }
    catalog
}

/// Picks the repository offering `name`, preferring the highest version.
///
/// With `version` set, the first repository (registry order) offering exactly that
/// version wins. When nothing matches and some repository failed, that failure is
/// returned instead of `ApplicationNotFound`.
pub fn find_latest(
    entries: &[RepositoryEntry],
    name: &str,
    version: Option<&str>,
) -> Result<ApplicationMatch> {
    let mut best: Option<ApplicationMatch> = None;
    let mut first_failure: Option<Error> = None;

    for entry in entries {
        let listings =
            match RepositoryClient::new(entry.clone()).and_then(|client| client.find_application(name)) {
                Ok(listings) => listings,
                Err(Error::ApplicationNotFound { .. }) => continue,
                Err(error) => {
                    warn!(repository = %entry.name, error = %error, "skipping repository");
                    first_failure.get_or_insert(error);
                    continue;
                }
            };

        for application in listings.into_iter().filter(|app| app.name == name) {
            if let Some(wanted) = version {
                if application.version == wanted {
                    return Ok(ApplicationMatch {
                        repository: entry.clone(),
                        application,
                    });
                }
                continue;
            }

            let better = match &best {
                Some(current) => {
                    compare_versions(&application.version, &current.application.version)
                        == Ordering::Greater
                }
                None => true,
            };
            if better {
                best = Some(ApplicationMatch {
                    repository: entry.clone(),
                    application,
                });
            }
        }
    }

    match (best, first_failure) {
        (Some(found), _) => Ok(found),
        (None, Some(error)) => Err(error),
        (None, None) => Err(Error::ApplicationNotFound {
            name: name.to_string(),
            version: version.map(str::to_string),
        }),
    }
}

/// Semver ordering that also accepts `X` and `X.Y`; unparseable versions sort lowest.
pub fn compare_versions(left: &str, right: &str) -> Ordering {
    match (parse_lenient(left), parse_lenient(right)) {
        (Some(left), Some(right)) => left.cmp(&right),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => left.cmp(right),
    }
}

fn parse_lenient(version: &str) -> Option<Version> {
    let version = version.trim().trim_start_matches('v');
    if let Ok(parsed) = Version::parse(version) {
        return Some(parsed);
    }

    let parts: Vec<&str> = version.split('.').collect();
    if parts.is_empty() || parts.len() > 2 || parts.iter().any(|part| part.parse::<u64>().is_err()) {
        return None;
    }
    let padded = match parts.len() {
        1 => format!("{}.0.0", parts[0]),
        _ => format!("{}.{}.0", parts[0], parts[1]),
    };
    Version::parse(&padded).ok()
}
