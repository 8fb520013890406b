use std::fs;
use std::path::{Component, Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, bail, Context, Result};
use pyappm_core::{GlobalConfig, Manifest, UserLayout, ARCHIVE_EXTENSION, MANIFEST_FILE_NAME};
use pyappm_deps::RebuildOptions;
use pyappm_repository::{
    find_latest, list_all_applications, Catalog, Credentials, RepositoryClient, RepositoryEntry,
    RepositoryRegistry,
};
use pyappm_venv::{ensure_no_active_environment, EnvironmentController, EnvironmentSpec};

use crate::command_flows::{format_rebuild_message, rebuild_with_spinner};
use crate::launchers::{remove_launchers, write_launchers};
use crate::render::{finish_spinner, render_table, TerminalRenderer};

pub(crate) fn open_registry(layout: &UserLayout, config: &GlobalConfig) -> RepositoryRegistry {
    RepositoryRegistry::new(layout.config_dir()).with_seed_url(config.repository_url.clone())
}

pub(crate) fn run_repo_list(registry: &RepositoryRegistry) -> Result<()> {
    let entries = registry.list()?;
    if entries.is_empty() {
        println!("No repositories configured");
        return Ok(());
    }
    for line in format_repository_lines(&entries) {
        println!("{line}");
    }
    Ok(())
}

pub(crate) fn run_repo_add(
    registry: &RepositoryRegistry,
    name: &str,
    url: &str,
    renderer: TerminalRenderer,
) -> Result<()> {
    registry.add(RepositoryEntry::new(name, url))?;
    renderer.print_status("ok", &format!("added repository '{name}' ({url})"));
    Ok(())
}

pub(crate) fn run_repo_remove(
    registry: &RepositoryRegistry,
    name: &str,
    renderer: TerminalRenderer,
) -> Result<()> {
    let removed = registry.remove(name)?;
    renderer.print_status("ok", &format!("removed repository '{}'", removed.name));
    Ok(())
}

pub(crate) fn run_apps(registry: &RepositoryRegistry, renderer: TerminalRenderer) -> Result<()> {
    let entries = registry.list()?;
    let spinner = renderer.start_spinner("querying repositories");
    let catalog = list_all_applications(&entries);
    finish_spinner(spinner);

    for line in format_catalog_lines(&catalog) {
        println!("{line}");
    }
    for failure in &catalog.failures {
        renderer.print_status(
            "warn",
            &format!("repository '{}' skipped: {}", failure.repository.name, failure.error),
        );
    }
    if catalog.listings.is_empty() && !catalog.failures.is_empty() {
        bail!("no repository could be queried");
    }
    Ok(())
}

pub(crate) struct InstallRequest<'a> {
    /// Application name, or a path to a local `.pap` archive.
    pub(crate) name: &'a str,
    pub(crate) version: Option<&'a str>,
    pub(crate) repository: Option<&'a str>,
    pub(crate) refresh: bool,
}

/// Unpacks an application archive into the applications dir, builds its environment from
/// the bundled manifest and writes its launchers.
///
/// The archive is a local `.pap` file or is fetched into the download cache (a cached
/// copy is reused unless a refresh or a specific version is requested).
pub(crate) fn run_install(
    layout: &UserLayout,
    registry: &RepositoryRegistry,
    request: &InstallRequest<'_>,
    renderer: TerminalRenderer,
) -> Result<()> {
    ensure_no_active_environment()?;
    layout.ensure_base_dirs()?;

    let (archive, expected_name) = match local_archive_path(request.name) {
        Some(path) => {
            if !path.is_file() {
                bail!("archive not found: {}", path.display());
            }
            (path, None)
        }
        None => {
            ensure_not_installed(layout, request.name)?;
            (fetch_archive(layout, registry, request, renderer)?, Some(request.name))
        }
    };

    let (name, manifest) = unpack_application(layout, &archive, expected_name)?;
    let app_dir = layout.app_dir(&name);
    let spec = EnvironmentSpec::from_manifest(&app_dir, &manifest)?;
    let mut controller = EnvironmentController::new(spec);
    let report = rebuild_with_spinner(&mut controller, &manifest, RebuildOptions::default(), renderer)?;
    let launchers = write_launchers(layout, &app_dir, &controller.spec().bin_dir(), &manifest)?;

    renderer.print_status(
        "ok",
        &format!(
            "installed {name} {} ({})",
            manifest.project.version,
            format_rebuild_message(&controller.spec().env_dir(), &report)
        ),
    );
    if !launchers.is_empty() {
        renderer.print_status(
            "ok",
            &format!(
                "launchers in {}: {}",
                layout.bin_dir().display(),
                launchers.join(", ")
            ),
        );
    }
    Ok(())
}

/// `Some(path)` when the install target names a local application archive.
pub(crate) fn local_archive_path(target: &str) -> Option<PathBuf> {
    let path = Path::new(target);
    (path.extension().and_then(|ext| ext.to_str()) == Some(ARCHIVE_EXTENSION))
        .then(|| path.to_path_buf())
}

fn ensure_not_installed(layout: &UserLayout, name: &str) -> Result<()> {
    let app_dir = layout.app_dir(name);
    if app_dir.exists() {
        bail!(
            "application '{name}' is already installed at {}; uninstall it first",
            app_dir.display()
        );
    }
    Ok(())
}

fn fetch_archive(
    layout: &UserLayout,
    registry: &RepositoryRegistry,
    request: &InstallRequest<'_>,
    renderer: TerminalRenderer,
) -> Result<PathBuf> {
    let name = request.name;
    let archive = layout.cached_archive_path(name);
    if !request.refresh && request.version.is_none() && archive.is_file() {
        tracing::debug!(archive = %archive.display(), "reusing cached archive");
        return Ok(archive);
    }

    let entry = match request.repository {
        Some(repository) => registry.get(repository)?,
        None => find_latest(&registry.list()?, name, request.version)?.repository,
    };
    let client = RepositoryClient::new(entry)?;
    let spinner = renderer.start_spinner(&format!("downloading {name}"));
    let fetched = client.fetch(name, request.version, &archive);
    finish_spinner(spinner);
    fetched?;
    Ok(archive)
}

/// Extracts `archive` and moves the application root into the applications dir.
///
/// Without `expected_name` the directory is named after the bundled manifest's project.
fn unpack_application(
    layout: &UserLayout,
    archive: &Path,
    expected_name: Option<&str>,
) -> Result<(String, Manifest)> {
    let staging = layout.tmp_dir().join(format!("unpack-{}", std::process::id()));
    remove_dir_if_exists(&staging)?;
    fs::create_dir_all(&staging)
        .with_context(|| format!("failed to create staging dir: {}", staging.display()))?;

    let unpacked = extract_archive(archive, &staging)
        .and_then(|()| locate_application_root(&staging))
        .and_then(|root| {
            let manifest = Manifest::load(&root.join(MANIFEST_FILE_NAME))?;
            let name = match expected_name {
                Some(name) => name.to_string(),
                None => application_name(&manifest)?,
            };
            ensure_not_installed(layout, &name)?;
            move_dir(&root, &layout.app_dir(&name))?;
            Ok((name, manifest))
        });
    let _ = remove_dir_if_exists(&staging);
    unpacked
}

/// Project name of a bundled manifest, usable as a single directory name.
pub(crate) fn application_name(manifest: &Manifest) -> Result<String> {
    let name = manifest.project.name.trim();
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(name.to_string()),
        _ => bail!("application name '{name}' is not a valid directory name"),
    }
}

pub(crate) fn run_uninstall(layout: &UserLayout, name: &str, renderer: TerminalRenderer) -> Result<()> {
    let app_dir = layout.app_dir(name);
    if !app_dir.exists() {
        bail!("application '{name}' is not installed");
    }
    remove_launchers(layout, name)?;
    fs::remove_dir_all(&app_dir)
        .with_context(|| format!("failed to remove application dir: {}", app_dir.display()))?;
    tracing::info!(application = name, "removed application");
    renderer.print_status("ok", &format!("uninstalled {name}"));
    Ok(())
}

pub(crate) fn run_list(layout: &UserLayout) -> Result<()> {
    let rows = installed_application_rows(layout)?;
    if rows.is_empty() {
        println!("No applications installed");
        return Ok(());
    }
    for line in render_table(&rows) {
        println!("{line}");
    }
    Ok(())
}

/// Installed application names with the version from their manifest, when readable.
pub(crate) fn installed_application_rows(layout: &UserLayout) -> Result<Vec<(String, String)>> {
    let mut rows = Vec::new();
    for name in layout.installed_apps()? {
        let version = Manifest::load(&layout.app_dir(&name).join(MANIFEST_FILE_NAME))
            .map(|manifest| manifest.project.version)
            .unwrap_or_else(|_| "(unreadable manifest)".to_string());
        rows.push((name, version));
    }
    Ok(rows)
}

pub(crate) struct PublishRequest<'a> {
    pub(crate) archive: &'a Path,
    pub(crate) repository: Option<&'a str>,
    pub(crate) username: Option<&'a str>,
    pub(crate) token: Option<String>,
    pub(crate) password: Option<String>,
}

pub(crate) fn run_publish(
    registry: &RepositoryRegistry,
    request: PublishRequest<'_>,
    renderer: TerminalRenderer,
) -> Result<()> {
    if !request.archive.is_file() {
        bail!("archive not found: {}", request.archive.display());
    }

    let entry = match request.repository {
        Some(name) => registry.get(name)?,
        None => registry
            .list()?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no repositories configured; add one with `pyappm repo add`"))?,
    };
    let credentials = resolve_credentials(request.token, request.username, request.password)?;

    let client = RepositoryClient::new(entry)?;
    let spinner = renderer.start_spinner("uploading archive");
    let uploaded = client.upload(request.archive, &credentials);
    finish_spinner(spinner);
    uploaded?;

    renderer.print_status(
        "ok",
        &format!(
            "published {} to '{}'",
            request.archive.display(),
            client.entry().name
        ),
    );
    Ok(())
}

pub(crate) fn resolve_credentials(
    token: Option<String>,
    username: Option<&str>,
    password: Option<String>,
) -> Result<Credentials> {
    if let Some(token) = token.filter(|token| !token.is_empty()) {
        return Ok(Credentials::Token(token));
    }
    match (username, password) {
        (Some(username), Some(password)) => Ok(Credentials::Password {
            username: username.to_string(),
            password,
        }),
        (Some(_), None) => bail!("no password given; set PYAPPM_PASSWORD"),
        (None, _) => bail!("no credentials given; pass --token or --username with PYAPPM_PASSWORD"),
    }
}

pub(crate) fn format_repository_lines(entries: &[RepositoryEntry]) -> Vec<String> {
    let rows: Vec<(String, String)> = entries
        .iter()
        .map(|entry| (entry.name.clone(), entry.url.clone()))
        .collect();
    render_table(&rows)
}

pub(crate) fn format_catalog_lines(catalog: &Catalog) -> Vec<String> {
    let mut lines = Vec::new();
    for listing in &catalog.listings {
        lines.push(format!("{} ({})", listing.repository.name, listing.repository.url));
        if listing.applications.is_empty() {
            lines.push("  (no applications)".to_string());
            continue;
        }
        let rows: Vec<(String, String)> = listing
            .applications
            .iter()
            .map(|app| (app.name.clone(), app.version.clone()))
            .collect();
        lines.extend(render_table(&rows).into_iter().map(|line| format!("  {line}")));
    }
    lines
}

/// Finds the directory holding the manifest: the extraction root or its only subdirectory.
pub(crate) fn locate_application_root(extracted: &Path) -> Result<PathBuf> {
    if extracted.join(MANIFEST_FILE_NAME).is_file() {
        return Ok(extracted.to_path_buf());
    }

    let mut dirs = Vec::new();
    for entry in fs::read_dir(extracted)
        .with_context(|| format!("failed to read {}", extracted.display()))?
    {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    match dirs.as_slice() {
        [only] if only.join(MANIFEST_FILE_NAME).is_file() => Ok(only.clone()),
        _ => bail!(
            "archive does not contain {MANIFEST_FILE_NAME} at its root: {}",
            extracted.display()
        ),
    }
}

fn extract_archive(archive_path: &Path, dst: &Path) -> Result<()> {
    if cfg!(windows) {
        let mut command = Command::new("powershell");
        command.arg("-NoProfile").arg("-Command").arg(format!(
            "Expand-Archive -LiteralPath '{}' -DestinationPath '{}' -Force",
            escape_ps_single_quote(archive_path),
            escape_ps_single_quote(dst)
        ));
        if run_command(&mut command, "failed to extract archive with powershell").is_ok() {
            return Ok(());
        }
    }

    let mut unzip_command = Command::new("unzip");
    unzip_command.arg("-q").arg(archive_path).arg("-d").arg(dst);
    run_command(&mut unzip_command, "failed to extract archive with unzip")
}

fn run_command(command: &mut Command, context_message: &str) -> Result<()> {
    let output = command
        .output()
        .with_context(|| format!("{context_message}: command failed to start"))?;
    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    Err(anyhow!(
        "{context_message}: status={} stdout='{}' stderr='{}'",
        output.status,
        stdout.trim(),
        stderr.trim()
    ))
}

fn move_dir(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create install parent: {}", parent.display()))?;
    }
    fs::rename(src, dst).with_context(|| {
        format!(
            "failed to move {} to {}",
            src.display(),
            dst.display()
        )
    })
}

fn remove_dir_if_exists(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir_all(path)
            .with_context(|| format!("failed to remove {}", path.display()))?;
    }
    Ok(())
}

fn escape_ps_single_quote(path: &Path) -> String {
    path.to_string_lossy().replace('\'', "''")
}
