use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use pyappm_core::{find_manifest, DependencyRecord, Error, GlobalConfig, Manifest, MANIFEST_FILE_NAME};
use pyappm_deps::{
    DependencySource, DependencySynchronizer, EnvironmentReconstructor, RebuildOptions,
    RebuildReport,
};
use pyappm_venv::{
    ensure_no_active_environment, EnvironmentController, EnvironmentSnapshot, EnvironmentSpec,
    PackageEnvironment,
};

use crate::render::{finish_spinner, render_table, TerminalRenderer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProjectContext {
    pub(crate) dir: PathBuf,
    pub(crate) manifest_path: PathBuf,
}

/// Uses `explicit` when given, otherwise walks up from `cwd` (stopping at `home`).
pub(crate) fn locate_project(
    explicit: Option<&Path>,
    cwd: &Path,
    home: Option<&Path>,
) -> Result<ProjectContext> {
    let manifest_path = match explicit {
        Some(dir) => {
            let path = dir.join(MANIFEST_FILE_NAME);
            if !path.is_file() {
                return Err(Error::ManifestNotFound { path }.into());
            }
            path
        }
        None => find_manifest(cwd, home).ok_or_else(|| Error::ManifestNotFound {
            path: cwd.join(MANIFEST_FILE_NAME),
        })?,
    };

    let dir = manifest_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| cwd.to_path_buf());
    Ok(ProjectContext { dir, manifest_path })
}

fn controller_for(project: &ProjectContext) -> Result<(Manifest, EnvironmentController)> {
    let manifest = Manifest::load(&project.manifest_path)?;
    let spec = EnvironmentSpec::from_manifest(&project.dir, &manifest)?;
    Ok((manifest, EnvironmentController::new(spec)))
}

pub(crate) fn run_init(
    project_dir: &Path,
    name: &str,
    no_env: bool,
    config: &GlobalConfig,
    renderer: TerminalRenderer,
) -> Result<()> {
    let manifest = Manifest::init_in(project_dir, name, config)?;
    renderer.print_status(
        "ok",
        &format!(
            "created {}",
            project_dir.join(MANIFEST_FILE_NAME).display()
        ),
    );

    if no_env || !config.create_venv {
        return Ok(());
    }

    ensure_no_active_environment()?;
    let spec = EnvironmentSpec::from_manifest(project_dir, &manifest)?;
    let mut controller = EnvironmentController::new(spec);
    let report = rebuild_with_spinner(&mut controller, &manifest, RebuildOptions::default(), renderer)?;
    renderer.print_status("ok", &format_rebuild_message(&controller.env_dir(), &report));
    Ok(())
}

pub(crate) fn run_add(
    project: &ProjectContext,
    name: &str,
    file: Option<PathBuf>,
    renderer: TerminalRenderer,
) -> Result<()> {
    let (manifest, mut controller) = controller_for(project)?;
    if manifest.has_dependency(name) {
        bail!(
            "dependency '{name}' is already recorded in {}; remove it first",
            project.manifest_path.display()
        );
    }

    if !controller.exists() {
        ensure_no_active_environment()?;
        controller.create()?;
    }

    let source = match file {
        Some(path) => DependencySource::LocalFile(path),
        None => DependencySource::Registry,
    };
    let spinner = renderer.start_spinner(&format!("installing {name}"));
    let result =
        DependencySynchronizer::new(&mut controller, &project.manifest_path).add(name, &source);
    finish_spinner(spinner);

    let record = result?;
    renderer.print_status("ok", &format_added_message(&record));
    Ok(())
}

pub(crate) fn run_remove(
    project: &ProjectContext,
    name: &str,
    renderer: TerminalRenderer,
) -> Result<()> {
    let (_, mut controller) = controller_for(project)?;
    let record =
        DependencySynchronizer::new(&mut controller, &project.manifest_path).remove(name)?;

    renderer.print_status("ok", &format!("removed {}", record.name));
    if !record.new_packages.is_empty() {
        renderer.print_status(
            "warn",
            &format!(
                "left installed: {} (may be required by other dependencies)",
                record.new_packages.join(", ")
            ),
        );
    }
    Ok(())
}

pub(crate) fn run_deps(project: &ProjectContext, renderer: TerminalRenderer) -> Result<()> {
    let manifest = Manifest::load(&project.manifest_path)?;
    if manifest.dependencies().is_empty() && manifest.local_dependencies().is_empty() {
        println!("No dependencies recorded");
        return Ok(());
    }

    if !manifest.dependencies().is_empty() {
        renderer.print_section("dependencies");
        renderer.print_lines(&format_dependency_lines(manifest.dependencies()));
    }
    if !manifest.local_dependencies().is_empty() {
        renderer.print_section("local dependencies");
        renderer.print_lines(&format_dependency_lines(manifest.local_dependencies()));
    }
    Ok(())
}

pub(crate) fn run_env_create(project: &ProjectContext, renderer: TerminalRenderer) -> Result<()> {
    ensure_no_active_environment()?;
    let (_, mut controller) = controller_for(project)?;
    if controller.exists() {
        renderer.print_status(
            "ok",
            &format!("environment already exists: {}", controller.env_dir().display()),
        );
        return Ok(());
    }

    controller.create()?;
    renderer.print_status(
        "ok",
        &format!("created environment {}", controller.env_dir().display()),
    );
    Ok(())
}

pub(crate) fn run_env_destroy(
    project: &ProjectContext,
    missing_ok: bool,
    renderer: TerminalRenderer,
) -> Result<()> {
    ensure_no_active_environment()?;
    let (_, mut controller) = controller_for(project)?;
    let existed = controller.exists();
    controller.destroy(missing_ok)?;

    if existed {
        renderer.print_status(
            "ok",
            &format!("destroyed environment {}", controller.env_dir().display()),
        );
    }
    Ok(())
}

pub(crate) fn run_env_list(project: &ProjectContext, renderer: TerminalRenderer) -> Result<()> {
    let (_, controller) = controller_for(project)?;
    let snapshot = controller.snapshot()?;
    if snapshot.is_empty() {
        println!("No packages installed in {}", snapshot.env_dir().display());
        return Ok(());
    }

    renderer.print_section("installed packages");
    renderer.print_lines(&format_snapshot_lines(&snapshot));
    Ok(())
}

pub(crate) fn run_sync(
    project: &ProjectContext,
    recreate: bool,
    renderer: TerminalRenderer,
) -> Result<()> {
    ensure_no_active_environment()?;
    let (manifest, mut controller) = controller_for(project)?;
    let report = rebuild_with_spinner(&mut controller, &manifest, RebuildOptions { recreate }, renderer)?;
    renderer.print_status("ok", &format_rebuild_message(&controller.env_dir(), &report));
    Ok(())
}

pub(crate) fn rebuild_with_spinner(
    controller: &mut EnvironmentController,
    manifest: &Manifest,
    options: RebuildOptions,
    renderer: TerminalRenderer,
) -> Result<RebuildReport> {
    let spinner = renderer.start_spinner(&format!("building environment for {}", manifest.project.name));
    let result = EnvironmentReconstructor::new(controller)
        .with_options(options)
        .rebuild(manifest);
    finish_spinner(spinner);

    result.with_context(|| {
        format!(
            "environment for '{}' is partially built; fix the failing dependency and run `pyappm sync`",
            manifest.project.name
        )
    })
}

pub(crate) fn format_added_message(record: &DependencyRecord) -> String {
    let mut message = format!("added {}", record.name);
    if let Some(file) = &record.file {
        message.push_str(&format!(" from {file}"));
    }
    if !record.new_packages.is_empty() {
        message.push_str(&format!(" (pulled in: {})", record.new_packages.join(", ")));
    }
    message
}

pub(crate) fn format_dependency_lines(records: &[DependencyRecord]) -> Vec<String> {
    let rows: Vec<(String, String)> = records
        .iter()
        .map(|record| (record.name.clone(), record.new_packages.join(", ")))
        .collect();
    render_table(&rows)
}

pub(crate) fn format_snapshot_lines(snapshot: &EnvironmentSnapshot) -> Vec<String> {
    let rows: Vec<(String, String)> = snapshot
        .packages()
        .iter()
        .map(|package| (package.name.clone(), package.version.clone()))
        .collect();
    render_table(&rows)
}

pub(crate) fn format_rebuild_message(env_dir: &Path, report: &RebuildReport) -> String {
    let verb = if report.recreated { "recreated" } else { "built" };
    format!(
        "{verb} {} with {} dependencies",
        env_dir.display(),
        report.dependencies.len()
    )
}
