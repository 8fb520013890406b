use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use pyappm_core::{remove_file_if_exists, Manifest, UserLayout, MANIFEST_FILE_NAME};

/// Entry in the user bin dir that starts `executable`.
pub(crate) fn launcher_path(layout: &UserLayout, executable: &str) -> PathBuf {
    let mut file_name = executable.to_string();
    if cfg!(windows) {
        file_name.push_str(".cmd");
    }
    layout.bin_dir().join(file_name)
}

/// Writes one launcher per `[executable]` entry of an installed application.
///
/// Each entry gets a Python runner `<app_dir>/<name>_runner` calling the entry point,
/// a start script in the environment's bin dir and, in the user bin dir, a symlink to
/// that script (a `.cmd` shim on Windows).
pub(crate) fn write_launchers(
    layout: &UserLayout,
    app_dir: &Path,
    env_bin_dir: &Path,
    manifest: &Manifest,
) -> Result<Vec<String>> {
    let mut written = Vec::new();
    for (executable, entry_point) in &manifest.executable {
        let (module, function) = entry_point
            .split_once(':')
            .ok_or_else(|| anyhow!("executable '{executable}' has no 'module:function' entry point"))?;

        let runner = app_dir.join(format!("{executable}_runner"));
        fs::write(&runner, runner_script(module.trim(), function.trim()))
            .with_context(|| format!("failed to write runner: {}", runner.display()))?;
        make_executable(&runner)?;

        create_launcher(layout, env_bin_dir, executable, &runner)?;
        tracing::info!(executable = %executable, runner = %runner.display(), "wrote launcher");
        written.push(executable.clone());
    }
    Ok(written)
}

/// Removes the user bin entries of an installed application.
///
/// Entries come from the application's manifest when it still loads; the entry named
/// after the application itself is always removed.
pub(crate) fn remove_launchers(layout: &UserLayout, name: &str) -> Result<()> {
    let app_dir = layout.app_dir(name);
    let mut executables = vec![name.to_string()];
    if let Ok(manifest) = Manifest::load(&app_dir.join(MANIFEST_FILE_NAME)) {
        executables.extend(manifest.executable.into_keys());
    }

    for executable in executables {
        remove_file_if_exists(&launcher_path(layout, &executable))?;
    }
    Ok(())
}

pub(crate) fn runner_script(module: &str, function: &str) -> String {
    format!(
        r#"#!/usr/bin/env python3
# -*- coding: utf-8 -*-
import re
import sys

from {module} import {function}

if __name__ == "__main__":
    sys.argv[0] = re.sub(r"(-script\.pyw|\.exe)?$", "", sys.argv[0])
    sys.exit({function}())
"#
    )
}

#[cfg(unix)]
fn create_launcher(
    layout: &UserLayout,
    env_bin_dir: &Path,
    executable: &str,
    runner: &Path,
) -> Result<()> {
    let script = env_bin_dir.join(executable);
    let python = env_bin_dir.join("python");
    fs::write(
        &script,
        format!(
            "#!/bin/sh\nexec \"{}\" \"{}\" \"$@\"\n",
            python.display(),
            runner.display()
        ),
    )
    .with_context(|| format!("failed to write start script: {}", script.display()))?;
    make_executable(&script)?;

    let destination = launcher_path(layout, executable);
    remove_file_if_exists(&destination)?;
    std::os::unix::fs::symlink(&script, &destination).with_context(|| {
        format!(
            "failed to create symlink {} -> {}",
            destination.display(),
            script.display()
        )
    })
}

#[cfg(windows)]
fn create_launcher(
    layout: &UserLayout,
    env_bin_dir: &Path,
    executable: &str,
    runner: &Path,
) -> Result<()> {
    let destination = launcher_path(layout, executable);
    let shim = format!(
        "@echo off\r\n\"{}\" \"{}\" %*\r\n",
        env_bin_dir.join("python.exe").display(),
        runner.display()
    );
    fs::write(&destination, shim.as_bytes())
        .with_context(|| format!("failed to write shim: {}", destination.display()))
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .with_context(|| format!("failed to mark executable: {}", path.display()))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}
