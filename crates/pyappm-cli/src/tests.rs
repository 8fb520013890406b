use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use clap::{CommandFactory, Parser};
use pyappm_core::{DependencyRecord, Error, Manifest, UserLayout, MANIFEST_FILE_NAME};
use pyappm_deps::RebuildReport;
use pyappm_repository::{
    ApplicationListing, Catalog, Credentials, RepositoryEntry, RepositoryFailure,
    RepositoryListing,
};

use super::*;
use crate::command_flows::{
    format_added_message, format_dependency_lines, format_rebuild_message, locate_project,
};
use crate::completion::write_completions_script;
use crate::core_flows::{
    application_name, format_catalog_lines, format_repository_lines, installed_application_rows,
    local_archive_path, locate_application_root, resolve_credentials, run_uninstall,
};
use crate::launchers::{launcher_path, runner_script};
use crate::dispatch::exit_code_for;
use crate::render::{render_status_line, render_table, OutputStyle, TerminalRenderer};

#[test]
fn cli_definition_is_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn cli_parses_add_with_local_file() {
    let cli = Cli::try_parse_from(["pyappm", "add", "mytool", "--file", "dist/mytool.whl"])
        .expect("command must parse");
    match cli.command {
        Commands::Add { name, file } => {
            assert_eq!(name, "mytool");
            assert_eq!(file, Some(PathBuf::from("dist/mytool.whl")));
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn cli_parses_install_options_and_global_flags() {
    let cli = Cli::try_parse_from([
        "pyappm",
        "install",
        "notes",
        "--version",
        "1.2.0",
        "--repository",
        "main",
        "--verbose",
        "--project",
        "/work/demo",
    ])
    .expect("command must parse");

    assert!(cli.verbose);
    assert_eq!(cli.project, Some(PathBuf::from("/work/demo")));
    match cli.command {
        Commands::Install {
            name,
            app_version,
            repository,
            refresh,
        } => {
            assert_eq!(name, "notes");
            assert_eq!(app_version.as_deref(), Some("1.2.0"));
            assert_eq!(repository.as_deref(), Some("main"));
            assert!(!refresh);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn cli_parses_nested_subcommands() {
    let cli = Cli::try_parse_from(["pyappm", "env", "destroy", "--missing-ok"])
        .expect("command must parse");
    assert!(matches!(
        cli.command,
        Commands::Env {
            command: EnvCommands::Destroy { missing_ok: true }
        }
    ));

    let cli = Cli::try_parse_from(["pyappm", "repo", "add", "main", "https://x"])
        .expect("command must parse");
    assert!(matches!(
        cli.command,
        Commands::Repo {
            command: RepoCommands::Add { .. }
        }
    ));

    Cli::try_parse_from(["pyappm", "env", "rebuild"]).expect_err("unknown subcommand must fail");
}

#[test]
fn render_status_line_plain_is_unadorned() {
    assert_eq!(
        render_status_line(OutputStyle::Plain, "ok", "added requests"),
        "added requests"
    );
}

#[test]
fn render_status_line_rich_includes_ascii_badge() {
    assert_eq!(
        render_status_line(OutputStyle::Rich, "ok", "added requests"),
        "[OK] added requests"
    );
    assert_eq!(
        render_status_line(OutputStyle::Rich, "warn", "left installed: urllib3"),
        "[WARN] left installed: urllib3"
    );
}

#[test]
fn render_table_aligns_second_column() {
    let rows = vec![
        ("requests".to_string(), "urllib3, certifi".to_string()),
        ("six".to_string(), String::new()),
        ("rich".to_string(), "pygments".to_string()),
    ];
    assert_eq!(
        render_table(&rows),
        vec![
            "requests  urllib3, certifi".to_string(),
            "six".to_string(),
            "rich      pygments".to_string(),
        ]
    );
}

#[test]
fn dependency_formatting() {
    let requests = DependencyRecord::new(
        "requests",
        vec!["urllib3".to_string(), "certifi".to_string()],
    );
    let six = DependencyRecord::new("six", Vec::new());

    assert_eq!(
        format_added_message(&requests),
        "added requests (pulled in: urllib3, certifi)"
    );
    assert_eq!(format_added_message(&six), "added six");
    assert_eq!(
        format_added_message(
            &DependencyRecord::new("mytool", vec!["attrs".to_string()])
                .with_file("deps/mytool-0.1.0-py3-none-any.whl")
        ),
        "added mytool from deps/mytool-0.1.0-py3-none-any.whl (pulled in: attrs)"
    );
    assert_eq!(
        format_dependency_lines(&[requests, six]),
        vec!["requests  urllib3, certifi".to_string(), "six".to_string()]
    );

    let report = RebuildReport {
        recreated: true,
        runtime_packages: vec!["tomli".to_string()],
        dependencies: vec!["requests".to_string()],
    };
    assert_eq!(
        format_rebuild_message(&PathBuf::from("/work/demo/env"), &report),
        "recreated /work/demo/env with 1 dependencies"
    );
}

#[test]
fn repository_and_catalog_formatting() {
    let main = RepositoryEntry::new("pyappm_main", "https://pyappm.nl/api/v1");
    assert_eq!(
        format_repository_lines(&[main.clone(), RepositoryEntry::new("local", "http://localhost:8000")]),
        vec![
            "pyappm_main  https://pyappm.nl/api/v1".to_string(),
            "local        http://localhost:8000".to_string(),
        ]
    );

    let catalog = Catalog {
        listings: vec![RepositoryListing {
            repository: main,
            applications: vec![
                ApplicationListing {
                    name: "notes".to_string(),
                    version: "1.2.0".to_string(),
                },
                ApplicationListing {
                    name: "clock".to_string(),
                    version: "0.3".to_string(),
                },
            ],
        }],
        failures: vec![RepositoryFailure {
            repository: RepositoryEntry::new("down", "http://127.0.0.1:1"),
            error: Error::RepositoryUnreachable {
                url: "http://127.0.0.1:1".to_string(),
                message: "connection refused".to_string(),
            },
        }],
    };
    assert_eq!(
        format_catalog_lines(&catalog),
        vec![
            "pyappm_main (https://pyappm.nl/api/v1)".to_string(),
            "  notes  1.2.0".to_string(),
            "  clock  0.3".to_string(),
        ]
    );
}

#[test]
fn exit_codes_follow_error_kind() {
    let not_found: anyhow::Error = Error::ManifestNotFound {
        path: PathBuf::from("/work/pyapp.toml"),
    }
    .into();
    assert_eq!(exit_code_for(&not_found), 2);

    let wrapped = Err::<(), _>(Error::PackageInstall {
        operation: "install".to_string(),
        package: "broken".to_string(),
        output: "status=1".to_string(),
    })
    .context("environment is partially built")
    .expect_err("must be an error");
    assert_eq!(exit_code_for(&wrapped), 5);

    let duplicate: anyhow::Error = Error::DuplicateRepository {
        name: "main".to_string(),
    }
    .into();
    assert_eq!(exit_code_for(&duplicate), 7);

    assert_eq!(exit_code_for(&anyhow::anyhow!("plain failure")), 1);
}

#[test]
fn locate_project_walks_up_to_manifest() {
    let root = test_root();
    let project = root.join("demo");
    let nested = project.join("src").join("demo");
    fs::create_dir_all(&nested).expect("must create nested dir");
    fs::write(project.join(MANIFEST_FILE_NAME), "").expect("must write manifest");

    let found = locate_project(None, &nested, Some(root.as_path())).expect("must find project");
    assert_eq!(found.dir, project);
    assert_eq!(found.manifest_path, project.join(MANIFEST_FILE_NAME));

    let explicit = locate_project(Some(project.as_path()), &root, None).expect("must use explicit dir");
    assert_eq!(explicit.dir, project);

    let err = locate_project(None, &root, Some(root.as_path())).expect_err("no manifest above root");
    assert_eq!(exit_code_for(&err), 2);
    let err = locate_project(Some(nested.as_path()), &root, None).expect_err("explicit dir without manifest");
    assert!(err.to_string().contains("manifest not found"));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn locate_application_root_accepts_flat_or_single_dir_archives() {
    let root = test_root();

    let flat = root.join("flat");
    fs::create_dir_all(flat.join("notes")).expect("must create package dir");
    fs::write(flat.join(MANIFEST_FILE_NAME), "").expect("must write manifest");
    assert_eq!(locate_application_root(&flat).expect("flat layout"), flat);

    let wrapped = root.join("wrapped");
    fs::create_dir_all(wrapped.join("notes-1.2.0")).expect("must create wrapper dir");
    fs::write(wrapped.join("notes-1.2.0").join(MANIFEST_FILE_NAME), "").expect("must write manifest");
    assert_eq!(
        locate_application_root(&wrapped).expect("wrapped layout"),
        wrapped.join("notes-1.2.0")
    );

    let empty = root.join("empty");
    fs::create_dir_all(empty.join("a")).expect("must create dir");
    fs::create_dir_all(empty.join("b")).expect("must create dir");
    let err = locate_application_root(&empty).expect_err("missing manifest must fail");
    assert!(err.to_string().contains(MANIFEST_FILE_NAME));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn resolve_credentials_prefers_token() {
    assert_eq!(
        resolve_credentials(Some("tok".to_string()), Some("ada"), Some("pw".to_string()))
            .expect("token must resolve"),
        Credentials::Token("tok".to_string())
    );
    assert_eq!(
        resolve_credentials(Some(String::new()), Some("ada"), Some("pw".to_string()))
            .expect("password must resolve"),
        Credentials::Password {
            username: "ada".to_string(),
            password: "pw".to_string(),
        }
    );

    let err = resolve_credentials(None, Some("ada"), None).expect_err("missing password must fail");
    assert!(err.to_string().contains("PYAPPM_PASSWORD"));
    resolve_credentials(None, None, Some("pw".to_string())).expect_err("missing username must fail");
}

#[test]
fn uninstall_removes_application_dir() {
    let root = test_root();
    let layout = UserLayout::new(&root);
    let app_dir = layout.app_dir("notes");
    fs::create_dir_all(app_dir.join("env")).expect("must create app dir");
    fs::write(app_dir.join(MANIFEST_FILE_NAME), "").expect("must write manifest");
    let renderer = TerminalRenderer::from_style(OutputStyle::Plain);

    run_uninstall(&layout, "notes", renderer).expect("uninstall must succeed");
    assert!(!app_dir.exists());

    let err = run_uninstall(&layout, "notes", renderer).expect_err("second uninstall must fail");
    assert!(err.to_string().contains("not installed"));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn cli_parses_list_of_installed_applications() {
    let cli = Cli::try_parse_from(["pyappm", "list"]).expect("command must parse");
    assert!(matches!(cli.command, Commands::List));
}

#[test]
fn install_target_with_archive_extension_is_local() {
    assert_eq!(
        local_archive_path("./dist/notes.pap"),
        Some(PathBuf::from("./dist/notes.pap"))
    );
    assert_eq!(local_archive_path("notes"), None);
    assert_eq!(local_archive_path("notes.zip"), None);
}

#[test]
fn application_name_must_be_single_directory() {
    let mut manifest = sample_manifest("notes");
    assert_eq!(application_name(&manifest).expect("valid name"), "notes");

    manifest.project.name = "../escape".to_string();
    application_name(&manifest).expect_err("parent traversal must fail");
    manifest.project.name = "a/b".to_string();
    application_name(&manifest).expect_err("nested path must fail");
}

#[test]
fn installed_applications_are_listed_with_versions() {
    let root = test_root();
    let layout = UserLayout::new(&root);
    assert!(installed_application_rows(&layout).expect("must list").is_empty());

    let notes = layout.app_dir("notes");
    fs::create_dir_all(&notes).expect("must create app dir");
    sample_manifest("notes")
        .save(&notes.join(MANIFEST_FILE_NAME))
        .expect("must write manifest");
    fs::create_dir_all(layout.app_dir("broken")).expect("must create app dir");

    assert_eq!(
        installed_application_rows(&layout).expect("must list"),
        vec![
            ("broken".to_string(), "(unreadable manifest)".to_string()),
            ("notes".to_string(), "0.1.0".to_string()),
        ]
    );

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn runner_script_calls_entry_point() {
    let script = runner_script("notes.cli", "main");
    assert!(script.starts_with("#!/usr/bin/env python3\n"));
    assert!(script.contains("from notes.cli import main\n"));
    assert!(script.contains("sys.exit(main())"));
}

#[cfg(unix)]
#[test]
fn launchers_are_written_and_removed_with_application() {
    use std::os::unix::fs::PermissionsExt;

    let root = test_root();
    let layout = UserLayout::new(&root);
    layout.ensure_base_dirs().expect("must create base dirs");
    let app_dir = layout.app_dir("notes");
    let env_bin = app_dir.join("env").join("bin");
    fs::create_dir_all(&env_bin).expect("must create env bin dir");
    let mut manifest = sample_manifest("notes");
    manifest
        .executable
        .insert("notes".to_string(), "notes.cli:main".to_string());
    manifest
        .executable
        .insert("notes-sync".to_string(), "notes.sync:run".to_string());
    manifest
        .save(&app_dir.join(MANIFEST_FILE_NAME))
        .expect("must write manifest");

    let written = crate::launchers::write_launchers(&layout, &app_dir, &env_bin, &manifest)
        .expect("launchers must be written");
    assert_eq!(written, vec!["notes".to_string(), "notes-sync".to_string()]);

    let runner = app_dir.join("notes-sync_runner");
    let runner_text = fs::read_to_string(&runner).expect("must read runner");
    assert!(runner_text.contains("from notes.sync import run"));

    let entry = launcher_path(&layout, "notes-sync");
    let metadata = fs::symlink_metadata(&entry).expect("launcher must exist");
    assert!(metadata.file_type().is_symlink());
    let target = fs::read_link(&entry).expect("must read symlink");
    assert_eq!(target, env_bin.join("notes-sync"));
    let start_script = fs::read_to_string(&target).expect("must read start script");
    assert!(start_script.contains(&env_bin.join("python").display().to_string()));
    assert!(start_script.contains(&runner.display().to_string()));
    let mode = fs::metadata(&target).expect("must stat script").permissions().mode();
    assert_eq!(mode & 0o111, 0o111);

    let renderer = TerminalRenderer::from_style(OutputStyle::Plain);
    run_uninstall(&layout, "notes", renderer).expect("uninstall must succeed");
    assert!(fs::symlink_metadata(launcher_path(&layout, "notes")).is_err());
    assert!(fs::symlink_metadata(&entry).is_err());
    assert!(!app_dir.exists());

    let _ = fs::remove_dir_all(&root);
}

fn sample_manifest(name: &str) -> Manifest {
    Manifest::from_toml_str(&format!(
        r#"
[tools]
env_create_tool = "python3 -m venv"
env_name = "env"
env_lib_installer = "python3 -m pip"

[project]
name = "{name}"
version = "0.1.0"
"#
    ))
    .expect("manifest must parse")
}

#[test]
fn completions_script_names_binary() {
    let mut script = Vec::new();
    write_completions_script(clap_complete::Shell::Bash, &mut script).expect("must render completions");
    let script = String::from_utf8(script).expect("completions must be utf-8");
    assert!(script.contains("pyappm"));
    assert!(script.contains("install"));
}

fn test_root() -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let root = std::env::temp_dir().join(format!(
        "pyappm-cli-tests-{}-{}-{}",
        std::process::id(),
        nanos,
        COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    fs::create_dir_all(&root).expect("must create test root");
    root
}
