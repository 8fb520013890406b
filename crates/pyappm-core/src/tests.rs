use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use super::*;

const SAMPLE_MANIFEST: &str = r#"
[tools]
env_create_tool = "python3 -m venv"
env_name = "env"
env_lib_installer = "python3 -m pip"
env_activate_tool = "source bin/activate"

[project]
name = "demo"
version = "1.0.0"
readme = "README.md"
license = "LICENSE.txt"
description = "A demo application"
authors = [{ name = "Ada", email = "ada@example.test" }]
requires_python = ">=3.11"
type = "application"

[[project.dependencies]]
name = "requests"
new_packages = ["urllib3", "certifi"]

[[project.dependencies]]
name = "click"
new_packages = []

[executable]
demo = "demo:run"

[includes]
directories = ["assets"]
files = ["py.typed"]

[custom]
owner = "platform-team"
"#;

#[test]
fn parse_manifest() {
    let manifest = Manifest::from_toml_str(SAMPLE_MANIFEST).expect("manifest should parse");

    assert_eq!(manifest.tools.env_create_tool, "python3 -m venv");
    assert_eq!(manifest.tools.env_name, "env");
    assert_eq!(manifest.tools.env_lib_installer, "python3 -m pip");
    assert_eq!(manifest.project.name, "demo");
    assert_eq!(manifest.project.requires_python, ">=3.11");
    assert_eq!(
        manifest.project.authors,
        vec![Author {
            name: "Ada".to_string(),
            email: Some("ada@example.test".to_string()),
        }]
    );
    let names: Vec<&str> = manifest
        .dependencies()
        .iter()
        .map(|record| record.name.as_str())
        .collect();
    assert_eq!(names, vec!["requests", "click"]);
    assert_eq!(
        manifest.dependencies()[0].new_packages,
        vec!["urllib3", "certifi"]
    );
    assert_eq!(
        manifest.executable.get("demo").map(String::as_str),
        Some("demo:run")
    );
    assert_eq!(manifest.includes.directories, vec!["assets"]);
    assert_eq!(manifest.includes.files, vec!["py.typed"]);
}

#[test]
fn parse_manifest_keeps_unknown_keys() {
    let manifest = Manifest::from_toml_str(SAMPLE_MANIFEST).expect("manifest should parse");

    assert_eq!(
        manifest.tools.extra.get("env_activate_tool"),
        Some(&toml::Value::String("source bin/activate".to_string()))
    );
    assert_eq!(
        manifest.project.extra.get("type"),
        Some(&toml::Value::String("application".to_string()))
    );
    assert!(manifest.extra.contains_key("custom"));
}

#[test]
fn dependency_record_keeps_unknown_keys_through_save() {
    let root = test_root();
    let path = root.join(MANIFEST_FILE_NAME);
    let content = format!(
        "{}\n[[project.dependencies]]\nname = \"requests\"\nnew_packages = [\"urllib3\"]\npinned = \"2.31\"\n",
        minimal_manifest("demo")
    );
    let manifest = Manifest::from_toml_str(&content).expect("manifest should parse");
    assert_eq!(
        manifest.dependencies()[0].extra.get("pinned"),
        Some(&toml::Value::String("2.31".to_string()))
    );

    manifest.save(&path).expect("must save manifest");
    let written = fs::read_to_string(&path).expect("must read manifest");
    assert!(written.contains("pinned = \"2.31\""), "{written}");
    let loaded = Manifest::load(&path).expect("must load manifest");
    assert_eq!(loaded.dependencies(), manifest.dependencies());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn local_dependencies_are_kept_apart_from_registry_records() {
    let content = format!(
        "{}\n[[project.local_dependencies]]\nname = \"mytool\"\nfile = \"deps/mytool-0.1.0-py3-none-any.whl\"\nnew_packages = [\"attrs\"]\n",
        minimal_manifest("demo")
    );
    let mut manifest = Manifest::from_toml_str(&content).expect("manifest should parse");

    assert!(manifest.dependencies().is_empty());
    assert_eq!(
        manifest.local_dependencies(),
        &[DependencyRecord::new("mytool", vec!["attrs".to_string()])
            .with_file("deps/mytool-0.1.0-py3-none-any.whl")]
    );
    assert!(manifest.has_dependency("mytool"));

    let removed = manifest
        .remove_local_dependency("mytool")
        .expect("local record must be removed");
    assert_eq!(removed.file.as_deref(), Some("deps/mytool-0.1.0-py3-none-any.whl"));
    assert!(!manifest.has_dependency("mytool"));
    let text = manifest.to_toml_string().expect("must serialize");
    assert!(!text.contains("local_dependencies"), "{text}");
}

#[test]
fn local_dependency_without_file_is_rejected() {
    let content = format!(
        "{}\n[[project.local_dependencies]]\nname = \"mytool\"\n",
        minimal_manifest("demo")
    );
    let err = Manifest::from_toml_str(&content).expect_err("must reject local record");
    assert!(err.contains("distribution file"), "{err}");
}

#[test]
fn parse_manifest_accepts_hyphenated_keys() {
    let content = r#"
[tools]
env-create-tool = "virtualenv"
env-name = ".venv"
env-lib-installer = "pip"

[project]
name = "demo"
version = "0.1.0"
requires-python = ">=3.12"
"#;

    let manifest = Manifest::from_toml_str(content).expect("manifest should parse");
    assert_eq!(manifest.tools.env_create_tool, "virtualenv");
    assert_eq!(manifest.tools.env_name, ".venv");
    assert_eq!(manifest.tools.env_lib_installer, "pip");
    assert_eq!(manifest.project.requires_python, ">=3.12");
    assert!(manifest.tools.extra.is_empty());
}

#[test]
fn parse_manifest_normalizes_bare_dependency_names() {
    let content = r#"
[tools]
env_create_tool = "python3 -m venv"
env_name = "env"
env_lib_installer = "python3 -m pip"

[project]
name = "demo"
version = "0.1.0"
dependencies = ["rich", { name = "httpx", new_packages = ["anyio", "anyio", "idna"] }]
"#;

    let manifest = Manifest::from_toml_str(content).expect("manifest should parse");
    assert_eq!(
        manifest.dependencies(),
        &[
            DependencyRecord::new("rich", Vec::new()),
            DependencyRecord::new("httpx", vec!["anyio".to_string(), "idna".to_string()]),
        ]
    );
}

#[test]
fn parse_manifest_applies_project_defaults() {
    let manifest = Manifest::from_toml_str(&minimal_manifest("demo")).expect("must parse");
    assert_eq!(manifest.project.readme, "README.md");
    assert_eq!(manifest.project.license, "LICENSE.txt");
    assert_eq!(manifest.project.requires_python, ">=3.10");
    assert!(manifest.dependencies().is_empty());
    assert!(manifest.executable.is_empty());
    assert_eq!(manifest.includes, Includes::default());
}

#[test]
fn parse_manifest_rejects_nested_env_name() {
    let content = minimal_manifest("demo").replace("env_name = \"env\"", "env_name = \"../env\"");
    let err = Manifest::from_toml_str(&content).expect_err("must reject env name");
    assert!(err.contains("single directory name"), "{err}");
}

#[test]
fn parse_manifest_rejects_malformed_entry_point() {
    let content = format!("{}\n[executable]\ndemo = \"demo\"\n", minimal_manifest("demo"));
    let err = Manifest::from_toml_str(&content).expect_err("must reject entry point");
    assert!(err.contains("module:function"), "{err}");
}

#[test]
fn parse_manifest_rejects_missing_tools_section() {
    let content = r#"
[project]
name = "demo"
version = "0.1.0"
"#;
    let err = Manifest::from_toml_str(content).expect_err("must reject manifest");
    assert!(err.contains("tools"), "{err}");
}

#[test]
fn save_then_load_round_trips_manifest() {
    let root = test_root();
    let path = root.join(MANIFEST_FILE_NAME);
    let manifest = Manifest::from_toml_str(SAMPLE_MANIFEST).expect("manifest should parse");

    manifest.save(&path).expect("must save manifest");
    let loaded = Manifest::load(&path).expect("must load manifest");

    assert_eq!(loaded, manifest);
    let names: Vec<&str> = loaded
        .dependencies()
        .iter()
        .map(|record| record.name.as_str())
        .collect();
    assert_eq!(names, vec!["requests", "click"]);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn save_writes_sections_in_stable_order() {
    let root = test_root();
    let path = root.join(MANIFEST_FILE_NAME);
    let manifest = Manifest::from_toml_str(SAMPLE_MANIFEST).expect("manifest should parse");

    manifest.save(&path).expect("must save manifest");
    let content = fs::read_to_string(&path).expect("must read manifest");
    let tools = content.find("[tools]").expect("tools section");
    let project = content.find("[project]").expect("project section");
    let executable = content.find("[executable]").expect("executable section");
    let includes = content.find("[includes]").expect("includes section");
    assert!(tools < project && project < executable && executable < includes);
    assert!(content.contains("owner = \"platform-team\""), "{content}");

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn save_leaves_no_temp_files_behind() {
    let root = test_root();
    let path = root.join(MANIFEST_FILE_NAME);
    let manifest = Manifest::from_toml_str(&minimal_manifest("demo")).expect("must parse");

    manifest.save(&path).expect("first save");
    manifest.save(&path).expect("second save");

    let entries: Vec<String> = fs::read_dir(&root)
        .expect("must list root")
        .map(|entry| {
            entry
                .expect("entry")
                .file_name()
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    assert_eq!(entries, vec![MANIFEST_FILE_NAME.to_string()]);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn save_rejects_invalid_manifest_without_touching_file() {
    let root = test_root();
    let path = root.join(MANIFEST_FILE_NAME);
    let mut manifest = Manifest::from_toml_str(&minimal_manifest("demo")).expect("must parse");
    manifest.save(&path).expect("must save");
    let before = fs::read_to_string(&path).expect("must read");

    manifest.project.name = String::new();
    let err = manifest.save(&path).expect_err("must reject empty name");
    assert!(matches!(err, Error::ManifestParse { .. }));
    assert_eq!(fs::read_to_string(&path).expect("must read"), before);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn load_reports_missing_manifest() {
    let root = test_root();
    let err = Manifest::load(&root.join(MANIFEST_FILE_NAME)).expect_err("must fail");
    assert!(matches!(err, Error::ManifestNotFound { .. }));
    assert_eq!(err.kind(), "manifest-not-found");

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn load_reports_parse_errors_with_path() {
    let root = test_root();
    let path = root.join(MANIFEST_FILE_NAME);
    fs::write(&path, "[tools\nbroken").expect("must write");

    let err = Manifest::load(&path).expect_err("must fail");
    match err {
        Error::ManifestParse { path: reported, .. } => assert_eq!(reported, path),
        other => panic!("unexpected error: {other}"),
    }

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn remove_dependency_takes_most_recent_duplicate() {
    let mut manifest = Manifest::from_toml_str(&minimal_manifest("demo")).expect("must parse");
    manifest.push_dependency(DependencyRecord::new("requests", vec!["urllib3".to_string()]));
    manifest.push_dependency(DependencyRecord::new("click", Vec::new()));
    manifest.push_dependency(DependencyRecord::new("requests", vec!["idna".to_string()]));

    let removed = manifest
        .remove_dependency("requests")
        .expect("must remove record");
    assert_eq!(removed.new_packages, vec!["idna"]);
    assert_eq!(
        manifest.dependencies(),
        &[
            DependencyRecord::new("requests", vec!["urllib3".to_string()]),
            DependencyRecord::new("click", Vec::new()),
        ]
    );
    assert!(manifest.remove_dependency("Requests").is_none());
}

#[test]
fn find_manifest_walks_up_to_project_root() {
    let root = test_root();
    let project = root.join("project");
    let nested = project.join("src").join("demo");
    fs::create_dir_all(&nested).expect("must create dirs");
    fs::write(project.join(MANIFEST_FILE_NAME), minimal_manifest("demo")).expect("must write");

    assert_eq!(
        find_manifest(&nested, Some(&root)),
        Some(project.join(MANIFEST_FILE_NAME))
    );

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn find_manifest_stops_at_boundary() {
    let root = test_root();
    let home = root.join("home");
    let nested = home.join("work");
    fs::create_dir_all(&nested).expect("must create dirs");
    fs::write(root.join(MANIFEST_FILE_NAME), minimal_manifest("outside")).expect("must write");

    assert_eq!(find_manifest(&nested, Some(&home)), None);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn global_config_load_missing_file_returns_defaults() {
    let root = test_root();
    let path = root.join(CONFIG_FILE_NAME);

    let config = GlobalConfig::load(&path).expect("must load defaults");
    assert_eq!(config, GlobalConfig::default());
    assert!(!path.exists());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn global_config_load_or_init_persists_defaults() {
    let root = test_root();
    let path = root.join("nested").join(CONFIG_FILE_NAME);

    let config = GlobalConfig::load_or_init(&path).expect("must init config");
    assert_eq!(config, GlobalConfig::default());
    let content = fs::read_to_string(&path).expect("config must be written");
    assert!(content.starts_with("[pyappm]"), "{content}");
    assert_eq!(GlobalConfig::load(&path).expect("must reload"), config);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn global_config_partial_file_keeps_other_defaults() {
    let root = test_root();
    let path = root.join(CONFIG_FILE_NAME);
    fs::write(
        &path,
        r#"
[pyappm]
default_env_name = ".venv"
dependencies = ["rich"]
create_venv = false
"#,
    )
    .expect("must write config");

    let config = GlobalConfig::load(&path).expect("must load config");
    assert_eq!(config.default_env_name, ".venv");
    assert_eq!(config.dependencies, vec!["rich"]);
    assert!(!config.create_venv);
    assert_eq!(config.env_create_tool, "python3 -m venv");
    assert_eq!(config.repository_url, DEFAULT_REPOSITORY_URL);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn global_config_reports_malformed_file() {
    let root = test_root();
    let path = root.join(CONFIG_FILE_NAME);
    fs::write(&path, "[pyappm]\ncreate_venv = \"sometimes\"\n").expect("must write config");

    let err = GlobalConfig::load(&path).expect_err("must reject config");
    assert!(matches!(err, Error::ConfigParse { .. }));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn new_project_manifest_copies_configured_defaults() {
    let config = GlobalConfig {
        default_env_name: ".venv".to_string(),
        env_lib_installer_tool: "uv pip".to_string(),
        dependencies: vec!["rich".to_string()],
        authors: vec![Author {
            name: "Ada".to_string(),
            email: None,
        }],
        ..GlobalConfig::default()
    };

    let manifest = Manifest::for_new_project("demo", &config);
    assert_eq!(manifest.tools.env_name, ".venv");
    assert_eq!(manifest.tools.env_lib_installer, "uv pip");
    assert_eq!(manifest.tools.env_create_tool, "python3 -m venv");
    assert_eq!(manifest.project.version, "0.1.0");
    assert_eq!(manifest.project.authors, config.authors);
    assert_eq!(
        manifest.dependencies(),
        &[DependencyRecord::new("rich", Vec::new())]
    );
    assert_eq!(
        manifest.executable.get("demo").map(String::as_str),
        Some("demo:run")
    );
}

#[test]
fn init_in_refuses_to_overwrite_existing_manifest() {
    let root = test_root();
    let config = GlobalConfig::default();

    Manifest::init_in(&root, "demo", &config).expect("first init must succeed");
    let err = Manifest::init_in(&root, "demo", &config).expect_err("second init must fail");
    assert!(matches!(err, Error::ManifestExists { .. }));

    let loaded = Manifest::load(&root.join(MANIFEST_FILE_NAME)).expect("must load manifest");
    assert_eq!(loaded, Manifest::for_new_project("demo", &config));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn user_layout_places_state_under_home() {
    let layout = UserLayout::new("/home/ada");
    assert_eq!(
        layout.config_path(),
        PathBuf::from("/home/ada/.config/pyappm/pyappmconfig.toml")
    );
    assert_eq!(
        layout.app_dir("demo"),
        PathBuf::from("/home/ada/.pyappm/share/applications/demo")
    );
    assert_eq!(
        layout.cached_archive_path("demo"),
        PathBuf::from("/home/ada/.cache/pyappm/demo.pap")
    );
}

#[test]
fn user_layout_lists_installed_apps() {
    let root = test_root();
    let layout = UserLayout::new(&root);
    layout.ensure_base_dirs().expect("must create dirs");
    fs::create_dir_all(layout.app_dir("zeta")).expect("must create app");
    fs::create_dir_all(layout.app_dir("alpha")).expect("must create app");
    fs::write(layout.apps_dir().join("stray.txt"), "x").expect("must write file");

    assert_eq!(
        layout.installed_apps().expect("must list apps"),
        vec!["alpha", "zeta"]
    );

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn write_atomic_replaces_existing_content() {
    let root = test_root();
    let path = root.join("state.toml");
    fs::write(&path, "old").expect("must write");

    write_atomic(&path, b"new").expect("must replace");
    assert_eq!(fs::read_to_string(&path).expect("must read"), "new");

    let _ = fs::remove_dir_all(&root);
}

fn minimal_manifest(name: &str) -> String {
    format!(
        r#"
[tools]
env_create_tool = "python3 -m venv"
env_name = "env"
env_lib_installer = "python3 -m pip"

[project]
name = "{name}"
version = "0.1.0"
"#
    )
}

fn test_root() -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let root = std::env::temp_dir().join(format!(
        "pyappm-core-tests-{}-{}-{}",
        std::process::id(),
        nanos,
        COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    fs::create_dir_all(&root).expect("must create test root");
    root
}
