use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use super::{create_reporter, Broadcast, ReporterError};

fn temp_dir(name: &str) -> PathBuf {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time")
        .as_nanos();
    let root = std::env::temp_dir().join(format!("dexit-reporter-{name}-{ts}"));
    fs::create_dir_all(&root).expect("mkdir root");
    root
}

fn no_options() -> IndexMap<String, Value> {
    IndexMap::new()
}

#[test]
fn unknown_reporter_lists_the_available_factories() {
    let err = create_reporter("bogus", &json!({})).expect_err("unknown reporter");
    let ReporterError::UnknownReporter { name, available } = err else {
        panic!("expected UnknownReporter");
    };
    assert_eq!(name, "bogus");
    assert_eq!(available, vec!["console".to_owned()]);
}

#[test]
fn load_from_path_requires_directory() {
    let mut broadcast = Broadcast::new();
    let err = broadcast
        .load_from_path(std::path::Path::new("/nonexistent/packages"), &no_options())
        .expect_err("missing dir");
    assert!(matches!(err, ReporterError::PackagesDirMissing { .. }));
}

#[test]
fn load_from_path_registers_marked_reporter_packages_only() {
    let root = temp_dir("discovery");
    let reporter_pkg = root.join("fancy-log");
    let module_pkg = root.join("shell-pkg");
    fs::create_dir_all(&reporter_pkg).expect("mkdir");
    fs::create_dir_all(&module_pkg).expect("mkdir");
    fs::write(
        reporter_pkg.join("module.toml"),
        concat!(
            "dexit_reporter = true\n",
            "provider = \"console\"\n",
            "[options]\n",
            "color = \"never\"\n",
        ),
    )
    .expect("write manifest");
    fs::write(
        module_pkg.join("module.toml"),
        "dexit_module = true\nprovider = \"shell\"\n",
    )
    .expect("write manifest");

    let mut broadcast = Broadcast::new();
    let loaded = broadcast
        .load_from_path(&root, &no_options())
        .expect("load");
    assert_eq!(loaded, vec!["fancy-log".to_owned()]);
    assert_eq!(broadcast.len(), 1);
}

#[test]
fn manifest_name_overrides_the_package_directory_name() {
    let root = temp_dir("rename");
    let package = root.join("some-dir");
    fs::create_dir_all(&package).expect("mkdir");
    fs::write(
        package.join("module.toml"),
        "dexit_reporter = true\nname = \"fancy\"\nprovider = \"console\"\n",
    )
    .expect("write manifest");

    let mut broadcast = Broadcast::new();
    let mut options = IndexMap::new();
    options.insert("fancy".to_owned(), json!({ "tasks": true }));
    let loaded = broadcast.load_from_path(&root, &options).expect("load");
    assert_eq!(loaded, vec!["fancy".to_owned()]);
    assert_eq!(broadcast.len(), 1);
}

#[test]
fn missing_provider_is_fatal() {
    let root = temp_dir("no-provider");
    let package = root.join("mystery");
    fs::create_dir_all(&package).expect("mkdir");
    fs::write(package.join("module.toml"), "dexit_reporter = true\n").expect("write manifest");

    let mut broadcast = Broadcast::new();
    let err = broadcast
        .load_from_path(&root, &no_options())
        .expect_err("missing provider");
    assert!(matches!(err, ReporterError::PackageProviderMissing { .. }));
}

#[test]
fn non_table_options_are_fatal() {
    let root = temp_dir("bad-options");
    let package = root.join("oops");
    fs::create_dir_all(&package).expect("mkdir");
    fs::write(
        package.join("module.toml"),
        "dexit_reporter = true\nprovider = \"console\"\noptions = 3\n",
    )
    .expect("write manifest");

    let mut broadcast = Broadcast::new();
    let err = broadcast
        .load_from_path(&root, &no_options())
        .expect_err("bad options");
    assert!(matches!(err, ReporterError::PackageOptionsNotTable { .. }));
}

#[test]
fn unknown_provider_is_fatal() {
    let root = temp_dir("unknown-provider");
    let package = root.join("mystery");
    fs::create_dir_all(&package).expect("mkdir");
    fs::write(
        package.join("module.toml"),
        "dexit_reporter = true\nprovider = \"mystery\"\n",
    )
    .expect("write manifest");

    let mut broadcast = Broadcast::new();
    let err = broadcast
        .load_from_path(&root, &no_options())
        .expect_err("unknown provider");
    assert!(matches!(err, ReporterError::UnknownReporter { .. }));
}
