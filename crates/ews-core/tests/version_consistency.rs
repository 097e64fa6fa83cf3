//! Every member crate takes its version from the workspace, and the
//! internal path dependencies pin that same version.

use std::path::{Path, PathBuf};

const MEMBERS: &[&str] = &["crates/ews-core", "crates/ews-ci", "crates/ews-cli"];

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .unwrap()
        .to_path_buf()
}

fn manifest(dir: &Path) -> toml::Value {
    let text = std::fs::read_to_string(dir.join("Cargo.toml")).unwrap();
    text.parse().unwrap()
}

fn workspace_version() -> String {
    manifest(&workspace_root())["workspace"]["package"]["version"]
        .as_str()
        .unwrap()
        .to_string()
}

#[test]
fn members_inherit_the_workspace_version() {
    let root = workspace_root();
    for member in MEMBERS {
        let doc = manifest(&root.join(member));
        let inherits = doc["package"]["version"]
            .get("workspace")
            .and_then(toml::Value::as_bool);
        assert_eq!(inherits, Some(true), "{member} must use version.workspace = true");
    }
}

#[test]
fn listed_members_match_the_workspace() {
    let doc = manifest(&workspace_root());
    let members: Vec<&str> = doc["workspace"]["members"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(toml::Value::as_str)
        .collect();
    assert_eq!(members, MEMBERS);
}

#[test]
fn internal_dependencies_pin_the_workspace_version() {
    let doc = manifest(&workspace_root());
    let deps = &doc["workspace"]["dependencies"];
    let version = workspace_version();
    for name in ["ews-core", "ews-ci"] {
        assert_eq!(
            deps[name]["version"].as_str(),
            Some(version.as_str()),
            "{name} dependency version drifted from the workspace"
        );
    }
}

#[test]
fn workspace_version_matches_cargo_pkg() {
    assert_eq!(workspace_version(), env!("CARGO_PKG_VERSION"));
    assert_eq!(ews_core::VERSION, env!("CARGO_PKG_VERSION"));
}
