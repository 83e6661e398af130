#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Manifest policy tests.
//!
//! These tests parse `Cargo.toml` and fail when the panic-free lint policy,
//! the feature layout or the MSRV drift from what the crate promises.
//!
//! All checks are synchronous filesystem reads; no async runtime needed.

use std::path::PathBuf;

/// Returns the project root directory (where Cargo.toml lives).
fn project_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

fn manifest() -> toml::Table {
    let path = project_root().join("Cargo.toml");
    let text = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to read '{}': {e}", path.display()));
    text.parse::<toml::Table>()
        .unwrap_or_else(|e| panic!("Cargo.toml does not parse: {e}"))
}

const PANIC_FREE_LINTS: &[&str] = &[
    "unwrap_used",
    "expect_used",
    "panic",
    "todo",
    "unimplemented",
    "indexing_slicing",
];

#[test]
fn cargo_toml_denies_all_panic_paths() {
    let manifest = manifest();
    let clippy = manifest
        .get("lints")
        .and_then(|lints| lints.get("clippy"))
        .and_then(toml::Value::as_table)
        .expect("Cargo.toml is missing a [lints.clippy] section");

    for lint in PANIC_FREE_LINTS {
        let level = clippy
            .get(*lint)
            .and_then(toml::Value::as_str)
            .unwrap_or_else(|| panic!("[lints.clippy] is missing `{lint}`"));
        assert_eq!(level, "deny", "`{lint}` must be denied, found `{level}`");
    }
}

#[test]
fn websocket_transport_is_default_and_pulls_runtime() {
    let manifest = manifest();
    let features = manifest["features"].as_table().unwrap();

    let default: Vec<&str> = features["default"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(toml::Value::as_str)
        .collect();
    assert_eq!(default, vec!["transport-websocket"]);

    let websocket: Vec<&str> = features["transport-websocket"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(toml::Value::as_str)
        .collect();
    assert!(websocket.contains(&"tokio-runtime"));
    assert!(websocket.contains(&"dep:tokio-tungstenite"));
}

#[test]
fn http_api_is_opt_in() {
    let manifest = manifest();
    let reqwest = &manifest["dependencies"]["reqwest"];
    assert_eq!(reqwest.get("optional").and_then(toml::Value::as_bool), Some(true));
    assert_eq!(
        reqwest.get("default-features").and_then(toml::Value::as_bool),
        Some(false),
        "reqwest must not pull native TLS by default"
    );
}

#[test]
fn msrv_is_declared() {
    let manifest = manifest();
    let version = manifest["package"]
        .get("rust-version")
        .and_then(toml::Value::as_str)
        .expect("Cargo.toml must declare a rust-version");
    let parts: Vec<u32> = version.split('.').map(|p| p.parse().unwrap()).collect();
    assert!(parts.len() >= 2, "rust-version `{version}` is not major.minor[.patch]");
    assert!(parts[0] == 1 && parts[1] >= 75, "unexpected rust-version `{version}`");
}

#[test]
fn demos_are_registered() {
    let manifest = manifest();
    let examples = manifest["example"].as_array().unwrap();
    for example in examples {
        let path = example["path"].as_str().unwrap();
        assert!(
            project_root().join(path).is_file(),
            "registered demo `{path}` does not exist"
        );
    }
}
