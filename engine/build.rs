//! Build script for embedding the trusted release key at compile time
//!
//! The armored OpenPGP public key that signs release digest manifests is
//! copied into `OUT_DIR/trusted_key.asc` and embedded with `include_str!`.
//! The key cannot be changed without recompiling.
//!
//! # Key Location
//!
//! The script looks for the public key in the following locations (in order):
//! 1. File named by the environment variable `PLUCK_TRUSTED_KEY_FILE`
//! 2. With the `production` feature: `keys/release_public_key.asc`
//! 3. Otherwise: the development key `keys/dev_public_key.asc`
//!
//! A production build without a release key fails.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const ARMOR_HEADER: &str = "-----BEGIN PGP PUBLIC KEY BLOCK-----";

fn main() {
    // 1. Get the current Git commit hash
    let commit_hash = std::process::Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=GIT_COMMIT_HASH={}", commit_hash);

    // 2. Get the current Build Timestamp (ISO 8601)
    let build_time = chrono::Utc::now().to_rfc3339();
    println!("cargo:rustc-env=BUILD_TIMESTAMP={}", build_time);

    // 3. Embed the trusted key
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));
    let manifest_dir =
        PathBuf::from(env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR is set by cargo"));
    // build.rs runs from the crate dir (engine/), key files are at workspace root
    let workspace_root = manifest_dir.parent().unwrap_or(&manifest_dir).to_path_buf();

    let (key_path, is_dev_key) = select_key(&workspace_root);
    let armored = fs::read_to_string(&key_path)
        .unwrap_or_else(|e| panic!("Failed to read trusted key {}: {}", key_path.display(), e));

    if !armored.trim_start().starts_with(ARMOR_HEADER) {
        panic!(
            "Trusted key {} is not an armored OpenPGP public key",
            key_path.display()
        );
    }

    fs::write(out_dir.join("trusted_key.asc"), armored).expect("Failed to write trusted key");

    println!("cargo:rerun-if-changed={}", key_path.display());
    println!("cargo:rerun-if-env-changed=PLUCK_TRUSTED_KEY_FILE");

    if is_dev_key {
        println!("cargo:warning=Using the development signing key");
        println!("cargo:warning=Release builds MUST embed the release key via:");
        println!("cargo:warning=  - PLUCK_TRUSTED_KEY_FILE environment variable");
        println!("cargo:warning=  - the `production` feature and keys/release_public_key.asc");
    }
}

/// Pick the key file; the flag is true for the development key
fn select_key(workspace_root: &Path) -> (PathBuf, bool) {
    if let Ok(path) = env::var("PLUCK_TRUSTED_KEY_FILE") {
        return (PathBuf::from(path), false);
    }

    if env::var_os("CARGO_FEATURE_PRODUCTION").is_some() {
        let release = workspace_root.join("keys/release_public_key.asc");
        if !release.exists() {
            panic!(
                "Production builds require {} or PLUCK_TRUSTED_KEY_FILE",
                release.display()
            );
        }
        return (release, false);
    }

    (workspace_root.join("keys/dev_public_key.asc"), true)
}
