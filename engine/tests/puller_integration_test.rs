//! Integration tests for the puller
//!
//! A wiremock server plays the release host. The digest manifests and
//! signatures under `fixtures/` are signed with the development key that
//! non-production builds embed.

use pluck_engine::cache::{file_name, parse_file_name, ENTRY_MODE};
use pluck_engine::puller::{MAX_SIGNATURE_SIZE, MAX_SUMS_SIZE};
use pluck_engine::Puller;
use pluck_sdk::{Digest, Platform, PluginRequest, PullError, PullErrorExt, PullErrorKind};
use pluck_sources::Source;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{any, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PLUGIN: &str = "plug-A";
const VERSION: &str = "0.20.3";
const ARCHIVE: &[u8] = include_bytes!("fixtures/plug-A_0.20.3.zip");
const ARCHIVE_NAME: &str = "plug-A_0.20.3.zip";
const SUMS: &[u8] = include_bytes!("fixtures/SHA256SUMS");
const SUMS_SIG: &[u8] = include_bytes!("fixtures/SHA256SUMS.sig");
const SUMS_SIG_ASC: &[u8] = include_bytes!("fixtures/SHA256SUMS.sig.asc");
const SUMS_UNTRUSTED_SIG: &[u8] = include_bytes!("fixtures/SHA256SUMS.untrusted.sig");
const TAMPERED_SUMS: &[u8] = include_bytes!("fixtures/SHA256SUMS.tampered");
const TAMPERED_SIG: &[u8] = include_bytes!("fixtures/SHA256SUMS.tampered.sig");

/// sha256 of the `plug-A` entry inside the fixture archive
const BINARY_HEX: &str = "b4f9e38811891895c785a291555aaad2590937aed853e78ccebcb314daeebc18";
const BINARY: &[u8] = b"#!/bin/sh\necho \"plug-A 0.20.3\"\n";

fn binary_digest() -> Digest {
    BINARY_HEX.parse().unwrap()
}

fn version_doc(version: &str, signatures: usize) -> serde_json::Value {
    let platform = Platform::current();
    let signature_urls: Vec<String> = (1..=signatures)
        .map(|i| format!("SHA256SUMS.sig.{}", i))
        .collect();
    json!({
        "name": PLUGIN,
        "version": version,
        "builds": [{"os": platform.os, "arch": platform.arch, "url": ARCHIVE_NAME}],
        "url_shasums": "SHA256SUMS",
        "url_shasums_signatures": signature_urls,
        "timestamp_created": "2024-05-02T10:11:12Z",
    })
}

/// Serve version `VERSION` with the given manifest and signatures
async fn mount_release(server: &MockServer, sums: &'static [u8], signatures: &[&'static [u8]]) {
    Mock::given(method("GET"))
        .and(path(format!("/v1/releases/{}/{}", PLUGIN, VERSION)))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(version_doc(VERSION, signatures.len())),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/{}", ARCHIVE_NAME)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(ARCHIVE))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/SHA256SUMS"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(sums))
        .mount(server)
        .await;
    for (i, signature) in signatures.iter().enumerate() {
        Mock::given(method("GET"))
            .and(path(format!("/SHA256SUMS.sig.{}", i + 1)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(*signature))
            .mount(server)
            .await;
    }
}

async fn mount_listing(server: &MockServer, versions: &[&str]) {
    let docs: Vec<_> = versions.iter().map(|v| version_doc(v, 1)).collect();
    Mock::given(method("GET"))
        .and(path(format!("/v1/releases/{}", PLUGIN)))
        .respond_with(ResponseTemplate::new(200).set_body_json(docs))
        .mount(server)
        .await;
}

/// A server that fails the test if it receives any request
async fn silent_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;
    server
}

/// Cache and temp directories for one test
struct Dirs {
    cache: TempDir,
    temp: TempDir,
}

impl Dirs {
    fn new() -> Self {
        Self {
            cache: tempfile::tempdir().unwrap(),
            temp: tempfile::tempdir().unwrap(),
        }
    }

    fn puller(&self, primary: &MockServer) -> Puller {
        Puller::new(Source::http(&primary.uri()).unwrap())
            .unwrap()
            .with_temp_dir(Some(self.temp.path().to_path_buf()))
    }

    fn request(&self) -> PluginRequest {
        PluginRequest::new(self.cache.path(), PLUGIN)
    }

    fn entry_path(&self) -> std::path::PathBuf {
        self.cache
            .path()
            .join(file_name(PLUGIN, VERSION, &binary_digest()))
    }

    fn cache_entries(&self) -> Vec<String> {
        list(self.cache.path())
    }

    fn temp_entries(&self) -> Vec<String> {
        list(self.temp.path())
    }
}

fn list(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_fresh_latest_download() {
    let server = MockServer::start().await;
    mount_listing(&server, &["v0.17.0", "v0.20.3", "v0.19.1"]).await;
    mount_release(&server, SUMS, &[SUMS_SIG]).await;
    let dirs = Dirs::new();

    let (version, digest) = dirs
        .puller(&server)
        .ensure_downloaded(&CancellationToken::new(), &[], dirs.request())
        .await
        .unwrap();

    assert_eq!(version, "v0.20.3");
    assert_eq!(digest.to_hex(), BINARY_HEX);

    let expected_name = format!("plug-A-v0.20.3-{}", BINARY_HEX);
    assert_eq!(dirs.cache_entries(), vec![expected_name.clone()]);
    assert_eq!(
        parse_file_name(PLUGIN, &expected_name),
        Some((version, digest))
    );
    assert_eq!(std::fs::read(dirs.entry_path()).unwrap(), BINARY);
    assert!(dirs.temp_entries().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_cache_entry_is_executable_by_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let server = MockServer::start().await;
    mount_release(&server, SUMS, &[SUMS_SIG]).await;
    let dirs = Dirs::new();

    dirs.puller(&server)
        .ensure_downloaded(
            &CancellationToken::new(),
            &[],
            dirs.request().with_version(VERSION),
        )
        .await
        .unwrap();

    let mode = std::fs::metadata(dirs.entry_path())
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, ENTRY_MODE);
}

#[tokio::test]
async fn test_explicit_version_skips_listing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/v1/releases/{}", PLUGIN)))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;
    mount_release(&server, SUMS, &[SUMS_SIG]).await;
    let dirs = Dirs::new();

    let (version, _) = dirs
        .puller(&server)
        .ensure_downloaded(
            &CancellationToken::new(),
            &[],
            dirs.request().with_version("v0.20.3"),
        )
        .await
        .unwrap();
    assert_eq!(version, "v0.20.3");
}

#[tokio::test]
async fn test_repeat_with_digest_is_served_from_cache() {
    let server = MockServer::start().await;
    mount_release(&server, SUMS, &[SUMS_SIG]).await;
    let dirs = Dirs::new();
    let cancel = CancellationToken::new();

    dirs.puller(&server)
        .ensure_downloaded(&cancel, &[], dirs.request().with_version(VERSION))
        .await
        .unwrap();

    // The second call must not touch the network at all
    let offline = silent_server().await;
    let (version, digest) = dirs
        .puller(&offline)
        .ensure_downloaded(
            &cancel,
            &[],
            dirs.request()
                .with_version(VERSION)
                .with_expected_digest(binary_digest()),
        )
        .await
        .unwrap();

    assert_eq!(version, "v0.20.3");
    assert_eq!(digest, binary_digest());
}

#[tokio::test]
async fn test_tampered_entry_is_healed() {
    let server = MockServer::start().await;
    mount_release(&server, SUMS, &[SUMS_SIG]).await;
    let dirs = Dirs::new();
    let cancel = CancellationToken::new();
    let puller = dirs.puller(&server);

    puller
        .ensure_downloaded(&cancel, &[], dirs.request().with_version(VERSION))
        .await
        .unwrap();
    std::fs::write(dirs.entry_path(), b"#!/bin/sh\nrm -rf ~\n").unwrap();

    let (_, digest) = puller
        .ensure_downloaded(
            &cancel,
            &[],
            dirs.request()
                .with_version(VERSION)
                .with_expected_digest(binary_digest()),
        )
        .await
        .unwrap();

    assert_eq!(digest, binary_digest());
    assert_eq!(std::fs::read(dirs.entry_path()).unwrap(), BINARY);
    assert_eq!(dirs.cache_entries().len(), 1);
}

#[tokio::test]
async fn test_tampered_entry_without_digest_is_replaced() {
    let server = MockServer::start().await;
    mount_release(&server, SUMS, &[SUMS_SIG]).await;
    let dirs = Dirs::new();

    // A corrupt file squatting on the final name
    std::fs::write(dirs.entry_path(), b"garbage").unwrap();

    dirs.puller(&server)
        .ensure_downloaded(
            &CancellationToken::new(),
            &[],
            dirs.request().with_version(VERSION),
        )
        .await
        .unwrap();

    assert_eq!(std::fs::read(dirs.entry_path()).unwrap(), BINARY);
}

#[tokio::test]
async fn test_untrusted_signature_is_rejected() {
    let server = MockServer::start().await;
    mount_release(&server, SUMS, &[SUMS_UNTRUSTED_SIG]).await;
    let dirs = Dirs::new();

    let err = dirs
        .puller(&server)
        .ensure_downloaded(
            &CancellationToken::new(),
            &[],
            dirs.request().with_version(VERSION),
        )
        .await
        .unwrap_err();

    match &err {
        PullError::SignatureInvalid(reasons) => {
            assert_eq!(reasons.len(), 1);
            assert!(reasons[0].starts_with("signature 1 (SHA256SUMS.sig.1)"));
        }
        other => panic!("expected SignatureInvalid, got {:?}", other),
    }
    assert!(!err.is_recoverable());
    assert!(dirs.cache_entries().is_empty());
    assert!(dirs.temp_entries().is_empty());
}

#[tokio::test]
async fn test_any_verifying_signature_is_enough() {
    let server = MockServer::start().await;
    mount_release(&server, SUMS, &[SUMS_UNTRUSTED_SIG, b"not a signature", SUMS_SIG_ASC]).await;
    let dirs = Dirs::new();

    let (_, digest) = dirs
        .puller(&server)
        .ensure_downloaded(
            &CancellationToken::new(),
            &[],
            dirs.request().with_version(VERSION),
        )
        .await
        .unwrap();
    assert_eq!(digest, binary_digest());
}

#[tokio::test]
async fn test_signature_fetch_errors_are_collected() {
    let server = MockServer::start().await;
    // Two signature URLs are listed but neither is served
    Mock::given(method("GET"))
        .and(path(format!("/v1/releases/{}/{}", PLUGIN, VERSION)))
        .respond_with(ResponseTemplate::new(200).set_body_json(version_doc(VERSION, 2)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/SHA256SUMS"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(SUMS))
        .mount(&server)
        .await;
    let dirs = Dirs::new();

    let err = dirs
        .puller(&server)
        .ensure_downloaded(
            &CancellationToken::new(),
            &[],
            dirs.request().with_version(VERSION),
        )
        .await
        .unwrap_err();

    match err {
        PullError::SignatureInvalid(reasons) => {
            assert_eq!(reasons.len(), 2);
            assert!(reasons[1].starts_with("signature 2 (SHA256SUMS.sig.2)"));
        }
        other => panic!("expected SignatureInvalid, got {:?}", other),
    }
}

#[tokio::test]
async fn test_archive_digest_mismatch() {
    let server = MockServer::start().await;
    mount_release(&server, TAMPERED_SUMS, &[TAMPERED_SIG]).await;
    let dirs = Dirs::new();

    let err = dirs
        .puller(&server)
        .ensure_downloaded(
            &CancellationToken::new(),
            &[],
            dirs.request().with_version(VERSION),
        )
        .await
        .unwrap_err();

    match &err {
        PullError::DigestMismatch { subject, .. } => assert_eq!(subject, ARCHIVE_NAME),
        other => panic!("expected DigestMismatch, got {:?}", other),
    }
    assert!(dirs.cache_entries().is_empty());
    assert!(dirs.temp_entries().is_empty());
}

#[tokio::test]
async fn test_wrong_caller_digest() {
    let server = MockServer::start().await;
    mount_release(&server, SUMS, &[SUMS_SIG]).await;
    let dirs = Dirs::new();
    let wrong = Digest::from_bytes([0x11; 32]);

    let err = dirs
        .puller(&server)
        .ensure_downloaded(
            &CancellationToken::new(),
            &[],
            dirs.request()
                .with_version(VERSION)
                .with_expected_digest(wrong),
        )
        .await
        .unwrap_err();

    match &err {
        PullError::DigestMismatch {
            expected, actual, ..
        } => {
            assert_eq!(*expected, wrong.to_hex());
            assert_eq!(actual, BINARY_HEX);
        }
        other => panic!("expected DigestMismatch, got {:?}", other),
    }
    assert!(dirs.cache_entries().is_empty());
    assert!(dirs.temp_entries().is_empty());
}

#[tokio::test]
async fn test_archive_missing_from_manifest_is_fatal() {
    const UNLISTED: &str = "plug-A_0.20.3_unlisted.zip";
    let server = MockServer::start().await;
    let platform = Platform::current();
    Mock::given(method("GET"))
        .and(path(format!("/v1/releases/{}/{}", PLUGIN, VERSION)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "version": VERSION,
            "builds": [{"os": platform.os, "arch": platform.arch, "url": UNLISTED}],
            "url_shasums": "SHA256SUMS",
            "url_shasums_signatures": ["SHA256SUMS.sig.1"],
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/{}", UNLISTED)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(ARCHIVE))
        .mount(&server)
        .await;
    mount_release(&server, SUMS, &[SUMS_SIG]).await;
    let dirs = Dirs::new();

    let err = dirs
        .puller(&server)
        .ensure_downloaded(
            &CancellationToken::new(),
            &[],
            dirs.request().with_version(VERSION),
        )
        .await
        .unwrap_err();

    match &err {
        PullError::Fatal(msg) => assert!(msg.contains(UNLISTED), "{}", msg),
        other => panic!("expected Fatal, got {:?}", other),
    }
    assert!(dirs.cache_entries().is_empty());
    assert!(dirs.temp_entries().is_empty());
}

#[tokio::test]
async fn test_oversized_manifest_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/SHA256SUMS"))
        .respond_with(
            ResponseTemplate::new(200).set_body_bytes(vec![b'0'; MAX_SUMS_SIZE as usize + 1]),
        )
        .mount(&server)
        .await;
    mount_release(&server, SUMS, &[SUMS_SIG]).await;
    let dirs = Dirs::new();

    let err = dirs
        .puller(&server)
        .ensure_downloaded(
            &CancellationToken::new(),
            &[],
            dirs.request().with_version(VERSION),
        )
        .await
        .unwrap_err();

    match &err {
        PullError::Fatal(msg) => assert!(msg.contains("byte limit"), "{}", msg),
        other => panic!("expected Fatal, got {:?}", other),
    }
    assert!(dirs.cache_entries().is_empty());
    assert!(dirs.temp_entries().is_empty());
}

#[tokio::test]
async fn test_oversized_signature_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/SHA256SUMS.sig.1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(vec![0u8; MAX_SIGNATURE_SIZE as usize + 1]),
        )
        .mount(&server)
        .await;
    mount_release(&server, SUMS, &[SUMS_SIG]).await;
    let dirs = Dirs::new();

    let err = dirs
        .puller(&server)
        .ensure_downloaded(
            &CancellationToken::new(),
            &[],
            dirs.request().with_version(VERSION),
        )
        .await
        .unwrap_err();

    match &err {
        PullError::SignatureInvalid(reasons) => {
            assert_eq!(reasons.len(), 1);
            assert!(reasons[0].contains("byte limit"), "{}", reasons[0]);
        }
        other => panic!("expected SignatureInvalid, got {:?}", other),
    }
    assert!(dirs.cache_entries().is_empty());
}

#[tokio::test]
async fn test_oversized_signature_falls_through_to_next() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/SHA256SUMS.sig.1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(vec![0u8; MAX_SIGNATURE_SIZE as usize + 1]),
        )
        .mount(&server)
        .await;
    mount_release(&server, SUMS, &[SUMS_SIG, SUMS_SIG]).await;
    let dirs = Dirs::new();

    let (_, digest) = dirs
        .puller(&server)
        .ensure_downloaded(
            &CancellationToken::new(),
            &[],
            dirs.request().with_version(VERSION),
        )
        .await
        .unwrap();
    assert_eq!(digest, binary_digest());
}

#[tokio::test]
async fn test_falls_through_to_next_source() {
    // The primary knows nothing; everything lives on the second source
    let primary = MockServer::start().await;
    let mirror = MockServer::start().await;
    mount_listing(&mirror, &["0.20.3"]).await;
    mount_release(&mirror, SUMS, &[SUMS_SIG]).await;
    let dirs = Dirs::new();

    let extra = [Source::http(&mirror.uri()).unwrap()];
    let (version, digest) = dirs
        .puller(&primary)
        .ensure_downloaded(&CancellationToken::new(), &extra, dirs.request())
        .await
        .unwrap();

    assert_eq!(version, "v0.20.3");
    assert_eq!(digest, binary_digest());
}

#[tokio::test]
async fn test_higher_priority_source_wins() {
    let primary = MockServer::start().await;
    mount_release(&primary, SUMS, &[SUMS_SIG]).await;
    let dirs = Dirs::new();

    let extra = [Source::http(&silent_server().await.uri()).unwrap()];
    dirs.puller(&primary)
        .ensure_downloaded(
            &CancellationToken::new(),
            &extra,
            dirs.request().with_version(VERSION),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_filesystem_mirror_source() {
    let primary = MockServer::start().await;
    let mirror = tempfile::tempdir().unwrap();
    let release_dir = mirror.path().join("v1/releases/plug-A/0.20.3");
    std::fs::create_dir_all(&release_dir).unwrap();
    std::fs::write(
        release_dir.join("index.json"),
        serde_json::to_vec(&version_doc(VERSION, 1)).unwrap(),
    )
    .unwrap();
    std::fs::write(mirror.path().join(ARCHIVE_NAME), ARCHIVE).unwrap();
    std::fs::write(mirror.path().join("SHA256SUMS"), SUMS).unwrap();
    std::fs::write(mirror.path().join("SHA256SUMS.sig.1"), SUMS_SIG).unwrap();
    let dirs = Dirs::new();

    let extra = [Source::filesystem(mirror.path())];
    let (_, digest) = dirs
        .puller(&primary)
        .ensure_downloaded(
            &CancellationToken::new(),
            &extra,
            dirs.request().with_version(VERSION),
        )
        .await
        .unwrap();
    assert_eq!(digest, binary_digest());
}

#[tokio::test]
async fn test_unknown_plugin_is_not_found() {
    let primary = MockServer::start().await;
    let mirror = MockServer::start().await;
    let dirs = Dirs::new();

    let extra = [Source::http(&mirror.uri()).unwrap()];
    let err = dirs
        .puller(&primary)
        .ensure_downloaded(&CancellationToken::new(), &extra, dirs.request())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), PullErrorKind::NotFound);

    let err = dirs
        .puller(&primary)
        .ensure_downloaded(
            &CancellationToken::new(),
            &extra,
            dirs.request().with_version(VERSION),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), PullErrorKind::NotFound);
}

#[tokio::test]
async fn test_unparsable_listed_version_is_fatal() {
    let server = MockServer::start().await;
    mount_listing(&server, &["0.20.3", "latest-nightly"]).await;
    let dirs = Dirs::new();

    let err = dirs
        .puller(&server)
        .ensure_downloaded(&CancellationToken::new(), &[], dirs.request())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), PullErrorKind::Fatal);
}

#[tokio::test]
async fn test_platform_unavailable() {
    let server = MockServer::start().await;
    mount_release(&server, SUMS, &[SUMS_SIG]).await;
    let dirs = Dirs::new();

    let err = dirs
        .puller(&server)
        .with_platform(Platform::new("plan9", "mips"))
        .ensure_downloaded(
            &CancellationToken::new(),
            &[],
            dirs.request().with_version(VERSION),
        )
        .await
        .unwrap_err();

    match err {
        PullError::PlatformUnavailable { os, arch } => {
            assert_eq!(os, "plan9");
            assert_eq!(arch, "mips");
        }
        other => panic!("expected PlatformUnavailable, got {:?}", other),
    }
    assert!(dirs.cache_entries().is_empty());
}

#[tokio::test]
async fn test_invalid_request_is_fatal() {
    let server = silent_server().await;
    let dirs = Dirs::new();

    let err = dirs
        .puller(&server)
        .ensure_downloaded(
            &CancellationToken::new(),
            &[],
            PluginRequest::new("relative/dir", PLUGIN),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), PullErrorKind::Fatal);

    let err = dirs
        .puller(&server)
        .ensure_downloaded(
            &CancellationToken::new(),
            &[],
            PluginRequest::new(dirs.cache.path(), "../escape"),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), PullErrorKind::Fatal);

    // A pinned digest must not let a path-like version reach the cache lookup
    let err = dirs
        .puller(&server)
        .ensure_downloaded(
            &CancellationToken::new(),
            &[],
            dirs.request()
                .with_version("v../../x")
                .with_expected_digest(binary_digest()),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), PullErrorKind::Fatal);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_pulls_agree() {
    let server = MockServer::start().await;
    mount_release(&server, SUMS, &[SUMS_SIG]).await;
    let dirs = Dirs::new();
    let puller = dirs.puller(&server);
    let cancel = CancellationToken::new();

    let (a, b) = tokio::join!(
        puller.ensure_downloaded(&cancel, &[], dirs.request().with_version(VERSION)),
        puller.ensure_downloaded(&cancel, &[], dirs.request().with_version(VERSION)),
    );

    assert_eq!(a.unwrap().1, binary_digest());
    assert_eq!(b.unwrap().1, binary_digest());
    assert_eq!(dirs.cache_entries().len(), 1);
    assert_eq!(std::fs::read(dirs.entry_path()).unwrap(), BINARY);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_pulls_heal_corrupt_entry() {
    let server = MockServer::start().await;
    mount_release(&server, SUMS, &[SUMS_SIG]).await;
    let dirs = Dirs::new();
    std::fs::write(dirs.entry_path(), b"garbage").unwrap();
    let puller = dirs.puller(&server);
    let cancel = CancellationToken::new();
    let request = || {
        dirs.request()
            .with_version(VERSION)
            .with_expected_digest(binary_digest())
    };

    let (a, b) = tokio::join!(
        puller.ensure_downloaded(&cancel, &[], request()),
        puller.ensure_downloaded(&cancel, &[], request()),
    );

    assert_eq!(a.unwrap().1, binary_digest());
    assert_eq!(b.unwrap().1, binary_digest());
    assert_eq!(dirs.cache_entries().len(), 1);
    assert_eq!(std::fs::read(dirs.entry_path()).unwrap(), BINARY);
    assert!(dirs.temp_entries().is_empty());
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let server = silent_server().await;
    let dirs = Dirs::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = dirs
        .puller(&server)
        .ensure_downloaded(&cancel, &[], dirs.request().with_version(VERSION))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), PullErrorKind::Cancelled);
}

#[tokio::test]
async fn test_cancel_during_download() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/{}", ARCHIVE_NAME)))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(ARCHIVE)
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;
    mount_release(&server, SUMS, &[SUMS_SIG]).await;
    let dirs = Dirs::new();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(4),
        dirs.puller(&server)
            .ensure_downloaded(&cancel, &[], dirs.request().with_version(VERSION)),
    )
    .await
    .expect("cancellation must interrupt the download");

    assert!(matches!(result, Err(PullError::Cancelled)));
    assert!(dirs.cache_entries().is_empty());
    assert!(dirs.temp_entries().is_empty());
}
