//! End-to-end coordinator tests against a local range-capable server.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use sha2::{Digest, Sha256};

use sdm_core::control::CancelToken;
use sdm_core::downloader::{
    Coordinator, CoordinatorConfig, DownloadMode, DownloadRequest, ProgressUpdate,
};
use sdm_core::limiter::LimiterChain;
use sdm_core::retry::ErrorKind;
use sdm_core::storage;

use common::range_server::{self, RangeServerOptions};

fn test_body(len: usize) -> Vec<u8> {
    (0u8..=255).cycle().take(len).collect()
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn coordinator(cfg: CoordinatorConfig) -> Coordinator {
    Coordinator::new(cfg, LimiterChain::unlimited())
}

fn request(url: String, destination: std::path::PathBuf) -> DownloadRequest {
    DownloadRequest {
        url,
        destination,
        expected_sha256: None,
    }
}

#[test]
fn large_resource_uses_four_connections_and_matches_digest() {
    let body = test_body(12 * 1024 * 1024);
    let server = range_server::start_with_options(
        body.clone(),
        RangeServerOptions {
            chunk_delay: Some(Duration::from_millis(60)),
            body_chunk: 256 * 1024,
            ..RangeServerOptions::default()
        },
    );
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("test.dat");

    let updates: Arc<Mutex<Vec<ProgressUpdate>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&updates);
    let progress = move |u: &ProgressUpdate| sink.lock().unwrap().push(u.clone());

    // Tight cadence against a throttled server so the callback contract
    // (many monotone updates) is observable.
    let c = coordinator(CoordinatorConfig {
        progress_interval: Duration::from_millis(10),
        ..CoordinatorConfig::default()
    });
    let info = c.download(
        &request(server.url("range/test.dat"), dest.clone()),
        &CancelToken::new(),
        Some(&progress),
        None,
    );

    assert!(info.is_success(), "download failed: {}", info.error_text());
    assert_eq!(info.mode, DownloadMode::Multi);
    assert_eq!(info.connections_used, 4);
    assert_eq!(info.total_size, body.len() as u64);
    assert_eq!(info.sha256.as_deref(), Some(sha256_hex(&body).as_str()));
    assert_eq!(sha256_hex(&std::fs::read(&dest).unwrap()), sha256_hex(&body));

    let updates = updates.lock().unwrap();
    assert!(
        updates.len() >= 10,
        "expected at least 10 progress updates, got {}",
        updates.len()
    );
    for pair in updates.windows(2) {
        assert!(
            pair[1].progress >= pair[0].progress,
            "progress regressed: {} -> {}",
            pair[0].progress,
            pair[1].progress
        );
    }
    assert_eq!(updates.last().unwrap().progress, 1.0);
    assert_eq!(updates.last().unwrap().status, "completed");

    // Temp artifacts and the resume record are gone after commit.
    assert!(!storage::temp_path(&dest).exists());
    assert!(!storage::resume_path(&dest).exists());
    for i in 0..4 {
        assert!(!storage::segment_path(&dest, i).exists());
    }
}

#[test]
fn range_refusing_server_falls_back_to_single_stream() {
    let body = test_body(12 * 1024 * 1024);
    let server = range_server::start_with_options(
        body.clone(),
        RangeServerOptions {
            support_ranges: false,
            advertise_ranges: false,
            ..RangeServerOptions::default()
        },
    );
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("test.dat");

    let c = coordinator(CoordinatorConfig::default());
    let info = c.download(
        &request(server.url("norange/test.dat"), dest.clone()),
        &CancelToken::new(),
        None,
        None,
    );

    assert!(info.is_success(), "download failed: {}", info.error_text());
    assert_eq!(info.mode, DownloadMode::Single);
    assert_eq!(info.connections_used, 1);
    assert_eq!(std::fs::read(&dest).unwrap(), body);
}

#[test]
fn small_resource_uses_single_mode_despite_range_support() {
    let body = test_body(100 * 1024);
    let server = range_server::start(body.clone());
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("small.bin");

    let c = coordinator(CoordinatorConfig::default());
    let info = c.download(
        &request(server.url("range/small.bin"), dest.clone()),
        &CancelToken::new(),
        None,
        None,
    );

    assert!(info.is_success(), "download failed: {}", info.error_text());
    assert_eq!(info.mode, DownloadMode::Single);
    assert_eq!(info.connections_used, 1);
    assert_eq!(std::fs::read(&dest).unwrap(), body);
    assert!(!storage::temp_path(&dest).exists());
    // No segment artifacts for single mode.
    assert!(!storage::segment_path(&dest, 0).exists());
}

#[test]
fn advertised_but_unhonored_ranges_fall_back_to_single() {
    let body = test_body(12 * 1024 * 1024);
    let server = range_server::start_with_options(
        body.clone(),
        RangeServerOptions {
            support_ranges: false,
            advertise_ranges: true, // lies about support
            ..RangeServerOptions::default()
        },
    );
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("liar.bin");

    let c = coordinator(CoordinatorConfig::default());
    let info = c.download(
        &request(server.url("f"), dest.clone()),
        &CancelToken::new(),
        None,
        None,
    );
    assert!(info.is_success(), "download failed: {}", info.error_text());
    assert_eq!(info.mode, DownloadMode::Single);
    assert_eq!(std::fs::read(&dest).unwrap().len(), body.len());
}

#[test]
fn zero_byte_resource_commits_an_empty_file() {
    let server = range_server::start(Vec::new());
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("empty.bin");

    let c = coordinator(CoordinatorConfig::default());
    let info = c.download(
        &request(server.url("empty.bin"), dest.clone()),
        &CancelToken::new(),
        None,
        None,
    );
    assert!(info.is_success(), "download failed: {}", info.error_text());
    assert_eq!(info.mode, DownloadMode::Single);
    assert_eq!(info.total_size, 0);
    assert_eq!(std::fs::metadata(&dest).unwrap().len(), 0);
    assert_eq!(
        info.sha256.as_deref(),
        Some("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")
    );
}

#[test]
fn checksum_mismatch_is_terminal_and_leaves_no_file() {
    let body = test_body(64 * 1024);
    let server = range_server::start(body);
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("bad.bin");

    let c = coordinator(CoordinatorConfig::default());
    let info = c.download(
        &DownloadRequest {
            url: server.url("bad.bin"),
            destination: dest.clone(),
            expected_sha256: Some("0".repeat(64)),
        },
        &CancelToken::new(),
        None,
        None,
    );
    let err = info.error.expect("must fail");
    assert_eq!(err.kind(), ErrorKind::ChecksumMismatch);
    assert!(!err.is_retryable());
    assert!(!dest.exists());
    assert!(!storage::temp_path(&dest).exists());
}

#[test]
fn unreachable_server_fails_with_a_network_kind_and_no_file() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("y.bin");

    let c = coordinator(CoordinatorConfig::default());
    let info = c.download(
        &request("http://127.0.0.1:9/never".to_string(), dest.clone()),
        &CancelToken::new(),
        None,
        None,
    );
    let err = info.error.expect("must fail");
    assert!(
        matches!(err.kind(), ErrorKind::Network | ErrorKind::Timeout),
        "got {err}"
    );
    assert!(err.is_retryable());
    assert!(!dest.exists());
}

#[test]
fn cancelled_multi_download_keeps_partials_and_resumes_to_same_digest() {
    let body = test_body(12 * 1024 * 1024);
    let expected = sha256_hex(&body);
    let server = range_server::start_with_options(
        body.clone(),
        RangeServerOptions {
            chunk_delay: Some(Duration::from_millis(25)),
            body_chunk: 128 * 1024,
            ..RangeServerOptions::default()
        },
    );
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("resumable.bin");

    let c = coordinator(CoordinatorConfig::default());
    let cancel = CancelToken::new();
    let canceller = {
        let cancel = cancel.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(300));
            cancel.cancel();
        })
    };
    let info = c.download(
        &request(server.url("resumable.bin"), dest.clone()),
        &cancel,
        None,
        None,
    );
    canceller.join().unwrap();

    let err = info.error.expect("cancelled download must not succeed");
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    // The final file must not exist; multi-mode keeps partials and the
    // resume record for a later resume.
    assert!(!dest.exists());
    assert!(storage::resume_path(&dest).exists());
    let partial_bytes: u64 = (0..4)
        .filter_map(|i| std::fs::metadata(storage::segment_path(&dest, i)).ok())
        .map(|m| m.len())
        .sum();
    assert!(partial_bytes > 0, "expected some partial data on disk");

    // Second run resumes from the record and completes with the same digest
    // as a one-shot download.
    let info = c.download(
        &request(server.url("resumable.bin"), dest.clone()),
        &CancelToken::new(),
        None,
        None,
    );
    assert!(info.is_success(), "resume failed: {}", info.error_text());
    assert_eq!(info.sha256.as_deref(), Some(expected.as_str()));
    assert_eq!(sha256_hex(&std::fs::read(&dest).unwrap()), expected);
    assert!(!storage::resume_path(&dest).exists());
}

#[test]
fn cancelled_single_download_removes_temp_file() {
    let body = test_body(2 * 1024 * 1024);
    let server = range_server::start_with_options(
        body,
        RangeServerOptions {
            support_ranges: false,
            advertise_ranges: false,
            chunk_delay: Some(Duration::from_millis(20)),
            body_chunk: 64 * 1024,
            ..RangeServerOptions::default()
        },
    );
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("single.bin");

    let c = coordinator(CoordinatorConfig::default());
    let cancel = CancelToken::new();
    let canceller = {
        let cancel = cancel.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(150));
            cancel.cancel();
        })
    };
    let info = c.download(&request(server.url("single.bin"), dest.clone()), &cancel, None, None);
    canceller.join().unwrap();

    assert_eq!(info.error.expect("must fail").kind(), ErrorKind::Cancelled);
    assert!(!dest.exists());
    assert!(!storage::temp_path(&dest).exists());
}

#[test]
fn stale_resume_record_is_discarded_when_the_resource_changes() {
    let body = test_body(12 * 1024 * 1024);
    let server = range_server::start_with_options(
        body.clone(),
        RangeServerOptions {
            etag: Some("\"generation-2\"".to_string()),
            ..RangeServerOptions::default()
        },
    );
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("changed.bin");

    // Forge a record from a previous generation of the resource.
    let old_probe = sdm_core::probe::ProbeResult {
        total_size: Some(body.len() as u64),
        range_support: sdm_core::probe::RangeSupport::Observed,
        etag: Some("\"generation-1\"".to_string()),
        last_modified: None,
    };
    let segments = sdm_core::segmenter::plan_segments(body.len() as u64, 4);
    let record = sdm_core::resume::ResumeRecord::new(
        &server.url("changed.bin"),
        body.len() as u64,
        &old_probe,
        &segments,
    );
    sdm_core::resume::save(&dest, &record).unwrap();
    // Stale partial that must not survive into the new plan.
    std::fs::write(storage::segment_path(&dest, 0), b"stale").unwrap();

    let c = coordinator(CoordinatorConfig::default());
    let info = c.download(
        &request(server.url("changed.bin"), dest.clone()),
        &CancelToken::new(),
        None,
        None,
    );
    assert!(info.is_success(), "download failed: {}", info.error_text());
    assert_eq!(sha256_hex(&std::fs::read(&dest).unwrap()), sha256_hex(&body));
}
