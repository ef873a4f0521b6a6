//! Merge, hash, and atomic commit for multi-mode downloads.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use crate::checksum::{self, StreamingSha256};
use crate::retry::{classify_io_error, DownloadError, ErrorKind};
use crate::segmenter::Segment;
use crate::storage;

const COPY_BUF: usize = 64 * 1024;

fn io_err(context: &str, e: std::io::Error) -> DownloadError {
    DownloadError::new(classify_io_error(&e), format!("{context}: {e}"))
}

/// Verify every part file's length matches its plan entry. A short part here
/// means a partial transfer slipped through; surfaced retryable so the
/// scheduler can redrive the plan.
pub(super) fn verify_segment_lengths(
    final_path: &Path,
    segments: &[Segment],
) -> Result<(), DownloadError> {
    for segment in segments {
        let part = storage::segment_path(final_path, segment.index);
        let actual = fs::metadata(&part)
            .map(|m| m.len())
            .map_err(|e| io_err(&format!("stat {}", part.display()), e))?;
        if actual != segment.len() {
            return Err(DownloadError::new(
                ErrorKind::Network,
                format!(
                    "segment {} length mismatch: {} of {} bytes",
                    segment.index,
                    actual,
                    segment.len()
                ),
            ));
        }
    }
    Ok(())
}

/// Concatenate part files in index order into `<final>.part`, hashing while
/// writing, then rename into place. Returns the SHA-256 hex digest.
/// Any failure before the rename leaves the final path absent.
pub(super) fn merge_and_commit(
    final_path: &Path,
    segments: &[Segment],
    total_size: u64,
    expected_sha256: Option<&str>,
) -> Result<String, DownloadError> {
    let temp = storage::temp_path(final_path);
    tracing::info!("HASH | START");
    tracing::info!("ATOMIC | START | temp={}", temp.display());

    let mut hasher = StreamingSha256::new();
    let mut merged: u64 = 0;
    {
        let mut out = File::create(&temp)
            .map_err(|e| io_err(&format!("create {}", temp.display()), e))?;
        let mut buf = vec![0u8; COPY_BUF];
        for segment in segments {
            let part = storage::segment_path(final_path, segment.index);
            let mut f = File::open(&part)
                .map_err(|e| io_err(&format!("open {}", part.display()), e))?;
            loop {
                let n = f
                    .read(&mut buf)
                    .map_err(|e| io_err(&format!("read {}", part.display()), e))?;
                if n == 0 {
                    break;
                }
                out.write_all(&buf[..n])
                    .map_err(|e| io_err(&format!("write {}", temp.display()), e))?;
                hasher.update(&buf[..n]);
                merged += n as u64;
            }
        }
        out.sync_all()
            .map_err(|e| io_err(&format!("fsync {}", temp.display()), e))?;
    }

    if merged != total_size {
        let _ = fs::remove_file(&temp);
        return Err(DownloadError::new(
            ErrorKind::Network,
            format!("merged size mismatch: {merged} of {total_size} bytes"),
        ));
    }

    let digest = hasher.finish();
    if let Err(e) = checksum::verify_digest(&digest, expected_sha256) {
        let _ = fs::remove_file(&temp);
        return Err(e);
    }
    tracing::info!("HASH | FINAL_OK | sha256={digest}");

    storage::commit(&temp, final_path).map_err(|e| {
        DownloadError::new(ErrorKind::IoWrite, format!("atomic commit failed: {e:#}"))
    })?;
    tracing::info!("ATOMIC | COMMIT_OK | final={}", final_path.display());

    for segment in segments {
        let part = storage::segment_path(final_path, segment.index);
        if let Err(e) = fs::remove_file(&part) {
            tracing::warn!("failed to remove {}: {}", part.display(), e);
        }
    }
    Ok(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segmenter::plan_segments;

    fn write_parts(final_path: &Path, body: &[u8], segments: &[Segment]) {
        for s in segments {
            let part = storage::segment_path(final_path, s.index);
            fs::write(&part, &body[s.start as usize..=s.end as usize]).unwrap();
        }
    }

    fn digest_of(data: &[u8]) -> String {
        let mut h = StreamingSha256::new();
        h.update(data);
        h.finish()
    }

    #[test]
    fn merge_produces_original_bytes_and_digest() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("out.bin");
        let body: Vec<u8> = (0u8..=255).cycle().take(10_000).collect();
        let segments = plan_segments(body.len() as u64, 4);
        write_parts(&final_path, &body, &segments);

        verify_segment_lengths(&final_path, &segments).unwrap();
        let digest = merge_and_commit(&final_path, &segments, body.len() as u64, None).unwrap();

        assert_eq!(fs::read(&final_path).unwrap(), body);
        assert_eq!(digest, digest_of(&body));
        // Part files and temp are gone.
        assert!(!storage::temp_path(&final_path).exists());
        for s in &segments {
            assert!(!storage::segment_path(&final_path, s.index).exists());
        }
    }

    #[test]
    fn short_part_is_caught_before_merge() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("out.bin");
        let body = vec![7u8; 1000];
        let segments = plan_segments(1000, 2);
        write_parts(&final_path, &body, &segments);
        fs::write(storage::segment_path(&final_path, 1), b"short").unwrap();

        let err = verify_segment_lengths(&final_path, &segments).unwrap_err();
        assert!(err.is_retryable());
        assert!(!final_path.exists());
    }

    #[test]
    fn checksum_mismatch_is_terminal_and_leaves_no_final_file() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("out.bin");
        let body = vec![1u8; 512];
        let segments = plan_segments(512, 2);
        write_parts(&final_path, &body, &segments);

        let err = merge_and_commit(&final_path, &segments, 512, Some("deadbeef")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChecksumMismatch);
        assert!(!err.is_retryable());
        assert!(!final_path.exists());
        assert!(!storage::temp_path(&final_path).exists());
    }
}
