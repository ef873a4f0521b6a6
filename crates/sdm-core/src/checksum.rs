//! Commit-time integrity: incremental SHA-256 and expected-digest checks.
//!
//! Both download paths hash while writing (the merge step as it concatenates
//! part files, the single-stream path inside its write callback), so a commit
//! never needs a second read pass over the payload.

use sha2::{Digest, Sha256};

use crate::retry::{DownloadError, ErrorKind};

/// SHA-256 accumulated chunk by chunk as bytes go to disk.
#[derive(Default)]
pub struct StreamingSha256 {
    inner: Sha256,
}

impl StreamingSha256 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
    }

    /// Consume the hasher and return the digest as lowercase hex.
    pub fn finish(self) -> String {
        hex::encode(self.inner.finalize())
    }
}

/// Check a computed digest against an optional expected one (hex,
/// case-insensitive). A mismatch signals corruption or an unstable resource
/// and is terminal; it must never be silently retried.
pub fn verify_digest(computed: &str, expected: Option<&str>) -> Result<(), DownloadError> {
    match expected {
        Some(expected) if !computed.eq_ignore_ascii_case(expected) => Err(DownloadError::new(
            ErrorKind::ChecksumMismatch,
            format!("sha256 mismatch: computed {computed}, expected {expected}"),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunked_updates_match_a_one_shot_digest() {
        let payload = b"segmented download manager";
        let mut streaming = StreamingSha256::new();
        for chunk in payload.chunks(7) {
            streaming.update(chunk);
        }
        let whole = hex::encode(Sha256::digest(payload));
        assert_eq!(streaming.finish(), whole);
    }

    #[test]
    fn digest_is_lowercase_hex_of_the_right_width() {
        let mut h = StreamingSha256::new();
        h.update(b"abc");
        let digest = h.finish();
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn verify_digest_accepts_match_and_case_difference() {
        let mut h = StreamingSha256::new();
        h.update(b"payload");
        let digest = h.finish();
        verify_digest(&digest, None).unwrap();
        verify_digest(&digest, Some(&digest)).unwrap();
        verify_digest(&digest, Some(&digest.to_uppercase())).unwrap();
    }

    #[test]
    fn verify_digest_rejects_mismatch_terminally() {
        let err = verify_digest(&"a".repeat(64), Some(&"b".repeat(64))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChecksumMismatch);
        assert!(!err.is_retryable());
    }
}
