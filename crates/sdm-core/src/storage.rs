//! On-disk artifact naming and atomic file operations.
//!
//! Naming scheme around a final destination path:
//! - merged temp / single-stream temp: `<final>.part`
//! - per-segment artifacts: `<final>.part.<index>`
//! - resume record: `<final>.resume`
//!
//! All metadata writes go through [`write_json_atomic`] (sibling temp, fsync,
//! rename); the downloaded file itself reaches its final name only through
//! [`commit`], an atomic rename.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Temp suffix used before the atomic rename.
pub const TEMP_SUFFIX: &str = ".part";

/// Resume record suffix.
pub const RESUME_SUFFIX: &str = ".resume";

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

/// `file.iso` -> `file.iso.part`
pub fn temp_path(final_path: &Path) -> PathBuf {
    with_suffix(final_path, TEMP_SUFFIX)
}

/// `file.iso` -> `file.iso.part.3`
pub fn segment_path(final_path: &Path, index: usize) -> PathBuf {
    with_suffix(final_path, &format!("{}.{}", TEMP_SUFFIX, index))
}

/// `file.iso` -> `file.iso.resume`
pub fn resume_path(final_path: &Path) -> PathBuf {
    with_suffix(final_path, RESUME_SUFFIX)
}

/// Atomically rename a fully written temp file to its final name.
/// Fails if the two paths are on different filesystems.
pub fn commit(temp: &Path, final_path: &Path) -> Result<()> {
    fs::rename(temp, final_path).with_context(|| {
        format!(
            "failed to rename {} to {}",
            temp.display(),
            final_path.display()
        )
    })
}

/// Serialize `value` as JSON to `path` atomically: write a sibling temp file,
/// fsync it, then rename over the target. A crash at any point leaves either
/// the old content or the new, never a torn file.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
    }
    let tmp = with_suffix(path, ".tmp");
    {
        let mut f =
            File::create(&tmp).with_context(|| format!("create temp file {}", tmp.display()))?;
        let data = serde_json::to_vec_pretty(value).context("serialize state")?;
        f.write_all(&data)
            .with_context(|| format!("write {}", tmp.display()))?;
        f.sync_all()
            .with_context(|| format!("fsync {}", tmp.display()))?;
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("rename {} to {}", tmp.display(), path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn naming_appends_suffixes() {
        let p = Path::new("/tmp/archive.zip");
        assert_eq!(temp_path(p).to_string_lossy(), "/tmp/archive.zip.part");
        assert_eq!(
            segment_path(p, 2).to_string_lossy(),
            "/tmp/archive.zip.part.2"
        );
        assert_eq!(resume_path(p).to_string_lossy(), "/tmp/archive.zip.resume");
    }

    #[test]
    fn commit_renames_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("out.bin");
        let tp = temp_path(&final_path);
        fs::write(&tp, b"payload").unwrap();
        commit(&tp, &final_path).unwrap();
        assert!(!tp.exists());
        assert_eq!(fs::read(&final_path).unwrap(), b"payload");
    }

    #[test]
    fn write_json_atomic_replaces_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/state.json");
        write_json_atomic(&path, &serde_json::json!({"v": 1})).unwrap();
        write_json_atomic(&path, &serde_json::json!({"v": 2})).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"v\": 2"));
        assert!(!path.with_extension("json.tmp").exists());
        assert_eq!(fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }
}
