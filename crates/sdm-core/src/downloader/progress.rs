//! Progress reporting contracts.
//!
//! Two channels leave the coordinator: the external callback receives a
//! validated [`ProgressUpdate`] (the stable shape UI code consumes), and the
//! queue-facing [`ProgressObserver`] receives raw byte counts for task
//! snapshots.

use crate::retry::{DownloadError, ErrorKind};

/// Shape delivered to external progress callbacks. Exactly these fields, in
/// this meaning: fraction in [0, 1], human-readable speed, short status word.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub filename: String,
    pub progress: f64,
    pub speed: String,
    pub status: String,
}

impl ProgressUpdate {
    /// Check the shape before delivery. A violation here is a coordinator bug
    /// and is treated as fatal by the caller.
    pub fn validate(&self) -> Result<(), DownloadError> {
        let mut problems = Vec::new();
        if self.filename.is_empty() {
            problems.push("empty filename");
        }
        if !self.progress.is_finite() || !(0.0..=1.0).contains(&self.progress) {
            problems.push("progress outside [0, 1]");
        }
        if self.speed.is_empty() {
            problems.push("empty speed");
        }
        if self.status.is_empty() {
            problems.push("empty status");
        }
        if !self.filename.is_ascii() || !self.speed.is_ascii() || !self.status.is_ascii() {
            problems.push("non-ascii field");
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(DownloadError::new(
                ErrorKind::ContractViolation,
                format!("progress callback shape invalid: {}", problems.join(", ")),
            ))
        }
    }
}

/// External progress callback.
pub type ProgressFn = dyn Fn(&ProgressUpdate) + Send + Sync;

/// Byte-level progress handed to the task owner (the queue).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaskProgress {
    pub bytes_downloaded: u64,
    /// 0 when the server never declared a size.
    pub bytes_total: u64,
    pub throughput_bps: f64,
}

/// Sink for task-level progress; implemented by the queue.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, progress: &TaskProgress);
}

/// Human-readable transfer speed, e.g. `1.5 MiB/s`.
pub fn format_speed(bytes_per_second: f64) -> String {
    const UNITS: [&str; 5] = ["B/s", "KiB/s", "MiB/s", "GiB/s", "TiB/s"];
    let mut value = bytes_per_second.max(0.0);
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_update() -> ProgressUpdate {
        ProgressUpdate {
            filename: "test.dat".to_string(),
            progress: 0.5,
            speed: "1.0 MiB/s".to_string(),
            status: "downloading".to_string(),
        }
    }

    #[test]
    fn valid_shape_passes() {
        assert!(valid_update().validate().is_ok());
    }

    #[test]
    fn out_of_range_progress_rejected() {
        let mut u = valid_update();
        u.progress = 1.5;
        assert_eq!(
            u.validate().unwrap_err().kind(),
            ErrorKind::ContractViolation
        );
        u.progress = f64::NAN;
        assert!(u.validate().is_err());
    }

    #[test]
    fn empty_or_non_ascii_fields_rejected() {
        let mut u = valid_update();
        u.status.clear();
        assert!(u.validate().is_err());
        let mut u = valid_update();
        u.filename = "t\u{00e9}st.dat".to_string();
        assert!(u.validate().is_err());
    }

    #[test]
    fn speed_formatting() {
        assert_eq!(format_speed(512.0), "512.0 B/s");
        assert_eq!(format_speed(1536.0), "1.5 KiB/s");
        assert_eq!(format_speed(3.0 * 1024.0 * 1024.0), "3.0 MiB/s");
        assert_eq!(format_speed(-1.0), "0.0 B/s");
    }
}
