//! Time and duration conversion utilities.
//!
//! Conversions saturate instead of truncating.

use std::time::Duration;

/// Extension trait for safe Duration conversions.
pub trait DurationExt {
    /// Convert duration to milliseconds as u64, saturating at `u64::MAX`.
    fn as_millis_u64(&self) -> u64;

    /// Render as a `mm:ss` clock. Minutes are not wrapped into hours.
    fn to_clock(&self) -> String;
}

impl DurationExt for Duration {
    fn as_millis_u64(&self) -> u64 {
        u64::try_from(self.as_millis()).unwrap_or(u64::MAX)
    }

    fn to_clock(&self) -> String {
        let secs = self.as_secs();
        format!("{:02}:{:02}", secs / 60, secs % 60)
    }
}
