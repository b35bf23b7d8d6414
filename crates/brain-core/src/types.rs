//! Shared value types used across the Brain crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unix timestamp in whole seconds (UTC).
///
/// Compared by value. Two Timestamps with the same inner value are equal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now().timestamp())
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp())
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.0, 0).unwrap_or_default()
    }

    /// A timestamp `secs` seconds after this one.
    pub fn plus_secs(&self, secs: u64) -> Self {
        Self(self.0.saturating_add(secs as i64))
    }

    /// Seconds elapsed from `earlier` to `self`. Negative when `earlier` is in the future.
    pub fn seconds_since(&self, earlier: Timestamp) -> i64 {
        self.0 - earlier.0
    }

    /// Midnight (00:00:00 UTC) of the day containing this timestamp.
    pub fn utc_day_start(&self) -> Self {
        Self(self.0 - self.0.rem_euclid(86_400))
    }
}
