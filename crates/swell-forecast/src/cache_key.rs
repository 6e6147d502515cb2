//! Cache addressing: (lat, lng, UTC day, 4-hour bucket).
//!
//! Two locations that agree to three decimals and fall in the same UTC day
//! and bucket share one cache row. That collision is what saves requests.

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};

pub const BUCKET_HOURS: u32 = 4;
pub const BUCKETS_PER_DAY: u32 = 24 / BUCKET_HOURS;

const BUCKET_SECS: i64 = BUCKET_HOURS as i64 * 3600;

/// Bucket index (0..6) of a UTC instant.
pub fn time_bucket(at: DateTime<Utc>) -> u32 {
    at.hour() / BUCKET_HOURS
}

/// Start of the bucket containing `at`.
pub fn bucket_start(at: DateTime<Utc>) -> DateTime<Utc> {
    // UTC days are a whole number of buckets, so epoch alignment is day alignment.
    let into_bucket = at.timestamp().rem_euclid(BUCKET_SECS);
    at - Duration::seconds(into_bucket) - Duration::nanoseconds(i64::from(at.nanosecond()))
}

/// Start of the bucket after the one containing `at`; rows expire here.
pub fn next_bucket_start(at: DateTime<Utc>) -> DateTime<Utc> {
    bucket_start(at) + Duration::seconds(BUCKET_SECS)
}

/// `value` with `digits` decimals, exact halves rounded away from zero.
///
/// `format!("{:.N}")` sends exact binary halves such as `-1.125` to the even
/// digit (`-1.12`); the web client's `toFixed` gives `-1.13`, and keys built
/// on either side must agree.
pub fn fixed_decimal(value: f64, digits: usize) -> String {
    let scale = 2.0 * 10f64.powi(digits as i32);
    let doubled = value * scale;
    let exact_half = doubled.fract() == 0.0
        && doubled % 2.0 != 0.0
        && value.mul_add(scale, -doubled) == 0.0;
    let value = if exact_half {
        // One ulp further from zero is strictly past the half.
        f64::from_bits(value.to_bits() + 1)
    } else {
        value
    };
    format!("{:.*}", digits, value)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn for_location(lat: f64, lng: f64, at: DateTime<Utc>) -> Self {
        Self(format!(
            "{},{},{},{}",
            fixed_decimal(lat, 3),
            fixed_decimal(lng, 3),
            at.format("%Y-%m-%d"),
            time_bucket(at)
        ))
    }

    /// Wrap a key read back from storage.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
