use std::cmp::Ordering;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

/// Backend-native instant with nanosecond precision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: i32,
}

impl Timestamp {
    pub fn new(seconds: i64, nanos: i32) -> Self {
        let extra = nanos.div_euclid(1_000_000_000);
        Self {
            seconds: seconds + extra as i64,
            nanos: nanos.rem_euclid(1_000_000_000),
        }
    }

    pub fn now() -> Self {
        Self::from_datetime(&Utc::now())
    }

    pub fn from_datetime(value: &DateTime<Utc>) -> Self {
        Self::new(value.timestamp(), value.timestamp_subsec_nanos() as i32)
    }

    /// Converts back into a chrono instant. Out-of-range values clamp to the
    /// Unix epoch.
    pub fn to_datetime(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.seconds, self.nanos as u32)
            .single()
            .unwrap_or_default()
    }

    pub fn to_rfc3339(&self) -> String {
        self.to_datetime()
            .to_rfc3339_opts(SecondsFormat::Nanos, true)
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.seconds
            .cmp(&other.seconds)
            .then(self.nanos.cmp(&other.nanos))
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self::from_datetime(&value)
    }
}
