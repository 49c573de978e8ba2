//! UTC instants used for billing periods, credit expiry and audit columns.

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Serialized as RFC 3339.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now())
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    pub fn is_before(&self, other: &Timestamp) -> bool {
        self < other
    }

    /// Negative values move backwards.
    pub fn add_days(&self, days: i64) -> Self {
        Self(self.0 + Duration::days(days))
    }

    pub fn minus_days(&self, days: i64) -> Self {
        self.add_days(-days)
    }

    /// Gateway payloads carry Unix seconds. Out-of-range values yield `None`.
    pub fn from_unix_secs(secs: i64) -> Option<Self> {
        Utc.timestamp_opt(secs, 0).single().map(Self)
    }

    pub fn as_unix_secs(&self) -> i64 {
        self.0.timestamp()
    }

    /// True when `later` falls in a later calendar month than `self`.
    ///
    /// Monthly post quotas reset on this boundary rather than after a
    /// fixed number of days.
    pub fn month_rolled_over_by(&self, later: &Timestamp) -> bool {
        later.month_key() > self.month_key()
    }

    fn month_key(&self) -> (i32, u32) {
        (self.0.year(), self.0.month())
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    fn at(rfc3339: &str) -> Timestamp {
        Timestamp::from_datetime(
            DateTime::parse_from_rfc3339(rfc3339)
                .unwrap()
                .with_timezone(&Utc),
        )
    }

    #[test]
    fn timestamp_now_creates_current_time() {
        let before = Utc::now();
        let ts = Timestamp::now();
        let after = Utc::now();

        assert!(ts.as_datetime() >= &before);
        assert!(ts.as_datetime() <= &after);
    }

    #[test]
    fn timestamp_serializes_to_json() {
        let ts = at("2024-01-15T10:30:00Z");
        let json = serde_json::to_string(&ts).unwrap();
        assert!(json.contains("2024-01-15"));
    }

    #[test]
    fn timestamp_deserializes_from_json() {
        let ts: Timestamp = serde_json::from_str("\"2024-01-15T10:30:00Z\"").unwrap();
        assert_eq!(ts.as_datetime().year(), 2024);
    }

    #[test]
    fn from_unix_secs_works() {
        // 2024-01-15T00:00:00Z
        let ts = Timestamp::from_unix_secs(1705276800).unwrap();
        assert_eq!(ts.as_datetime().month(), 1);
        assert_eq!(ts.as_datetime().day(), 15);
        assert_eq!(ts.as_unix_secs(), 1705276800);
    }

    #[test]
    fn from_unix_secs_rejects_out_of_range() {
        assert!(Timestamp::from_unix_secs(i64::MAX).is_none());
    }

    #[test]
    fn month_rollover_detects_next_month() {
        let jan = at("2024-01-31T23:59:00Z");
        let feb = at("2024-02-01T00:00:00Z");
        assert!(jan.month_rolled_over_by(&feb));
        assert!(!feb.month_rolled_over_by(&jan));
    }

    #[test]
    fn month_rollover_ignores_same_month() {
        let early = at("2024-03-01T00:00:00Z");
        let late = at("2024-03-31T23:00:00Z");
        assert!(!early.month_rolled_over_by(&late));
    }

    #[test]
    fn month_rollover_crosses_year_boundary() {
        let dec = at("2023-12-15T00:00:00Z");
        let jan = at("2024-01-02T00:00:00Z");
        assert!(dec.month_rolled_over_by(&jan));
    }
}
