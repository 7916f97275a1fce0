//! Column codecs shared by the row mappers.
//!
//! Identifiers are stored as hyphenated UUID text. Timestamps are stored as
//! RFC 3339 UTC with a fixed microsecond precision so that lexical order in
//! SQL equals chronological order.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use uuid::Uuid;

pub(crate) fn ts_to_sql(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn ts_from_sql(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn uuid_from_sql(idx: usize, s: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(s)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamps_sort_lexically() {
        let early = Utc.timestamp_opt(1_700_000_000, 5_000).unwrap();
        let late = Utc.timestamp_opt(1_700_000_000, 120_000_000).unwrap();
        assert!(ts_to_sql(&early) < ts_to_sql(&late));
        assert_eq!(ts_to_sql(&early).len(), ts_to_sql(&late).len());
    }

    #[test]
    fn test_timestamp_round_trip_keeps_micros() {
        let ts = Utc.timestamp_opt(1_700_000_000, 123_456_000).unwrap();
        assert_eq!(ts_from_sql(0, &ts_to_sql(&ts)).unwrap(), ts);
    }
}
