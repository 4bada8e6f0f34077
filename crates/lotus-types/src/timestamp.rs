//! ISO-8601 timestamp codec used by snapshots.
//!
//! Timestamps are written as RFC 3339 strings with full sub-second
//! precision, so a value read back is the identical instant. Reading also
//! accepts offset-less `YYYY-MM-DDTHH:MM:SS[.fffffff]` strings, treated as
//! UTC, which is the form older snapshot files carry.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

/// Accepted layout for offset-less timestamps.
const NAIVE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Format an instant as an RFC 3339 string.
pub fn format(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Parse an ISO-8601 string, with or without an offset.
pub fn parse(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .or_else(|_| NaiveDateTime::parse_from_str(raw, NAIVE_FORMAT).map(|naive| naive.and_utc()))
}

/// Serde adapter for `Option<DateTime<Utc>>` fields; `null` maps to `None`.
pub mod iso8601_option {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize as an RFC 3339 string or `null`.
    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(
        at: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match at {
            Some(at) => serializer.serialize_str(&super::format(at)),
            None => serializer.serialize_none(),
        }
    }

    /// Deserialize from an ISO-8601 string or `null`.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|raw| super::parse(&raw).map_err(serde::de::Error::custom))
            .transpose()
    }
}
