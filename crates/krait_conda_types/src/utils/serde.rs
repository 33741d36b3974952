//! Serde helpers shared by the on-disk schemas.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// (De)serialization of package timestamps.
///
/// Repodata timestamps are milliseconds since the epoch, but very old entries
/// were written in seconds. Any value that would lie before the year 2265
/// when interpreted as milliseconds is treated as seconds instead.
pub mod timestamp {
    use super::*;

    const MILLISECOND_CUTOFF: i64 = 253_402_300_799; // 9999-12-31 in seconds

    pub fn serialize<S: Serializer>(
        timestamp: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        timestamp
            .map(|timestamp| timestamp.timestamp_millis())
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let Some(mut value) = Option::<i64>::deserialize(deserializer)? else {
            return Ok(None);
        };

        // Convert historic second based timestamps to milliseconds.
        if value <= MILLISECOND_CUTOFF {
            value *= 1000;
        }

        Ok(Some(
            Utc.timestamp_millis_opt(value)
                .single()
                .ok_or_else(|| serde::de::Error::custom("timestamp out of range"))?,
        ))
    }
}

/// Deserializes a value that is either a single string or a sequence of
/// strings into a `Vec<String>`. Conda metadata uses both spellings for
/// `track_features`.
pub mod string_or_seq {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Vec<String>, serializer: S) -> Result<S::Ok, S::Error> {
        value.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<String>, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            String(String),
            Seq(Vec<String>),
        }

        Ok(match Option::<Raw>::deserialize(deserializer)? {
            None => Vec::new(),
            Some(Raw::String(string)) => string
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
            Some(Raw::Seq(seq)) => seq,
        })
    }
}
