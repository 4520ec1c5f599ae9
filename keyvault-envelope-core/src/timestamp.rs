use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

/// Envelope files end their stamp with an hour-only zone and a literal
/// `:0`, e.g. `2021-12-31T12:00:00Z:0` or `2021-12-31T13:00:00+01:0`.
const ZONE_TAIL: &str = ":0";

/// `lastmodified` stamp of an envelope in its fixed on-disk format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LastModified(OffsetDateTime);

impl LastModified {
    /// Current time in UTC, truncated to whole seconds.
    pub fn now() -> Self {
        let now = OffsetDateTime::now_utc();
        Self(now.replace_nanosecond(0).unwrap_or(now))
    }

    pub fn parse(input: &str) -> Result<Self> {
        let raw = input.trim();
        let invalid = |reason: &str| {
            Error::InvalidEnvelope(format!("invalid lastmodified `{raw}`: {reason}"))
        };

        let stamp = raw
            .strip_suffix(ZONE_TAIL)
            .ok_or_else(|| invalid("missing `:0` zone tail"))?;

        let (date_time, offset) = match stamp.strip_suffix('Z') {
            Some(date_time) => (date_time, UtcOffset::UTC),
            None => {
                let split = stamp
                    .len()
                    .checked_sub(3)
                    .ok_or_else(|| invalid("missing zone"))?;
                let (date_time, zone) = match (stamp.get(..split), stamp.get(split..)) {
                    (Some(date_time), Some(zone)) => (date_time, zone),
                    _ => return Err(invalid("missing zone")),
                };
                (date_time, parse_hour_offset(zone).ok_or_else(|| invalid("bad zone"))?)
            }
        };

        let parsed = PrimitiveDateTime::parse(
            date_time,
            format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
        )
            .map_err(|err| invalid(&err.to_string()))?;
        Ok(Self(parsed.assume_offset(offset)))
    }

    pub fn as_offset_date_time(&self) -> OffsetDateTime {
        self.0
    }
}

fn parse_hour_offset(zone: &str) -> Option<UtcOffset> {
    let (sign, hours) = zone.split_at_checked(1)?;
    let hours: i8 = hours.parse().ok()?;
    let hours = match sign {
        "+" => hours,
        "-" => -hours,
        _ => return None,
    };
    UtcOffset::from_hms(hours, 0, 0).ok()
}

impl From<OffsetDateTime> for LastModified {
    fn from(value: OffsetDateTime) -> Self {
        Self(value)
    }
}

impl fmt::Display for LastModified {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stamp = self
            .0
            .to_offset(UtcOffset::UTC)
            .format(format_description!(
                "[year]-[month]-[day]T[hour]:[minute]:[second]Z:0"
            ))
            .map_err(|_| fmt::Error)?;
        f.write_str(&stamp)
    }
}

impl Serialize for LastModified {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for LastModified {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        LastModified::parse(&value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn formats_utc_with_truncated_zone() {
        let stamp = LastModified::from(datetime!(2021-12-31 12:00:00 UTC));
        assert_eq!(stamp.to_string(), "2021-12-31T12:00:00Z:0");
    }

    #[test]
    fn pads_single_digit_fields() {
        let stamp = LastModified::from(datetime!(2022-01-02 03:04:05 UTC));
        assert_eq!(stamp.to_string(), "2022-01-02T03:04:05Z:0");
    }

    #[test]
    fn parses_utc_stamp() {
        let stamp = LastModified::parse("2021-12-31T12:00:00Z:0").unwrap();
        assert_eq!(
            stamp.as_offset_date_time(),
            datetime!(2021-12-31 12:00:00 UTC)
        );
    }

    #[test]
    fn parses_hour_offsets_from_older_writers() {
        let stamp = LastModified::parse("2022-03-01T09:15:00+01:0").unwrap();
        assert_eq!(
            stamp.as_offset_date_time(),
            datetime!(2022-03-01 08:15:00 UTC)
        );
        assert_eq!(stamp.to_string(), "2022-03-01T08:15:00Z:0");

        let west = LastModified::parse("2022-03-01T09:15:00-05:0").unwrap();
        assert_eq!(west.to_string(), "2022-03-01T14:15:00Z:0");
    }

    #[test]
    fn rejects_other_formats() {
        for raw in [
            "2021-12-31T12:00:00Z",
            "2021-12-31T12:00:00+01:00",
            "2021-12-31 12:00:00Z:0",
            "Z:0",
            "",
        ] {
            assert!(
                matches!(LastModified::parse(raw), Err(Error::InvalidEnvelope(_))),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn now_survives_a_round_trip() {
        let now = LastModified::now();
        let parsed = LastModified::parse(&now.to_string()).unwrap();
        assert_eq!(parsed, now);
    }
}
