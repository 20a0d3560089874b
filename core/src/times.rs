//! Datetime and timestamp conversion helpers.
//!
//! # Design
//! Every instant the client does arithmetic on is a `DateTime<Utc>`; UTC is
//! the single canonical timezone. Other zones appear only at the edges, when
//! parsing or formatting strings. A `Zone` is either a fixed offset or an
//! IANA region such as `Australia/Melbourne`; abbreviations like `AEDT` are
//! ambiguous across regions and are rejected, so a string can never be
//! silently interpreted in the host's local zone.
//!
//! Upstream APIs express time as integer milliseconds since the Unix epoch,
//! so `TimestampUnit::Millis` is the unit used by the batching pipeline.

use std::fmt::{self, Write as _};
use std::str::FromStr;

use chrono::{
    DateTime, FixedOffset, LocalResult, NaiveDate, NaiveDateTime, Offset, TimeDelta, TimeZone, Utc,
};
use chrono_tz::Tz;
use tracing::warn;

use crate::error::{ApiError, Result};

/// Canonical timezone for all internal arithmetic.
pub const CANONICAL_TIMEZONE: Utc = Utc;

/// Default `strftime` format used when rendering timestamps as strings.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S %Z";

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f %:z",
    "%Y-%m-%d %H:%M:%S%.f %z",
];

/// Unit of a numeric Unix timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimestampUnit {
    Seconds,
    #[default]
    Millis,
}

impl FromStr for TimestampUnit {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "s" => Ok(TimestampUnit::Seconds),
            "ms" => Ok(TimestampUnit::Millis),
            other => Err(ApiError::invalid(format!(
                "unit must be one of [\"ms\", \"s\"], received {other:?}"
            ))),
        }
    }
}

/// Timezone used to read or render wall-clock times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    Fixed(FixedOffset),
    /// IANA region with its daylight-saving rules.
    Region(Tz),
}

impl Zone {
    pub fn utc() -> Self {
        Zone::Fixed(Utc.fix())
    }

    /// The instant `utc`, carrying this zone's offset at that instant.
    pub fn at_instant(&self, utc: &DateTime<Utc>) -> DateTime<FixedOffset> {
        match self {
            Zone::Fixed(offset) => utc.with_timezone(offset),
            Zone::Region(tz) => utc.with_timezone(tz).fixed_offset(),
        }
    }

    /// Attach this zone to a wall-clock reading.
    ///
    /// A reading repeated by a backward transition resolves to the earlier
    /// instant. A reading skipped by a forward transition is read with the
    /// offset in force just before the gap, which lands it past the gap.
    pub fn localize(&self, naive: &NaiveDateTime) -> Result<DateTime<FixedOffset>> {
        let nonexistent = || ApiError::invalid(format!("{naive} does not exist in {self}"));
        let tz = match self {
            Zone::Fixed(offset) => return offset.from_local_datetime(naive).single().ok_or_else(nonexistent),
            Zone::Region(tz) => tz,
        };
        match tz.from_local_datetime(naive) {
            LocalResult::Single(dt) => Ok(dt.fixed_offset()),
            LocalResult::Ambiguous(earliest, _) => Ok(earliest.fixed_offset()),
            LocalResult::None => {
                let before = naive
                    .checked_sub_signed(TimeDelta::days(1))
                    .map(|earlier| tz.offset_from_utc_datetime(&earlier).fix())
                    .ok_or_else(nonexistent)?;
                let dt = before.from_local_datetime(naive).single().ok_or_else(nonexistent)?;
                Ok(dt.with_timezone(tz).fixed_offset())
            }
        }
    }

    fn format(&self, utc: &DateTime<Utc>, format: &str) -> Result<String> {
        let mut out = String::new();
        // A zero fixed offset goes through `Utc` so `%Z` prints `UTC`.
        let written = match self {
            Zone::Fixed(offset) if offset.local_minus_utc() == 0 => write!(out, "{}", utc.format(format)),
            Zone::Fixed(offset) => write!(out, "{}", utc.with_timezone(offset).format(format)),
            Zone::Region(tz) => write!(out, "{}", utc.with_timezone(tz).format(format)),
        };
        written.map_err(|_| ApiError::invalid(format!("invalid datetime format {format:?}")))?;
        Ok(out)
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Zone::Fixed(offset) if offset.local_minus_utc() == 0 => f.write_str("UTC"),
            Zone::Fixed(offset) => write!(f, "{offset}"),
            Zone::Region(tz) => f.write_str(tz.name()),
        }
    }
}

impl From<FixedOffset> for Zone {
    fn from(offset: FixedOffset) -> Self {
        Zone::Fixed(offset)
    }
}

impl From<Tz> for Zone {
    fn from(tz: Tz) -> Self {
        Zone::Region(tz)
    }
}

impl FromStr for Zone {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self> {
        parse_timezone(s)
    }
}

/// Parse a timezone designator.
///
/// Accepts `UTC`, `GMT`, `Z`, numeric offsets such as `+10:00`, `-0530` or
/// `+10`, and IANA region names such as `America/New_York`.
pub fn parse_timezone(name: &str) -> Result<Zone> {
    let name = name.trim();
    if ["UTC", "GMT", "Z"].iter().any(|z| name.eq_ignore_ascii_case(z)) {
        return Ok(Zone::utc());
    }

    let unsupported = || ApiError::invalid(format!("unsupported timezone {name:?}"));
    // Only `Area/Location` names; the legacy single-word entries in the tz
    // database (`EST`, `MST`, `CET`) look like abbreviations.
    if name.contains('/') {
        return name.parse::<Tz>().map(Zone::Region).map_err(|_| unsupported());
    }

    let (sign, rest) = match name.chars().next() {
        Some('+') => (1, &name[1..]),
        Some('-') => (-1, &name[1..]),
        _ => return Err(unsupported()),
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(unsupported());
    }
    let (hours, minutes) = match digits.len() {
        2 => (&digits[..2], "0"),
        4 => (&digits[..2], &digits[2..]),
        _ => return Err(unsupported()),
    };
    let hours: i32 = hours.parse().map_err(|_| unsupported())?;
    let minutes: i32 = minutes.parse().map_err(|_| unsupported())?;
    if minutes >= 60 {
        return Err(unsupported());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .map(Zone::Fixed)
        .ok_or_else(unsupported)
}

/// Keep the wall-clock reading of `dt` but attach it to `zone`.
pub fn set_timezone<T: TimeZone>(dt: &DateTime<T>, zone: Zone) -> Result<DateTime<FixedOffset>> {
    zone.localize(&dt.naive_local())
}

fn timestamp_to_utc(timestamp: f64, unit: TimestampUnit) -> Result<DateTime<Utc>> {
    if !timestamp.is_finite() {
        return Err(ApiError::invalid(format!("timestamp {timestamp} is not finite")));
    }
    let whole = timestamp.floor();
    let frac = timestamp - whole;
    let out_of_range = || ApiError::invalid(format!("timestamp {timestamp} is out of range"));
    if whole.abs() >= i64::MAX as f64 {
        return Err(out_of_range());
    }
    let whole = whole as i64;

    let (mut secs, mut nanos) = match unit {
        TimestampUnit::Seconds => (whole, (frac * 1e9).round() as i64),
        TimestampUnit::Millis => (
            whole.div_euclid(1000),
            whole.rem_euclid(1000) * 1_000_000 + (frac * 1e6).round() as i64,
        ),
    };
    if nanos >= 1_000_000_000 {
        secs += 1;
        nanos -= 1_000_000_000;
    }
    DateTime::from_timestamp(secs, nanos as u32).ok_or_else(out_of_range)
}

/// Convert a Unix timestamp into a datetime in `zone`.
///
/// Fractional timestamps keep their sub-unit precision down to nanoseconds.
pub fn timestamp_to_datetime(timestamp: f64, unit: TimestampUnit, zone: Zone) -> Result<DateTime<FixedOffset>> {
    Ok(zone.at_instant(&timestamp_to_utc(timestamp, unit)?))
}

/// Convert a Unix timestamp into a formatted string in `zone`.
///
/// `%Z` renders a zero offset as `UTC` and a region by its abbreviation in
/// force at that instant.
pub fn timestamp_to_datetime_str(
    timestamp: f64,
    unit: TimestampUnit,
    zone: Zone,
    format: &str,
) -> Result<String> {
    zone.format(&timestamp_to_utc(timestamp, unit)?, format)
}

/// Parse a datetime string such as `2021-12-05 12:50:00`,
/// `2021-12-05 12:50:00 UTC`, `2021-12-05 12:50:00 Australia/Melbourne` or
/// `2021-12-05T12:50:00+10:00`.
///
/// An explicit `tz` overrides any zone embedded in the string, keeping the
/// wall-clock reading. A string without any zone is read as UTC.
pub fn parse_datetime_str(datetime_str: &str, tz: Option<Zone>) -> Result<DateTime<FixedOffset>> {
    let s = datetime_str.trim();

    let with_offset = DateTime::parse_from_rfc3339(s).ok().or_else(|| {
        OFFSET_FORMATS
            .iter()
            .find_map(|fmt| DateTime::parse_from_str(s, fmt).ok())
    });
    if let Some(dt) = with_offset {
        return match tz {
            Some(tz) => set_timezone(&dt, tz),
            None => Ok(dt),
        };
    }

    // Split off a trailing zone name, e.g. "UTC" or "Europe/London".
    let split = s.rfind(|c: char| c.is_ascii_digit()).map_or(0, |i| i + 1);
    let (body, suffix) = s.split_at(split);
    let embedded = match suffix.trim() {
        "" => None,
        name => Some(parse_timezone(name)?),
    };

    let naive = parse_naive(body.trim())
        .ok_or_else(|| ApiError::invalid(format!("unrecognised datetime string {datetime_str:?}")))?;

    let zone = match tz.or(embedded) {
        Some(zone) => zone,
        None => {
            warn!(input = datetime_str, "no timezone given, assuming UTC");
            Zone::utc()
        }
    };
    zone.localize(&naive)
}

fn parse_naive(s: &str) -> Option<NaiveDateTime> {
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Integer Unix timestamp of `dt` in `unit`, truncating sub-unit precision.
pub fn datetime_to_timestamp<T: TimeZone>(dt: &DateTime<T>, unit: TimestampUnit) -> i64 {
    match unit {
        TimestampUnit::Seconds => dt.timestamp(),
        TimestampUnit::Millis => dt.timestamp_millis(),
    }
}

pub fn datetime_str_to_timestamp(
    datetime_str: &str,
    tz: Option<Zone>,
    unit: TimestampUnit,
) -> Result<i64> {
    let dt = parse_datetime_str(datetime_str, tz)?;
    Ok(datetime_to_timestamp(&dt, unit))
}

/// A time argument in any of the forms callers commonly have at hand.
#[derive(Debug, Clone, PartialEq)]
pub enum TimeArg {
    Instant(DateTime<Utc>),
    /// Unix timestamp in seconds.
    Seconds(f64),
    /// Unix timestamp in milliseconds.
    Millis(i64),
    /// A datetime string accepted by `parse_datetime_str`.
    Text(String),
}

impl TimeArg {
    /// Normalize to the canonical timezone.
    pub fn to_utc(&self) -> Result<DateTime<Utc>> {
        match self {
            TimeArg::Instant(dt) => Ok(*dt),
            TimeArg::Seconds(ts) => timestamp_to_utc(*ts, TimestampUnit::Seconds),
            TimeArg::Millis(ms) => DateTime::from_timestamp_millis(*ms)
                .ok_or_else(|| ApiError::invalid(format!("timestamp {ms} ms is out of range"))),
            TimeArg::Text(s) => Ok(parse_datetime_str(s, None)?.with_timezone(&Utc)),
        }
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeArg {
    fn from(dt: DateTime<T>) -> Self {
        TimeArg::Instant(dt.with_timezone(&Utc))
    }
}

impl From<&str> for TimeArg {
    fn from(s: &str) -> Self {
        TimeArg::Text(s.to_string())
    }
}

impl From<String> for TimeArg {
    fn from(s: String) -> Self {
        TimeArg::Text(s)
    }
}

pub fn convert_timearg_as_datetime(t: impl Into<TimeArg>) -> Result<DateTime<Utc>> {
    t.into().to_utc()
}

pub fn convert_timearg_as_timestamp(t: impl Into<TimeArg>, unit: TimestampUnit) -> Result<i64> {
    let dt = convert_timearg_as_datetime(t)?;
    Ok(datetime_to_timestamp(&dt, unit))
}
