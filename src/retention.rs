use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

/// Retention value as it arrives in a server descriptor.
///
/// The dashboard API serializes `java.time.Duration` either as a number of seconds or as an
/// ISO-8601 string (`PT36H`), depending on the server's JSON mapper. The representation is fixed
/// here, at deserialization time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RawRetention {
    Seconds(i64),
    Iso8601(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawRetentionRepr {
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<RawRetentionRepr> for RawRetention {
    fn from(value: RawRetentionRepr) -> Self {
        match value {
            RawRetentionRepr::Int(secs) => Self::Seconds(secs),
            // Jackson writes durations as `129600.000000000`; sub-second retention is meaningless.
            RawRetentionRepr::Float(secs) => Self::Seconds(secs.trunc() as i64),
            RawRetentionRepr::Text(text) => Self::Iso8601(text),
        }
    }
}

impl<'de> Deserialize<'de> for RawRetention {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        RawRetentionRepr::deserialize(deserializer).map(Into::into)
    }
}

impl From<i64> for RawRetention {
    fn from(secs: i64) -> Self {
        Self::Seconds(secs)
    }
}

impl From<&str> for RawRetention {
    fn from(text: &str) -> Self {
        Self::Iso8601(text.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Empty,
    Malformed { input: String },
    Overflow { input: String },
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "empty duration expression"),
            Self::Malformed { input } => write!(f, "malformed duration expression: {input:?}"),
            Self::Overflow { input } => write!(f, "duration out of range: {input:?}"),
        }
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicy {
    Disabled,
    ActiveFor(Duration),
}

impl RetentionPolicy {
    pub fn parse(raw: &RawRetention) -> Result<Self, ParseError> {
        match raw {
            RawRetention::Seconds(secs) => Ok(Self::from_seconds(*secs)),
            RawRetention::Iso8601(text) => {
                let total = parse_iso8601_duration(text)?;
                Ok(Self::from_duration(total))
            }
        }
    }

    pub fn from_seconds(secs: i64) -> Self {
        match Duration::try_seconds(secs) {
            Some(duration) => Self::from_duration(duration),
            // Only reachable for |secs| beyond ~292 million years.
            None if secs > 0 => Self::ActiveFor(Duration::MAX),
            None => Self::Disabled,
        }
    }

    fn from_duration(duration: Duration) -> Self {
        if duration <= Duration::zero() {
            Self::Disabled
        } else {
            Self::ActiveFor(duration)
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, Self::Disabled)
    }

    /// Instant at which the automatic transition happens, or `None` when the policy is disabled
    /// (or the sum is not representable).
    pub fn transition_instant(&self, last_transition: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Disabled => None,
            Self::ActiveFor(duration) => last_transition.checked_add_signed(*duration),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Countdown {
    Pending { remaining: Duration },
    Reached { ago: Duration },
}

impl Countdown {
    pub fn between(at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        if at > now {
            Self::Pending {
                remaining: at - now,
            }
        } else {
            Self::Reached { ago: now - at }
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }
}

static ISO8601_DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^([-+]?)P(?:([-+]?[0-9]+)D)?(T(?:([-+]?[0-9]+)H)?(?:([-+]?[0-9]+)M)?(?:([-+]?[0-9]+)(?:[.,]([0-9]{0,9}))?S)?)?$",
    )
    .expect("static iso-8601 duration pattern")
});

/// Parses `[-]P[nD][T[nH][nM][n[.f]S]]`, the grammar `java.time.Duration` prints and accepts.
fn parse_iso8601_duration(input: &str) -> Result<Duration, ParseError> {
    let text = input.trim();
    if text.is_empty() {
        return Err(ParseError::Empty);
    }
    let malformed = || ParseError::Malformed {
        input: input.to_string(),
    };
    let overflow = || ParseError::Overflow {
        input: input.to_string(),
    };

    let caps = ISO8601_DURATION.captures(text).ok_or_else(malformed)?;
    let days = caps.get(2);
    let time = caps.get(3);
    let hours = caps.get(4);
    let minutes = caps.get(5);
    let seconds = caps.get(6);

    // `P`, `PT` and `P1DT` are rejected, same as Duration.parse.
    let has_time_part = hours.is_some() || minutes.is_some() || seconds.is_some();
    if days.is_none() && !has_time_part {
        return Err(malformed());
    }
    if time.is_some() && !has_time_part {
        return Err(malformed());
    }

    let component = |m: Option<regex::Match>, unit_ms: i64| -> Result<i64, ParseError> {
        let Some(m) = m else {
            return Ok(0);
        };
        let value: i64 = m.as_str().parse().map_err(|_| overflow())?;
        value.checked_mul(unit_ms).ok_or_else(overflow)
    };

    let mut total_ms = 0_i64;
    for part in [
        component(days, 86_400_000)?,
        component(hours, 3_600_000)?,
        component(minutes, 60_000)?,
        component(seconds, 1_000)?,
    ] {
        total_ms = total_ms.checked_add(part).ok_or_else(overflow)?;
    }

    if let Some(fraction) = caps.get(7).filter(|m| !m.as_str().is_empty()) {
        // Millisecond precision; the fraction carries the sign of the seconds component.
        let digits = format!("{:0<3}", &fraction.as_str()[..fraction.as_str().len().min(3)]);
        let fraction_ms: i64 = digits.parse().map_err(|_| malformed())?;
        let negative_secs = seconds.is_some_and(|m| m.as_str().starts_with('-'));
        let signed = if negative_secs {
            -fraction_ms
        } else {
            fraction_ms
        };
        total_ms = total_ms.checked_add(signed).ok_or_else(overflow)?;
    }

    if caps.get(1).is_some_and(|m| m.as_str() == "-") {
        total_ms = total_ms.checked_neg().ok_or_else(overflow)?;
    }

    Duration::try_milliseconds(total_ms).ok_or_else(overflow)
}
