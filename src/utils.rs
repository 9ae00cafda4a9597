//! Small shared helpers used throughout the cml core: session identifiers,
//! report text shaping, and the FILETIME/zone arithmetic behind timestamp
//! conversion.

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use chrono_tz::Tz;
use rand::Rng;

use crate::error::CmlError;

//==================================================================================
// 1. Session Identifiers
//==================================================================================

const SESSION_KEY_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789_";
pub const SESSION_KEY_LEN: usize = 20;

/// Generates a 20 character identifier from upper-case letters, digits and `_`.
pub fn generate_session_key() -> String {
    let mut rng = rand::rng();
    (0..SESSION_KEY_LEN)
        .map(|_| SESSION_KEY_ALPHABET[rng.random_range(0..SESSION_KEY_ALPHABET.len())] as char)
        .collect()
}

//==================================================================================
// 2. Text Helpers
//==================================================================================

/// Shortens `s` to at most `max` characters, marking the cut with `…`.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

//==================================================================================
// 3. Time Helpers
//==================================================================================

/// Milliseconds between 1601-01-01 and 1970-01-01.
pub const FILETIME_EPOCH_OFFSET_MILLIS: i64 = 11_644_473_600_000;
const FILETIME_TICKS_PER_MILLI: i64 = 10_000;

/// Converts a count of 100ns ticks since 1601-01-01 into Unix epoch milliseconds.
pub fn filetime_to_unix_millis(ticks: i64) -> i64 {
    ticks / FILETIME_TICKS_PER_MILLI - FILETIME_EPOCH_OFFSET_MILLIS
}

/// Parses `UTC`, `Z`, `GMT`, `+HH:MM`, `-HHMM`, `+HH` and `UTC+HH:MM` style offsets.
pub fn parse_utc_offset(text: &str) -> Result<FixedOffset, CmlError> {
    let invalid = || CmlError::InvalidConfig(format!("unsupported UTC offset '{text}'"));
    let trimmed = text.trim();
    let upper = trimmed.to_ascii_uppercase();
    let rest = upper
        .strip_prefix("UTC")
        .or_else(|| upper.strip_prefix("GMT"))
        .unwrap_or(&upper);

    if rest.is_empty() || rest == "Z" {
        return FixedOffset::east_opt(0).ok_or_else(invalid);
    }

    let (sign, digits) = match rest.as_bytes()[0] {
        b'+' => (1, &rest[1..]),
        b'-' => (-1, &rest[1..]),
        _ => return Err(invalid()),
    };
    let digits: String = digits.chars().filter(|c| *c != ':').collect();
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let (hours, minutes) = match digits.len() {
        1 | 2 => (digits.parse::<i32>().map_err(|_| invalid())?, 0),
        4 => (
            digits[..2].parse::<i32>().map_err(|_| invalid())?,
            digits[2..].parse::<i32>().map_err(|_| invalid())?,
        ),
        _ => return Err(invalid()),
    };
    if hours > 18 || minutes > 59 {
        return Err(invalid());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

/// Zone a human readable timestamp is rendered in. Named IANA zones follow their
/// daylight saving rules; fixed offsets never shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportZone {
    Named(Tz),
    Fixed(FixedOffset),
}

impl ReportZone {
    /// Accepts IANA names such as `Europe/Prague`, falling back to the offset
    /// forms understood by [`parse_utc_offset`].
    pub fn parse(text: &str) -> Result<Self, CmlError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(CmlError::InvalidConfig("empty time zone".to_string()));
        }
        match trimmed.parse::<Tz>() {
            Ok(tz) => Ok(Self::Named(tz)),
            Err(_) => parse_utc_offset(trimmed).map(Self::Fixed),
        }
    }

    /// Offset in effect at `at`.
    pub fn offset_at(&self, at: DateTime<Utc>) -> FixedOffset {
        match self {
            Self::Named(tz) => at.with_timezone(tz).fixed_offset().timezone(),
            Self::Fixed(offset) => *offset,
        }
    }

    /// RFC 3339 text for `at`; a zero offset prints as `Z`.
    pub fn format(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.offset_at(at))
            .to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }
}
