//! Lexical forms and arithmetic for the date/time/duration atomic kinds.

use chrono::{
    DateTime, Datelike, Duration as ChronoDuration, FixedOffset, Months, NaiveDate, NaiveDateTime, NaiveTime, Offset,
    Timelike, Utc,
};
use core::fmt::Write as _;

use crate::error::{Error, Result};

const MAX_OFFSET_SECONDS: i32 = 14 * 3600;

/// A dateTime that remembers whether its lexical form carried a timezone.
/// Values without a timezone are normalized to UTC for comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DateTimeValue {
    pub value: DateTime<FixedOffset>,
    pub has_timezone: bool,
}

/// Generic `duration`: both components kept separately since months do not
/// convert to a fixed number of milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DurationValue {
    pub months: i32,
    pub millis: i64,
}

fn utc() -> FixedOffset {
    Utc.fix()
}

fn invalid(kind: &str, lexical: &str) -> Error {
    Error::invalid_cast(format!("\"{lexical}\" is not a valid {kind}"))
}

/// Split a trailing `Z` / `±hh:mm` zone designator off a lexical value.
fn split_timezone(s: &str) -> Result<(&str, Option<FixedOffset>)> {
    if let Some(rest) = s.strip_suffix('Z') {
        return Ok((rest, Some(utc())));
    }
    if s.len() > 6 {
        let (body, tail) = s.split_at(s.len() - 6);
        let bytes = tail.as_bytes();
        if (bytes[0] == b'+' || bytes[0] == b'-') && bytes[3] == b':' {
            let hours: i32 = tail[1..3].parse().map_err(|_| invalid("timezone", tail))?;
            let minutes: i32 = tail[4..6].parse().map_err(|_| invalid("timezone", tail))?;
            if minutes > 59 {
                return Err(invalid("timezone", tail));
            }
            let mut secs = hours * 3600 + minutes * 60;
            if secs > MAX_OFFSET_SECONDS {
                return Err(invalid("timezone", tail));
            }
            if bytes[0] == b'-' {
                secs = -secs;
            }
            let off = FixedOffset::east_opt(secs).ok_or_else(|| invalid("timezone", tail))?;
            return Ok((body, Some(off)));
        }
    }
    Ok((s, None))
}

fn parse_naive_date(s: &str) -> Result<NaiveDate> {
    // year must have at least four digits; no leading '+'
    let digits = s.trim_start_matches('-');
    let year_len = digits.find('-').unwrap_or(0);
    if year_len < 4 || (year_len > 4 && digits.starts_with('0')) {
        return Err(invalid("date", s));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| invalid("date", s))
}

fn parse_naive_time(s: &str) -> Result<(NaiveTime, bool)> {
    if s == "24:00:00" || (s.starts_with("24:00:00.") && s[9..].chars().all(|c| c == '0') && s.len() > 9) {
        return Ok((NaiveTime::MIN, true));
    }
    if s.len() < 8 || s.as_bytes()[2] != b':' || s.as_bytes()[5] != b':' {
        return Err(invalid("time", s));
    }
    let t = NaiveTime::parse_from_str(s, "%H:%M:%S%.f").map_err(|_| invalid("time", s))?;
    Ok((t, false))
}

pub fn parse_date_time(s: &str) -> Result<DateTimeValue> {
    let (body, tz) = split_timezone(s)?;
    let (date_part, time_part) = body.split_once('T').ok_or_else(|| invalid("dateTime", s))?;
    let date = parse_naive_date(date_part).map_err(|_| invalid("dateTime", s))?;
    let (time, end_of_day) = parse_naive_time(time_part).map_err(|_| invalid("dateTime", s))?;
    let mut naive = NaiveDateTime::new(date, time);
    if end_of_day {
        naive += ChronoDuration::days(1);
    }
    let offset = tz.unwrap_or_else(utc);
    let value = naive
        .and_local_timezone(offset)
        .single()
        .ok_or_else(|| invalid("dateTime", s))?;
    Ok(DateTimeValue {
        value,
        has_timezone: tz.is_some(),
    })
}

pub fn parse_date(s: &str) -> Result<(NaiveDate, Option<FixedOffset>)> {
    let (body, tz) = split_timezone(s)?;
    Ok((parse_naive_date(body)?, tz))
}

pub fn parse_time(s: &str) -> Result<(NaiveTime, Option<FixedOffset>)> {
    let (body, tz) = split_timezone(s)?;
    let (t, _) = parse_naive_time(body)?;
    Ok((t, tz))
}

fn push_offset(out: &mut String, tz: FixedOffset) {
    let secs = tz.local_minus_utc();
    if secs == 0 {
        out.push('Z');
        return;
    }
    let sign = if secs < 0 { '-' } else { '+' };
    let abs = secs.abs();
    let _ = write!(out, "{sign}{:02}:{:02}", abs / 3600, (abs % 3600) / 60);
}

fn push_time(out: &mut String, t: NaiveTime) {
    let _ = write!(out, "{:02}:{:02}:{:02}", t.hour(), t.minute(), t.second());
    let millis = t.nanosecond() / 1_000_000;
    if millis != 0 {
        let _ = write!(out, ".{millis:03}");
    }
}

pub fn format_date_time(v: &DateTimeValue) -> String {
    let mut out = String::new();
    let local = v.value.naive_local();
    let _ = write!(out, "{:04}-{:02}-{:02}T", local.year(), local.month(), local.day());
    push_time(&mut out, local.time());
    if v.has_timezone {
        push_offset(&mut out, *v.value.offset());
    }
    out
}

pub fn format_date(date: NaiveDate, tz: Option<FixedOffset>) -> String {
    let mut out = format!("{:04}-{:02}-{:02}", date.year(), date.month(), date.day());
    if let Some(tz) = tz {
        push_offset(&mut out, tz);
    }
    out
}

pub fn format_time(time: NaiveTime, tz: Option<FixedOffset>) -> String {
    let mut out = String::new();
    push_time(&mut out, time);
    if let Some(tz) = tz {
        push_offset(&mut out, tz);
    }
    out
}

/// Parse an ISO 8601 duration (`-P1Y2M3DT4H5M6.789S`) into months and milliseconds.
pub fn parse_duration(s: &str) -> Result<DurationValue> {
    let (negative, rest) = match s.strip_prefix('-') {
        Some(r) => (true, r),
        None => (false, s),
    };
    let rest = rest.strip_prefix('P').ok_or_else(|| invalid("duration", s))?;
    if rest.is_empty() || rest.ends_with('T') {
        return Err(invalid("duration", s));
    }
    let (date_part, time_part) = match rest.split_once('T') {
        Some((d, t)) => (d, Some(t)),
        None => (rest, None),
    };
    let mut months: i64 = 0;
    let mut millis: i64 = 0;
    let mut num = String::new();
    let mut order = 0u8;
    for ch in date_part.chars() {
        if ch.is_ascii_digit() {
            num.push(ch);
            continue;
        }
        let n: i64 = num.parse().map_err(|_| invalid("duration", s))?;
        num.clear();
        let rank = match ch {
            'Y' => {
                months += n * 12;
                1
            }
            'M' => {
                months += n;
                2
            }
            'D' => {
                millis += n * 86_400_000;
                3
            }
            _ => return Err(invalid("duration", s)),
        };
        if rank <= order {
            return Err(invalid("duration", s));
        }
        order = rank;
    }
    if !num.is_empty() {
        return Err(invalid("duration", s));
    }
    if let Some(time_part) = time_part {
        order = 0;
        for ch in time_part.chars() {
            if ch.is_ascii_digit() || ch == '.' {
                num.push(ch);
                continue;
            }
            let rank = match ch {
                'H' => {
                    let n: i64 = num.parse().map_err(|_| invalid("duration", s))?;
                    millis += n * 3_600_000;
                    1
                }
                'M' => {
                    let n: i64 = num.parse().map_err(|_| invalid("duration", s))?;
                    millis += n * 60_000;
                    2
                }
                'S' => {
                    let secs: f64 = num.parse().map_err(|_| invalid("duration", s))?;
                    #[allow(clippy::cast_possible_truncation)]
                    {
                        millis += (secs * 1000.0).round() as i64;
                    }
                    3
                }
                _ => return Err(invalid("duration", s)),
            };
            num.clear();
            if rank <= order {
                return Err(invalid("duration", s));
            }
            order = rank;
        }
        if !num.is_empty() {
            return Err(invalid("duration", s));
        }
    }
    let months = i32::try_from(months).map_err(|_| invalid("duration", s))?;
    Ok(if negative {
        DurationValue {
            months: -months,
            millis: -millis,
        }
    } else {
        DurationValue { months, millis }
    })
}

pub fn format_duration(d: DurationValue) -> String {
    if d.months == 0 && d.millis == 0 {
        return "PT0S".to_string();
    }
    let negative = d.months < 0 || d.millis < 0;
    let months = d.months.unsigned_abs();
    let millis = d.millis.unsigned_abs();
    let mut out = String::new();
    if negative {
        out.push('-');
    }
    out.push('P');
    let (years, months) = (months / 12, months % 12);
    if years > 0 {
        let _ = write!(out, "{years}Y");
    }
    if months > 0 {
        let _ = write!(out, "{months}M");
    }
    let days = millis / 86_400_000;
    let rem = millis % 86_400_000;
    if days > 0 {
        let _ = write!(out, "{days}D");
    }
    if rem > 0 {
        out.push('T');
        let hours = rem / 3_600_000;
        let minutes = (rem % 3_600_000) / 60_000;
        let ms = rem % 60_000;
        if hours > 0 {
            let _ = write!(out, "{hours}H");
        }
        if minutes > 0 {
            let _ = write!(out, "{minutes}M");
        }
        if ms > 0 {
            if ms % 1000 == 0 {
                let _ = write!(out, "{}S", ms / 1000);
            } else {
                let _ = write!(out, "{}.{:03}S", ms / 1000, ms % 1000);
            }
        }
    }
    out
}

pub fn add_duration(dt: &DateTimeValue, d: DurationValue) -> Result<DateTimeValue> {
    let shifted_months = if d.months >= 0 {
        dt.value.checked_add_months(Months::new(d.months.unsigned_abs()))
    } else {
        dt.value.checked_sub_months(Months::new(d.months.unsigned_abs()))
    };
    let value = shifted_months
        .and_then(|v| v.checked_add_signed(ChronoDuration::milliseconds(d.millis)))
        .ok_or_else(|| Error::invalid_cast("dateTime arithmetic overflow"))?;
    Ok(DateTimeValue {
        value,
        has_timezone: dt.has_timezone,
    })
}

/// Difference `left - right` in milliseconds, as a dayTimeDuration.
pub fn subtract_date_times(left: &DateTimeValue, right: &DateTimeValue) -> i64 {
    left.value.signed_duration_since(right.value).num_milliseconds()
}
