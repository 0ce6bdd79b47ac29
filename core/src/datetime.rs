/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * This file is part of camel-sandbox.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 *
 * 1. OPEN SOURCE: You may use this file under the terms of the GNU Affero
 * General Public License v3.0. If you link to this code, your ENTIRE
 * application must be open-sourced under AGPLv3.
 *
 * 2. COMMERCIAL: For proprietary use, you must obtain a Commercial License
 * from Sovereign Systems.
 *
 * PATENT NOTICE: No patent rights in camel-sandbox are granted by this license.
 * NO IMPLIED LICENSE to rights of Mohamad Al-Zawahreh or Sovereign Systems.
 */

//! chrono-backed `datetime`, `date`, `time`, `timedelta` and `timezone`.
//!
//! Values of these classes are host instances whose payload is a
//! [`RawValue`] date/time variant; this module owns their construction,
//! methods, attributes, arithmetic and rendering.

use crate::ast::BinOp;
use crate::class::ClassDef;
use crate::exception::ExceptionInfo;
use crate::intrinsics::{expect_int, Args};
use crate::raw::RawValue;
use crate::value::BuiltinDef;
use chrono::format::{parse, Item, Parsed, StrftimeItems};
use chrono::{
    DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone,
    Timelike,
};
use indexmap::IndexMap;
use std::cmp::Ordering;
use std::fmt::Write;

const MICROS_PER_SECOND: i128 = 1_000_000;
const MICROS_PER_DAY: i128 = 86_400 * MICROS_PER_SECOND;

// ============================================================================
// CLASSES
// ============================================================================

/// The date/time classes in prelude order.
pub fn classes() -> Vec<ClassDef> {
    vec![
        ClassDef::host("datetime", new_datetime)
            .with_methods([
                BuiltinDef::new("strftime", |a, k| strftime_method("strftime", a, k)),
                BuiltinDef::new("isoformat", isoformat_method),
                BuiltinDef::new("replace", replace_method),
                BuiltinDef::new("date", datetime_date),
                BuiltinDef::new("time", datetime_time),
                BuiltinDef::new("weekday", |a, k| weekday_method("weekday", a, k, 0)),
                BuiltinDef::new("isoweekday", |a, k| weekday_method("isoweekday", a, k, 1)),
                BuiltinDef::new("utcoffset", utcoffset_method),
                BuiltinDef::new("astimezone", astimezone_method),
                BuiltinDef::class_method("strptime", strptime),
                BuiltinDef::class_method("fromisoformat", fromisoformat),
                BuiltinDef::class_method("combine", combine),
            ])
            .totally_ordered(),
        ClassDef::host("date", new_date)
            .with_methods([
                BuiltinDef::new("strftime", |a, k| strftime_method("strftime", a, k)),
                BuiltinDef::new("isoformat", isoformat_method),
                BuiltinDef::new("replace", replace_method),
                BuiltinDef::new("weekday", |a, k| weekday_method("weekday", a, k, 0)),
                BuiltinDef::new("isoweekday", |a, k| weekday_method("isoweekday", a, k, 1)),
                BuiltinDef::class_method("fromisoformat", fromisoformat),
            ])
            .totally_ordered(),
        ClassDef::host("time", new_time)
            .with_methods([
                BuiltinDef::new("strftime", |a, k| strftime_method("strftime", a, k)),
                BuiltinDef::new("isoformat", isoformat_method),
                BuiltinDef::new("replace", replace_method),
                BuiltinDef::class_method("fromisoformat", fromisoformat),
            ])
            .totally_ordered(),
        ClassDef::host("timedelta", new_timedelta)
            .with_method(BuiltinDef::new("total_seconds", |a, k| {
                let args = Args::new("total_seconds", a, k);
                args.max_positional(1)?;
                match args.required(0, "self")? {
                    RawValue::TimeDelta(d) => Ok(RawValue::Float(total_seconds(d))),
                    other => Err(descriptor_error("total_seconds", "timedelta", other)),
                }
            }))
            .totally_ordered(),
        ClassDef::host("timezone", new_timezone).with_methods([
            BuiltinDef::new("utcoffset", |a, k| timezone_method("utcoffset", a, k)),
            BuiltinDef::new("tzname", |a, k| timezone_method("tzname", a, k)),
            BuiltinDef::new("dst", |a, k| timezone_method("dst", a, k)),
        ]),
    ]
}

/// Class-level constants (`timezone.utc`).
pub fn class_attr(class_name: &str, name: &str) -> Option<RawValue> {
    match (class_name, name) {
        ("timezone", "utc") => FixedOffset::east_opt(0).map(RawValue::TimeZone),
        _ => None,
    }
}

/// Read-only attributes of date/time payloads.
pub fn host_attr(raw: &RawValue, name: &str) -> Option<RawValue> {
    let int = |i: i64| Some(RawValue::Int(i));
    match raw {
        RawValue::DateTime { naive, offset } => match name {
            "tzinfo" => Some(offset.map_or(RawValue::None, RawValue::TimeZone)),
            _ => date_attr(&naive.date(), name).or_else(|| time_attr(&naive.time(), name)),
        },
        RawValue::Date(d) => date_attr(d, name),
        RawValue::Time(t) => time_attr(t, name),
        RawValue::TimeDelta(d) => {
            let (days, seconds, micros) = components(d);
            match name {
                "days" => int(days),
                "seconds" => int(seconds),
                "microseconds" => int(micros),
                _ => None,
            }
        }
        _ => None,
    }
}

fn date_attr(d: &NaiveDate, name: &str) -> Option<RawValue> {
    match name {
        "year" => Some(RawValue::Int(d.year() as i64)),
        "month" => Some(RawValue::Int(d.month() as i64)),
        "day" => Some(RawValue::Int(d.day() as i64)),
        _ => None,
    }
}

fn time_attr(t: &NaiveTime, name: &str) -> Option<RawValue> {
    match name {
        "hour" => Some(RawValue::Int(t.hour() as i64)),
        "minute" => Some(RawValue::Int(t.minute() as i64)),
        "second" => Some(RawValue::Int(t.second() as i64)),
        "microsecond" => Some(RawValue::Int(microsecond(t) as i64)),
        _ => None,
    }
}

fn microsecond(t: &NaiveTime) -> u32 {
    (t.nanosecond() % 1_000_000_000) / 1_000
}

fn descriptor_error(method: &str, class: &str, got: &RawValue) -> ExceptionInfo {
    ExceptionInfo::type_error(format!(
        "descriptor '{}' for '{}' objects doesn't apply to a '{}' object",
        method,
        class,
        got.type_name()
    ))
}

// ============================================================================
// CONSTRUCTION
// ============================================================================

fn make_date(year: i64, month: i64, day: i64) -> Result<NaiveDate, ExceptionInfo> {
    if !(1..=9999).contains(&year) {
        return Err(ExceptionInfo::value_error(format!("year {} is out of range", year)));
    }
    if !(1..=12).contains(&month) {
        return Err(ExceptionInfo::value_error("month must be in 1..12"));
    }
    if !(1..=31).contains(&day) {
        return Err(ExceptionInfo::value_error("day is out of range for month"));
    }
    NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
        .ok_or_else(|| ExceptionInfo::value_error("day is out of range for month"))
}

fn make_time(hour: i64, minute: i64, second: i64, micro: i64) -> Result<NaiveTime, ExceptionInfo> {
    let check = |v: i64, max: i64, what: &str| {
        if (0..=max).contains(&v) {
            Ok(v as u32)
        } else {
            Err(ExceptionInfo::value_error(format!("{} must be in 0..{}", what, max)))
        }
    };
    let (h, m, s, us) = (
        check(hour, 23, "hour")?,
        check(minute, 59, "minute")?,
        check(second, 59, "second")?,
        check(micro, 999_999, "microsecond")?,
    );
    NaiveTime::from_hms_micro_opt(h, m, s, us)
        .ok_or_else(|| ExceptionInfo::value_error("invalid time"))
}

fn tzinfo(value: Option<&RawValue>) -> Result<Option<FixedOffset>, ExceptionInfo> {
    match value {
        None | Some(RawValue::None) => Ok(None),
        Some(RawValue::TimeZone(tz)) => Ok(Some(*tz)),
        Some(other) => Err(ExceptionInfo::type_error(format!(
            "tzinfo argument must be None or of a tzinfo subclass, not type '{}'",
            other.type_name()
        ))),
    }
}

fn new_datetime(
    positional: &[RawValue],
    keywords: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let args = Args::new("datetime", positional, keywords);
    args.max_positional(8)?;
    let date = make_date(
        expect_int(args.required(0, "year")?)?,
        expect_int(args.required(1, "month")?)?,
        expect_int(args.required(2, "day")?)?,
    )?;
    let time = make_time(
        args.int_or(3, "hour", 0)?,
        args.int_or(4, "minute", 0)?,
        args.int_or(5, "second", 0)?,
        args.int_or(6, "microsecond", 0)?,
    )?;
    Ok(RawValue::DateTime {
        naive: date.and_time(time),
        offset: tzinfo(args.get(7, "tzinfo"))?,
    })
}

fn new_date(
    positional: &[RawValue],
    keywords: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let args = Args::new("date", positional, keywords);
    args.max_positional(3)?;
    Ok(RawValue::Date(make_date(
        expect_int(args.required(0, "year")?)?,
        expect_int(args.required(1, "month")?)?,
        expect_int(args.required(2, "day")?)?,
    )?))
}

fn new_time(
    positional: &[RawValue],
    keywords: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let args = Args::new("time", positional, keywords);
    args.max_positional(5)?;
    if tzinfo(args.get(4, "tzinfo"))?.is_some() {
        return Err(ExceptionInfo::value_error("time objects with a tzinfo are not supported"));
    }
    Ok(RawValue::Time(make_time(
        args.int_or(0, "hour", 0)?,
        args.int_or(1, "minute", 0)?,
        args.int_or(2, "second", 0)?,
        args.int_or(3, "microsecond", 0)?,
    )?))
}

fn new_timedelta(
    positional: &[RawValue],
    keywords: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    const UNITS: [(&str, f64); 7] = [
        ("days", 86_400e6),
        ("seconds", 1e6),
        ("microseconds", 1.0),
        ("milliseconds", 1e3),
        ("minutes", 60e6),
        ("hours", 3_600e6),
        ("weeks", 604_800e6),
    ];
    let args = Args::new("timedelta", positional, keywords);
    args.max_positional(UNITS.len())?;
    args.allow_keywords(&UNITS.map(|(name, _)| name))?;
    let mut exact: i128 = 0;
    let mut fractional = 0.0f64;
    for (pos, (name, scale)) in UNITS.iter().enumerate() {
        match args.get(pos, name) {
            None => {}
            Some(RawValue::Int(i)) => exact += *i as i128 * (*scale as i128),
            Some(RawValue::Bool(b)) => exact += *b as i128 * (*scale as i128),
            Some(RawValue::Float(f)) => fractional += f * scale,
            Some(other) => {
                return Err(ExceptionInfo::type_error(format!(
                    "unsupported type for timedelta {} component: {}",
                    name,
                    other.type_name()
                )))
            }
        }
    }
    if !fractional.is_finite() || fractional.abs() > i64::MAX as f64 {
        return Err(out_of_range());
    }
    Ok(RawValue::TimeDelta(from_micros(exact + fractional.round() as i128)?))
}

fn new_timezone(
    positional: &[RawValue],
    keywords: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let args = Args::new("timezone", positional, keywords);
    args.max_positional(2)?;
    let offset = match args.required(0, "offset")? {
        RawValue::TimeDelta(d) => *d,
        other => {
            return Err(ExceptionInfo::type_error(format!(
                "timezone() argument 1 must be datetime.timedelta, not {}",
                other.type_name()
            )))
        }
    };
    let seconds = offset.num_seconds();
    i32::try_from(seconds)
        .ok()
        .and_then(FixedOffset::east_opt)
        .map(RawValue::TimeZone)
        .ok_or_else(|| {
            ExceptionInfo::value_error(
                "offset must be a timedelta strictly between -timedelta(hours=24) and timedelta(hours=24).",
            )
        })
}

// ============================================================================
// TIMEDELTA ARITHMETIC
// ============================================================================

fn out_of_range() -> ExceptionInfo {
    ExceptionInfo::overflow("date value out of range")
}

fn micros(d: &TimeDelta) -> i128 {
    d.num_seconds() as i128 * MICROS_PER_SECOND + (d.subsec_nanos() / 1_000) as i128
}

fn from_micros(us: i128) -> Result<TimeDelta, ExceptionInfo> {
    i64::try_from(us)
        .map(TimeDelta::microseconds)
        .map_err(|_| out_of_range())
}

/// Python's normalized `(days, seconds, microseconds)`.
fn components(d: &TimeDelta) -> (i64, i64, i64) {
    let us = micros(d);
    let days = us.div_euclid(MICROS_PER_DAY);
    let rest = us.rem_euclid(MICROS_PER_DAY);
    (
        days as i64,
        (rest / MICROS_PER_SECOND) as i64,
        (rest % MICROS_PER_SECOND) as i64,
    )
}

pub fn total_seconds(d: &TimeDelta) -> f64 {
    micros(d) as f64 / MICROS_PER_SECOND as f64
}

fn scale(d: &TimeDelta, factor: &RawValue) -> Option<Result<RawValue, ExceptionInfo>> {
    let us = micros(d);
    let scaled = match factor {
        RawValue::Int(_) | RawValue::Bool(_) => us.checked_mul(factor.as_int()? as i128),
        RawValue::Float(f) => {
            let v = (us as f64 * f).round();
            if v.is_finite() && v.abs() < i64::MAX as f64 {
                Some(v as i128)
            } else {
                None
            }
        }
        _ => return None,
    };
    Some(
        scaled
            .ok_or_else(out_of_range)
            .and_then(from_micros)
            .map(RawValue::TimeDelta),
    )
}

fn divide(
    d: &TimeDelta,
    divisor: &RawValue,
    floor: bool,
) -> Option<Result<RawValue, ExceptionInfo>> {
    let us = micros(d);
    let zero = || ExceptionInfo::zero_division("division by zero");
    Some(match divisor {
        RawValue::TimeDelta(other) => {
            let den = micros(other);
            if den == 0 {
                Err(zero())
            } else if floor {
                i64::try_from(floor_div(us, den))
                    .map(RawValue::Int)
                    .map_err(|_| out_of_range())
            } else {
                Ok(RawValue::Float(us as f64 / den as f64))
            }
        }
        RawValue::Int(_) | RawValue::Bool(_) => {
            let den = divisor.as_int()? as i128;
            if den == 0 {
                Err(zero())
            } else if floor {
                from_micros(floor_div(us, den)).map(RawValue::TimeDelta)
            } else {
                from_micros((us as f64 / den as f64).round() as i128).map(RawValue::TimeDelta)
            }
        }
        RawValue::Float(f) if !floor => {
            if *f == 0.0 {
                Err(zero())
            } else {
                from_micros((us as f64 / f).round() as i128).map(RawValue::TimeDelta)
            }
        }
        _ => return None,
    })
}

fn floor_div(a: i128, b: i128) -> i128 {
    let q = a / b;
    if (a % b != 0) && ((a < 0) != (b < 0)) {
        q - 1
    } else {
        q
    }
}

fn shift_datetime(
    naive: &NaiveDateTime,
    offset: &Option<FixedOffset>,
    delta: TimeDelta,
) -> Result<RawValue, ExceptionInfo> {
    let shifted = naive.checked_add_signed(delta).ok_or_else(out_of_range)?;
    if shifted.year() < 1 || shifted.year() > 9999 {
        return Err(out_of_range());
    }
    Ok(RawValue::DateTime {
        naive: shifted,
        offset: *offset,
    })
}

fn shift_date(
    date: &NaiveDate,
    delta: &TimeDelta,
    negate: bool,
) -> Result<RawValue, ExceptionInfo> {
    let (days, _, _) = components(delta);
    let days = if negate { -days } else { days };
    let shifted = TimeDelta::try_days(days)
        .and_then(|d| date.checked_add_signed(d))
        .ok_or_else(out_of_range)?;
    if shifted.year() < 1 || shifted.year() > 9999 {
        return Err(out_of_range());
    }
    Ok(RawValue::Date(shifted))
}

fn utc_naive(naive: &NaiveDateTime, offset: &FixedOffset) -> NaiveDateTime {
    *naive - TimeDelta::seconds(offset.local_minus_utc() as i64)
}

/// Arithmetic between date/time payloads and numbers. `None` means the
/// operand combination is not supported.
pub fn binary_op(
    op: BinOp,
    left: &RawValue,
    right: &RawValue,
) -> Option<Result<RawValue, ExceptionInfo>> {
    use RawValue::{Date, DateTime as Dt, TimeDelta as Td};
    match (op, left, right) {
        (BinOp::Add, Dt { naive, offset }, Td(d)) | (BinOp::Add, Td(d), Dt { naive, offset }) => {
            Some(shift_datetime(naive, offset, *d))
        }
        (BinOp::Sub, Dt { naive, offset }, Td(d)) => Some(shift_datetime(naive, offset, -*d)),
        (BinOp::Sub, Dt { naive: a, offset: oa }, Dt { naive: b, offset: ob }) => {
            Some(match (oa, ob) {
                (None, None) => Ok(Td(*a - *b)),
                (Some(x), Some(y)) => Ok(Td(utc_naive(a, x) - utc_naive(b, y))),
                _ => Err(ExceptionInfo::type_error(
                    "can't subtract offset-naive and offset-aware datetimes",
                )),
            })
        }
        (BinOp::Add, Date(x), Td(d)) | (BinOp::Add, Td(d), Date(x)) => {
            Some(shift_date(x, d, false))
        }
        (BinOp::Sub, Date(x), Td(d)) => Some(shift_date(x, d, true)),
        (BinOp::Sub, Date(a), Date(b)) => Some(Ok(Td(a.signed_duration_since(*b)))),
        (BinOp::Add, Td(a), Td(b)) => Some(a.checked_add(b).map(Td).ok_or_else(out_of_range)),
        (BinOp::Sub, Td(a), Td(b)) => Some(a.checked_sub(b).map(Td).ok_or_else(out_of_range)),
        (BinOp::Mult, Td(d), n) | (BinOp::Mult, n, Td(d)) => scale(d, n),
        (BinOp::Div, Td(d), n) => divide(d, n, false),
        (BinOp::FloorDiv, Td(d), n) => divide(d, n, true),
        (BinOp::Mod, Td(a), Td(b)) => {
            let den = micros(b);
            if den == 0 {
                return Some(Err(ExceptionInfo::zero_division("integer modulo by zero")));
            }
            let us = micros(a);
            Some(from_micros(us - floor_div(us, den) * den).map(Td))
        }
        _ => None,
    }
}

// ============================================================================
// COMPARISON & RENDERING
// ============================================================================

/// Naive and aware datetimes are not comparable.
pub fn compare_datetimes(left: &RawValue, right: &RawValue) -> Option<Ordering> {
    match (left, right) {
        (
            RawValue::DateTime { naive: a, offset: None },
            RawValue::DateTime { naive: b, offset: None },
        ) => Some(a.cmp(b)),
        (
            RawValue::DateTime { naive: a, offset: Some(x) },
            RawValue::DateTime { naive: b, offset: Some(y) },
        ) => Some(utc_naive(a, x).cmp(&utc_naive(b, y))),
        _ => None,
    }
}

fn offset_suffix(offset: &FixedOffset) -> String {
    let secs = offset.local_minus_utc();
    let sign = if secs < 0 { '-' } else { '+' };
    let secs = secs.abs();
    let mut out = format!("{}{:02}:{:02}", sign, secs / 3600, (secs % 3600) / 60);
    if secs % 60 != 0 {
        let _ = write!(out, ":{:02}", secs % 60);
    }
    out
}

fn time_iso(t: &NaiveTime) -> String {
    let mut out = format!("{:02}:{:02}:{:02}", t.hour(), t.minute(), t.second());
    let us = microsecond(t);
    if us != 0 {
        let _ = write!(out, ".{:06}", us);
    }
    out
}

fn render_isoformat(raw: &RawValue, sep: &str) -> String {
    match raw {
        RawValue::DateTime { naive, offset } => {
            let date = naive.date().format("%Y-%m-%d");
            let mut out = format!("{}{}{}", date, sep, time_iso(&naive.time()));
            if let Some(o) = offset {
                out.push_str(&offset_suffix(o));
            }
            out
        }
        RawValue::Date(d) => d.format("%Y-%m-%d").to_string(),
        RawValue::Time(t) => time_iso(t),
        other => other.py_str(),
    }
}

pub fn isoformat(raw: &RawValue) -> String {
    render_isoformat(raw, "T")
}

/// `str(x)` for date/time payloads.
pub fn render_str(raw: &RawValue) -> String {
    match raw {
        RawValue::DateTime { .. } => render_isoformat(raw, " "),
        RawValue::TimeDelta(d) => {
            let (days, seconds, micros) = components(d);
            let mut out = String::new();
            if days != 0 {
                let plural = if days.abs() != 1 { "s" } else { "" };
                let _ = write!(out, "{} day{}, ", days, plural);
            }
            let (hours, minutes) = (seconds / 3600, (seconds % 3600) / 60);
            let _ = write!(out, "{}:{:02}:{:02}", hours, minutes, seconds % 60);
            if micros != 0 {
                let _ = write!(out, ".{:06}", micros);
            }
            out
        }
        RawValue::TimeZone(tz) => {
            if tz.local_minus_utc() == 0 {
                "UTC".to_string()
            } else {
                format!("UTC{}", offset_suffix(tz))
            }
        }
        other => render_isoformat(other, "T"),
    }
}

fn time_fields_repr(t: &NaiveTime) -> String {
    let mut out = format!("{}, {}", t.hour(), t.minute());
    let us = microsecond(t);
    if t.second() != 0 || us != 0 {
        let _ = write!(out, ", {}", t.second());
    }
    if us != 0 {
        let _ = write!(out, ", {}", us);
    }
    out
}

fn timezone_repr(tz: &FixedOffset) -> String {
    if tz.local_minus_utc() == 0 {
        "datetime.timezone.utc".to_string()
    } else {
        format!(
            "datetime.timezone({})",
            render_repr(&RawValue::TimeDelta(TimeDelta::seconds(tz.local_minus_utc() as i64)))
        )
    }
}

/// `repr(x)` for date/time payloads.
pub fn render_repr(raw: &RawValue) -> String {
    match raw {
        RawValue::DateTime { naive, offset } => {
            let d = naive.date();
            let mut out = format!(
                "datetime.datetime({}, {}, {}, {}",
                d.year(),
                d.month(),
                d.day(),
                time_fields_repr(&naive.time())
            );
            if let Some(tz) = offset {
                let _ = write!(out, ", tzinfo={}", timezone_repr(tz));
            }
            out.push(')');
            out
        }
        RawValue::Date(d) => format!("datetime.date({}, {}, {})", d.year(), d.month(), d.day()),
        RawValue::Time(t) => format!("datetime.time({})", time_fields_repr(t)),
        RawValue::TimeDelta(d) => {
            let (days, seconds, micros) = components(d);
            let fields = [("days", days), ("seconds", seconds), ("microseconds", micros)];
            let parts: Vec<String> = fields
                .iter()
                .filter(|(_, v)| *v != 0)
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            if parts.is_empty() {
                "datetime.timedelta(0)".to_string()
            } else {
                format!("datetime.timedelta({})", parts.join(", "))
            }
        }
        RawValue::TimeZone(tz) => timezone_repr(tz),
        other => other.py_repr(),
    }
}

/// Python directives to chrono: `%f` is microseconds in Python.
fn translate_format(fmt: &str) -> String {
    let mut out = String::with_capacity(fmt.len());
    let mut chars = fmt.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('f') => out.push_str("%6f"),
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    out
}

fn checked_items(fmt: &str) -> Result<Vec<Item<'_>>, ExceptionInfo> {
    let items: Vec<Item<'_>> = StrftimeItems::new(fmt).collect();
    if items.iter().any(|i| matches!(i, Item::Error)) {
        return Err(ExceptionInfo::value_error(format!("Invalid format string '{}'", fmt)));
    }
    Ok(items)
}

pub fn strftime(raw: &RawValue, fmt: &str) -> Result<String, ExceptionInfo> {
    let translated = translate_format(fmt);
    let items = checked_items(&translated)?;
    let mut out = String::new();
    let written = match raw {
        RawValue::DateTime {
            naive,
            offset: Some(tz),
        } => match tz.from_local_datetime(naive).single() {
            Some(dt) => write!(out, "{}", dt.format_with_items(items.iter())),
            None => return Err(out_of_range()),
        },
        RawValue::DateTime { naive, offset: None } => {
            write!(out, "{}", naive.format_with_items(items.iter()))
        }
        RawValue::Date(d) => write!(out, "{}", d.format_with_items(items.iter())),
        RawValue::Time(t) => write!(out, "{}", t.format_with_items(items.iter())),
        other => {
            return Err(ExceptionInfo::attribute_error(format!(
                "'{}' object has no attribute 'strftime'",
                other.type_name()
            )))
        }
    };
    written.map_err(|_| {
        let message = format!("format '{}' does not apply to {}", fmt, raw.type_name());
        ExceptionInfo::value_error(message)
    })?;
    Ok(out)
}

// ============================================================================
// METHODS
// ============================================================================

fn strftime_method(
    name: &str,
    positional: &[RawValue],
    keywords: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let args = Args::new(name, positional, keywords);
    args.max_positional(2)?;
    let receiver = args.required(0, "self")?;
    let fmt = args.str(1, "format")?;
    strftime(receiver, fmt).map(RawValue::Str)
}

fn isoformat_method(
    positional: &[RawValue],
    keywords: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let args = Args::new("isoformat", positional, keywords);
    args.max_positional(2)?;
    let receiver = args.required(0, "self")?;
    let sep = match args.get(1, "sep") {
        Some(_) => args.str(1, "sep")?,
        None => "T",
    };
    Ok(RawValue::Str(render_isoformat(receiver, sep)))
}

fn replace_method(
    positional: &[RawValue],
    keywords: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let args = Args::new("replace", positional, keywords);
    args.max_positional(1)?;
    let field = |name: &str, current: u32| -> Result<i64, ExceptionInfo> {
        match keywords.get(name) {
            Some(v) => expect_int(v),
            None => Ok(current as i64),
        }
    };
    match args.required(0, "self")? {
        RawValue::DateTime { naive, offset } => {
            args.allow_keywords(&[
                "year", "month", "day", "hour", "minute", "second", "microsecond", "tzinfo",
            ])?;
            let (d, t) = (naive.date(), naive.time());
            let date = make_date(
                field("year", d.year() as u32)?,
                field("month", d.month())?,
                field("day", d.day())?,
            )?;
            let time = make_time(
                field("hour", t.hour())?,
                field("minute", t.minute())?,
                field("second", t.second())?,
                field("microsecond", microsecond(&t))?,
            )?;
            let offset = match keywords.get("tzinfo") {
                Some(v) => tzinfo(Some(v))?,
                None => *offset,
            };
            Ok(RawValue::DateTime {
                naive: date.and_time(time),
                offset,
            })
        }
        RawValue::Date(d) => {
            args.allow_keywords(&["year", "month", "day"])?;
            Ok(RawValue::Date(make_date(
                field("year", d.year() as u32)?,
                field("month", d.month())?,
                field("day", d.day())?,
            )?))
        }
        RawValue::Time(t) => {
            args.allow_keywords(&["hour", "minute", "second", "microsecond"])?;
            Ok(RawValue::Time(make_time(
                field("hour", t.hour())?,
                field("minute", t.minute())?,
                field("second", t.second())?,
                field("microsecond", microsecond(t))?,
            )?))
        }
        other => Err(descriptor_error("replace", "datetime", other)),
    }
}

fn datetime_date(
    positional: &[RawValue],
    keywords: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let args = Args::new("date", positional, keywords);
    args.max_positional(1)?;
    match args.required(0, "self")? {
        RawValue::DateTime { naive, .. } => Ok(RawValue::Date(naive.date())),
        other => Err(descriptor_error("date", "datetime", other)),
    }
}

fn datetime_time(
    positional: &[RawValue],
    keywords: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let args = Args::new("time", positional, keywords);
    args.max_positional(1)?;
    match args.required(0, "self")? {
        RawValue::DateTime { naive, .. } => Ok(RawValue::Time(naive.time())),
        other => Err(descriptor_error("time", "datetime", other)),
    }
}

fn weekday_method(
    name: &str,
    positional: &[RawValue],
    keywords: &IndexMap<String, RawValue>,
    base: i64,
) -> Result<RawValue, ExceptionInfo> {
    let args = Args::new(name, positional, keywords);
    args.max_positional(1)?;
    let date = match args.required(0, "self")? {
        RawValue::DateTime { naive, .. } => naive.date(),
        RawValue::Date(d) => *d,
        other => return Err(descriptor_error(name, "date", other)),
    };
    Ok(RawValue::Int(date.weekday().num_days_from_monday() as i64 + base))
}

fn utcoffset_method(
    positional: &[RawValue],
    keywords: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let args = Args::new("utcoffset", positional, keywords);
    args.max_positional(1)?;
    match args.required(0, "self")? {
        RawValue::DateTime { offset: Some(tz), .. } => Ok(RawValue::TimeDelta(TimeDelta::seconds(
            tz.local_minus_utc() as i64,
        ))),
        RawValue::DateTime { offset: None, .. } => Ok(RawValue::None),
        other => Err(descriptor_error("utcoffset", "datetime", other)),
    }
}

fn astimezone_method(
    positional: &[RawValue],
    keywords: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let args = Args::new("astimezone", positional, keywords);
    args.max_positional(2)?;
    let target = tzinfo(args.get(1, "tz"))?
        .ok_or_else(|| ExceptionInfo::value_error("astimezone() requires a target timezone"))?;
    match args.required(0, "self")? {
        RawValue::DateTime { naive, offset: Some(tz) } => {
            let utc = utc_naive(naive, tz);
            Ok(RawValue::DateTime {
                naive: utc + TimeDelta::seconds(target.local_minus_utc() as i64),
                offset: Some(target),
            })
        }
        RawValue::DateTime { offset: None, .. } => Err(ExceptionInfo::value_error(
            "astimezone() cannot be applied to a naive datetime",
        )),
        other => Err(descriptor_error("astimezone", "datetime", other)),
    }
}

fn timezone_method(
    name: &str,
    positional: &[RawValue],
    keywords: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let args = Args::new(name, positional, keywords);
    args.max_positional(2)?;
    let tz = match args.required(0, "self")? {
        RawValue::TimeZone(tz) => *tz,
        other => return Err(descriptor_error(name, "timezone", other)),
    };
    Ok(match name {
        "utcoffset" => RawValue::TimeDelta(TimeDelta::seconds(tz.local_minus_utc() as i64)),
        "tzname" => RawValue::Str(render_str(&RawValue::TimeZone(tz))),
        _ => RawValue::None,
    })
}

/// Which class a class method was invoked on.
fn class_name(receiver: &RawValue) -> &str {
    match receiver {
        RawValue::Callable { name, .. } => name,
        _ => "datetime",
    }
}

fn strptime(
    positional: &[RawValue],
    keywords: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let args = Args::new("strptime", positional, keywords);
    args.max_positional(3)?;
    let text = args.str(1, "date_string")?;
    let fmt = args.str(2, "format")?;
    let mismatch = || {
        ExceptionInfo::value_error(format!(
            "time data {} does not match format {}",
            crate::raw::repr_str(text),
            crate::raw::repr_str(fmt)
        ))
    };
    let translated = translate_format(fmt);
    let items = checked_items(&translated)?;
    let mut parsed = Parsed::new();
    parse(&mut parsed, text, items.iter()).map_err(|_| mismatch())?;
    let date = match parsed.to_naive_date() {
        Ok(d) => d,
        Err(_) => {
            // Missing fields default to 1900-01-01; fields already set keep their value.
            let mut defaults = parsed.clone();
            let _ = defaults.set_year(1900);
            let _ = defaults.set_month(1);
            let _ = defaults.set_day(1);
            defaults.to_naive_date().map_err(|_| mismatch())?
        }
    };
    let time = parsed.to_naive_time().unwrap_or(NaiveTime::MIN);
    let offset = parsed.to_fixed_offset().ok();
    Ok(RawValue::DateTime {
        naive: date.and_time(time),
        offset,
    })
}

fn fromisoformat(
    positional: &[RawValue],
    keywords: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let args = Args::new("fromisoformat", positional, keywords);
    args.max_positional(2)?;
    let class = class_name(args.required(0, "cls")?);
    let text = args.str(1, "date_string")?;
    let invalid = || {
        ExceptionInfo::value_error(format!(
            "Invalid isoformat string: {}",
            crate::raw::repr_str(text)
        ))
    };
    match class {
        "date" => NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .map(RawValue::Date)
            .map_err(|_| invalid()),
        "time" => ["%H:%M:%S%.f", "%H:%M:%S", "%H:%M"]
            .iter()
            .find_map(|f| NaiveTime::parse_from_str(text, f).ok())
            .map(RawValue::Time)
            .ok_or_else(invalid),
        _ => parse_iso_datetime(text).ok_or_else(invalid),
    }
}

fn parse_iso_datetime(text: &str) -> Option<RawValue> {
    let normalized = text.replacen(' ', "T", 1).replace('Z', "+00:00");
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f%:z", "%Y-%m-%dT%H:%M%:z"] {
        if let Ok(dt) = DateTime::parse_from_str(&normalized, fmt) {
            return Some(RawValue::DateTime {
                naive: dt.naive_local(),
                offset: Some(*dt.offset()),
            });
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&normalized, fmt) {
            return Some(RawValue::DateTime { naive, offset: None });
        }
    }
    NaiveDate::parse_from_str(&normalized, "%Y-%m-%d")
        .ok()
        .map(|d| RawValue::DateTime {
            naive: d.and_time(NaiveTime::MIN),
            offset: None,
        })
}

fn combine(
    positional: &[RawValue],
    keywords: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let args = Args::new("combine", positional, keywords);
    args.max_positional(4)?;
    let date = match args.required(1, "date")? {
        RawValue::Date(d) => *d,
        RawValue::DateTime { naive, .. } => naive.date(),
        other => {
            return Err(ExceptionInfo::type_error(format!(
                "combine() argument 1 must be datetime.date, not {}",
                other.type_name()
            )))
        }
    };
    let time = match args.required(2, "time")? {
        RawValue::Time(t) => *t,
        other => {
            return Err(ExceptionInfo::type_error(format!(
                "combine() argument 2 must be datetime.time, not {}",
                other.type_name()
            )))
        }
    };
    Ok(RawValue::DateTime {
        naive: date.and_time(time),
        offset: tzinfo(args.get(3, "tzinfo"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kw(pairs: &[(&str, RawValue)]) -> IndexMap<String, RawValue> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn dt(y: i64, m: i64, d: i64, h: i64, mi: i64) -> RawValue {
        new_datetime(
            &[y.into(), m.into(), d.into(), h.into(), mi.into()],
            &IndexMap::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_datetime_rendering() {
        let v = dt(2024, 5, 17, 9, 30);
        assert_eq!(v.py_str(), "2024-05-17 09:30:00");
        assert_eq!(v.py_repr(), "datetime.datetime(2024, 5, 17, 9, 30)");
        assert_eq!(isoformat(&v), "2024-05-17T09:30:00");
        assert_eq!(strftime(&v, "%d/%m/%Y %H:%M").unwrap(), "17/05/2024 09:30");
    }

    #[test]
    fn test_invalid_dates() {
        let ymd = |y, m, d| [RawValue::Int(y), RawValue::Int(m), RawValue::Int(d)];
        let err = new_datetime(&ymd(2024, 13, 1), &IndexMap::new()).unwrap_err();
        assert_eq!(err.message, "month must be in 1..12");
        let err = new_date(&ymd(2023, 2, 29), &IndexMap::new()).unwrap_err();
        assert_eq!(err.message, "day is out of range for month");
    }

    #[test]
    fn test_timedelta_normalization() {
        let td = new_timedelta(&[], &kw(&[("hours", RawValue::Int(-1))])).unwrap();
        assert_eq!(td.py_str(), "-1 day, 23:00:00");
        assert_eq!(td.py_repr(), "datetime.timedelta(days=-1, seconds=82800)");
        assert_eq!(host_attr(&td, "days"), Some(RawValue::Int(-1)));
        let td = new_timedelta(&[RawValue::Float(1.5)], &IndexMap::new()).unwrap();
        assert_eq!(td.py_str(), "1 day, 12:00:00");
        let zero = new_timedelta(&[], &IndexMap::new()).unwrap();
        assert_eq!(zero.py_repr(), "datetime.timedelta(0)");
    }

    #[test]
    fn test_datetime_arithmetic() {
        let start = dt(2024, 2, 28, 12, 0);
        let day = new_timedelta(&[RawValue::Int(1)], &IndexMap::new()).unwrap();
        let next = binary_op(BinOp::Add, &start, &day).unwrap().unwrap();
        assert_eq!(next.py_str(), "2024-02-29 12:00:00");
        let back = binary_op(BinOp::Add, &day, &next).unwrap().unwrap();
        assert_eq!(back.py_str(), "2024-03-01 12:00:00");
        let diff = binary_op(BinOp::Sub, &back, &start).unwrap().unwrap();
        assert_eq!(diff.py_str(), "2 days, 0:00:00");
        let doubled = binary_op(BinOp::Mult, &RawValue::Int(2), &day).unwrap().unwrap();
        assert_eq!(total_seconds(match &doubled {
            RawValue::TimeDelta(d) => d,
            other => panic!("Expected timedelta, got {:?}", other),
        }), 172_800.0);
        let ratio = binary_op(BinOp::Div, &doubled, &day).unwrap().unwrap();
        assert_eq!(ratio, RawValue::Float(2.0));
        assert!(binary_op(BinOp::Add, &start, &RawValue::Int(1)).is_none());
    }

    #[test]
    fn test_naive_aware_mismatch() {
        let utc = class_attr("timezone", "utc").unwrap();
        let aware = new_datetime(
            &[RawValue::Int(2024), RawValue::Int(1), RawValue::Int(1)],
            &kw(&[("tzinfo", utc)]),
        )
        .unwrap();
        let naive = dt(2024, 1, 1, 0, 0);
        assert_eq!(compare_datetimes(&aware, &naive), None);
        let err = binary_op(BinOp::Sub, &aware, &naive).unwrap().unwrap_err();
        assert_eq!(err.message, "can't subtract offset-naive and offset-aware datetimes");
        assert_eq!(aware.py_str(), "2024-01-01 00:00:00+00:00");
    }

    #[test]
    fn test_parsing() {
        let cls = RawValue::Callable { name: "datetime".into(), is_class: true };
        let parsed = strptime(
            &[cls.clone(), "2024-05-17 08:15".into(), "%Y-%m-%d %H:%M".into()],
            &IndexMap::new(),
        )
        .unwrap();
        assert_eq!(parsed, dt(2024, 5, 17, 8, 15));
        let iso = fromisoformat(&[cls, "2024-05-17T08:15:00".into()], &IndexMap::new()).unwrap();
        assert_eq!(iso, parsed);
        let date_cls = RawValue::Callable { name: "date".into(), is_class: true };
        let d = fromisoformat(&[date_cls, "2024-05-17".into()], &IndexMap::new()).unwrap();
        assert_eq!(d.py_repr(), "datetime.date(2024, 5, 17)");
        assert_eq!(
            weekday_method("weekday", &[d], &IndexMap::new(), 0).unwrap(),
            RawValue::Int(4)
        );
    }

    #[test]
    fn test_bad_strftime_directive() {
        let v = dt(2024, 1, 1, 0, 0);
        assert!(strftime(&v, "%Q").is_err());
    }
}
