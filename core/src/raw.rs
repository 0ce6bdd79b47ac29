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

//! Host-side values.
//!
//! A [`RawValue`] is what crosses the boundary into builtins and opaque tools:
//! plain data with no provenance attached. Rendering follows the modeled
//! language (`str()`/`repr()`), so text shown in the tool-call chain matches
//! what the code-generating model expects to see.

use crate::datetime;
use crate::exception::{ErrorKind, ExceptionInfo};
use crate::operators::MAX_SEQUENCE_LEN;
use chrono::{FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone)]
pub enum RawValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<RawValue>),
    Tuple(Vec<RawValue>),
    Set(Vec<RawValue>),
    /// Insertion-ordered pairs; keys are unique under [`RawValue::py_eq`].
    Dict(Vec<(RawValue, RawValue)>),
    Instance {
        class_name: String,
        fields: IndexMap<String, RawValue>,
    },
    Exception {
        kind: ErrorKind,
        message: String,
    },
    DateTime {
        naive: NaiveDateTime,
        offset: Option<FixedOffset>,
    },
    Date(NaiveDate),
    Time(NaiveTime),
    TimeDelta(TimeDelta),
    TimeZone(FixedOffset),
    Callable {
        name: String,
        is_class: bool,
    },
    /// Placeholder for a container already being converted (self-reference).
    Ellipsis,
}

impl RawValue {
    pub fn str(s: impl Into<String>) -> Self {
        RawValue::Str(s.into())
    }

    pub fn str_list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RawValue::List(items.into_iter().map(|s| RawValue::Str(s.into())).collect())
    }

    /// Builds a set, dropping duplicates.
    pub fn set_from(items: impl IntoIterator<Item = RawValue>) -> Self {
        let mut out: Vec<RawValue> = Vec::new();
        for item in items {
            if !out.iter().any(|x| x.py_eq(&item)) {
                out.push(item);
            }
        }
        RawValue::Set(out)
    }

    /// Builds a dict; a repeated key keeps its first position and the last value.
    pub fn dict_from(pairs: impl IntoIterator<Item = (RawValue, RawValue)>) -> Self {
        let mut out: Vec<(RawValue, RawValue)> = Vec::new();
        for (k, v) in pairs {
            match out.iter_mut().find(|(x, _)| x.py_eq(&k)) {
                Some(slot) => slot.1 = v,
                None => out.push((k, v)),
            }
        }
        RawValue::Dict(out)
    }

    pub fn type_name(&self) -> String {
        match self {
            RawValue::None => "NoneType".into(),
            RawValue::Bool(_) => "bool".into(),
            RawValue::Int(_) => "int".into(),
            RawValue::Float(_) => "float".into(),
            RawValue::Str(_) => "str".into(),
            RawValue::List(_) => "list".into(),
            RawValue::Tuple(_) => "tuple".into(),
            RawValue::Set(_) => "set".into(),
            RawValue::Dict(_) => "dict".into(),
            RawValue::Instance { class_name, .. } => class_name.clone(),
            RawValue::Exception { kind, .. } => kind.name().to_string(),
            RawValue::DateTime { .. } => "datetime".into(),
            RawValue::Date(_) => "date".into(),
            RawValue::Time(_) => "time".into(),
            RawValue::TimeDelta(_) => "timedelta".into(),
            RawValue::TimeZone(_) => "timezone".into(),
            RawValue::Callable { is_class: true, .. } => "type".into(),
            RawValue::Callable { .. } => "builtin_function_or_method".into(),
            RawValue::Ellipsis => "ellipsis".into(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            RawValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view; `bool` counts as an integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            RawValue::Bool(b) => Some(*b as i64),
            RawValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            RawValue::Bool(b) => Some(*b as i64 as f64),
            RawValue::Int(i) => Some(*i as f64),
            RawValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, RawValue::Bool(_) | RawValue::Int(_) | RawValue::Float(_))
    }

    /// The elements iteration would produce, or `None` if not iterable.
    pub fn iter_items(&self) -> Option<Vec<RawValue>> {
        match self {
            RawValue::Str(s) => Some(s.chars().map(|c| RawValue::Str(c.to_string())).collect()),
            RawValue::List(items) | RawValue::Tuple(items) | RawValue::Set(items) => {
                Some(items.clone())
            }
            RawValue::Dict(pairs) => Some(pairs.iter().map(|(k, _)| k.clone()).collect()),
            _ => None,
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            RawValue::None => false,
            RawValue::Bool(b) => *b,
            RawValue::Int(i) => *i != 0,
            RawValue::Float(f) => *f != 0.0,
            RawValue::Str(s) => !s.is_empty(),
            RawValue::List(v) | RawValue::Tuple(v) | RawValue::Set(v) => !v.is_empty(),
            RawValue::Dict(v) => !v.is_empty(),
            RawValue::TimeDelta(d) => !d.is_zero(),
            _ => true,
        }
    }

    // ─── Equality & Ordering ─────────────────────────────────────────────

    /// Structural equality with numeric promotion (`1 == 1.0 == True`).
    pub fn py_eq(&self, other: &RawValue) -> bool {
        use RawValue::*;
        match (self, other) {
            (None, None) | (Ellipsis, Ellipsis) => true,
            (Int(a), Int(b)) => a == b,
            (a, b) if a.is_number() && b.is_number() => match (a.as_int(), b.as_int()) {
                (Some(x), Some(y)) => x == y,
                _ => a.as_float() == b.as_float(),
            },
            (Str(a), Str(b)) => a == b,
            (List(a), List(b)) | (Tuple(a), Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.py_eq(y))
            }
            (Set(a), Set(b)) => {
                a.len() == b.len() && a.iter().all(|x| b.iter().any(|y| x.py_eq(y)))
            }
            (Dict(a), Dict(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| {
                        b.iter().any(|(k2, v2)| k.py_eq(k2) && v.py_eq(v2))
                    })
            }
            (
                Instance { class_name: c1, fields: f1 },
                Instance { class_name: c2, fields: f2 },
            ) => {
                c1 == c2
                    && f1.len() == f2.len()
                    && f1
                        .iter()
                        .all(|(k, v)| f2.get(k).map_or(false, |v2| v.py_eq(v2)))
            }
            (Exception { kind: k1, message: m1 }, Exception { kind: k2, message: m2 }) => {
                k1 == k2 && m1 == m2
            }
            (DateTime { .. }, DateTime { .. }) => {
                datetime::compare_datetimes(self, other) == Some(Ordering::Equal)
            }
            (Date(a), Date(b)) => a == b,
            (Time(a), Time(b)) => a == b,
            (TimeDelta(a), TimeDelta(b)) => a == b,
            (TimeZone(a), TimeZone(b)) => a == b,
            (Callable { name: a, is_class: x }, Callable { name: b, is_class: y }) => {
                a == b && x == y
            }
            _ => false,
        }
    }

    /// Ordering for the totally ordered kinds; `None` when the pair is not
    /// comparable.
    pub fn py_cmp(&self, other: &RawValue) -> Option<Ordering> {
        use RawValue::*;
        match (self, other) {
            (a, b) if a.is_number() && b.is_number() => match (a.as_int(), b.as_int()) {
                (Some(x), Some(y)) => Some(x.cmp(&y)),
                _ => a.as_float()?.partial_cmp(&b.as_float()?),
            },
            (Str(a), Str(b)) => Some(a.cmp(b)),
            (List(a), List(b)) | (Tuple(a), Tuple(b)) => {
                for (x, y) in a.iter().zip(b) {
                    if !x.py_eq(y) {
                        return x.py_cmp(y);
                    }
                }
                Some(a.len().cmp(&b.len()))
            }
            (DateTime { .. }, DateTime { .. }) => datetime::compare_datetimes(self, other),
            (Date(a), Date(b)) => Some(a.cmp(b)),
            (Time(a), Time(b)) => Some(a.cmp(b)),
            (TimeDelta(a), TimeDelta(b)) => Some(a.cmp(b)),
            _ => Option::None,
        }
    }

    pub fn py_hash(&self) -> Result<i64, ExceptionInfo> {
        match self {
            RawValue::List(_) | RawValue::Set(_) | RawValue::Dict(_) => Err(
                ExceptionInfo::type_error(format!("unhashable type: '{}'", self.type_name())),
            ),
            RawValue::Bool(b) => Ok(*b as i64),
            RawValue::Int(i) => Ok(*i),
            RawValue::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(*f as i64),
            RawValue::Tuple(items) => {
                let mut hasher = DefaultHasher::new();
                for item in items {
                    item.py_hash()?.hash(&mut hasher);
                }
                Ok(hasher.finish() as i64)
            }
            _ => {
                let mut hasher = DefaultHasher::new();
                self.py_repr().hash(&mut hasher);
                Ok(hasher.finish() as i64)
            }
        }
    }

    // ─── Rendering ───────────────────────────────────────────────────────

    /// `str(x)`.
    pub fn py_str(&self) -> String {
        match self {
            RawValue::Str(s) => s.clone(),
            RawValue::Exception { message, .. } => message.clone(),
            RawValue::DateTime { .. }
            | RawValue::Date(_)
            | RawValue::Time(_)
            | RawValue::TimeDelta(_)
            | RawValue::TimeZone(_) => datetime::render_str(self),
            _ => self.py_repr(),
        }
    }

    /// `repr(x)`.
    pub fn py_repr(&self) -> String {
        match self {
            RawValue::None => "None".into(),
            RawValue::Bool(true) => "True".into(),
            RawValue::Bool(false) => "False".into(),
            RawValue::Int(i) => i.to_string(),
            RawValue::Float(f) => format_float(*f),
            RawValue::Str(s) => repr_str(s),
            RawValue::List(items) => format!("[{}]", join_repr(items)),
            RawValue::Tuple(items) if items.len() == 1 => format!("({},)", items[0].py_repr()),
            RawValue::Tuple(items) => format!("({})", join_repr(items)),
            RawValue::Set(items) if items.is_empty() => "set()".into(),
            RawValue::Set(items) => format!("{{{}}}", join_repr(items)),
            RawValue::Dict(pairs) => {
                let parts: Vec<String> = pairs
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.py_repr(), v.py_repr()))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            RawValue::Instance { class_name, fields } => {
                let parts: Vec<String> = fields
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v.py_repr()))
                    .collect();
                format!("{}({})", class_name, parts.join(", "))
            }
            RawValue::Exception { kind, message } => {
                format!("{}({})", kind.name(), repr_str(message))
            }
            RawValue::DateTime { .. }
            | RawValue::Date(_)
            | RawValue::Time(_)
            | RawValue::TimeDelta(_)
            | RawValue::TimeZone(_) => datetime::render_repr(self),
            RawValue::Callable { name, is_class: true } => format!("<class '{}'>", name),
            RawValue::Callable { name, .. } => format!("<built-in function {}>", name),
            RawValue::Ellipsis => "...".into(),
        }
    }

    /// `ascii(x)`: `repr` with non-ASCII characters escaped.
    pub fn py_ascii(&self) -> String {
        let mut out = String::new();
        for c in self.py_repr().chars() {
            if c.is_ascii() {
                out.push(c);
            } else if (c as u32) <= 0xff {
                out.push_str(&format!("\\x{:02x}", c as u32));
            } else if (c as u32) <= 0xffff {
                out.push_str(&format!("\\u{:04x}", c as u32));
            } else {
                out.push_str(&format!("\\U{:08x}", c as u32));
            }
        }
        out
    }

    /// `format(x, spec)`.
    pub fn format_with_spec(&self, spec: &str) -> Result<String, ExceptionInfo> {
        if spec.is_empty() {
            return Ok(self.py_str());
        }
        match self {
            RawValue::DateTime { .. } | RawValue::Date(_) | RawValue::Time(_) => {
                datetime::strftime(self, spec)
            }
            RawValue::Str(_) | RawValue::Bool(_) | RawValue::Int(_) | RawValue::Float(_) => {
                let parsed = FormatSpec::parse(spec)?;
                parsed.apply(self)
            }
            _ => Err(ExceptionInfo::type_error(format!(
                "unsupported format string passed to {}.__format__",
                self.type_name()
            ))),
        }
    }

    // ─── JSON ────────────────────────────────────────────────────────────

    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            RawValue::None | RawValue::Ellipsis => J::Null,
            RawValue::Bool(b) => J::Bool(*b),
            RawValue::Int(i) => J::from(*i),
            RawValue::Float(f) => serde_json::Number::from_f64(*f).map_or(J::Null, J::Number),
            RawValue::Str(s) => J::String(s.clone()),
            RawValue::List(items) | RawValue::Tuple(items) | RawValue::Set(items) => {
                J::Array(items.iter().map(RawValue::to_json).collect())
            }
            RawValue::Dict(pairs) => J::Object(
                pairs
                    .iter()
                    .map(|(k, v)| (k.py_str(), v.to_json()))
                    .collect(),
            ),
            RawValue::Instance { fields, .. } => J::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            RawValue::Exception { kind, message } => serde_json::json!({
                "type": kind.name(),
                "message": message,
            }),
            RawValue::DateTime { .. } | RawValue::Date(_) | RawValue::Time(_) => {
                J::String(datetime::isoformat(self))
            }
            RawValue::TimeDelta(d) => {
                serde_json::Number::from_f64(datetime::total_seconds(d)).map_or(J::Null, J::Number)
            }
            RawValue::TimeZone(_) | RawValue::Callable { .. } => J::String(self.py_str()),
        }
    }

    pub fn from_json(json: &serde_json::Value) -> RawValue {
        use serde_json::Value as J;
        match json {
            J::Null => RawValue::None,
            J::Bool(b) => RawValue::Bool(*b),
            J::Number(n) => match n.as_i64() {
                Some(i) => RawValue::Int(i),
                None => RawValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            J::String(s) => RawValue::Str(s.clone()),
            J::Array(items) => RawValue::List(items.iter().map(RawValue::from_json).collect()),
            J::Object(map) => RawValue::Dict(
                map.iter()
                    .map(|(k, v)| (RawValue::Str(k.clone()), RawValue::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl PartialEq for RawValue {
    fn eq(&self, other: &Self) -> bool {
        self.py_eq(other)
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.py_str())
    }
}

impl Serialize for RawValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<bool> for RawValue {
    fn from(b: bool) -> Self {
        RawValue::Bool(b)
    }
}

impl From<i64> for RawValue {
    fn from(i: i64) -> Self {
        RawValue::Int(i)
    }
}

impl From<f64> for RawValue {
    fn from(f: f64) -> Self {
        RawValue::Float(f)
    }
}

impl From<&str> for RawValue {
    fn from(s: &str) -> Self {
        RawValue::Str(s.to_string())
    }
}

impl From<String> for RawValue {
    fn from(s: String) -> Self {
        RawValue::Str(s)
    }
}

fn join_repr(items: &[RawValue]) -> String {
    items.iter().map(RawValue::py_repr).collect::<Vec<_>>().join(", ")
}

/// Shortest round-trip float rendering, switching to scientific notation
/// outside `1e-4 <= |x| < 1e16`.
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "nan".into();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf".into() } else { "-inf".into() };
    }
    if f == 0.0 {
        return if f.is_sign_negative() { "-0.0".into() } else { "0.0".into() };
    }
    let sci = format!("{:e}", f);
    let (mantissa, exp) = match sci.split_once('e') {
        Some(parts) => parts,
        None => return sci,
    };
    let exp: i32 = exp.parse().unwrap_or(0);
    let sign = if mantissa.starts_with('-') { "-" } else { "" };
    let digits: String = mantissa.chars().filter(|c| c.is_ascii_digit()).collect();

    if (-4..16).contains(&exp) {
        let point = exp + 1;
        let body = if point <= 0 {
            format!("0.{}{}", "0".repeat((-point) as usize), digits)
        } else if point as usize >= digits.len() {
            format!("{}{}.0", digits, "0".repeat(point as usize - digits.len()))
        } else {
            let (int_part, frac) = digits.split_at(point as usize);
            format!("{}.{}", int_part, frac)
        };
        format!("{}{}", sign, body)
    } else {
        let (first, rest) = digits.split_at(1);
        let mantissa = if rest.is_empty() {
            first.to_string()
        } else {
            format!("{}.{}", first, rest)
        };
        format!("{}{}{}", sign, mantissa, exponent_suffix(exp))
    }
}

fn exponent_suffix(exp: i32) -> String {
    format!("e{}{:02}", if exp < 0 { '-' } else { '+' }, exp.abs())
}

pub fn repr_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

// ─── Format Specification Mini-Language ──────────────────────────────────

#[derive(Debug, Default)]
struct FormatSpec {
    fill: Option<char>,
    align: Option<char>,
    sign: Option<char>,
    alternate: bool,
    width: usize,
    grouping: Option<char>,
    precision: Option<usize>,
    ty: Option<char>,
}

/// Width or precision digits, bounded like sequence repetition.
fn format_count(digits: &[char]) -> Result<usize, ExceptionInfo> {
    match digits.iter().collect::<String>().parse::<usize>() {
        Ok(n) if n <= MAX_SEQUENCE_LEN => Ok(n),
        _ => Err(ExceptionInfo::value_error("Too many decimal digits in format string")),
    }
}

impl FormatSpec {
    fn parse(spec: &str) -> Result<Self, ExceptionInfo> {
        let chars: Vec<char> = spec.chars().collect();
        let mut out = FormatSpec::default();
        let mut i = 0;
        let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');

        if chars.len() >= 2 && is_align(chars[1]) {
            out.fill = Some(chars[0]);
            out.align = Some(chars[1]);
            i = 2;
        } else if !chars.is_empty() && is_align(chars[0]) {
            out.align = Some(chars[0]);
            i = 1;
        }
        if i < chars.len() && matches!(chars[i], '+' | '-' | ' ') {
            out.sign = Some(chars[i]);
            i += 1;
        }
        if i < chars.len() && chars[i] == '#' {
            out.alternate = true;
            i += 1;
        }
        if i < chars.len() && chars[i] == '0' {
            if out.fill.is_none() {
                out.fill = Some('0');
            }
            if out.align.is_none() {
                out.align = Some('=');
            }
            i += 1;
        }
        let start = i;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
        if i > start {
            out.width = format_count(&chars[start..i])?;
        }
        if i < chars.len() && matches!(chars[i], ',' | '_') {
            out.grouping = Some(chars[i]);
            i += 1;
        }
        if i < chars.len() && chars[i] == '.' {
            i += 1;
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            if i == start {
                return Err(ExceptionInfo::value_error("Format specifier missing precision"));
            }
            out.precision = Some(format_count(&chars[start..i])?);
        }
        if i < chars.len() {
            out.ty = Some(chars[i]);
            i += 1;
        }
        if i != chars.len() {
            return Err(ExceptionInfo::value_error("Invalid format specifier"));
        }
        Ok(out)
    }

    fn unknown_code(&self, value: &RawValue) -> ExceptionInfo {
        ExceptionInfo::value_error(format!(
            "Unknown format code '{}' for object of type '{}'",
            self.ty.unwrap_or(' '),
            value.type_name()
        ))
    }

    fn apply(&self, value: &RawValue) -> Result<String, ExceptionInfo> {
        match value {
            RawValue::Str(s) => {
                if !matches!(self.ty, None | Some('s')) {
                    return Err(self.unknown_code(value));
                }
                if self.sign.is_some() {
                    return Err(ExceptionInfo::value_error(
                        "Sign not allowed in string format specifier",
                    ));
                }
                let body: String = match self.precision {
                    Some(p) => s.chars().take(p).collect(),
                    None => s.clone(),
                };
                Ok(self.pad("", &body, '<'))
            }
            RawValue::Bool(_) | RawValue::Int(_) => {
                let i = value.as_int().unwrap_or_default();
                match self.ty {
                    None | Some('d') | Some('n') if self.precision.is_none() => {
                        let digits = group_digits(&i.unsigned_abs().to_string(), self.grouping);
                        Ok(self.pad(self.sign_for(i < 0), &digits, '>'))
                    }
                    Some('b') | Some('o') | Some('x') | Some('X') => {
                        let abs = i.unsigned_abs();
                        let (digits, prefix) = match self.ty {
                            Some('b') => (format!("{:b}", abs), "0b"),
                            Some('o') => (format!("{:o}", abs), "0o"),
                            Some('x') => (format!("{:x}", abs), "0x"),
                            _ => (format!("{:X}", abs), "0X"),
                        };
                        let body = if self.alternate {
                            format!("{}{}", prefix, digits)
                        } else {
                            digits
                        };
                        Ok(self.pad(self.sign_for(i < 0), &body, '>'))
                    }
                    Some('c') => match u32::try_from(i).ok().and_then(char::from_u32) {
                        Some(c) => Ok(self.pad("", &c.to_string(), '>')),
                        None => Err(ExceptionInfo::new(
                            ErrorKind::OverflowError,
                            "%c arg not in range(0x110000)",
                        )),
                    },
                    Some('e') | Some('E') | Some('f') | Some('F') | Some('g') | Some('G')
                    | Some('%') | None => self.apply_float(i as f64),
                    _ => Err(self.unknown_code(value)),
                }
            }
            RawValue::Float(f) => match self.ty {
                None | Some('e') | Some('E') | Some('f') | Some('F') | Some('g') | Some('G')
                | Some('%') | Some('n') => self.apply_float(*f),
                _ => Err(self.unknown_code(value)),
            },
            _ => Err(self.unknown_code(value)),
        }
    }

    fn apply_float(&self, f: f64) -> Result<String, ExceptionInfo> {
        let negative = f.is_sign_negative() && !(f == 0.0 && self.ty.is_none());
        let abs = f.abs();
        let body = if !abs.is_finite() {
            let text = if abs.is_nan() { "nan" } else { "inf" };
            if matches!(self.ty, Some('E') | Some('F') | Some('G')) {
                text.to_uppercase()
            } else {
                text.to_string()
            }
        } else {
            match self.ty {
                Some('f') | Some('F') => fixed(abs, self.precision.unwrap_or(6), self.grouping),
                Some('%') => {
                    let scaled = fixed(abs * 100.0, self.precision.unwrap_or(6), self.grouping);
                    format!("{}%", scaled)
                }
                Some('e') | Some('E') => {
                    let s = scientific(abs, self.precision.unwrap_or(6));
                    if self.ty == Some('E') {
                        s.to_uppercase()
                    } else {
                        s
                    }
                }
                Some('g') | Some('G') | Some('n') => {
                    let precision = self.precision.unwrap_or(6);
                    let s = general(abs, precision, self.alternate, self.grouping);
                    if self.ty == Some('G') {
                        s.to_uppercase()
                    } else {
                        s
                    }
                }
                _ => match self.precision {
                    Some(p) => {
                        let s = general(abs, p, self.alternate, self.grouping);
                        if s.contains('.') || s.contains('e') {
                            s
                        } else {
                            format!("{}.0", s)
                        }
                    }
                    None => {
                        let s = format_float(abs);
                        match s.split_once('.') {
                            Some((int_part, frac)) if !frac.contains('e') => {
                                format!("{}.{}", group_digits(int_part, self.grouping), frac)
                            }
                            _ => s,
                        }
                    }
                },
            }
        };
        Ok(self.pad(self.sign_for(negative), &body, '>'))
    }

    fn sign_for(&self, negative: bool) -> &'static str {
        if negative {
            "-"
        } else {
            match self.sign {
                Some('+') => "+",
                Some(' ') => " ",
                _ => "",
            }
        }
    }

    fn pad(&self, sign: &str, body: &str, default_align: char) -> String {
        let len = sign.chars().count() + body.chars().count();
        if len >= self.width {
            return format!("{}{}", sign, body);
        }
        let fill = self.fill.unwrap_or(' ');
        let padding = self.width - len;
        let repeat = |n: usize| std::iter::repeat(fill).take(n).collect::<String>();
        match self.align.unwrap_or(default_align) {
            '<' => format!("{}{}{}", sign, body, repeat(padding)),
            '^' => format!(
                "{}{}{}{}",
                repeat(padding / 2),
                sign,
                body,
                repeat(padding - padding / 2)
            ),
            '=' => format!("{}{}{}", sign, repeat(padding), body),
            _ => format!("{}{}{}", repeat(padding), sign, body),
        }
    }
}

fn group_digits(digits: &str, grouping: Option<char>) -> String {
    let sep = match grouping {
        Some(c) => c,
        None => return digits.to_string(),
    };
    let chars: Vec<char> = digits.chars().collect();
    let mut out = String::new();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % 3 == 0 {
            out.push(sep);
        }
        out.push(*c);
    }
    out
}

fn fixed(f: f64, precision: usize, grouping: Option<char>) -> String {
    let s = format!("{:.*}", precision, f);
    match s.split_once('.') {
        Some((int_part, frac)) => format!("{}.{}", group_digits(int_part, grouping), frac),
        None => group_digits(&s, grouping),
    }
}

fn scientific(f: f64, precision: usize) -> String {
    let s = format!("{:.*e}", precision, f);
    match s.split_once('e') {
        Some((mantissa, exp)) => {
            format!("{}{}", mantissa, exponent_suffix(exp.parse().unwrap_or(0)))
        }
        None => s,
    }
}

fn general(f: f64, precision: usize, alternate: bool, grouping: Option<char>) -> String {
    let p = precision.max(1);
    if f == 0.0 {
        return if alternate { format!("{:.*}", p - 1, 0.0) } else { "0".into() };
    }
    let sci = format!("{:.*e}", p - 1, f);
    let exp: i32 = sci
        .split_once('e')
        .and_then(|(_, e)| e.parse().ok())
        .unwrap_or(0);
    let strip = |s: String| -> String {
        if alternate || !s.contains('.') {
            s
        } else {
            s.trim_end_matches('0').trim_end_matches('.').to_string()
        }
    };
    if exp >= -4 && exp < p as i32 {
        let decimals = (p as i32 - 1 - exp).max(0) as usize;
        strip(fixed(f, decimals, grouping))
    } else {
        let s = scientific(f, p - 1);
        match s.split_once('e') {
            Some((mantissa, exp)) => format!("{}e{}", strip(mantissa.to_string()), exp),
            None => s,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_repr() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(0.1), "0.1");
        assert_eq!(format_float(-2.5), "-2.5");
        assert_eq!(format_float(1e16), "1e+16");
        assert_eq!(format_float(1.5e-5), "1.5e-05");
        assert_eq!(format_float(123456789.0), "123456789.0");
        assert_eq!(format_float(0.0001), "0.0001");
        assert_eq!(format_float(f64::INFINITY), "inf");
        assert_eq!(format_float(f64::NAN), "nan");
    }

    #[test]
    fn test_repr_and_str() {
        let v = RawValue::List(vec![
            RawValue::Int(1),
            RawValue::str("a'b"),
            RawValue::None,
            RawValue::Tuple(vec![RawValue::Bool(true)]),
        ]);
        assert_eq!(v.py_repr(), "[1, \"a'b\", None, (True,)]");
        assert_eq!(RawValue::str("hi").py_str(), "hi");
        assert_eq!(RawValue::str("hi").py_repr(), "'hi'");
        assert_eq!(RawValue::Set(vec![]).py_repr(), "set()");
        let d = RawValue::dict_from([(RawValue::str("k"), RawValue::Float(2.0))]);
        assert_eq!(d.py_str(), "{'k': 2.0}");
        assert_eq!(RawValue::str("é").py_ascii(), "'\\xe9'");
    }

    #[test]
    fn test_numeric_equality_crosses_types() {
        assert_eq!(RawValue::Int(1), RawValue::Float(1.0));
        assert_eq!(RawValue::Bool(true), RawValue::Int(1));
        assert_ne!(RawValue::Int(1), RawValue::str("1"));
        let a = RawValue::set_from([RawValue::Int(1), RawValue::Int(2), RawValue::Int(1)]);
        let b = RawValue::set_from([RawValue::Int(2), RawValue::Int(1)]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_ordering() {
        assert_eq!(RawValue::Int(1).py_cmp(&RawValue::Float(1.5)), Some(Ordering::Less));
        assert_eq!(
            RawValue::Tuple(vec![RawValue::Int(1), RawValue::Int(2)])
                .py_cmp(&RawValue::Tuple(vec![RawValue::Int(1)])),
            Some(Ordering::Greater)
        );
        assert_eq!(RawValue::str("a").py_cmp(&RawValue::Int(1)), None);
    }

    #[test]
    fn test_format_spec() {
        assert_eq!(RawValue::Float(3.14159).format_with_spec(".2f").unwrap(), "3.14");
        assert_eq!(RawValue::Int(1234567).format_with_spec(",").unwrap(), "1,234,567");
        assert_eq!(RawValue::Int(42).format_with_spec("05d").unwrap(), "00042");
        assert_eq!(RawValue::str("ab").format_with_spec("*^6").unwrap(), "**ab**");
        assert_eq!(RawValue::Int(255).format_with_spec("#x").unwrap(), "0xff");
        assert_eq!(RawValue::Float(0.25).format_with_spec(".1%").unwrap(), "25.0%");
        assert_eq!(RawValue::Float(12345.678).format_with_spec(".3e").unwrap(), "1.235e+04");
        assert_eq!(RawValue::Float(1.0).format_with_spec(".3").unwrap(), "1.0");
        assert_eq!(RawValue::Int(-7).format_with_spec("+").unwrap(), "-7");
        assert_eq!(RawValue::Int(7).format_with_spec("+").unwrap(), "+7");
        let err = RawValue::str("x").format_with_spec("d").unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValueError);
        let err = RawValue::None.format_with_spec("d").unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeError);
    }

    #[test]
    fn test_format_spec_counts_are_bounded() {
        for spec in [">99999999999", ">99999999999999999999999", ".99999999999f", "*^10000001"] {
            let err = RawValue::Float(1.5).format_with_spec(spec).unwrap_err();
            assert_eq!(err.kind, ErrorKind::ValueError, "{}", spec);
            assert_eq!(err.message, "Too many decimal digits in format string");
        }
        assert_eq!(RawValue::Int(1).format_with_spec(">3").unwrap(), "  1");
    }

    #[test]
    fn test_unhashable() {
        assert!(RawValue::List(vec![]).py_hash().is_err());
        assert_eq!(RawValue::Int(5).py_hash().unwrap(), 5);
        assert_eq!(
            RawValue::str("a").py_hash().unwrap(),
            RawValue::str("a").py_hash().unwrap()
        );
    }

    #[test]
    fn test_json() {
        let mut fields = IndexMap::new();
        fields.insert("name".to_string(), RawValue::str("Emma"));
        fields.insert("age".to_string(), RawValue::Int(30));
        let inst = RawValue::Instance {
            class_name: "User".into(),
            fields,
        };
        assert_eq!(inst.to_json(), serde_json::json!({"name": "Emma", "age": 30}));
        let back = RawValue::from_json(&serde_json::json!([1, 2.5, "x", null]));
        assert_eq!(
            back,
            RawValue::List(vec![
                RawValue::Int(1),
                RawValue::Float(2.5),
                RawValue::str("x"),
                RawValue::None
            ])
        );
    }
}
