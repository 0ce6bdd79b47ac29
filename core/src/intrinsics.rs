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

//! Built-in functions and the methods of `str`, `list` and `dict`.
//!
//! Every intrinsic works on host values: the interpreter converts the
//! arguments with [`crate::value::Value::to_raw`] and wraps the result back
//! with the dependencies of the call.

use crate::ast::BinOp;
use crate::exception::ExceptionInfo;
use crate::operators::MAX_SEQUENCE_LEN;
use crate::raw::RawValue;
use crate::value::BuiltinDef;
use indexmap::IndexMap;
use std::cmp::Ordering;
use std::rc::Rc;

pub type IntrinsicFn =
    fn(&[RawValue], &IndexMap<String, RawValue>) -> Result<RawValue, ExceptionInfo>;

pub const BUILTIN_FUNCTIONS: &[&str] = &[
    "abs", "any", "all", "bool", "dir", "divmod", "enumerate", "float", "hash", "int", "len",
    "list", "max", "min", "print", "range", "repr", "reversed", "set", "sorted", "str", "sum",
    "tuple", "type", "zip",
];

pub const DICT_METHODS: &[&str] = &["get", "items", "keys", "values"];

pub const LIST_METHODS: &[&str] = &["index"];

pub const STR_METHODS: &[&str] = &[
    "capitalize", "count", "endswith", "find", "format", "index", "isalnum", "isalpha",
    "isdigit", "islower", "isspace", "istitle", "isupper", "join", "lower", "lstrip",
    "partition", "removeprefix", "removesuffix", "replace", "rfind", "rindex", "rpartition",
    "rsplit", "rstrip", "split", "splitlines", "startswith", "strip", "title", "upper",
];

/// Method names available on a built-in type.
pub fn methods_for(type_name: &str) -> &'static [&'static str] {
    match type_name {
        "dict" => DICT_METHODS,
        "list" => LIST_METHODS,
        "str" => STR_METHODS,
        _ => &[],
    }
}

pub struct IntrinsicRegistry;

impl IntrinsicRegistry {
    pub fn resolve(name: &str) -> Option<IntrinsicFn> {
        match name {
            "abs" => Some(intrinsic_abs),
            "any" => Some(intrinsic_any),
            "all" => Some(intrinsic_all),
            "bool" => Some(intrinsic_bool),
            "dir" => Some(intrinsic_dir),
            "divmod" => Some(intrinsic_divmod),
            "enumerate" => Some(intrinsic_enumerate),
            "float" => Some(intrinsic_float),
            "hash" => Some(intrinsic_hash),
            "int" => Some(intrinsic_int),
            "len" => Some(intrinsic_len),
            "list" => Some(intrinsic_list),
            "max" => Some(intrinsic_max),
            "min" => Some(intrinsic_min),
            "print" => Some(intrinsic_print),
            "range" => Some(intrinsic_range),
            "repr" => Some(intrinsic_repr),
            "reversed" => Some(intrinsic_reversed),
            "set" => Some(intrinsic_set),
            "sorted" => Some(intrinsic_sorted),
            "str" => Some(intrinsic_str),
            "sum" => Some(intrinsic_sum),
            "tuple" => Some(intrinsic_tuple),
            "type" => Some(intrinsic_type),
            "zip" => Some(intrinsic_zip),
            _ => None,
        }
    }

    pub fn resolve_method(type_name: &str, name: &str) -> Option<IntrinsicFn> {
        match (type_name, name) {
            ("dict", "get") => Some(intrinsic_dict_get),
            ("dict", "items") => Some(intrinsic_dict_items),
            ("dict", "keys") => Some(intrinsic_dict_keys),
            ("dict", "values") => Some(intrinsic_dict_values),
            ("list", "index") => Some(intrinsic_list_index),
            ("str", "capitalize") => Some(intrinsic_str_capitalize),
            ("str", "count") => Some(intrinsic_str_count),
            ("str", "endswith") => Some(intrinsic_str_endswith),
            ("str", "find") => Some(intrinsic_str_find),
            ("str", "format") => Some(intrinsic_str_format),
            ("str", "index") => Some(intrinsic_str_index),
            ("str", "isalnum") => Some(intrinsic_str_isalnum),
            ("str", "isalpha") => Some(intrinsic_str_isalpha),
            ("str", "isdigit") => Some(intrinsic_str_isdigit),
            ("str", "islower") => Some(intrinsic_str_islower),
            ("str", "isspace") => Some(intrinsic_str_isspace),
            ("str", "istitle") => Some(intrinsic_str_istitle),
            ("str", "isupper") => Some(intrinsic_str_isupper),
            ("str", "join") => Some(intrinsic_str_join),
            ("str", "lower") => Some(intrinsic_str_lower),
            ("str", "lstrip") => Some(intrinsic_str_lstrip),
            ("str", "partition") => Some(intrinsic_str_partition),
            ("str", "removeprefix") => Some(intrinsic_str_removeprefix),
            ("str", "removesuffix") => Some(intrinsic_str_removesuffix),
            ("str", "replace") => Some(intrinsic_str_replace),
            ("str", "rfind") => Some(intrinsic_str_rfind),
            ("str", "rindex") => Some(intrinsic_str_rindex),
            ("str", "rpartition") => Some(intrinsic_str_rpartition),
            ("str", "rsplit") => Some(intrinsic_str_rsplit),
            ("str", "rstrip") => Some(intrinsic_str_rstrip),
            ("str", "split") => Some(intrinsic_str_split),
            ("str", "splitlines") => Some(intrinsic_str_splitlines),
            ("str", "startswith") => Some(intrinsic_str_startswith),
            ("str", "strip") => Some(intrinsic_str_strip),
            ("str", "title") => Some(intrinsic_str_title),
            ("str", "upper") => Some(intrinsic_str_upper),
            _ => None,
        }
    }

    /// The prelude's built-in functions.
    pub fn builtins() -> Vec<Rc<BuiltinDef>> {
        BUILTIN_FUNCTIONS
            .iter()
            .filter_map(|name| Self::resolve(name).map(|f| BuiltinDef::new(name, f)))
            .collect()
    }
}

/// A bound-method definition for a built-in type, if it has one.
pub fn builtin_method(type_name: &str, name: &str) -> Option<Rc<BuiltinDef>> {
    IntrinsicRegistry::resolve_method(type_name, name).map(|f| BuiltinDef::new(name, f))
}

// ============================================================================
// ARGUMENT BINDING
// ============================================================================

/// Positional-or-keyword argument access for intrinsics.
pub struct Args<'a> {
    fn_name: &'a str,
    positional: &'a [RawValue],
    keywords: &'a IndexMap<String, RawValue>,
}

impl<'a> Args<'a> {
    pub fn new(
        fn_name: &'a str,
        positional: &'a [RawValue],
        keywords: &'a IndexMap<String, RawValue>,
    ) -> Self {
        Args {
            fn_name,
            positional,
            keywords,
        }
    }

    pub fn len(&self) -> usize {
        self.positional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keywords.is_empty()
    }

    pub fn get(&self, pos: usize, kw: &str) -> Option<&'a RawValue> {
        self.positional.get(pos).or_else(|| self.keywords.get(kw))
    }

    pub fn required(&self, pos: usize, kw: &str) -> Result<&'a RawValue, ExceptionInfo> {
        self.get(pos, kw).ok_or_else(|| {
            ExceptionInfo::type_error(format!(
                "{}() missing required argument '{}' (pos {})",
                self.fn_name,
                kw,
                pos + 1
            ))
        })
    }

    pub fn int_or(&self, pos: usize, kw: &str, default: i64) -> Result<i64, ExceptionInfo> {
        match self.get(pos, kw) {
            Some(v) => expect_int(v),
            None => Ok(default),
        }
    }

    pub fn str(&self, pos: usize, kw: &str) -> Result<&'a str, ExceptionInfo> {
        let value = self.required(pos, kw)?;
        value.as_str().ok_or_else(|| {
            ExceptionInfo::type_error(format!(
                "{}() argument '{}' must be str, not {}",
                self.fn_name,
                kw,
                value.type_name()
            ))
        })
    }

    /// An optional string argument where `None` means absent.
    pub fn opt_str(&self, pos: usize, kw: &str) -> Result<Option<&'a str>, ExceptionInfo> {
        match self.get(pos, kw) {
            None | Some(RawValue::None) => Ok(None),
            Some(_) => self.str(pos, kw).map(Some),
        }
    }

    pub fn max_positional(&self, max: usize) -> Result<(), ExceptionInfo> {
        if self.positional.len() > max {
            return Err(ExceptionInfo::type_error(format!(
                "{}() takes at most {} arguments ({} given)",
                self.fn_name,
                max,
                self.positional.len()
            )));
        }
        Ok(())
    }

    pub fn exact_positional(&self, n: usize) -> Result<(), ExceptionInfo> {
        if self.positional.len() != n {
            return Err(ExceptionInfo::type_error(format!(
                "{}() takes exactly {} argument{} ({} given)",
                self.fn_name,
                n,
                if n == 1 { "" } else { "s" },
                self.positional.len()
            )));
        }
        Ok(())
    }

    pub fn allow_keywords(&self, names: &[&str]) -> Result<(), ExceptionInfo> {
        match self.keywords.keys().find(|k| !names.contains(&k.as_str())) {
            Some(k) => Err(ExceptionInfo::type_error(format!(
                "{}() got an unexpected keyword argument '{}'",
                self.fn_name, k
            ))),
            None => Ok(()),
        }
    }

    pub fn no_keywords(&self) -> Result<(), ExceptionInfo> {
        if self.keywords.is_empty() {
            Ok(())
        } else {
            Err(ExceptionInfo::type_error(format!(
                "{}() takes no keyword arguments",
                self.fn_name
            )))
        }
    }
}

pub fn expect_int(value: &RawValue) -> Result<i64, ExceptionInfo> {
    value.as_int().ok_or_else(|| {
        ExceptionInfo::type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            value.type_name()
        ))
    })
}

fn iterable(value: &RawValue) -> Result<Vec<RawValue>, ExceptionInfo> {
    value.iter_items().ok_or_else(|| {
        ExceptionInfo::type_error(format!("'{}' object is not iterable", value.type_name()))
    })
}

fn compare(a: &RawValue, b: &RawValue, symbol: &str) -> Result<Ordering, ExceptionInfo> {
    a.py_cmp(b).ok_or_else(|| {
        ExceptionInfo::type_error(format!(
            "'{}' not supported between instances of '{}' and '{}'",
            symbol,
            a.type_name(),
            b.type_name()
        ))
    })
}

/// Applies a `key=` argument. Only built-in functions can be keys.
fn apply_key(key: Option<&RawValue>, item: &RawValue) -> Result<RawValue, ExceptionInfo> {
    match key {
        None | Some(RawValue::None) => Ok(item.clone()),
        Some(RawValue::Callable {
            name,
            is_class: false,
        }) => match IntrinsicRegistry::resolve(name) {
            Some(f) => f(std::slice::from_ref(item), &IndexMap::new()),
            None => Err(ExceptionInfo::type_error(format!(
                "'{}' cannot be used as a key function",
                name
            ))),
        },
        Some(other) => Err(ExceptionInfo::type_error(format!(
            "'{}' object is not callable",
            other.type_name()
        ))),
    }
}

/// Stable merge sort that reports incomparable pairs instead of panicking.
fn merge_sort(
    items: Vec<(RawValue, RawValue)>,
    reverse: bool,
) -> Result<Vec<(RawValue, RawValue)>, ExceptionInfo> {
    if items.len() <= 1 {
        return Ok(items);
    }
    let mut left = items;
    let right = left.split_off(left.len() / 2);
    let left = merge_sort(left, reverse)?;
    let right = merge_sort(right, reverse)?;
    let mut out = Vec::with_capacity(left.len() + right.len());
    let mut l = left.into_iter().peekable();
    let mut r = right.into_iter().peekable();
    while let (Some(a), Some(b)) = (l.peek(), r.peek()) {
        let take_right = if reverse {
            compare(&a.0, &b.0, "<")? == Ordering::Less
        } else {
            compare(&b.0, &a.0, "<")? == Ordering::Less
        };
        let next = if take_right { r.next() } else { l.next() };
        out.extend(next);
    }
    out.extend(l);
    out.extend(r);
    Ok(out)
}

// ============================================================================
// BUILT-IN FUNCTIONS
// ============================================================================

pub fn intrinsic_abs(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let a = Args::new("abs", args, kwargs);
    a.no_keywords()?;
    a.exact_positional(1)?;
    match &args[0] {
        RawValue::Bool(b) => Ok(RawValue::Int(*b as i64)),
        RawValue::Int(i) => i
            .checked_abs()
            .map(RawValue::Int)
            .ok_or_else(|| ExceptionInfo::overflow("integer overflow")),
        RawValue::Float(f) => Ok(RawValue::Float(f.abs())),
        RawValue::TimeDelta(d) => Ok(RawValue::TimeDelta(d.abs())),
        other => Err(ExceptionInfo::type_error(format!(
            "bad operand type for abs(): '{}'",
            other.type_name()
        ))),
    }
}

pub fn intrinsic_any(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let a = Args::new("any", args, kwargs);
    a.no_keywords()?;
    a.exact_positional(1)?;
    Ok(RawValue::Bool(iterable(&args[0])?.iter().any(RawValue::truthy)))
}

pub fn intrinsic_all(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let a = Args::new("all", args, kwargs);
    a.no_keywords()?;
    a.exact_positional(1)?;
    Ok(RawValue::Bool(iterable(&args[0])?.iter().all(RawValue::truthy)))
}

pub fn intrinsic_bool(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let a = Args::new("bool", args, kwargs);
    a.no_keywords()?;
    a.max_positional(1)?;
    Ok(RawValue::Bool(args.first().is_some_and(RawValue::truthy)))
}

pub fn intrinsic_dir(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let a = Args::new("dir", args, kwargs);
    a.no_keywords()?;
    a.exact_positional(1)?;
    let mut names: Vec<String> = match &args[0] {
        RawValue::Instance { fields, .. } => fields.keys().cloned().collect(),
        other => methods_for(&other.type_name())
            .iter()
            .map(|s| s.to_string())
            .collect(),
    };
    names.sort();
    Ok(RawValue::str_list(names))
}

pub fn intrinsic_divmod(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let a = Args::new("divmod", args, kwargs);
    a.no_keywords()?;
    a.exact_positional(2)?;
    let (x, y) = (&args[0], &args[1]);
    match (x.as_int(), y.as_int()) {
        (Some(_), Some(0)) => {
            Err(ExceptionInfo::zero_division("integer division or modulo by zero"))
        }
        (Some(n), Some(d)) => {
            let (q, r) = n
                .checked_div(d)
                .zip(n.checked_rem(d))
                .ok_or_else(|| ExceptionInfo::overflow("integer overflow"))?;
            let (q, r) = if r != 0 && (r < 0) != (d < 0) { (q - 1, r + d) } else { (q, r) };
            Ok(RawValue::Tuple(vec![RawValue::Int(q), RawValue::Int(r)]))
        }
        _ => match (x.as_float(), y.as_float()) {
            (Some(_), Some(d)) if d == 0.0 => Err(ExceptionInfo::zero_division("float divmod()")),
            (Some(n), Some(d)) => {
                let m = n % d;
                let m = if m != 0.0 && (m < 0.0) != (d < 0.0) { m + d } else { m };
                let q = ((n - m) / d).round();
                Ok(RawValue::Tuple(vec![RawValue::Float(q), RawValue::Float(m)]))
            }
            _ => Err(ExceptionInfo::type_error(format!(
                "unsupported operand type(s) for divmod(): '{}' and '{}'",
                x.type_name(),
                y.type_name()
            ))),
        },
    }
}

pub fn intrinsic_enumerate(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let a = Args::new("enumerate", args, kwargs);
    a.allow_keywords(&["iterable", "start"])?;
    a.max_positional(2)?;
    let items = iterable(a.required(0, "iterable")?)?;
    let start = a.int_or(1, "start", 0)?;
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        let index = start
            .checked_add(i as i64)
            .ok_or_else(|| ExceptionInfo::overflow("integer overflow"))?;
        out.push(RawValue::Tuple(vec![RawValue::Int(index), item]));
    }
    Ok(RawValue::List(out))
}

pub fn intrinsic_float(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let a = Args::new("float", args, kwargs);
    a.no_keywords()?;
    a.max_positional(1)?;
    match args.first() {
        None => Ok(RawValue::Float(0.0)),
        Some(RawValue::Str(s)) => s
            .trim()
            .parse::<f64>()
            .map(RawValue::Float)
            .map_err(|_| {
                ExceptionInfo::value_error(format!(
                    "could not convert string to float: {}",
                    crate::raw::repr_str(s)
                ))
            }),
        Some(v) => v.as_float().map(RawValue::Float).ok_or_else(|| {
            ExceptionInfo::type_error(format!(
                "float() argument must be a string or a real number, not '{}'",
                v.type_name()
            ))
        }),
    }
}

pub fn intrinsic_hash(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let a = Args::new("hash", args, kwargs);
    a.no_keywords()?;
    a.exact_positional(1)?;
    args[0].py_hash().map(RawValue::Int)
}

fn parse_int(text: &str, base: u32) -> Result<i64, ExceptionInfo> {
    let invalid = || {
        ExceptionInfo::value_error(format!(
            "invalid literal for int() with base {}: {}",
            base,
            crate::raw::repr_str(text)
        ))
    };
    let trimmed = text.trim();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let prefix = match base {
        16 => Some(["0x", "0X"]),
        8 => Some(["0o", "0O"]),
        2 => Some(["0b", "0B"]),
        _ => None,
    };
    let digits = prefix
        .and_then(|[lower, upper]| {
            digits.strip_prefix(lower).or_else(|| digits.strip_prefix(upper))
        })
        .unwrap_or(digits);
    if digits.is_empty()
        || digits.starts_with('_')
        || digits.ends_with('_')
        || digits.contains("__")
        || !digits.chars().all(|c| c == '_' || c.is_digit(base))
    {
        return Err(invalid());
    }
    let cleaned: String = digits.chars().filter(|c| *c != '_').collect();
    let magnitude = i128::from_str_radix(&cleaned, base)
        .map_err(|_| ExceptionInfo::overflow("integer overflow"))?;
    let value = if negative { -magnitude } else { magnitude };
    i64::try_from(value).map_err(|_| ExceptionInfo::overflow("integer overflow"))
}

pub fn intrinsic_int(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let a = Args::new("int", args, kwargs);
    a.allow_keywords(&["base"])?;
    a.max_positional(2)?;
    let value = match args.first() {
        None => return Ok(RawValue::Int(0)),
        Some(v) => v,
    };
    if let Some(base) = a.get(1, "base") {
        let base = expect_int(base)?;
        if !(2..=36).contains(&base) {
            return Err(ExceptionInfo::value_error("int() base must be >= 2 and <= 36"));
        }
        return match value {
            RawValue::Str(s) => parse_int(s, base as u32).map(RawValue::Int),
            _ => Err(ExceptionInfo::type_error(
                "int() can't convert non-string with explicit base",
            )),
        };
    }
    match value {
        RawValue::Str(s) => parse_int(s, 10).map(RawValue::Int),
        RawValue::Float(f) if f.is_nan() => {
            Err(ExceptionInfo::value_error("cannot convert float NaN to integer"))
        }
        RawValue::Float(f) if f.is_infinite() => {
            Err(ExceptionInfo::overflow("cannot convert float infinity to integer"))
        }
        RawValue::Float(f) => {
            let t = f.trunc();
            if t >= i64::MIN as f64 && t < i64::MAX as f64 {
                Ok(RawValue::Int(t as i64))
            } else {
                Err(ExceptionInfo::overflow("integer overflow"))
            }
        }
        v => v.as_int().map(RawValue::Int).ok_or_else(|| {
            ExceptionInfo::type_error(format!(
                "int() argument must be a string, a bytes-like object or a real number, not '{}'",
                v.type_name()
            ))
        }),
    }
}

pub fn intrinsic_len(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let a = Args::new("len", args, kwargs);
    a.no_keywords()?;
    a.exact_positional(1)?;
    let len = match &args[0] {
        RawValue::Str(s) => s.chars().count(),
        RawValue::List(v) | RawValue::Tuple(v) | RawValue::Set(v) => v.len(),
        RawValue::Dict(v) => v.len(),
        other => {
            return Err(ExceptionInfo::type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )))
        }
    };
    Ok(RawValue::Int(len as i64))
}

pub fn intrinsic_list(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let a = Args::new("list", args, kwargs);
    a.no_keywords()?;
    a.max_positional(1)?;
    match args.first() {
        None => Ok(RawValue::List(Vec::new())),
        Some(v) => iterable(v).map(RawValue::List),
    }
}

fn extremum(
    name: &str,
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
    wanted: Ordering,
) -> Result<RawValue, ExceptionInfo> {
    let a = Args::new(name, args, kwargs);
    a.allow_keywords(&["key", "default"])?;
    let items = match args.len() {
        0 => {
            return Err(ExceptionInfo::type_error(format!(
                "{} expected at least 1 argument, got 0",
                name
            )))
        }
        1 => iterable(&args[0])?,
        _ => {
            if kwargs.contains_key("default") {
                return Err(ExceptionInfo::type_error(format!(
                    "Cannot specify a default for {}() with multiple positional arguments",
                    name
                )));
            }
            args.to_vec()
        }
    };
    let key = kwargs.get("key");
    let mut best: Option<(RawValue, RawValue)> = None;
    for item in items {
        let k = apply_key(key, &item)?;
        let replace = match &best {
            None => true,
            Some((best_key, _)) => {
                let op = if wanted == Ordering::Greater { ">" } else { "<" };
                compare(&k, best_key, op)? == wanted
            }
        };
        if replace {
            best = Some((k, item));
        }
    }
    match (best, kwargs.get("default")) {
        (Some((_, item)), _) => Ok(item),
        (None, Some(default)) => Ok(default.clone()),
        (None, None) => Err(ExceptionInfo::value_error(format!(
            "{}() iterable argument is empty",
            name
        ))),
    }
}

pub fn intrinsic_max(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    extremum("max", args, kwargs, Ordering::Greater)
}

pub fn intrinsic_min(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    extremum("min", args, kwargs, Ordering::Less)
}

/// Output is recovered from the tool-call chain, so nothing is written here.
pub fn intrinsic_print(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let a = Args::new("print", args, kwargs);
    a.allow_keywords(&["sep", "end", "file", "flush"])?;
    for kw in ["sep", "end"] {
        match kwargs.get(kw) {
            None | Some(RawValue::None) | Some(RawValue::Str(_)) => {}
            Some(other) => {
                return Err(ExceptionInfo::type_error(format!(
                    "{} must be None or a string, not {}",
                    kw,
                    other.type_name()
                )))
            }
        }
    }
    Ok(RawValue::None)
}

pub fn intrinsic_range(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let a = Args::new("range", args, kwargs);
    a.no_keywords()?;
    let ints: Vec<i64> = args.iter().map(expect_int).collect::<Result<_, _>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        [] => return Err(ExceptionInfo::type_error("range expected at least 1 argument, got 0")),
        _ => {
            return Err(ExceptionInfo::type_error(format!(
                "range expected at most 3 arguments, got {}",
                ints.len()
            )))
        }
    };
    if step == 0 {
        return Err(ExceptionInfo::value_error("range() arg 3 must not be zero"));
    }
    let (start, stop, step) = (start as i128, stop as i128, step as i128);
    let len = if step > 0 {
        ((stop - start + step - 1) / step).max(0)
    } else {
        ((start - stop - step - 1) / -step).max(0)
    };
    if len as usize > MAX_SEQUENCE_LEN {
        return Err(ExceptionInfo::overflow("range is too large"));
    }
    Ok(RawValue::List(
        (0..len).map(|i| RawValue::Int((start + i * step) as i64)).collect(),
    ))
}

pub fn intrinsic_repr(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let a = Args::new("repr", args, kwargs);
    a.no_keywords()?;
    a.exact_positional(1)?;
    Ok(RawValue::Str(args[0].py_repr()))
}

pub fn intrinsic_reversed(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let a = Args::new("reversed", args, kwargs);
    a.no_keywords()?;
    a.exact_positional(1)?;
    match &args[0] {
        v @ (RawValue::Str(_) | RawValue::List(_) | RawValue::Tuple(_) | RawValue::Dict(_)) => {
            let mut items = iterable(v)?;
            items.reverse();
            Ok(RawValue::List(items))
        }
        other => Err(ExceptionInfo::type_error(format!(
            "'{}' object is not reversible",
            other.type_name()
        ))),
    }
}

pub fn intrinsic_set(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let a = Args::new("set", args, kwargs);
    a.no_keywords()?;
    a.max_positional(1)?;
    let items = match args.first() {
        None => Vec::new(),
        Some(v) => iterable(v)?,
    };
    for item in &items {
        item.py_hash()?;
    }
    Ok(RawValue::set_from(items))
}

pub fn intrinsic_sorted(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let a = Args::new("sorted", args, kwargs);
    a.allow_keywords(&["key", "reverse"])?;
    a.exact_positional(1)?;
    let reverse = kwargs.get("reverse").is_some_and(RawValue::truthy);
    let key = kwargs.get("key");
    let keyed = iterable(&args[0])?
        .into_iter()
        .map(|item| Ok((apply_key(key, &item)?, item)))
        .collect::<Result<Vec<_>, ExceptionInfo>>()?;
    let sorted = merge_sort(keyed, reverse)?;
    Ok(RawValue::List(sorted.into_iter().map(|(_, item)| item).collect()))
}

pub fn intrinsic_str(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let a = Args::new("str", args, kwargs);
    a.allow_keywords(&["object"])?;
    a.max_positional(1)?;
    Ok(RawValue::Str(
        a.get(0, "object").map(RawValue::py_str).unwrap_or_default(),
    ))
}

fn add_raw(a: &RawValue, b: &RawValue) -> Result<RawValue, ExceptionInfo> {
    match (a, b) {
        (x, y) if x.as_int().is_some() && y.as_int().is_some() => x
            .as_int()
            .zip(y.as_int())
            .and_then(|(x, y)| x.checked_add(y))
            .map(RawValue::Int)
            .ok_or_else(|| ExceptionInfo::overflow("integer overflow")),
        (x, y) if x.is_number() && y.is_number() => Ok(RawValue::Float(
            x.as_float().unwrap_or_default() + y.as_float().unwrap_or_default(),
        )),
        (RawValue::List(x), RawValue::List(y)) => {
            Ok(RawValue::List([x.clone(), y.clone()].concat()))
        }
        (RawValue::Tuple(x), RawValue::Tuple(y)) => {
            Ok(RawValue::Tuple([x.clone(), y.clone()].concat()))
        }
        _ => crate::datetime::binary_op(BinOp::Add, a, b).unwrap_or_else(|| {
            Err(ExceptionInfo::type_error(format!(
                "unsupported operand type(s) for +: '{}' and '{}'",
                a.type_name(),
                b.type_name()
            )))
        }),
    }
}

pub fn intrinsic_sum(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let a = Args::new("sum", args, kwargs);
    a.allow_keywords(&["start"])?;
    a.max_positional(2)?;
    let items = iterable(a.required(0, "iterable")?)?;
    let mut total = a.get(1, "start").cloned().unwrap_or(RawValue::Int(0));
    if let RawValue::Str(_) = total {
        return Err(ExceptionInfo::type_error(
            "sum() can't sum strings [use ''.join(seq) instead]",
        ));
    }
    for item in &items {
        total = add_raw(&total, item)?;
    }
    Ok(total)
}

pub fn intrinsic_tuple(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let a = Args::new("tuple", args, kwargs);
    a.no_keywords()?;
    a.max_positional(1)?;
    match args.first() {
        None => Ok(RawValue::Tuple(Vec::new())),
        Some(v) => iterable(v).map(RawValue::Tuple),
    }
}

pub fn intrinsic_type(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let a = Args::new("type", args, kwargs);
    a.no_keywords()?;
    a.exact_positional(1)?;
    Ok(RawValue::Str(args[0].type_name()))
}

pub fn intrinsic_zip(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let a = Args::new("zip", args, kwargs);
    a.allow_keywords(&["strict"])?;
    let strict = kwargs.get("strict").is_some_and(RawValue::truthy);
    let columns = args.iter().map(iterable).collect::<Result<Vec<_>, _>>()?;
    let shortest = columns.iter().map(Vec::len).min().unwrap_or(0);
    if strict {
        if let Some(pos) = columns.iter().position(|c| c.len() != shortest) {
            return Err(ExceptionInfo::value_error(format!(
                "zip() argument {} is {} than argument{} 1{}",
                pos + 1,
                if columns[pos].len() > shortest { "longer" } else { "shorter" },
                if pos > 1 { "s" } else { "" },
                if pos > 1 { format!("-{}", pos) } else { String::new() }
            )));
        }
    }
    Ok(RawValue::List(
        (0..shortest)
            .map(|i| RawValue::Tuple(columns.iter().map(|c| c[i].clone()).collect()))
            .collect(),
    ))
}

// ============================================================================
// DICT & LIST METHODS
// ============================================================================

fn receiver<'a>(
    args: &Args<'a>,
    method: &str,
    type_name: &str,
) -> Result<&'a RawValue, ExceptionInfo> {
    let value = args.required(0, "self")?;
    if value.type_name() != type_name {
        return Err(ExceptionInfo::type_error(format!(
            "descriptor '{}' for '{}' objects doesn't apply to a '{}' object",
            method,
            type_name,
            value.type_name()
        )));
    }
    Ok(value)
}

fn dict_pairs<'a>(
    args: &Args<'a>,
    method: &str,
) -> Result<&'a [(RawValue, RawValue)], ExceptionInfo> {
    match receiver(args, method, "dict")? {
        RawValue::Dict(pairs) => Ok(pairs),
        _ => Ok(&[]),
    }
}

pub fn intrinsic_dict_get(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let a = Args::new("get", args, kwargs);
    a.no_keywords()?;
    a.max_positional(3)?;
    let pairs = dict_pairs(&a, "get")?;
    let key = a.required(1, "key")?;
    key.py_hash()?;
    Ok(pairs
        .iter()
        .find(|(k, _)| k.py_eq(key))
        .map(|(_, v)| v.clone())
        .or_else(|| args.get(2).cloned())
        .unwrap_or(RawValue::None))
}

pub fn intrinsic_dict_items(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let a = Args::new("items", args, kwargs);
    a.no_keywords()?;
    a.exact_positional(1)?;
    Ok(RawValue::List(
        dict_pairs(&a, "items")?
            .iter()
            .map(|(k, v)| RawValue::Tuple(vec![k.clone(), v.clone()]))
            .collect(),
    ))
}

pub fn intrinsic_dict_keys(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let a = Args::new("keys", args, kwargs);
    a.no_keywords()?;
    a.exact_positional(1)?;
    Ok(RawValue::List(dict_pairs(&a, "keys")?.iter().map(|(k, _)| k.clone()).collect()))
}

pub fn intrinsic_dict_values(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let a = Args::new("values", args, kwargs);
    a.no_keywords()?;
    a.exact_positional(1)?;
    Ok(RawValue::List(dict_pairs(&a, "values")?.iter().map(|(_, v)| v.clone()).collect()))
}

/// Clamps Python-style `start`/`end` bounds to `0..=len`.
fn bounds(a: &Args<'_>, start_pos: usize, len: usize) -> Result<(usize, usize), ExceptionInfo> {
    let clamp = |v: Option<&RawValue>, default: usize| -> Result<usize, ExceptionInfo> {
        match v {
            None | Some(RawValue::None) => Ok(default),
            Some(v) => {
                let i = expect_int(v)?;
                let len = len as i64;
                let i = if i < 0 { (i + len).max(0) } else { i.min(len) };
                Ok(i as usize)
            }
        }
    };
    Ok((
        clamp(a.get(start_pos, "start"), 0)?,
        clamp(a.get(start_pos + 1, "end"), len)?,
    ))
}

pub fn intrinsic_list_index(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let a = Args::new("index", args, kwargs);
    a.no_keywords()?;
    a.max_positional(4)?;
    let items = match receiver(&a, "index", "list")? {
        RawValue::List(items) => items,
        _ => return Ok(RawValue::None),
    };
    let needle = a.required(1, "value")?;
    let (start, end) = bounds(&a, 2, items.len())?;
    (start..end.max(start))
        .find(|i| items[*i].py_eq(needle))
        .map(|i| RawValue::Int(i as i64))
        .ok_or_else(|| ExceptionInfo::value_error(format!("{} is not in list", needle.py_repr())))
}

// ============================================================================
// STR METHODS
// ============================================================================

fn text<'a>(a: &Args<'a>, method: &str) -> Result<&'a str, ExceptionInfo> {
    Ok(receiver(a, method, "str")?.as_str().unwrap_or_default())
}

fn unary_str(
    name: &str,
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
    f: impl Fn(&str) -> RawValue,
) -> Result<RawValue, ExceptionInfo> {
    let a = Args::new(name, args, kwargs);
    a.no_keywords()?;
    a.exact_positional(1)?;
    Ok(f(text(&a, name)?))
}

fn is_cased(c: char) -> bool {
    c.is_lowercase() || c.is_uppercase()
}

pub fn intrinsic_str_capitalize(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    unary_str("capitalize", args, kwargs, |s| {
        let mut chars = s.chars();
        RawValue::Str(match chars.next() {
            Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
            None => String::new(),
        })
    })
}

pub fn intrinsic_str_lower(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    unary_str("lower", args, kwargs, |s| RawValue::Str(s.to_lowercase()))
}

pub fn intrinsic_str_upper(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    unary_str("upper", args, kwargs, |s| RawValue::Str(s.to_uppercase()))
}

pub fn intrinsic_str_title(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    unary_str("title", args, kwargs, |s| {
        let mut out = String::with_capacity(s.len());
        let mut previous_cased = false;
        for c in s.chars() {
            if previous_cased {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            previous_cased = is_cased(c);
        }
        RawValue::Str(out)
    })
}

pub fn intrinsic_str_isalnum(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    unary_str("isalnum", args, kwargs, |s| {
        RawValue::Bool(!s.is_empty() && s.chars().all(char::is_alphanumeric))
    })
}

pub fn intrinsic_str_isalpha(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    unary_str("isalpha", args, kwargs, |s| {
        RawValue::Bool(!s.is_empty() && s.chars().all(char::is_alphabetic))
    })
}

pub fn intrinsic_str_isdigit(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    unary_str("isdigit", args, kwargs, |s| {
        RawValue::Bool(!s.is_empty() && s.chars().all(char::is_numeric))
    })
}

pub fn intrinsic_str_isspace(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    unary_str("isspace", args, kwargs, |s| {
        RawValue::Bool(!s.is_empty() && s.chars().all(char::is_whitespace))
    })
}

pub fn intrinsic_str_islower(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    unary_str("islower", args, kwargs, |s| {
        RawValue::Bool(s.chars().any(char::is_lowercase) && !s.chars().any(char::is_uppercase))
    })
}

pub fn intrinsic_str_isupper(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    unary_str("isupper", args, kwargs, |s| {
        RawValue::Bool(s.chars().any(char::is_uppercase) && !s.chars().any(char::is_lowercase))
    })
}

pub fn intrinsic_str_istitle(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    unary_str("istitle", args, kwargs, |s| {
        let mut previous_cased = false;
        let mut seen_cased = false;
        for c in s.chars() {
            if c.is_uppercase() {
                if previous_cased {
                    return RawValue::Bool(false);
                }
                previous_cased = true;
                seen_cased = true;
            } else if c.is_lowercase() {
                if !previous_cased {
                    return RawValue::Bool(false);
                }
                seen_cased = true;
            } else {
                previous_cased = false;
            }
        }
        RawValue::Bool(seen_cased)
    })
}

fn strip_with(
    name: &str,
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
    left: bool,
    right: bool,
) -> Result<RawValue, ExceptionInfo> {
    let a = Args::new(name, args, kwargs);
    a.no_keywords()?;
    a.max_positional(2)?;
    let s = text(&a, name)?;
    let chars: Option<Vec<char>> = a.opt_str(1, "chars")?.map(|c| c.chars().collect());
    let strip = |c: char| match &chars {
        Some(set) => set.contains(&c),
        None => c.is_whitespace(),
    };
    let mut out = s;
    if left {
        out = out.trim_start_matches(strip);
    }
    if right {
        out = out.trim_end_matches(strip);
    }
    Ok(RawValue::str(out))
}

pub fn intrinsic_str_strip(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    strip_with("strip", args, kwargs, true, true)
}

pub fn intrinsic_str_lstrip(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    strip_with("lstrip", args, kwargs, true, false)
}

pub fn intrinsic_str_rstrip(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    strip_with("rstrip", args, kwargs, false, true)
}

fn find_in(hay: &[char], needle: &[char], from_right: bool) -> Option<usize> {
    if needle.len() > hay.len() {
        return None;
    }
    let last = hay.len() - needle.len();
    let matches_at = |i: &usize| hay[*i..*i + needle.len()] == *needle;
    if from_right {
        (0..=last).rev().find(matches_at)
    } else {
        (0..=last).find(matches_at)
    }
}

/// `find`/`index` and their right-hand variants on char positions.
fn search(
    name: &str,
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
    from_right: bool,
) -> Result<Option<usize>, ExceptionInfo> {
    let a = Args::new(name, args, kwargs);
    a.no_keywords()?;
    a.max_positional(4)?;
    let hay: Vec<char> = text(&a, name)?.chars().collect();
    let needle: Vec<char> = a.str(1, "sub")?.chars().collect();
    let (start, end) = bounds(&a, 2, hay.len())?;
    if start > end {
        return Ok(None);
    }
    Ok(find_in(&hay[start..end], &needle, from_right).map(|i| i + start))
}

fn found(index: Option<usize>) -> RawValue {
    RawValue::Int(index.map_or(-1, |i| i as i64))
}

fn found_or_raise(index: Option<usize>) -> Result<RawValue, ExceptionInfo> {
    index
        .map(|i| RawValue::Int(i as i64))
        .ok_or_else(|| ExceptionInfo::value_error("substring not found"))
}

pub fn intrinsic_str_find(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    search("find", args, kwargs, false).map(found)
}

pub fn intrinsic_str_rfind(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    search("rfind", args, kwargs, true).map(found)
}

pub fn intrinsic_str_index(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    search("index", args, kwargs, false).and_then(found_or_raise)
}

pub fn intrinsic_str_rindex(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    search("rindex", args, kwargs, true).and_then(found_or_raise)
}

pub fn intrinsic_str_count(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let a = Args::new("count", args, kwargs);
    a.no_keywords()?;
    a.max_positional(4)?;
    let hay: Vec<char> = text(&a, "count")?.chars().collect();
    let needle: Vec<char> = a.str(1, "sub")?.chars().collect();
    let (start, end) = bounds(&a, 2, hay.len())?;
    if start > end {
        return Ok(RawValue::Int(0));
    }
    let window = &hay[start..end];
    if needle.is_empty() {
        return Ok(RawValue::Int(window.len() as i64 + 1));
    }
    let mut count = 0;
    let mut i = 0;
    while let Some(pos) = find_in(&window[i..], &needle, false) {
        count += 1;
        i += pos + needle.len();
    }
    Ok(RawValue::Int(count))
}

fn affix_check(
    name: &str,
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
    at_end: bool,
) -> Result<RawValue, ExceptionInfo> {
    let a = Args::new(name, args, kwargs);
    a.no_keywords()?;
    a.max_positional(4)?;
    let chars: Vec<char> = text(&a, name)?.chars().collect();
    let (start, end) = bounds(&a, 2, chars.len())?;
    let window: String = if start <= end {
        chars[start..end].iter().collect()
    } else {
        String::new()
    };
    let candidates: Vec<&str> = match a.required(1, if at_end { "suffix" } else { "prefix" })? {
        RawValue::Str(s) => vec![s.as_str()],
        RawValue::Tuple(items) => items
            .iter()
            .map(|i| {
                i.as_str().ok_or_else(|| {
                    ExceptionInfo::type_error(format!(
                        "tuple for {} must only contain str, not {}",
                        name,
                        i.type_name()
                    ))
                })
            })
            .collect::<Result<_, _>>()?,
        other => {
            return Err(ExceptionInfo::type_error(format!(
                "{} first arg must be str or a tuple of str, not {}",
                name,
                other.type_name()
            )))
        }
    };
    Ok(RawValue::Bool(candidates.iter().any(|c| {
        if at_end {
            window.ends_with(c)
        } else {
            window.starts_with(c)
        }
    })))
}

pub fn intrinsic_str_startswith(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    affix_check("startswith", args, kwargs, false)
}

pub fn intrinsic_str_endswith(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    affix_check("endswith", args, kwargs, true)
}

pub fn intrinsic_str_removeprefix(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let a = Args::new("removeprefix", args, kwargs);
    a.no_keywords()?;
    a.exact_positional(2)?;
    let s = text(&a, "removeprefix")?;
    let prefix = a.str(1, "prefix")?;
    Ok(RawValue::str(s.strip_prefix(prefix).unwrap_or(s)))
}

pub fn intrinsic_str_removesuffix(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let a = Args::new("removesuffix", args, kwargs);
    a.no_keywords()?;
    a.exact_positional(2)?;
    let s = text(&a, "removesuffix")?;
    let suffix = a.str(1, "suffix")?;
    Ok(RawValue::str(s.strip_suffix(suffix).unwrap_or(s)))
}

pub fn intrinsic_str_replace(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let a = Args::new("replace", args, kwargs);
    a.allow_keywords(&["count"])?;
    a.max_positional(4)?;
    let s = text(&a, "replace")?;
    let old = a.str(1, "old")?;
    let new = a.str(2, "new")?;
    let count = a.int_or(3, "count", -1)?;
    Ok(RawValue::Str(if count < 0 {
        s.replace(old, new)
    } else {
        s.replacen(old, new, count as usize)
    }))
}

pub fn intrinsic_str_join(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let a = Args::new("join", args, kwargs);
    a.no_keywords()?;
    a.exact_positional(2)?;
    let sep = text(&a, "join")?;
    let parts = iterable(&args[1])?
        .iter()
        .enumerate()
        .map(|(i, item)| match item {
            RawValue::Str(s) => Ok(s.clone()),
            other => Err(ExceptionInfo::type_error(format!(
                "sequence item {}: expected str instance, {} found",
                i,
                other.type_name()
            ))),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RawValue::Str(parts.join(sep)))
}

fn partition_with(
    name: &str,
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
    from_right: bool,
) -> Result<RawValue, ExceptionInfo> {
    let a = Args::new(name, args, kwargs);
    a.no_keywords()?;
    a.exact_positional(2)?;
    let s = text(&a, name)?;
    let sep = a.str(1, "sep")?;
    if sep.is_empty() {
        return Err(ExceptionInfo::value_error("empty separator"));
    }
    let split = if from_right { s.rsplit_once(sep) } else { s.split_once(sep) };
    let parts = match split {
        Some((before, after)) => [before, sep, after],
        None if from_right => ["", "", s],
        None => [s, "", ""],
    };
    Ok(RawValue::Tuple(parts.iter().map(|p| RawValue::str(*p)).collect()))
}

pub fn intrinsic_str_partition(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    partition_with("partition", args, kwargs, false)
}

pub fn intrinsic_str_rpartition(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    partition_with("rpartition", args, kwargs, true)
}

fn split_whitespace(s: &str, maxsplit: i64, from_right: bool) -> Vec<String> {
    let mut out = Vec::new();
    if from_right {
        let mut rest = s.trim_end();
        while !rest.is_empty() {
            if maxsplit >= 0 && out.len() as i64 == maxsplit {
                out.push(rest.to_string());
                break;
            }
            match rest.rfind(char::is_whitespace) {
                Some(i) => {
                    let ws_len = rest[i..].chars().next().map_or(1, char::len_utf8);
                    out.push(rest[i + ws_len..].to_string());
                    rest = rest[..i].trim_end();
                }
                None => {
                    out.push(rest.to_string());
                    break;
                }
            }
        }
        out.reverse();
    } else {
        let mut rest = s.trim_start();
        while !rest.is_empty() {
            if maxsplit >= 0 && out.len() as i64 == maxsplit {
                out.push(rest.to_string());
                break;
            }
            match rest.find(char::is_whitespace) {
                Some(i) => {
                    out.push(rest[..i].to_string());
                    rest = rest[i..].trim_start();
                }
                None => {
                    out.push(rest.to_string());
                    break;
                }
            }
        }
    }
    out
}

fn split_with(
    name: &str,
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
    from_right: bool,
) -> Result<RawValue, ExceptionInfo> {
    let a = Args::new(name, args, kwargs);
    a.allow_keywords(&["sep", "maxsplit"])?;
    a.max_positional(3)?;
    let s = text(&a, name)?;
    let maxsplit = a.int_or(2, "maxsplit", -1)?;
    let parts: Vec<String> = match a.opt_str(1, "sep")? {
        None => split_whitespace(s, maxsplit, from_right),
        Some("") => return Err(ExceptionInfo::value_error("empty separator")),
        Some(sep) if maxsplit < 0 => s.split(sep).map(str::to_string).collect(),
        Some(sep) if from_right => {
            let mut parts: Vec<String> =
                s.rsplitn(maxsplit as usize + 1, sep).map(str::to_string).collect();
            parts.reverse();
            parts
        }
        Some(sep) => s.splitn(maxsplit as usize + 1, sep).map(str::to_string).collect(),
    };
    Ok(RawValue::str_list(parts))
}

pub fn intrinsic_str_split(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    split_with("split", args, kwargs, false)
}

pub fn intrinsic_str_rsplit(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    split_with("rsplit", args, kwargs, true)
}

pub fn intrinsic_str_splitlines(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let a = Args::new("splitlines", args, kwargs);
    a.allow_keywords(&["keepends"])?;
    a.max_positional(2)?;
    let s = text(&a, "splitlines")?;
    let keepends = a.get(1, "keepends").is_some_and(RawValue::truthy);
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\n' || c == '\r' {
            let crlf = c == '\r' && chars.peek() == Some(&'\n');
            if keepends {
                current.push(c);
                if crlf {
                    current.push('\n');
                }
            }
            if crlf {
                chars.next();
            }
            lines.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    Ok(RawValue::str_list(lines))
}

/// `str.format` with auto/manual numbering, keyword fields, `!r`/`!s`/`!a`
/// conversions and format specs.
pub fn intrinsic_str_format(
    args: &[RawValue],
    kwargs: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let a = Args::new("format", args, kwargs);
    let template = text(&a, "format")?;
    let positional = &args[1..];
    let mut out = String::with_capacity(template.len());
    let mut auto_index = 0usize;
    let mut numbering: Option<bool> = None;
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => {
                return Err(ExceptionInfo::value_error("Single '}' encountered in format string"))
            }
            '{' => {
                let mut field = String::new();
                let mut closed = false;
                for f in chars.by_ref() {
                    if f == '}' {
                        closed = true;
                        break;
                    }
                    field.push(f);
                }
                if !closed {
                    let message = "Single '{' encountered in format string";
                    return Err(ExceptionInfo::value_error(message));
                }
                let (head, spec) = field.split_once(':').unwrap_or((field.as_str(), ""));
                let (name, conversion) = match head.split_once('!') {
                    Some((n, conv)) => (n, Some(conv)),
                    None => (head, None),
                };
                let value = if name.is_empty() || name.chars().all(|c| c.is_ascii_digit()) {
                    let manual = !name.is_empty();
                    if *numbering.get_or_insert(manual) != manual {
                        return Err(ExceptionInfo::value_error(if manual {
                            "cannot switch from automatic field numbering to manual field specification"
                        } else {
                            "cannot switch from manual field specification to automatic field numbering"
                        }));
                    }
                    let index = if manual {
                        name.parse::<usize>().map_err(|_| {
                            ExceptionInfo::value_error("Too many decimal digits in format string")
                        })?
                    } else {
                        auto_index += 1;
                        auto_index - 1
                    };
                    positional.get(index).ok_or_else(|| {
                        ExceptionInfo::index_error(format!(
                            "Replacement index {} out of range for positional args tuple",
                            index
                        ))
                    })?
                } else {
                    kwargs
                        .get(name)
                        .ok_or_else(|| ExceptionInfo::key_error(format!("'{}'", name)))?
                };
                let rendered = match conversion {
                    None => value.format_with_spec(spec)?,
                    Some(conv) => {
                        let converted = match conv {
                            "r" => value.py_repr(),
                            "s" => value.py_str(),
                            "a" => value.py_ascii(),
                            other => {
                                return Err(ExceptionInfo::value_error(format!(
                                    "Unknown conversion specifier {}",
                                    other
                                )))
                            }
                        };
                        RawValue::Str(converted).format_with_spec(spec)?
                    }
                };
                out.push_str(&rendered);
            }
            other => out.push(other),
        }
    }
    Ok(RawValue::Str(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(f: IntrinsicFn, args: Vec<RawValue>) -> Result<RawValue, ExceptionInfo> {
        f(&args, &IndexMap::new())
    }

    fn call_kw(
        f: IntrinsicFn,
        args: Vec<RawValue>,
        kwargs: &[(&str, RawValue)],
    ) -> Result<RawValue, ExceptionInfo> {
        let kwargs = kwargs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        f(&args, &kwargs)
    }

    #[test]
    fn test_every_builtin_resolves() {
        for name in BUILTIN_FUNCTIONS {
            assert!(IntrinsicRegistry::resolve(name).is_some(), "missing builtin {}", name);
        }
        let tables = [("dict", DICT_METHODS), ("list", LIST_METHODS), ("str", STR_METHODS)];
        for (ty, methods) in tables {
            for m in methods {
                assert!(builtin_method(ty, m).is_some(), "missing method {}.{}", ty, m);
            }
        }
        assert!(builtin_method("list", "append").is_none());
        assert_eq!(IntrinsicRegistry::builtins().len(), BUILTIN_FUNCTIONS.len());
    }

    #[test]
    fn test_len_and_type() {
        assert_eq!(call(intrinsic_len, vec!["héllo".into()]).unwrap(), RawValue::Int(5));
        let err = call(intrinsic_len, vec![RawValue::Int(3)]).unwrap_err();
        assert_eq!(err.message, "object of type 'int' has no len()");
        assert_eq!(
            call(intrinsic_type, vec![RawValue::Float(1.0)]).unwrap(),
            RawValue::str("float")
        );
    }

    #[test]
    fn test_int_conversion() {
        assert_eq!(call(intrinsic_int, vec![" -1_000 ".into()]).unwrap(), RawValue::Int(-1000));
        assert_eq!(
            call_kw(intrinsic_int, vec!["ff".into()], &[("base", RawValue::Int(16))]).unwrap(),
            RawValue::Int(255)
        );
        assert_eq!(call(intrinsic_int, vec![RawValue::Float(-2.7)]).unwrap(), RawValue::Int(-2));
        let err = call(intrinsic_int, vec!["12a".into()]).unwrap_err();
        assert_eq!(err.message, "invalid literal for int() with base 10: '12a'");
        let err = call(intrinsic_int, vec!["99999999999999999999".into()]).unwrap_err();
        assert_eq!(err.kind, crate::exception::ErrorKind::OverflowError);
    }

    #[test]
    fn test_divmod_floors() {
        assert_eq!(
            call(intrinsic_divmod, vec![RawValue::Int(-7), RawValue::Int(2)]).unwrap(),
            RawValue::Tuple(vec![RawValue::Int(-4), RawValue::Int(1)])
        );
        assert_eq!(
            call(intrinsic_divmod, vec![RawValue::Int(7), RawValue::Int(-2)]).unwrap(),
            RawValue::Tuple(vec![RawValue::Int(-4), RawValue::Int(-1)])
        );
    }

    #[test]
    fn test_range_shapes() {
        assert_eq!(
            call(intrinsic_range, vec![RawValue::Int(3)]).unwrap().py_repr(),
            "[0, 1, 2]"
        );
        assert_eq!(
            call(intrinsic_range, vec![RawValue::Int(5), RawValue::Int(0), RawValue::Int(-2)])
                .unwrap()
                .py_repr(),
            "[5, 3, 1]"
        );
        let err = call(intrinsic_range, vec![RawValue::Int(0), RawValue::Int(1), RawValue::Int(0)])
            .unwrap_err();
        assert_eq!(err.message, "range() arg 3 must not be zero");
    }

    #[test]
    fn test_sorted_reverse_and_key() {
        let words = RawValue::str_list(["bb", "a", "ccc", "dd"]);
        let by_len = call_kw(
            intrinsic_sorted,
            vec![words.clone()],
            &[("key", RawValue::Callable { name: "len".into(), is_class: false })],
        )
        .unwrap();
        assert_eq!(by_len.py_repr(), "['a', 'bb', 'dd', 'ccc']");
        let reverse = [("reverse", RawValue::Bool(true))];
        let reversed = call_kw(intrinsic_sorted, vec![words], &reverse).unwrap();
        assert_eq!(reversed.py_repr(), "['dd', 'ccc', 'bb', 'a']");
        let err = call(
            intrinsic_sorted,
            vec![RawValue::List(vec![RawValue::Int(1), "a".into()])],
        )
        .unwrap_err();
        assert_eq!(err.message, "'<' not supported between instances of 'str' and 'int'");
    }

    #[test]
    fn test_max_min() {
        let mixed = vec![RawValue::Int(1), RawValue::Float(3.5), RawValue::Int(2)];
        assert_eq!(call(intrinsic_max, mixed).unwrap(), RawValue::Float(3.5));
        let err = call(intrinsic_min, vec![RawValue::List(vec![])]).unwrap_err();
        assert_eq!(err.message, "min() iterable argument is empty");
        let default = [("default", RawValue::None)];
        assert_eq!(
            call_kw(intrinsic_min, vec![RawValue::List(vec![])], &default).unwrap(),
            RawValue::None
        );
    }

    #[test]
    fn test_sum_and_zip() {
        let nums = RawValue::List(vec![RawValue::Int(1), RawValue::Float(0.5)]);
        assert_eq!(call(intrinsic_sum, vec![nums]).unwrap(), RawValue::Float(1.5));
        let ints = RawValue::List(vec![RawValue::Int(1), RawValue::Int(2)]);
        let zipped = call(intrinsic_zip, vec![RawValue::str_list(["a", "b", "c"]), ints]).unwrap();
        assert_eq!(zipped.py_repr(), "[('a', 1), ('b', 2)]");
    }

    #[test]
    fn test_str_split_variants() {
        let split = |args: Vec<RawValue>| call(intrinsic_str_split, args).unwrap().py_repr();
        assert_eq!(split(vec!["  a b\tc  ".into()]), "['a', 'b', 'c']");
        assert_eq!(split(vec!["a,b,,c".into(), ",".into()]), "['a', 'b', '', 'c']");
        assert_eq!(
            split(vec!["a b c".into(), RawValue::None, RawValue::Int(1)]),
            "['a', 'b c']"
        );
        let rsplit_args = vec!["a.b.c".into(), ".".into(), RawValue::Int(1)];
        let rsplit = call(intrinsic_str_rsplit, rsplit_args).unwrap();
        assert_eq!(rsplit.py_repr(), "['a.b', 'c']");
        let lines = call(intrinsic_str_splitlines, vec!["x\r\ny\nz".into()]).unwrap();
        assert_eq!(lines.py_repr(), "['x', 'y', 'z']");
    }

    #[test]
    fn test_str_search() {
        assert_eq!(
            call(intrinsic_str_find, vec!["héllo".into(), "l".into()]).unwrap(),
            RawValue::Int(2)
        );
        assert_eq!(
            call(intrinsic_str_rfind, vec!["héllo".into(), "l".into()]).unwrap(),
            RawValue::Int(3)
        );
        assert_eq!(
            call(intrinsic_str_find, vec!["abc".into(), "z".into()]).unwrap(),
            RawValue::Int(-1)
        );
        let err = call(intrinsic_str_index, vec!["abc".into(), "z".into()]).unwrap_err();
        assert_eq!(err.message, "substring not found");
        assert_eq!(
            call(intrinsic_str_count, vec!["aaaa".into(), "aa".into()]).unwrap(),
            RawValue::Int(2)
        );
        let prefixes = RawValue::Tuple(vec!["x".into(), "he".into()]);
        assert_eq!(
            call(intrinsic_str_startswith, vec!["hello".into(), prefixes]).unwrap(),
            RawValue::Bool(true)
        );
    }

    #[test]
    fn test_str_case_methods() {
        assert_eq!(
            call(intrinsic_str_title, vec!["hello wORLD".into()]).unwrap(),
            RawValue::str("Hello World")
        );
        assert_eq!(
            call(intrinsic_str_capitalize, vec!["hELLO".into()]).unwrap(),
            RawValue::str("Hello")
        );
        assert_eq!(
            call(intrinsic_str_istitle, vec!["Hello World".into()]).unwrap(),
            RawValue::Bool(true)
        );
        assert_eq!(
            call(intrinsic_str_istitle, vec!["Hello world".into()]).unwrap(),
            RawValue::Bool(false)
        );
        assert_eq!(call(intrinsic_str_isdigit, vec!["".into()]).unwrap(), RawValue::Bool(false));
    }

    #[test]
    fn test_str_format() {
        let out = call_kw(
            intrinsic_str_format,
            vec!["{} has {n} item{}: {!r}{{}}".into(), "cart".into(), "s".into(), "x".into()],
            &[("n", RawValue::Int(3))],
        )
        .unwrap();
        assert_eq!(out, RawValue::str("cart has 3 items: 'x'{}"));
        let err = call(intrinsic_str_format, vec!["{0} {}".into(), RawValue::Int(1)]).unwrap_err();
        assert_eq!(
            err.message,
            "cannot switch from manual field specification to automatic field numbering"
        );
        let err = call(intrinsic_str_format, vec!["{}".into()]).unwrap_err();
        assert_eq!(err.kind, crate::exception::ErrorKind::IndexError);
    }

    #[test]
    fn test_str_join_and_partition() {
        let parts = RawValue::str_list(["a", "b"]);
        let joined = call(intrinsic_str_join, vec![", ".into(), parts]).unwrap();
        assert_eq!(joined, RawValue::str("a, b"));
        let err = call(
            intrinsic_str_join,
            vec!["".into(), RawValue::List(vec!["a".into(), RawValue::Int(1)])],
        )
        .unwrap_err();
        assert_eq!(err.message, "sequence item 1: expected str instance, int found");
        let parts = call(intrinsic_str_rpartition, vec!["a=b=c".into(), "=".into()]).unwrap();
        assert_eq!(parts.py_repr(), "('a=b', '=', 'c')");
    }

    #[test]
    fn test_dict_methods() {
        let d = RawValue::dict_from([
            ("a".into(), RawValue::Int(1)),
            ("b".into(), RawValue::Int(2)),
        ]);
        assert_eq!(
            call(intrinsic_dict_get, vec![d.clone(), "b".into()]).unwrap(),
            RawValue::Int(2)
        );
        assert_eq!(
            call(intrinsic_dict_get, vec![d.clone(), "z".into(), RawValue::Int(0)]).unwrap(),
            RawValue::Int(0)
        );
        assert_eq!(call(intrinsic_dict_items, vec![d]).unwrap().py_repr(), "[('a', 1), ('b', 2)]");
        let empty = RawValue::List(vec![]);
        let err = call(intrinsic_list_index, vec![empty, RawValue::Int(4)]).unwrap_err();
        assert_eq!(err.message, "4 is not in list");
    }
}
