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

//! Operator protocols.
//!
//! Binary operators dispatch left operand first. When the left side does not
//! implement the operation for the given right side, the reflected form is
//! tried on the right operand, and only then does the operation fail with a
//! `TypeError`. Every result is owned by the interpreter and depends on both
//! operands.

use crate::ast::{BinOp, CmpOp, UnaryOp};
use crate::capabilities::Capabilities;
use crate::exception::ExceptionInfo;
use crate::raw::RawValue;
use crate::value::{value_from_raw, Namespace, Value, ValueKind};
use std::cmp::Ordering;

/// Upper bound on the length of sequences built by repetition.
pub const MAX_SEQUENCE_LEN: usize = 10_000_000;

/// `None` is the "not implemented" sentinel.
type Dispatch = Option<Result<Value, ExceptionInfo>>;

#[derive(Clone, Copy)]
enum Num {
    I(i64),
    F(f64),
}

fn num(v: &Value) -> Option<Num> {
    match v.kind() {
        ValueKind::Bool(b) => Some(Num::I(*b as i64)),
        ValueKind::Int(i) => Some(Num::I(*i)),
        ValueKind::Float(f) => Some(Num::F(*f)),
        _ => None,
    }
}

fn as_f64(n: Num) -> f64 {
    match n {
        Num::I(i) => i as f64,
        Num::F(f) => f,
    }
}

fn owned(kind_value: ValueKind, l: &Value, r: &Value) -> Value {
    Value::new(kind_value, Capabilities::camel(), vec![l.clone(), r.clone()])
}

fn int_result(i: i64, l: &Value, r: &Value) -> Result<Value, ExceptionInfo> {
    Ok(owned(ValueKind::Int(i), l, r))
}

fn float_result(f: f64, l: &Value, r: &Value) -> Result<Value, ExceptionInfo> {
    Ok(owned(ValueKind::Float(f), l, r))
}

fn overflow() -> ExceptionInfo {
    ExceptionInfo::overflow("integer overflow")
}

/// Character values of a string operand.
fn chars_of(v: &Value) -> Option<Vec<Value>> {
    match v.kind() {
        ValueKind::Str { chars, .. } => Some(chars.to_vec()),
        ValueKind::Char(_) => Some(vec![v.clone()]),
        _ => None,
    }
}

fn is_date_like(v: &Value) -> bool {
    v.as_instance().map_or(false, |inst| {
        matches!(
            inst.host,
            Some(
                RawValue::DateTime { .. }
                    | RawValue::Date(_)
                    | RawValue::Time(_)
                    | RawValue::TimeDelta(_)
                    | RawValue::TimeZone(_)
            )
        )
    })
}

// ============================================================================
// PROTOCOL SUPPORT
// ============================================================================

/// Whether values of this kind implement `op` at all, in the forward or
/// reflected position.
fn supports(op: BinOp, v: &Value, reflected: bool) -> bool {
    let numeric = num(v).is_some();
    let integral = matches!(v.kind(), ValueKind::Int(_) | ValueKind::Bool(_));
    let text = chars_of(v).is_some();
    let seq = matches!(v.kind(), ValueKind::List(_) | ValueKind::Tuple(_));
    let set = matches!(v.kind(), ValueKind::Set(_));
    let dict = matches!(v.kind(), ValueKind::Dict(_));
    match op {
        BinOp::Add => numeric || (!reflected && (text || seq)),
        BinOp::Sub => numeric || (!reflected && set),
        BinOp::Mult => numeric || text || seq,
        BinOp::Div | BinOp::FloorDiv | BinOp::Mod | BinOp::Pow => numeric,
        BinOp::LShift | BinOp::RShift => integral,
        BinOp::BitAnd | BinOp::BitXor => integral || set,
        BinOp::BitOr => integral || set || dict,
        BinOp::MatMult => false,
    }
}

// ============================================================================
// BINARY OPERATORS
// ============================================================================

pub fn binary(
    op: BinOp,
    left: &Value,
    right: &Value,
    namespace: &Namespace,
) -> Result<Value, ExceptionInfo> {
    if is_date_like(left) || is_date_like(right) {
        return match crate::datetime::binary_op(op, &left.to_raw(), &right.to_raw()) {
            Some(raw) => value_from_raw(
                &raw?,
                &Capabilities::camel(),
                namespace,
                vec![left.clone(), right.clone()],
            ),
            None => Err(unsupported(op, left, right)),
        };
    }
    if supports(op, left, false) {
        if let Some(result) = forward(op, left, right) {
            return result;
        }
    }
    if supports(op, right, true) && supports(op, right, false) {
        if let Some(result) = reflected(op, left, right) {
            return result;
        }
    }
    Err(unsupported(op, left, right))
}

fn unsupported(op: BinOp, left: &Value, right: &Value) -> ExceptionInfo {
    ExceptionInfo::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op.symbol(),
        left.type_name(),
        right.type_name()
    ))
}

fn forward(op: BinOp, l: &Value, r: &Value) -> Dispatch {
    if let (Some(a), Some(b)) = (num(l), num(r)) {
        return numeric(op, a, b, l, r);
    }
    match op {
        BinOp::Add => concat(l, r),
        BinOp::Mult => repeat(l, r, l),
        BinOp::Sub | BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor => set_or_dict_op(op, l, r),
        _ => None,
    }
}

/// `right.__rop__(left)`: only repetition (`3 * "ab"`) and numeric
/// promotion reach here.
fn reflected(op: BinOp, l: &Value, r: &Value) -> Dispatch {
    if let (Some(a), Some(b)) = (num(l), num(r)) {
        return numeric(op, a, b, l, r);
    }
    match op {
        BinOp::Mult => repeat(r, l, l),
        _ => None,
    }
}

fn numeric(op: BinOp, a: Num, b: Num, l: &Value, r: &Value) -> Dispatch {
    let both_bool = matches!(
        (l.kind(), r.kind()),
        (ValueKind::Bool(_), ValueKind::Bool(_))
    );
    Some(match (a, b) {
        (Num::I(x), Num::I(y)) => match op {
            BinOp::Add => x.checked_add(y).ok_or_else(overflow).and_then(|v| int_result(v, l, r)),
            BinOp::Sub => x.checked_sub(y).ok_or_else(overflow).and_then(|v| int_result(v, l, r)),
            BinOp::Mult => x.checked_mul(y).ok_or_else(overflow).and_then(|v| int_result(v, l, r)),
            BinOp::Div => {
                if y == 0 {
                    Err(ExceptionInfo::zero_division("division by zero"))
                } else {
                    float_result(x as f64 / y as f64, l, r)
                }
            }
            BinOp::FloorDiv => {
                if y == 0 {
                    Err(ExceptionInfo::zero_division("integer division or modulo by zero"))
                } else {
                    floor_div_int(x, y).and_then(|v| int_result(v, l, r))
                }
            }
            BinOp::Mod => {
                if y == 0 {
                    Err(ExceptionInfo::zero_division("integer modulo by zero"))
                } else {
                    int_result(mod_int(x, y), l, r)
                }
            }
            BinOp::Pow => pow_int(x, y, l, r),
            BinOp::LShift => shift_left(x, y).and_then(|v| int_result(v, l, r)),
            BinOp::RShift => shift_right(x, y).and_then(|v| int_result(v, l, r)),
            BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor => {
                let v = match op {
                    BinOp::BitAnd => x & y,
                    BinOp::BitOr => x | y,
                    _ => x ^ y,
                };
                if both_bool {
                    Ok(owned(ValueKind::Bool(v != 0), l, r))
                } else {
                    int_result(v, l, r)
                }
            }
            BinOp::MatMult => return None,
        },
        (a, b) => {
            let (x, y) = (as_f64(a), as_f64(b));
            match op {
                BinOp::Add => float_result(x + y, l, r),
                BinOp::Sub => float_result(x - y, l, r),
                BinOp::Mult => float_result(x * y, l, r),
                BinOp::Div => {
                    if y == 0.0 {
                        Err(ExceptionInfo::zero_division("float division by zero"))
                    } else {
                        float_result(x / y, l, r)
                    }
                }
                BinOp::FloorDiv => {
                    if y == 0.0 {
                        Err(ExceptionInfo::zero_division("float floor division by zero"))
                    } else {
                        float_result((x / y).floor(), l, r)
                    }
                }
                BinOp::Mod => {
                    if y == 0.0 {
                        Err(ExceptionInfo::zero_division("float modulo"))
                    } else {
                        float_result(mod_float(x, y), l, r)
                    }
                }
                BinOp::Pow => {
                    if x == 0.0 && y < 0.0 {
                        Err(ExceptionInfo::zero_division(
                            "0.0 cannot be raised to a negative power",
                        ))
                    } else {
                        float_result(x.powf(y), l, r)
                    }
                }
                _ => return None,
            }
        }
    })
}

fn floor_div_int(x: i64, y: i64) -> Result<i64, ExceptionInfo> {
    let q = x.checked_div(y).ok_or_else(overflow)?;
    if (x % y != 0) && ((x < 0) != (y < 0)) {
        Ok(q - 1)
    } else {
        Ok(q)
    }
}

fn mod_int(x: i64, y: i64) -> i64 {
    let m = x.wrapping_rem(y);
    if m != 0 && ((m < 0) != (y < 0)) {
        m + y
    } else {
        m
    }
}

fn mod_float(x: f64, y: f64) -> f64 {
    let m = x % y;
    if m != 0.0 && ((m < 0.0) != (y < 0.0)) {
        m + y
    } else {
        m
    }
}

fn pow_int(x: i64, y: i64, l: &Value, r: &Value) -> Result<Value, ExceptionInfo> {
    if y < 0 {
        if x == 0 {
            return Err(ExceptionInfo::zero_division(
                "0.0 cannot be raised to a negative power",
            ));
        }
        return float_result((x as f64).powf(y as f64), l, r);
    }
    let exp = u32::try_from(y).map_err(|_| overflow())?;
    x.checked_pow(exp)
        .ok_or_else(overflow)
        .and_then(|v| int_result(v, l, r))
}

fn shift_left(x: i64, n: i64) -> Result<i64, ExceptionInfo> {
    if n < 0 {
        return Err(ExceptionInfo::value_error("negative shift count"));
    }
    if x == 0 {
        return Ok(0);
    }
    if n >= 63 {
        return Err(overflow());
    }
    let shifted = x << n;
    if shifted >> n != x {
        return Err(overflow());
    }
    Ok(shifted)
}

fn shift_right(x: i64, n: i64) -> Result<i64, ExceptionInfo> {
    if n < 0 {
        return Err(ExceptionInfo::value_error("negative shift count"));
    }
    Ok(if n >= 64 { if x < 0 { -1 } else { 0 } } else { x >> n })
}

fn concat(l: &Value, r: &Value) -> Dispatch {
    if let (Some(mut a), Some(b)) = (chars_of(l), chars_of(r)) {
        a.extend(b);
        return Some(Ok(Value::str_from_chars(
            a,
            Capabilities::camel(),
            vec![l.clone(), r.clone()],
        )));
    }
    let deps = vec![l.clone(), r.clone()];
    match (l.kind(), r.kind()) {
        (ValueKind::List(_), ValueKind::List(_)) => {
            let mut items = l.elements()?;
            items.extend(r.elements()?);
            Some(Ok(Value::list(items, Capabilities::camel(), deps)))
        }
        (ValueKind::Tuple(_), ValueKind::Tuple(_)) => {
            let mut items = l.elements()?;
            items.extend(r.elements()?);
            Some(Ok(Value::tuple(items, Capabilities::camel(), deps)))
        }
        _ => None,
    }
}

/// `seq * times`; `first` is the left operand for dependency order.
fn repeat(seq: &Value, times: &Value, first: &Value) -> Dispatch {
    let n = match times.kind() {
        ValueKind::Int(i) => *i,
        ValueKind::Bool(b) => *b as i64,
        _ => return None,
    };
    let second = if first.ptr_eq(seq) { times } else { seq };
    let deps = vec![first.clone(), second.clone()];
    let items = match seq.kind() {
        ValueKind::Str { .. } | ValueKind::Char(_) => chars_of(seq)?,
        ValueKind::List(_) | ValueKind::Tuple(_) => seq.elements()?,
        _ => return None,
    };
    let n = n.max(0) as usize;
    if items.len().saturating_mul(n) > MAX_SEQUENCE_LEN {
        return Some(Err(ExceptionInfo::overflow("repeated sequence is too long")));
    }
    let mut out = Vec::with_capacity(items.len() * n);
    for _ in 0..n {
        out.extend(items.iter().cloned());
    }
    Some(Ok(match seq.kind() {
        ValueKind::List(_) => Value::list(out, Capabilities::camel(), deps),
        ValueKind::Tuple(_) => Value::tuple(out, Capabilities::camel(), deps),
        _ => Value::str_from_chars(out, Capabilities::camel(), deps),
    }))
}

fn set_or_dict_op(op: BinOp, l: &Value, r: &Value) -> Dispatch {
    let deps = vec![l.clone(), r.clone()];
    match (l.kind(), r.kind()) {
        (ValueKind::Set(a), ValueKind::Set(b)) => {
            let contains = |items: &[Value], v: &Value| items.iter().any(|x| x.eq_value(v));
            let items: Vec<Value> = match op {
                BinOp::BitOr => a.iter().chain(b.iter()).cloned().collect(),
                BinOp::BitAnd => a.iter().filter(|v| contains(b, v)).cloned().collect(),
                BinOp::Sub => a.iter().filter(|v| !contains(b, v)).cloned().collect(),
                BinOp::BitXor => a
                    .iter()
                    .filter(|v| !contains(b, v))
                    .chain(b.iter().filter(|v| !contains(a, v)))
                    .cloned()
                    .collect(),
                _ => return None,
            };
            Some(Value::set(items, Capabilities::camel(), deps))
        }
        (ValueKind::Dict(_), ValueKind::Dict(_)) if op == BinOp::BitOr => {
            let mut entries = l.dict_entries()?;
            entries.extend(r.dict_entries()?);
            Some(Value::dict(entries, Capabilities::camel(), deps))
        }
        _ => None,
    }
}

// ============================================================================
// UNARY OPERATORS
// ============================================================================

pub fn unary(op: UnaryOp, operand: &Value, namespace: &Namespace) -> Result<Value, ExceptionInfo> {
    if op == UnaryOp::Not {
        return Ok(operand.not());
    }
    let deps = vec![operand.clone()];
    let bad = || {
        ExceptionInfo::type_error(format!(
            "bad operand type for unary {}: '{}'",
            op.symbol(),
            operand.type_name()
        ))
    };
    if let Some(RawValue::TimeDelta(d)) = operand.as_instance().and_then(|i| i.host.as_ref()) {
        let raw = match op {
            UnaryOp::USub => RawValue::TimeDelta(-*d),
            UnaryOp::UAdd => RawValue::TimeDelta(*d),
            _ => return Err(bad()),
        };
        return value_from_raw(&raw, &Capabilities::camel(), namespace, deps);
    }
    let kind = match (op, num(operand).ok_or_else(bad)?) {
        (UnaryOp::USub, Num::I(i)) => ValueKind::Int(i.checked_neg().ok_or_else(overflow)?),
        (UnaryOp::USub, Num::F(f)) => ValueKind::Float(-f),
        (UnaryOp::UAdd, Num::I(i)) => ValueKind::Int(i),
        (UnaryOp::UAdd, Num::F(f)) => ValueKind::Float(f),
        (UnaryOp::Invert, Num::I(i)) => ValueKind::Int(!i),
        _ => return Err(bad()),
    };
    Ok(Value::new(kind, Capabilities::camel(), deps))
}

// ============================================================================
// COMPARISONS
// ============================================================================

pub fn compare(op: CmpOp, left: &Value, right: &Value) -> Result<Value, ExceptionInfo> {
    let boolean = |b: bool| {
        Value::bool(b, Capabilities::camel(), vec![left.clone(), right.clone()])
    };
    match op {
        CmpOp::Eq => Ok(boolean(left.eq_value(right))),
        CmpOp::NotEq => Ok(boolean(!left.eq_value(right))),
        CmpOp::Is => Ok(boolean(left.is_same(right))),
        CmpOp::IsNot => Ok(boolean(!left.is_same(right))),
        CmpOp::In => contains(right, left),
        CmpOp::NotIn => {
            let found = contains(right, left)?;
            Ok(Value::bool(
                !found.truthy(),
                found.capabilities().clone(),
                found.outer_dependencies().to_vec(),
            ))
        }
        CmpOp::Lt | CmpOp::LtE | CmpOp::Gt | CmpOp::GtE => {
            if let (ValueKind::Set(a), ValueKind::Set(b)) = (left.kind(), right.kind()) {
                return Ok(boolean(set_compare(op, a, b)));
            }
            let ordering = order(left, right).ok_or_else(|| {
                ExceptionInfo::type_error(format!(
                    "'{}' not supported between instances of '{}' and '{}'",
                    op.symbol(),
                    left.type_name(),
                    right.type_name()
                ))
            })?;
            let result = match ordering {
                // NaN compares false both ways.
                None => false,
                Some(o) => match op {
                    CmpOp::Lt => o == Ordering::Less,
                    CmpOp::LtE => o != Ordering::Greater,
                    CmpOp::Gt => o == Ordering::Greater,
                    _ => o != Ordering::Less,
                },
            };
            Ok(boolean(result))
        }
    }
}

/// `Some(None)` for comparable-but-unordered pairs (NaN), `None` when the
/// types cannot be ordered at all.
fn order(left: &Value, right: &Value) -> Option<Option<Ordering>> {
    if let (Some(a), Some(b)) = (num(left), num(right)) {
        return Some(match (a, b) {
            (Num::I(x), Num::I(y)) => Some(x.cmp(&y)),
            (a, b) => as_f64(a).partial_cmp(&as_f64(b)),
        });
    }
    match (left.kind(), right.kind()) {
        (ValueKind::List(_), ValueKind::List(_)) | (ValueKind::Tuple(_), ValueKind::Tuple(_)) => {
            let (a, b) = (left.elements()?, right.elements()?);
            for (x, y) in a.iter().zip(&b) {
                if !x.eq_value(y) {
                    return order(x, y);
                }
            }
            Some(Some(a.len().cmp(&b.len())))
        }
        (ValueKind::Instance(a), ValueKind::Instance(b)) => {
            if a.class.is_totally_ordered && b.class.is_totally_ordered {
                let ordering = left.to_raw().py_cmp(&right.to_raw())?;
                Some(Some(ordering))
            } else {
                None
            }
        }
        _ if chars_of(left).is_some() && chars_of(right).is_some() => {
            Some(left.to_raw().py_cmp(&right.to_raw()))
        }
        _ => None,
    }
}

fn set_compare(op: CmpOp, a: &[Value], b: &[Value]) -> bool {
    let subset = |x: &[Value], y: &[Value]| x.iter().all(|v| y.iter().any(|w| w.eq_value(v)));
    match op {
        CmpOp::LtE => subset(a, b),
        CmpOp::Lt => subset(a, b) && a.len() < b.len(),
        CmpOp::GtE => subset(b, a),
        _ => subset(b, a) && a.len() > b.len(),
    }
}

/// `item in container`. A positive answer depends on the matching element;
/// a negative one reveals something about every element, so it depends on
/// the whole container.
pub fn contains(container: &Value, item: &Value) -> Result<Value, ExceptionInfo> {
    let camel = Capabilities::camel;
    match container.kind() {
        ValueKind::Str { .. } | ValueKind::Char(_) => {
            let needle = chars_of(item).ok_or_else(|| {
                ExceptionInfo::type_error(format!(
                    "'in <string>' requires string as left operand, not {}",
                    item.type_name()
                ))
            })?;
            let needle: String = needle.iter().filter_map(Value::as_char).collect();
            let haystack: String = chars_of(container)
                .unwrap_or_default()
                .iter()
                .filter_map(Value::as_char)
                .collect();
            Ok(Value::bool(
                haystack.contains(&needle),
                camel(),
                vec![container.clone(), item.clone()],
            ))
        }
        ValueKind::List(_) | ValueKind::Tuple(_) | ValueKind::Set(_) | ValueKind::Dict(_) => {
            let candidates = match container.dict_entries() {
                Some(entries) => entries.into_iter().map(|(k, _)| k).collect(),
                None => container.elements().unwrap_or_default(),
            };
            match candidates.into_iter().find(|el| el.eq_value(item)) {
                Some(el) => Ok(Value::bool(
                    true,
                    camel(),
                    vec![container.clone(), item.clone(), el],
                )),
                None => Ok(Value::bool(
                    false,
                    camel(),
                    vec![container.clone(), item.clone()],
                )),
            }
        }
        _ => Err(ExceptionInfo::type_error(format!(
            "argument of type '{}' is not iterable",
            container.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{get_all_readers, get_all_sources, Readers, Source};
    use crate::exception::ErrorKind;
    use crate::prelude;

    fn user_int(i: i64) -> Value {
        Value::int(i, Capabilities::default_user(), vec![])
    }

    fn secret_str(s: &str) -> Value {
        Value::str(
            s,
            Capabilities::new([Source::tool("read_email")], Readers::restricted(["bob@x.com"])),
            vec![],
        )
    }

    #[test]
    fn test_int_arithmetic() {
        let ns = prelude::namespace();
        let (a, b) = (user_int(7), user_int(-2));
        let r = binary(BinOp::Add, &a, &b, &ns).unwrap();
        assert_eq!(r.as_int(), Some(5));
        assert!(r.outer_dependencies()[0].ptr_eq(&a));
        assert_eq!(binary(BinOp::FloorDiv, &a, &b, &ns).unwrap().as_int(), Some(-4));
        assert_eq!(binary(BinOp::Mod, &a, &b, &ns).unwrap().as_int(), Some(-1));
        assert_eq!(binary(BinOp::Div, &a, &b, &ns).unwrap().to_raw(), RawValue::Float(-3.5));
        assert_eq!(binary(BinOp::Pow, &a, &user_int(2), &ns).unwrap().as_int(), Some(49));
    }

    #[test]
    fn test_division_by_zero() {
        let ns = prelude::namespace();
        let err = binary(BinOp::Div, &user_int(1), &user_int(0), &ns).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ZeroDivisionError);
        assert_eq!(err.message, "division by zero");
    }

    #[test]
    fn test_overflow_is_reported() {
        let ns = prelude::namespace();
        let err = binary(BinOp::Mult, &user_int(i64::MAX), &user_int(2), &ns).unwrap_err();
        assert_eq!(err.kind, ErrorKind::OverflowError);
    }

    #[test]
    fn test_string_concat_keeps_char_provenance() {
        let ns = prelude::namespace();
        let public = Value::str("hi ", Capabilities::default_user(), vec![]);
        let secret = secret_str("bob");
        let joined = binary(BinOp::Add, &public, &secret, &ns).unwrap();
        assert_eq!(joined.as_text(), Some("hi bob"));
        let chars = joined.elements().unwrap();
        assert!(get_all_readers(&chars[0]).is_public());
        assert!(!get_all_readers(&chars[4]).is_public());
        assert!(get_all_sources(&chars[4]).contains(&Source::tool("read_email")));
    }

    #[test]
    fn test_reflected_repetition() {
        let ns = prelude::namespace();
        let s = Value::str("ab", Capabilities::default_user(), vec![]);
        let r = binary(BinOp::Mult, &user_int(3), &s, &ns).unwrap();
        assert_eq!(r.as_text(), Some("ababab"));
        let r = binary(BinOp::Mult, &s, &user_int(0), &ns).unwrap();
        assert_eq!(r.as_text(), Some(""));
    }

    #[test]
    fn test_unsupported_operands() {
        let ns = prelude::namespace();
        let s = Value::str("a", Capabilities::default_user(), vec![]);
        let err = binary(BinOp::Sub, &s, &user_int(1), &ns).unwrap_err();
        assert_eq!(err.message, "unsupported operand type(s) for -: 'str' and 'int'");
        let err = binary(BinOp::Add, &user_int(1), &s, &ns).unwrap_err();
        assert_eq!(err.message, "unsupported operand type(s) for +: 'int' and 'str'");
    }

    #[test]
    fn test_set_operations() {
        let ns = prelude::namespace();
        let caps = Capabilities::default_user;
        let a = Value::set(vec![user_int(1), user_int(2)], caps(), vec![]).unwrap();
        let b = Value::set(vec![user_int(2), user_int(3)], caps(), vec![]).unwrap();
        let union = binary(BinOp::BitOr, &a, &b, &ns).unwrap();
        assert_eq!(union.elements().unwrap().len(), 3);
        let inter = binary(BinOp::BitAnd, &a, &b, &ns).unwrap();
        assert_eq!(inter.to_raw().py_repr(), "{2}");
        let diff = binary(BinOp::Sub, &a, &b, &ns).unwrap();
        assert_eq!(diff.to_raw().py_repr(), "{1}");
        assert!(compare(CmpOp::LtE, &inter, &a).unwrap().truthy());
    }

    #[test]
    fn test_unary() {
        let ns = prelude::namespace();
        assert_eq!(unary(UnaryOp::USub, &user_int(3), &ns).unwrap().as_int(), Some(-3));
        assert_eq!(unary(UnaryOp::Invert, &user_int(0), &ns).unwrap().as_int(), Some(-1));
        let s = Value::str("x", Capabilities::default_user(), vec![]);
        let err = unary(UnaryOp::USub, &s, &ns).unwrap_err();
        assert_eq!(err.message, "bad operand type for unary -: 'str'");
        assert!(unary(UnaryOp::Not, &s, &ns).unwrap().as_int() == Some(0));
    }

    #[test]
    fn test_ordering() {
        let a = Value::tuple(vec![user_int(1), user_int(2)], Capabilities::default_user(), vec![]);
        let b = Value::tuple(vec![user_int(1), user_int(3)], Capabilities::default_user(), vec![]);
        assert!(compare(CmpOp::Lt, &a, &b).unwrap().truthy());
        let s = Value::str("a", Capabilities::default_user(), vec![]);
        let err = compare(CmpOp::Lt, &s, &user_int(1)).unwrap_err();
        assert_eq!(err.message, "'<' not supported between instances of 'str' and 'int'");
        let nan = Value::float(f64::NAN, Capabilities::default_user(), vec![]);
        assert!(!compare(CmpOp::GtE, &nan, &user_int(1)).unwrap().truthy());
    }

    #[test]
    fn test_contains_dependencies() {
        let secret = secret_str("alice");
        let needle = Value::str("lic", Capabilities::default_user(), vec![]);
        let found = compare(CmpOp::In, &needle, &secret).unwrap();
        assert!(found.truthy());
        assert!(!get_all_readers(&found).is_public());

        let items = vec![user_int(1), user_int(2)];
        let list = Value::list(items, Capabilities::default_user(), vec![]);
        let hit = contains(&list, &user_int(2)).unwrap();
        assert_eq!(hit.outer_dependencies().len(), 3);
        let miss = compare(CmpOp::NotIn, &user_int(5), &list).unwrap();
        assert!(miss.truthy());

        let err = contains(&secret, &user_int(1)).unwrap_err();
        assert_eq!(err.message, "'in <string>' requires string as left operand, not int");
        let err = contains(&user_int(1), &user_int(1)).unwrap_err();
        assert_eq!(err.message, "argument of type 'int' is not iterable");
    }
}
