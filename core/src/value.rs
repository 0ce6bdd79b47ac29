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

//! Tracked runtime values.
//!
//! A [`Value`] is a reference-counted node holding a payload, its own
//! [`Capabilities`] and the *outer dependencies* it was computed from.
//! Structural children (string characters, container elements, instance
//! fields, a bound receiver) are dependencies too, so provenance flows through
//! containers without being copied into every derived value.
//!
//! Values created by `new_with_dependencies` share their payload with the
//! original and differ only in identity and edges, mirroring how the same
//! object can be reached through several derivations.

use crate::capabilities::Capabilities;
use crate::class::{ClassDef, ClassKind, InstanceData};
use crate::exception::{ErrorKind, ExceptionInfo};
use crate::intrinsics;
use crate::raw::RawValue;
use indexmap::IndexMap;
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

/// Host callable: raw positional and keyword arguments in, raw value out.
pub type NativeFn =
    Rc<dyn Fn(&[RawValue], &IndexMap<String, RawValue>) -> Result<RawValue, ExceptionInfo>>;

/// A built-in function or method.
pub struct BuiltinDef {
    pub name: String,
    pub call: NativeFn,
    /// Receives its class, not an instance, as the bound receiver.
    pub is_class_method: bool,
}

impl BuiltinDef {
    pub fn new<F>(name: &str, f: F) -> Rc<Self>
    where
        F: Fn(&[RawValue], &IndexMap<String, RawValue>) -> Result<RawValue, ExceptionInfo>
            + 'static,
    {
        Rc::new(BuiltinDef {
            name: name.to_string(),
            call: Rc::new(f),
            is_class_method: false,
        })
    }

    pub fn class_method<F>(name: &str, f: F) -> Rc<Self>
    where
        F: Fn(&[RawValue], &IndexMap<String, RawValue>) -> Result<RawValue, ExceptionInfo>
            + 'static,
    {
        Rc::new(BuiltinDef {
            name: name.to_string(),
            call: Rc::new(f),
            is_class_method: true,
        })
    }
}

/// An externally supplied tool.
pub struct ToolDef {
    pub name: String,
    pub call: NativeFn,
    /// Capabilities attached to every output of the tool.
    pub capabilities: Option<Capabilities>,
}

impl ToolDef {
    pub fn new<F>(name: &str, f: F) -> Self
    where
        F: Fn(&[RawValue], &IndexMap<String, RawValue>) -> Result<RawValue, ExceptionInfo>
            + 'static,
    {
        ToolDef {
            name: name.to_string(),
            call: Rc::new(f),
            capabilities: None,
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = Some(capabilities);
        self
    }
}

/// Cursor over a snapshot of elements.
pub struct ValueIter {
    items: Vec<Value>,
    pos: usize,
}

#[derive(Clone)]
pub enum ValueKind {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// A single character of a string, with its own provenance.
    Char(char),
    Str {
        chars: Rc<[Value]>,
        text: Rc<str>,
    },
    Tuple(Rc<[Value]>),
    List(Rc<RefCell<Vec<Value>>>),
    Set(Rc<[Value]>),
    Dict(Rc<RefCell<Vec<(Value, Value)>>>),
    Iterator(Rc<RefCell<ValueIter>>),
    Builtin {
        def: Rc<BuiltinDef>,
        receiver: Option<Value>,
    },
    Function(Rc<ToolDef>),
    Class(Rc<ClassDef>),
    Instance(Rc<InstanceData>),
}

pub struct ValueData {
    kind: ValueKind,
    capabilities: Capabilities,
    dependencies: Vec<Value>,
}

#[derive(Clone)]
pub struct Value(Rc<ValueData>);

// ============================================================================
// CONSTRUCTION
// ============================================================================

impl Value {
    pub fn new(kind: ValueKind, capabilities: Capabilities, dependencies: Vec<Value>) -> Self {
        Value(Rc::new(ValueData {
            kind,
            capabilities,
            dependencies,
        }))
    }

    pub fn none(capabilities: Capabilities, dependencies: Vec<Value>) -> Self {
        Value::new(ValueKind::None, capabilities, dependencies)
    }

    pub fn bool(b: bool, capabilities: Capabilities, dependencies: Vec<Value>) -> Self {
        Value::new(ValueKind::Bool(b), capabilities, dependencies)
    }

    pub fn int(i: i64, capabilities: Capabilities, dependencies: Vec<Value>) -> Self {
        Value::new(ValueKind::Int(i), capabilities, dependencies)
    }

    pub fn float(f: f64, capabilities: Capabilities, dependencies: Vec<Value>) -> Self {
        Value::new(ValueKind::Float(f), capabilities, dependencies)
    }

    /// A string whose characters all carry `capabilities` and `dependencies`.
    pub fn str(text: &str, capabilities: Capabilities, dependencies: Vec<Value>) -> Self {
        let chars: Vec<Value> = text
            .chars()
            .map(|c| Value::new(ValueKind::Char(c), capabilities.clone(), dependencies.clone()))
            .collect();
        Value::str_from_chars(chars, capabilities, dependencies)
    }

    /// A string assembled from existing character values.
    pub fn str_from_chars(
        chars: Vec<Value>,
        capabilities: Capabilities,
        dependencies: Vec<Value>,
    ) -> Self {
        let text: String = chars.iter().filter_map(Value::as_char).collect();
        Value::new(
            ValueKind::Str {
                chars: chars.into(),
                text: text.into(),
            },
            capabilities,
            dependencies,
        )
    }

    pub fn tuple(items: Vec<Value>, capabilities: Capabilities, dependencies: Vec<Value>) -> Self {
        Value::new(ValueKind::Tuple(items.into()), capabilities, dependencies)
    }

    pub fn list(items: Vec<Value>, capabilities: Capabilities, dependencies: Vec<Value>) -> Self {
        Value::new(
            ValueKind::List(Rc::new(RefCell::new(items))),
            capabilities,
            dependencies,
        )
    }

    /// Builds a set; later duplicates (by equality) are dropped.
    pub fn set(
        items: Vec<Value>,
        capabilities: Capabilities,
        dependencies: Vec<Value>,
    ) -> Result<Self, ExceptionInfo> {
        let mut unique: Vec<Value> = Vec::with_capacity(items.len());
        for item in items {
            item.check_hashable()?;
            if !unique.iter().any(|u| u.eq_value(&item)) {
                unique.push(item);
            }
        }
        Ok(Value::new(ValueKind::Set(unique.into()), capabilities, dependencies))
    }

    /// Builds a dict, merging equal keys the way item assignment does.
    pub fn dict(
        pairs: Vec<(Value, Value)>,
        capabilities: Capabilities,
        dependencies: Vec<Value>,
    ) -> Result<Self, ExceptionInfo> {
        for (key, _) in &pairs {
            key.check_hashable()?;
        }
        let d = Value::new(
            ValueKind::Dict(Rc::new(RefCell::new(Vec::with_capacity(pairs.len())))),
            capabilities,
            dependencies,
        );
        if let ValueKind::Dict(entries) = d.kind() {
            let mut entries = entries.borrow_mut();
            for (k, v) in pairs {
                insert_key(&mut entries, k, v);
            }
        }
        Ok(d)
    }

    pub fn builtin(
        def: Rc<BuiltinDef>,
        receiver: Option<Value>,
        capabilities: Capabilities,
        dependencies: Vec<Value>,
    ) -> Self {
        Value::new(ValueKind::Builtin { def, receiver }, capabilities, dependencies)
    }

    pub fn function(tool: ToolDef) -> Self {
        Value::new(
            ValueKind::Function(Rc::new(tool)),
            Capabilities::camel(),
            vec![],
        )
    }

    pub fn class(def: ClassDef, capabilities: Capabilities, dependencies: Vec<Value>) -> Self {
        Value::new(ValueKind::Class(Rc::new(def)), capabilities, dependencies)
    }

    pub fn instance(
        class: Rc<ClassDef>,
        fields: IndexMap<String, Value>,
        host: Option<RawValue>,
        capabilities: Capabilities,
        dependencies: Vec<Value>,
    ) -> Self {
        Value::new(
            ValueKind::Instance(Rc::new(InstanceData {
                class,
                fields: RefCell::new(fields),
                frozen: Cell::new(false),
                host,
            })),
            capabilities,
            dependencies,
        )
    }

    /// Same payload, extra outer dependencies, new identity.
    pub fn new_with_dependencies(&self, extra: impl IntoIterator<Item = Value>) -> Value {
        let mut dependencies = self.0.dependencies.clone();
        dependencies.extend(extra);
        Value::new(self.0.kind.clone(), self.0.capabilities.clone(), dependencies)
    }

    /// Same payload and dependencies, different capabilities.
    pub fn new_with_capabilities(&self, capabilities: Capabilities) -> Value {
        Value::new(self.0.kind.clone(), capabilities, self.0.dependencies.clone())
    }
}

// ============================================================================
// INSPECTION
// ============================================================================

impl Value {
    pub fn kind(&self) -> &ValueKind {
        &self.0.kind
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.0.capabilities
    }

    pub fn outer_dependencies(&self) -> &[Value] {
        &self.0.dependencies
    }

    /// Identity of this node in the dependency graph.
    pub fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    pub fn ptr_eq(&self, other: &Value) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Outer dependencies followed by structural children.
    pub fn direct_dependencies(&self) -> Vec<Value> {
        let mut deps = self.0.dependencies.clone();
        match &self.0.kind {
            ValueKind::Str { chars, .. } => deps.extend(chars.iter().cloned()),
            ValueKind::Tuple(items) | ValueKind::Set(items) => deps.extend(items.iter().cloned()),
            ValueKind::List(items) => deps.extend(items.borrow().iter().cloned()),
            ValueKind::Dict(entries) => {
                for (k, v) in entries.borrow().iter() {
                    deps.push(k.clone());
                    deps.push(v.clone());
                }
            }
            ValueKind::Iterator(it) => deps.extend(it.borrow().items.iter().cloned()),
            ValueKind::Instance(inst) => deps.extend(inst.fields.borrow().values().cloned()),
            ValueKind::Builtin {
                receiver: Some(r), ..
            } => deps.push(r.clone()),
            _ => {}
        }
        deps
    }

    pub fn type_name(&self) -> String {
        match &self.0.kind {
            ValueKind::None => "NoneType".into(),
            ValueKind::Bool(_) => "bool".into(),
            ValueKind::Int(_) => "int".into(),
            ValueKind::Float(_) => "float".into(),
            ValueKind::Char(_) | ValueKind::Str { .. } => "str".into(),
            ValueKind::Tuple(_) => "tuple".into(),
            ValueKind::List(_) => "list".into(),
            ValueKind::Set(_) => "set".into(),
            ValueKind::Dict(_) => "dict".into(),
            ValueKind::Iterator(_) => "iterator".into(),
            ValueKind::Builtin { .. } => "builtin_function_or_method".into(),
            ValueKind::Function(_) => "function".into(),
            ValueKind::Class(_) => "type".into(),
            ValueKind::Instance(inst) => inst.class.name.clone(),
        }
    }

    pub fn as_char(&self) -> Option<char> {
        match &self.0.kind {
            ValueKind::Char(c) => Some(*c),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.0.kind {
            ValueKind::Str { text, .. } => Some(text),
            _ => None,
        }
    }

    /// Integer view; `bool` counts as an integer.
    pub fn as_int(&self) -> Option<i64> {
        match &self.0.kind {
            ValueKind::Bool(b) => Some(*b as i64),
            ValueKind::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_class(&self) -> Option<&Rc<ClassDef>> {
        match &self.0.kind {
            ValueKind::Class(def) => Some(def),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&Rc<InstanceData>> {
        match &self.0.kind {
            ValueKind::Instance(inst) => Some(inst),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self.0.kind, ValueKind::None)
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self.0.kind,
            ValueKind::Builtin { .. } | ValueKind::Function(_) | ValueKind::Class(_)
        )
    }

    pub fn is_mapping(&self) -> bool {
        matches!(self.0.kind, ValueKind::Dict(_))
    }

    pub fn is_iterable(&self) -> bool {
        matches!(
            self.0.kind,
            ValueKind::Str { .. }
                | ValueKind::Tuple(_)
                | ValueKind::List(_)
                | ValueKind::Set(_)
                | ValueKind::Iterator(_)
        )
    }

    /// Name used for policy lookup and the audit trail.
    pub fn callable_name(&self) -> Option<String> {
        match &self.0.kind {
            ValueKind::Builtin { def, .. } => Some(def.name.clone()),
            ValueKind::Function(tool) => Some(tool.name.clone()),
            ValueKind::Class(def) => Some(def.name.clone()),
            _ => None,
        }
    }

    pub fn receiver(&self) -> Option<&Value> {
        match &self.0.kind {
            ValueKind::Builtin { receiver, .. } => receiver.as_ref(),
            _ => None,
        }
    }

    /// Snapshot of sequence elements (str yields its character values).
    pub fn elements(&self) -> Option<Vec<Value>> {
        match &self.0.kind {
            ValueKind::Str { chars, .. } => Some(chars.to_vec()),
            ValueKind::Tuple(items) | ValueKind::Set(items) => Some(items.to_vec()),
            ValueKind::List(items) => Some(items.borrow().clone()),
            _ => None,
        }
    }

    pub fn dict_entries(&self) -> Option<Vec<(Value, Value)>> {
        match &self.0.kind {
            ValueKind::Dict(entries) => Some(entries.borrow().clone()),
            _ => None,
        }
    }

    pub fn truthy(&self) -> bool {
        match &self.0.kind {
            ValueKind::None => false,
            ValueKind::Bool(b) => *b,
            ValueKind::Int(i) => *i != 0,
            ValueKind::Float(f) => *f != 0.0,
            ValueKind::Char(_) => true,
            ValueKind::Str { chars, .. } => !chars.is_empty(),
            ValueKind::Tuple(items) | ValueKind::Set(items) => !items.is_empty(),
            ValueKind::List(items) => !items.borrow().is_empty(),
            ValueKind::Dict(entries) => !entries.borrow().is_empty(),
            ValueKind::Instance(inst) => inst.host.as_ref().map_or(true, RawValue::truthy),
            _ => true,
        }
    }

    /// Interpreter-owned boolean depending on this value.
    pub fn truth(&self) -> Value {
        Value::bool(self.truthy(), Capabilities::camel(), vec![self.clone()])
    }

    pub fn not(&self) -> Value {
        Value::bool(!self.truthy(), Capabilities::camel(), vec![self.clone()])
    }
}

// ============================================================================
// EQUALITY & IDENTITY
// ============================================================================

impl Value {
    /// Deep structural equality. Cycles compare equal.
    pub fn eq_value(&self, other: &Value) -> bool {
        self.eq_guarded(other, &mut HashSet::new())
    }

    fn eq_guarded(&self, other: &Value, seen: &mut HashSet<(usize, usize)>) -> bool {
        use ValueKind as K;
        if let (Some(a), Some(b)) = (self.payload_id(), other.payload_id()) {
            if a == b || !seen.insert((a, b)) {
                return true;
            }
        }
        let seq_eq = |a: &[Value], b: &[Value], seen: &mut HashSet<(usize, usize)>| {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.eq_guarded(y, seen))
        };
        match (&self.0.kind, &other.0.kind) {
            (K::None, K::None) => true,
            (K::Str { text: a, .. }, K::Str { text: b, .. }) => a == b,
            (K::Char(a), K::Char(b)) => a == b,
            (K::Char(a), K::Str { text, .. }) | (K::Str { text, .. }, K::Char(a)) => {
                text.chars().eq(std::iter::once(*a))
            }
            (K::Tuple(a), K::Tuple(b)) => seq_eq(a, b, seen),
            (K::List(a), K::List(b)) => {
                let (a, b) = (a.borrow().clone(), b.borrow().clone());
                seq_eq(&a, &b, seen)
            }
            (K::Set(a), K::Set(b)) => {
                a.len() == b.len()
                    && a.iter().all(|x| b.iter().any(|y| x.eq_guarded(y, seen)))
            }
            (K::Dict(a), K::Dict(b)) => {
                let (a, b) = (a.borrow().clone(), b.borrow().clone());
                a.len() == b.len()
                    && a.iter().all(|(k, v)| {
                        b.iter()
                            .any(|(k2, v2)| k.eq_guarded(k2, seen) && v.eq_guarded(v2, seen))
                    })
            }
            (K::Instance(a), K::Instance(b)) => {
                if !Rc::ptr_eq(&a.class, &b.class) && a.class.name != b.class.name {
                    return false;
                }
                match (&a.host, &b.host) {
                    (Some(x), Some(y)) => x.py_eq(y),
                    (None, None) => {
                        let (fa, fb) = (a.fields.borrow().clone(), b.fields.borrow().clone());
                        fa.len() == fb.len()
                            && fa.iter().all(|(name, v)| {
                                fb.get(name).map_or(false, |v2| v.eq_guarded(v2, seen))
                            })
                    }
                    _ => false,
                }
            }
            (
                K::Builtin { def: d1, receiver: r1 },
                K::Builtin { def: d2, receiver: r2 },
            ) => {
                Rc::ptr_eq(d1, d2)
                    && match (r1, r2) {
                        (Some(x), Some(y)) => x.is_same(y),
                        (None, None) => true,
                        _ => false,
                    }
            }
            (K::Function(a), K::Function(b)) => Rc::ptr_eq(a, b),
            (K::Class(a), K::Class(b)) => Rc::ptr_eq(a, b),
            (K::Iterator(a), K::Iterator(b)) => Rc::ptr_eq(a, b),
            _ => match (self.as_number(), other.as_number()) {
                (Some(a), Some(b)) => a.py_eq(&b),
                _ => false,
            },
        }
    }

    fn as_number(&self) -> Option<RawValue> {
        match &self.0.kind {
            ValueKind::Bool(b) => Some(RawValue::Bool(*b)),
            ValueKind::Int(i) => Some(RawValue::Int(*i)),
            ValueKind::Float(f) => Some(RawValue::Float(*f)),
            _ => None,
        }
    }

    /// Identity of the shared mutable payload, for reference kinds.
    fn payload_id(&self) -> Option<usize> {
        match &self.0.kind {
            ValueKind::List(items) => Some(Rc::as_ptr(items) as *const () as usize),
            ValueKind::Dict(entries) => Some(Rc::as_ptr(entries) as *const () as usize),
            ValueKind::Instance(inst) => Some(Rc::as_ptr(inst) as *const () as usize),
            _ => None,
        }
    }

    /// The `is` operator.
    pub fn is_same(&self, other: &Value) -> bool {
        use ValueKind as K;
        match (&self.0.kind, &other.0.kind) {
            (K::None, K::None) => true,
            (K::Bool(a), K::Bool(b)) => a == b,
            (K::Int(a), K::Int(b)) => a == b,
            (K::Float(a), K::Float(b)) => a.to_bits() == b.to_bits(),
            (K::Str { text: a, .. }, K::Str { text: b, .. }) => a == b,
            (K::Tuple(a), K::Tuple(b)) | (K::Set(a), K::Set(b)) => Rc::ptr_eq(a, b),
            (K::Class(a), K::Class(b)) => Rc::ptr_eq(a, b),
            (K::Function(a), K::Function(b)) => Rc::ptr_eq(a, b),
            (K::Builtin { def: a, .. }, K::Builtin { def: b, .. }) => Rc::ptr_eq(a, b),
            _ => match (self.payload_id(), other.payload_id()) {
                (Some(a), Some(b)) => a == b,
                _ => self.ptr_eq(other),
            },
        }
    }
}

// ============================================================================
// RAW CONVERSION
// ============================================================================

impl Value {
    /// Host view of the value with provenance stripped. Self-referencing
    /// containers render the inner reference as `...`.
    pub fn to_raw(&self) -> RawValue {
        self.to_raw_guarded(&mut HashSet::new())
    }

    fn to_raw_guarded(&self, in_progress: &mut HashSet<usize>) -> RawValue {
        if let Some(id) = self.payload_id() {
            if !in_progress.insert(id) {
                return RawValue::Ellipsis;
            }
        }
        let raw = match &self.0.kind {
            ValueKind::None => RawValue::None,
            ValueKind::Bool(b) => RawValue::Bool(*b),
            ValueKind::Int(i) => RawValue::Int(*i),
            ValueKind::Float(f) => RawValue::Float(*f),
            ValueKind::Char(c) => RawValue::Str(c.to_string()),
            ValueKind::Str { text, .. } => RawValue::Str(text.to_string()),
            ValueKind::Tuple(items) => {
                RawValue::Tuple(items.iter().map(|v| v.to_raw_guarded(in_progress)).collect())
            }
            ValueKind::List(items) => {
                let items = items.borrow().clone();
                RawValue::List(items.iter().map(|v| v.to_raw_guarded(in_progress)).collect())
            }
            ValueKind::Set(items) => {
                RawValue::Set(items.iter().map(|v| v.to_raw_guarded(in_progress)).collect())
            }
            ValueKind::Dict(entries) => {
                let entries = entries.borrow().clone();
                RawValue::Dict(
                    entries
                        .iter()
                        .map(|(k, v)| {
                            (k.to_raw_guarded(in_progress), v.to_raw_guarded(in_progress))
                        })
                        .collect(),
                )
            }
            ValueKind::Iterator(it) => RawValue::List(
                it.borrow().items[it.borrow().pos..]
                    .iter()
                    .map(|v| v.to_raw_guarded(in_progress))
                    .collect(),
            ),
            ValueKind::Builtin { def, .. } => RawValue::Callable {
                name: def.name.clone(),
                is_class: false,
            },
            ValueKind::Function(tool) => RawValue::Callable {
                name: tool.name.clone(),
                is_class: false,
            },
            ValueKind::Class(def) => RawValue::Callable {
                name: def.name.clone(),
                is_class: true,
            },
            ValueKind::Instance(inst) => match &inst.host {
                Some(host) => host.clone(),
                None => {
                    let fields = inst.fields.borrow().clone();
                    RawValue::Instance {
                        class_name: inst.class.name.clone(),
                        fields: fields
                            .iter()
                            .map(|(k, v)| (k.clone(), v.to_raw_guarded(in_progress)))
                            .collect(),
                    }
                }
            },
        };
        if let Some(id) = self.payload_id() {
            in_progress.remove(&id);
        }
        raw
    }

    /// `str(x)` as a tracked string. Strings return themselves so their
    /// per-character provenance survives formatting.
    pub fn str_value(&self) -> Value {
        match &self.0.kind {
            ValueKind::Str { .. } => self.clone(),
            ValueKind::Char(_) => {
                Value::str_from_chars(vec![self.clone()], Capabilities::camel(), vec![self.clone()])
            }
            _ => Value::str(&self.to_raw().py_str(), Capabilities::camel(), vec![self.clone()]),
        }
    }

    pub fn repr_value(&self) -> Value {
        Value::str(&self.to_raw().py_repr(), Capabilities::camel(), vec![self.clone()])
    }
}

/// Converts host output back into a tracked value. Children inherit
/// `capabilities`; instances are rebuilt from the class of the same name in
/// `namespace`.
pub fn value_from_raw(
    raw: &RawValue,
    capabilities: &Capabilities,
    namespace: &Namespace,
    dependencies: Vec<Value>,
) -> Result<Value, ExceptionInfo> {
    let child = |r: &RawValue| value_from_raw(r, capabilities, namespace, vec![]);
    let caps = capabilities.clone();
    Ok(match raw {
        RawValue::None | RawValue::Ellipsis => Value::none(caps, dependencies),
        RawValue::Bool(b) => Value::bool(*b, caps, dependencies),
        RawValue::Int(i) => Value::int(*i, caps, dependencies),
        RawValue::Float(f) => Value::float(*f, caps, dependencies),
        RawValue::Str(s) => Value::str(s, caps, dependencies),
        RawValue::List(items) => {
            Value::list(items.iter().map(child).collect::<Result<_, _>>()?, caps, dependencies)
        }
        RawValue::Tuple(items) => {
            Value::tuple(items.iter().map(child).collect::<Result<_, _>>()?, caps, dependencies)
        }
        RawValue::Set(items) => {
            Value::set(items.iter().map(child).collect::<Result<_, _>>()?, caps, dependencies)?
        }
        RawValue::Dict(pairs) => {
            let pairs = pairs
                .iter()
                .map(|(k, v)| Ok((child(k)?, child(v)?)))
                .collect::<Result<Vec<_>, ExceptionInfo>>()?;
            Value::dict(pairs, caps, dependencies)?
        }
        RawValue::Instance { class_name, fields } => {
            let class = lookup_class(namespace, class_name)?;
            if !matches!(class.kind, ClassKind::Model(_)) {
                return Err(undefined_class(class_name));
            }
            let fields = fields
                .iter()
                .map(|(k, v)| Ok((k.clone(), child(v)?)))
                .collect::<Result<IndexMap<_, _>, ExceptionInfo>>()?;
            Value::instance(class, fields, None, caps, dependencies)
        }
        RawValue::Exception { kind, .. } => {
            let class = match namespace.get(kind.name()).and_then(Value::as_class) {
                Some(def) => def.clone(),
                None => Rc::new(ClassDef::exception(kind.clone())),
            };
            Value::instance(class, IndexMap::new(), Some(raw.clone()), caps, dependencies)
        }
        RawValue::DateTime { .. }
        | RawValue::Date(_)
        | RawValue::Time(_)
        | RawValue::TimeDelta(_)
        | RawValue::TimeZone(_) => {
            let class = lookup_class(namespace, &raw.type_name())?;
            Value::instance(class, IndexMap::new(), Some(raw.clone()), caps, dependencies)
        }
        RawValue::Callable { name, .. } => match namespace.get(name) {
            Some(v) if v.is_callable() => v.new_with_dependencies(dependencies),
            _ => return Err(undefined_class(name)),
        },
    })
}

fn lookup_class(namespace: &Namespace, name: &str) -> Result<Rc<ClassDef>, ExceptionInfo> {
    namespace
        .get(name)
        .and_then(Value::as_class)
        .cloned()
        .ok_or_else(|| undefined_class(name))
}

fn undefined_class(name: &str) -> ExceptionInfo {
    ExceptionInfo::new(ErrorKind::UndefinedClassError, format!("Undefined class {}", name))
}

// ============================================================================
// ATTRIBUTES, ITEMS & ITERATION
// ============================================================================

impl Value {
    /// Attribute lookup. `Ok(None)` means the attribute does not exist.
    pub fn attr(&self, name: &str, namespace: &Namespace) -> Result<Option<Value>, ExceptionInfo> {
        let bind = |def: Rc<BuiltinDef>| {
            Value::builtin(def, Some(self.clone()), Capabilities::camel(), vec![self.clone()])
        };
        match &self.0.kind {
            ValueKind::Str { .. }
            | ValueKind::Char(_)
            | ValueKind::List(_)
            | ValueKind::Dict(_) => {
                Ok(intrinsics::builtin_method(&self.type_name(), name).map(bind))
            }
            ValueKind::Instance(inst) => {
                if let Some(field) = inst.fields.borrow().get(name) {
                    return Ok(Some(field.new_with_dependencies([self.clone()])));
                }
                if let Some(def) = inst.class.find_method(name) {
                    return Ok(Some(bind(def)));
                }
                match inst.host.as_ref().and_then(|h| crate::datetime::host_attr(h, name)) {
                    Some(raw) => {
                        value_from_raw(&raw, &Capabilities::camel(), namespace, vec![self.clone()])
                            .map(Some)
                    }
                    None => Ok(None),
                }
            }
            ValueKind::Class(def) => {
                if let ClassKind::Enum(members) = &def.kind {
                    if let Some(member) = members.get(name) {
                        return value_from_raw(
                            member,
                            self.capabilities(),
                            namespace,
                            vec![self.clone()],
                        )
                        .map(Some);
                    }
                }
                if let ClassKind::Host(_) = &def.kind {
                    if let Some(raw) = crate::datetime::class_attr(&def.name, name) {
                        let deps = vec![self.clone()];
                        return value_from_raw(&raw, &Capabilities::camel(), namespace, deps)
                            .map(Some);
                    }
                }
                Ok(def.find_method(name).map(|m| {
                    let receiver = if m.is_class_method { Some(self.clone()) } else { None };
                    Value::builtin(m, receiver, Capabilities::camel(), vec![self.clone()])
                }))
            }
            _ => Ok(None),
        }
    }

    /// `obj.name = value` on a class instance.
    pub fn set_field(&self, name: &str, value: Value) -> Result<Value, ExceptionInfo> {
        match &self.0.kind {
            ValueKind::Instance(inst) if inst.host.is_none() => {
                if inst.frozen.get() {
                    return Err(ExceptionInfo::value_error("instance is frozen"));
                }
                if !inst.fields.borrow().contains_key(name) {
                    return Err(ExceptionInfo::attribute_error(format!(
                        "'{}' object has no attribute '{}'",
                        inst.class.name, name
                    )));
                }
                inst.fields.borrow_mut().insert(name.to_string(), value);
                Ok(Value::none(Capabilities::default_user(), vec![]))
            }
            _ => Err(ExceptionInfo::attribute_error(format!(
                "'{}' object has no attribute '{}'",
                self.type_name(),
                name
            ))),
        }
    }

    /// Marks instances (recursively through containers) as immutable.
    pub fn freeze(&self) {
        let mut visited = HashSet::new();
        let mut stack = vec![self.clone()];
        while let Some(v) = stack.pop() {
            if !visited.insert(v.identity()) {
                continue;
            }
            if let ValueKind::Instance(inst) = &v.0.kind {
                inst.frozen.set(true);
            }
            match &v.0.kind {
                ValueKind::Instance(inst) => stack.extend(inst.fields.borrow().values().cloned()),
                ValueKind::Tuple(items) | ValueKind::Set(items) => {
                    stack.extend(items.iter().cloned())
                }
                ValueKind::List(items) => stack.extend(items.borrow().iter().cloned()),
                ValueKind::Dict(entries) => {
                    stack.extend(entries.borrow().iter().map(|(_, v)| v.clone()))
                }
                _ => {}
            }
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.as_instance().map_or(false, |inst| inst.frozen.get())
    }

    /// `obj[index]`.
    pub fn get_index(&self, index: &Value) -> Result<Value, ExceptionInfo> {
        match &self.0.kind {
            ValueKind::Str { .. } | ValueKind::Tuple(_) | ValueKind::List(_) => {
                let items = self.elements().unwrap_or_default();
                let i = self.sequence_position(index, items.len())?;
                let element = &items[i];
                if element.as_char().is_some() {
                    return Ok(Value::str_from_chars(
                        vec![element.clone()],
                        self.capabilities().clone(),
                        vec![self.clone(), index.clone()],
                    ));
                }
                Ok(element.new_with_dependencies([self.clone(), index.clone()]))
            }
            ValueKind::Dict(entries) => {
                index.check_hashable()?;
                let found = entries
                    .borrow()
                    .iter()
                    .find(|(k, _)| k.eq_value(index))
                    .map(|(_, v)| v.clone());
                match found {
                    Some(v) => Ok(v.new_with_dependencies([self.clone(), index.clone()])),
                    None => Err(ExceptionInfo::key_error(index.to_raw().py_repr())),
                }
            }
            _ => Err(ExceptionInfo::type_error(format!(
                "'{}' object is not subscriptable",
                self.type_name()
            ))),
        }
    }

    fn sequence_position(&self, index: &Value, len: usize) -> Result<usize, ExceptionInfo> {
        let i = match index.0.kind {
            ValueKind::Int(i) => i,
            ValueKind::Bool(b) => b as i64,
            _ => {
                return Err(ExceptionInfo::type_error(format!(
                    "{} indices must be integers not {}",
                    self.type_name(),
                    index.type_name()
                )))
            }
        };
        let adjusted = if i < 0 { i + len as i64 } else { i };
        if adjusted < 0 || adjusted >= len as i64 {
            let what = if self.type_name() == "str" {
                "string".to_string()
            } else {
                self.type_name()
            };
            return Err(ExceptionInfo::index_error(format!("{} index out of range", what)));
        }
        Ok(adjusted as usize)
    }

    /// `obj[start:end:step]`; bounds are `int` or `None` values.
    pub fn slice(&self, start: &Value, end: &Value, step: &Value) -> Result<Value, ExceptionInfo> {
        let bound = |v: &Value| -> Result<Option<i64>, ExceptionInfo> {
            match v.0.kind {
                ValueKind::None => Ok(None),
                ValueKind::Int(i) => Ok(Some(i)),
                ValueKind::Bool(b) => Ok(Some(b as i64)),
                _ => Err(ExceptionInfo::type_error(
                    "slice indices must be integers or None or have an __index__ method",
                )),
            }
        };
        let items = match &self.0.kind {
            ValueKind::Str { .. } | ValueKind::Tuple(_) | ValueKind::List(_) => {
                self.elements().unwrap_or_default()
            }
            _ => {
                return Err(ExceptionInfo::type_error(format!(
                    "'{}' object is not subscriptable",
                    self.type_name()
                )))
            }
        };
        let positions = slice_positions(items.len(), bound(start)?, bound(end)?, bound(step)?)?;
        let picked: Vec<Value> = positions.into_iter().map(|i| items[i].clone()).collect();
        let caps = self.capabilities().clone();
        let deps = vec![self.clone(), start.clone(), end.clone(), step.clone()];
        Ok(match &self.0.kind {
            ValueKind::Str { .. } => Value::str_from_chars(picked, caps, deps),
            ValueKind::Tuple(_) => Value::tuple(picked, caps, deps),
            _ => Value::list(picked, caps, deps),
        })
    }

    /// `obj[index] = value`; only the touched slot changes.
    pub fn set_index(&self, index: &Value, value: Value) -> Result<Value, ExceptionInfo> {
        match &self.0.kind {
            ValueKind::List(items) => {
                let len = items.borrow().len();
                let i = self.sequence_position(index, len).map_err(|e| {
                    if e.kind == ErrorKind::IndexError {
                        ExceptionInfo::index_error("list assignment index out of range")
                    } else {
                        e
                    }
                })?;
                items.borrow_mut()[i] = value;
                Ok(Value::none(Capabilities::camel(), vec![self.clone(), index.clone()]))
            }
            ValueKind::Dict(_) => self.set_key(index.clone(), value),
            _ => Err(ExceptionInfo::type_error(format!(
                "'{}' object does not support item assignment",
                self.type_name()
            ))),
        }
    }

    /// Lists, sets and dicts, also inside tuples, cannot be set elements or
    /// dict keys.
    pub fn check_hashable(&self) -> Result<(), ExceptionInfo> {
        match &self.0.kind {
            ValueKind::List(_) | ValueKind::Set(_) | ValueKind::Dict(_) => Err(
                ExceptionInfo::type_error(format!("unhashable type: '{}'", self.type_name())),
            ),
            ValueKind::Tuple(items) => items.iter().try_for_each(Value::check_hashable),
            _ => Ok(()),
        }
    }

    /// `d[key] = value`. An existing equal key is replaced by a copy that also
    /// depends on the new key.
    pub fn set_key(&self, key: Value, value: Value) -> Result<Value, ExceptionInfo> {
        match &self.0.kind {
            ValueKind::Dict(entries) => {
                key.check_hashable()?;
                insert_key(&mut entries.borrow_mut(), key, value);
                Ok(Value::none(Capabilities::camel(), vec![self.clone()]))
            }
            _ => Err(ExceptionInfo::type_error(format!(
                "'{}' object does not support item assignment",
                self.type_name()
            ))),
        }
    }

    /// An iterator value over the elements (dict keys, one-character strings).
    pub fn iterate(&self) -> Result<Value, ExceptionInfo> {
        let items = match &self.0.kind {
            ValueKind::Iterator(_) => return Ok(self.clone()),
            ValueKind::Str { chars, .. } => chars
                .iter()
                .map(|c| {
                    let deps = vec![self.clone()];
                    Value::str_from_chars(vec![c.clone()], Capabilities::camel(), deps)
                })
                .collect(),
            ValueKind::Tuple(items) | ValueKind::Set(items) => items.to_vec(),
            ValueKind::List(items) => items.borrow().clone(),
            ValueKind::Dict(entries) => entries.borrow().iter().map(|(k, _)| k.clone()).collect(),
            _ => {
                return Err(ExceptionInfo::type_error(format!(
                    "'{}' object is not iterable",
                    self.type_name()
                )))
            }
        };
        Ok(Value::new(
            ValueKind::Iterator(Rc::new(RefCell::new(ValueIter { items, pos: 0 }))),
            Capabilities::camel(),
            vec![self.clone()],
        ))
    }

    /// Advances an iterator value.
    pub fn next_item(&self) -> Option<Value> {
        match &self.0.kind {
            ValueKind::Iterator(it) => {
                let mut it = it.borrow_mut();
                let item = it.items.get(it.pos).cloned();
                if item.is_some() {
                    it.pos += 1;
                }
                item
            }
            _ => None,
        }
    }

    /// Collects everything iteration would produce.
    pub fn iter_values(&self) -> Result<Vec<Value>, ExceptionInfo> {
        let it = self.iterate()?;
        let mut out = Vec::new();
        while let Some(v) = it.next_item() {
            out.push(v);
        }
        Ok(out)
    }
}

fn insert_key(entries: &mut Vec<(Value, Value)>, key: Value, value: Value) {
    match entries.iter().position(|(k, _)| k.eq_value(&key)) {
        Some(pos) => {
            let (existing, _) = entries.remove(pos);
            let merged = if existing.ptr_eq(&key) {
                existing
            } else {
                existing.new_with_dependencies([key])
            };
            entries.push((merged, value));
        }
        None => entries.push((key, value)),
    }
}

/// Positions selected by a slice, with CPython's bound adjustment.
pub fn slice_positions(
    len: usize,
    start: Option<i64>,
    stop: Option<i64>,
    step: Option<i64>,
) -> Result<Vec<usize>, ExceptionInfo> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(ExceptionInfo::value_error("slice step cannot be zero"));
    }
    let len = len as i64;
    let adjust = |v: i64, low: i64, high: i64| {
        let v = if v < 0 { v + len } else { v };
        v.clamp(low, high)
    };
    let mut out = Vec::new();
    if step > 0 {
        let start = start.map_or(0, |s| adjust(s, 0, len));
        let stop = stop.map_or(len, |s| adjust(s, 0, len));
        let mut i = start;
        while i < stop {
            out.push(i as usize);
            match i.checked_add(step) {
                Some(next) => i = next,
                None => break,
            }
        }
    } else {
        let start = start.map_or(len - 1, |s| adjust(s, -1, len - 1));
        let stop = stop.map_or(-1, |s| adjust(s, -1, len - 1));
        let mut i = start;
        while i > stop {
            out.push(i as usize);
            match i.checked_add(step) {
                Some(next) => i = next,
                None => break,
            }
        }
    }
    Ok(out)
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Value({}: {}, {})",
            self.type_name(),
            self.to_raw().py_repr(),
            self.capabilities()
        )
    }
}

// ============================================================================
// NAMESPACE
// ============================================================================

/// Variable bindings of one evaluation.
#[derive(Clone, Default)]
pub struct Namespace {
    variables: IndexMap<String, Value>,
}

impl Namespace {
    pub fn new() -> Self {
        Namespace::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    pub fn add_variables(&mut self, variables: impl IntoIterator<Item = (String, Value)>) {
        self.variables.extend(variables);
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.variables.shift_remove(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.variables.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.variables.iter()
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.variables.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{get_all_readers, Readers, Source};
    use crate::prelude;

    fn user() -> Capabilities {
        Capabilities::default_user()
    }

    fn private(reader: &str) -> Capabilities {
        Capabilities::new([Source::tool("read")], Readers::restricted([reader]))
    }

    fn int(i: i64) -> Value {
        Value::int(i, user(), vec![])
    }

    #[test]
    fn test_new_with_dependencies_shares_payload() {
        let list = Value::list(vec![int(1)], user(), vec![]);
        let derived = list.new_with_dependencies([int(2)]);
        assert!(!derived.ptr_eq(&list));
        assert!(derived.is_same(&list));
        assert_eq!(derived.outer_dependencies().len(), 1);
        list.set_index(&int(0), int(5)).unwrap();
        assert_eq!(derived.to_raw(), RawValue::List(vec![RawValue::Int(5)]));
    }

    #[test]
    fn test_string_keeps_character_provenance() {
        let public = Value::str("to: ", user(), vec![]);
        let secret = Value::str("bob", private("a@x.com"), vec![]);
        let mut chars = public.elements().unwrap();
        chars.extend(secret.elements().unwrap());
        let joined = Value::str_from_chars(chars, Capabilities::camel(), vec![]);
        assert_eq!(joined.as_text(), Some("to: bob"));
        assert_eq!(get_all_readers(&joined), Readers::restricted(["a@x.com"]));

        let prefix = joined.slice(&int(0), &int(3), &Value::none(user(), vec![])).unwrap();
        assert_eq!(prefix.as_text(), Some("to:"));
        assert!(prefix.elements().unwrap().iter().all(|c| c.capabilities().readers.is_public()));
    }

    #[test]
    fn test_index_and_errors() {
        let t = Value::tuple(vec![int(1), int(2), int(3)], user(), vec![]);
        assert_eq!(t.get_index(&int(-1)).unwrap().as_int(), Some(3));
        let err = t.get_index(&int(3)).unwrap_err();
        assert_eq!(err.message, "tuple index out of range");
        let err = t.get_index(&Value::str("a", user(), vec![])).unwrap_err();
        assert_eq!(err.message, "tuple indices must be integers not str");
        let err = int(1).get_index(&int(0)).unwrap_err();
        assert_eq!(err.message, "'int' object is not subscriptable");
        let s = Value::str("abc", user(), vec![]);
        assert_eq!(s.get_index(&int(1)).unwrap().as_text(), Some("b"));
    }

    #[test]
    fn test_slice_positions() {
        assert_eq!(slice_positions(5, None, None, Some(-1)).unwrap(), vec![4, 3, 2, 1, 0]);
        assert_eq!(slice_positions(5, Some(1), Some(-1), None).unwrap(), vec![1, 2, 3]);
        assert_eq!(slice_positions(5, Some(-10), Some(10), Some(2)).unwrap(), vec![0, 2, 4]);
        assert!(slice_positions(5, None, None, Some(0)).is_err());
    }

    #[test]
    fn test_slice_positions_extreme_steps() {
        assert_eq!(slice_positions(3, Some(1), None, Some(i64::MAX)).unwrap(), vec![1]);
        assert_eq!(slice_positions(3, None, None, Some(i64::MIN)).unwrap(), vec![2]);
        assert_eq!(slice_positions(3, Some(1), None, Some(i64::MIN)).unwrap(), vec![1]);

        let s = Value::str("abc", user(), vec![]);
        let none = Value::none(user(), vec![]);
        let picked = s.slice(&int(1), &none, &int(i64::MAX)).unwrap();
        assert_eq!(picked.as_text(), Some("b"));
        let l = Value::list(vec![int(1), int(2), int(3)], user(), vec![]);
        let picked = l.slice(&none, &none, &int(i64::MIN)).unwrap();
        assert_eq!(picked.to_raw(), RawValue::List(vec![RawValue::Int(3)]));
    }

    #[test]
    fn test_dict_set_key_merges_equal_keys() {
        let k1 = Value::str("a", user(), vec![]);
        let k2 = Value::str("a", private("x@x.com"), vec![]);
        let d = Value::dict(vec![(k1, int(1))], user(), vec![]).unwrap();
        d.set_key(k2, int(2)).unwrap();
        let entries = d.dict_entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1.as_int(), Some(2));
        // The surviving key now depends on the private key.
        assert_eq!(get_all_readers(&entries[0].0), Readers::restricted(["x@x.com"]));
        let missing = d.get_index(&Value::str("b", user(), vec![])).unwrap_err();
        assert_eq!(missing.kind, ErrorKind::KeyError);
        assert_eq!(missing.message, "'b'");
    }

    #[test]
    fn test_deep_equality() {
        let a = Value::list(vec![int(1), Value::float(2.0, user(), vec![])], user(), vec![]);
        let b = Value::list(vec![Value::bool(true, user(), vec![]), int(2)], user(), vec![]);
        assert!(a.eq_value(&b));
        let c = Value::list(vec![int(1)], user(), vec![]);
        assert!(!a.eq_value(&c));
        let s1 = Value::set(vec![int(1), int(2), int(1)], user(), vec![]).unwrap();
        let s2 = Value::set(vec![int(2), int(1)], user(), vec![]).unwrap();
        assert!(s1.eq_value(&s2));
    }

    #[test]
    fn test_self_referencing_list_renders() {
        let l = Value::list(vec![int(1)], user(), vec![]);
        l.set_index(&int(0), l.clone()).unwrap();
        assert_eq!(l.to_raw().py_repr(), "[...]");
        assert!(l.eq_value(&l.new_with_dependencies([])));
    }

    #[test]
    fn test_iterate_string_yields_single_chars() {
        let s = Value::str("hi", user(), vec![]);
        let parts = s.iter_values().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].as_text(), Some("i"));
        let err = int(3).iterate().unwrap_err();
        assert_eq!(err.message, "'int' object is not iterable");
    }

    #[test]
    fn test_value_from_raw_inherits_capabilities() {
        let ns = prelude::namespace();
        let raw = RawValue::List(vec![RawValue::str("x"), RawValue::Int(1)]);
        let v = value_from_raw(&raw, &private("a@x.com"), &ns, vec![]).unwrap();
        for el in v.elements().unwrap() {
            assert_eq!(el.capabilities().readers, Readers::restricted(["a@x.com"]));
        }
        let err = value_from_raw(
            &RawValue::Instance {
                class_name: "Missing".into(),
                fields: IndexMap::new(),
            },
            &user(),
            &ns,
            vec![],
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::UndefinedClassError);
    }

    #[test]
    fn test_builtin_method_attr_binds_receiver() {
        let ns = prelude::namespace();
        let s = Value::str("abc", user(), vec![]);
        let upper = s.attr("upper", &ns).unwrap().unwrap();
        assert_eq!(upper.type_name(), "builtin_function_or_method");
        assert!(upper.receiver().unwrap().ptr_eq(&s));
        assert!(s.attr("append", &ns).unwrap().is_none());
    }

    #[test]
    fn test_namespace_operations() {
        let mut ns = Namespace::new();
        ns.set_variable("a", int(1));
        ns.add_variables([("b".to_string(), int(2))]);
        assert!(ns.contains("a"));
        assert_eq!(ns.names().cloned().collect::<Vec<_>>(), vec!["a", "b"]);
        ns.remove("a");
        assert!(ns.get("a").is_none());
        assert_eq!(ns.len(), 1);
    }
}
