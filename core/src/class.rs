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

//! Classes and their instances.
//!
//! Four families share one representation: data models declared in code
//! (`@dataclass` or `BaseModel` subclasses), host classes backed by a native
//! constructor (`datetime`, `timedelta`, ...), exception classes, and enums.
//! Model instances keep their field values as tracked [`Value`]s; host
//! instances keep a [`RawValue`] payload.

use crate::exception::{ErrorKind, ExceptionInfo};
use crate::raw::RawValue;
use crate::value::{BuiltinDef, NativeFn, Namespace, Value, ValueKind};
use indexmap::IndexMap;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelStyle {
    /// `@dataclass`: positional or keyword construction, no validation.
    Dataclass,
    /// `BaseModel` subclass: keyword construction with light type validation.
    BaseModel,
}

pub enum ClassKind {
    Model(ModelStyle),
    Enum(IndexMap<String, RawValue>),
    /// Native constructor producing the instance payload.
    Host(NativeFn),
    Exception(ErrorKind),
    /// Usable in annotations only.
    AnnotationOnly,
}

pub struct ClassDef {
    pub name: String,
    pub kind: ClassKind,
    /// Field name to annotation text, in declaration order.
    pub fields: IndexMap<String, String>,
    pub methods: IndexMap<String, Rc<BuiltinDef>>,
    pub base_classes: Vec<Value>,
    pub is_totally_ordered: bool,
}

pub struct InstanceData {
    pub class: Rc<ClassDef>,
    pub fields: RefCell<IndexMap<String, Value>>,
    pub frozen: Cell<bool>,
    pub host: Option<RawValue>,
}

impl ClassDef {
    pub fn new(name: &str, kind: ClassKind) -> Self {
        ClassDef {
            name: name.to_string(),
            kind,
            fields: IndexMap::new(),
            methods: IndexMap::new(),
            base_classes: Vec::new(),
            is_totally_ordered: false,
        }
    }

    pub fn model(
        name: &str,
        style: ModelStyle,
        fields: IndexMap<String, String>,
        base_classes: Vec<Value>,
    ) -> Self {
        ClassDef {
            fields,
            base_classes,
            ..ClassDef::new(name, ClassKind::Model(style))
        }
    }

    pub fn host<F>(name: &str, constructor: F) -> Self
    where
        F: Fn(&[RawValue], &IndexMap<String, RawValue>) -> Result<RawValue, ExceptionInfo>
            + 'static,
    {
        ClassDef::new(name, ClassKind::Host(Rc::new(constructor)))
    }

    pub fn exception(kind: ErrorKind) -> Self {
        let name = kind.name().to_string();
        ClassDef::new(&name, ClassKind::Exception(kind))
    }

    pub fn enumeration(name: &str, members: IndexMap<String, RawValue>) -> Self {
        ClassDef::new(name, ClassKind::Enum(members))
    }

    pub fn annotation_only(name: &str) -> Self {
        ClassDef::new(name, ClassKind::AnnotationOnly)
    }

    pub fn with_method(mut self, method: Rc<BuiltinDef>) -> Self {
        self.methods.insert(method.name.clone(), method);
        self
    }

    pub fn with_methods(mut self, methods: impl IntoIterator<Item = Rc<BuiltinDef>>) -> Self {
        for m in methods {
            self.methods.insert(m.name.clone(), m);
        }
        self
    }

    pub fn totally_ordered(mut self) -> Self {
        self.is_totally_ordered = true;
        self
    }

    /// Own methods first, then base classes in declaration order.
    pub fn find_method(&self, name: &str) -> Option<Rc<BuiltinDef>> {
        if let Some(m) = self.methods.get(name) {
            return Some(m.clone());
        }
        self.bases().find_map(|base| base.find_method(name))
    }

    fn bases(&self) -> impl Iterator<Item = &Rc<ClassDef>> {
        self.base_classes.iter().filter_map(Value::as_class)
    }

    /// Inherited fields first, then own fields.
    pub fn all_fields(&self) -> IndexMap<String, String> {
        let mut out = IndexMap::new();
        for base in self.bases() {
            out.extend(base.all_fields());
        }
        out.extend(self.fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        out
    }

    pub fn attr_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.all_fields().into_keys().collect();
        names.extend(self.methods.keys().cloned());
        for base in self.bases() {
            names.extend(base.attr_names());
        }
        if let ClassKind::Enum(members) = &self.kind {
            names.extend(members.keys().cloned());
        }
        names.sort();
        names.dedup();
        names
    }

    pub fn is_subclass_of(&self, name: &str) -> bool {
        self.name == name || self.bases().any(|b| b.is_subclass_of(name))
    }

    pub fn is_model(&self) -> bool {
        matches!(self.kind, ClassKind::Model(_))
    }
}

// ============================================================================
// INSTANTIATION
// ============================================================================

/// Calls a class value with evaluated arguments.
pub fn instantiate(
    class_value: &Value,
    args: &[Value],
    kwargs: &IndexMap<String, Value>,
    namespace: &Namespace,
) -> Result<Value, ExceptionInfo> {
    let class = match class_value.kind() {
        ValueKind::Class(def) => def.clone(),
        _ => {
            return Err(ExceptionInfo::type_error(format!(
                "'{}' object is not callable",
                class_value.type_name()
            )))
        }
    };
    match &class.kind {
        ClassKind::Model(style) => {
            let fields = bind_fields(&class, *style, args, kwargs, namespace)?;
            Ok(Value::instance(
                class.clone(),
                fields,
                None,
                class_value.capabilities().clone(),
                vec![class_value.clone()],
            ))
        }
        ClassKind::Host(constructor) => {
            let raw_args: Vec<RawValue> = args.iter().map(Value::to_raw).collect();
            let raw_kwargs: IndexMap<String, RawValue> =
                kwargs.iter().map(|(k, v)| (k.clone(), v.to_raw())).collect();
            let payload = constructor(&raw_args, &raw_kwargs)?;
            Ok(host_instance(class_value, &class, payload, args, kwargs))
        }
        ClassKind::Exception(kind) => {
            if let Some(k) = kwargs.keys().next() {
                return Err(ExceptionInfo::type_error(format!(
                    "{}() takes no keyword arguments: '{}'",
                    class.name, k
                )));
            }
            let message = match args {
                [] => String::new(),
                [single] => single.to_raw().py_str(),
                many => RawValue::Tuple(many.iter().map(Value::to_raw).collect()).py_repr(),
            };
            let payload = RawValue::Exception {
                kind: kind.clone(),
                message,
            };
            Ok(host_instance(class_value, &class, payload, args, kwargs))
        }
        ClassKind::Enum(members) => {
            let wanted = match args {
                [v] if kwargs.is_empty() => v,
                _ => {
                    return Err(ExceptionInfo::type_error(format!(
                        "{}() takes exactly one argument",
                        class.name
                    )))
                }
            };
            let raw = wanted.to_raw();
            match members.values().find(|m| m.py_eq(&raw)) {
                Some(member) => crate::value::value_from_raw(
                    member,
                    class_value.capabilities(),
                    namespace,
                    vec![class_value.clone()],
                ),
                None => Err(ExceptionInfo::value_error(format!(
                    "{} is not a valid {}",
                    raw.py_repr(),
                    class.name
                ))),
            }
        }
        ClassKind::AnnotationOnly => Err(ExceptionInfo::type_error(format!(
            "{} can only be used as a type annotation",
            class.name
        ))),
    }
}

fn host_instance(
    class_value: &Value,
    class: &Rc<ClassDef>,
    payload: RawValue,
    args: &[Value],
    kwargs: &IndexMap<String, Value>,
) -> Value {
    let mut deps = vec![class_value.clone()];
    deps.extend(args.iter().cloned());
    deps.extend(kwargs.values().cloned());
    Value::instance(
        class.clone(),
        IndexMap::new(),
        Some(payload),
        class_value.capabilities().clone(),
        deps,
    )
}

fn bind_fields(
    class: &ClassDef,
    style: ModelStyle,
    args: &[Value],
    kwargs: &IndexMap<String, Value>,
    namespace: &Namespace,
) -> Result<IndexMap<String, Value>, ExceptionInfo> {
    let declared = class.all_fields();
    let mut bound: IndexMap<String, Value> = IndexMap::new();

    match style {
        ModelStyle::Dataclass => {
            if args.len() > declared.len() {
                return Err(ExceptionInfo::type_error(format!(
                    "{}.__init__() takes {} positional arguments but {} were given",
                    class.name,
                    declared.len() + 1,
                    args.len() + 1
                )));
            }
            for (name, value) in declared.keys().zip(args) {
                bound.insert(name.clone(), value.clone());
            }
            for (name, value) in kwargs {
                if !declared.contains_key(name) {
                    return Err(ExceptionInfo::type_error(format!(
                        "{}.__init__() got an unexpected keyword argument '{}'",
                        class.name, name
                    )));
                }
                if bound.contains_key(name) {
                    return Err(ExceptionInfo::type_error(format!(
                        "{}.__init__() got multiple values for argument '{}'",
                        class.name, name
                    )));
                }
                bound.insert(name.clone(), value.clone());
            }
            let missing: Vec<String> = declared
                .keys()
                .filter(|k| !bound.contains_key(*k))
                .map(|k| format!("'{}'", k))
                .collect();
            if !missing.is_empty() {
                let plural = if missing.len() == 1 { "argument" } else { "arguments" };
                return Err(ExceptionInfo::type_error(format!(
                    "{}.__init__() missing {} required positional {}: {}",
                    class.name,
                    missing.len(),
                    plural,
                    missing.join(" and ")
                )));
            }
        }
        ModelStyle::BaseModel => {
            if !args.is_empty() {
                return Err(ExceptionInfo::type_error(format!(
                    "BaseModel.__init__() takes 1 positional argument but {} were given",
                    args.len() + 1
                )));
            }
            for (name, value) in kwargs {
                if !declared.contains_key(name) {
                    return Err(validation_error(
                        &class.name,
                        name,
                        "Extra inputs are not permitted",
                    ));
                }
                bound.insert(name.clone(), value.clone());
            }
            if let Some(name) = declared.keys().find(|k| !bound.contains_key(*k)) {
                return Err(validation_error(&class.name, name, "Field required"));
            }
            for (name, annotation) in &declared {
                if let Some(value) = bound.get(name) {
                    if !matches_annotation(annotation, value, namespace) {
                        return Err(validation_error(
                            &class.name,
                            name,
                            &format!(
                                "Input should be a valid {}, got {}",
                                annotation,
                                value.type_name()
                            ),
                        ));
                    }
                }
            }
        }
    }

    // Declaration order regardless of how arguments were passed.
    let mut ordered = IndexMap::new();
    for name in declared.keys() {
        if let Some(v) = bound.shift_remove(name) {
            ordered.insert(name.clone(), v);
        }
    }
    Ok(ordered)
}

fn validation_error(class: &str, field: &str, detail: &str) -> ExceptionInfo {
    ExceptionInfo::type_error(format!("1 validation error for {}\n{}\n  {}", class, field, detail))
}

/// Light structural check of a value against an annotation string.
/// Unknown annotations accept anything.
pub fn matches_annotation(annotation: &str, value: &Value, namespace: &Namespace) -> bool {
    let annotation = annotation.trim();
    if let Some(inner) = annotation
        .strip_prefix("Optional[")
        .and_then(|s| s.strip_suffix(']'))
    {
        return value.is_none() || matches_annotation(inner, value, namespace);
    }
    let alternatives = split_top_level(annotation, '|');
    if alternatives.len() > 1 {
        return alternatives
            .iter()
            .any(|alt| matches_annotation(alt, value, namespace));
    }
    let base = annotation.split('[').next().unwrap_or("").trim();
    let ty = value.type_name();
    match base {
        "" | "Any" | "object" => true,
        "None" | "NoneType" => value.is_none(),
        "int" => matches!(value.kind(), ValueKind::Int(_) | ValueKind::Bool(_)),
        "float" => matches!(
            value.kind(),
            ValueKind::Int(_) | ValueKind::Bool(_) | ValueKind::Float(_)
        ),
        "bool" => matches!(value.kind(), ValueKind::Bool(_)),
        "str" | "EmailStr" => ty == "str",
        "list" | "List" => ty == "list" || ty == "tuple",
        "tuple" | "Tuple" => ty == "tuple" || ty == "list",
        "set" | "Set" => ty == "set" || ty == "list",
        "dict" | "Dict" => ty == "dict",
        "NaiveDatetime" => ty == "datetime",
        other => match namespace.get(other).and_then(Value::as_class) {
            Some(def) if def.is_model() || matches!(def.kind, ClassKind::Host(_)) => {
                match value.as_instance() {
                    Some(inst) => inst.class.is_subclass_of(other),
                    None => false,
                }
            }
            Some(def) => match &def.kind {
                ClassKind::Enum(members) => {
                    let raw = value.to_raw();
                    members.values().any(|m| m.py_eq(&raw))
                }
                _ => true,
            },
            None => true,
        },
    }
}

fn split_top_level(text: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for c in text.chars() {
        match c {
            '[' | '(' => depth += 1,
            ']' | ')' => depth -= 1,
            _ => {}
        }
        if c == sep && depth == 0 {
            parts.push(current.trim().to_string());
            current.clear();
        } else {
            current.push(c);
        }
    }
    parts.push(current.trim().to_string());
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::Capabilities;
    use crate::prelude;

    fn user() -> Capabilities {
        Capabilities::default_user()
    }

    fn fields(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn point_class() -> Value {
        Value::class(
            ClassDef::model(
                "Point",
                ModelStyle::Dataclass,
                fields(&[("x", "int"), ("y", "int")]),
                vec![],
            ),
            user(),
            vec![],
        )
    }

    #[test]
    fn test_dataclass_positional_and_keyword() {
        let ns = prelude::namespace();
        let class = point_class();
        let one = Value::int(1, user(), vec![]);
        let two = Value::int(2, user(), vec![]);
        let mut kwargs = IndexMap::new();
        kwargs.insert("y".to_string(), two.clone());
        let p = instantiate(&class, &[one.clone()], &kwargs, &ns).unwrap();
        assert_eq!(p.type_name(), "Point");
        let inst = p.as_instance().unwrap();
        assert!(inst.fields.borrow()["x"].ptr_eq(&one));
        assert_eq!(p.to_raw().py_repr(), "Point(x=1, y=2)");

        let err = instantiate(&class, &[one.clone()], &IndexMap::new(), &ns).unwrap_err();
        assert_eq!(err.message, "Point.__init__() missing 1 required positional argument: 'y'");
        let three = [one.clone(), two.clone(), one.clone()];
        let err = instantiate(&class, &three, &IndexMap::new(), &ns).unwrap_err();
        assert_eq!(err.message, "Point.__init__() takes 3 positional arguments but 4 were given");
    }

    #[test]
    fn test_base_model_keyword_only_with_validation() {
        let ns = prelude::namespace();
        let base = ns.get("BaseModel").unwrap().clone();
        let class = Value::class(
            ClassDef::model(
                "User",
                ModelStyle::BaseModel,
                fields(&[("name", "str"), ("age", "int")]),
                vec![base],
            ),
            user(),
            vec![],
        );
        let mut kwargs = IndexMap::new();
        kwargs.insert("name".to_string(), Value::str("Emma", user(), vec![]));
        kwargs.insert("age".to_string(), Value::int(30, user(), vec![]));
        let u = instantiate(&class, &[], &kwargs, &ns).unwrap();
        assert!(u.attr("model_dump", &ns).unwrap().is_some());

        kwargs.insert("age".to_string(), Value::str("thirty", user(), vec![]));
        let err = instantiate(&class, &[], &kwargs, &ns).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeError);
        assert!(err.message.contains("Input should be a valid int"));

        let positional = [Value::int(1, user(), vec![])];
        let err = instantiate(&class, &positional, &IndexMap::new(), &ns).unwrap_err();
        assert!(err.message.starts_with("BaseModel.__init__() takes 1 positional argument"));
    }

    #[test]
    fn test_frozen_instance_rejects_set_field() {
        let ns = prelude::namespace();
        let class = point_class();
        let args = [Value::int(1, user(), vec![]), Value::int(2, user(), vec![])];
        let p = instantiate(&class, &args, &IndexMap::new(), &ns).unwrap();
        p.set_field("x", Value::int(5, user(), vec![])).unwrap();
        assert_eq!(p.to_raw().py_repr(), "Point(x=5, y=2)");
        p.freeze();
        let err = p.set_field("x", Value::int(6, user(), vec![])).unwrap_err();
        assert_eq!(err.message, "instance is frozen");
        let err = p.set_field("z", Value::int(6, user(), vec![])).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValueError);
        let q = instantiate(&class, &args, &IndexMap::new(), &ns).unwrap();
        let err = q.set_field("z", Value::int(6, user(), vec![])).unwrap_err();
        assert_eq!(err.kind, ErrorKind::AttributeError);
    }

    #[test]
    fn test_enum_lookup_by_value() {
        let ns = prelude::namespace();
        let mut members = IndexMap::new();
        members.insert("RED".to_string(), RawValue::str("red"));
        let color = Value::class(ClassDef::enumeration("Color", members), user(), vec![]);
        let red = color.attr("RED", &ns).unwrap().unwrap();
        assert_eq!(red.as_text(), Some("red"));
        let red_value = [Value::str("red", user(), vec![])];
        let found = instantiate(&color, &red_value, &IndexMap::new(), &ns).unwrap();
        assert_eq!(found.as_text(), Some("red"));
        let blue_value = [Value::str("blue", user(), vec![])];
        let err = instantiate(&color, &blue_value, &IndexMap::new(), &ns).unwrap_err();
        assert_eq!(err.message, "'blue' is not a valid Color");
    }

    #[test]
    fn test_exception_class_message() {
        let ns = prelude::namespace();
        let class = ns.get("ValueError").unwrap().clone();
        let message = [Value::str("bad", user(), vec![])];
        let e = instantiate(&class, &message, &IndexMap::new(), &ns).unwrap();
        match e.to_raw() {
            RawValue::Exception { kind, message } => {
                assert_eq!(kind, ErrorKind::ValueError);
                assert_eq!(message, "bad");
            }
            other => panic!("Expected exception payload, got {:?}", other),
        }
    }

    #[test]
    fn test_annotations() {
        let ns = prelude::namespace();
        let none = Value::none(user(), vec![]);
        let s = Value::str("x", user(), vec![]);
        assert!(matches_annotation("str | None", &none, &ns));
        assert!(matches_annotation("Optional[str]", &s, &ns));
        assert!(!matches_annotation("int", &s, &ns));
        assert!(matches_annotation("list[str]", &Value::list(vec![], user(), vec![]), &ns));
        assert!(matches_annotation("SomethingUnknown", &s, &ns));
    }
}
