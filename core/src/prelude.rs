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

//! The namespace every evaluation starts from: built-in functions and the
//! built-in classes.

use crate::capabilities::Capabilities;
use crate::class::{ClassDef, ModelStyle};
use crate::datetime;
use crate::exception::{ErrorKind, ExceptionInfo};
use crate::intrinsics::{Args, IntrinsicRegistry};
use crate::raw::RawValue;
use crate::value::{BuiltinDef, Namespace, Value};
use indexmap::IndexMap;

/// Classes that exist only to be named in field annotations.
pub const ANNOTATION_CLASSES: &[&str] = &["FieldInfo", "EmailStr", "NaiveDatetime"];

/// Built-in classes in the order they are listed to the model.
pub fn builtin_classes() -> Vec<ClassDef> {
    let mut classes = vec![
        ClassDef::exception(ErrorKind::ValueError),
        ClassDef::exception(ErrorKind::NotEnoughInformationError),
        ClassDef::enumeration("Enum", IndexMap::new()),
    ];
    classes.extend(datetime::classes());
    classes.push(base_model());
    classes.extend(ANNOTATION_CLASSES.iter().map(|name| ClassDef::annotation_only(name)));
    classes
}

/// A fresh namespace holding the built-ins, all tagged as interpreter-created.
pub fn namespace() -> Namespace {
    let mut ns = Namespace::new();
    for def in IntrinsicRegistry::builtins() {
        let name = def.name.clone();
        ns.set_variable(name, Value::builtin(def, None, Capabilities::camel(), vec![]));
    }
    for class in builtin_classes() {
        let name = class.name.clone();
        ns.set_variable(name, Value::class(class, Capabilities::camel(), vec![]));
    }
    ns
}

/// The built-ins plus host-provided variables; later entries win.
pub fn namespace_with(variables: impl IntoIterator<Item = (String, Value)>) -> Namespace {
    let mut ns = namespace();
    ns.add_variables(variables);
    ns
}

// ============================================================================
// BaseModel
// ============================================================================

fn base_model() -> ClassDef {
    ClassDef::model("BaseModel", ModelStyle::BaseModel, IndexMap::new(), vec![]).with_methods([
        BuiltinDef::new("model_dump", model_dump),
        BuiltinDef::new("model_dump_json", model_dump_json),
        BuiltinDef::new("model_copy", model_copy),
        BuiltinDef::class_method("model_construct", model_construct),
        BuiltinDef::class_method("model_validate", model_validate),
        BuiltinDef::class_method("model_validate_json", model_validate_json),
        BuiltinDef::class_method("model_json_schema", model_json_schema),
    ])
}

fn model_fields<'a>(
    args: &Args<'a>,
    method: &str,
) -> Result<(&'a str, &'a IndexMap<String, RawValue>), ExceptionInfo> {
    match args.required(0, "self")? {
        RawValue::Instance { class_name, fields } => Ok((class_name, fields)),
        other => Err(ExceptionInfo::type_error(format!(
            "{}() must be called on a model instance, not '{}'",
            method,
            other.type_name()
        ))),
    }
}

fn class_name_of<'a>(args: &Args<'a>) -> Result<&'a str, ExceptionInfo> {
    match args.required(0, "cls")? {
        RawValue::Callable { name, is_class: true } => Ok(name),
        other => Err(ExceptionInfo::type_error(format!(
            "expected a model class, got '{}'",
            other.type_name()
        ))),
    }
}

fn model_dump(
    positional: &[RawValue],
    keywords: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let args = Args::new("model_dump", positional, keywords);
    args.max_positional(1)?;
    args.allow_keywords(&["exclude_none"])?;
    let exclude_none = keywords.get("exclude_none").is_some_and(RawValue::truthy);
    let (_, fields) = model_fields(&args, "model_dump")?;
    Ok(RawValue::dict_from(
        fields
            .iter()
            .filter(|(_, v)| !(exclude_none && matches!(v, RawValue::None)))
            .map(|(k, v)| (RawValue::str(k.as_str()), dump_nested(v))),
    ))
}

/// Nested models dump as dicts.
fn dump_nested(value: &RawValue) -> RawValue {
    match value {
        RawValue::Instance { fields, .. } => RawValue::dict_from(
            fields
                .iter()
                .map(|(k, v)| (RawValue::str(k.as_str()), dump_nested(v))),
        ),
        RawValue::List(items) => RawValue::List(items.iter().map(dump_nested).collect()),
        RawValue::Tuple(items) => RawValue::Tuple(items.iter().map(dump_nested).collect()),
        other => other.clone(),
    }
}

fn model_dump_json(
    positional: &[RawValue],
    keywords: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let args = Args::new("model_dump_json", positional, keywords);
    args.max_positional(1)?;
    args.allow_keywords(&["indent"])?;
    let (_, fields) = model_fields(&args, "model_dump_json")?;
    let json = serde_json::Value::Object(
        fields
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect(),
    );
    let rendered = match keywords.get("indent") {
        Some(RawValue::None) | None => serde_json::to_string(&json),
        Some(_) => serde_json::to_string_pretty(&json),
    };
    rendered
        .map(RawValue::Str)
        .map_err(|e| ExceptionInfo::value_error(e.to_string()))
}

fn model_copy(
    positional: &[RawValue],
    keywords: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let args = Args::new("model_copy", positional, keywords);
    args.max_positional(2)?;
    args.allow_keywords(&["update", "deep"])?;
    let (class_name, fields) = model_fields(&args, "model_copy")?;
    let mut fields = fields.clone();
    match args.get(1, "update") {
        None | Some(RawValue::None) => {}
        Some(RawValue::Dict(pairs)) => {
            for (k, v) in pairs {
                let key = k.as_str().ok_or_else(|| {
                    ExceptionInfo::type_error("model_copy() update keys must be strings")
                })?;
                fields.insert(key.to_string(), v.clone());
            }
        }
        Some(other) => {
            return Err(ExceptionInfo::type_error(format!(
                "model_copy() update must be a dict, not '{}'",
                other.type_name()
            )))
        }
    }
    Ok(RawValue::Instance {
        class_name: class_name.to_string(),
        fields,
    })
}

fn model_construct(
    positional: &[RawValue],
    keywords: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let args = Args::new("model_construct", positional, keywords);
    args.max_positional(1)?;
    Ok(RawValue::Instance {
        class_name: class_name_of(&args)?.to_string(),
        fields: keywords.clone(),
    })
}

fn instance_from_pairs(
    class_name: &str,
    pairs: &[(RawValue, RawValue)],
) -> Result<RawValue, ExceptionInfo> {
    let mut fields = IndexMap::new();
    for (k, v) in pairs {
        let key = k
            .as_str()
            .ok_or_else(|| ExceptionInfo::type_error("model field names must be strings"))?;
        fields.insert(key.to_string(), v.clone());
    }
    Ok(RawValue::Instance {
        class_name: class_name.to_string(),
        fields,
    })
}

fn model_validate(
    positional: &[RawValue],
    keywords: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let args = Args::new("model_validate", positional, keywords);
    args.max_positional(2)?;
    let class_name = class_name_of(&args)?;
    match args.required(1, "obj")? {
        RawValue::Dict(pairs) => instance_from_pairs(class_name, pairs),
        RawValue::Instance { class_name: c, fields } if c == class_name => Ok(RawValue::Instance {
            class_name: c.clone(),
            fields: fields.clone(),
        }),
        other => Err(ExceptionInfo::type_error(format!(
            "1 validation error for {}\n  Input should be a valid dictionary or instance of {}, got {}",
            class_name,
            class_name,
            other.type_name()
        ))),
    }
}

fn model_validate_json(
    positional: &[RawValue],
    keywords: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let args = Args::new("model_validate_json", positional, keywords);
    args.max_positional(2)?;
    let class_name = class_name_of(&args)?;
    let text = args.str(1, "json_data")?;
    let json: serde_json::Value = serde_json::from_str(text).map_err(|e| {
        let message = format!("1 validation error for {}\n  Invalid JSON: {}", class_name, e);
        ExceptionInfo::value_error(message)
    })?;
    match RawValue::from_json(&json) {
        RawValue::Dict(pairs) => instance_from_pairs(class_name, &pairs),
        other => Err(ExceptionInfo::value_error(format!(
            "1 validation error for {}\n  Input should be an object, got {}",
            class_name,
            other.type_name()
        ))),
    }
}

/// Field types are not visible from a class reference, so the schema carries
/// only the title and kind.
fn model_json_schema(
    positional: &[RawValue],
    keywords: &IndexMap<String, RawValue>,
) -> Result<RawValue, ExceptionInfo> {
    let args = Args::new("model_json_schema", positional, keywords);
    args.max_positional(1)?;
    let class_name = class_name_of(&args)?;
    Ok(RawValue::dict_from([
        (RawValue::str("title"), RawValue::str(class_name)),
        (RawValue::str("type"), RawValue::str("object")),
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_instance() -> RawValue {
        let mut fields = IndexMap::new();
        fields.insert("name".to_string(), RawValue::str("Emma"));
        fields.insert("email".to_string(), RawValue::None);
        RawValue::Instance {
            class_name: "User".to_string(),
            fields,
        }
    }

    #[test]
    fn test_namespace_contents() {
        let ns = namespace();
        let expected = [
            "len",
            "print",
            "sorted",
            "datetime",
            "timedelta",
            "BaseModel",
            "EmailStr",
            "ValueError",
        ];
        for name in expected {
            assert!(ns.contains(name), "missing {}", name);
        }
        assert!(ns.get("len").unwrap().is_callable());
        assert!(ns.get("BaseModel").unwrap().as_class().is_some());
        assert!(crate::capabilities::is_public(ns.get("datetime").unwrap()));
    }

    #[test]
    fn test_model_dump() {
        let dumped = model_dump(&[user_instance()], &IndexMap::new()).unwrap();
        assert_eq!(dumped.py_repr(), "{'name': 'Emma', 'email': None}");
        let mut kw = IndexMap::new();
        kw.insert("exclude_none".to_string(), RawValue::Bool(true));
        let dumped = model_dump(&[user_instance()], &kw).unwrap();
        assert_eq!(dumped.py_repr(), "{'name': 'Emma'}");
        let json = model_dump_json(&[user_instance()], &IndexMap::new()).unwrap();
        assert_eq!(json, RawValue::str(r#"{"name":"Emma","email":null}"#));
    }

    #[test]
    fn test_model_copy_update() {
        let update = RawValue::dict_from([(RawValue::str("name"), RawValue::str("Bob"))]);
        let copied = model_copy(&[user_instance(), update], &IndexMap::new()).unwrap();
        match copied {
            RawValue::Instance { class_name, fields } => {
                assert_eq!(class_name, "User");
                assert_eq!(fields["name"], RawValue::str("Bob"));
            }
            other => panic!("Expected instance, got {:?}", other),
        }
    }

    #[test]
    fn test_model_validate() {
        let cls = RawValue::Callable { name: "User".into(), is_class: true };
        let data = RawValue::dict_from([(RawValue::str("name"), RawValue::str("Ann"))]);
        let validated = model_validate(&[cls.clone(), data], &IndexMap::new()).unwrap();
        assert!(matches!(
            validated,
            RawValue::Instance { ref class_name, .. } if class_name == "User"
        ));
        let err = model_validate(&[cls, RawValue::Int(1)], &IndexMap::new()).unwrap_err();
        assert!(err.message.starts_with("1 validation error for User"));
    }
}
