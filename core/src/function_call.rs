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

//! The audit record of one dispatched call.

use crate::raw::RawValue;
use indexmap::IndexMap;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionCall {
    pub function: String,
    /// Receiver type when the callee is a method.
    pub object_type: Option<String>,
    /// Positional arguments under `"0"`, `"1"`, ..., then keyword arguments.
    pub args: IndexMap<String, RawValue>,
    pub output: RawValue,
    pub is_builtin: bool,
}

impl FunctionCall {
    pub fn new(
        function: impl Into<String>,
        object_type: Option<String>,
        args: IndexMap<String, RawValue>,
        output: RawValue,
        is_builtin: bool,
    ) -> Self {
        FunctionCall {
            function: function.into(),
            object_type,
            args,
            output,
            is_builtin,
        }
    }

    pub fn positional(&self) -> impl Iterator<Item = &RawValue> {
        (0..)
            .map_while(move |i: usize| self.args.get(&i.to_string()))
    }

    /// One-line rendering, e.g. `send_email(to='bob', body='hi') -> None`.
    pub fn summary(&self) -> String {
        let args: Vec<String> = self
            .args
            .iter()
            .map(|(k, v)| {
                if k.parse::<usize>().is_ok() {
                    v.py_repr()
                } else {
                    format!("{}={}", k, v.py_repr())
                }
            })
            .collect();
        let callee = match &self.object_type {
            Some(ty) => format!("{}.{}", ty, self.function),
            None => self.function.clone(),
        };
        format!("{}({}) -> {}", callee, args.join(", "), self.output.py_repr())
    }
}

/// What the `print` calls of a chain wrote, honoring `sep` and `end`.
pub fn extract_print_output(chain: &[FunctionCall]) -> String {
    let text_or = |call: &FunctionCall, key: &str, default: &str| match call.args.get(key) {
        Some(RawValue::Str(s)) => s.clone(),
        _ => default.to_string(),
    };
    let mut out = String::new();
    for call in chain.iter().filter(|c| c.function == "print" && c.is_builtin) {
        let sep = text_or(call, "sep", " ");
        let parts: Vec<String> = call.positional().map(RawValue::py_str).collect();
        out.push_str(&parts.join(&sep));
        out.push_str(&text_or(call, "end", "\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn print_call(args: &[(&str, RawValue)]) -> FunctionCall {
        FunctionCall::new(
            "print",
            None,
            args.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            RawValue::None,
            true,
        )
    }

    #[test]
    fn test_extract_print_output() {
        let chain = vec![
            print_call(&[("0", RawValue::str("a")), ("1", RawValue::Int(1))]),
            FunctionCall::new("send_email", None, IndexMap::new(), RawValue::None, false),
            print_call(&[
                ("0", RawValue::str("x")),
                ("1", RawValue::str("y")),
                ("sep", RawValue::str("-")),
                ("end", RawValue::str("")),
            ]),
        ];
        assert_eq!(extract_print_output(&chain), "a 1\nx-y");
    }

    #[test]
    fn test_summary_and_serialization() {
        let mut args = IndexMap::new();
        args.insert("0".to_string(), RawValue::str("bob@example.com"));
        args.insert("body".to_string(), RawValue::str("hi"));
        let call = FunctionCall::new("send_email", None, args, RawValue::None, false);
        assert_eq!(call.summary(), "send_email('bob@example.com', body='hi') -> None");
        insta::assert_json_snapshot!(call, @r###"
        {
          "function": "send_email",
          "object_type": null,
          "args": {
            "0": "bob@example.com",
            "body": "hi"
          },
          "output": null,
          "is_builtin": false
        }
        "###);
    }
}
