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

//! Capability-tracking interpreter for model-generated code.
//!
//! A restricted Python-like program is extracted from a model response,
//! parsed and evaluated. Every value carries its sources and readers, and
//! every tool call passes through a security policy engine that sees the
//! provenance of the arguments and of the enclosing control flow.

pub mod ast;
pub mod capabilities;
pub mod class;
pub mod config;
pub mod datetime;
pub mod eval;
pub mod exception;
pub mod function_call;
pub mod intrinsics;
pub mod operators;
pub mod parser;
pub mod policy;
pub mod prelude;
pub mod raw;
pub mod system_prompt;
pub mod value;

pub use capabilities::{Capabilities, Readers, Source};
pub use config::{ConfigError, InterpreterConfig};
pub use eval::{parse_and_interpret_code, EvalArgs, EvalMode, EvalResult};
pub use exception::{CamelException, ErrorKind, ExceptionInfo};
pub use function_call::FunctionCall;
pub use policy::{
    PolicyEngine, SecurityPolicyDeniedError, SecurityPolicyEngine, SecurityPolicyResult,
};
pub use raw::RawValue;
pub use value::{Namespace, ToolDef, Value};
