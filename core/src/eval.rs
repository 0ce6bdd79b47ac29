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

//! Tree-walking interpreter with capability tracking.
//!
//! Evaluation threads three pieces of state through every node: the
//! [`Namespace`], the chain of dispatched calls and the control-flow
//! dependencies currently in force. Errors are returned as data
//! ([`CamelException`]) so partial progress stays observable. The one
//! exception is a policy denial of an external tool, which aborts the whole
//! submission with [`SecurityPolicyDeniedError`].

use crate::ast::{
    self, BoolOp, Comprehension, Constant, Construct, Expr, ExprKind, Keyword, Module, Stmt,
    StmtKind,
};
use crate::capabilities::{Capabilities, Source};
use crate::class::{self, ClassDef, ModelStyle};
use crate::config::ConfigError;
use crate::exception::{CamelException, ErrorKind, ExceptionInfo, NodeRef};
use crate::function_call::FunctionCall;
use crate::operators;
use crate::parser::parse_source;
use crate::policy::{
    PolicyArgs, SecurityPolicyDeniedError, SecurityPolicyEngine, SecurityPolicyResult,
    QUERY_AI_ASSISTANT,
};
use crate::raw::RawValue;
use crate::value::{value_from_raw, Namespace, ToolDef, Value, ValueKind};
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Nesting limit for expression and statement evaluation.
const MAX_DEPTH: usize = 200;

lazy_static::lazy_static! {
    static ref CODE_FENCE: Regex =
        Regex::new(r"(?s)```([a-zA-Z0-9_+\-#]*)\n(.*?)\n```").expect("valid code fence regex");
}

/// Names that may appear in field annotations without being bound.
const TYPING_NAMES: &[&str] = &[
    "Any", "Optional", "Union", "List", "Dict", "Set", "Tuple", "Literal", "object", "bytes",
    "frozenset", "None", "typing",
];

// ============================================================================
// EVALUATION MODE
// ============================================================================

/// How control-flow dependencies reach assigned values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EvalMode {
    /// Every assignment also depends on the enclosing `if`/`for` values, and
    /// the arguments of `query_ai_assistant` become control-flow dependencies.
    Strict,
    /// Only data flow is tracked into assigned values.
    #[default]
    Normal,
}

impl FromStr for EvalMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "STRICT" => Ok(EvalMode::Strict),
            "NORMAL" => Ok(EvalMode::Normal),
            _ => Err(ConfigError::UnknownEvalMode(s.to_string())),
        }
    }
}

impl fmt::Display for EvalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalMode::Strict => write!(f, "STRICT"),
            EvalMode::Normal => write!(f, "NORMAL"),
        }
    }
}

/// Per-submission settings.
#[derive(Clone, Copy)]
pub struct EvalArgs<'a> {
    pub engine: &'a dyn SecurityPolicyEngine,
    pub mode: EvalMode,
}

impl<'a> EvalArgs<'a> {
    pub fn new(engine: &'a dyn SecurityPolicyEngine, mode: EvalMode) -> Self {
        EvalArgs { engine, mode }
    }
}

/// Outcome of one submission.
#[derive(Debug)]
pub struct EvalResult {
    pub result: Result<Value, CamelException>,
    pub namespace: Namespace,
    /// Every successfully dispatched call, in call order.
    pub tool_calls_chain: Vec<FunctionCall>,
    /// Control-flow dependencies still in force.
    pub dependencies: Vec<Value>,
}

// ============================================================================
// ENTRY POINTS
// ============================================================================

/// Extracts the single fenced code block of a model response.
pub fn extract_code_block(markdown: &str) -> Result<String, ExceptionInfo> {
    let blocks: Vec<&str> = CODE_FENCE
        .captures_iter(markdown)
        .filter_map(|c| c.get(2))
        .map(|m| m.as_str().trim())
        .collect();
    match blocks.as_slice() {
        [code] => Ok(code.to_string()),
        _ => Err(ExceptionInfo::new(
            ErrorKind::InvalidOutputError,
            "You must provide exactly one non-empty code block in markdown format.",
        )),
    }
}

/// Extracts, parses and evaluates a model response.
pub fn parse_and_interpret_code(
    markdown: &str,
    namespace: Namespace,
    tool_calls_chain: Vec<FunctionCall>,
    dependencies: Vec<Value>,
    args: EvalArgs<'_>,
) -> Result<EvalResult, SecurityPolicyDeniedError> {
    let code = match extract_code_block(markdown) {
        Ok(code) => code,
        Err(info) => {
            warn!("model output does not hold exactly one code block");
            let node = NodeRef::new("Module", ast::Span::new(0, 0, -1, 0));
            return Ok(failed(
                CamelException::new(info, Some(node), vec![]),
                namespace,
                tool_calls_chain,
                dependencies,
            ));
        }
    };
    let module = match parse_source(&code) {
        Ok(module) => module,
        Err(e) => {
            warn!(line = e.line(), "submitted code failed to parse");
            let line = e.line() as i32;
            let node = NodeRef::new("Module", ast::Span::new(line, e.col(), line, e.col()));
            return Ok(failed(
                CamelException::new(ExceptionInfo::syntax_error(e.to_string()), Some(node), vec![]),
                namespace,
                tool_calls_chain,
                dependencies,
            ));
        }
    };
    interpret(&module, namespace, tool_calls_chain, dependencies, args)
}

fn failed(
    exception: CamelException,
    namespace: Namespace,
    tool_calls_chain: Vec<FunctionCall>,
    dependencies: Vec<Value>,
) -> EvalResult {
    EvalResult {
        result: Err(exception),
        namespace,
        tool_calls_chain,
        dependencies,
    }
}

/// Evaluates an already parsed module.
pub fn interpret(
    module: &Module,
    namespace: Namespace,
    tool_calls_chain: Vec<FunctionCall>,
    dependencies: Vec<Value>,
    args: EvalArgs<'_>,
) -> Result<EvalResult, SecurityPolicyDeniedError> {
    // Rejected up front so no statement before it runs.
    if let Some((construct, node)) = find_unsupported(&module.body) {
        warn!(construct = ?construct, "submitted code uses an unsupported construct");
        let info = ExceptionInfo::syntax_error(construct.message());
        let exception = CamelException::new(info, Some(node), vec![]);
        return Ok(failed(exception, namespace, tool_calls_chain, dependencies));
    }
    let mut interpreter = Interpreter {
        namespace,
        chain: tool_calls_chain,
        dependencies,
        engine: args.engine,
        mode: args.mode,
        depth: 0,
    };
    let result = match interpreter.eval_body(&module.body) {
        Ok(value) => Ok(value),
        Err(Interrupt::Error(e)) => Err(e),
        Err(Interrupt::Denied(denied)) => return Err(denied),
    };
    info!(
        calls = interpreter.chain.len(),
        ok = result.is_ok(),
        "evaluation finished"
    );
    Ok(EvalResult {
        result,
        namespace: interpreter.namespace,
        tool_calls_chain: interpreter.chain,
        dependencies: interpreter.dependencies,
    })
}

/// First unsupported construct in source order.
fn find_unsupported(body: &[Stmt]) -> Option<(Construct, NodeRef)> {
    body.iter().find_map(unsupported_in_stmt)
}

fn unsupported_in_stmt(stmt: &Stmt) -> Option<(Construct, NodeRef)> {
    let exprs: Vec<&Expr> = match &stmt.kind {
        StmtKind::Unsupported(construct) => return Some((*construct, stmt_node(stmt))),
        StmtKind::Expr(e) => vec![e],
        StmtKind::Assign { targets, value } => targets.iter().chain([value]).collect(),
        StmtKind::AugAssign { target, value, .. } => vec![target, value],
        StmtKind::AnnAssign {
            target,
            annotation,
            value,
        } => [Some(target), Some(annotation), value.as_ref()]
            .into_iter()
            .flatten()
            .collect(),
        StmtKind::If { test, body, orelse } => {
            return unsupported_in_expr(test)
                .or_else(|| find_unsupported(body))
                .or_else(|| find_unsupported(orelse))
        }
        StmtKind::For {
            target,
            iter,
            body,
            orelse,
        } => {
            return unsupported_in_expr(target)
                .or_else(|| unsupported_in_expr(iter))
                .or_else(|| find_unsupported(body))
                .or_else(|| find_unsupported(orelse))
        }
        StmtKind::ClassDef {
            bases,
            keywords,
            body,
            decorators,
            ..
        } => {
            return decorators
                .iter()
                .chain(bases)
                .chain(keywords.iter().map(|k| &k.value))
                .find_map(unsupported_in_expr)
                .or_else(|| find_unsupported(body))
        }
        StmtKind::Raise { exc, cause } => exc.iter().chain(cause.iter()).collect(),
        StmtKind::ImportFrom { .. } | StmtKind::Pass => vec![],
    };
    exprs.into_iter().find_map(unsupported_in_expr)
}

fn unsupported_in_expr(expr: &Expr) -> Option<(Construct, NodeRef)> {
    let children: Vec<&Expr> = match &expr.kind {
        ExprKind::Unsupported(construct) => return Some((*construct, expr_node(expr))),
        ExprKind::Constant(_) | ExprKind::Name(_) => vec![],
        ExprKind::Attribute { value, .. } | ExprKind::Starred(value) => vec![&**value],
        ExprKind::Subscript { value, index } => vec![&**value, &**index],
        ExprKind::Slice { lower, upper, step } => [lower, upper, step]
            .into_iter()
            .flatten()
            .map(|b| &**b)
            .collect(),
        ExprKind::List(items) | ExprKind::Tuple(items) | ExprKind::Set(items) => {
            items.iter().collect()
        }
        ExprKind::Dict { keys, values } => keys.iter().flatten().chain(values).collect(),
        ExprKind::BinOp { left, right, .. } => vec![&**left, &**right],
        ExprKind::UnaryOp { operand, .. } => vec![&**operand],
        ExprKind::BoolOp { values, .. } | ExprKind::JoinedStr(values) => values.iter().collect(),
        ExprKind::Compare {
            left, comparators, ..
        } => std::iter::once(&**left).chain(comparators).collect(),
        ExprKind::Call {
            func,
            args,
            keywords,
        } => std::iter::once(&**func)
            .chain(args)
            .chain(keywords.iter().map(|k| &k.value))
            .collect(),
        ExprKind::IfExp { test, body, orelse } => vec![&**test, &**body, &**orelse],
        ExprKind::ListComp { elt, generators } | ExprKind::SetComp { elt, generators } => {
            std::iter::once(&**elt)
                .chain(generators.iter().flat_map(comprehension_exprs))
                .collect()
        }
        ExprKind::DictComp {
            key,
            value,
            generators,
        } => [&**key, &**value]
            .into_iter()
            .chain(generators.iter().flat_map(comprehension_exprs))
            .collect(),
        ExprKind::FormattedValue {
            value, format_spec, ..
        } => std::iter::once(&**value)
            .chain(format_spec.as_deref())
            .collect(),
        ExprKind::NamedExpr { target, value } => vec![&**target, &**value],
    };
    children.into_iter().find_map(unsupported_in_expr)
}

fn comprehension_exprs(generator: &Comprehension) -> impl Iterator<Item = &Expr> {
    [&generator.target, &generator.iter]
        .into_iter()
        .chain(generator.ifs.iter())
}

// ============================================================================
// INTERRUPTS
// ============================================================================

/// Why evaluation of a node stopped.
enum Interrupt {
    Error(CamelException),
    Denied(SecurityPolicyDeniedError),
}

impl Interrupt {
    /// Records that the interrupt crossed `node`.
    fn at(mut self, node: NodeRef) -> Self {
        if let Interrupt::Error(e) = &mut self {
            e.push_node(node);
        }
        self
    }
}

type Flow<T> = Result<T, Interrupt>;

fn fail(info: ExceptionInfo, dependencies: Vec<Value>) -> Interrupt {
    Interrupt::Error(CamelException::new(info, None, dependencies))
}

fn fail_at(info: ExceptionInfo, node: NodeRef, dependencies: Vec<Value>) -> Interrupt {
    Interrupt::Error(CamelException::new(info, Some(node), dependencies))
}

fn expr_node(expr: &Expr) -> NodeRef {
    NodeRef::new(expr.kind.name(), expr.span)
}

fn stmt_node(stmt: &Stmt) -> NodeRef {
    NodeRef::new(stmt.kind.name(), stmt.span)
}

fn literal_none() -> Value {
    Value::none(Capabilities::default_user(), vec![])
}

// ============================================================================
// INTERPRETER
// ============================================================================

struct Interpreter<'a> {
    namespace: Namespace,
    chain: Vec<FunctionCall>,
    dependencies: Vec<Value>,
    engine: &'a dyn SecurityPolicyEngine,
    mode: EvalMode,
    depth: usize,
}

impl<'a> Interpreter<'a> {
    fn enter(&mut self) -> Flow<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            self.depth -= 1;
            return Err(fail(
                ExceptionInfo::new(
                    ErrorKind::RecursionError,
                    "maximum recursion depth exceeded",
                ),
                vec![],
            ));
        }
        Ok(())
    }

    /// Runs `f` with `dependency` added to the control-flow dependencies.
    fn with_dependency<T>(
        &mut self,
        dependency: Value,
        f: impl FnOnce(&mut Self) -> Flow<T>,
    ) -> Flow<T> {
        self.dependencies.push(dependency.clone());
        let out = f(self);
        if let Some(pos) = self.dependencies.iter().rposition(|d| d.ptr_eq(&dependency)) {
            self.dependencies.remove(pos);
        }
        out
    }

    /// In strict mode, makes `value` depend on the active control flow.
    fn fold_control_flow(&self, value: Value) -> Value {
        match self.mode {
            EvalMode::Strict if !self.dependencies.is_empty() => {
                value.new_with_dependencies(self.dependencies.iter().cloned())
            }
            _ => value,
        }
    }

    // ─── Statements ──────────────────────────────────────────────────────

    fn eval_body(&mut self, body: &[Stmt]) -> Flow<Value> {
        let mut last = literal_none();
        for stmt in body {
            last = self.eval_stmt(stmt)?;
        }
        Ok(last)
    }

    fn eval_stmt(&mut self, stmt: &Stmt) -> Flow<Value> {
        self.enter()?;
        let out = self.eval_stmt_inner(stmt);
        self.depth -= 1;
        out.map_err(|i| i.at(stmt_node(stmt)))
    }

    fn eval_stmt_inner(&mut self, stmt: &Stmt) -> Flow<Value> {
        match &stmt.kind {
            StmtKind::Expr(expr) => self.eval_expr(expr),
            StmtKind::Assign { targets, value } => {
                let value = self.eval_expr(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
                Ok(value)
            }
            StmtKind::AugAssign { target, op, value } => self.eval_aug_assign(target, *op, value),
            StmtKind::AnnAssign { target, value, .. } => match value {
                Some(value) => {
                    let value = self.eval_expr(value)?;
                    self.assign(target, value.clone())?;
                    Ok(value)
                }
                None => Ok(literal_none()),
            },
            StmtKind::If { test, body, orelse } => {
                let test = self.eval_expr(test)?;
                let branch = if test.truthy() { body } else { orelse };
                if branch.is_empty() {
                    return Ok(literal_none());
                }
                self.with_dependency(test, |this| this.eval_body(branch))?;
                Ok(literal_none())
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                if !orelse.is_empty() {
                    return Err(fail(
                        ExceptionInfo::syntax_error(
                            "orelse blocks in for loops are not supported because break is not supported.",
                        ),
                        vec![],
                    ));
                }
                let iterable = self.eval_expr(iter)?;
                if !(iterable.is_iterable() || iterable.is_mapping()) {
                    return Err(fail(
                        not_iterable(&iterable),
                        vec![iterable],
                    ));
                }
                let elements = iterable
                    .iter_values()
                    .map_err(|e| fail(e, vec![iterable.clone()]))?;
                self.with_dependency(iterable, |this| {
                    for element in elements {
                        this.assign(target, element)?;
                        this.eval_body(body)?;
                    }
                    Ok(())
                })?;
                Ok(literal_none())
            }
            StmtKind::ClassDef {
                name,
                bases,
                keywords,
                body,
                decorators,
            } => self.eval_class_def(name, bases, keywords, body, decorators),
            StmtKind::Raise { exc, .. } => Err(self.eval_raise(exc.as_ref())?),
            StmtKind::ImportFrom { names, .. } => {
                for alias in names {
                    let Some(value) = self.namespace.get(&alias.name).cloned() else {
                        return Err(fail(
                            ExceptionInfo::syntax_error(format!(
                                "You can't import {}. Instead, use what you have been provided as described in the system prompt, which you can assume has already been imported.",
                                alias.name
                            )),
                            vec![],
                        ));
                    };
                    if let Some(asname) = &alias.asname {
                        self.namespace.remove(&alias.name);
                        self.namespace.set_variable(asname.clone(), value);
                    }
                }
                Ok(Value::none(Capabilities::camel(), vec![]))
            }
            StmtKind::Pass => Ok(literal_none()),
            StmtKind::Unsupported(construct) => {
                Err(fail(ExceptionInfo::syntax_error(construct.message()), vec![]))
            }
        }
    }

    fn eval_aug_assign(&mut self, target: &Expr, op: ast::BinOp, value: &Expr) -> Flow<Value> {
        let combine = |namespace: &Namespace, current: &Value, rhs: &Value| {
            operators::binary(op, current, rhs, namespace)
                .map_err(|e| fail(e, vec![current.clone(), rhs.clone()]))
        };
        match &target.kind {
            ExprKind::Name(name) => {
                let current = self.lookup(name)?;
                let rhs = self.eval_expr(value)?;
                let updated = combine(&self.namespace, &current, &rhs)?;
                self.assign_name(name, updated.clone())?;
                Ok(updated)
            }
            ExprKind::Attribute { value: obj, attr } => {
                let obj = self.eval_expr(obj)?;
                let current = self.get_attr(&obj, attr)?;
                let rhs = self.eval_expr(value)?;
                let updated = combine(&self.namespace, &current, &rhs)?;
                let updated_obj = self.fold_control_flow(obj);
                let stored = self.fold_control_flow(updated.clone());
                updated_obj
                    .set_field(attr, stored)
                    .map_err(|e| fail(e, vec![updated_obj.clone()]))?;
                Ok(updated)
            }
            ExprKind::Subscript { value: seq, index } => {
                if matches!(index.kind, ExprKind::Slice { .. }) {
                    return Err(fail(
                        ExceptionInfo::syntax_error("slices assignments are not supported."),
                        vec![],
                    ));
                }
                let seq = self.eval_expr(seq)?;
                let index = self.eval_expr(index)?;
                let current = seq
                    .get_index(&index)
                    .map_err(|e| fail(e, vec![seq.clone(), index.clone()]))?;
                let rhs = self.eval_expr(value)?;
                let updated = combine(&self.namespace, &current, &rhs)?;
                self.store_item(&seq, &index, updated.clone())?;
                Ok(updated)
            }
            _ => Err(fail(
                ExceptionInfo::syntax_error(format!(
                    "'{}' is an illegal expression for augmented assignment",
                    target.kind.name()
                )),
                vec![],
            )),
        }
    }

    // ─── Assignment ──────────────────────────────────────────────────────

    fn assign(&mut self, target: &Expr, value: Value) -> Flow<()> {
        self.assign_inner(target, value)
            .map_err(|i| i.at(expr_node(target)))
    }

    fn assign_inner(&mut self, target: &Expr, value: Value) -> Flow<()> {
        match &target.kind {
            ExprKind::Name(name) => self.assign_name(name, value),
            ExprKind::Tuple(targets) | ExprKind::List(targets) => {
                if !matches!(
                    value.kind(),
                    ValueKind::Tuple(_) | ValueKind::List(_) | ValueKind::Str { .. }
                ) {
                    return Err(fail(
                        ExceptionInfo::type_error(format!(
                            "cannot unpack non-iterable {} object",
                            value.type_name()
                        )),
                        vec![value],
                    ));
                }
                if targets.iter().any(|t| matches!(t.kind, ExprKind::Starred(_))) {
                    return Err(fail(
                        ExceptionInfo::syntax_error("starred expressions are not supported."),
                        vec![value],
                    ));
                }
                let items = value
                    .iter_values()
                    .map_err(|e| fail(e, vec![value.clone()]))?;
                if items.len() != targets.len() {
                    let message = if items.len() > targets.len() {
                        format!(
                            "too many values to unpack (expected {}, got {})",
                            targets.len(),
                            items.len()
                        )
                    } else {
                        format!(
                            "not enough values to unpack (expected {}, got {})",
                            targets.len(),
                            items.len()
                        )
                    };
                    return Err(fail(ExceptionInfo::value_error(message), vec![value]));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item)?;
                }
                Ok(())
            }
            ExprKind::Attribute { value: obj, attr } => {
                let obj = self.eval_expr(obj)?;
                let obj = self.fold_control_flow(obj);
                let value = self.fold_control_flow(value);
                obj.set_field(attr, value)
                    .map_err(|e| fail(e, vec![obj.clone()]))?;
                Ok(())
            }
            ExprKind::Subscript { value: seq, index } => {
                let seq = self.eval_expr(seq)?;
                if matches!(index.kind, ExprKind::Slice { .. }) {
                    return Err(fail(
                        ExceptionInfo::syntax_error("slices assignments are not supported."),
                        vec![seq],
                    ));
                }
                let index = self.eval_expr(index)?;
                self.store_item(&seq, &index, value)
            }
            ExprKind::Starred(_) => Err(fail(
                ExceptionInfo::syntax_error("starred expressions are not supported."),
                vec![value],
            )),
            other => Err(fail(
                ExceptionInfo::syntax_error(format!("cannot assign to {}", other.name())),
                vec![value],
            )),
        }
    }

    fn assign_name(&mut self, name: &str, value: Value) -> Flow<()> {
        let value = self.fold_control_flow(value);
        if self.namespace.get(name).map_or(false, is_builtin_binding) {
            return Err(fail(
                ExceptionInfo::syntax_error(format!("cannot reassign built-in {}", name)),
                vec![],
            ));
        }
        self.namespace.set_variable(name, value);
        Ok(())
    }

    fn store_item(&mut self, seq: &Value, index: &Value, value: Value) -> Flow<()> {
        let (seq, value) = match self.mode {
            EvalMode::Strict => {
                let mut extra = vec![index.clone()];
                extra.extend(self.dependencies.iter().cloned());
                (
                    seq.new_with_dependencies(extra.clone()),
                    value.new_with_dependencies(extra),
                )
            }
            EvalMode::Normal => (seq.clone(), value),
        };
        seq.set_index(index, value)
            .map_err(|e| fail(e, vec![seq.clone(), index.clone()]))?;
        Ok(())
    }

    // ─── Expressions ─────────────────────────────────────────────────────

    fn eval_expr(&mut self, expr: &Expr) -> Flow<Value> {
        self.enter()?;
        let out = self.eval_expr_inner(expr);
        self.depth -= 1;
        out.map_err(|i| i.at(expr_node(expr)))
    }

    fn eval_expr_inner(&mut self, expr: &Expr) -> Flow<Value> {
        match &expr.kind {
            ExprKind::Constant(constant) => eval_constant(constant),
            ExprKind::Name(name) => self.lookup(name),
            ExprKind::Attribute { value, attr } => {
                let obj = self.eval_expr(value)?;
                self.get_attr(&obj, attr)
            }
            ExprKind::Subscript { value, index } => {
                let obj = self.eval_expr(value)?;
                if let ExprKind::Slice { lower, upper, step } = &index.kind {
                    let mut bound = |b: &Option<Box<Expr>>| match b {
                        Some(e) => self.eval_expr(e),
                        None => Ok(literal_none()),
                    };
                    let lower = bound(lower)?;
                    let upper = bound(upper)?;
                    let step = bound(step)?;
                    return obj.slice(&lower, &upper, &step).map_err(|e| {
                        fail(e, vec![obj.clone(), lower.clone(), upper.clone(), step.clone()])
                    });
                }
                let index = self.eval_expr(index)?;
                obj.get_index(&index)
                    .map_err(|e| fail(e, vec![obj.clone(), index.clone()]))
            }
            ExprKind::Slice { .. } => Err(fail(
                ExceptionInfo::syntax_error("Slices are not supported."),
                vec![],
            )),
            ExprKind::Starred(_) => Err(fail(
                ExceptionInfo::syntax_error("starred expressions are not supported."),
                vec![],
            )),
            ExprKind::List(items) => {
                let (items, unpacked) = self.eval_elements(items)?;
                Ok(Value::list(items, Capabilities::default_user(), unpacked))
            }
            ExprKind::Tuple(items) => {
                let (items, unpacked) = self.eval_elements(items)?;
                Ok(Value::tuple(items, Capabilities::default_user(), unpacked))
            }
            ExprKind::Set(items) => {
                let (items, unpacked) = self.eval_elements(items)?;
                Value::set(items, Capabilities::default_user(), unpacked)
                    .map_err(|e| fail(e, vec![]))
            }
            ExprKind::Dict { keys, values } => self.eval_dict(keys, values),
            ExprKind::BinOp { left, op, right } => {
                let left = self.eval_expr(left)?;
                let right = self.eval_expr(right)?;
                operators::binary(*op, &left, &right, &self.namespace)
                    .map_err(|e| fail(e, vec![left.clone(), right.clone()]))
            }
            ExprKind::UnaryOp { op, operand } => {
                let operand = self.eval_expr(operand)?;
                operators::unary(*op, &operand, &self.namespace)
                    .map_err(|e| fail(e, vec![operand.clone()]))
            }
            ExprKind::BoolOp { op, values } => self.eval_bool_op(*op, values),
            ExprKind::Compare {
                left,
                ops,
                comparators,
            } => {
                let (op, right) = match (ops.as_slice(), comparators.as_slice()) {
                    ([op], [right]) => (*op, right),
                    _ => {
                        return Err(fail(
                            ExceptionInfo::syntax_error("chained comparisons are not supported"),
                            vec![],
                        ))
                    }
                };
                let left = self.eval_expr(left)?;
                let right = self.eval_expr(right)?;
                operators::compare(op, &left, &right)
                    .map_err(|e| fail(e, vec![left.clone(), right.clone()]))
            }
            ExprKind::Call {
                func,
                args,
                keywords,
            } => self.eval_call(func, args, keywords),
            ExprKind::IfExp { test, body, orelse } => {
                let test = self.eval_expr(test)?;
                let branch = if test.truthy() { body } else { orelse };
                let value = self.with_dependency(test.clone(), |this| this.eval_expr(branch))?;
                let mut extra = self.dependencies.clone();
                extra.push(test);
                Ok(value.new_with_dependencies(extra))
            }
            ExprKind::ListComp { elt, generators } => {
                let (mut results, iterators) = self.eval_comprehension(generators, &[&**elt])?;
                let items = results.pop().unwrap_or_default();
                Ok(Value::list(items, Capabilities::default_user(), iterators))
            }
            ExprKind::SetComp { elt, generators } => {
                let (mut results, iterators) = self.eval_comprehension(generators, &[&**elt])?;
                let items = results.pop().unwrap_or_default();
                Value::set(items, Capabilities::default_user(), iterators)
                    .map_err(|e| fail(e, vec![]))
            }
            ExprKind::DictComp {
                key,
                value,
                generators,
            } => {
                let (mut results, iterators) =
                    self.eval_comprehension(generators, &[&**key, &**value])?;
                let values = results.pop().unwrap_or_default();
                let keys = results.pop().unwrap_or_default();
                let pairs = keys.into_iter().zip(values).collect();
                Value::dict(pairs, Capabilities::default_user(), iterators)
                    .map_err(|e| fail(e, vec![]))
            }
            ExprKind::JoinedStr(parts) => {
                let mut chars = Vec::new();
                let mut pieces = Vec::with_capacity(parts.len());
                for part in parts {
                    let piece = self.eval_expr(part)?;
                    chars.extend(piece.elements().unwrap_or_default());
                    pieces.push(piece);
                }
                Ok(Value::str_from_chars(chars, Capabilities::camel(), pieces))
            }
            ExprKind::FormattedValue {
                value,
                conversion,
                format_spec,
            } => self.eval_formatted_value(value, *conversion, format_spec.as_deref()),
            ExprKind::NamedExpr { target, value } => {
                let value = self.eval_expr(value)?;
                match &target.kind {
                    ExprKind::Name(name) => self.assign_name(name, value.clone())?,
                    _ => {
                        return Err(fail(
                            ExceptionInfo::syntax_error(format!(
                                "cannot use assignment expressions with {}",
                                target.kind.name()
                            )),
                            vec![],
                        ))
                    }
                }
                Ok(value)
            }
            ExprKind::Unsupported(construct) => {
                Err(fail(ExceptionInfo::syntax_error(construct.message()), vec![]))
            }
        }
    }

    fn lookup(&self, name: &str) -> Flow<Value> {
        self.namespace.get(name).cloned().ok_or_else(|| {
            fail(
                ExceptionInfo::name_error(format!("name '{}' is not defined", name)),
                vec![],
            )
        })
    }

    fn get_attr(&self, obj: &Value, attr: &str) -> Flow<Value> {
        match obj.attr(attr, &self.namespace) {
            Ok(Some(value)) => Ok(value),
            Ok(None) => {
                let message = match obj.as_class() {
                    Some(def) => format!("type object '{}' has no attribute '{}'", def.name, attr),
                    None => format!("'{}' object has no attribute '{}'", obj.type_name(), attr),
                };
                Err(fail(ExceptionInfo::attribute_error(message), vec![obj.clone()]))
            }
            Err(e) => Err(fail(e, vec![obj.clone()])),
        }
    }

    /// Elements of a list, tuple or set literal, expanding `*iterable`.
    /// Returns the elements and the unpacked values.
    fn eval_elements(&mut self, items: &[Expr]) -> Flow<(Vec<Value>, Vec<Value>)> {
        let mut out = Vec::with_capacity(items.len());
        let mut unpacked = Vec::new();
        for item in items {
            match &item.kind {
                ExprKind::Starred(inner) => {
                    let iterable = self.eval_expr(inner)?;
                    if !(iterable.is_iterable() || iterable.is_mapping()) {
                        return Err(fail_at(
                            ExceptionInfo::type_error(format!(
                                "Value after * must be an iterable, not {}",
                                iterable.type_name()
                            )),
                            expr_node(item),
                            vec![iterable],
                        ));
                    }
                    out.extend(
                        iterable
                            .iter_values()
                            .map_err(|e| fail(e, vec![iterable.clone()]))?,
                    );
                    unpacked.push(iterable);
                }
                _ => out.push(self.eval_expr(item)?),
            }
        }
        Ok((out, unpacked))
    }

    fn eval_dict(&mut self, keys: &[Option<Expr>], values: &[Expr]) -> Flow<Value> {
        let mut pairs = Vec::with_capacity(keys.len());
        let mut unpacked = Vec::new();
        for (key, value) in keys.iter().zip(values) {
            match key {
                Some(key) => {
                    let key = self.eval_expr(key)?;
                    let value = self.eval_expr(value)?;
                    pairs.push((key, value));
                }
                None => {
                    let mapping = self.eval_expr(value)?;
                    let Some(entries) = mapping.dict_entries() else {
                        return Err(fail(
                            ExceptionInfo::type_error(format!(
                                "'{}' object is not a mapping",
                                mapping.type_name()
                            )),
                            vec![mapping],
                        ));
                    };
                    pairs.extend(entries);
                    unpacked.push(mapping);
                }
            }
        }
        Value::dict(pairs, Capabilities::default_user(), unpacked).map_err(|e| fail(e, vec![]))
    }

    /// `and`/`or` with short-circuiting. Each operand after the first
    /// depends on everything evaluated before it.
    fn eval_bool_op(&mut self, op: BoolOp, values: &[Expr]) -> Flow<Value> {
        let neutral = op == BoolOp::And;
        let mut result: Option<Value> = None;
        for expr in values {
            let value = self.eval_expr(expr)?;
            let current = match result.take() {
                Some(previous) => value.new_with_dependencies([previous]),
                None => value,
            };
            if current.truthy() != neutral {
                return Ok(current);
            }
            result = Some(current);
        }
        Ok(result.unwrap_or_else(|| Value::bool(neutral, Capabilities::default_user(), vec![])))
    }

    fn eval_formatted_value(
        &mut self,
        value: &Expr,
        conversion: Option<char>,
        format_spec: Option<&Expr>,
    ) -> Flow<Value> {
        let value = self.eval_expr(value)?;
        let spec = match format_spec {
            Some(spec) => Some(self.eval_expr(spec)?),
            None => None,
        };
        let spec_text = spec
            .as_ref()
            .and_then(|s| s.as_text().map(str::to_string))
            .unwrap_or_default();
        // A plain string keeps its per-character provenance.
        if conversion.is_none() && spec_text.is_empty() && value.as_text().is_some() {
            return Ok(value.str_value());
        }
        let raw = match conversion {
            None => value.to_raw(),
            Some('s') => RawValue::Str(value.to_raw().py_str()),
            Some('r') => RawValue::Str(value.to_raw().py_repr()),
            Some('a') => RawValue::Str(value.to_raw().py_ascii()),
            Some(_) => {
                return Err(fail(
                    ExceptionInfo::syntax_error("Invalid conversion specifier."),
                    vec![],
                ))
            }
        };
        let mut dependencies = vec![value];
        dependencies.extend(spec);
        let text = raw
            .format_with_spec(&spec_text)
            .map_err(|e| fail(e, dependencies.clone()))?;
        Ok(Value::str(&text, Capabilities::camel(), dependencies))
    }

    // ─── Comprehensions ──────────────────────────────────────────────────

    /// Evaluates the generators of a comprehension, collecting one list of
    /// results per element expression plus the iterated values. Names bound
    /// by the generator targets are restored afterwards.
    fn eval_comprehension(
        &mut self,
        generators: &[Comprehension],
        elements: &[&Expr],
    ) -> Flow<(Vec<Vec<Value>>, Vec<Value>)> {
        let mut names = BTreeSet::new();
        for generator in generators {
            assigned_names(&generator.target, &mut names);
        }
        let saved: Vec<(String, Option<Value>)> = names
            .into_iter()
            .map(|name| {
                let previous = self.namespace.get(&name).cloned();
                (name, previous)
            })
            .collect();

        let mut results = vec![Vec::new(); elements.len()];
        let mut iterators = Vec::new();
        let out = self.eval_generators(generators, elements, &mut results, &mut iterators);

        for (name, previous) in saved {
            match previous {
                Some(value) => self.namespace.set_variable(name, value),
                None => {
                    self.namespace.remove(&name);
                }
            }
        }
        out.map(|()| (results, iterators))
    }

    fn eval_generators(
        &mut self,
        generators: &[Comprehension],
        elements: &[&Expr],
        results: &mut [Vec<Value>],
        iterators: &mut Vec<Value>,
    ) -> Flow<()> {
        let Some((current, rest)) = generators.split_first() else {
            for (slot, element) in results.iter_mut().zip(elements) {
                slot.push(self.eval_expr(element)?);
            }
            return Ok(());
        };
        let iterable = self.eval_expr(&current.iter)?;
        if !(iterable.is_iterable() || iterable.is_mapping()) {
            return Err(fail_at(
                not_iterable(&iterable),
                expr_node(&current.iter),
                vec![iterable],
            ));
        }
        let items = iterable
            .iter_values()
            .map_err(|e| fail(e, vec![iterable.clone()]))?;
        iterators.push(iterable);
        for item in items {
            self.assign(&current.target, item)?;
            let mut keep = true;
            for condition in &current.ifs {
                if !self.eval_expr(condition)?.truthy() {
                    keep = false;
                    break;
                }
            }
            if keep {
                self.eval_generators(rest, elements, results, iterators)?;
            }
        }
        Ok(())
    }

    // ─── Calls ───────────────────────────────────────────────────────────

    /// Evaluation order: the callee, positional and starred arguments, then
    /// keyword and double-starred arguments. Callability is checked last.
    fn eval_call(&mut self, func: &Expr, args: &[Expr], keywords: &[Keyword]) -> Flow<Value> {
        let callee = self.eval_expr(func)?;
        let name = callee
            .callable_name()
            .unwrap_or_else(|| callee.type_name());

        let mut positional = Vec::with_capacity(args.len() + 1);
        for arg in args {
            match &arg.kind {
                ExprKind::Starred(inner) => {
                    let iterable = self.eval_expr(inner)?;
                    if !(iterable.is_iterable() || iterable.is_mapping()) {
                        return Err(fail_at(
                            ExceptionInfo::type_error(format!(
                                "{}() argument after * must be an iterable, not {}",
                                name,
                                iterable.type_name()
                            )),
                            expr_node(arg),
                            vec![iterable],
                        ));
                    }
                    positional.extend(
                        iterable
                            .iter_values()
                            .map_err(|e| fail(e, vec![iterable.clone()]))?,
                    );
                }
                _ => positional.push(self.eval_expr(arg)?),
            }
        }
        if let Some(receiver) = callee.receiver() {
            positional.insert(0, receiver.clone());
        }

        let mut kwargs: IndexMap<String, Value> = IndexMap::new();
        for keyword in keywords {
            let value = self.eval_expr(&keyword.value)?;
            match &keyword.arg {
                Some(arg) => {
                    if kwargs.contains_key(arg) {
                        return Err(fail(
                            ExceptionInfo::syntax_error(format!(
                                "keyword argument repeated: {}",
                                arg
                            )),
                            vec![value],
                        ));
                    }
                    kwargs.insert(arg.clone(), value);
                }
                None => {
                    let Some(entries) = value.dict_entries() else {
                        return Err(fail(
                            ExceptionInfo::type_error(format!(
                                "{}() argument after ** must be a mapping, not {}",
                                name,
                                value.type_name()
                            )),
                            vec![value],
                        ));
                    };
                    for (key, item) in entries {
                        let Some(key) = key.as_text() else {
                            return Err(fail(
                                ExceptionInfo::type_error("keywords must be strings"),
                                vec![value],
                            ));
                        };
                        if kwargs.contains_key(key) {
                            return Err(fail(
                                ExceptionInfo::type_error(format!(
                                    "{}() got multiple values for keyword argument '{}'",
                                    name, key
                                )),
                                vec![value],
                            ));
                        }
                        kwargs.insert(key.to_string(), item);
                    }
                }
            }
        }

        if !callee.is_callable() {
            return Err(fail(
                ExceptionInfo::type_error(format!(
                    "'{}' object is not callable",
                    callee.type_name()
                )),
                vec![callee],
            ));
        }

        let is_builtin = matches!(callee.kind(), ValueKind::Builtin { .. } | ValueKind::Class(_));
        let mut policy_args: PolicyArgs = positional
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v.clone()))
            .collect();
        policy_args.extend(kwargs.iter().map(|(k, v)| (k.clone(), v.clone())));

        // Built-ins and classes cannot have side effects; their result is
        // only informative.
        let decision = self.engine.check_policy(&name, &policy_args, &self.dependencies);
        if let SecurityPolicyResult::Denied(reason) = decision {
            if !is_builtin {
                warn!(tool = %name, "tool call denied, aborting evaluation");
                return Err(Interrupt::Denied(SecurityPolicyDeniedError { tool: name, reason }));
            }
        }

        if name == QUERY_AI_ASSISTANT && self.mode == EvalMode::Strict {
            self.dependencies.extend(positional.iter().cloned());
            self.dependencies.extend(kwargs.values().cloned());
        }

        debug!(function = %name, builtin = is_builtin, "dispatching call");
        let output = match self.dispatch(&callee, &positional, &kwargs) {
            Ok(output) => output,
            Err(info) => {
                debug!(function = %name, kind = %info.kind, "call raised");
                let mut dependencies = Vec::new();
                if info.kind != ErrorKind::NotEnoughInformationError {
                    dependencies.push(callee.clone());
                }
                dependencies.extend(positional);
                dependencies.extend(kwargs.into_values());
                return Err(Interrupt::Error(
                    CamelException::new(info, None, dependencies)
                        .with_capabilities(Capabilities::tool(&name)),
                ));
            }
        };

        let object_type = callee.receiver().map(|r| match r.as_class() {
            Some(def) => def.name.clone(),
            None => r.type_name(),
        });
        let raw_args = policy_args
            .iter()
            .map(|(k, v)| (k.clone(), v.to_raw()))
            .collect();
        self.chain.push(FunctionCall::new(
            name,
            object_type,
            raw_args,
            output.to_raw(),
            is_builtin,
        ));
        Ok(output)
    }

    /// Invokes a callable. Host callables see raw values; their output is
    /// tracked again with the callee and arguments as dependencies.
    fn dispatch(
        &self,
        callee: &Value,
        positional: &[Value],
        kwargs: &IndexMap<String, Value>,
    ) -> Result<Value, ExceptionInfo> {
        let raw_args: Vec<RawValue> = positional.iter().map(Value::to_raw).collect();
        let raw_kwargs: IndexMap<String, RawValue> = kwargs
            .iter()
            .map(|(k, v)| (k.clone(), v.to_raw()))
            .collect();
        let mut dependencies = vec![callee.clone()];
        dependencies.extend(positional.iter().cloned());
        dependencies.extend(kwargs.values().cloned());
        match callee.kind() {
            ValueKind::Builtin { def, .. } => {
                let raw = (def.call)(&raw_args, &raw_kwargs)?;
                value_from_raw(&raw, &Capabilities::camel(), &self.namespace, dependencies)
            }
            ValueKind::Function(tool) => {
                let raw = (tool.call)(&raw_args, &raw_kwargs)?;
                value_from_raw(&raw, &tool_capabilities(tool), &self.namespace, dependencies)
            }
            ValueKind::Class(_) => class::instantiate(callee, positional, kwargs, &self.namespace),
            _ => Err(ExceptionInfo::type_error(format!(
                "'{}' object is not callable",
                callee.type_name()
            ))),
        }
    }

    // ─── Classes & raise ─────────────────────────────────────────────────

    fn eval_class_def(
        &mut self,
        name: &str,
        bases: &[Expr],
        keywords: &[Keyword],
        body: &[Stmt],
        decorators: &[Expr],
    ) -> Flow<Value> {
        if self.namespace.contains(name) {
            return Err(fail(
                ExceptionInfo::type_error(format!(
                    "You are trying to re-define the already existing class {0}. Use directly {0} without defining it again.",
                    name
                )),
                vec![],
            ));
        }

        let mut base_values = Vec::with_capacity(bases.len());
        for base in bases {
            base_values.push(self.eval_expr(base)?);
        }
        let style = if is_dataclass_decorator(decorators) {
            ModelStyle::Dataclass
        } else if keywords.is_empty()
            && !base_values.is_empty()
            && base_values
                .iter()
                .all(|b| b.as_class().map_or(false, |def| def.name == "BaseModel"))
        {
            ModelStyle::BaseModel
        } else {
            return Err(fail(
                ExceptionInfo::syntax_error("all class definitions must inherit from BaseModel."),
                base_values,
            ));
        };
        if let Some(bad) = base_values.iter().find(|b| b.as_class().is_none()) {
            return Err(fail(
                ExceptionInfo::type_error(format!(
                    "bases must be types, not {}",
                    bad.type_name()
                )),
                vec![bad.clone()],
            ));
        }

        let mut fields = IndexMap::new();
        for stmt in body {
            let StmtKind::AnnAssign {
                target,
                annotation,
                value,
            } = &stmt.kind
            else {
                return Err(fail_at(
                    ExceptionInfo::not_implemented(
                        "only field definitions are supported in class definitions.",
                    ),
                    stmt_node(stmt),
                    vec![],
                ));
            };
            let ExprKind::Name(field) = &target.kind else {
                return Err(fail_at(
                    ExceptionInfo::syntax_error(
                        "cannot assign an attribute or a subscript in class definitions.",
                    ),
                    stmt_node(stmt),
                    vec![],
                ));
            };
            if value.is_some() {
                return Err(fail_at(
                    ExceptionInfo::syntax_error(
                        "cannot specify default values for fields in class definitions.",
                    ),
                    stmt_node(stmt),
                    vec![],
                ));
            }
            self.check_annotation(annotation)?;
            fields.insert(field.clone(), ast::unparse(annotation));
        }

        debug!(class = name, fields = fields.len(), "defining class");
        let class = Value::class(
            ClassDef::model(name, style, fields, base_values),
            Capabilities::default_user(),
            vec![],
        );
        self.assign_name(name, class.clone())?;
        Ok(class)
    }

    /// Every bare name in a field annotation must be bound or a typing name.
    fn check_annotation(&self, annotation: &Expr) -> Flow<()> {
        match &annotation.kind {
            ExprKind::Name(name) => {
                if self.namespace.contains(name) || TYPING_NAMES.contains(&name.as_str()) {
                    Ok(())
                } else {
                    Err(fail_at(
                        ExceptionInfo::name_error(format!("name '{}' is not defined", name)),
                        expr_node(annotation),
                        vec![],
                    ))
                }
            }
            ExprKind::Attribute { value, .. } => self.check_annotation(value),
            ExprKind::Subscript { value, index } => {
                self.check_annotation(value)?;
                self.check_annotation(index)
            }
            ExprKind::BinOp { left, right, .. } => {
                self.check_annotation(left)?;
                self.check_annotation(right)
            }
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                items.iter().try_for_each(|item| self.check_annotation(item))
            }
            _ => Ok(()),
        }
    }

    /// Builds the interrupt a `raise` statement produces.
    fn eval_raise(&mut self, exc: Option<&Expr>) -> Flow<Interrupt> {
        let Some(exc) = exc else {
            return Ok(fail(
                ExceptionInfo::new(ErrorKind::RuntimeError, "No active exception to reraise"),
                vec![],
            ));
        };
        let evaluated = self.eval_expr(exc)?;
        let raised = if evaluated.as_class().is_some() {
            class::instantiate(&evaluated, &[], &IndexMap::new(), &self.namespace)
                .map_err(|e| fail(e, vec![evaluated.clone()]))?
        } else {
            evaluated
        };
        let payload = raised.as_instance().and_then(|inst| inst.host.clone());
        Ok(match payload {
            Some(RawValue::Exception { kind, message }) => {
                fail(ExceptionInfo::new(kind, message), vec![raised])
            }
            _ => fail(
                ExceptionInfo::type_error("exceptions must derive from BaseException"),
                vec![raised],
            ),
        })
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Literals are user-originated and public.
fn eval_constant(constant: &Constant) -> Flow<Value> {
    let caps = Capabilities::default_user();
    Ok(match constant {
        Constant::None => Value::none(caps, vec![]),
        Constant::Bool(b) => Value::bool(*b, caps, vec![]),
        Constant::Int(i) => Value::int(*i, caps, vec![]),
        Constant::Float(f) => Value::float(*f, caps, vec![]),
        Constant::Str(s) => Value::str(s, caps, vec![]),
        Constant::Ellipsis => {
            return Err(fail(
                ExceptionInfo::not_implemented("unsupported constant type ellipsis"),
                vec![],
            ))
        }
    })
}

fn not_iterable(value: &Value) -> ExceptionInfo {
    ExceptionInfo::type_error(format!("'{}' object is not iterable", value.type_name()))
}

/// Free built-in functions and the built-in classes cannot be rebound.
fn is_builtin_binding(value: &Value) -> bool {
    match value.kind() {
        ValueKind::Builtin { receiver: None, .. } => true,
        ValueKind::Class(_) => value.capabilities() == &Capabilities::camel(),
        _ => false,
    }
}

fn is_dataclass_decorator(decorators: &[Expr]) -> bool {
    let [decorator] = decorators else {
        return false;
    };
    match &decorator.kind {
        ExprKind::Name(name) => name == "dataclass",
        ExprKind::Attribute { value, attr } => {
            attr == "dataclass" && matches!(&value.kind, ExprKind::Name(m) if m == "dataclasses")
        }
        _ => false,
    }
}

fn assigned_names(target: &Expr, names: &mut BTreeSet<String>) {
    match &target.kind {
        ExprKind::Name(name) => {
            names.insert(name.clone());
        }
        ExprKind::Tuple(items) | ExprKind::List(items) => {
            for item in items {
                assigned_names(item, names);
            }
        }
        _ => {}
    }
}

/// Capabilities of a tool's output: its declared capabilities, always
/// including the tool itself as a source.
fn tool_capabilities(tool: &ToolDef) -> Capabilities {
    match &tool.capabilities {
        Some(declared) => {
            let mut caps = declared.clone();
            caps.sources.insert(Source::tool(tool.name.as_str()));
            caps
        }
        None => Capabilities::tool(&tool.name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{is_public, Readers};
    use crate::policy::{NoSecurityPolicyEngine, PolicyEngine};
    use crate::prelude;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn fenced(code: &str) -> String {
        format!("Here is the plan:\n```python\n{}\n```\n", code)
    }

    fn run_with(
        code: &str,
        namespace: Namespace,
        engine: &dyn SecurityPolicyEngine,
        mode: EvalMode,
    ) -> Result<EvalResult, SecurityPolicyDeniedError> {
        parse_and_interpret_code(
            &fenced(code),
            namespace,
            vec![],
            vec![],
            EvalArgs::new(engine, mode),
        )
    }

    fn run_in(code: &str, namespace: Namespace) -> EvalResult {
        match run_with(code, namespace, &NoSecurityPolicyEngine::default(), EvalMode::Normal) {
            Ok(outcome) => outcome,
            Err(e) => panic!("Expected no denial, got {}", e),
        }
    }

    fn run(code: &str) -> EvalResult {
        run_in(code, prelude::namespace())
    }

    fn expect_error(outcome: &EvalResult) -> &CamelException {
        match &outcome.result {
            Err(e) => e,
            Ok(v) => panic!("Expected an error, got {:?}", v),
        }
    }

    fn raw(outcome: &EvalResult, name: &str) -> RawValue {
        match outcome.namespace.get(name) {
            Some(v) => v.to_raw(),
            None => panic!("Expected '{}' to be bound", name),
        }
    }

    fn tool(def: ToolDef) -> (String, Value) {
        (def.name.clone(), Value::function(def))
    }

    fn secret_tools() -> Vec<(String, Value)> {
        vec![
            tool(
                ToolDef::new("read_secret", |_, _| Ok(RawValue::str("hunter2"))).with_capabilities(
                    Capabilities::new(
                        [Source::tool("read_secret")],
                        Readers::restricted(["alice"]),
                    ),
                ),
            ),
            tool(ToolDef::new("send_email", |_, _| Ok(RawValue::None))),
            tool(ToolDef::new(QUERY_AI_ASSISTANT, |_, _| Ok(RawValue::str("summary")))),
        ]
    }

    fn run_secret(code: &str, mode: EvalMode) -> EvalResult {
        let ns = prelude::namespace_with(secret_tools());
        match run_with(code, ns, &NoSecurityPolicyEngine::default(), mode) {
            Ok(outcome) => outcome,
            Err(e) => panic!("Expected no denial, got {}", e),
        }
    }

    fn allow_all() -> PolicyEngine {
        match PolicyEngine::default().with_policy("*", |_: &str, _: &PolicyArgs| {
            SecurityPolicyResult::Allowed
        }) {
            Ok(engine) => engine,
            Err(e) => panic!("Expected a valid pattern, got {}", e),
        }
    }

    #[test]
    fn test_simple_program() {
        let outcome = run("x = 1\ny = 2\nz = x + y");
        assert!(outcome.result.is_ok());
        assert_eq!(raw(&outcome, "z"), RawValue::Int(3));
        let x = outcome.namespace.get("x").cloned();
        assert!(matches!(x, Some(v) if v.capabilities() == &Capabilities::default_user()));
        assert!(outcome.tool_calls_chain.is_empty());
    }

    #[test]
    fn test_extract_code_block() {
        assert_eq!(
            extract_code_block("text\n```python\nx = 1\n```\nmore").ok(),
            Some("x = 1".to_string())
        );
        let two = "```python\na = 1\n```\n```python\nb = 2\n```";
        let err = extract_code_block(two).err();
        assert!(matches!(err, Some(e) if e.kind == ErrorKind::InvalidOutputError));
        assert!(extract_code_block("no code here").is_err());
    }

    #[test]
    fn test_missing_code_block_is_data() {
        let outcome = match parse_and_interpret_code(
            "just prose",
            prelude::namespace(),
            vec![],
            vec![],
            EvalArgs::new(&NoSecurityPolicyEngine::default(), EvalMode::Normal),
        ) {
            Ok(outcome) => outcome,
            Err(e) => panic!("Expected no denial, got {}", e),
        };
        assert_eq!(expect_error(&outcome).kind(), &ErrorKind::InvalidOutputError);
    }

    #[test]
    fn test_parse_error_reports_line() {
        let outcome = run("x = 1\ny = (");
        let e = expect_error(&outcome);
        assert_eq!(e.kind(), &ErrorKind::SyntaxError);
        assert_eq!(e.nodes.len(), 1);
        assert_eq!(e.nodes[0].kind, "Module");
        // Nothing ran.
        assert!(outcome.namespace.get("x").is_none());
    }

    #[test]
    fn test_unpacking_arity() {
        let outcome = run("a, b = 1, 2, 3");
        let e = expect_error(&outcome);
        assert_eq!(e.kind(), &ErrorKind::ValueError);
        assert_eq!(e.message(), "too many values to unpack (expected 2, got 3)");

        let outcome = run("a, b = 5");
        assert_eq!(expect_error(&outcome).message(), "cannot unpack non-iterable int object");

        let outcome = run("a, b = [1, 2]");
        assert_eq!(raw(&outcome, "b"), RawValue::Int(2));
    }

    #[test]
    fn test_unsupported_constructs() {
        for code in [
            "while True:\n    pass",
            "f = lambda x: x",
            "try:\n    x = 1\nexcept Exception:\n    pass",
            "import os",
        ] {
            let outcome = run(code);
            assert_eq!(expect_error(&outcome).kind(), &ErrorKind::SyntaxError, "{}", code);
        }
    }

    #[test]
    fn test_failed_call_keeps_earlier_calls() {
        let ns = prelude::namespace_with([
            tool(ToolDef::new("first", |_, _| Ok(RawValue::Int(1)))),
            tool(ToolDef::new("second", |_, _| {
                Err(ExceptionInfo::value_error("boom"))
            })),
        ]);
        let outcome = run_in("a = first()\nb = second()", ns);
        let e = expect_error(&outcome);
        assert_eq!(e.kind(), &ErrorKind::ValueError);
        assert_eq!(e.message(), "boom");
        assert!(e.capabilities.sources.contains(&Source::tool("second")));
        assert!(!e.is_redacted());
        assert_eq!(outcome.tool_calls_chain.len(), 1);
        assert_eq!(outcome.tool_calls_chain[0].function, "first");
        assert_eq!(raw(&outcome, "a"), RawValue::Int(1));
    }

    #[test]
    fn test_argument_evaluation_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mark = |name: &'static str| {
            let log = log.clone();
            tool(ToolDef::new(name, move |_, _| {
                log.borrow_mut().push(name.to_string());
                Ok(RawValue::None)
            }))
        };
        let ns = prelude::namespace_with([mark("outer"), mark("left"), mark("right"), mark("kw")]);
        let outcome = run_in("outer(left(), right(), key=kw())", ns);
        assert!(outcome.result.is_ok());
        assert_eq!(*log.borrow(), vec!["left", "right", "kw", "outer"]);
        let chain: Vec<&str> = outcome
            .tool_calls_chain
            .iter()
            .map(|c| c.function.as_str())
            .collect();
        assert_eq!(chain, vec!["left", "right", "kw", "outer"]);
        assert_eq!(outcome.tool_calls_chain[3].args.len(), 3);
    }

    #[test]
    fn test_private_control_flow_denies_side_effect() {
        let engine = allow_all();
        let code = "secret = read_secret()\nif secret == \"hunter2\":\n    send_email(\"bob\")";
        let ns = prelude::namespace_with(secret_tools());
        match run_with(code, ns, &engine, EvalMode::Normal) {
            Err(denied) => assert_eq!(denied.tool, "send_email"),
            Ok(_) => panic!("Expected send_email to be denied"),
        }

        let ns = prelude::namespace_with(secret_tools());
        let public = "if \"a\" == \"a\":\n    send_email(\"bob\")";
        match run_with(public, ns, &engine, EvalMode::Normal) {
            Ok(outcome) => {
                assert!(outcome.result.is_ok());
                assert_eq!(outcome.tool_calls_chain.len(), 1);
            }
            Err(e) => panic!("Expected the call to be allowed, got {}", e),
        }
    }

    #[test]
    fn test_builtins_ignore_denial() {
        let engine = PolicyEngine::default();
        match run_with("print(1)", prelude::namespace(), &engine, EvalMode::Normal) {
            Ok(outcome) => {
                assert!(outcome.result.is_ok());
                assert!(outcome.tool_calls_chain[0].is_builtin);
            }
            Err(e) => panic!("Expected print to run, got {}", e),
        }
        let ns = prelude::namespace_with(secret_tools());
        assert!(run_with("send_email(\"bob\")", ns, &engine, EvalMode::Normal).is_err());
    }

    #[test]
    fn test_strict_mode_tracks_control_flow() {
        let code = "secret = read_secret()\ny = 0\nif secret == \"hunter2\":\n    y = 1";
        let normal = run_secret(code, EvalMode::Normal);
        assert!(normal.namespace.get("y").map_or(false, is_public));

        let strict = run_secret(code, EvalMode::Strict);
        assert!(!strict.namespace.get("y").map_or(true, is_public));
        assert!(strict.dependencies.is_empty());
    }

    #[test]
    fn test_strict_query_ai_assistant_becomes_dependency() {
        let code = "secret = read_secret()\nanswer = query_ai_assistant(secret)";
        let strict = run_secret(code, EvalMode::Strict);
        assert!(strict.dependencies.iter().any(|d| !is_public(d)));

        let normal = run_secret(code, EvalMode::Normal);
        assert!(normal.dependencies.is_empty());
    }

    #[test]
    fn test_tool_output_capabilities() {
        let outcome = run_in("s = read_secret()", prelude::namespace_with(secret_tools()));
        let s = outcome.namespace.get("s").cloned();
        let Some(s) = s else {
            panic!("Expected 's' to be bound");
        };
        assert!(s.capabilities().sources.contains(&Source::tool("read_secret")));
        assert!(!is_public(&s));
    }

    #[test]
    fn test_call_chain_snapshot() {
        let outcome = run("print(\"hi\", 1)\nx = \"a,b\".split(\",\")");
        assert!(outcome.result.is_ok());
        insta::assert_json_snapshot!(outcome.tool_calls_chain, @r###"
        [
          {
            "function": "print",
            "object_type": null,
            "args": {
              "0": "hi",
              "1": 1
            },
            "output": null,
            "is_builtin": true
          },
          {
            "function": "split",
            "object_type": "str",
            "args": {
              "0": "a,b",
              "1": ","
            },
            "output": [
              "a",
              "b"
            ],
            "is_builtin": true
          }
        ]
        "###);
    }

    #[test]
    fn test_keyword_errors() {
        let outcome = run("d = {1: 2}\nprint(**d)");
        assert_eq!(expect_error(&outcome).message(), "keywords must be strings");

        let outcome = run("print(*5)");
        assert_eq!(
            expect_error(&outcome).message(),
            "print() argument after * must be an iterable, not int"
        );

        let outcome = run("x = 1\nx()");
        assert_eq!(expect_error(&outcome).message(), "'int' object is not callable");
    }

    #[test]
    fn test_base_model_class() {
        let code = "class User(BaseModel):\n    name: str\n    age: int\n\
                    u = User(name=\"ann\", age=3)\nn = u.name";
        let outcome = run(code);
        assert!(outcome.result.is_ok());
        assert_eq!(raw(&outcome, "n"), RawValue::str("ann"));
    }

    #[test]
    fn test_dataclass_positional_construction() {
        let code = "@dataclass\nclass Point:\n    x: int\n    y: int\n\
                    p = Point(1, 2)\ns = p.x + p.y";
        let outcome = run(code);
        assert_eq!(raw(&outcome, "s"), RawValue::Int(3));
    }

    #[test]
    fn test_class_definition_errors() {
        let outcome = run("class A:\n    x: int");
        assert_eq!(
            expect_error(&outcome).message(),
            "all class definitions must inherit from BaseModel."
        );

        let outcome = run("class A(BaseModel):\n    x: int = 1");
        assert_eq!(
            expect_error(&outcome).message(),
            "cannot specify default values for fields in class definitions."
        );

        let outcome = run("class A(BaseModel):\n    x: Missing");
        assert_eq!(expect_error(&outcome).kind(), &ErrorKind::NameError);

        let outcome = run("class A(BaseModel):\n    x: int\nclass A(BaseModel):\n    y: int");
        let e = expect_error(&outcome);
        assert_eq!(e.kind(), &ErrorKind::TypeError);
        let expected = "You are trying to re-define the already existing class A.";
        assert!(e.message().starts_with(expected));
    }

    #[test]
    fn test_comprehension_scoping() {
        let outcome = run("x = 10\nys = [x * 2 for x in [1, 2]]\nzs = {i: i for i in [3]}");
        assert_eq!(raw(&outcome, "x"), RawValue::Int(10));
        assert_eq!(
            raw(&outcome, "ys"),
            RawValue::List(vec![RawValue::Int(2), RawValue::Int(4)])
        );
        assert!(outcome.namespace.get("i").is_none());
        assert_eq!(
            raw(&outcome, "zs"),
            RawValue::Dict(vec![(RawValue::Int(3), RawValue::Int(3))])
        );
    }

    #[test]
    fn test_builtin_reassignment_rejected() {
        for name in ["print", "len", "ValueError"] {
            let outcome = run(&format!("{} = 1", name));
            assert_eq!(
                expect_error(&outcome).message(),
                format!("cannot reassign built-in {}", name)
            );
        }
    }

    #[test]
    fn test_import_from() {
        let outcome = run("from datetime import datetime as dt\nd = dt(2024, 1, 2)");
        assert!(outcome.result.is_ok());
        assert!(outcome.namespace.contains("dt"));
        assert!(!outcome.namespace.contains("datetime"));

        let outcome = run("from os import system");
        let e = expect_error(&outcome);
        assert_eq!(e.kind(), &ErrorKind::SyntaxError);
        assert!(e.message().starts_with("You can't import system."));
    }

    #[test]
    fn test_raise() {
        let outcome = run("raise ValueError(\"bad\")");
        let e = expect_error(&outcome);
        assert_eq!(e.kind(), &ErrorKind::ValueError);
        assert_eq!(e.message(), "bad");

        let outcome = run("raise 1");
        assert_eq!(
            expect_error(&outcome).message(),
            "exceptions must derive from BaseException"
        );

        let outcome = run("raise");
        assert_eq!(expect_error(&outcome).kind(), &ErrorKind::RuntimeError);
    }

    #[test]
    fn test_not_enough_information_keeps_arguments_only() {
        let ns = prelude::namespace_with([tool(ToolDef::new("ask", |_, _| {
            Err(ExceptionInfo::not_enough_information("need more"))
        }))]);
        let outcome = run_in("ask(1)", ns);
        let e = expect_error(&outcome);
        assert_eq!(e.kind(), &ErrorKind::NotEnoughInformationError);
        assert_eq!(e.dependencies.len(), 1);
        assert_eq!(e.capabilities, Capabilities::tool("ask"));
    }

    #[test]
    fn test_f_strings() {
        let code = "name = \"bob\"\ns = f\"hi {name}!\"\nt = f\"{3.14159:.2f}\"\nu = f\"{name!r}\"";
        let outcome = run(code);
        assert_eq!(raw(&outcome, "s"), RawValue::str("hi bob!"));
        assert_eq!(raw(&outcome, "t"), RawValue::str("3.14"));
        assert_eq!(raw(&outcome, "u"), RawValue::str("'bob'"));
    }

    #[test]
    fn test_bool_ops_short_circuit() {
        let outcome = run("a = 0 or 5\nb = 1 and 0\nc = 2 and 3\nd = [] or \"x\"");
        assert_eq!(raw(&outcome, "a"), RawValue::Int(5));
        assert_eq!(raw(&outcome, "b"), RawValue::Int(0));
        assert_eq!(raw(&outcome, "c"), RawValue::Int(3));
        assert_eq!(raw(&outcome, "d"), RawValue::str("x"));
    }

    #[test]
    fn test_chained_comparison_rejected() {
        let outcome = run("x = 1 < 2 < 3");
        assert_eq!(
            expect_error(&outcome).message(),
            "chained comparisons are not supported"
        );
    }

    #[test]
    fn test_for_loop_and_aug_assign() {
        let outcome = run("total = 0\nfor i in range(4):\n    total += i");
        assert_eq!(raw(&outcome, "total"), RawValue::Int(6));
        assert!(outcome.dependencies.is_empty());
    }

    #[test]
    fn test_eval_mode_parsing() {
        assert_eq!("strict".parse::<EvalMode>().ok(), Some(EvalMode::Strict));
        assert_eq!("NORMAL".parse::<EvalMode>().ok(), Some(EvalMode::Normal));
        assert!("lenient".parse::<EvalMode>().is_err());
        assert_eq!(EvalMode::Strict.to_string(), "STRICT");
    }

    #[test]
    fn test_unsupported_construct_runs_nothing() {
        let ns = prelude::namespace_with([tool(ToolDef::new("send", |_, _| Ok(RawValue::None)))]);
        let outcome = run_in("send()\nif True:\n    ys = [x for x in (y for y in [1])]", ns);
        let e = expect_error(&outcome);
        assert_eq!(e.kind(), &ErrorKind::SyntaxError);
        assert!(e.message().starts_with("Generator expressions are not supported."));
        assert_eq!(e.nodes[0].span.lineno, 3);
        assert!(outcome.tool_calls_chain.is_empty());
    }

    #[test]
    fn test_deep_nesting_is_a_syntax_error() {
        let deep = format!("x = {}1{}", "(".repeat(20_000), ")".repeat(20_000));
        let outcome = run(&deep);
        let e = expect_error(&outcome);
        assert_eq!(e.kind(), &ErrorKind::SyntaxError);
        assert!(e.message().ends_with("too many nested parentheses"), "{}", e.message());

        let shallow = format!("x = {}1{}", "[".repeat(30), "]".repeat(30));
        assert!(run(&shallow).result.is_ok());
    }

    #[test]
    fn test_huge_slice_steps() {
        let code = "a = \"abc\"[1::9223372036854775807]\n\
                    b = [1, 2, 3][::-9223372036854775807 - 1]";
        let outcome = run(code);
        assert_eq!(raw(&outcome, "a"), RawValue::str("b"));
        assert_eq!(raw(&outcome, "b"), RawValue::List(vec![RawValue::Int(3)]));
    }

    #[test]
    fn test_format_width_is_bounded() {
        for code in ["x = f'{1:>99999999999}'", "x = '{:>99999999999}'.format(1)"] {
            let outcome = run(code);
            let e = expect_error(&outcome);
            assert_eq!(e.kind(), &ErrorKind::ValueError, "{}", code);
            assert_eq!(e.message(), "Too many decimal digits in format string");
        }
    }

    #[test]
    fn test_unhashable_keys_rejected() {
        for code in ["x = {[1]: 2}", "x = {[1]}", "x = {(1, [2])}", "d = {}\nd[{}] = 1"] {
            let outcome = run(code);
            let e = expect_error(&outcome);
            assert_eq!(e.kind(), &ErrorKind::TypeError, "{}", code);
            assert!(e.message().starts_with("unhashable type: "), "{}", e.message());
        }
        let outcome = run("x = {(1, 2): 3}\ny = {k: 1 for k in [[1]][0]}");
        assert!(outcome.result.is_ok());
    }

    #[test]
    fn test_instance_cycle_terminates() {
        let code = "class A(BaseModel):\n    x: object\n    s: object\n\
                    a = A(x=1, s=read_secret())\nb = A(x=a, s=\"pub\")\na.x = b\n\
                    r = repr(a)\nsame = a == b";
        let outcome = run_in(code, prelude::namespace_with(secret_tools()));
        assert!(outcome.result.is_ok(), "{:?}", outcome.result);
        assert_eq!(raw(&outcome, "r"), RawValue::str("A(x=A(x=..., s='pub'), s='hunter2')"));
        assert_eq!(raw(&outcome, "same"), RawValue::Bool(false));

        let b = match outcome.namespace.get("b") {
            Some(b) => b.clone(),
            None => panic!("Expected 'b' to be bound"),
        };
        assert_eq!(crate::capabilities::get_all_readers(&b), Readers::restricted(["alice"]));
        assert!(crate::capabilities::get_all_sources(&b).contains(&Source::tool("read_secret")));
        let closure = crate::capabilities::get_dependencies(&b);
        assert_eq!(crate::capabilities::get_dependencies(&b).len(), closure.len());
    }

    #[test]
    fn test_extract_single_fence() {
        assert_eq!(
            extract_code_block("```python\nprint(1+1)\n```").ok(),
            Some("print(1+1)".to_string())
        );
    }
}
