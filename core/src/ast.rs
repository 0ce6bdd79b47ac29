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

//! Syntax tree of the restricted language.
//!
//! Every statement and expression carries a [`Span`] so errors can point back
//! at the offending source lines.

use serde::{Deserialize, Serialize};

/// Source location, 1-based lines and 0-based columns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub lineno: i32,
    pub col_offset: u32,
    pub end_lineno: i32,
    pub end_col_offset: u32,
}

impl Span {
    pub fn new(lineno: i32, col_offset: u32, end_lineno: i32, end_col_offset: u32) -> Self {
        Span {
            lineno,
            col_offset,
            end_lineno,
            end_col_offset,
        }
    }

    /// Smallest span covering both.
    pub fn to(self, other: Span) -> Span {
        Span {
            lineno: self.lineno,
            col_offset: self.col_offset,
            end_lineno: other.end_lineno,
            end_col_offset: other.end_col_offset,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Module {
    pub body: Vec<Stmt>,
}

// ============================================================================
// STATEMENTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum StmtKind {
    Expr(Expr),
    /// `a = b = value`
    Assign {
        targets: Vec<Expr>,
        value: Expr,
    },
    AugAssign {
        target: Expr,
        op: BinOp,
        value: Expr,
    },
    AnnAssign {
        target: Expr,
        annotation: Expr,
        value: Option<Expr>,
    },
    If {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    For {
        target: Expr,
        iter: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    ClassDef {
        name: String,
        bases: Vec<Expr>,
        keywords: Vec<Keyword>,
        body: Vec<Stmt>,
        decorators: Vec<Expr>,
    },
    Raise {
        exc: Option<Expr>,
        cause: Option<Expr>,
    },
    ImportFrom {
        module: Option<String>,
        names: Vec<Alias>,
    },
    Pass,
    /// A construct that parses but is never executed.
    Unsupported(Construct),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alias {
    pub name: String,
    pub asname: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Keyword {
    /// `None` for `**mapping`.
    pub arg: Option<String>,
    pub value: Expr,
}

// ============================================================================
// EXPRESSIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Expr { kind, span }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ExprKind {
    Constant(Constant),
    Name(String),
    Attribute {
        value: Box<Expr>,
        attr: String,
    },
    Subscript {
        value: Box<Expr>,
        index: Box<Expr>,
    },
    /// Only valid as a subscript index.
    Slice {
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    Starred(Box<Expr>),
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Set(Vec<Expr>),
    /// A `None` key marks `**mapping` unpacking.
    Dict {
        keys: Vec<Option<Expr>>,
        values: Vec<Expr>,
    },
    BinOp {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    BoolOp {
        op: BoolOp,
        values: Vec<Expr>,
    },
    Compare {
        left: Box<Expr>,
        ops: Vec<CmpOp>,
        comparators: Vec<Expr>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        keywords: Vec<Keyword>,
    },
    IfExp {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    ListComp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    SetComp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    DictComp {
        key: Box<Expr>,
        value: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    /// f-string: literal pieces and `FormattedValue`s.
    JoinedStr(Vec<Expr>),
    FormattedValue {
        value: Box<Expr>,
        conversion: Option<char>,
        format_spec: Option<Box<Expr>>,
    },
    NamedExpr {
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Unsupported(Construct),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comprehension {
    pub target: Expr,
    pub iter: Expr,
    pub ifs: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Constant {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Ellipsis,
}

// ============================================================================
// OPERATORS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BinOp {
    Add,
    Sub,
    Mult,
    MatMult,
    Div,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    BitOr,
    BitXor,
    BitAnd,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mult => "*",
            BinOp::MatMult => "@",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
            BinOp::LShift => "<<",
            BinOp::RShift => ">>",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::BitAnd => "&",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum UnaryOp {
    Not,
    Invert,
    UAdd,
    USub,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Not => "not",
            UnaryOp::Invert => "~",
            UnaryOp::UAdd => "+",
            UnaryOp::USub => "-",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}

impl CmpOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::NotEq => "!=",
            CmpOp::Lt => "<",
            CmpOp::LtE => "<=",
            CmpOp::Gt => ">",
            CmpOp::GtE => ">=",
            CmpOp::Is => "is",
            CmpOp::IsNot => "is not",
            CmpOp::In => "in",
            CmpOp::NotIn => "not in",
        }
    }
}

// ============================================================================
// UNSUPPORTED CONSTRUCTS
// ============================================================================

/// Constructs the parser accepts but the interpreter always rejects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Construct {
    GeneratorExp,
    While,
    Break,
    Continue,
    Match,
    Lambda,
    FunctionDef,
    Return,
    Yield,
    YieldFrom,
    Try,
    Assert,
    Delete,
    With,
    Async,
    Global,
    Nonlocal,
    Import,
}

impl Construct {
    /// Diagnostic shown to the code-generating model.
    pub fn message(self) -> &'static str {
        match self {
            Construct::GeneratorExp => {
                "Generator expressions are not supported. Use a list comprehension instead if possible."
            }
            Construct::While => "While statements are not supported. Use a for loop instead.",
            Construct::Break => "Break statements are not supported.",
            Construct::Continue => "Continue statements are not supported.",
            Construct::Match => "Match statements are not supported.",
            Construct::Lambda => {
                "Defining lambda functions is not supported. If you are operating on a list, consider using a list comprehension or a for loop."
            }
            Construct::FunctionDef => "Function definitions are not supported",
            Construct::Return => "Return statements are not supported.",
            Construct::Yield => "Yield statements are not supported.",
            Construct::YieldFrom => "Yield from statements are not supported.",
            Construct::Try => "Try blocks are are not supported. DO not try to catch exceptions.",
            Construct::Assert => "Assert statements are not supported.",
            Construct::Delete => "Delete statements are not supported.",
            Construct::With => "Context managers are not supported.",
            Construct::Async => "Async is not supported.",
            Construct::Global => "Global statements are not supported.",
            Construct::Nonlocal => "Nonlocal statements are not supported.",
            Construct::Import => {
                "You can't import modules. Instead, use what you have been provided as described in the system prompt, which you can assume has already been imported."
            }
        }
    }
}

// ============================================================================
// UNPARSE
// ============================================================================

/// Source text of a type-annotation-like expression.
pub fn unparse(expr: &Expr) -> String {
    match &expr.kind {
        ExprKind::Name(name) => name.clone(),
        ExprKind::Attribute { value, attr } => format!("{}.{}", unparse(value), attr),
        ExprKind::Subscript { value, index } => {
            let inner = match &index.kind {
                ExprKind::Tuple(items) => join(items),
                _ => unparse(index),
            };
            format!("{}[{}]", unparse(value), inner)
        }
        ExprKind::BinOp { left, op, right } => {
            format!("{} {} {}", unparse(left), op.symbol(), unparse(right))
        }
        ExprKind::Constant(Constant::None) => "None".to_string(),
        ExprKind::Constant(Constant::Bool(b)) => (if *b { "True" } else { "False" }).to_string(),
        ExprKind::Constant(Constant::Int(i)) => i.to_string(),
        ExprKind::Constant(Constant::Float(f)) => f.to_string(),
        ExprKind::Constant(Constant::Str(s)) => crate::raw::repr_str(s),
        ExprKind::Constant(Constant::Ellipsis) => "...".to_string(),
        ExprKind::Tuple(items) if items.len() == 1 => format!("({},)", unparse(&items[0])),
        ExprKind::Tuple(items) => format!("({})", join(items)),
        ExprKind::List(items) => format!("[{}]", join(items)),
        other => other.name().to_string(),
    }
}

fn join(items: &[Expr]) -> String {
    items.iter().map(unparse).collect::<Vec<_>>().join(", ")
}

// ============================================================================
// NODE NAMES
// ============================================================================

impl StmtKind {
    pub fn name(&self) -> &'static str {
        match self {
            StmtKind::Expr(_) => "Expr",
            StmtKind::Assign { .. } => "Assign",
            StmtKind::AugAssign { .. } => "AugAssign",
            StmtKind::AnnAssign { .. } => "AnnAssign",
            StmtKind::If { .. } => "If",
            StmtKind::For { .. } => "For",
            StmtKind::ClassDef { .. } => "ClassDef",
            StmtKind::Raise { .. } => "Raise",
            StmtKind::ImportFrom { .. } => "ImportFrom",
            StmtKind::Pass => "Pass",
            StmtKind::Unsupported(c) => c.node_name(),
        }
    }
}

impl ExprKind {
    pub fn name(&self) -> &'static str {
        match self {
            ExprKind::Constant(_) => "Constant",
            ExprKind::Name(_) => "Name",
            ExprKind::Attribute { .. } => "Attribute",
            ExprKind::Subscript { .. } => "Subscript",
            ExprKind::Slice { .. } => "Slice",
            ExprKind::Starred(_) => "Starred",
            ExprKind::List(_) => "List",
            ExprKind::Tuple(_) => "Tuple",
            ExprKind::Set(_) => "Set",
            ExprKind::Dict { .. } => "Dict",
            ExprKind::BinOp { .. } => "BinOp",
            ExprKind::UnaryOp { .. } => "UnaryOp",
            ExprKind::BoolOp { .. } => "BoolOp",
            ExprKind::Compare { .. } => "Compare",
            ExprKind::Call { .. } => "Call",
            ExprKind::IfExp { .. } => "IfExp",
            ExprKind::ListComp { .. } => "ListComp",
            ExprKind::SetComp { .. } => "SetComp",
            ExprKind::DictComp { .. } => "DictComp",
            ExprKind::JoinedStr(_) => "JoinedStr",
            ExprKind::FormattedValue { .. } => "FormattedValue",
            ExprKind::NamedExpr { .. } => "NamedExpr",
            ExprKind::Unsupported(c) => c.node_name(),
        }
    }
}

impl Construct {
    pub fn node_name(self) -> &'static str {
        match self {
            Construct::GeneratorExp => "GeneratorExp",
            Construct::While => "While",
            Construct::Break => "Break",
            Construct::Continue => "Continue",
            Construct::Match => "Match",
            Construct::Lambda => "Lambda",
            Construct::FunctionDef => "FunctionDef",
            Construct::Return => "Return",
            Construct::Yield => "Yield",
            Construct::YieldFrom => "YieldFrom",
            Construct::Try => "Try",
            Construct::Assert => "Assert",
            Construct::Delete => "Delete",
            Construct::With => "With",
            Construct::Async => "AsyncFunctionDef",
            Construct::Global => "Global",
            Construct::Nonlocal => "Nonlocal",
            Construct::Import => "Import",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_expression;

    #[test]
    fn test_unparse_annotations() {
        for source in [
            "int",
            "list[str]",
            "dict[str, int]",
            "str | None",
            "datetime.datetime",
            "Optional[list[Point]]",
        ] {
            let expr = parse_expression(source).unwrap();
            assert_eq!(unparse(&expr), source);
        }
    }

    #[test]
    fn test_node_names() {
        assert_eq!(StmtKind::Pass.name(), "Pass");
        assert_eq!(StmtKind::Unsupported(Construct::Async).name(), "AsyncFunctionDef");
        assert_eq!(ExprKind::Unsupported(Construct::Lambda).name(), "Lambda");
    }
}
