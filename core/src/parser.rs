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

//! Restricted-language Source Parser: Recursive Descent
//!
//! Turns model-written source text into the syntax tree defined in `ast.rs`.
//! The lexer tracks indentation and emits `Indent`/`Dedent` tokens; the parser
//! is a straightforward precedence-climbing descent over them.
//!
//! Constructs the interpreter never runs (`while`, `lambda`, `try`, ...) are
//! still parsed so they can be reported with a dedicated diagnostic instead of
//! a generic syntax error.

use crate::ast::{
    Alias, BinOp, BoolOp, CmpOp, Comprehension, Constant, Construct, Expr, ExprKind, Keyword,
    Module, Span, Stmt, StmtKind, UnaryOp,
};
use thiserror::Error;

// ─── Error Types ─────────────────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Syntax Error at {line}:{col}: {message}")]
    Syntax { message: String, line: u32, col: u32 },
    #[error("Unexpected token: expected {expected}, found {found} at {line}:{col}")]
    UnexpectedToken {
        expected: String,
        found: String,
        line: u32,
        col: u32,
    },
    #[error("Unexpected end of file at {line}:{col}")]
    UnexpectedEof { line: u32, col: u32 },
    #[error("Indentation Error at {line}:{col}: {message}")]
    Indentation { message: String, line: u32, col: u32 },
}

impl ParseError {
    fn syntax(msg: impl Into<String>, tok: &Token) -> Self {
        ParseError::Syntax {
            message: msg.into(),
            line: tok.line,
            col: tok.col,
        }
    }

    fn unexpected(expected: impl Into<String>, tok: &Token) -> Self {
        if tok.kind == TokenKind::Eof {
            return ParseError::UnexpectedEof {
                line: tok.line,
                col: tok.col,
            };
        }
        ParseError::UnexpectedToken {
            expected: expected.into(),
            found: tok.kind.describe(),
            line: tok.line,
            col: tok.col,
        }
    }

    /// 1-based line the error points at.
    pub fn line(&self) -> u32 {
        match self {
            ParseError::Syntax { line, .. }
            | ParseError::UnexpectedToken { line, .. }
            | ParseError::UnexpectedEof { line, .. }
            | ParseError::Indentation { line, .. } => *line,
        }
    }

    pub fn col(&self) -> u32 {
        match self {
            ParseError::Syntax { col, .. }
            | ParseError::UnexpectedToken { col, .. }
            | ParseError::UnexpectedEof { col, .. }
            | ParseError::Indentation { col, .. } => *col,
        }
    }
}

// ─── Token Types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    Integer(i64),
    Float(f64),
    StringLit(String),
    /// Body of an f-string, escapes unprocessed.
    FString { body: String, raw: bool },
    Identifier(String),
    Keyword(&'static str),

    /// Operators and delimiters, longest match first.
    Op(&'static str),

    // Layout
    Newline,
    Indent,
    Dedent,
    Eof,
}

impl TokenKind {
    fn describe(&self) -> String {
        match self {
            TokenKind::Integer(i) => i.to_string(),
            TokenKind::Float(f) => f.to_string(),
            TokenKind::StringLit(_) | TokenKind::FString { .. } => "string".to_string(),
            TokenKind::Identifier(name) => format!("'{}'", name),
            TokenKind::Keyword(kw) | TokenKind::Op(kw) => format!("'{}'", kw),
            TokenKind::Newline => "newline".to_string(),
            TokenKind::Indent => "indent".to_string(),
            TokenKind::Dedent => "dedent".to_string(),
            TokenKind::Eof => "end of file".to_string(),
        }
    }
}

const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if",
    "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try",
    "while", "with", "yield",
];

const OPERATORS: &[&str] = &[
    "**=", "//=", ">>=", "<<=", "...", "->", ":=", "**", "//", "<<", ">>", "<=", ">=", "==", "!=",
    "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "@=", "+", "-", "*", "/", "%", "@", "&", "|",
    "^", "~", "<", ">", "(", ")", "[", "]", "{", "}", ",", ":", ".", ";", "=",
];

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    /// 1-based.
    pub line: u32,
    /// 0-based.
    pub col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

// ─── Lexer ───────────────────────────────────────────────────────────────────

pub struct Lexer {
    source: Vec<char>,
    pos: usize,
    line: u32,
    col: u32,
    indents: Vec<u32>,
    depth: usize,
    at_line_start: bool,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Lexer {
            source: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 0,
            indents: vec![0],
            depth: 0,
            at_line_start: true,
        }
    }

    /// Starts at an offset inside a larger source, used for f-string fields.
    fn at(source: &str, line: u32, col: u32) -> Self {
        let mut lexer = Lexer::new(source);
        lexer.line = line;
        lexer.col = col;
        lexer.at_line_start = false;
        lexer
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>, ParseError> {
        let mut tokens: Vec<Token> = Vec::new();
        loop {
            if self.at_line_start && self.depth == 0 {
                self.at_line_start = false;
                if self.handle_indentation(&mut tokens)? {
                    continue;
                }
            }
            self.skip_spaces_and_comments()?;
            let (line, col) = (self.line, self.col);
            match self.peek() {
                None => {
                    if self.depth > 0 {
                        return Err(ParseError::UnexpectedEof { line, col });
                    }
                    if !matches!(
                        tokens.last().map(|t| &t.kind),
                        None | Some(TokenKind::Newline) | Some(TokenKind::Dedent)
                    ) {
                        self.push(&mut tokens, TokenKind::Newline, line, col);
                    }
                    while self.indents.len() > 1 {
                        self.indents.pop();
                        self.push(&mut tokens, TokenKind::Dedent, line, col);
                    }
                    self.push(&mut tokens, TokenKind::Eof, line, col);
                    return Ok(tokens);
                }
                Some('\n') => {
                    self.advance();
                    if self.depth == 0 {
                        self.push_at(&mut tokens, TokenKind::Newline, line, col, line, col + 1);
                        self.at_line_start = true;
                    }
                }
                Some(_) => {
                    let kind = self.next_token()?;
                    self.push(&mut tokens, kind, line, col);
                }
            }
        }
    }

    fn push(&self, tokens: &mut Vec<Token>, kind: TokenKind, line: u32, col: u32) {
        self.push_at(tokens, kind, line, col, self.line, self.col);
    }

    fn push_at(
        &self,
        tokens: &mut Vec<Token>,
        kind: TokenKind,
        line: u32,
        col: u32,
        end_line: u32,
        end_col: u32,
    ) {
        tokens.push(Token {
            kind,
            line,
            col,
            end_line,
            end_col,
        });
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    fn peek_ahead(&self, offset: usize) -> Option<char> {
        self.source.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.source.get(self.pos).copied()?;
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
            self.col = 0;
        } else {
            self.col += 1;
        }
        Some(ch)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::Syntax {
            message: message.into(),
            line: self.line,
            col: self.col,
        }
    }

    /// Measures the indentation of a logical line. Returns `true` when the
    /// line was blank or a comment and has been consumed.
    fn handle_indentation(&mut self, tokens: &mut Vec<Token>) -> Result<bool, ParseError> {
        let mut width = 0u32;
        while let Some(ch) = self.peek() {
            match ch {
                ' ' => width += 1,
                '\t' => width = (width / 8 + 1) * 8,
                '\x0c' => width = 0,
                _ => break,
            }
            self.advance();
        }
        match self.peek() {
            None => return Ok(false),
            Some('#') => {
                while !matches!(self.peek(), None | Some('\n')) {
                    self.advance();
                }
                self.advance();
                self.at_line_start = true;
                return Ok(true);
            }
            Some('\n') | Some('\r') => {
                while matches!(self.peek(), Some('\r')) {
                    self.advance();
                }
                self.advance();
                self.at_line_start = true;
                return Ok(true);
            }
            _ => {}
        }

        let current = self.indents.last().copied().unwrap_or(0);
        if width > current {
            self.indents.push(width);
            self.push(tokens, TokenKind::Indent, self.line, 0);
        } else if width < current {
            while self.indents.last().map_or(false, |&top| top > width) {
                self.indents.pop();
                self.push(tokens, TokenKind::Dedent, self.line, width);
            }
            if self.indents.last().copied() != Some(width) {
                return Err(ParseError::Indentation {
                    message: "unindent does not match any outer indentation level".to_string(),
                    line: self.line,
                    col: width,
                });
            }
        }
        Ok(false)
    }

    fn skip_spaces_and_comments(&mut self) -> Result<(), ParseError> {
        loop {
            match self.peek() {
                Some(' ') | Some('\t') | Some('\r') | Some('\x0c') => {
                    self.advance();
                }
                Some('\n') if self.depth > 0 => {
                    self.advance();
                }
                Some('#') => {
                    while !matches!(self.peek(), None | Some('\n')) {
                        self.advance();
                    }
                }
                Some('\\') => {
                    // Explicit line continuation
                    let mut offset = 1;
                    while self.peek_ahead(offset) == Some('\r') {
                        offset += 1;
                    }
                    if self.peek_ahead(offset) != Some('\n') {
                        return Err(
                            self.error("unexpected character after line continuation character")
                        );
                    }
                    for _ in 0..=offset {
                        self.advance();
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn next_token(&mut self) -> Result<TokenKind, ParseError> {
        let ch = self.peek().ok_or_else(|| self.error("unexpected end of input"))?;

        if ch.is_alphabetic() || ch == '_' {
            let mut ident = String::new();
            while let Some(c) = self.peek() {
                if c.is_alphanumeric() || c == '_' {
                    ident.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
            if matches!(self.peek(), Some('"') | Some('\'')) {
                if let Some(kind) = self.string_with_prefix(&ident)? {
                    return Ok(kind);
                }
            }
            return Ok(match KEYWORDS.iter().find(|kw| **kw == ident) {
                Some(kw) => TokenKind::Keyword(*kw),
                None => TokenKind::Identifier(ident),
            });
        }

        let fraction = ch == '.' && self.peek_ahead(1).map_or(false, |c| c.is_ascii_digit());
        if ch.is_ascii_digit() || fraction {
            return self.number();
        }

        if ch == '"' || ch == '\'' {
            let body = self.string_body(false)?;
            return Ok(TokenKind::StringLit(body));
        }

        for op in OPERATORS {
            let matches = op
                .chars()
                .enumerate()
                .all(|(i, c)| self.peek_ahead(i) == Some(c));
            if matches {
                for _ in 0..op.chars().count() {
                    self.advance();
                }
                match *op {
                    "(" | "[" | "{" => self.depth += 1,
                    ")" | "]" | "}" => self.depth = self.depth.saturating_sub(1),
                    _ => {}
                }
                return Ok(TokenKind::Op(*op));
            }
        }

        Err(self.error(format!("invalid character '{}'", ch)))
    }

    /// Handles `r"..."`, `f"..."`, `rf"..."` and friends. Returns `None` when
    /// the identifier is not a string prefix.
    fn string_with_prefix(&mut self, prefix: &str) -> Result<Option<TokenKind>, ParseError> {
        let lower = prefix.to_ascii_lowercase();
        match lower.as_str() {
            "r" | "u" => {
                let body = self.string_body(lower == "r")?;
                Ok(Some(TokenKind::StringLit(body)))
            }
            "f" | "rf" | "fr" => {
                let raw = lower.contains('r');
                let body = self.raw_string_body()?;
                Ok(Some(TokenKind::FString { body, raw }))
            }
            "b" | "br" | "rb" => Err(self.error("bytes literals are not supported")),
            _ => Ok(None),
        }
    }

    /// Reads a quoted string, returning its text without quotes and with
    /// escapes left as written.
    fn raw_string_body(&mut self) -> Result<String, ParseError> {
        let quote = self.advance().ok_or_else(|| self.error("unterminated string literal"))?;
        let triple = self.peek() == Some(quote) && self.peek_ahead(1) == Some(quote);
        if triple {
            self.advance();
            self.advance();
        }
        let mut body = String::new();
        loop {
            match self.advance() {
                None => return Err(self.error("unterminated string literal")),
                Some('\\') => {
                    body.push('\\');
                    match self.advance() {
                        Some(c) => body.push(c),
                        None => return Err(self.error("unterminated string literal")),
                    }
                }
                Some('\n') if !triple => return Err(self.error("unterminated string literal")),
                Some(c) if c == quote => {
                    if !triple {
                        break;
                    }
                    if self.peek() == Some(quote) && self.peek_ahead(1) == Some(quote) {
                        self.advance();
                        self.advance();
                        break;
                    }
                    body.push(c);
                }
                Some(c) => body.push(c),
            }
        }
        Ok(body)
    }

    fn string_body(&mut self, raw: bool) -> Result<String, ParseError> {
        let (line, col) = (self.line, self.col);
        let body = self.raw_string_body()?;
        if raw {
            Ok(body)
        } else {
            unescape(&body).map_err(|message| ParseError::Syntax { message, line, col })
        }
    }

    fn number(&mut self) -> Result<TokenKind, ParseError> {
        let mut text = String::new();
        let prefixed = matches!(self.peek_ahead(1), Some('x' | 'X' | 'o' | 'O' | 'b' | 'B'));
        if self.peek() == Some('0') && prefixed {
            self.advance();
            let radix = match self.advance() {
                Some('x' | 'X') => 16,
                Some('o' | 'O') => 8,
                _ => 2,
            };
            while let Some(c) = self.peek() {
                if c.is_digit(radix) || c == '_' {
                    if c != '_' {
                        text.push(c);
                    }
                    self.advance();
                } else {
                    break;
                }
            }
            return i64::from_str_radix(&text, radix)
                .map(TokenKind::Integer)
                .map_err(|_| self.error("invalid integer literal"));
        }

        let mut is_float = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
            } else if c == '_' {
                // digit separator
            } else if c == '.' && !is_float && !text.contains('e') {
                is_float = true;
                text.push(c);
            } else if (c == 'e' || c == 'E') && !text.contains('e') {
                let sign = matches!(self.peek_ahead(1), Some('+' | '-'));
                let digit_at = if sign { 2 } else { 1 };
                if !self.peek_ahead(digit_at).map_or(false, |d| d.is_ascii_digit()) {
                    break;
                }
                is_float = true;
                text.push('e');
                self.advance();
                if sign {
                    if let Some(s) = self.advance() {
                        text.push(s);
                    }
                }
                continue;
            } else if c == 'j' || c == 'J' {
                return Err(self.error("complex numbers are not supported"));
            } else {
                break;
            }
            self.advance();
        }
        if is_float {
            text.parse::<f64>()
                .map(TokenKind::Float)
                .map_err(|_| self.error("invalid float literal"))
        } else {
            text.parse::<i64>()
                .map(TokenKind::Integer)
                .map_err(|_| self.error("integer literal too large"))
        }
    }
}

/// Processes backslash escapes of a non-raw string literal.
pub fn unescape(body: &str) -> Result<String, String> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            None => out.push('\\'),
            Some('\n') => {}
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('a') => out.push('\x07'),
            Some('b') => out.push('\x08'),
            Some('f') => out.push('\x0c'),
            Some('v') => out.push('\x0b'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some(kind @ ('x' | 'u' | 'U')) => {
                let len = match kind {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                let digits: String = (0..len).filter_map(|_| chars.next()).collect();
                let code = u32::from_str_radix(&digits, 16)
                    .ok()
                    .filter(|_| digits.len() == len)
                    .and_then(char::from_u32)
                    .ok_or_else(|| format!("truncated \\{} escape", kind))?;
                out.push(code);
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    Ok(out)
}

// ─── Parser ──────────────────────────────────────────────────────────────────

/// Bound on recursive descent through brackets, unary operators,
/// conditional expressions and blocks. Deeper input is a syntax error
/// instead of a native stack overflow.
pub const MAX_NESTING: usize = 50;

const NESTED_PARENS: &str = "too many nested parentheses";
const NESTED_EXPRESSION: &str = "expression nested too deeply";
const NESTED_BLOCKS: &str = "too many levels of indentation";

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// End of the last consumed token.
    prev_end: (u32, u32),
    depth: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser {
            tokens,
            pos: 0,
            prev_end: (1, 0),
            depth: 0,
        }
    }

    fn descend(&mut self, message: &str) -> Result<(), ParseError> {
        if self.depth >= MAX_NESTING {
            return Err(ParseError::syntax(message, self.peek()));
        }
        self.depth += 1;
        Ok(())
    }

    fn ascend(&mut self) {
        self.depth -= 1;
    }

    fn peek(&self) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.pos.min(last)]
    }

    fn peek_kind_at(&self, offset: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + offset).map(|t| &t.kind)
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        self.prev_end = (tok.end_line, tok.end_col);
        tok
    }

    fn at_end(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn check_op(&self, op: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Op(o) if *o == op)
    }

    fn check_keyword(&self, kw: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Keyword(k) if *k == kw)
    }

    fn match_op(&mut self, op: &str) -> bool {
        if self.check_op(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn match_keyword(&mut self, kw: &str) -> bool {
        if self.check_keyword(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> Result<Token, ParseError> {
        if self.check_op(op) {
            Ok(self.advance())
        } else {
            Err(ParseError::unexpected(format!("'{}'", op), self.peek()))
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<Token, ParseError> {
        if self.check_keyword(kw) {
            Ok(self.advance())
        } else {
            Err(ParseError::unexpected(format!("'{}'", kw), self.peek()))
        }
    }

    fn expect_identifier(&mut self, what: &str) -> Result<String, ParseError> {
        match &self.peek().kind {
            TokenKind::Identifier(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(ParseError::unexpected(what, self.peek())),
        }
    }

    fn span_from(&self, start: &Token) -> Span {
        Span::new(
            start.line as i32,
            start.col,
            self.prev_end.0 as i32,
            self.prev_end.1,
        )
    }

    fn stmt(&self, kind: StmtKind, start: &Token) -> Stmt {
        Stmt {
            kind,
            span: self.span_from(start),
        }
    }

    fn expr(&self, kind: ExprKind, start: &Token) -> Expr {
        Expr::new(kind, self.span_from(start))
    }

    // ─── Top-Level ───────────────────────────────────────────────────────

    pub fn parse_module(&mut self) -> Result<Module, ParseError> {
        let mut body = Vec::new();
        while !self.at_end() {
            if matches!(self.peek().kind, TokenKind::Newline) {
                self.advance();
                continue;
            }
            if matches!(self.peek().kind, TokenKind::Indent) {
                let tok = self.peek().clone();
                return Err(ParseError::Indentation {
                    message: "unexpected indent".to_string(),
                    line: tok.line,
                    col: tok.col,
                });
            }
            body.extend(self.parse_statement()?);
        }
        Ok(Module { body })
    }

    // ─── Statements ──────────────────────────────────────────────────────

    /// One logical line, which may hold several `;`-separated statements.
    fn parse_statement(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let compound = match &self.peek().kind {
            TokenKind::Keyword("if") => Some(self.parse_if()?),
            TokenKind::Keyword("for") => Some(self.parse_for()?),
            TokenKind::Keyword("class") => Some(self.parse_class_def(Vec::new())?),
            TokenKind::Op("@") => Some(self.parse_decorated()?),
            TokenKind::Keyword("while") => Some(self.skip_compound(Construct::While, &["else"])?),
            TokenKind::Keyword("def") => Some(self.skip_compound(Construct::FunctionDef, &[])?),
            TokenKind::Keyword("try") => {
                Some(self.skip_compound(Construct::Try, &["except", "else", "finally"])?)
            }
            TokenKind::Keyword("with") => Some(self.skip_compound(Construct::With, &[])?),
            TokenKind::Keyword("async") => Some(self.skip_compound(Construct::Async, &[])?),
            TokenKind::Identifier(name) if name == "match" && self.looks_like_match() => {
                Some(self.skip_compound(Construct::Match, &[])?)
            }
            _ => None,
        };
        if let Some(stmt) = compound {
            return Ok(vec![stmt]);
        }

        let mut stmts = vec![self.parse_simple_statement()?];
        while self.match_op(";") {
            if matches!(self.peek().kind, TokenKind::Newline | TokenKind::Eof) {
                break;
            }
            stmts.push(self.parse_simple_statement()?);
        }
        self.expect_newline()?;
        Ok(stmts)
    }

    fn expect_newline(&mut self) -> Result<(), ParseError> {
        match self.peek().kind {
            TokenKind::Newline => {
                self.advance();
                Ok(())
            }
            TokenKind::Eof | TokenKind::Dedent => Ok(()),
            _ => Err(ParseError::unexpected("newline", self.peek())),
        }
    }

    /// `match` is a soft keyword: a statement only when the line ends in `:`
    /// and holds no assignment.
    fn looks_like_match(&self) -> bool {
        let mut i = self.pos + 1;
        let mut last = None;
        while let Some(tok) = self.tokens.get(i) {
            match &tok.kind {
                TokenKind::Newline | TokenKind::Eof => break,
                TokenKind::Op("=") => return false,
                kind => last = Some(kind),
            }
            i += 1;
        }
        i > self.pos + 2 && matches!(last, Some(TokenKind::Op(":")))
    }

    fn parse_simple_statement(&mut self) -> Result<Stmt, ParseError> {
        let start = self.peek().clone();
        match &start.kind {
            TokenKind::Keyword("pass") => {
                self.advance();
                Ok(self.stmt(StmtKind::Pass, &start))
            }
            TokenKind::Keyword("break") => {
                self.advance();
                Ok(self.stmt(StmtKind::Unsupported(Construct::Break), &start))
            }
            TokenKind::Keyword("continue") => {
                self.advance();
                Ok(self.stmt(StmtKind::Unsupported(Construct::Continue), &start))
            }
            TokenKind::Keyword("return") => self.skip_simple(Construct::Return),
            TokenKind::Keyword("global") => self.skip_simple(Construct::Global),
            TokenKind::Keyword("nonlocal") => self.skip_simple(Construct::Nonlocal),
            TokenKind::Keyword("del") => self.skip_simple(Construct::Delete),
            TokenKind::Keyword("assert") => self.skip_simple(Construct::Assert),
            TokenKind::Keyword("import") => self.skip_simple(Construct::Import),
            TokenKind::Keyword("from") => self.parse_import_from(),
            TokenKind::Keyword("raise") => self.parse_raise(),
            _ => self.parse_expr_or_assign(),
        }
    }

    /// Consumes a simple statement that is never executed.
    fn skip_simple(&mut self, construct: Construct) -> Result<Stmt, ParseError> {
        let start = self.advance();
        while !matches!(
            self.peek().kind,
            TokenKind::Newline | TokenKind::Eof | TokenKind::Op(";")
        ) {
            self.advance();
        }
        Ok(self.stmt(StmtKind::Unsupported(construct), &start))
    }

    /// Consumes a compound statement (header, suite and any continuation
    /// clauses) that is never executed.
    fn skip_compound(
        &mut self,
        construct: Construct,
        clauses: &[&str],
    ) -> Result<Stmt, ParseError> {
        let start = self.peek().clone();
        self.skip_header()?;
        self.skip_suite()?;
        while clauses.iter().any(|c| self.check_keyword(c)) {
            self.skip_header()?;
            self.skip_suite()?;
        }
        Ok(self.stmt(StmtKind::Unsupported(construct), &start))
    }

    fn skip_header(&mut self) -> Result<(), ParseError> {
        let mut depth = 0usize;
        loop {
            match self.peek().kind {
                TokenKind::Op(":") if depth == 0 => {
                    self.advance();
                    return Ok(());
                }
                TokenKind::Op("(") | TokenKind::Op("[") | TokenKind::Op("{") => depth += 1,
                TokenKind::Op(")") | TokenKind::Op("]") | TokenKind::Op("}") => {
                    depth = depth.saturating_sub(1)
                }
                TokenKind::Newline | TokenKind::Eof => {
                    return Err(ParseError::unexpected("':'", self.peek()));
                }
                _ => {}
            }
            self.advance();
        }
    }

    fn skip_suite(&mut self) -> Result<(), ParseError> {
        if !matches!(self.peek().kind, TokenKind::Newline) {
            while !matches!(self.peek().kind, TokenKind::Newline | TokenKind::Eof) {
                self.advance();
            }
            return self.expect_newline();
        }
        self.advance();
        if !matches!(self.peek().kind, TokenKind::Indent) {
            return Err(self.expected_indent());
        }
        let mut depth = 0usize;
        loop {
            match self.advance().kind {
                TokenKind::Indent => depth += 1,
                TokenKind::Dedent => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                TokenKind::Eof => return Ok(()),
                _ => {}
            }
        }
    }

    fn expected_indent(&self) -> ParseError {
        let tok = self.peek();
        ParseError::Indentation {
            message: "expected an indented block".to_string(),
            line: tok.line,
            col: tok.col,
        }
    }

    // ─── Block ───────────────────────────────────────────────────────────

    /// `':' suite` where suite is either an indented block or simple
    /// statements on the same line.
    fn parse_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect_op(":")?;
        self.descend(NESTED_BLOCKS)?;
        let block = self.parse_suite();
        self.ascend();
        block
    }

    fn parse_suite(&mut self) -> Result<Vec<Stmt>, ParseError> {
        if !matches!(self.peek().kind, TokenKind::Newline) {
            let mut stmts = vec![self.parse_simple_statement()?];
            while self.match_op(";") {
                if matches!(self.peek().kind, TokenKind::Newline | TokenKind::Eof) {
                    break;
                }
                stmts.push(self.parse_simple_statement()?);
            }
            self.expect_newline()?;
            return Ok(stmts);
        }
        self.advance();
        if !matches!(self.peek().kind, TokenKind::Indent) {
            return Err(self.expected_indent());
        }
        self.advance();
        let mut stmts = Vec::new();
        while !matches!(self.peek().kind, TokenKind::Dedent | TokenKind::Eof) {
            if matches!(self.peek().kind, TokenKind::Newline) {
                self.advance();
                continue;
            }
            stmts.extend(self.parse_statement()?);
        }
        if matches!(self.peek().kind, TokenKind::Dedent) {
            self.advance();
        }
        Ok(stmts)
    }

    // ─── Compound Statements ─────────────────────────────────────────────

    fn parse_if(&mut self) -> Result<Stmt, ParseError> {
        // `if` or `elif`
        let start = self.advance();
        let test = self.parse_named_expr()?;
        let body = self.parse_block()?;
        let orelse = if self.check_keyword("elif") {
            vec![self.parse_if()?]
        } else if self.match_keyword("else") {
            self.parse_block()?
        } else {
            Vec::new()
        };
        Ok(self.stmt(StmtKind::If { test, body, orelse }, &start))
    }

    fn parse_for(&mut self) -> Result<Stmt, ParseError> {
        let start = self.expect_keyword("for")?;
        let target = self.parse_target_list()?;
        self.expect_keyword("in")?;
        let iter = self.parse_star_expressions()?;
        let body = self.parse_block()?;
        let orelse = if self.match_keyword("else") {
            self.parse_block()?
        } else {
            Vec::new()
        };
        Ok(self.stmt(
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            },
            &start,
        ))
    }

    fn parse_decorated(&mut self) -> Result<Stmt, ParseError> {
        let start = self.peek().clone();
        let mut decorators = Vec::new();
        while self.match_op("@") {
            decorators.push(self.parse_named_expr()?);
            self.expect_newline()?;
        }
        match self.peek().kind {
            TokenKind::Keyword("class") => self.parse_class_def(decorators),
            TokenKind::Keyword("def") | TokenKind::Keyword("async") => {
                let construct = if self.check_keyword("def") {
                    Construct::FunctionDef
                } else {
                    Construct::Async
                };
                let stmt = self.skip_compound(construct, &[])?;
                Ok(self.stmt(stmt.kind, &start))
            }
            _ => Err(ParseError::unexpected("class or function definition", self.peek())),
        }
    }

    fn parse_class_def(&mut self, decorators: Vec<Expr>) -> Result<Stmt, ParseError> {
        let start = self.expect_keyword("class")?;
        let name = self.expect_identifier("class name")?;
        let (bases, keywords) = if self.match_op("(") {
            self.parse_call_arguments()?
        } else {
            (Vec::new(), Vec::new())
        };
        let body = self.parse_block()?;
        Ok(self.stmt(
            StmtKind::ClassDef {
                name,
                bases,
                keywords,
                body,
                decorators,
            },
            &start,
        ))
    }

    // ─── Simple Statements ───────────────────────────────────────────────

    fn parse_import_from(&mut self) -> Result<Stmt, ParseError> {
        let start = self.expect_keyword("from")?;
        let mut module = String::new();
        loop {
            if self.match_op(".") {
                module.push('.');
            } else if self.match_op("...") {
                module.push_str("...");
            } else {
                break;
            }
        }
        if !self.check_keyword("import") {
            module.push_str(&self.expect_identifier("module name")?);
            while self.match_op(".") {
                module.push('.');
                module.push_str(&self.expect_identifier("module name")?);
            }
        }
        self.expect_keyword("import")?;

        let mut names = Vec::new();
        if self.match_op("*") {
            names.push(Alias {
                name: "*".to_string(),
                asname: None,
            });
        } else {
            let parenthesized = self.match_op("(");
            loop {
                let name = self.expect_identifier("imported name")?;
                let asname = if self.match_keyword("as") {
                    Some(self.expect_identifier("alias")?)
                } else {
                    None
                };
                names.push(Alias { name, asname });
                if !self.match_op(",") {
                    break;
                }
                if parenthesized && self.check_op(")") {
                    break;
                }
            }
            if parenthesized {
                self.expect_op(")")?;
            }
        }
        let module = if module.is_empty() { None } else { Some(module) };
        Ok(self.stmt(StmtKind::ImportFrom { module, names }, &start))
    }

    fn parse_raise(&mut self) -> Result<Stmt, ParseError> {
        let start = self.expect_keyword("raise")?;
        let mut exc = None;
        let mut cause = None;
        if !matches!(
            self.peek().kind,
            TokenKind::Newline | TokenKind::Eof | TokenKind::Op(";")
        ) {
            exc = Some(self.parse_test()?);
            if self.match_keyword("from") {
                cause = Some(self.parse_test()?);
            }
        }
        Ok(self.stmt(StmtKind::Raise { exc, cause }, &start))
    }

    fn parse_expr_or_assign(&mut self) -> Result<Stmt, ParseError> {
        let start = self.peek().clone();
        let first = self.parse_star_expressions()?;

        if self.check_op(":") {
            self.advance();
            let annotation = self.parse_test()?;
            let value = if self.match_op("=") {
                Some(self.parse_assign_value()?)
            } else {
                None
            };
            return Ok(self.stmt(
                StmtKind::AnnAssign {
                    target: first,
                    annotation,
                    value,
                },
                &start,
            ));
        }

        if let TokenKind::Op(op) = self.peek().kind {
            if let Some(bin_op) = augmented_op(op) {
                self.advance();
                let value = self.parse_assign_value()?;
                return Ok(self.stmt(
                    StmtKind::AugAssign {
                        target: first,
                        op: bin_op,
                        value,
                    },
                    &start,
                ));
            }
        }

        if self.check_op("=") {
            let mut targets = vec![first];
            let mut value;
            loop {
                self.advance();
                value = self.parse_assign_value()?;
                if !self.check_op("=") {
                    break;
                }
                targets.push(value);
            }
            return Ok(self.stmt(StmtKind::Assign { targets, value }, &start));
        }

        Ok(self.stmt(StmtKind::Expr(first), &start))
    }

    fn parse_assign_value(&mut self) -> Result<Expr, ParseError> {
        if self.check_keyword("yield") {
            return self.parse_yield();
        }
        self.parse_star_expressions()
    }

    fn parse_yield(&mut self) -> Result<Expr, ParseError> {
        let start = self.expect_keyword("yield")?;
        let construct = if self.match_keyword("from") {
            Construct::YieldFrom
        } else {
            Construct::Yield
        };
        if !matches!(
            self.peek().kind,
            TokenKind::Newline
                | TokenKind::Eof
                | TokenKind::Op(")")
                | TokenKind::Op(";")
                | TokenKind::Op("=")
        ) {
            self.parse_star_expressions()?;
        }
        Ok(self.expr(ExprKind::Unsupported(construct), &start))
    }

    // ─── Expressions (Precedence Climbing) ───────────────────────────────

    /// Comma-separated expressions; more than one (or a trailing comma)
    /// makes a tuple.
    fn parse_star_expressions(&mut self) -> Result<Expr, ParseError> {
        let start = self.peek().clone();
        let first = self.parse_star_or_test()?;
        if !self.check_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.match_op(",") {
            if self.at_expression_end() {
                break;
            }
            items.push(self.parse_star_or_test()?);
        }
        Ok(self.expr(ExprKind::Tuple(items), &start))
    }

    fn at_expression_end(&self) -> bool {
        matches!(
            self.peek().kind,
            TokenKind::Newline
                | TokenKind::Eof
                | TokenKind::Op("=")
                | TokenKind::Op(")")
                | TokenKind::Op(";")
                | TokenKind::Op(":")
        ) || augmented_op_token(&self.peek().kind)
    }

    fn parse_star_or_test(&mut self) -> Result<Expr, ParseError> {
        if self.check_op("*") {
            let start = self.advance();
            let inner = self.parse_bitor()?;
            return Ok(self.expr(ExprKind::Starred(Box::new(inner)), &start));
        }
        self.parse_test()
    }

    fn parse_star_or_named(&mut self) -> Result<Expr, ParseError> {
        if self.check_op("*") {
            return self.parse_star_or_test();
        }
        self.parse_named_expr()
    }

    /// Loop and comprehension targets: stops before `in`.
    fn parse_target_list(&mut self) -> Result<Expr, ParseError> {
        let start = self.peek().clone();
        let first = self.parse_target()?;
        if !self.check_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.match_op(",") {
            if self.check_keyword("in") {
                break;
            }
            items.push(self.parse_target()?);
        }
        Ok(self.expr(ExprKind::Tuple(items), &start))
    }

    fn parse_target(&mut self) -> Result<Expr, ParseError> {
        if self.check_op("*") {
            let start = self.advance();
            let inner = self.parse_bitor()?;
            return Ok(self.expr(ExprKind::Starred(Box::new(inner)), &start));
        }
        self.parse_bitor()
    }

    fn parse_named_expr(&mut self) -> Result<Expr, ParseError> {
        if let (TokenKind::Identifier(_), Some(TokenKind::Op(":="))) =
            (&self.peek().kind, self.peek_kind_at(1))
        {
            let start = self.peek().clone();
            let name = self.expect_identifier("name")?;
            let target = self.expr(ExprKind::Name(name), &start);
            self.advance();
            let value = self.parse_test()?;
            return Ok(self.expr(
                ExprKind::NamedExpr {
                    target: Box::new(target),
                    value: Box::new(value),
                },
                &start,
            ));
        }
        self.parse_test()
    }

    // test: or_test ['if' or_test 'else' test] | lambda
    fn parse_test(&mut self) -> Result<Expr, ParseError> {
        if self.check_keyword("lambda") {
            return self.parse_lambda();
        }
        let start = self.peek().clone();
        let body = self.parse_or_test()?;
        if !self.match_keyword("if") {
            return Ok(body);
        }
        let test = self.parse_or_test()?;
        self.expect_keyword("else")?;
        self.descend(NESTED_EXPRESSION)?;
        let orelse = self.parse_test();
        self.ascend();
        let orelse = orelse?;
        Ok(self.expr(
            ExprKind::IfExp {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            },
            &start,
        ))
    }

    fn parse_lambda(&mut self) -> Result<Expr, ParseError> {
        let start = self.expect_keyword("lambda")?;
        let mut depth = 0usize;
        loop {
            match self.peek().kind {
                TokenKind::Op(":") if depth == 0 => break,
                TokenKind::Op("(") | TokenKind::Op("[") | TokenKind::Op("{") => depth += 1,
                TokenKind::Op(")") | TokenKind::Op("]") | TokenKind::Op("}") => {
                    depth = depth.saturating_sub(1)
                }
                TokenKind::Newline | TokenKind::Eof => {
                    return Err(ParseError::unexpected("':'", self.peek()));
                }
                _ => {}
            }
            self.advance();
        }
        self.expect_op(":")?;
        self.descend(NESTED_EXPRESSION)?;
        let body = self.parse_test();
        self.ascend();
        body?;
        Ok(self.expr(ExprKind::Unsupported(Construct::Lambda), &start))
    }

    // or_test: and_test ('or' and_test)*
    fn parse_or_test(&mut self) -> Result<Expr, ParseError> {
        let start = self.peek().clone();
        let first = self.parse_and_test()?;
        if !self.check_keyword("or") {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.match_keyword("or") {
            values.push(self.parse_and_test()?);
        }
        Ok(self.expr(
            ExprKind::BoolOp {
                op: BoolOp::Or,
                values,
            },
            &start,
        ))
    }

    // and_test: not_test ('and' not_test)*
    fn parse_and_test(&mut self) -> Result<Expr, ParseError> {
        let start = self.peek().clone();
        let first = self.parse_not_test()?;
        if !self.check_keyword("and") {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.match_keyword("and") {
            values.push(self.parse_not_test()?);
        }
        Ok(self.expr(
            ExprKind::BoolOp {
                op: BoolOp::And,
                values,
            },
            &start,
        ))
    }

    fn parse_not_test(&mut self) -> Result<Expr, ParseError> {
        if self.check_keyword("not") {
            let start = self.advance();
            self.descend(NESTED_EXPRESSION)?;
            let operand = self.parse_not_test();
            self.ascend();
            let operand = operand?;
            return Ok(self.expr(
                ExprKind::UnaryOp {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                &start,
            ));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let start = self.peek().clone();
        let left = self.parse_bitor()?;
        let mut ops = Vec::new();
        let mut comparators = Vec::new();
        loop {
            let op = match self.peek().kind {
                TokenKind::Op("==") => CmpOp::Eq,
                TokenKind::Op("!=") => CmpOp::NotEq,
                TokenKind::Op("<") => CmpOp::Lt,
                TokenKind::Op("<=") => CmpOp::LtE,
                TokenKind::Op(">") => CmpOp::Gt,
                TokenKind::Op(">=") => CmpOp::GtE,
                TokenKind::Keyword("in") => CmpOp::In,
                TokenKind::Keyword("not")
                    if matches!(self.peek_kind_at(1), Some(TokenKind::Keyword("in"))) =>
                {
                    self.advance();
                    CmpOp::NotIn
                }
                TokenKind::Keyword("is") => {
                    if matches!(self.peek_kind_at(1), Some(TokenKind::Keyword("not"))) {
                        self.advance();
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    }
                }
                _ => break,
            };
            self.advance();
            ops.push(op);
            comparators.push(self.parse_bitor()?);
        }
        if ops.is_empty() {
            return Ok(left);
        }
        Ok(self.expr(
            ExprKind::Compare {
                left: Box::new(left),
                ops,
                comparators,
            },
            &start,
        ))
    }

    /// Left-associative binary level: `next (op next)*`.
    fn parse_binary_level(
        &mut self,
        next: fn(&mut Self) -> Result<Expr, ParseError>,
        ops: &[(&str, BinOp)],
    ) -> Result<Expr, ParseError> {
        let start = self.peek().clone();
        let mut left = next(self)?;
        loop {
            let found = ops
                .iter()
                .find(|(symbol, _)| self.check_op(symbol))
                .map(|(_, op)| *op);
            let Some(op) = found else {
                break;
            };
            self.advance();
            let right = next(self)?;
            left = self.expr(
                ExprKind::BinOp {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                },
                &start,
            );
        }
        Ok(left)
    }

    fn parse_bitor(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_level(Self::parse_bitxor, &[("|", BinOp::BitOr)])
    }

    fn parse_bitxor(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_level(Self::parse_bitand, &[("^", BinOp::BitXor)])
    }

    fn parse_bitand(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_level(Self::parse_shift, &[("&", BinOp::BitAnd)])
    }

    fn parse_shift(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_level(
            Self::parse_sum,
            &[("<<", BinOp::LShift), (">>", BinOp::RShift)],
        )
    }

    fn parse_sum(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_level(Self::parse_term, &[("+", BinOp::Add), ("-", BinOp::Sub)])
    }

    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_level(
            Self::parse_factor,
            &[
                ("*", BinOp::Mult),
                ("/", BinOp::Div),
                ("//", BinOp::FloorDiv),
                ("%", BinOp::Mod),
                ("@", BinOp::MatMult),
            ],
        )
    }

    fn parse_factor(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek().kind {
            TokenKind::Op("+") => Some(UnaryOp::UAdd),
            TokenKind::Op("-") => Some(UnaryOp::USub),
            TokenKind::Op("~") => Some(UnaryOp::Invert),
            _ => None,
        };
        match op {
            Some(op) => {
                let start = self.advance();
                self.descend(NESTED_EXPRESSION)?;
                let operand = self.parse_factor();
                self.ascend();
                let operand = operand?;
                Ok(self.expr(
                    ExprKind::UnaryOp {
                        op,
                        operand: Box::new(operand),
                    },
                    &start,
                ))
            }
            None => self.parse_power(),
        }
    }

    // power: primary ['**' factor]
    fn parse_power(&mut self) -> Result<Expr, ParseError> {
        let start = self.peek().clone();
        let base = if self.check_keyword("await") {
            self.advance();
            self.parse_primary()?;
            self.expr(ExprKind::Unsupported(Construct::Async), &start)
        } else {
            self.parse_primary()?
        };
        if !self.match_op("**") {
            return Ok(base);
        }
        self.descend(NESTED_EXPRESSION)?;
        let exponent = self.parse_factor();
        self.ascend();
        let exponent = exponent?;
        Ok(self.expr(
            ExprKind::BinOp {
                left: Box::new(base),
                op: BinOp::Pow,
                right: Box::new(exponent),
            },
            &start,
        ))
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let start = self.peek().clone();
        let mut expr = self.parse_atom()?;
        loop {
            if self.match_op("(") {
                self.descend(NESTED_PARENS)?;
                let arguments = self.parse_call_arguments();
                self.ascend();
                let (args, keywords) = arguments?;
                expr = self.expr(
                    ExprKind::Call {
                        func: Box::new(expr),
                        args,
                        keywords,
                    },
                    &start,
                );
            } else if self.match_op("[") {
                self.descend(NESTED_PARENS)?;
                let index = self.parse_subscript_index();
                self.ascend();
                let index = index?;
                self.expect_op("]")?;
                expr = self.expr(
                    ExprKind::Subscript {
                        value: Box::new(expr),
                        index: Box::new(index),
                    },
                    &start,
                );
            } else if self.match_op(".") {
                let attr = self.expect_identifier("attribute name")?;
                expr = self.expr(
                    ExprKind::Attribute {
                        value: Box::new(expr),
                        attr,
                    },
                    &start,
                );
            } else {
                return Ok(expr);
            }
        }
    }

    /// Arguments after an opening `(`, through the closing `)`.
    fn parse_call_arguments(&mut self) -> Result<(Vec<Expr>, Vec<Keyword>), ParseError> {
        let mut args = Vec::new();
        let mut keywords = Vec::new();
        while !self.check_op(")") {
            if self.check_op("*") {
                args.push(self.parse_star_or_test()?);
            } else if self.match_op("**") {
                keywords.push(Keyword {
                    arg: None,
                    value: self.parse_test()?,
                });
            } else if let (TokenKind::Identifier(name), Some(TokenKind::Op("="))) =
                (&self.peek().kind, self.peek_kind_at(1))
            {
                let arg = Some(name.clone());
                self.advance();
                self.advance();
                keywords.push(Keyword {
                    arg,
                    value: self.parse_test()?,
                });
            } else {
                let start = self.peek().clone();
                let arg = self.parse_named_expr()?;
                if self.check_keyword("for") || self.check_keyword("async") {
                    self.parse_comprehensions()?;
                    args.push(self.expr(ExprKind::Unsupported(Construct::GeneratorExp), &start));
                } else {
                    args.push(arg);
                }
            }
            if !self.match_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        Ok((args, keywords))
    }

    fn parse_subscript_index(&mut self) -> Result<Expr, ParseError> {
        let start = self.peek().clone();
        let first = self.parse_slice_item()?;
        if !self.check_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.match_op(",") {
            if self.check_op("]") {
                break;
            }
            items.push(self.parse_slice_item()?);
        }
        Ok(self.expr(ExprKind::Tuple(items), &start))
    }

    fn parse_slice_item(&mut self) -> Result<Expr, ParseError> {
        let start = self.peek().clone();
        let mut lower = None;
        if !self.check_op(":") {
            let expr = self.parse_star_or_named()?;
            if !self.check_op(":") {
                return Ok(expr);
            }
            lower = Some(Box::new(expr));
        }
        self.expect_op(":")?;
        let ends_item = |p: &Self| p.check_op(":") || p.check_op("]") || p.check_op(",");
        let upper = if ends_item(self) {
            None
        } else {
            Some(Box::new(self.parse_test()?))
        };
        let step = if self.match_op(":") {
            if self.check_op("]") || self.check_op(",") {
                None
            } else {
                Some(Box::new(self.parse_test()?))
            }
        } else {
            None
        };
        Ok(self.expr(ExprKind::Slice { lower, upper, step }, &start))
    }

    /// `for target in iter [if cond]*` clauses. Returns `None` for `async for`.
    fn parse_comprehensions(&mut self) -> Result<Option<Vec<Comprehension>>, ParseError> {
        let mut generators = Vec::new();
        let mut is_async = false;
        loop {
            if self.match_keyword("async") {
                is_async = true;
            }
            if !self.match_keyword("for") {
                break;
            }
            let target = self.parse_target_list()?;
            self.expect_keyword("in")?;
            let iter = self.parse_or_test()?;
            let mut ifs = Vec::new();
            while self.match_keyword("if") {
                ifs.push(self.parse_or_test()?);
            }
            generators.push(Comprehension { target, iter, ifs });
        }
        if generators.is_empty() {
            return Err(ParseError::unexpected("'for'", self.peek()));
        }
        Ok(if is_async { None } else { Some(generators) })
    }

    fn parse_atom(&mut self) -> Result<Expr, ParseError> {
        let start = self.peek().clone();
        match &start.kind {
            TokenKind::Identifier(name) => {
                let name = name.clone();
                self.advance();
                Ok(self.expr(ExprKind::Name(name), &start))
            }
            TokenKind::Integer(i) => {
                let value = *i;
                self.advance();
                Ok(self.expr(ExprKind::Constant(Constant::Int(value)), &start))
            }
            TokenKind::Float(f) => {
                let value = *f;
                self.advance();
                Ok(self.expr(ExprKind::Constant(Constant::Float(value)), &start))
            }
            TokenKind::StringLit(_) | TokenKind::FString { .. } => self.parse_strings(),
            TokenKind::Keyword("None") => {
                self.advance();
                Ok(self.expr(ExprKind::Constant(Constant::None), &start))
            }
            TokenKind::Keyword("True") => {
                self.advance();
                Ok(self.expr(ExprKind::Constant(Constant::Bool(true)), &start))
            }
            TokenKind::Keyword("False") => {
                self.advance();
                Ok(self.expr(ExprKind::Constant(Constant::Bool(false)), &start))
            }
            TokenKind::Op("...") => {
                self.advance();
                Ok(self.expr(ExprKind::Constant(Constant::Ellipsis), &start))
            }
            TokenKind::Op(open @ ("(" | "[" | "{")) => {
                let open = *open;
                self.descend(NESTED_PARENS)?;
                let expr = match open {
                    "(" => self.parse_paren(),
                    "[" => self.parse_list(),
                    _ => self.parse_brace(),
                };
                self.ascend();
                expr
            }
            TokenKind::Keyword("lambda") => self.parse_lambda(),
            _ => Err(ParseError::unexpected("expression", &start)),
        }
    }

    fn comprehension_expr(
        &self,
        generators: Option<Vec<Comprehension>>,
        build: impl FnOnce(Vec<Comprehension>) -> ExprKind,
        start: &Token,
    ) -> Expr {
        match generators {
            Some(generators) => self.expr(build(generators), start),
            None => self.expr(ExprKind::Unsupported(Construct::Async), start),
        }
    }

    fn parse_paren(&mut self) -> Result<Expr, ParseError> {
        let start = self.expect_op("(")?;
        if self.match_op(")") {
            return Ok(self.expr(ExprKind::Tuple(Vec::new()), &start));
        }
        if self.check_keyword("yield") {
            let inner = self.parse_yield()?;
            self.expect_op(")")?;
            return Ok(self.expr(inner.kind, &start));
        }
        let first = self.parse_star_or_named()?;
        if self.check_keyword("for") || self.check_keyword("async") {
            self.parse_comprehensions()?;
            self.expect_op(")")?;
            return Ok(self.expr(ExprKind::Unsupported(Construct::GeneratorExp), &start));
        }
        if !self.check_op(",") {
            self.expect_op(")")?;
            return Ok(first);
        }
        let mut items = vec![first];
        while self.match_op(",") {
            if self.check_op(")") {
                break;
            }
            items.push(self.parse_star_or_named()?);
        }
        self.expect_op(")")?;
        Ok(self.expr(ExprKind::Tuple(items), &start))
    }

    fn parse_list(&mut self) -> Result<Expr, ParseError> {
        let start = self.expect_op("[")?;
        if self.match_op("]") {
            return Ok(self.expr(ExprKind::List(Vec::new()), &start));
        }
        let first = self.parse_star_or_named()?;
        if self.check_keyword("for") || self.check_keyword("async") {
            let generators = self.parse_comprehensions()?;
            self.expect_op("]")?;
            let elt = Box::new(first);
            return Ok(self.comprehension_expr(
                generators,
                |generators| ExprKind::ListComp { elt, generators },
                &start,
            ));
        }
        let mut items = vec![first];
        while self.match_op(",") {
            if self.check_op("]") {
                break;
            }
            items.push(self.parse_star_or_named()?);
        }
        self.expect_op("]")?;
        Ok(self.expr(ExprKind::List(items), &start))
    }

    fn parse_brace(&mut self) -> Result<Expr, ParseError> {
        let start = self.expect_op("{")?;
        if self.match_op("}") {
            return Ok(self.expr(
                ExprKind::Dict {
                    keys: Vec::new(),
                    values: Vec::new(),
                },
                &start,
            ));
        }

        // Dict entries: `key: value` or `**mapping`.
        let first_key = if self.match_op("**") {
            None
        } else {
            let key = self.parse_star_or_named()?;
            if !self.check_op(":") {
                return self.parse_set_rest(key, &start);
            }
            self.advance();
            Some(key)
        };
        let first_value = if first_key.is_none() {
            self.parse_bitor()?
        } else {
            self.parse_test()?
        };

        if let Some(key) = first_key.clone() {
            if self.check_keyword("for") || self.check_keyword("async") {
                let generators = self.parse_comprehensions()?;
                self.expect_op("}")?;
                let (key, value) = (Box::new(key), Box::new(first_value));
                return Ok(self.comprehension_expr(
                    generators,
                    |generators| ExprKind::DictComp {
                        key,
                        value,
                        generators,
                    },
                    &start,
                ));
            }
        }

        let mut keys = vec![first_key];
        let mut values = vec![first_value];
        while self.match_op(",") {
            if self.check_op("}") {
                break;
            }
            if self.match_op("**") {
                keys.push(None);
                values.push(self.parse_bitor()?);
            } else {
                keys.push(Some(self.parse_test()?));
                self.expect_op(":")?;
                values.push(self.parse_test()?);
            }
        }
        self.expect_op("}")?;
        Ok(self.expr(ExprKind::Dict { keys, values }, &start))
    }

    fn parse_set_rest(&mut self, first: Expr, start: &Token) -> Result<Expr, ParseError> {
        if self.check_keyword("for") || self.check_keyword("async") {
            let generators = self.parse_comprehensions()?;
            self.expect_op("}")?;
            let elt = Box::new(first);
            return Ok(self.comprehension_expr(
                generators,
                |generators| ExprKind::SetComp { elt, generators },
                start,
            ));
        }
        let mut items = vec![first];
        while self.match_op(",") {
            if self.check_op("}") {
                break;
            }
            items.push(self.parse_star_or_named()?);
        }
        self.expect_op("}")?;
        Ok(self.expr(ExprKind::Set(items), start))
    }

    // ─── Strings and f-strings ───────────────────────────────────────────

    /// Adjacent literals concatenate; any f-string makes the result a
    /// `JoinedStr`.
    fn parse_strings(&mut self) -> Result<Expr, ParseError> {
        let start = self.peek().clone();
        let mut parts: Vec<Expr> = Vec::new();
        let mut pending = String::new();
        let mut formatted = false;
        loop {
            let tok = self.peek().clone();
            match &tok.kind {
                TokenKind::StringLit(text) => {
                    self.advance();
                    pending.push_str(text);
                }
                TokenKind::FString { body, raw } => {
                    self.advance();
                    formatted = true;
                    for part in parse_fstring(body, *raw, &tok, self.depth)? {
                        match part.kind {
                            ExprKind::Constant(Constant::Str(text)) => pending.push_str(&text),
                            _ => {
                                if !pending.is_empty() {
                                    let text = std::mem::take(&mut pending);
                                    parts.push(self.expr(
                                        ExprKind::Constant(Constant::Str(text)),
                                        &start,
                                    ));
                                }
                                parts.push(part);
                            }
                        }
                    }
                }
                _ => break,
            }
        }
        if !formatted {
            return Ok(self.expr(ExprKind::Constant(Constant::Str(pending)), &start));
        }
        if !pending.is_empty() {
            parts.push(self.expr(ExprKind::Constant(Constant::Str(pending)), &start));
        }
        Ok(self.expr(ExprKind::JoinedStr(parts), &start))
    }
}

fn augmented_op(op: &str) -> Option<BinOp> {
    Some(match op {
        "+=" => BinOp::Add,
        "-=" => BinOp::Sub,
        "*=" => BinOp::Mult,
        "@=" => BinOp::MatMult,
        "/=" => BinOp::Div,
        "//=" => BinOp::FloorDiv,
        "%=" => BinOp::Mod,
        "**=" => BinOp::Pow,
        "<<=" => BinOp::LShift,
        ">>=" => BinOp::RShift,
        "|=" => BinOp::BitOr,
        "^=" => BinOp::BitXor,
        "&=" => BinOp::BitAnd,
        _ => return None,
    })
}

fn augmented_op_token(kind: &TokenKind) -> bool {
    matches!(kind, TokenKind::Op(op) if augmented_op(op).is_some())
}

fn token_span(tok: &Token) -> Span {
    Span::new(tok.line as i32, tok.col, tok.end_line as i32, tok.end_col)
}

/// Splits an f-string body into literal `Constant`s and `FormattedValue`s.
fn parse_fstring(
    body: &str,
    raw: bool,
    tok: &Token,
    nesting: usize,
) -> Result<Vec<Expr>, ParseError> {
    let chars: Vec<char> = body.chars().collect();
    let span = token_span(tok);
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    let flush = |literal: &mut String, parts: &mut Vec<Expr>| -> Result<(), ParseError> {
        if literal.is_empty() {
            return Ok(());
        }
        let text = if raw {
            std::mem::take(literal)
        } else {
            let text = unescape(literal).map_err(|m| ParseError::syntax(m, tok))?;
            literal.clear();
            text
        };
        parts.push(Expr::new(ExprKind::Constant(Constant::Str(text)), span));
        Ok(())
    };

    while i < chars.len() {
        match chars[i] {
            '{' if chars.get(i + 1) == Some(&'{') => {
                literal.push('{');
                i += 2;
            }
            '}' if chars.get(i + 1) == Some(&'}') => {
                literal.push('}');
                i += 2;
            }
            '{' => {
                flush(&mut literal, &mut parts)?;
                let (field, next) = parse_fstring_field(&chars, i + 1, raw, tok, nesting)?;
                parts.push(field);
                i = next;
            }
            '}' => return Err(ParseError::syntax("f-string: single '}' is not allowed", tok)),
            '\\' if !raw => {
                literal.push('\\');
                if let Some(c) = chars.get(i + 1) {
                    literal.push(*c);
                }
                i += 2;
            }
            c => {
                literal.push(c);
                i += 1;
            }
        }
    }
    flush(&mut literal, &mut parts)?;
    Ok(parts)
}

/// Parses one replacement field starting after its `{`. Returns the
/// `FormattedValue` and the index after the closing `}`.
fn parse_fstring_field(
    chars: &[char],
    mut i: usize,
    raw: bool,
    tok: &Token,
    nesting: usize,
) -> Result<(Expr, usize), ParseError> {
    let begin = i;
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' if depth > 0 => depth -= 1,
            '}' => break,
            '!' if depth == 0 && chars.get(i + 1) != Some(&'=') => break,
            ':' if depth == 0 => break,
            _ => {}
        }
        i += 1;
    }
    if i >= chars.len() {
        return Err(ParseError::syntax("f-string: expecting '}'", tok));
    }
    let source: String = chars[begin..i].iter().collect();
    if source.trim().is_empty() {
        return Err(ParseError::syntax(
            "f-string: empty expression not allowed",
            tok,
        ));
    }
    let value = parse_expression_at(&source, tok.line, tok.col, nesting + 1)?;

    let mut conversion = None;
    if chars[i] == '!' {
        match chars.get(i + 1) {
            Some(c @ ('s' | 'r' | 'a')) => conversion = Some(*c),
            _ => {
                return Err(ParseError::syntax(
                    "f-string: invalid conversion character: expected 's', 'r', or 'a'",
                    tok,
                ))
            }
        }
        i += 2;
    }

    let mut format_spec = None;
    if chars.get(i) == Some(&':') {
        i += 1;
        let spec_begin = i;
        let mut depth = 0usize;
        while i < chars.len() {
            match chars[i] {
                '{' => depth += 1,
                '}' if depth == 0 => break,
                '}' => depth -= 1,
                _ => {}
            }
            i += 1;
        }
        let spec: String = chars[spec_begin..i.min(chars.len())].iter().collect();
        if nesting + 1 >= MAX_NESTING {
            return Err(ParseError::syntax(NESTED_EXPRESSION, tok));
        }
        let spec_parts = parse_fstring(&spec, raw, tok, nesting + 1)?;
        format_spec = Some(Box::new(Expr::new(
            ExprKind::JoinedStr(spec_parts),
            token_span(tok),
        )));
    }

    if chars.get(i) != Some(&'}') {
        return Err(ParseError::syntax("f-string: expecting '}'", tok));
    }
    let expr = Expr::new(
        ExprKind::FormattedValue {
            value: Box::new(value),
            conversion,
            format_spec,
        },
        token_span(tok),
    );
    Ok((expr, i + 1))
}

fn parse_expression_at(
    source: &str,
    line: u32,
    col: u32,
    nesting: usize,
) -> Result<Expr, ParseError> {
    let tokens = Lexer::at(source, line, col).tokenize()?;
    let mut parser = Parser::new(tokens);
    parser.depth = nesting;
    let expr = parser.parse_star_expressions()?;
    while matches!(parser.peek().kind, TokenKind::Newline) {
        parser.advance();
    }
    if !parser.at_end() {
        return Err(ParseError::unexpected("end of expression", parser.peek()));
    }
    Ok(expr)
}

// ─── Public API ──────────────────────────────────────────────────────────────

/// Parses a whole program.
pub fn parse_source(source: &str) -> Result<Module, ParseError> {
    let mut lexer = Lexer::new(source);
    let tokens = lexer.tokenize()?;
    let mut parser = Parser::new(tokens);
    parser.parse_module()
}

/// Parses a single expression, e.g. a type annotation.
pub fn parse_expression(source: &str) -> Result<Expr, ParseError> {
    parse_expression_at(source, 1, 0, 0)
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Vec<Stmt> {
        parse_source(source).unwrap().body
    }

    fn expr_of(stmt: &Stmt) -> &Expr {
        match &stmt.kind {
            StmtKind::Expr(e) => e,
            other => panic!("Expected expression statement, got {:?}", other),
        }
    }

    #[test]
    fn test_lex_indentation() {
        let tokens = Lexer::new("if x:\n    y\nz\n").tokenize().unwrap();
        let kinds: Vec<TokenKind> = tokens.into_iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Keyword("if"),
                TokenKind::Identifier("x".into()),
                TokenKind::Op(":"),
                TokenKind::Newline,
                TokenKind::Indent,
                TokenKind::Identifier("y".into()),
                TokenKind::Newline,
                TokenKind::Dedent,
                TokenKind::Identifier("z".into()),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_nesting_limit() {
        let nested = |open: &str, close: &str, n: usize| {
            format!("x = {}1{}\n", open.repeat(n), close.repeat(n))
        };
        assert!(parse_source(&nested("(", ")", MAX_NESTING)).is_ok());
        assert!(parse_source(&nested("[", "]", MAX_NESTING)).is_ok());
        let cases = [
            ("(", ")", "too many nested parentheses"),
            ("[", "]", "too many nested parentheses"),
            ("f(", ")", "too many nested parentheses"),
            ("-", "", "expression nested too deeply"),
            ("not ", "", "expression nested too deeply"),
            ("2 ** ", "", "expression nested too deeply"),
        ];
        for (open, close, expected) in cases {
            match parse_source(&nested(open, close, 20_000)) {
                Err(ParseError::Syntax { message, .. }) => {
                    assert_eq!(message, expected, "{}", open)
                }
                other => panic!("Expected a syntax error for {:?}, got {:?}", open, other),
            }
        }
        let fstring = format!("x = f'{{{}1{}}}'\n", "(".repeat(100), ")".repeat(100));
        assert!(matches!(parse_source(&fstring), Err(ParseError::Syntax { .. })));
    }

    #[test]
    fn test_block_nesting_limit() {
        let mut source = String::new();
        for level in 0..=MAX_NESTING {
            source.push_str(&" ".repeat(level));
            source.push_str("if x:\n");
        }
        source.push_str(&" ".repeat(MAX_NESTING + 1));
        source.push_str("y = 1\n");
        match parse_source(&source) {
            Err(ParseError::Syntax { message, .. }) => {
                assert_eq!(message, "too many levels of indentation")
            }
            other => panic!("Expected a syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_lex_brackets_join_lines() {
        let tokens = Lexer::new("f(1,\n  2)\n").tokenize().unwrap();
        assert!(!tokens[..tokens.len() - 2]
            .iter()
            .any(|t| matches!(t.kind, TokenKind::Newline | TokenKind::Indent)));
    }

    #[test]
    fn test_lex_numbers() {
        let tokens = Lexer::new("42 3.14 1_000 0x1f 1e3 .5").tokenize().unwrap();
        assert!(matches!(tokens[0].kind, TokenKind::Integer(42)));
        assert!(matches!(tokens[1].kind, TokenKind::Float(f) if (f - 3.14).abs() < 0.001));
        assert!(matches!(tokens[2].kind, TokenKind::Integer(1000)));
        assert!(matches!(tokens[3].kind, TokenKind::Integer(31)));
        assert!(matches!(tokens[4].kind, TokenKind::Float(f) if f == 1000.0));
        assert!(matches!(tokens[5].kind, TokenKind::Float(f) if f == 0.5));
    }

    #[test]
    fn test_lex_string_escapes() {
        let tokens = Lexer::new(r#"'a\nb' r'a\nb' "it\'s" """x
y""""#)
            .tokenize()
            .unwrap();
        assert_eq!(tokens[0].kind, TokenKind::StringLit("a\nb".into()));
        assert_eq!(tokens[1].kind, TokenKind::StringLit("a\\nb".into()));
        assert_eq!(tokens[2].kind, TokenKind::StringLit("it's".into()));
        assert_eq!(tokens[3].kind, TokenKind::StringLit("x\ny".into()));
    }

    #[test]
    fn test_lex_unterminated_string() {
        assert!(matches!(
            Lexer::new("x = 'abc\n").tokenize(),
            Err(ParseError::Syntax { .. })
        ));
    }

    #[test]
    fn test_bad_dedent() {
        match parse_source("if x:\n    y = 1\n  z = 2\n") {
            Err(ParseError::Indentation { line, .. }) => assert_eq!(line, 3),
            other => panic!("Expected Indentation error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_block() {
        assert!(matches!(
            parse_source("if x:\ny = 1\n"),
            Err(ParseError::Indentation { .. })
        ));
    }

    #[test]
    fn test_parse_assignments() {
        let body = parse("a = b = 1\nx, y = 1, 2\nz += 3\nw: int = 4\n");
        match &body[0].kind {
            StmtKind::Assign { targets, value } => {
                assert_eq!(targets.len(), 2);
                assert_eq!(value.kind, ExprKind::Constant(Constant::Int(1)));
            }
            other => panic!("Expected Assign, got {:?}", other),
        }
        match &body[1].kind {
            StmtKind::Assign { targets, value } => {
                assert!(matches!(&targets[0].kind, ExprKind::Tuple(items) if items.len() == 2));
                assert!(matches!(&value.kind, ExprKind::Tuple(items) if items.len() == 2));
            }
            other => panic!("Expected Assign, got {:?}", other),
        }
        assert!(matches!(
            &body[2].kind,
            StmtKind::AugAssign { op: BinOp::Add, .. }
        ));
        assert!(matches!(
            &body[3].kind,
            StmtKind::AnnAssign { value: Some(_), .. }
        ));
    }

    #[test]
    fn test_parse_if_elif_else() {
        let body = parse("if a:\n    x = 1\nelif b:\n    x = 2\nelse:\n    x = 3\n");
        match &body[0].kind {
            StmtKind::If { orelse, .. } => match &orelse[0].kind {
                StmtKind::If { orelse, .. } => assert_eq!(orelse.len(), 1),
                other => panic!("Expected nested If, got {:?}", other),
            },
            other => panic!("Expected If, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_for_with_destructuring() {
        let body = parse("for k, v in d.items():\n    print(k, v)\n");
        match &body[0].kind {
            StmtKind::For { target, orelse, .. } => {
                assert!(matches!(&target.kind, ExprKind::Tuple(items) if items.len() == 2));
                assert!(orelse.is_empty());
            }
            other => panic!("Expected For, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_precedence() {
        let body = parse("1 + 2 * 3 ** 2\n");
        match &expr_of(&body[0]).kind {
            ExprKind::BinOp {
                op: BinOp::Add,
                right,
                ..
            } => assert!(matches!(
                &right.kind,
                ExprKind::BinOp {
                    op: BinOp::Mult,
                    ..
                }
            )),
            other => panic!("Expected BinOp, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_comparisons() {
        let body = parse("a not in b\nx is not None\n1 < 2 < 3\n");
        assert!(matches!(
            &expr_of(&body[0]).kind,
            ExprKind::Compare { ops, .. } if ops == &vec![CmpOp::NotIn]
        ));
        assert!(matches!(
            &expr_of(&body[1]).kind,
            ExprKind::Compare { ops, .. } if ops == &vec![CmpOp::IsNot]
        ));
        assert!(matches!(
            &expr_of(&body[2]).kind,
            ExprKind::Compare { ops, .. } if ops.len() == 2
        ));
    }

    #[test]
    fn test_parse_call_arguments() {
        let body = parse("f(1, *xs, key=2, **opts)\n");
        match &expr_of(&body[0]).kind {
            ExprKind::Call { args, keywords, .. } => {
                assert_eq!(args.len(), 2);
                assert!(matches!(args[1].kind, ExprKind::Starred(_)));
                assert_eq!(keywords[0].arg.as_deref(), Some("key"));
                assert_eq!(keywords[1].arg, None);
            }
            other => panic!("Expected Call, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_slices() {
        let body = parse("x[1:2]\nx[::-1]\nx[0]\n");
        assert!(matches!(
            &expr_of(&body[0]).kind,
            ExprKind::Subscript { index, .. }
                if matches!(index.kind, ExprKind::Slice { step: None, .. })
        ));
        assert!(matches!(
            &expr_of(&body[1]).kind,
            ExprKind::Subscript { index, .. }
                if matches!(index.kind, ExprKind::Slice { lower: None, upper: None, step: Some(_) })
        ));
        assert!(matches!(
            &expr_of(&body[2]).kind,
            ExprKind::Subscript { index, .. }
                if index.kind == ExprKind::Constant(Constant::Int(0))
        ));
    }

    #[test]
    fn test_parse_collections_and_comprehensions() {
        let body = parse(
            "[x for x in xs if x]\n{k: v for k, v in d}\n{1, 2}\n{'a': 1, **rest}\n()\n(1,)\n",
        );
        assert!(matches!(expr_of(&body[0]).kind, ExprKind::ListComp { .. }));
        assert!(matches!(expr_of(&body[1]).kind, ExprKind::DictComp { .. }));
        assert!(matches!(&expr_of(&body[2]).kind, ExprKind::Set(items) if items.len() == 2));
        assert!(matches!(
            &expr_of(&body[3]).kind,
            ExprKind::Dict { keys, .. } if keys[1].is_none()
        ));
        assert!(matches!(&expr_of(&body[4]).kind, ExprKind::Tuple(items) if items.is_empty()));
        assert!(matches!(&expr_of(&body[5]).kind, ExprKind::Tuple(items) if items.len() == 1));
    }

    #[test]
    fn test_parse_fstring() {
        let body = parse("f'Hi {name!r:>10} {{x}}'\n");
        match &expr_of(&body[0]).kind {
            ExprKind::JoinedStr(parts) => {
                assert_eq!(parts.len(), 3);
                assert_eq!(parts[0].kind, ExprKind::Constant(Constant::Str("Hi ".into())));
                match &parts[1].kind {
                    ExprKind::FormattedValue {
                        conversion,
                        format_spec,
                        ..
                    } => {
                        assert_eq!(*conversion, Some('r'));
                        assert!(format_spec.is_some());
                    }
                    other => panic!("Expected FormattedValue, got {:?}", other),
                }
                assert_eq!(parts[2].kind, ExprKind::Constant(Constant::Str(" {x}".into())));
            }
            other => panic!("Expected JoinedStr, got {:?}", other),
        }
    }

    #[test]
    fn test_string_concatenation() {
        let body = parse("'a' \"b\"\n");
        assert_eq!(
            expr_of(&body[0]).kind,
            ExprKind::Constant(Constant::Str("ab".into()))
        );
    }

    #[test]
    fn test_parse_class_def() {
        let body = parse("@dataclass\nclass Point:\n    x: int\n    y: int\n");
        match &body[0].kind {
            StmtKind::ClassDef {
                name,
                decorators,
                body,
                ..
            } => {
                assert_eq!(name, "Point");
                assert_eq!(decorators.len(), 1);
                assert_eq!(body.len(), 2);
            }
            other => panic!("Expected ClassDef, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_import_from() {
        let body = parse("from datetime import datetime as dt, date\n");
        match &body[0].kind {
            StmtKind::ImportFrom { module, names } => {
                assert_eq!(module.as_deref(), Some("datetime"));
                assert_eq!(names[0].asname.as_deref(), Some("dt"));
                assert_eq!(names[1].name, "date");
            }
            other => panic!("Expected ImportFrom, got {:?}", other),
        }
    }

    #[test]
    fn test_unsupported_statements() {
        let source = "while x:\n    y = 1\ntry:\n    pass\nexcept E:\n    pass\nfinally:\n    pass\n\
                      def f(a: int) -> int:\n    return a\nimport os\nbreak\n";
        let kinds: Vec<&'static str> = parse(source).iter().map(|s| s.kind.name()).collect();
        assert_eq!(
            kinds,
            vec!["While", "Try", "FunctionDef", "Import", "Break"]
        );
    }

    #[test]
    fn test_unsupported_expressions() {
        let body = parse("f = lambda x: x + 1\ng = (x for x in y)\n");
        match &body[0].kind {
            StmtKind::Assign { value, .. } => {
                assert_eq!(value.kind, ExprKind::Unsupported(Construct::Lambda))
            }
            other => panic!("Expected Assign, got {:?}", other),
        }
        match &body[1].kind {
            StmtKind::Assign { value, .. } => {
                assert_eq!(value.kind, ExprKind::Unsupported(Construct::GeneratorExp))
            }
            other => panic!("Expected Assign, got {:?}", other),
        }
    }

    #[test]
    fn test_match_is_soft_keyword() {
        let body = parse("match = 1\nmatch x:\n    case 1:\n        pass\n");
        assert!(matches!(body[0].kind, StmtKind::Assign { .. }));
        assert_eq!(body[1].kind, StmtKind::Unsupported(Construct::Match));
    }

    #[test]
    fn test_spans() {
        let body = parse("x = 1\n\ny = foo(\n  2)\n");
        assert_eq!(body[1].span.lineno, 3);
        assert_eq!(body[1].span.end_lineno, 4);
        assert_eq!(body[1].span.col_offset, 0);
    }

    #[test]
    fn test_unexpected_token() {
        match parse_source("x = = 1\n") {
            Err(ParseError::UnexpectedToken { line, .. }) => assert_eq!(line, 1),
            other => panic!("Expected UnexpectedToken, got {:?}", other),
        }
        assert!(matches!(
            parse_source("f(1,"),
            Err(ParseError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn test_parse_expression() {
        let expr = parse_expression("list[str] | None").unwrap();
        assert!(matches!(
            expr.kind,
            ExprKind::BinOp {
                op: BinOp::BitOr,
                ..
            }
        ));
    }
}
