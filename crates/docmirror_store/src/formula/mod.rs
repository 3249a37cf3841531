//! Selection-formula language.
//!
//! The store's native predicate language. A formula is compiled once and
//! evaluated against each document's fields; a document is selected when
//! the result is truthy.
//!
//! # Syntax
//!
//! ```text
//! SELECT Form = "Person" & StartsWith(Lastname; "L")
//! @All
//! !IsAvailable(Email) | Age >= 65
//! Tags = "red" : "blue"
//! ```
//!
//! - Optional leading `SELECT`
//! - `&`, `|`, `!`, parentheses
//! - `=`, `!=` (or `<>`), `<`, `>`, `<=`, `>=`; a comparison holds if any
//!   element of the left side compares true with any element of the right
//! - `a : b` builds a list
//! - Functions, with or without `@`: `StartsWith`/`Begins`, `EndsWith`/`Ends`,
//!   `Contains`, `Lowercase`, `Uppercase`, `IsAvailable`, `Length`
//! - Arguments are separated by `;` or `,`
//! - A missing field evaluates to the empty value, which equals `""`

mod eval;
mod lexer;
mod parser;

use docmirror_core::{CoreError, CoreResult, Fields, Value};
use std::cmp::Ordering;
use thiserror::Error;

/// A syntax error at a byte offset of the formula source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at offset {offset}")]
pub struct FormulaError {
    /// Byte offset into the source.
    pub offset: usize,
    /// What went wrong.
    pub message: String,
}

impl FormulaError {
    pub(crate) fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompareOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl CompareOp {
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
        }
    }
}

/// Built-in functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Function {
    StartsWith,
    EndsWith,
    Contains,
    Lowercase,
    Uppercase,
    IsAvailable,
    Length,
}

impl Function {
    fn lookup(name: &str) -> Option<Self> {
        let function = match name.to_ascii_lowercase().as_str() {
            "startswith" | "begins" => Function::StartsWith,
            "endswith" | "ends" => Function::EndsWith,
            "contains" => Function::Contains,
            "lowercase" | "lower" => Function::Lowercase,
            "uppercase" | "upper" => Function::Uppercase,
            "isavailable" => Function::IsAvailable,
            "length" => Function::Length,
            _ => return None,
        };
        Some(function)
    }

    fn name(self) -> &'static str {
        match self {
            Function::StartsWith => "StartsWith",
            Function::EndsWith => "EndsWith",
            Function::Contains => "Contains",
            Function::Lowercase => "Lowercase",
            Function::Uppercase => "Uppercase",
            Function::IsAvailable => "IsAvailable",
            Function::Length => "Length",
        }
    }

    fn arity(self) -> usize {
        match self {
            Function::StartsWith | Function::EndsWith | Function::Contains => 2,
            Function::Lowercase | Function::Uppercase | Function::IsAvailable | Function::Length => 1,
        }
    }
}

/// Formula syntax tree.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(Value),
    Field(String),
    All,
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(CompareOp, Box<Expr>, Box<Expr>),
    Call(Function, Vec<Expr>),
    List(Vec<Expr>),
}

/// A compiled selection formula.
#[derive(Debug, Clone)]
pub struct Formula {
    source: String,
    expr: Expr,
}

impl Formula {
    /// Compiles formula source text.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Predicate` on any syntax error.
    pub fn compile(source: &str) -> CoreResult<Self> {
        let expr = lexer::tokenize(source)
            .and_then(|tokens| parser::parse(tokens, source.len()))
            .map_err(|e| CoreError::predicate(source, e.to_string()))?;
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    /// Returns the source text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates the formula against a document.
    #[must_use]
    pub fn evaluate(&self, fields: &Fields) -> Value {
        eval::eval(&self.expr, fields)
    }

    /// Returns true if the document is selected.
    #[must_use]
    pub fn matches(&self, fields: &Fields) -> bool {
        eval::truthy(&self.evaluate(fields))
    }
}
