//! Routine text format (`.rg`) for writing generator tests and feeding the
//! dump tool without a front end.
//!
//! # Format
//!
//! ```text
//! ; Comments start with a semicolon
//! routine main(%n: value hint int64|double) {
//!   var %i: int64 hint int64
//!   global %out: mstring
//! entry:
//!   %i = 0
//!   goto head
//! head:
//!   if lt %i, %n then body else done
//! body:
//!   %out .= concat "x", %i
//!   %i = add %i, 1
//!   goto head
//! done:
//!   return %i
//! }
//! ```
//!
//! Blocks get ordinals in the order their labels appear. A label followed by
//! `dead` marks the block statically dead. Each block holds statements
//! (`%v = e`, `%v .= e`, `echo e`, `eval e`, `return [e]`, `throw e`) and at
//! most one terminator:
//!
//! - `goto L`
//! - `if e then L else L`
//! - `try L catch Class [%v] -> L ... [finally L] end L`
//! - `foreach e -> L`
//! - `movenext L %v [%k] body L after L`, `L` naming the `foreach` block
//! - `switch e case lit -> L ... default -> L`
//!
//! Expressions are prefix forms: literals, `%var`, `new Class`,
//! `add|sub|mul|concat|eq|lt a, b`, `not e`, `array(e, ...)` and
//! `(e : hint)` to narrow a hint.
//!
//! [`check`] validates FileCheck-style directives embedded in the same files.

pub mod check;
mod parser;

pub use check::{CheckDirective, CheckError, FileTest};
pub use parser::parse_routines;

use thiserror::Error;

/// Malformed routine text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl ParseError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self { line, message: message.into() }
    }
}
