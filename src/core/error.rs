// This module defines the error types of dyncg using the thiserror crate. ErrorKind is the
// internal-invariant taxonomy: malformed edges reaching generation, conversions outside the
// coercion table, branches into closed scopes, evaluation-stack imbalance at scope close,
// references to blocks outside the graph, illegal exits from handler regions, and routines
// skipped by cancellation. None of these are user diagnostics (the binder reports those
// upstream); they abort compilation of one routine. CodegenError tags a kind with the routine
// name and, when known, the source span of the statement being generated, so a driver can
// report it as a compiler diagnostic and carry on with the other routines.

//! Error types for dyncg.
//!
//! Using thiserror for the taxonomy, with a small wrapper for routine identity.

use std::fmt;

use thiserror::Error;

use crate::codegen::ScopeKind;
use crate::coerce::{Repr, TypeHint};
use crate::ir::{BlockId, Span};

/// Internal invariant violations detected during code generation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ErrorKind {
    #[error("unsupported {kind} edge: {reason}")]
    UnsupportedEdge { kind: &'static str, reason: String },

    #[error("unsupported conversion from {from} (hint {hint}) to {to}")]
    UnsupportedConversion { from: Repr, hint: TypeHint, to: Repr },

    #[error("scope violation: block {block} lies below the {scope} scope starting at ordinal {from}")]
    ScopeViolation { block: BlockId, scope: ScopeKind, from: u32 },

    #[error("evaluation stack holds {depth} value(s) at the close of a {scope} scope")]
    StackImbalance { depth: i32, scope: ScopeKind },

    #[error("block {block} does not belong to the routine graph")]
    DanglingBlock { block: BlockId },

    #[error("variable #{var} is not declared in the routine")]
    DanglingVariable { var: u32 },

    #[error("control cannot leave a {region} region here")]
    InvalidRegionExit { region: ScopeKind },

    #[error("compilation cancelled before the routine started")]
    Cancelled,
}

/// An [`ErrorKind`] attributed to a routine.
#[derive(Debug, Clone, PartialEq)]
pub struct CodegenError {
    pub routine: String,
    pub span: Option<Span>,
    pub kind: ErrorKind,
}

impl CodegenError {
    pub fn new(routine: impl Into<String>, span: Option<Span>, kind: ErrorKind) -> Self {
        Self { routine: routine.into(), span, kind }
    }
}

impl fmt::Display for CodegenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.span {
            Some(span) => write!(f, "internal compiler error in {} at {}: {}", self.routine, span, self.kind),
            None => write!(f, "internal compiler error in {}: {}", self.routine, self.kind),
        }
    }
}

impl std::error::Error for CodegenError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

/// Result type alias for code generation.
pub type CompileResult<T> = Result<T, CodegenError>;
