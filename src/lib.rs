//! dyncg - code generation backend for a dynamically-typed language.
//!
//! dyncg turns the bound block/edge graph of a routine into a linear,
//! structurally nested stack-machine instruction stream. Two parts do the
//! work: a scope-aware worklist scheduler that emits every reachable block
//! exactly once inside the protected region it belongs to, and a coercion
//! engine that picks value representations and emits the conversions between
//! them.
//!
//! # Primary Usage
//!
//! ```ignore
//! use bumpalo::Bump;
//! use dyncg::config::CodegenOptions;
//! use dyncg::core::{CompilationSession, HelperRegistry};
//! use dyncg::driver::compile_routine;
//!
//! let arena = Bump::new();
//! let session = CompilationSession::new(&arena);
//! let registry = HelperRegistry::new();
//! let listing = compile_routine(&graph, &registry, &CodegenOptions::default(), &session)?;
//! ```
//!
//! # Architecture
//!
//! - [`ir`] - Routine graphs: blocks, typed edges, statements and expressions
//! - [`codegen`] - Block scheduling and statement/edge lowering
//! - [`coerce`] - Representations, type hints, conversions and places
//! - [`core`] - Shared infrastructure (session, errors, helpers, sinks)
//! - [`driver`] - Single-routine and parallel compilation entry points
//! - [`runtime`] - Reference model of the runtime value semantics
//! - [`text`] - Routine text format and FileCheck-style testing

pub mod codegen;
pub mod coerce;
pub mod config;
pub mod core;
pub mod driver;
pub mod ir;
pub mod runtime;
pub mod text;

pub use coerce::{ClassId, Place, Repr, TypeHint};
pub use config::{CodegenOptions, ConfigError};
pub use core::{
    CodegenError, CompilationSession, CompileResult, ErrorKind, HelperRegistry, InstructionSink,
    Listing, SessionStats,
};
pub use driver::{compile_all, compile_routine, CompilationOutput};
pub use ir::{GraphBuilder, RoutineGraph};
