// This module is the hub for dyncg's shared infrastructure: the error taxonomy, the
// arena-backed compilation session and its statistics, the runtime helper model with its
// process-wide registry, the InstructionSink contract with the depth-tracking wrapper, and
// the recording Listing sink. Everything here is independent of how a routine's graph is
// scheduled; the codegen module builds on these pieces.

//! Core dyncg infrastructure
//!
//! # Key Components
//!
//! ## Session Management (`session`)
//! - Arena-based scratch allocation using `bumpalo`
//! - Per-routine and aggregated generation statistics
//!
//! ## Runtime Helpers (`helpers`)
//! - Helper identities and stack signatures
//! - Create-if-absent registry shared between worker threads
//!
//! ## Instruction Sink (`sink`, `listing`)
//! - The contract towards the target instruction writer
//! - Evaluation-stack balance tracking
//! - An in-memory recording implementation

pub mod error;
pub mod helpers;
pub mod listing;
pub mod session;
pub mod sink;
pub mod test_utils;

pub use error::{CodegenError, CompileResult, ErrorKind};

pub use helpers::{ArithOp, Coercion, Helper, HelperRef, HelperRegistry, HelperResolver};

pub use listing::{Insn, Listing};

pub use session::{CompilationSession, RoutineStats, SessionStats};

pub use sink::{BranchOp, DepthTracker, InstructionSink, Label, LocalId, Opcode};
