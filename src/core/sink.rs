// This module defines the InstructionSink trait, the boundary between dyncg and whatever
// writes the target instruction format. The generator never encodes instructions itself:
// it asks the sink to emit opcodes, branches to labels, helper calls and exception-region
// markers, and to declare and access locals. Labels are identified by block identity (or
// by a routine-local synthetic number) so the sink can resolve them both forward and
// backward. The module also provides DepthTracker, a sink wrapper that keeps the
// evaluation-stack balance of everything passing through it, which the scheduler checks
// at every scope close.

//! Instruction sink contract.
//!
//! The sink plays the role an assembler plays for a native backend: it owns the
//! output and label resolution, while the generator decides what to emit and in
//! which order. [`crate::core::Listing`] is the in-crate implementation used by
//! tests and the dump tool.

use std::fmt;
use std::sync::Arc;

use super::helpers::HelperRef;
use crate::coerce::{ClassId, Repr};
use crate::ir::BlockId;

/// Local variable slot declared through [`InstructionSink::declare_local`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(pub u32);

/// Branch target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Label {
    /// The point where a block's contents begin.
    Block(BlockId),
    /// A routine-local label synthesized by the generator.
    Local(u32),
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Block(block) => write!(f, "{}", block),
            Label::Local(n) => write!(f, "L{}", n),
        }
    }
}

/// Branch instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchOp {
    Br,
    BrTrue,
    BrFalse,
    /// Unconditional transfer out of a protected or handler region.
    Leave,
}

impl BranchOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            BranchOp::Br => "br",
            BranchOp::BrTrue => "brtrue",
            BranchOp::BrFalse => "brfalse",
            BranchOp::Leave => "leave",
        }
    }

    pub fn is_conditional(self) -> bool {
        matches!(self, BranchOp::BrTrue | BranchOp::BrFalse)
    }

    /// The conditional branch taken in the opposite case.
    pub fn negate(self) -> BranchOp {
        match self {
            BranchOp::BrTrue => BranchOp::BrFalse,
            BranchOp::BrFalse => BranchOp::BrTrue,
            other => other,
        }
    }

    /// Number of stack slots the branch consumes.
    pub fn pops(self) -> i32 {
        if self.is_conditional() {
            1
        } else {
            0
        }
    }
}

/// Non-branching instructions of the target format.
#[derive(Debug, Clone, PartialEq)]
pub enum Opcode {
    Nop,
    Pop,
    Dup,
    LdcI4(i32),
    LdcI8(i64),
    LdcR8(f64),
    LdStr(Arc<str>),
    LdNull,
    LdArg(u16),
    LdArgA(u16),
    StArg(u16),
    /// Push the ambient execution context (locale, output, globals).
    LdContext,
    LdFld(Arc<str>),
    LdFldA(Arc<str>),
    StFld(Arc<str>),
    Add,
    Sub,
    Mul,
    Ceq,
    Clt,
    /// Unsigned (or unordered) less-than.
    CltUn,
    ConvI4,
    ConvI8,
    ConvR8,
    CastClass(ClassId),
    NewObj(ClassId),
    Ret,
    Throw,
    EndFinally,
}

impl Opcode {
    /// `(pops, pushes)` on the evaluation stack.
    pub fn stack_effect(&self) -> (i32, i32) {
        use Opcode::*;
        match self {
            Nop | EndFinally => (0, 0),
            Pop | StArg(_) | Ret | Throw => (1, 0),
            Dup => (1, 2),
            LdcI4(_) | LdcI8(_) | LdcR8(_) | LdStr(_) | LdNull | LdArg(_) | LdArgA(_)
            | LdContext | NewObj(_) => (0, 1),
            LdFld(_) | LdFldA(_) => (1, 1),
            StFld(_) => (2, 0),
            Add | Sub | Mul | Ceq | Clt | CltUn => (2, 1),
            ConvI4 | ConvI8 | ConvR8 | CastClass(_) => (1, 1),
        }
    }

    /// Whether control never falls through to the next instruction.
    pub fn is_terminator(&self) -> bool {
        matches!(self, Opcode::Ret | Opcode::Throw | Opcode::EndFinally)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Opcode::*;
        match self {
            Nop => f.write_str("nop"),
            Pop => f.write_str("pop"),
            Dup => f.write_str("dup"),
            LdcI4(v) => write!(f, "ldc.i4 {}", v),
            LdcI8(v) => write!(f, "ldc.i8 {}", v),
            LdcR8(v) => write!(f, "ldc.r8 {:?}", v),
            LdStr(s) => write!(f, "ldstr {:?}", s),
            LdNull => f.write_str("ldnull"),
            LdArg(i) => write!(f, "ldarg {}", i),
            LdArgA(i) => write!(f, "ldarga {}", i),
            StArg(i) => write!(f, "starg {}", i),
            LdContext => f.write_str("ldctx"),
            LdFld(name) => write!(f, "ldfld {}", name),
            LdFldA(name) => write!(f, "ldflda {}", name),
            StFld(name) => write!(f, "stfld {}", name),
            Add => f.write_str("add"),
            Sub => f.write_str("sub"),
            Mul => f.write_str("mul"),
            Ceq => f.write_str("ceq"),
            Clt => f.write_str("clt"),
            CltUn => f.write_str("clt.un"),
            ConvI4 => f.write_str("conv.i4"),
            ConvI8 => f.write_str("conv.i8"),
            ConvR8 => f.write_str("conv.r8"),
            CastClass(class) => write!(f, "castclass {}", class),
            NewObj(class) => write!(f, "newobj {}", class),
            Ret => f.write_str("ret"),
            Throw => f.write_str("throw"),
            EndFinally => f.write_str("endfinally"),
        }
    }
}

/// Downstream writer of the target instruction format.
///
/// Every method appends to the output at the current position. Labels must be
/// resolvable in both directions, and [`InstructionSink::mark_label`] binds a
/// label to the exact point the next instruction is written.
pub trait InstructionSink {
    fn emit_opcode(&mut self, op: Opcode);

    fn emit_branch(&mut self, op: BranchOp, target: Label);

    /// Jump table: pops an `int32` index and jumps to `targets[index]`, falling
    /// through when the index is out of range.
    fn emit_switch(&mut self, targets: &[Label]);

    fn mark_label(&mut self, label: Label);

    fn emit_call(&mut self, helper: HelperRef);

    fn declare_local(&mut self, repr: Repr) -> LocalId;

    fn load_local(&mut self, local: LocalId);

    fn store_local(&mut self, local: LocalId);

    fn load_local_address(&mut self, local: LocalId);

    /// Open a protected region.
    fn begin_try(&mut self);

    /// Start a handler of the innermost protected region. The caught exception
    /// is on the stack when the handler begins.
    fn begin_catch(&mut self, class: ClassId);

    fn begin_finally(&mut self);

    /// Close the innermost protected region and all of its handlers.
    fn end_try(&mut self);
}

impl<S: InstructionSink + ?Sized> InstructionSink for &mut S {
    fn emit_opcode(&mut self, op: Opcode) {
        (**self).emit_opcode(op)
    }
    fn emit_branch(&mut self, op: BranchOp, target: Label) {
        (**self).emit_branch(op, target)
    }
    fn emit_switch(&mut self, targets: &[Label]) {
        (**self).emit_switch(targets)
    }
    fn mark_label(&mut self, label: Label) {
        (**self).mark_label(label)
    }
    fn emit_call(&mut self, helper: HelperRef) {
        (**self).emit_call(helper)
    }
    fn declare_local(&mut self, repr: Repr) -> LocalId {
        (**self).declare_local(repr)
    }
    fn load_local(&mut self, local: LocalId) {
        (**self).load_local(local)
    }
    fn store_local(&mut self, local: LocalId) {
        (**self).store_local(local)
    }
    fn load_local_address(&mut self, local: LocalId) {
        (**self).load_local_address(local)
    }
    fn begin_try(&mut self) {
        (**self).begin_try()
    }
    fn begin_catch(&mut self, class: ClassId) {
        (**self).begin_catch(class)
    }
    fn begin_finally(&mut self) {
        (**self).begin_finally()
    }
    fn end_try(&mut self) {
        (**self).end_try()
    }
}

/// Sink wrapper that tracks the evaluation-stack balance.
///
/// Only the balance is modeled; the actual stack contents belong to the
/// target format's verifier.
pub struct DepthTracker<S: InstructionSink> {
    inner: S,
    depth: i32,
    max_depth: i32,
    emitted: usize,
}

impl<S: InstructionSink> DepthTracker<S> {
    pub fn new(inner: S) -> Self {
        Self { inner, depth: 0, max_depth: 0, emitted: 0 }
    }

    /// Current balance relative to the start of the routine.
    pub fn depth(&self) -> i32 {
        self.depth
    }

    pub fn max_depth(&self) -> i32 {
        self.max_depth
    }

    /// Instructions passed through, labels and region markers excluded.
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// Account for values the runtime pushes implicitly, such as the caught
    /// exception at the start of a handler.
    pub fn assume_pushed(&mut self, count: i32) {
        self.depth += count;
        self.max_depth = self.max_depth.max(self.depth);
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn adjust(&mut self, pops: i32, pushes: i32) {
        self.emitted += 1;
        self.depth = self.depth - pops + pushes;
        self.max_depth = self.max_depth.max(self.depth);
    }
}

impl<S: InstructionSink> InstructionSink for DepthTracker<S> {
    fn emit_opcode(&mut self, op: Opcode) {
        let (pops, pushes) = op.stack_effect();
        self.adjust(pops, pushes);
        self.inner.emit_opcode(op);
    }

    fn emit_branch(&mut self, op: BranchOp, target: Label) {
        self.adjust(op.pops(), 0);
        self.inner.emit_branch(op, target);
    }

    fn emit_switch(&mut self, targets: &[Label]) {
        self.adjust(1, 0);
        self.inner.emit_switch(targets);
    }

    fn mark_label(&mut self, label: Label) {
        self.inner.mark_label(label);
    }

    fn emit_call(&mut self, helper: HelperRef) {
        let (args, returns) = helper.helper.signature();
        self.adjust(args, returns as i32);
        self.inner.emit_call(helper);
    }

    fn declare_local(&mut self, repr: Repr) -> LocalId {
        self.inner.declare_local(repr)
    }

    fn load_local(&mut self, local: LocalId) {
        self.adjust(0, 1);
        self.inner.load_local(local);
    }

    fn store_local(&mut self, local: LocalId) {
        self.adjust(1, 0);
        self.inner.store_local(local);
    }

    fn load_local_address(&mut self, local: LocalId) {
        self.adjust(0, 1);
        self.inner.load_local_address(local);
    }

    fn begin_try(&mut self) {
        self.inner.begin_try();
    }

    fn begin_catch(&mut self, class: ClassId) {
        self.inner.begin_catch(class);
    }

    fn begin_finally(&mut self) {
        self.inner.begin_finally();
    }

    fn end_try(&mut self) {
        self.inner.end_try();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::helpers::Helper;
    use crate::core::Listing;

    #[test]
    fn test_depth_tracking() {
        let mut sink = DepthTracker::new(Listing::new());
        sink.emit_opcode(Opcode::LdcI8(1));
        sink.emit_opcode(Opcode::LdcI8(2));
        assert_eq!(sink.depth(), 2);
        sink.emit_opcode(Opcode::Ceq);
        assert_eq!(sink.depth(), 1);
        sink.emit_branch(BranchOp::BrTrue, Label::Local(0));
        assert_eq!(sink.depth(), 0);
        assert_eq!(sink.max_depth(), 2);
    }

    #[test]
    fn test_helper_call_effect() {
        let mut sink = DepthTracker::new(Listing::new());
        sink.emit_opcode(Opcode::LdcR8(1.5));
        sink.emit_opcode(Opcode::LdContext);
        sink.emit_call(HelperRef { id: 0, helper: Helper::convert(crate::core::helpers::Coercion::ToString, Repr::Double) });
        assert_eq!(sink.depth(), 1);
    }

    #[test]
    fn test_branch_negate() {
        assert_eq!(BranchOp::BrTrue.negate(), BranchOp::BrFalse);
        assert_eq!(BranchOp::Leave.negate(), BranchOp::Leave);
        assert_eq!(BranchOp::Br.pops(), 0);
    }
}
