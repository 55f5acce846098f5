//! Recording instruction sink.
//!
//! [`Listing`] keeps every sink call as an [`Insn`] so tests and the dump tool
//! can inspect the linearized stream. Rendering against the routine graph
//! replaces block ordinals and class ids by their names.

use std::fmt::{self, Write as _};

use super::helpers::HelperRef;
use super::sink::{BranchOp, InstructionSink, Label, LocalId, Opcode};
use crate::coerce::{ClassId, Repr};
use crate::ir::{BlockId, RoutineGraph};

/// One recorded sink call.
#[derive(Debug, Clone, PartialEq)]
pub enum Insn {
    Op(Opcode),
    Branch(BranchOp, Label),
    Switch(Vec<Label>),
    Label(Label),
    Call(HelperRef),
    LoadLocal(LocalId),
    StoreLocal(LocalId),
    LoadLocalAddress(LocalId),
    BeginTry,
    BeginCatch(ClassId),
    BeginFinally,
    EndTry,
}

impl Insn {
    pub fn is_branch(&self) -> bool {
        matches!(self, Insn::Branch(..) | Insn::Switch(_))
    }
}

/// In-memory instruction stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Listing {
    insns: Vec<Insn>,
    locals: Vec<Repr>,
}

impl Listing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insns(&self) -> &[Insn] {
        &self.insns
    }

    pub fn locals(&self) -> &[Repr] {
        &self.locals
    }

    pub fn len(&self) -> usize {
        self.insns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insns.is_empty()
    }

    /// Blocks in the order their labels were marked.
    pub fn block_order(&self) -> Vec<BlockId> {
        self.insns
            .iter()
            .filter_map(|insn| match insn {
                Insn::Label(Label::Block(block)) => Some(*block),
                _ => None,
            })
            .collect()
    }

    /// Position of the label marking `block`, if it was emitted.
    pub fn label_position(&self, block: BlockId) -> Option<usize> {
        self.insns
            .iter()
            .position(|insn| *insn == Insn::Label(Label::Block(block)))
    }

    /// Number of branch instructions (including jump tables).
    pub fn branch_count(&self) -> usize {
        self.insns.iter().filter(|insn| insn.is_branch()).count()
    }

    /// Branches targeting `block`.
    pub fn branches_to(&self, block: BlockId) -> Vec<BranchOp> {
        self.insns
            .iter()
            .filter_map(|insn| match insn {
                Insn::Branch(op, Label::Block(target)) if *target == block => Some(*op),
                _ => None,
            })
            .collect()
    }

    /// Render with block and class names from `graph`.
    pub fn render(&self, graph: &RoutineGraph) -> String {
        let mut out = String::new();
        let block_name = |label: &Label| match label {
            Label::Block(block) => graph
                .block(*block)
                .map(|b| b.name.clone())
                .unwrap_or_else(|| block.to_string()),
            Label::Local(n) => format!("L{}", n),
        };
        let class_name = |class: ClassId| {
            graph
                .class_name(class)
                .map(str::to_string)
                .unwrap_or_else(|| class.to_string())
        };
        let _ = writeln!(out, "routine {}", graph.name);
        let mut indent = 1;
        for insn in &self.insns {
            match insn {
                Insn::Label(label) => {
                    let _ = writeln!(out, "{}{}:", "  ".repeat(indent - 1), block_name(label));
                    continue;
                }
                Insn::BeginCatch(_) | Insn::BeginFinally | Insn::EndTry => {
                    indent = indent.saturating_sub(1).max(1)
                }
                _ => {}
            }
            let pad = "  ".repeat(indent);
            let line = match insn {
                Insn::Op(Opcode::CastClass(class)) => format!("castclass {}", class_name(*class)),
                Insn::Op(Opcode::NewObj(class)) => format!("newobj {}", class_name(*class)),
                Insn::Branch(op, target) => format!("{} {}", op.mnemonic(), block_name(target)),
                Insn::Switch(targets) => format!(
                    "switch ({})",
                    targets.iter().map(|t| block_name(t)).collect::<Vec<_>>().join(", ")
                ),
                Insn::BeginCatch(class) => format!("}} catch {} {{", class_name(*class)),
                other => other.to_string(),
            };
            let _ = writeln!(out, "{}{}", pad, line);
            match insn {
                Insn::BeginTry | Insn::BeginCatch(_) | Insn::BeginFinally => indent += 1,
                _ => {}
            }
        }
        out
    }
}

impl fmt::Display for Insn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Insn::Op(op) => write!(f, "{}", op),
            Insn::Branch(op, target) => write!(f, "{} {}", op.mnemonic(), target),
            Insn::Switch(targets) => {
                f.write_str("switch (")?;
                for (i, target) in targets.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", target)?;
                }
                f.write_str(")")
            }
            Insn::Label(label) => write!(f, "{}:", label),
            Insn::Call(helper) => write!(f, "call {}", helper.helper),
            Insn::LoadLocal(local) => write!(f, "ldloc {}", local.0),
            Insn::StoreLocal(local) => write!(f, "stloc {}", local.0),
            Insn::LoadLocalAddress(local) => write!(f, "ldloca {}", local.0),
            Insn::BeginTry => f.write_str(".try {"),
            Insn::BeginCatch(class) => write!(f, "}} catch {} {{", class),
            Insn::BeginFinally => f.write_str("} finally {"),
            Insn::EndTry => f.write_str("}"),
        }
    }
}

impl fmt::Display for Listing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for insn in &self.insns {
            writeln!(f, "{}", insn)?;
        }
        Ok(())
    }
}

impl InstructionSink for Listing {
    fn emit_opcode(&mut self, op: Opcode) {
        self.insns.push(Insn::Op(op));
    }

    fn emit_branch(&mut self, op: BranchOp, target: Label) {
        self.insns.push(Insn::Branch(op, target));
    }

    fn emit_switch(&mut self, targets: &[Label]) {
        self.insns.push(Insn::Switch(targets.to_vec()));
    }

    fn mark_label(&mut self, label: Label) {
        self.insns.push(Insn::Label(label));
    }

    fn emit_call(&mut self, helper: HelperRef) {
        self.insns.push(Insn::Call(helper));
    }

    fn declare_local(&mut self, repr: Repr) -> LocalId {
        self.locals.push(repr);
        LocalId(self.locals.len() as u32 - 1)
    }

    fn load_local(&mut self, local: LocalId) {
        self.insns.push(Insn::LoadLocal(local));
    }

    fn store_local(&mut self, local: LocalId) {
        self.insns.push(Insn::StoreLocal(local));
    }

    fn load_local_address(&mut self, local: LocalId) {
        self.insns.push(Insn::LoadLocalAddress(local));
    }

    fn begin_try(&mut self) {
        self.insns.push(Insn::BeginTry);
    }

    fn begin_catch(&mut self, class: ClassId) {
        self.insns.push(Insn::BeginCatch(class));
    }

    fn begin_finally(&mut self) {
        self.insns.push(Insn::BeginFinally);
    }

    fn end_try(&mut self) {
        self.insns.push(Insn::EndTry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::GraphBuilder;

    #[test]
    fn test_listing_records_locals_and_labels() {
        let mut listing = Listing::new();
        let a = listing.declare_local(Repr::Int64);
        let b = listing.declare_local(Repr::Value);
        assert_eq!(a, LocalId(0));
        assert_eq!(b, LocalId(1));
        listing.mark_label(Label::Block(BlockId(0)));
        listing.emit_branch(BranchOp::Br, Label::Block(BlockId(3)));
        listing.mark_label(Label::Block(BlockId(3)));
        assert_eq!(listing.block_order(), vec![BlockId(0), BlockId(3)]);
        assert_eq!(listing.branch_count(), 1);
        assert_eq!(listing.branches_to(BlockId(3)), vec![BranchOp::Br]);
        assert_eq!(listing.label_position(BlockId(3)), Some(2));
    }

    #[test]
    fn test_render_uses_names() {
        let mut builder = GraphBuilder::new("render");
        let entry = builder.block("entry");
        let exc = builder.class("Exception");
        let graph = builder.finish();

        let mut listing = Listing::new();
        listing.mark_label(Label::Block(entry));
        listing.begin_try();
        listing.emit_opcode(Opcode::Nop);
        listing.begin_catch(exc);
        listing.emit_opcode(Opcode::Pop);
        listing.end_try();

        let text = listing.render(&graph);
        assert!(text.contains("entry:"));
        assert!(text.contains("} catch Exception {"));
        assert!(text.contains("    nop"));
    }
}
