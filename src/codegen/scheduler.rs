// This file implements the scope-aware worklist scheduler. Scopes mirror the lexical and
// exception regions of the source: each covers a half-open ordinal range and owns the set of
// blocks that belong to it but have not been emitted yet. continue_with() emits a block in
// place when it belongs to the open scope, closes a back edge with a branch when the block
// was already emitted, and otherwise branches out and hands the block to the innermost
// enclosing scope that owns it. generate_scope() drains a scope's pending set in ascending
// ordinal order, so the output is a deterministic function of the graph. The exit opcode is
// chosen from the regions a transfer crosses: a plain branch inside one region, leave out of
// a protected or handler region, endfinally at the end of a finally handler. Emission and
// queue markers live in arena side tables indexed by block, never on the graph.

use std::collections::BTreeSet;
use std::fmt;

use log::{debug, trace};

use super::CodeGenerator;
use crate::coerce::Repr;
use crate::core::{BranchOp, ErrorKind, Helper, InstructionSink, Label, Opcode};
use crate::ir::{Block, BlockId};

/// Kind of a scheduling region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    Routine,
    Try,
    Catch,
    Finally,
}

impl ScopeKind {
    pub fn name(self) -> &'static str {
        match self {
            ScopeKind::Routine => "routine",
            ScopeKind::Try => "try",
            ScopeKind::Catch => "catch",
            ScopeKind::Finally => "finally",
        }
    }

    /// Regions that can only be left with `leave`.
    pub fn is_protected(self) -> bool {
        matches!(self, ScopeKind::Try | ScopeKind::Catch)
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An open region `[from, to)` and its not yet emitted blocks.
#[derive(Debug)]
pub(super) struct Scope {
    pub(super) kind: ScopeKind,
    pub(super) from: u32,
    pub(super) to: u32,
    pending: BTreeSet<u32>,
}

impl Scope {
    fn new(kind: ScopeKind, from: u32, to: u32) -> Self {
        Self { kind, from, to, pending: BTreeSet::new() }
    }

    pub(super) fn contains(&self, ordinal: u32) -> bool {
        self.from <= ordinal && ordinal < self.to
    }
}

/// Per-block scheduler state for one generation pass.
#[derive(Debug, Clone, Copy, Default)]
pub(super) struct BlockMark {
    pub(super) emitted: bool,
    pub(super) queued: bool,
}

/// How control leaves the open scope towards a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Branch(BranchOp),
    EndFinally,
}

impl<'g, 'arena, S: InstructionSink> CodeGenerator<'g, 'arena, S> {
    /// Emit `entry` and everything owned by a new `kind` scope
    /// `[entry, to)`, then close the scope.
    pub(super) fn generate_scope(
        &mut self,
        entry: BlockId,
        kind: ScopeKind,
        to: u32,
    ) -> Result<(), ErrorKind> {
        let from = entry.ordinal();
        debug!("{}: open {} scope [{}, {})", self.graph.name, kind, from, to);
        if kind != ScopeKind::Routine {
            self.stats.scopes_opened += 1;
        }

        self.unqueue(entry);
        self.scopes.push(Scope::new(kind, from, to));
        self.visit(entry, false)?;

        while let Some(ordinal) = self.scopes.last_mut().and_then(|s| s.pending.pop_first()) {
            let block = BlockId(ordinal);
            self.mark_mut(block)?.queued = false;
            if self.mark(block).emitted {
                continue;
            }
            self.visit(block, false)?;
        }

        self.scopes.pop();
        debug!("{}: close {} scope [{}, {})", self.graph.name, kind, from, to);

        let depth = self.out.depth();
        if depth != 0 {
            return Err(ErrorKind::StackImbalance { depth, scope: kind });
        }
        Ok(())
    }

    /// Continue control flow with `block` from the current position.
    pub(super) fn continue_with(&mut self, block: BlockId) -> Result<(), ErrorKind> {
        self.visit(block, true)
    }

    fn visit(&mut self, id: BlockId, via_edge: bool) -> Result<(), ErrorKind> {
        let graph = self.graph;
        let block = graph.block(id).ok_or(ErrorKind::DanglingBlock { block: id })?;

        if self.mark(id).emitted {
            trace!("back edge to {}", id);
            self.stats.back_edges += 1;
            return self.exit_branch(id);
        }
        if block.dead {
            trace!("skip dead block {}", id);
            return Ok(());
        }

        let ordinal = id.ordinal();
        let (kind, from, to) = self.current_scope();
        if ordinal < from {
            return Err(ErrorKind::ScopeViolation { block: id, scope: kind, from });
        }
        if ordinal < to {
            self.unqueue(id);
            self.mark_mut(id)?.emitted = true;
            if via_edge {
                self.stats.fallthroughs += 1;
            }
            return self.emit_block(block);
        }

        self.exit_branch(id)?;
        self.enqueue_outer(id)
    }

    /// Conditional branch to `target`, consuming the value on the stack.
    pub(super) fn branch_to(&mut self, target: BlockId, op: BranchOp) -> Result<(), ErrorKind> {
        let graph = self.graph;
        let block = graph.block(target).ok_or(ErrorKind::DanglingBlock { block: target })?;
        if block.dead {
            self.op(Opcode::Pop);
            return Ok(());
        }

        let ordinal = target.ordinal();
        let (kind, from, to) = self.current_scope();
        let emitted = self.mark(target).emitted;
        if !emitted && ordinal < from {
            return Err(ErrorKind::ScopeViolation { block: target, scope: kind, from });
        }
        if from <= ordinal && ordinal < to {
            self.branch(op, Label::Block(target));
            return self.schedule(target);
        }

        // A conditional branch cannot leave a region: jump over an
        // unconditional exit instead.
        debug!("{}: conditional exit to {} through a trampoline", self.graph.name, target);
        let skip = self.fresh_label();
        self.branch(op.negate(), skip);
        self.continue_with(target)?;
        self.out.mark_label(skip);
        Ok(())
    }

    /// Make sure `block` is emitted eventually by the scope that owns it.
    pub(super) fn schedule(&mut self, block: BlockId) -> Result<(), ErrorKind> {
        let graph = self.graph;
        let dead = graph.block(block).ok_or(ErrorKind::DanglingBlock { block })?.dead;
        if dead || self.mark(block).emitted {
            return Ok(());
        }
        let ordinal = block.ordinal();
        match self.scopes.last() {
            Some(scope) if scope.contains(ordinal) => {
                self.unqueue(block);
                if let Some(scope) = self.scopes.last_mut() {
                    scope.pending.insert(ordinal);
                }
                self.mark_mut(block)?.queued = true;
                Ok(())
            }
            _ => self.enqueue_outer(block),
        }
    }

    /// Hand `block` to the innermost enclosing scope whose range owns it.
    fn enqueue_outer(&mut self, block: BlockId) -> Result<(), ErrorKind> {
        if self.mark(block).queued {
            return Ok(());
        }
        let ordinal = block.ordinal();
        let outer = self.scopes.len().saturating_sub(1);
        let Some(index) = self.scopes[..outer].iter().rposition(|s| s.contains(ordinal)) else {
            let (kind, from) = self
                .scopes
                .first()
                .map_or((ScopeKind::Routine, 0), |s| (s.kind, s.from));
            return Err(ErrorKind::ScopeViolation { block, scope: kind, from });
        };
        let owner = &mut self.scopes[index];
        trace!("defer {} to {} scope [{}, {})", block, owner.kind, owner.from, owner.to);
        owner.pending.insert(ordinal);
        self.mark_mut(block)?.queued = true;
        self.stats.deferred += 1;
        Ok(())
    }

    fn unqueue(&mut self, block: BlockId) {
        let Some(mark) = self.marks.get_mut(block.index()) else { return };
        if !mark.queued {
            return;
        }
        mark.queued = false;
        for scope in &mut self.scopes {
            scope.pending.remove(&block.ordinal());
        }
    }

    /// Unconditional transfer from the open scope to `target`.
    fn exit_branch(&mut self, target: BlockId) -> Result<(), ErrorKind> {
        match self.exit_to(target.ordinal()) {
            Exit::Branch(op) => self.branch(op, Label::Block(target)),
            Exit::EndFinally => self.op(Opcode::EndFinally),
        }
        Ok(())
    }

    fn exit_to(&self, ordinal: u32) -> Exit {
        let mut crossed = self.scopes.iter().rev().take_while(|s| !s.contains(ordinal));
        let Some(innermost) = crossed.next() else {
            return Exit::Branch(BranchOp::Br);
        };
        if innermost.kind == ScopeKind::Finally {
            return Exit::EndFinally;
        }
        let leaves = innermost.kind.is_protected() || crossed.any(|s| s.kind.is_protected());
        Exit::Branch(if leaves { BranchOp::Leave } else { BranchOp::Br })
    }

    /// Kind and range of the open scope; the whole routine when none is.
    pub(super) fn current_scope(&self) -> (ScopeKind, u32, u32) {
        self.scopes
            .last()
            .map_or((ScopeKind::Routine, 0, self.graph.len() as u32), |s| (s.kind, s.from, s.to))
    }

    pub(super) fn current_contains(&self, block: BlockId) -> bool {
        let (_, from, to) = self.current_scope();
        from <= block.ordinal() && block.ordinal() < to
    }

    fn mark(&self, block: BlockId) -> BlockMark {
        self.marks.get(block.index()).copied().unwrap_or_default()
    }

    fn mark_mut(&mut self, block: BlockId) -> Result<&mut BlockMark, ErrorKind> {
        self.marks.get_mut(block.index()).ok_or(ErrorKind::DanglingBlock { block })
    }

    /// Label, statements and outgoing edge of `block`.
    fn emit_block(&mut self, block: &'g Block) -> Result<(), ErrorKind> {
        trace!("emit {} ({})", block.id, block.name);
        self.out.mark_label(Label::Block(block.id));
        self.stats.blocks_emitted += 1;

        for stmt in &block.statements {
            self.span = stmt.span.or(self.span);
            self.emit_stmt(stmt)?;
        }
        if block.ends_in_terminal() {
            return Ok(());
        }
        match &block.edge {
            Some(edge) => self.emit_edge(block.id, edge),
            None => self.emit_fall_off(),
        }
    }

    /// End of a block without an edge: the end of a finally handler, or an
    /// implicit `return null`.
    fn emit_fall_off(&mut self) -> Result<(), ErrorKind> {
        if self.current_scope().0 == ScopeKind::Finally {
            self.op(Opcode::EndFinally);
            return Ok(());
        }
        self.call(Helper::NullValue);
        self.emit_return()
    }

    /// Return the value on the stack from the routine.
    pub(super) fn emit_return(&mut self) -> Result<(), ErrorKind> {
        if self.scopes.iter().any(|s| s.kind == ScopeKind::Finally) {
            return Err(ErrorKind::InvalidRegionExit { region: ScopeKind::Finally });
        }
        if !self.scopes.iter().any(|s| s.kind.is_protected()) {
            self.op(Opcode::Ret);
            return Ok(());
        }
        let (local, label) = match self.return_slot {
            Some(slot) => slot,
            None => {
                let slot = (self.out.declare_local(Repr::Value), self.fresh_label());
                self.return_slot = Some(slot);
                slot
            }
        };
        self.out.store_local(local);
        self.branch(BranchOp::Leave, label);
        Ok(())
    }

    /// Shared exit of returns from protected regions, placed after the
    /// routine body.
    pub(super) fn emit_return_slot(&mut self) {
        if let Some((local, label)) = self.return_slot {
            self.out.mark_label(label);
            self.out.load_local(local);
            self.op(Opcode::Ret);
        }
    }

    pub(super) fn fresh_label(&mut self) -> Label {
        let label = Label::Local(self.next_label);
        self.next_label += 1;
        label
    }
}
