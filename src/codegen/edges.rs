//! Lowering of block edges.
//!
//! Every edge kind is handled here; structurally malformed edges are
//! reported as [`ErrorKind::UnsupportedEdge`].

use log::debug;

use super::{CodeGenerator, ScopeKind};
use crate::coerce::{Repr, TypeHint};
use crate::core::{BranchOp, ErrorKind, Helper, InstructionSink, Label, Opcode};
use crate::ir::{BlockId, CatchHandler, Edge, Expr, Literal, SwitchCase, VarId};

impl<'g, 'arena, S: InstructionSink> CodeGenerator<'g, 'arena, S> {
    /// Lower the edge leaving block `from`.
    pub(super) fn emit_edge(&mut self, from: BlockId, edge: &'g Edge) -> Result<(), ErrorKind> {
        match edge {
            Edge::Simple { target } => self.continue_with(*target),
            Edge::Conditional { condition, if_true, if_false } => {
                self.emit_expr_as(condition, Repr::Bool)?;
                self.branch_to(*if_false, BranchOp::BrFalse)?;
                self.continue_with(*if_true)
            }
            Edge::TryCatch { body, handlers, finally, next } => {
                self.emit_try(edge, *body, handlers, *finally, *next)
            }
            Edge::ForeachEnumeree { enumeree, move_next } => {
                self.emit_expr_as(enumeree, Repr::Value)?;
                self.call(Helper::GetEnumerator);
                let local = self.out.declare_local(Repr::Object(None));
                self.out.store_local(local);
                if let Some(slot) = self.enumerators.get_mut(from.index()) {
                    *slot = Some(local);
                }
                self.continue_with(*move_next)
            }
            Edge::ForeachMoveNext { enumeree, value, key, body, after } => {
                self.emit_move_next(edge, *enumeree, *value, *key, *body, *after)
            }
            Edge::Switch { value, cases, default } => self.emit_switch(value, cases, *default),
        }
    }

    /// Protected region, its handlers and optional finally, in ordinal
    /// order: `[body, handler 1) [handler 1, handler 2) ... [finally, next)`.
    fn emit_try(
        &mut self,
        edge: &Edge,
        body: BlockId,
        handlers: &[CatchHandler],
        finally: Option<BlockId>,
        next: BlockId,
    ) -> Result<(), ErrorKind> {
        if handlers.is_empty() && finally.is_none() {
            return Err(ErrorKind::UnsupportedEdge {
                kind: edge.kind_name(),
                reason: "protected region has neither a handler nor a finally".to_string(),
            });
        }

        let mut bounds = vec![body.ordinal()];
        bounds.extend(handlers.iter().map(|h| h.target.ordinal()));
        bounds.extend(finally.map(BlockId::ordinal));
        bounds.push(next.ordinal());
        if bounds.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ErrorKind::UnsupportedEdge {
                kind: edge.kind_name(),
                reason: format!("regions are not in ordinal order: {:?}", bounds),
            });
        }
        debug!(
            "{}: try region [{}, {}) with {} handler(s){}",
            self.graph.name,
            bounds[0],
            bounds[1],
            handlers.len(),
            if finally.is_some() { " and finally" } else { "" }
        );

        self.out.begin_try();
        self.generate_scope(body, ScopeKind::Try, bounds[1])?;

        for (i, handler) in handlers.iter().enumerate() {
            self.out.begin_catch(handler.class);
            self.out.assume_pushed(1);
            match handler.var {
                Some(var) => {
                    let place = self.place(var)?;
                    self.store_top(&place, Repr::Object(Some(handler.class)), TypeHint::OBJECT)?;
                }
                None => self.op(Opcode::Pop),
            }
            self.generate_scope(handler.target, ScopeKind::Catch, bounds[i + 2])?;
        }

        if let Some(finally) = finally {
            self.out.begin_finally();
            self.generate_scope(finally, ScopeKind::Finally, next.ordinal())?;
        }
        self.out.end_try();

        self.continue_with(next)
    }

    fn emit_move_next(
        &mut self,
        edge: &Edge,
        enumeree: BlockId,
        value: VarId,
        key: Option<VarId>,
        body: BlockId,
        after: BlockId,
    ) -> Result<(), ErrorKind> {
        let Some(local) = self.enumerators.get(enumeree.index()).copied().flatten() else {
            return Err(ErrorKind::UnsupportedEdge {
                kind: edge.kind_name(),
                reason: format!("no enumerator has been acquired in {}", enumeree),
            });
        };

        self.out.load_local(local);
        self.call(Helper::EnumeratorMoveNext);
        self.branch_to(after, BranchOp::BrFalse)?;

        self.out.load_local(local);
        self.call(Helper::EnumeratorCurrentValue);
        let place = self.place(value)?;
        self.store_top(&place, Repr::Value, TypeHint::ANY)?;

        if let Some(key) = key {
            self.out.load_local(local);
            self.call(Helper::EnumeratorCurrentKey);
            let place = self.place(key)?;
            self.store_top(&place, Repr::Value, TypeHint::ANY)?;
        }

        self.continue_with(body)
    }

    fn emit_switch(
        &mut self,
        value: &Expr,
        cases: &[SwitchCase],
        default: BlockId,
    ) -> Result<(), ErrorKind> {
        if let Some((min, max)) = self.jump_table_range(value, cases, default) {
            return self.emit_jump_table(value, cases, default, min, max);
        }

        let int_compare = value.hint == TypeHint::INT64;
        let repr = if int_compare { Repr::Int64 } else { Repr::Value };
        self.emit_expr_as(value, repr)?;
        let scratch = self.temp(repr);
        self.out.store_local(scratch);

        for case in cases {
            self.out.load_local(scratch);
            match (&case.value, int_compare) {
                (Literal::Int(v), true) => {
                    self.op(Opcode::LdcI8(*v));
                    self.op(Opcode::Ceq);
                }
                (literal, _) => {
                    if int_compare {
                        self.convert(Repr::Int64, TypeHint::INT64, Repr::Value)?;
                    }
                    self.emit_expr_as(&Expr::literal(literal.clone()), Repr::Value)?;
                    self.call(Helper::LooseEquals);
                }
            }
            self.branch_to(case.target, BranchOp::BrTrue)?;
        }

        self.continue_with(default)
    }

    /// Case value range `[min, max]` when the switch is lowered to a jump
    /// table.
    fn jump_table_range(
        &self,
        value: &Expr,
        cases: &[SwitchCase],
        default: BlockId,
    ) -> Option<(i64, i64)> {
        if !self.options.emit_jump_tables
            || cases.len() < self.options.jump_table_min_cases
            || value.hint != TypeHint::INT64
        {
            return None;
        }
        let mut values = Vec::with_capacity(cases.len());
        for case in cases {
            match case.value {
                Literal::Int(v) => values.push(v),
                _ => return None,
            }
        }
        let min = *values.iter().min()?;
        let max = *values.iter().max()?;
        let span = max as i128 - min as i128 + 1;
        if span > self.options.jump_table_density as i128 * cases.len() as i128 {
            return None;
        }
        let local = cases.iter().map(|c| c.target).chain(Some(default)).all(|t| self.current_contains(t));
        local.then_some((min, max))
    }

    fn emit_jump_table(
        &mut self,
        value: &Expr,
        cases: &[SwitchCase],
        default: BlockId,
        min: i64,
        max: i64,
    ) -> Result<(), ErrorKind> {
        let graph = self.graph;
        let live = |target: BlockId| graph.block(target).is_some_and(|b| !b.dead);
        debug!("{}: jump table over [{}, {}] with {} case(s)", graph.name, min, max, cases.len());

        self.emit_expr_as(value, Repr::Int64)?;
        if min != 0 {
            self.op(Opcode::LdcI8(min));
            self.op(Opcode::Sub);
        }
        // Values outside [min, max] must not be narrowed into the table.
        let index = self.temp(Repr::Int64);
        self.out.store_local(index);
        self.out.load_local(index);
        self.op(Opcode::LdcI8(max - min + 1));
        self.op(Opcode::CltUn);
        self.branch_to(default, BranchOp::BrFalse)?;
        self.out.load_local(index);
        self.op(Opcode::ConvI4);

        let mut targets = Vec::with_capacity((max - min + 1) as usize);
        for v in min..=max {
            let target = cases
                .iter()
                .find(|c| c.value == Literal::Int(v))
                .map(|c| c.target)
                .filter(|t| live(*t))
                .unwrap_or(default);
            targets.push(target);
        }
        let labels: Vec<Label> = targets.iter().copied().map(Label::Block).collect();
        self.stats.branches += 1;
        self.stats.jump_tables += 1;
        self.out.emit_switch(&labels);

        for target in targets {
            self.schedule(target)?;
        }
        self.continue_with(default)
    }
}
