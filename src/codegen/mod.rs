// This module drives code generation for one routine. CodeGenerator walks the bound graph
// through the scheduler (scheduler.rs), lowers each edge kind (edges.rs), and lowers
// statements and expressions here. Every value is produced in its natural representation and
// then converted with the coercion engine to what its consumer needs; variables that live in
// an addressable place of union representation are converted through their address instead
// of being loaded. All output goes through a DepthTracker wrapped around the caller's sink,
// so stack balance can be verified at every scope close. Errors are plain ErrorKinds inside
// the generator and are attributed to the routine and the statement being generated when
// they leave generate().

//! Routine code generation.
//!
//! ```text
//! RoutineGraph ──▶ CodeGenerator ──▶ DepthTracker ──▶ InstructionSink
//!                   │  scheduler: scopes, pending sets, exits
//!                   │  edges: conditional, try, foreach, switch
//!                   └─ coerce: plan(), plan_by_address(), Place
//! ```

mod edges;
mod scheduler;

pub use scheduler::ScopeKind;

use bumpalo::collections::Vec as BumpVec;
use hashbrown::HashMap;
use log::{debug, info, trace};

use crate::coerce::{self, Conversion, Place, Repr, Step, TypeHint};
use crate::config::CodegenOptions;
use crate::core::{
    ArithOp, BranchOp, CodegenError, CompilationSession, CompileResult, DepthTracker, ErrorKind,
    Helper, HelperResolver, InstructionSink, Label, LocalId, Opcode, RoutineStats,
};
use crate::ir::{
    BinaryOp, Expr, ExprKind, Literal, RoutineGraph, Span, Stmt, StmtKind, VarId,
    VarStorage,
};
use scheduler::{BlockMark, Scope};

/// Generates the instruction stream of one routine into a sink.
pub struct CodeGenerator<'g, 'arena, S: InstructionSink> {
    graph: &'g RoutineGraph,
    session: &'g CompilationSession<'arena>,
    helpers: &'g dyn HelperResolver,
    options: &'g CodegenOptions,
    out: DepthTracker<S>,

    /// Open scopes, innermost last.
    scopes: Vec<Scope>,
    /// Emission and queue markers, indexed by block.
    marks: BumpVec<'arena, BlockMark>,
    /// Enumerator locals, indexed by the block acquiring them.
    enumerators: BumpVec<'arena, Option<LocalId>>,
    /// Storage of each variable, indexed by [`VarId`].
    places: Vec<Place>,
    /// Spill locals, reused per representation.
    temps: HashMap<Repr, LocalId>,
    /// Local and label shared by returns from protected regions.
    return_slot: Option<(LocalId, Label)>,
    next_label: u32,
    /// Source position of the statement being generated.
    span: Option<Span>,
    stats: RoutineStats,
}

impl<'g, 'arena, S: InstructionSink> CodeGenerator<'g, 'arena, S> {
    pub fn new(
        graph: &'g RoutineGraph,
        session: &'g CompilationSession<'arena>,
        helpers: &'g dyn HelperResolver,
        options: &'g CodegenOptions,
        sink: S,
    ) -> Self {
        let arena = session.arena();
        let mut marks = BumpVec::with_capacity_in(graph.len(), arena);
        marks.resize(graph.len(), BlockMark::default());
        let mut enumerators = BumpVec::with_capacity_in(graph.len(), arena);
        enumerators.resize(graph.len(), None);

        Self {
            graph,
            session,
            helpers,
            options,
            out: DepthTracker::new(sink),
            scopes: Vec::new(),
            marks,
            enumerators,
            places: Vec::with_capacity(graph.variables.len()),
            temps: HashMap::new(),
            return_slot: None,
            next_label: 0,
            span: None,
            stats: RoutineStats::default(),
        }
    }

    /// Generate the whole routine and hand back the sink.
    pub fn generate(mut self) -> CompileResult<S> {
        let name = self.graph.name.as_str();
        self.session.set_current_routine(name);

        match self.generate_routine() {
            Ok(()) => {
                self.stats.instructions = self.out.emitted();
                info!(
                    "generated {}: {} blocks, {} instructions, {} branches, max stack {}",
                    name,
                    self.stats.blocks_emitted,
                    self.stats.instructions,
                    self.stats.branches,
                    self.out.max_depth()
                );
                self.session.record_routine(name, &self.stats);
                Ok(self.out.into_inner())
            }
            Err(kind) => {
                self.session.record_failure();
                Err(CodegenError::new(name, self.span, kind))
            }
        }
    }

    fn generate_routine(&mut self) -> Result<(), ErrorKind> {
        let entry = self.graph.entry();
        if self.graph.block(entry).is_none() {
            return Err(ErrorKind::DanglingBlock { block: entry });
        }
        self.declare_places();
        self.generate_scope(entry, ScopeKind::Routine, self.graph.len() as u32)?;
        self.emit_return_slot();
        Ok(())
    }

    fn declare_places(&mut self) {
        let graph = self.graph;
        for var in &graph.variables {
            let place = match var.storage {
                VarStorage::Local => Place::Local {
                    local: self.out.declare_local(var.repr),
                    repr: var.repr,
                    hint: var.hint,
                },
                VarStorage::Param(index) => Place::Param { index, repr: var.repr, hint: var.hint },
                VarStorage::Global => Place::Field {
                    name: self.session.intern_str(&var.name).into(),
                    repr: var.repr,
                    hint: var.hint,
                },
            };
            self.places.push(place);
        }
        debug!("{}: {} variable(s) placed", graph.name, self.places.len());
    }

    fn place(&self, var: VarId) -> Result<Place, ErrorKind> {
        self.places
            .get(var.0 as usize)
            .cloned()
            .ok_or(ErrorKind::DanglingVariable { var: var.0 })
    }

    fn temp(&mut self, repr: Repr) -> LocalId {
        *self.temps.entry(repr).or_insert_with(|| self.out.declare_local(repr))
    }

    // ---- sink plumbing ----------------------------------------------------

    fn op(&mut self, op: Opcode) {
        self.out.emit_opcode(op);
    }

    fn branch(&mut self, op: BranchOp, target: Label) {
        trace!("{} {}", op.mnemonic(), target);
        self.stats.branches += 1;
        self.out.emit_branch(op, target);
    }

    /// Call `helper`, passing the execution context last when it needs it.
    fn call(&mut self, helper: Helper) {
        if helper.needs_context() {
            self.op(Opcode::LdContext);
        }
        self.call_resolved(helper);
    }

    fn call_resolved(&mut self, helper: Helper) {
        let resolved = self.helpers.resolve(helper);
        self.stats.helper_calls += 1;
        self.out.emit_call(resolved);
    }

    // ---- conversions ------------------------------------------------------

    fn convert(&mut self, from: Repr, hint: TypeHint, to: Repr) -> Result<(), ErrorKind> {
        let conversion = coerce::plan(from, hint, to)?;
        self.emit_conversion(&conversion);
        Ok(())
    }

    fn emit_conversion(&mut self, conversion: &Conversion) {
        if conversion.is_identity() {
            return;
        }
        self.stats.conversions += 1;
        if conversion.specialized {
            self.stats.specialized_conversions += 1;
        }
        for step in &conversion.steps {
            match step {
                Step::Op(op) => self.op(op.clone()),
                Step::Call(helper) => self.call_resolved(*helper),
            }
        }
    }

    /// Spill-aware store of the value on the stack into `place`.
    fn store_top(&mut self, place: &Place, from: Repr, hint: TypeHint) -> Result<(), ErrorKind> {
        if place.has_store_prefix() {
            let spill = self.temp(from);
            self.out.store_local(spill);
            place.emit_store_prepare(&mut self.out);
            self.out.load_local(spill);
        }
        self.convert(from, hint, place.store_repr())?;
        place.emit_store(&mut self.out);
        Ok(())
    }

    // ---- statements -------------------------------------------------------

    fn emit_stmt(&mut self, stmt: &Stmt) -> Result<(), ErrorKind> {
        match &stmt.kind {
            StmtKind::Assign(var, value) => {
                let place = self.place(*var)?;
                place.emit_store_prepare(&mut self.out);
                self.emit_expr_as(value, place.store_repr())?;
                place.emit_store(&mut self.out);
            }
            StmtKind::Append(var, value) => self.emit_append(*var, value)?,
            StmtKind::Echo(value) => {
                self.emit_expr_as(value, Repr::String)?;
                self.call(Helper::Echo);
            }
            StmtKind::Eval(value) => {
                self.emit_expr(value)?;
                self.op(Opcode::Pop);
            }
            StmtKind::Return(value) => {
                match value {
                    Some(value) => self.emit_expr_as(value, Repr::Value)?,
                    None => self.call(Helper::NullValue),
                }
                self.emit_return()?;
            }
            StmtKind::Throw(value) => {
                self.emit_expr_as(value, Repr::Object(None))?;
                self.op(Opcode::Throw);
            }
        }
        Ok(())
    }

    /// `$v .= value`: in place for string buffers, concatenate and store
    /// otherwise.
    fn emit_append(&mut self, var: VarId, value: &Expr) -> Result<(), ErrorKind> {
        let place = self.place(var)?;
        if place.repr() == Repr::MutableString {
            place.emit_load(&mut self.out);
            self.emit_expr_as(value, Repr::String)?;
            self.call(Helper::MutableStringAppend);
            return Ok(());
        }
        place.emit_store_prepare(&mut self.out);
        place.emit_load(&mut self.out);
        self.convert(place.repr(), place.hint(), Repr::String)?;
        self.emit_expr_as(value, Repr::String)?;
        self.call(Helper::Concat);
        self.convert(Repr::String, TypeHint::STRING, place.store_repr())?;
        place.emit_store(&mut self.out);
        Ok(())
    }

    // ---- expressions ------------------------------------------------------

    /// Emit `expr` converted to `to`.
    fn emit_expr_as(&mut self, expr: &Expr, to: Repr) -> Result<(), ErrorKind> {
        if let ExprKind::Var(var) = expr.kind {
            let place = self.place(var)?;
            if place.has_address() {
                if let Some(conversion) = coerce::plan_by_address(place.repr(), expr.hint, to) {
                    trace!("convert {} to {} through its address", var.0, to);
                    place.emit_load_address(&mut self.out);
                    self.stats.address_conversions += 1;
                    self.emit_conversion(&conversion);
                    return Ok(());
                }
            }
        }
        let from = self.emit_expr(expr)?;
        self.convert(from, expr.hint, to)
    }

    /// Emit `expr` in its natural representation, which is returned.
    fn emit_expr(&mut self, expr: &Expr) -> Result<Repr, ErrorKind> {
        match &expr.kind {
            ExprKind::Literal(literal) => Ok(self.emit_literal(literal)),
            ExprKind::Var(var) => {
                let place = self.place(*var)?;
                place.emit_load(&mut self.out);
                Ok(place.repr())
            }
            ExprKind::Binary(op, left, right) => self.emit_binary(*op, left, right),
            ExprKind::Not(operand) => {
                self.emit_expr_as(operand, Repr::Bool)?;
                self.op(Opcode::LdcI4(0));
                self.op(Opcode::Ceq);
                Ok(Repr::Bool)
            }
            ExprKind::NewArray(items) => {
                self.call(Helper::NewArray);
                for item in items {
                    self.op(Opcode::Dup);
                    self.emit_expr_as(item, Repr::Value)?;
                    self.call(Helper::ArrayAdd);
                }
                Ok(Repr::Array)
            }
            ExprKind::New(class) => {
                self.op(Opcode::NewObj(*class));
                Ok(Repr::Object(Some(*class)))
            }
        }
    }

    fn emit_literal(&mut self, literal: &Literal) -> Repr {
        match literal {
            Literal::Null => self.call(Helper::NullValue),
            Literal::Bool(value) => self.op(Opcode::LdcI4(*value as i32)),
            Literal::Int(value) => self.op(Opcode::LdcI8(*value)),
            Literal::Double(value) => self.op(Opcode::LdcR8(*value)),
            Literal::String(value) => self.op(Opcode::LdStr(value.clone())),
        }
        literal.repr()
    }

    /// Emit an arithmetic operand as a number. Strings have no direct
    /// number cell and are parsed by the generic helper after boxing.
    fn emit_number_operand(&mut self, expr: &Expr) -> Result<(), ErrorKind> {
        let textual = |repr: Repr| matches!(repr, Repr::String | Repr::MutableString);
        let direct = match &expr.kind {
            ExprKind::Var(var) => !textual(self.place(*var)?.repr()),
            ExprKind::Literal(literal) => !textual(literal.repr()),
            _ => false,
        };
        if direct {
            return self.emit_expr_as(expr, Repr::Number);
        }
        let from = self.emit_expr(expr)?;
        if textual(from) {
            trace!("numeric operand of {} goes through a value", from);
            self.convert(from, expr.hint, Repr::Value)?;
            return self.convert(Repr::Value, expr.hint, Repr::Number);
        }
        self.convert(from, expr.hint, Repr::Number)
    }

    fn emit_binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<Repr, ErrorKind> {
        match op {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul => {
                let (opcode, arith) = match op {
                    BinaryOp::Add => (Opcode::Add, ArithOp::Add),
                    BinaryOp::Sub => (Opcode::Sub, ArithOp::Sub),
                    _ => (Opcode::Mul, ArithOp::Mul),
                };
                if floating_operands(left.hint, right.hint) {
                    self.emit_expr_as(left, Repr::Double)?;
                    self.emit_expr_as(right, Repr::Double)?;
                    self.op(opcode);
                    return Ok(Repr::Double);
                }
                self.emit_number_operand(left)?;
                self.emit_number_operand(right)?;
                self.call(Helper::Arith(arith));
                Ok(Repr::Number)
            }
            BinaryOp::Concat => {
                self.emit_expr_as(left, Repr::String)?;
                self.emit_expr_as(right, Repr::String)?;
                self.call(Helper::Concat);
                Ok(Repr::String)
            }
            BinaryOp::Eq | BinaryOp::Lt => {
                let strict = [TypeHint::INT64, TypeHint::DOUBLE]
                    .into_iter()
                    .find(|hint| left.hint == *hint && right.hint == *hint);
                if let Some(hint) = strict {
                    let repr = if hint == TypeHint::INT64 { Repr::Int64 } else { Repr::Double };
                    self.emit_expr_as(left, repr)?;
                    self.emit_expr_as(right, repr)?;
                    self.op(if op == BinaryOp::Eq { Opcode::Ceq } else { Opcode::Clt });
                    return Ok(Repr::Bool);
                }
                self.emit_expr_as(left, Repr::Value)?;
                self.emit_expr_as(right, Repr::Value)?;
                self.call(if op == BinaryOp::Eq { Helper::LooseEquals } else { Helper::LooseLessThan });
                Ok(Repr::Bool)
            }
        }
    }
}

/// Both operands are known numbers and at least one is a double, so the
/// arithmetic happens in floating point without a runtime helper.
fn floating_operands(left: TypeHint, right: TypeHint) -> bool {
    let numeric = |hint: TypeHint| hint.is_singular() && hint.is_subset_of(TypeHint::NUMBER);
    numeric(left) && numeric(right) && (left == TypeHint::DOUBLE || right == TypeHint::DOUBLE)
}
