//! Bound block/edge graph of one routine.
//!
//! The binder produces a [`RoutineGraph`] per routine: basic blocks numbered by
//! creation order (their *ordinal*), each holding straight-line statements and
//! at most one outgoing [`Edge`]. Blocks are created in lexical order, so the
//! blocks of a loop body, protected region or handler occupy a contiguous
//! ordinal range. The graph is immutable during generation; everything the
//! scheduler needs to remember about a block lives in its own side tables.

use std::fmt;
use std::sync::Arc;

use crate::coerce::{ClassId, Repr, TypeHint};

mod builder;

pub use builder::GraphBuilder;

/// Block identity; the inner value is the block's ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl BlockId {
    pub fn ordinal(self) -> u32 {
        self.0
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// Index into [`RoutineGraph::variables`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub u32);

/// Source position of a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(Arc<str>),
}

impl Literal {
    pub fn hint(&self) -> TypeHint {
        match self {
            Literal::Null => TypeHint::NULL,
            Literal::Bool(_) => TypeHint::BOOL,
            Literal::Int(_) => TypeHint::INT64,
            Literal::Double(_) => TypeHint::DOUBLE,
            Literal::String(_) => TypeHint::STRING,
        }
    }

    /// Representation the literal is materialized in.
    pub fn repr(&self) -> Repr {
        match self {
            Literal::Null => Repr::Value,
            Literal::Bool(_) => Repr::Bool,
            Literal::Int(_) => Repr::Int64,
            Literal::Double(_) => Repr::Double,
            Literal::String(_) => Repr::String,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => f.write_str("null"),
            Literal::Bool(b) => write!(f, "{}", b),
            Literal::Int(i) => write!(f, "{}", i),
            Literal::Double(d) => write!(f, "{:?}", d),
            Literal::String(s) => write!(f, "{:?}", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Concat,
    Eq,
    Lt,
}

impl BinaryOp {
    pub fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Concat => "concat",
            BinaryOp::Eq => "eq",
            BinaryOp::Lt => "lt",
        }
    }

    /// Hint of the result given the operand hints.
    pub fn result_hint(self, left: TypeHint, right: TypeHint) -> TypeHint {
        match self {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul => {
                if (left == TypeHint::DOUBLE && right.is_subset_of(TypeHint::NUMBER))
                    || (right == TypeHint::DOUBLE && left.is_subset_of(TypeHint::NUMBER))
                {
                    TypeHint::DOUBLE
                } else {
                    // Integer overflow promotes to double.
                    TypeHint::NUMBER
                }
            }
            BinaryOp::Concat => TypeHint::STRING,
            BinaryOp::Eq | BinaryOp::Lt => TypeHint::BOOL,
        }
    }
}

/// Expression annotated with its flow-analysis hint.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub hint: TypeHint,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    Var(VarId),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    NewArray(Vec<Expr>),
    New(ClassId),
}

impl Expr {
    pub fn literal(value: Literal) -> Self {
        let hint = value.hint();
        Self { kind: ExprKind::Literal(value), hint }
    }

    pub fn int(value: i64) -> Self {
        Self::literal(Literal::Int(value))
    }

    pub fn double(value: f64) -> Self {
        Self::literal(Literal::Double(value))
    }

    pub fn string(value: &str) -> Self {
        Self::literal(Literal::String(Arc::from(value)))
    }

    pub fn bool(value: bool) -> Self {
        Self::literal(Literal::Bool(value))
    }

    pub fn null() -> Self {
        Self::literal(Literal::Null)
    }

    pub fn var(id: VarId, hint: TypeHint) -> Self {
        Self { kind: ExprKind::Var(id), hint }
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        let hint = op.result_hint(left.hint, right.hint);
        Self { kind: ExprKind::Binary(op, Box::new(left), Box::new(right)), hint }
    }

    pub fn not(operand: Expr) -> Self {
        Self { kind: ExprKind::Not(Box::new(operand)), hint: TypeHint::BOOL }
    }

    pub fn array(items: Vec<Expr>) -> Self {
        Self { kind: ExprKind::NewArray(items), hint: TypeHint::ARRAY }
    }

    pub fn new_object(class: ClassId) -> Self {
        Self { kind: ExprKind::New(class), hint: TypeHint::OBJECT }
    }

    /// Override the hint, as flow analysis does after narrowing.
    pub fn with_hint(mut self, hint: TypeHint) -> Self {
        self.hint = hint;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Assign(VarId, Expr),
    /// `$v .= expr`
    Append(VarId, Expr),
    Echo(Expr),
    /// Evaluate for side effects and discard.
    Eval(Expr),
    Return(Option<Expr>),
    Throw(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Option<Span>,
}

impl Stmt {
    pub fn new(kind: StmtKind) -> Self {
        Self { kind, span: None }
    }

    pub fn at(kind: StmtKind, span: Span) -> Self {
        Self { kind, span: Some(span) }
    }

    /// Whether control never continues past this statement.
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, StmtKind::Return(_) | StmtKind::Throw(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatchHandler {
    /// Exception class the handler filters on.
    pub class: ClassId,
    /// Variable receiving the caught exception.
    pub var: Option<VarId>,
    pub target: BlockId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub value: Literal,
    pub target: BlockId,
}

/// Typed control transfer out of a block.
#[derive(Debug, Clone, PartialEq)]
pub enum Edge {
    Simple {
        target: BlockId,
    },
    Conditional {
        condition: Expr,
        if_true: BlockId,
        if_false: BlockId,
    },
    TryCatch {
        body: BlockId,
        handlers: Vec<CatchHandler>,
        finally: Option<BlockId>,
        /// Where control resumes after the whole construct.
        next: BlockId,
    },
    ForeachEnumeree {
        enumeree: Expr,
        move_next: BlockId,
    },
    ForeachMoveNext {
        /// Block carrying the matching [`Edge::ForeachEnumeree`].
        enumeree: BlockId,
        value: VarId,
        key: Option<VarId>,
        body: BlockId,
        after: BlockId,
    },
    Switch {
        value: Expr,
        cases: Vec<SwitchCase>,
        default: BlockId,
    },
}

impl Edge {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Edge::Simple { .. } => "simple",
            Edge::Conditional { .. } => "conditional",
            Edge::TryCatch { .. } => "try/catch",
            Edge::ForeachEnumeree { .. } => "foreach enumeree",
            Edge::ForeachMoveNext { .. } => "foreach move-next",
            Edge::Switch { .. } => "switch",
        }
    }

    /// Blocks control may transfer to.
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Edge::Simple { target } => vec![*target],
            Edge::Conditional { if_true, if_false, .. } => vec![*if_true, *if_false],
            Edge::TryCatch { body, handlers, finally, next } => {
                let mut succs = vec![*body];
                succs.extend(handlers.iter().map(|h| h.target));
                succs.extend(finally.iter().copied());
                succs.push(*next);
                succs
            }
            Edge::ForeachEnumeree { move_next, .. } => vec![*move_next],
            Edge::ForeachMoveNext { body, after, .. } => vec![*body, *after],
            Edge::Switch { cases, default, .. } => {
                let mut succs: Vec<_> = cases.iter().map(|c| c.target).collect();
                succs.push(*default);
                succs
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub id: BlockId,
    pub name: String,
    pub statements: Vec<Stmt>,
    pub edge: Option<Edge>,
    /// Statically dead, pruned by upstream analysis.
    pub dead: bool,
}

impl Block {
    /// Whether the last statement already transfers control away.
    pub fn ends_in_terminal(&self) -> bool {
        self.statements.last().is_some_and(Stmt::is_terminal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarStorage {
    Local,
    Param(u16),
    /// Routine-global variable held as a field of the execution context.
    Global,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub repr: Repr,
    pub hint: TypeHint,
    pub storage: VarStorage,
}

/// Bound graph of one routine.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutineGraph {
    pub name: String,
    pub variables: Vec<Variable>,
    pub classes: Vec<String>,
    blocks: Vec<Block>,
    entry: BlockId,
}

impl RoutineGraph {
    pub fn entry(&self) -> BlockId {
        self.entry
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id.index())
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn variable(&self, id: VarId) -> Option<&Variable> {
        self.variables.get(id.0 as usize)
    }

    pub fn class_name(&self, id: ClassId) -> Option<&str> {
        self.classes.get(id.0 as usize).map(String::as_str)
    }

    pub fn block_by_name(&self, name: &str) -> Option<BlockId> {
        self.blocks.iter().find(|b| b.name == name).map(|b| b.id)
    }

    /// Blocks reachable from the entry without passing through dead blocks,
    /// in ascending ordinal order.
    pub fn reachable(&self) -> Vec<BlockId> {
        let mut seen = vec![false; self.blocks.len()];
        let mut stack = vec![self.entry];
        while let Some(id) = stack.pop() {
            let Some(block) = self.block(id) else { continue };
            if seen[id.index()] || block.dead {
                continue;
            }
            seen[id.index()] = true;
            if let Some(edge) = &block.edge {
                stack.extend(edge.successors());
            }
        }
        seen.iter()
            .enumerate()
            .filter(|(_, s)| **s)
            .map(|(i, _)| BlockId(i as u32))
            .collect()
    }
}
