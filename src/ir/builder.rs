//! Incremental construction of a [`RoutineGraph`].
//!
//! Blocks receive ordinals in creation order, so callers must create the
//! blocks of nested regions contiguously (the binder does this naturally by
//! walking the source in lexical order).

use super::*;

pub struct GraphBuilder {
    name: String,
    variables: Vec<Variable>,
    classes: Vec<String>,
    blocks: Vec<Block>,
    next_param: u16,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            variables: Vec::new(),
            classes: Vec::new(),
            blocks: Vec::new(),
            next_param: 0,
        }
    }

    /// Declare a parameter. Parameters are numbered in declaration order.
    pub fn param(&mut self, name: &str, repr: Repr, hint: TypeHint) -> VarId {
        let index = self.next_param;
        self.next_param += 1;
        self.push_var(name, repr, hint, VarStorage::Param(index))
    }

    pub fn local(&mut self, name: &str, repr: Repr, hint: TypeHint) -> VarId {
        self.push_var(name, repr, hint, VarStorage::Local)
    }

    /// Declare a variable living in the execution context's globals.
    pub fn global(&mut self, name: &str, repr: Repr, hint: TypeHint) -> VarId {
        self.push_var(name, repr, hint, VarStorage::Global)
    }

    fn push_var(&mut self, name: &str, repr: Repr, hint: TypeHint, storage: VarStorage) -> VarId {
        self.variables.push(Variable { name: name.to_string(), repr, hint, storage });
        VarId(self.variables.len() as u32 - 1)
    }

    /// Intern a class name.
    pub fn class(&mut self, name: &str) -> ClassId {
        if let Some(pos) = self.classes.iter().position(|c| c == name) {
            return ClassId(pos as u32);
        }
        self.classes.push(name.to_string());
        ClassId(self.classes.len() as u32 - 1)
    }

    pub fn find_var(&self, name: &str) -> Option<VarId> {
        self.variables
            .iter()
            .position(|v| v.name == name)
            .map(|i| VarId(i as u32))
    }

    pub fn variable(&self, id: VarId) -> &Variable {
        &self.variables[id.0 as usize]
    }

    /// A reference to `id` carrying the variable's declared hint.
    pub fn var(&self, id: VarId) -> Expr {
        Expr::var(id, self.variable(id).hint)
    }

    /// Create the next block. The first block created is the entry.
    pub fn block(&mut self, name: &str) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block {
            id,
            name: name.to_string(),
            statements: Vec::new(),
            edge: None,
            dead: false,
        });
        id
    }

    pub fn push(&mut self, block: BlockId, stmt: Stmt) {
        self.blocks[block.index()].statements.push(stmt);
    }

    pub fn stmt(&mut self, block: BlockId, kind: StmtKind) {
        self.push(block, Stmt::new(kind));
    }

    pub fn set_edge(&mut self, block: BlockId, edge: Edge) {
        self.blocks[block.index()].edge = Some(edge);
    }

    pub fn goto(&mut self, block: BlockId, target: BlockId) {
        self.set_edge(block, Edge::Simple { target });
    }

    pub fn mark_dead(&mut self, block: BlockId) {
        self.blocks[block.index()].dead = true;
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn finish(self) -> RoutineGraph {
        RoutineGraph {
            name: self.name,
            variables: self.variables,
            classes: self.classes,
            blocks: self.blocks,
            entry: BlockId(0),
        }
    }
}
