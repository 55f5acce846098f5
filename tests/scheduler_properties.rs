//! Structural properties of the linearized output.
//!
//! - Every reachable block is labeled exactly once, dead ones never
//! - Blocks of a region are emitted inside that region's brackets
//! - Control leaving a protected region uses `leave`
//! - Fallthrough replaces branches to the next emitted block

use bumpalo::Bump;
use proptest::prelude::*;

use dyncg::codegen::CodeGenerator;
use dyncg::config::CodegenOptions;
use dyncg::core::{BranchOp, CompilationSession, HelperRegistry, Insn, Label, Listing, Opcode};
use dyncg::ir::{BlockId, CatchHandler, Edge, Expr, GraphBuilder, RoutineGraph, StmtKind};
use dyncg::{Repr, TypeHint};

fn compile(graph: &RoutineGraph) -> Listing {
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let registry = HelperRegistry::new();
    CodeGenerator::new(graph, &session, &registry, &CodegenOptions::default(), Listing::new())
        .generate()
        .unwrap_or_else(|e| panic!("{} failed: {}", graph.name, e))
}

fn position(listing: &Listing, insn: &Insn) -> usize {
    listing
        .insns()
        .iter()
        .position(|i| i == insn)
        .unwrap_or_else(|| panic!("{:?} not in listing", insn))
}

/// ```text
/// while (k) {
///     try { if (c) { A } else { B } } catch (E) { C }
/// }
/// D
/// ```
fn loop_with_try() -> RoutineGraph {
    let mut b = GraphBuilder::new("loop_with_try");
    let k = b.param("k", Repr::Bool, TypeHint::BOOL);
    let c = b.param("c", Repr::Bool, TypeHint::BOOL);
    let error = b.class("E");

    let entry = b.block("entry");
    let head = b.block("head");
    let try_head = b.block("try_head");
    let body = b.block("body");
    let a = b.block("A");
    let bb = b.block("B");
    let handler = b.block("C");
    let latch = b.block("latch");
    let done = b.block("D");

    b.goto(entry, head);
    let cond = b.var(k);
    b.set_edge(head, Edge::Conditional { condition: cond, if_true: try_head, if_false: done });
    b.set_edge(
        try_head,
        Edge::TryCatch {
            body,
            handlers: vec![CatchHandler { class: error, var: None, target: handler }],
            finally: None,
            next: latch,
        },
    );
    let cond = b.var(c);
    b.set_edge(body, Edge::Conditional { condition: cond, if_true: a, if_false: bb });
    b.stmt(a, StmtKind::Echo(Expr::string("A")));
    b.goto(a, latch);
    b.stmt(bb, StmtKind::Echo(Expr::string("B")));
    b.goto(bb, latch);
    b.stmt(handler, StmtKind::Echo(Expr::string("C")));
    b.goto(handler, latch);
    b.goto(latch, head);
    b.stmt(done, StmtKind::Return(Some(Expr::int(0))));
    b.finish()
}

#[test]
fn test_region_containment() {
    let graph = loop_with_try();
    let listing = compile(&graph);
    let block = |name: &str| graph.block_by_name(name).unwrap();

    let order: Vec<u32> = listing.block_order().iter().map(|b| b.ordinal()).collect();
    assert_eq!(order, (0..9).collect::<Vec<_>>());

    let begin_try = position(&listing, &Insn::BeginTry);
    let begin_catch = listing
        .insns()
        .iter()
        .position(|i| matches!(i, Insn::BeginCatch(_)))
        .unwrap();
    let end_try = position(&listing, &Insn::EndTry);
    let at = |name: &str| listing.label_position(block(name)).unwrap();

    for name in ["body", "A", "B"] {
        assert!(begin_try < at(name) && at(name) < begin_catch, "{} escaped the try", name);
    }
    assert!(begin_catch < at("C") && at("C") < end_try);
    assert!(end_try < at("latch"));
    assert!(at("latch") < at("D"));

    assert_eq!(listing.branches_to(block("latch")), vec![BranchOp::Leave; 3]);
    assert_eq!(listing.branches_to(block("head")), vec![BranchOp::Br]);
    assert_eq!(listing.branches_to(block("D")), vec![BranchOp::BrFalse]);
}

#[test]
fn test_fallthrough_needs_no_branch() {
    let mut b = GraphBuilder::new("chain");
    let blocks: Vec<_> = (0..5).map(|i| b.block(&format!("b{}", i))).collect();
    for pair in blocks.windows(2) {
        b.goto(pair[0], pair[1]);
    }
    b.stmt(blocks[4], StmtKind::Return(None));
    let listing = compile(&b.finish());
    assert_eq!(listing.block_order(), blocks);
    assert_eq!(listing.branch_count(), 0);
}

#[test]
fn test_finally_exit_and_return_slot() {
    let mut b = GraphBuilder::new("finally");
    let c = b.param("c", Repr::Bool, TypeHint::BOOL);
    let entry = b.block("entry");
    let body = b.block("body");
    let early = b.block("early");
    let cleanup = b.block("cleanup");
    let next = b.block("next");
    b.set_edge(entry, Edge::TryCatch { body, handlers: vec![], finally: Some(cleanup), next });
    let cond = b.var(c);
    b.set_edge(body, Edge::Conditional { condition: cond, if_true: early, if_false: next });
    b.stmt(early, StmtKind::Return(Some(Expr::int(1))));
    b.stmt(cleanup, StmtKind::Echo(Expr::string("cleanup")));
    b.stmt(next, StmtKind::Return(Some(Expr::int(2))));
    let listing = compile(&b.finish());

    let insns = listing.insns();
    let finally_at = position(&listing, &Insn::BeginFinally);
    let end_try = position(&listing, &Insn::EndTry);
    assert_eq!(insns[end_try - 1], Insn::Op(Opcode::EndFinally));
    assert!(finally_at < end_try);

    // The early return stores into the return local and leaves to the
    // shared slot after the body.
    let slot = Label::Local(1);
    assert!(insns.contains(&Insn::Branch(BranchOp::Leave, slot)));
    assert_eq!(insns[insns.len() - 3], Insn::Label(slot));
    assert_eq!(insns[insns.len() - 1], Insn::Op(Opcode::Ret));
}

/// Edge of a random block: `0` none, `1` goto, `2` conditional.
type BlockSpec = (u8, usize, usize, bool);

fn random_graph(specs: &[BlockSpec]) -> RoutineGraph {
    let mut b = GraphBuilder::new("random");
    let c = b.param("c", Repr::Value, TypeHint::ANY);
    let blocks: Vec<BlockId> = (0..specs.len()).map(|i| b.block(&format!("b{}", i))).collect();
    for (i, &(kind, x, y, dead)) in specs.iter().enumerate() {
        match kind {
            1 => b.goto(blocks[i], blocks[x]),
            2 => {
                let cond = b.var(c);
                b.set_edge(blocks[i], Edge::Conditional { condition: cond, if_true: blocks[x], if_false: blocks[y] });
            }
            _ => b.stmt(blocks[i], StmtKind::Echo(Expr::int(i as i64))),
        }
        if dead && i > 0 {
            b.mark_dead(blocks[i]);
        }
    }
    b.finish()
}

fn specs() -> impl Strategy<Value = Vec<BlockSpec>> {
    (2usize..24).prop_flat_map(|n| {
        prop::collection::vec((0u8..3, 0..n, 0..n, prop::bool::weighted(0.15)), n)
    })
}

proptest! {
    #[test]
    fn prop_reachable_blocks_emitted_once(specs in specs()) {
        let graph = random_graph(&specs);
        let listing = compile(&graph);

        let mut order = listing.block_order();
        let emitted = order.len();
        order.sort();
        order.dedup();
        prop_assert_eq!(order.len(), emitted, "a block was emitted twice");
        prop_assert_eq!(order, graph.reachable());
    }

    #[test]
    fn prop_no_branch_to_next_label(specs in specs()) {
        let graph = random_graph(&specs);
        let listing = compile(&graph);
        let insns = listing.insns();
        for pair in insns.windows(2) {
            if let (Insn::Branch(BranchOp::Br, target), Insn::Label(next)) = (&pair[0], &pair[1]) {
                prop_assert_ne!(target, next);
            }
        }
    }
}
