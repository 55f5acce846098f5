// This module is the entry point callers use to compile routines. compile_routine() runs the
// generator for one graph into a fresh Listing inside the caller's session. compile_all()
// compiles independent routines in parallel with rayon: each worker owns a bumpalo arena
// that is reset between routines, every routine gets its own session, and all of them share
// one HelperRegistry whose create-if-absent cache is guarded by a parking_lot mutex. A
// failing routine only produces its diagnostic; the others carry on. Cancellation is checked
// once per routine before it starts, never in the middle of one.

//! Routine compilation entry points.

use std::sync::atomic::{AtomicBool, Ordering};

use bumpalo::Bump;
use log::{info, warn};
use rayon::prelude::*;

use crate::codegen::CodeGenerator;
use crate::config::CodegenOptions;
use crate::core::{
    CodegenError, CompilationSession, CompileResult, ErrorKind, HelperRegistry, HelperResolver,
    Listing, SessionStats,
};
use crate::ir::RoutineGraph;

/// Compile one routine into a [`Listing`].
pub fn compile_routine(
    graph: &RoutineGraph,
    helpers: &dyn HelperResolver,
    options: &CodegenOptions,
    session: &CompilationSession<'_>,
) -> CompileResult<Listing> {
    CodeGenerator::new(graph, session, helpers, options, Listing::new()).generate()
}

/// Results of [`compile_all`], in input order.
#[derive(Debug)]
pub struct CompilationOutput {
    pub results: Vec<CompileResult<Listing>>,
    pub stats: SessionStats,
}

impl CompilationOutput {
    pub fn failures(&self) -> impl Iterator<Item = &CodegenError> {
        self.results.iter().filter_map(|r| r.as_ref().err())
    }

    pub fn is_success(&self) -> bool {
        self.results.iter().all(Result::is_ok)
    }
}

/// Compile independent routines in parallel.
///
/// Routines not yet started when `cancel` is raised fail with
/// [`ErrorKind::Cancelled`].
pub fn compile_all(
    graphs: &[RoutineGraph],
    registry: &HelperRegistry,
    options: &CodegenOptions,
    cancel: Option<&AtomicBool>,
) -> CompilationOutput {
    let run = || -> Vec<(CompileResult<Listing>, SessionStats)> {
        graphs
            .par_iter()
            .map_init(Bump::new, |arena, graph| {
                if cancel.is_some_and(|flag| flag.load(Ordering::Acquire)) {
                    let stats = SessionStats { routines_failed: 1, ..Default::default() };
                    let err = CodegenError::new(graph.name.as_str(), None, ErrorKind::Cancelled);
                    return (Err(err), stats);
                }
                let (result, stats) = {
                    let session = CompilationSession::new(arena);
                    let result = compile_routine(graph, registry, options, &session);
                    (result, session.stats())
                };
                arena.reset();
                (result, stats)
            })
            .collect()
    };

    let per_routine = if options.num_workers > 0 {
        match rayon::ThreadPoolBuilder::new().num_threads(options.num_workers).build() {
            Ok(pool) => pool.install(run),
            Err(err) => {
                warn!("falling back to the global thread pool: {}", err);
                run()
            }
        }
    } else {
        run()
    };

    let mut stats = SessionStats::default();
    let mut results = Vec::with_capacity(per_routine.len());
    for (result, routine_stats) in per_routine {
        stats.merge(&routine_stats);
        results.push(result);
    }
    info!(
        "compiled {} routine(s), {} failed, {} helper(s) resolved",
        stats.routines_compiled,
        stats.routines_failed,
        registry.len()
    );
    CompilationOutput { results, stats }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coerce::{Repr, TypeHint};
    use crate::ir::{Edge, Expr, GraphBuilder, StmtKind};

    fn simple(name: &str) -> RoutineGraph {
        let mut b = GraphBuilder::new(name);
        let x = b.param("x", Repr::Value, TypeHint::ANY);
        let entry = b.block("entry");
        let yes = b.block("yes");
        let no = b.block("no");
        let cond = b.var(x);
        b.set_edge(entry, Edge::Conditional { condition: cond, if_true: yes, if_false: no });
        b.stmt(yes, StmtKind::Echo(Expr::string("yes")));
        b.stmt(no, StmtKind::Return(Some(Expr::int(0))));
        b.finish()
    }

    fn broken(name: &str) -> RoutineGraph {
        let mut b = GraphBuilder::new(name);
        let a = b.local("a", Repr::Array, TypeHint::ARRAY);
        let entry = b.block("entry");
        b.stmt(entry, StmtKind::Echo(b.var(a)));
        b.finish()
    }

    #[test]
    fn test_failures_are_isolated() {
        let graphs: Vec<_> = (0..8)
            .map(|i| if i == 3 { broken("broken") } else { simple(&format!("f{}", i)) })
            .collect();
        let registry = HelperRegistry::new();
        let output = compile_all(&graphs, &registry, &CodegenOptions::default(), None);

        assert_eq!(output.results.len(), 8);
        assert_eq!(output.stats.routines_compiled, 7);
        assert_eq!(output.stats.routines_failed, 1);
        let failures: Vec<_> = output.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].routine, "broken");
        assert!(!output.is_success());
    }

    #[test]
    fn test_parallel_output_matches_sequential() {
        let graphs: Vec<_> = (0..16).map(|i| simple(&format!("f{}", i))).collect();
        let registry = HelperRegistry::new();
        let options = CodegenOptions { num_workers: 4, ..Default::default() };
        let output = compile_all(&graphs, &registry, &options, None);

        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let expected = compile_routine(&graphs[0], &registry, &options, &session).unwrap();
        for result in &output.results {
            assert_eq!(result.as_ref().unwrap(), &expected);
        }
    }

    #[test]
    fn test_cancelled_before_start() {
        let graphs = vec![simple("a"), simple("b")];
        let cancel = AtomicBool::new(true);
        let output = compile_all(&graphs, &HelperRegistry::new(), &CodegenOptions::default(), Some(&cancel));
        assert!(output
            .results
            .iter()
            .all(|r| matches!(r, Err(e) if e.kind == ErrorKind::Cancelled)));
        assert_eq!(output.stats.routines_failed, 2);
    }
}
