//! Test utilities for arena-based testing.
//!
//! Each test gets its own arena and helper registry, the way the driver
//! hands both to every routine it compiles.

#[cfg(test)]
pub mod test {
    use super::super::helpers::HelperRegistry;
    use super::super::listing::Listing;
    use super::super::session::{CompilationSession, SessionStats};
    use super::super::CompileResult;
    use crate::codegen::CodeGenerator;
    use crate::config::CodegenOptions;
    use crate::ir::RoutineGraph;
    use bumpalo::Bump;

    /// Arena and helper registry shared by the routines of one test.
    pub struct TestContext {
        arena: Bump,
        registry: HelperRegistry,
    }

    impl TestContext {
        pub fn new() -> Self {
            Self { arena: Bump::new(), registry: HelperRegistry::new() }
        }

        /// Bytes the arena has handed out so far.
        pub fn memory_used(&self) -> usize {
            self.arena.allocated_bytes()
        }

        /// Run `f` with a fresh session over this context's arena.
        pub fn with_session<F, R>(&self, f: F) -> R
        where
            F: FnOnce(&CompilationSession<'_>) -> R,
        {
            let session = CompilationSession::new(&self.arena);
            f(&session)
        }

        /// Generate `graph` into a [`Listing`] and report the session
        /// statistics alongside.
        pub fn compile(
            &self,
            graph: &RoutineGraph,
            options: &CodegenOptions,
        ) -> (CompileResult<Listing>, SessionStats) {
            self.with_session(|session| {
                let result =
                    CodeGenerator::new(graph, session, &self.registry, options, Listing::new())
                        .generate();
                (result, session.stats())
            })
        }
    }

    impl Default for TestContext {
        fn default() -> Self {
            Self::new()
        }
    }

    /// Run a test with a temporary arena context.
    pub fn with_test_context<F, R>(f: F) -> R
    where
        F: FnOnce(&TestContext) -> R,
    {
        let ctx = TestContext::new();
        f(&ctx)
    }
}
