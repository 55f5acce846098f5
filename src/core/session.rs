// This module provides arena-based compilation session management using the bumpalo crate.
// CompilationSession owns the arena that per-routine scratch is carved from (the scheduler's
// emission markers, queued flags and foreach enumerator slots all live there for the
// duration of one routine), interns routine and class names, remembers which routine is
// being generated, and accumulates statistics. SessionStats records how many routines and
// blocks were generated, how many blocks fell through without a branch versus were reached
// by an explicit branch, and how conversions were lowered (generic helper path, specialized
// on a singular hint, or through a place's address). A session is single-threaded; parallel
// drivers give each worker its own arena and session and merge the statistics afterwards.

//! Arena-based compilation session management.
//!
//! All per-routine scratch is tied to the session lifetime, so the scheduler's
//! side tables need no ownership bookkeeping of their own.

use bumpalo::Bump;
use hashbrown::HashMap;
use std::cell::RefCell;
use std::fmt;

/// Counters gathered while generating one routine.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RoutineStats {
    /// Blocks whose label and contents were emitted.
    pub blocks_emitted: usize,
    /// Blocks emitted in place right after their predecessor.
    pub fallthroughs: usize,
    /// Explicit branch instructions (conditional, unconditional and leave).
    pub branches: usize,
    /// Branches to blocks that were already emitted.
    pub back_edges: usize,
    /// Blocks handed to an enclosing scope.
    pub deferred: usize,
    /// Nested scopes opened below the routine scope.
    pub scopes_opened: usize,
    pub conversions: usize,
    /// Conversions that took a cheaper path thanks to a singular hint.
    pub specialized_conversions: usize,
    /// Conversions that operated on a place's address.
    pub address_conversions: usize,
    pub helper_calls: usize,
    pub jump_tables: usize,
    /// Instructions handed to the sink.
    pub instructions: usize,
}

impl RoutineStats {
    pub fn merge(&mut self, other: &RoutineStats) {
        self.blocks_emitted += other.blocks_emitted;
        self.fallthroughs += other.fallthroughs;
        self.branches += other.branches;
        self.back_edges += other.back_edges;
        self.deferred += other.deferred;
        self.scopes_opened += other.scopes_opened;
        self.conversions += other.conversions;
        self.specialized_conversions += other.specialized_conversions;
        self.address_conversions += other.address_conversions;
        self.helper_calls += other.helper_calls;
        self.jump_tables += other.jump_tables;
        self.instructions += other.instructions;
    }
}

/// Arena-based compilation session.
pub struct CompilationSession<'arena> {
    /// Arena allocator for per-routine scratch.
    arena: &'arena Bump,

    stats: RefCell<SessionStats>,

    interned_strings: RefCell<HashMap<String, &'arena str>>,

    /// Routine currently being generated.
    current_routine: RefCell<Option<String>>,
}

impl<'arena> CompilationSession<'arena> {
    /// Create a new compilation session with the given arena.
    pub fn new(arena: &'arena Bump) -> Self {
        Self {
            arena,
            stats: RefCell::new(SessionStats::default()),
            interned_strings: RefCell::new(HashMap::new()),
            current_routine: RefCell::new(None),
        }
    }

    /// Get access to the arena allocator.
    pub fn arena(&self) -> &'arena Bump {
        self.arena
    }

    /// Intern a string in the arena.
    pub fn intern_str(&self, s: &str) -> &'arena str {
        let mut strings = self.interned_strings.borrow_mut();
        if let Some(&interned) = strings.get(s) {
            return interned;
        }

        let interned = self.arena.alloc_str(s);
        strings.insert(s.to_string(), interned);
        interned
    }

    pub fn set_current_routine(&self, name: &str) {
        *self.current_routine.borrow_mut() = Some(name.to_string());
    }

    pub fn current_routine(&self) -> Option<String> {
        self.current_routine.borrow().clone()
    }

    /// Record a successfully generated routine.
    pub fn record_routine(&self, name: &str, routine: &RoutineStats) {
        let mut stats = self.stats.borrow_mut();
        stats.routines_compiled += 1;
        stats.totals.merge(routine);

        if stats.largest_routine_size < routine.instructions {
            stats.largest_routine_size = routine.instructions;
            stats.largest_routine_name = name.to_string();
        }
        *self.current_routine.borrow_mut() = None;
    }

    /// Record a routine whose generation aborted.
    pub fn record_failure(&self) {
        self.stats.borrow_mut().routines_failed += 1;
        *self.current_routine.borrow_mut() = None;
    }

    /// Get compilation statistics.
    pub fn stats(&self) -> SessionStats {
        self.stats.borrow().clone()
    }
}

/// Compilation session statistics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionStats {
    pub routines_compiled: usize,
    pub routines_failed: usize,
    /// Sum of the per-routine counters.
    pub totals: RoutineStats,
    /// Largest routine by instruction count.
    pub largest_routine_size: usize,
    pub largest_routine_name: String,
}

impl SessionStats {
    /// Fold the statistics of another (worker) session into this one.
    pub fn merge(&mut self, other: &SessionStats) {
        self.routines_compiled += other.routines_compiled;
        self.routines_failed += other.routines_failed;
        self.totals.merge(&other.totals);
        if self.largest_routine_size < other.largest_routine_size {
            self.largest_routine_size = other.largest_routine_size;
            self.largest_routine_name = other.largest_routine_name.clone();
        }
    }
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = &self.totals;
        writeln!(f, "Code Generation Statistics:")?;
        writeln!(f, "  Routines compiled: {}", self.routines_compiled)?;
        writeln!(f, "  Routines failed: {}", self.routines_failed)?;
        writeln!(f, "  Instructions: {}", t.instructions)?;
        writeln!(f, "  Blocks emitted: {} ({} fallthrough)", t.blocks_emitted, t.fallthroughs)?;
        writeln!(f, "  Branches: {} ({} back edges)", t.branches, t.back_edges)?;
        writeln!(f, "  Blocks deferred to outer scopes: {}", t.deferred)?;
        writeln!(f, "  Nested scopes: {}", t.scopes_opened)?;
        writeln!(
            f,
            "  Conversions: {} ({} specialized, {} by address)",
            t.conversions, t.specialized_conversions, t.address_conversions
        )?;
        writeln!(f, "  Helper calls: {}", t.helper_calls)?;
        writeln!(f, "  Jump tables: {}", t.jump_tables)?;

        if !self.largest_routine_name.is_empty() {
            writeln!(
                f,
                "  Largest routine: {} ({} instructions)",
                self.largest_routine_name, self.largest_routine_size
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compilation_session_creation() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);

        let stats = session.stats();
        assert_eq!(stats.routines_compiled, 0);
        assert_eq!(stats.totals.instructions, 0);
        assert!(session.current_routine().is_none());
    }

    #[test]
    fn test_string_interning() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);

        let s1 = session.intern_str("Exception");
        let s2 = session.intern_str("Exception");
        let s3 = session.intern_str("Error");

        assert_eq!(s1.as_ptr(), s2.as_ptr());
        assert_ne!(s1.as_ptr(), s3.as_ptr());
    }

    #[test]
    fn test_routine_statistics() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);

        session.set_current_routine("small");
        session.record_routine("small", &RoutineStats { instructions: 10, blocks_emitted: 2, ..Default::default() });
        session.record_routine("big", &RoutineStats { instructions: 40, branches: 3, ..Default::default() });
        session.record_failure();

        let stats = session.stats();
        assert_eq!(stats.routines_compiled, 2);
        assert_eq!(stats.routines_failed, 1);
        assert_eq!(stats.totals.instructions, 50);
        assert_eq!(stats.totals.branches, 3);
        assert_eq!(stats.largest_routine_name, "big");
        assert!(session.current_routine().is_none());
    }

    #[test]
    fn test_merge_and_display() {
        let mut a = SessionStats::default();
        let b = SessionStats {
            routines_compiled: 1,
            largest_routine_size: 7,
            largest_routine_name: "f".into(),
            ..Default::default()
        };
        a.merge(&b);
        assert_eq!(a.routines_compiled, 1);

        let output = a.to_string();
        assert!(output.contains("Routines compiled: 1"));
        assert!(output.contains("f (7 instructions)"));
    }
}
