//! Execution contexts and the per-match session.
//!
//! An [`ExecutionContext`] is the small forkable value carried through a
//! block match: the cursor plus the current pattern line. The [`Session`]
//! bundles the resources every matcher step shares — the program, the
//! match-result tree, the binding scope and the embedded namespace.

use crate::embedded::{eval, Block, EmbeddedNs, Expr};
use crate::engine::cursor::Cursor;
use crate::engine::errors::EngineResult;
use crate::engine::match_result::{MatchResult, ScopeId};
use crate::engine::program::Program;
use crate::engine::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionContext {
    pub cursor: Cursor,
    pub line: usize,
}

impl ExecutionContext {
    pub fn new(cursor: Cursor, line: usize) -> Self {
        ExecutionContext { cursor, line }
    }

    pub fn fork_cursor(self, cursor: Cursor) -> Self {
        ExecutionContext { cursor, ..self }
    }

    pub fn fork_next_line(self) -> Self {
        ExecutionContext {
            line: self.line + 1,
            ..self
        }
    }

    pub fn fork_prev_line(self) -> Self {
        ExecutionContext {
            line: self.line - 1,
            ..self
        }
    }

    pub fn fork_next_instruction(self, program: &Program) -> EngineResult<Self> {
        Ok(self.fork_cursor(self.cursor.next(program)?))
    }

    pub fn fork_prev_instruction(self, program: &Program) -> EngineResult<Self> {
        Ok(self.fork_cursor(self.cursor.prev(program)?))
    }

    pub fn fork_offset(self, program: &Program, delta: i64) -> EngineResult<Self> {
        Ok(self.fork_cursor(self.cursor.offset(program, delta)?))
    }
}

/// Everything a match in flight shares: one program, one match-result tree,
/// one transaction stack, one embedded namespace. Single-threaded by
/// design; matching is a depth-first traversal with explicit backtracking.
pub struct Session<'p> {
    pub program: &'p Program,
    pub mr: &'p mut MatchResult,
    /// Scope new captures bind into.
    pub scope: ScopeId,
    pub ns: EmbeddedNs,
    /// Position of the embedded evaluation currently running, if any.
    /// Magic getters/setters read and write this.
    pub ctx: ExecutionContext,
}

impl<'p> Session<'p> {
    pub fn new(
        program: &'p Program,
        mr: &'p mut MatchResult,
        scope: ScopeId,
        globals: Vec<(String, Value)>,
    ) -> Self {
        let mut ns = EmbeddedNs::new();
        program.registry().install_all(&mut ns);
        for (name, value) in globals {
            ns.set_global(name, value);
        }
        Session {
            program,
            mr,
            scope,
            ns,
            ctx: ExecutionContext::new(Cursor::Null, 0),
        }
    }

    /// Binds a capture into the current scope; a `None` capture name is a
    /// silent match.
    pub fn bind(&mut self, capture: Option<&str>, value: Value) -> EngineResult<()> {
        self.mr.set_opt(self.scope, capture, value)
    }

    /// Runs `f` inside a match-result transaction: commit on `Ok`,
    /// rollback on `Err`.
    pub fn transact<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let tx = self.mr.begin();
        match f(self) {
            Ok(v) => {
                self.mr.commit(tx);
                Ok(v)
            }
            Err(e) => {
                self.mr.rollback(tx);
                Err(e)
            }
        }
    }

    /// Executes an embedded statement block positioned at `ctx`, returning
    /// the (possibly cursor-mutated) context.
    pub fn exec_in_ctx(
        &mut self,
        block: &Block,
        ctx: ExecutionContext,
    ) -> EngineResult<ExecutionContext> {
        let saved = self.ctx;
        self.ctx = ctx;
        let result = eval::execute(self, block);
        let after = self.ctx;
        self.ctx = saved;
        result.map(|()| after)
    }

    /// Evaluates an embedded expression positioned at `ctx`.
    pub fn eval_in_ctx(
        &mut self,
        expr: &Expr,
        ctx: ExecutionContext,
    ) -> EngineResult<(Value, ExecutionContext)> {
        let saved = self.ctx;
        self.ctx = ctx;
        let result = eval::evaluate(self, expr);
        let after = self.ctx;
        self.ctx = saved;
        result.map(|value| (value, after))
    }
}
