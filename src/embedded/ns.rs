//! The embedded namespace: layered locals/globals plus magic names.
//!
//! Reads resolve locals first, then the per-evaluation getter cache, then
//! magic getters and fixtures, then globals. Writes dispatch to a magic
//! setter when one is registered, otherwise to locals. Every evaluation
//! snapshots the namespace through the transaction log: `begin_eval` tracks
//! each chained container (pushing a frame and enqueueing its pop as a
//! compensation) and `end_eval` rolls the transaction back, so writes made
//! inside an evaluation never leak out.

use std::collections::HashMap;

use crate::engine::chaining::{
    track_chaincounter, track_chainmap, track_chainstack, ChainCounter, ChainMap, ChainStack,
    FrameId,
};
use crate::engine::context::Session;
use crate::engine::errors::{EngineResult, PatternError};
use crate::engine::transactions::{TransactionLog, Tx};
use crate::engine::value::Value;

pub type MagicGetter = fn(&mut Session<'_>) -> EngineResult<Value>;
pub type MagicSetter = fn(&mut Session<'_>, Value) -> EngineResult<()>;

/// A lazily-computed namespace entry. Reading its name resolves the
/// declared dependencies (recursively) and runs the callback at most once
/// per evaluation.
#[derive(Clone, Copy)]
pub struct Fixture {
    pub deps: &'static [&'static str],
    pub func: fn(&mut Session<'_>, &[Value]) -> EngineResult<Value>,
}

/// Nesting limit for evaluations started from inside evaluations
/// (sub-matches spawning embedded code spawning sub-matches, ...).
const MAX_EVAL_DEPTH: i64 = 64;

/// Compensations for one evaluation's tracked container frames.
#[derive(Debug)]
enum NsUndo {
    PopLocals(FrameId),
    PopGlobals(FrameId),
    PopGetterCache(FrameId),
    PopResolving(FrameId),
    PopDepth(FrameId),
}

pub struct EmbeddedNs {
    pub(crate) locals: ChainMap<String, Value>,
    pub(crate) globals: ChainMap<String, Value>,
    pub(crate) getter_cache: ChainMap<String, Value>,
    pub(crate) getters: HashMap<String, MagicGetter>,
    pub(crate) setters: HashMap<String, MagicSetter>,
    pub(crate) fixtures: HashMap<String, Fixture>,
    /// Names currently being resolved; used for fixture cycle detection.
    pub(crate) resolving: ChainStack<String>,
    depth: ChainCounter,
    log: TransactionLog<NsUndo>,
}

/// Token for one evaluation's namespace snapshot; handed back to
/// `end_eval`.
pub struct EvalFrames {
    tx: Tx,
}

impl Default for EmbeddedNs {
    fn default() -> Self {
        EmbeddedNs::new()
    }
}

impl EmbeddedNs {
    pub fn new() -> Self {
        EmbeddedNs {
            locals: ChainMap::new(),
            globals: ChainMap::new(),
            getter_cache: ChainMap::new(),
            getters: HashMap::new(),
            setters: HashMap::new(),
            fixtures: HashMap::new(),
            resolving: ChainStack::new(),
            depth: ChainCounter::new(),
            log: TransactionLog::new(),
        }
    }

    pub fn set_global(&mut self, name: impl Into<String>, value: Value) {
        self.globals.insert(name.into(), value);
    }

    pub fn set_local(&mut self, name: impl Into<String>, value: Value) {
        self.locals.insert(name.into(), value);
    }

    pub fn register_getter(&mut self, name: impl Into<String>, getter: MagicGetter) {
        self.getters.insert(name.into(), getter);
    }

    pub fn register_setter(&mut self, name: impl Into<String>, setter: MagicSetter) {
        self.setters.insert(name.into(), setter);
    }

    pub fn register_fixture(&mut self, name: impl Into<String>, fixture: Fixture) {
        self.fixtures.insert(name.into(), fixture);
    }

    /// Starts an evaluation: opens a transaction, tracks a fresh frame on
    /// every chained container, and enforces the nesting limit.
    pub fn begin_eval(&mut self) -> EngineResult<EvalFrames> {
        if self.depth.value() >= MAX_EVAL_DEPTH {
            return Err(PatternError::Script(
                "embedded evaluation nested too deeply".to_string(),
            ));
        }
        let tx = self.log.begin();
        track_chainmap(&mut self.log, &mut self.locals, NsUndo::PopLocals);
        track_chainmap(&mut self.log, &mut self.globals, NsUndo::PopGlobals);
        track_chainmap(&mut self.log, &mut self.getter_cache, NsUndo::PopGetterCache);
        track_chainstack(&mut self.log, &mut self.resolving, NsUndo::PopResolving);
        track_chaincounter(&mut self.log, &mut self.depth, NsUndo::PopDepth);
        self.depth.inc();
        Ok(EvalFrames { tx })
    }

    /// Ends an evaluation: rolls the transaction back, reverting every
    /// write made since `begin_eval`.
    pub fn end_eval(&mut self, frames: EvalFrames) {
        for op in self.log.rollback(frames.tx) {
            match op {
                NsUndo::PopLocals(frame) => self.locals.pop_map(frame),
                NsUndo::PopGlobals(frame) => self.globals.pop_map(frame),
                NsUndo::PopGetterCache(frame) => self.getter_cache.pop_map(frame),
                NsUndo::PopResolving(frame) => self.resolving.pop_stack(frame),
                NsUndo::PopDepth(frame) => self.depth.pop_counter(frame),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eval_frames_revert_writes() {
        let mut ns = EmbeddedNs::new();
        ns.set_global("base", Value::Int(1));

        let frames = ns.begin_eval().unwrap();
        ns.set_local("tmp", Value::Int(2));
        ns.set_global("base", Value::Int(3));
        assert_eq!(ns.locals.get(&"tmp".to_string()), Some(&Value::Int(2)));
        assert_eq!(ns.globals.get(&"base".to_string()), Some(&Value::Int(3)));
        ns.end_eval(frames);

        assert_eq!(ns.locals.get(&"tmp".to_string()), None);
        assert_eq!(ns.globals.get(&"base".to_string()), Some(&Value::Int(1)));
    }

    #[test]
    fn nested_evaluations_unwind_in_order() {
        let mut ns = EmbeddedNs::new();
        let outer = ns.begin_eval().unwrap();
        ns.set_local("x", Value::Int(1));

        let inner = ns.begin_eval().unwrap();
        ns.set_local("x", Value::Int(2));
        assert_eq!(ns.locals.get(&"x".to_string()), Some(&Value::Int(2)));
        ns.end_eval(inner);

        assert_eq!(ns.locals.get(&"x".to_string()), Some(&Value::Int(1)));
        ns.end_eval(outer);
        assert_eq!(ns.locals.get(&"x".to_string()), None);
    }
}
