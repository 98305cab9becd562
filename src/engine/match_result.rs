//! Hierarchical capture scopes with transactional mutation.
//!
//! A `MatchResult` is a tree of scopes owned by an arena; scopes link to
//! their parent by index so the tree carries no reference cycles. Keys are
//! insertion-once: rebinding a key succeeds only when the new value equals
//! the existing one, anything else is a [`PatternError::CaptureCollision`].
//! Every mutation records a compensating operation in the transaction log,
//! so a rolled-back transaction leaves the tree exactly as it found it.

use std::collections::HashMap;

use crate::engine::errors::{EngineResult, PatternError};
use crate::engine::transactions::{TransactionLog, Tx};
use crate::engine::value::Value;

/// Index of a scope in the arena. The root scope is always index 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(usize);

#[derive(Debug, Clone, PartialEq)]
enum Binding {
    /// A regular bound key.
    Value(Value),
    /// Declared by `declare_var`, not yet filled.
    Declared,
    /// A declared variable that a descendant scope filled.
    Filled(Value),
}

#[derive(Debug, Clone, Copy)]
struct ChildRef {
    scope: ScopeId,
    // Names are stored on the scope itself; the ref only orders children.
}

#[derive(Debug, Default)]
struct Scope {
    parent: Option<ScopeId>,
    name: Option<String>,
    results: HashMap<String, Binding>,
    /// Single child scopes, indexed contiguously from 0 in insertion order.
    singles: Vec<ChildRef>,
    /// Multi child scopes, same numbering discipline, separate index space.
    multis: Vec<ChildRef>,
    /// Iteration scopes, populated when this scope is a multi child.
    items: Vec<ScopeId>,
}

#[derive(Debug)]
enum UndoOp {
    RemoveKey { scope: ScopeId, key: String },
    UnfillVar { scope: ScopeId, key: String },
    PopSingle { scope: ScopeId },
    PopMulti { scope: ScopeId },
    PopItem { multi: ScopeId },
}

#[derive(Debug)]
pub struct MatchResult {
    scopes: Vec<Scope>,
    log: TransactionLog<UndoOp>,
}

impl Default for MatchResult {
    fn default() -> Self {
        MatchResult::new()
    }
}

impl MatchResult {
    pub fn new() -> Self {
        MatchResult {
            scopes: vec![Scope::default()],
            log: TransactionLog::new(),
        }
    }

    pub fn root(&self) -> ScopeId {
        ScopeId(0)
    }

    fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0]
    }

    fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.0]
    }

    /// Binds `key` in `scope`. Walks ancestor scopes first: an equal
    /// existing binding is a silent success, a conflicting one is a
    /// `CaptureCollision`, and a declared-but-unset variable is filled in
    /// place (in the scope that declared it).
    pub fn set(&mut self, scope: ScopeId, key: &str, value: Value) -> EngineResult<()> {
        let mut cur = Some(scope);
        while let Some(id) = cur {
            if let Some(binding) = self.scope(id).results.get(key) {
                return match binding {
                    Binding::Value(existing) | Binding::Filled(existing) => {
                        if *existing == value {
                            Ok(())
                        } else {
                            Err(PatternError::CaptureCollision {
                                name: key.to_string(),
                                existing: existing.clone(),
                                updated: value,
                            })
                        }
                    }
                    Binding::Declared => {
                        self.scope_mut(id)
                            .results
                            .insert(key.to_string(), Binding::Filled(value));
                        self.log.record(UndoOp::UnfillVar {
                            scope: id,
                            key: key.to_string(),
                        });
                        Ok(())
                    }
                };
            }
            cur = self.scope(id).parent;
        }

        self.scope_mut(scope)
            .results
            .insert(key.to_string(), Binding::Value(value));
        self.log.record(UndoOp::RemoveKey {
            scope,
            key: key.to_string(),
        });
        Ok(())
    }

    /// `set` with an optional capture name; `None` is a silent match.
    pub fn set_opt(
        &mut self,
        scope: ScopeId,
        key: Option<&str>,
        value: Value,
    ) -> EngineResult<()> {
        match key {
            Some(key) => self.set(scope, key, value),
            None => Ok(()),
        }
    }

    /// Reads `key`, walking ancestor scopes. `Ok(None)` means unbound;
    /// reading a declared-but-unset variable is an internal error.
    pub fn get(&self, scope: ScopeId, key: &str) -> EngineResult<Option<Value>> {
        let mut cur = Some(scope);
        while let Some(id) = cur {
            if let Some(binding) = self.scope(id).results.get(key) {
                return match binding {
                    Binding::Value(v) | Binding::Filled(v) => Ok(Some(v.clone())),
                    Binding::Declared => Err(PatternError::UndefinedVar(key.to_string())),
                };
            }
            cur = self.scope(id).parent;
        }
        Ok(None)
    }

    /// Declares `name` as a placeholder that descendant scopes may fill
    /// even though the binding lives here.
    pub fn declare_var(&mut self, scope: ScopeId, name: &str) -> EngineResult<()> {
        let mut cur = Some(scope);
        while let Some(id) = cur {
            if self.scope(id).results.contains_key(name) {
                return Err(PatternError::DuplicateValue(name.to_string()));
            }
            cur = self.scope(id).parent;
        }
        self.scope_mut(scope)
            .results
            .insert(name.to_string(), Binding::Declared);
        self.log.record(UndoOp::RemoveKey {
            scope,
            key: name.to_string(),
        });
        Ok(())
    }

    fn alloc(&mut self, parent: ScopeId, name: Option<&str>) -> ScopeId {
        let id = ScopeId(self.scopes.len());
        self.scopes.push(Scope {
            parent: Some(parent),
            name: name.map(|n| n.to_string()),
            ..Scope::default()
        });
        id
    }

    fn check_child_name(&self, parent: ScopeId, name: Option<&str>) -> EngineResult<()> {
        if let Some(name) = name {
            let taken = self
                .scope(parent)
                .singles
                .iter()
                .chain(self.scope(parent).multis.iter())
                .any(|c| self.scope(c.scope).name.as_deref() == Some(name));
            if taken {
                return Err(PatternError::DuplicateValue(name.to_string()));
            }
        }
        Ok(())
    }

    /// Creates a child single scope, linked by the next integer index and
    /// the optional name.
    pub fn new_scope(&mut self, parent: ScopeId, name: Option<&str>) -> EngineResult<ScopeId> {
        self.check_child_name(parent, name)?;
        let id = self.alloc(parent, name);
        self.scope_mut(parent).singles.push(ChildRef { scope: id });
        self.log.record(UndoOp::PopSingle { scope: parent });
        Ok(id)
    }

    /// Creates a child multi scope: an ordered stack of iteration scopes.
    pub fn new_multi_scope(
        &mut self,
        parent: ScopeId,
        name: Option<&str>,
    ) -> EngineResult<ScopeId> {
        self.check_child_name(parent, name)?;
        let id = self.alloc(parent, name);
        self.scope_mut(parent).multis.push(ChildRef { scope: id });
        self.log.record(UndoOp::PopMulti { scope: parent });
        Ok(id)
    }

    /// Appends a fresh iteration scope to a multi scope.
    pub fn new_multi_item(&mut self, multi: ScopeId) -> ScopeId {
        let id = self.alloc(multi, None);
        self.scope_mut(multi).items.push(id);
        self.log.record(UndoOp::PopItem { multi });
        id
    }

    pub fn sub(&self, parent: ScopeId, index: usize) -> Option<ScopeId> {
        self.scope(parent).singles.get(index).map(|c| c.scope)
    }

    pub fn sub_named(&self, parent: ScopeId, name: &str) -> Option<ScopeId> {
        self.scope(parent)
            .singles
            .iter()
            .map(|c| c.scope)
            .find(|&s| self.scope(s).name.as_deref() == Some(name))
    }

    pub fn subs(&self, parent: ScopeId, index: usize) -> Option<ScopeId> {
        self.scope(parent).multis.get(index).map(|c| c.scope)
    }

    pub fn subs_named(&self, parent: ScopeId, name: &str) -> Option<ScopeId> {
        self.scope(parent)
            .multis
            .iter()
            .map(|c| c.scope)
            .find(|&s| self.scope(s).name.as_deref() == Some(name))
    }

    /// Iteration scopes of a multi scope, in match order.
    pub fn items(&self, multi: ScopeId) -> Vec<ScopeId> {
        self.scope(multi).items.clone()
    }

    pub fn single_count(&self, parent: ScopeId) -> usize {
        self.scope(parent).singles.len()
    }

    pub fn multi_count(&self, parent: ScopeId) -> usize {
        self.scope(parent).multis.len()
    }

    /// Flattened view of every binding visible from `scope` (ancestors
    /// included, nearest scope wins). Declared-but-unset variables are
    /// skipped.
    pub fn visible_bindings(&self, scope: ScopeId) -> std::collections::BTreeMap<String, Value> {
        let mut out = std::collections::BTreeMap::new();
        let mut cur = Some(scope);
        while let Some(id) = cur {
            for (key, binding) in &self.scope(id).results {
                if let Binding::Value(v) | Binding::Filled(v) = binding {
                    out.entry(key.clone()).or_insert_with(|| v.clone());
                }
            }
            cur = self.scope(id).parent;
        }
        out
    }

    // -- transactions ------------------------------------------------------

    pub fn begin(&mut self) -> Tx {
        self.log.begin()
    }

    pub fn commit(&mut self, tx: Tx) {
        self.log.commit(tx);
    }

    pub fn rollback(&mut self, tx: Tx) {
        let ops = self.log.rollback(tx);
        for op in ops {
            self.apply_undo(op);
        }
    }

    /// Runs `f` inside a transaction: commit on `Ok`, rollback on `Err`.
    pub fn transact<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let tx = self.begin();
        match f(self) {
            Ok(v) => {
                self.commit(tx);
                Ok(v)
            }
            Err(e) => {
                self.rollback(tx);
                Err(e)
            }
        }
    }

    fn apply_undo(&mut self, op: UndoOp) {
        match op {
            UndoOp::RemoveKey { scope, key } => {
                self.scope_mut(scope).results.remove(&key);
            }
            UndoOp::UnfillVar { scope, key } => {
                self.scope_mut(scope)
                    .results
                    .insert(key, Binding::Declared);
            }
            UndoOp::PopSingle { scope } => {
                self.scope_mut(scope).singles.pop();
            }
            UndoOp::PopMulti { scope } => {
                self.scope_mut(scope).multis.pop();
            }
            UndoOp::PopItem { multi } => {
                self.scope_mut(multi).items.pop();
            }
        }
    }

    // -- serialization -----------------------------------------------------

    /// Serializes the root scope. Literal results merge with `sub_matches`
    /// (named or index-keyed singles) and `sub_multi_matches` (named or
    /// index-keyed lists); integer keys appear stringified. When a scope has
    /// both an index and a name, only the name appears. Empty `sub_matches`
    /// and `sub_multi_matches` are omitted.
    pub fn to_obj(&self) -> serde_json::Value {
        self.scope_to_obj(self.root())
    }

    pub fn scope_to_obj(&self, scope: ScopeId) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        let s = self.scope(scope);

        let mut keys: Vec<&String> = s.results.keys().collect();
        keys.sort();
        for key in keys {
            match &s.results[key] {
                Binding::Value(v) | Binding::Filled(v) => {
                    map.insert(key.clone(), v.to_json());
                }
                Binding::Declared => {}
            }
        }

        let mut sub_matches = serde_json::Map::new();
        for (ix, child) in s.singles.iter().enumerate() {
            let key = match &self.scope(child.scope).name {
                Some(name) => name.clone(),
                None => ix.to_string(),
            };
            sub_matches.insert(key, self.scope_to_obj(child.scope));
        }
        if !sub_matches.is_empty() {
            map.insert("sub_matches".to_string(), sub_matches.into());
        }

        let mut sub_multis = serde_json::Map::new();
        for (ix, child) in s.multis.iter().enumerate() {
            let key = match &self.scope(child.scope).name {
                Some(name) => name.clone(),
                None => ix.to_string(),
            };
            let items: Vec<serde_json::Value> = self
                .scope(child.scope)
                .items
                .iter()
                .map(|&item| self.scope_to_obj(item))
                .collect();
            sub_multis.insert(key, items.into());
        }
        if !sub_multis.is_empty() {
            map.insert("sub_multi_matches".to_string(), sub_multis.into());
        }

        map.into()
    }

    pub fn to_json(&self) -> String {
        self.to_obj().to_string()
    }
}
