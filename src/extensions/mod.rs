//! Extension registry and the built-in extension set.
//!
//! Extensions inject functions, magic getters and magic setters into the
//! embedded namespace, once per evaluation session. The default extension
//! provides the contractual names (`cursor`, `goto_next`, `skip_instructions`
//! and friends); the layout extension provides the `.obj` layout builders;
//! the analysis extension exposes host-supplied cross-reference data.

use std::collections::HashSet;
use std::rc::Rc;

use crate::engine::context::Session;
use crate::engine::cursor::Cursor;
use crate::engine::errors::{EngineResult, PatternError};
use crate::engine::data::Layout;
use crate::engine::pattern::{match_block, BlockPat, Matchable};
use crate::engine::value::{NativeFn, Value};
use crate::embedded::EmbeddedNs;

pub trait Extension {
    fn name(&self) -> &'static str;

    /// Names of extensions that must install before this one.
    fn requires(&self) -> &'static [&'static str] {
        &[]
    }

    fn install(&self, ns: &mut EmbeddedNs);
}

pub struct ExtensionRegistry {
    extensions: Vec<Box<dyn Extension>>,
}

impl Default for ExtensionRegistry {
    fn default() -> Self {
        let mut registry = ExtensionRegistry { extensions: Vec::new() };
        registry.register(Box::new(DefaultExtension));
        registry.register(Box::new(LayoutExtension));
        registry.register(Box::new(AnalysisExtension));
        registry
    }
}

impl ExtensionRegistry {
    pub fn empty() -> Self {
        ExtensionRegistry { extensions: Vec::new() }
    }

    pub fn register(&mut self, extension: Box<dyn Extension>) {
        self.extensions.push(extension);
    }

    /// Installs every registered extension, dependencies first. Installing
    /// is idempotent per namespace; dependency cycles and unknown
    /// requirements are registration bugs and panic.
    pub fn install_all(&self, ns: &mut EmbeddedNs) {
        let mut installed: HashSet<&'static str> = HashSet::new();
        let mut loading: HashSet<&'static str> = HashSet::new();
        for ext in &self.extensions {
            self.install_one(ext.as_ref(), ns, &mut installed, &mut loading);
        }
    }

    fn install_one(
        &self,
        ext: &dyn Extension,
        ns: &mut EmbeddedNs,
        installed: &mut HashSet<&'static str>,
        loading: &mut HashSet<&'static str>,
    ) {
        if installed.contains(ext.name()) {
            return;
        }
        assert!(
            loading.insert(ext.name()),
            "recursive dependency between extensions at '{}'",
            ext.name()
        );
        for dep in ext.requires() {
            let found = self
                .extensions
                .iter()
                .find(|e| e.name() == *dep)
                .unwrap_or_else(|| panic!("extension '{}' requires unknown '{}'", ext.name(), dep));
            self.install_one(found.as_ref(), ns, installed, loading);
        }
        loading.remove(ext.name());
        ext.install(ns);
        installed.insert(ext.name());
    }
}

// -- shared helpers ---------------------------------------------------------

fn arg(args: &[Value], index: usize, what: &str) -> EngineResult<Value> {
    args.get(index)
        .cloned()
        .ok_or_else(|| PatternError::Script(format!("missing argument: {}", what)))
}

fn as_pattern(s: &mut Session<'_>, value: Value) -> EngineResult<Rc<BlockPat>> {
    match value {
        Value::Pattern(p) => Ok(p),
        Value::Str(src) => s.program.create_pattern(&src),
        other => Err(PatternError::Script(format!(
            "expected a pattern, got {}",
            other.kind()
        ))),
    }
}

fn as_cursor_list(value: Value) -> EngineResult<Vec<Cursor>> {
    let items = match value {
        Value::List(items) => items,
        other => {
            return Err(PatternError::Script(format!(
                "expected a list of cursors, got {}",
                other.kind()
            )))
        }
    };
    items
        .into_iter()
        .map(|v| match v {
            Value::Cursor(c) => Ok(c),
            other => Err(PatternError::Script(format!(
                "expected a cursor, got {}",
                other.kind()
            ))),
        })
        .collect()
}

/// Resolves a location value: a cursor, an integer or address, or a string
/// naming a previously captured location or a program symbol.
pub(crate) fn resolve_location(s: &mut Session<'_>, value: Value) -> EngineResult<Cursor> {
    match value {
        Value::Cursor(c) => Ok(c),
        Value::Int(n) => s.program.create_cursor(n as u64),
        Value::Address(a) => s.program.create_cursor(a),
        Value::Str(name) => match s.mr.get(s.scope, &name)? {
            Some(captured) => match captured {
                Value::Str(_) => Err(PatternError::Script(format!(
                    "capture '{}' does not name a location",
                    name
                ))),
                other => resolve_location(s, other),
            },
            None => {
                let address = s.program.find_symbol(&name)?;
                s.program.create_cursor(address)
            }
        },
        other => Err(PatternError::Script(format!(
            "cannot resolve {} to a cursor",
            other.kind()
        ))),
    }
}

/// Scans from the current context, one instruction at a time, until the
/// pattern matches. Returns the cursor the match anchored at (`pre`) and
/// the cursor after the matched lines (`post`).
fn search(s: &mut Session<'_>, pattern: Rc<BlockPat>, forward: bool) -> EngineResult<(Cursor, Cursor)> {
    let mut cursor = s.ctx.cursor;
    loop {
        match match_block(&pattern, cursor, s) {
            Ok(end) => return Ok((cursor, end.cursor)),
            Err(e) if e.is_recoverable() => {}
            Err(e) => return Err(e),
        }
        let step = if forward {
            cursor.next(s.program)
        } else {
            cursor.prev(s.program)
        };
        cursor = match step {
            Ok(c) => c,
            Err(e) if e.is_recoverable() => return Err(PatternError::NoMatches),
            Err(e) => return Err(e),
        };
    }
}

/// `find_single` over an explicit cursor list: trial-match every cursor
/// into a discarded scope (so a second genuine match is reported as
/// `TooManyMatches` even when its captures would collide with the first),
/// then re-match the unique winner for real.
pub(crate) fn find_single_in(
    cursors: &[Cursor],
    pattern: &Rc<BlockPat>,
    s: &mut Session<'_>,
) -> EngineResult<Cursor> {
    let mut winner = None;
    let mut count = 0usize;
    for &cursor in cursors {
        let tx = s.mr.begin();
        let outcome = (|| {
            let scope = s.mr.new_scope(s.scope, None)?;
            let saved = s.scope;
            s.scope = scope;
            let result = match_block(pattern, cursor, s);
            s.scope = saved;
            result
        })();
        s.mr.rollback(tx);
        match outcome {
            Ok(_) => {
                count += 1;
                if count > 1 {
                    return Err(PatternError::TooManyMatches);
                }
                winner = Some(cursor);
            }
            Err(e) if e.is_recoverable() => {}
            Err(e) => return Err(e),
        }
    }
    let cursor = winner.ok_or(PatternError::NoMatches)?;
    match_block(pattern, cursor, s)?;
    Ok(cursor)
}

// -- default extension ------------------------------------------------------

pub struct DefaultExtension;

fn native(name: &'static str, func: fn(&mut Session<'_>, Vec<Value>) -> EngineResult<Value>) -> Value {
    Value::Native(NativeFn { name, func })
}

impl Extension for DefaultExtension {
    fn name(&self) -> &'static str {
        "default"
    }

    fn install(&self, ns: &mut EmbeddedNs) {
        ns.register_getter("cursor", |s| Ok(Value::Cursor(s.ctx.cursor)));
        ns.register_setter("cursor", |s, value| {
            let cursor = resolve_location(s, value)?;
            s.ctx.cursor = cursor;
            Ok(())
        });
        ns.register_getter("match_result", |s| {
            Ok(Value::Obj(s.mr.visible_bindings(s.scope)))
        });
        ns.register_getter("next_instruction", |s| {
            Ok(Value::Cursor(s.ctx.cursor.next(s.program)?))
        });
        ns.register_getter("prev_instruction", |s| {
            Ok(Value::Cursor(s.ctx.cursor.prev(s.program)?))
        });

        ns.set_global("expect", native("expect", |_, args| {
            let cond = arg(&args, 0, "condition")?;
            if cond.truthy() {
                Ok(Value::None)
            } else {
                Err(PatternError::ExpectFailure(cond.to_string()))
            }
        }));

        ns.set_global("skip_instructions", native("skip_instructions", |_, args| {
            let n = arg(&args, 0, "count")?;
            let n = n.as_int().ok_or_else(|| {
                PatternError::Script("skip_instructions expects a count".to_string())
            })?;
            Ok(Value::Matchable(Matchable::Skip(n)))
        }));

        ns.set_global("pat", native("pat", |s, args| {
            let src = arg(&args, 0, "pattern")?;
            Ok(Value::Pattern(as_pattern(s, src)?))
        }));

        ns.set_global("ptr", native("ptr", |s, args| {
            let location = arg(&args, 0, "location")?;
            Ok(Value::Cursor(resolve_location(s, location)?))
        }));

        ns.set_global("goto", native("goto", |s, args| {
            let location = arg(&args, 0, "location")?;
            s.ctx.cursor = resolve_location(s, location)?;
            Ok(Value::None)
        }));

        ns.set_global("find_single", native("find_single", |s, args| {
            let cursors = as_cursor_list(arg(&args, 0, "cursors")?)?;
            let pattern = as_pattern(s, arg(&args, 1, "pattern")?)?;
            Ok(Value::Cursor(find_single_in(&cursors, &pattern, s)?))
        }));

        ns.set_global("match_all", native("match_all", |s, args| {
            let cursors = as_cursor_list(arg(&args, 0, "cursors")?)?;
            let pattern = as_pattern(s, arg(&args, 1, "pattern")?)?;
            let name = match args.get(2) {
                None | Some(Value::None) => None,
                Some(Value::Str(name)) => Some(name.clone()),
                Some(other) => {
                    return Err(PatternError::Script(format!(
                        "match_all name must be a string, got {}",
                        other.kind()
                    )))
                }
            };
            let multi = s.mr.new_multi_scope(s.scope, name.as_deref())?;
            for cursor in cursors {
                let item = s.mr.new_multi_item(multi);
                let saved = s.scope;
                s.scope = item;
                let result = match_block(&pattern, cursor, s);
                s.scope = saved;
                result?;
            }
            Ok(Value::None)
        }));

        ns.set_global("find_next", native("find_next", |s, args| {
            let pattern = as_pattern(s, arg(&args, 0, "pattern")?)?;
            let (pre, _) = search(s, pattern, true)?;
            Ok(Value::Cursor(pre))
        }));
        ns.set_global("goto_next", native("goto_next", |s, args| {
            let pattern = as_pattern(s, arg(&args, 0, "pattern")?)?;
            let (pre, _) = search(s, pattern, true)?;
            s.ctx.cursor = pre;
            Ok(Value::None)
        }));
        ns.set_global("find_after_next", native("find_after_next", |s, args| {
            let pattern = as_pattern(s, arg(&args, 0, "pattern")?)?;
            let (_, post) = search(s, pattern, true)?;
            Ok(Value::Cursor(post))
        }));
        ns.set_global("goto_after_next", native("goto_after_next", |s, args| {
            let pattern = as_pattern(s, arg(&args, 0, "pattern")?)?;
            let (_, post) = search(s, pattern, true)?;
            s.ctx.cursor = post;
            Ok(Value::None)
        }));
        ns.set_global("find_prev", native("find_prev", |s, args| {
            let pattern = as_pattern(s, arg(&args, 0, "pattern")?)?;
            let (pre, _) = search(s, pattern, false)?;
            Ok(Value::Cursor(pre))
        }));
        ns.set_global("goto_prev", native("goto_prev", |s, args| {
            let pattern = as_pattern(s, arg(&args, 0, "pattern")?)?;
            let (pre, _) = search(s, pattern, false)?;
            s.ctx.cursor = pre;
            Ok(Value::None)
        }));
        ns.set_global("find_before_prev", native("find_before_prev", |s, args| {
            let pattern = as_pattern(s, arg(&args, 0, "pattern")?)?;
            let (_, post) = search(s, pattern, false)?;
            Ok(Value::Cursor(post))
        }));
        ns.set_global("goto_before_prev", native("goto_before_prev", |s, args| {
            let pattern = as_pattern(s, arg(&args, 0, "pattern")?)?;
            let (_, post) = search(s, pattern, false)?;
            s.ctx.cursor = post;
            Ok(Value::None)
        }));
    }
}

// -- layout extension -------------------------------------------------------

/// Builders for the `.obj` structured-object atoms.
pub struct LayoutExtension;

fn layout_value(layout: Layout) -> EngineResult<Value> {
    Ok(Value::Layout(Rc::new(layout)))
}

impl Extension for LayoutExtension {
    fn name(&self) -> &'static str {
        "layout"
    }

    fn install(&self, ns: &mut EmbeddedNs) {
        ns.set_global("u8", native("u8", |_, _| layout_value(Layout::U8)));
        ns.set_global("u16", native("u16", |_, _| layout_value(Layout::U16)));
        ns.set_global("u32", native("u32", |_, _| layout_value(Layout::U32)));
        ns.set_global("u64", native("u64", |_, _| layout_value(Layout::U64)));
        ns.set_global("const16", native("const16", |_, args| {
            let v = arg(&args, 0, "value")?;
            let v = v.as_int().ok_or_else(|| {
                PatternError::Script("const16 expects an integer".to_string())
            })?;
            layout_value(Layout::Const {
                size: 2,
                value: v as u64,
            })
        }));
        ns.set_global("const32", native("const32", |_, args| {
            let v = arg(&args, 0, "value")?;
            let v = v.as_int().ok_or_else(|| {
                PatternError::Script("const32 expects an integer".to_string())
            })?;
            layout_value(Layout::Const {
                size: 4,
                value: v as u64,
            })
        }));
        // layout('a', u16(), 'b', u32(), ...): alternating field names and
        // field layouts.
        ns.set_global("layout", native("layout", |_, args| {
            if args.len() % 2 != 0 {
                return Err(PatternError::Script(
                    "layout expects alternating name, field pairs".to_string(),
                ));
            }
            let mut fields = Vec::with_capacity(args.len() / 2);
            for pair in args.chunks(2) {
                let name = match &pair[0] {
                    Value::Str(name) => name.clone(),
                    other => {
                        return Err(PatternError::Script(format!(
                            "layout field name must be a string, got {}",
                            other.kind()
                        )))
                    }
                };
                let field = match &pair[1] {
                    Value::Layout(l) => (**l).clone(),
                    other => {
                        return Err(PatternError::Script(format!(
                            "layout field must be a layout, got {}",
                            other.kind()
                        )))
                    }
                };
                fields.push((name, field));
            }
            layout_value(Layout::Struct(fields))
        }));
    }
}

// -- analysis extension -----------------------------------------------------

/// Cross-reference lookups backed by a host-supplied table on the program.
pub struct AnalysisExtension;

fn xref_lookup(
    s: &mut Session<'_>,
    args: Vec<Value>,
    to: bool,
) -> EngineResult<Value> {
    let location = arg(&args, 0, "location")?;
    let cursor = resolve_location(s, location)?;
    let address = cursor.address(s.program).ok_or_else(|| {
        PatternError::InvalidAccess("xref lookup needs an addressed location".to_string())
    })?;
    let addresses = if to {
        s.program.xrefs_to(address)?
    } else {
        s.program.xrefs_from(address)?
    };
    let cursors = addresses
        .into_iter()
        .map(|a| match s.program.create_cursor(a) {
            Ok(c) => Value::Cursor(c),
            Err(_) => Value::Address(a),
        })
        .collect();
    Ok(Value::List(cursors))
}

impl Extension for AnalysisExtension {
    fn name(&self) -> &'static str {
        "analysis"
    }

    fn install(&self, ns: &mut EmbeddedNs) {
        ns.set_global("xrefs_to", native("xrefs_to", |s, args| {
            xref_lookup(s, args, true)
        }));
        ns.set_global("xrefs_from", native("xrefs_from", |s, args| {
            xref_lookup(s, args, false)
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NeedsOther;
    impl Extension for NeedsOther {
        fn name(&self) -> &'static str {
            "needs_other"
        }
        fn requires(&self) -> &'static [&'static str] {
            &["other"]
        }
        fn install(&self, ns: &mut EmbeddedNs) {
            ns.set_global("b", Value::Int(2));
        }
    }

    struct Other;
    impl Extension for Other {
        fn name(&self) -> &'static str {
            "other"
        }
        fn install(&self, ns: &mut EmbeddedNs) {
            ns.set_global("a", Value::Int(1));
        }
    }

    struct CycleA;
    impl Extension for CycleA {
        fn name(&self) -> &'static str {
            "cycle_a"
        }
        fn requires(&self) -> &'static [&'static str] {
            &["cycle_b"]
        }
        fn install(&self, _: &mut EmbeddedNs) {}
    }

    struct CycleB;
    impl Extension for CycleB {
        fn name(&self) -> &'static str {
            "cycle_b"
        }
        fn requires(&self) -> &'static [&'static str] {
            &["cycle_a"]
        }
        fn install(&self, _: &mut EmbeddedNs) {}
    }

    #[test]
    fn dependencies_install_first() {
        let mut registry = ExtensionRegistry::empty();
        registry.register(Box::new(NeedsOther));
        registry.register(Box::new(Other));
        let mut ns = EmbeddedNs::new();
        registry.install_all(&mut ns);
        // Both installed, exactly once.
        assert!(ns.globals.get(&"a".to_string()).is_some());
        assert!(ns.globals.get(&"b".to_string()).is_some());
    }

    #[test]
    #[should_panic(expected = "recursive dependency")]
    fn dependency_cycles_are_rejected() {
        let mut registry = ExtensionRegistry::empty();
        registry.register(Box::new(CycleA));
        registry.register(Box::new(CycleB));
        let mut ns = EmbeddedNs::new();
        registry.install_all(&mut ns);
    }
}
