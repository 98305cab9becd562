//! Pattern AST and the matcher protocol.
//!
//! A block pattern is an ordered list of line patterns plus an anchor index.
//! Matching at a cursor first sub-matches the lines before the anchor in
//! reverse (line `anchor-1` against the instruction immediately before the
//! cursor, and so on down to line 0), then the anchor line and everything
//! after it forward from the cursor. The whole match runs inside a
//! transaction, so a failed match leaves the match result untouched.

use std::rc::Rc;

use regex::Regex;
use tracing::trace;

use crate::embedded;
use crate::engine::context::{ExecutionContext, Session};
use crate::engine::cursor::Cursor;
use crate::engine::errors::{EngineResult, PatternError};
use crate::engine::operands::{consume_chain, OperandPat};
use crate::engine::value::Value;

/// Opcode pattern: a case-insensitive shell glob (metacharacters `*` and
/// `?` only) with an optional capture of the concrete opcode.
#[derive(Debug, Clone)]
pub struct OpcodePat {
    pub glob: String,
    pub capture: Option<String>,
    regex: Regex,
}

impl OpcodePat {
    pub fn new(glob: &str, capture: Option<String>) -> Result<Self, String> {
        let lower = glob.to_ascii_lowercase();
        let mut re = String::from("^");
        for ch in lower.chars() {
            match ch {
                '*' => re.push_str(".*"),
                '?' => re.push('.'),
                ch => re.push_str(&regex::escape(&ch.to_string())),
            }
        }
        re.push('$');
        let regex = Regex::new(&re).map_err(|e| format!("bad opcode glob '{}': {}", glob, e))?;
        Ok(OpcodePat {
            glob: lower,
            capture,
            regex,
        })
    }

    fn match_opcode(&self, opcode: &str, s: &mut Session<'_>) -> EngineResult<()> {
        if !self.regex.is_match(&opcode.to_ascii_lowercase()) {
            return Err(PatternError::PatternValueMismatch {
                expected: self.glob.clone(),
                got: opcode.to_string(),
            });
        }
        s.bind(self.capture.as_deref(), Value::Str(opcode.to_string()))
    }
}

impl PartialEq for OpcodePat {
    fn eq(&self, other: &Self) -> bool {
        self.glob == other.glob && self.capture == other.capture
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstructionPat {
    pub opcode: OpcodePat,
    pub operands: Vec<OperandPat>,
}

impl InstructionPat {
    /// Matches the instruction at `cursor`: opcode glob, then the operand
    /// consumer chain, which must leave no operand behind.
    fn match_at(&self, cursor: Cursor, s: &mut Session<'_>) -> EngineResult<()> {
        let inst = cursor.instruction(s.program)?;
        self.opcode.match_opcode(&inst.opcode, s)?;
        consume_chain(&self.operands, &inst.operands, s)
    }
}

/// An address line: checked or bound against the current cursor without
/// consuming an instruction. `match_reverse` does not move the cursor
/// either; both directions continue at the same position.
#[derive(Debug, Clone, PartialEq)]
pub enum AddressPat {
    Literal(u64),
    Label(String),
    Wildcard(Option<String>),
}

impl AddressPat {
    fn match_here(&self, cursor: Cursor, s: &mut Session<'_>) -> EngineResult<()> {
        let address = cursor.address(s.program);
        match self {
            AddressPat::Literal(expected) => match address {
                Some(a) if a == *expected => Ok(()),
                other => Err(PatternError::PatternValueMismatch {
                    expected: format!("0x{:X}", expected),
                    got: match other {
                        Some(a) => format!("0x{:X}", a),
                        None => "no address".to_string(),
                    },
                }),
            },
            AddressPat::Label(name) => {
                let value = match address {
                    Some(a) => Value::Address(a),
                    None => Value::None,
                };
                s.bind(Some(name.as_str()), value)
            }
            AddressPat::Wildcard(capture) => {
                let value = match address {
                    Some(a) => Value::Address(a),
                    None => Value::None,
                };
                s.bind(capture.as_deref(), value)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSize {
    Byte,
    Word,
    Dword,
    Qword,
}

impl DataSize {
    pub fn bytes(&self) -> usize {
        match self {
            DataSize::Byte => 1,
            DataSize::Word => 2,
            DataSize::Dword => 4,
            DataSize::Qword => 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataValPat {
    Lit(u64),
    Wildcard(Option<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataPat {
    /// `.db`/`.dw`/`.dd`/`.dq`: sized little-endian integers.
    Sized {
        size: DataSize,
        values: Vec<DataValPat>,
    },
    /// `.obj [name:]${expr}`: the expression yields a layout which is
    /// parsed at the cursor; the parsed object binds under the capture.
    Obj {
        capture: Option<String>,
        expr: embedded::Expr,
    },
}

/// `...` with optional bounds: try the rest of the block after skipping
/// `min..=max` instructions, first success wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkipPat {
    pub min: u32,
    pub max: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinePat {
    Address(AddressPat),
    Instruction(InstructionPat),
    Data(DataPat),
    /// `%` statement or `%%`-fenced block; forward-only.
    Code(embedded::Block),
    /// `!expr`: the expression evaluates to a pattern or matchable which is
    /// applied at the current position.
    Generator(embedded::Expr),
    Skip(SkipPat),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockPat {
    pub lines: Vec<LinePat>,
    pub anchor: usize,
}

/// A value that can be applied at a position in both directions.
#[derive(Debug, Clone, PartialEq)]
pub enum Matchable {
    /// Advance (or retreat) exactly `n` instructions.
    Skip(i64),
    Pattern(Rc<BlockPat>),
}

/// Matches `pat` with its anchor pinned at `cursor`, transactionally.
/// Returns the context after the last forward line.
pub(crate) fn match_block(
    pat: &BlockPat,
    cursor: Cursor,
    s: &mut Session<'_>,
) -> EngineResult<ExecutionContext> {
    trace!(?cursor, anchor = pat.anchor, lines = pat.lines.len(), "matching block");
    let tx = s.mr.begin();
    match run_block(pat, cursor, s) {
        Ok(ctx) => {
            s.mr.commit(tx);
            Ok(ctx)
        }
        Err(e) => {
            s.mr.rollback(tx);
            Err(e)
        }
    }
}

fn run_block(pat: &BlockPat, cursor: Cursor, s: &mut Session<'_>) -> EngineResult<ExecutionContext> {
    if pat.anchor > 0 {
        match_reverse_seq(&pat.lines, ExecutionContext::new(cursor, pat.anchor), s)?;
    }
    match_forward_seq(&pat.lines, ExecutionContext::new(cursor, pat.anchor), s)
}

/// Matches the whole of `pat` in reverse, ending just before `cursor`.
/// Used when a matchable generator is applied during a reverse sub-match.
pub(crate) fn match_block_reverse(
    pat: &BlockPat,
    cursor: Cursor,
    s: &mut Session<'_>,
) -> EngineResult<ExecutionContext> {
    let tx = s.mr.begin();
    match match_reverse_seq(&pat.lines, ExecutionContext::new(cursor, pat.lines.len()), s) {
        Ok(ctx) => {
            s.mr.commit(tx);
            Ok(ctx)
        }
        Err(e) => {
            s.mr.rollback(tx);
            Err(e)
        }
    }
}

/// Forward sub-match from `ctx.line` to the end of the block. Running past
/// the last line is the terminal no-op success.
fn match_forward_seq(
    lines: &[LinePat],
    ctx: ExecutionContext,
    s: &mut Session<'_>,
) -> EngineResult<ExecutionContext> {
    let line = match lines.get(ctx.line) {
        None => return Ok(ctx),
        Some(line) => line,
    };

    match line {
        LinePat::Address(ap) => {
            ap.match_here(ctx.cursor, s)?;
            match_forward_seq(lines, ctx.fork_next_line(), s)
        }
        LinePat::Instruction(ip) => {
            ip.match_at(ctx.cursor, s)?;
            let next = ctx.fork_next_line().fork_next_instruction(s.program)?;
            match_forward_seq(lines, next, s)
        }
        LinePat::Data(dp) => {
            let cursor = match_data_forward(dp, ctx, s)?;
            match_forward_seq(lines, ctx.fork_next_line().fork_cursor(cursor), s)
        }
        LinePat::Code(block) => {
            let after = s.exec_in_ctx(block, ctx)?;
            match_forward_seq(lines, after.fork_next_line(), s)
        }
        LinePat::Generator(expr) => {
            let (value, after) = s.eval_in_ctx(expr, ctx)?;
            let matchable = as_matchable(value, s)?;
            let cursor = apply_matchable_forward(&matchable, after.cursor, s)?;
            match_forward_seq(lines, ctx.fork_next_line().fork_cursor(cursor), s)
        }
        LinePat::Skip(sp) => {
            let mut cursor = ctx.cursor;
            for _ in 0..sp.min {
                cursor = step_or_no_match(cursor.next(s.program))?;
            }
            let mut steps = sp.min;
            loop {
                let attempt = s.transact(|s| {
                    match_forward_seq(lines, ctx.fork_next_line().fork_cursor(cursor), s)
                });
                match attempt {
                    Ok(end) => return Ok(end),
                    Err(e) if e.is_recoverable() => {}
                    Err(e) => return Err(e),
                }
                if let Some(max) = sp.max {
                    if steps >= max {
                        return Err(PatternError::NoMatches);
                    }
                }
                steps += 1;
                cursor = step_or_no_match(cursor.next(s.program))?;
            }
        }
    }
}

/// Reverse sub-match of `lines[..ctx.line]`, last line first; each line
/// binds to the cursor before the previous one. `ctx.line == 0` is the
/// terminal success.
fn match_reverse_seq(
    lines: &[LinePat],
    ctx: ExecutionContext,
    s: &mut Session<'_>,
) -> EngineResult<ExecutionContext> {
    if ctx.line == 0 {
        return Ok(ctx);
    }
    let line = &lines[ctx.line - 1];

    match line {
        LinePat::Address(ap) => {
            // Address lines do not move the cursor in either direction.
            ap.match_here(ctx.cursor, s)?;
            match_reverse_seq(lines, ctx.fork_prev_line(), s)
        }
        LinePat::Instruction(ip) => {
            let at = ctx.fork_prev_instruction(s.program)?;
            ip.match_at(at.cursor, s)?;
            match_reverse_seq(lines, at.fork_prev_line(), s)
        }
        LinePat::Data(dp) => {
            let cursor = match_data_reverse(dp, ctx, s)?;
            match_reverse_seq(lines, ctx.fork_prev_line().fork_cursor(cursor), s)
        }
        LinePat::Code(_) => Err(PatternError::PatternNotReversible(
            "embedded code line".to_string(),
        )),
        LinePat::Generator(expr) => {
            let (value, after) = s.eval_in_ctx(expr, ctx)?;
            let matchable = as_matchable(value, s)?;
            let cursor = apply_matchable_reverse(&matchable, after.cursor, s)?;
            match_reverse_seq(lines, ctx.fork_prev_line().fork_cursor(cursor), s)
        }
        LinePat::Skip(sp) => {
            let mut cursor = ctx.cursor;
            for _ in 0..sp.min {
                cursor = step_or_no_match(cursor.prev(s.program))?;
            }
            let mut steps = sp.min;
            loop {
                let attempt = s.transact(|s| {
                    match_reverse_seq(lines, ctx.fork_prev_line().fork_cursor(cursor), s)
                });
                match attempt {
                    Ok(end) => return Ok(end),
                    Err(e) if e.is_recoverable() => {}
                    Err(e) => return Err(e),
                }
                if let Some(max) = sp.max {
                    if steps >= max {
                        return Err(PatternError::NoMatches);
                    }
                }
                steps += 1;
                cursor = step_or_no_match(cursor.prev(s.program))?;
            }
        }
    }
}

fn step_or_no_match(step: EngineResult<Cursor>) -> EngineResult<Cursor> {
    match step {
        Ok(c) => Ok(c),
        Err(e) if e.is_recoverable() => Err(PatternError::NoMatches),
        Err(e) => Err(e),
    }
}

fn match_data_forward(
    dp: &DataPat,
    ctx: ExecutionContext,
    s: &mut Session<'_>,
) -> EngineResult<Cursor> {
    match dp {
        DataPat::Sized { size, values } => {
            let width = size.bytes();
            let mut cursor = ctx.cursor;
            for value in values {
                let bytes = cursor.read_bytes(s.program, width)?;
                let word = crate::engine::data::read_le(&bytes);
                match_data_value(value, word, s)?;
                cursor = cursor.offset(s.program, width as i64)?;
            }
            Ok(cursor)
        }
        DataPat::Obj { capture, expr } => {
            let (layout, after) = eval_layout(expr, ctx, s)?;
            let size = layout.sizeof();
            let mut stream = after.cursor.data_stream(s.program)?;
            let parsed = layout.parse_stream(&mut stream)?;
            s.bind(capture.as_deref(), parsed)?;
            after.cursor.offset(s.program, size as i64)
        }
    }
}

fn match_data_reverse(
    dp: &DataPat,
    ctx: ExecutionContext,
    s: &mut Session<'_>,
) -> EngineResult<Cursor> {
    match dp {
        DataPat::Sized { size, values } => {
            let width = size.bytes();
            let mut cursor = ctx.cursor;
            for value in values.iter().rev() {
                cursor = cursor.offset(s.program, -(width as i64))?;
                let bytes = cursor.read_bytes(s.program, width)?;
                let word = crate::engine::data::read_le(&bytes);
                match_data_value(value, word, s)?;
            }
            Ok(cursor)
        }
        DataPat::Obj { capture, expr } => {
            let (layout, after) = eval_layout(expr, ctx, s)?;
            let size = layout.sizeof();
            let start = after.cursor.offset(s.program, -(size as i64))?;
            let mut stream = start.data_stream(s.program)?;
            let parsed = layout.parse_stream(&mut stream)?;
            s.bind(capture.as_deref(), parsed)?;
            Ok(start)
        }
    }
}

fn match_data_value(pat: &DataValPat, word: u64, s: &mut Session<'_>) -> EngineResult<()> {
    match pat {
        DataValPat::Lit(expected) => {
            if *expected == word {
                Ok(())
            } else {
                Err(PatternError::PatternValueMismatch {
                    expected: format!("0x{:X}", expected),
                    got: format!("0x{:X}", word),
                })
            }
        }
        DataValPat::Wildcard(capture) => s.bind(capture.as_deref(), Value::Int(word as i64)),
    }
}

fn eval_layout(
    expr: &embedded::Expr,
    ctx: ExecutionContext,
    s: &mut Session<'_>,
) -> EngineResult<(Rc<crate::engine::data::Layout>, ExecutionContext)> {
    let (value, after) = s.eval_in_ctx(expr, ctx)?;
    match value {
        Value::Layout(layout) => Ok((layout, after)),
        other => Err(PatternError::Script(format!(
            "object pattern expects a layout, got {}",
            other.kind()
        ))),
    }
}

fn as_matchable(value: Value, s: &mut Session<'_>) -> EngineResult<Matchable> {
    match value {
        Value::Matchable(m) => Ok(m),
        Value::Pattern(p) => Ok(Matchable::Pattern(p)),
        Value::Str(src) => Ok(Matchable::Pattern(s.program.create_pattern(&src)?)),
        other => Err(PatternError::Script(format!(
            "generator line expects a pattern or matchable, got {}",
            other.kind()
        ))),
    }
}

fn apply_matchable_forward(
    matchable: &Matchable,
    cursor: Cursor,
    s: &mut Session<'_>,
) -> EngineResult<Cursor> {
    match matchable {
        Matchable::Skip(n) => {
            let mut cursor = cursor;
            for _ in 0..*n {
                cursor = cursor.next(s.program)?;
            }
            Ok(cursor)
        }
        Matchable::Pattern(p) => Ok(match_block(p, cursor, s)?.cursor),
    }
}

fn apply_matchable_reverse(
    matchable: &Matchable,
    cursor: Cursor,
    s: &mut Session<'_>,
) -> EngineResult<Cursor> {
    match matchable {
        Matchable::Skip(n) => {
            let mut cursor = cursor;
            for _ in 0..*n {
                cursor = cursor.prev(s.program)?;
            }
            Ok(cursor)
        }
        Matchable::Pattern(p) => Ok(match_block_reverse(p, cursor, s)?.cursor),
    }
}
