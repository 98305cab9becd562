//! Operand patterns and the consumer protocol.
//!
//! Operand-level patterns are consumers: each one takes the remaining
//! operand sequence, decides how much of it to eat, and continues the chain
//! on the rest. Wildcards try their candidate splits under transactions and
//! keep the first split whose continuation succeeds, which gives `*` and
//! register ranges their backtracking behavior.

use std::fmt;

use crate::asm::{AddrMode, MemOffset, Operand, Reg, RegList, Shift, ShiftOp, ShiftedReg};
use crate::engine::context::Session;
use crate::engine::errors::{EngineResult, PatternError};
use crate::engine::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum RegPat {
    Exact(Reg),
    Wildcard(Option<String>),
}

impl RegPat {
    fn match_reg(&self, reg: Reg, s: &mut Session<'_>) -> EngineResult<()> {
        match self {
            RegPat::Exact(expected) => {
                if *expected == reg {
                    Ok(())
                } else {
                    Err(PatternError::PatternValueMismatch {
                        expected: expected.to_string(),
                        got: reg.to_string(),
                    })
                }
            }
            RegPat::Wildcard(capture) => s.bind(capture.as_deref(), Value::Reg(reg)),
        }
    }
}

impl fmt::Display for RegPat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegPat::Exact(r) => write!(f, "{}", r),
            RegPat::Wildcard(None) => write!(f, "@"),
            RegPat::Wildcard(Some(cap)) => write!(f, "@:{}", cap),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShiftOpPat {
    Exact(ShiftOp),
    Wildcard(Option<String>),
}

impl fmt::Display for ShiftOpPat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShiftOpPat::Exact(op) => write!(f, "{}", op),
            ShiftOpPat::Wildcard(None) => write!(f, "@"),
            ShiftOpPat::Wildcard(Some(cap)) => write!(f, "@:{}", cap),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShiftValPat {
    Exact(i64),
    Wildcard(Option<String>),
}

impl fmt::Display for ShiftValPat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShiftValPat::Exact(v) => write!(f, "{}", v),
            ShiftValPat::Wildcard(None) => write!(f, "@"),
            ShiftValPat::Wildcard(Some(cap)) => write!(f, "@:{}", cap),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShiftPat {
    pub op: ShiftOpPat,
    pub val: ShiftValPat,
}

impl ShiftPat {
    fn match_shift(&self, shift: Shift, s: &mut Session<'_>) -> EngineResult<()> {
        match &self.op {
            ShiftOpPat::Exact(op) => {
                if *op != shift.op {
                    return Err(PatternError::PatternValueMismatch {
                        expected: op.to_string(),
                        got: shift.op.to_string(),
                    });
                }
            }
            ShiftOpPat::Wildcard(capture) => {
                s.bind(capture.as_deref(), Value::Str(shift.op.name().to_string()))?;
            }
        }
        match &self.val {
            ShiftValPat::Exact(v) => {
                if *v != shift.amount {
                    return Err(PatternError::PatternValueMismatch {
                        expected: v.to_string(),
                        got: shift.amount.to_string(),
                    });
                }
                Ok(())
            }
            ShiftValPat::Wildcard(capture) => {
                s.bind(capture.as_deref(), Value::Int(shift.amount))
            }
        }
    }
}

impl fmt::Display for ShiftPat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.op, self.val)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShiftedRegPat {
    pub reg: RegPat,
    pub shift: Option<ShiftPat>,
}

impl ShiftedRegPat {
    fn match_shifted(&self, sr: ShiftedReg, s: &mut Session<'_>) -> EngineResult<()> {
        self.reg.match_reg(sr.reg, s)?;
        match (&self.shift, sr.shift) {
            (None, None) => Ok(()),
            (Some(pat), Some(shift)) => pat.match_shift(shift, s),
            (None, Some(shift)) => Err(PatternError::PatternValueMismatch {
                expected: self.reg.to_string(),
                got: format!("{}, {}", sr.reg, shift),
            }),
            (Some(pat), None) => Err(PatternError::PatternValueMismatch {
                expected: format!("{}, {}", self.reg, pat),
                got: sr.reg.to_string(),
            }),
        }
    }
}

impl fmt::Display for ShiftedRegPat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.shift {
            None => write!(f, "{}", self.reg),
            Some(shift) => write!(f, "{}, {}", self.reg, shift),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImmPat {
    Exact(i64),
    Wildcard(Option<String>),
}

impl fmt::Display for ImmPat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImmPat::Exact(v) => write!(f, "#{}", v),
            ImmPat::Wildcard(None) => write!(f, "#@"),
            ImmPat::Wildcard(Some(cap)) => write!(f, "#@:{}", cap),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MemOffsetPat {
    Imm(i64),
    ImmWildcard(Option<String>),
    Reg(ShiftedRegPat),
    /// Bare `@`: any offset shape, bound as its operand value.
    Any(Option<String>),
}

impl MemOffsetPat {
    fn match_offset(&self, offset: &MemOffset, s: &mut Session<'_>) -> EngineResult<()> {
        match (self, offset) {
            (MemOffsetPat::Imm(v), MemOffset::Imm(got)) => {
                if v == got {
                    Ok(())
                } else {
                    Err(PatternError::PatternValueMismatch {
                        expected: format!("#{}", v),
                        got: format!("#{}", got),
                    })
                }
            }
            (MemOffsetPat::ImmWildcard(capture), MemOffset::Imm(got)) => {
                s.bind(capture.as_deref(), Value::Int(*got))
            }
            (MemOffsetPat::Reg(pat), MemOffset::Reg(sr)) => pat.match_shifted(*sr, s),
            (MemOffsetPat::Any(capture), MemOffset::Imm(got)) => {
                s.bind(capture.as_deref(), Value::Int(*got))
            }
            (MemOffsetPat::Any(capture), MemOffset::Reg(sr)) => {
                s.bind(capture.as_deref(), Value::Shifted(*sr))
            }
            (pat, got) => Err(PatternError::PatternTypeMismatch {
                expected: pat.to_string(),
                got: got.to_string(),
            }),
        }
    }
}

impl fmt::Display for MemOffsetPat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemOffsetPat::Imm(v) => write!(f, "#{}", v),
            MemOffsetPat::ImmWildcard(None) => write!(f, "#@"),
            MemOffsetPat::ImmWildcard(Some(cap)) => write!(f, "#@:{}", cap),
            MemOffsetPat::Reg(sr) => write!(f, "{}", sr),
            MemOffsetPat::Any(None) => write!(f, "@"),
            MemOffsetPat::Any(Some(cap)) => write!(f, "@:{}", cap),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemPat {
    pub base: RegPat,
    pub offset: Option<MemOffsetPat>,
    pub mode: AddrMode,
}

impl fmt::Display for MemPat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.mode, &self.offset) {
            (AddrMode::Offset, None) => write!(f, "[{}]", self.base),
            (AddrMode::Offset, Some(off)) => write!(f, "[{}, {}]", self.base, off),
            (AddrMode::PreIndexed, Some(off)) => write!(f, "[{}, {}]!", self.base, off),
            (AddrMode::PostIndexed, Some(off)) => write!(f, "[{}], {}", self.base, off),
            (_, None) => write!(f, "[{}]", self.base),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegRangePat {
    pub start: RegPat,
    pub end: RegPat,
}

impl fmt::Display for RegRangePat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MemMultiElemPat {
    Reg(RegPat),
    Range(RegRangePat),
    Multi(Option<String>),
}

impl fmt::Display for MemMultiElemPat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemMultiElemPat::Reg(r) => write!(f, "{}", r),
            MemMultiElemPat::Range(r) => write!(f, "{}", r),
            MemMultiElemPat::Multi(None) => write!(f, "*"),
            MemMultiElemPat::Multi(Some(cap)) => write!(f, "*:{}", cap),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OperandPat {
    Reg(RegPat),
    Shifted(ShiftedRegPat),
    Imm(ImmPat),
    Mem(MemPat),
    MemMulti(Vec<MemMultiElemPat>),
    /// Bare integer literal: matches an equal address or immediate operand.
    Int(i64),
    /// `@`: exactly one operand.
    Single(Option<String>),
    /// `*`: a possibly empty contiguous run, backtracking.
    Multi(Option<String>),
    /// `?`: zero or one operand; binds the null sentinel on a no-op.
    Optional(Option<String>),
}

impl fmt::Display for OperandPat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn cap(f: &mut fmt::Formatter<'_>, sym: &str, c: &Option<String>) -> fmt::Result {
            match c {
                None => write!(f, "{}", sym),
                Some(name) => write!(f, "{}:{}", sym, name),
            }
        }
        match self {
            OperandPat::Reg(r) => write!(f, "{}", r),
            OperandPat::Shifted(sr) => write!(f, "{}", sr),
            OperandPat::Imm(imm) => write!(f, "{}", imm),
            OperandPat::Mem(m) => write!(f, "{}", m),
            OperandPat::MemMulti(elems) => {
                let parts: Vec<String> = elems.iter().map(|e| e.to_string()).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
            OperandPat::Int(v) => write!(f, "{}", v),
            OperandPat::Single(c) => cap(f, "@", c),
            OperandPat::Multi(c) => cap(f, "*", c),
            OperandPat::Optional(c) => cap(f, "?", c),
        }
    }
}

fn fmt_operands(ops: &[Operand]) -> String {
    ops.iter()
        .map(|o| o.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn fmt_regs(regs: &[Reg]) -> String {
    regs.iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Runs the consumer chain `pats` over `ops`; the implicit terminal
/// consumer fails if any operands remain.
pub fn consume_chain(
    pats: &[OperandPat],
    ops: &[Operand],
    s: &mut Session<'_>,
) -> EngineResult<()> {
    let (pat, rest) = match pats.split_first() {
        None => {
            return if ops.is_empty() {
                Ok(())
            } else {
                Err(PatternError::NotAllOperandsMatched {
                    tail: fmt_operands(ops),
                })
            }
        }
        Some(split) => split,
    };

    match pat {
        OperandPat::Single(capture) => {
            let (head, tail) = split_head(pat, ops)?;
            s.bind(capture.as_deref(), Value::from_operand(head))?;
            consume_chain(rest, tail, s)
        }
        OperandPat::Optional(capture) => {
            if let Some((head, tail)) = ops.split_first() {
                let attempt = s.transact(|s| {
                    s.bind(capture.as_deref(), Value::from_operand(head))?;
                    consume_chain(rest, tail, s)
                });
                match attempt {
                    Ok(()) => return Ok(()),
                    Err(e) if e.is_recoverable() => {}
                    Err(e) => return Err(e),
                }
            }
            s.transact(|s| {
                s.bind(capture.as_deref(), Value::None)?;
                consume_chain(rest, ops, s)
            })
        }
        OperandPat::Multi(capture) => {
            for take in 0..=ops.len() {
                let attempt = s.transact(|s| {
                    s.bind(capture.as_deref(), Value::OperandList(ops[..take].to_vec()))?;
                    consume_chain(rest, &ops[take..], s)
                });
                match attempt {
                    Ok(()) => return Ok(()),
                    Err(e) if e.is_recoverable() => continue,
                    Err(e) => return Err(e),
                }
            }
            Err(PatternError::NoMatches)
        }
        _ => {
            let (head, tail) = split_head(pat, ops)?;
            match_single(pat, head, s)?;
            consume_chain(rest, tail, s)
        }
    }
}

fn split_head<'o>(
    pat: &OperandPat,
    ops: &'o [Operand],
) -> EngineResult<(&'o Operand, &'o [Operand])> {
    ops.split_first().ok_or_else(|| PatternError::OperandsExhausted {
        pattern: pat.to_string(),
    })
}

/// Matches a pattern that consumes exactly one operand.
fn match_single(pat: &OperandPat, op: &Operand, s: &mut Session<'_>) -> EngineResult<()> {
    match (pat, op) {
        (OperandPat::Reg(rp), Operand::Reg(reg)) => rp.match_reg(*reg, s),
        (OperandPat::Shifted(srp), Operand::Shifted(sr)) => srp.match_shifted(*sr, s),
        // A shifted-reg pattern without a shift also takes a plain register.
        (OperandPat::Shifted(srp), Operand::Reg(reg)) => srp.match_shifted(
            ShiftedReg {
                reg: *reg,
                shift: None,
            },
            s,
        ),
        (OperandPat::Imm(ImmPat::Exact(v)), Operand::Imm(got)) => {
            if v == got {
                Ok(())
            } else {
                Err(PatternError::PatternValueMismatch {
                    expected: format!("#{}", v),
                    got: format!("#{}", got),
                })
            }
        }
        (OperandPat::Imm(ImmPat::Wildcard(capture)), Operand::Imm(got)) => {
            s.bind(capture.as_deref(), Value::Int(*got))
        }
        (OperandPat::Int(v), Operand::Address(a)) => {
            if *v as u64 == *a {
                Ok(())
            } else {
                Err(PatternError::PatternValueMismatch {
                    expected: format!("0x{:X}", v),
                    got: format!("0x{:X}", a),
                })
            }
        }
        (OperandPat::Int(v), Operand::Imm(got)) => {
            if v == got {
                Ok(())
            } else {
                Err(PatternError::PatternValueMismatch {
                    expected: v.to_string(),
                    got: got.to_string(),
                })
            }
        }
        (OperandPat::Mem(mp), Operand::Mem(mem)) => {
            if mp.mode != mem.mode {
                return Err(PatternError::PatternTypeMismatch {
                    expected: mp.to_string(),
                    got: mem.to_string(),
                });
            }
            mp.base.match_reg(mem.base, s)?;
            match (&mp.offset, &mem.offset) {
                (None, None) => Ok(()),
                (Some(pat), Some(offset)) => pat.match_offset(offset, s),
                (None, Some(offset)) => Err(PatternError::PatternValueMismatch {
                    expected: mp.to_string(),
                    got: format!("offset {}", offset),
                }),
                (Some(pat), None) => Err(PatternError::PatternValueMismatch {
                    expected: pat.to_string(),
                    got: "no offset".to_string(),
                }),
            }
        }
        (OperandPat::MemMulti(elems), Operand::MemMulti(regs)) => {
            consume_reg_elems(elems, regs.regs(), s)
        }
        (pat, got) => Err(PatternError::PatternTypeMismatch {
            expected: pat.to_string(),
            got: format!("{} ({})", got, got.kind()),
        }),
    }
}

/// The register-list flavour of the consumer chain, driving `{...}`
/// elements over the operand's registers.
fn consume_reg_elems(
    elems: &[MemMultiElemPat],
    regs: &[Reg],
    s: &mut Session<'_>,
) -> EngineResult<()> {
    let (elem, rest) = match elems.split_first() {
        None => {
            return if regs.is_empty() {
                Ok(())
            } else {
                Err(PatternError::NotAllOperandsMatched {
                    tail: fmt_regs(regs),
                })
            }
        }
        Some(split) => split,
    };

    match elem {
        MemMultiElemPat::Reg(rp) => {
            let (head, tail) = regs.split_first().ok_or_else(|| {
                PatternError::OperandsExhausted {
                    pattern: rp.to_string(),
                }
            })?;
            rp.match_reg(*head, s)?;
            consume_reg_elems(rest, tail, s)
        }
        MemMultiElemPat::Multi(capture) => {
            for take in 0..=regs.len() {
                let attempt = s.transact(|s| {
                    s.bind(
                        capture.as_deref(),
                        Value::RegList(RegList::new(regs[..take].iter().copied())),
                    )?;
                    consume_reg_elems(rest, &regs[take..], s)
                });
                match attempt {
                    Ok(()) => return Ok(()),
                    Err(e) if e.is_recoverable() => continue,
                    Err(e) => return Err(e),
                }
            }
            Err(PatternError::NoMatches)
        }
        MemMultiElemPat::Range(range) => {
            if regs.is_empty() {
                return Err(PatternError::OperandsExhausted {
                    pattern: range.to_string(),
                });
            }
            // Maximal contiguous ascending run starting at the head, then
            // each possible end position longest-first.
            let mut run = 1;
            while run < regs.len() && regs[run].index() == regs[run - 1].index() + 1 {
                run += 1;
            }
            for take in (1..=run).rev() {
                let attempt = s.transact(|s| {
                    range.start.match_reg(regs[0], s)?;
                    range.end.match_reg(regs[take - 1], s)?;
                    consume_reg_elems(rest, &regs[take..], s)
                });
                match attempt {
                    Ok(()) => return Ok(()),
                    Err(e) if e.is_recoverable() => continue,
                    Err(e) => return Err(e),
                }
            }
            Err(PatternError::NoMatches)
        }
    }
}
