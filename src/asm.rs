//! ARM instruction data model.
//!
//! Instructions are an opcode plus an ordered operand list. Operands cover
//! the forms the matcher understands: registers, shifted registers,
//! immediates, branch addresses, register lists (`{r0, r2-r4}`) and the
//! three memory addressing forms (plain, pre-indexed `!`, post-indexed).
//! `Display` produces the canonical textual form the parsers round-trip.

use std::fmt;

use itertools::Itertools;
use smallvec::SmallVec;

/// Canonical register names, indexed by register number.
pub const REG_NAMES: [&str; 16] = [
    "r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7", "r8", "r9", "r10", "r11", "r12", "r13", "r14",
    "r15",
];

/// A general-purpose register, identified by its index.
///
/// Synonyms (`sb`, `fp`, `ip`, `sp`, `lr`, `pc`) are resolved at parse time;
/// two registers compare equal iff their indices match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reg(u8);

impl Reg {
    pub fn from_index(index: u8) -> Option<Reg> {
        if index < 16 {
            Some(Reg(index))
        } else {
            None
        }
    }

    /// Resolves a register name, including synonyms, case-insensitively.
    pub fn parse(name: &str) -> Option<Reg> {
        let lower = name.to_ascii_lowercase();
        let index = match lower.as_str() {
            "sb" => 9,
            "fp" => 11,
            "ip" => 12,
            "sp" => 13,
            "lr" => 14,
            "pc" => 15,
            _ => {
                let rest = lower.strip_prefix('r')?;
                let n: u8 = rest.parse().ok()?;
                if n > 15 {
                    return None;
                }
                n
            }
        };
        Some(Reg(index))
    }

    pub fn index(&self) -> u8 {
        self.0
    }

    /// Canonical lowercase name (`r0`..`r15`).
    pub fn name(&self) -> &'static str {
        REG_NAMES[self.0 as usize]
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShiftOp {
    Lsl,
    Lsr,
    Asr,
    Ror,
    Rrx,
}

impl ShiftOp {
    pub fn parse(name: &str) -> Option<ShiftOp> {
        match name.to_ascii_lowercase().as_str() {
            "lsl" => Some(ShiftOp::Lsl),
            "lsr" => Some(ShiftOp::Lsr),
            "asr" => Some(ShiftOp::Asr),
            "ror" => Some(ShiftOp::Ror),
            "rrx" => Some(ShiftOp::Rrx),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ShiftOp::Lsl => "lsl",
            ShiftOp::Lsr => "lsr",
            ShiftOp::Asr => "asr",
            ShiftOp::Ror => "ror",
            ShiftOp::Rrx => "rrx",
        }
    }
}

impl fmt::Display for ShiftOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A shift applied to a register operand, e.g. `lsl#2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Shift {
    pub op: ShiftOp,
    pub amount: i64,
}

impl fmt::Display for Shift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.op, self.amount)
    }
}

/// A register with an optional shift, e.g. `r1, lsl#2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShiftedReg {
    pub reg: Reg,
    pub shift: Option<Shift>,
}

impl fmt::Display for ShiftedReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.shift {
            None => write!(f, "{}", self.reg),
            Some(shift) => write!(f, "{}, {}", self.reg, shift),
        }
    }
}

/// An ordered register list as it appears in `{...}` operands.
///
/// Ranges from the source (`r2-r4`) are expanded at parse time; `Display`
/// re-groups ascending runs of three or more back into range form.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegList(pub SmallVec<[Reg; 8]>);

impl RegList {
    pub fn new(regs: impl IntoIterator<Item = Reg>) -> RegList {
        RegList(regs.into_iter().collect())
    }

    pub fn regs(&self) -> &[Reg] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RegList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let runs = self
            .0
            .iter()
            .enumerate()
            .chunk_by(|(i, r)| r.index() as i32 - *i as i32);
        let mut parts: Vec<String> = Vec::new();
        for (_, run) in &runs {
            let regs: Vec<Reg> = run.map(|(_, r)| *r).collect();
            match regs.len() {
                1 => parts.push(regs[0].to_string()),
                2 => {
                    parts.push(regs[0].to_string());
                    parts.push(regs[1].to_string());
                }
                _ => parts.push(format!("{}-{}", regs[0], regs[regs.len() - 1])),
            }
        }
        write!(f, "{}", parts.join(", "))
    }
}

/// Offset component of a memory access: an immediate or a (shifted) register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemOffset {
    Imm(i64),
    Reg(ShiftedReg),
}

impl fmt::Display for MemOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemOffset::Imm(v) => write!(f, "#{}", v),
            MemOffset::Reg(sr) => write!(f, "{}", sr),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrMode {
    /// `[base, off]`
    Offset,
    /// `[base, off]!`
    PreIndexed,
    /// `[base], off`
    PostIndexed,
}

/// A single memory access operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemAccess {
    pub base: Reg,
    pub offset: Option<MemOffset>,
    pub mode: AddrMode,
}

impl fmt::Display for MemAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.mode, &self.offset) {
            (AddrMode::Offset, None) => write!(f, "[{}]", self.base),
            (AddrMode::Offset, Some(off)) => write!(f, "[{}, {}]", self.base, off),
            (AddrMode::PreIndexed, Some(off)) => write!(f, "[{}, {}]!", self.base, off),
            (AddrMode::PostIndexed, Some(off)) => write!(f, "[{}], {}", self.base, off),
            // Pre/post forms always carry an offset; the parser enforces it.
            (_, None) => write!(f, "[{}]", self.base),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Reg(Reg),
    Shifted(ShiftedReg),
    Imm(i64),
    Address(u64),
    MemMulti(RegList),
    Mem(MemAccess),
}

impl Operand {
    /// Short shape name used in type-mismatch diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Operand::Reg(_) => "register",
            Operand::Shifted(_) => "shifted register",
            Operand::Imm(_) => "immediate",
            Operand::Address(_) => "address",
            Operand::MemMulti(_) => "register list",
            Operand::Mem(_) => "memory access",
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg(r) => write!(f, "{}", r),
            Operand::Shifted(sr) => write!(f, "{}", sr),
            Operand::Imm(v) => write!(f, "#{}", v),
            Operand::Address(a) => write!(f, "0x{:X}", a),
            Operand::MemMulti(regs) => write!(f, "{{{}}}", regs),
            Operand::Mem(m) => write!(f, "{}", m),
        }
    }
}

/// A disassembled instruction: case-insensitive opcode plus operands.
#[derive(Debug, Clone, Eq)]
pub struct Instruction {
    pub opcode: String,
    pub operands: SmallVec<[Operand; 4]>,
}

impl Instruction {
    pub fn new(opcode: impl Into<String>, operands: impl IntoIterator<Item = Operand>) -> Self {
        Instruction {
            opcode: opcode.into(),
            operands: operands.into_iter().collect(),
        }
    }
}

impl PartialEq for Instruction {
    fn eq(&self, other: &Self) -> bool {
        self.opcode.eq_ignore_ascii_case(&other.opcode) && self.operands == other.operands
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.operands.is_empty() {
            return f.write_str(&self.opcode);
        }
        let ops = self.operands.iter().map(|o| o.to_string()).join(", ");
        write!(f, "{} {}", self.opcode, ops)
    }
}

/// One line of a listing: an optional address plus an instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceLine {
    pub address: Option<u64>,
    pub instruction: Instruction,
}

impl fmt::Display for SourceLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.address {
            Some(a) => write!(f, "0x{:X}: {}", a, self.instruction),
            None => write!(f, "{}", self.instruction),
        }
    }
}

/// A parsed listing: instruction lines plus an optional terminal address
/// from a trailing bare `0xADDR:` line (marking where the code ends and,
/// typically, data begins).
#[derive(Debug, Clone, PartialEq)]
pub struct Listing {
    pub lines: Vec<SourceLine>,
    pub terminal: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reg_parse_and_synonyms() {
        assert_eq!(Reg::parse("r0"), Some(Reg(0)));
        assert_eq!(Reg::parse("R15"), Some(Reg(15)));
        assert_eq!(Reg::parse("sp"), Some(Reg(13)));
        assert_eq!(Reg::parse("LR"), Some(Reg(14)));
        assert_eq!(Reg::parse("pc"), Some(Reg(15)));
        assert_eq!(Reg::parse("sb"), Some(Reg(9)));
        assert_eq!(Reg::parse("r16"), None);
        assert_eq!(Reg::parse("foo"), None);
    }

    #[test]
    fn reg_list_display_groups_runs() {
        let list = RegList::new([0u8, 1, 2, 3, 5, 7, 8].iter().map(|&i| Reg(i)));
        assert_eq!(list.to_string(), "r0-r3, r5, r7, r8");
    }

    #[test]
    fn mem_access_display() {
        let m = MemAccess {
            base: Reg(0),
            offset: Some(MemOffset::Imm(4)),
            mode: AddrMode::PostIndexed,
        };
        assert_eq!(m.to_string(), "[r0], #4");

        let m = MemAccess {
            base: Reg(1),
            offset: Some(MemOffset::Reg(ShiftedReg {
                reg: Reg(2),
                shift: Some(Shift {
                    op: ShiftOp::Lsl,
                    amount: 2,
                }),
            })),
            mode: AddrMode::Offset,
        };
        assert_eq!(m.to_string(), "[r1, r2, lsl#2]");
    }

    #[test]
    fn instruction_opcode_case_insensitive_eq() {
        let a = Instruction::new("MOV", [Operand::Reg(Reg(0)), Operand::Reg(Reg(1))]);
        let b = Instruction::new("mov", [Operand::Reg(Reg(0)), Operand::Reg(Reg(1))]);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "MOV r0, r1");
    }
}
