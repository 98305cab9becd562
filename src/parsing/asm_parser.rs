//! Parser for assembly listings fed to `Program::add_code_block`.
//!
//! One instruction per line: `[address:] opcode operand[, operand]*`.
//! Addresses are hex or decimal and may be absent except where the caller
//! supplies one. A trailing bare `0xADDR:` line marks the terminal address
//! of the block.

use smallvec::SmallVec;

use crate::asm::{
    AddrMode, Instruction, Listing, MemAccess, MemOffset, Operand, Reg, RegList, Shift, ShiftOp,
    ShiftedReg, SourceLine,
};
use crate::parsing::{parse_i64, parse_u64, split_commas};

pub fn parse_listing(text: &str) -> Result<Listing, String> {
    let mut lines = Vec::new();
    let mut terminal = None;

    for (lineno, raw) in text.lines().enumerate() {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }
        if terminal.is_some() {
            return Err(format!(
                "line {}: instruction after terminal address line",
                lineno + 1
            ));
        }

        let (address, rest) = split_address_prefix(trimmed)
            .map_err(|e| format!("line {}: {}", lineno + 1, e))?;
        if rest.is_empty() {
            match address {
                Some(a) => {
                    terminal = Some(a);
                    continue;
                }
                None => return Err(format!("line {}: empty line content", lineno + 1)),
            }
        }
        let instruction =
            parse_instruction(rest).map_err(|e| format!("line {}: {}", lineno + 1, e))?;
        lines.push(SourceLine {
            address,
            instruction,
        });
    }

    Ok(Listing { lines, terminal })
}

/// Splits an optional leading `0x...:` / `1234:` address prefix.
fn split_address_prefix(line: &str) -> Result<(Option<u64>, &str), String> {
    let first = line.split_whitespace().next().unwrap_or("");
    if let Some(candidate) = first.strip_suffix(':') {
        if candidate
            .chars()
            .next()
            .map(|c| c.is_ascii_digit())
            .unwrap_or(false)
        {
            let address = parse_u64(candidate)?;
            let rest = line[first.len()..].trim();
            return Ok((Some(address), rest));
        }
    }
    Ok((None, line))
}

pub fn parse_instruction(text: &str) -> Result<Instruction, String> {
    let text = text.trim();
    let (opcode, rest) = match text.split_once(char::is_whitespace) {
        Some((opcode, rest)) => (opcode, rest.trim()),
        None => (text, ""),
    };
    if opcode.is_empty() {
        return Err("missing opcode".to_string());
    }
    let operands = parse_operands(rest)?;
    Ok(Instruction {
        opcode: opcode.to_string(),
        operands,
    })
}

fn parse_operands(text: &str) -> Result<SmallVec<[Operand; 4]>, String> {
    let parts = split_commas(text);
    let mut operands = SmallVec::new();
    let mut i = 0;
    while i < parts.len() {
        let part = parts[i].as_str();
        if let Some(inner) = part.strip_prefix('[') {
            let (mem, consumed) = parse_mem(inner, part, &parts[i + 1..])?;
            operands.push(Operand::Mem(mem));
            i += 1 + consumed;
            continue;
        }
        if part.starts_with('{') {
            let inner = part
                .strip_prefix('{')
                .and_then(|p| p.strip_suffix('}'))
                .ok_or_else(|| format!("malformed register list '{}'", part))?;
            operands.push(Operand::MemMulti(parse_reg_list(inner)?));
            i += 1;
            continue;
        }
        if let Some(imm) = part.strip_prefix('#') {
            operands.push(Operand::Imm(parse_i64(imm)?));
            i += 1;
            continue;
        }
        if let Some(reg) = Reg::parse(part) {
            // A following `lsl#2`-style part belongs to this register.
            if let Some(shift) = parts.get(i + 1).and_then(|p| try_parse_shift(p)) {
                operands.push(Operand::Shifted(ShiftedReg {
                    reg,
                    shift: Some(shift?),
                }));
                i += 2;
            } else {
                operands.push(Operand::Reg(reg));
                i += 1;
            }
            continue;
        }
        if part.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
            operands.push(Operand::Address(parse_u64(part)?));
            i += 1;
            continue;
        }
        return Err(format!("unrecognized operand '{}'", part));
    }
    Ok(operands)
}

/// Parses the inside of a `[...]` operand, plus any post-indexed offset in
/// the parts that follow. Returns the access and how many extra parts were
/// consumed.
fn parse_mem(inner: &str, whole: &str, following: &[String]) -> Result<(MemAccess, usize), String> {
    let (body, pre) = match inner.strip_suffix("]!") {
        Some(body) => (body, true),
        None => (
            inner
                .strip_suffix(']')
                .ok_or_else(|| format!("malformed memory operand '{}'", whole))?,
            false,
        ),
    };
    let inner_parts = split_commas(body);
    if inner_parts.is_empty() {
        return Err(format!("empty memory operand '{}'", whole));
    }
    let base = Reg::parse(&inner_parts[0])
        .ok_or_else(|| format!("bad base register '{}'", inner_parts[0]))?;
    let offset = parse_mem_offset(&inner_parts[1..])?;

    if pre {
        if offset.is_none() {
            return Err(format!("pre-indexed access needs an offset: '{}'", whole));
        }
        return Ok((
            MemAccess {
                base,
                offset,
                mode: AddrMode::PreIndexed,
            },
            0,
        ));
    }

    // `[base], off` — the offset rides in the following comma parts.
    if offset.is_none() && !following.is_empty() {
        let (post, consumed) = parse_post_offset(following)?;
        if let Some(post) = post {
            return Ok((
                MemAccess {
                    base,
                    offset: Some(post),
                    mode: AddrMode::PostIndexed,
                },
                consumed,
            ));
        }
    }

    Ok((
        MemAccess {
            base,
            offset,
            mode: AddrMode::Offset,
        },
        0,
    ))
}

fn parse_mem_offset(parts: &[String]) -> Result<Option<MemOffset>, String> {
    match parts {
        [] => Ok(None),
        [one] => {
            if let Some(imm) = one.strip_prefix('#') {
                Ok(Some(MemOffset::Imm(parse_i64(imm)?)))
            } else {
                let reg = Reg::parse(one).ok_or_else(|| format!("bad offset '{}'", one))?;
                Ok(Some(MemOffset::Reg(ShiftedReg { reg, shift: None })))
            }
        }
        [reg_part, shift_part] => {
            let reg =
                Reg::parse(reg_part).ok_or_else(|| format!("bad offset register '{}'", reg_part))?;
            let shift = try_parse_shift(shift_part)
                .ok_or_else(|| format!("bad shift '{}'", shift_part))??;
            Ok(Some(MemOffset::Reg(ShiftedReg {
                reg,
                shift: Some(shift),
            })))
        }
        _ => Err("too many components in memory offset".to_string()),
    }
}

fn parse_post_offset(parts: &[String]) -> Result<(Option<MemOffset>, usize), String> {
    let first = &parts[0];
    if let Some(imm) = first.strip_prefix('#') {
        return Ok((Some(MemOffset::Imm(parse_i64(imm)?)), 1));
    }
    if let Some(reg) = Reg::parse(first) {
        if let Some(shift) = parts.get(1).and_then(|p| try_parse_shift(p)) {
            return Ok((
                Some(MemOffset::Reg(ShiftedReg {
                    reg,
                    shift: Some(shift?),
                })),
                2,
            ));
        }
        return Ok((Some(MemOffset::Reg(ShiftedReg { reg, shift: None })), 1));
    }
    Ok((None, 0))
}

/// Recognizes `lsl#2` / `ror #31` shift parts; `None` means the text is not
/// a shift at all, `Some(Err)` means it is one but malformed.
fn try_parse_shift(text: &str) -> Option<Result<Shift, String>> {
    let lower = text.trim().to_ascii_lowercase();
    let op_text: String = lower.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
    let op = ShiftOp::parse(&op_text)?;
    let rest = lower[op_text.len()..].trim_start();
    let amount_text = rest.strip_prefix('#')?;
    Some(parse_i64(amount_text).map(|amount| Shift { op, amount }))
}

fn parse_reg_list(inner: &str) -> Result<RegList, String> {
    let mut regs: Vec<Reg> = Vec::new();
    for part in split_commas(inner) {
        let expanded = if let Some((start, end)) = part.split_once('-') {
            let start = Reg::parse(start.trim())
                .ok_or_else(|| format!("bad range start '{}'", start))?;
            let end =
                Reg::parse(end.trim()).ok_or_else(|| format!("bad range end '{}'", end))?;
            if start.index() >= end.index() {
                return Err(format!("invalid register range '{}'", part));
            }
            (start.index()..=end.index())
                .map(|i| Reg::from_index(i).expect("range bounds checked"))
                .collect()
        } else {
            let reg =
                Reg::parse(&part).ok_or_else(|| format!("bad register '{}'", part))?;
            vec![reg]
        };
        for reg in expanded {
            if regs.contains(&reg) {
                return Err(format!("register {} appears twice in list", reg));
            }
            regs.push(reg);
        }
    }
    Ok(RegList::new(regs))
}
