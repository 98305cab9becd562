//! Parser for pattern text.
//!
//! Lines are newline-separated. A `> ` prefix marks the anchor line (at
//! most one per block; default 0). `%` starts a single embedded statement,
//! `%%` fences a multi-line embedded block, `!` starts a matchable
//! generator expression, `...` a skip line, `.db`/`.dw`/`.dd`/`.dq`/`.obj`
//! data atoms. Anything else is an instruction pattern, optionally preceded
//! by an `address:` / `label:` / `@:cap:` prefix which becomes its own
//! address line.

use crate::asm::{AddrMode, Reg, ShiftOp};
use crate::embedded;
use crate::engine::operands::{
    ImmPat, MemMultiElemPat, MemOffsetPat, MemPat, OperandPat, RegPat, RegRangePat, ShiftOpPat,
    ShiftPat, ShiftValPat, ShiftedRegPat,
};
use crate::engine::pattern::{
    AddressPat, BlockPat, DataPat, DataSize, DataValPat, InstructionPat, LinePat, OpcodePat,
    SkipPat,
};
use crate::parsing::{parse_i64, parse_u64, split_capture, split_commas};

pub fn parse_pattern(text: &str) -> Result<BlockPat, String> {
    let mut lines: Vec<LinePat> = Vec::new();
    let mut anchor: Option<usize> = None;
    let mut fence: Option<Vec<String>> = None;
    // A `%`/`!` line whose triple-quoted string is still open; following
    // raw lines belong to it until the string closes.
    let mut pending: Option<String> = None;

    for (lineno, raw) in text.lines().enumerate() {
        let trimmed = raw.trim();

        if let Some(buf) = pending.as_mut() {
            buf.push('\n');
            buf.push_str(raw);
            if !has_open_triple_quote(buf) {
                let source = pending.take().expect("pending checked above");
                parse_line(&source, &mut lines)
                    .map_err(|e| format!("line {}: {}", lineno + 1, e))?;
            }
            continue;
        }

        if let Some(buf) = fence.as_mut() {
            if trimmed == "%%" {
                let source = buf.join("\n");
                let block = embedded::parse_block(&source)
                    .map_err(|e| format!("embedded block ending at line {}: {}", lineno + 1, e))?;
                lines.push(LinePat::Code(block));
                fence = None;
            } else {
                buf.push(raw.to_string());
            }
            continue;
        }

        if trimmed.is_empty() {
            continue;
        }

        let mut content = trimmed;
        let mut is_anchor = false;
        if let Some(rest) = content.strip_prefix("> ") {
            is_anchor = true;
            content = rest.trim_start();
        }
        if is_anchor {
            if anchor.is_some() {
                return Err(format!("line {}: multiple anchor lines", lineno + 1));
            }
            anchor = Some(lines.len());
        }

        if content == "%%" {
            fence = Some(Vec::new());
            continue;
        }

        if (content.starts_with('%') || content.starts_with('!')) && has_open_triple_quote(content)
        {
            pending = Some(content.to_string());
            continue;
        }

        parse_line(content, &mut lines).map_err(|e| format!("line {}: {}", lineno + 1, e))?;
    }

    if fence.is_some() {
        return Err("unterminated %% block".to_string());
    }
    if pending.is_some() {
        return Err("unterminated triple-quoted string".to_string());
    }
    let anchor = anchor.unwrap_or(0);
    if !lines.is_empty() && anchor >= lines.len() {
        return Err("anchor line has no pattern content".to_string());
    }
    Ok(BlockPat { lines, anchor })
}

fn count_occurrences(text: &str, needle: &str) -> usize {
    let mut count = 0;
    let mut rest = text;
    while let Some(pos) = rest.find(needle) {
        count += 1;
        rest = &rest[pos + needle.len()..];
    }
    count
}

fn has_open_triple_quote(text: &str) -> bool {
    count_occurrences(text, "'''") % 2 == 1 || count_occurrences(text, "\"\"\"") % 2 == 1
}

fn parse_line(content: &str, out: &mut Vec<LinePat>) -> Result<(), String> {
    if let Some(stmt) = content.strip_prefix('%') {
        let block = embedded::parse_block(stmt.trim())?;
        out.push(LinePat::Code(block));
        return Ok(());
    }
    if let Some(expr) = content.strip_prefix('!') {
        let expr = embedded::parse_expression(expr.trim())?;
        out.push(LinePat::Generator(expr));
        return Ok(());
    }
    if let Some(rest) = content.strip_prefix("...") {
        out.push(LinePat::Skip(parse_skip(rest.trim())?));
        return Ok(());
    }
    if content.starts_with(".db") || content.starts_with(".dw") || content.starts_with(".dd")
        || content.starts_with(".dq")
    {
        out.push(LinePat::Data(parse_sized_data(content)?));
        return Ok(());
    }
    if let Some(rest) = content.strip_prefix(".obj") {
        out.push(LinePat::Data(parse_obj(rest.trim())?));
        return Ok(());
    }

    // Optional address prefix: the first whitespace token ending in ':'.
    let first = content.split_whitespace().next().unwrap_or("");
    if let Some(prefix) = first.strip_suffix(':') {
        if !prefix.is_empty() {
            out.push(LinePat::Address(parse_address_pat(prefix)?));
            let rest = content[first.len()..].trim();
            if rest.is_empty() {
                return Ok(());
            }
            out.push(LinePat::Instruction(parse_instruction_pat(rest)?));
            return Ok(());
        }
    }

    out.push(LinePat::Instruction(parse_instruction_pat(content)?));
    Ok(())
}

fn parse_address_pat(text: &str) -> Result<AddressPat, String> {
    if let Some(rest) = text.strip_prefix('@') {
        let capture = match rest.strip_prefix(':') {
            Some(cap) if !cap.is_empty() => Some(cap.to_string()),
            Some(_) => return Err("empty capture name".to_string()),
            None => None,
        };
        return Ok(AddressPat::Wildcard(capture));
    }
    if text.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
        return Ok(AddressPat::Literal(parse_u64(text)?));
    }
    if text.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Ok(AddressPat::Label(text.to_string()));
    }
    Err(format!("bad address pattern '{}'", text))
}

fn parse_skip(suffix: &str) -> Result<SkipPat, String> {
    if suffix.is_empty() {
        return Ok(SkipPat { min: 0, max: None });
    }
    let inner = suffix
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .ok_or_else(|| format!("bad skip bounds '{}'", suffix))?;
    match inner.split_once(',') {
        None => {
            let n: u32 = inner
                .trim()
                .parse()
                .map_err(|_| format!("bad skip count '{}'", inner))?;
            Ok(SkipPat {
                min: n,
                max: Some(n),
            })
        }
        Some((min, max)) => {
            let min = min.trim();
            let max = max.trim();
            let min = if min.is_empty() {
                0
            } else {
                min.parse().map_err(|_| format!("bad skip bound '{}'", min))?
            };
            let max = if max.is_empty() {
                None
            } else {
                Some(max.parse().map_err(|_| format!("bad skip bound '{}'", max))?)
            };
            if let Some(max) = max {
                if max < min {
                    return Err(format!("skip bounds inverted: {{{},{}}}", min, max));
                }
            }
            Ok(SkipPat { min, max })
        }
    }
}

fn parse_sized_data(content: &str) -> Result<DataPat, String> {
    let (directive, rest) = match content.split_once(char::is_whitespace) {
        Some((d, rest)) => (d, rest.trim()),
        None => (content, ""),
    };
    let size = match directive {
        ".db" => DataSize::Byte,
        ".dw" => DataSize::Word,
        ".dd" => DataSize::Dword,
        ".dq" => DataSize::Qword,
        other => return Err(format!("unknown data directive '{}'", other)),
    };
    if rest.is_empty() {
        return Err(format!("{} needs at least one value", directive));
    }
    let mut values = Vec::new();
    for part in split_commas(rest) {
        if let Some(wc) = part.strip_prefix('@') {
            let capture = match wc.strip_prefix(':') {
                Some(cap) if !cap.is_empty() => Some(cap.to_string()),
                Some(_) => return Err("empty capture name".to_string()),
                None => None,
            };
            values.push(DataValPat::Wildcard(capture));
        } else {
            values.push(DataValPat::Lit(parse_u64(&part)?));
        }
    }
    Ok(DataPat::Sized { size, values })
}

/// `.obj [name:]${expr}` or `.obj [name:]$ident`.
fn parse_obj(rest: &str) -> Result<DataPat, String> {
    let (capture, expr_text) = match rest.find('$') {
        None => return Err(".obj needs a $expression".to_string()),
        Some(pos) => {
            let head = rest[..pos].trim();
            let capture = if head.is_empty() {
                None
            } else {
                let name = head
                    .strip_suffix(':')
                    .ok_or_else(|| format!("bad .obj capture '{}'", head))?;
                Some(name.trim().to_string())
            };
            (capture, rest[pos + 1..].trim())
        }
    };
    let source = if let Some(inner) = expr_text.strip_prefix('{') {
        inner
            .strip_suffix('}')
            .ok_or_else(|| "unterminated ${...} expression".to_string())?
    } else {
        expr_text
    };
    let expr = embedded::parse_expression(source)?;
    Ok(DataPat::Obj { capture, expr })
}

fn parse_instruction_pat(content: &str) -> Result<InstructionPat, String> {
    let (opcode_text, rest) = match content.split_once(char::is_whitespace) {
        Some((opcode, rest)) => (opcode, rest.trim()),
        None => (content, ""),
    };
    let (glob, capture) = split_capture(opcode_text);
    if glob.is_empty() {
        return Err("missing opcode pattern".to_string());
    }
    let opcode = OpcodePat::new(glob, capture)?;
    let operands = parse_operand_pats(rest)?;
    Ok(InstructionPat { opcode, operands })
}

fn parse_wildcard_capture(text: &str, symbol: char) -> Option<Result<Option<String>, String>> {
    let rest = text.strip_prefix(symbol)?;
    if rest.is_empty() {
        return Some(Ok(None));
    }
    let cap = rest.strip_prefix(':')?;
    if cap.is_empty() {
        return Some(Err("empty capture name".to_string()));
    }
    Some(Ok(Some(cap.to_string())))
}

fn parse_operand_pats(text: &str) -> Result<Vec<OperandPat>, String> {
    let parts = split_commas(text);
    let mut pats = Vec::new();
    let mut i = 0;
    while i < parts.len() {
        let part = parts[i].as_str();

        if let Some(cap) = parse_wildcard_capture(part, '*') {
            pats.push(OperandPat::Multi(cap?));
            i += 1;
            continue;
        }
        if let Some(cap) = parse_wildcard_capture(part, '?') {
            pats.push(OperandPat::Optional(cap?));
            i += 1;
            continue;
        }
        if let Some(cap) = parse_wildcard_capture(part, '@') {
            let cap = cap?;
            // `@, lsl#2` is a shifted-register pattern on a wildcard reg.
            if let Some(shift) = parts.get(i + 1).and_then(|p| try_parse_shift_pat(p)) {
                pats.push(OperandPat::Shifted(ShiftedRegPat {
                    reg: RegPat::Wildcard(cap),
                    shift: Some(shift?),
                }));
                i += 2;
            } else {
                pats.push(OperandPat::Single(cap));
                i += 1;
            }
            continue;
        }
        if let Some(imm) = part.strip_prefix('#') {
            pats.push(OperandPat::Imm(parse_imm_pat(imm)?));
            i += 1;
            continue;
        }
        if let Some(inner) = part.strip_prefix('[') {
            let (mem, consumed) = parse_mem_pat(inner, part, &parts[i + 1..])?;
            pats.push(OperandPat::Mem(mem));
            i += 1 + consumed;
            continue;
        }
        if let Some(inner) = part.strip_prefix('{') {
            let inner = inner
                .strip_suffix('}')
                .ok_or_else(|| format!("malformed register list pattern '{}'", part))?;
            pats.push(OperandPat::MemMulti(parse_mem_multi_pats(inner)?));
            i += 1;
            continue;
        }
        if let Some(reg) = Reg::parse(part) {
            if let Some(shift) = parts.get(i + 1).and_then(|p| try_parse_shift_pat(p)) {
                pats.push(OperandPat::Shifted(ShiftedRegPat {
                    reg: RegPat::Exact(reg),
                    shift: Some(shift?),
                }));
                i += 2;
            } else {
                pats.push(OperandPat::Reg(RegPat::Exact(reg)));
                i += 1;
            }
            continue;
        }
        if part.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
            pats.push(OperandPat::Int(parse_i64(part)?));
            i += 1;
            continue;
        }
        return Err(format!("unrecognized operand pattern '{}'", part));
    }
    Ok(pats)
}

fn parse_imm_pat(text: &str) -> Result<ImmPat, String> {
    if let Some(cap) = parse_wildcard_capture(text, '@') {
        return Ok(ImmPat::Wildcard(cap?));
    }
    Ok(ImmPat::Exact(parse_i64(text)?))
}

fn parse_reg_pat(text: &str) -> Result<RegPat, String> {
    if let Some(cap) = parse_wildcard_capture(text, '@') {
        return Ok(RegPat::Wildcard(cap?));
    }
    Reg::parse(text)
        .map(RegPat::Exact)
        .ok_or_else(|| format!("bad register pattern '{}'", text))
}

/// `lsl#2`, `@:op#@:val`, `ror #31` — shift pattern parts.
fn try_parse_shift_pat(text: &str) -> Option<Result<ShiftPat, String>> {
    let (op_text, val_text) = text.split_once('#')?;
    let op_text = op_text.trim();
    let op = if let Some(cap) = parse_wildcard_capture(op_text, '@') {
        match cap {
            Ok(cap) => ShiftOpPat::Wildcard(cap),
            Err(e) => return Some(Err(e)),
        }
    } else {
        ShiftOpPat::Exact(ShiftOp::parse(op_text)?)
    };
    let val_text = val_text.trim();
    let val = if let Some(cap) = parse_wildcard_capture(val_text, '@') {
        match cap {
            Ok(cap) => ShiftValPat::Wildcard(cap),
            Err(e) => return Some(Err(e)),
        }
    } else {
        match parse_i64(val_text) {
            Ok(v) => ShiftValPat::Exact(v),
            Err(e) => return Some(Err(e)),
        }
    };
    Some(Ok(ShiftPat { op, val }))
}

fn parse_mem_pat(
    inner: &str,
    whole: &str,
    following: &[String],
) -> Result<(MemPat, usize), String> {
    let (body, pre) = match inner.strip_suffix("]!") {
        Some(body) => (body, true),
        None => (
            inner
                .strip_suffix(']')
                .ok_or_else(|| format!("malformed memory pattern '{}'", whole))?,
            false,
        ),
    };
    let inner_parts = split_commas(body);
    if inner_parts.is_empty() {
        return Err(format!("empty memory pattern '{}'", whole));
    }
    let base = parse_reg_pat(&inner_parts[0])?;
    let offset = parse_mem_offset_pat(&inner_parts[1..])?;

    if pre {
        if offset.is_none() {
            return Err(format!("pre-indexed pattern needs an offset: '{}'", whole));
        }
        return Ok((
            MemPat {
                base,
                offset,
                mode: AddrMode::PreIndexed,
            },
            0,
        ));
    }

    if offset.is_none() && !following.is_empty() {
        if let Some((post, consumed)) = parse_post_offset_pat(following)? {
            return Ok((
                MemPat {
                    base,
                    offset: Some(post),
                    mode: AddrMode::PostIndexed,
                },
                consumed,
            ));
        }
    }

    Ok((
        MemPat {
            base,
            offset,
            mode: AddrMode::Offset,
        },
        0,
    ))
}

fn parse_mem_offset_pat(parts: &[String]) -> Result<Option<MemOffsetPat>, String> {
    match parts {
        [] => Ok(None),
        [one] => Ok(Some(parse_single_offset_pat(one)?)),
        [reg_part, shift_part] => {
            let reg = parse_reg_pat(reg_part)?;
            let shift = try_parse_shift_pat(shift_part)
                .ok_or_else(|| format!("bad shift pattern '{}'", shift_part))??;
            Ok(Some(MemOffsetPat::Reg(ShiftedRegPat {
                reg,
                shift: Some(shift),
            })))
        }
        _ => Err("too many components in memory offset pattern".to_string()),
    }
}

fn parse_single_offset_pat(text: &str) -> Result<MemOffsetPat, String> {
    if let Some(imm) = text.strip_prefix('#') {
        if let Some(cap) = parse_wildcard_capture(imm, '@') {
            return Ok(MemOffsetPat::ImmWildcard(cap?));
        }
        return Ok(MemOffsetPat::Imm(parse_i64(imm)?));
    }
    if let Some(cap) = parse_wildcard_capture(text, '@') {
        return Ok(MemOffsetPat::Any(cap?));
    }
    let reg = parse_reg_pat(text)?;
    Ok(MemOffsetPat::Reg(ShiftedRegPat { reg, shift: None }))
}

fn parse_post_offset_pat(parts: &[String]) -> Result<Option<(MemOffsetPat, usize)>, String> {
    let first = parts[0].as_str();
    if first.starts_with('#') || first.starts_with('@') || Reg::parse(first).is_some() {
        if Reg::parse(first).is_some() || first.starts_with('@') {
            if let Some(shift) = parts.get(1).and_then(|p| try_parse_shift_pat(p)) {
                let reg = parse_reg_pat(first)?;
                return Ok(Some((
                    MemOffsetPat::Reg(ShiftedRegPat {
                        reg,
                        shift: Some(shift?),
                    }),
                    2,
                )));
            }
        }
        return Ok(Some((parse_single_offset_pat(first)?, 1)));
    }
    Ok(None)
}

fn parse_mem_multi_pats(inner: &str) -> Result<Vec<MemMultiElemPat>, String> {
    let mut elems = Vec::new();
    for part in split_commas(inner) {
        if let Some(cap) = parse_wildcard_capture(&part, '*') {
            elems.push(MemMultiElemPat::Multi(cap?));
            continue;
        }
        if let Some((start, end)) = split_range(&part) {
            let start = parse_reg_pat(start)?;
            let end = parse_reg_pat(end)?;
            if let (RegPat::Exact(a), RegPat::Exact(b)) = (&start, &end) {
                if a.index() >= b.index() {
                    return Err(format!("invalid register range '{}'", part));
                }
            }
            elems.push(MemMultiElemPat::Range(RegRangePat { start, end }));
            continue;
        }
        elems.push(MemMultiElemPat::Reg(parse_reg_pat(&part)?));
    }
    Ok(elems)
}

/// Splits `ra-rb` range syntax, leaving capture names (`@:a-b` is not a
/// range of `@:a` unless both sides parse as register patterns).
fn split_range(text: &str) -> Option<(&str, &str)> {
    let pos = text.find('-')?;
    let (start, end) = (text[..pos].trim(), text[pos + 1..].trim());
    if start.is_empty() || end.is_empty() {
        return None;
    }
    let side_ok = |side: &str| side.starts_with('@') || Reg::parse(side).is_some();
    if side_ok(start) && side_ok(end) {
        Some((start, end))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labelled_instruction_becomes_two_lines() {
        let pat = parse_pattern("test: blx*:opcode r0").unwrap();
        assert_eq!(pat.lines.len(), 2);
        assert!(matches!(
            &pat.lines[0],
            LinePat::Address(AddressPat::Label(name)) if name == "test"
        ));
        match &pat.lines[1] {
            LinePat::Instruction(ip) => {
                assert_eq!(ip.opcode.glob, "blx*");
                assert_eq!(ip.opcode.capture.as_deref(), Some("opcode"));
                assert_eq!(ip.operands.len(), 1);
            }
            other => panic!("unexpected line {:?}", other),
        }
    }

    #[test]
    fn anchor_line_is_recorded() {
        let pat = parse_pattern(
            "
              .dd 0xDEADBEEF
            > mov r0, r2
              mov r1, r0
            ",
        )
        .unwrap();
        assert_eq!(pat.anchor, 1);
        assert_eq!(pat.lines.len(), 3);
    }

    #[test]
    fn only_one_anchor_allowed() {
        assert!(parse_pattern("> mov r0, r1\n> mov r1, r2").is_err());
    }

    #[test]
    fn wildcard_operands() {
        let pat = parse_pattern("mov @:dst, *:rest").unwrap();
        match &pat.lines[0] {
            LinePat::Instruction(ip) => {
                assert_eq!(ip.operands[0], OperandPat::Single(Some("dst".into())));
                assert_eq!(ip.operands[1], OperandPat::Multi(Some("rest".into())));
            }
            other => panic!("unexpected line {:?}", other),
        }
    }

    #[test]
    fn reg_list_patterns() {
        let pat = parse_pattern("push {*:head, r1}\npop {r0-r3, @:last}").unwrap();
        match &pat.lines[0] {
            LinePat::Instruction(ip) => match &ip.operands[0] {
                OperandPat::MemMulti(elems) => {
                    assert_eq!(elems[0], MemMultiElemPat::Multi(Some("head".into())));
                    assert!(matches!(&elems[1], MemMultiElemPat::Reg(RegPat::Exact(_))));
                }
                other => panic!("unexpected operand {:?}", other),
            },
            other => panic!("unexpected line {:?}", other),
        }
        match &pat.lines[1] {
            LinePat::Instruction(ip) => match &ip.operands[0] {
                OperandPat::MemMulti(elems) => {
                    assert!(matches!(&elems[0], MemMultiElemPat::Range(_)));
                    assert!(matches!(
                        &elems[1],
                        MemMultiElemPat::Reg(RegPat::Wildcard(Some(cap))) if cap == "last"
                    ));
                }
                other => panic!("unexpected operand {:?}", other),
            },
            other => panic!("unexpected line {:?}", other),
        }
    }

    #[test]
    fn code_lines_and_fences() {
        let pat = parse_pattern(
            "
            mov r0, @
            % cursor = cursor.next()
            %%
            x = find_next('bl @:t')
            goto(x)
            %%
            bl @:target
            ",
        )
        .unwrap();
        assert_eq!(pat.lines.len(), 4);
        assert!(matches!(&pat.lines[1], LinePat::Code(_)));
        assert!(matches!(&pat.lines[2], LinePat::Code(b) if b.stmts.len() == 2));
    }

    #[test]
    fn skip_bounds() {
        assert_eq!(
            parse_pattern("...").unwrap().lines[0],
            LinePat::Skip(SkipPat { min: 0, max: None })
        );
        assert_eq!(
            parse_pattern("...{3}").unwrap().lines[0],
            LinePat::Skip(SkipPat { min: 3, max: Some(3) })
        );
        assert_eq!(
            parse_pattern("...{1,4}").unwrap().lines[0],
            LinePat::Skip(SkipPat { min: 1, max: Some(4) })
        );
        assert_eq!(
            parse_pattern("...{,2}").unwrap().lines[0],
            LinePat::Skip(SkipPat { min: 0, max: Some(2) })
        );
        assert!(parse_pattern("...{4,1}").is_err());
    }

    #[test]
    fn data_atoms() {
        let pat = parse_pattern(".dd 0xDEADBEEF, @:rest").unwrap();
        assert_eq!(
            pat.lines[0],
            LinePat::Data(DataPat::Sized {
                size: DataSize::Dword,
                values: vec![
                    DataValPat::Lit(0xDEADBEEF),
                    DataValPat::Wildcard(Some("rest".into()))
                ],
            })
        );

        let pat = parse_pattern(".obj test:${layout('a', u16())}").unwrap();
        assert!(matches!(
            &pat.lines[0],
            LinePat::Data(DataPat::Obj { capture: Some(cap), .. }) if cap == "test"
        ));

        let pat = parse_pattern(".obj $obj_type").unwrap();
        assert!(matches!(
            &pat.lines[0],
            LinePat::Data(DataPat::Obj { capture: None, .. })
        ));
    }

    #[test]
    fn generator_lines() {
        let pat = parse_pattern("!skip_instructions(2)").unwrap();
        assert!(matches!(&pat.lines[0], LinePat::Generator(_)));
    }

    #[test]
    fn address_lines() {
        let pat = parse_pattern("0x2000: bl 0x8000").unwrap();
        assert_eq!(pat.lines.len(), 2);
        assert!(matches!(
            &pat.lines[0],
            LinePat::Address(AddressPat::Literal(0x2000))
        ));

        let pat = parse_pattern("@:entry: mov r0, r1").unwrap();
        assert!(matches!(
            &pat.lines[0],
            LinePat::Address(AddressPat::Wildcard(Some(cap))) if cap == "entry"
        ));
    }
}
