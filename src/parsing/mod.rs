//! Hand-written parsers for assembly listings and pattern text.

pub mod asm_parser;
pub mod pat_parser;

/// Parses a hex (`0x...`) or decimal unsigned literal.
pub(crate) fn parse_u64(text: &str) -> Result<u64, String> {
    let text = text.trim();
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).map_err(|_| format!("invalid hex literal '{}'", text))
    } else {
        text.parse()
            .map_err(|_| format!("invalid number '{}'", text))
    }
}

/// Parses a signed hex or decimal literal.
pub(crate) fn parse_i64(text: &str) -> Result<i64, String> {
    let text = text.trim();
    if let Some(rest) = text.strip_prefix('-') {
        Ok(-(parse_u64(rest)? as i64))
    } else {
        Ok(parse_u64(text)? as i64)
    }
}

/// Splits on commas at bracket depth zero; `[...]` and `{...}` group.
pub(crate) fn split_commas(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    for ch in text.chars() {
        match ch {
            '[' | '{' => {
                depth += 1;
                current.push(ch);
            }
            ']' | '}' => {
                depth -= 1;
                current.push(ch);
            }
            ',' if depth == 0 => {
                parts.push(current.trim().to_string());
                current = String::new();
            }
            ch => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

/// Splits `name:capture` at the first colon.
pub(crate) fn split_capture(text: &str) -> (&str, Option<String>) {
    match text.split_once(':') {
        Some((base, capture)) if !capture.is_empty() => (base, Some(capture.to_string())),
        _ => (text, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_commas_respects_brackets() {
        assert_eq!(
            split_commas("r0, [r1, #4], {r2, r3}, #5"),
            vec!["r0", "[r1, #4]", "{r2, r3}", "#5"]
        );
    }

    #[test]
    fn numbers() {
        assert_eq!(parse_u64("0x2000").unwrap(), 0x2000);
        assert_eq!(parse_i64("-4").unwrap(), -4);
        assert!(parse_u64("0xZZ").is_err());
    }
}
