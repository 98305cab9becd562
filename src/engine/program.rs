//! The program model: ordered instruction cursors, addressed data blocks,
//! symbols and the `find_*` match drivers.

use std::cell::RefCell;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::rc::Rc;

use lru::LruCache;
use tracing::debug;

use crate::asm::{Instruction, SourceLine};
use crate::engine::context::Session;
use crate::engine::cursor::{BlockId, Cursor, LineId};
use crate::engine::data::DataBlock;
use crate::engine::errors::{EngineResult, PatternError};
use crate::engine::match_result::MatchResult;
use crate::engine::pattern::{match_block, BlockPat};
use crate::engine::value::Value;
use crate::extensions::{find_single_in, ExtensionRegistry};
use crate::parsing::{asm_parser, pat_parser};

const PATTERN_CACHE_SIZE: usize = 128;

pub(crate) struct LineRec {
    pub address: Option<u64>,
    pub instruction: Instruction,
    pub block: BlockId,
}

pub(crate) struct BlockRec {
    pub first: u32,
    pub last: u32,
    pub terminal: Option<u64>,
}

/// Host-supplied cross-reference table consumed by the analysis extension.
#[derive(Default)]
struct XrefTable {
    to: HashMap<u64, Vec<u64>>,
    from: HashMap<u64, Vec<u64>>,
}

pub struct Program {
    lines: Vec<LineRec>,
    blocks: Vec<BlockRec>,
    addr_map: HashMap<u64, u32>,
    data_blocks: Vec<DataBlock>,
    symbols: HashMap<String, u64>,
    xrefs: Option<XrefTable>,
    pattern_cache: RefCell<LruCache<String, Rc<BlockPat>>>,
    registry: ExtensionRegistry,
}

impl std::fmt::Debug for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Program")
            .field("lines", &self.lines.len())
            .field("blocks", &self.blocks.len())
            .field("data_blocks", &self.data_blocks.len())
            .field("symbols", &self.symbols.len())
            .finish()
    }
}

impl Default for Program {
    fn default() -> Self {
        Program::new()
    }
}

impl Program {
    pub fn new() -> Self {
        Program {
            lines: Vec::new(),
            blocks: Vec::new(),
            addr_map: HashMap::new(),
            data_blocks: Vec::new(),
            symbols: HashMap::new(),
            xrefs: None,
            pattern_cache: RefCell::new(LruCache::new(
                NonZeroUsize::new(PATTERN_CACHE_SIZE).expect("cache size is nonzero"),
            )),
            registry: ExtensionRegistry::default(),
        }
    }

    pub(crate) fn line_rec(&self, line: LineId) -> &LineRec {
        &self.lines[line.0 as usize]
    }

    pub(crate) fn block_rec(&self, block: BlockId) -> &BlockRec {
        &self.blocks[block.0 as usize]
    }

    pub fn registry(&self) -> &ExtensionRegistry {
        &self.registry
    }

    /// Replaces the extension registry used for embedded evaluation.
    pub fn set_registry(&mut self, registry: ExtensionRegistry) {
        self.registry = registry;
    }

    // -- construction ------------------------------------------------------

    /// Parses an assembly listing and links its cursors into the program.
    /// An externally supplied `address` stands in for a missing address on
    /// the first line; conflicting or duplicate addresses are fatal.
    pub fn add_code_block(&mut self, text: &str, address: Option<u64>) -> EngineResult<Cursor> {
        let listing = asm_parser::parse_listing(text).map_err(PatternError::Parse)?;
        self.add_instruction_lines(listing.lines, address, listing.terminal)
    }

    /// Structured-construction path for disassembly front-ends: the same
    /// linking as `add_code_block`, minus the text parsing.
    pub fn add_instruction_lines(
        &mut self,
        mut source: Vec<SourceLine>,
        address: Option<u64>,
        terminal: Option<u64>,
    ) -> EngineResult<Cursor> {
        if source.is_empty() {
            return Err(PatternError::Parse("no code lines given".to_string()));
        }
        match (source[0].address, address) {
            (Some(in_text), Some(given)) if in_text != given => {
                return Err(PatternError::InvalidAccess(format!(
                    "conflicting addresses for first line: 0x{:X} vs 0x{:X}",
                    in_text, given
                )));
            }
            (None, Some(given)) => source[0].address = Some(given),
            _ => {}
        }
        for line in &source {
            if let Some(a) = line.address {
                if self.addr_map.contains_key(&a) {
                    return Err(PatternError::InvalidAccess(format!(
                        "duplicate address 0x{:X}",
                        a
                    )));
                }
            }
        }

        let block = BlockId(self.blocks.len() as u32);
        let first = self.lines.len() as u32;
        for line in source {
            let id = self.lines.len() as u32;
            if let Some(a) = line.address {
                self.addr_map.insert(a, id);
            }
            self.lines.push(LineRec {
                address: line.address,
                instruction: line.instruction,
                block,
            });
        }
        let last = self.lines.len() as u32 - 1;
        self.blocks.push(BlockRec {
            first,
            last,
            terminal,
        });
        debug!(
            block = block.0,
            lines = last - first + 1,
            "added code block"
        );
        Ok(Cursor::Line(LineId(first)))
    }

    /// Inserts a data block, merging with adjacent (touching) blocks.
    /// Overlapping inserts are an error.
    pub fn add_data_block(&mut self, address: u64, data: Vec<u8>) -> EngineResult<()> {
        let new_start = address;
        let new_end = address + data.len() as u64;
        for block in &self.data_blocks {
            if block.start < new_end && new_start < block.end() {
                return Err(PatternError::InvalidAccess(format!(
                    "data block [0x{:X}-0x{:X}) overlaps existing [0x{:X}-0x{:X})",
                    new_start,
                    new_end,
                    block.start,
                    block.end()
                )));
            }
        }

        let before = self
            .data_blocks
            .iter()
            .position(|b| b.end() == new_start);
        let before = before.map(|ix| self.data_blocks.remove(ix));
        let after = self.data_blocks.iter().position(|b| b.start == new_end);
        let after = after.map(|ix| self.data_blocks.remove(ix));

        let mut merged = match before {
            Some(block) => block,
            None => DataBlock {
                start: new_start,
                data: Vec::new(),
            },
        };
        merged.data.extend(data);
        if let Some(block) = after {
            merged.data.extend(block.data);
        }
        self.data_blocks.push(merged);
        Ok(())
    }

    pub fn add_symbol(&mut self, name: impl Into<String>, address: u64) {
        self.symbols.insert(name.into(), address);
    }

    /// Resolves a host symbol; unresolved names are an error by default.
    pub fn find_symbol(&self, name: &str) -> EngineResult<u64> {
        self.symbols
            .get(name)
            .copied()
            .ok_or_else(|| PatternError::UnresolvedSymbol(name.to_string()))
    }

    pub fn add_xref(&mut self, from: u64, to: u64) {
        let table = self.xrefs.get_or_insert_with(XrefTable::default);
        table.to.entry(to).or_default().push(from);
        table.from.entry(from).or_default().push(to);
    }

    pub fn xrefs_to(&self, address: u64) -> EngineResult<Vec<u64>> {
        match &self.xrefs {
            Some(table) => Ok(table.to.get(&address).cloned().unwrap_or_default()),
            None => Err(PatternError::InvalidAccess(
                "no cross-reference information loaded".to_string(),
            )),
        }
    }

    pub fn xrefs_from(&self, address: u64) -> EngineResult<Vec<u64>> {
        match &self.xrefs {
            Some(table) => Ok(table.from.get(&address).cloned().unwrap_or_default()),
            None => Err(PatternError::InvalidAccess(
                "no cross-reference information loaded".to_string(),
            )),
        }
    }

    // -- lookup ------------------------------------------------------------

    pub fn find_block(&self, address: u64) -> EngineResult<&DataBlock> {
        self.data_blocks
            .iter()
            .find(|b| b.contains(address))
            .ok_or_else(|| {
                PatternError::InvalidAccess(format!("no data found for address 0x{:X}", address))
            })
    }

    pub fn read_bytes(&self, address: u64, count: usize) -> EngineResult<Vec<u8>> {
        let block = self.find_block(address)?;
        Ok(block.read_bytes(address, count)?.to_vec())
    }

    /// Cursor for an address whose validity is checked later (byte reads
    /// validate against the data blocks). Used by offset navigation.
    pub(crate) fn cursor_at(&self, address: u64) -> Cursor {
        match self.addr_map.get(&address) {
            Some(&line) => Cursor::Line(LineId(line)),
            None => Cursor::Data(address),
        }
    }

    /// Cached cursor lookup: instruction cursors by address, lazily
    /// synthesized data cursors for addresses inside data blocks.
    pub fn create_cursor(&self, address: u64) -> EngineResult<Cursor> {
        if let Some(&line) = self.addr_map.get(&address) {
            return Ok(Cursor::Line(LineId(line)));
        }
        self.find_block(address).map_err(|_| {
            PatternError::InvalidAccess(format!(
                "failed to find cursor with address 0x{:X}",
                address
            ))
        })?;
        Ok(Cursor::Data(address))
    }

    /// All instruction cursors, in insertion order.
    pub fn cursors(&self) -> Vec<Cursor> {
        (0..self.lines.len() as u32)
            .map(|i| Cursor::Line(LineId(i)))
            .collect()
    }

    /// Parses (and caches) a pattern.
    pub fn create_pattern(&self, source: &str) -> EngineResult<Rc<BlockPat>> {
        if let Some(pat) = self.pattern_cache.borrow_mut().get(source) {
            return Ok(pat.clone());
        }
        let pat = Rc::new(pat_parser::parse_pattern(source).map_err(PatternError::Parse)?);
        self.pattern_cache
            .borrow_mut()
            .put(source.to_string(), pat.clone());
        Ok(pat)
    }

    // -- matching ----------------------------------------------------------

    /// Matches `pattern` with its anchor at `cursor`, binding captures into
    /// `mr`'s root scope. Returns the cursor after the matched lines. A
    /// failed match leaves `mr` untouched.
    pub fn match_at(
        &self,
        pattern: &Rc<BlockPat>,
        cursor: Cursor,
        mr: &mut MatchResult,
    ) -> EngineResult<Cursor> {
        self.match_at_with(pattern, cursor, mr, Vec::new())
    }

    /// `match_at` with extra globals injected into the embedded namespace.
    pub fn match_at_with(
        &self,
        pattern: &Rc<BlockPat>,
        cursor: Cursor,
        mr: &mut MatchResult,
        globals: Vec<(String, Value)>,
    ) -> EngineResult<Cursor> {
        let root = mr.root();
        let mut session = Session::new(self, mr, root, globals);
        Ok(match_block(pattern, cursor, &mut session)?.cursor)
    }

    /// Matches without a program location: the pattern must position
    /// itself (typically through an embedded `goto`/`cursor =` line).
    pub fn match_anywhere(
        &self,
        pattern: &Rc<BlockPat>,
        mr: &mut MatchResult,
        globals: Vec<(String, Value)>,
    ) -> EngineResult<Cursor> {
        self.match_at_with(pattern, Cursor::Null, mr, globals)
    }

    /// Scans every cursor; each match commits one scope into a fresh multi
    /// scope (named when `name` is given). Returns the matching cursors.
    pub fn find_all(
        &self,
        pattern: &Rc<BlockPat>,
        mr: &mut MatchResult,
        name: Option<&str>,
    ) -> EngineResult<Vec<Cursor>> {
        let root = mr.root();
        let mut session = Session::new(self, mr, root, Vec::new());
        let multi = session.mr.new_multi_scope(root, name)?;
        let mut found = Vec::new();
        for cursor in self.cursors() {
            let tx = session.mr.begin();
            let item = session.mr.new_multi_item(multi);
            let saved = session.scope;
            session.scope = item;
            let result = match_block(pattern, cursor, &mut session);
            session.scope = saved;
            match result {
                Ok(_) => {
                    session.mr.commit(tx);
                    found.push(cursor);
                }
                Err(e) if e.is_recoverable() => session.mr.rollback(tx),
                Err(e) => {
                    session.mr.rollback(tx);
                    return Err(e);
                }
            }
        }
        debug!(matches = found.len(), "find_all finished");
        Ok(found)
    }

    /// First matching cursor in program order; its captures commit into
    /// `mr` directly.
    pub fn find_first(
        &self,
        pattern: &Rc<BlockPat>,
        mr: &mut MatchResult,
    ) -> EngineResult<Cursor> {
        self.find_first_in(self.cursors(), pattern, mr)
    }

    /// `find_first` over reversed program order.
    pub fn find_last(&self, pattern: &Rc<BlockPat>, mr: &mut MatchResult) -> EngineResult<Cursor> {
        let mut cursors = self.cursors();
        cursors.reverse();
        self.find_first_in(cursors, pattern, mr)
    }

    fn find_first_in(
        &self,
        cursors: Vec<Cursor>,
        pattern: &Rc<BlockPat>,
        mr: &mut MatchResult,
    ) -> EngineResult<Cursor> {
        let root = mr.root();
        let mut session = Session::new(self, mr, root, Vec::new());
        for cursor in cursors {
            match match_block(pattern, cursor, &mut session) {
                Ok(_) => return Ok(cursor),
                Err(e) if e.is_recoverable() => {}
                Err(e) => return Err(e),
            }
        }
        Err(PatternError::NoMatches)
    }

    /// Exactly one cursor may match; anything else is `NoMatches` or
    /// `TooManyMatches`. The unique match's captures commit into `mr`.
    pub fn find_single(
        &self,
        pattern: &Rc<BlockPat>,
        mr: &mut MatchResult,
    ) -> EngineResult<Cursor> {
        let root = mr.root();
        let mut session = Session::new(self, mr, root, Vec::new());
        find_single_in(&self.cursors(), pattern, &mut session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_block_merging() {
        let mut program = Program::new();
        program.add_data_block(0x1000, vec![1, 2]).unwrap();
        program.add_data_block(0x1004, vec![5, 6]).unwrap();
        // Bridges the gap: all three merge into one block.
        program.add_data_block(0x1002, vec![3, 4]).unwrap();
        assert_eq!(program.data_blocks.len(), 1);
        assert_eq!(program.data_blocks[0].start, 0x1000);
        assert_eq!(program.data_blocks[0].data, vec![1, 2, 3, 4, 5, 6]);

        assert_eq!(program.read_bytes(0x1001, 4).unwrap(), vec![2, 3, 4, 5]);
    }

    #[test]
    fn overlapping_data_rejected() {
        let mut program = Program::new();
        program.add_data_block(0x1000, vec![0; 8]).unwrap();
        let err = program.add_data_block(0x1004, vec![0; 2]).unwrap_err();
        assert!(matches!(err, PatternError::InvalidAccess(_)));
    }

    #[test]
    fn duplicate_addresses_rejected() {
        let mut program = Program::new();
        program.add_code_block("0x2000: mov r0, r1", None).unwrap();
        let err = program
            .add_code_block("0x2000: mov r1, r2", None)
            .unwrap_err();
        assert!(matches!(err, PatternError::InvalidAccess(_)));
    }

    #[test]
    fn conflicting_first_address_rejected() {
        let mut program = Program::new();
        let err = program
            .add_code_block("0x2000: mov r0, r1", Some(0x3000))
            .unwrap_err();
        assert!(matches!(err, PatternError::InvalidAccess(_)));
    }

    #[test]
    fn external_address_fills_first_line() {
        let mut program = Program::new();
        let cursor = program.add_code_block("mov r0, r1", Some(0x4000)).unwrap();
        assert_eq!(cursor.address(&program), Some(0x4000));
        assert_eq!(program.create_cursor(0x4000).unwrap(), cursor);
    }

    #[test]
    fn cursor_navigation_and_sentinels() {
        let mut program = Program::new();
        let first = program
            .add_code_block(
                "
                0x2000: mov r0, r1
                        mov r0, r2
                0x2008:
                ",
                None,
            )
            .unwrap();

        let second = first.next(&program).unwrap();
        let post = second.next(&program).unwrap();
        assert!(matches!(post, Cursor::Post(_)));
        assert_eq!(post.address(&program), Some(0x2008));
        assert!(matches!(
            post.instruction(&program),
            Err(PatternError::InvalidAccess(_))
        ));
        assert!(matches!(
            post.next(&program),
            Err(PatternError::NoMoreInstructions)
        ));

        let pre = first.prev(&program).unwrap();
        assert!(matches!(pre, Cursor::Pre(_)));
        assert!(matches!(
            pre.instruction(&program),
            Err(PatternError::InvalidAccess(_))
        ));
        assert_eq!(pre.next(&program).unwrap(), first);
        assert_eq!(post.prev(&program).unwrap(), second);
    }

    #[test]
    fn data_cursor_synthesis() {
        let mut program = Program::new();
        program.add_data_block(0x1000, vec![0xAA, 0xBB]).unwrap();
        let cursor = program.create_cursor(0x1001).unwrap();
        assert!(matches!(cursor, Cursor::Data(0x1001)));
        assert_eq!(cursor.read_bytes(&program, 1).unwrap(), vec![0xBB]);
        assert!(program.create_cursor(0x9999).is_err());
    }

    #[test]
    fn structured_construction_matches_text_loading() {
        use crate::asm::{Instruction, Operand, Reg, SourceLine};

        let mut from_text = Program::new();
        from_text
            .add_code_block("0x2000: mov r0, r1\n        bl 0x8000", None)
            .unwrap();

        let mut structured = Program::new();
        structured
            .add_instruction_lines(
                vec![
                    SourceLine {
                        address: Some(0x2000),
                        instruction: Instruction::new(
                            "mov",
                            [
                                Operand::Reg(Reg::parse("r0").unwrap()),
                                Operand::Reg(Reg::parse("r1").unwrap()),
                            ],
                        ),
                    },
                    SourceLine {
                        address: None,
                        instruction: Instruction::new("bl", [Operand::Address(0x8000)]),
                    },
                ],
                None,
                None,
            )
            .unwrap();

        // Both providers expose identical matcher behavior.
        let pattern = structured.create_pattern("mov @:dst, r1\nbl @:target").unwrap();
        for program in [&from_text, &structured] {
            let mut mr = crate::engine::match_result::MatchResult::new();
            let cursor = program.create_cursor(0x2000).unwrap();
            program.match_at(&pattern, cursor, &mut mr).unwrap();
            assert_eq!(
                mr.get(mr.root(), "target").unwrap(),
                Some(Value::Address(0x8000))
            );
        }
    }

    #[test]
    fn symbols_resolve_or_error() {
        let mut program = Program::new();
        program.add_symbol("main", 0x2000);
        assert_eq!(program.find_symbol("main").unwrap(), 0x2000);
        assert!(matches!(
            program.find_symbol("missing"),
            Err(PatternError::UnresolvedSymbol(_))
        ));
    }
}
