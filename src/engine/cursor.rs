//! Cursors: handles to positions in a program.
//!
//! A cursor names a position and exposes the instruction, address, byte
//! reads and navigation. Each code block is bracketed by two sentinels: a
//! pre-init cursor before the first instruction and a post-term cursor after
//! the last one (which may carry an address when the listing ends with a
//! bare `0xADDR:` line). Data cursors are synthesized for addresses that
//! fall inside data blocks but have no instruction. The null cursor matches
//! patterns without a program location.

use crate::asm::Instruction;
use crate::engine::data::DataStream;
use crate::engine::errors::{EngineResult, PatternError};
use crate::engine::program::Program;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LineId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cursor {
    /// Sentinel before the first instruction of a block.
    Pre(BlockId),
    /// Sentinel after the last instruction of a block.
    Post(BlockId),
    /// An instruction line.
    Line(LineId),
    /// A data-only position (no instruction at this address).
    Data(u64),
    /// No position at all; matching delegates to the pattern.
    Null,
}

impl Cursor {
    pub fn address(&self, program: &Program) -> Option<u64> {
        match self {
            Cursor::Pre(_) | Cursor::Null => None,
            Cursor::Post(block) => program.block_rec(*block).terminal,
            Cursor::Line(line) => program.line_rec(*line).address,
            Cursor::Data(addr) => Some(*addr),
        }
    }

    pub fn instruction<'p>(&self, program: &'p Program) -> EngineResult<&'p Instruction> {
        match self {
            Cursor::Line(line) => Ok(&program.line_rec(*line).instruction),
            Cursor::Pre(_) => Err(PatternError::InvalidAccess(
                "pre-init cursor has no instruction".to_string(),
            )),
            Cursor::Post(_) => Err(PatternError::InvalidAccess(
                "post-term cursor has no instruction".to_string(),
            )),
            Cursor::Data(addr) => Err(PatternError::InvalidAccess(format!(
                "no instruction at data address 0x{:X}",
                addr
            ))),
            Cursor::Null => Err(PatternError::InvalidAccess(
                "null cursor has no instruction".to_string(),
            )),
        }
    }

    pub fn next(&self, program: &Program) -> EngineResult<Cursor> {
        match self {
            Cursor::Pre(block) => Ok(Cursor::Line(LineId(program.block_rec(*block).first))),
            Cursor::Line(line) => {
                let block = program.line_rec(*line).block;
                if line.0 == program.block_rec(block).last {
                    Ok(Cursor::Post(block))
                } else {
                    Ok(Cursor::Line(LineId(line.0 + 1)))
                }
            }
            Cursor::Post(_) => Err(PatternError::NoMoreInstructions),
            Cursor::Data(addr) => Err(PatternError::InvalidAccess(format!(
                "cannot step a data cursor at 0x{:X}",
                addr
            ))),
            Cursor::Null => Err(PatternError::InvalidAccess(
                "cannot step a null cursor".to_string(),
            )),
        }
    }

    pub fn prev(&self, program: &Program) -> EngineResult<Cursor> {
        match self {
            Cursor::Post(block) => Ok(Cursor::Line(LineId(program.block_rec(*block).last))),
            Cursor::Line(line) => {
                let block = program.line_rec(*line).block;
                if line.0 == program.block_rec(block).first {
                    Ok(Cursor::Pre(block))
                } else {
                    Ok(Cursor::Line(LineId(line.0 - 1)))
                }
            }
            Cursor::Pre(_) => Err(PatternError::NoMoreInstructions),
            Cursor::Data(addr) => Err(PatternError::InvalidAccess(format!(
                "cannot step a data cursor at 0x{:X}",
                addr
            ))),
            Cursor::Null => Err(PatternError::InvalidAccess(
                "cannot step a null cursor".to_string(),
            )),
        }
    }

    /// Cursor for `address + delta`. Lands on the instruction cursor when
    /// one exists at the target address, otherwise on a data cursor; byte
    /// reads validate against the data blocks.
    pub fn offset(&self, program: &Program, delta: i64) -> EngineResult<Cursor> {
        let addr = self.require_address(program)?;
        let target = addr.wrapping_add(delta as u64);
        Ok(program.cursor_at(target))
    }

    pub fn read_bytes(&self, program: &Program, count: usize) -> EngineResult<Vec<u8>> {
        let addr = self.require_address(program)?;
        program.read_bytes(addr, count)
    }

    /// Seekable byte stream starting at this cursor's address.
    pub fn data_stream<'p>(&self, program: &'p Program) -> EngineResult<DataStream<'p>> {
        let addr = self.require_address(program)?;
        Ok(DataStream::new(program, addr))
    }

    fn require_address(&self, program: &Program) -> EngineResult<u64> {
        self.address(program).ok_or_else(|| {
            PatternError::InvalidAccess(format!("cursor {:?} has no address", self))
        })
    }
}
