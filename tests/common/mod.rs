//! Shared helpers for integration tests.
#![allow(dead_code)]

use armatch::{Cursor, MatchResult, Program, Value};

/// Builds a program from a single listing.
pub fn program(listing: &str) -> Program {
    let mut program = Program::new();
    program
        .add_code_block(listing, None)
        .expect("test listing parses");
    program
}

/// Reads a capture from the root scope, panicking when unbound.
pub fn get(mr: &MatchResult, name: &str) -> Value {
    mr.get(mr.root(), name)
        .expect("capture readable")
        .unwrap_or_else(|| panic!("capture '{}' not bound", name))
}

pub fn addr_of(program: &Program, cursor: Cursor) -> u64 {
    cursor.address(program).expect("cursor has an address")
}
