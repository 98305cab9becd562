//! armatch - pattern matching over disassembled ARM code.
//!
//! Given a program of ordered assembly instructions (with addresses) and
//! raw data blocks, and a pattern mixing assembly-like templates, data
//! templates and embedded expressions, the engine decides whether the
//! pattern matches at a location, binds named captures to the values it
//! observed, and scans for all, the first, the last or a unique match.
//!
//! # Architecture
//!
//! 1. **Program model** (`engine::program`, `engine::cursor`)
//!    - Ordered instruction cursors bracketed by sentinels per code block
//!    - Addressed data blocks with merge-on-insert
//!    - Byte reads, offset navigation, symbol lookup
//!
//! 2. **Pattern matching** (`engine::pattern`, `engine::operands`)
//!    - Block patterns with an anchor: lines before it match in reverse,
//!      lines after it match forward
//!    - Operand consumers with backtracking wildcards (`@`, `*`, `?`)
//!    - Sized data atoms (`.db`/`.dw`/`.dd`/`.dq`) and structured `.obj`
//!      layouts, little-endian
//!
//! 3. **Transactional captures** (`engine::match_result`)
//!    - A scope tree with insertion-once keys; conflicting rebinds raise
//!      `CaptureCollision`
//!    - Every mutation is journaled; failed alternatives roll back cleanly
//!
//! 4. **Embedded code** (`embedded`, `extensions`)
//!    - `%` statements, `%%` blocks and `!` generator lines evaluate in a
//!      namespace with magic getters/setters (`cursor`, `match_result`)
//!      and injected search functions (`goto_next`, `find_single`, ...)
//!
//! # Example
//!
//! ```rust
//! use armatch::{MatchResult, Program, Value};
//!
//! let mut program = Program::new();
//! program.add_code_block("0x2000: blxeq r0", None).unwrap();
//!
//! let pattern = program.create_pattern("test: blx*:opcode r0").unwrap();
//! let mut mr = MatchResult::new();
//! program.find_single(&pattern, &mut mr).unwrap();
//!
//! let root = mr.root();
//! assert_eq!(mr.get(root, "opcode").unwrap(), Some(Value::Str("blxeq".into())));
//! assert_eq!(mr.get(root, "test").unwrap(), Some(Value::Address(0x2000)));
//! ```

pub mod asm;
pub mod embedded;
pub mod engine;
pub mod extensions;
pub mod parsing;
pub mod repl;
pub mod sig;

pub use asm::{Instruction, Operand, Reg};
pub use engine::{
    BlockPat, Cursor, EngineResult, ExecutionContext, MatchResult, PatternError, Program, ScopeId,
    Value,
};
pub use extensions::{Extension, ExtensionRegistry};
pub use sig::{run_signature_files, Signature, SignatureRunner};
