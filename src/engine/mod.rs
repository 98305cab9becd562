//! The matching engine core: transactional captures, cursors, the pattern
//! AST and the matcher protocol.

pub mod chaining;
pub mod context;
pub mod cursor;
pub mod data;
pub mod errors;
pub mod match_result;
pub mod operands;
pub mod pattern;
pub mod program;
pub mod transactions;
pub mod value;

pub use context::{ExecutionContext, Session};
pub use cursor::Cursor;
pub use errors::{EngineResult, PatternError};
pub use match_result::{MatchResult, ScopeId};
pub use pattern::BlockPat;
pub use program::Program;
pub use value::Value;
