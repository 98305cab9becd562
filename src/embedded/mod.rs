//! Embedded expression language: a small statement/expression language that
//! pattern code lines (`%`, `%%` blocks, `!` generators, `.obj` expressions)
//! run against the current match. See [`ns::EmbeddedNs`] for the namespace
//! contract and [`eval`] for the evaluator.

pub mod eval;
pub mod lexer;
pub mod ns;
pub mod parser;

pub use ns::{EmbeddedNs, Fixture, MagicGetter, MagicSetter};
pub use parser::{parse_block, parse_expression, Block, Expr};
