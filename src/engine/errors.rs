//! The closed error family for the matching engine.
//!
//! Every pattern mismatch is a value of [`PatternError`]. Mismatches raised
//! inside a transaction trigger rollback of that transaction and the engine
//! tries the next alternative; errors reaching the top of a `find_*` call are
//! surfaced to the caller as is.

use std::fmt;

use crate::engine::value::Value;

/// Result type for all matching operations.
pub type EngineResult<T> = Result<T, PatternError>;

#[derive(Debug, Clone, PartialEq)]
pub enum PatternError {
    /// Generic mismatch with no more specific kind.
    Mismatch,
    /// Operand (or other matched item) has the wrong shape.
    PatternTypeMismatch { expected: String, got: String },
    /// Correct shape, wrong value.
    PatternValueMismatch { expected: String, got: String },
    /// The same capture name was bound to two different values.
    CaptureCollision {
        name: String,
        existing: Value,
        updated: Value,
    },
    /// A search yielded no matches.
    NoMatches,
    /// `find_single` saw more than one match.
    TooManyMatches,
    /// A user-level `expect(cond)` failed.
    ExpectFailure(String),
    /// The cursor sequence was exhausted.
    NoMoreInstructions,
    /// The operand chain finished with operands left over.
    NotAllOperandsMatched { tail: String },
    /// The operand chain needed more operands than were available.
    OperandsExhausted { pattern: String },
    /// The host cannot resolve a symbol name.
    UnresolvedSymbol(String),
    /// Sentinel cursor access, out-of-range byte read, bad address, etc.
    InvalidAccess(String),
    /// A reverse search was requested where none is possible.
    ReverseSearchUnsupported,
    /// A block anchor forces reverse matching over a non-reversible node.
    PatternNotReversible(String),
    /// A structured-object layout failed to parse at the cursor.
    ConstructParsing(String),
    /// Pattern or assembly text failed to parse.
    Parse(String),
    /// Embedded code failed to parse or evaluate.
    Script(String),
    /// Internal: a declared variable was read before being filled.
    UndefinedVar(String),
    /// Internal: a write-once slot was written twice.
    DuplicateValue(String),
}

impl PatternError {
    /// Whether `find_*` drivers and searches may recover from this error by
    /// trying the next candidate cursor. Everything else is fatal and
    /// propagates. Capture collisions are recoverable at search level (a
    /// candidate that contradicts an earlier capture is simply not a match),
    /// but a direct `match_at` call site still sees them.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PatternError::Mismatch
                | PatternError::PatternTypeMismatch { .. }
                | PatternError::PatternValueMismatch { .. }
                | PatternError::CaptureCollision { .. }
                | PatternError::NoMatches
                | PatternError::ExpectFailure(_)
                | PatternError::NoMoreInstructions
                | PatternError::NotAllOperandsMatched { .. }
                | PatternError::OperandsExhausted { .. }
                | PatternError::InvalidAccess(_)
                | PatternError::ConstructParsing(_)
        )
    }
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternError::Mismatch => write!(f, "pattern mismatch"),
            PatternError::PatternTypeMismatch { expected, got } => {
                write!(f, "type mismatch: expected {}, got {}", expected, got)
            }
            PatternError::PatternValueMismatch { expected, got } => {
                write!(f, "value mismatch: expected {}, got {}", expected, got)
            }
            PatternError::CaptureCollision {
                name,
                existing,
                updated,
            } => write!(
                f,
                "capture '{}' already bound to {}, cannot rebind to {}",
                name, existing, updated
            ),
            PatternError::NoMatches => write!(f, "no matches"),
            PatternError::TooManyMatches => write!(f, "too many matches"),
            PatternError::ExpectFailure(msg) => write!(f, "expectation failed: {}", msg),
            PatternError::NoMoreInstructions => write!(f, "no more instructions"),
            PatternError::NotAllOperandsMatched { tail } => {
                write!(f, "operands left unmatched: {}", tail)
            }
            PatternError::OperandsExhausted { pattern } => {
                write!(f, "no operand left for pattern {}", pattern)
            }
            PatternError::UnresolvedSymbol(name) => {
                write!(f, "unresolved symbol '{}'", name)
            }
            PatternError::InvalidAccess(msg) => write!(f, "invalid access: {}", msg),
            PatternError::ReverseSearchUnsupported => {
                write!(f, "reverse search is not supported here")
            }
            PatternError::PatternNotReversible(what) => {
                write!(f, "pattern line cannot be matched in reverse: {}", what)
            }
            PatternError::ConstructParsing(msg) => {
                write!(f, "object parsing failed: {}", msg)
            }
            PatternError::Parse(msg) => write!(f, "parse error: {}", msg),
            PatternError::Script(msg) => write!(f, "embedded code error: {}", msg),
            PatternError::UndefinedVar(name) => {
                write!(f, "variable '{}' declared but not set", name)
            }
            PatternError::DuplicateValue(name) => {
                write!(f, "duplicate value for '{}'", name)
            }
        }
    }
}

impl std::error::Error for PatternError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_split() {
        assert!(PatternError::NoMatches.is_recoverable());
        assert!(PatternError::InvalidAccess("x".into()).is_recoverable());
        assert!(PatternError::CaptureCollision {
            name: "a".into(),
            existing: Value::Int(1),
            updated: Value::Int(2),
        }
        .is_recoverable());
        assert!(!PatternError::TooManyMatches.is_recoverable());
        assert!(!PatternError::Script("boom".into()).is_recoverable());
        assert!(!PatternError::UndefinedVar("v".into()).is_recoverable());
    }

    #[test]
    fn display_forms() {
        let e = PatternError::PatternValueMismatch {
            expected: "r0".into(),
            got: "r1".into(),
        };
        assert_eq!(e.to_string(), "value mismatch: expected r0, got r1");
    }
}
