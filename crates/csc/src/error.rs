use std::fmt;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("lexer error at line {line}, col {col}: {kind}")]
    Lex {
        kind: LexErrorKind,
        line: usize,
        col: usize,
    },

    #[error("parse error at line {line}, col {col}: {msg}")]
    Parse { line: usize, col: usize, msg: String },

    #[error("type error: {0}")]
    Type(TypeErrors),

    #[error("codegen error at line {line}, col {col}: {msg}")]
    Codegen { line: usize, col: usize, msg: String },
}

/// What went wrong while scanning.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexErrorKind {
    #[error("unexpected character {0:?}")]
    UnexpectedCharacter(char),
    #[error("unterminated string")]
    UnterminatedString,
    #[error("unterminated block comment")]
    UnterminatedComment,
    #[error("invalid number literal")]
    InvalidNumber,
}

// The lexer generator reports unmatched input through `Default`; `lex`
// replaces the placeholder with the offending character.
impl Default for LexErrorKind {
    fn default() -> Self {
        LexErrorKind::UnexpectedCharacter('\0')
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeErrorKind {
    UndefinedIdentifier,
    IncompatibleType,
    NonNumericOperand,
    NonIntegerIndex,
    UnsupportedOperands,
    NotIndexable,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {msg}")]
pub struct TypeError {
    pub kind: TypeErrorKind,
    pub line: usize,
    pub msg: String,
}

/// Every error the type checker found, in discovery order. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeErrors(pub Vec<TypeError>);

impl fmt::Display for TypeErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut errors = self.0.iter();
        if let Some(first) = errors.next() {
            write!(f, "{first}")?;
        }
        let rest = errors.count();
        if rest > 0 {
            write!(f, " (and {rest} more)")?;
        }
        Ok(())
    }
}
