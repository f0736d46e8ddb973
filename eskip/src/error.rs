use std::fmt;

/// A position in the source document, used to annotate diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub offset: usize,
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Errors produced while lexing or parsing an eskip document.
///
/// This is intentionally the only error kind eskip produces (`spec.md` §7's `Syntax` kind);
/// higher-level diagnostics (unknown filter, invalid args, ...) belong to the crate that
/// instantiates predicates/filters from the parsed AST.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{pos}: unexpected character {ch:?}")]
    UnexpectedChar { ch: char, pos: Position },

    #[error("{pos}: unterminated string literal")]
    UnterminatedString { pos: Position },

    #[error("{pos}: unterminated regexp literal")]
    UnterminatedRegexp { pos: Position },

    #[error("{pos}: invalid escape sequence \\{ch}")]
    InvalidEscape { ch: char, pos: Position },

    #[error("{pos}: invalid number literal")]
    InvalidNumber { pos: Position },

    #[error("{pos}: unexpected token: expected {expected}, found {found}")]
    UnexpectedToken {
        expected: String,
        found: String,
        pos: Position,
    },

    #[error("{pos}: unexpected end of input, expected {expected}")]
    UnexpectedEof { expected: String, pos: Position },

    #[error("{pos}: empty predicate chain")]
    EmptyPredicates { pos: Position },
}

impl Error {
    pub fn position(&self) -> Position {
        match self {
            Error::UnexpectedChar { pos, .. }
            | Error::UnterminatedString { pos }
            | Error::UnterminatedRegexp { pos }
            | Error::InvalidEscape { pos, .. }
            | Error::InvalidNumber { pos }
            | Error::UnexpectedToken { pos, .. }
            | Error::UnexpectedEof { pos, .. }
            | Error::EmptyPredicates { pos } => *pos,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
