use std::fmt;

use crate::error::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Identifier,
    Integer,
    Decimal,
    Character,
    String,
    Operator,
}

impl TokenKind {
    pub fn is_literal(&self) -> bool {
        matches!(
            *self,
            Self::Integer | Self::Decimal | Self::Character | Self::String
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Identifier => "IDENTIFIER",
            Self::Integer => "INTEGER",
            Self::Decimal => "DECIMAL",
            Self::Character => "CHARACTER",
            Self::String => "STRING",
            Self::Operator => "OPERATOR",
        };
        f.write_str(name)
    }
}

/// A lexical unit. Literal tokens keep their source text verbatim, quotes
/// and escapes included; decoding happens in the parser.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token {
    pub kind: TokenKind,
    pub literal: String,
}

impl Token {
    pub fn new(kind: TokenKind, literal: impl Into<String>) -> Self {
        Token {
            kind,
            literal: literal.into(),
        }
    }

    /// True for identifier tokens spelled exactly `word` (keywords are plain
    /// identifiers at the lexical level).
    pub fn is_word(&self, word: &str) -> bool {
        self.kind == TokenKind::Identifier && self.literal == word
    }

    /// True for operator tokens spelled exactly `symbol`.
    pub fn is_symbol(&self, symbol: &str) -> bool {
        self.kind == TokenKind::Operator && self.literal == symbol
    }

    pub fn error_at(&self, index: usize, expected: &str) -> ParseError {
        ParseError::Expected {
            expected: expected.into(),
            found: self.literal.clone(),
            index,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.kind, self.literal)
    }
}
