use log::debug;

use crate::{
    error::LexError,
    token::{Token, TokenKind},
};

/// Escapes accepted after a backslash in character and string literals.
const ESCAPES: [char; 7] = ['b', 'n', 'r', 't', '\'', '"', '\\'];

#[derive(Debug, Clone)]
pub struct Lexer {
    source: Vec<char>,

    start: usize,
    current: usize,
}

impl Lexer {
    pub fn from_str(source: &str) -> Self {
        Lexer {
            source: source.chars().collect(),
            start: 0,
            current: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    fn advance(&mut self) {
        self.current += 1;
    }

    fn peek(&self) -> Option<char> {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.source.get(self.current + offset).copied()
    }

    fn peek_is(&self, offset: usize, predicate: impl Fn(char) -> bool) -> bool {
        self.peek_at(offset).map_or(false, predicate)
    }

    fn create_token(&self, kind: TokenKind) -> Token {
        Token {
            kind,
            literal: self.source[self.start..self.current].iter().collect(),
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek_is(0, is_whitespace) {
            self.advance();
        }
    }

    fn skip_comment(&mut self) {
        while !self.at_end() && !self.peek_is(0, |c| c == '\n' || c == '\r') {
            self.advance();
        }
    }

    fn lex_identifier(&mut self) -> Token {
        self.advance();
        while self.peek_is(0, |c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            self.advance();
        }

        self.create_token(TokenKind::Identifier)
    }

    /// Lexes `[+-]?digits(.digits)?(e[+-]?digits)?`. A `.` or `e` that is not
    /// followed by a digit is left in place for the next token.
    fn lex_number(&mut self) -> Result<Token, LexError> {
        let mut kind = TokenKind::Integer;

        if self.peek_is(0, |c| c == '+' || c == '-') {
            self.advance();
        }
        while self.peek_is(0, |c| c.is_ascii_digit()) {
            self.advance();
        }

        if self.peek() == Some('.') && self.peek_is(1, |c| c.is_ascii_digit()) {
            kind = TokenKind::Decimal;
            self.advance();
            while self.peek_is(0, |c| c.is_ascii_digit()) {
                self.advance();
            }
        }

        if self.peek() == Some('e') {
            if self.peek_is(1, |c| c.is_ascii_digit()) {
                self.advance();
            } else if self.peek_is(1, |c| c == '+' || c == '-') {
                if !self.peek_is(2, |c| c.is_ascii_digit()) {
                    return Err(LexError::DanglingExponent {
                        index: self.current + 1,
                    });
                }
                self.current += 2;
            }

            while self.peek_is(0, |c| c.is_ascii_digit()) {
                self.advance();
            }
        }

        Ok(self.create_token(kind))
    }

    /// Consumes a backslash and the escape character after it. Running out of
    /// input is left for the caller to report as an unterminated literal.
    fn lex_escape(&mut self) -> Result<(), LexError> {
        let index = self.current;
        self.advance();

        match self.peek() {
            Some(c) if ESCAPES.contains(&c) => {
                self.advance();
                Ok(())
            }
            Some(escape) => Err(LexError::InvalidEscape { escape, index }),
            None => Ok(()),
        }
    }

    fn lex_character(&mut self) -> Result<Token, LexError> {
        let index = self.start;
        self.advance(); // opening '

        match self.peek() {
            None | Some('\n') | Some('\r') => {
                return Err(LexError::UnterminatedCharacter { index })
            }
            Some('\'') => return Err(LexError::InvalidCharacter { index }),
            Some('\\') => self.lex_escape()?,
            Some(_) => self.advance(),
        }

        match self.peek() {
            Some('\'') => {
                self.advance();
                Ok(self.create_token(TokenKind::Character))
            }
            None | Some('\n') | Some('\r') => Err(LexError::UnterminatedCharacter { index }),
            Some(_) => Err(LexError::InvalidCharacter { index }),
        }
    }

    fn lex_string(&mut self) -> Result<Token, LexError> {
        let index = self.start;
        self.advance(); // opening "

        loop {
            match self.peek() {
                None | Some('\n') | Some('\r') => {
                    return Err(LexError::UnterminatedString { index })
                }
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => self.lex_escape()?,
                Some(_) => self.advance(),
            }
        }

        Ok(self.create_token(TokenKind::String))
    }

    fn lex_operator(&mut self) -> Token {
        let c = self.peek();
        self.advance();

        if matches!(c, Some('<' | '>' | '!' | '=')) && self.peek() == Some('=') {
            self.advance();
        }

        self.create_token(TokenKind::Operator)
    }

    /// Produces the next token, or `None` when only whitespace or a comment
    /// was consumed.
    fn lex_token(&mut self) -> Result<Option<Token>, LexError> {
        let c = match self.peek() {
            Some(c) => c,
            None => return Ok(None),
        };

        let token = match c {
            _ if is_whitespace(c) => {
                self.skip_whitespace();
                return Ok(None);
            }
            '/' if self.peek_at(1) == Some('/') => {
                self.skip_comment();
                return Ok(None);
            }
            'A'..='Z' | 'a'..='z' | '_' => self.lex_identifier(),
            '0'..='9' => self.lex_number()?,
            '+' | '-' if self.peek_is(1, |c| c.is_ascii_digit()) => self.lex_number()?,
            '\'' => self.lex_character()?,
            '"' => self.lex_string()?,
            '\\' => {
                return Err(LexError::UnexpectedCharacter {
                    character: c,
                    index: self.current,
                })
            }
            _ if c.is_control() => {
                return Err(LexError::UnexpectedCharacter {
                    character: c,
                    index: self.current,
                })
            }
            _ => self.lex_operator(),
        };

        Ok(Some(token))
    }

    pub fn lex(&mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();

        while !self.at_end() {
            self.start = self.current;
            if let Some(token) = self.lex_token()? {
                tokens.push(token);
            }
        }

        debug!("lexed {} token(s)", tokens.len());
        Ok(tokens)
    }
}

fn is_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r')
}

pub fn lex(text: &str) -> Result<Vec<Token>, LexError> {
    Lexer::from_str(text).lex()
}
