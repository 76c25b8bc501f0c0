use std::str::FromStr;

use bigdecimal::BigDecimal;
use log::debug;
use num_bigint::BigInt;

use crate::{
    ast::{self, BinaryOp},
    error::ParseError,
    token::{Token, TokenKind},
};

/// Recursive descent over a token slice. Precedence lives in the call
/// structure: each `parse_*` level only ever calls the level below it.
#[derive(Debug, Clone)]
struct Parser<'a> {
    tokens: &'a [Token],
    current: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Parser { tokens, current: 0 }
    }

    fn at_end(&self) -> bool {
        self.current >= self.tokens.len()
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.current)
    }

    fn check_word(&self, word: &str) -> bool {
        self.peek().map_or(false, |token| token.is_word(word))
    }

    fn check_symbol(&self, symbol: &str) -> bool {
        self.peek().map_or(false, |token| token.is_symbol(symbol))
    }

    fn match_word(&mut self, word: &str) -> bool {
        let matched = self.check_word(word);
        if matched {
            self.current += 1;
        }
        matched
    }

    fn match_symbol(&mut self, symbol: &str) -> bool {
        let matched = self.check_symbol(symbol);
        if matched {
            self.current += 1;
        }
        matched
    }

    fn error_at_current(&self, expected: &str) -> ParseError {
        match self.peek() {
            Some(token) => token.error_at(self.current, expected),
            None => ParseError::UnexpectedEnd {
                expected: expected.into(),
            },
        }
    }

    fn expect_word(&mut self, word: &str, expected: &str) -> Result<(), ParseError> {
        if self.match_word(word) {
            Ok(())
        } else {
            Err(self.error_at_current(expected))
        }
    }

    fn expect_symbol(&mut self, symbol: &str, expected: &str) -> Result<(), ParseError> {
        if self.match_symbol(symbol) {
            Ok(())
        } else {
            Err(self.error_at_current(expected))
        }
    }

    fn expect_identifier(&mut self, expected: &str) -> Result<String, ParseError> {
        match self.peek() {
            Some(token) if token.kind == TokenKind::Identifier => {
                self.current += 1;
                Ok(token.literal.clone())
            }
            _ => Err(self.error_at_current(expected)),
        }
    }

    fn parse_type_annotation(&mut self) -> Result<Option<String>, ParseError> {
        if self.match_symbol(":") {
            Ok(Some(self.expect_identifier("type name after ':'")?))
        } else {
            Ok(None)
        }
    }

    /// Statements up to (not including) any of the `terminators` words.
    fn parse_block(&mut self, terminators: &[&str]) -> Result<Vec<ast::Stmt>, ParseError> {
        let mut stmts = Vec::new();
        while !terminators.iter().any(|word| self.check_word(word)) {
            if self.at_end() {
                return Err(self.error_at_current(&terminators.join(" or ")));
            }
            stmts.push(self.parse_stmt()?);
        }

        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> Result<ast::Stmt, ParseError> {
        if self.match_word("LET") {
            Ok(self.parse_let()?.into())
        } else if self.match_word("DEF") {
            Ok(self.parse_def()?.into())
        } else if self.match_word("IF") {
            self.parse_if()
        } else if self.match_word("FOR") {
            self.parse_for()
        } else if self.match_word("RETURN") {
            self.parse_return()
        } else {
            self.parse_expression_or_assignment()
        }
    }

    fn parse_let(&mut self) -> Result<ast::Let, ParseError> {
        let name = self.expect_identifier("variable name after LET")?;
        let type_name = self.parse_type_annotation()?;
        let value = if self.match_symbol("=") {
            Some(self.parse_expr()?)
        } else {
            None
        };
        self.expect_symbol(";", "';' after LET")?;

        Ok(ast::Let {
            name,
            type_name,
            value,
        })
    }

    fn parse_def(&mut self) -> Result<ast::Def, ParseError> {
        let name = self.expect_identifier("function name after DEF")?;
        self.expect_symbol("(", "'(' after function name")?;

        let mut parameters = Vec::new();
        if !self.check_symbol(")") {
            loop {
                let name = self.expect_identifier("parameter name")?;
                let type_name = self.parse_type_annotation()?;
                parameters.push(ast::Parameter { name, type_name });

                if !self.match_symbol(",") {
                    break;
                }
            }
        }
        self.expect_symbol(")", "',' or ')' in parameter list")?;

        let return_type = self.parse_type_annotation()?;

        let mut body = Vec::new();
        if self.match_word("DO") {
            body = self.parse_block(&["END"])?;
            self.expect_word("END", "END")?;
        }

        Ok(ast::Def {
            name,
            parameters,
            return_type,
            body,
        })
    }

    fn parse_if(&mut self) -> Result<ast::Stmt, ParseError> {
        let condition = self.parse_expr()?;
        self.expect_word("DO", "DO after IF condition")?;

        let then_body = self.parse_block(&["ELSE", "END"])?;
        let else_body = if self.match_word("ELSE") {
            self.parse_block(&["END"])?
        } else {
            Vec::new()
        };
        self.expect_word("END", "END")?;

        Ok(ast::If {
            condition,
            then_body,
            else_body,
        }
        .into())
    }

    fn parse_for(&mut self) -> Result<ast::Stmt, ParseError> {
        let name = self.expect_identifier("loop variable after FOR")?;
        self.expect_word("IN", "IN after loop variable")?;
        let iterable = self.parse_expr()?;
        self.expect_word("DO", "DO after FOR iterable")?;
        let body = self.parse_block(&["END"])?;
        self.expect_word("END", "END")?;

        Ok(ast::For {
            name,
            iterable,
            body,
        }
        .into())
    }

    fn parse_return(&mut self) -> Result<ast::Stmt, ParseError> {
        let value = if self.check_symbol(";") {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect_symbol(";", "';' after RETURN")?;

        Ok(ast::Return { value }.into())
    }

    fn parse_expression_or_assignment(&mut self) -> Result<ast::Stmt, ParseError> {
        let start = self.current;
        let expr = self.parse_expr()?;

        if self.match_symbol(";") {
            return Ok(ast::Expression { expr }.into());
        }

        if self.match_symbol("=") {
            if !matches!(expr, ast::Expr::Variable(_) | ast::Expr::Property(_)) {
                return Err(ParseError::InvalidAssignmentTarget { index: start });
            }
            let value = self.parse_expr()?;
            self.expect_symbol(";", "';' after assignment")?;
            return Ok(ast::Assignment {
                target: expr,
                value,
            }
            .into());
        }

        Err(self.error_at_current("';' or '='"))
    }

    fn parse_expr(&mut self) -> Result<ast::Expr, ParseError> {
        self.parse_logical()
    }

    /// One left-associative precedence level.
    fn parse_binary(
        &mut self,
        ops: &[BinaryOp],
        operand: fn(&mut Self) -> Result<ast::Expr, ParseError>,
    ) -> Result<ast::Expr, ParseError> {
        let mut expr = operand(self)?;

        while let Some(op) = self
            .peek()
            .and_then(|token| BinaryOp::from_literal(&token.literal))
            .filter(|op| ops.contains(op))
        {
            self.current += 1;
            let right = operand(self)?;
            expr = ast::Binary {
                op,
                left: Box::new(expr),
                right: Box::new(right),
            }
            .into();
        }

        Ok(expr)
    }

    fn parse_logical(&mut self) -> Result<ast::Expr, ParseError> {
        self.parse_binary(&[BinaryOp::And, BinaryOp::Or], Self::parse_comparison)
    }

    fn parse_comparison(&mut self) -> Result<ast::Expr, ParseError> {
        self.parse_binary(
            &[
                BinaryOp::Less,
                BinaryOp::LessEqual,
                BinaryOp::Greater,
                BinaryOp::GreaterEqual,
                BinaryOp::Equal,
                BinaryOp::NotEqual,
            ],
            Self::parse_additive,
        )
    }

    fn parse_additive(&mut self) -> Result<ast::Expr, ParseError> {
        self.parse_binary(
            &[BinaryOp::Add, BinaryOp::Subtract],
            Self::parse_multiplicative,
        )
    }

    fn parse_multiplicative(&mut self) -> Result<ast::Expr, ParseError> {
        self.parse_binary(
            &[BinaryOp::Multiply, BinaryOp::Divide],
            Self::parse_secondary,
        )
    }

    fn parse_secondary(&mut self) -> Result<ast::Expr, ParseError> {
        let mut expr = self.parse_primary()?;

        while self.match_symbol(".") {
            let name = self.expect_identifier("member name after '.'")?;
            expr = if self.check_symbol("(") {
                let arguments = self.parse_arguments()?;
                ast::Method {
                    receiver: Box::new(expr),
                    name,
                    arguments,
                }
                .into()
            } else {
                ast::Property {
                    receiver: Box::new(expr),
                    name,
                }
                .into()
            };
        }

        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<ast::Expr, ParseError> {
        let token = match self.peek() {
            Some(token) => token,
            None => return Err(self.error_at_current("expression")),
        };

        if token.kind.is_literal() {
            self.current += 1;
            return Ok(parse_literal(token)?.into());
        }

        if token.kind == TokenKind::Identifier {
            let literal = match token.literal.as_str() {
                "NIL" => Some(ast::Literal::Nil),
                "TRUE" => Some(ast::Literal::Boolean(true)),
                "FALSE" => Some(ast::Literal::Boolean(false)),
                _ => None,
            };
            if let Some(literal) = literal {
                self.current += 1;
                return Ok(literal.into());
            }
            if token.literal == "OBJECT" {
                self.current += 1;
                return Ok(self.parse_object()?.into());
            }

            self.current += 1;
            let name = token.literal.clone();
            return Ok(if self.check_symbol("(") {
                let arguments = self.parse_arguments()?;
                ast::Function { name, arguments }.into()
            } else {
                ast::Variable { name }.into()
            });
        }

        if token.is_symbol("(") {
            self.current += 1;
            let inner = self.parse_expr()?;
            self.expect_symbol(")", "closing ')' in grouping")?;
            return Ok(ast::Group {
                inner: Box::new(inner),
            }
            .into());
        }

        Err(self.error_at_current("expression"))
    }

    fn parse_arguments(&mut self) -> Result<Vec<ast::Expr>, ParseError> {
        self.expect_symbol("(", "'('")?;

        let mut arguments = Vec::new();
        if self.match_symbol(")") {
            return Ok(arguments);
        }

        loop {
            arguments.push(self.parse_expr()?);
            if !self.match_symbol(",") {
                break;
            }
        }
        self.expect_symbol(")", "',' or ')' in argument list")?;

        Ok(arguments)
    }

    fn parse_object(&mut self) -> Result<ast::ObjectExpr, ParseError> {
        let name = if self.check_word("DO") {
            None
        } else {
            Some(self.expect_identifier("object name or DO after OBJECT")?)
        };
        self.expect_word("DO", "DO after OBJECT")?;

        let mut fields = Vec::new();
        let mut methods = Vec::new();
        while !self.check_word("END") {
            if self.match_word("LET") {
                fields.push(self.parse_let()?);
            } else if self.match_word("DEF") {
                methods.push(self.parse_def()?);
            } else {
                return Err(self.error_at_current("LET, DEF, or END in object body"));
            }
        }
        self.expect_word("END", "END")?;

        Ok(ast::ObjectExpr {
            name,
            fields,
            methods,
        })
    }
}

fn invalid_literal(token: &Token, reason: impl Into<String>) -> ParseError {
    ParseError::InvalidLiteral {
        literal: token.literal.clone(),
        reason: reason.into(),
    }
}

/// Largest exponent accepted in a number literal. `1e4096` already has
/// 4097 digits.
const MAX_EXPONENT: u64 = 4096;

fn check_exponent(token: &Token, text: &str) -> Result<(), ParseError> {
    if let Some((_, exponent)) = text.split_once('e') {
        let magnitude = exponent.trim_start_matches(|c: char| c == '+' || c == '-');
        if magnitude.parse::<u64>().map_or(true, |e| e > MAX_EXPONENT) {
            return Err(invalid_literal(
                token,
                format!("exponent is larger than {MAX_EXPONENT}"),
            ));
        }
    }
    Ok(())
}

fn parse_literal(token: &Token) -> Result<ast::Literal, ParseError> {
    let text = token.literal.strip_prefix('+').unwrap_or(&token.literal);
    if matches!(token.kind, TokenKind::Integer | TokenKind::Decimal) {
        check_exponent(token, text)?;
    }

    match token.kind {
        TokenKind::Integer if text.contains('e') => {
            let value =
                BigDecimal::from_str(text).map_err(|err| invalid_literal(token, err.to_string()))?;
            if !value.is_integer() {
                return Err(invalid_literal(token, "exponent leaves a fraction"));
            }
            let (digits, _) = value.with_scale(0).as_bigint_and_exponent();
            Ok(ast::Literal::Integer(digits))
        }
        TokenKind::Integer => BigInt::from_str(text)
            .map(ast::Literal::Integer)
            .map_err(|err| invalid_literal(token, err.to_string())),
        TokenKind::Decimal => BigDecimal::from_str(text)
            .map(ast::Literal::Decimal)
            .map_err(|err| invalid_literal(token, err.to_string())),
        TokenKind::Character => {
            let decoded = unescape(token, unquote(token)?)?;
            let mut chars = decoded.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(ast::Literal::Character(c)),
                _ => Err(invalid_literal(token, "expected exactly one character")),
            }
        }
        TokenKind::String => Ok(ast::Literal::String(unescape(token, unquote(token)?)?)),
        TokenKind::Identifier | TokenKind::Operator => Err(invalid_literal(token, "not a literal")),
    }
}

fn unquote(token: &Token) -> Result<&str, ParseError> {
    let literal = token.literal.as_str();
    if literal.len() < 2 {
        return Err(invalid_literal(token, "missing quotes"));
    }
    Ok(&literal[1..literal.len() - 1])
}

fn unescape(token: &Token, body: &str) -> Result<String, ParseError> {
    let mut decoded = String::with_capacity(body.len());
    let mut chars = body.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            decoded.push(c);
            continue;
        }
        decoded.push(match chars.next() {
            Some('b') => '\u{8}',
            Some('n') => '\n',
            Some('r') => '\r',
            Some('t') => '\t',
            Some('\'') => '\'',
            Some('"') => '"',
            Some('\\') => '\\',
            Some(other) => {
                return Err(invalid_literal(
                    token,
                    format!("unknown escape '\\{other}'"),
                ))
            }
            None => return Err(invalid_literal(token, "dangling backslash")),
        });
    }

    Ok(decoded)
}

pub fn parse_source(tokens: &[Token]) -> Result<ast::Source, ParseError> {
    let mut parser = Parser::new(tokens);

    let mut statements = Vec::new();
    while !parser.at_end() {
        statements.push(parser.parse_stmt()?);
    }

    debug!("parsed {} statement(s)", statements.len());
    Ok(ast::Source { statements })
}
