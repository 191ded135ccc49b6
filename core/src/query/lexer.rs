//! Tokenizer for the expert query language.

use super::ast::PeriodUnit;
use super::SyntaxError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Identifier(String),
    /// `@name`
    Metadata(String),
    String(String),
    Number(f64),
    /// `1d`, `2w`, ...
    Period(i64, PeriodUnit),
    And,
    Or,
    Not,
    In,
    Between,
    Operator(Operator),
    LParen,
    RParen,
    Comma,
    Plus,
    Minus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operator {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
}

/// A token with the byte offset where it starts.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub position: usize,
}

pub(crate) struct Lexer<'a> {
    input: &'a str,
    position: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, position: 0 }
    }

    pub fn tokenize(mut self) -> Result<Vec<Spanned>, SyntaxError> {
        let mut tokens = Vec::new();
        loop {
            self.consume_whitespace();
            if self.is_eof() {
                return Ok(tokens);
            }
            let position = self.position;
            let token = self.next_token()?;
            tokens.push(Spanned { token, position });
        }
    }

    fn next_token(&mut self) -> Result<Token, SyntaxError> {
        let start = self.position;
        let ch = match self.peek_char() {
            Some(ch) => ch,
            None => return Err(self.error(start, "unexpected end of query")),
        };

        if is_identifier_start(ch) {
            return Ok(self.consume_identifier());
        }
        if ch == '"' || ch == '\'' {
            return self.consume_string();
        }
        if ch.is_ascii_digit() {
            return self.consume_number();
        }

        self.advance();
        let token = match ch {
            '@' => {
                let name = self.consume_name();
                if name.is_empty() {
                    return Err(self.error(start, "expected metadata name after '@'"));
                }
                Token::Metadata(name)
            }
            '(' => Token::LParen,
            ')' => Token::RParen,
            ',' => Token::Comma,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '=' => Token::Operator(Operator::Eq),
            '!' => {
                if self.peek_char() == Some('=') {
                    self.advance();
                    Token::Operator(Operator::Neq)
                } else {
                    return Err(self.error(start, "expected '=' after '!'"));
                }
            }
            '<' => {
                if self.peek_char() == Some('=') {
                    self.advance();
                    Token::Operator(Operator::Lte)
                } else {
                    Token::Operator(Operator::Lt)
                }
            }
            '>' => {
                if self.peek_char() == Some('=') {
                    self.advance();
                    Token::Operator(Operator::Gte)
                } else {
                    Token::Operator(Operator::Gt)
                }
            }
            other => {
                return Err(self.error(start, &format!("unexpected character '{}'", other)));
            }
        };
        Ok(token)
    }

    fn consume_whitespace(&mut self) {
        while let Some(ch) = self.peek_char() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn consume_name(&mut self) -> String {
        let start = self.position;
        while let Some(ch) = self.peek_char() {
            if is_identifier_part(ch) {
                self.advance();
            } else {
                break;
            }
        }
        self.input[start..self.position].to_string()
    }

    fn consume_identifier(&mut self) -> Token {
        let ident = self.consume_name();
        match ident.to_ascii_uppercase().as_str() {
            "AND" => Token::And,
            "OR" => Token::Or,
            "NOT" => Token::Not,
            "IN" => Token::In,
            "BETWEEN" => Token::Between,
            _ => Token::Identifier(ident),
        }
    }

    fn consume_string(&mut self) -> Result<Token, SyntaxError> {
        let start = self.position;
        let quote = match self.next_char() {
            Some(q) => q,
            None => return Err(self.error(start, "unexpected end of query")),
        };
        let mut value = String::new();
        while let Some(ch) = self.next_char() {
            if ch == quote {
                return Ok(Token::String(value));
            }
            if ch == '\\' {
                match self.next_char() {
                    Some(escaped) => value.push(escaped),
                    None => return Err(self.error(start, "unterminated escape sequence")),
                }
            } else {
                value.push(ch);
            }
        }
        Err(self.error(start, "unterminated string literal"))
    }

    fn consume_number(&mut self) -> Result<Token, SyntaxError> {
        let start = self.position;
        while let Some(ch) = self.peek_char() {
            if ch.is_ascii_digit() || ch == '.' {
                self.advance();
            } else {
                break;
            }
        }
        let digits = &self.input[start..self.position];

        // Digits glued to a unit letter form a period: 3d, 2w, 1m, 1y
        if self.peek_char().is_some_and(|c| c.is_ascii_alphabetic()) {
            let suffix = self.consume_name();
            let unit = PeriodUnit::from_suffix(&suffix)
                .ok_or_else(|| self.error(start, &format!("invalid period '{}{}'", digits, suffix)))?;
            let amount: i64 = digits
                .parse()
                .map_err(|_| self.error(start, &format!("invalid period '{}{}'", digits, suffix)))?;
            return Ok(Token::Period(amount, unit));
        }

        digits
            .parse::<f64>()
            .map(Token::Number)
            .map_err(|_| self.error(start, &format!("invalid number '{}'", digits)))
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    fn next_char(&mut self) -> Option<char> {
        let ch = self.peek_char()?;
        self.position += ch.len_utf8();
        Some(ch)
    }

    fn advance(&mut self) {
        self.next_char();
    }

    fn is_eof(&self) -> bool {
        self.position >= self.input.len()
    }

    fn error(&self, position: usize, message: &str) -> SyntaxError {
        SyntaxError::new(message, self.input, position)
    }
}

fn is_identifier_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_'
}

fn is_identifier_part(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch == '.'
}
