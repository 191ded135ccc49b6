//! Recursive-descent parser for expert queries.
//!
//! `AND` binds tighter than `OR`; parentheses keep explicit grouping as a node.

use super::ast::{Comparison, ComparisonType, Expr, Literal, Metadata, Period, Searchable, ValueWrapper};
use super::lexer::{Lexer, Operator, Spanned, Token};
use super::SyntaxError;

/// Deepest parenthesis nesting accepted.
pub(crate) const MAX_NESTING: usize = 256;

/// Parse raw query text into a syntax tree.
pub fn parse_expert_query(input: &str) -> Result<Expr, SyntaxError> {
    let tokens = Lexer::new(input).tokenize()?;
    if tokens.is_empty() {
        return Err(SyntaxError::new("query cannot be empty", input, 0));
    }
    let mut parser = Parser {
        input,
        tokens,
        position: 0,
        depth: 0,
    };
    let expr = parser.parse_or()?;
    parser.expect_end()?;
    Ok(expr)
}

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Spanned>,
    position: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn parse_or(&mut self) -> Result<Expr, SyntaxError> {
        let first = self.parse_and()?;
        let mut operands = vec![first];
        while self.match_token(&Token::Or) {
            self.advance();
            operands.push(self.parse_and()?);
        }
        Ok(collapse(operands, Expr::Or))
    }

    fn parse_and(&mut self) -> Result<Expr, SyntaxError> {
        let first = self.parse_term()?;
        let mut operands = vec![first];
        while self.match_token(&Token::And) {
            self.advance();
            operands.push(self.parse_term()?);
        }
        Ok(collapse(operands, Expr::And))
    }

    fn parse_term(&mut self) -> Result<Expr, SyntaxError> {
        if self.match_token(&Token::LParen) {
            if self.depth == MAX_NESTING {
                return Err(self.error("query is nested too deeply"));
            }
            self.advance();
            self.depth += 1;
            let inner = self.parse_or()?;
            self.depth -= 1;
            self.expect(&Token::RParen, "')'")?;
            Ok(Expr::Parenthesis(Box::new(inner)))
        } else {
            self.parse_comparison().map(Expr::Comparison)
        }
    }

    fn parse_comparison(&mut self) -> Result<Comparison, SyntaxError> {
        let searchable = match self.current() {
            Some(Token::Identifier(name)) => Searchable::Field(name.clone()),
            Some(Token::Metadata(name)) => Searchable::Metadata(Metadata::new(name.clone())),
            _ => return Err(self.error("expected a field name or @metadata")),
        };
        self.advance();

        let (kind, value) = match self.current().cloned() {
            Some(Token::Operator(op)) => {
                self.advance();
                let kind = match op {
                    Operator::Eq => ComparisonType::Equal,
                    Operator::Neq => ComparisonType::NotEqual,
                    Operator::Lt => ComparisonType::LesserThan,
                    Operator::Lte => ComparisonType::LesserOrEqual,
                    Operator::Gt => ComparisonType::GreaterThan,
                    Operator::Gte => ComparisonType::GreaterOrEqual,
                };
                (kind, self.parse_value()?)
            }
            Some(Token::Between) => {
                self.advance();
                self.expect(&Token::LParen, "'(' after BETWEEN")?;
                let low = self.parse_value()?;
                self.expect(&Token::Comma, "','")?;
                let high = self.parse_value()?;
                self.expect(&Token::RParen, "')'")?;
                (ComparisonType::Between, ValueWrapper::Between(Box::new(low), Box::new(high)))
            }
            Some(Token::Not) => {
                self.advance();
                self.expect(&Token::In, "IN after NOT")?;
                (ComparisonType::NotIn, self.parse_in_list()?)
            }
            Some(Token::In) => {
                self.advance();
                (ComparisonType::In, self.parse_in_list()?)
            }
            _ => return Err(self.error("expected a comparison operator")),
        };

        Ok(Comparison {
            searchable,
            kind,
            value,
        })
    }

    fn parse_in_list(&mut self) -> Result<ValueWrapper, SyntaxError> {
        self.expect(&Token::LParen, "'(' after IN")?;
        let mut values = vec![self.parse_value()?];
        while self.match_token(&Token::Comma) {
            self.advance();
            values.push(self.parse_value()?);
        }
        self.expect(&Token::RParen, "')'")?;
        Ok(ValueWrapper::In(values))
    }

    fn parse_value(&mut self) -> Result<ValueWrapper, SyntaxError> {
        let value = match self.current().cloned() {
            Some(Token::String(s)) => {
                self.advance();
                ValueWrapper::Simple(Literal::Text(s))
            }
            Some(Token::Number(n)) => {
                self.advance();
                ValueWrapper::Simple(Literal::Number(n))
            }
            Some(Token::Minus) => {
                self.advance();
                match self.current() {
                    Some(Token::Number(n)) => {
                        let n = *n;
                        self.advance();
                        ValueWrapper::Simple(Literal::Number(-n))
                    }
                    _ => return Err(self.error("expected a number after '-'")),
                }
            }
            Some(Token::Identifier(name)) => {
                let upper = name.to_ascii_uppercase();
                self.advance();
                self.expect(&Token::LParen, "'(' after function name")?;
                self.expect(&Token::RParen, "')'")?;
                match upper.as_str() {
                    "NOW" => ValueWrapper::CurrentDateTime(self.parse_period()?),
                    "MYSELF" => ValueWrapper::CurrentUser,
                    "OPEN" => ValueWrapper::StatusOpen,
                    _ => {
                        self.position -= 3;
                        return Err(self.error(&format!("unknown function '{}()'", name)));
                    }
                }
            }
            _ => return Err(self.error("expected a value")),
        };
        Ok(value)
    }

    /// Optional `+ 1d` / `- 2w` after `NOW()`.
    fn parse_period(&mut self) -> Result<Option<Period>, SyntaxError> {
        let sign = match self.current() {
            Some(Token::Plus) => 1,
            Some(Token::Minus) => -1,
            _ => return Ok(None),
        };
        self.advance();
        match self.current() {
            Some(Token::Period(amount, unit)) => {
                let period = Period {
                    amount: sign * amount,
                    unit: *unit,
                };
                self.advance();
                Ok(Some(period))
            }
            _ => Err(self.error("expected a period such as 1d, 2w, 3m or 1y")),
        }
    }

    fn current(&self) -> Option<&Token> {
        self.tokens.get(self.position).map(|s| &s.token)
    }

    fn match_token(&self, token: &Token) -> bool {
        self.current() == Some(token)
    }

    fn advance(&mut self) {
        self.position += 1;
    }

    fn expect(&mut self, token: &Token, description: &str) -> Result<(), SyntaxError> {
        if self.match_token(token) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(&format!("expected {}", description)))
        }
    }

    fn expect_end(&self) -> Result<(), SyntaxError> {
        if self.position < self.tokens.len() {
            Err(self.error("unexpected trailing input"))
        } else {
            Ok(())
        }
    }

    fn error(&self, message: &str) -> SyntaxError {
        let position = self
            .tokens
            .get(self.position)
            .map(|s| s.position)
            .unwrap_or(self.input.len());
        SyntaxError::new(message, self.input, position)
    }
}

fn collapse(mut operands: Vec<Expr>, combine: fn(Vec<Expr>) -> Expr) -> Expr {
    if operands.len() == 1 {
        operands.remove(0)
    } else {
        combine(operands)
    }
}
