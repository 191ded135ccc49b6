//! Syntax tree of an expert query.
//!
//! Nodes are immutable once built. Operator legality against a field's type is
//! not a property of the tree; it is checked during validation.

use std::fmt;

/// Root and inner nodes of a parsed query.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Operands joined by `OR` (at least two).
    Or(Vec<Expr>),
    /// Operands joined by `AND` (at least two).
    And(Vec<Expr>),
    /// Explicit `( ... )` grouping.
    Parenthesis(Box<Expr>),
    Comparison(Comparison),
}

impl Expr {
    /// Number of comparison leaves under this node.
    pub fn comparison_count(&self) -> usize {
        match self {
            Expr::Or(operands) | Expr::And(operands) => {
                operands.iter().map(Expr::comparison_count).sum()
            }
            Expr::Parenthesis(inner) => inner.comparison_count(),
            Expr::Comparison(_) => 1,
        }
    }

    /// Visit every comparison leaf, left to right.
    pub fn for_each_comparison<'a>(&'a self, f: &mut dyn FnMut(&'a Comparison)) {
        match self {
            Expr::Or(operands) | Expr::And(operands) => {
                for operand in operands {
                    operand.for_each_comparison(f);
                }
            }
            Expr::Parenthesis(inner) => inner.for_each_comparison(f),
            Expr::Comparison(comparison) => f(comparison),
        }
    }
}

/// A leaf term: `searchable <op> value`.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub searchable: Searchable,
    pub kind: ComparisonType,
    pub value: ValueWrapper,
}

/// What a comparison refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Searchable {
    /// A field, by name, in any tracker of the report.
    Field(String),
    /// `@name`
    Metadata(Metadata),
}

impl Searchable {
    pub fn name(&self) -> &str {
        match self {
            Searchable::Field(name) => name,
            Searchable::Metadata(metadata) => metadata.name(),
        }
    }
}

impl fmt::Display for Searchable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Searchable::Field(name) => write!(f, "{}", name),
            Searchable::Metadata(metadata) => write!(f, "@{}", metadata.name()),
        }
    }
}

/// A `@name` reference, as written. The name is not checked against the
/// allowed set until validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Metadata {
    name: String,
}

impl Metadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonType {
    Equal,
    NotEqual,
    In,
    NotIn,
    Between,
    GreaterThan,
    GreaterOrEqual,
    LesserThan,
    LesserOrEqual,
}

impl ComparisonType {
    /// `=`, `!=`, `IN`, `NOT IN`
    pub fn is_equality_or_membership(&self) -> bool {
        matches!(
            self,
            ComparisonType::Equal | ComparisonType::NotEqual | ComparisonType::In | ComparisonType::NotIn
        )
    }

    pub fn is_membership(&self) -> bool {
        matches!(self, ComparisonType::In | ComparisonType::NotIn)
    }
}

impl fmt::Display for ComparisonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComparisonType::Equal => "=",
            ComparisonType::NotEqual => "!=",
            ComparisonType::In => "in()",
            ComparisonType::NotIn => "not in()",
            ComparisonType::Between => "between()",
            ComparisonType::GreaterThan => ">",
            ComparisonType::GreaterOrEqual => ">=",
            ComparisonType::LesserThan => "<",
            ComparisonType::LesserOrEqual => "<=",
        };
        f.write_str(s)
    }
}

/// The right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueWrapper {
    Simple(Literal),
    /// `NOW()`, optionally shifted by a period.
    CurrentDateTime(Option<Period>),
    /// `MYSELF()`
    CurrentUser,
    /// `OPEN()`
    StatusOpen,
    /// `IN (a, b, ...)` / `NOT IN (...)`
    In(Vec<ValueWrapper>),
    /// `BETWEEN (low, high)`
    Between(Box<ValueWrapper>, Box<ValueWrapper>),
}

impl ValueWrapper {
    /// The flat list of values a comparison carries.
    pub fn values(&self) -> Vec<&ValueWrapper> {
        match self {
            ValueWrapper::In(values) => values.iter().collect(),
            ValueWrapper::Between(low, high) => vec![low.as_ref(), high.as_ref()],
            other => vec![other],
        }
    }
}

impl fmt::Display for ValueWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueWrapper::Simple(literal) => write!(f, "{}", literal),
            ValueWrapper::CurrentDateTime(None) => f.write_str("NOW()"),
            ValueWrapper::CurrentDateTime(Some(period)) => write!(f, "NOW() {}", period),
            ValueWrapper::CurrentUser => f.write_str("MYSELF()"),
            ValueWrapper::StatusOpen => f.write_str("OPEN()"),
            ValueWrapper::In(values) => {
                f.write_str("(")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", value)?;
                }
                f.write_str(")")
            }
            ValueWrapper::Between(low, high) => write!(f, "({}, {})", low, high),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Text(String),
    Number(f64),
}

impl Literal {
    /// The literal as the user typed it, without quotes.
    pub fn as_text(&self) -> String {
        match self {
            Literal::Text(s) => s.clone(),
            Literal::Number(n) => n.to_string(),
        }
    }

    pub fn is_empty_string(&self) -> bool {
        matches!(self, Literal::Text(s) if s.is_empty())
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Text(s) => write!(f, "'{}'", s),
            Literal::Number(n) => write!(f, "{}", n),
        }
    }
}

/// Offset applied to `NOW()`, e.g. `- 2w`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Period {
    /// Signed number of units.
    pub amount: i64,
    pub unit: PeriodUnit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodUnit {
    Day,
    Week,
    Month,
    Year,
}

impl PeriodUnit {
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix.to_ascii_lowercase().as_str() {
            "d" => Some(PeriodUnit::Day),
            "w" => Some(PeriodUnit::Week),
            "m" => Some(PeriodUnit::Month),
            "y" => Some(PeriodUnit::Year),
            _ => None,
        }
    }

    fn suffix(&self) -> char {
        match self {
            PeriodUnit::Day => 'd',
            PeriodUnit::Week => 'w',
            PeriodUnit::Month => 'm',
            PeriodUnit::Year => 'y',
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.amount < 0 { '-' } else { '+' };
        write!(f, "{} {}{}", sign, self.amount.abs(), self.unit.suffix())
    }
}
