//! Operator and value rules per searchable category.

use chrono::NaiveDate;

use super::{AllowedMetadata, InvalidSearchable};
use crate::dates::DateValue;
use crate::query::{Comparison, ComparisonType, Literal, ValueWrapper};
use crate::schema::{Field, FieldType, User};
use crate::store::RetrieveUser;
use crate::Result;

/// How a searchable may be compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Category {
    Text,
    Numeric { integer: bool },
    Date { nullable: bool },
    StaticList,
    UserIdentity,
    Status,
}

impl Category {
    pub(crate) fn of_field_type(field_type: FieldType) -> Self {
        match field_type {
            FieldType::String | FieldType::Text => Category::Text,
            FieldType::Int => Category::Numeric { integer: true },
            FieldType::Float => Category::Numeric { integer: false },
            FieldType::Date => Category::Date { nullable: true },
            FieldType::SubmittedOn | FieldType::LastUpdateDate => Category::Date { nullable: false },
            FieldType::StaticList => Category::StaticList,
            FieldType::UserList | FieldType::SubmittedBy | FieldType::LastUpdateBy => Category::UserIdentity,
        }
    }

    pub(crate) fn of_metadata(metadata: AllowedMetadata) -> Self {
        match metadata {
            AllowedMetadata::Title | AllowedMetadata::Description => Category::Text,
            AllowedMetadata::Status => Category::Status,
            AllowedMetadata::AssignedTo | AllowedMetadata::SubmittedBy | AllowedMetadata::LastUpdateBy => {
                Category::UserIdentity
            }
            AllowedMetadata::SubmittedOn | AllowedMetadata::LastUpdateDate => Category::Date { nullable: false },
        }
    }

    fn supports(&self, kind: ComparisonType) -> bool {
        match self {
            Category::Text | Category::Status => {
                matches!(kind, ComparisonType::Equal | ComparisonType::NotEqual)
            }
            Category::Numeric { .. } | Category::Date { .. } => true,
            Category::StaticList | Category::UserIdentity => kind.is_equality_or_membership(),
        }
    }

    /// Whether `= ''` and `!= ''` make sense.
    fn accepts_empty(&self) -> bool {
        match self {
            Category::Date { nullable } => *nullable,
            Category::Status => false,
            _ => true,
        }
    }
}

/// What value checks need beyond the comparison itself.
pub(crate) struct ValueContext<'a> {
    pub searchable: String,
    pub user: &'a User,
    pub users: &'a dyn RetrieveUser,
    pub today: NaiveDate,
    /// Same-named list fields; a label must exist in one of them.
    pub lists: &'a [&'a Field],
}

/// The first fault of a comparison against a category, if any.
pub(crate) fn check_comparison(
    category: Category,
    comparison: &Comparison,
    ctx: &ValueContext,
) -> Result<Option<InvalidSearchable>> {
    if !category.supports(comparison.kind) {
        return Ok(Some(InvalidSearchable::NotSupportedForComparison {
            searchable: ctx.searchable.clone(),
            operator: comparison.kind,
        }));
    }

    for value in comparison.value.values() {
        if let ValueWrapper::Simple(literal) = value {
            if literal.is_empty_string() {
                let allowed = matches!(comparison.kind, ComparisonType::Equal | ComparisonType::NotEqual)
                    && category.accepts_empty();
                if !allowed {
                    return Ok(Some(InvalidSearchable::EmptyStringTerm {
                        searchable: ctx.searchable.clone(),
                        operator: comparison.kind,
                    }));
                }
                continue;
            }
        }

        let fault = match category {
            Category::Text => check_text(value, ctx),
            Category::Numeric { integer } => check_number(value, integer, ctx).err(),
            Category::Date { .. } => check_date(value, ctx).err(),
            Category::StaticList => check_label(value, ctx),
            Category::UserIdentity => check_user(value, ctx)?,
            Category::Status => check_status(value, ctx),
        };
        if fault.is_some() {
            return Ok(fault);
        }
    }

    if let ValueWrapper::Between(low, high) = &comparison.value {
        return Ok(check_bounds(category, low, high, ctx));
    }
    Ok(None)
}

fn unsupported(value: &ValueWrapper, ctx: &ValueContext) -> InvalidSearchable {
    InvalidSearchable::UnsupportedValue {
        searchable: ctx.searchable.clone(),
        value: value.to_string(),
    }
}

fn check_text(value: &ValueWrapper, ctx: &ValueContext) -> Option<InvalidSearchable> {
    match value {
        ValueWrapper::Simple(_) => None,
        other => Some(unsupported(other, ctx)),
    }
}

fn check_number(value: &ValueWrapper, integer: bool, ctx: &ValueContext) -> Result<f64, InvalidSearchable> {
    let invalid = |text: String| InvalidSearchable::InvalidNumber {
        searchable: ctx.searchable.clone(),
        value: text,
        expected: if integer { "integer" } else { "number" },
    };

    let number = match value {
        ValueWrapper::Simple(Literal::Number(n)) => *n,
        ValueWrapper::Simple(Literal::Text(s)) => s.trim().parse::<f64>().map_err(|_| invalid(s.clone()))?,
        other => return Err(unsupported(other, ctx)),
    };
    if !number.is_finite() || (integer && number.fract() != 0.0) {
        return Err(invalid(number.to_string()));
    }
    Ok(number)
}

fn check_date(value: &ValueWrapper, ctx: &ValueContext) -> Result<DateValue, InvalidSearchable> {
    let invalid = |text: String| InvalidSearchable::InvalidDate {
        searchable: ctx.searchable.clone(),
        value: text,
    };

    // The builder needs the end of every range.
    match value {
        ValueWrapper::Simple(Literal::Text(s)) => DateValue::parse(s)
            .filter(|d| d.end().is_some())
            .ok_or_else(|| invalid(s.clone())),
        ValueWrapper::Simple(literal) => Err(invalid(literal.as_text())),
        ValueWrapper::CurrentDateTime(period) => DateValue::now(ctx.today, *period)
            .filter(|d| d.end().is_some())
            .ok_or_else(|| invalid(value.to_string())),
        other => Err(unsupported(other, ctx)),
    }
}

fn check_label(value: &ValueWrapper, ctx: &ValueContext) -> Option<InvalidSearchable> {
    let ValueWrapper::Simple(literal) = value else {
        return Some(unsupported(value, ctx));
    };

    let label = literal.as_text();
    if ctx.lists.iter().any(|f| f.list_value_by_label(&label).is_some()) {
        None
    } else {
        Some(InvalidSearchable::ListValueDoesNotExist {
            searchable: ctx.searchable.clone(),
            value: label,
        })
    }
}

fn check_user(value: &ValueWrapper, ctx: &ValueContext) -> Result<Option<InvalidSearchable>> {
    match value {
        ValueWrapper::CurrentUser if ctx.user.is_anonymous() => Ok(Some(InvalidSearchable::MyselfForAnonymous {
            searchable: ctx.searchable.clone(),
        })),
        ValueWrapper::CurrentUser => Ok(None),
        ValueWrapper::Simple(literal) => {
            let login = literal.as_text();
            if ctx.users.user_by_login(&login)?.is_some() {
                Ok(None)
            } else {
                Ok(Some(InvalidSearchable::UserDoesNotExist {
                    searchable: ctx.searchable.clone(),
                    login,
                }))
            }
        }
        other => Ok(Some(unsupported(other, ctx))),
    }
}

fn check_status(value: &ValueWrapper, ctx: &ValueContext) -> Option<InvalidSearchable> {
    match value {
        ValueWrapper::StatusOpen => None,
        other => Some(unsupported(other, ctx)),
    }
}

/// Bounds are already known to be valid values.
fn check_bounds(
    category: Category,
    low: &ValueWrapper,
    high: &ValueWrapper,
    ctx: &ValueContext,
) -> Option<InvalidSearchable> {
    let out_of_order = match category {
        Category::Numeric { integer } => match (check_number(low, integer, ctx), check_number(high, integer, ctx)) {
            (Ok(low), Ok(high)) => low > high,
            _ => false,
        },
        Category::Date { .. } => match (check_date(low, ctx), check_date(high, ctx)) {
            (Ok(low), Ok(high)) => high.end().is_some_and(|end| low.start() >= end),
            _ => false,
        },
        _ => false,
    };

    out_of_order.then(|| InvalidSearchable::BetweenOutOfOrder {
        searchable: ctx.searchable.clone(),
        low: low.to_string(),
        high: high.to_string(),
    })
}
