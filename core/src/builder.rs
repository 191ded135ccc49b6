//! Compile a validated expert query into a SQL filter over artifacts.
//!
//! The produced [`FilterFragment`] is a boolean expression over the `artifacts`
//! table aliased `a`, with positional `?` parameters. Field values live in
//! `artifact_values` (scalars) and `artifact_list_values` (list selections).
//!
//! Only fields the user can read take part in a predicate. A searchable with
//! no readable field in scope compiles to `FALSE`.

use chrono::{NaiveDate, NaiveDateTime};

use crate::dates::DateValue;
use crate::query::{Comparison, ComparisonType, Expr, Literal, Metadata, Searchable, ValueWrapper};
use crate::schema::{Field, FieldId, FieldType, SemanticKind, Tracker, TrackerId, User};
use crate::validation::AllowedMetadata;
use crate::{Error, Result};

/// A bound parameter of a [`FilterFragment`].
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Float(f64),
    Text(String),
}

/// A composable SQL predicate with its parameters, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterFragment {
    sql: String,
    parameters: Vec<SqlValue>,
}

impl FilterFragment {
    pub fn new(sql: impl Into<String>, parameters: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            parameters,
        }
    }

    /// A predicate no row satisfies.
    pub fn never() -> Self {
        Self::new("FALSE", Vec::new())
    }

    pub fn is_never(&self) -> bool {
        self.sql == "FALSE"
    }

    pub fn and(parts: Vec<FilterFragment>) -> Self {
        Self::join(parts, " AND ", "TRUE")
    }

    pub fn or(parts: Vec<FilterFragment>) -> Self {
        Self::join(parts, " OR ", "FALSE")
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn parameters(&self) -> &[SqlValue] {
        &self.parameters
    }

    fn join(parts: Vec<FilterFragment>, separator: &str, identity: &str) -> Self {
        if parts.len() == 1 {
            return parts.into_iter().next().unwrap_or_else(Self::never);
        }
        if parts.is_empty() {
            return Self::new(identity, Vec::new());
        }

        let mut conditions = Vec::with_capacity(parts.len());
        let mut parameters = Vec::new();
        for part in parts {
            conditions.push(format!("({})", part.sql));
            parameters.extend(part.parameters);
        }
        Self::new(conditions.join(separator), parameters)
    }

    fn grouped(self) -> Self {
        Self::new(format!("({})", self.sql), self.parameters)
    }
}

/// Where the values of a searchable are read from.
#[derive(Clone, Copy)]
struct Source {
    /// Correlated subquery head, ending in a `WHERE` on `a.id`.
    select: &'static str,
    field_column: &'static str,
}

const SCALAR_VALUES: Source = Source {
    select: "SELECT 1 FROM artifact_values v WHERE v.artifact_id = a.id",
    field_column: "v.field_id",
};

const LIST_LABELS: Source = Source {
    select: "SELECT 1 FROM artifact_list_values lv JOIN list_values l ON l.id = lv.value_id WHERE lv.artifact_id = a.id",
    field_column: "lv.field_id",
};

const LIST_USERS: Source = Source {
    select: "SELECT 1 FROM artifact_list_values lv JOIN users u ON u.id = lv.value_id WHERE lv.artifact_id = a.id",
    field_column: "lv.field_id",
};

const LIST_ANY: Source = Source {
    select: "SELECT 1 FROM artifact_list_values lv WHERE lv.artifact_id = a.id",
    field_column: "lv.field_id",
};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Fields taking part in one predicate, and the trackers they belong to.
struct Scope {
    field_ids: Vec<FieldId>,
    tracker_ids: Vec<TrackerId>,
}

impl Scope {
    fn of(fields: &[&Field]) -> Self {
        let mut tracker_ids: Vec<TrackerId> = Vec::new();
        for field in fields {
            if !tracker_ids.contains(&field.tracker_id) {
                tracker_ids.push(field.tracker_id);
            }
        }
        Self {
            field_ids: fields.iter().map(|f| f.id).collect(),
            tracker_ids,
        }
    }

    fn tracker_filter(&self) -> String {
        format!("a.tracker_id IN ({})", id_list(&self.tracker_ids))
    }

    fn exists(&self, source: Source, condition: Option<&str>, parameters: Vec<SqlValue>) -> FilterFragment {
        FilterFragment::new(
            format!("EXISTS ({})", self.subquery(source, condition)),
            parameters,
        )
    }

    /// Rows of the scoped trackers without a matching value.
    fn missing(&self, source: Source, condition: Option<&str>, parameters: Vec<SqlValue>) -> FilterFragment {
        FilterFragment::new(
            format!(
                "{} AND NOT EXISTS ({})",
                self.tracker_filter(),
                self.subquery(source, condition)
            ),
            parameters,
        )
    }

    fn subquery(&self, source: Source, condition: Option<&str>) -> String {
        let mut sql = format!(
            "{} AND {} IN ({})",
            source.select,
            source.field_column,
            id_list(&self.field_ids)
        );
        if let Some(condition) = condition {
            sql.push_str(" AND ");
            sql.push_str(condition);
        }
        sql
    }
}

fn id_list(ids: &[i64]) -> String {
    ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(", ")
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn timestamp(at: NaiveDateTime) -> SqlValue {
    SqlValue::Text(at.format(TIMESTAMP_FORMAT).to_string())
}

/// `!=` and `NOT IN` are compiled as the negation of `=` and `IN`.
fn positive(kind: ComparisonType) -> (ComparisonType, bool) {
    match kind {
        ComparisonType::NotEqual => (ComparisonType::Equal, true),
        ComparisonType::NotIn => (ComparisonType::In, true),
        other => (other, false),
    }
}

/// `= ''` or `!= ''`
fn is_empty_term(comparison: &Comparison) -> bool {
    matches!(comparison.kind, ComparisonType::Equal | ComparisonType::NotEqual)
        && matches!(&comparison.value, ValueWrapper::Simple(literal) if literal.is_empty_string())
}

/// Compiles expert queries for one set of trackers and one user.
pub struct QueryBuilder<'a> {
    trackers: &'a [Tracker],
    user: &'a User,
    today: NaiveDate,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(trackers: &'a [Tracker], user: &'a User, today: NaiveDate) -> Self {
        Self { trackers, user, today }
    }

    /// Translate a query tree into a filter. The tree must have passed validation;
    /// values that do not fit their searchable are reported as logic errors.
    pub fn build_from_where(&self, expr: &Expr) -> Result<FilterFragment> {
        match expr {
            Expr::Or(operands) => Ok(FilterFragment::or(self.build_all(operands)?)),
            Expr::And(operands) => Ok(FilterFragment::and(self.build_all(operands)?)),
            Expr::Parenthesis(inner) => Ok(self.build_from_where(inner)?.grouped()),
            Expr::Comparison(comparison) => match &comparison.searchable {
                Searchable::Field(name) => self.field_comparison(name, comparison),
                Searchable::Metadata(metadata) => self.metadata_comparison(metadata, comparison),
            },
        }
    }

    fn build_all(&self, operands: &[Expr]) -> Result<Vec<FilterFragment>> {
        operands.iter().map(|e| self.build_from_where(e)).collect()
    }

    /// Readable fields named `name`, grouped by type in tracker order.
    fn readable_fields_by_type(&self, name: &str) -> Vec<(FieldType, Vec<&'a Field>)> {
        let mut groups: Vec<(FieldType, Vec<&'a Field>)> = Vec::new();
        for tracker in self.trackers {
            let Some(field) = tracker.field_by_name(name) else {
                continue;
            };
            if !field.user_can_read(self.user) {
                continue;
            }
            match groups.iter_mut().find(|(t, _)| *t == field.field_type) {
                Some((_, fields)) => fields.push(field),
                None => groups.push((field.field_type, vec![field])),
            }
        }
        groups
    }

    fn readable_semantic_fields(&self, kind: SemanticKind) -> Vec<&'a Field> {
        self.trackers
            .iter()
            .filter_map(|t| t.semantic_field(kind))
            .filter(|f| f.user_can_read(self.user))
            .collect()
    }

    fn readable_fields_of_type(&self, field_type: FieldType) -> Vec<&'a Field> {
        self.trackers
            .iter()
            .flat_map(|t| t.fields_by_type(field_type))
            .filter(|f| f.user_can_read(self.user))
            .collect()
    }

    fn field_comparison(&self, name: &str, comparison: &Comparison) -> Result<FilterFragment> {
        let groups = self.readable_fields_by_type(name);
        if groups.is_empty() {
            return Ok(FilterFragment::never());
        }

        let mut parts = Vec::with_capacity(groups.len());
        for (field_type, fields) in groups {
            let part = match field_type {
                FieldType::String | FieldType::Text => self.text(&fields, comparison)?,
                FieldType::Int | FieldType::Float => self.numeric(&fields, comparison)?,
                FieldType::Date => self.date_values(&fields, comparison)?,
                FieldType::StaticList => self.list_labels(&fields, comparison)?,
                FieldType::UserList => self.list_users(&fields, comparison)?,
                FieldType::SubmittedBy => self.user_column("a.submitted_by", &fields, comparison)?,
                FieldType::LastUpdateBy => self.user_column("a.last_update_by", &fields, comparison)?,
                FieldType::SubmittedOn => self.date_column("a.submitted_on", &fields, comparison)?,
                FieldType::LastUpdateDate => self.date_column("a.last_update_date", &fields, comparison)?,
            };
            parts.push(part);
        }
        Ok(FilterFragment::or(parts))
    }

    fn metadata_comparison(&self, metadata: &Metadata, comparison: &Comparison) -> Result<FilterFragment> {
        let allowed = AllowedMetadata::from_name(metadata.name())
            .ok_or_else(|| Error::Logic(format!("no query builder for metadata '{}'", metadata.name())))?;

        let (fields, column) = match allowed {
            AllowedMetadata::Title => (self.readable_semantic_fields(SemanticKind::Title), None),
            AllowedMetadata::Description => (self.readable_semantic_fields(SemanticKind::Description), None),
            AllowedMetadata::Status => (self.readable_semantic_fields(SemanticKind::Status), None),
            AllowedMetadata::AssignedTo => (self.readable_semantic_fields(SemanticKind::Contributor), None),
            AllowedMetadata::SubmittedOn => (
                self.readable_fields_of_type(FieldType::SubmittedOn),
                Some("a.submitted_on"),
            ),
            AllowedMetadata::LastUpdateDate => (
                self.readable_fields_of_type(FieldType::LastUpdateDate),
                Some("a.last_update_date"),
            ),
            AllowedMetadata::SubmittedBy => (
                self.readable_fields_of_type(FieldType::SubmittedBy),
                Some("a.submitted_by"),
            ),
            AllowedMetadata::LastUpdateBy => (
                self.readable_fields_of_type(FieldType::LastUpdateBy),
                Some("a.last_update_by"),
            ),
        };
        if fields.is_empty() {
            return Ok(FilterFragment::never());
        }

        match (allowed, column) {
            (AllowedMetadata::Title | AllowedMetadata::Description, _) => self.text(&fields, comparison),
            (AllowedMetadata::Status, _) => self.status_open(&fields, comparison),
            (AllowedMetadata::AssignedTo, _) => self.list_users(&fields, comparison),
            (AllowedMetadata::SubmittedOn | AllowedMetadata::LastUpdateDate, Some(column)) => {
                self.date_column(column, &fields, comparison)
            }
            (AllowedMetadata::SubmittedBy | AllowedMetadata::LastUpdateBy, Some(column)) => {
                self.user_column(column, &fields, comparison)
            }
            _ => Err(Error::Logic(format!("no column for metadata '{}'", allowed))),
        }
    }

    fn text(&self, fields: &[&Field], comparison: &Comparison) -> Result<FilterFragment> {
        let scope = Scope::of(fields);
        let filled = "COALESCE(v.value_text, '') <> ''";

        if is_empty_term(comparison) {
            return Ok(empty_term(&scope, SCALAR_VALUES, filled, comparison.kind));
        }

        let (kind, negated) = positive(comparison.kind);
        if kind != ComparisonType::Equal {
            return Err(unsupported(comparison));
        }
        let needle = self.text_value(&comparison.value)?;
        let condition = "contains(lower(v.value_text), lower(?))";
        Ok(scoped(&scope, SCALAR_VALUES, condition, vec![SqlValue::Text(needle)], negated))
    }

    fn numeric(&self, fields: &[&Field], comparison: &Comparison) -> Result<FilterFragment> {
        let scope = Scope::of(fields);

        if is_empty_term(comparison) {
            return Ok(empty_term(&scope, SCALAR_VALUES, "v.value_number IS NOT NULL", comparison.kind));
        }

        let (kind, negated) = positive(comparison.kind);
        let column = "v.value_number";
        let (condition, parameters) = match kind {
            ComparisonType::Equal
            | ComparisonType::LesserThan
            | ComparisonType::LesserOrEqual
            | ComparisonType::GreaterThan
            | ComparisonType::GreaterOrEqual => (
                format!("{} {} ?", column, ordering_operator(kind)),
                vec![SqlValue::Float(self.number_value(&comparison.value)?)],
            ),
            ComparisonType::Between => {
                let (low, high) = between_bounds(comparison)?;
                (
                    format!("{} >= ? AND {} <= ?", column, column),
                    vec![
                        SqlValue::Float(self.number_value(low)?),
                        SqlValue::Float(self.number_value(high)?),
                    ],
                )
            }
            ComparisonType::In => {
                let values = comparison.value.values();
                let mut parameters = Vec::with_capacity(values.len());
                for value in &values {
                    parameters.push(SqlValue::Float(self.number_value(value)?));
                }
                (format!("{} IN ({})", column, placeholders(values.len())), parameters)
            }
            ComparisonType::NotEqual | ComparisonType::NotIn => return Err(unsupported(comparison)),
        };
        Ok(scoped(&scope, SCALAR_VALUES, &condition, parameters, negated))
    }

    fn date_values(&self, fields: &[&Field], comparison: &Comparison) -> Result<FilterFragment> {
        let scope = Scope::of(fields);

        if is_empty_term(comparison) {
            return Ok(empty_term(&scope, SCALAR_VALUES, "v.value_date IS NOT NULL", comparison.kind));
        }

        let (kind, negated) = positive(comparison.kind);
        let (condition, parameters) = self.date_condition("v.value_date", kind, comparison)?;
        Ok(scoped(&scope, SCALAR_VALUES, &condition, parameters, negated))
    }

    /// Built-in date columns of `a`, for trackers exposing them through `fields`.
    fn date_column(&self, column: &str, fields: &[&Field], comparison: &Comparison) -> Result<FilterFragment> {
        let scope = Scope::of(fields);
        let (kind, negated) = positive(comparison.kind);
        let (condition, parameters) = self.date_condition(column, kind, comparison)?;
        Ok(column_predicate(&scope, &condition, parameters, negated))
    }

    fn date_condition(
        &self,
        column: &str,
        kind: ComparisonType,
        comparison: &Comparison,
    ) -> Result<(String, Vec<SqlValue>)> {
        let range = |date: DateValue| -> Result<(String, Vec<SqlValue>)> {
            Ok((
                format!(
                    "{} >= CAST(? AS TIMESTAMP) AND {} < CAST(? AS TIMESTAMP)",
                    column, column
                ),
                vec![timestamp(date.start()), timestamp(range_end(&date)?)],
            ))
        };
        let bound = |operator: &str, at: NaiveDateTime| {
            (
                format!("{} {} CAST(? AS TIMESTAMP)", column, operator),
                vec![timestamp(at)],
            )
        };

        let condition = match kind {
            ComparisonType::Equal => range(self.date_value(&comparison.value)?)?,
            ComparisonType::LesserThan => bound("<", self.date_value(&comparison.value)?.start()),
            ComparisonType::LesserOrEqual => bound("<", range_end(&self.date_value(&comparison.value)?)?),
            ComparisonType::GreaterThan => bound(">=", range_end(&self.date_value(&comparison.value)?)?),
            ComparisonType::GreaterOrEqual => bound(">=", self.date_value(&comparison.value)?.start()),
            ComparisonType::Between => {
                let (low, high) = between_bounds(comparison)?;
                let low = self.date_value(low)?;
                let high = self.date_value(high)?;
                (
                    format!(
                        "{} >= CAST(? AS TIMESTAMP) AND {} < CAST(? AS TIMESTAMP)",
                        column, column
                    ),
                    vec![timestamp(low.start()), timestamp(range_end(&high)?)],
                )
            }
            ComparisonType::In => {
                let mut ranges = Vec::new();
                for value in comparison.value.values() {
                    let (sql, parameters) = range(self.date_value(value)?)?;
                    ranges.push(FilterFragment::new(sql, parameters));
                }
                let any = FilterFragment::or(ranges).grouped();
                (any.sql, any.parameters)
            }
            ComparisonType::NotEqual | ComparisonType::NotIn => return Err(unsupported(comparison)),
        };
        Ok(condition)
    }

    fn list_labels(&self, fields: &[&Field], comparison: &Comparison) -> Result<FilterFragment> {
        let scope = Scope::of(fields);

        if is_empty_term(comparison) {
            return Ok(empty_term(&scope, LIST_ANY, "TRUE", comparison.kind));
        }

        let (kind, negated) = positive(comparison.kind);
        let labels = self.membership_values(kind, comparison, |value| self.text_value(value))?;
        let condition = format!("l.label IN ({})", placeholders(labels.len()));
        let parameters = labels.into_iter().map(SqlValue::Text).collect();
        Ok(scoped(&scope, LIST_LABELS, &condition, parameters, negated))
    }

    fn list_users(&self, fields: &[&Field], comparison: &Comparison) -> Result<FilterFragment> {
        let scope = Scope::of(fields);

        if is_empty_term(comparison) {
            return Ok(empty_term(&scope, LIST_ANY, "TRUE", comparison.kind));
        }

        let (kind, negated) = positive(comparison.kind);
        let logins = self.membership_values(kind, comparison, |value| self.login_value(value))?;
        let condition = format!("u.login IN ({})", placeholders(logins.len()));
        let parameters = logins.into_iter().map(SqlValue::Text).collect();
        Ok(scoped(&scope, LIST_USERS, &condition, parameters, negated))
    }

    /// Built-in user columns of `a`, for trackers exposing them through `fields`.
    fn user_column(&self, column: &str, fields: &[&Field], comparison: &Comparison) -> Result<FilterFragment> {
        let scope = Scope::of(fields);

        if is_empty_term(comparison) {
            let test = if comparison.kind == ComparisonType::Equal {
                "IS NULL"
            } else {
                "IS NOT NULL"
            };
            let condition = format!("{} {}", column, test);
            return Ok(column_predicate(&scope, &condition, Vec::new(), false));
        }

        let (kind, negated) = positive(comparison.kind);
        let logins = self.membership_values(kind, comparison, |value| self.login_value(value))?;
        let condition = format!(
            "{} IN (SELECT id FROM users WHERE login IN ({}))",
            column,
            placeholders(logins.len())
        );
        let parameters = logins.into_iter().map(SqlValue::Text).collect();
        Ok(column_predicate(&scope, &condition, parameters, negated))
    }

    fn status_open(&self, fields: &[&Field], comparison: &Comparison) -> Result<FilterFragment> {
        let (kind, negated) = positive(comparison.kind);
        if kind != ComparisonType::Equal || comparison.value != ValueWrapper::StatusOpen {
            return Err(unsupported(comparison));
        }

        let scope = Scope::of(fields);
        let mut open_ids: Vec<i64> = Vec::new();
        for tracker in self.trackers {
            if !scope.tracker_ids.contains(&tracker.id) {
                continue;
            }
            if let Some(status) = &tracker.semantics.status {
                open_ids.extend(&status.open_value_ids);
            }
        }

        if open_ids.is_empty() {
            // Nothing is open: `= OPEN()` never holds and `!= OPEN()` holds for the whole scope
            return Ok(if negated {
                FilterFragment::new(scope.tracker_filter(), Vec::new())
            } else {
                FilterFragment::never()
            });
        }
        let condition = format!("lv.value_id IN ({})", id_list(&open_ids));
        Ok(scoped(&scope, LIST_ANY, &condition, Vec::new(), negated))
    }

    /// Values of an `=` or `IN` comparison, mapped through `convert`.
    fn membership_values<T>(
        &self,
        kind: ComparisonType,
        comparison: &Comparison,
        convert: impl Fn(&ValueWrapper) -> Result<T>,
    ) -> Result<Vec<T>> {
        match kind {
            ComparisonType::Equal | ComparisonType::In => {
                comparison.value.values().into_iter().map(convert).collect()
            }
            _ => Err(unsupported(comparison)),
        }
    }

    fn text_value(&self, value: &ValueWrapper) -> Result<String> {
        match value {
            ValueWrapper::Simple(literal) => Ok(literal.as_text()),
            other => Err(Error::Logic(format!("expected a literal, got {}", other))),
        }
    }

    fn number_value(&self, value: &ValueWrapper) -> Result<f64> {
        match value {
            ValueWrapper::Simple(Literal::Number(n)) => Ok(*n),
            ValueWrapper::Simple(Literal::Text(s)) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| Error::Logic(format!("'{}' is not a number", s))),
            other => Err(Error::Logic(format!("expected a number, got {}", other))),
        }
    }

    fn date_value(&self, value: &ValueWrapper) -> Result<DateValue> {
        let date = match value {
            ValueWrapper::Simple(Literal::Text(s)) => DateValue::parse(s),
            ValueWrapper::CurrentDateTime(period) => DateValue::now(self.today, *period),
            _ => None,
        };
        date.ok_or_else(|| Error::Logic(format!("expected a date, got {}", value)))
    }

    fn login_value(&self, value: &ValueWrapper) -> Result<String> {
        match value {
            ValueWrapper::CurrentUser => Ok(self.user.login.clone()),
            other => self.text_value(other),
        }
    }
}

fn range_end(date: &DateValue) -> Result<NaiveDateTime> {
    date.end()
        .ok_or_else(|| Error::Logic(format!("date range starting at {} has no end", date.start())))
}

fn ordering_operator(kind: ComparisonType) -> &'static str {
    match kind {
        ComparisonType::LesserThan => "<",
        ComparisonType::LesserOrEqual => "<=",
        ComparisonType::GreaterThan => ">",
        ComparisonType::GreaterOrEqual => ">=",
        _ => "=",
    }
}

fn between_bounds(comparison: &Comparison) -> Result<(&ValueWrapper, &ValueWrapper)> {
    match &comparison.value {
        ValueWrapper::Between(low, high) => Ok((low, high)),
        other => Err(Error::Logic(format!("between() without bounds: {}", other))),
    }
}

fn unsupported(comparison: &Comparison) -> Error {
    Error::Logic(format!(
        "{} {} {} reached the query builder",
        comparison.searchable, comparison.kind, comparison.value
    ))
}

/// A value predicate, or its tracker-scoped negation.
fn scoped(
    scope: &Scope,
    source: Source,
    condition: &str,
    parameters: Vec<SqlValue>,
    negated: bool,
) -> FilterFragment {
    if negated {
        scope.missing(source, Some(condition), parameters)
    } else {
        scope.exists(source, Some(condition), parameters)
    }
}

/// `= ''` means no value is set, `!= ''` means one is.
fn empty_term(scope: &Scope, source: Source, filled: &str, kind: ComparisonType) -> FilterFragment {
    if kind == ComparisonType::Equal {
        scope.missing(source, Some(filled), Vec::new())
    } else {
        scope.exists(source, Some(filled), Vec::new())
    }
}

fn column_predicate(scope: &Scope, condition: &str, parameters: Vec<SqlValue>, negated: bool) -> FilterFragment {
    let sql = if negated {
        format!("{} AND NOT ({})", scope.tracker_filter(), condition)
    } else {
        format!("{} AND {}", scope.tracker_filter(), condition)
    };
    FilterFragment::new(sql, parameters)
}
