//! Validation of a parsed expert query against the trackers of a report.
//!
//! Every comparison is checked: the searchable must exist in scope, the operator
//! must suit its type, and each value must make sense for it. Faults are
//! collected across the whole query and returned together.

mod checkers;
mod collector;
mod metadata;

use std::fmt;

use chrono::NaiveDate;
use tracing::debug;

use crate::query::{ComparisonType, Expr};
use crate::schema::{Tracker, TrackerId, User};
use crate::store::{FormElements, RetrieveUser, SemanticUsage};
use crate::{Error, Result};

pub use collector::InvalidTermCollector;
pub use metadata::{AllowedMetadata, MetadataUsageChecker};

/// One problem found in a query term.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidSearchable {
    #[error("'{searchable}' does not exist in any tracker of the report")]
    DoesNotExist { searchable: String },

    #[error("@{0} is not used by any tracker of the report")]
    MissingInAllTrackers(AllowedMetadata),

    #[error("{searchable} does not support the {operator} comparison")]
    NotSupportedForComparison {
        searchable: String,
        operator: ComparisonType,
    },

    #[error("{searchable} cannot be compared to an empty string with {operator}")]
    EmptyStringTerm {
        searchable: String,
        operator: ComparisonType,
    },

    #[error("{searchable}: user '{login}' does not exist")]
    UserDoesNotExist { searchable: String, login: String },

    #[error("{searchable}: MYSELF() cannot be used without being logged in")]
    MyselfForAnonymous { searchable: String },

    #[error("{searchable}: '{value}' is not a date (expected YYYY-MM-DD or YYYY-MM-DD HH:MM)")]
    InvalidDate { searchable: String, value: String },

    #[error("{searchable}: '{value}' is not a valid {expected}")]
    InvalidNumber {
        searchable: String,
        value: String,
        expected: &'static str,
    },

    #[error("{searchable}: '{value}' is not a value of the list")]
    ListValueDoesNotExist { searchable: String, value: String },

    #[error("{searchable}: between() bounds are out of order ({low} is after {high})")]
    BetweenOutOfOrder {
        searchable: String,
        low: String,
        high: String,
    },

    #[error("{searchable}: {value} is not supported here")]
    UnsupportedValue { searchable: String, value: String },
}

impl InvalidSearchable {
    /// The searchable is unknown, as opposed to known but misused.
    pub fn is_nonexistent(&self) -> bool {
        matches!(self, InvalidSearchable::DoesNotExist { .. })
    }
}

/// Every fault found in one validation pass, without duplicates, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidSearchables {
    faults: Vec<InvalidSearchable>,
}

impl InvalidSearchables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fault: InvalidSearchable) {
        if !self.faults.contains(&fault) {
            self.faults.push(fault);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.faults.is_empty()
    }

    pub fn len(&self) -> usize {
        self.faults.len()
    }

    pub fn faults(&self) -> &[InvalidSearchable] {
        &self.faults
    }

    pub fn nonexistent(&self) -> impl Iterator<Item = &InvalidSearchable> {
        self.faults.iter().filter(|f| f.is_nonexistent())
    }

    pub fn invalid(&self) -> impl Iterator<Item = &InvalidSearchable> {
        self.faults.iter().filter(|f| !f.is_nonexistent())
    }
}

impl fmt::Display for InvalidSearchables {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid expert query ({} problem", self.faults.len())?;
        if self.faults.len() != 1 {
            f.write_str("s")?;
        }
        f.write_str(")")?;
        for fault in &self.faults {
            write!(f, "\n  - {}", fault)?;
        }
        Ok(())
    }
}

impl std::error::Error for InvalidSearchables {}

/// The scope of one validation pass.
#[derive(Debug, Clone, Copy)]
pub struct CollectorParameters<'a> {
    pub trackers: &'a [Tracker],
    pub user: &'a User,
}

impl<'a> CollectorParameters<'a> {
    pub fn new(trackers: &'a [Tracker], user: &'a User) -> Self {
        Self { trackers, user }
    }

    /// Distinct ids, in report order.
    pub fn tracker_ids(&self) -> Vec<TrackerId> {
        let mut ids: Vec<TrackerId> = Vec::with_capacity(self.trackers.len());
        for tracker in self.trackers {
            if !ids.contains(&tracker.id) {
                ids.push(tracker.id);
            }
        }
        ids
    }
}

/// Runs the size limit, the metadata checker and the term collector over a query.
pub struct ExpertQueryValidator<'a> {
    semantic_usage: &'a dyn SemanticUsage,
    form_elements: &'a dyn FormElements,
    users: &'a dyn RetrieveUser,
    max_comparisons: usize,
    today: NaiveDate,
}

impl<'a> ExpertQueryValidator<'a> {
    pub fn new(
        semantic_usage: &'a dyn SemanticUsage,
        form_elements: &'a dyn FormElements,
        users: &'a dyn RetrieveUser,
        max_comparisons: usize,
        today: NaiveDate,
    ) -> Self {
        Self {
            semantic_usage,
            form_elements,
            users,
            max_comparisons,
            today,
        }
    }

    /// Fails with [`Error::InvalidSearchables`] listing every fault found.
    pub fn validate(&self, expr: &Expr, parameters: &CollectorParameters) -> Result<()> {
        let count = expr.comparison_count();
        if count > self.max_comparisons {
            return Err(Error::LimitSizeExceeded {
                limit: self.max_comparisons,
            });
        }

        let checker = MetadataUsageChecker::new(self.form_elements, self.semantic_usage);
        let mut collector = InvalidTermCollector::new(checker, self.users, self.today);
        let faults = collector.collect(expr, parameters)?;

        if faults.is_empty() {
            debug!(comparisons = count, "expert query is valid");
            Ok(())
        } else {
            debug!(faults = faults.len(), "expert query is invalid");
            Err(Error::InvalidSearchables(faults))
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::Cell;
    use std::collections::HashMap;

    use super::*;
    use crate::query::parse_expert_query;
    use crate::schema::{Field, FieldId, FieldType, ListValue, Project, Readers, SemanticKind, Semantics};

    /// In-memory collaborators answering from the tracker definitions, counting calls.
    #[derive(Default)]
    pub(crate) struct FakeStore {
        pub users: HashMap<String, User>,
        pub semantic_calls: Cell<usize>,
        pub field_calls: Cell<usize>,
        pub trackers: Vec<Tracker>,
    }

    impl FakeStore {
        pub fn with_trackers(trackers: Vec<Tracker>) -> Self {
            Self {
                trackers,
                ..Default::default()
            }
        }

        pub fn with_user(mut self, user: User) -> Self {
            self.users.insert(user.login.clone(), user);
            self
        }
    }

    impl SemanticUsage for FakeStore {
        fn count_trackers_without_semantic(&self, kind: SemanticKind, tracker_ids: &[TrackerId]) -> Result<usize> {
            self.semantic_calls.set(self.semantic_calls.get() + 1);
            let distinct: std::collections::BTreeSet<&TrackerId> = tracker_ids.iter().collect();
            Ok(distinct
                .into_iter()
                .filter(|id| {
                    !self
                        .trackers
                        .iter()
                        .any(|t| t.id == **id && t.semantic_field(kind).is_some())
                })
                .count())
        }
    }

    impl FormElements for FakeStore {
        fn used_fields_by_type(&self, tracker: &Tracker, field_type: FieldType) -> Result<Vec<Field>> {
            self.field_calls.set(self.field_calls.get() + 1);
            Ok(tracker.fields_by_type(field_type).cloned().collect())
        }
    }

    impl RetrieveUser for FakeStore {
        fn user_by_login(&self, login: &str) -> Result<Option<User>> {
            Ok(self.users.get(login).cloned())
        }
    }

    pub(crate) fn field(id: FieldId, tracker_id: TrackerId, name: &str, field_type: FieldType) -> Field {
        Field {
            id,
            tracker_id,
            name: name.to_string(),
            field_type,
            readers: Readers::Everyone,
            values: Vec::new(),
        }
    }

    pub(crate) fn list_field(id: FieldId, tracker_id: TrackerId, name: &str, labels: &[&str]) -> Field {
        let mut f = field(id, tracker_id, name, FieldType::StaticList);
        f.values = labels
            .iter()
            .enumerate()
            .map(|(i, label)| ListValue {
                id: id * 100 + i as i64,
                label: label.to_string(),
            })
            .collect();
        f
    }

    pub(crate) fn tracker(id: TrackerId, fields: Vec<Field>) -> Tracker {
        Tracker {
            id,
            name: format!("tracker {}", id),
            is_active: true,
            project: Project {
                id: 1,
                name: "acme".to_string(),
                is_active: true,
            },
            fields,
            semantics: Semantics::default(),
        }
    }

    pub(crate) fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
    }

    fn validate(store: &FakeStore, user: &User, query: &str) -> Result<()> {
        let expr = parse_expert_query(query).unwrap();
        let validator = ExpertQueryValidator::new(store, store, store, 300, today());
        validator.validate(&expr, &CollectorParameters::new(&store.trackers, user))
    }

    fn faults(result: Result<()>) -> Vec<InvalidSearchable> {
        match result {
            Err(Error::InvalidSearchables(faults)) => faults.faults().to_vec(),
            other => panic!("Expected InvalidSearchables, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_query() {
        let store = FakeStore::with_trackers(vec![tracker(
            1,
            vec![
                field(10, 1, "summary", FieldType::String),
                field(11, 1, "effort", FieldType::Int),
            ],
        )]);
        let user = User::new(5, "alice");

        assert!(validate(&store, &user, "summary = 'crash' AND effort >= 3").is_ok());
    }

    #[test]
    fn test_unknown_field_is_reported_alone() {
        let store = FakeStore::with_trackers(vec![tracker(1, vec![field(10, 1, "summary", FieldType::String)])]);
        let user = User::new(5, "alice");

        let faults = faults(validate(&store, &user, "foo = 1"));
        assert_eq!(
            faults,
            vec![InvalidSearchable::DoesNotExist {
                searchable: "foo".to_string()
            }]
        );
    }

    #[test]
    fn test_faults_aggregate_across_terms() {
        let store = FakeStore::with_trackers(vec![tracker(
            1,
            vec![
                field(10, 1, "summary", FieldType::String),
                field(11, 1, "due", FieldType::Date),
            ],
        )]);
        let user = User::new(5, "alice");

        let found = faults(validate(&store, &user, "foo = 1 OR summary > 'a' OR due = 'tomorrow' OR foo = 2"));
        assert_eq!(found.len(), 3);

        let collected = InvalidSearchables { faults: found };
        assert_eq!(collected.nonexistent().count(), 1);
        assert_eq!(collected.invalid().count(), 2);
    }

    #[test]
    fn test_limit_size_exceeded() {
        let store = FakeStore::with_trackers(vec![tracker(1, vec![field(11, 1, "effort", FieldType::Int)])]);
        let user = User::new(5, "alice");
        let expr = parse_expert_query("effort = 1 OR effort = 2 OR effort = 3").unwrap();

        let validator = ExpertQueryValidator::new(&store, &store, &store, 2, today());
        let result = validator.validate(&expr, &CollectorParameters::new(&store.trackers, &user));
        assert!(matches!(result, Err(Error::LimitSizeExceeded { limit: 2 })));
    }

    #[test]
    fn test_display_lists_every_fault() {
        let mut collected = InvalidSearchables::new();
        collected.push(InvalidSearchable::DoesNotExist {
            searchable: "foo".to_string(),
        });
        collected.push(InvalidSearchable::DoesNotExist {
            searchable: "foo".to_string(),
        });
        collected.push(InvalidSearchable::MissingInAllTrackers(AllowedMetadata::Status));

        assert_eq!(collected.len(), 2);
        assert_eq!(
            collected.to_string(),
            "Invalid expert query (2 problems)\n  - 'foo' does not exist in any tracker of the report\n  - @status is not used by any tracker of the report"
        );
    }
}
