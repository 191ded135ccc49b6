//! Walks a query and collects the faults of every comparison.

use chrono::NaiveDate;

use super::checkers::{check_comparison, Category, ValueContext};
use super::{AllowedMetadata, CollectorParameters, InvalidSearchable, InvalidSearchables, MetadataUsageChecker};
use crate::query::{Comparison, Expr, Metadata, Searchable};
use crate::schema::Field;
use crate::store::RetrieveUser;
use crate::Result;

/// Collects faults term by term. Within a term the first fault wins; across
/// terms every fault is kept.
pub struct InvalidTermCollector<'a> {
    checker: MetadataUsageChecker<'a>,
    users: &'a dyn RetrieveUser,
    today: NaiveDate,
}

impl<'a> InvalidTermCollector<'a> {
    pub fn new(checker: MetadataUsageChecker<'a>, users: &'a dyn RetrieveUser, today: NaiveDate) -> Self {
        Self { checker, users, today }
    }

    pub fn collect(&mut self, expr: &Expr, parameters: &CollectorParameters) -> Result<InvalidSearchables> {
        let mut comparisons = Vec::new();
        expr.for_each_comparison(&mut |c| comparisons.push(c));

        let mut faults = InvalidSearchables::new();
        for comparison in comparisons {
            let fault = match &comparison.searchable {
                Searchable::Metadata(metadata) => self.check_metadata(metadata, comparison, parameters)?,
                Searchable::Field(name) => self.check_field(name, comparison, parameters)?,
            };
            if let Some(fault) = fault {
                faults.push(fault);
            }
        }
        Ok(faults)
    }

    fn check_metadata(
        &mut self,
        metadata: &Metadata,
        comparison: &Comparison,
        parameters: &CollectorParameters,
    ) -> Result<Option<InvalidSearchable>> {
        let Some(allowed) = AllowedMetadata::from_name(metadata.name()) else {
            return Ok(Some(InvalidSearchable::DoesNotExist {
                searchable: comparison.searchable.to_string(),
            }));
        };

        if let Some(fault) = self
            .checker
            .check_metadata_is_used_by_all_trackers(metadata, parameters)?
        {
            return Ok(Some(fault));
        }

        let ctx = self.context(comparison, parameters, &[]);
        check_comparison(Category::of_metadata(allowed), comparison, &ctx)
    }

    fn check_field(
        &mut self,
        name: &str,
        comparison: &Comparison,
        parameters: &CollectorParameters,
    ) -> Result<Option<InvalidSearchable>> {
        let mut groups: Vec<(Category, Vec<&Field>)> = Vec::new();
        for tracker in parameters.trackers {
            let Some(field) = tracker.field_by_name(name) else {
                continue;
            };
            if !field.user_can_read(parameters.user) {
                continue;
            }
            let category = Category::of_field_type(field.field_type);
            match groups.iter_mut().find(|(c, _)| *c == category) {
                Some((_, fields)) => fields.push(field),
                None => groups.push((category, vec![field])),
            }
        }

        if groups.is_empty() {
            return Ok(Some(InvalidSearchable::DoesNotExist {
                searchable: comparison.searchable.to_string(),
            }));
        }

        for (category, fields) in &groups {
            let ctx = self.context(comparison, parameters, fields);
            if let Some(fault) = check_comparison(*category, comparison, &ctx)? {
                return Ok(Some(fault));
            }
        }
        Ok(None)
    }

    fn context<'c>(
        &'c self,
        comparison: &Comparison,
        parameters: &CollectorParameters<'c>,
        lists: &'c [&'c Field],
    ) -> ValueContext<'c> {
        ValueContext {
            searchable: comparison.searchable.to_string(),
            user: parameters.user,
            users: self.users,
            today: self.today,
            lists,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parse_expert_query;
    use crate::schema::{FieldType, Readers, User};
    use crate::validation::tests::{field, list_field, tracker, FakeStore};

    fn collect(store: &FakeStore, trackers: &[crate::schema::Tracker], user: &User, query: &str) -> InvalidSearchables {
        let expr = parse_expert_query(query).unwrap();
        let checker = MetadataUsageChecker::new(store, store);
        let mut collector = InvalidTermCollector::new(checker, store, crate::validation::tests::today());
        collector
            .collect(&expr, &CollectorParameters::new(trackers, user))
            .unwrap()
    }

    #[test]
    fn test_unreadable_field_does_not_exist() {
        let mut hidden = field(10, 1, "budget", FieldType::Float);
        hidden.readers = Readers::Users(vec![99]);
        let store = FakeStore::with_trackers(vec![tracker(1, vec![hidden])]);
        let user = User::new(5, "alice");

        let faults = collect(&store, &store.trackers, &user, "budget > 10");
        assert_eq!(
            faults.faults(),
            &[InvalidSearchable::DoesNotExist {
                searchable: "budget".to_string()
            }]
        );
    }

    #[test]
    fn test_unknown_metadata_does_not_exist() {
        let store = FakeStore::with_trackers(vec![tracker(1, Vec::new())]);
        let user = User::new(5, "alice");

        let faults = collect(&store, &store.trackers, &user, "@priority = 'high'");
        assert_eq!(
            faults.faults(),
            &[InvalidSearchable::DoesNotExist {
                searchable: "@priority".to_string()
            }]
        );
        assert_eq!(store.semantic_calls.get(), 0);
    }

    #[test]
    fn test_missing_metadata_reported_once() {
        let store = FakeStore::with_trackers(vec![tracker(1, Vec::new()), tracker(2, Vec::new())]);
        let user = User::new(5, "alice");

        let faults = collect(&store, &store.trackers, &user, "@title = 'a' OR @title = 'b' OR @title != ''");
        assert_eq!(
            faults.faults(),
            &[InvalidSearchable::MissingInAllTrackers(AllowedMetadata::Title)]
        );
        assert_eq!(store.semantic_calls.get(), 1);
    }

    #[test]
    fn test_same_field_in_several_trackers_is_deduplicated() {
        let store = FakeStore::with_trackers(vec![
            tracker(1, vec![list_field(10, 1, "severity", &["Minor"])]),
            tracker(2, vec![list_field(20, 2, "severity", &["Minor", "Major"])]),
        ]);
        let user = User::new(5, "alice");

        // the label only has to exist in one of the lists
        assert!(collect(&store, &store.trackers, &user, "severity = 'Major'").is_empty());

        let faults = collect(&store, &store.trackers, &user, "severity = 'Blocker' OR severity = 'Blocker'");
        assert_eq!(faults.len(), 1);
    }

    #[test]
    fn test_field_with_different_types_checks_each() {
        let store = FakeStore::with_trackers(vec![
            tracker(1, vec![field(10, 1, "estimate", FieldType::Float)]),
            tracker(2, vec![field(20, 2, "estimate", FieldType::String)]),
        ]);
        let user = User::new(5, "alice");

        assert!(collect(&store, &store.trackers, &user, "estimate = '3'").is_empty());
        let faults = collect(&store, &store.trackers, &user, "estimate > 3");
        assert!(matches!(
            faults.faults(),
            [InvalidSearchable::NotSupportedForComparison { .. }]
        ));
    }
}
