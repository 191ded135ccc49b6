//! Cross-tracker reports and the factory that runs them.
//!
//! A report without an expert query lists the artifacts of its trackers. With
//! one, the query is parsed, validated against the active trackers, compiled
//! to a filter and searched. Matched rows that no longer resolve to an
//! artifact are dropped from the page; the total still counts them.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::builder::QueryBuilder;
use crate::query::{Expr, ParserCache};
use crate::schema::{Artifact, Tracker, TrackerId, User};
use crate::store::{ArtifactReportDao, FormElements, MatchingRows, RetrieveArtifact, RetrieveUser, SemanticUsage};
use crate::validation::{CollectorParameters, ExpertQueryValidator};
use crate::{Config, Result};

/// A set of trackers and an optional expert query.
#[derive(Debug, Clone, PartialEq)]
pub struct CrossTrackerReport {
    pub trackers: Vec<Tracker>,
    /// Empty for a plain listing.
    pub expert_query: String,
}

impl CrossTrackerReport {
    pub fn new(trackers: Vec<Tracker>, expert_query: impl Into<String>) -> Self {
        Self {
            trackers,
            expert_query: expert_query.into(),
        }
    }

    pub fn tracker_ids(&self) -> Vec<TrackerId> {
        self.trackers.iter().map(|t| t.id).collect()
    }

    /// Only the empty string means "no expert query"; blank text still goes to the parser.
    pub fn has_expert_query(&self) -> bool {
        !self.expert_query.is_empty()
    }
}

/// One page of a report.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ArtifactMatchingReportCollection {
    artifacts: Vec<Artifact>,
    /// Matches before pagination, counted when the search ran.
    total_size: usize,
}

impl ArtifactMatchingReportCollection {
    pub fn new(artifacts: Vec<Artifact>, total_size: usize) -> Self {
        Self { artifacts, total_size }
    }

    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }
}

/// Everything the factory reads from.
pub trait ReportBackend: SemanticUsage + FormElements + ArtifactReportDao + RetrieveArtifact + RetrieveUser {}

impl<T> ReportBackend for T where T: SemanticUsage + FormElements + ArtifactReportDao + RetrieveArtifact + RetrieveUser {}

/// Runs reports against a backend. Holds the parser cache, so keep one per
/// request handler rather than sharing it.
pub struct CrossTrackerArtifactReportFactory<'a, B: ReportBackend> {
    backend: &'a B,
    parser_cache: ParserCache,
    max_comparisons: usize,
    today: NaiveDate,
}

impl<'a, B: ReportBackend> CrossTrackerArtifactReportFactory<'a, B> {
    pub fn new(backend: &'a B, config: &Config) -> Self {
        Self {
            backend,
            parser_cache: ParserCache::new(),
            max_comparisons: config.max_comparisons,
            today: Utc::now().date_naive(),
        }
    }

    /// Fix the day `NOW()` resolves to.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn get_artifacts_matching_report(
        &mut self,
        report: &CrossTrackerReport,
        user: &User,
        limit: usize,
        offset: usize,
    ) -> Result<ArtifactMatchingReportCollection> {
        if !report.has_expert_query() {
            return self.list_trackers(report, limit, offset);
        }

        let (trackers, expr) = self.validated_query(report, user)?;
        let filter = QueryBuilder::new(&trackers, user, self.today).build_from_where(&expr)?;
        let tracker_ids: Vec<TrackerId> = trackers.iter().map(|t| t.id).collect();

        let matching = self
            .backend
            .search_artifacts_matching_query(&filter, &tracker_ids, limit, offset)?;
        self.materialize(matching)
    }

    /// Validate the report's expert query without running it.
    pub fn check_report(&mut self, report: &CrossTrackerReport, user: &User) -> Result<()> {
        if report.has_expert_query() {
            self.validated_query(report, user)?;
        }
        Ok(())
    }

    fn list_trackers(
        &self,
        report: &CrossTrackerReport,
        limit: usize,
        offset: usize,
    ) -> Result<ArtifactMatchingReportCollection> {
        if report.trackers.is_empty() {
            debug!("report has no trackers");
            return Ok(ArtifactMatchingReportCollection::default());
        }

        debug!(trackers = report.trackers.len(), "listing artifacts without expert query");
        let matching = self
            .backend
            .search_artifacts_from_trackers(&report.tracker_ids(), limit, offset)?;
        self.materialize(matching)
    }

    /// Active trackers in scope and the parsed query, once it has passed validation.
    fn validated_query(&mut self, report: &CrossTrackerReport, user: &User) -> Result<(Vec<Tracker>, Arc<Expr>)> {
        let (active, inactive): (Vec<&Tracker>, Vec<&Tracker>) = report
            .trackers
            .iter()
            .partition(|t| t.is_active_in_active_project());
        if !inactive.is_empty() {
            let excluded: Vec<TrackerId> = inactive.iter().map(|t| t.id).collect();
            info!(?excluded, "inactive trackers excluded from query scope");
        }
        let trackers: Vec<Tracker> = active.into_iter().cloned().collect();

        let expr = self.parser_cache.parse(&report.expert_query)?;
        let validator = ExpertQueryValidator::new(
            self.backend,
            self.backend,
            self.backend,
            self.max_comparisons,
            self.today,
        );
        if let Err(e) = validator.validate(&expr, &CollectorParameters::new(&trackers, user)) {
            info!(query = %report.expert_query, "expert query rejected");
            return Err(e);
        }
        Ok((trackers, expr))
    }

    fn materialize(&self, matching: MatchingRows) -> Result<ArtifactMatchingReportCollection> {
        let mut artifacts = Vec::with_capacity(matching.rows.len());
        let mut dropped = 0;
        for row in &matching.rows {
            match self.backend.artifact_by_id(row.id)? {
                Some(artifact) => artifacts.push(artifact),
                None => dropped += 1,
            }
        }
        if dropped > 0 {
            warn!(dropped, "matched rows no longer resolve to artifacts");
        }

        debug!(
            returned = artifacts.len(),
            total = matching.found_rows,
            "report page ready"
        );
        Ok(ArtifactMatchingReportCollection::new(artifacts, matching.found_rows))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;

    use chrono::NaiveDateTime;

    use super::*;
    use crate::builder::FilterFragment;
    use crate::schema::{ArtifactId, Field, FieldType};
    use crate::store::ArtifactRow;
    use crate::validation::tests::{field, today, tracker, FakeStore};
    use crate::validation::{AllowedMetadata, InvalidSearchable};
    use crate::Error;

    /// Answers searches with fixed rows and records how it was called.
    #[derive(Default)]
    struct FakeBackend {
        store: FakeStore,
        rows: Vec<ArtifactId>,
        found_rows: usize,
        artifacts: HashMap<ArtifactId, Artifact>,
        listing_calls: RefCell<Vec<Vec<TrackerId>>>,
        query_calls: RefCell<Vec<(FilterFragment, Vec<TrackerId>)>>,
        resolve_calls: Cell<usize>,
    }

    impl FakeBackend {
        fn new(trackers: Vec<Tracker>) -> Self {
            Self {
                store: FakeStore::with_trackers(trackers).with_user(User::new(7, "jdoe")),
                ..Default::default()
            }
        }

        fn with_rows(mut self, rows: &[ArtifactId], found_rows: usize) -> Self {
            self.rows = rows.to_vec();
            self.found_rows = found_rows;
            self
        }

        fn with_artifacts(mut self, ids: &[ArtifactId]) -> Self {
            for id in ids {
                self.artifacts.insert(*id, artifact(*id));
            }
            self
        }

        fn store_calls(&self) -> usize {
            self.store.semantic_calls.get()
                + self.store.field_calls.get()
                + self.listing_calls.borrow().len()
                + self.query_calls.borrow().len()
                + self.resolve_calls.get()
        }

        fn page(&self) -> MatchingRows {
            MatchingRows {
                rows: self.rows.iter().map(|id| ArtifactRow { id: *id }).collect(),
                found_rows: self.found_rows,
            }
        }
    }

    impl SemanticUsage for FakeBackend {
        fn count_trackers_without_semantic(
            &self,
            kind: crate::schema::SemanticKind,
            tracker_ids: &[TrackerId],
        ) -> Result<usize> {
            self.store.count_trackers_without_semantic(kind, tracker_ids)
        }
    }

    impl FormElements for FakeBackend {
        fn used_fields_by_type(&self, tracker: &Tracker, field_type: FieldType) -> Result<Vec<Field>> {
            self.store.used_fields_by_type(tracker, field_type)
        }
    }

    impl RetrieveUser for FakeBackend {
        fn user_by_login(&self, login: &str) -> Result<Option<User>> {
            self.store.user_by_login(login)
        }
    }

    impl ArtifactReportDao for FakeBackend {
        fn search_artifacts_from_trackers(
            &self,
            tracker_ids: &[TrackerId],
            _limit: usize,
            _offset: usize,
        ) -> Result<MatchingRows> {
            self.listing_calls.borrow_mut().push(tracker_ids.to_vec());
            Ok(self.page())
        }

        fn search_artifacts_matching_query(
            &self,
            filter: &FilterFragment,
            tracker_ids: &[TrackerId],
            _limit: usize,
            _offset: usize,
        ) -> Result<MatchingRows> {
            self.query_calls
                .borrow_mut()
                .push((filter.clone(), tracker_ids.to_vec()));
            Ok(self.page())
        }
    }

    impl RetrieveArtifact for FakeBackend {
        fn artifact_by_id(&self, id: ArtifactId) -> Result<Option<Artifact>> {
            self.resolve_calls.set(self.resolve_calls.get() + 1);
            Ok(self.artifacts.get(&id).cloned())
        }
    }

    fn artifact(id: ArtifactId) -> Artifact {
        let at = NaiveDateTime::parse_from_str("2024-01-10 09:30:00", "%Y-%m-%d %H:%M:%S").unwrap();
        Artifact {
            id,
            tracker_id: 1,
            title: Some(format!("artifact {}", id)),
            submitted_by: 101,
            submitted_on: at,
            last_update_by: 101,
            last_update_date: at,
        }
    }

    fn factory(backend: &FakeBackend) -> CrossTrackerArtifactReportFactory<'_, FakeBackend> {
        let config = Config::with_root("/nonexistent");
        CrossTrackerArtifactReportFactory::new(backend, &config).with_today(today())
    }

    fn alice() -> User {
        User::new(101, "alice")
    }

    fn faults(result: Result<ArtifactMatchingReportCollection>) -> Vec<InvalidSearchable> {
        match result {
            Err(Error::InvalidSearchables(faults)) => faults.faults().to_vec(),
            other => panic!("Expected InvalidSearchables, got {:?}", other),
        }
    }

    /// T1 has status and assigned_to, T2 only status.
    fn two_trackers() -> Vec<Tracker> {
        let mut status_1 = crate::validation::tests::list_field(10, 1, "status", &["Open", "Closed"]);
        status_1.readers = crate::schema::Readers::Registered;
        vec![
            tracker(1, vec![status_1, field(11, 1, "assigned_to", FieldType::UserList)]),
            tracker(2, vec![crate::validation::tests::list_field(20, 2, "status", &["Open", "Done"])]),
        ]
    }

    #[test]
    fn test_empty_report_touches_nothing() {
        let backend = FakeBackend::new(Vec::new());
        let report = CrossTrackerReport::new(Vec::new(), "");

        let result = factory(&backend).get_artifacts_matching_report(&report, &alice(), 10, 0).unwrap();
        assert_eq!(result, ArtifactMatchingReportCollection::default());
        assert_eq!(backend.store_calls(), 0);
    }

    #[test]
    fn test_plain_listing_uses_every_tracker() {
        let mut inactive = tracker(2, Vec::new());
        inactive.is_active = false;
        let backend = FakeBackend::new(Vec::new()).with_rows(&[5, 4], 2).with_artifacts(&[5, 4]);
        let report = CrossTrackerReport::new(vec![tracker(1, Vec::new()), inactive], "");

        let result = factory(&backend).get_artifacts_matching_report(&report, &alice(), 10, 0).unwrap();
        assert_eq!(result.total_size(), 2);
        assert_eq!(result.artifacts().len(), 2);
        assert_eq!(*backend.listing_calls.borrow(), vec![vec![1, 2]]);
        assert!(backend.query_calls.borrow().is_empty());
    }

    #[test]
    fn test_unresolvable_rows_are_dropped_silently() {
        let backend = FakeBackend::new(Vec::new())
            .with_rows(&[3, 2, 1], 10)
            .with_artifacts(&[3, 1]);
        let report = CrossTrackerReport::new(vec![tracker(1, Vec::new())], "");

        let result = factory(&backend).get_artifacts_matching_report(&report, &alice(), 3, 0).unwrap();
        let ids: Vec<ArtifactId> = result.artifacts().iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![3, 1]);
        assert_eq!(result.total_size(), 10);
    }

    #[test]
    fn test_two_tracker_scenario() {
        let trackers = two_trackers();
        let backend = FakeBackend::new(trackers.clone())
            .with_rows(&[8, 7], 12)
            .with_artifacts(&[8, 7]);
        let report = CrossTrackerReport::new(trackers, "status = 'Open' AND assigned_to = 'jdoe'");

        let result = factory(&backend).get_artifacts_matching_report(&report, &alice(), 2, 0).unwrap();
        assert_eq!(result.total_size(), 12);
        assert_eq!(result.artifacts().len(), 2);

        let calls = backend.query_calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, vec![1, 2]);
        assert!(calls[0].0.sql().contains("lv.field_id IN (10, 20)"));
    }

    #[test]
    fn test_inactive_trackers_leave_the_scope() {
        let mut retired = tracker(2, vec![field(20, 2, "priority", FieldType::Int)]);
        retired.project.is_active = false;
        let trackers = vec![tracker(1, vec![field(10, 1, "summary", FieldType::String)]), retired];
        let backend = FakeBackend::new(trackers.clone());
        let mut factory = factory(&backend);

        let report = CrossTrackerReport::new(trackers.clone(), "priority > 1");
        assert_eq!(
            faults(factory.get_artifacts_matching_report(&report, &alice(), 10, 0)),
            vec![InvalidSearchable::DoesNotExist {
                searchable: "priority".to_string()
            }]
        );

        let report = CrossTrackerReport::new(trackers, "summary = 'x'");
        factory.get_artifacts_matching_report(&report, &alice(), 10, 0).unwrap();
        assert_eq!(backend.query_calls.borrow()[0].1, vec![1]);
    }

    #[test]
    fn test_unknown_searchable_stops_before_search() {
        let trackers = two_trackers();
        let backend = FakeBackend::new(trackers.clone());
        let report = CrossTrackerReport::new(trackers, "foo = 1");

        let found = faults(factory(&backend).get_artifacts_matching_report(&report, &alice(), 10, 0));
        assert_eq!(
            found,
            vec![InvalidSearchable::DoesNotExist {
                searchable: "foo".to_string()
            }]
        );
        assert!(backend.query_calls.borrow().is_empty());
        assert_eq!(backend.resolve_calls.get(), 0);
    }

    #[test]
    fn test_missing_metadata_reported_once() {
        let trackers = two_trackers();
        let backend = FakeBackend::new(trackers.clone());
        let report = CrossTrackerReport::new(trackers, "@status = OPEN() OR (@status != OPEN() AND @status = OPEN())");

        let found = faults(factory(&backend).get_artifacts_matching_report(&report, &alice(), 10, 0));
        assert_eq!(
            found,
            vec![InvalidSearchable::MissingInAllTrackers(AllowedMetadata::Status)]
        );
        assert_eq!(backend.store.semantic_calls.get(), 1);
    }

    #[test]
    fn test_metadata_defined_by_every_tracker_is_valid() {
        let mut trackers = two_trackers();
        for t in &mut trackers {
            let status_id = t.fields[0].id;
            t.semantics.status = Some(crate::schema::StatusSemantic {
                field_id: status_id,
                open_value_ids: vec![status_id * 100],
            });
        }
        let backend = FakeBackend::new(trackers.clone());
        let report = CrossTrackerReport::new(trackers, "@status = OPEN()");

        assert!(factory(&backend).check_report(&report, &alice()).is_ok());
    }

    #[test]
    fn test_submitted_by_values() {
        let trackers = vec![tracker(1, vec![field(10, 1, "submitter", FieldType::SubmittedBy)])];
        let backend = FakeBackend::new(trackers.clone());
        let mut factory = factory(&backend);
        let check = |factory: &mut CrossTrackerArtifactReportFactory<'_, FakeBackend>, query: &str| {
            factory.check_report(&CrossTrackerReport::new(trackers.clone(), query), &alice())
        };

        assert!(check(&mut factory, "@submitted_by = 'jdoe'").is_ok());
        assert!(check(&mut factory, "@submitted_by = ''").is_ok());
        assert!(check(&mut factory, "@submitted_by != ''").is_ok());
        assert!(matches!(
            check(&mut factory, "@submitted_by != 'ghost'"),
            Err(Error::InvalidSearchables(f)) if matches!(f.faults(), [InvalidSearchable::UserDoesNotExist { .. }])
        ));
        assert!(matches!(
            check(&mut factory, "@submitted_by IN ('')"),
            Err(Error::InvalidSearchables(f)) if matches!(f.faults(), [InvalidSearchable::EmptyStringTerm { .. }])
        ));
        assert!(matches!(
            check(&mut factory, "@last_update_by NOT IN ('jdoe', '')"),
            Err(Error::InvalidSearchables(_))
        ));
    }

    #[test]
    fn test_between_on_status_is_not_supported() {
        let mut trackers = two_trackers();
        trackers[0].semantics.status = Some(crate::schema::StatusSemantic {
            field_id: 10,
            open_value_ids: vec![1000],
        });
        let backend = FakeBackend::new(trackers.clone());

        for query in ["@status BETWEEN ('a', 'b')", "@status BETWEEN (OPEN(), OPEN())", "status BETWEEN ('Open', 'Open')"] {
            let report = CrossTrackerReport::new(trackers.clone(), query);
            let found = faults(factory(&backend).get_artifacts_matching_report(&report, &alice(), 10, 0));
            assert!(
                matches!(found.as_slice(), [InvalidSearchable::NotSupportedForComparison { .. }]),
                "{}: {:?}",
                query,
                found
            );
        }
    }

    #[test]
    fn test_syntax_error_is_not_a_validation_fault() {
        let backend = FakeBackend::new(two_trackers());
        let report = CrossTrackerReport::new(two_trackers(), "status = ");

        let result = factory(&backend).get_artifacts_matching_report(&report, &alice(), 10, 0);
        assert!(matches!(result, Err(Error::Syntax(_))));
        assert_eq!(backend.store_calls(), 0);
    }

    #[test]
    fn test_blank_expert_query_is_a_syntax_error() {
        let backend = FakeBackend::new(two_trackers()).with_rows(&[2, 1], 2).with_artifacts(&[2, 1]);
        let report = CrossTrackerReport::new(two_trackers(), "   ");
        assert!(report.has_expert_query());

        let result = factory(&backend).get_artifacts_matching_report(&report, &alice(), 10, 0);
        match result {
            Err(Error::Syntax(err)) => assert_eq!(err.message, "query cannot be empty"),
            other => panic!("Expected a syntax error, got {:?}", other),
        }
        assert!(backend.listing_calls.borrow().is_empty());
        assert_eq!(backend.store_calls(), 0);
    }

    #[test]
    fn test_repeated_runs_are_identical() {
        let trackers = two_trackers();
        let backend = FakeBackend::new(trackers.clone())
            .with_rows(&[2, 1], 2)
            .with_artifacts(&[2, 1]);
        let report = CrossTrackerReport::new(trackers, "status IN ('Open', 'Done') OR assigned_to = MYSELF()");
        let mut factory = factory(&backend);

        let first = factory.get_artifacts_matching_report(&report, &alice(), 10, 0).unwrap();
        let second = factory.get_artifacts_matching_report(&report, &alice(), 10, 0).unwrap();
        assert_eq!(first, second);
        assert_eq!(factory.parser_cache.len(), 1);

        let calls = backend.query_calls.borrow();
        assert_eq!(calls[0], calls[1]);
    }
}
