//! Store - the backing collaborators of the query engine.
//!
//! The engine reaches trackers, semantics, artifacts and users only through the
//! traits below. [`Store`] implements all of them on top of DuckDB.

mod artifacts;
mod dataset;
mod trackers;
mod users;

use duckdb::Connection;

use crate::builder::FilterFragment;
use crate::schema::{Artifact, ArtifactId, Field, FieldType, SemanticKind, Tracker, TrackerId, User};
use crate::{Config, Error, Result};

pub use dataset::{ArtifactData, Dataset, LoadStats};

/// Counts trackers lacking a semantic.
pub trait SemanticUsage {
    /// How many of `tracker_ids` have no semantic of this kind defined.
    fn count_trackers_without_semantic(&self, kind: SemanticKind, tracker_ids: &[TrackerId]) -> Result<usize>;
}

/// Lists the fields of a tracker.
pub trait FormElements {
    fn used_fields_by_type(&self, tracker: &Tracker, field_type: FieldType) -> Result<Vec<Field>>;
}

/// One matched row, before resolution to an [`Artifact`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactRow {
    pub id: ArtifactId,
}

/// A page of matched rows with the size of the unpaginated match set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchingRows {
    pub rows: Vec<ArtifactRow>,
    pub found_rows: usize,
}

/// Row search over artifacts.
pub trait ArtifactReportDao {
    fn search_artifacts_from_trackers(
        &self,
        tracker_ids: &[TrackerId],
        limit: usize,
        offset: usize,
    ) -> Result<MatchingRows>;

    fn search_artifacts_matching_query(
        &self,
        filter: &FilterFragment,
        tracker_ids: &[TrackerId],
        limit: usize,
        offset: usize,
    ) -> Result<MatchingRows>;
}

pub trait RetrieveArtifact {
    fn artifact_by_id(&self, id: ArtifactId) -> Result<Option<Artifact>>;
}

pub trait RetrieveUser {
    fn user_by_login(&self, login: &str) -> Result<Option<User>>;
}

pub trait RetrieveTrackers {
    /// Trackers in the order of `ids`. Unknown ids are an error.
    fn trackers_by_ids(&self, ids: &[TrackerId]) -> Result<Vec<Tracker>>;
}

/// A DuckDB-backed store for trackers and artifacts.
pub struct Store {
    config: Config,
}

impl Store {
    /// Open an existing store.
    pub fn open(config: Config) -> Result<Self> {
        if !config.db_path().exists() {
            return Err(Error::NotInitialized(config.root.clone()));
        }
        Ok(Self { config })
    }

    /// Get a DuckDB connection to the store.
    pub fn connection(&self) -> Result<Connection> {
        Ok(Connection::open(self.config.db_path())?)
    }

    /// Get config reference.
    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Comma-separated id list for `IN (...)`. Callers guarantee `ids` is non-empty.
fn id_list(ids: &[i64]) -> String {
    ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(", ")
}
