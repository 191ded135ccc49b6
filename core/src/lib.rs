//! Cross-tracker expert queries.
//!
//! Parses a boolean query over the fields and metadata of several trackers,
//! validates it for a user, compiles it to SQL and runs it with pagination.

pub mod builder;
pub mod config;
pub mod dates;
pub mod error;
pub mod init;
pub mod query;
pub mod report;
pub mod schema;
pub mod store;
pub mod validation;

pub use builder::{FilterFragment, QueryBuilder, SqlValue};
pub use config::Config;
pub use error::{Error, Result};
pub use query::{parse_expert_query, Expr, ParserCache, SyntaxError};
pub use report::{ArtifactMatchingReportCollection, CrossTrackerArtifactReportFactory, CrossTrackerReport, ReportBackend};
pub use schema::{Artifact, Field, FieldType, Project, Readers, Tracker, User};
pub use store::{Dataset, LoadStats, Store};
pub use validation::{AllowedMetadata, CollectorParameters, ExpertQueryValidator, InvalidSearchable, InvalidSearchables};
