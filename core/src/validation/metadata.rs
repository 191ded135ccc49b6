//! Metadata references (`@name`) and whether the trackers in scope use them.

use std::collections::HashSet;
use std::fmt;

use tracing::debug;

use super::{CollectorParameters, InvalidSearchable};
use crate::query::Metadata;
use crate::schema::{FieldType, SemanticKind};
use crate::store::{FormElements, SemanticUsage};
use crate::{Error, Result};

/// The metadata a query may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllowedMetadata {
    Title,
    Description,
    Status,
    AssignedTo,
    SubmittedOn,
    LastUpdateDate,
    SubmittedBy,
    LastUpdateBy,
}

impl AllowedMetadata {
    pub const ALL: [AllowedMetadata; 8] = [
        AllowedMetadata::Title,
        AllowedMetadata::Description,
        AllowedMetadata::Status,
        AllowedMetadata::AssignedTo,
        AllowedMetadata::SubmittedOn,
        AllowedMetadata::LastUpdateDate,
        AllowedMetadata::SubmittedBy,
        AllowedMetadata::LastUpdateBy,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.name() == name)
    }

    pub fn name(&self) -> &'static str {
        match self {
            AllowedMetadata::Title => "title",
            AllowedMetadata::Description => "description",
            AllowedMetadata::Status => "status",
            AllowedMetadata::AssignedTo => "assigned_to",
            AllowedMetadata::SubmittedOn => "submitted_on",
            AllowedMetadata::LastUpdateDate => "last_update_date",
            AllowedMetadata::SubmittedBy => "submitted_by",
            AllowedMetadata::LastUpdateBy => "last_update_by",
        }
    }
}

impl fmt::Display for AllowedMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Checks that at least one tracker in scope exposes a metadata to the user.
///
/// A metadata name is checked once per checker; later checks of the same name
/// report nothing.
pub struct MetadataUsageChecker<'a> {
    form_elements: &'a dyn FormElements,
    semantic_usage: &'a dyn SemanticUsage,
    already_checked: HashSet<String>,
}

impl<'a> MetadataUsageChecker<'a> {
    pub fn new(form_elements: &'a dyn FormElements, semantic_usage: &'a dyn SemanticUsage) -> Self {
        Self {
            form_elements,
            semantic_usage,
            already_checked: HashSet::new(),
        }
    }

    /// `Ok(Some(fault))` when no tracker in scope can provide the metadata.
    /// A name outside [`AllowedMetadata`] is a logic error.
    pub fn check_metadata_is_used_by_all_trackers(
        &mut self,
        metadata: &Metadata,
        parameters: &CollectorParameters,
    ) -> Result<Option<InvalidSearchable>> {
        let name = metadata.name();
        if self.already_checked.contains(name) {
            return Ok(None);
        }

        let allowed = AllowedMetadata::from_name(name)
            .ok_or_else(|| Error::Logic(format!("no usage check for metadata '{}'", name)))?;
        self.already_checked.insert(name.to_string());

        let missing = match allowed {
            AllowedMetadata::Title => self.semantic_missing(SemanticKind::Title, parameters)?,
            AllowedMetadata::Description => self.semantic_missing(SemanticKind::Description, parameters)?,
            AllowedMetadata::Status => self.semantic_missing(SemanticKind::Status, parameters)?,
            AllowedMetadata::AssignedTo => self.semantic_missing(SemanticKind::Contributor, parameters)?,
            AllowedMetadata::SubmittedOn => self.field_missing(FieldType::SubmittedOn, parameters)?,
            AllowedMetadata::LastUpdateDate => self.field_missing(FieldType::LastUpdateDate, parameters)?,
            AllowedMetadata::SubmittedBy => self.field_missing(FieldType::SubmittedBy, parameters)?,
            AllowedMetadata::LastUpdateBy => self.field_missing(FieldType::LastUpdateBy, parameters)?,
        };

        if missing {
            debug!(metadata = name, "metadata is missing in all trackers");
            Ok(Some(InvalidSearchable::MissingInAllTrackers(allowed)))
        } else {
            Ok(None)
        }
    }

    fn semantic_missing(&self, kind: SemanticKind, parameters: &CollectorParameters) -> Result<bool> {
        let tracker_ids = parameters.tracker_ids();
        let without = self
            .semantic_usage
            .count_trackers_without_semantic(kind, &tracker_ids)?;
        Ok(without == tracker_ids.len())
    }

    /// A tracker fails when it has no field of this type, or none the user can read.
    fn field_missing(&self, field_type: FieldType, parameters: &CollectorParameters) -> Result<bool> {
        let mut failing = 0;
        for tracker in parameters.trackers {
            let fields = self.form_elements.used_fields_by_type(tracker, field_type)?;
            if !fields.iter().any(|f| f.user_can_read(parameters.user)) {
                failing += 1;
            }
        }
        Ok(failing == parameters.trackers.len())
    }
}
