//! Domain records read by the query engine: users, projects, trackers, fields, artifacts.
//!
//! Trackers are immutable while a query is evaluated. The engine only reads them.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

pub type UserId = i64;
pub type ProjectId = i64;
pub type TrackerId = i64;
pub type FieldId = i64;
pub type ArtifactId = i64;

/// The user a report is evaluated for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub login: String,
    #[serde(default)]
    pub real_name: Option<String>,
}

impl User {
    pub fn new(id: UserId, login: impl Into<String>) -> Self {
        Self {
            id,
            login: login.into(),
            real_name: None,
        }
    }

    /// The user behind an unauthenticated request.
    pub fn anonymous() -> Self {
        Self {
            id: 0,
            login: String::new(),
            real_name: None,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.id == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub is_active: bool,
}

/// Field types, stored by their short code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    #[serde(rename = "string")]
    String,
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "int")]
    Int,
    #[serde(rename = "float")]
    Float,
    #[serde(rename = "date")]
    Date,
    /// Selectbox bound to a static list of labels.
    #[serde(rename = "sb")]
    StaticList,
    /// Selectbox bound to users.
    #[serde(rename = "ulist")]
    UserList,
    #[serde(rename = "subby")]
    SubmittedBy,
    #[serde(rename = "luby")]
    LastUpdateBy,
    #[serde(rename = "subon")]
    SubmittedOn,
    #[serde(rename = "lud")]
    LastUpdateDate,
}

impl FieldType {
    pub fn code(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Text => "text",
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::Date => "date",
            FieldType::StaticList => "sb",
            FieldType::UserList => "ulist",
            FieldType::SubmittedBy => "subby",
            FieldType::LastUpdateBy => "luby",
            FieldType::SubmittedOn => "subon",
            FieldType::LastUpdateDate => "lud",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        let field_type = match code {
            "string" => FieldType::String,
            "text" => FieldType::Text,
            "int" => FieldType::Int,
            "float" => FieldType::Float,
            "date" => FieldType::Date,
            "sb" => FieldType::StaticList,
            "ulist" => FieldType::UserList,
            "subby" => FieldType::SubmittedBy,
            "luby" => FieldType::LastUpdateBy,
            "subon" => FieldType::SubmittedOn,
            "lud" => FieldType::LastUpdateDate,
            _ => return None,
        };
        Some(field_type)
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Who may read a field's values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "users", rename_all = "snake_case")]
pub enum Readers {
    /// Anyone, anonymous included.
    #[default]
    Everyone,
    /// Any authenticated user.
    Registered,
    /// Only the listed users.
    Users(Vec<UserId>),
}

/// One entry of a static list field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListValue {
    pub id: i64,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub id: FieldId,
    pub tracker_id: TrackerId,
    pub name: String,
    pub field_type: FieldType,
    #[serde(default)]
    pub readers: Readers,
    /// Labels of a static list field; empty for every other type.
    #[serde(default)]
    pub values: Vec<ListValue>,
}

impl Field {
    pub fn user_can_read(&self, user: &User) -> bool {
        match &self.readers {
            Readers::Everyone => true,
            Readers::Registered => !user.is_anonymous(),
            Readers::Users(ids) => ids.contains(&user.id),
        }
    }

    pub fn list_value_by_label(&self, label: &str) -> Option<&ListValue> {
        self.values.iter().find(|v| v.label == label)
    }
}

/// Semantic roles a tracker may map onto one of its fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SemanticKind {
    Title,
    Description,
    Status,
    /// Backs `@assigned_to`.
    Contributor,
}

impl SemanticKind {
    pub fn code(&self) -> &'static str {
        match self {
            SemanticKind::Title => "title",
            SemanticKind::Description => "description",
            SemanticKind::Status => "status",
            SemanticKind::Contributor => "contributor",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSemantic {
    pub field_id: FieldId,
    /// List values meaning "open".
    pub open_value_ids: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Semantics {
    #[serde(default)]
    pub title: Option<FieldId>,
    #[serde(default)]
    pub description: Option<FieldId>,
    #[serde(default)]
    pub status: Option<StatusSemantic>,
    #[serde(default)]
    pub contributor: Option<FieldId>,
}

/// A record type definition with its own fields and semantics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tracker {
    pub id: TrackerId,
    pub name: String,
    pub is_active: bool,
    pub project: Project,
    #[serde(default)]
    pub fields: Vec<Field>,
    #[serde(default)]
    pub semantics: Semantics,
}

impl Tracker {
    /// Whether the tracker and its owning project are both active.
    pub fn is_active_in_active_project(&self) -> bool {
        self.is_active && self.project.is_active
    }

    pub fn field(&self, id: FieldId) -> Option<&Field> {
        self.fields.iter().find(|f| f.id == id)
    }

    pub fn field_by_name(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn fields_by_type(&self, field_type: FieldType) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(move |f| f.field_type == field_type)
    }

    /// The field backing a semantic, if the tracker defines it.
    pub fn semantic_field(&self, kind: SemanticKind) -> Option<&Field> {
        let field_id = match kind {
            SemanticKind::Title => self.semantics.title,
            SemanticKind::Description => self.semantics.description,
            SemanticKind::Status => self.semantics.status.as_ref().map(|s| s.field_id),
            SemanticKind::Contributor => self.semantics.contributor,
        }?;
        self.field(field_id)
    }
}

/// A resolved artifact, as returned to report callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub tracker_id: TrackerId,
    pub title: Option<String>,
    pub submitted_by: UserId,
    pub submitted_on: NaiveDateTime,
    pub last_update_by: UserId,
    pub last_update_date: NaiveDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(readers: Readers) -> Field {
        Field {
            id: 1,
            tracker_id: 1,
            name: "summary".to_string(),
            field_type: FieldType::String,
            readers,
            values: Vec::new(),
        }
    }

    #[test]
    fn test_field_type_codes() {
        for code in ["string", "text", "int", "float", "date", "sb", "ulist", "subby", "luby", "subon", "lud"] {
            let field_type = FieldType::from_code(code).unwrap();
            assert_eq!(field_type.code(), code);
        }
        assert!(FieldType::from_code("msb").is_none());
    }

    #[test]
    fn test_user_can_read() {
        let alice = User::new(101, "alice");
        let anonymous = User::anonymous();

        assert!(field(Readers::Everyone).user_can_read(&anonymous));
        assert!(field(Readers::Registered).user_can_read(&alice));
        assert!(!field(Readers::Registered).user_can_read(&anonymous));
        assert!(field(Readers::Users(vec![101])).user_can_read(&alice));
        assert!(!field(Readers::Users(vec![102])).user_can_read(&alice));
    }

    #[test]
    fn test_active_in_active_project() {
        let mut tracker = Tracker {
            id: 1,
            name: "bugs".to_string(),
            is_active: true,
            project: Project {
                id: 1,
                name: "acme".to_string(),
                is_active: true,
            },
            fields: Vec::new(),
            semantics: Semantics::default(),
        };
        assert!(tracker.is_active_in_active_project());

        tracker.project.is_active = false;
        assert!(!tracker.is_active_in_active_project());
    }
}
