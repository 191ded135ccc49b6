//! JSON datasets: users, trackers and artifacts loaded into a store in one go.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDateTime;
use duckdb::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::Store;
use crate::dates::DateValue;
use crate::schema::{ArtifactId, Field, FieldType, Tracker, TrackerId, User, UserId};
use crate::{Error, Result};

/// Everything needed to populate an empty store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub trackers: Vec<Tracker>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactData>,
}

/// An artifact as written in a dataset. Users are given by login and field
/// values by field name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactData {
    pub id: ArtifactId,
    pub tracker_id: TrackerId,
    pub submitted_by: String,
    pub submitted_on: NaiveDateTime,
    #[serde(default)]
    pub last_update_by: Option<String>,
    #[serde(default)]
    pub last_update_date: Option<NaiveDateTime>,
    #[serde(default)]
    pub values: BTreeMap<String, serde_json::Value>,
}

impl Dataset {
    pub fn from_json(contents: &str) -> Result<Self> {
        serde_json::from_str(contents).map_err(|e| Error::Storage(format!("Invalid dataset: {}", e)))
    }
}

/// Counts of what a load wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub users: usize,
    pub trackers: usize,
    pub artifacts: usize,
}

/// A field value ready for insertion.
enum StoredValue {
    Text(String),
    Number(f64),
    Date(NaiveDateTime),
    List(Vec<i64>),
}

impl Store {
    /// Write a dataset. Ids must not collide with what the store already holds.
    pub fn load_dataset(&self, dataset: &Dataset) -> Result<LoadStats> {
        for user in &dataset.users {
            self.write_user(user)?;
        }
        for tracker in &dataset.trackers {
            self.write_tracker(tracker)?;
        }

        let conn = self.connection()?;
        let logins = user_ids_by_login(&conn)?;

        conn.execute("BEGIN TRANSACTION", [])?;
        let result = dataset
            .artifacts
            .iter()
            .try_for_each(|artifact| write_artifact(&conn, dataset, &logins, artifact));
        match result {
            Ok(()) => conn.execute("COMMIT", [])?,
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                return Err(e);
            }
        };

        let stats = LoadStats {
            users: dataset.users.len(),
            trackers: dataset.trackers.len(),
            artifacts: dataset.artifacts.len(),
        };
        info!(
            users = stats.users,
            trackers = stats.trackers,
            artifacts = stats.artifacts,
            "dataset loaded"
        );
        Ok(stats)
    }
}

fn user_ids_by_login(conn: &Connection) -> Result<HashMap<String, UserId>> {
    let mut stmt = conn.prepare("SELECT login, id FROM users")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, UserId>(1)?)))?;
    Ok(rows.collect::<std::result::Result<HashMap<_, _>, _>>()?)
}

fn resolve_login(logins: &HashMap<String, UserId>, login: &str) -> Result<UserId> {
    logins
        .get(login)
        .copied()
        .ok_or_else(|| Error::Storage(format!("Unknown user '{}'", login)))
}

fn write_artifact(
    conn: &Connection,
    dataset: &Dataset,
    logins: &HashMap<String, UserId>,
    artifact: &ArtifactData,
) -> Result<()> {
    let tracker = dataset
        .trackers
        .iter()
        .find(|t| t.id == artifact.tracker_id)
        .ok_or_else(|| {
            Error::Storage(format!(
                "Artifact {} refers to unknown tracker {}",
                artifact.id, artifact.tracker_id
            ))
        })?;

    let submitted_by = resolve_login(logins, &artifact.submitted_by)?;
    let last_update_by = match &artifact.last_update_by {
        Some(login) => resolve_login(logins, login)?,
        None => submitted_by,
    };
    let last_update_date = artifact.last_update_date.unwrap_or(artifact.submitted_on);

    conn.execute(
        "INSERT INTO artifacts VALUES (?, ?, ?, CAST(? AS TIMESTAMP), ?, CAST(? AS TIMESTAMP))",
        params![
            artifact.id,
            tracker.id,
            submitted_by,
            timestamp(&artifact.submitted_on),
            last_update_by,
            timestamp(&last_update_date),
        ],
    )?;

    for (name, raw) in &artifact.values {
        let field = tracker.field_by_name(name).ok_or_else(|| {
            Error::Storage(format!(
                "Artifact {}: tracker {} has no field '{}'",
                artifact.id, tracker.id, name
            ))
        })?;
        if raw.is_null() {
            continue;
        }

        match convert_value(field, raw, logins)? {
            StoredValue::Text(text) => {
                conn.execute(
                    "INSERT INTO artifact_values (artifact_id, field_id, value_text) VALUES (?, ?, ?)",
                    params![artifact.id, field.id, text],
                )?;
            }
            StoredValue::Number(number) => {
                conn.execute(
                    "INSERT INTO artifact_values (artifact_id, field_id, value_number) VALUES (?, ?, ?)",
                    params![artifact.id, field.id, number],
                )?;
            }
            StoredValue::Date(at) => {
                conn.execute(
                    "INSERT INTO artifact_values (artifact_id, field_id, value_date) VALUES (?, ?, CAST(? AS TIMESTAMP))",
                    params![artifact.id, field.id, timestamp(&at)],
                )?;
            }
            StoredValue::List(ids) => {
                for value_id in ids {
                    conn.execute(
                        "INSERT INTO artifact_list_values VALUES (?, ?, ?)",
                        params![artifact.id, field.id, value_id],
                    )?;
                }
            }
        }
    }
    Ok(())
}

fn timestamp(at: &NaiveDateTime) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn convert_value(field: &Field, raw: &serde_json::Value, logins: &HashMap<String, UserId>) -> Result<StoredValue> {
    let invalid = || {
        Error::Storage(format!(
            "Invalid value {} for {} field '{}'",
            raw, field.field_type, field.name
        ))
    };

    match field.field_type {
        FieldType::String | FieldType::Text => raw
            .as_str()
            .map(|s| StoredValue::Text(s.to_string()))
            .ok_or_else(invalid),
        FieldType::Int | FieldType::Float => {
            let number = match raw {
                serde_json::Value::Number(n) => n.as_f64(),
                serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            number.map(StoredValue::Number).ok_or_else(invalid)
        }
        FieldType::Date => {
            let parsed = raw.as_str().and_then(|s| {
                DateValue::parse(s)
                    .map(|d| d.start())
                    .or_else(|| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").ok())
            });
            parsed.map(StoredValue::Date).ok_or_else(invalid)
        }
        FieldType::StaticList => {
            let mut ids = Vec::new();
            for label in string_or_list(raw).ok_or_else(invalid)? {
                let value = field.list_value_by_label(label).ok_or_else(|| {
                    Error::Storage(format!("Field '{}' has no value '{}'", field.name, label))
                })?;
                ids.push(value.id);
            }
            Ok(StoredValue::List(ids))
        }
        FieldType::UserList => {
            let mut ids = Vec::new();
            for login in string_or_list(raw).ok_or_else(invalid)? {
                ids.push(resolve_login(logins, login)?);
            }
            Ok(StoredValue::List(ids))
        }
        FieldType::SubmittedBy | FieldType::LastUpdateBy | FieldType::SubmittedOn | FieldType::LastUpdateDate => {
            Err(Error::Storage(format!(
                "Field '{}' is computed from the artifact and cannot be set",
                field.name
            )))
        }
    }
}

/// `"a"` or `["a", "b"]`
fn string_or_list(raw: &serde_json::Value) -> Option<Vec<&str>> {
    match raw {
        serde_json::Value::String(s) => Some(vec![s.as_str()]),
        serde_json::Value::Array(items) => items.iter().map(|v| v.as_str()).collect(),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::tests::setup_store;
    use crate::store::{RetrieveArtifact, RetrieveTrackers};
    use serde_json::json;

    /// Two trackers in two projects, three users, four artifacts.
    pub(crate) fn sample_dataset() -> Dataset {
        let everyone = json!({"kind": "everyone"});
        let value = json!({
            "users": [
                {"id": 101, "login": "alice", "real_name": "Alice Martin"},
                {"id": 102, "login": "jdoe"},
                {"id": 103, "login": "bob"}
            ],
            "trackers": [
                {
                    "id": 1,
                    "name": "bugs",
                    "is_active": true,
                    "project": {"id": 10, "name": "acme", "is_active": true},
                    "fields": [
                        {"id": 100, "tracker_id": 1, "name": "summary", "field_type": "string", "readers": everyone},
                        {"id": 101, "tracker_id": 1, "name": "status", "field_type": "sb",
                         "values": [{"id": 1000, "label": "Open"}, {"id": 1001, "label": "Closed"}]},
                        {"id": 102, "tracker_id": 1, "name": "assigned_to", "field_type": "ulist"},
                        {"id": 103, "tracker_id": 1, "name": "effort", "field_type": "int"},
                        {"id": 104, "tracker_id": 1, "name": "created", "field_type": "subon"},
                        {"id": 105, "tracker_id": 1, "name": "submitter", "field_type": "subby"}
                    ],
                    "semantics": {
                        "title": 100,
                        "status": {"field_id": 101, "open_value_ids": [1000]},
                        "contributor": 102
                    }
                },
                {
                    "id": 2,
                    "name": "requests",
                    "is_active": true,
                    "project": {"id": 20, "name": "ops", "is_active": true},
                    "fields": [
                        {"id": 200, "tracker_id": 2, "name": "summary", "field_type": "text"},
                        {"id": 201, "tracker_id": 2, "name": "status", "field_type": "sb",
                         "values": [{"id": 2000, "label": "Open"}, {"id": 2001, "label": "Done"}]},
                        {"id": 202, "tracker_id": 2, "name": "created", "field_type": "subon"},
                        {"id": 203, "tracker_id": 2, "name": "submitter", "field_type": "subby"}
                    ],
                    "semantics": {
                        "title": 200,
                        "status": {"field_id": 201, "open_value_ids": [2000]}
                    }
                }
            ],
            "artifacts": [
                {"id": 1, "tracker_id": 1, "submitted_by": "alice", "submitted_on": "2024-01-10T09:30:00",
                 "values": {"summary": "Crash on start", "status": "Open", "assigned_to": "alice", "effort": 1}},
                {"id": 2, "tracker_id": 1, "submitted_by": "alice", "submitted_on": "2024-01-20T12:00:00",
                 "last_update_by": "bob", "last_update_date": "2024-02-02T16:00:00",
                 "values": {"summary": "Typo in docs", "status": "Closed", "effort": 3}},
                {"id": 3, "tracker_id": 1, "submitted_by": "jdoe", "submitted_on": "2024-02-05T08:00:00",
                 "values": {"summary": "Crash when saving", "status": "Closed", "assigned_to": ["jdoe"], "effort": "5"}},
                {"id": 4, "tracker_id": 2, "submitted_by": "jdoe", "submitted_on": "2024-03-01T10:00:00",
                 "values": {"summary": "New laptop", "status": "Open"}}
            ]
        });
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_load_sample_dataset() {
        let (_tmp, store) = setup_store();
        let stats = store.load_dataset(&sample_dataset()).unwrap();

        assert_eq!(
            stats,
            LoadStats {
                users: 3,
                trackers: 2,
                artifacts: 4
            }
        );

        let trackers = store.trackers_by_ids(&[2, 1]).unwrap();
        assert_eq!(trackers[0].name, "requests");
        assert_eq!(trackers[1].fields.len(), 6);

        let artifact = store.artifact_by_id(2).unwrap().unwrap();
        assert_eq!(artifact.last_update_by, 103);
        assert_eq!(artifact.last_update_date.to_string(), "2024-02-02 16:00:00");
    }

    #[test]
    fn test_unknown_label_is_rejected() {
        let (_tmp, store) = setup_store();
        let mut dataset = sample_dataset();
        dataset.artifacts[0]
            .values
            .insert("status".to_string(), json!("Reopened"));

        let result = store.load_dataset(&dataset);
        assert!(matches!(result, Err(Error::Storage(msg)) if msg.contains("Reopened")));
        assert!(store.artifact_by_id(1).unwrap().is_none());
    }

    #[test]
    fn test_computed_fields_cannot_be_set() {
        let (_tmp, store) = setup_store();
        let mut dataset = sample_dataset();
        dataset.artifacts[0]
            .values
            .insert("created".to_string(), json!("2024-01-01"));

        assert!(store.load_dataset(&dataset).is_err());
    }

    #[test]
    fn test_from_json_reports_errors() {
        assert!(Dataset::from_json("{\"users\": 3}").is_err());
        let empty = Dataset::from_json("{}").unwrap();
        assert!(empty.trackers.is_empty());
    }
}
