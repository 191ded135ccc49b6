//! Tracker, field and semantic storage.

use std::collections::HashSet;

use duckdb::{params, Connection};

use super::{id_list, FormElements, RetrieveTrackers, SemanticUsage, Store};
use crate::schema::{
    Field, FieldId, FieldType, ListValue, Project, Readers, SemanticKind, Semantics, StatusSemantic,
    Tracker, TrackerId,
};
use crate::{Error, Result};

impl SemanticUsage for Store {
    fn count_trackers_without_semantic(&self, kind: SemanticKind, tracker_ids: &[TrackerId]) -> Result<usize> {
        let distinct: HashSet<TrackerId> = tracker_ids.iter().copied().collect();
        if distinct.is_empty() {
            return Ok(0);
        }

        let conn = self.connection()?;
        let ids: Vec<TrackerId> = distinct.iter().copied().collect();
        let with_semantic: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(DISTINCT tracker_id) FROM semantics WHERE kind = ? AND tracker_id IN ({})",
                id_list(&ids)
            ),
            params![kind.code()],
            |row| row.get(0),
        )?;

        Ok(distinct.len().saturating_sub(with_semantic as usize))
    }
}

impl FormElements for Store {
    fn used_fields_by_type(&self, tracker: &Tracker, field_type: FieldType) -> Result<Vec<Field>> {
        let conn = self.connection()?;
        let fields = load_fields(&conn, tracker.id)?;
        Ok(fields.into_iter().filter(|f| f.field_type == field_type).collect())
    }
}

impl RetrieveTrackers for Store {
    fn trackers_by_ids(&self, ids: &[TrackerId]) -> Result<Vec<Tracker>> {
        let conn = self.connection()?;
        let mut trackers = Vec::with_capacity(ids.len());
        for id in ids {
            trackers.push(load_tracker(&conn, *id)?);
        }
        Ok(trackers)
    }
}

impl Store {
    /// Write a tracker with its project, fields and semantics.
    pub fn write_tracker(&self, tracker: &Tracker) -> Result<()> {
        let conn = self.connection()?;

        conn.execute("BEGIN TRANSACTION", [])?;
        match write_tracker_inner(&conn, tracker) {
            Ok(()) => {
                conn.execute("COMMIT", [])?;
                Ok(())
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(e)
            }
        }
    }
}

fn write_tracker_inner(conn: &Connection, tracker: &Tracker) -> Result<()> {
    let project = &tracker.project;
    conn.execute(
        "INSERT OR REPLACE INTO projects VALUES (?, ?, ?)",
        params![project.id, project.name, project.is_active],
    )?;
    conn.execute(
        "INSERT INTO trackers VALUES (?, ?, ?, ?)",
        params![tracker.id, project.id, tracker.name, tracker.is_active],
    )?;

    for field in &tracker.fields {
        if field.tracker_id != tracker.id {
            return Err(Error::Storage(format!(
                "Field {} belongs to tracker {}, not {}",
                field.id, field.tracker_id, tracker.id
            )));
        }
        let readers = match &field.readers {
            Readers::Everyone => "everyone",
            Readers::Registered => "registered",
            Readers::Users(_) => "users",
        };
        conn.execute(
            "INSERT INTO fields VALUES (?, ?, ?, ?, ?)",
            params![field.id, tracker.id, field.name, field.field_type.code(), readers],
        )?;
        if let Readers::Users(user_ids) = &field.readers {
            for user_id in user_ids {
                conn.execute("INSERT INTO field_readers VALUES (?, ?)", params![field.id, user_id])?;
            }
        }
        for value in &field.values {
            conn.execute(
                "INSERT INTO list_values VALUES (?, ?, ?)",
                params![value.id, field.id, value.label],
            )?;
        }
    }

    let semantics = &tracker.semantics;
    let mapped = [
        (SemanticKind::Title, semantics.title),
        (SemanticKind::Description, semantics.description),
        (SemanticKind::Status, semantics.status.as_ref().map(|s| s.field_id)),
        (SemanticKind::Contributor, semantics.contributor),
    ];
    for (kind, field_id) in mapped {
        if let Some(field_id) = field_id {
            conn.execute(
                "INSERT INTO semantics VALUES (?, ?, ?)",
                params![tracker.id, kind.code(), field_id],
            )?;
        }
    }
    if let Some(status) = &semantics.status {
        for value_id in &status.open_value_ids {
            conn.execute(
                "INSERT INTO status_open_values VALUES (?, ?)",
                params![tracker.id, value_id],
            )?;
        }
    }

    Ok(())
}

fn load_tracker(conn: &Connection, id: TrackerId) -> Result<Tracker> {
    let mut stmt = conn.prepare(
        r#"
        SELECT t.id, t.name, t.is_active, p.id, p.name, p.is_active
        FROM trackers t
        JOIN projects p ON p.id = t.project_id
        WHERE t.id = ?
        "#,
    )?;
    let mut rows = stmt.query(params![id])?;
    let row = rows
        .next()?
        .ok_or_else(|| Error::NotFound(format!("tracker {}", id)))?;

    let mut tracker = Tracker {
        id: row.get(0)?,
        name: row.get(1)?,
        is_active: row.get(2)?,
        project: Project {
            id: row.get(3)?,
            name: row.get(4)?,
            is_active: row.get(5)?,
        },
        fields: Vec::new(),
        semantics: Semantics::default(),
    };

    tracker.fields = load_fields(conn, id)?;
    tracker.semantics = load_semantics(conn, id)?;
    Ok(tracker)
}

fn load_fields(conn: &Connection, tracker_id: TrackerId) -> Result<Vec<Field>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, field_type, readers FROM fields WHERE tracker_id = ? ORDER BY id",
    )?;
    let rows = stmt.query_map(params![tracker_id], |row| {
        Ok((
            row.get::<_, FieldId>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
        ))
    })?;

    let mut fields = Vec::new();
    for row in rows {
        let (id, name, code, readers) = row?;
        let field_type = FieldType::from_code(&code)
            .ok_or_else(|| Error::Storage(format!("Unknown field type '{}' for field {}", code, id)))?;
        let readers = match readers.as_str() {
            "everyone" => Readers::Everyone,
            "registered" => Readers::Registered,
            "users" => Readers::Users(load_field_readers(conn, id)?),
            other => {
                return Err(Error::Storage(format!("Unknown readers '{}' for field {}", other, id)));
            }
        };
        let values = if field_type == FieldType::StaticList {
            load_list_values(conn, id)?
        } else {
            Vec::new()
        };
        fields.push(Field {
            id,
            tracker_id,
            name,
            field_type,
            readers,
            values,
        });
    }
    Ok(fields)
}

fn load_field_readers(conn: &Connection, field_id: FieldId) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare("SELECT user_id FROM field_readers WHERE field_id = ? ORDER BY user_id")?;
    let rows = stmt.query_map(params![field_id], |row| row.get(0))?;
    Ok(rows.collect::<std::result::Result<Vec<i64>, _>>()?)
}

fn load_list_values(conn: &Connection, field_id: FieldId) -> Result<Vec<ListValue>> {
    let mut stmt = conn.prepare("SELECT id, label FROM list_values WHERE field_id = ? ORDER BY id")?;
    let rows = stmt.query_map(params![field_id], |row| {
        Ok(ListValue {
            id: row.get(0)?,
            label: row.get(1)?,
        })
    })?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

fn load_semantics(conn: &Connection, tracker_id: TrackerId) -> Result<Semantics> {
    let mut stmt = conn.prepare("SELECT kind, field_id FROM semantics WHERE tracker_id = ?")?;
    let rows = stmt.query_map(params![tracker_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, FieldId>(1)?))
    })?;

    let mut semantics = Semantics::default();
    for row in rows {
        let (kind, field_id) = row?;
        match kind.as_str() {
            "title" => semantics.title = Some(field_id),
            "description" => semantics.description = Some(field_id),
            "contributor" => semantics.contributor = Some(field_id),
            "status" => {
                let mut stmt =
                    conn.prepare("SELECT value_id FROM status_open_values WHERE tracker_id = ? ORDER BY value_id")?;
                let open = stmt.query_map(params![tracker_id], |row| row.get(0))?;
                semantics.status = Some(StatusSemantic {
                    field_id,
                    open_value_ids: open.collect::<std::result::Result<Vec<i64>, _>>()?,
                });
            }
            other => {
                return Err(Error::Storage(format!(
                    "Unknown semantic '{}' on tracker {}",
                    other, tracker_id
                )));
            }
        }
    }
    Ok(semantics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::setup_store;

    fn bugs_tracker() -> Tracker {
        Tracker {
            id: 1,
            name: "bugs".to_string(),
            is_active: true,
            project: Project {
                id: 10,
                name: "acme".to_string(),
                is_active: true,
            },
            fields: vec![
                Field {
                    id: 100,
                    tracker_id: 1,
                    name: "summary".to_string(),
                    field_type: FieldType::String,
                    readers: Readers::Everyone,
                    values: Vec::new(),
                },
                Field {
                    id: 101,
                    tracker_id: 1,
                    name: "status".to_string(),
                    field_type: FieldType::StaticList,
                    readers: Readers::Users(vec![7, 8]),
                    values: vec![
                        ListValue {
                            id: 1000,
                            label: "Open".to_string(),
                        },
                        ListValue {
                            id: 1001,
                            label: "Closed".to_string(),
                        },
                    ],
                },
            ],
            semantics: Semantics {
                title: Some(100),
                status: Some(StatusSemantic {
                    field_id: 101,
                    open_value_ids: vec![1000],
                }),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_tracker_roundtrip() {
        let (_tmp, store) = setup_store();
        let tracker = bugs_tracker();
        store.write_tracker(&tracker).unwrap();

        let loaded = store.trackers_by_ids(&[1]).unwrap();
        assert_eq!(loaded, vec![tracker]);
    }

    #[test]
    fn test_unknown_tracker_is_not_found() {
        let (_tmp, store) = setup_store();
        let result = store.trackers_by_ids(&[42]);
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_count_trackers_without_semantic() {
        let (_tmp, store) = setup_store();
        store.write_tracker(&bugs_tracker()).unwrap();

        let mut other = bugs_tracker();
        other.id = 2;
        other.fields.clear();
        other.semantics = Semantics::default();
        store.write_tracker(&other).unwrap();

        assert_eq!(store.count_trackers_without_semantic(SemanticKind::Title, &[1, 2]).unwrap(), 1);
        assert_eq!(store.count_trackers_without_semantic(SemanticKind::Description, &[1, 2]).unwrap(), 2);
        assert_eq!(store.count_trackers_without_semantic(SemanticKind::Status, &[1]).unwrap(), 0);
    }

    #[test]
    fn test_used_fields_by_type() {
        let (_tmp, store) = setup_store();
        let tracker = bugs_tracker();
        store.write_tracker(&tracker).unwrap();

        let lists = store.used_fields_by_type(&tracker, FieldType::StaticList).unwrap();
        assert_eq!(lists.len(), 1);
        assert_eq!(lists[0].name, "status");
        assert!(store.used_fields_by_type(&tracker, FieldType::SubmittedOn).unwrap().is_empty());
    }
}
