//! Artifact search and resolution.

use chrono::NaiveDateTime;
use duckdb::types::{ToSql, ToSqlOutput, Value};
use duckdb::{params, params_from_iter, Connection};

use super::{id_list, ArtifactReportDao, ArtifactRow, MatchingRows, RetrieveArtifact, Store};
use crate::builder::{FilterFragment, SqlValue};
use crate::schema::{Artifact, ArtifactId, TrackerId};
use crate::{Error, Result};

impl ToSql for SqlValue {
    fn to_sql(&self) -> duckdb::Result<ToSqlOutput<'_>> {
        let value = match self {
            SqlValue::Float(f) => Value::Double(*f),
            SqlValue::Text(s) => Value::Text(s.clone()),
        };
        Ok(ToSqlOutput::Owned(value))
    }
}

impl ArtifactReportDao for Store {
    fn search_artifacts_from_trackers(
        &self,
        tracker_ids: &[TrackerId],
        limit: usize,
        offset: usize,
    ) -> Result<MatchingRows> {
        if tracker_ids.is_empty() {
            return Ok(MatchingRows::default());
        }
        let conn = self.connection()?;
        let where_clause = format!("a.tracker_id IN ({})", id_list(tracker_ids));
        search(&conn, &where_clause, &[], limit, offset)
    }

    fn search_artifacts_matching_query(
        &self,
        filter: &FilterFragment,
        tracker_ids: &[TrackerId],
        limit: usize,
        offset: usize,
    ) -> Result<MatchingRows> {
        if tracker_ids.is_empty() || filter.is_never() {
            return Ok(MatchingRows::default());
        }
        let conn = self.connection()?;
        let where_clause = format!(
            "a.tracker_id IN ({}) AND ({})",
            id_list(tracker_ids),
            filter.sql()
        );
        search(&conn, &where_clause, filter.parameters(), limit, offset)
    }
}

/// One page of ids, newest first, and the size of the whole match set.
fn search(
    conn: &Connection,
    where_clause: &str,
    parameters: &[SqlValue],
    limit: usize,
    offset: usize,
) -> Result<MatchingRows> {
    let sql = format!(
        "SELECT a.id FROM artifacts a WHERE {} ORDER BY a.id DESC LIMIT {} OFFSET {}",
        where_clause, limit, offset
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(parameters.iter()), |row| {
            Ok(ArtifactRow { id: row.get(0)? })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let count_sql = format!("SELECT COUNT(*) FROM artifacts a WHERE {}", where_clause);
    let found_rows: i64 = conn.query_row(&count_sql, params_from_iter(parameters.iter()), |row| row.get(0))?;

    Ok(MatchingRows {
        rows,
        found_rows: found_rows as usize,
    })
}

impl RetrieveArtifact for Store {
    fn artifact_by_id(&self, id: ArtifactId) -> Result<Option<Artifact>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT
                a.id,
                a.tracker_id,
                a.submitted_by,
                a.submitted_on::VARCHAR,
                a.last_update_by,
                a.last_update_date::VARCHAR,
                (
                    SELECT v.value_text
                    FROM artifact_values v
                    JOIN semantics s ON s.field_id = v.field_id AND s.tracker_id = a.tracker_id
                    WHERE v.artifact_id = a.id AND s.kind = 'title'
                    LIMIT 1
                )
            FROM artifacts a
            WHERE a.id = ?
            "#,
        )?;
        let mut rows = stmt.query(params![id])?;

        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let submitted_on: String = row.get(3)?;
        let last_update_date: String = row.get(5)?;
        Ok(Some(Artifact {
            id: row.get(0)?,
            tracker_id: row.get(1)?,
            title: row.get(6)?,
            submitted_by: row.get(2)?,
            submitted_on: parse_timestamp(&submitted_on)?,
            last_update_by: row.get(4)?,
            last_update_date: parse_timestamp(&last_update_date)?,
        }))
    }
}

fn parse_timestamp(s: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .map_err(|e| Error::Storage(format!("Invalid timestamp '{}': {}", s, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::QueryBuilder;
    use crate::query::parse_expert_query;
    use crate::store::dataset::tests::sample_dataset;
    use crate::store::tests::setup_store;
    use crate::store::{RetrieveTrackers, RetrieveUser};
    use chrono::NaiveDate;

    fn loaded_store() -> (tempfile::TempDir, Store) {
        let (tmp, store) = setup_store();
        store.load_dataset(&sample_dataset()).unwrap();
        (tmp, store)
    }

    fn ids(rows: &MatchingRows) -> Vec<ArtifactId> {
        rows.rows.iter().map(|r| r.id).collect()
    }

    fn run(store: &Store, query: &str) -> MatchingRows {
        let trackers = store.trackers_by_ids(&[1, 2]).unwrap();
        let user = store.user_by_login("alice").unwrap().unwrap();
        let expr = parse_expert_query(query).unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let filter = QueryBuilder::new(&trackers, &user, today).build_from_where(&expr).unwrap();
        store.search_artifacts_matching_query(&filter, &[1, 2], 50, 0).unwrap()
    }

    #[test]
    fn test_search_from_trackers_paginates() {
        let (_tmp, store) = loaded_store();

        let page = store.search_artifacts_from_trackers(&[1, 2], 2, 0).unwrap();
        assert_eq!(ids(&page), vec![4, 3]);
        assert_eq!(page.found_rows, 4);

        let page = store.search_artifacts_from_trackers(&[1, 2], 2, 2).unwrap();
        assert_eq!(ids(&page), vec![2, 1]);
        assert_eq!(page.found_rows, 4);

        let page = store.search_artifacts_from_trackers(&[2], 10, 0).unwrap();
        assert_eq!(ids(&page), vec![4]);
        assert_eq!(page.found_rows, 1);
    }

    #[test]
    fn test_empty_tracker_list_does_not_query() {
        let (_tmp, store) = loaded_store();
        assert_eq!(store.search_artifacts_from_trackers(&[], 10, 0).unwrap(), MatchingRows::default());
    }

    #[test]
    fn test_text_and_list_filters() {
        let (_tmp, store) = loaded_store();

        assert_eq!(ids(&run(&store, "summary = 'CRASH'")), vec![3, 1]);
        assert_eq!(ids(&run(&store, "summary != 'crash'")), vec![4, 2]);
        assert_eq!(ids(&run(&store, "status = 'Open'")), vec![4, 1]);
        assert_eq!(ids(&run(&store, "status = 'Open' AND summary = 'crash'")), vec![1]);
    }

    #[test]
    fn test_user_and_date_filters() {
        let (_tmp, store) = loaded_store();

        assert_eq!(ids(&run(&store, "assigned_to = 'jdoe'")), vec![3]);
        assert_eq!(ids(&run(&store, "assigned_to = MYSELF()")), vec![1]);
        assert_eq!(ids(&run(&store, "@submitted_on < '2024-02-01'")), vec![2, 1]);
        assert_eq!(ids(&run(&store, "@submitted_by = 'jdoe'")), vec![4, 3]);
        assert_eq!(ids(&run(&store, "effort BETWEEN (2, 5)")), vec![3, 2]);
    }

    #[test]
    fn test_status_open_semantic() {
        let (_tmp, store) = loaded_store();

        assert_eq!(ids(&run(&store, "@status = OPEN()")), vec![4, 1]);
        assert_eq!(ids(&run(&store, "@status != OPEN()")), vec![3, 2]);
    }

    #[test]
    fn test_artifact_by_id() {
        let (_tmp, store) = loaded_store();

        let artifact = store.artifact_by_id(1).unwrap().unwrap();
        assert_eq!(artifact.tracker_id, 1);
        assert_eq!(artifact.title.as_deref(), Some("Crash on start"));
        assert_eq!(artifact.submitted_on.to_string(), "2024-01-10 09:30:00");

        assert!(store.artifact_by_id(99).unwrap().is_none());
    }
}
