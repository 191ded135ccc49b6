//! Store initialization - creates the directory structure and database.
//!
//! # Tables
//!
//! - `users`, `projects`, `trackers` - identities and activity flags
//! - `fields`, `field_readers`, `list_values` - per-tracker schema and read permissions
//! - `semantics`, `status_open_values` - semantic roles mapped onto fields
//! - `artifacts` - one row per record, with the built-in submitted/updated columns
//! - `artifact_values`, `artifact_list_values` - field values (scalar and list)

use std::fs;

use crate::{Config, Error, Result};

/// Initialize a new store.
///
/// Creates the directory structure and the DuckDB database with its schema.
pub fn initialize(config: &Config) -> Result<()> {
    if config.db_path().exists() {
        return Err(Error::AlreadyInitialized(config.root.clone()));
    }

    fs::create_dir_all(config.root.join("db"))?;

    let conn = duckdb::Connection::open(config.db_path())?;
    create_tables(&conn)?;

    config.save()?;

    Ok(())
}

/// Check if a store exists at the configured root.
pub fn is_initialized(config: &Config) -> bool {
    config.db_path().exists()
}

fn create_tables(conn: &duckdb::Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE users (
            id BIGINT PRIMARY KEY,
            login VARCHAR NOT NULL UNIQUE,
            real_name VARCHAR
        );

        CREATE TABLE projects (
            id BIGINT PRIMARY KEY,
            name VARCHAR NOT NULL,
            is_active BOOLEAN NOT NULL
        );

        CREATE TABLE trackers (
            id BIGINT PRIMARY KEY,
            project_id BIGINT NOT NULL,
            name VARCHAR NOT NULL,
            is_active BOOLEAN NOT NULL
        );

        -- readers: 'everyone', 'registered' or 'users' (then see field_readers)
        CREATE TABLE fields (
            id BIGINT PRIMARY KEY,
            tracker_id BIGINT NOT NULL,
            name VARCHAR NOT NULL,
            field_type VARCHAR NOT NULL,
            readers VARCHAR NOT NULL
        );

        CREATE TABLE field_readers (
            field_id BIGINT NOT NULL,
            user_id BIGINT NOT NULL
        );

        CREATE TABLE list_values (
            id BIGINT PRIMARY KEY,
            field_id BIGINT NOT NULL,
            label VARCHAR NOT NULL
        );

        -- kind: 'title', 'description', 'status' or 'contributor'
        CREATE TABLE semantics (
            tracker_id BIGINT NOT NULL,
            kind VARCHAR NOT NULL,
            field_id BIGINT NOT NULL
        );

        CREATE TABLE status_open_values (
            tracker_id BIGINT NOT NULL,
            value_id BIGINT NOT NULL
        );

        CREATE TABLE artifacts (
            id BIGINT PRIMARY KEY,
            tracker_id BIGINT NOT NULL,
            submitted_by BIGINT NOT NULL,
            submitted_on TIMESTAMP NOT NULL,
            last_update_by BIGINT NOT NULL,
            last_update_date TIMESTAMP NOT NULL
        );

        CREATE TABLE artifact_values (
            artifact_id BIGINT NOT NULL,
            field_id BIGINT NOT NULL,
            value_text VARCHAR,
            value_number DOUBLE,
            value_date TIMESTAMP
        );

        -- value_id is a list_values.id, or a users.id for user-bound lists
        CREATE TABLE artifact_list_values (
            artifact_id BIGINT NOT NULL,
            field_id BIGINT NOT NULL,
            value_id BIGINT NOT NULL
        );
        "#,
    )?;
    Ok(())
}
