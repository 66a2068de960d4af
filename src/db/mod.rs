//! SQLite-backed persistence for the outbound pipeline.
//!
//! The store is the single authority for dedup, stage transitions, touch
//! lifecycle, and the call-permission gate. Every compound operation (a
//! sequence plus its touches, a reply plus its suppression side effect)
//! commits inside one transaction so a partially-written aggregate can never
//! be observed. The connection wrapper is intentionally not `Clone` or
//! `Sync`; callers hold it behind a `std::sync::Mutex`.

use std::path::PathBuf;

use rusqlite::Connection;

use crate::config;
use crate::error::DbError;

mod contacts;
mod events;
mod improvement;
mod observability;
mod organizations;
mod pipeline;
mod sequences;
pub mod types;

pub use improvement::{NewOutcomeFeedback, NewSuggestion};
pub use observability::{AgentRunEntry, ApiCostEntry};
pub use pipeline::OrgHistory;
pub use types::*;

/// SQLite connection wrapper for pipeline state.
pub struct PipelineDb {
    conn: Connection,
}

impl PipelineDb {
    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Open (or create) the database at the configured path and apply the
    /// schema.
    pub fn open() -> Result<Self, DbError> {
        let path = config::db_path()?;
        Self::open_at(path)
    }

    /// Open a database at an explicit path. Useful for testing.
    pub fn open_at(path: PathBuf) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;

        // WAL for better concurrent read performance across pipeline runs.
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        crate::migrations::run_migrations(&conn).map_err(DbError::Migration)?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        Ok(Self { conn })
    }

    /// Execute a closure within a SQLite transaction.
    /// Commits on Ok, rolls back on Err.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&Self) -> Result<T, DbError>,
    {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        match f(self) {
            Ok(val) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(val)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::test_db;
    use super::*;

    #[test]
    fn test_open_creates_tables() {
        let db = test_db();
        for table in [
            "organizations",
            "contacts",
            "events",
            "suppression_list",
            "email_sequences",
            "email_touches",
            "inbound_replies",
            "call_records",
            "meetings",
        ] {
            let count: i32 = db
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get(0)
                })
                .unwrap_or_else(|_| panic!("{table} table should exist"));
            assert_eq!(count, 0);
        }
    }

    #[test]
    fn test_idempotent_schema_application() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("idempotent.db");

        let _db1 = PipelineDb::open_at(path.clone()).expect("first open");
        let _db2 = PipelineDb::open_at(path).expect("second open should not fail");
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = test_db();
        let result: Result<(), DbError> = db.with_transaction(|db| {
            db.conn_ref().execute(
                "INSERT INTO suppression_list (id, email, source, suppressed_at)
                 VALUES ('sup-1', 'x@example.com', 'manual', '2026-01-01T00:00:00Z')",
                [],
            )?;
            Err(DbError::HomeDirNotFound)
        });
        assert!(result.is_err());

        let count: i32 = db
            .conn_ref()
            .query_row("SELECT COUNT(*) FROM suppression_list", [], |row| row.get(0))
            .expect("count");
        assert_eq!(count, 0, "insert should have been rolled back");
    }
}
