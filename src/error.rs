//! Error types for the persistence and gating engine.
//!
//! Errors are classified by what the caller should do with them:
//! - Identity errors: bad dedup key, nothing was written — fix the input.
//! - Invariant violations: the write would break a safety rule and was rejected.
//! - Connectivity: the store itself failed — pre-flight readers may continue
//!   with empty state, writers must surface the failure.

use thiserror::Error;

/// Errors specific to database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("Invalid identity for {field}: {value:?}")]
    InvalidIdentity { field: &'static str, value: String },

    #[error("Invalid suppression source: {0:?}")]
    InvalidSource(String),

    #[error("Invalid reply classification: {0:?}")]
    InvalidClassification(String),

    #[error("Invalid status value: {0:?}")]
    InvalidStatus(String),

    #[error("Pipeline stage transition not allowed: {from} -> {to}")]
    TransitionNotAllowed { from: String, to: String },

    #[error("Call permission not granted for organization {org_id}")]
    CallPermissionMissing { org_id: String },

    #[error("Touch {touch_id} cannot be marked sent from status {status}")]
    TouchNotSendable { touch_id: String, status: String },

    #[error("A sequence requires between 1 and 3 touches")]
    EmptySequence,

    #[error("Touch number {0} is out of range (1-3)")]
    TouchNumberOutOfRange(i64),

    #[error("ICP score {0} is out of range (0-100)")]
    IcpScoreOutOfRange(i64),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
}

impl DbError {
    /// True for errors caused by a bad dedup key. Nothing was written.
    pub fn is_identity_error(&self) -> bool {
        matches!(self, DbError::InvalidIdentity { .. })
    }

    /// True for rejected writes that would have violated a safety rule.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            DbError::InvalidSource(_)
                | DbError::InvalidClassification(_)
                | DbError::InvalidStatus(_)
                | DbError::TransitionNotAllowed { .. }
                | DbError::CallPermissionMissing { .. }
                | DbError::TouchNotSendable { .. }
                | DbError::EmptySequence
                | DbError::TouchNumberOutOfRange(_)
                | DbError::IcpScoreOutOfRange(_)
        )
    }

    /// True when the store itself was unreachable or failed mid-operation.
    /// Pre-flight readers treat this as soft; writers must not claim success.
    pub fn is_connectivity_error(&self) -> bool {
        matches!(
            self,
            DbError::Sqlite(_) | DbError::HomeDirNotFound | DbError::CreateDir(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_predicates() {
        let identity = DbError::InvalidIdentity {
            field: "domain",
            value: "".to_string(),
        };
        assert!(identity.is_identity_error());
        assert!(!identity.is_invariant_violation());

        let gate = DbError::CallPermissionMissing {
            org_id: "org-1".to_string(),
        };
        assert!(gate.is_invariant_violation());
        assert!(!gate.is_connectivity_error());

        let conn = DbError::HomeDirNotFound;
        assert!(conn.is_connectivity_error());
        assert!(!conn.is_invariant_violation());
    }
}
