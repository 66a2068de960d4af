//! Database location resolution.
//!
//! The store lives at `~/.leadflow/leadflow.db` by default. Setting the
//! `LEADFLOW_DB` environment variable points the engine at an explicit file,
//! which is how integration environments isolate their data.

use std::path::PathBuf;

use crate::error::DbError;

/// Resolve the database path: `LEADFLOW_DB` override, else the home default.
pub fn db_path() -> Result<PathBuf, DbError> {
    if let Ok(path) = std::env::var("LEADFLOW_DB") {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
    Ok(home.join(".leadflow").join("leadflow.db"))
}
