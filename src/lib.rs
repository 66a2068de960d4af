//! leadflow: persistence and gating engine for an outbound sales pipeline.
//!
//! The crate is the system of record between AI collaborators: everything
//! they produce passes through here, where dedup keys, the stage machine,
//! the suppression list, and the call-permission gate are enforced before
//! anything is stored or acted on.

pub mod config;
pub mod db;
pub mod error;
pub mod migrations;
pub mod orchestrator;
pub mod providers;
pub mod stage;
pub mod types;

pub use db::PipelineDb;
pub use error::DbError;
pub use orchestrator::{Orchestrator, RunReport};
pub use stage::PipelineStage;
