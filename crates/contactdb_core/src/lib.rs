//! Core domain logic for the contact database merge engine.
//! This crate is the single source of truth for merge invariants.

pub mod api;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use api::{
    MergeApi, MergeFailure, MergeOutcome, SubmitCandidatesRequest, SubmitCandidatesResponse,
    SubmitResolutionRequest,
};
pub use config::{ConfigError, CoreConfig, LoggingConfig, MergeConfig};
pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use logging::{
    default_log_level, init_logging, init_logging_from_config, logging_status, LoggingError,
};
pub use model::contact::{Contact, ContactId, ContactValidationError};
pub use model::field::{ContactField, FieldKind, FieldValue, MergeStrategy};
pub use model::organization::{Organization, OrganizationId};
pub use repo::contact_repo::{ContactRepository, RepoError, RepoResult, SqliteContactRepository};
pub use repo::duplicate_repo::{
    DuplicateField, DuplicateGroup, DuplicateRepository, SqliteDuplicateRepository,
};
pub use repo::merge_repo::{MergeApplied, MergeCommit, MergeStore, SqliteMergeStore};
pub use repo::reference_repo::{ContactReference, ReferenceEntity, RewriteSummary};
pub use service::conflict_resolver::{
    diff, resolve_fields, FieldConflict, FieldResolution, ListUnion, ResolutionPolicy,
};
pub use service::merge_engine::{
    FieldResolutions, MergeEngine, MergeError, MergePlan, MergeResult,
};
pub use service::merge_session::{MergeSession, MergeState, SessionId};

/// Merge engine crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Schema version `open_db` migrates a database to.
pub fn schema_version() -> u32 {
    db::migrations::latest_version()
}
