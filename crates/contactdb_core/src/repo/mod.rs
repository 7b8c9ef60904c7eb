//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts.
//! - Isolate SQLite query details from merge orchestration.
//!
//! # Invariants
//! - Repository writes must enforce `Contact::validate()` before persistence.
//! - Repository APIs return semantic errors (`NotFound`, `StaleContact`,
//!   `LockUnavailable`) in addition to DB transport errors.
//! - Every table holding a contact id as a foreign key is listed in
//!   `reference_repo::REFERENCE_TABLES`. `merge_locks` and
//!   `dismissed_duplicates` hold ids as opaque keys and are not rewritten.

pub mod contact_repo;
pub mod duplicate_repo;
pub mod lock_repo;
pub mod merge_repo;
pub mod reference_repo;
