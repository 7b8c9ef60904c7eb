//! Domain model for contacts and the organizations they belong to.
//!
//! # Responsibility
//! - Define canonical data structures used by the merge engine.
//! - Declare, per mergeable contact field, how a merge combines values.
//!
//! # Invariants
//! - Every contact is identified by a stable `ContactId`.
//! - Contacts are never physically deleted; merged contacts stay as
//!   secondary redirect stubs.

pub mod contact;
pub mod field;
pub mod organization;
