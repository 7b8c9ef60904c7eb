//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into the merge workflow.
//! - Keep API/CLI layers decoupled from storage details.

pub mod conflict_resolver;
pub mod merge_engine;
pub mod merge_session;
