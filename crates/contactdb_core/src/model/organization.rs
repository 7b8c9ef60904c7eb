//! Organization domain model.
//!
//! Organizations are referenced by `Contact::organization`. A merge may
//! change which organization the primary contact points at, but never
//! modifies organization rows.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type OrganizationId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    pub acronym: String,
    pub country: String,
}

impl Organization {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            acronym: String::new(),
            country: String::new(),
        }
    }
}
