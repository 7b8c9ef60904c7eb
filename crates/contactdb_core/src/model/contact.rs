//! Contact domain model.
//!
//! # Responsibility
//! - Define the canonical person record that duplicates are merged into.
//! - Provide lifecycle helpers for the primary/secondary redirect state.
//!
//! # Invariants
//! - `id` is stable and never reused for another contact.
//! - `main_contact` is `Some` exactly when `is_secondary` is true.
//! - A secondary's `main_contact` is never the contact itself, and never
//!   another secondary (enforced by the merge commit, which collapses chains).

use crate::model::organization::OrganizationId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier for a contact, primary or secondary.
pub type ContactId = Uuid;

/// Canonical person record.
///
/// Descriptive fields are the ones a merge reconciles; see
/// [`crate::model::field::ContactField`] for the per-field merge strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub organization: Option<OrganizationId>,
    pub title: String,
    pub honorific: String,
    pub first_name: String,
    pub last_name: String,
    pub designation: String,
    pub department: String,
    pub affiliation: String,
    pub primary_lang: String,
    pub notes: String,
    pub address: String,
    pub city: String,
    pub country: String,
    pub postal_code: String,
    /// ISO `YYYY-MM-DD`, empty when unknown.
    pub birth_date: String,
    pub org_head: bool,
    pub focal_point: bool,
    pub is_in_mailing_list: bool,
    pub phones: Vec<String>,
    pub mobiles: Vec<String>,
    pub faxes: Vec<String>,
    pub emails: Vec<String>,
    pub email_ccs: Vec<String>,
    /// True once this contact has been merged into another one.
    pub is_secondary: bool,
    /// The live primary that absorbed this contact.
    pub main_contact: Option<ContactId>,
    /// Bumped by the store on every write. Merge plans remember it to detect
    /// edits made between proposal and commit.
    pub revision: i64,
}

/// Validation failures for persisted or to-be-persisted contacts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContactValidationError {
    #[error("secondary contact {0} has no main contact")]
    SecondaryWithoutMain(ContactId),
    #[error("primary contact {0} must not have a main contact")]
    PrimaryWithMain(ContactId),
    #[error("contact {0} cannot be its own main contact")]
    SelfReference(ContactId),
}

impl Contact {
    /// Creates an empty primary contact with a generated stable ID.
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), first_name, last_name)
    }

    /// Creates an empty primary contact with a caller-provided ID.
    ///
    /// Used by import paths where identity already exists externally.
    pub fn with_id(
        id: ContactId,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
    ) -> Self {
        Self {
            id,
            organization: None,
            title: String::new(),
            honorific: String::new(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            designation: String::new(),
            department: String::new(),
            affiliation: String::new(),
            primary_lang: String::new(),
            notes: String::new(),
            address: String::new(),
            city: String::new(),
            country: String::new(),
            postal_code: String::new(),
            birth_date: String::new(),
            org_head: false,
            focal_point: false,
            is_in_mailing_list: false,
            phones: Vec::new(),
            mobiles: Vec::new(),
            faxes: Vec::new(),
            emails: Vec::new(),
            email_ccs: Vec::new(),
            is_secondary: false,
            main_contact: None,
            revision: 0,
        }
    }

    /// Human-readable name used in listings and log-free UI messages.
    pub fn display_name(&self) -> String {
        match (self.first_name.trim(), self.last_name.trim()) {
            ("", "") => String::new(),
            (first, "") => first.to_string(),
            ("", last) => last.to_string(),
            (first, last) => format!("{first} {last}"),
        }
    }

    /// Returns the contact that is live for this record: itself when
    /// primary, its `main_contact` otherwise.
    ///
    /// No traversal is needed because chains are collapsed at commit time.
    pub fn live_id(&self) -> ContactId {
        self.main_contact.unwrap_or(self.id)
    }

    /// Checks the primary/secondary invariants.
    pub fn validate(&self) -> Result<(), ContactValidationError> {
        match (self.is_secondary, self.main_contact) {
            (true, None) => Err(ContactValidationError::SecondaryWithoutMain(self.id)),
            (false, Some(_)) => Err(ContactValidationError::PrimaryWithMain(self.id)),
            (true, Some(main)) if main == self.id => {
                Err(ContactValidationError::SelfReference(self.id))
            }
            _ => Ok(()),
        }
    }
}
