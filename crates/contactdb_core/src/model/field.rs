//! Typed descriptors for mergeable contact fields.
//!
//! # Responsibility
//! - Enumerate every contact field a merge reconciles.
//! - Declare per field whether disagreeing values need an explicit choice
//!   (`ScalarOverride`) or are combined (`ListUnion`).
//! - Read and write field values on a `Contact` without reflection.
//!
//! # Invariants
//! - `ContactField::ALL` lists every descriptive field exactly once.
//! - `ContactField::write` only accepts a `FieldValue` of the field's kind.

use crate::model::contact::Contact;
use crate::model::organization::OrganizationId;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// How a merge combines the values of one field across candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Single value; a non-empty disagreement must be resolved by a choice.
    ScalarOverride,
    /// Multi-valued; the merged value is the de-duplicated union.
    ListUnion,
}

/// Shape of the values a field holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Flag,
    Organization,
    List,
}

/// One value of one contact field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Flag(bool),
    Organization(Option<OrganizationId>),
    List(Vec<String>),
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            Self::Text(_) => FieldKind::Text,
            Self::Flag(_) => FieldKind::Flag,
            Self::Organization(_) => FieldKind::Organization,
            Self::List(_) => FieldKind::List,
        }
    }

    /// Empty values never override a set value. Flags are never empty.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(value) => value.trim().is_empty(),
            Self::Flag(_) => false,
            Self::Organization(value) => value.is_none(),
            Self::List(items) => items.is_empty(),
        }
    }
}

/// A kind mismatch between a field and a value supplied for it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("field `{field}` expects a {expected:?} value, got {actual:?}")]
pub struct FieldKindMismatch {
    pub field: ContactField,
    pub expected: FieldKind,
    pub actual: FieldKind,
}

/// Mergeable contact field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactField {
    Organization,
    Title,
    Honorific,
    FirstName,
    LastName,
    Designation,
    Department,
    Affiliation,
    PrimaryLang,
    Notes,
    Address,
    City,
    Country,
    PostalCode,
    BirthDate,
    OrgHead,
    FocalPoint,
    IsInMailingList,
    Phones,
    Mobiles,
    Faxes,
    Emails,
    EmailCcs,
}

impl ContactField {
    pub const ALL: [ContactField; 23] = [
        Self::Organization,
        Self::Title,
        Self::Honorific,
        Self::FirstName,
        Self::LastName,
        Self::Designation,
        Self::Department,
        Self::Affiliation,
        Self::PrimaryLang,
        Self::Notes,
        Self::Address,
        Self::City,
        Self::Country,
        Self::PostalCode,
        Self::BirthDate,
        Self::OrgHead,
        Self::FocalPoint,
        Self::IsInMailingList,
        Self::Phones,
        Self::Mobiles,
        Self::Faxes,
        Self::Emails,
        Self::EmailCcs,
    ];

    /// Stable snake_case name, shared by the wire format and the
    /// `contacts` table column (except `organization` -> `organization_id`).
    pub fn name(self) -> &'static str {
        match self {
            Self::Organization => "organization",
            Self::Title => "title",
            Self::Honorific => "honorific",
            Self::FirstName => "first_name",
            Self::LastName => "last_name",
            Self::Designation => "designation",
            Self::Department => "department",
            Self::Affiliation => "affiliation",
            Self::PrimaryLang => "primary_lang",
            Self::Notes => "notes",
            Self::Address => "address",
            Self::City => "city",
            Self::Country => "country",
            Self::PostalCode => "postal_code",
            Self::BirthDate => "birth_date",
            Self::OrgHead => "org_head",
            Self::FocalPoint => "focal_point",
            Self::IsInMailingList => "is_in_mailing_list",
            Self::Phones => "phones",
            Self::Mobiles => "mobiles",
            Self::Faxes => "faxes",
            Self::Emails => "emails",
            Self::EmailCcs => "email_ccs",
        }
    }

    /// Parses a field from its stable name.
    pub fn from_name(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|field| field.name() == value.trim())
    }

    pub fn kind(self) -> FieldKind {
        match self {
            Self::Organization => FieldKind::Organization,
            Self::OrgHead | Self::FocalPoint | Self::IsInMailingList => FieldKind::Flag,
            Self::Phones | Self::Mobiles | Self::Faxes | Self::Emails | Self::EmailCcs => {
                FieldKind::List
            }
            _ => FieldKind::Text,
        }
    }

    pub fn strategy(self) -> MergeStrategy {
        match self.kind() {
            FieldKind::List => MergeStrategy::ListUnion,
            FieldKind::Text | FieldKind::Flag | FieldKind::Organization => {
                MergeStrategy::ScalarOverride
            }
        }
    }

    /// Reads this field from a contact.
    pub fn read(self, contact: &Contact) -> FieldValue {
        match self {
            Self::Organization => FieldValue::Organization(contact.organization),
            Self::OrgHead => FieldValue::Flag(contact.org_head),
            Self::FocalPoint => FieldValue::Flag(contact.focal_point),
            Self::IsInMailingList => FieldValue::Flag(contact.is_in_mailing_list),
            Self::Phones => FieldValue::List(contact.phones.clone()),
            Self::Mobiles => FieldValue::List(contact.mobiles.clone()),
            Self::Faxes => FieldValue::List(contact.faxes.clone()),
            Self::Emails => FieldValue::List(contact.emails.clone()),
            Self::EmailCcs => FieldValue::List(contact.email_ccs.clone()),
            text => FieldValue::Text(text.text_ref(contact).clone()),
        }
    }

    /// Writes a value into this field of a contact.
    pub fn write(self, contact: &mut Contact, value: FieldValue) -> Result<(), FieldKindMismatch> {
        let actual = value.kind();
        match (self, value) {
            (Self::Organization, FieldValue::Organization(value)) => contact.organization = value,
            (Self::OrgHead, FieldValue::Flag(value)) => contact.org_head = value,
            (Self::FocalPoint, FieldValue::Flag(value)) => contact.focal_point = value,
            (Self::IsInMailingList, FieldValue::Flag(value)) => contact.is_in_mailing_list = value,
            (Self::Phones, FieldValue::List(items)) => contact.phones = items,
            (Self::Mobiles, FieldValue::List(items)) => contact.mobiles = items,
            (Self::Faxes, FieldValue::List(items)) => contact.faxes = items,
            (Self::Emails, FieldValue::List(items)) => contact.emails = items,
            (Self::EmailCcs, FieldValue::List(items)) => contact.email_ccs = items,
            (field, FieldValue::Text(value)) if field.kind() == FieldKind::Text => {
                *field.text_mut(contact) = value;
            }
            (field, _) => {
                return Err(FieldKindMismatch {
                    field,
                    expected: field.kind(),
                    actual,
                })
            }
        }
        Ok(())
    }

    // Callers guarantee `self.kind() == FieldKind::Text`.
    fn text_ref(self, contact: &Contact) -> &String {
        match self {
            Self::Title => &contact.title,
            Self::Honorific => &contact.honorific,
            Self::FirstName => &contact.first_name,
            Self::LastName => &contact.last_name,
            Self::Designation => &contact.designation,
            Self::Department => &contact.department,
            Self::Affiliation => &contact.affiliation,
            Self::PrimaryLang => &contact.primary_lang,
            Self::Address => &contact.address,
            Self::City => &contact.city,
            Self::Country => &contact.country,
            Self::PostalCode => &contact.postal_code,
            Self::BirthDate => &contact.birth_date,
            _ => &contact.notes,
        }
    }

    fn text_mut(self, contact: &mut Contact) -> &mut String {
        match self {
            Self::Title => &mut contact.title,
            Self::Honorific => &mut contact.honorific,
            Self::FirstName => &mut contact.first_name,
            Self::LastName => &mut contact.last_name,
            Self::Designation => &mut contact.designation,
            Self::Department => &mut contact.department,
            Self::Affiliation => &mut contact.affiliation,
            Self::PrimaryLang => &mut contact.primary_lang,
            Self::Address => &mut contact.address,
            Self::City => &mut contact.city,
            Self::Country => &mut contact.country,
            Self::PostalCode => &mut contact.postal_code,
            Self::BirthDate => &mut contact.birth_date,
            _ => &mut contact.notes,
        }
    }
}

impl Display for ContactField {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
