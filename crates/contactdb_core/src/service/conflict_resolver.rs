//! Field-level conflict detection between merge candidates.
//!
//! # Responsibility
//! - Decide, per mergeable field, whether the primary's value stands, is
//!   combined with the secondaries' values, or needs an explicit choice.
//! - Build the merged primary once choices are supplied.
//!
//! # Invariants
//! - Pure: no I/O, no clock, deterministic for the same inputs.
//! - A scalar field is a conflict iff some secondary holds a non-empty value
//!   that differs from the primary's (unless the policy fills an empty
//!   primary from agreeing secondaries).
//! - List fields never become conflicts; their merged value keeps the
//!   primary's items first, then each secondary's new items in candidate
//!   order.

use crate::model::contact::{Contact, ContactId};
use crate::model::field::{ContactField, FieldKindMismatch, FieldValue, MergeStrategy};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Knobs for automatic resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionPolicy {
    /// Fill an empty primary value when every non-empty secondary value
    /// agrees, instead of asking.
    pub fill_empty_from_secondary: bool,
}

/// A secondary's value for a conflicting field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateValue {
    pub contact_id: ContactId,
    pub value: FieldValue,
}

/// A scalar field that needs an explicit choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldConflict {
    pub field: ContactField,
    pub primary_value: FieldValue,
    /// One entry per secondary, in candidate order.
    pub secondary_values: Vec<CandidateValue>,
}

/// Display-only union of a list field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListUnion {
    pub field: ContactField,
    pub merged: Vec<String>,
    /// Items contributed by secondaries.
    pub added: usize,
}

/// Full resolution of every mergeable field for one primary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldResolution {
    /// Scalar fields settled without a choice.
    pub auto_resolved: BTreeMap<ContactField, FieldValue>,
    pub conflicts: Vec<FieldConflict>,
    pub list_unions: Vec<ListUnion>,
}

impl FieldResolution {
    pub fn conflict_fields(&self) -> Vec<ContactField> {
        self.conflicts.iter().map(|conflict| conflict.field).collect()
    }

    /// Applies auto-resolved values, list unions and `choices` onto a copy
    /// of `primary`. Choices for fields outside the conflict list are
    /// ignored.
    pub fn merged_contact(
        &self,
        primary: &Contact,
        choices: &BTreeMap<ContactField, FieldValue>,
    ) -> Result<Contact, FieldKindMismatch> {
        let mut merged = primary.clone();
        for (field, value) in &self.auto_resolved {
            field.write(&mut merged, value.clone())?;
        }
        for union in &self.list_unions {
            union
                .field
                .write(&mut merged, FieldValue::List(union.merged.clone()))?;
        }
        for conflict in &self.conflicts {
            if let Some(value) = choices.get(&conflict.field) {
                conflict.field.write(&mut merged, value.clone())?;
            }
        }
        Ok(merged)
    }
}

/// Lists the scalar fields requiring an explicit choice.
pub fn diff(primary: &Contact, secondaries: &[Contact]) -> Vec<FieldConflict> {
    resolve_fields(primary, secondaries, ResolutionPolicy::default()).conflicts
}

/// Resolves every mergeable field of `primary` against `secondaries`.
pub fn resolve_fields(
    primary: &Contact,
    secondaries: &[Contact],
    policy: ResolutionPolicy,
) -> FieldResolution {
    let mut resolution = FieldResolution::default();

    for field in ContactField::ALL {
        match field.strategy() {
            MergeStrategy::ListUnion => {
                resolution
                    .list_unions
                    .push(union_list(field, primary, secondaries));
            }
            MergeStrategy::ScalarOverride => {
                let primary_value = field.read(primary);
                let secondary_values: Vec<CandidateValue> = secondaries
                    .iter()
                    .map(|secondary| CandidateValue {
                        contact_id: secondary.id,
                        value: field.read(secondary),
                    })
                    .collect();

                match settle_scalar(&primary_value, &secondary_values, policy) {
                    Some(value) => {
                        resolution.auto_resolved.insert(field, value);
                    }
                    None => resolution.conflicts.push(FieldConflict {
                        field,
                        primary_value,
                        secondary_values,
                    }),
                }
            }
        }
    }

    resolution
}

// `None` means the field needs a choice.
fn settle_scalar(
    primary: &FieldValue,
    secondaries: &[CandidateValue],
    policy: ResolutionPolicy,
) -> Option<FieldValue> {
    let mut distinct: Vec<&FieldValue> = Vec::new();
    for candidate in secondaries {
        if candidate.value.is_empty() || same_value(&candidate.value, primary) {
            continue;
        }
        if !distinct.iter().any(|seen| same_value(seen, &candidate.value)) {
            distinct.push(&candidate.value);
        }
    }

    match distinct.as_slice() {
        [] => Some(primary.clone()),
        [only] if policy.fill_empty_from_secondary && primary.is_empty() => Some((*only).clone()),
        _ => None,
    }
}

// Text compares on trimmed content so trailing whitespace is not a conflict.
fn same_value(left: &FieldValue, right: &FieldValue) -> bool {
    match (left, right) {
        (FieldValue::Text(left), FieldValue::Text(right)) => left.trim() == right.trim(),
        _ => left == right,
    }
}

fn union_list(field: ContactField, primary: &Contact, secondaries: &[Contact]) -> ListUnion {
    let mut merged = Vec::new();
    let mut seen = HashSet::new();
    push_new_items(&mut merged, &mut seen, field.read(primary));
    let from_primary = merged.len();

    for secondary in secondaries {
        push_new_items(&mut merged, &mut seen, field.read(secondary));
    }

    ListUnion {
        field,
        added: merged.len() - from_primary,
        merged,
    }
}

fn push_new_items(merged: &mut Vec<String>, seen: &mut HashSet<String>, value: FieldValue) {
    if let FieldValue::List(items) = value {
        for item in items {
            let item = item.trim().to_string();
            if !item.is_empty() && seen.insert(item.clone()) {
                merged.push(item);
            }
        }
    }
}
