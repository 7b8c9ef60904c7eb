//! Possible-duplicate detection over live contacts.
//!
//! # Responsibility
//! - Group primary contacts that share a normalized name or email address.
//! - Persist dismissals so reviewed groups stop surfacing as pending.
//!
//! # Invariants
//! - Only non-secondary contacts take part; merged stubs never reappear.
//! - A group holds at least two distinct contacts. One contact repeating a
//!   value (e.g. case-variant emails) is not a duplicate of itself.
//! - Contacts sharing several values form one group per contact set.
//! - A dismissal is keyed by the exact contact set; a set that later gains
//!   or loses a member surfaces again.

use crate::model::contact::ContactId;
use crate::repo::contact_repo::{parse_list, parse_uuid, RepoError, RepoResult};
use rusqlite::{params, Connection, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Contact attribute two contacts were found to share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateField {
    Email,
    Name,
}

impl DuplicateField {
    /// Prefix used in `DuplicateGroup::duplicate_values`.
    pub fn label(self) -> &'static str {
        match self {
            Self::Email => "Email",
            Self::Name => "Name",
        }
    }
}

/// Contacts sharing one or more normalized values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    /// Sorted ascending; also the dismissal key.
    pub contact_ids: Vec<ContactId>,
    /// One entry per shared value, aligned with `duplicate_values`.
    pub duplicate_fields: Vec<DuplicateField>,
    /// `"<Label>: <normalized value>"`, sorted.
    pub duplicate_values: Vec<String>,
    pub is_dismissed: bool,
}

impl DuplicateGroup {
    pub fn key(&self) -> String {
        group_key(&self.contact_ids)
    }
}

/// Repository interface for duplicate review.
pub trait DuplicateRepository {
    /// Lists every duplicate group, most shared values first, then largest.
    fn find_possible_duplicates(&self) -> RepoResult<Vec<DuplicateGroup>>;
    /// Number of groups not dismissed yet.
    fn count_pending(&self) -> RepoResult<usize>;
    /// Dismisses the group made of exactly `contact_ids`.
    ///
    /// Returns `false` when the group was already dismissed.
    fn dismiss_duplicate(&self, contact_ids: &[ContactId]) -> RepoResult<bool>;
    /// Dismisses several groups in one transaction and returns how many were
    /// newly dismissed.
    fn dismiss_duplicates(&self, groups: &[DuplicateGroup]) -> RepoResult<usize>;
}

/// SQLite-backed duplicate repository.
pub struct SqliteDuplicateRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteDuplicateRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn dismissed_keys(&self) -> RepoResult<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT contact_ids FROM dismissed_duplicates;")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(keys)
    }
}

impl DuplicateRepository for SqliteDuplicateRepository<'_> {
    fn find_possible_duplicates(&self) -> RepoResult<Vec<DuplicateGroup>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, first_name, last_name, emails
             FROM contacts
             WHERE is_secondary = 0
             ORDER BY id ASC;",
        )?;
        let mut rows = stmt.query([])?;

        let mut shared: BTreeMap<(DuplicateField, String), BTreeSet<ContactId>> = BTreeMap::new();
        while let Some(row) = rows.next()? {
            let id_text: String = row.get("id")?;
            let id = parse_uuid(&id_text, "contacts.id")?;
            let first_name: String = row.get("first_name")?;
            let last_name: String = row.get("last_name")?;

            if let Some(name) = normalized_name(&first_name, &last_name) {
                shared
                    .entry((DuplicateField::Name, name))
                    .or_default()
                    .insert(id);
            }
            for email in parse_list(row, "emails")? {
                let email = normalize(&email);
                if !email.is_empty() {
                    shared
                        .entry((DuplicateField::Email, email))
                        .or_default()
                        .insert(id);
                }
            }
        }

        // BTreeMap order keeps each group's values sorted.
        let mut by_contacts: BTreeMap<Vec<ContactId>, Vec<(DuplicateField, String)>> =
            BTreeMap::new();
        for ((field, value), ids) in shared {
            if ids.len() < 2 {
                continue;
            }
            by_contacts
                .entry(ids.into_iter().collect())
                .or_default()
                .push((field, value));
        }

        let dismissed = self.dismissed_keys()?;
        let mut groups: Vec<DuplicateGroup> = by_contacts
            .into_iter()
            .map(|(contact_ids, values)| DuplicateGroup {
                is_dismissed: dismissed.contains(&group_key(&contact_ids)),
                duplicate_fields: values.iter().map(|(field, _)| *field).collect(),
                duplicate_values: values
                    .iter()
                    .map(|(field, value)| format!("{}: {value}", field.label()))
                    .collect(),
                contact_ids,
            })
            .collect();
        groups.sort_by(|left, right| {
            right
                .duplicate_values
                .len()
                .cmp(&left.duplicate_values.len())
                .then(right.contact_ids.len().cmp(&left.contact_ids.len()))
                .then_with(|| left.duplicate_values.cmp(&right.duplicate_values))
        });
        Ok(groups)
    }

    fn count_pending(&self) -> RepoResult<usize> {
        Ok(self
            .find_possible_duplicates()?
            .iter()
            .filter(|group| !group.is_dismissed)
            .count())
    }

    fn dismiss_duplicate(&self, contact_ids: &[ContactId]) -> RepoResult<bool> {
        let key = dismissal_key(contact_ids)?;
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO dismissed_duplicates (contact_ids) VALUES (?1);",
            params![key],
        )?;
        Ok(inserted == 1)
    }

    fn dismiss_duplicates(&self, groups: &[DuplicateGroup]) -> RepoResult<usize> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let mut dismissed = 0;
        for group in groups {
            let key = dismissal_key(&group.contact_ids)?;
            dismissed += tx.execute(
                "INSERT OR IGNORE INTO dismissed_duplicates (contact_ids) VALUES (?1);",
                params![key],
            )?;
        }
        tx.commit()?;
        Ok(dismissed)
    }
}

fn dismissal_key(contact_ids: &[ContactId]) -> RepoResult<String> {
    let ids: Vec<ContactId> = contact_ids
        .iter()
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if ids.len() < 2 {
        return Err(RepoError::InvalidDuplicateGroup(format!(
            "need at least two distinct contacts, got {}",
            ids.len()
        )));
    }
    Ok(group_key(&ids))
}

// Expects `ids` sorted.
fn group_key(ids: &[ContactId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

fn normalized_name(first_name: &str, last_name: &str) -> Option<String> {
    let first_name = normalize(first_name);
    let last_name = normalize(last_name);
    if first_name.is_empty() && last_name.is_empty() {
        return None;
    }
    Some(format!("{first_name} {last_name}"))
}

#[cfg(test)]
mod tests {
    use super::{dismissal_key, normalized_name, DuplicateField};
    use crate::repo::contact_repo::RepoError;
    use uuid::Uuid;

    #[test]
    fn names_compare_trimmed_and_lowercased() {
        assert_eq!(
            normalized_name(" Jane ", "EYRE"),
            Some("jane eyre".to_string())
        );
        assert_eq!(normalized_name("", "  "), None);
    }

    #[test]
    fn dismissal_key_ignores_order_and_repeats() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(
            dismissal_key(&[b, a, b]).unwrap(),
            dismissal_key(&[a, b]).unwrap()
        );
        assert!(matches!(
            dismissal_key(&[a, a]),
            Err(RepoError::InvalidDuplicateGroup(_))
        ));
    }

    #[test]
    fn email_sorts_before_name() {
        assert!(DuplicateField::Email < DuplicateField::Name);
        assert!(DuplicateField::Email.label() < DuplicateField::Name.label());
    }
}
