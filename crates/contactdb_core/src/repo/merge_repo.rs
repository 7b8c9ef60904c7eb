//! Record store boundary used by the merge engine, and its SQLite
//! implementation.
//!
//! # Responsibility
//! - Expose the reads the engine needs to plan a merge.
//! - Lock candidate contacts for the duration of one commit.
//! - Apply one merge (field writes, chain collapsing, reference rewrites,
//!   secondary marking) as a single transaction.
//!
//! # Invariants
//! - `apply_merge` is all-or-nothing: any error drops the transaction,
//!   which rolls back every write made so far.
//! - Every candidate is re-read inside the transaction; a revision that
//!   moved since the plan was built fails with `StaleContact`.
//! - After `apply_merge` commits, no contact's `main_contact` points at a
//!   secondary.

use crate::db::DbError;
use crate::model::contact::{Contact, ContactId};
use crate::repo::contact_repo::{load_contact, update_descriptive_fields, RepoError, RepoResult};
use crate::repo::lock_repo::{LockToken, SqliteLockRepository};
use crate::repo::reference_repo::{
    list_redirects_to, list_references_to, rewrite_references, ContactReference, RewriteSummary,
};
use log::debug;
use rusqlite::{params, Connection, Transaction, TransactionBehavior};
use std::time::Duration;

/// One merge, ready to be committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeCommit {
    /// The primary with merged field values. `revision` is the revision the
    /// plan was built against.
    pub primary: Contact,
    /// Secondary ids with the revision the plan was built against.
    pub secondaries: Vec<(ContactId, i64)>,
}

impl MergeCommit {
    pub fn secondary_ids(&self) -> Vec<ContactId> {
        self.secondaries.iter().map(|(id, _)| *id).collect()
    }
}

/// Result of a committed merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeApplied {
    /// The primary as persisted after the commit.
    pub primary: Contact,
    pub rewrites: RewriteSummary,
}

/// Storage operations the merge engine depends on.
pub trait MergeStore {
    fn load_contact(&self, id: ContactId) -> RepoResult<Option<Contact>>;
    fn list_references_to(&self, id: ContactId) -> RepoResult<Vec<ContactReference>>;
    /// Contacts whose `main_contact` is one of `ids`.
    fn list_chain_members(&self, ids: &[ContactId]) -> RepoResult<Vec<ContactId>>;
    fn acquire_locks(&self, ids: &[ContactId]) -> RepoResult<LockToken>;
    fn release_locks(&self, token: &LockToken) -> RepoResult<()>;
    fn apply_merge(&self, commit: &MergeCommit) -> RepoResult<MergeApplied>;
}

/// SQLite-backed merge store.
pub struct SqliteMergeStore<'conn> {
    conn: &'conn Connection,
    locks: SqliteLockRepository<'conn>,
}

impl<'conn> SqliteMergeStore<'conn> {
    pub fn new(conn: &'conn Connection, lock_ttl: Duration) -> Self {
        Self {
            conn,
            locks: SqliteLockRepository::new(conn, lock_ttl),
        }
    }
}

impl MergeStore for SqliteMergeStore<'_> {
    fn load_contact(&self, id: ContactId) -> RepoResult<Option<Contact>> {
        load_contact(self.conn, id)
    }

    fn list_references_to(&self, id: ContactId) -> RepoResult<Vec<ContactReference>> {
        list_references_to(self.conn, id)
    }

    fn list_chain_members(&self, ids: &[ContactId]) -> RepoResult<Vec<ContactId>> {
        list_redirects_to(self.conn, ids)
    }

    fn acquire_locks(&self, ids: &[ContactId]) -> RepoResult<LockToken> {
        self.locks.acquire(ids)
    }

    fn release_locks(&self, token: &LockToken) -> RepoResult<()> {
        self.locks.release(token).map(|_| ())
    }

    fn apply_merge(&self, commit: &MergeCommit) -> RepoResult<MergeApplied> {
        let primary_id = commit.primary.id;
        let secondary_ids = commit.secondary_ids();

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)
            .map_err(|err| {
                let err = DbError::Sqlite(err);
                if err.is_busy() {
                    let mut held = vec![primary_id];
                    held.extend(secondary_ids.iter().copied());
                    RepoError::LockUnavailable { held }
                } else {
                    RepoError::Db(err)
                }
            })?;

        ensure_current(&tx, primary_id, commit.primary.revision)?;
        for (secondary_id, revision) in &commit.secondaries {
            ensure_current(&tx, *secondary_id, *revision)?;
        }

        update_descriptive_fields(&tx, &commit.primary)?;
        let rewrites = rewrite_references(&tx, primary_id, &secondary_ids)?;

        for secondary_id in &secondary_ids {
            let changed = tx.execute(
                "UPDATE contacts
                 SET is_secondary = 1,
                     main_contact_id = ?1,
                     revision = revision + 1,
                     updated_at = (strftime('%s', 'now') * 1000)
                 WHERE id = ?2
                   AND is_secondary = 0;",
                params![primary_id.to_string(), secondary_id.to_string()],
            )?;
            if changed != 1 {
                return Err(RepoError::StaleContact(*secondary_id));
            }
        }

        ensure_no_chains(&tx, &secondary_ids)?;

        let primary = load_contact(&tx, primary_id)?.ok_or(RepoError::NotFound(primary_id))?;
        tx.commit()?;

        debug!(
            "event=merge_apply module=repo status=ok secondaries={} moved={} deduplicated={}",
            secondary_ids.len(),
            rewrites.total_moved(),
            rewrites.total_deduplicated()
        );
        Ok(MergeApplied { primary, rewrites })
    }
}

fn ensure_current(conn: &Connection, id: ContactId, expected_revision: i64) -> RepoResult<()> {
    let contact = load_contact(conn, id)?.ok_or(RepoError::NotFound(id))?;
    if contact.is_secondary {
        return Err(RepoError::AlreadySecondary(id));
    }
    if contact.revision != expected_revision {
        return Err(RepoError::StaleContact(id));
    }
    Ok(())
}

// Every secondary of this merge is now secondary itself, so nothing may
// still redirect through it.
fn ensure_no_chains(conn: &Connection, secondary_ids: &[ContactId]) -> RepoResult<()> {
    for secondary_id in secondary_ids {
        let chained: i64 = conn.query_row(
            "SELECT COUNT(*) FROM contacts WHERE main_contact_id = ?1;",
            [secondary_id.to_string()],
            |row| row.get(0),
        )?;
        if chained != 0 {
            return Err(RepoError::InvalidData(format!(
                "{chained} contact(s) still redirect through secondary {secondary_id}"
            )));
        }
    }
    Ok(())
}
