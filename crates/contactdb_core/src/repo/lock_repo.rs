//! Merge locks over contact ids.
//!
//! # Responsibility
//! - Give one merge commit exclusive ownership of a set of contact ids
//!   across connections and processes sharing the database file.
//! - Reclaim locks left behind by a crashed commit.
//!
//! # Invariants
//! - A contact id is held by at most one lock token (`merge_locks` primary
//!   key).
//! - Acquisition is all-or-nothing and never waits past the connection busy
//!   timeout: contention is reported as `RepoError::LockUnavailable`.
//! - Locks older than the configured TTL are treated as abandoned.

use crate::db::DbError;
use crate::model::contact::ContactId;
use crate::repo::contact_repo::{parse_uuid, RepoError, RepoResult};
use log::{debug, warn};
use rusqlite::{params, Connection, Transaction, TransactionBehavior};
use std::time::Duration;
use uuid::Uuid;

/// Opaque handle returned by a successful acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

/// SQLite-backed merge lock table.
pub struct SqliteLockRepository<'conn> {
    conn: &'conn Connection,
    ttl: Duration,
}

impl<'conn> SqliteLockRepository<'conn> {
    pub fn new(conn: &'conn Connection, ttl: Duration) -> Self {
        Self { conn, ttl }
    }

    /// Locks every id in `contact_ids` for one commit, or none of them.
    pub fn acquire(&self, contact_ids: &[ContactId]) -> RepoResult<LockToken> {
        let token = LockToken(Uuid::new_v4().to_string());
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)
            .map_err(|err| busy_as_unavailable(err, contact_ids))?;

        let reclaimed = tx.execute(
            "DELETE FROM merge_locks
             WHERE acquired_at < (strftime('%s', 'now') * 1000) - ?1;",
            [ttl_millis(self.ttl)],
        )?;
        if reclaimed > 0 {
            warn!("event=merge_lock_reclaim module=repo status=ok reclaimed={reclaimed}");
        }

        let mut held = Vec::new();
        for contact_id in contact_ids {
            let exists: i64 = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM merge_locks WHERE contact_id = ?1);",
                [contact_id.to_string()],
                |row| row.get(0),
            )?;
            if exists == 1 {
                held.push(*contact_id);
            }
        }
        if !held.is_empty() {
            return Err(RepoError::LockUnavailable { held });
        }

        for contact_id in contact_ids {
            tx.execute(
                "INSERT OR IGNORE INTO merge_locks (contact_id, lock_token, acquired_at)
                 VALUES (?1, ?2, strftime('%s', 'now') * 1000);",
                params![contact_id.to_string(), token.as_str()],
            )?;
        }
        tx.commit()
            .map_err(|err| busy_as_unavailable(err, contact_ids))?;

        debug!(
            "event=merge_lock_acquire module=repo status=ok ids={}",
            contact_ids.len()
        );
        Ok(token)
    }

    /// Releases every id held by `token`. Releasing twice is a no-op.
    pub fn release(&self, token: &LockToken) -> RepoResult<usize> {
        let released = self.conn.execute(
            "DELETE FROM merge_locks WHERE lock_token = ?1;",
            [token.as_str()],
        )?;
        debug!("event=merge_lock_release module=repo status=ok released={released}");
        Ok(released)
    }

    /// Lists contact ids currently locked by any token.
    pub fn locked_ids(&self) -> RepoResult<Vec<ContactId>> {
        let mut stmt = self.conn.prepare(
            "SELECT contact_id
             FROM merge_locks
             ORDER BY contact_id ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next()? {
            let value: String = row.get(0)?;
            ids.push(parse_uuid(&value, "merge_locks.contact_id")?);
        }
        Ok(ids)
    }
}

fn ttl_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

// Another writer kept the database locked past the busy timeout; from the
// caller's point of view every requested id is unavailable.
fn busy_as_unavailable(err: rusqlite::Error, contact_ids: &[ContactId]) -> RepoError {
    let err = DbError::Sqlite(err);
    if err.is_busy() {
        return RepoError::LockUnavailable {
            held: contact_ids.to_vec(),
        };
    }
    RepoError::Db(err)
}
