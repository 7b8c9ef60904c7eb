//! Registry of entities referencing contacts, and the reference rewriter.
//!
//! # Responsibility
//! - Enumerate, from one closed table, every row that points at a contact.
//! - Re-point those rows from secondary contacts to the primary during a
//!   merge commit, de-duplicating rows that would collide.
//!
//! # Invariants
//! - `REFERENCE_TABLES` is the single list of referencing entity types; the
//!   enumerator and the rewriter both iterate it, so a referencing table can
//!   not be enumerated without also being rewritten.
//! - Rewrites run on the caller's transaction and never commit by
//!   themselves.
//! - A unique-constraint collision the strategy cannot resolve fails the
//!   rewrite with `RepoError::ReferenceRewrite`.

use crate::db::DbError;
use crate::model::contact::ContactId;
use crate::repo::contact_repo::{parse_uuid, RepoError, RepoResult};
use log::debug;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Entity type holding a reference to a contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceEntity {
    /// Another contact redirecting to this one through `main_contact`.
    Contact,
    GroupMembership,
    Registration,
    EmailRecipient,
    EmailCc,
    Photo,
    Document,
}

impl ReferenceEntity {
    pub fn name(self) -> &'static str {
        match self {
            Self::Contact => "contact",
            Self::GroupMembership => "group_membership",
            Self::Registration => "registration",
            Self::EmailRecipient => "email_recipient",
            Self::EmailCc => "email_cc",
            Self::Photo => "photo",
            Self::Document => "document",
        }
    }
}

impl Display for ReferenceEntity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// How references of one entity type move from a secondary to the primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteStrategy {
    /// Redirect stubs pointing at a secondary are pointed at the primary.
    ChainCollapse,
    /// Plain foreign key update; a unique collision is a rewrite failure.
    ForeignKey,
    /// Many-to-many edge; an edge the primary already has is dropped.
    SetUnion,
    /// One row per `key_column`; on collision the row with the greatest
    /// `order_column` survives.
    KeepLatest {
        key_column: &'static str,
        order_column: &'static str,
    },
}

/// One registered referencing table.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceTable {
    pub entity: ReferenceEntity,
    pub table: &'static str,
    pub contact_column: &'static str,
    pub strategy: RewriteStrategy,
}

pub const REFERENCE_TABLES: &[ReferenceTable] = &[
    ReferenceTable {
        entity: ReferenceEntity::Contact,
        table: "contacts",
        contact_column: "main_contact_id",
        strategy: RewriteStrategy::ChainCollapse,
    },
    ReferenceTable {
        entity: ReferenceEntity::GroupMembership,
        table: "group_memberships",
        contact_column: "contact_id",
        strategy: RewriteStrategy::SetUnion,
    },
    ReferenceTable {
        entity: ReferenceEntity::Registration,
        table: "registrations",
        contact_column: "contact_id",
        strategy: RewriteStrategy::KeepLatest {
            key_column: "event_id",
            order_column: "registered_at",
        },
    },
    ReferenceTable {
        entity: ReferenceEntity::EmailRecipient,
        table: "email_recipients",
        contact_column: "contact_id",
        strategy: RewriteStrategy::SetUnion,
    },
    ReferenceTable {
        entity: ReferenceEntity::EmailCc,
        table: "email_ccs",
        contact_column: "contact_id",
        strategy: RewriteStrategy::SetUnion,
    },
    ReferenceTable {
        entity: ReferenceEntity::Photo,
        table: "photos",
        contact_column: "contact_id",
        strategy: RewriteStrategy::ForeignKey,
    },
    ReferenceTable {
        entity: ReferenceEntity::Document,
        table: "documents",
        contact_column: "owner_contact_id",
        strategy: RewriteStrategy::ForeignKey,
    },
];

/// One row referencing a contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContactReference {
    pub entity: ReferenceEntity,
    /// Primary key of the referencing row, as text.
    pub entity_id: String,
    /// Column holding the contact id.
    pub field: &'static str,
}

/// Per-entity counters of one rewrite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EntityRewrite {
    /// Rows re-pointed at the primary.
    pub moved: usize,
    /// Redundant rows removed instead of moved.
    pub deduplicated: usize,
}

/// Outcome of rewriting all references of one merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RewriteSummary {
    pub entities: BTreeMap<ReferenceEntity, EntityRewrite>,
}

impl RewriteSummary {
    pub fn get(&self, entity: ReferenceEntity) -> EntityRewrite {
        self.entities.get(&entity).copied().unwrap_or_default()
    }

    pub fn total_moved(&self) -> usize {
        self.entities.values().map(|counts| counts.moved).sum()
    }

    /// Redirect stubs re-pointed from a secondary to the primary.
    pub fn collapsed(&self) -> usize {
        self.get(ReferenceEntity::Contact).moved
    }

    pub fn total_deduplicated(&self) -> usize {
        self.entities.values().map(|counts| counts.deduplicated).sum()
    }

    fn add(&mut self, entity: ReferenceEntity, moved: usize, deduplicated: usize) {
        let counts = self.entities.entry(entity).or_default();
        counts.moved += moved;
        counts.deduplicated += deduplicated;
    }
}

/// Lists every registered row that references `contact_id`.
///
/// Ordered by registry order, then by row id.
pub fn list_references_to(
    conn: &Connection,
    contact_id: ContactId,
) -> RepoResult<Vec<ContactReference>> {
    let mut references = Vec::new();
    for table in REFERENCE_TABLES {
        let mut stmt = conn.prepare(&format!(
            "SELECT CAST(id AS TEXT)
             FROM {table}
             WHERE {column} = ?1
             ORDER BY id ASC;",
            table = table.table,
            column = table.contact_column,
        ))?;
        let mut rows = stmt.query([contact_id.to_string()])?;
        while let Some(row) = rows.next()? {
            references.push(ContactReference {
                entity: table.entity,
                entity_id: row.get(0)?,
                field: table.contact_column,
            });
        }
    }
    Ok(references)
}

/// Lists contacts whose `main_contact` is one of `contact_ids`.
///
/// These are the redirect stubs a merge of `contact_ids` has to collapse.
pub fn list_redirects_to(conn: &Connection, contact_ids: &[ContactId]) -> RepoResult<Vec<ContactId>> {
    let mut stmt = conn.prepare(
        "SELECT id
         FROM contacts
         WHERE main_contact_id = ?1
         ORDER BY id ASC;",
    )?;
    let mut redirects = Vec::new();
    for contact_id in contact_ids {
        let mut rows = stmt.query([contact_id.to_string()])?;
        while let Some(row) = rows.next()? {
            let value: String = row.get(0)?;
            redirects.push(parse_uuid(&value, "contacts.id")?);
        }
    }
    Ok(redirects)
}

/// Re-points every registered reference from each secondary to `primary`.
///
/// Must run inside the merge transaction; the caller commits or drops it.
pub fn rewrite_references(
    conn: &Connection,
    primary: ContactId,
    secondaries: &[ContactId],
) -> RepoResult<RewriteSummary> {
    let mut summary = RewriteSummary::default();
    let primary_text = primary.to_string();

    for table in REFERENCE_TABLES {
        for secondary in secondaries {
            let secondary_text = secondary.to_string();
            let (moved, deduplicated) =
                rewrite_table(conn, table, &primary_text, &secondary_text)
                    .map_err(|err| classify_rewrite_error(table.entity, err))?;
            summary.add(table.entity, moved, deduplicated);
        }

        let counts = summary.get(table.entity);
        debug!(
            "event=reference_rewrite module=repo status=ok entity={} moved={} deduplicated={}",
            table.entity, counts.moved, counts.deduplicated
        );
    }

    Ok(summary)
}

fn rewrite_table(
    conn: &Connection,
    table: &ReferenceTable,
    primary: &str,
    secondary: &str,
) -> rusqlite::Result<(usize, usize)> {
    let name = table.table;
    let column = table.contact_column;

    match table.strategy {
        RewriteStrategy::ChainCollapse => {
            let moved = conn.execute(
                &format!(
                    "UPDATE {name}
                     SET {column} = ?1,
                         revision = revision + 1,
                         updated_at = (strftime('%s', 'now') * 1000)
                     WHERE {column} = ?2;"
                ),
                params![primary, secondary],
            )?;
            Ok((moved, 0))
        }
        RewriteStrategy::ForeignKey => {
            let moved = conn.execute(
                &format!("UPDATE {name} SET {column} = ?1 WHERE {column} = ?2;"),
                params![primary, secondary],
            )?;
            Ok((moved, 0))
        }
        RewriteStrategy::SetUnion => {
            let moved = conn.execute(
                &format!("UPDATE OR IGNORE {name} SET {column} = ?1 WHERE {column} = ?2;"),
                params![primary, secondary],
            )?;
            let deduplicated = conn.execute(
                &format!("DELETE FROM {name} WHERE {column} = ?1;"),
                [secondary],
            )?;
            Ok((moved, deduplicated))
        }
        RewriteStrategy::KeepLatest {
            key_column,
            order_column,
        } => {
            // Primary rows superseded by a newer secondary row for the same key.
            let superseded = conn.execute(
                &format!(
                    "DELETE FROM {name}
                     WHERE {column} = ?1
                       AND EXISTS (
                         SELECT 1
                         FROM {name} AS newer
                         WHERE newer.{column} = ?2
                           AND newer.{key_column} = {name}.{key_column}
                           AND newer.{order_column} > {name}.{order_column}
                       );"
                ),
                params![primary, secondary],
            )?;
            let moved = conn.execute(
                &format!("UPDATE OR IGNORE {name} SET {column} = ?1 WHERE {column} = ?2;"),
                params![primary, secondary],
            )?;
            let outdated = conn.execute(
                &format!("DELETE FROM {name} WHERE {column} = ?1;"),
                [secondary],
            )?;
            Ok((moved, superseded + outdated))
        }
    }
}

fn classify_rewrite_error(entity: ReferenceEntity, err: rusqlite::Error) -> RepoError {
    let err = DbError::Sqlite(err);
    if err.is_constraint_violation() {
        return RepoError::ReferenceRewrite {
            entity,
            reason: err.to_string(),
        };
    }
    RepoError::Db(err)
}
