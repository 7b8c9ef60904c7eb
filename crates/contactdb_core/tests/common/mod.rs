#![allow(dead_code)]

use contactdb_core::{
    Contact, ContactId, ContactRepository, FieldResolutions, MergeEngine, MergeResult,
    SqliteContactRepository, SqliteMergeStore,
};
use rusqlite::{params, Connection};
use std::time::Duration;
use uuid::Uuid;

pub const LOCK_TTL: Duration = Duration::from_secs(300);

pub fn engine(conn: &Connection) -> MergeEngine<SqliteMergeStore<'_>> {
    MergeEngine::new(SqliteMergeStore::new(conn, LOCK_TTL))
}

pub fn create_contact(conn: &Connection, first_name: &str, last_name: &str) -> Contact {
    let contact = Contact::new(first_name, last_name);
    SqliteContactRepository::new(conn)
        .create_contact(&contact)
        .unwrap();
    contact
}

pub fn create_contact_with_emails(
    conn: &Connection,
    first_name: &str,
    last_name: &str,
    emails: &[&str],
) -> Contact {
    let mut contact = Contact::new(first_name, last_name);
    contact.emails = emails.iter().map(|email| email.to_string()).collect();
    SqliteContactRepository::new(conn)
        .create_contact(&contact)
        .unwrap();
    contact
}

pub fn save(conn: &Connection, contact: &Contact) -> Contact {
    let repo = SqliteContactRepository::new(conn);
    repo.update_contact(contact).unwrap();
    repo.get_contact(contact.id).unwrap().unwrap()
}

pub fn load(conn: &Connection, id: ContactId) -> Contact {
    SqliteContactRepository::new(conn)
        .get_contact(id)
        .unwrap()
        .unwrap()
}

/// Runs begin/propose/commit in one go.
pub fn merge(
    engine: &MergeEngine<SqliteMergeStore<'_>>,
    candidates: &[ContactId],
    primary: ContactId,
    resolutions: FieldResolutions,
) -> MergeResult<Contact> {
    let session_id = Uuid::new_v4().to_string();
    engine.begin_merge(session_id.clone(), candidates)?;
    let plan = engine.propose_merge(&session_id, primary)?;
    engine.commit_merge(&plan, &resolutions)
}

pub fn create_group(conn: &Connection, name: &str) -> i64 {
    conn.execute("INSERT INTO contact_groups (name) VALUES (?1);", [name])
        .unwrap();
    conn.last_insert_rowid()
}

pub fn add_membership(conn: &Connection, group_id: i64, contact_id: ContactId) -> i64 {
    conn.execute(
        "INSERT INTO group_memberships (group_id, contact_id) VALUES (?1, ?2);",
        params![group_id, contact_id.to_string()],
    )
    .unwrap();
    conn.last_insert_rowid()
}

pub fn create_event(conn: &Connection, code: &str) -> i64 {
    conn.execute(
        "INSERT INTO events (code, title) VALUES (?1, ?1);",
        [code],
    )
    .unwrap();
    conn.last_insert_rowid()
}

pub fn register(
    conn: &Connection,
    contact_id: ContactId,
    event_id: i64,
    status: &str,
    registered_at: i64,
) -> i64 {
    conn.execute(
        "INSERT INTO registrations (contact_id, event_id, status, registered_at)
         VALUES (?1, ?2, ?3, ?4);",
        params![contact_id.to_string(), event_id, status, registered_at],
    )
    .unwrap();
    conn.last_insert_rowid()
}

pub fn create_email(conn: &Connection, subject: &str) -> i64 {
    conn.execute("INSERT INTO emails (subject) VALUES (?1);", [subject])
        .unwrap();
    conn.last_insert_rowid()
}

pub fn add_recipient(conn: &Connection, email_id: i64, contact_id: ContactId) {
    conn.execute(
        "INSERT INTO email_recipients (email_id, contact_id) VALUES (?1, ?2);",
        params![email_id, contact_id.to_string()],
    )
    .unwrap();
}

pub fn add_cc(conn: &Connection, email_id: i64, contact_id: ContactId) {
    conn.execute(
        "INSERT INTO email_ccs (email_id, contact_id) VALUES (?1, ?2);",
        params![email_id, contact_id.to_string()],
    )
    .unwrap();
}

pub fn add_photo(conn: &Connection, contact_id: ContactId, path: &str) {
    conn.execute(
        "INSERT INTO photos (contact_id, path) VALUES (?1, ?2);",
        params![contact_id.to_string(), path],
    )
    .unwrap();
}

pub fn add_document(conn: &Connection, owner: ContactId, title: &str) -> i64 {
    conn.execute(
        "INSERT INTO documents (owner_contact_id, title) VALUES (?1, ?2);",
        params![owner.to_string(), title],
    )
    .unwrap();
    conn.last_insert_rowid()
}

/// Rows of `table` whose `column` holds `contact_id`.
pub fn count_rows(conn: &Connection, table: &str, column: &str, contact_id: ContactId) -> i64 {
    conn.query_row(
        &format!("SELECT COUNT(*) FROM {table} WHERE {column} = ?1;"),
        [contact_id.to_string()],
        |row| row.get(0),
    )
    .unwrap()
}

pub fn total_rows(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| {
        row.get(0)
    })
    .unwrap()
}
