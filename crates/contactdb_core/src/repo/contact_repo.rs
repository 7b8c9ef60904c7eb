//! Contact repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide CRUD over `contacts` and `organizations`.
//! - Resolve any contact id, including redirect stubs, to its live primary.
//! - Own the row <-> `Contact` mapping reused by the merge store.
//!
//! # Invariants
//! - Write paths call `Contact::validate()` before SQL mutations.
//! - Contacts are created as primaries; only a merge commit makes a contact
//!   secondary, and plain updates never touch `is_secondary`/`main_contact`.
//! - Every write bumps `revision`; updates are rejected when the caller's
//!   revision is stale.

use crate::db::DbError;
use crate::model::contact::{Contact, ContactId, ContactValidationError};
use crate::model::organization::{Organization, OrganizationId};
use crate::repo::reference_repo::ReferenceEntity;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

pub(crate) const CONTACT_SELECT_SQL: &str = "SELECT
    id,
    organization_id,
    title,
    honorific,
    first_name,
    last_name,
    designation,
    department,
    affiliation,
    primary_lang,
    notes,
    address,
    city,
    country,
    postal_code,
    birth_date,
    org_head,
    focal_point,
    is_in_mailing_list,
    phones,
    mobiles,
    faxes,
    emails,
    email_ccs,
    is_secondary,
    main_contact_id,
    revision
FROM contacts";

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for contact persistence, reference rewriting and merge
/// locking.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("{0}")]
    Validation(#[from] ContactValidationError),
    #[error("{0}")]
    Db(#[from] DbError),
    #[error("contact not found: {0}")]
    NotFound(ContactId),
    #[error("organization not found: {0}")]
    OrganizationNotFound(OrganizationId),
    #[error("contact {0} was modified concurrently")]
    StaleContact(ContactId),
    #[error("contact {0} is already merged into another contact")]
    AlreadySecondary(ContactId),
    #[error("merge lock unavailable for {} contact(s)", .held.len())]
    LockUnavailable { held: Vec<ContactId> },
    #[error("cannot rewrite {entity} references: {reason}")]
    ReferenceRewrite {
        entity: ReferenceEntity,
        reason: String,
    },
    #[error("invalid persisted contact data: {0}")]
    InvalidData(String),
    #[error("invalid duplicate group: {0}")]
    InvalidDuplicateGroup(String),
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Repository interface for contact and organization CRUD.
pub trait ContactRepository {
    fn create_contact(&self, contact: &Contact) -> RepoResult<ContactId>;
    /// Updates descriptive fields when `contact.revision` is current.
    fn update_contact(&self, contact: &Contact) -> RepoResult<()>;
    fn get_contact(&self, id: ContactId) -> RepoResult<Option<Contact>>;
    /// Lists contacts merged into `primary`, ordered by id.
    fn list_secondaries(&self, primary: ContactId) -> RepoResult<Vec<Contact>>;
    /// Returns the live primary for any known contact id.
    fn resolve_primary(&self, id: ContactId) -> RepoResult<ContactId>;
    fn create_organization(&self, organization: &Organization) -> RepoResult<OrganizationId>;
    fn get_organization(&self, id: OrganizationId) -> RepoResult<Option<Organization>>;
}

/// SQLite-backed contact repository.
pub struct SqliteContactRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteContactRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl ContactRepository for SqliteContactRepository<'_> {
    fn create_contact(&self, contact: &Contact) -> RepoResult<ContactId> {
        contact.validate()?;
        if contact.is_secondary {
            return Err(RepoError::InvalidData(
                "contacts become secondary only through a merge".to_string(),
            ));
        }
        if let Some(organization) = contact.organization {
            if self.get_organization(organization)?.is_none() {
                return Err(RepoError::OrganizationNotFound(organization));
            }
        }

        self.conn.execute(
            "INSERT INTO contacts (
                id,
                organization_id,
                title,
                honorific,
                first_name,
                last_name,
                designation,
                department,
                affiliation,
                primary_lang,
                notes,
                address,
                city,
                country,
                postal_code,
                birth_date,
                org_head,
                focal_point,
                is_in_mailing_list,
                phones,
                mobiles,
                faxes,
                emails,
                email_ccs,
                is_secondary,
                main_contact_id,
                revision
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, 0, NULL, 0
            );",
            params![
                contact.id.to_string(),
                contact.organization.map(|id| id.to_string()),
                contact.title.as_str(),
                contact.honorific.as_str(),
                contact.first_name.as_str(),
                contact.last_name.as_str(),
                contact.designation.as_str(),
                contact.department.as_str(),
                contact.affiliation.as_str(),
                contact.primary_lang.as_str(),
                contact.notes.as_str(),
                contact.address.as_str(),
                contact.city.as_str(),
                contact.country.as_str(),
                contact.postal_code.as_str(),
                contact.birth_date.as_str(),
                bool_to_int(contact.org_head),
                bool_to_int(contact.focal_point),
                bool_to_int(contact.is_in_mailing_list),
                list_to_db(&contact.phones)?,
                list_to_db(&contact.mobiles)?,
                list_to_db(&contact.faxes)?,
                list_to_db(&contact.emails)?,
                list_to_db(&contact.email_ccs)?,
            ],
        )?;

        Ok(contact.id)
    }

    fn update_contact(&self, contact: &Contact) -> RepoResult<()> {
        contact.validate()?;
        update_descriptive_fields(self.conn, contact)
    }

    fn get_contact(&self, id: ContactId) -> RepoResult<Option<Contact>> {
        load_contact(self.conn, id)
    }

    fn list_secondaries(&self, primary: ContactId) -> RepoResult<Vec<Contact>> {
        let mut stmt = self.conn.prepare(&format!(
            "{CONTACT_SELECT_SQL}
             WHERE main_contact_id = ?1
             ORDER BY id ASC;"
        ))?;
        let mut rows = stmt.query([primary.to_string()])?;
        let mut contacts = Vec::new();
        while let Some(row) = rows.next()? {
            contacts.push(parse_contact_row(row)?);
        }
        Ok(contacts)
    }

    fn resolve_primary(&self, id: ContactId) -> RepoResult<ContactId> {
        let main: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT main_contact_id FROM contacts WHERE id = ?1;",
                [id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        match main {
            None => Err(RepoError::NotFound(id)),
            Some(None) => Ok(id),
            Some(Some(main)) => parse_uuid(&main, "contacts.main_contact_id"),
        }
    }

    fn create_organization(&self, organization: &Organization) -> RepoResult<OrganizationId> {
        self.conn.execute(
            "INSERT INTO organizations (id, name, acronym, country)
             VALUES (?1, ?2, ?3, ?4);",
            params![
                organization.id.to_string(),
                organization.name.as_str(),
                organization.acronym.as_str(),
                organization.country.as_str(),
            ],
        )?;
        Ok(organization.id)
    }

    fn get_organization(&self, id: OrganizationId) -> RepoResult<Option<Organization>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, acronym, country
             FROM organizations
             WHERE id = ?1;",
        )?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            let id_text: String = row.get("id")?;
            return Ok(Some(Organization {
                id: parse_uuid(&id_text, "organizations.id")?,
                name: row.get("name")?,
                acronym: row.get("acronym")?,
                country: row.get("country")?,
            }));
        }
        Ok(None)
    }
}

/// Loads one contact, primary or secondary.
pub(crate) fn load_contact(conn: &Connection, id: ContactId) -> RepoResult<Option<Contact>> {
    let mut stmt = conn.prepare(&format!("{CONTACT_SELECT_SQL} WHERE id = ?1;"))?;
    let mut rows = stmt.query([id.to_string()])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_contact_row(row)?));
    }
    Ok(None)
}

/// Writes every descriptive field of `contact` and bumps its revision.
///
/// Fails with `StaleContact` when the stored revision is not
/// `contact.revision`, and with `NotFound` when the row is missing.
pub(crate) fn update_descriptive_fields(conn: &Connection, contact: &Contact) -> RepoResult<()> {
    let changed = conn.execute(
        "UPDATE contacts
         SET
            organization_id = ?2,
            title = ?3,
            honorific = ?4,
            first_name = ?5,
            last_name = ?6,
            designation = ?7,
            department = ?8,
            affiliation = ?9,
            primary_lang = ?10,
            notes = ?11,
            address = ?12,
            city = ?13,
            country = ?14,
            postal_code = ?15,
            birth_date = ?16,
            org_head = ?17,
            focal_point = ?18,
            is_in_mailing_list = ?19,
            phones = ?20,
            mobiles = ?21,
            faxes = ?22,
            emails = ?23,
            email_ccs = ?24,
            revision = revision + 1,
            updated_at = (strftime('%s', 'now') * 1000)
         WHERE id = ?1
           AND revision = ?25;",
        params![
            contact.id.to_string(),
            contact.organization.map(|id| id.to_string()),
            contact.title.as_str(),
            contact.honorific.as_str(),
            contact.first_name.as_str(),
            contact.last_name.as_str(),
            contact.designation.as_str(),
            contact.department.as_str(),
            contact.affiliation.as_str(),
            contact.primary_lang.as_str(),
            contact.notes.as_str(),
            contact.address.as_str(),
            contact.city.as_str(),
            contact.country.as_str(),
            contact.postal_code.as_str(),
            contact.birth_date.as_str(),
            bool_to_int(contact.org_head),
            bool_to_int(contact.focal_point),
            bool_to_int(contact.is_in_mailing_list),
            list_to_db(&contact.phones)?,
            list_to_db(&contact.mobiles)?,
            list_to_db(&contact.faxes)?,
            list_to_db(&contact.emails)?,
            list_to_db(&contact.email_ccs)?,
            contact.revision,
        ],
    )?;

    if changed == 1 {
        return Ok(());
    }

    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM contacts WHERE id = ?1);",
        [contact.id.to_string()],
        |row| row.get(0),
    )?;
    if exists == 1 {
        Err(RepoError::StaleContact(contact.id))
    } else {
        Err(RepoError::NotFound(contact.id))
    }
}

pub(crate) fn parse_contact_row(row: &Row<'_>) -> RepoResult<Contact> {
    let id_text: String = row.get("id")?;
    let id = parse_uuid(&id_text, "contacts.id")?;

    let organization = row
        .get::<_, Option<String>>("organization_id")?
        .map(|value| parse_uuid(&value, "contacts.organization_id"))
        .transpose()?;
    let main_contact = row
        .get::<_, Option<String>>("main_contact_id")?
        .map(|value| parse_uuid(&value, "contacts.main_contact_id"))
        .transpose()?;

    let contact = Contact {
        id,
        organization,
        title: row.get("title")?,
        honorific: row.get("honorific")?,
        first_name: row.get("first_name")?,
        last_name: row.get("last_name")?,
        designation: row.get("designation")?,
        department: row.get("department")?,
        affiliation: row.get("affiliation")?,
        primary_lang: row.get("primary_lang")?,
        notes: row.get("notes")?,
        address: row.get("address")?,
        city: row.get("city")?,
        country: row.get("country")?,
        postal_code: row.get("postal_code")?,
        birth_date: row.get("birth_date")?,
        org_head: parse_bool(row, "org_head")?,
        focal_point: parse_bool(row, "focal_point")?,
        is_in_mailing_list: parse_bool(row, "is_in_mailing_list")?,
        phones: parse_list(row, "phones")?,
        mobiles: parse_list(row, "mobiles")?,
        faxes: parse_list(row, "faxes")?,
        emails: parse_list(row, "emails")?,
        email_ccs: parse_list(row, "email_ccs")?,
        is_secondary: parse_bool(row, "is_secondary")?,
        main_contact,
        revision: row.get("revision")?,
    };
    contact.validate()?;
    Ok(contact)
}

pub(crate) fn parse_uuid(value: &str, column: &'static str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid `{value}` in {column}")))
}

fn parse_bool(row: &Row<'_>, column: &'static str) -> RepoResult<bool> {
    match row.get::<_, i64>(column)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "invalid boolean value `{other}` in contacts.{column}"
        ))),
    }
}

pub(crate) fn parse_list(row: &Row<'_>, column: &'static str) -> RepoResult<Vec<String>> {
    let text: String = row.get(column)?;
    serde_json::from_str(&text).map_err(|err| {
        RepoError::InvalidData(format!("invalid list value in contacts.{column}: {err}"))
    })
}

fn list_to_db(items: &[String]) -> RepoResult<String> {
    serde_json::to_string(items)
        .map_err(|err| RepoError::InvalidData(format!("cannot encode list value: {err}")))
}

pub(crate) fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}
