use std::collections::HashSet;

use chrono::Utc;
use rusqlite::{params, Row};

use super::*;

const CONTACT_COLUMNS: &str = "id, org_id, name, first_name, last_name, title,
    email, email_verified, verification_score, phone, linkedin_url,
    is_primary, last_verified_at, notes, created_at";

impl PipelineDb {
    // =========================================================================
    // Contacts
    // =========================================================================

    /// Insert or update a contact by case-folded email (dedup key).
    ///
    /// Single atomic `ON CONFLICT(email)` write; supplied fields overwrite,
    /// the email itself never changes on conflict. Returns the row post-write.
    pub fn upsert_contact(&self, contact: &NewContact) -> Result<DbContact, DbError> {
        let email = normalize_email(&contact.email)?;
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        self.conn.execute(
            "INSERT INTO contacts (
                id, org_id, name, first_name, last_name, title, email,
                email_verified, verification_score, phone, linkedin_url,
                is_primary, notes, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(email) DO UPDATE SET
                org_id = COALESCE(excluded.org_id, contacts.org_id),
                name = COALESCE(excluded.name, contacts.name),
                first_name = COALESCE(excluded.first_name, contacts.first_name),
                last_name = COALESCE(excluded.last_name, contacts.last_name),
                title = COALESCE(excluded.title, contacts.title),
                email_verified = excluded.email_verified,
                verification_score = COALESCE(excluded.verification_score, contacts.verification_score),
                phone = COALESCE(excluded.phone, contacts.phone),
                linkedin_url = COALESCE(excluded.linkedin_url, contacts.linkedin_url),
                is_primary = excluded.is_primary,
                notes = COALESCE(excluded.notes, contacts.notes)",
            params![
                id,
                contact.org_id,
                contact.name,
                contact.first_name,
                contact.last_name,
                contact.title,
                email,
                contact.email_verified,
                contact.verification_score,
                contact.phone,
                contact.linkedin_url,
                contact.is_primary,
                contact.notes,
                now,
            ],
        )?;

        self.get_contact_by_email(&email)?.ok_or(DbError::NotFound {
            entity: "contact",
            id: email,
        })
    }

    /// Look up a contact by email (case-insensitive).
    pub fn get_contact_by_email(&self, email: &str) -> Result<Option<DbContact>, DbError> {
        let email = email.trim().to_lowercase();
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE email = ?1"))?;
        let mut rows = stmt.query_map(params![email], map_contact_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Get a contact by ID.
    pub fn get_contact(&self, id: &str) -> Result<Option<DbContact>, DbError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = ?1"))?;
        let mut rows = stmt.query_map(params![id], map_contact_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// All known contact emails. Discovery runs use this to skip re-enriching
    /// people already in the pipeline.
    pub fn known_emails(&self) -> Result<HashSet<String>, DbError> {
        let mut stmt = self.conn.prepare("SELECT email FROM contacts")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut emails = HashSet::new();
        for row in rows {
            emails.insert(row?);
        }
        Ok(emails)
    }

    /// The contact outreach should address for an org: selected by the
    /// `is_primary` flag, falling back to the earliest-created contact.
    /// Never selected by position in some caller-side list.
    pub fn primary_contact_for_org(&self, org_id: &str) -> Result<Option<DbContact>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts
             WHERE org_id = ?1
             ORDER BY is_primary DESC, created_at ASC
             LIMIT 1"
        ))?;
        let mut rows = stmt.query_map(params![org_id], map_contact_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// The single resolution point for "which org/contact does this email
    /// belong to". Returns `(org_id, contact)` when the contact is known.
    pub fn resolve_by_email(
        &self,
        email: &str,
    ) -> Result<Option<(Option<String>, DbContact)>, DbError> {
        match self.get_contact_by_email(email)? {
            Some(contact) => Ok(Some((contact.org_id.clone(), contact))),
            None => Ok(None),
        }
    }
}

/// Trim and case-fold an email; reject anything without a local part and a
/// domain. Fails fast with no write.
pub(crate) fn normalize_email(email: &str) -> Result<String, DbError> {
    let normalized = email.trim().to_lowercase();
    let valid = match normalized.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty(),
        None => false,
    };
    if !valid {
        return Err(DbError::InvalidIdentity {
            field: "email",
            value: email.to_string(),
        });
    }
    Ok(normalized)
}

fn map_contact_row(row: &Row) -> rusqlite::Result<DbContact> {
    Ok(DbContact {
        id: row.get(0)?,
        org_id: row.get(1)?,
        name: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        title: row.get(5)?,
        email: row.get(6)?,
        email_verified: row.get(7)?,
        verification_score: row.get(8)?,
        phone: row.get(9)?,
        linkedin_url: row.get(10)?,
        is_primary: row.get(11)?,
        last_verified_at: row.get(12)?,
        notes: row.get(13)?,
        created_at: row.get(14)?,
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::test_db;
    use super::*;

    fn sample_contact(email: &str) -> NewContact {
        NewContact {
            email: email.to_string(),
            name: Some("Jane Smith".to_string()),
            title: Some("Head of Events".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_upsert_dedup_by_case_folded_email() {
        let db = test_db();

        let first = db
            .upsert_contact(&sample_contact("Jane@Example.COM"))
            .expect("first upsert");
        assert_eq!(first.email, "jane@example.com");

        let mut update = sample_contact("jane@example.com");
        update.title = Some("VP Marketing".to_string());
        update.email_verified = true;
        let second = db.upsert_contact(&update).expect("second upsert");

        assert_eq!(first.id, second.id);
        assert_eq!(second.title, Some("VP Marketing".to_string()));
        assert!(second.email_verified);

        let count: i32 = db
            .conn_ref()
            .query_row("SELECT COUNT(*) FROM contacts", [], |row| row.get(0))
            .expect("count");
        assert_eq!(count, 1);
    }

    #[test]
    fn test_upsert_rejects_invalid_email() {
        let db = test_db();
        for bad in ["", "   ", "no-at-sign", "@nodomain", "nolocal@"] {
            let err = db
                .upsert_contact(&sample_contact(bad))
                .expect_err("invalid email must fail");
            assert!(err.is_identity_error(), "{bad:?} should be an identity error");
        }
        let count: i32 = db
            .conn_ref()
            .query_row("SELECT COUNT(*) FROM contacts", [], |row| row.get(0))
            .expect("count");
        assert_eq!(count, 0);
    }

    #[test]
    fn test_primary_contact_selected_by_flag() {
        let db = test_db();
        let org = db
            .upsert_organization(&NewOrganization {
                name: "Acme".to_string(),
                domain: "acme.com".to_string(),
                ..Default::default()
            })
            .expect("org");

        let mut early = sample_contact("assistant@acme.com");
        early.org_id = Some(org.id.clone());
        db.upsert_contact(&early).expect("early contact");

        let mut primary = sample_contact("decider@acme.com");
        primary.org_id = Some(org.id.clone());
        primary.is_primary = true;
        db.upsert_contact(&primary).expect("primary contact");

        let selected = db
            .primary_contact_for_org(&org.id)
            .expect("query")
            .expect("some contact");
        assert_eq!(selected.email, "decider@acme.com");
    }

    #[test]
    fn test_resolve_by_email() {
        let db = test_db();
        let org = db
            .upsert_organization(&NewOrganization {
                name: "Acme".to_string(),
                domain: "acme.com".to_string(),
                ..Default::default()
            })
            .expect("org");
        let mut contact = sample_contact("jane@acme.com");
        contact.org_id = Some(org.id.clone());
        db.upsert_contact(&contact).expect("contact");

        let (org_id, resolved) = db
            .resolve_by_email("JANE@acme.com")
            .expect("resolve")
            .expect("known contact");
        assert_eq!(org_id, Some(org.id));
        assert_eq!(resolved.email, "jane@acme.com");

        assert!(db
            .resolve_by_email("stranger@elsewhere.com")
            .expect("resolve")
            .is_none());
    }
}
