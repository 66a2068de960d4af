use chrono::Utc;
use rusqlite::{params, Row};

use super::contacts::normalize_email;
use super::*;

const SUPPRESSION_COLUMNS: &str = "id, email, domain, reason, source, suppressed_at";

const REPLY_COLUMNS: &str = "id, org_id, contact_id, touch_id, reply_text,
    received_at, classification, classification_reasoning, key_phrase,
    classified_at, recontact_date, recontact_note, actioned, created_at";

const CALL_COLUMNS: &str = "id, org_id, contact_id, call_permission_granted,
    call_permission_granted_at, provider_call_id, provider_agent_id,
    call_status, transcript, call_successful, initiated_at, completed_at,
    agreed_slot, notes, created_at";

const MEETING_COLUMNS: &str = "id, org_id, contact_id, call_record_id,
    calendar_event_id, html_link, meet_link, scheduled_start, scheduled_end,
    timezone, status, outcome_notes, confirmation_email_draft, event_verified,
    created_at";

/// Everything the store knows about one organization, assembled for reply
/// handling and reporting.
#[derive(Debug, Clone)]
pub struct OrgHistory {
    pub organization: DbOrganization,
    pub contacts: Vec<DbContact>,
    pub events: Vec<DbEvent>,
    pub sequences: Vec<DbEmailSequence>,
    pub touches: Vec<DbEmailTouch>,
    pub replies: Vec<DbInboundReply>,
    pub calls: Vec<DbCallRecord>,
    pub meetings: Vec<DbMeeting>,
}

impl PipelineDb {
    // =========================================================================
    // Suppression list
    // =========================================================================

    /// Check whether an email is on the suppression list. Case-insensitive.
    /// Must be consulted before any send; there is no removal API.
    pub fn is_suppressed(&self, email: &str) -> Result<bool, DbError> {
        let email = email.trim().to_lowercase();
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM suppression_list WHERE email = ?1",
            params![email],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Add an email to the suppression list. First writer wins: if the email
    /// is already suppressed, the existing entry (original source and
    /// timestamp) is returned unchanged.
    pub fn add_suppression(
        &self,
        email: &str,
        reason: Option<&str>,
        source: SuppressionSource,
    ) -> Result<DbSuppression, DbError> {
        let email = normalize_email(email)?;
        let domain = email.split_once('@').map(|(_, d)| d.to_string());
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        self.conn.execute(
            "INSERT INTO suppression_list (id, email, domain, reason, source, suppressed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(email) DO NOTHING",
            params![id, email, domain, reason, source, now],
        )?;

        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SUPPRESSION_COLUMNS} FROM suppression_list WHERE email = ?1"
        ))?;
        let mut rows = stmt.query_map(params![email], map_suppression_row)?;
        match rows.next() {
            Some(row) => Ok(row?),
            None => Err(DbError::NotFound {
                entity: "suppression",
                id: email,
            }),
        }
    }

    // =========================================================================
    // Inbound replies
    // =========================================================================

    /// Record an inbound reply and its classification.
    ///
    /// An UNSUBSCRIBE reply also suppresses the sender and cancels every
    /// scheduled touch addressed to them, all inside the same transaction:
    /// either the reply, the suppression entry, and the cancellations all
    /// commit, or none of them do.
    pub fn record_reply(&self, reply: &NewInboundReply) -> Result<DbInboundReply, DbError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let classified_at = reply.classification.map(|_| now.clone());

        self.with_transaction(|db| {
            db.conn.execute(
                "INSERT INTO inbound_replies (
                    id, org_id, contact_id, touch_id, reply_text, received_at,
                    classification, classification_reasoning, key_phrase,
                    classified_at, recontact_date, recontact_note, actioned,
                    created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 0, ?6)",
                params![
                    id,
                    reply.org_id,
                    reply.contact_id,
                    reply.touch_id,
                    reply.reply_text,
                    now,
                    reply.classification,
                    reply.classification_reasoning,
                    reply.key_phrase,
                    classified_at,
                    reply.recontact_date,
                    reply.recontact_note,
                ],
            )?;

            if reply.classification == Some(ReplyClassification::Unsubscribe) {
                if let Some(email) = reply.sender_email.as_deref() {
                    db.add_suppression(
                        email,
                        Some("unsubscribe reply"),
                        SuppressionSource::UnsubscribeReply,
                    )?;
                }
                let contact_id = match (&reply.contact_id, &reply.sender_email) {
                    (Some(id), _) => Some(id.clone()),
                    (None, Some(email)) => db
                        .get_contact_by_email(email)?
                        .map(|contact| contact.id),
                    (None, None) => None,
                };
                if let Some(contact_id) = contact_id {
                    db.cancel_touches_for_contact(&contact_id)?;
                }
            }

            db.get_reply(&id)?.ok_or(DbError::NotFound {
                entity: "inbound_reply",
                id: id.clone(),
            })
        })
    }

    /// Get a reply by ID.
    pub fn get_reply(&self, id: &str) -> Result<Option<DbInboundReply>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {REPLY_COLUMNS} FROM inbound_replies WHERE id = ?1"
        ))?;
        let mut rows = stmt.query_map(params![id], map_reply_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Replies not yet acted on, oldest first.
    pub fn unactioned_replies(&self) -> Result<Vec<DbInboundReply>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {REPLY_COLUMNS} FROM inbound_replies
             WHERE actioned = 0 ORDER BY received_at ASC"
        ))?;
        let rows = stmt.query_map([], map_reply_row)?;
        let mut replies = Vec::new();
        for row in rows {
            replies.push(row?);
        }
        Ok(replies)
    }

    /// Mark a reply as acted on.
    pub fn mark_reply_actioned(&self, id: &str) -> Result<(), DbError> {
        let changed = self.conn.execute(
            "UPDATE inbound_replies SET actioned = 1 WHERE id = ?1",
            params![id],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound {
                entity: "inbound_reply",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    // =========================================================================
    // Call records and the permission gate
    // =========================================================================

    /// Persist that a human explicitly approved calling this organization.
    /// This is the only way to open the gate; permission is never inferred.
    pub fn grant_call_permission(
        &self,
        org_id: &str,
        contact_id: Option<&str>,
        granted_at: Option<&str>,
    ) -> Result<DbCallRecord, DbError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let granted_at = granted_at.unwrap_or(&now);

        self.conn.execute(
            "INSERT INTO call_records (
                id, org_id, contact_id, call_permission_granted,
                call_permission_granted_at, created_at
             ) VALUES (?1, ?2, ?3, 1, ?4, ?5)",
            params![id, org_id, contact_id, granted_at, now],
        )?;
        log::info!("Call permission granted for org {org_id}");

        self.get_call_record(&id)?.ok_or(DbError::NotFound {
            entity: "call_record",
            id,
        })
    }

    /// Record a call attempt or a deliberate skip.
    ///
    /// The gate: any status other than SKIPPED requires a previously
    /// persisted permission grant for the organization, and when the record
    /// carries an `initiated_at` the grant timestamp must predate it — a
    /// backdated record cannot show a call initiated before permission
    /// existed. The check and the insert share one transaction, so the
    /// grant cannot vanish between them. A SKIPPED record passes without a
    /// grant; it documents the decision not to call.
    pub fn record_call(&self, call: &NewCallRecord) -> Result<DbCallRecord, DbError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        self.with_transaction(|db| {
            if call.call_status != Some(CallStatus::Skipped) {
                let org_id = call.org_id.as_deref().ok_or(DbError::CallPermissionMissing {
                    org_id: "<none>".to_string(),
                })?;
                let permitted = match call.initiated_at.as_deref() {
                    Some(attempt_at) => db.has_call_permission_before(org_id, attempt_at)?,
                    None => db.has_call_permission(org_id)?,
                };
                if !permitted {
                    log::warn!("Rejected call record for org {org_id}: no permission grant");
                    return Err(DbError::CallPermissionMissing {
                        org_id: org_id.to_string(),
                    });
                }
            }

            let agreed_slot = call.agreed_slot.as_ref().map(|v| v.to_string());
            db.conn.execute(
                "INSERT INTO call_records (
                    id, org_id, contact_id, call_permission_granted,
                    provider_call_id, provider_agent_id, call_status,
                    transcript, call_successful, initiated_at, completed_at,
                    agreed_slot, notes, created_at
                 ) VALUES (?1, ?2, ?3, 0, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    id,
                    call.org_id,
                    call.contact_id,
                    call.provider_call_id,
                    call.provider_agent_id,
                    call.call_status,
                    call.transcript,
                    call.call_successful,
                    call.initiated_at,
                    call.completed_at,
                    agreed_slot,
                    call.notes,
                    now,
                ],
            )?;

            db.get_call_record(&id)?.ok_or(DbError::NotFound {
                entity: "call_record",
                id: id.clone(),
            })
        })
    }

    /// Whether a persisted permission grant exists for the organization.
    /// Only rows with both the flag and a grant timestamp count.
    pub fn has_call_permission(&self, org_id: &str) -> Result<bool, DbError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM call_records
             WHERE org_id = ?1
               AND call_permission_granted = 1
               AND call_permission_granted_at IS NOT NULL",
            params![org_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Whether a grant existed at or before `attempt_at` (RFC 3339; the
    /// timestamps compare lexicographically).
    pub fn has_call_permission_before(
        &self,
        org_id: &str,
        attempt_at: &str,
    ) -> Result<bool, DbError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM call_records
             WHERE org_id = ?1
               AND call_permission_granted = 1
               AND call_permission_granted_at IS NOT NULL
               AND call_permission_granted_at <= ?2",
            params![org_id, attempt_at],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Get a call record by ID.
    pub fn get_call_record(&self, id: &str) -> Result<Option<DbCallRecord>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CALL_COLUMNS} FROM call_records WHERE id = ?1"
        ))?;
        let mut rows = stmt.query_map(params![id], map_call_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Meetings
    // =========================================================================

    /// Record a booked meeting. `event_verified` stays false unless the
    /// calendar collaborator actually read the event back.
    pub fn record_meeting(&self, meeting: &NewMeeting) -> Result<DbMeeting, DbError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        self.conn.execute(
            "INSERT INTO meetings (
                id, org_id, contact_id, call_record_id, calendar_event_id,
                html_link, meet_link, scheduled_start, scheduled_end, timezone,
                status, outcome_notes, confirmation_email_draft,
                event_verified, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, NULL, ?12, ?13, ?14)",
            params![
                id,
                meeting.org_id,
                meeting.contact_id,
                meeting.call_record_id,
                meeting.calendar_event_id,
                meeting.html_link,
                meeting.meet_link,
                meeting.scheduled_start,
                meeting.scheduled_end,
                meeting.timezone,
                MeetingStatus::Confirmed,
                meeting.confirmation_email_draft,
                meeting.event_verified,
                now,
            ],
        )?;

        self.get_meeting(&id)?.ok_or(DbError::NotFound {
            entity: "meeting",
            id,
        })
    }

    /// Get a meeting by ID.
    pub fn get_meeting(&self, id: &str) -> Result<Option<DbMeeting>, DbError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {MEETING_COLUMNS} FROM meetings WHERE id = ?1"))?;
        let mut rows = stmt.query_map(params![id], map_meeting_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Update a meeting's status after the fact (cancellation, no-show,
    /// completion) with optional outcome notes.
    pub fn update_meeting_status(
        &self,
        id: &str,
        status: MeetingStatus,
        outcome_notes: Option<&str>,
    ) -> Result<(), DbError> {
        let changed = self.conn.execute(
            "UPDATE meetings
             SET status = ?1,
                 outcome_notes = COALESCE(?2, outcome_notes)
             WHERE id = ?3",
            params![status, outcome_notes, id],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound {
                entity: "meeting",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    // =========================================================================
    // History
    // =========================================================================

    /// Assemble the full interaction history for an organization. Used for
    /// reply handling context and reporting.
    pub fn org_history(&self, org_id: &str) -> Result<OrgHistory, DbError> {
        let organization = self.get_organization(org_id)?.ok_or(DbError::NotFound {
            entity: "organization",
            id: org_id.to_string(),
        })?;

        let mut contacts_stmt = self.conn.prepare(
            "SELECT id FROM contacts WHERE org_id = ?1 ORDER BY created_at ASC",
        )?;
        let contact_ids: Vec<String> = contacts_stmt
            .query_map(params![org_id], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        let mut contacts = Vec::new();
        for contact_id in &contact_ids {
            if let Some(contact) = self.get_contact(contact_id)? {
                contacts.push(contact);
            }
        }

        let events = self.events_for_org(org_id)?;

        let mut seq_stmt = self.conn.prepare(
            "SELECT id FROM email_sequences WHERE org_id = ?1 ORDER BY created_at ASC",
        )?;
        let sequence_ids: Vec<String> = seq_stmt
            .query_map(params![org_id], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        let mut sequences = Vec::new();
        let mut touches = Vec::new();
        for sequence_id in &sequence_ids {
            if let Some(sequence) = self.get_sequence(sequence_id)? {
                touches.extend(self.touches_for_sequence(&sequence.id)?);
                sequences.push(sequence);
            }
        }

        let mut reply_stmt = self.conn.prepare(&format!(
            "SELECT {REPLY_COLUMNS} FROM inbound_replies
             WHERE org_id = ?1 ORDER BY received_at ASC"
        ))?;
        let replies: Vec<DbInboundReply> = reply_stmt
            .query_map(params![org_id], map_reply_row)?
            .collect::<rusqlite::Result<_>>()?;

        let mut call_stmt = self.conn.prepare(&format!(
            "SELECT {CALL_COLUMNS} FROM call_records
             WHERE org_id = ?1 ORDER BY created_at ASC"
        ))?;
        let calls: Vec<DbCallRecord> = call_stmt
            .query_map(params![org_id], map_call_row)?
            .collect::<rusqlite::Result<_>>()?;

        let mut meeting_stmt = self.conn.prepare(&format!(
            "SELECT {MEETING_COLUMNS} FROM meetings
             WHERE org_id = ?1 ORDER BY created_at ASC"
        ))?;
        let meetings: Vec<DbMeeting> = meeting_stmt
            .query_map(params![org_id], map_meeting_row)?
            .collect::<rusqlite::Result<_>>()?;

        Ok(OrgHistory {
            organization,
            contacts,
            events,
            sequences,
            touches,
            replies,
            calls,
            meetings,
        })
    }
}

fn map_suppression_row(row: &Row) -> rusqlite::Result<DbSuppression> {
    Ok(DbSuppression {
        id: row.get(0)?,
        email: row.get(1)?,
        domain: row.get(2)?,
        reason: row.get(3)?,
        source: row.get(4)?,
        suppressed_at: row.get(5)?,
    })
}

fn map_reply_row(row: &Row) -> rusqlite::Result<DbInboundReply> {
    Ok(DbInboundReply {
        id: row.get(0)?,
        org_id: row.get(1)?,
        contact_id: row.get(2)?,
        touch_id: row.get(3)?,
        reply_text: row.get(4)?,
        received_at: row.get(5)?,
        classification: row.get(6)?,
        classification_reasoning: row.get(7)?,
        key_phrase: row.get(8)?,
        classified_at: row.get(9)?,
        recontact_date: row.get(10)?,
        recontact_note: row.get(11)?,
        actioned: row.get(12)?,
        created_at: row.get(13)?,
    })
}

fn map_call_row(row: &Row) -> rusqlite::Result<DbCallRecord> {
    Ok(DbCallRecord {
        id: row.get(0)?,
        org_id: row.get(1)?,
        contact_id: row.get(2)?,
        call_permission_granted: row.get(3)?,
        call_permission_granted_at: row.get(4)?,
        provider_call_id: row.get(5)?,
        provider_agent_id: row.get(6)?,
        call_status: row.get(7)?,
        transcript: row.get(8)?,
        call_successful: row.get(9)?,
        initiated_at: row.get(10)?,
        completed_at: row.get(11)?,
        agreed_slot: row.get(12)?,
        notes: row.get(13)?,
        created_at: row.get(14)?,
    })
}

fn map_meeting_row(row: &Row) -> rusqlite::Result<DbMeeting> {
    Ok(DbMeeting {
        id: row.get(0)?,
        org_id: row.get(1)?,
        contact_id: row.get(2)?,
        call_record_id: row.get(3)?,
        calendar_event_id: row.get(4)?,
        html_link: row.get(5)?,
        meet_link: row.get(6)?,
        scheduled_start: row.get(7)?,
        scheduled_end: row.get(8)?,
        timezone: row.get(9)?,
        status: row.get(10)?,
        outcome_notes: row.get(11)?,
        confirmation_email_draft: row.get(12)?,
        event_verified: row.get(13)?,
        created_at: row.get(14)?,
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::test_db;
    use super::*;

    fn make_org(db: &PipelineDb) -> DbOrganization {
        db.upsert_organization(&NewOrganization {
            name: "Acme".to_string(),
            domain: "acme.com".to_string(),
            ..Default::default()
        })
        .expect("org")
    }

    fn make_contact(db: &PipelineDb, org_id: &str, email: &str) -> DbContact {
        db.upsert_contact(&NewContact {
            email: email.to_string(),
            org_id: Some(org_id.to_string()),
            ..Default::default()
        })
        .expect("contact")
    }

    #[test]
    fn test_suppression_first_writer_wins() {
        let db = test_db();
        let first = db
            .add_suppression("Jane@Acme.com", Some("asked to stop"), SuppressionSource::Manual)
            .expect("first");
        assert_eq!(first.email, "jane@acme.com");
        assert_eq!(first.domain, Some("acme.com".to_string()));

        let second = db
            .add_suppression("jane@acme.com", Some("bounced"), SuppressionSource::Bounce)
            .expect("second");
        assert_eq!(second.id, first.id);
        assert_eq!(second.source, SuppressionSource::Manual, "original entry kept");
        assert_eq!(second.reason, Some("asked to stop".to_string()));

        assert!(db.is_suppressed("JANE@ACME.COM").expect("check"));
        assert!(!db.is_suppressed("other@acme.com").expect("check"));
    }

    #[test]
    fn test_record_reply_plain() {
        let db = test_db();
        let org = make_org(&db);
        let reply = db
            .record_reply(&NewInboundReply {
                org_id: Some(org.id.clone()),
                reply_text: Some("Sounds interesting, tell me more".to_string()),
                classification: Some(ReplyClassification::Interested),
                classification_reasoning: Some("asks for more detail".to_string()),
                ..Default::default()
            })
            .expect("reply");
        assert_eq!(reply.classification, Some(ReplyClassification::Interested));
        assert!(reply.classified_at.is_some());
        assert!(!reply.actioned);

        db.mark_reply_actioned(&reply.id).expect("action");
        let after = db.get_reply(&reply.id).expect("get").expect("some");
        assert!(after.actioned);
        assert!(db.unactioned_replies().expect("pending").is_empty());
    }

    #[test]
    fn test_unsubscribe_reply_suppresses_and_cancels() {
        let db = test_db();
        let org = make_org(&db);
        let contact = make_contact(&db, &org.id, "jane@acme.com");

        let touches: Vec<NewTouch> = (1..=3)
            .map(|n| NewTouch {
                touch_number: n,
                scheduled_date: Some(format!("2026-03-0{n}T09:00:00Z")),
                subject: None,
                body: None,
            })
            .collect();
        let sequence = db
            .create_sequence(Some(&org.id), Some(&contact.id), &touches, None, None)
            .expect("sequence");

        db.record_reply(&NewInboundReply {
            org_id: Some(org.id.clone()),
            sender_email: Some("jane@acme.com".to_string()),
            reply_text: Some("unsubscribe".to_string()),
            classification: Some(ReplyClassification::Unsubscribe),
            ..Default::default()
        })
        .expect("reply");

        assert!(db.is_suppressed("jane@acme.com").expect("suppressed"));
        let remaining = db.touches_for_sequence(&sequence.id).expect("touches");
        assert!(remaining.iter().all(|t| t.status == TouchStatus::Cancelled));
    }

    #[test]
    fn test_unsubscribe_resolves_contact_from_sender_email() {
        let db = test_db();
        let org = make_org(&db);
        let contact = make_contact(&db, &org.id, "jane@acme.com");
        let touches = vec![NewTouch {
            touch_number: 1,
            scheduled_date: Some("2026-03-01T09:00:00Z".to_string()),
            subject: None,
            body: None,
        }];
        let sequence = db
            .create_sequence(Some(&org.id), Some(&contact.id), &touches, None, None)
            .expect("sequence");

        // No contact_id supplied; the sender email resolves it.
        db.record_reply(&NewInboundReply {
            sender_email: Some("JANE@acme.com".to_string()),
            classification: Some(ReplyClassification::Unsubscribe),
            ..Default::default()
        })
        .expect("reply");

        let remaining = db.touches_for_sequence(&sequence.id).expect("touches");
        assert_eq!(remaining[0].status, TouchStatus::Cancelled);
    }

    #[test]
    fn test_unsubscribe_rolls_back_whole_write_on_bad_email() {
        let db = test_db();
        // A sender address the suppression insert will reject: the reply
        // insert before it must not survive either.
        let err = db
            .record_reply(&NewInboundReply {
                sender_email: Some("not-an-email".to_string()),
                classification: Some(ReplyClassification::Unsubscribe),
                ..Default::default()
            })
            .expect_err("bad sender email");
        assert!(err.is_identity_error());

        let count: i32 = db
            .conn_ref()
            .query_row("SELECT COUNT(*) FROM inbound_replies", [], |row| row.get(0))
            .expect("count");
        assert_eq!(count, 0, "reply insert rolled back");
    }

    #[test]
    fn test_call_gate_rejects_without_grant() {
        let db = test_db();
        let org = make_org(&db);

        let err = db
            .record_call(&NewCallRecord {
                org_id: Some(org.id.clone()),
                call_status: Some(CallStatus::Initiated),
                ..Default::default()
            })
            .expect_err("no grant yet");
        assert!(matches!(err, DbError::CallPermissionMissing { .. }));

        // The rejected attempt left nothing behind.
        let count: i32 = db
            .conn_ref()
            .query_row("SELECT COUNT(*) FROM call_records", [], |row| row.get(0))
            .expect("count");
        assert_eq!(count, 0);
    }

    #[test]
    fn test_call_gate_opens_after_grant() {
        let db = test_db();
        let org = make_org(&db);

        let grant = db
            .grant_call_permission(&org.id, None, Some("2026-02-01T10:00:00Z"))
            .expect("grant");
        assert!(grant.call_permission_granted);
        assert!(db.has_call_permission(&org.id).expect("check"));

        let call = db
            .record_call(&NewCallRecord {
                org_id: Some(org.id.clone()),
                call_status: Some(CallStatus::Completed),
                provider_call_id: Some("call-abc".to_string()),
                call_successful: Some(true),
                ..Default::default()
            })
            .expect("call allowed after grant");
        assert_eq!(call.call_status, Some(CallStatus::Completed));
    }

    #[test]
    fn test_call_gate_rejects_attempt_predating_grant() {
        let db = test_db();
        let org = make_org(&db);
        db.grant_call_permission(&org.id, None, Some("2026-02-01T10:00:00Z"))
            .expect("grant");

        // Initiated an hour before permission existed: the grant does not
        // cover it, backdated or not.
        let err = db
            .record_call(&NewCallRecord {
                org_id: Some(org.id.clone()),
                call_status: Some(CallStatus::Completed),
                initiated_at: Some("2026-02-01T09:00:00Z".to_string()),
                ..Default::default()
            })
            .expect_err("attempt predates the grant");
        assert!(matches!(err, DbError::CallPermissionMissing { .. }));

        // Initiated after the grant: accepted.
        let call = db
            .record_call(&NewCallRecord {
                org_id: Some(org.id.clone()),
                call_status: Some(CallStatus::Completed),
                initiated_at: Some("2026-02-01T11:00:00Z".to_string()),
                ..Default::default()
            })
            .expect("attempt after the grant");
        assert_eq!(call.initiated_at, Some("2026-02-01T11:00:00Z".to_string()));
    }

    #[test]
    fn test_skipped_call_passes_without_grant() {
        let db = test_db();
        let org = make_org(&db);

        let skipped = db
            .record_call(&NewCallRecord {
                org_id: Some(org.id.clone()),
                call_status: Some(CallStatus::Skipped),
                notes: Some("no permission on file".to_string()),
                ..Default::default()
            })
            .expect("skip is always recordable");
        assert_eq!(skipped.call_status, Some(CallStatus::Skipped));
    }

    #[test]
    fn test_call_without_org_rejected_unless_skipped() {
        let db = test_db();
        let err = db
            .record_call(&NewCallRecord {
                call_status: Some(CallStatus::Initiated),
                ..Default::default()
            })
            .expect_err("no org, no grant possible");
        assert!(matches!(err, DbError::CallPermissionMissing { .. }));
    }

    #[test]
    fn test_record_meeting_and_status_update() {
        let db = test_db();
        let org = make_org(&db);
        let meeting = db
            .record_meeting(&NewMeeting {
                org_id: Some(org.id.clone()),
                calendar_event_id: Some("cal-evt-1".to_string()),
                scheduled_start: Some("2026-03-10T15:00:00Z".to_string()),
                scheduled_end: Some("2026-03-10T15:30:00Z".to_string()),
                timezone: Some("America/New_York".to_string()),
                event_verified: true,
                ..Default::default()
            })
            .expect("meeting");
        assert_eq!(meeting.status, MeetingStatus::Confirmed);
        assert!(meeting.event_verified);

        db.update_meeting_status(&meeting.id, MeetingStatus::NoShow, Some("did not join"))
            .expect("update");
        let after = db.get_meeting(&meeting.id).expect("get").expect("some");
        assert_eq!(after.status, MeetingStatus::NoShow);
        assert_eq!(after.outcome_notes, Some("did not join".to_string()));
    }

    #[test]
    fn test_org_history_assembles_everything() {
        let db = test_db();
        let org = make_org(&db);
        let contact = make_contact(&db, &org.id, "jane@acme.com");
        db.upsert_event(
            &org.id,
            &NewEvent {
                event_name: "Annual Summit".to_string(),
                ..Default::default()
            },
        )
        .expect("event");
        db.create_sequence(
            Some(&org.id),
            Some(&contact.id),
            &[NewTouch {
                touch_number: 1,
                scheduled_date: None,
                subject: None,
                body: None,
            }],
            None,
            None,
        )
        .expect("sequence");
        db.record_reply(&NewInboundReply {
            org_id: Some(org.id.clone()),
            classification: Some(ReplyClassification::Nurture),
            ..Default::default()
        })
        .expect("reply");
        db.grant_call_permission(&org.id, None, None).expect("grant");
        db.record_meeting(&NewMeeting {
            org_id: Some(org.id.clone()),
            ..Default::default()
        })
        .expect("meeting");

        let history = db.org_history(&org.id).expect("history");
        assert_eq!(history.contacts.len(), 1);
        assert_eq!(history.events.len(), 1);
        assert_eq!(history.sequences.len(), 1);
        assert_eq!(history.touches.len(), 1);
        assert_eq!(history.replies.len(), 1);
        assert_eq!(history.calls.len(), 1);
        assert_eq!(history.meetings.len(), 1);

        assert!(matches!(
            db.org_history("missing"),
            Err(DbError::NotFound { .. })
        ));
    }
}
