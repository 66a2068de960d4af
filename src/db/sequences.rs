use chrono::Utc;
use rusqlite::{params, Row};

use super::*;

const SEQUENCE_COLUMNS: &str = "id, org_id, contact_id, icp_profile_snapshot,
    personalization_hook, status, created_at, completed_at";

const TOUCH_COLUMNS: &str = "id, sequence_id, org_id, contact_id, touch_number,
    scheduled_date, sent_at, subject, body, status, message_id, created_at";

impl PipelineDb {
    // =========================================================================
    // Email sequences and touches
    // =========================================================================

    /// Create an email sequence with 1-3 touches.
    ///
    /// The sequence and its touches commit as one transaction: a sequence can
    /// never be observed with its touches missing, and a touch can never
    /// exist detached from a sequence. The ICP snapshot is stored as written
    /// and never updated afterwards.
    pub fn create_sequence(
        &self,
        org_id: Option<&str>,
        contact_id: Option<&str>,
        touches: &[NewTouch],
        hook: Option<&str>,
        icp_snapshot: Option<&serde_json::Value>,
    ) -> Result<DbEmailSequence, DbError> {
        if touches.is_empty() || touches.len() > 3 {
            return Err(DbError::EmptySequence);
        }
        for touch in touches {
            if !(1..=3).contains(&touch.touch_number) {
                return Err(DbError::TouchNumberOutOfRange(touch.touch_number));
            }
        }

        let sequence_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let snapshot = icp_snapshot.map(|v| v.to_string());

        self.with_transaction(|db| {
            db.conn.execute(
                "INSERT INTO email_sequences (
                    id, org_id, contact_id, icp_profile_snapshot,
                    personalization_hook, status, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    sequence_id,
                    org_id,
                    contact_id,
                    snapshot,
                    hook,
                    SequenceStatus::Active,
                    now,
                ],
            )?;

            for touch in touches {
                db.conn.execute(
                    "INSERT INTO email_touches (
                        id, sequence_id, org_id, contact_id, touch_number,
                        scheduled_date, subject, body, status, created_at
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        uuid::Uuid::new_v4().to_string(),
                        sequence_id,
                        org_id,
                        contact_id,
                        touch.touch_number,
                        touch.scheduled_date,
                        touch.subject,
                        touch.body,
                        TouchStatus::Scheduled,
                        now,
                    ],
                )?;
            }

            db.get_sequence(&sequence_id)?.ok_or(DbError::NotFound {
                entity: "email_sequence",
                id: sequence_id.clone(),
            })
        })
    }

    /// Get a sequence by ID.
    pub fn get_sequence(&self, id: &str) -> Result<Option<DbEmailSequence>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SEQUENCE_COLUMNS} FROM email_sequences WHERE id = ?1"
        ))?;
        let mut rows = stmt.query_map(params![id], map_sequence_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// All touches for a sequence, in touch order.
    pub fn touches_for_sequence(&self, sequence_id: &str) -> Result<Vec<DbEmailTouch>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TOUCH_COLUMNS} FROM email_touches
             WHERE sequence_id = ?1 ORDER BY touch_number ASC"
        ))?;
        let rows = stmt.query_map(params![sequence_id], map_touch_row)?;
        let mut touches = Vec::new();
        for row in rows {
            touches.push(row?);
        }
        Ok(touches)
    }

    /// Get a touch by ID.
    pub fn get_touch(&self, id: &str) -> Result<Option<DbEmailTouch>, DbError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {TOUCH_COLUMNS} FROM email_touches WHERE id = ?1"))?;
        let mut rows = stmt.query_map(params![id], map_touch_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Touches scheduled for `now` or earlier that haven't been sent,
    /// earliest first. This is the send-job work queue.
    pub fn pending_touches(&self, now: &str) -> Result<Vec<DbEmailTouch>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TOUCH_COLUMNS} FROM email_touches
             WHERE status = 'scheduled'
               AND scheduled_date IS NOT NULL
               AND scheduled_date <= ?1
             ORDER BY scheduled_date ASC"
        ))?;
        let rows = stmt.query_map(params![now], map_touch_row)?;
        let mut touches = Vec::new();
        for row in rows {
            touches.push(row?);
        }
        Ok(touches)
    }

    /// Mark a touch as sent with the provider message ID.
    ///
    /// `scheduled -> sent` happens exactly once. A retried send job calling
    /// this again with the same message ID gets the existing row back instead
    /// of an error; any other state is a rejected invariant violation.
    pub fn mark_touch_sent(
        &self,
        touch_id: &str,
        message_id: &str,
        sent_at: Option<&str>,
    ) -> Result<DbEmailTouch, DbError> {
        let sent_at = sent_at
            .map(str::to_string)
            .unwrap_or_else(|| Utc::now().to_rfc3339());

        self.with_transaction(|db| {
            let touch = db.get_touch(touch_id)?.ok_or(DbError::NotFound {
                entity: "email_touch",
                id: touch_id.to_string(),
            })?;

            match touch.status {
                TouchStatus::Scheduled => {
                    db.conn.execute(
                        "UPDATE email_touches
                         SET status = 'sent', message_id = ?1, sent_at = ?2
                         WHERE id = ?3",
                        params![message_id, sent_at, touch_id],
                    )?;
                    db.get_touch(touch_id)?.ok_or(DbError::NotFound {
                        entity: "email_touch",
                        id: touch_id.to_string(),
                    })
                }
                // Retried send job: same message id means the send already
                // happened. Not a failure.
                TouchStatus::Sent if touch.message_id.as_deref() == Some(message_id) => Ok(touch),
                _ => Err(DbError::TouchNotSendable {
                    touch_id: touch_id.to_string(),
                    status: touch.status.to_string(),
                }),
            }
        })
    }

    /// Cancel all still-scheduled touches in a sequence. Touches already
    /// sent, bounced, or failed are untouched. Returns the count actually
    /// cancelled; calling again returns 0.
    pub fn cancel_remaining_touches(&self, sequence_id: &str) -> Result<usize, DbError> {
        let count = self.conn.execute(
            "UPDATE email_touches SET status = 'cancelled'
             WHERE sequence_id = ?1 AND status = 'scheduled'",
            params![sequence_id],
        )?;
        if count > 0 {
            log::info!("Cancelled {count} touches for sequence {sequence_id}");
        }
        Ok(count)
    }

    /// Cancel every scheduled touch addressed to a contact, across all of
    /// their sequences, and mark those sequences cancelled. This is the
    /// UNSUBSCRIBE path.
    pub fn cancel_touches_for_contact(&self, contact_id: &str) -> Result<usize, DbError> {
        let count = self.conn.execute(
            "UPDATE email_touches SET status = 'cancelled'
             WHERE contact_id = ?1 AND status = 'scheduled'",
            params![contact_id],
        )?;
        self.conn.execute(
            "UPDATE email_sequences SET status = 'cancelled'
             WHERE contact_id = ?1 AND status IN ('pending', 'active', 'paused')",
            params![contact_id],
        )?;
        if count > 0 {
            log::info!("Cancelled {count} touches for contact {contact_id}");
        }
        Ok(count)
    }

    /// Mark a sequence completed once its final touch has gone out.
    pub fn complete_sequence(&self, sequence_id: &str) -> Result<(), DbError> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "UPDATE email_sequences SET status = 'completed', completed_at = ?1
             WHERE id = ?2",
            params![now, sequence_id],
        )?;
        Ok(())
    }
}

fn map_sequence_row(row: &Row) -> rusqlite::Result<DbEmailSequence> {
    Ok(DbEmailSequence {
        id: row.get(0)?,
        org_id: row.get(1)?,
        contact_id: row.get(2)?,
        icp_profile_snapshot: row.get(3)?,
        personalization_hook: row.get(4)?,
        status: row.get(5)?,
        created_at: row.get(6)?,
        completed_at: row.get(7)?,
    })
}

fn map_touch_row(row: &Row) -> rusqlite::Result<DbEmailTouch> {
    Ok(DbEmailTouch {
        id: row.get(0)?,
        sequence_id: row.get(1)?,
        org_id: row.get(2)?,
        contact_id: row.get(3)?,
        touch_number: row.get(4)?,
        scheduled_date: row.get(5)?,
        sent_at: row.get(6)?,
        subject: row.get(7)?,
        body: row.get(8)?,
        status: row.get(9)?,
        message_id: row.get(10)?,
        created_at: row.get(11)?,
    })
}
