use chrono::Utc;
use rusqlite::params;

use super::*;

/// A proposed change to how the pipeline operates, for human review.
#[derive(Debug, Clone, Default)]
pub struct NewSuggestion {
    pub source: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub proposed_change: Option<String>,
    pub supporting_evidence: Option<String>,
}

/// A conversion outcome tied back to the pipeline state that produced it.
/// Like the obs tables, identifier columns are loose references.
#[derive(Debug, Clone, Default)]
pub struct NewOutcomeFeedback {
    pub org_id: Option<String>,
    pub sequence_id: Option<String>,
    pub call_record_id: Option<String>,
    pub meeting_id: Option<String>,
    pub conversion_event: Option<String>,
    pub icp_score_at_time: Option<i64>,
    pub personalization_hook_used: Option<String>,
    pub email_touch_number: Option<i64>,
    pub days_since_first_touch: Option<i64>,
    pub notes: Option<String>,
}

impl PipelineDb {
    // =========================================================================
    // Improvement loop
    // =========================================================================

    /// Record a suggestion awaiting human review.
    pub fn add_suggestion(&self, suggestion: &NewSuggestion) -> Result<String, DbError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO improve_improvement_suggestions (
                id, source, category, description, proposed_change,
                supporting_evidence, status, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending_review', ?7)",
            params![
                id,
                suggestion.source,
                suggestion.category,
                suggestion.description,
                suggestion.proposed_change,
                suggestion.supporting_evidence,
                now,
            ],
        )?;
        Ok(id)
    }

    /// Record what a lead actually did, so scoring and messaging can be
    /// tuned against real conversions later.
    pub fn add_outcome_feedback(&self, feedback: &NewOutcomeFeedback) -> Result<String, DbError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO improve_outcome_feedback (
                id, org_id, sequence_id, call_record_id, meeting_id,
                conversion_event, icp_score_at_time, personalization_hook_used,
                email_touch_number, days_since_first_touch, notes, recorded_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                id,
                feedback.org_id,
                feedback.sequence_id,
                feedback.call_record_id,
                feedback.meeting_id,
                feedback.conversion_event,
                feedback.icp_score_at_time,
                feedback.personalization_hook_used,
                feedback.email_touch_number,
                feedback.days_since_first_touch,
                feedback.notes,
                now,
            ],
        )?;
        Ok(id)
    }

    /// Suggestions still waiting on a human decision, oldest first.
    /// Returned as (id, category, description) tuples for review listings.
    pub fn pending_suggestions(
        &self,
    ) -> Result<Vec<(String, Option<String>, Option<String>)>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, category, description FROM improve_improvement_suggestions
             WHERE status = 'pending_review' ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?;
        let mut suggestions = Vec::new();
        for row in rows {
            suggestions.push(row?);
        }
        Ok(suggestions)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::test_db;
    use super::*;

    #[test]
    fn test_suggestion_starts_pending() {
        let db = test_db();
        let id = db
            .add_suggestion(&NewSuggestion {
                source: Some("reply_analysis".to_string()),
                category: Some("messaging".to_string()),
                description: Some("Touch 2 open rates drop sharply".to_string()),
                proposed_change: Some("Shorten touch 2 subject lines".to_string()),
                ..Default::default()
            })
            .expect("suggestion");

        let pending = db.pending_suggestions().expect("pending");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].0, id);
        assert_eq!(pending[0].1, Some("messaging".to_string()));
    }

    #[test]
    fn test_outcome_feedback_insert() {
        let db = test_db();
        db.add_outcome_feedback(&NewOutcomeFeedback {
            org_id: Some("org-1".to_string()),
            conversion_event: Some("meeting_booked".to_string()),
            icp_score_at_time: Some(82),
            email_touch_number: Some(2),
            days_since_first_touch: Some(9),
            ..Default::default()
        })
        .expect("feedback");

        let count: i32 = db
            .conn_ref()
            .query_row("SELECT COUNT(*) FROM improve_outcome_feedback", [], |row| {
                row.get(0)
            })
            .expect("count");
        assert_eq!(count, 1);
    }
}
