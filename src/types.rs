//! Records exchanged with the reasoning, voice, calendar, and enrichment
//! collaborators. These are the orchestrator's input shapes; everything here
//! is untrusted until the database layer validates and persists it.

use serde::{Deserialize, Serialize};

use crate::db::{CallStatus, RecurrencePeriod, ReplyClassification};

/// A lead the reasoning collaborator discovered and scored, ready to be
/// persisted as an organization plus its event and contacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredLead {
    pub org_name: String,
    /// Website URL; the dedup domain is parsed from this.
    pub website: Option<String>,
    pub description: Option<String>,
    pub org_type: Option<String>,
    pub employee_count_range: Option<String>,
    /// 0-100 fit score.
    pub icp_score: Option<i64>,
    pub icp_score_dimensions: Option<serde_json::Value>,
    pub why_fit: Option<String>,
    pub event_name: Option<String>,
    pub event_type: Option<String>,
    /// ISO date (`YYYY-MM-DD`).
    pub event_date: Option<String>,
    #[serde(default)]
    pub event_date_approximate: bool,
    pub event_date_notes: Option<String>,
    pub estimated_attendees: Option<String>,
    pub registration_url: Option<String>,
    #[serde(default)]
    pub is_recurring: bool,
    pub recurrence_period: Option<RecurrencePeriod>,
    #[serde(default)]
    pub contacts: Vec<EnrichedContact>,
}

/// A contact found by the enrichment collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedContact {
    pub email: String,
    pub name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub title: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    pub verification_score: Option<i64>,
    pub phone: Option<String>,
    pub linkedin_url: Option<String>,
    #[serde(default)]
    pub is_primary: bool,
}

/// A drafted email sequence for one organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceDraft {
    /// Dedup domain of the target organization.
    pub org_domain: String,
    pub personalization_hook: Option<String>,
    pub icp_profile_snapshot: Option<serde_json::Value>,
    /// 1-3 drafted emails.
    pub touches: Vec<TouchDraft>,
}

/// One drafted email within a sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TouchDraft {
    pub touch_number: i64,
    /// RFC 3339 send time.
    pub scheduled_date: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
}

/// The reasoning collaborator's read of an inbound reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyAssessment {
    pub sender_email: String,
    pub reply_text: Option<String>,
    pub touch_id: Option<String>,
    pub classification: ReplyClassification,
    pub classification_reasoning: Option<String>,
    pub key_phrase: Option<String>,
    /// For NURTURE: when to reach out again (`YYYY-MM-DD`).
    pub recontact_date: Option<String>,
    pub recontact_note: Option<String>,
}

/// What came back from a voice-call attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallOutcome {
    pub org_domain: String,
    pub contact_email: Option<String>,
    pub provider_call_id: Option<String>,
    pub provider_agent_id: Option<String>,
    pub call_status: CallStatus,
    pub transcript: Option<String>,
    pub call_successful: Option<bool>,
    pub initiated_at: Option<String>,
    pub completed_at: Option<String>,
    pub agreed_slot: Option<serde_json::Value>,
    pub notes: Option<String>,
}

/// A calendar booking confirmed by the calendar collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingConfirmation {
    pub calendar_event_id: Option<String>,
    pub html_link: Option<String>,
    pub meet_link: Option<String>,
    pub scheduled_start: Option<String>,
    pub scheduled_end: Option<String>,
    pub timezone: Option<String>,
    pub confirmation_email_draft: Option<String>,
    /// True only if the collaborator read the event back after creating it.
    #[serde(default)]
    pub event_verified: bool,
}
