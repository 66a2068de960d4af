//! Shared type definitions for the database layer.
//!
//! Row structs mirror table columns one-to-one. Timestamps are RFC 3339
//! strings and dates are `YYYY-MM-DD` strings so SQLite range queries can
//! compare them lexicographically. Status-like columns are closed enums on
//! the Rust side (and CHECK constraints on the SQLite side) so an invalid
//! value can never round-trip through the store.

use std::fmt;
use std::str::FromStr;

use chrono::{Months, NaiveDate};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};

use crate::error::DbError;
use crate::stage::PipelineStage;

// ---------------------------------------------------------------------------
// Closed enums for status-like columns
// ---------------------------------------------------------------------------

/// Lifecycle of an email sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceStatus {
    Pending,
    Active,
    Completed,
    Paused,
    Cancelled,
}

impl SequenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SequenceStatus::Pending => "pending",
            SequenceStatus::Active => "active",
            SequenceStatus::Completed => "completed",
            SequenceStatus::Paused => "paused",
            SequenceStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for SequenceStatus {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SequenceStatus::Pending),
            "active" => Ok(SequenceStatus::Active),
            "completed" => Ok(SequenceStatus::Completed),
            "paused" => Ok(SequenceStatus::Paused),
            "cancelled" => Ok(SequenceStatus::Cancelled),
            other => Err(DbError::InvalidStatus(other.to_string())),
        }
    }
}

/// Lifecycle of a single touch within a sequence.
///
/// `scheduled -> sent` happens exactly once; `scheduled -> cancelled` only
/// while still scheduled. Sent touches are never retroactively cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TouchStatus {
    Scheduled,
    Sent,
    Bounced,
    Failed,
    Cancelled,
}

impl TouchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TouchStatus::Scheduled => "scheduled",
            TouchStatus::Sent => "sent",
            TouchStatus::Bounced => "bounced",
            TouchStatus::Failed => "failed",
            TouchStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for TouchStatus {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(TouchStatus::Scheduled),
            "sent" => Ok(TouchStatus::Sent),
            "bounced" => Ok(TouchStatus::Bounced),
            "failed" => Ok(TouchStatus::Failed),
            "cancelled" => Ok(TouchStatus::Cancelled),
            other => Err(DbError::InvalidStatus(other.to_string())),
        }
    }
}

/// How an inbound reply was classified by the reasoning collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplyClassification {
    Interested,
    Nurture,
    NotFit,
    Unsubscribe,
}

impl ReplyClassification {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplyClassification::Interested => "INTERESTED",
            ReplyClassification::Nurture => "NURTURE",
            ReplyClassification::NotFit => "NOT_FIT",
            ReplyClassification::Unsubscribe => "UNSUBSCRIBE",
        }
    }
}

impl FromStr for ReplyClassification {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INTERESTED" => Ok(ReplyClassification::Interested),
            "NURTURE" => Ok(ReplyClassification::Nurture),
            "NOT_FIT" => Ok(ReplyClassification::NotFit),
            "UNSUBSCRIBE" => Ok(ReplyClassification::Unsubscribe),
            other => Err(DbError::InvalidClassification(other.to_string())),
        }
    }
}

/// Why an email landed on the suppression list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionSource {
    Manual,
    UnsubscribeReply,
    Bounce,
}

impl SuppressionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuppressionSource::Manual => "manual",
            SuppressionSource::UnsubscribeReply => "unsubscribe_reply",
            SuppressionSource::Bounce => "bounce",
        }
    }
}

impl FromStr for SuppressionSource {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(SuppressionSource::Manual),
            "unsubscribe_reply" => Ok(SuppressionSource::UnsubscribeReply),
            "bounce" => Ok(SuppressionSource::Bounce),
            other => Err(DbError::InvalidSource(other.to_string())),
        }
    }
}

/// Outcome status of a voice-call attempt. `Skipped` records a deliberate
/// decision not to call and is the only status the permission gate exempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallStatus {
    Skipped,
    Initiated,
    Completed,
    Failed,
    NoAnswer,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Skipped => "SKIPPED",
            CallStatus::Initiated => "INITIATED",
            CallStatus::Completed => "COMPLETED",
            CallStatus::Failed => "FAILED",
            CallStatus::NoAnswer => "NO_ANSWER",
        }
    }
}

impl FromStr for CallStatus {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SKIPPED" => Ok(CallStatus::Skipped),
            "INITIATED" => Ok(CallStatus::Initiated),
            "COMPLETED" => Ok(CallStatus::Completed),
            "FAILED" => Ok(CallStatus::Failed),
            "NO_ANSWER" => Ok(CallStatus::NoAnswer),
            other => Err(DbError::InvalidStatus(other.to_string())),
        }
    }
}

/// Status of a booked meeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeetingStatus {
    Confirmed,
    Cancelled,
    Completed,
    NoShow,
}

impl MeetingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeetingStatus::Confirmed => "confirmed",
            MeetingStatus::Cancelled => "cancelled",
            MeetingStatus::Completed => "completed",
            MeetingStatus::NoShow => "no_show",
        }
    }
}

impl FromStr for MeetingStatus {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confirmed" => Ok(MeetingStatus::Confirmed),
            "cancelled" => Ok(MeetingStatus::Cancelled),
            "completed" => Ok(MeetingStatus::Completed),
            "no_show" => Ok(MeetingStatus::NoShow),
            other => Err(DbError::InvalidStatus(other.to_string())),
        }
    }
}

/// Recurrence cadence of a discovered event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrencePeriod {
    Annual,
    Quarterly,
    Biannual,
}

impl RecurrencePeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecurrencePeriod::Annual => "annual",
            RecurrencePeriod::Quarterly => "quarterly",
            RecurrencePeriod::Biannual => "biannual",
        }
    }
}

impl FromStr for RecurrencePeriod {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "annual" => Ok(RecurrencePeriod::Annual),
            "quarterly" => Ok(RecurrencePeriod::Quarterly),
            "biannual" => Ok(RecurrencePeriod::Biannual),
            other => Err(DbError::InvalidStatus(other.to_string())),
        }
    }
}

macro_rules! impl_text_sql {
    ($($ty:ty),+) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(self.as_str())
                }
            }

            impl ToSql for $ty {
                fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                    Ok(ToSqlOutput::from(self.as_str()))
                }
            }

            impl FromSql for $ty {
                fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                    value
                        .as_str()?
                        .parse()
                        .map_err(|e: DbError| FromSqlError::Other(Box::new(e)))
                }
            }
        )+
    };
}

impl_text_sql!(
    SequenceStatus,
    TouchStatus,
    ReplyClassification,
    SuppressionSource,
    CallStatus,
    MeetingStatus,
    RecurrencePeriod
);

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A row from the `organizations` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbOrganization {
    pub id: String,
    pub name: String,
    pub domain: String,
    pub website: Option<String>,
    pub description: Option<String>,
    pub org_type: Option<String>,
    pub employee_count_range: Option<String>,
    pub icp_score: Option<i64>,
    /// JSON object of per-dimension score breakdown.
    pub icp_score_dimensions: Option<String>,
    pub pipeline_stage: PipelineStage,
    pub why_fit: Option<String>,
    pub last_outreach_date: Option<String>,
    pub next_outreach_date: Option<String>,
    pub notes: Option<String>,
    pub disqualified: bool,
    pub disqualified_reason: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A row from the `contacts` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbContact {
    pub id: String,
    pub org_id: Option<String>,
    pub name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub title: Option<String>,
    pub email: String,
    pub email_verified: bool,
    pub verification_score: Option<i64>,
    pub phone: Option<String>,
    pub linkedin_url: Option<String>,
    pub is_primary: bool,
    pub last_verified_at: Option<String>,
    pub notes: Option<String>,
    pub created_at: String,
}

/// A row from the `events` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbEvent {
    pub id: String,
    pub org_id: String,
    pub event_name: String,
    pub event_type: Option<String>,
    /// ISO date (`YYYY-MM-DD`), possibly approximate.
    pub event_date: Option<String>,
    pub event_date_approximate: bool,
    pub event_date_notes: Option<String>,
    pub estimated_attendees: Option<String>,
    pub registration_url: Option<String>,
    pub is_recurring: bool,
    pub recurrence_period: Option<RecurrencePeriod>,
    pub discovered_at: String,
    pub created_at: String,
}

impl DbEvent {
    fn parsed_date(&self) -> Option<NaiveDate> {
        self.event_date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
    }

    /// Earliest date to begin outreach: event_date minus 12 months.
    pub fn outreach_window_open(&self) -> Option<NaiveDate> {
        self.parsed_date()?.checked_sub_months(Months::new(12))
    }

    /// Latest date to begin outreach: event_date minus 4 months.
    pub fn outreach_window_close(&self) -> Option<NaiveDate> {
        self.parsed_date()?.checked_sub_months(Months::new(4))
    }
}

/// A row from the `suppression_list` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbSuppression {
    pub id: String,
    pub email: String,
    pub domain: Option<String>,
    pub reason: Option<String>,
    pub source: SuppressionSource,
    pub suppressed_at: String,
}

/// A row from the `email_sequences` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbEmailSequence {
    pub id: String,
    pub org_id: Option<String>,
    pub contact_id: Option<String>,
    /// JSON snapshot of the ICP context the sequence was written against.
    /// Immutable once created.
    pub icp_profile_snapshot: Option<String>,
    pub personalization_hook: Option<String>,
    pub status: SequenceStatus,
    pub created_at: String,
    pub completed_at: Option<String>,
}

/// A row from the `email_touches` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbEmailTouch {
    pub id: String,
    pub sequence_id: String,
    pub org_id: Option<String>,
    pub contact_id: Option<String>,
    pub touch_number: i64,
    pub scheduled_date: Option<String>,
    pub sent_at: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub status: TouchStatus,
    pub message_id: Option<String>,
    pub created_at: String,
}

/// A row from the `inbound_replies` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbInboundReply {
    pub id: String,
    pub org_id: Option<String>,
    pub contact_id: Option<String>,
    pub touch_id: Option<String>,
    pub reply_text: Option<String>,
    pub received_at: String,
    pub classification: Option<ReplyClassification>,
    pub classification_reasoning: Option<String>,
    pub key_phrase: Option<String>,
    pub classified_at: Option<String>,
    pub recontact_date: Option<String>,
    pub recontact_note: Option<String>,
    pub actioned: bool,
    pub created_at: String,
}

/// A row from the `call_records` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbCallRecord {
    pub id: String,
    pub org_id: Option<String>,
    pub contact_id: Option<String>,
    pub call_permission_granted: bool,
    pub call_permission_granted_at: Option<String>,
    pub provider_call_id: Option<String>,
    pub provider_agent_id: Option<String>,
    pub call_status: Option<CallStatus>,
    pub transcript: Option<String>,
    pub call_successful: Option<bool>,
    pub initiated_at: Option<String>,
    pub completed_at: Option<String>,
    /// JSON object describing the slot agreed on the call, if any.
    pub agreed_slot: Option<String>,
    pub notes: Option<String>,
    pub created_at: String,
}

/// A row from the `meetings` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbMeeting {
    pub id: String,
    pub org_id: Option<String>,
    pub contact_id: Option<String>,
    pub call_record_id: Option<String>,
    pub calendar_event_id: Option<String>,
    pub html_link: Option<String>,
    pub meet_link: Option<String>,
    pub scheduled_start: Option<String>,
    pub scheduled_end: Option<String>,
    pub timezone: Option<String>,
    pub status: MeetingStatus,
    pub outcome_notes: Option<String>,
    pub confirmation_email_draft: Option<String>,
    /// True only once the calendar collaborator has read the event back.
    pub event_verified: bool,
    pub created_at: String,
}

// ---------------------------------------------------------------------------
// Input structs for upserts and compound writes
// ---------------------------------------------------------------------------

/// Fields for an organization upsert, keyed by `domain`.
///
/// `None` means "not supplied" — on conflict the existing column value is
/// kept. Supplied fields overwrite unconditionally (last-writer-wins).
#[derive(Debug, Clone, Default)]
pub struct NewOrganization {
    pub name: String,
    pub domain: String,
    pub website: Option<String>,
    pub description: Option<String>,
    pub org_type: Option<String>,
    pub employee_count_range: Option<String>,
    pub icp_score: Option<i64>,
    pub icp_score_dimensions: Option<serde_json::Value>,
    pub why_fit: Option<String>,
    pub notes: Option<String>,
    /// Initial stage when the row is first inserted. Ignored on conflict:
    /// stage changes for existing rows go through the validated transition
    /// path, never through an upsert.
    pub initial_stage: Option<PipelineStage>,
}

/// Fields for a contact upsert, keyed by case-folded `email`.
#[derive(Debug, Clone, Default)]
pub struct NewContact {
    pub org_id: Option<String>,
    pub name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub title: Option<String>,
    pub email: String,
    pub email_verified: bool,
    pub verification_score: Option<i64>,
    pub phone: Option<String>,
    pub linkedin_url: Option<String>,
    pub is_primary: bool,
    pub notes: Option<String>,
}

/// Fields for an event upsert, keyed by `(org_id, event_name)`.
#[derive(Debug, Clone, Default)]
pub struct NewEvent {
    pub event_name: String,
    pub event_type: Option<String>,
    /// ISO date (`YYYY-MM-DD`).
    pub event_date: Option<String>,
    pub event_date_approximate: bool,
    pub event_date_notes: Option<String>,
    pub estimated_attendees: Option<String>,
    pub registration_url: Option<String>,
    pub is_recurring: bool,
    pub recurrence_period: Option<RecurrencePeriod>,
}

/// One touch supplied to `create_sequence`.
#[derive(Debug, Clone)]
pub struct NewTouch {
    pub touch_number: i64,
    pub scheduled_date: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
}

/// An inbound reply plus its classification, for the compound
/// `record_reply` write.
#[derive(Debug, Clone, Default)]
pub struct NewInboundReply {
    pub org_id: Option<String>,
    pub contact_id: Option<String>,
    pub touch_id: Option<String>,
    pub reply_text: Option<String>,
    /// Sender address; drives the UNSUBSCRIBE suppression side effect.
    pub sender_email: Option<String>,
    pub classification: Option<ReplyClassification>,
    pub classification_reasoning: Option<String>,
    pub key_phrase: Option<String>,
    pub recontact_date: Option<String>,
    pub recontact_note: Option<String>,
}

/// A call attempt or deliberate skip, for `record_call`.
#[derive(Debug, Clone, Default)]
pub struct NewCallRecord {
    pub org_id: Option<String>,
    pub contact_id: Option<String>,
    pub provider_call_id: Option<String>,
    pub provider_agent_id: Option<String>,
    pub call_status: Option<CallStatus>,
    pub transcript: Option<String>,
    pub call_successful: Option<bool>,
    pub initiated_at: Option<String>,
    pub completed_at: Option<String>,
    pub agreed_slot: Option<serde_json::Value>,
    pub notes: Option<String>,
}

/// A confirmed booking, for `record_meeting`.
#[derive(Debug, Clone, Default)]
pub struct NewMeeting {
    pub org_id: Option<String>,
    pub contact_id: Option<String>,
    pub call_record_id: Option<String>,
    pub calendar_event_id: Option<String>,
    pub html_link: Option<String>,
    pub meet_link: Option<String>,
    pub scheduled_start: Option<String>,
    pub scheduled_end: Option<String>,
    pub timezone: Option<String>,
    pub confirmation_email_draft: Option<String>,
    pub event_verified: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_round_trips() {
        assert_eq!(
            "unsubscribe_reply".parse::<SuppressionSource>().unwrap(),
            SuppressionSource::UnsubscribeReply
        );
        assert_eq!(
            "UNSUBSCRIBE".parse::<ReplyClassification>().unwrap(),
            ReplyClassification::Unsubscribe
        );
        assert_eq!("SKIPPED".parse::<CallStatus>().unwrap(), CallStatus::Skipped);
        assert_eq!("no_show".parse::<MeetingStatus>().unwrap(), MeetingStatus::NoShow);
    }

    #[test]
    fn test_invalid_source_rejected() {
        let err = "spite".parse::<SuppressionSource>().unwrap_err();
        assert!(matches!(err, DbError::InvalidSource(_)));
    }

    #[test]
    fn test_invalid_classification_rejected() {
        let err = "MAYBE".parse::<ReplyClassification>().unwrap_err();
        assert!(matches!(err, DbError::InvalidClassification(_)));
    }

    #[test]
    fn test_outreach_window_derivation() {
        let event = DbEvent {
            id: "evt-1".to_string(),
            org_id: "org-1".to_string(),
            event_name: "Annual Summit".to_string(),
            event_type: None,
            event_date: Some("2026-09-15".to_string()),
            event_date_approximate: false,
            event_date_notes: None,
            estimated_attendees: None,
            registration_url: None,
            is_recurring: true,
            recurrence_period: Some(RecurrencePeriod::Annual),
            discovered_at: "2025-09-01T00:00:00Z".to_string(),
            created_at: "2025-09-01T00:00:00Z".to_string(),
        };
        assert_eq!(
            event.outreach_window_open(),
            Some(NaiveDate::from_ymd_opt(2025, 9, 15).unwrap())
        );
        assert_eq!(
            event.outreach_window_close(),
            Some(NaiveDate::from_ymd_opt(2026, 5, 15).unwrap())
        );
    }

    #[test]
    fn test_window_none_without_date() {
        let event = DbEvent {
            id: "evt-2".to_string(),
            org_id: "org-1".to_string(),
            event_name: "TBD Conference".to_string(),
            event_type: None,
            event_date: None,
            event_date_approximate: true,
            event_date_notes: Some("organizer has not announced dates".to_string()),
            estimated_attendees: None,
            registration_url: None,
            is_recurring: false,
            recurrence_period: None,
            discovered_at: "2025-09-01T00:00:00Z".to_string(),
            created_at: "2025-09-01T00:00:00Z".to_string(),
        };
        assert_eq!(event.outreach_window_open(), None);
        assert_eq!(event.outreach_window_close(), None);
    }
}
