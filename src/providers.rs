//! Collaborator seams. The orchestrator only ever talks to these traits;
//! the real integrations live elsewhere and tests substitute mocks.

use async_trait::async_trait;

use crate::types::{
    CallOutcome, EnrichedContact, MeetingConfirmation, ReplyAssessment, ScoredLead, SequenceDraft,
};

pub type ProviderError = Box<dyn std::error::Error + Send + Sync>;
pub type ProviderResult<T> = Result<T, ProviderError>;

/// The reasoning collaborator: discovery, scoring, drafting, classification.
#[async_trait]
pub trait ReasoningProvider: Send + Sync {
    /// Find and score leads, skipping domains and emails already known.
    async fn discover_and_score(
        &self,
        known_domains: &[String],
        known_emails: &[String],
    ) -> ProviderResult<Vec<ScoredLead>>;

    async fn draft_sequences(&self, leads: &[ScoredLead]) -> ProviderResult<Vec<SequenceDraft>>;

    async fn classify_reply(
        &self,
        sender_email: &str,
        reply_text: &str,
    ) -> ProviderResult<ReplyAssessment>;
}

/// The voice collaborator.
#[async_trait]
pub trait VoiceProvider: Send + Sync {
    async fn place_call(&self, phone: &str, context: &str) -> ProviderResult<CallOutcome>;
}

/// The calendar collaborator.
#[async_trait]
pub trait CalendarProvider: Send + Sync {
    async fn book_meeting(
        &self,
        attendee_email: &str,
        slot: &serde_json::Value,
    ) -> ProviderResult<MeetingConfirmation>;
}

/// The contact-enrichment collaborator.
#[async_trait]
pub trait EnrichmentProvider: Send + Sync {
    async fn find_contacts(&self, org_domain: &str) -> ProviderResult<Vec<EnrichedContact>>;
}
