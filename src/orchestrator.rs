//! Per-run pipeline orchestration.
//!
//! Runs are fail-soft: a lead that cannot be persisted is logged with its
//! identifiers and skipped, and the run moves on. The transactions inside the
//! database layer stay fail-hard; partial aggregates are never committed.
//! Observability rows are best-effort and never abort a run.

use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use url::Url;

use crate::db::{
    AgentRunEntry, DbCallRecord, DbInboundReply, DbMeeting, NewCallRecord, NewContact, NewEvent,
    NewInboundReply, NewOrganization, NewTouch, PipelineDb,
};
use crate::error::DbError;
use crate::providers::{CalendarProvider, ReasoningProvider, VoiceProvider};
use crate::stage::PipelineStage;
use crate::types::{CallOutcome, MeetingConfirmation, ReplyAssessment, ScoredLead, SequenceDraft};

/// Outcome counts for one fail-soft run stage.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub attempted: usize,
    pub persisted: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Drives the pipeline stages against the store. The store sits behind a
/// mutex; guards are always dropped before awaiting a collaborator.
pub struct Orchestrator {
    db: Mutex<PipelineDb>,
}

impl Orchestrator {
    pub fn new(db: PipelineDb) -> Self {
        Self { db: Mutex::new(db) }
    }

    /// Borrow the store, recovering from a poisoned lock: SQLite state is
    /// consistent even if a previous holder panicked mid-read.
    pub fn db(&self) -> MutexGuard<'_, PipelineDb> {
        self.db.lock().unwrap_or_else(|e| e.into_inner())
    }

    // =========================================================================
    // Discovery
    // =========================================================================

    /// Run discovery: read known identities, ask the reasoning collaborator
    /// for new scored leads, and persist them.
    ///
    /// The pre-flight reads are soft; if the store cannot be read the
    /// collaborator just gets empty exclusion sets and dedup happens at
    /// persist time anyway. A collaborator failure ends the stage with
    /// nothing written.
    pub async fn run_discovery(&self, reasoning: &dyn ReasoningProvider) -> RunReport {
        let started_at = Utc::now().to_rfc3339();

        let (known_domains, known_emails) = {
            let db = self.db();
            let domains = db.known_domains().unwrap_or_else(|e| {
                log::warn!("Pre-flight domain read failed, continuing with empty set: {e}");
                Default::default()
            });
            let emails = db.known_emails().unwrap_or_else(|e| {
                log::warn!("Pre-flight email read failed, continuing with empty set: {e}");
                Default::default()
            });
            (
                domains.into_iter().collect::<Vec<_>>(),
                emails.into_iter().collect::<Vec<_>>(),
            )
        };

        let leads = match reasoning.discover_and_score(&known_domains, &known_emails).await {
            Ok(leads) => leads,
            Err(e) => {
                log::error!("Discovery collaborator failed: {e}");
                self.log_run_soft("discovery", 1, &started_at, false, Some(&e.to_string()));
                return RunReport {
                    failed: 1,
                    ..Default::default()
                };
            }
        };

        let report = self.persist_leads(&leads);
        self.log_run_soft("discovery", 1, &started_at, report.failed == 0, None);
        report
    }

    /// Persist scored leads, one transaction per lead. Leads without a
    /// parseable website domain are skipped with a warning; a lead that
    /// fails to persist is logged and does not stop the rest.
    pub fn persist_leads(&self, leads: &[ScoredLead]) -> RunReport {
        let mut report = RunReport {
            attempted: leads.len(),
            ..Default::default()
        };
        let db = self.db();

        for lead in leads {
            let Some(domain) = lead
                .website
                .as_deref()
                .and_then(domain_from_website)
            else {
                log::warn!(
                    "Skipping lead {:?}: no parseable domain in website {:?}",
                    lead.org_name,
                    lead.website
                );
                report.skipped += 1;
                continue;
            };

            let result = db.with_transaction(|db| {
                let org = db.upsert_organization(&NewOrganization {
                    name: lead.org_name.clone(),
                    domain: domain.clone(),
                    website: lead.website.clone(),
                    description: lead.description.clone(),
                    org_type: lead.org_type.clone(),
                    employee_count_range: lead.employee_count_range.clone(),
                    icp_score: lead.icp_score,
                    icp_score_dimensions: lead.icp_score_dimensions.clone(),
                    why_fit: lead.why_fit.clone(),
                    notes: None,
                    initial_stage: Some(PipelineStage::Scored),
                })?;

                if let Some(event_name) = lead.event_name.as_deref() {
                    db.upsert_event(
                        &org.id,
                        &NewEvent {
                            event_name: event_name.to_string(),
                            event_type: lead.event_type.clone(),
                            event_date: lead.event_date.clone(),
                            event_date_approximate: lead.event_date_approximate,
                            event_date_notes: lead.event_date_notes.clone(),
                            estimated_attendees: lead.estimated_attendees.clone(),
                            registration_url: lead.registration_url.clone(),
                            is_recurring: lead.is_recurring,
                            recurrence_period: lead.recurrence_period,
                        },
                    )?;
                }

                for contact in &lead.contacts {
                    db.upsert_contact(&NewContact {
                        org_id: Some(org.id.clone()),
                        name: contact.name.clone(),
                        first_name: contact.first_name.clone(),
                        last_name: contact.last_name.clone(),
                        title: contact.title.clone(),
                        email: contact.email.clone(),
                        email_verified: contact.email_verified,
                        verification_score: contact.verification_score,
                        phone: contact.phone.clone(),
                        linkedin_url: contact.linkedin_url.clone(),
                        is_primary: contact.is_primary,
                        notes: None,
                    })?;
                }
                Ok(())
            });

            match result {
                Ok(()) => report.persisted += 1,
                Err(e) => {
                    log::error!("Failed to persist lead {:?} ({domain}): {e}", lead.org_name);
                    report.failed += 1;
                }
            }
        }
        report
    }

    // =========================================================================
    // Campaign persistence
    // =========================================================================

    /// Persist drafted sequences. Per-draft fail-soft: a draft whose org is
    /// unknown, whose contact is suppressed, or whose write fails is logged
    /// and skipped.
    pub fn persist_campaign(&self, drafts: &[SequenceDraft]) -> RunReport {
        let started_at = Utc::now().to_rfc3339();
        let mut report = RunReport {
            attempted: drafts.len(),
            ..Default::default()
        };
        let db = self.db();

        for draft in drafts {
            match self.persist_one_draft(&db, draft) {
                Ok(true) => report.persisted += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    log::error!("Failed to persist sequence for {}: {e}", draft.org_domain);
                    report.failed += 1;
                }
            }
        }
        drop(db);

        self.log_run_soft("campaign", 2, &started_at, report.failed == 0, None);
        report
    }

    fn persist_one_draft(&self, db: &PipelineDb, draft: &SequenceDraft) -> Result<bool, DbError> {
        let Some(org) = db.get_organization_by_domain(&draft.org_domain)? else {
            log::warn!("Skipping draft for unknown org domain {}", draft.org_domain);
            return Ok(false);
        };
        let Some(contact) = db.primary_contact_for_org(&org.id)? else {
            log::warn!("Skipping draft for {}: no contact on file", draft.org_domain);
            return Ok(false);
        };
        if db.is_suppressed(&contact.email)? {
            log::warn!(
                "Skipping draft for {}: contact {} is suppressed",
                draft.org_domain,
                contact.email
            );
            return Ok(false);
        }

        let touches: Vec<NewTouch> = draft
            .touches
            .iter()
            .map(|t| NewTouch {
                touch_number: t.touch_number,
                scheduled_date: t.scheduled_date.clone(),
                subject: t.subject.clone(),
                body: t.body.clone(),
            })
            .collect();

        db.create_sequence(
            Some(&org.id),
            Some(&contact.id),
            &touches,
            draft.personalization_hook.as_deref(),
            draft.icp_profile_snapshot.as_ref(),
        )?;

        self.advance_stage_soft(db, &org.id, &[PipelineStage::Qualified, PipelineStage::InSequence]);

        let first_send = draft
            .touches
            .iter()
            .filter_map(|t| t.scheduled_date.as_deref())
            .min();
        if first_send.is_some() {
            db.set_outreach_dates(&org.id, None, first_send)?;
        }
        Ok(true)
    }

    // =========================================================================
    // Reply handling
    // =========================================================================

    /// Record a classified inbound reply and do the stage bookkeeping its
    /// classification implies. The compound write is fail-hard; the stage
    /// bookkeeping is fail-soft (an org that is elsewhere in the pipeline
    /// keeps its stage, with a warning).
    pub fn handle_reply(&self, assessment: &ReplyAssessment) -> Result<DbInboundReply, DbError> {
        use crate::db::ReplyClassification::*;

        let started_at = Utc::now().to_rfc3339();
        let db = self.db();

        let resolved = db.resolve_by_email(&assessment.sender_email)?;
        let (org_id, contact_id) = match &resolved {
            Some((org_id, contact)) => (org_id.clone(), Some(contact.id.clone())),
            None => {
                log::warn!(
                    "Reply from unknown sender {}; recording without links",
                    assessment.sender_email
                );
                (None, None)
            }
        };

        let reply = db.record_reply(&NewInboundReply {
            org_id: org_id.clone(),
            contact_id,
            touch_id: assessment.touch_id.clone(),
            reply_text: assessment.reply_text.clone(),
            sender_email: Some(assessment.sender_email.clone()),
            classification: Some(assessment.classification),
            classification_reasoning: assessment.classification_reasoning.clone(),
            key_phrase: assessment.key_phrase.clone(),
            recontact_date: assessment.recontact_date.clone(),
            recontact_note: assessment.recontact_note.clone(),
        })?;

        if let Some(org_id) = org_id.as_deref() {
            match assessment.classification {
                Interested => {
                    self.advance_stage_soft(&db, org_id, &[PipelineStage::RepliedInterested]);
                }
                Nurture => {
                    self.advance_stage_soft(&db, org_id, &[PipelineStage::Nurture]);
                    if assessment.recontact_date.is_some() {
                        db.set_outreach_dates(org_id, None, assessment.recontact_date.as_deref())?;
                    }
                }
                Unsubscribe => {
                    self.advance_stage_soft(&db, org_id, &[PipelineStage::Unsubscribed]);
                }
                NotFit => {
                    self.advance_stage_soft(&db, org_id, &[PipelineStage::ClosedLost]);
                }
            }
        }

        db.mark_reply_actioned(&reply.id)?;
        drop(db);

        self.log_run_soft("reply_handler", 3, &started_at, true, None);
        self.db().get_reply(&reply.id)?.ok_or(DbError::NotFound {
            entity: "inbound_reply",
            id: reply.id,
        })
    }

    // =========================================================================
    // Calls and booking
    // =========================================================================

    /// Place a permission-gated call and, when the prospect agreed on a
    /// slot, book the meeting. Without a grant on file no call is placed; a
    /// SKIPPED record documents the decision.
    pub async fn run_call(
        &self,
        voice: &dyn VoiceProvider,
        calendar: &dyn CalendarProvider,
        org_domain: &str,
        context: &str,
    ) -> Result<Option<DbMeeting>, DbError> {
        let (phone, contact_email) = {
            let db = self.db();
            let org = db
                .get_organization_by_domain(org_domain)?
                .ok_or(DbError::NotFound {
                    entity: "organization",
                    id: org_domain.to_string(),
                })?;

            if !db.has_call_permission(&org.id)? {
                log::info!("No call permission for {org_domain}; recording skip");
                db.record_call(&NewCallRecord {
                    org_id: Some(org.id.clone()),
                    call_status: Some(crate::db::CallStatus::Skipped),
                    notes: Some("no permission grant on file".to_string()),
                    ..Default::default()
                })?;
                return Ok(None);
            }

            let contact = db.primary_contact_for_org(&org.id)?;
            let phone = contact.as_ref().and_then(|c| c.phone.clone());
            let email = contact.map(|c| c.email);
            (phone, email)
        };

        let Some(phone) = phone else {
            log::warn!("No phone number on file for {org_domain}; skipping call");
            return Ok(None);
        };

        let outcome = match voice.place_call(&phone, context).await {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("Voice collaborator failed for {org_domain}: {e}");
                return Ok(None);
            }
        };

        let confirmation = match (&outcome.agreed_slot, contact_email.as_deref()) {
            (Some(slot), Some(email)) => match calendar.book_meeting(email, slot).await {
                Ok(confirmation) => Some(confirmation),
                Err(e) => {
                    log::error!("Calendar collaborator failed for {org_domain}: {e}");
                    None
                }
            },
            _ => None,
        };

        let (_, meeting) = self.handle_booking(&outcome, confirmation.as_ref())?;
        Ok(meeting)
    }

    /// Persist a call outcome and, when confirmed, its meeting. The
    /// permission gate inside `record_call` is fail-hard: an ungated call
    /// outcome is an error, not a skip.
    pub fn handle_booking(
        &self,
        outcome: &CallOutcome,
        confirmation: Option<&MeetingConfirmation>,
    ) -> Result<(DbCallRecord, Option<DbMeeting>), DbError> {
        let started_at = Utc::now().to_rfc3339();
        let db = self.db();

        let org = db.get_organization_by_domain(&outcome.org_domain)?;
        let org_id = org.as_ref().map(|o| o.id.clone());
        let contact_id = match outcome.contact_email.as_deref() {
            Some(email) => db.get_contact_by_email(email)?.map(|c| c.id),
            None => None,
        };

        let call = db.record_call(&NewCallRecord {
            org_id: org_id.clone(),
            contact_id: contact_id.clone(),
            provider_call_id: outcome.provider_call_id.clone(),
            provider_agent_id: outcome.provider_agent_id.clone(),
            call_status: Some(outcome.call_status),
            transcript: outcome.transcript.clone(),
            call_successful: outcome.call_successful,
            initiated_at: outcome.initiated_at.clone(),
            completed_at: outcome.completed_at.clone(),
            agreed_slot: outcome.agreed_slot.clone(),
            notes: outcome.notes.clone(),
        })?;

        let mut meeting = None;
        if let Some(org_id) = org_id.as_deref() {
            self.advance_stage_soft(&db, org_id, &[PipelineStage::CallAttempted]);
        }

        if let Some(confirmation) = confirmation {
            let recorded = db.record_meeting(&crate::db::NewMeeting {
                org_id: org_id.clone(),
                contact_id,
                call_record_id: Some(call.id.clone()),
                calendar_event_id: confirmation.calendar_event_id.clone(),
                html_link: confirmation.html_link.clone(),
                meet_link: confirmation.meet_link.clone(),
                scheduled_start: confirmation.scheduled_start.clone(),
                scheduled_end: confirmation.scheduled_end.clone(),
                timezone: confirmation.timezone.clone(),
                confirmation_email_draft: confirmation.confirmation_email_draft.clone(),
                event_verified: confirmation.event_verified,
            })?;
            if let Some(org_id) = org_id.as_deref() {
                self.advance_stage_soft(&db, org_id, &[PipelineStage::Booked]);
            }
            meeting = Some(recorded);
        }
        drop(db);

        self.log_run_soft("booking", 4, &started_at, true, None);
        Ok((call, meeting))
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Walk the org through `targets` in order, stopping quietly at the
    /// first illegal hop. Orgs re-entering from nurture, or already past the
    /// target, keep their stage.
    fn advance_stage_soft(&self, db: &PipelineDb, org_id: &str, targets: &[PipelineStage]) {
        for target in targets {
            match db.update_stage(org_id, *target) {
                Ok(_) => {}
                Err(DbError::TransitionNotAllowed { from, to }) => {
                    log::debug!("Stage bookkeeping for org {org_id}: keeping {from}, not moving to {to}");
                    return;
                }
                Err(e) => {
                    log::warn!("Stage bookkeeping failed for org {org_id}: {e}");
                    return;
                }
            }
        }
    }

    /// Best-effort observability row. Never fails the run.
    fn log_run_soft(
        &self,
        agent_name: &str,
        stage_number: i64,
        started_at: &str,
        success: bool,
        error_message: Option<&str>,
    ) {
        let completed_at = Utc::now().to_rfc3339();
        let entry = AgentRunEntry {
            agent_name: agent_name.to_string(),
            stage_number: Some(stage_number),
            started_at: started_at.to_string(),
            completed_at: Some(completed_at),
            success: Some(success),
            error_message: error_message.map(str::to_string),
            ..Default::default()
        };
        if let Err(e) = self.db().log_agent_run(&entry) {
            log::warn!("Failed to write run log entry for {agent_name}: {e}");
        }
    }
}

/// Extract the dedup domain from a website URL. Accepts scheme-less input,
/// strips a leading `www.`, and case-folds.
fn domain_from_website(website: &str) -> Option<String> {
    let trimmed = website.trim();
    if trimmed.is_empty() {
        return None;
    }
    let url = Url::parse(trimmed)
        .or_else(|_| Url::parse(&format!("https://{trimmed}")))
        .ok()?;
    let host = url.host_str()?;
    let host = host.strip_prefix("www.").unwrap_or(host);
    if host.is_empty() || !host.contains('.') {
        return None;
    }
    Some(host.to_lowercase())
}
