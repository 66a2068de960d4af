use std::collections::HashSet;

use chrono::{Months, NaiveDate, Utc};
use rusqlite::{params, Row};

use super::*;
use crate::stage::PipelineStage;

const ORG_COLUMNS: &str = "id, name, domain, website, description, org_type,
    employee_count_range, icp_score, icp_score_dimensions, pipeline_stage,
    why_fit, last_outreach_date, next_outreach_date, notes, disqualified,
    disqualified_reason, created_at, updated_at";

impl PipelineDb {
    // =========================================================================
    // Organizations
    // =========================================================================

    /// Insert or update an organization by domain (dedup key).
    ///
    /// The write is a single `INSERT ... ON CONFLICT(domain) DO UPDATE`, so
    /// two concurrent discovery runs racing on the same domain cannot create
    /// duplicate rows or lose an update. Supplied fields overwrite
    /// (last-writer-wins); the domain itself is never touched on conflict,
    /// and neither is `pipeline_stage` — stage changes for existing rows go
    /// through [`PipelineDb::update_stage`].
    ///
    /// Returns the resulting row, post-write.
    pub fn upsert_organization(&self, org: &NewOrganization) -> Result<DbOrganization, DbError> {
        let domain = normalize_domain(&org.domain)?;
        if org.name.trim().is_empty() {
            return Err(DbError::InvalidIdentity {
                field: "name",
                value: org.name.clone(),
            });
        }
        if let Some(score) = org.icp_score {
            if !(0..=100).contains(&score) {
                return Err(DbError::IcpScoreOutOfRange(score));
            }
        }

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let stage = org.initial_stage.unwrap_or(PipelineStage::Discovered);
        let dimensions = org.icp_score_dimensions.as_ref().map(|v| v.to_string());

        self.conn.execute(
            "INSERT INTO organizations (
                id, name, domain, website, description, org_type,
                employee_count_range, icp_score, icp_score_dimensions,
                pipeline_stage, why_fit, notes, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)
             ON CONFLICT(domain) DO UPDATE SET
                name = excluded.name,
                website = COALESCE(excluded.website, organizations.website),
                description = COALESCE(excluded.description, organizations.description),
                org_type = COALESCE(excluded.org_type, organizations.org_type),
                employee_count_range = COALESCE(excluded.employee_count_range, organizations.employee_count_range),
                icp_score = COALESCE(excluded.icp_score, organizations.icp_score),
                icp_score_dimensions = COALESCE(excluded.icp_score_dimensions, organizations.icp_score_dimensions),
                why_fit = COALESCE(excluded.why_fit, organizations.why_fit),
                notes = COALESCE(excluded.notes, organizations.notes),
                updated_at = excluded.updated_at",
            params![
                id,
                org.name,
                domain,
                org.website,
                org.description,
                org.org_type,
                org.employee_count_range,
                org.icp_score,
                dimensions,
                stage,
                org.why_fit,
                org.notes,
                now,
            ],
        )?;

        self.get_organization_by_domain(&domain)?
            .ok_or(DbError::NotFound {
                entity: "organization",
                id: domain,
            })
    }

    /// Look up an organization by its normalized domain.
    pub fn get_organization_by_domain(
        &self,
        domain: &str,
    ) -> Result<Option<DbOrganization>, DbError> {
        let domain = domain.trim().to_lowercase();
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ORG_COLUMNS} FROM organizations WHERE domain = ?1"
        ))?;
        let mut rows = stmt.query_map(params![domain], map_org_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Get an organization by ID.
    pub fn get_organization(&self, id: &str) -> Result<Option<DbOrganization>, DbError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {ORG_COLUMNS} FROM organizations WHERE id = ?1"))?;
        let mut rows = stmt.query_map(params![id], map_org_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// All known org domains. Discovery runs use this to skip re-researching
    /// organizations that are already in the pipeline.
    pub fn known_domains(&self) -> Result<HashSet<String>, DbError> {
        let mut stmt = self.conn.prepare("SELECT domain FROM organizations")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut domains = HashSet::new();
        for row in rows {
            domains.insert(row?);
        }
        Ok(domains)
    }

    /// Advance an organization to a new pipeline stage.
    ///
    /// The transition is validated against the stage machine; an illegal jump
    /// is logged and rejected without writing. Manual corrections go through
    /// [`PipelineDb::force_update_stage`].
    pub fn update_stage(
        &self,
        org_id: &str,
        new_stage: PipelineStage,
    ) -> Result<DbOrganization, DbError> {
        self.with_transaction(|db| {
            let org = db.get_organization(org_id)?.ok_or(DbError::NotFound {
                entity: "organization",
                id: org_id.to_string(),
            })?;

            if !org.pipeline_stage.can_transition(new_stage) {
                log::warn!(
                    "Rejected illegal stage transition for org {}: {} -> {}",
                    org_id,
                    org.pipeline_stage,
                    new_stage
                );
                return Err(DbError::TransitionNotAllowed {
                    from: org.pipeline_stage.to_string(),
                    to: new_stage.to_string(),
                });
            }

            db.write_stage(org_id, new_stage)
        })
    }

    /// Unconditional stage write for manual correction. Audited: every use is
    /// logged with the stage it bypassed.
    pub fn force_update_stage(
        &self,
        org_id: &str,
        new_stage: PipelineStage,
    ) -> Result<DbOrganization, DbError> {
        let current = self
            .get_organization(org_id)?
            .ok_or(DbError::NotFound {
                entity: "organization",
                id: org_id.to_string(),
            })?
            .pipeline_stage;
        log::warn!(
            "Forced stage override for org {}: {} -> {}",
            org_id,
            current,
            new_stage
        );
        self.write_stage(org_id, new_stage)
    }

    fn write_stage(&self, org_id: &str, stage: PipelineStage) -> Result<DbOrganization, DbError> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "UPDATE organizations SET pipeline_stage = ?1, updated_at = ?2 WHERE id = ?3",
            params![stage, now, org_id],
        )?;
        self.get_organization(org_id)?.ok_or(DbError::NotFound {
            entity: "organization",
            id: org_id.to_string(),
        })
    }

    /// Soft-disqualify an organization. Rows are never physically deleted.
    pub fn disqualify_organization(&self, org_id: &str, reason: &str) -> Result<(), DbError> {
        let now = Utc::now().to_rfc3339();
        let changed = self.conn.execute(
            "UPDATE organizations
             SET disqualified = 1, disqualified_reason = ?1, updated_at = ?2
             WHERE id = ?3",
            params![reason, now, org_id],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound {
                entity: "organization",
                id: org_id.to_string(),
            });
        }
        Ok(())
    }

    /// Stamp outreach bookkeeping dates (RFC 3339). `next` drives
    /// [`PipelineDb::organizations_due_for_outreach`]; the nurture loop sets
    /// it to the recontact date.
    pub fn set_outreach_dates(
        &self,
        org_id: &str,
        last: Option<&str>,
        next: Option<&str>,
    ) -> Result<(), DbError> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "UPDATE organizations
             SET last_outreach_date = COALESCE(?1, last_outreach_date),
                 next_outreach_date = COALESCE(?2, next_outreach_date),
                 updated_at = ?3
             WHERE id = ?4",
            params![last, next, now, org_id],
        )?;
        Ok(())
    }

    /// Non-disqualified organizations with at least one event whose date
    /// falls between `months_min` and `months_max` calendar months from
    /// today, inclusive. An org with multiple qualifying events appears once.
    pub fn organizations_in_window(
        &self,
        months_min: u32,
        months_max: u32,
    ) -> Result<Vec<DbOrganization>, DbError> {
        self.organizations_in_window_at(Utc::now().date_naive(), months_min, months_max)
    }

    /// Window query anchored at an explicit `today`, for deterministic tests
    /// and replayed runs.
    pub fn organizations_in_window_at(
        &self,
        today: NaiveDate,
        months_min: u32,
        months_max: u32,
    ) -> Result<Vec<DbOrganization>, DbError> {
        let (open, close) = window_bounds(today, months_min, months_max);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ORG_COLUMNS} FROM organizations
             WHERE disqualified = 0
               AND id IN (
                   SELECT DISTINCT org_id FROM events
                   WHERE event_date IS NOT NULL
                     AND event_date >= ?1 AND event_date <= ?2
               )"
        ))?;
        let rows = stmt.query_map(params![open, close], map_org_row)?;
        let mut orgs = Vec::new();
        for row in rows {
            orgs.push(row?);
        }
        Ok(orgs)
    }

    /// Non-disqualified organizations whose `next_outreach_date` is at or
    /// before now. These are nurture re-entries due for a follow-up.
    pub fn organizations_due_for_outreach(&self) -> Result<Vec<DbOrganization>, DbError> {
        self.organizations_due_for_outreach_at(&Utc::now().to_rfc3339())
    }

    pub fn organizations_due_for_outreach_at(
        &self,
        now: &str,
    ) -> Result<Vec<DbOrganization>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ORG_COLUMNS} FROM organizations
             WHERE disqualified = 0
               AND next_outreach_date IS NOT NULL
               AND next_outreach_date <= ?1"
        ))?;
        let rows = stmt.query_map(params![now], map_org_row)?;
        let mut orgs = Vec::new();
        for row in rows {
            orgs.push(row?);
        }
        Ok(orgs)
    }
}

/// Trim and case-fold a domain; empty domains fail fast with no write.
pub(crate) fn normalize_domain(domain: &str) -> Result<String, DbError> {
    let normalized = domain.trim().to_lowercase();
    if normalized.is_empty() {
        return Err(DbError::InvalidIdentity {
            field: "domain",
            value: domain.to_string(),
        });
    }
    Ok(normalized)
}

/// Inclusive window bounds as ISO dates, `months_min`/`months_max` calendar
/// months out from `today`.
fn window_bounds(today: NaiveDate, months_min: u32, months_max: u32) -> (String, String) {
    let open = today
        .checked_add_months(Months::new(months_min))
        .unwrap_or(NaiveDate::MAX);
    let close = today
        .checked_add_months(Months::new(months_max))
        .unwrap_or(NaiveDate::MAX);
    (
        open.format("%Y-%m-%d").to_string(),
        close.format("%Y-%m-%d").to_string(),
    )
}

fn map_org_row(row: &Row) -> rusqlite::Result<DbOrganization> {
    Ok(DbOrganization {
        id: row.get(0)?,
        name: row.get(1)?,
        domain: row.get(2)?,
        website: row.get(3)?,
        description: row.get(4)?,
        org_type: row.get(5)?,
        employee_count_range: row.get(6)?,
        icp_score: row.get(7)?,
        icp_score_dimensions: row.get(8)?,
        pipeline_stage: row.get(9)?,
        why_fit: row.get(10)?,
        last_outreach_date: row.get(11)?,
        next_outreach_date: row.get(12)?,
        notes: row.get(13)?,
        disqualified: row.get(14)?,
        disqualified_reason: row.get(15)?,
        created_at: row.get(16)?,
        updated_at: row.get(17)?,
    })
}
