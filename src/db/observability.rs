use chrono::Utc;
use rusqlite::params;

use super::*;

/// One agent-run entry for `obs_agent_run_log`. The `org_id` here is a
/// loose reference on purpose: run logging must never fail because the
/// org row it mentions is gone.
#[derive(Debug, Clone, Default)]
pub struct AgentRunEntry {
    pub session_id: Option<String>,
    pub agent_name: String,
    pub team_name: Option<String>,
    pub stage_number: Option<i64>,
    pub org_id: Option<String>,
    pub trace_id: Option<String>,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub duration_ms: Option<i64>,
    pub success: Option<bool>,
    pub error_message: Option<String>,
    pub model_used: Option<String>,
    pub input_token_count: Option<i64>,
    pub output_token_count: Option<i64>,
    pub estimated_llm_cost_usd: Option<f64>,
}

/// One external-API cost entry for `obs_api_cost_log`.
#[derive(Debug, Clone, Default)]
pub struct ApiCostEntry {
    pub service: String,
    pub operation: Option<String>,
    pub org_id: Option<String>,
    pub agent_run_id: Option<String>,
    pub estimated_cost_usd: Option<f64>,
    pub units_used: Option<i64>,
    pub success: Option<bool>,
}

impl PipelineDb {
    // =========================================================================
    // Observability logs
    // =========================================================================

    /// Append an agent run to the run log. Returns the row id so a later
    /// cost entry can reference it.
    pub fn log_agent_run(&self, entry: &AgentRunEntry) -> Result<String, DbError> {
        let id = uuid::Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO obs_agent_run_log (
                id, session_id, agent_name, team_name, stage_number, org_id,
                trace_id, started_at, completed_at, duration_ms, success,
                error_message, model_used, input_token_count,
                output_token_count, estimated_llm_cost_usd
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                id,
                entry.session_id,
                entry.agent_name,
                entry.team_name,
                entry.stage_number,
                entry.org_id,
                entry.trace_id,
                entry.started_at,
                entry.completed_at,
                entry.duration_ms,
                entry.success,
                entry.error_message,
                entry.model_used,
                entry.input_token_count,
                entry.output_token_count,
                entry.estimated_llm_cost_usd,
            ],
        )?;
        Ok(id)
    }

    /// Append an external API cost entry.
    pub fn log_api_cost(&self, entry: &ApiCostEntry) -> Result<String, DbError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO obs_api_cost_log (
                id, service, operation, org_id, agent_run_id,
                estimated_cost_usd, units_used, called_at, success
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                id,
                entry.service,
                entry.operation,
                entry.org_id,
                entry.agent_run_id,
                entry.estimated_cost_usd,
                entry.units_used,
                now,
                entry.success,
            ],
        )?;
        Ok(id)
    }

    /// Total estimated API spend since an RFC 3339 cutoff.
    pub fn api_cost_since(&self, cutoff: &str) -> Result<f64, DbError> {
        let total: f64 = self.conn.query_row(
            "SELECT COALESCE(SUM(estimated_cost_usd), 0.0) FROM obs_api_cost_log
             WHERE called_at >= ?1",
            params![cutoff],
            |row| row.get(0),
        )?;
        Ok(total)
    }
}
