//! Pipeline stage state machine.
//!
//! An organization moves one-directionally through the outbound pipeline:
//! discovery -> outreach -> reply handling -> booking. The only loop is
//! nurture, which re-enters the outreach phase with a delayed
//! `next_outreach_date`. Every stage write goes through
//! [`PipelineStage::can_transition`]; arbitrary jumps are rejected and the
//! attempt is logged. Manual corrections use the audited force path on the
//! organization repository instead.

use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};

use crate::error::DbError;

/// The closed set of organization lifecycle stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Discovered,
    Enriched,
    Scored,
    Qualified,
    Rejected,
    InSequence,
    Touch1Sent,
    Touch2Sent,
    Touch3Sent,
    RepliedInterested,
    CallPermissionSent,
    CallPermissionGranted,
    CallAttempted,
    Booked,
    MeetingHeld,
    BecameClient,
    Nurture,
    ClosedLost,
    Unsubscribed,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Discovered => "discovered",
            PipelineStage::Enriched => "enriched",
            PipelineStage::Scored => "scored",
            PipelineStage::Qualified => "qualified",
            PipelineStage::Rejected => "rejected",
            PipelineStage::InSequence => "in_sequence",
            PipelineStage::Touch1Sent => "touch_1_sent",
            PipelineStage::Touch2Sent => "touch_2_sent",
            PipelineStage::Touch3Sent => "touch_3_sent",
            PipelineStage::RepliedInterested => "replied_interested",
            PipelineStage::CallPermissionSent => "call_permission_sent",
            PipelineStage::CallPermissionGranted => "call_permission_granted",
            PipelineStage::CallAttempted => "call_attempted",
            PipelineStage::Booked => "booked",
            PipelineStage::MeetingHeld => "meeting_held",
            PipelineStage::BecameClient => "became_client",
            PipelineStage::Nurture => "nurture",
            PipelineStage::ClosedLost => "closed_lost",
            PipelineStage::Unsubscribed => "unsubscribed",
        }
    }

    /// Terminal stages: no further transitions are legal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineStage::Rejected
                | PipelineStage::BecameClient
                | PipelineStage::ClosedLost
                | PipelineStage::Unsubscribed
        )
    }

    /// Legal successor stages.
    ///
    /// A reply (interested / nurture / unsubscribe / lost) can arrive after
    /// any touch, so every touch stage fans out to those outcomes as well as
    /// the next touch.
    pub fn successors(&self) -> &'static [PipelineStage] {
        use PipelineStage::*;
        match self {
            Discovered => &[Enriched],
            Enriched => &[Scored],
            Scored => &[Qualified, Rejected],
            Qualified => &[InSequence],
            InSequence => &[Touch1Sent, RepliedInterested, Nurture, ClosedLost, Unsubscribed],
            Touch1Sent => &[Touch2Sent, RepliedInterested, Nurture, ClosedLost, Unsubscribed],
            Touch2Sent => &[Touch3Sent, RepliedInterested, Nurture, ClosedLost, Unsubscribed],
            Touch3Sent => &[RepliedInterested, Nurture, ClosedLost, Unsubscribed],
            RepliedInterested => &[CallPermissionSent],
            CallPermissionSent => &[CallPermissionGranted, Nurture, ClosedLost, Unsubscribed],
            CallPermissionGranted => &[CallAttempted],
            CallAttempted => &[Booked, Nurture, ClosedLost],
            Booked => &[MeetingHeld, ClosedLost],
            MeetingHeld => &[BecameClient, ClosedLost],
            Nurture => &[InSequence, Qualified],
            Rejected | BecameClient | ClosedLost | Unsubscribed => &[],
        }
    }

    pub fn can_transition(&self, to: PipelineStage) -> bool {
        self.successors().contains(&to)
    }

    /// All stage values, in pipeline order.
    pub fn all() -> &'static [PipelineStage] {
        use PipelineStage::*;
        &[
            Discovered,
            Enriched,
            Scored,
            Qualified,
            Rejected,
            InSequence,
            Touch1Sent,
            Touch2Sent,
            Touch3Sent,
            RepliedInterested,
            CallPermissionSent,
            CallPermissionGranted,
            CallAttempted,
            Booked,
            MeetingHeld,
            BecameClient,
            Nurture,
            ClosedLost,
            Unsubscribed,
        ]
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineStage {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PipelineStage::all()
            .iter()
            .find(|stage| stage.as_str() == s)
            .copied()
            .ok_or_else(|| DbError::InvalidStatus(s.to_string()))
    }
}

impl ToSql for PipelineStage {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for PipelineStage {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: DbError| FromSqlError::Other(Box::new(e)))
    }
}
