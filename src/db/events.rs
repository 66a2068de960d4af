use chrono::{NaiveDate, Utc};
use rusqlite::{params, Row};

use super::organizations::normalize_domain;
use super::*;

const EVENT_COLUMNS: &str = "id, org_id, event_name, event_type, event_date,
    event_date_approximate, event_date_notes, estimated_attendees,
    registration_url, is_recurring, recurrence_period, discovered_at, created_at";

impl PipelineDb {
    // =========================================================================
    // Events
    // =========================================================================

    /// Insert or update an event, keyed by the composite `(org_id,
    /// event_name)` identity. Same atomicity contract as the other upserts:
    /// one conflict-resolving write, no read-then-insert race.
    pub fn upsert_event(&self, org_id: &str, event: &NewEvent) -> Result<DbEvent, DbError> {
        if event.event_name.trim().is_empty() {
            return Err(DbError::InvalidIdentity {
                field: "event_name",
                value: event.event_name.clone(),
            });
        }
        let event_name = event.event_name.trim().to_string();
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        self.conn.execute(
            "INSERT INTO events (
                id, org_id, event_name, event_type, event_date,
                event_date_approximate, event_date_notes, estimated_attendees,
                registration_url, is_recurring, recurrence_period,
                discovered_at, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
             ON CONFLICT(org_id, event_name) DO UPDATE SET
                event_type = COALESCE(excluded.event_type, events.event_type),
                event_date = COALESCE(excluded.event_date, events.event_date),
                event_date_approximate = excluded.event_date_approximate,
                event_date_notes = COALESCE(excluded.event_date_notes, events.event_date_notes),
                estimated_attendees = COALESCE(excluded.estimated_attendees, events.estimated_attendees),
                registration_url = COALESCE(excluded.registration_url, events.registration_url),
                is_recurring = excluded.is_recurring,
                recurrence_period = COALESCE(excluded.recurrence_period, events.recurrence_period)",
            params![
                id,
                org_id,
                event_name,
                event.event_type,
                event.event_date,
                event.event_date_approximate,
                event.event_date_notes,
                event.estimated_attendees,
                event.registration_url,
                event.is_recurring,
                event.recurrence_period,
                now,
            ],
        )?;

        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE org_id = ?1 AND event_name = ?2"
        ))?;
        let mut rows = stmt.query_map(params![org_id, event_name], map_event_row)?;
        match rows.next() {
            Some(row) => Ok(row?),
            None => Err(DbError::NotFound {
                entity: "event",
                id: format!("{org_id}/{event_name}"),
            }),
        }
    }

    /// Events dated between `months_min` and `months_max` calendar months
    /// from today, inclusive, ordered by date ascending. An event this far
    /// out means its outreach window is open right now.
    pub fn events_in_window(
        &self,
        months_min: u32,
        months_max: u32,
    ) -> Result<Vec<DbEvent>, DbError> {
        self.events_in_window_at(Utc::now().date_naive(), months_min, months_max)
    }

    pub fn events_in_window_at(
        &self,
        today: NaiveDate,
        months_min: u32,
        months_max: u32,
    ) -> Result<Vec<DbEvent>, DbError> {
        use chrono::Months;
        let open = today
            .checked_add_months(Months::new(months_min))
            .unwrap_or(NaiveDate::MAX)
            .format("%Y-%m-%d")
            .to_string();
        let close = today
            .checked_add_months(Months::new(months_max))
            .unwrap_or(NaiveDate::MAX)
            .format("%Y-%m-%d")
            .to_string();

        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events
             WHERE event_date IS NOT NULL
               AND event_date >= ?1 AND event_date <= ?2
             ORDER BY event_date ASC"
        ))?;
        let rows = stmt.query_map(params![open, close], map_event_row)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    /// All events for an organization, earliest first.
    pub fn events_for_org(&self, org_id: &str) -> Result<Vec<DbEvent>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE org_id = ?1 ORDER BY event_date ASC"
        ))?;
        let rows = stmt.query_map(params![org_id], map_event_row)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    /// Convenience for discovery: upsert the org's event by domain.
    pub fn upsert_event_for_domain(
        &self,
        domain: &str,
        event: &NewEvent,
    ) -> Result<DbEvent, DbError> {
        let domain = normalize_domain(domain)?;
        let org = self
            .get_organization_by_domain(&domain)?
            .ok_or(DbError::NotFound {
                entity: "organization",
                id: domain,
            })?;
        self.upsert_event(&org.id, event)
    }
}

fn map_event_row(row: &Row) -> rusqlite::Result<DbEvent> {
    Ok(DbEvent {
        id: row.get(0)?,
        org_id: row.get(1)?,
        event_name: row.get(2)?,
        event_type: row.get(3)?,
        event_date: row.get(4)?,
        event_date_approximate: row.get(5)?,
        event_date_notes: row.get(6)?,
        estimated_attendees: row.get(7)?,
        registration_url: row.get(8)?,
        is_recurring: row.get(9)?,
        recurrence_period: row.get(10)?,
        discovered_at: row.get(11)?,
        created_at: row.get(12)?,
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::test_db;
    use super::*;

    fn make_org(db: &PipelineDb, domain: &str) -> DbOrganization {
        db.upsert_organization(&NewOrganization {
            name: "Acme Events".to_string(),
            domain: domain.to_string(),
            ..Default::default()
        })
        .expect("org")
    }

    #[test]
    fn test_composite_dedup() {
        let db = test_db();
        let org = make_org(&db, "acme.com");

        let first = db
            .upsert_event(
                &org.id,
                &NewEvent {
                    event_name: "Annual Summit".to_string(),
                    event_date: Some("2026-09-01".to_string()),
                    ..Default::default()
                },
            )
            .expect("first");

        // Same (org, name): updates in place.
        let second = db
            .upsert_event(
                &org.id,
                &NewEvent {
                    event_name: "Annual Summit".to_string(),
                    event_date: Some("2026-09-15".to_string()),
                    is_recurring: true,
                    recurrence_period: Some(RecurrencePeriod::Annual),
                    ..Default::default()
                },
            )
            .expect("second");
        assert_eq!(first.id, second.id);
        assert_eq!(second.event_date, Some("2026-09-15".to_string()));

        // Different name under the same org: a second row.
        db.upsert_event(
            &org.id,
            &NewEvent {
                event_name: "Spring Workshop".to_string(),
                ..Default::default()
            },
        )
        .expect("different event");

        let count: i32 = db
            .conn_ref()
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
            .expect("count");
        assert_eq!(count, 2);
    }

    #[test]
    fn test_same_name_different_org_is_distinct() {
        let db = test_db();
        let a = make_org(&db, "a.com");
        let b = make_org(&db, "b.com");
        for org in [&a, &b] {
            db.upsert_event(
                &org.id,
                &NewEvent {
                    event_name: "Annual Summit".to_string(),
                    ..Default::default()
                },
            )
            .expect("event");
        }
        let count: i32 = db
            .conn_ref()
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
            .expect("count");
        assert_eq!(count, 2);
    }

    #[test]
    fn test_empty_event_name_rejected() {
        let db = test_db();
        let org = make_org(&db, "acme.com");
        let err = db
            .upsert_event(
                &org.id,
                &NewEvent {
                    event_name: "  ".to_string(),
                    ..Default::default()
                },
            )
            .expect_err("empty name");
        assert!(err.is_identity_error());
    }

    #[test]
    fn test_events_in_window_inclusive_and_ordered() {
        let db = test_db();
        let org = make_org(&db, "acme.com");
        let today = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();

        for (name, date) in [
            ("late", "2027-01-01"),  // exactly 12 months: included
            ("early", "2026-05-01"), // exactly 4 months: included
            ("mid", "2026-07-01"),   // 6 months: included
            ("soon", "2026-03-01"),  // 2 months: excluded
            ("undated", ""),
        ] {
            let date = if date.is_empty() { None } else { Some(date.to_string()) };
            db.upsert_event(
                &org.id,
                &NewEvent {
                    event_name: name.to_string(),
                    event_date: date,
                    ..Default::default()
                },
            )
            .expect("event");
        }

        let events = db.events_in_window_at(today, 4, 12).expect("window");
        let names: Vec<&str> = events.iter().map(|e| e.event_name.as_str()).collect();
        assert_eq!(names, vec!["early", "mid", "late"], "inclusive bounds, ascending");
    }

    #[test]
    fn test_events_cascade_with_org_delete() {
        // Events are the one cascading child; everything else survives its org.
        let db = test_db();
        let org = make_org(&db, "acme.com");
        db.upsert_event(
            &org.id,
            &NewEvent {
                event_name: "Annual Summit".to_string(),
                ..Default::default()
            },
        )
        .expect("event");

        db.conn_ref()
            .execute("DELETE FROM organizations WHERE id = ?1", params![org.id])
            .expect("raw delete");

        let count: i32 = db
            .conn_ref()
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
            .expect("count");
        assert_eq!(count, 0, "events cascade with their organization");
    }
}
