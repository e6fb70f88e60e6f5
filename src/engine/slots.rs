use chrono::{NaiveDate, NaiveDateTime};
use ulid::Ulid;

use crate::limits::MAX_SLOT_QUERY_DAYS;
use crate::model::*;

use super::{Engine, EngineError};

/// Candidate spacing. Candidates overlap when the slot length exceeds the
/// step; the fixed step means no exact duplicates are ever produced.
pub const STEP_MINUTES: u16 = 15;

/// Expand one day of an open template into free candidates.
///
/// Walks each window with the fixed step, emitting a candidate of
/// `slot_minutes` wherever it still fits the window, then drops candidates
/// that hit a blocked window, overlap a busy span, or start at or before
/// `now`. Windows are sorted on write, so output is ascending by start.
pub(super) fn day_slots(
    date: NaiveDate,
    record: &AvailabilityRecord,
    slot_minutes: u16,
    timed_blocks: &[Window],
    busy: &[(NaiveDateTime, NaiveDateTime)],
    now: NaiveDateTime,
) -> Vec<CandidateSlot> {
    let mut slots = Vec::new();
    for window in &record.windows {
        let mut cursor = window.start;
        loop {
            let Some(end) = cursor.add_minutes(slot_minutes) else {
                break;
            };
            if end > window.end {
                break;
            }

            let candidate = Window { start: cursor, end };
            let starts_at = cursor.on(date);
            let ends_at = end.on(date);

            let blocked = timed_blocks.iter().any(|b| b.overlaps(&candidate));
            let occupied = busy
                .iter()
                .any(|&(b_start, b_end)| ranges_overlap(starts_at, ends_at, b_start, b_end));

            if !blocked && !occupied && starts_at > now {
                slots.push(CandidateSlot {
                    date,
                    start: cursor,
                    end,
                    starts_at,
                    ends_at,
                });
            }

            match cursor.add_minutes(STEP_MINUTES) {
                Some(next) => cursor = next,
                None => break,
            }
        }
    }
    slots
}

impl Engine {
    /// All free candidate slots for a service on one calendar over an
    /// inclusive date range, ascending by start datetime.
    ///
    /// An unknown member degrades to zero results — the caller asked an
    /// optional filter for a calendar that doesn't exist. Unknown service
    /// or location is a hard not-found.
    pub async fn generate_slots(
        &self,
        service_id: Ulid,
        location_id: Ulid,
        member: MemberSelector,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<CandidateSlot>, EngineError> {
        if end_date < start_date {
            return Err(EngineError::Validation(format!(
                "end date {end_date} before start date {start_date}"
            )));
        }
        if (end_date - start_date).num_days() >= MAX_SLOT_QUERY_DAYS {
            return Err(EngineError::LimitExceeded("slot query spans too many days"));
        }

        let settings = self.settings().await?;
        let service = self
            .catalog
            .service(self.provider_id, service_id)
            .await
            .filter(|s| s.is_active)
            .ok_or(EngineError::NotFound("service"))?;
        if !self.directory.location_exists(self.provider_id, location_id).await {
            return Err(EngineError::NotFound("location"));
        }
        if let MemberSelector::Specific(member_id) = member
            && !self.directory.member_exists(self.provider_id, member_id).await
        {
            return Ok(Vec::new());
        }

        let buffer = service
            .buffer_minutes
            .unwrap_or(settings.default_buffer_minutes);
        let slot_minutes = service.duration_minutes + buffer;
        if slot_minutes == 0 || slot_minutes > u32::from(MINUTES_PER_DAY) {
            return Err(EngineError::Validation(format!(
                "slot length {slot_minutes}m must be within one day"
            )));
        }
        let slot_minutes = slot_minutes as u16;

        let now = local_now(settings.timezone);

        // One snapshot of the calendar for the whole range; generation is a
        // pure read composition over the three stores.
        let range_start = TimeOfDay::MIDNIGHT.on(start_date);
        let range_end = TimeOfDay::END_OF_DAY.on(end_date);
        let busy: Vec<(NaiveDateTime, NaiveDateTime)> =
            match self.calendar(CalendarKey { location_id, member }) {
                Some(cal) => {
                    let guard = cal.read().await;
                    guard
                        .overlapping(range_start, range_end)
                        .filter(|b| b.status.is_occupying())
                        .map(|b| (b.starts_at, b.ends_at))
                        .collect()
                }
                None => Vec::new(),
            };
        let periods = self.blocked_in_range(start_date, end_date);

        let mut slots = Vec::new();
        let mut date = start_date;
        while date <= end_date {
            let next = date.succ_opt().ok_or_else(|| {
                EngineError::Validation("date range exceeds calendar bounds".into())
            })?;

            let Some(record) = self.day_template(location_id, member, day_of_week(date)) else {
                date = next;
                continue;
            };
            if !record.is_open || record.windows.is_empty() {
                date = next;
                continue;
            }

            let applying: Vec<&BlockedPeriod> = periods
                .iter()
                .filter(|p| p.covers(date, location_id, member))
                .collect();
            if applying.iter().any(|p| p.all_day) {
                date = next;
                continue;
            }
            let timed_blocks: Vec<Window> = applying
                .iter()
                .filter_map(|p| match (p.start_time, p.end_time) {
                    (Some(start), Some(end)) => Some(Window { start, end }),
                    _ => None,
                })
                .collect();

            slots.extend(day_slots(
                date,
                &record,
                slot_minutes,
                &timed_blocks,
                &busy,
                now,
            ));
            date = next;
        }

        metrics::histogram!(crate::observability::SLOTS_RETURNED).record(slots.len() as f64);
        Ok(slots)
    }
}
