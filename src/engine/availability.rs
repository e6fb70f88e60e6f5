use ulid::Ulid;

use crate::limits::MAX_WINDOWS_PER_DAY;
use crate::model::*;

use super::{Engine, EngineError};

/// Validate and normalize a day's windows: each `start < end`, pairwise
/// non-overlapping. Returns the windows sorted by start.
pub(super) fn normalize_windows(windows: &[Window]) -> Result<Vec<Window>, EngineError> {
    if windows.len() > MAX_WINDOWS_PER_DAY {
        return Err(EngineError::LimitExceeded("too many windows on one day"));
    }
    for w in windows {
        if !w.is_valid() {
            return Err(EngineError::Validation(format!(
                "window start {} must be before end {}",
                w.start, w.end
            )));
        }
    }
    let mut sorted = windows.to_vec();
    sorted.sort_by_key(|w| w.start);
    for pair in sorted.windows(2) {
        if pair[0].overlaps(&pair[1]) {
            return Err(EngineError::Validation(format!(
                "windows {}-{} and {}-{} overlap",
                pair[0].start, pair[0].end, pair[1].start, pair[1].end
            )));
        }
    }
    Ok(sorted)
}

fn validated(mut record: AvailabilityRecord) -> Result<AvailabilityRecord, EngineError> {
    if record.day_of_week > 6 {
        return Err(EngineError::Validation(format!(
            "day_of_week {} out of range 0..=6",
            record.day_of_week
        )));
    }
    record.windows = normalize_windows(&record.windows)?;
    Ok(record)
}

impl Engine {
    /// The weekly template for one (location, member, day-of-week), if set.
    pub fn day_template(
        &self,
        location_id: Ulid,
        member: MemberSelector,
        day_of_week: u8,
    ) -> Option<AvailabilityRecord> {
        self.templates
            .get(&TemplateKey {
                location_id,
                member,
                day_of_week,
            })
            .map(|e| e.value().clone())
    }

    /// All seven day templates for a calendar, in day-of-week order.
    /// Days never configured are absent.
    pub fn week_template(
        &self,
        location_id: Ulid,
        member: MemberSelector,
    ) -> Vec<AvailabilityRecord> {
        (0..7u8)
            .filter_map(|day| self.day_template(location_id, member, day))
            .collect()
    }

    /// Upsert one day of the weekly template.
    pub async fn set_day(&self, record: AvailabilityRecord) -> Result<(), EngineError> {
        let record = validated(record)?;
        let location_id = record.location_id;
        self.persist_store_event(Some(location_id), &Event::AvailabilitySet { record })
            .await
    }

    /// Replace all seven days of one calendar's template at once.
    /// All-or-nothing: every record is validated before anything is written,
    /// and the write is a single WAL entry.
    pub async fn set_week(
        &self,
        location_id: Ulid,
        member: MemberSelector,
        records: Vec<AvailabilityRecord>,
    ) -> Result<(), EngineError> {
        if records.len() != 7 {
            return Err(EngineError::Validation(format!(
                "expected 7 day records, got {}",
                records.len()
            )));
        }
        let mut seen = [false; 7];
        let mut validated_records = Vec::with_capacity(7);
        for record in records {
            if record.location_id != location_id || record.member != member {
                return Err(EngineError::Validation(
                    "week records must all target the same calendar".into(),
                ));
            }
            let record = validated(record)?;
            let day = record.day_of_week as usize;
            if seen[day] {
                return Err(EngineError::Validation(format!(
                    "duplicate record for day_of_week {day}"
                )));
            }
            seen[day] = true;
            validated_records.push(record);
        }

        self.persist_store_event(
            Some(location_id),
            &Event::AvailabilityWeekSet {
                records: validated_records,
            },
        )
        .await
    }
}
