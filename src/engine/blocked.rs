use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::{MAX_BLOCKED_PERIODS, MAX_BLOCKED_SPAN_DAYS, MAX_REASON_LEN};
use crate::model::*;

use super::{Engine, EngineError};

/// Input for creating a blocked period; the engine assigns the id.
#[derive(Debug, Clone)]
pub struct NewBlockedPeriod {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub all_day: bool,
    pub start_time: Option<TimeOfDay>,
    pub end_time: Option<TimeOfDay>,
    pub member_id: Option<Ulid>,
    pub location_id: Option<Ulid>,
    pub label: Option<String>,
}

fn validate(input: &NewBlockedPeriod) -> Result<(), EngineError> {
    if input.end_date < input.start_date {
        return Err(EngineError::Validation(format!(
            "end_date {} before start_date {}",
            input.end_date, input.start_date
        )));
    }
    if (input.end_date - input.start_date).num_days() > MAX_BLOCKED_SPAN_DAYS {
        return Err(EngineError::LimitExceeded("blocked period spans too many days"));
    }
    if input.all_day {
        if input.start_time.is_some() || input.end_time.is_some() {
            return Err(EngineError::Validation(
                "all-day period must not carry a time window".into(),
            ));
        }
    } else {
        match (input.start_time, input.end_time) {
            (Some(start), Some(end)) if start < end => {}
            (Some(start), Some(end)) => {
                return Err(EngineError::Validation(format!(
                    "start_time {start} must be before end_time {end}"
                )));
            }
            _ => {
                return Err(EngineError::Validation(
                    "time-bounded period requires start_time and end_time".into(),
                ));
            }
        }
    }
    if input.label.as_ref().is_some_and(|l| l.len() > MAX_REASON_LEN) {
        return Err(EngineError::LimitExceeded("label too long"));
    }
    Ok(())
}

impl Engine {
    pub async fn create_blocked_period(
        &self,
        input: NewBlockedPeriod,
    ) -> Result<BlockedPeriod, EngineError> {
        validate(&input)?;
        if self.blocked.len() >= MAX_BLOCKED_PERIODS {
            return Err(EngineError::LimitExceeded("too many blocked periods"));
        }

        let period = BlockedPeriod {
            id: Ulid::new(),
            start_date: input.start_date,
            end_date: input.end_date,
            all_day: input.all_day,
            start_time: input.start_time,
            end_time: input.end_time,
            member_id: input.member_id,
            location_id: input.location_id,
            label: input.label,
        };
        self.persist_store_event(
            period.location_id,
            &Event::BlockedPeriodCreated {
                period: period.clone(),
            },
        )
        .await?;
        Ok(period)
    }

    pub async fn delete_blocked_period(&self, id: Ulid) -> Result<(), EngineError> {
        let location_id = self
            .blocked
            .get(&id)
            .map(|e| e.value().location_id)
            .ok_or(EngineError::NotFound("blocked period"))?;
        self.persist_store_event(location_id, &Event::BlockedPeriodDeleted { id })
            .await
    }

    /// Periods whose `[start_date, end_date]` intersects `[start, end]`,
    /// sorted by start date.
    pub fn blocked_in_range(&self, start: NaiveDate, end: NaiveDate) -> Vec<BlockedPeriod> {
        let mut periods: Vec<BlockedPeriod> = self
            .blocked
            .iter()
            .filter(|e| e.value().start_date <= end && e.value().end_date >= start)
            .map(|e| e.value().clone())
            .collect();
        periods.sort_by_key(|p| (p.start_date, p.id));
        periods
    }

    /// Periods still in effect on or after `today`.
    pub fn blocked_upcoming(&self, today: NaiveDate) -> Vec<BlockedPeriod> {
        let mut periods: Vec<BlockedPeriod> = self
            .blocked
            .iter()
            .filter(|e| e.value().end_date >= today)
            .map(|e| e.value().clone())
            .collect();
        periods.sort_by_key(|p| (p.start_date, p.id));
        periods
    }

    /// Delete periods that ended strictly before `today`. Maintenance, not
    /// safety-critical: slot generation already ignores past dates.
    pub async fn sweep_past_blocked(&self, today: NaiveDate) -> Result<usize, EngineError> {
        let expired: Vec<Ulid> = self
            .blocked
            .iter()
            .filter(|e| e.value().end_date < today)
            .map(|e| *e.key())
            .collect();
        let mut swept = 0;
        for id in expired {
            match self.delete_blocked_period(id).await {
                Ok(()) => swept += 1,
                // Deleted concurrently — fine.
                Err(EngineError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(swept)
    }
}
