use chrono::NaiveDateTime;
use ulid::Ulid;
use uuid::Uuid;

use crate::limits::MAX_REASON_LEN;
use crate::model::*;

use super::{Engine, EngineError};

/// The booking state machine. Terminal states are `cancelled` and `noshow`;
/// a no-show can only be recorded once the booking's start has passed.
/// Reschedule is not a transition — it changes times, never status.
pub(super) fn validate_transition(
    from: BookingStatus,
    to: BookingStatus,
    starts_at: NaiveDateTime,
    now: NaiveDateTime,
) -> Result<(), EngineError> {
    use BookingStatus::*;
    let legal = match (from, to) {
        (Pending, Confirmed) => true,
        (Pending, Cancelled) | (Confirmed, Cancelled) => true,
        (Confirmed, NoShow) => starts_at < now,
        _ => false,
    };
    if legal {
        Ok(())
    } else {
        Err(EngineError::InvalidTransition { from, to })
    }
}

impl Engine {
    /// Occupying (pending/confirmed) bookings whose span intersects
    /// `[from, to)` on one calendar, ascending by start.
    pub async fn list_occupying(
        &self,
        location_id: Ulid,
        member: MemberSelector,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Vec<Booking> {
        let Some(cal) = self.calendar(CalendarKey {
            location_id,
            member,
        }) else {
            return Vec::new();
        };
        let guard = cal.read().await;
        guard
            .overlapping(from, to)
            .filter(|b| b.status.is_occupying())
            .cloned()
            .collect()
    }

    pub async fn booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let key = self
            .booking_index
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound("booking"))?;
        let cal = self.calendar(key).ok_or(EngineError::NotFound("booking"))?;
        let guard = cal.read().await;
        guard
            .get(id)
            .cloned()
            .ok_or(EngineError::NotFound("booking"))
    }

    pub async fn booking_by_token(&self, token: Uuid) -> Result<Booking, EngineError> {
        let id = self
            .token_index
            .get(&token)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound("booking"))?;
        self.booking(id).await
    }

    /// Apply one status transition, validated against the current status
    /// before anything is written. Illegal transitions mutate nothing.
    pub async fn transition(
        &self,
        id: Ulid,
        to: BookingStatus,
        by: Option<CancelActor>,
        reason: Option<String>,
    ) -> Result<Booking, EngineError> {
        if reason.as_ref().is_some_and(|r| r.len() > MAX_REASON_LEN) {
            return Err(EngineError::LimitExceeded("reason too long"));
        }
        let key = self
            .booking_index
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound("booking"))?;
        let cal = self.calendar(key).ok_or(EngineError::NotFound("booking"))?;
        let settings = self.settings().await?;
        let now = local_now(settings.timezone);

        let mut guard = cal.write().await;
        let booking = guard.get(id).ok_or(EngineError::NotFound("booking"))?;
        validate_transition(booking.status, to, booking.starts_at, now)?;

        let event = Event::BookingStatusChanged {
            id,
            status: to,
            at: now,
            by,
            reason,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(
            crate::observability::OPS_TOTAL,
            "op" => "transition",
            "status" => "ok"
        )
        .increment(1);
        Ok(guard.get(id).expect("booking still present").clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn legal_transitions() {
        use BookingStatus::*;
        let start = dt("2030-06-03 09:00:00");
        let before = dt("2030-06-03 08:00:00");
        let after = dt("2030-06-03 10:00:00");

        assert!(validate_transition(Pending, Confirmed, start, before).is_ok());
        assert!(validate_transition(Pending, Cancelled, start, before).is_ok());
        assert!(validate_transition(Confirmed, Cancelled, start, before).is_ok());
        assert!(validate_transition(Confirmed, NoShow, start, after).is_ok());
    }

    #[test]
    fn noshow_requires_start_in_past() {
        use BookingStatus::*;
        let start = dt("2030-06-03 09:00:00");
        let before = dt("2030-06-03 08:59:00");
        let err = validate_transition(Confirmed, NoShow, start, before).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidTransition {
                from: Confirmed,
                to: NoShow
            }
        ));
    }

    #[test]
    fn terminal_states_reject_everything() {
        use BookingStatus::*;
        let start = dt("2030-06-03 09:00:00");
        let now = dt("2030-06-03 10:00:00");
        for from in [Cancelled, NoShow] {
            for to in [Pending, Confirmed, Cancelled, NoShow] {
                assert!(
                    validate_transition(from, to, start, now).is_err(),
                    "{from} -> {to} should be illegal"
                );
            }
        }
    }

    #[test]
    fn no_direct_self_or_backward_transitions() {
        use BookingStatus::*;
        let start = dt("2030-06-03 09:00:00");
        let now = dt("2030-06-03 10:00:00");
        assert!(validate_transition(Pending, Pending, start, now).is_err());
        assert!(validate_transition(Confirmed, Confirmed, start, now).is_err());
        assert!(validate_transition(Confirmed, Pending, start, now).is_err());
        assert!(validate_transition(Pending, NoShow, start, now).is_err());
    }
}
