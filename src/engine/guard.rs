use chrono::NaiveDateTime;
use ulid::Ulid;
use uuid::Uuid;

use crate::limits::{MAX_BOOKINGS_PER_CALENDAR, MAX_CLIENT_FIELD_LEN};
use crate::model::*;

use super::{Engine, EngineError};

/// A client's request to take one slot.
#[derive(Debug, Clone)]
pub struct ReserveRequest {
    pub service_id: Ulid,
    pub location_id: Ulid,
    pub member_id: Option<Ulid>,
    pub starts_at: NaiveDateTime,
    pub client: ClientInfo,
}

fn validate_client(client: &ClientInfo) -> Result<(), EngineError> {
    if client.name.trim().is_empty() {
        return Err(EngineError::Validation("client name is required".into()));
    }
    let fields = [Some(&client.name), client.email.as_ref(), client.phone.as_ref()];
    if fields
        .into_iter()
        .flatten()
        .any(|f| f.len() > MAX_CLIENT_FIELD_LEN)
    {
        return Err(EngineError::LimitExceeded("client field too long"));
    }
    Ok(())
}

fn slot_bounds(
    starts_at: NaiveDateTime,
    duration_minutes: u32,
) -> Result<Option<(Window, NaiveDateTime)>, EngineError> {
    if duration_minutes == 0 || duration_minutes > u32::from(MINUTES_PER_DAY) {
        return Err(EngineError::Validation(format!(
            "duration {duration_minutes}m must be within one day"
        )));
    }
    let start = time_of_day_of(starts_at);
    // A slot crossing midnight can never fit a single-day window.
    let Some(end) = start.add_minutes(duration_minutes as u16) else {
        return Ok(None);
    };
    Ok(Some((Window { start, end }, end.on(starts_at.date()))))
}

impl Engine {
    /// Template + blocked-period checks for one candidate window; the
    /// occupancy check happens separately, under the calendar lock.
    fn slot_open(&self, location_id: Ulid, member: MemberSelector, starts_at: NaiveDateTime, window: &Window) -> bool {
        let date = starts_at.date();
        let Some(record) = self.day_template(location_id, member, day_of_week(date)) else {
            return false;
        };
        if !record.is_open || !record.windows.iter().any(|w| w.contains(window)) {
            return false;
        }
        !self
            .blocked
            .iter()
            .any(|p| p.value().blocks(date, location_id, member, window))
    }

    /// Recompute, for a single window, the same three checks slot generation
    /// performs: open per template, not blocked, not occupied. `exclude`
    /// keeps a rescheduled booking from conflicting with itself.
    pub async fn is_slot_available(
        &self,
        location_id: Ulid,
        member: MemberSelector,
        starts_at: NaiveDateTime,
        duration_minutes: u32,
        exclude: Option<Ulid>,
    ) -> Result<bool, EngineError> {
        let starts_at = truncate_to_minute(starts_at);
        let Some((window, ends_at)) = slot_bounds(starts_at, duration_minutes)? else {
            return Ok(false);
        };
        if !self.slot_open(location_id, member, starts_at, &window) {
            return Ok(false);
        }
        match self.calendar(CalendarKey { location_id, member }) {
            Some(cal) => {
                let guard = cal.read().await;
                Ok(!guard.is_occupied(starts_at, ends_at, exclude))
            }
            None => Ok(true),
        }
    }

    /// Take a slot. Re-validates the window against all three stores under
    /// the calendar's write lock, so two racing reservations for the same
    /// window serialize and exactly one wins; the loser gets
    /// `SlotUnavailable`. A retry after a transient failure re-runs the same
    /// check and cannot double-book.
    pub async fn reserve(&self, request: ReserveRequest) -> Result<Booking, EngineError> {
        validate_client(&request.client)?;

        let settings = self.settings().await?;
        let service = self
            .catalog
            .service(self.provider_id, request.service_id)
            .await
            .filter(|s| s.is_active)
            .ok_or(EngineError::NotFound("service"))?;
        if !self
            .directory
            .location_exists(self.provider_id, request.location_id)
            .await
        {
            return Err(EngineError::NotFound("location"));
        }
        let member = MemberSelector::from_option(request.member_id);
        if let MemberSelector::Specific(member_id) = member
            && !self.directory.member_exists(self.provider_id, member_id).await
        {
            return Err(EngineError::NotFound("member"));
        }

        let buffer = service
            .buffer_minutes
            .unwrap_or(settings.default_buffer_minutes);
        let duration_minutes = service.duration_minutes + buffer;

        let starts_at = truncate_to_minute(request.starts_at);
        let now = local_now(settings.timezone);
        if starts_at <= now {
            return Err(EngineError::Validation(
                "booking start must be in the future".into(),
            ));
        }
        let Some((window, ends_at)) = slot_bounds(starts_at, duration_minutes)? else {
            return Err(EngineError::SlotUnavailable);
        };

        let key = CalendarKey {
            location_id: request.location_id,
            member,
        };
        let cal = self.calendar_or_create(key);
        let mut guard = cal.write().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_CALENDAR {
            return Err(EngineError::LimitExceeded("too many bookings on calendar"));
        }

        let free = self.slot_open(request.location_id, member, starts_at, &window)
            && !guard.is_occupied(starts_at, ends_at, None);
        if !free {
            metrics::counter!(crate::observability::RESERVE_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::SlotUnavailable);
        }

        let status = if settings.requires_confirmation {
            BookingStatus::Pending
        } else {
            BookingStatus::Confirmed
        };
        let booking = Booking {
            id: Ulid::new(),
            location_id: request.location_id,
            member,
            service_id: request.service_id,
            starts_at,
            ends_at,
            duration_minutes,
            status,
            cancel_token: Uuid::new_v4(),
            client: request.client,
            created_at: now,
            cancelled_at: None,
            cancelled_by: None,
            cancel_reason: None,
        };
        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(
            crate::observability::OPS_TOTAL,
            "op" => "reserve",
            "status" => "ok"
        )
        .increment(1);
        tracing::info!(
            booking = %booking.id,
            location = %booking.location_id,
            starts_at = %booking.starts_at,
            "reserved"
        );
        Ok(booking)
    }

    /// Move a booking to a new start, keeping its duration and status.
    pub async fn reschedule(
        &self,
        booking_id: Ulid,
        new_start: NaiveDateTime,
    ) -> Result<Booking, EngineError> {
        let key = self
            .booking_index
            .get(&booking_id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound("booking"))?;
        let cal = self.calendar(key).ok_or(EngineError::NotFound("booking"))?;
        let settings = self.settings().await?;
        let now = local_now(settings.timezone);

        let mut guard = cal.write().await;
        let booking = guard
            .get(booking_id)
            .ok_or(EngineError::NotFound("booking"))?;
        if booking.status.is_terminal() {
            return Err(EngineError::InvalidTransition {
                from: booking.status,
                to: booking.status,
            });
        }
        let duration_minutes = booking.duration_minutes;

        let starts_at = truncate_to_minute(new_start);
        if starts_at <= now {
            return Err(EngineError::Validation(
                "cannot reschedule into the past".into(),
            ));
        }
        let Some((window, ends_at)) = slot_bounds(starts_at, duration_minutes)? else {
            return Err(EngineError::SlotUnavailable);
        };

        let free = self.slot_open(key.location_id, key.member, starts_at, &window)
            && !guard.is_occupied(starts_at, ends_at, Some(booking_id));
        if !free {
            metrics::counter!(crate::observability::RESERVE_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::SlotUnavailable);
        }

        let event = Event::BookingRescheduled {
            id: booking_id,
            starts_at,
            ends_at,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(
            crate::observability::OPS_TOTAL,
            "op" => "reschedule",
            "status" => "ok"
        )
        .increment(1);
        Ok(guard
            .get(booking_id)
            .expect("booking still present")
            .clone())
    }

    pub async fn confirm(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        self.transition(booking_id, BookingStatus::Confirmed, None, None)
            .await
    }

    pub async fn cancel(
        &self,
        booking_id: Ulid,
        by: CancelActor,
        reason: Option<String>,
    ) -> Result<Booking, EngineError> {
        self.transition(booking_id, BookingStatus::Cancelled, Some(by), reason)
            .await
    }

    pub async fn mark_no_show(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        self.transition(booking_id, BookingStatus::NoShow, None, None)
            .await
    }

    /// Anonymous-client cancellation through the opaque token.
    pub async fn cancel_by_token(
        &self,
        token: Uuid,
        reason: Option<String>,
    ) -> Result<Booking, EngineError> {
        let booking = self.booking_by_token(token).await?;
        self.cancel(booking.id, CancelActor::Client, reason).await
    }
}
