use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::json;
use ulid::Ulid;
use uuid::Uuid;

use crate::engine::{Engine, EngineError, NewBlockedPeriod, ReserveRequest};
use crate::model::*;
use crate::provider::ProviderManager;

#[derive(Clone)]
pub struct AppState {
    pub providers: Arc<ProviderManager>,
}

pub fn router(providers: Arc<ProviderManager>) -> Router {
    let state = AppState { providers };
    Router::new()
        .route("/health", get(health))
        .route("/slots", get(list_slots))
        .route("/reservations", post(create_reservation))
        .route("/reservations/{id}", get(get_reservation))
        .route("/reservations/{id}/reschedule", post(reschedule_reservation))
        .route("/reservations/{id}/confirm", post(confirm_reservation))
        .route("/reservations/{id}/cancel", post(cancel_reservation))
        .route("/reservations/{id}/noshow", post(noshow_reservation))
        .route("/reservations/by-token/{token}", get(get_by_token))
        .route("/reservations/by-token/{token}/cancel", post(cancel_by_token))
        .route("/providers/{provider_id}/availability", get(get_availability))
        .route("/providers/{provider_id}/availability/day", put(put_day))
        .route("/providers/{provider_id}/availability/week", put(put_week))
        .route(
            "/providers/{provider_id}/blocked-periods",
            get(list_blocked).post(create_blocked),
        )
        .route(
            "/providers/{provider_id}/blocked-periods/{id}",
            axum::routing::delete(delete_blocked),
        )
        .route("/providers/{provider_id}/bookings", get(list_bookings))
        .with_state(state)
}

// ── Error mapping ────────────────────────────────────────────────

pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            EngineError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
            EngineError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            EngineError::SlotUnavailable => (StatusCode::CONFLICT, "slot_unavailable"),
            EngineError::InvalidTransition { .. } => (StatusCode::CONFLICT, "invalid_transition"),
            EngineError::LimitExceeded(_) => (StatusCode::UNPROCESSABLE_ENTITY, "limit_exceeded"),
            EngineError::Wal(_) => {
                tracing::error!("storage failure: {}", self.0);
                // Storage details stay behind the boundary.
                let body = Json(json!({ "code": "internal", "error": "internal error" }));
                return (StatusCode::INTERNAL_SERVER_ERROR, body).into_response();
            }
        };
        let body = Json(json!({ "code": code, "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

// ── DTOs ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct BookingDto {
    pub id: Ulid,
    pub provider_id: Ulid,
    pub location_id: Ulid,
    pub member_id: Option<Ulid>,
    pub service_id: Ulid,
    pub starts_at: NaiveDateTime,
    pub ends_at: NaiveDateTime,
    pub duration_minutes: u32,
    pub status: BookingStatus,
    pub cancel_token: Uuid,
    pub client: ClientInfo,
    pub created_at: NaiveDateTime,
    pub cancelled_at: Option<NaiveDateTime>,
    pub cancelled_by: Option<CancelActor>,
    pub cancel_reason: Option<String>,
}

impl BookingDto {
    fn new(provider_id: Ulid, b: Booking) -> Self {
        Self {
            id: b.id,
            provider_id,
            location_id: b.location_id,
            member_id: b.member.to_option(),
            service_id: b.service_id,
            starts_at: b.starts_at,
            ends_at: b.ends_at,
            duration_minutes: b.duration_minutes,
            status: b.status,
            cancel_token: b.cancel_token,
            client: b.client,
            created_at: b.created_at,
            cancelled_at: b.cancelled_at,
            cancelled_by: b.cancelled_by,
            cancel_reason: b.cancel_reason,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    pub provider_id: Ulid,
    pub service_id: Ulid,
    pub location_id: Ulid,
    pub member_id: Option<Ulid>,
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct ReserveBody {
    pub provider_id: Ulid,
    pub service_id: Ulid,
    pub location_id: Ulid,
    pub member_id: Option<Ulid>,
    pub starts_at: NaiveDateTime,
    pub client: ClientInfo,
}

#[derive(Debug, Deserialize)]
pub struct RescheduleBody {
    pub starts_at: NaiveDateTime,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelBody {
    #[serde(default)]
    pub by: Option<CancelActor>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DayBody {
    pub location_id: Ulid,
    pub member_id: Option<Ulid>,
    pub day_of_week: u8,
    pub is_open: bool,
    #[serde(default)]
    pub windows: Vec<Window>,
}

#[derive(Debug, Deserialize)]
pub struct WeekDayBody {
    pub day_of_week: u8,
    pub is_open: bool,
    #[serde(default)]
    pub windows: Vec<Window>,
}

#[derive(Debug, Deserialize)]
pub struct WeekBody {
    pub location_id: Ulid,
    pub member_id: Option<Ulid>,
    pub days: Vec<WeekDayBody>,
}

#[derive(Debug, Deserialize)]
pub struct CalendarQuery {
    pub location_id: Ulid,
    pub member_id: Option<Ulid>,
}

#[derive(Debug, Deserialize)]
pub struct BlockedBody {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub all_day: bool,
    #[serde(default)]
    pub start_time: Option<TimeOfDay>,
    #[serde(default)]
    pub end_time: Option<TimeOfDay>,
    #[serde(default)]
    pub member_id: Option<Ulid>,
    #[serde(default)]
    pub location_id: Option<Ulid>,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BlockedListQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct BookingsQuery {
    pub location_id: Ulid,
    pub member_id: Option<Ulid>,
    pub from: NaiveDate,
    pub to: NaiveDate,
}

// ── Handlers ─────────────────────────────────────────────────────

async fn health() -> &'static str {
    "ok"
}

async fn engine(state: &AppState, provider_id: Ulid) -> Result<Arc<Engine>, ApiError> {
    Ok(state.providers.get_or_create(provider_id).await?)
}

fn booking_engine(state: &AppState, id: Ulid) -> Result<(Ulid, Arc<Engine>), ApiError> {
    state
        .providers
        .engine_for_booking(id)
        .ok_or(ApiError(EngineError::NotFound("booking")))
}

async fn list_slots(
    State(state): State<AppState>,
    Query(q): Query<SlotsQuery>,
) -> Result<Json<Vec<CandidateSlot>>, ApiError> {
    let engine = engine(&state, q.provider_id).await?;
    let started = std::time::Instant::now();
    let slots = engine
        .generate_slots(
            q.service_id,
            q.location_id,
            MemberSelector::from_option(q.member_id),
            q.from,
            q.to,
        )
        .await?;
    metrics::histogram!(crate::observability::OP_DURATION_SECONDS, "op" => "slots")
        .record(started.elapsed().as_secs_f64());
    Ok(Json(slots))
}

async fn create_reservation(
    State(state): State<AppState>,
    Json(body): Json<ReserveBody>,
) -> Result<(StatusCode, Json<BookingDto>), ApiError> {
    let engine = engine(&state, body.provider_id).await?;
    let booking = engine
        .reserve(ReserveRequest {
            service_id: body.service_id,
            location_id: body.location_id,
            member_id: body.member_id,
            starts_at: body.starts_at,
            client: body.client,
        })
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(BookingDto::new(body.provider_id, booking)),
    ))
}

async fn get_reservation(
    State(state): State<AppState>,
    Path(id): Path<Ulid>,
) -> Result<Json<BookingDto>, ApiError> {
    let (provider_id, engine) = booking_engine(&state, id)?;
    let booking = engine.booking(id).await?;
    Ok(Json(BookingDto::new(provider_id, booking)))
}

async fn reschedule_reservation(
    State(state): State<AppState>,
    Path(id): Path<Ulid>,
    Json(body): Json<RescheduleBody>,
) -> Result<Json<BookingDto>, ApiError> {
    let (provider_id, engine) = booking_engine(&state, id)?;
    let booking = engine.reschedule(id, body.starts_at).await?;
    Ok(Json(BookingDto::new(provider_id, booking)))
}

async fn confirm_reservation(
    State(state): State<AppState>,
    Path(id): Path<Ulid>,
) -> Result<Json<BookingDto>, ApiError> {
    let (provider_id, engine) = booking_engine(&state, id)?;
    let booking = engine.confirm(id).await?;
    Ok(Json(BookingDto::new(provider_id, booking)))
}

async fn cancel_reservation(
    State(state): State<AppState>,
    Path(id): Path<Ulid>,
    body: Option<Json<CancelBody>>,
) -> Result<Json<BookingDto>, ApiError> {
    let (provider_id, engine) = booking_engine(&state, id)?;
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let by = body.by.unwrap_or(CancelActor::Client);
    let booking = engine.cancel(id, by, body.reason).await?;
    Ok(Json(BookingDto::new(provider_id, booking)))
}

async fn noshow_reservation(
    State(state): State<AppState>,
    Path(id): Path<Ulid>,
) -> Result<Json<BookingDto>, ApiError> {
    let (provider_id, engine) = booking_engine(&state, id)?;
    let booking = engine.mark_no_show(id).await?;
    Ok(Json(BookingDto::new(provider_id, booking)))
}

async fn get_by_token(
    State(state): State<AppState>,
    Path(token): Path<Uuid>,
) -> Result<Json<BookingDto>, ApiError> {
    let (provider_id, engine) = state
        .providers
        .engine_for_token(token)
        .ok_or(ApiError(EngineError::NotFound("booking")))?;
    let booking = engine.booking_by_token(token).await?;
    Ok(Json(BookingDto::new(provider_id, booking)))
}

async fn cancel_by_token(
    State(state): State<AppState>,
    Path(token): Path<Uuid>,
    body: Option<Json<CancelBody>>,
) -> Result<Json<BookingDto>, ApiError> {
    let (provider_id, engine) = state
        .providers
        .engine_for_token(token)
        .ok_or(ApiError(EngineError::NotFound("booking")))?;
    let reason = body.and_then(|Json(b)| b.reason);
    let booking = engine.cancel_by_token(token, reason).await?;
    Ok(Json(BookingDto::new(provider_id, booking)))
}

async fn get_availability(
    State(state): State<AppState>,
    Path(provider_id): Path<Ulid>,
    Query(q): Query<CalendarQuery>,
) -> Result<Json<Vec<AvailabilityRecord>>, ApiError> {
    let engine = engine(&state, provider_id).await?;
    Ok(Json(engine.week_template(
        q.location_id,
        MemberSelector::from_option(q.member_id),
    )))
}

async fn put_day(
    State(state): State<AppState>,
    Path(provider_id): Path<Ulid>,
    Json(body): Json<DayBody>,
) -> Result<StatusCode, ApiError> {
    let engine = engine(&state, provider_id).await?;
    engine
        .set_day(AvailabilityRecord {
            location_id: body.location_id,
            member: MemberSelector::from_option(body.member_id),
            day_of_week: body.day_of_week,
            is_open: body.is_open,
            windows: body.windows,
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn put_week(
    State(state): State<AppState>,
    Path(provider_id): Path<Ulid>,
    Json(body): Json<WeekBody>,
) -> Result<StatusCode, ApiError> {
    let engine = engine(&state, provider_id).await?;
    let member = MemberSelector::from_option(body.member_id);
    let records = body
        .days
        .into_iter()
        .map(|d| AvailabilityRecord {
            location_id: body.location_id,
            member,
            day_of_week: d.day_of_week,
            is_open: d.is_open,
            windows: d.windows,
        })
        .collect();
    engine.set_week(body.location_id, member, records).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_blocked(
    State(state): State<AppState>,
    Path(provider_id): Path<Ulid>,
    Json(body): Json<BlockedBody>,
) -> Result<(StatusCode, Json<BlockedPeriod>), ApiError> {
    let engine = engine(&state, provider_id).await?;
    let period = engine
        .create_blocked_period(NewBlockedPeriod {
            start_date: body.start_date,
            end_date: body.end_date,
            all_day: body.all_day,
            start_time: body.start_time,
            end_time: body.end_time,
            member_id: body.member_id,
            location_id: body.location_id,
            label: body.label,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(period)))
}

async fn list_blocked(
    State(state): State<AppState>,
    Path(provider_id): Path<Ulid>,
    Query(q): Query<BlockedListQuery>,
) -> Result<Json<Vec<BlockedPeriod>>, ApiError> {
    let engine = engine(&state, provider_id).await?;
    let periods = match (q.from, q.to) {
        (Some(from), Some(to)) => engine.blocked_in_range(from, to),
        (None, None) => engine.blocked_upcoming(engine.today().await?),
        _ => {
            return Err(ApiError(EngineError::Validation(
                "from and to must be given together".into(),
            )));
        }
    };
    Ok(Json(periods))
}

async fn delete_blocked(
    State(state): State<AppState>,
    Path((provider_id, id)): Path<(Ulid, Ulid)>,
) -> Result<StatusCode, ApiError> {
    let engine = engine(&state, provider_id).await?;
    engine.delete_blocked_period(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_bookings(
    State(state): State<AppState>,
    Path(provider_id): Path<Ulid>,
    Query(q): Query<BookingsQuery>,
) -> Result<Json<Vec<BookingDto>>, ApiError> {
    let engine = engine(&state, provider_id).await?;
    let from = TimeOfDay::MIDNIGHT.on(q.from);
    let to = TimeOfDay::END_OF_DAY.on(q.to);
    let bookings = engine
        .list_occupying(
            q.location_id,
            MemberSelector::from_option(q.member_id),
            from,
            to,
        )
        .await
        .into_iter()
        .map(|b| BookingDto::new(provider_id, b))
        .collect();
    Ok(Json(bookings))
}
