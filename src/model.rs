use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use ulid::Ulid;
use uuid::Uuid;

/// Minutes in a full day; `24:00` is a valid window end.
pub const MINUTES_PER_DAY: u16 = 24 * 60;

/// Wall-clock time of day in minutes since midnight, no date or timezone.
/// Range `00:00`..=`24:00`; ordering is the numeric minute ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    pub const MIDNIGHT: TimeOfDay = TimeOfDay(0);
    pub const END_OF_DAY: TimeOfDay = TimeOfDay(MINUTES_PER_DAY);

    /// Build from minutes since midnight. Returns `None` past `24:00`.
    pub fn from_minutes(minutes: u16) -> Option<Self> {
        (minutes <= MINUTES_PER_DAY).then_some(Self(minutes))
    }

    pub fn from_hm(hour: u16, minute: u16) -> Option<Self> {
        if minute >= 60 {
            return None;
        }
        Self::from_minutes(hour * 60 + minute)
    }

    pub fn minutes(self) -> u16 {
        self.0
    }

    /// Advance by `minutes`, saturating at nothing: `None` past `24:00`.
    pub fn add_minutes(self, minutes: u16) -> Option<Self> {
        Self::from_minutes(self.0.checked_add(minutes)?)
    }

    /// Anchor onto a calendar date. `24:00` lands on the next day's midnight.
    pub fn on(self, date: NaiveDate) -> NaiveDateTime {
        date.and_time(NaiveTime::MIN) + chrono::Duration::minutes(i64::from(self.0))
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct InvalidTimeOfDay(pub String);

impl fmt::Display for InvalidTimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid time of day: {:?} (expected HH:MM)", self.0)
    }
}

impl std::error::Error for InvalidTimeOfDay {}

impl FromStr for TimeOfDay {
    type Err = InvalidTimeOfDay;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || InvalidTimeOfDay(s.to_string());
        let (h, m) = s.split_once(':').ok_or_else(err)?;
        if h.len() != 2 || m.len() != 2 {
            return Err(err());
        }
        let hour: u16 = h.parse().map_err(|_| err())?;
        let minute: u16 = m.parse().map_err(|_| err())?;
        Self::from_hm(hour, minute).ok_or_else(err)
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Half-open time-of-day interval `[start, end)` within one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

impl Window {
    pub fn new(start: TimeOfDay, end: TimeOfDay) -> Self {
        debug_assert!(start < end, "Window start must be before end");
        Self { start, end }
    }

    pub fn is_valid(&self) -> bool {
        self.start < self.end
    }

    pub fn duration_minutes(&self) -> u16 {
        self.end.minutes() - self.start.minutes()
    }

    /// Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Window) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains(&self, other: &Window) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Half-open overlap on absolute datetimes.
pub fn ranges_overlap(
    s1: NaiveDateTime,
    e1: NaiveDateTime,
    s2: NaiveDateTime,
    e2: NaiveDateTime,
) -> bool {
    s1 < e2 && s2 < e1
}

/// Truncate to `HH:MM`, dropping seconds. Slot boundaries are minute-aligned,
/// so this is how absolute times map back into the weekly template.
pub fn time_of_day_of(dt: NaiveDateTime) -> TimeOfDay {
    TimeOfDay((dt.hour() * 60 + dt.minute()) as u16)
}

/// Drop the seconds component of an absolute datetime.
pub fn truncate_to_minute(dt: NaiveDateTime) -> NaiveDateTime {
    time_of_day_of(dt).on(dt.date())
}

/// Day of week as the template index: 0 = Sunday .. 6 = Saturday.
pub fn day_of_week(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

/// Current wall-clock time in the provider's configured timezone.
pub fn local_now(tz: Tz) -> NaiveDateTime {
    Utc::now().with_timezone(&tz).naive_local()
}

/// Which calendar a request targets: a specific member's, or the
/// location-level default used when no member is specified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberSelector {
    LocationDefault,
    Specific(Ulid),
}

// On the wire a selector is just an optional member id.
impl Serialize for MemberSelector {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_option().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for MemberSelector {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self::from_option(Option::<Ulid>::deserialize(deserializer)?))
    }
}

impl MemberSelector {
    pub fn from_option(member_id: Option<Ulid>) -> Self {
        match member_id {
            Some(id) => Self::Specific(id),
            None => Self::LocationDefault,
        }
    }

    pub fn to_option(self) -> Option<Ulid> {
        match self {
            Self::Specific(id) => Some(id),
            Self::LocationDefault => None,
        }
    }
}

/// Identity of one bookable calendar. All occupancy checks and reservation
/// writes for a key are serialized through its lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CalendarKey {
    pub location_id: Ulid,
    pub member: MemberSelector,
}

/// Identity of one weekly-template day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateKey {
    pub location_id: Ulid,
    pub member: MemberSelector,
    pub day_of_week: u8,
}

/// Recurring weekly opening hours for one (location, member, day-of-week).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityRecord {
    pub location_id: Ulid,
    pub member: MemberSelector,
    /// 0 = Sunday .. 6 = Saturday.
    pub day_of_week: u8,
    pub is_open: bool,
    /// Pairwise non-overlapping, sorted by start (enforced on write).
    pub windows: Vec<Window>,
}

impl AvailabilityRecord {
    pub fn key(&self) -> TemplateKey {
        TemplateKey {
            location_id: self.location_id,
            member: self.member,
            day_of_week: self.day_of_week,
        }
    }
}

/// Ad-hoc exclusion overriding the weekly template for a date range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedPeriod {
    pub id: Ulid,
    /// Inclusive calendar dates.
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub all_day: bool,
    /// Present iff `!all_day`, with `start_time < end_time`.
    pub start_time: Option<TimeOfDay>,
    pub end_time: Option<TimeOfDay>,
    /// `None` applies to every member / every location.
    pub member_id: Option<Ulid>,
    pub location_id: Option<Ulid>,
    pub label: Option<String>,
}

impl BlockedPeriod {
    /// Scope check: does this period cover `date` for this calendar at all?
    pub fn covers(&self, date: NaiveDate, location_id: Ulid, member: MemberSelector) -> bool {
        if date < self.start_date || date > self.end_date {
            return false;
        }
        if self.location_id.is_some_and(|l| l != location_id) {
            return false;
        }
        match (self.member_id, member) {
            (None, _) => true,
            (Some(scoped), MemberSelector::Specific(m)) => scoped == m,
            (Some(_), MemberSelector::LocationDefault) => false,
        }
    }

    /// Full applicability: scope covers the candidate and, when
    /// time-bounded, the period's window overlaps the candidate's window.
    pub fn blocks(
        &self,
        date: NaiveDate,
        location_id: Ulid,
        member: MemberSelector,
        window: &Window,
    ) -> bool {
        if !self.covers(date, location_id, member) {
            return false;
        }
        if self.all_day {
            return true;
        }
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Window { start, end }.overlaps(window),
            // Malformed periods are rejected on write; treat as non-blocking.
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    NoShow,
}

impl BookingStatus {
    /// Only pending/confirmed bookings consume a time window.
    pub fn is_occupying(self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::NoShow)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
            Self::NoShow => "noshow",
        };
        f.write_str(s)
    }
}

/// Who performed a cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelActor {
    Client,
    Provider,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// A committed reservation. Never physically deleted; terminal statuses
/// stay in the calendar as the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub location_id: Ulid,
    pub member: MemberSelector,
    pub service_id: Ulid,
    /// Provider-local wall clock. Invariant: `ends_at = starts_at + duration`.
    pub starts_at: NaiveDateTime,
    pub ends_at: NaiveDateTime,
    pub duration_minutes: u32,
    pub status: BookingStatus,
    /// Opaque token for unauthenticated cancellation.
    pub cancel_token: Uuid,
    pub client: ClientInfo,
    pub created_at: NaiveDateTime,
    pub cancelled_at: Option<NaiveDateTime>,
    pub cancelled_by: Option<CancelActor>,
    pub cancel_reason: Option<String>,
}

impl Booking {
    pub fn calendar_key(&self) -> CalendarKey {
        CalendarKey {
            location_id: self.location_id,
            member: self.member,
        }
    }

    pub fn overlaps_range(&self, from: NaiveDateTime, to: NaiveDateTime) -> bool {
        ranges_overlap(self.starts_at, self.ends_at, from, to)
    }
}

/// A computed, not-yet-reserved bookable window. No identity beyond its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateSlot {
    pub date: NaiveDate,
    pub start: TimeOfDay,
    pub end: TimeOfDay,
    pub starts_at: NaiveDateTime,
    pub ends_at: NaiveDateTime,
}

/// All bookings for one (location, member) calendar, sorted by `starts_at`.
#[derive(Debug, Clone)]
pub struct CalendarState {
    pub key: CalendarKey,
    pub bookings: Vec<Booking>,
}

impl CalendarState {
    pub fn new(key: CalendarKey) -> Self {
        Self {
            key,
            bookings: Vec::new(),
        }
    }

    /// Insert maintaining sort order by `starts_at`.
    pub fn insert(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| b.starts_at <= booking.starts_at);
        self.bookings.insert(pos, booking);
    }

    pub fn get(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    /// Bookings whose span overlaps `[from, to)`, regardless of status.
    /// Binary search skips bookings starting at or after `to`.
    pub fn overlapping(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> impl Iterator<Item = &Booking> {
        let right = self.bookings.partition_point(|b| b.starts_at < to);
        self.bookings[..right]
            .iter()
            .filter(move |b| b.ends_at > from)
    }

    /// True when any occupying booking other than `exclude` overlaps the span.
    pub fn is_occupied(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
        exclude: Option<Ulid>,
    ) -> bool {
        self.overlapping(from, to)
            .any(|b| b.status.is_occupying() && exclude != Some(b.id))
    }

    /// Move a booking's times, keeping the vector sorted.
    pub fn set_times(&mut self, id: Ulid, starts_at: NaiveDateTime, ends_at: NaiveDateTime) -> bool {
        let Some(pos) = self.bookings.iter().position(|b| b.id == id) else {
            return false;
        };
        let mut booking = self.bookings.remove(pos);
        booking.starts_at = starts_at;
        booking.ends_at = ends_at;
        self.insert(booking);
        true
    }

    pub fn set_status(
        &mut self,
        id: Ulid,
        status: BookingStatus,
        at: NaiveDateTime,
        by: Option<CancelActor>,
        reason: Option<String>,
    ) -> bool {
        let Some(booking) = self.bookings.iter_mut().find(|b| b.id == id) else {
            return false;
        };
        booking.status = status;
        if status == BookingStatus::Cancelled {
            booking.cancelled_at = Some(at);
            booking.cancelled_by = by;
            booking.cancel_reason = reason;
        }
        true
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    AvailabilitySet {
        record: AvailabilityRecord,
    },
    /// Seven day records written atomically; one entry so a torn write
    /// cannot leave a mixed week behind.
    AvailabilityWeekSet {
        records: Vec<AvailabilityRecord>,
    },
    BlockedPeriodCreated {
        period: BlockedPeriod,
    },
    BlockedPeriodDeleted {
        id: Ulid,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingRescheduled {
        id: Ulid,
        starts_at: NaiveDateTime,
        ends_at: NaiveDateTime,
    },
    BookingStatusChanged {
        id: Ulid,
        status: BookingStatus,
        at: NaiveDateTime,
        by: Option<CancelActor>,
        reason: Option<String>,
    },
}
