//! Hard caps. Every limit here is enforced with an explicit error rather
//! than silent truncation.

/// Max providers loaded into one process.
pub const MAX_PROVIDERS: usize = 4096;

/// Max open windows on a single day template.
pub const MAX_WINDOWS_PER_DAY: usize = 16;

/// Max live blocked periods per provider.
pub const MAX_BLOCKED_PERIODS: usize = 4096;

/// Max calendar span (inclusive days) of a single blocked period.
pub const MAX_BLOCKED_SPAN_DAYS: i64 = 366;

/// Max days scanned by one slot-generation call.
pub const MAX_SLOT_QUERY_DAYS: i64 = 92;

/// Max bookings held on one (location, member) calendar.
pub const MAX_BOOKINGS_PER_CALENDAR: usize = 100_000;

/// Max length of client name/email/phone fields.
pub const MAX_CLIENT_FIELD_LEN: usize = 256;

/// Max length of a cancellation reason or blocked-period label.
pub const MAX_REASON_LEN: usize = 512;
