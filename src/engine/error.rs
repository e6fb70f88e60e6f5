use crate::model::BookingStatus;

/// Error taxonomy crossing the engine boundary. Store-level failures are
/// wrapped before they reach callers; nothing from the storage layer leaks.
#[derive(Debug)]
pub enum EngineError {
    /// Malformed input; always recoverable locally.
    Validation(String),
    /// A referenced service/location/member/booking does not exist.
    NotFound(&'static str),
    /// The availability check failed at commit time: lost a race or the
    /// window was never open. Retryable after re-fetching slots.
    SlotUnavailable,
    /// Illegal booking status change; never silently coerced.
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    LimitExceeded(&'static str),
    Wal(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "validation failed: {msg}"),
            EngineError::NotFound(kind) => write!(f, "{kind} not found"),
            EngineError::SlotUnavailable => write!(f, "slot is no longer available"),
            EngineError::InvalidTransition { from, to } => {
                write!(f, "invalid booking transition: {from} -> {to}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Wal(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
