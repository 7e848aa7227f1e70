//! Replay window filter
//!
//! Rejects events whose origination time is too stale to trust. Runs after
//! signature verification and before the idempotency check, so a stale
//! replayed duplicate reports "too old" rather than "duplicate".

use time::{Duration, OffsetDateTime};

/// How old a signed event may be and still be trusted as fresh.
pub const REPLAY_TOLERANCE: Duration = Duration::minutes(5);

/// Judge an event's origination timestamp against the replay window.
///
/// - Absent timestamp: accepted unconditionally (legacy events).
/// - Future timestamp: accepted regardless of magnitude. The asymmetry is
///   deliberate: it tolerates clock skew without weakening the staleness
///   protection.
/// - Otherwise accepted iff `now - occurred_at <= REPLAY_TOLERANCE`,
///   boundary inclusive: an event exactly 5:00 old passes, 5:00.001 fails.
pub fn is_timestamp_valid(occurred_at: Option<OffsetDateTime>, now: OffsetDateTime) -> bool {
    match occurred_at {
        None => true,
        Some(ts) => now - ts <= REPLAY_TOLERANCE,
    }
}

/// Event age in milliseconds, for the rejection log line.
pub fn event_age_ms(occurred_at: OffsetDateTime, now: OffsetDateTime) -> i128 {
    (now - occurred_at).whole_milliseconds()
}
