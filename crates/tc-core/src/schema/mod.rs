//! Wire and state schemas for team-chat
//!
//! All types preserve unknown fields for forward compatibility and omit
//! absent optional fields on write (writers never emit null).

pub mod envelope;
pub mod event;
pub mod task;
pub mod team;

pub use envelope::{Envelope, MessageType, RetryPolicy};
pub use event::{EventKind, EventRecord};
pub use task::TaskSnapshot;
pub use team::TeamFile;

use chrono::{DateTime, SecondsFormat, Utc};

/// Render a timestamp as millisecond-precision RFC 3339 UTC (`...sssZ`).
///
/// All system-generated `created_at`/`ts` values use this single format so
/// the lexicographic ordering of timestamps matches chronological order.
pub fn rfc3339_millis(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse an RFC 3339 timestamp into UTC.
pub fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
