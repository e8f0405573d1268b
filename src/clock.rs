//! The engine threads an explicit `now: i64` (milliseconds) through every
//! operation that stamps row/transform metadata rather than reading the
//! system clock internally, so tests and proptest runs control time exactly
//! (spec §8 requires deterministic replay). This module supplies the one
//! real clock implementation callers reach for outside of tests.

use chrono::Utc;

/// Current wall-clock time in milliseconds since the Unix epoch, the unit
/// every `RowMeta`/`TransformMeta` timestamp field uses.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
