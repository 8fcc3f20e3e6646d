//! Run deadline helpers.

use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};

/// Remaining time until `deadline`. Errors once the deadline has passed.
pub fn remaining_budget(deadline: Instant) -> Result<Duration> {
    let remaining = deadline
        .checked_duration_since(Instant::now())
        .unwrap_or(Duration::ZERO);
    if remaining.is_zero() {
        return Err(anyhow!("run timed out"));
    }
    Ok(remaining)
}

/// The shorter of `limit` and the time left before an optional deadline.
///
/// Returns `None` when the deadline has already passed.
pub fn bounded_timeout(limit: Duration, deadline: Option<Instant>) -> Option<Duration> {
    match deadline {
        None => Some(limit),
        Some(deadline) => remaining_budget(deadline).ok().map(|left| left.min(limit)),
    }
}
