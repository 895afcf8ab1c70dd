//! Run deadline helpers.

use std::time::{Duration, Instant};

/// Time left until `deadline`, or `None` once it has passed.
pub fn remaining_budget(deadline: Instant) -> Option<Duration> {
    deadline
        .checked_duration_since(Instant::now())
        .filter(|remaining| !remaining.is_zero())
}

/// Deadline `secs` from now; `0` disables the deadline.
pub fn deadline_after(secs: u64) -> Option<Instant> {
    (secs > 0).then(|| Instant::now() + Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn past_deadline_has_no_budget() {
        let past = Instant::now()
            .checked_sub(Duration::from_millis(5))
            .unwrap_or_else(Instant::now);
        assert!(remaining_budget(past).is_none());
    }

    #[test]
    fn future_deadline_has_budget() {
        let remaining = remaining_budget(Instant::now() + Duration::from_secs(60)).expect("budget");
        assert!(remaining > Duration::from_secs(50));
    }

    #[test]
    fn zero_seconds_disables_deadline() {
        assert!(deadline_after(0).is_none());
        assert!(deadline_after(10).is_some());
    }
}
