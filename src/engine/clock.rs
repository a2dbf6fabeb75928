// src/engine/clock.rs
//
// An attempt's deadline is derived (`started_at + duration`), never a timer.
// Every read or write recomputes it.

use chrono::{DateTime, Duration, Utc};

pub fn deadline(started_at: DateTime<Utc>, duration_minutes: i32) -> DateTime<Utc> {
    started_at + Duration::minutes(i64::from(duration_minutes))
}

pub fn remaining_seconds(started_at: DateTime<Utc>, duration_minutes: i32, now: DateTime<Utc>) -> i64 {
    (deadline(started_at, duration_minutes) - now).num_seconds().max(0)
}

/// How a submission arriving at `now` is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitWindow {
    /// Before the deadline, or within the grace period after it.
    Accepted,
    /// Too late: the payload is discarded.
    Closed,
}

pub fn submit_window(
    started_at: DateTime<Utc>,
    duration_minutes: i32,
    grace_seconds: i64,
    now: DateTime<Utc>,
) -> SubmitWindow {
    let cutoff = deadline(started_at, duration_minutes) + Duration::seconds(grace_seconds.max(0));
    if now <= cutoff {
        SubmitWindow::Accepted
    } else {
        SubmitWindow::Closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grace_cutoff_is_inclusive() {
        let start = Utc::now();
        let cutoff = deadline(start, 10) + Duration::seconds(30);
        assert_eq!(submit_window(start, 10, 30, cutoff), SubmitWindow::Accepted);
        assert_eq!(
            submit_window(start, 10, 30, cutoff + Duration::seconds(1)),
            SubmitWindow::Closed
        );
    }

    #[test]
    fn remaining_never_goes_negative() {
        let start = Utc::now();
        assert_eq!(remaining_seconds(start, 1, start + Duration::seconds(20)), 40);
        assert_eq!(remaining_seconds(start, 1, start + Duration::hours(1)), 0);
    }

    #[test]
    fn grace_period_extends_submission() {
        let start = Utc::now();
        let just_late = start + Duration::seconds(60 + 10);
        assert_eq!(submit_window(start, 1, 30, just_late), SubmitWindow::Accepted);
        assert_eq!(submit_window(start, 1, 0, just_late), SubmitWindow::Closed);
        assert_eq!(
            submit_window(start, 1, 30, start + Duration::minutes(5)),
            SubmitWindow::Closed
        );
    }
}
