/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Sliding-window message rate limiting.
//!
//! [`ThrottleWindow`] remembers the instants of the events it admitted
//! within the last window, so no interval of `window` length ever admits
//! more than `limit` events. It throttles inbound business messages and
//! rate-limits retransmit requests.

use crate::config::RateLimit;
use fixp_core::codes::ThrottleConfigurationStatus;
use std::collections::VecDeque;
use std::time::Instant;

/// Outcome of offering one event to a [`ThrottleWindow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Within the limit.
    Accepted,
    /// Over the limit for the current window.
    Rejected,
}

/// Limit waiting for the events admitted under the old one to age out.
#[derive(Debug, Clone, Copy)]
struct PendingLimit {
    limit: RateLimit,
    /// Last admission under the old limit, `None` if there was none.
    after: Option<Instant>,
}

/// Rate limiter over the admissions of the trailing window.
#[derive(Debug, Clone)]
pub struct ThrottleWindow {
    limit: RateLimit,
    pending: Option<PendingLimit>,
    admitted: VecDeque<Instant>,
}

impl ThrottleWindow {
    /// Creates a window with the given limit.
    #[must_use]
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            pending: None,
            admitted: VecDeque::new(),
        }
    }

    fn expire(&mut self, now: Instant) {
        let window = self.limit.window;
        while self
            .admitted
            .front()
            .is_some_and(|&at| now.saturating_duration_since(at) >= window)
        {
            self.admitted.pop_front();
        }
    }

    /// Offers one event at `now` and decides whether it is admitted.
    ///
    /// Rejected events do not count against later ones.
    pub fn admit(&mut self, now: Instant) -> Admission {
        if let Some(pending) = self.pending
            && pending
                .after
                .is_none_or(|last| now.saturating_duration_since(last) >= self.limit.window)
        {
            self.limit = pending.limit;
            self.pending = None;
            self.admitted.clear();
        }
        self.expire(now);

        if self.admitted.len() < self.limit.limit as usize {
            self.admitted.push_back(now);
            Admission::Accepted
        } else {
            Admission::Rejected
        }
    }

    /// Schedules a new limit, applied once every event admitted under the
    /// current one has left the window.
    pub fn reconfigure(&mut self, limit: RateLimit) -> ThrottleConfigurationStatus {
        if !limit.is_valid() {
            return ThrottleConfigurationStatus::InvalidArguments;
        }
        self.pending = Some(PendingLimit {
            limit,
            after: self.admitted.back().copied(),
        });
        ThrottleConfigurationStatus::Ok
    }

    /// Returns the limit in force.
    #[must_use]
    pub const fn limit(&self) -> RateLimit {
        self.limit
    }

    /// Returns the limit waiting to take over, if any.
    #[must_use]
    pub fn pending(&self) -> Option<RateLimit> {
        self.pending.map(|pending| pending.limit)
    }

    /// Returns the number of admissions still inside the window at `now`.
    #[must_use]
    pub fn count_in_window(&self, now: Instant) -> usize {
        self.admitted
            .iter()
            .filter(|&&at| now.saturating_duration_since(at) < self.limit.window)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn window(limit: u32, ms: u64) -> ThrottleWindow {
        ThrottleWindow::new(RateLimit::new(limit, Duration::from_millis(ms)))
    }

    #[test]
    fn test_first_limit_events_accepted() {
        let now = Instant::now();
        let mut throttle = window(3, 100);
        let results: Vec<Admission> = (0..5).map(|_| throttle.admit(now)).collect();
        assert_eq!(results, vec![
            Admission::Accepted,
            Admission::Accepted,
            Admission::Accepted,
            Admission::Rejected,
            Admission::Rejected,
        ]);
        assert_eq!(throttle.count_in_window(now), 3);
    }

    #[test]
    fn test_window_rolls_over() {
        let start = Instant::now();
        let mut throttle = window(1, 100);
        assert_eq!(throttle.admit(start), Admission::Accepted);
        assert_eq!(
            throttle.admit(start + Duration::from_millis(99)),
            Admission::Rejected
        );
        assert_eq!(
            throttle.admit(start + Duration::from_millis(100)),
            Admission::Accepted
        );
    }

    #[test]
    fn test_reconfigure_applies_next_window() {
        let start = Instant::now();
        let mut throttle = window(1, 100);
        assert_eq!(throttle.admit(start), Admission::Accepted);

        let status = throttle.reconfigure(RateLimit::new(3, Duration::from_millis(100)));
        assert_eq!(status, ThrottleConfigurationStatus::Ok);
        assert_eq!(
            throttle.admit(start + Duration::from_millis(10)),
            Admission::Rejected
        );

        let next = start + Duration::from_millis(100);
        for _ in 0..3 {
            assert_eq!(throttle.admit(next), Admission::Accepted);
        }
        assert_eq!(throttle.admit(next), Admission::Rejected);
        assert!(throttle.pending().is_none());
        assert_eq!(throttle.limit().limit, 3);
    }

    #[test]
    fn test_window_slides_across_boundary() {
        let start = Instant::now();
        let at = |ms| start + Duration::from_millis(ms);
        let mut throttle = window(3, 100);
        let results: Vec<Admission> = [0, 95, 96, 100, 101, 102, 195, 196]
            .into_iter()
            .map(|ms| throttle.admit(at(ms)))
            .collect();
        assert_eq!(results, vec![
            Admission::Accepted,
            Admission::Accepted,
            Admission::Accepted,
            Admission::Accepted,
            Admission::Rejected,
            Admission::Rejected,
            Admission::Accepted,
            Admission::Accepted,
        ]);
        assert_eq!(throttle.count_in_window(at(196)), 3);
    }

    #[test]
    fn test_reconfigure_rejects_zero() {
        let mut throttle = window(1, 100);
        assert_eq!(
            throttle.reconfigure(RateLimit::new(0, Duration::from_millis(100))),
            ThrottleConfigurationStatus::InvalidArguments
        );
        assert_eq!(
            throttle.reconfigure(RateLimit::new(5, Duration::ZERO)),
            ThrottleConfigurationStatus::InvalidArguments
        );
    }
}
