/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Keep-alive and liveness timing.
//!
//! This module handles FIXP keep-alive logic:
//! - Sending a Sequence frame when nothing was sent for one interval
//! - Detecting a lapsed peer when nothing was received for the liveness period
//!
//! Every method takes the current instant explicitly so the timing can be
//! driven deterministically.

use std::time::{Duration, Instant};

/// Manages keep-alive timing for one established connection.
#[derive(Debug, Clone)]
pub struct KeepAliveTimer {
    /// Negotiated keep-alive interval.
    interval: Duration,
    /// Inbound silence tolerated before the peer is considered lapsed.
    liveness: Duration,
    /// Time of last frame sent.
    last_sent: Instant,
    /// Time of last frame received.
    last_received: Instant,
}

impl KeepAliveTimer {
    /// Creates a new timer.
    ///
    /// # Arguments
    /// * `interval` - The negotiated keep-alive interval
    /// * `multiplier` - Liveness period in keep-alive intervals
    /// * `now` - Current instant
    #[must_use]
    pub fn new(interval: Duration, multiplier: u32, now: Instant) -> Self {
        Self {
            interval,
            liveness: interval * multiplier.max(1),
            last_sent: now,
            last_received: now,
        }
    }

    /// Records that a frame was sent.
    #[inline]
    pub fn on_sent(&mut self, now: Instant) {
        self.last_sent = now;
    }

    /// Records that a frame was received.
    #[inline]
    pub fn on_received(&mut self, now: Instant) {
        self.last_received = now;
    }

    /// Checks if a keep-alive frame should be sent.
    #[must_use]
    pub fn should_send_keep_alive(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_sent) >= self.interval
    }

    /// Checks if the peer has been silent for the liveness period.
    #[must_use]
    pub fn is_lapsed(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_received) >= self.liveness
    }

    /// Returns the time since the last frame was received.
    #[must_use]
    pub fn time_since_last_received(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_received)
    }

    /// Returns the keep-alive interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns the liveness period.
    #[must_use]
    pub const fn liveness(&self) -> Duration {
        self.liveness
    }
}

/// A one-shot deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(Instant);

impl Deadline {
    /// Creates a deadline `after` from `now`.
    #[must_use]
    pub fn after(now: Instant, after: Duration) -> Self {
        Self(now + after)
    }

    /// Returns true once `now` has reached the deadline.
    #[must_use]
    pub fn has_expired(&self, now: Instant) -> bool {
        now >= self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keep_alive_timer_new() {
        let now = Instant::now();
        let timer = KeepAliveTimer::new(Duration::from_secs(1), 3, now);
        assert_eq!(timer.interval(), Duration::from_secs(1));
        assert_eq!(timer.liveness(), Duration::from_secs(3));
        assert!(!timer.should_send_keep_alive(now));
        assert!(!timer.is_lapsed(now));
    }

    #[test]
    fn test_should_send_keep_alive() {
        let start = Instant::now();
        let mut timer = KeepAliveTimer::new(Duration::from_millis(10), 2, start);
        assert!(timer.should_send_keep_alive(start + Duration::from_millis(10)));

        timer.on_sent(start + Duration::from_millis(10));
        assert!(!timer.should_send_keep_alive(start + Duration::from_millis(15)));
    }

    #[test]
    fn test_liveness_lapse() {
        let start = Instant::now();
        let mut timer = KeepAliveTimer::new(Duration::from_millis(100), 2, start);
        assert!(!timer.is_lapsed(start + Duration::from_millis(199)));
        assert!(timer.is_lapsed(start + Duration::from_millis(200)));

        timer.on_received(start + Duration::from_millis(150));
        assert!(!timer.is_lapsed(start + Duration::from_millis(300)));
        assert_eq!(
            timer.time_since_last_received(start + Duration::from_millis(300)),
            Duration::from_millis(150)
        );
    }

    #[test]
    fn test_deadline() {
        let start = Instant::now();
        let deadline = Deadline::after(start, Duration::from_secs(5));
        assert!(!deadline.has_expired(start + Duration::from_secs(4)));
        assert!(deadline.has_expired(start + Duration::from_secs(5)));
    }
}
