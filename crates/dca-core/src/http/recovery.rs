//! Accept failure accounting.
//!
//! Some accept errors are self-inflicted by a listening socket that has gone
//! bad (the network interface went away, the socket was reset underneath us).
//! Those never clear on their own, so after enough consecutive failures, or
//! immediately on "network unreachable", the listener is torn down and
//! reopened.

/// Consecutive accept failures that force a listener reopen.
pub const ACCEPT_ERROR_STREAK_LIMIT: u32 = 32;

/// What the serving loop should do after an accept failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptAction {
    /// Interrupted call; not a failure.
    Ignore,
    /// Failure recorded; keep serving on the current socket.
    Continue,
    /// Tear down and reopen the listening socket.
    Reopen,
}

/// Tracks the consecutive accept failure streak.
#[derive(Debug, Clone, Default)]
pub struct AcceptErrorTracker {
    streak: u32,
}

impl AcceptErrorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn streak(&self) -> u32 {
        self.streak
    }

    /// A connection was accepted.
    pub fn record_success(&mut self) {
        self.streak = 0;
    }

    /// An accept call failed with `errno`. A `Reopen` decision resets the
    /// streak, whatever the reopen's outcome.
    pub fn record_failure(&mut self, errno: i32) -> AcceptAction {
        if errno == libc::EINTR {
            return AcceptAction::Ignore;
        }
        self.streak = self.streak.saturating_add(1);
        if errno == libc::ENETUNREACH || self.streak >= ACCEPT_ERROR_STREAK_LIMIT {
            self.streak = 0;
            return AcceptAction::Reopen;
        }
        AcceptAction::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thirty_two_failures_trigger_exactly_one_reopen() {
        let mut t = AcceptErrorTracker::new();
        let mut reopens = 0;
        for _ in 0..ACCEPT_ERROR_STREAK_LIMIT {
            if t.record_failure(libc::ECONNABORTED) == AcceptAction::Reopen {
                reopens += 1;
            }
        }
        assert_eq!(reopens, 1);
        assert_eq!(t.streak(), 0);
    }

    #[test]
    fn thirty_one_failures_do_not_reopen() {
        let mut t = AcceptErrorTracker::new();
        for _ in 0..ACCEPT_ERROR_STREAK_LIMIT - 1 {
            assert_eq!(t.record_failure(libc::EMFILE), AcceptAction::Continue);
        }
        assert_eq!(t.streak(), ACCEPT_ERROR_STREAK_LIMIT - 1);
    }

    #[test]
    fn network_unreachable_reopens_immediately() {
        let mut t = AcceptErrorTracker::new();
        t.record_failure(libc::EMFILE);
        assert_eq!(t.record_failure(libc::ENETUNREACH), AcceptAction::Reopen);
        assert_eq!(t.streak(), 0);
    }

    #[test]
    fn interrupts_are_not_failures() {
        let mut t = AcceptErrorTracker::new();
        for _ in 0..100 {
            assert_eq!(t.record_failure(libc::EINTR), AcceptAction::Ignore);
        }
        assert_eq!(t.streak(), 0);
    }

    #[test]
    fn success_resets_streak() {
        let mut t = AcceptErrorTracker::new();
        for _ in 0..10 {
            t.record_failure(libc::ECONNABORTED);
        }
        t.record_success();
        assert_eq!(t.streak(), 0);
        for _ in 0..ACCEPT_ERROR_STREAK_LIMIT - 1 {
            assert_ne!(t.record_failure(libc::ECONNABORTED), AcceptAction::Reopen);
        }
    }
}
