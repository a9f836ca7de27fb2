//! Leading-edge throttle for re-evaluations.
//!
//! An invalidation runs the pipeline immediately unless the previous run
//! started less than `delay` ago. In that case one trailing run is scheduled
//! for `last + delay`, and any further invalidations until then coalesce
//! into it. At most one run is ever pending.
//!
//! The throttle is a pure state machine; the session loop feeds it
//! timestamps and sleeps until [`Throttle::deadline`].

use std::time::Duration;
use tokio::time::Instant;

// About 30 years.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// What the session should do with an invalidation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Run the pipeline now.
    RunNow,
    /// A trailing run has been scheduled for the given instant.
    Deferred(Instant),
    /// Absorbed by the already scheduled trailing run.
    Coalesced,
}

/// Throttle state of one session.
#[derive(Debug)]
pub struct Throttle {
    delay: Duration,
    last_fired: Option<Instant>,
    pending: bool,
}

impl Throttle {
    /// Creates a throttle that has never fired.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            last_fired: None,
            pending: false,
        }
    }

    /// Creates a throttle whose first run started at `at`.
    pub fn fired_at(delay: Duration, at: Instant) -> Self {
        Self {
            delay,
            last_fired: Some(at),
            pending: false,
        }
    }

    /// Configured delay.
    #[inline]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Returns true if a trailing run is scheduled.
    #[inline]
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// When the scheduled trailing run is due.
    pub fn deadline(&self) -> Option<Instant> {
        if !self.pending {
            return None;
        }
        self.last_fired.map(|last| self.due(last))
    }

    /// End of the window opened by a run at `last`. Saturates to a far
    /// future instant when `last + delay` is not representable.
    fn due(&self, last: Instant) -> Instant {
        last.checked_add(self.delay)
            .or_else(|| last.checked_add(FAR_FUTURE))
            .unwrap_or(last)
    }

    /// Handles one invalidation arriving at `now`.
    pub fn on_invalidate(&mut self, now: Instant) -> Decision {
        if self.pending {
            return Decision::Coalesced;
        }
        match self.last_fired {
            Some(last) => {
                let due = self.due(last);
                if now < due {
                    self.pending = true;
                    Decision::Deferred(due)
                } else {
                    Decision::RunNow
                }
            }
            None => Decision::RunNow,
        }
    }

    /// Records that a run started at `now`. Clears any pending run.
    pub fn fire(&mut self, now: Instant) {
        self.last_fired = Some(now);
        self.pending = false;
    }

    /// Forgets any scheduled run.
    pub fn cancel(&mut self) {
        self.pending = false;
    }
}
