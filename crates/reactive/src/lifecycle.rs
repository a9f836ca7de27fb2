//! Session lifecycle state machine.
//!
//! `Initializing -> Active -> Stopped`, or `Initializing -> Stopped` when
//! subscribing fails. Only an `Active` session lets invalidations through.

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    /// Watches are being opened; their initial burst is ignored.
    Initializing,
    /// Invalidations reach the scheduler.
    Active,
    /// Torn down. Nothing is emitted any more.
    Stopped,
}

impl Lifecycle {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Lifecycle::Initializing,
            1 => Lifecycle::Active,
            _ => Lifecycle::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Lifecycle::Initializing => 0,
            Lifecycle::Active => 1,
            Lifecycle::Stopped => 2,
        }
    }
}

/// Lock-free lifecycle cell shared between a session and its watch sinks.
#[derive(Debug)]
pub(crate) struct LifecycleCell(AtomicU8);

impl LifecycleCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(Lifecycle::Initializing.as_u8()))
    }

    #[inline]
    pub(crate) fn get(&self) -> Lifecycle {
        Lifecycle::from_u8(self.0.load(Ordering::Acquire))
    }

    /// `Initializing -> Active`. Returns false if the session was stopped.
    pub(crate) fn activate(&self) -> bool {
        self.0
            .compare_exchange(
                Lifecycle::Initializing.as_u8(),
                Lifecycle::Active.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Moves to `Stopped` and returns the previous state.
    pub(crate) fn stop(&self) -> Lifecycle {
        Lifecycle::from_u8(self.0.swap(Lifecycle::Stopped.as_u8(), Ordering::AcqRel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        let cell = LifecycleCell::new();
        assert_eq!(cell.get(), Lifecycle::Initializing);

        assert!(cell.activate());
        assert_eq!(cell.get(), Lifecycle::Active);
        assert!(!cell.activate());

        assert_eq!(cell.stop(), Lifecycle::Active);
        assert_eq!(cell.stop(), Lifecycle::Stopped);
        assert_eq!(cell.get(), Lifecycle::Stopped);
    }

    #[test]
    fn test_stopped_cannot_activate() {
        let cell = LifecycleCell::new();
        assert_eq!(cell.stop(), Lifecycle::Initializing);
        assert!(!cell.activate());
    }
}
