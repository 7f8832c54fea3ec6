//! Lifecycle phase of an endpoint.

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle phase of an endpoint.
///
/// Transitions only move forward: `Configurable -> Active -> Closed`, or
/// straight from `Configurable` to `Closed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Phase {
    /// Options may still be changed; no socket I/O has been requested.
    #[default]
    Configurable,
    /// A bind, send, or membership operation has been issued.
    Active,
    /// The endpoint has been closed.
    Closed,
}

impl Phase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Phase::Configurable,
            1 => Phase::Active,
            _ => Phase::Closed,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Configurable => write!(f, "Configurable"),
            Phase::Active => write!(f, "Active"),
            Phase::Closed => write!(f, "Closed"),
        }
    }
}

/// Atomically published phase, readable from any thread.
#[derive(Debug, Default)]
pub(crate) struct PhaseCell(AtomicU8);

impl PhaseCell {
    pub fn get(&self) -> Phase {
        Phase::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move `Configurable` to `Active`. Returns the phase seen before the call.
    pub fn activate(&self) -> Phase {
        match self.0.compare_exchange(
            Phase::Configurable as u8,
            Phase::Active as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(previous) | Err(previous) => Phase::from_u8(previous),
        }
    }

    /// Move to `Closed`. Returns the phase seen before the call.
    pub fn close(&self) -> Phase {
        Phase::from_u8(self.0.swap(Phase::Closed as u8, Ordering::AcqRel))
    }

    pub fn is_closed(&self) -> bool {
        self.get() == Phase::Closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        let phase = PhaseCell::default();
        assert_eq!(phase.get(), Phase::Configurable);

        assert_eq!(phase.activate(), Phase::Configurable);
        assert_eq!(phase.get(), Phase::Active);
        assert_eq!(phase.activate(), Phase::Active);

        assert_eq!(phase.close(), Phase::Active);
        assert!(phase.is_closed());
        assert_eq!(phase.close(), Phase::Closed);
    }

    #[test]
    fn test_closed_never_reactivates() {
        let phase = PhaseCell::default();
        phase.close();
        assert_eq!(phase.activate(), Phase::Closed);
        assert_eq!(phase.get(), Phase::Closed);
    }

    #[test]
    fn test_display() {
        assert_eq!(Phase::Configurable.to_string(), "Configurable");
        assert_eq!(Phase::Closed.to_string(), "Closed");
    }
}
