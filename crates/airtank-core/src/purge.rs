//! Two-phase drain sequence: wait out the delay, then hold the drain valve
//! open for the duration.
//!
//! The phase only moves when [`PurgePhase::step`] is called with the current
//! time, so the same sequence runs under a real timer or a manual clock.

use crate::clock::Timestamp;
use crate::error::ControlError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PurgePhase {
    /// No purge scheduled. A finished purge returns here.
    #[default]
    Idle,
    /// Waiting for the delay to elapse before opening the drain.
    Pending { open_at: Timestamp, duration: u64 },
    /// Drain valve open until `close_at`.
    Open { close_at: Timestamp },
}

/// What the owner of the valve must do after a [`PurgePhase::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeStep {
    Idle,
    /// Nothing to do before `until`.
    Waiting { until: Timestamp },
    OpenDrain { close_at: Timestamp },
    CloseDrain,
}

impl PurgePhase {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Idle)
    }

    /// Schedule a purge that opens at `now + delay` and stays open for
    /// `duration` seconds. Overlapping sequences are rejected.
    pub fn begin(&mut self, now: Timestamp, delay: u64, duration: u64) -> Result<(), ControlError> {
        if self.is_active() {
            return Err(ControlError::PurgeInProgress);
        }
        *self = Self::Pending {
            open_at: now.saturating_add(delay),
            duration,
        };
        Ok(())
    }

    pub fn step(&mut self, now: Timestamp) -> PurgeStep {
        match *self {
            Self::Idle => PurgeStep::Idle,
            Self::Pending { open_at, duration } if now >= open_at => {
                let close_at = now.saturating_add(duration);
                *self = Self::Open { close_at };
                PurgeStep::OpenDrain { close_at }
            }
            Self::Pending { open_at, .. } => PurgeStep::Waiting { until: open_at },
            Self::Open { close_at } if now >= close_at => {
                *self = Self::Idle;
                PurgeStep::CloseDrain
            }
            Self::Open { close_at } => PurgeStep::Waiting { until: close_at },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_through_both_phases() {
        let mut phase = PurgePhase::default();
        phase.begin(100, 5, 10).unwrap();
        assert!(phase.is_pending());
        assert_eq!(phase.step(103), PurgeStep::Waiting { until: 105 });
        assert_eq!(phase.step(106), PurgeStep::OpenDrain { close_at: 116 });
        assert!(phase.is_open());
        assert_eq!(phase.step(110), PurgeStep::Waiting { until: 116 });
        assert_eq!(phase.step(116), PurgeStep::CloseDrain);
        assert_eq!(phase, PurgePhase::Idle);
        assert_eq!(phase.step(200), PurgeStep::Idle);
    }

    #[test]
    fn zero_delay_opens_on_first_step() {
        let mut phase = PurgePhase::default();
        phase.begin(50, 0, 3).unwrap();
        assert_eq!(phase.step(50), PurgeStep::OpenDrain { close_at: 53 });
    }

    #[test]
    fn overlapping_purge_is_rejected() {
        let mut phase = PurgePhase::default();
        phase.begin(0, 5, 10).unwrap();
        assert_eq!(phase.begin(1, 0, 1), Err(ControlError::PurgeInProgress));
        phase.step(5);
        assert_eq!(phase.begin(6, 0, 1), Err(ControlError::PurgeInProgress));
        phase.step(15);
        assert!(phase.begin(16, 0, 1).is_ok());
    }
}
