//! State machine definition

use super::events::Event;

/// Generator states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    /// Hardware mapped and idle; a pattern may or may not be configured
    #[default]
    Configured,
    /// A DMA transfer may be in flight
    Sending,
    /// PWM running in mark/space mode from the PLL
    Continuous,
}

impl State {
    /// Check if a transfer may be in flight
    pub fn is_sending(&self) -> bool {
        matches!(self, State::Sending)
    }

    /// Check if pattern data may be queued in this state
    pub fn accepts_pattern(&self) -> bool {
        matches!(self, State::Configured | State::Sending)
    }

    /// Process an event and return the next state
    pub fn transition(self, event: Event) -> Self {
        use Event::*;
        use State::*;

        match (self, event) {
            (Configured, TransferStarted) => Sending,
            (Configured, ContinuousStarted) => Continuous,

            // A send while sending has already waited for the previous transfer
            (Sending, TransferStarted) => Sending,
            (Sending, TransferFinished) => Configured,
            (Sending, TransferFaulted) => Configured,

            (Continuous, ContinuousStarted) => Continuous,
            (Continuous, ContinuousStopped) => Configured,

            // Default: stay in current state
            _ => self,
        }
    }
}
