//! Events that trigger state transitions

/// Events that can trigger state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    /// DMA transfer of a pattern was started
    TransferStarted,
    /// DMA channel went idle
    TransferFinished,
    /// DMA channel reported an error and was reset
    TransferFaulted,
    /// Free-running mark/space output was started
    ContinuousStarted,
    /// Free-running output was stopped
    ContinuousStopped,
}
