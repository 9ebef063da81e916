//! Error types for pattern generation

use cadence_hal::{DeviceError, MailboxError};

use crate::mailbox::AllocError;
use crate::state::State;

/// Invalid parameters, rejected before any hardware is touched
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// No width up to 16 bits tells the two duty cycles apart
    #[error("duty cycles {zero}% and {one}% are indistinguishable")]
    IndistinguishableDutyCycles { zero: u8, one: u8 },
    #[error("duty cycle {0}% is above 100%")]
    DutyCycleOutOfRange(u8),
    #[error("frequency must be non-zero")]
    ZeroFrequency,
    #[error("period must be non-zero")]
    ZeroPeriod,
    /// Period longer than one second; the step clock would be below 1 Hz
    #[error("period of {0} ns is too long")]
    PeriodOutOfRange(u32),
    #[error("pattern must carry at least one byte")]
    EmptyPattern,
    #[error("PWM channel {0} does not exist")]
    InvalidPwmChannel(u8),
    #[error("DMA channel {0} is not usable")]
    InvalidDmaChannel(u8),
    #[error("GPIO {0} does not exist")]
    InvalidGpio(u8),
    #[error("alternate function {0} does not exist")]
    InvalidAltFunction(u8),
    #[error("page size {0} is not a power of two")]
    InvalidPageSize(usize),
    /// Pattern data does not fit one DMA transfer
    #[error("pattern needs {bytes} bytes, more than one transfer can carry")]
    BufferTooLarge { bytes: u64 },
}

/// Errors from the pattern generator
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Alloc(#[from] AllocError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// DMA controller flagged an error; `debug` holds the DEBUG register error bits
    #[error("DMA transfer fault (debug {debug:#x})")]
    HardwareFault { debug: u32 },
    #[error("PWM channel {0} is already claimed")]
    ChannelBusy(u8),
    #[error("a pattern session is already configured")]
    SessionActive,
    #[error("no pattern configured")]
    NotConfigured,
    #[error("{len} bytes exceed the configured capacity of {capacity}")]
    PayloadTooLarge { len: usize, capacity: usize },
    #[error("operation not allowed while {0:?}")]
    InvalidState(State),
}

impl From<MailboxError> for Error {
    fn from(err: MailboxError) -> Self {
        Error::Alloc(AllocError::Transport(err))
    }
}
