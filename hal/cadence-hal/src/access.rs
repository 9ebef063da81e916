//! Platform access: physical mappings, mailbox and channel claims
//!
//! Everything the generator acquires from the operating system goes through
//! these traits, so acquisition order and teardown can be tested against a
//! mock platform.

use crate::mailbox::{MailboxError, MailboxTransport};
use crate::register::RegisterMap;

/// Peripheral register blocks the generator maps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegisterBlock {
    /// GPIO function select and level registers
    Gpio,
    /// PWM controller
    Pwm,
    /// Clock manager
    Clock,
    /// DMA controller
    Dma,
}

/// Errors from opening or mapping a memory device
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceError {
    /// No candidate memory device could be opened
    #[error("cannot open memory device (errno {errno})")]
    Open { errno: i32 },
    /// The device opened but the range could not be mapped
    #[error("cannot map {len:#x} bytes at physical {phys:#x} (errno {errno})")]
    Map { phys: u64, len: usize, errno: i32 },
}

/// Maps arbitrary physical memory into the process
pub trait MemoryMapper {
    /// Window type produced by this platform
    type Window: RegisterMap;

    /// Map `len` bytes of physical memory starting at `phys`
    ///
    /// `phys` need not be page aligned.
    fn map_physical(&mut self, phys: u64, len: usize) -> Result<Self::Window, DeviceError>;
}

/// Full set of platform capabilities used by the pattern generator
pub trait PeripheralAccess: MemoryMapper {
    /// Mailbox transport produced by this platform
    type Mailbox: MailboxTransport;

    /// Map a peripheral register block
    ///
    /// Platforms may prefer a restricted device for some blocks (for example
    /// a GPIO-only node) and fall back to full physical memory access.
    fn map_registers(
        &mut self,
        block: RegisterBlock,
        phys: u64,
        len: usize,
    ) -> Result<Self::Window, DeviceError>;

    /// Open a channel to the GPU firmware
    fn open_mailbox(&mut self) -> Result<Self::Mailbox, MailboxError>;

    /// Claim exclusive use of a PWM channel
    ///
    /// Returns `false` if the channel is already claimed.
    fn claim_channel(&mut self, channel: u8) -> bool;

    /// Release a previously claimed PWM channel
    fn release_channel(&mut self, channel: u8);
}
