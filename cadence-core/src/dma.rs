//! DMA control blocks and channel control
//!
//! A transfer is described by a 32-byte control block in uncached memory;
//! the channel is pointed at its bus address and started. The PWM DREQ
//! paces the transfer so one word is written per FIFO slot.

use bitflags::bitflags;
use embedded_hal::delay::DelayNs;
use log::warn;

use cadence_hal::RegisterMap;

use crate::error::Error;

pub const DMA_CS: usize = 0x00 / 4;
pub const DMA_CONBLK_AD: usize = 0x04 / 4;
pub const DMA_TI: usize = 0x08 / 4;
pub const DMA_SOURCE_AD: usize = 0x0C / 4;
pub const DMA_DEST_AD: usize = 0x10 / 4;
pub const DMA_TXFR_LEN: usize = 0x14 / 4;
pub const DMA_STRIDE: usize = 0x18 / 4;
pub const DMA_NEXTCONBK: usize = 0x1C / 4;
pub const DMA_DEBUG: usize = 0x20 / 4;

/// Bytes between consecutive channel register blocks
pub const CHANNEL_STRIDE: u32 = 0x100;
/// Highest channel with the common register layout
pub const MAX_CHANNEL: u8 = 14;
/// Peripheral mapping number of the PWM DREQ
pub const PERMAP_PWM: u32 = 5;
/// DEBUG register error bits (write 1 to clear)
pub const DEBUG_ERRORS: u32 = 0x7;
/// Largest length a linear-mode TXFR_LEN (30 bits) can hold
pub const MAX_TRANSFER_BYTES: u32 = (1 << 30) - 1;

bitflags! {
    /// Channel control and status register
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ControlStatus: u32 {
        const ACTIVE = 1 << 0;
        const END = 1 << 1;
        const INT = 1 << 2;
        const ERROR = 1 << 8;
        const WAIT_FOR_OUTSTANDING_WRITES = 1 << 28;
        const RESET = 1 << 31;
    }
}

impl ControlStatus {
    pub const fn priority(level: u32) -> u32 {
        (level & 0xF) << 16
    }

    pub const fn panic_priority(level: u32) -> u32 {
        (level & 0xF) << 20
    }
}

bitflags! {
    /// Control block transfer information
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TransferInfo: u32 {
        const WAIT_RESP = 1 << 3;
        const DEST_INC = 1 << 4;
        const DEST_DREQ = 1 << 6;
        const SRC_INC = 1 << 8;
        const NO_WIDE_BURSTS = 1 << 26;
    }
}

impl TransferInfo {
    /// Peripheral mapping field for DREQ pacing
    pub const fn permap(peripheral: u32) -> u32 {
        (peripheral & 0x1F) << 16
    }
}

/// Size of a control block in memory
pub const DESCRIPTOR_BYTES: usize = 32;

/// DMA control block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DmaDescriptor {
    pub transfer_info: u32,
    pub source: u32,
    pub destination: u32,
    pub length: u32,
    pub stride: u32,
    pub next: u32,
}

impl DmaDescriptor {
    /// Single-shot transfer from incrementing memory into the PWM FIFO
    pub fn pwm_fifo(source: u32, fifo: u32, length: u32) -> Self {
        let ti = TransferInfo::NO_WIDE_BURSTS
            | TransferInfo::WAIT_RESP
            | TransferInfo::DEST_DREQ
            | TransferInfo::SRC_INC;
        Self {
            transfer_info: ti.bits() | TransferInfo::permap(PERMAP_PWM),
            source,
            destination: fifo,
            length,
            stride: 0,
            next: 0,
        }
    }

    /// In-memory layout, padded to 32 bytes
    pub fn to_words(&self) -> [u32; DESCRIPTOR_BYTES / 4] {
        [
            self.transfer_info,
            self.source,
            self.destination,
            self.length,
            self.stride,
            self.next,
            0,
            0,
        ]
    }
}

/// Control of one DMA channel over its mapped register block
pub struct DmaChannel<'w, W: RegisterMap> {
    regs: &'w mut W,
}

impl<'w, W: RegisterMap> DmaChannel<'w, W> {
    pub fn new(regs: &'w mut W) -> Self {
        Self { regs }
    }

    pub fn status(&self) -> ControlStatus {
        ControlStatus::from_bits_retain(self.regs.read(DMA_CS))
    }

    pub fn is_active(&self) -> bool {
        self.status().contains(ControlStatus::ACTIVE)
    }

    /// Abort whatever the channel is doing
    pub fn reset(&mut self) {
        self.regs.write(DMA_CS, ControlStatus::RESET.bits());
    }

    /// Start the control block at bus address `descriptor`
    pub fn start<D: DelayNs>(&mut self, descriptor: u32, delay: &mut D) {
        self.reset();
        delay.delay_us(10);
        self.regs
            .write(DMA_CS, (ControlStatus::INT | ControlStatus::END).bits());
        delay.delay_us(10);
        self.regs.write(DMA_CONBLK_AD, descriptor);
        self.regs.write(DMA_DEBUG, DEBUG_ERRORS);
        self.regs.write(
            DMA_CS,
            (ControlStatus::WAIT_FOR_OUTSTANDING_WRITES | ControlStatus::ACTIVE).bits()
                | ControlStatus::panic_priority(15)
                | ControlStatus::priority(15),
        );
    }

    /// Poll until the channel goes idle or reports an error
    ///
    /// There is no timeout: a channel that neither finishes nor flags an
    /// error blocks forever.
    pub fn wait<D: DelayNs>(&mut self, delay: &mut D) -> Result<(), Error> {
        loop {
            let status = self.status();
            if status.contains(ControlStatus::ERROR) {
                let debug = self.regs.read(DMA_DEBUG) & DEBUG_ERRORS;
                warn!("DMA fault, CS {:#010x} DEBUG {:#x}", status.bits(), debug);
                return Err(Error::HardwareFault { debug });
            }
            if !status.contains(ControlStatus::ACTIVE) {
                return Ok(());
            }
            delay.delay_us(10);
        }
    }
}
