//! Board descriptors
//!
//! Physical layout constants for the supported SoCs, supplied as plain
//! values. Callers pick a preset (or build their own descriptor) and hand it
//! to the generator; nothing here is global.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::mailbox::MemFlags;
use crate::pwm::PWM_FIFO_OFFSET;

/// GPIO block offset from the peripheral base
pub const GPIO_OFFSET: u32 = 0x20_0000;
/// PWM block offset from the peripheral base
pub const PWM_OFFSET: u32 = 0x20_C000;
/// Clock manager offset from the peripheral base
pub const CLOCK_OFFSET: u32 = 0x10_1000;
/// DMA controller offset from the peripheral base
pub const DMA_OFFSET: u32 = 0x7000;
/// Peripheral base as seen from the VideoCore bus
pub const BUS_PERIPHERAL_BASE: u32 = 0x7E00_0000;
/// Bus address bits selecting the cached/uncached alias
pub const BUS_ALIAS_MASK: u32 = 0xC000_0000;
/// Default DMA channel (free on stock firmware)
pub const DEFAULT_DMA_CHANNEL: u8 = 10;
/// Page size used for mappings and GPU allocations
pub const PAGE_SIZE: usize = 4096;

/// Supported SoC families
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Soc {
    /// Pi 1, Zero
    Bcm2835,
    /// Pi 2, Pi 3 (BCM2837 shares the layout)
    Bcm2836,
}

impl Soc {
    /// Descriptor for this SoC with default settings
    pub const fn board(self) -> BoardDescriptor {
        match self {
            Soc::Bcm2835 => BoardDescriptor::bcm2835(),
            Soc::Bcm2836 => BoardDescriptor::bcm2836(),
        }
    }
}

/// Physical layout of a board's peripherals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BoardDescriptor {
    /// Peripheral base as a CPU physical address
    pub peripheral_base: u64,
    /// Peripheral base as a bus address (what DMA sees)
    pub bus_peripheral_base: u32,
    pub gpio_offset: u32,
    pub pwm_offset: u32,
    pub clock_offset: u32,
    pub dma_offset: u32,
    /// DMA channel used for pattern transfers (0-14)
    pub dma_channel: u8,
    /// Mailbox allocation flags (see [`MemFlags`])
    pub mem_flags: u32,
    /// Alias bits cleared to turn a bus address into a physical one
    pub bus_alias_mask: u32,
    pub page_size: usize,
}

impl BoardDescriptor {
    /// Pi 1 / Zero
    pub const fn bcm2835() -> Self {
        Self {
            peripheral_base: 0x2000_0000,
            bus_peripheral_base: BUS_PERIPHERAL_BASE,
            gpio_offset: GPIO_OFFSET,
            pwm_offset: PWM_OFFSET,
            clock_offset: CLOCK_OFFSET,
            dma_offset: DMA_OFFSET,
            dma_channel: DEFAULT_DMA_CHANNEL,
            mem_flags: MemFlags::L1_NONALLOCATING.bits(),
            bus_alias_mask: BUS_ALIAS_MASK,
            page_size: PAGE_SIZE,
        }
    }

    /// Pi 2 / Pi 3
    pub const fn bcm2836() -> Self {
        Self {
            peripheral_base: 0x3F00_0000,
            mem_flags: MemFlags::DIRECT.bits(),
            ..Self::bcm2835()
        }
    }

    /// Use a different DMA channel
    pub const fn with_dma_channel(mut self, channel: u8) -> Self {
        self.dma_channel = channel;
        self
    }

    /// Mailbox allocation flags
    pub fn mem_flags(&self) -> MemFlags {
        MemFlags::from_bits_retain(self.mem_flags)
    }

    pub fn gpio_address(&self) -> u64 {
        self.peripheral_base + self.gpio_offset as u64
    }

    pub fn pwm_address(&self) -> u64 {
        self.peripheral_base + self.pwm_offset as u64
    }

    pub fn clock_address(&self) -> u64 {
        self.peripheral_base + self.clock_offset as u64
    }

    /// Physical address of a DMA channel's register block
    pub fn dma_channel_address(&self, channel: u8) -> u64 {
        self.peripheral_base + self.dma_offset as u64 + crate::dma::CHANNEL_STRIDE as u64 * channel as u64
    }

    /// Bus address of the PWM FIFO, the DMA destination
    pub fn pwm_fifo_bus_address(&self) -> u32 {
        self.bus_peripheral_base + self.pwm_offset + PWM_FIFO_OFFSET
    }
}

/// GPIO routed to a PWM channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PwmOutput {
    /// BCM GPIO number
    pub gpio: u8,
    /// Alternate function that connects the pin to PWM (0-5)
    pub alt: u8,
    /// PWM channel (0 or 1)
    pub channel: u8,
}

impl PwmOutput {
    /// GPIO12, ALT0, PWM0
    pub const GPIO12: Self = Self::new(12, 0, 0);
    /// GPIO13, ALT0, PWM1
    pub const GPIO13: Self = Self::new(13, 0, 1);
    /// GPIO18, ALT5, PWM0
    pub const GPIO18: Self = Self::new(18, 5, 0);
    /// GPIO19, ALT5, PWM1
    pub const GPIO19: Self = Self::new(19, 5, 1);

    pub const fn new(gpio: u8, alt: u8, channel: u8) -> Self {
        Self { gpio, alt, channel }
    }
}
