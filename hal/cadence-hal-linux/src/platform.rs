//! Linux peripheral access
//!
//! Register blocks come from `/dev/mem`; the GPIO block is tried through
//! `/dev/gpiomem` first so GPIO routing works without full memory access.
//! PWM channel claims are process-wide: two generators in one process can
//! never drive the same channel.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, warn};

use cadence_hal::{
    DeviceError, MailboxError, MemoryMapper, PeripheralAccess, RegisterBlock,
};

use crate::mailbox::VcioMailbox;
use crate::window::{MemDevice, RegisterWindow, DEV_GPIOMEM, DEV_MEM};

/// Number of PWM channels on the BCM283x
pub const PWM_CHANNELS: usize = 2;

static CHANNEL_CLAIMS: [AtomicBool; PWM_CHANNELS] = [AtomicBool::new(false), AtomicBool::new(false)];

/// Peripheral access through Linux device nodes
#[derive(Debug)]
pub struct LinuxPeripherals {
    mem_device: PathBuf,
    gpio_device: Option<PathBuf>,
    persistent_mailbox: bool,
    claimed: [bool; PWM_CHANNELS],
}

impl LinuxPeripherals {
    /// Defaults: `/dev/mem`, `/dev/gpiomem` for GPIO, mailbox opened per request
    pub fn new() -> Self {
        Self {
            mem_device: PathBuf::from(DEV_MEM),
            gpio_device: Some(PathBuf::from(DEV_GPIOMEM)),
            persistent_mailbox: false,
            claimed: [false; PWM_CHANNELS],
        }
    }

    pub fn with_mem_device(mut self, path: impl Into<PathBuf>) -> Self {
        self.mem_device = path.into();
        self
    }

    /// GPIO-only device tried before the memory device; `None` disables it
    pub fn with_gpio_device(mut self, path: Option<PathBuf>) -> Self {
        self.gpio_device = path;
        self
    }

    /// Keep the mailbox device open for the lifetime of each allocator
    pub fn with_persistent_mailbox(mut self, persistent: bool) -> Self {
        self.persistent_mailbox = persistent;
        self
    }

    /// Devices to try, in order, for a register block at `phys`
    pub fn candidates(&self, block: RegisterBlock, phys: u64) -> Vec<MemDevice> {
        let mut candidates = Vec::with_capacity(2);
        if block == RegisterBlock::Gpio {
            if let Some(gpio) = &self.gpio_device {
                // The GPIO device maps the GPIO block at offset 0
                candidates.push(MemDevice::new(gpio.clone(), 0));
            }
        }
        candidates.push(MemDevice::new(self.mem_device.clone(), phys));
        candidates
    }

    /// Check if this instance holds the claim on `channel`
    pub fn holds_claim(&self, channel: u8) -> bool {
        self.claimed.get(channel as usize).copied().unwrap_or(false)
    }
}

impl Default for LinuxPeripherals {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMapper for LinuxPeripherals {
    type Window = RegisterWindow;

    fn map_physical(&mut self, phys: u64, len: usize) -> Result<RegisterWindow, DeviceError> {
        RegisterWindow::open(&[MemDevice::new(self.mem_device.clone(), phys)], phys, len)
    }
}

impl PeripheralAccess for LinuxPeripherals {
    type Mailbox = VcioMailbox;

    fn map_registers(
        &mut self,
        block: RegisterBlock,
        phys: u64,
        len: usize,
    ) -> Result<RegisterWindow, DeviceError> {
        debug!("mapping {:?} registers at {:#x}", block, phys);
        RegisterWindow::open(&self.candidates(block, phys), phys, len)
    }

    fn open_mailbox(&mut self) -> Result<VcioMailbox, MailboxError> {
        if self.persistent_mailbox {
            VcioMailbox::open()
        } else {
            Ok(VcioMailbox::per_call())
        }
    }

    fn claim_channel(&mut self, channel: u8) -> bool {
        let Some(claim) = CHANNEL_CLAIMS.get(channel as usize) else {
            return false;
        };
        if claim
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.claimed[channel as usize] = true;
        true
    }

    fn release_channel(&mut self, channel: u8) {
        let index = channel as usize;
        if !self.holds_claim(channel) {
            warn!("PWM{} released without a claim", channel);
            return;
        }
        self.claimed[index] = false;
        CHANNEL_CLAIMS[index].store(false, Ordering::Release);
    }
}

impl Drop for LinuxPeripherals {
    fn drop(&mut self) {
        for (index, held) in self.claimed.iter().enumerate() {
            if *held {
                CHANNEL_CLAIMS[index].store(false, Ordering::Release);
            }
        }
    }
}
