//! Generator configuration
//!
//! Boards, outputs, patterns and device nodes are read from TOML:
//!
//! ```toml
//! soc = "bcm2836"
//! dma_channel = 10
//!
//! [output]
//! gpio = 18
//! alt = 5
//! channel = 0
//!
//! [pattern]
//! byte_count = 150
//! frequency_hz = 800000
//! reset_delay_us = 55
//! duty_zero_percent = 33
//! duty_one_percent = 66
//!
//! [devices]
//! mem = "/dev/mem"
//! gpiomem = "/dev/gpiomem"
//! persistent_mailbox = false
//! ```
//!
//! Only `soc` and `output` are required.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::Deserialize;

use cadence_core::{BoardDescriptor, PatternConfig, PwmOutput, Soc};

use crate::delay::StdDelay;
use crate::platform::LinuxPeripherals;
use crate::window::{DEV_GPIOMEM, DEV_MEM};
use crate::LinuxGenerator;

/// Errors loading a configuration file
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("cannot read configuration: {0}")]
    Io(#[from] io::Error),
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Device nodes used for peripheral access
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceConfig {
    pub mem: PathBuf,
    /// Empty string disables the GPIO-only device
    pub gpiomem: PathBuf,
    pub persistent_mailbox: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            mem: PathBuf::from(DEV_MEM),
            gpiomem: PathBuf::from(DEV_GPIOMEM),
            persistent_mailbox: false,
        }
    }
}

/// Complete generator configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeneratorConfig {
    pub soc: Soc,
    /// Overrides the board's default DMA channel
    #[serde(default)]
    pub dma_channel: Option<u8>,
    pub output: PwmOutput,
    /// Pattern configured right after initialization
    #[serde(default)]
    pub pattern: Option<PatternConfig>,
    #[serde(default)]
    pub devices: DeviceConfig,
}

impl GeneratorConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigLoadError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        debug!("read {} bytes of configuration from {}", text.len(), path.display());
        let config = Self::from_toml_str(&text)?;
        config.log_summary();
        Ok(config)
    }

    /// Board descriptor with the configured DMA channel applied
    pub fn board(&self) -> BoardDescriptor {
        let board = self.soc.board();
        match self.dma_channel {
            Some(channel) => board.with_dma_channel(channel),
            None => board,
        }
    }

    /// Peripheral access using the configured device nodes
    pub fn peripherals(&self) -> LinuxPeripherals {
        let gpiomem = if self.devices.gpiomem.as_os_str().is_empty() {
            None
        } else {
            Some(self.devices.gpiomem.clone())
        };
        LinuxPeripherals::new()
            .with_mem_device(self.devices.mem.clone())
            .with_gpio_device(gpiomem)
            .with_persistent_mailbox(self.devices.persistent_mailbox)
    }

    /// Initialize a generator and configure the pattern, if one is given
    pub fn open_generator(&self) -> Result<LinuxGenerator, cadence_core::Error> {
        let mut generator =
            LinuxGenerator::initialize(self.peripherals(), StdDelay, self.board(), self.output)?;
        if let Some(pattern) = self.pattern {
            generator.configure_pattern(pattern)?;
        }
        Ok(generator)
    }

    fn log_summary(&self) {
        info!(
            "config: {:?}, GPIO{} on PWM{}, DMA channel {}",
            self.soc,
            self.output.gpio,
            self.output.channel,
            self.board().dma_channel
        );
        if let Some(pattern) = &self.pattern {
            info!(
                "config: {} bytes at {} Hz, duty {}%/{}%, reset {} us",
                pattern.byte_count,
                pattern.frequency_hz,
                pattern.duty_zero_percent,
                pattern.duty_one_percent,
                pattern.reset_delay_us
            );
        }
    }
}
