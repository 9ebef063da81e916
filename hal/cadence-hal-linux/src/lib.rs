//! Linux platform for Cadence pattern generation
//!
//! Implements the `cadence-hal` capabilities on Raspberry Pi Linux:
//!
//! - Register windows over `/dev/gpiomem` and `/dev/mem`
//! - GPU mailbox over `/dev/vcio` (or a temporary device node)
//! - Process-wide PWM channel claims
//! - Sleep-based delays for register sequencing
//! - TOML configuration for boards, outputs and patterns
//!
//! Everything here needs root (or membership in the right device groups)
//! on real hardware.

pub mod config;
pub mod delay;
pub mod mailbox;
pub mod platform;
pub mod window;

pub use config::{ConfigLoadError, GeneratorConfig};
pub use delay::StdDelay;
pub use mailbox::VcioMailbox;
pub use platform::LinuxPeripherals;
pub use window::{MemDevice, RegisterWindow};

/// Pattern generator on the Linux platform
pub type LinuxGenerator = cadence_core::PatternGenerator<LinuxPeripherals, StdDelay>;
