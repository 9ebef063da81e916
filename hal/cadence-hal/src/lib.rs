//! Cadence Hardware Abstraction Layer
//!
//! This crate defines the capabilities the pattern generator needs from the
//! platform: register windows, physical memory mappings, the GPU mailbox and
//! PWM channel claims. Platform crates (Linux `/dev/mem`, test mocks)
//! implement them so the generator logic stays board-agnostic.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  Application (LED drivers, demos)       │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  cadence-core (generator, encoder, DMA) │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  cadence-hal (this crate - traits)      │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//!            ┌─────────────────┐
//!            │ cadence-hal-    │
//!            │     linux       │
//!            └─────────────────┘
//! ```
//!
//! # Traits
//!
//! - [`register::RegisterMap`] - Indexed 32-bit register window
//! - [`access::MemoryMapper`], [`access::PeripheralAccess`] - Platform mappings and claims
//! - [`mailbox::MailboxTransport`] - GPU firmware property channel
//! - [`gpio::GpioPin`] - Pin function and level control

#![no_std]
#![deny(unsafe_code)]

pub mod access;
pub mod gpio;
pub mod mailbox;
pub mod register;

// Re-export key traits at crate root for convenience
pub use access::{DeviceError, MemoryMapper, PeripheralAccess, RegisterBlock};
pub use gpio::{GpioPin, PinFunction};
pub use mailbox::{MailboxError, MailboxTransport};
pub use register::RegisterMap;
