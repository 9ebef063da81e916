//! Board-agnostic core logic for DMA-driven bit pattern generation
//!
//! This crate contains everything that does not touch the operating system
//! directly:
//!
//! - Clock divisor solving for the PWM clock
//! - Bit pattern selection and bitstream encoding
//! - Mailbox property framing and GPU memory allocation
//! - DMA control blocks and channel control
//! - PWM and clock manager register sequences
//! - The pattern generator state machine
//!
//! Platform access (memory devices, mailbox ioctl) is supplied through the
//! `cadence-hal` traits.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

extern crate alloc;

pub mod board;
pub mod clock;
pub mod dma;
pub mod error;
pub mod generator;
pub mod gpio;
pub mod mailbox;
pub mod pattern;
pub mod pwm;
pub mod state;

#[cfg(test)]
mod mock;

pub use board::{BoardDescriptor, PwmOutput, Soc};
pub use error::{ConfigError, Error};
pub use generator::PatternGenerator;
pub use mailbox::{AllocError, MailboxAllocator, MemoryBlock};
pub use pattern::{BitPattern, BufferLayout, PatternConfig};
pub use state::{Event, State};
