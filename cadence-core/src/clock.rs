//! PWM clock: divisor solving and clock manager sequences
//!
//! The PWM block is clocked from the clock manager's PWM clock, which
//! divides one of the SoC clock sources by an integer DIVI. Register writes
//! must carry the clock manager password or they are ignored.

use embedded_hal::delay::DelayNs;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use cadence_hal::RegisterMap;

/// CM_PWMCTL word index within the clock manager block
pub const CM_PWMCTL: usize = 0xA0 / 4;
/// CM_PWMDIV word index within the clock manager block
pub const CM_PWMDIV: usize = 0xA4 / 4;

/// Password required in the top byte of every clock manager write
pub const CM_PASSWORD: u32 = 0x5A << 24;
pub const CM_ENAB: u32 = 1 << 4;
pub const CM_KILL: u32 = 1 << 5;
pub const CM_BUSY: u32 = 1 << 7;
/// Shift of the integer divisor field in CM_PWMDIV
pub const CM_DIVI_SHIFT: u32 = 12;

/// Largest divisor the solver produces (half the 12-bit DIVI range)
pub const MAX_DIVISOR: u32 = 0x800;

/// Clock manager sources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ClockSource {
    /// 19.2 MHz crystal oscillator
    Oscillator,
    PllA,
    PllC,
    PllD,
    Hdmi,
}

impl ClockSource {
    /// Value of the SRC field selecting this source
    pub const fn source_id(self) -> u32 {
        match self {
            ClockSource::Oscillator => 1,
            ClockSource::PllA => 4,
            ClockSource::PllC => 5,
            ClockSource::PllD => 6,
            ClockSource::Hdmi => 7,
        }
    }

    /// Nominal frequency in Hz
    pub const fn frequency_hz(self) -> u32 {
        match self {
            ClockSource::Oscillator => 19_200_000,
            ClockSource::PllA => 393_216_000,
            ClockSource::PllC => 1_000_000_000,
            ClockSource::PllD => 500_000_000,
            ClockSource::Hdmi => 216_000_000,
        }
    }
}

/// Integer divisor plus the oversampling scale applied to reach it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClockDivisor {
    /// DIVI value, `1..=MAX_DIVISOR`
    pub divisor: u32,
    /// Power of ten the caller must multiply its sample counts by
    pub scale: u32,
}

/// Find a divisor for `desired_hz`, oversampling by powers of ten when the
/// source is too fast for the divisor range
///
/// `desired_hz == 0` yields the slowest clock.
pub fn solve(base_hz: u32, desired_hz: u32) -> ClockDivisor {
    if desired_hz == 0 {
        return ClockDivisor {
            divisor: MAX_DIVISOR,
            scale: 1,
        };
    }

    let base = base_hz as u64;
    let mut scale: u64 = 1;
    let mut divisor = base / desired_hz as u64;
    while divisor > MAX_DIVISOR as u64 {
        scale *= 10;
        divisor = base / (desired_hz as u64 * scale);
    }

    ClockDivisor {
        divisor: divisor.max(1) as u32,
        scale: scale as u32,
    }
}

/// Divisor for `desired_hz` without oversampling, clamped to `1..=MAX_DIVISOR`
pub fn solve_unscaled(base_hz: u32, desired_hz: u32) -> u32 {
    if desired_hz == 0 {
        return MAX_DIVISOR;
    }
    (base_hz / desired_hz).clamp(1, MAX_DIVISOR)
}

/// PWM clock control over a mapped clock manager window
pub struct PwmClock<'w, W: RegisterMap> {
    regs: &'w mut W,
}

impl<'w, W: RegisterMap> PwmClock<'w, W> {
    pub fn new(regs: &'w mut W) -> Self {
        Self { regs }
    }

    /// Check if the clock generator is running
    pub fn is_busy(&self) -> bool {
        self.regs.read(CM_PWMCTL) & CM_BUSY != 0
    }

    /// Kill the clock and wait for it to stop
    pub fn stop<D: DelayNs>(&mut self, delay: &mut D) {
        self.regs.write(CM_PWMCTL, CM_PASSWORD | CM_KILL);
        delay.delay_us(10);
        while self.is_busy() {
            delay.delay_us(1);
        }
    }

    /// Program the divisor, select `source`, enable and wait for the clock
    /// to come up
    ///
    /// The clock must be stopped first.
    pub fn start<D: DelayNs>(&mut self, source: ClockSource, divisor: u32, delay: &mut D) {
        let src = source.source_id();
        self.regs
            .write(CM_PWMDIV, CM_PASSWORD | (divisor << CM_DIVI_SHIFT));
        self.regs.write(CM_PWMCTL, CM_PASSWORD | src);
        self.regs.write(CM_PWMCTL, CM_PASSWORD | src | CM_ENAB);
        delay.delay_us(10);
        while !self.is_busy() {
            delay.delay_us(1);
        }
    }
}
