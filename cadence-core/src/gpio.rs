//! BCM283x GPIO over a mapped register window

use cadence_hal::{GpioPin, PinFunction, RegisterMap};

/// GPFSEL0 word index; one register per ten pins
pub const GPFSEL0: usize = 0x00 / 4;
pub const GPSET0: usize = 0x1C / 4;
pub const GPCLR0: usize = 0x28 / 4;
pub const GPLEV0: usize = 0x34 / 4;

/// Highest GPIO number on the SoC
pub const MAX_GPIO: u8 = 53;

/// FSEL field value for a pin function
///
/// Alternate functions are not numbered in order: ALT0-3 are 4-7, ALT4 is 3
/// and ALT5 is 2.
pub fn function_select_bits(function: PinFunction) -> u32 {
    match function {
        PinFunction::Input => 0b000,
        PinFunction::Output => 0b001,
        PinFunction::Alt(alt @ 0..=3) => alt as u32 + 4,
        PinFunction::Alt(4) => 0b011,
        PinFunction::Alt(_) => 0b010,
    }
}

/// Pin function for an FSEL field value
pub fn function_from_bits(bits: u32) -> PinFunction {
    match bits & 0b111 {
        0b000 => PinFunction::Input,
        0b001 => PinFunction::Output,
        0b011 => PinFunction::Alt(4),
        0b010 => PinFunction::Alt(5),
        alt => PinFunction::Alt(alt as u8 - 4),
    }
}

/// A GPIO pin borrowed from the GPIO register window
pub struct Bcm2835Pin<'w, W: RegisterMap> {
    regs: &'w mut W,
    number: u8,
}

impl<'w, W: RegisterMap> Bcm2835Pin<'w, W> {
    pub fn new(regs: &'w mut W, number: u8) -> Self {
        Self { regs, number }
    }

    fn fsel_location(&self) -> (usize, u32) {
        let pin = self.number as usize;
        (GPFSEL0 + pin / 10, (pin % 10) as u32 * 3)
    }

    fn bank(&self) -> (usize, u32) {
        (self.number as usize / 32, 1 << (self.number % 32))
    }
}

impl<W: RegisterMap> GpioPin for Bcm2835Pin<'_, W> {
    fn number(&self) -> u8 {
        self.number
    }

    fn set_function(&mut self, function: PinFunction) {
        let (index, shift) = self.fsel_location();
        let bits = function_select_bits(function);
        self.regs
            .modify(index, |v| (v & !(0b111 << shift)) | (bits << shift));
    }

    fn function(&self) -> PinFunction {
        let (index, shift) = self.fsel_location();
        function_from_bits(self.regs.read(index) >> shift)
    }

    fn set_high(&mut self) {
        let (bank, mask) = self.bank();
        self.regs.write(GPSET0 + bank, mask);
    }

    fn set_low(&mut self) {
        let (bank, mask) = self.bank();
        self.regs.write(GPCLR0 + bank, mask);
    }

    fn is_high(&self) -> bool {
        let (bank, mask) = self.bank();
        self.regs.read(GPLEV0 + bank) & mask != 0
    }
}
