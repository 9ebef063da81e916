//! PWM controller registers and sequences
//!
//! Both PWM channels share one control register, one FIFO and one DMA
//! request line. In serializer mode the FIFO feeds 32-bit words out of the
//! selected channel MSB first; in mark/space mode each channel produces a
//! DAT/RNG duty cycle.

use bitflags::bitflags;
use embedded_hal::delay::DelayNs;

use cadence_hal::RegisterMap;

pub const PWM_CTL: usize = 0x00 / 4;
pub const PWM_DMAC: usize = 0x08 / 4;
pub const PWM_RNG1: usize = 0x10 / 4;
pub const PWM_DAT1: usize = 0x14 / 4;
pub const PWM_FIF1: usize = 0x18 / 4;
pub const PWM_RNG2: usize = 0x20 / 4;
pub const PWM_DAT2: usize = 0x24 / 4;

/// Byte offset of the FIFO input register within the PWM block
pub const PWM_FIFO_OFFSET: u32 = 0x18;

/// Bits per serializer word
pub const SERIALIZER_RANGE: u32 = 32;

bitflags! {
    /// PWM CTL register
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Control: u32 {
        const PWEN1 = 1 << 0;
        const MODE1 = 1 << 1;
        const RPTL1 = 1 << 2;
        const SBIT1 = 1 << 3;
        const POLA1 = 1 << 4;
        const USEF1 = 1 << 5;
        /// Clear the FIFO (shared by both channels)
        const CLRF1 = 1 << 6;
        const MSEN1 = 1 << 7;
        const PWEN2 = 1 << 8;
        const MODE2 = 1 << 9;
        const RPTL2 = 1 << 10;
        const SBIT2 = 1 << 11;
        const POLA2 = 1 << 12;
        const USEF2 = 1 << 13;
        const MSEN2 = 1 << 15;
    }
}

/// DMAC: enable DMA requests
pub const DMAC_ENAB: u32 = 1 << 31;

/// DMAC panic threshold field
pub const fn dmac_panic(threshold: u32) -> u32 {
    (threshold & 0xFF) << 8
}

/// DMAC DREQ threshold field
pub const fn dmac_dreq(threshold: u32) -> u32 {
    threshold & 0xFF
}

/// One of the two PWM channels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PwmChannel {
    Pwm0,
    Pwm1,
}

impl PwmChannel {
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(PwmChannel::Pwm0),
            1 => Some(PwmChannel::Pwm1),
            _ => None,
        }
    }

    pub fn index(self) -> u8 {
        match self {
            PwmChannel::Pwm0 => 0,
            PwmChannel::Pwm1 => 1,
        }
    }

    pub fn range_register(self) -> usize {
        match self {
            PwmChannel::Pwm0 => PWM_RNG1,
            PwmChannel::Pwm1 => PWM_RNG2,
        }
    }

    pub fn data_register(self) -> usize {
        match self {
            PwmChannel::Pwm0 => PWM_DAT1,
            PwmChannel::Pwm1 => PWM_DAT2,
        }
    }

    pub fn enable(self) -> Control {
        match self {
            PwmChannel::Pwm0 => Control::PWEN1,
            PwmChannel::Pwm1 => Control::PWEN2,
        }
    }

    /// Serializer mode fed from the FIFO
    pub fn fifo_serializer(self) -> Control {
        match self {
            PwmChannel::Pwm0 => Control::USEF1 | Control::MODE1,
            PwmChannel::Pwm1 => Control::USEF2 | Control::MODE2,
        }
    }

    pub fn mark_space(self) -> Control {
        match self {
            PwmChannel::Pwm0 => Control::MSEN1,
            PwmChannel::Pwm1 => Control::MSEN2,
        }
    }

    /// Every CTL bit owned by this channel
    pub fn control_mask(self) -> Control {
        match self {
            PwmChannel::Pwm0 => Control::from_bits_retain(0x00BF),
            PwmChannel::Pwm1 => Control::from_bits_retain(0xBF00),
        }
    }
}

/// PWM controller over a mapped PWM window
pub struct PwmController<'w, W: RegisterMap> {
    regs: &'w mut W,
}

impl<'w, W: RegisterMap> PwmController<'w, W> {
    pub fn new(regs: &'w mut W) -> Self {
        Self { regs }
    }

    pub fn control(&self) -> Control {
        Control::from_bits_retain(self.regs.read(PWM_CTL))
    }

    /// Clear only `channel`'s control bits
    pub fn disable(&mut self, channel: PwmChannel) {
        self.regs.clear_bits(PWM_CTL, channel.control_mask().bits());
    }

    /// Replace `channel`'s control bits with `bits`, keeping the other channel
    fn set_channel_control(&mut self, channel: PwmChannel, bits: Control) {
        // CLRF1 reads back as zero on hardware; never write it back
        let mask = (channel.control_mask() | Control::CLRF1).bits();
        self.regs.modify(PWM_CTL, |ctl| (ctl & !mask) | bits.bits());
    }

    /// Put `channel` into DMA-fed serializer mode, 32 bits per FIFO word
    pub fn configure_serializer<D: DelayNs>(&mut self, channel: PwmChannel, delay: &mut D) {
        self.regs.write(channel.range_register(), SERIALIZER_RANGE);
        delay.delay_us(10);
        self.regs.set_bits(PWM_CTL, Control::CLRF1.bits());
        delay.delay_us(10);
        self.regs
            .write(PWM_DMAC, DMAC_ENAB | dmac_panic(7) | dmac_dreq(3));
        delay.delay_us(10);
        self.set_channel_control(channel, channel.fifo_serializer());
        delay.delay_us(10);
        self.regs.set_bits(PWM_CTL, channel.enable().bits());
    }

    /// Run `channel` in mark/space mode with `data` high counts out of `range`
    pub fn configure_mark_space(&mut self, channel: PwmChannel, range: u32, data: u32) {
        self.regs.write(channel.range_register(), range);
        self.regs.write(channel.data_register(), data);
        self.set_channel_control(channel, channel.mark_space() | channel.enable());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockDelay, MockPlatform};
    use cadence_hal::RegisterBlock;

    #[test]
    fn test_serializer_setup() {
        let platform = MockPlatform::new();
        let mut window = platform.register_window(RegisterBlock::Pwm, 0x1000);
        let mut delay = MockDelay::default();

        PwmController::new(&mut window).configure_serializer(PwmChannel::Pwm0, &mut delay);

        assert_eq!(window.read(PWM_RNG1), 32);
        assert_eq!(window.read(PWM_DMAC), 0x8000_0703);
        let ctl = Control::from_bits_retain(window.read(PWM_CTL));
        assert_eq!(ctl, Control::USEF1 | Control::MODE1 | Control::PWEN1);
    }

    #[test]
    fn test_second_channel_uses_its_own_registers() {
        let platform = MockPlatform::new();
        let mut window = platform.register_window(RegisterBlock::Pwm, 0x1000);

        PwmController::new(&mut window).configure_mark_space(PwmChannel::Pwm1, 100, 25);

        assert_eq!(window.read(PWM_RNG2), 100);
        assert_eq!(window.read(PWM_DAT2), 25);
        assert_eq!(window.read(PWM_RNG1), 0);
        assert_eq!(window.read(PWM_CTL), (Control::MSEN2 | Control::PWEN2).bits());
    }

    #[test]
    fn test_disable_leaves_other_channel() {
        let platform = MockPlatform::new();
        let mut window = platform.register_window(RegisterBlock::Pwm, 0x1000);
        window.write(PWM_CTL, (Control::PWEN1 | Control::MSEN1 | Control::PWEN2).bits());

        PwmController::new(&mut window).disable(PwmChannel::Pwm0);
        assert_eq!(window.read(PWM_CTL), Control::PWEN2.bits());
    }

    #[test]
    fn test_setup_keeps_other_channel_running() {
        let platform = MockPlatform::new();
        let mut window = platform.register_window(RegisterBlock::Pwm, 0x1000);
        let mut delay = MockDelay::default();
        let mut pwm = PwmController::new(&mut window);

        pwm.configure_mark_space(PwmChannel::Pwm1, 100, 25);
        pwm.configure_serializer(PwmChannel::Pwm0, &mut delay);
        assert_eq!(
            pwm.control(),
            Control::MSEN2 | Control::PWEN2 | Control::USEF1 | Control::MODE1 | Control::PWEN1
        );

        pwm.configure_mark_space(PwmChannel::Pwm0, 100, 50);
        assert_eq!(
            pwm.control(),
            Control::MSEN2 | Control::PWEN2 | Control::MSEN1 | Control::PWEN1
        );
    }

    #[test]
    fn test_fifo_clear_is_not_latched() {
        let platform = MockPlatform::new();
        let mut window = platform.register_window(RegisterBlock::Pwm, 0x1000);
        let mut delay = MockDelay::default();

        PwmController::new(&mut window).configure_serializer(PwmChannel::Pwm1, &mut delay);
        let ctl = Control::from_bits_retain(window.read(PWM_CTL));
        assert!(!ctl.contains(Control::CLRF1));
        assert_eq!(ctl, Control::USEF2 | Control::MODE2 | Control::PWEN2);
    }

    #[test]
    fn test_channel_lookup() {
        assert_eq!(PwmChannel::from_index(1), Some(PwmChannel::Pwm1));
        assert_eq!(PwmChannel::from_index(2), None);
        assert_eq!(PwmChannel::Pwm0.index(), 0);
    }
}
