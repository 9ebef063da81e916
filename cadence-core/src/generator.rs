//! Pattern generator
//!
//! Owns every hardware resource of one PWM channel: the mapped GPIO, PWM,
//! clock manager and DMA windows, the channel claim, and (once a pattern is
//! configured) the uncached GPU buffer holding the DMA control block and
//! pattern data.
//!
//! # Buffer layout
//!
//! ```text
//! offset 0        32                          32 + data_bytes     page
//!   ┌──────────────┬──────────────────────────┬───────────────────┬─────┐
//!   │ control block│ encoded payload          │ zero reset gap    │ pad │
//!   └──────────────┴──────────────────────────┴───────────────────┴─────┘
//! ```
//!
//! The DMA transfers the payload and reset gap on every send; the gap holds
//! the line low long enough for the receiver to latch.

use alloc::vec;
use alloc::vec::Vec;

use embedded_hal::delay::DelayNs;
use log::{debug, error, info, warn};

use cadence_hal::{GpioPin, MailboxTransport, PeripheralAccess, PinFunction, RegisterBlock, RegisterMap};

use crate::board::{BoardDescriptor, PwmOutput};
use crate::clock::{self, ClockSource, PwmClock};
use crate::dma::{self, DmaChannel, DmaDescriptor};
use crate::error::{ConfigError, Error};
use crate::gpio::{Bcm2835Pin, MAX_GPIO};
use crate::mailbox::{MailboxAllocator, MemoryBlock};
use crate::pattern::{choose_width, BitPattern, BufferLayout, PatternConfig};
use crate::pwm::{PwmChannel, PwmController};
use crate::state::{Event, State};

/// Bytes mapped for the GPIO, PWM and clock manager blocks
pub const REGISTER_WINDOW_LEN: usize = 4096;
/// Clock feeding the serializer while sending patterns
pub const PATTERN_CLOCK: ClockSource = ClockSource::Oscillator;
/// Clock feeding mark/space output
pub const CONTINUOUS_CLOCK: ClockSource = ClockSource::PllD;
/// Periods below this many nanoseconds use a tenth of the resolution
const HIGH_FREQUENCY_PERIOD_NS: u32 = 750;

struct PatternSession<M: MailboxTransport, W: RegisterMap> {
    config: PatternConfig,
    pattern: BitPattern,
    layout: BufferLayout,
    allocator: MailboxAllocator<M>,
    block: MemoryBlock<W>,
    descriptor: DmaDescriptor,
    /// Encoder output, copied word by word into the uncached buffer
    scratch: Vec<u8>,
}

/// DMA-driven bit pattern generator for one PWM channel
///
/// Created by [`PatternGenerator::initialize`], torn down by
/// [`PatternGenerator::shutdown`] or on drop.
///
/// Only the PWM channel is claimed. Both channels share the PWM clock
/// (`CM_PWMCTL`/`CM_PWMDIV`) and the single PWM FIFO, and generators on the
/// same board default to the same DMA channel. Two generators may run side
/// by side only if at most one sends patterns and both agree on the clock;
/// configuring one reprograms the clock under the other.
pub struct PatternGenerator<A: PeripheralAccess, D: DelayNs> {
    access: A,
    delay: D,
    board: BoardDescriptor,
    output: PwmOutput,
    channel: PwmChannel,
    gpio: A::Window,
    pwm: A::Window,
    clock: A::Window,
    dma: A::Window,
    session: Option<PatternSession<A::Mailbox, A::Window>>,
    state: State,
    released: bool,
}

impl<A: PeripheralAccess, D: DelayNs> PatternGenerator<A, D> {
    /// Claim `output`'s PWM channel, map the peripheral blocks and route the
    /// GPIO to PWM
    pub fn initialize(
        mut access: A,
        delay: D,
        board: BoardDescriptor,
        output: PwmOutput,
    ) -> Result<Self, Error> {
        let channel = PwmChannel::from_index(output.channel)
            .ok_or(ConfigError::InvalidPwmChannel(output.channel))?;
        if output.gpio > MAX_GPIO {
            return Err(ConfigError::InvalidGpio(output.gpio).into());
        }
        if output.alt > 5 {
            return Err(ConfigError::InvalidAltFunction(output.alt).into());
        }
        if board.dma_channel > dma::MAX_CHANNEL {
            return Err(ConfigError::InvalidDmaChannel(board.dma_channel).into());
        }

        if !access.claim_channel(output.channel) {
            warn!("PWM{} is already claimed", output.channel);
            return Err(Error::ChannelBusy(output.channel));
        }

        let (mut gpio, pwm, clock, dma) = match Self::map_windows(&mut access, &board) {
            Ok(windows) => windows,
            Err(err) => {
                access.release_channel(output.channel);
                return Err(err);
            }
        };

        Bcm2835Pin::new(&mut gpio, output.gpio).set_function(PinFunction::Alt(output.alt));
        info!(
            "GPIO{} routed to PWM{} (ALT{}), DMA channel {}",
            output.gpio, output.channel, output.alt, board.dma_channel
        );

        Ok(Self {
            access,
            delay,
            board,
            output,
            channel,
            gpio,
            pwm,
            clock,
            dma,
            session: None,
            state: State::Configured,
            released: false,
        })
    }

    fn map_windows(
        access: &mut A,
        board: &BoardDescriptor,
    ) -> Result<(A::Window, A::Window, A::Window, A::Window), Error> {
        let gpio = access.map_registers(RegisterBlock::Gpio, board.gpio_address(), REGISTER_WINDOW_LEN)?;
        let pwm = access.map_registers(RegisterBlock::Pwm, board.pwm_address(), REGISTER_WINDOW_LEN)?;
        let clock =
            access.map_registers(RegisterBlock::Clock, board.clock_address(), REGISTER_WINDOW_LEN)?;
        let dma = access.map_registers(
            RegisterBlock::Dma,
            board.dma_channel_address(board.dma_channel),
            dma::CHANNEL_STRIDE as usize,
        )?;
        Ok((gpio, pwm, clock, dma))
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn board(&self) -> &BoardDescriptor {
        &self.board
    }

    pub fn output(&self) -> PwmOutput {
        self.output
    }

    /// Current pin function of the output GPIO
    pub fn pin_function(&mut self) -> PinFunction {
        Bcm2835Pin::new(&mut self.gpio, self.output.gpio).function()
    }

    /// Codes chosen by [`configure_pattern`](Self::configure_pattern)
    pub fn pattern(&self) -> Option<BitPattern> {
        self.session.as_ref().map(|s| s.pattern)
    }

    pub fn layout(&self) -> Option<BufferLayout> {
        self.session.as_ref().map(|s| s.layout)
    }

    pub fn descriptor(&self) -> Option<DmaDescriptor> {
        self.session.as_ref().map(|s| s.descriptor)
    }

    /// Bus address of the uncached buffer (and its control block)
    pub fn buffer_bus_address(&self) -> Option<u32> {
        self.session.as_ref().map(|s| s.block.bus_address())
    }

    /// Allocate the pattern buffer and set up clock, PWM and DMA for
    /// `config`
    ///
    /// Only one pattern may be configured per generator. On error nothing
    /// is kept and the generator is unchanged.
    pub fn configure_pattern(&mut self, config: PatternConfig) -> Result<(), Error> {
        if self.session.is_some() {
            return Err(Error::SessionActive);
        }
        if self.state == State::Continuous {
            return Err(Error::InvalidState(self.state));
        }
        if config.frequency_hz == 0 {
            return Err(ConfigError::ZeroFrequency.into());
        }
        if config.byte_count == 0 {
            return Err(ConfigError::EmptyPattern.into());
        }

        let pattern = choose_width(config.duty_zero_percent, config.duty_one_percent)?;
        let layout = BufferLayout::new(&config, pattern.width(), self.board.page_size)?;

        let mailbox = self.access.open_mailbox()?;
        let mut allocator =
            MailboxAllocator::new(mailbox, self.board.mem_flags(), self.board.bus_alias_mask);
        let mut block =
            allocator.allocate(&mut self.access, layout.total_bytes, self.board.page_size)?;
        block.window_mut().fill(0);

        let sample_hz = config.frequency_hz.saturating_mul(pattern.width() as u32);
        let divisor = clock::solve_unscaled(PATTERN_CLOCK.frequency_hz(), sample_hz);

        PwmController::new(&mut self.pwm).disable(self.channel);
        self.delay.delay_us(10);
        let mut cm = PwmClock::new(&mut self.clock);
        cm.stop(&mut self.delay);
        cm.start(PATTERN_CLOCK, divisor, &mut self.delay);
        PwmController::new(&mut self.pwm).configure_serializer(self.channel, &mut self.delay);

        let descriptor = DmaDescriptor::pwm_fifo(
            block.bus_address_at(layout.data_offset),
            self.board.pwm_fifo_bus_address(),
            layout.data_bytes as u32,
        );
        block.window_mut().write_words(0, &descriptor.to_words());

        info!(
            "pattern configured: {} bytes at {} Hz, {}-bit codes {:#b}/{:#b}, divisor {}, {} byte buffer at bus {:#010x}",
            config.byte_count,
            config.frequency_hz,
            pattern.width(),
            pattern.zero_code(),
            pattern.one_code(),
            divisor,
            layout.total_bytes,
            block.bus_address()
        );

        self.session = Some(PatternSession {
            config,
            pattern,
            layout,
            allocator,
            block,
            descriptor,
            scratch: vec![0; layout.data_bytes],
        });
        Ok(())
    }

    /// Encode `bytes` into the buffer and start the transfer
    ///
    /// Blocks until any previous transfer has finished, then returns as
    /// soon as the DMA channel is running. Payloads shorter than the
    /// configured size are followed by zeros.
    pub fn send(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let capacity = match &self.session {
            Some(session) => session.config.byte_count,
            None => return Err(Error::NotConfigured),
        };
        if !self.state.accepts_pattern() {
            return Err(Error::InvalidState(self.state));
        }
        if bytes.len() > capacity {
            return Err(Error::PayloadTooLarge {
                len: bytes.len(),
                capacity,
            });
        }

        self.wait_for_completion()?;

        let Some(session) = self.session.as_mut() else {
            return Err(Error::NotConfigured);
        };
        session.pattern.encode(bytes, &mut session.scratch);

        let first = session.layout.data_word();
        let window = session.block.window_mut();
        for (offset, chunk) in session.scratch.chunks_exact(4).enumerate() {
            let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            window.write(first + offset, word);
        }

        DmaChannel::new(&mut self.dma).start(session.block.bus_address(), &mut self.delay);
        self.state = self.state.transition(Event::TransferStarted);
        debug!("started transfer of {} bytes", bytes.len());
        Ok(())
    }

    /// Block until the running transfer finishes
    ///
    /// Returns immediately when nothing is being sent. A DMA error resets
    /// the channel and is reported as [`Error::HardwareFault`].
    pub fn wait_for_completion(&mut self) -> Result<(), Error> {
        if !self.state.is_sending() {
            return Ok(());
        }

        let mut channel = DmaChannel::new(&mut self.dma);
        match channel.wait(&mut self.delay) {
            Ok(()) => {
                self.state = self.state.transition(Event::TransferFinished);
                Ok(())
            }
            Err(err) => {
                channel.reset();
                self.state = self.state.transition(Event::TransferFaulted);
                Err(err)
            }
        }
    }

    /// Run the channel as a free-running mark/space PWM
    ///
    /// `period_ns` is the output period and `duty_percent` the high share.
    /// Periods under 750 ns trade duty resolution (steps of 10%) for
    /// frequency. Not available while a pattern is configured.
    pub fn start_pwm(&mut self, period_ns: u32, duty_percent: u8) -> Result<(), Error> {
        if self.session.is_some() {
            return Err(Error::SessionActive);
        }
        if period_ns == 0 {
            return Err(ConfigError::ZeroPeriod.into());
        }
        if duty_percent > 100 {
            return Err(ConfigError::DutyCycleOutOfRange(duty_percent).into());
        }

        let reduction: u32 = if period_ns < HIGH_FREQUENCY_PERIOD_NS { 10 } else { 1 };
        let frequency = (1_000_000_000 / period_ns as u64) * 100 / reduction as u64;
        if frequency == 0 {
            return Err(ConfigError::PeriodOutOfRange(period_ns).into());
        }
        let divisor = clock::solve(
            CONTINUOUS_CLOCK.frequency_hz(),
            frequency.min(u32::MAX as u64) as u32,
        );

        let mut cm = PwmClock::new(&mut self.clock);
        cm.stop(&mut self.delay);
        cm.start(CONTINUOUS_CLOCK, divisor.divisor, &mut self.delay);

        let mut pwm = PwmController::new(&mut self.pwm);
        pwm.disable(self.channel);
        self.delay.delay_us(10);
        let range = 100 * divisor.scale / reduction;
        let data = duty_percent as u32 * divisor.scale / reduction;
        pwm.configure_mark_space(self.channel, range, data);

        self.state = self.state.transition(Event::ContinuousStarted);
        debug!(
            "PWM{} free-running: period {} ns, duty {}%, divisor {} x{}",
            self.output.channel, period_ns, duty_percent, divisor.divisor, divisor.scale
        );
        Ok(())
    }

    /// Stop free-running output; no-op otherwise
    pub fn stop_pwm(&mut self) {
        if self.state != State::Continuous {
            return;
        }
        PwmController::new(&mut self.pwm).disable(self.channel);
        self.state = self.state.transition(Event::ContinuousStopped);
    }

    /// Stop output and release every acquired resource
    ///
    /// All steps are attempted; the first failure is returned.
    pub fn shutdown(mut self) -> Result<(), Error> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<(), Error> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let mut first_error = None;
        if let Err(err) = self.wait_for_completion() {
            warn!("transfer did not finish cleanly: {}", err);
            first_error.get_or_insert(err);
        }
        if self.session.is_some() {
            DmaChannel::new(&mut self.dma).reset();
        }

        PwmController::new(&mut self.pwm).disable(self.channel);
        PwmClock::new(&mut self.clock).stop(&mut self.delay);
        self.state = State::Configured;

        if let Some(session) = self.session.take() {
            let PatternSession {
                mut allocator,
                block,
                ..
            } = session;
            if let Err(err) = allocator.release(block) {
                error!("failed to release pattern buffer: {}", err);
                first_error.get_or_insert(err.into());
            }
        }

        self.access.release_channel(self.output.channel);
        info!("PWM{} released", self.output.channel);

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl<A: PeripheralAccess, D: DelayNs> Drop for PatternGenerator<A, D> {
    fn drop(&mut self) {
        if let Err(err) = self.teardown() {
            error!("teardown on drop failed: {}", err);
        }
    }
}
