//! Mock platform for host tests
//!
//! Register windows are plain word vectors with just enough side effects to
//! drive the generator: the clock reports BUSY while enabled, a started DMA
//! channel stays ACTIVE for a configurable number of polls (or raises
//! ERROR), and the mailbox firmware tracks handles so leaks are visible.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use cadence_hal::register::check_index;
use cadence_hal::{
    DeviceError, MailboxError, MailboxTransport, MemoryMapper, PeripheralAccess, RegisterBlock,
    RegisterMap,
};
use embedded_hal::delay::DelayNs;

use crate::clock::{CM_BUSY, CM_ENAB, CM_PWMCTL};
use crate::dma::{ControlStatus, DMA_CONBLK_AD, DMA_CS, DMA_DEBUG};
use crate::mailbox::{
    RESPONSE_ERROR, TAG_ALLOCATE_MEMORY, TAG_LOCK_MEMORY, TAG_RELEASE_MEMORY, TAG_UNLOCK_MEMORY,
};
use crate::pwm::{Control, PWM_CTL};

const RESPONSE_OK: u32 = 0x8000_0000;

/// Observable bus activity, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    MemoryWrite { index: usize },
    DmaStart { descriptor: u32 },
    DmaPoll { active: bool },
    ClockControl(u32),
    PwmControl(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WindowKind {
    Register(RegisterBlock),
    Memory,
}

#[derive(Default)]
struct Firmware {
    next_handle: u32,
    /// handle -> locked
    live: BTreeMap<u32, bool>,
    fail_alloc: bool,
    fail_lock: bool,
    reject: bool,
}

impl Firmware {
    fn bus_address(handle: u32) -> u32 {
        0xC000_0000 | (0x0100_0000 + handle * 0x0010_0000)
    }

    fn answer(&mut self, tag: u32, value: u32) -> Option<u32> {
        let result = match tag {
            TAG_ALLOCATE_MEMORY if self.fail_alloc => 0,
            TAG_ALLOCATE_MEMORY => {
                self.next_handle += 1;
                self.live.insert(self.next_handle, false);
                self.next_handle
            }
            TAG_LOCK_MEMORY if self.fail_lock => u32::MAX,
            TAG_LOCK_MEMORY => match self.live.get_mut(&value) {
                Some(locked) => {
                    *locked = true;
                    Self::bus_address(value)
                }
                None => u32::MAX,
            },
            TAG_UNLOCK_MEMORY => match self.live.get_mut(&value) {
                Some(locked) => {
                    *locked = false;
                    0
                }
                None => 1,
            },
            TAG_RELEASE_MEMORY => match self.live.remove(&value) {
                Some(_) => 0,
                None => 1,
            },
            _ => return None,
        };
        Some(result)
    }
}

#[derive(Default)]
struct BusState {
    events: Vec<BusEvent>,
    dma_busy_polls: u32,
    dma_remaining: u32,
    dma_running: bool,
    dma_fault: Option<u32>,
    dma_starts: Vec<u32>,
    firmware: Firmware,
    map_fails: bool,
    register_fails: Option<RegisterBlock>,
    mailbox_fails: bool,
    mapped_physical: Vec<u64>,
    unmapped: Vec<u64>,
    registers: Vec<(RegisterBlock, Rc<RefCell<Vec<u32>>>)>,
    memories: Vec<Rc<RefCell<Vec<u32>>>>,
}

/// Mock platform; clones share the bus and the channel claims
#[derive(Clone, Default)]
pub struct MockPlatform {
    bus: Rc<RefCell<BusState>>,
    claims: Rc<RefCell<[bool; 2]>>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Standalone register window, not tracked as a platform mapping
    pub fn register_window(&self, block: RegisterBlock, len: usize) -> MockWindow {
        MockWindow::new(WindowKind::Register(block), 0, len, self.bus.clone())
    }

    pub fn mailbox(&self) -> MockMailbox {
        MockMailbox {
            bus: self.bus.clone(),
        }
    }

    pub fn set_dma_busy_polls(&self, polls: u32) {
        self.bus.borrow_mut().dma_busy_polls = polls;
    }

    pub fn set_dma_fault(&self, debug: Option<u32>) {
        self.bus.borrow_mut().dma_fault = debug;
    }

    pub fn set_alloc_fails(&self, fails: bool) {
        self.bus.borrow_mut().firmware.fail_alloc = fails;
    }

    pub fn set_lock_fails(&self, fails: bool) {
        self.bus.borrow_mut().firmware.fail_lock = fails;
    }

    pub fn set_reject_requests(&self, reject: bool) {
        self.bus.borrow_mut().firmware.reject = reject;
    }

    pub fn set_map_fails(&self, fails: bool) {
        self.bus.borrow_mut().map_fails = fails;
    }

    pub fn set_register_fails(&self, block: Option<RegisterBlock>) {
        self.bus.borrow_mut().register_fails = block;
    }

    pub fn set_mailbox_fails(&self, fails: bool) {
        self.bus.borrow_mut().mailbox_fails = fails;
    }

    pub fn events(&self) -> Vec<BusEvent> {
        self.bus.borrow().events.clone()
    }

    pub fn dma_starts(&self) -> Vec<u32> {
        self.bus.borrow().dma_starts.clone()
    }

    pub fn live_handles(&self) -> usize {
        self.bus.borrow().firmware.live.len()
    }

    pub fn locked_handles(&self) -> usize {
        self.bus.borrow().firmware.live.values().filter(|l| **l).count()
    }

    pub fn mapped_physical(&self) -> Vec<u64> {
        self.bus.borrow().mapped_physical.clone()
    }

    pub fn unmapped(&self) -> Vec<u64> {
        self.bus.borrow().unmapped.clone()
    }

    pub fn is_claimed(&self, channel: u8) -> bool {
        self.claims.borrow()[channel as usize]
    }

    /// Raw word from the most recent mapping of `block`
    pub fn register(&self, block: RegisterBlock, index: usize) -> u32 {
        let bus = self.bus.borrow();
        let (_, words) = bus
            .registers
            .iter()
            .rev()
            .find(|(b, _)| *b == block)
            .expect("block not mapped");
        let value = words.borrow()[index];
        value
    }

    /// Word from the most recent memory mapping
    pub fn memory_word(&self, index: usize) -> u32 {
        let bus = self.bus.borrow();
        let words = bus.memories.last().expect("no memory mapped");
        let value = words.borrow()[index];
        value
    }
}

impl MemoryMapper for MockPlatform {
    type Window = MockWindow;

    fn map_physical(&mut self, phys: u64, len: usize) -> Result<MockWindow, DeviceError> {
        if self.bus.borrow().map_fails {
            return Err(DeviceError::Map {
                phys,
                len,
                errno: 12,
            });
        }
        let window = MockWindow::new(WindowKind::Memory, phys, len, self.bus.clone());
        let mut bus = self.bus.borrow_mut();
        bus.mapped_physical.push(phys);
        bus.memories.push(window.words.clone());
        Ok(window)
    }
}

impl PeripheralAccess for MockPlatform {
    type Mailbox = MockMailbox;

    fn map_registers(
        &mut self,
        block: RegisterBlock,
        phys: u64,
        len: usize,
    ) -> Result<MockWindow, DeviceError> {
        if self.bus.borrow().register_fails == Some(block) {
            return Err(DeviceError::Open { errno: 13 });
        }
        // Both PWM channels see the same hardware registers
        let shared = self
            .bus
            .borrow()
            .registers
            .iter()
            .find(|(b, words)| *b == block && words.borrow().len() == len.div_ceil(4))
            .map(|(_, words)| words.clone());
        let window = match shared {
            Some(words) => MockWindow {
                kind: WindowKind::Register(block),
                phys,
                words,
                bus: self.bus.clone(),
            },
            None => MockWindow::new(WindowKind::Register(block), phys, len, self.bus.clone()),
        };
        self.bus
            .borrow_mut()
            .registers
            .push((block, window.words.clone()));
        Ok(window)
    }

    fn open_mailbox(&mut self) -> Result<MockMailbox, MailboxError> {
        if self.bus.borrow().mailbox_fails {
            return Err(MailboxError::Open { errno: 2 });
        }
        Ok(self.mailbox())
    }

    fn claim_channel(&mut self, channel: u8) -> bool {
        let mut claims = self.claims.borrow_mut();
        let slot = &mut claims[channel as usize];
        if *slot {
            return false;
        }
        *slot = true;
        true
    }

    fn release_channel(&mut self, channel: u8) {
        self.claims.borrow_mut()[channel as usize] = false;
    }
}

/// Word-vector register window
pub struct MockWindow {
    kind: WindowKind,
    phys: u64,
    words: Rc<RefCell<Vec<u32>>>,
    bus: Rc<RefCell<BusState>>,
}

impl MockWindow {
    fn new(kind: WindowKind, phys: u64, len: usize, bus: Rc<RefCell<BusState>>) -> Self {
        Self {
            kind,
            phys,
            words: Rc::new(RefCell::new(vec![0; len.div_ceil(4)])),
            bus,
        }
    }

    fn read_dma_status(&self, stored: u32) -> u32 {
        let mut bus = self.bus.borrow_mut();
        let idle = stored & !ControlStatus::ACTIVE.bits();
        if !bus.dma_running {
            bus.events.push(BusEvent::DmaPoll { active: false });
            return idle;
        }
        if bus.dma_fault.is_some() {
            return stored | ControlStatus::ERROR.bits();
        }
        if bus.dma_remaining > 0 {
            bus.dma_remaining -= 1;
            bus.events.push(BusEvent::DmaPoll { active: true });
            return stored | ControlStatus::ACTIVE.bits();
        }
        bus.dma_running = false;
        bus.events.push(BusEvent::DmaPoll { active: false });
        idle
    }

    fn write_dma_status(&self, value: u32) -> u32 {
        let status = ControlStatus::from_bits_retain(value);
        let mut bus = self.bus.borrow_mut();
        if status.contains(ControlStatus::RESET) {
            bus.dma_running = false;
            return 0;
        }
        if status.contains(ControlStatus::ACTIVE) {
            let descriptor = self.words.borrow()[DMA_CONBLK_AD];
            bus.dma_running = true;
            bus.dma_remaining = bus.dma_busy_polls;
            bus.dma_starts.push(descriptor);
            bus.events.push(BusEvent::DmaStart { descriptor });
            return value;
        }
        // INT and END are write-1-to-clear
        value & !(ControlStatus::INT | ControlStatus::END).bits()
    }
}

impl Drop for MockWindow {
    fn drop(&mut self) {
        if let Ok(mut bus) = self.bus.try_borrow_mut() {
            bus.unmapped.push(self.phys);
        }
    }
}

impl RegisterMap for MockWindow {
    fn len(&self) -> usize {
        self.words.borrow().len()
    }

    fn physical_address(&self) -> u64 {
        self.phys
    }

    fn base_ptr(&self) -> *const u32 {
        self.words.borrow().as_ptr()
    }

    fn read(&self, index: usize) -> u32 {
        check_index(index, self.len());
        let stored = self.words.borrow()[index];
        match (self.kind, index) {
            (WindowKind::Register(RegisterBlock::Dma), DMA_CS) => self.read_dma_status(stored),
            (WindowKind::Register(RegisterBlock::Dma), DMA_DEBUG) => {
                let bus = self.bus.borrow();
                match bus.dma_fault {
                    Some(debug) if bus.dma_running => debug,
                    _ => stored,
                }
            }
            _ => stored,
        }
    }

    fn write(&mut self, index: usize, value: u32) {
        check_index(index, self.len());
        let stored = match (self.kind, index) {
            (WindowKind::Memory, _) => {
                self.bus
                    .borrow_mut()
                    .events
                    .push(BusEvent::MemoryWrite { index });
                value
            }
            (WindowKind::Register(RegisterBlock::Clock), CM_PWMCTL) => {
                self.bus
                    .borrow_mut()
                    .events
                    .push(BusEvent::ClockControl(value));
                if value & CM_ENAB != 0 {
                    value | CM_BUSY
                } else {
                    value & !CM_BUSY
                }
            }
            (WindowKind::Register(RegisterBlock::Pwm), PWM_CTL) => {
                self.bus
                    .borrow_mut()
                    .events
                    .push(BusEvent::PwmControl(value));
                // FIFO clear is a strobe and reads back as zero
                value & !Control::CLRF1.bits()
            }
            (WindowKind::Register(RegisterBlock::Dma), DMA_CS) => self.write_dma_status(value),
            _ => value,
        };
        self.words.borrow_mut()[index] = stored;
    }
}

/// Mailbox answering from the mock firmware
pub struct MockMailbox {
    bus: Rc<RefCell<BusState>>,
}

impl MailboxTransport for MockMailbox {
    fn property(&mut self, message: &mut [u32]) -> Result<(), MailboxError> {
        if message.len() < 7 {
            return Err(MailboxError::Malformed);
        }
        let mut bus = self.bus.borrow_mut();
        let firmware = &mut bus.firmware;
        let answer = if firmware.reject {
            None
        } else {
            firmware.answer(message[2], message[5])
        };
        match answer {
            Some(value) => {
                message[1] = RESPONSE_OK;
                message[5] = value;
            }
            None => message[1] = RESPONSE_ERROR,
        }
        Ok(())
    }
}

/// Delay that only accumulates the requested time
#[derive(Debug, Default)]
pub struct MockDelay {
    total_ns: u64,
}

impl MockDelay {
    pub fn total_ns(&self) -> u64 {
        self.total_ns
    }
}

impl DelayNs for MockDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ns += ns as u64;
    }
}
