//! GPU memory allocation over the mailbox property interface
//!
//! DMA needs physically contiguous memory the CPU does not cache. The
//! VideoCore firmware hands out such blocks: allocate returns a handle,
//! lock pins the block and yields its bus address, and the block is mapped
//! into the process through its physical alias.
//!
//! ```text
//! allocate ──► lock ──► map            (acquire)
//! unmap    ──► unlock ──► release      (release, always in this order)
//! ```

use bitflags::bitflags;
use heapless::Vec;
use log::{debug, warn};

use cadence_hal::{DeviceError, MailboxError, MailboxTransport, MemoryMapper, RegisterMap};

/// Allocate GPU memory: size, alignment, flags -> handle
pub const TAG_ALLOCATE_MEMORY: u32 = 0x3000C;
/// Lock memory: handle -> bus address
pub const TAG_LOCK_MEMORY: u32 = 0x3000D;
/// Unlock memory: handle -> status
pub const TAG_UNLOCK_MEMORY: u32 = 0x3000E;
/// Release memory: handle -> status
pub const TAG_RELEASE_MEMORY: u32 = 0x3000F;

const PROCESS_REQUEST: u32 = 0;
/// Response code the firmware writes on a parse error
pub const RESPONSE_ERROR: u32 = 0x8000_0001;
const END_TAG: u32 = 0;

/// Room for the header, one tag with three value words and the end tag
const MAX_MESSAGE_WORDS: usize = 12;
/// Word index of the first value in a single-tag message
const VALUE_INDEX: usize = 5;

bitflags! {
    /// Allocation flags for [`TAG_ALLOCATE_MEMORY`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MemFlags: u32 {
        /// Block may be resized to 0 at any time
        const DISCARDABLE = 1 << 0;
        /// Uncached alias (0xC bus alias)
        const DIRECT = 1 << 2;
        /// Non-allocating in L2 but coherent
        const COHERENT = 2 << 2;
        /// Allocating in L2, uncached in L1
        const L1_NONALLOCATING = Self::DIRECT.bits() | Self::COHERENT.bits();
        /// Initialise the buffer to all zeros
        const ZERO = 1 << 4;
        /// Don't initialise
        const NO_INIT = 1 << 5;
        /// Likely to be locked for long periods
        const HINT_PERMALOCK = 1 << 6;
    }
}

/// Errors from GPU memory allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AllocError {
    #[error(transparent)]
    Transport(#[from] MailboxError),
    /// Firmware could not parse the request
    #[error("firmware rejected mailbox tag {tag:#x}")]
    Rejected { tag: u32 },
    #[error("firmware has no block of {size} bytes")]
    NoHandle { size: usize },
    #[error("cannot lock memory handle {handle}")]
    LockFailed { handle: u32 },
    #[error("firmware returned status {status} for tag {tag:#x} on handle {handle}")]
    ReleaseFailed { tag: u32, handle: u32, status: u32 },
    #[error("cannot map locked memory: {0}")]
    Map(DeviceError),
}

/// Single-tag property message
pub struct PropertyMessage {
    words: Vec<u32, MAX_MESSAGE_WORDS>,
}

impl PropertyMessage {
    /// Build a request carrying `values` for `tag`
    ///
    /// The value buffer is sized to the request, which is large enough for
    /// every response used here.
    pub fn new(tag: u32, values: &[u32]) -> Result<Self, MailboxError> {
        let value_bytes = (values.len() * 4) as u32;
        let mut words = Vec::new();
        words
            .extend_from_slice(&[0, PROCESS_REQUEST, tag, value_bytes, value_bytes])
            .map_err(|_| MailboxError::Malformed)?;
        words
            .extend_from_slice(values)
            .map_err(|_| MailboxError::Malformed)?;
        words.push(END_TAG).map_err(|_| MailboxError::Malformed)?;
        words[0] = (words.len() * 4) as u32;
        Ok(Self { words })
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn words_mut(&mut self) -> &mut [u32] {
        &mut self.words
    }

    pub fn response_code(&self) -> u32 {
        self.words[1]
    }

    /// First response value
    pub fn value(&self) -> u32 {
        self.words[VALUE_INDEX]
    }
}

/// Send one tag and return its first response value
pub fn exchange<M: MailboxTransport>(
    mailbox: &mut M,
    tag: u32,
    values: &[u32],
) -> Result<u32, AllocError> {
    let mut message = PropertyMessage::new(tag, values)?;
    mailbox.property(message.words_mut())?;
    if message.response_code() == RESPONSE_ERROR {
        return Err(AllocError::Rejected { tag });
    }
    Ok(message.value())
}

/// Locked, mapped GPU memory
pub struct MemoryBlock<W: RegisterMap> {
    handle: u32,
    bus_address: u32,
    window: W,
    size: usize,
}

impl<W: RegisterMap> MemoryBlock<W> {
    pub fn handle(&self) -> u32 {
        self.handle
    }

    /// Bus address of the first byte
    pub fn bus_address(&self) -> u32 {
        self.bus_address
    }

    /// Bus address of the byte at `offset`
    pub fn bus_address_at(&self, offset: usize) -> u32 {
        self.bus_address + offset as u32
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn window(&self) -> &W {
        &self.window
    }

    pub fn window_mut(&mut self) -> &mut W {
        &mut self.window
    }

    /// Bus address for a pointer into the mapped block
    ///
    /// Returns `None` for pointers outside the block.
    pub fn virtual_to_bus_address(&self, ptr: *const u8) -> Option<u32> {
        let base = self.window.base_ptr() as usize;
        let addr = ptr as usize;
        if addr < base || addr >= base + self.size {
            return None;
        }
        Some(self.bus_address_at(addr - base))
    }
}

/// Allocates and releases GPU memory blocks
pub struct MailboxAllocator<M: MailboxTransport> {
    mailbox: M,
    flags: MemFlags,
    alias_mask: u32,
}

impl<M: MailboxTransport> MailboxAllocator<M> {
    pub fn new(mailbox: M, flags: MemFlags, alias_mask: u32) -> Self {
        Self {
            mailbox,
            flags,
            alias_mask,
        }
    }

    pub fn flags(&self) -> MemFlags {
        self.flags
    }

    pub fn mem_alloc(&mut self, size: usize, alignment: usize) -> Result<u32, AllocError> {
        let (Ok(size_word), Ok(alignment_word)) = (u32::try_from(size), u32::try_from(alignment))
        else {
            return Err(AllocError::NoHandle { size });
        };
        let handle = exchange(
            &mut self.mailbox,
            TAG_ALLOCATE_MEMORY,
            &[size_word, alignment_word, self.flags.bits()],
        )?;
        if handle == 0 {
            return Err(AllocError::NoHandle { size });
        }
        Ok(handle)
    }

    pub fn mem_lock(&mut self, handle: u32) -> Result<u32, AllocError> {
        let bus = exchange(&mut self.mailbox, TAG_LOCK_MEMORY, &[handle])?;
        if bus == u32::MAX {
            return Err(AllocError::LockFailed { handle });
        }
        Ok(bus)
    }

    pub fn mem_unlock(&mut self, handle: u32) -> Result<(), AllocError> {
        self.status_call(TAG_UNLOCK_MEMORY, handle)
    }

    pub fn mem_free(&mut self, handle: u32) -> Result<(), AllocError> {
        self.status_call(TAG_RELEASE_MEMORY, handle)
    }

    fn status_call(&mut self, tag: u32, handle: u32) -> Result<(), AllocError> {
        match exchange(&mut self.mailbox, tag, &[handle])? {
            0 => Ok(()),
            status => Err(AllocError::ReleaseFailed {
                tag,
                handle,
                status,
            }),
        }
    }

    /// Allocate, lock and map `size` bytes
    ///
    /// Partial acquisitions are rolled back on failure.
    pub fn allocate<P: MemoryMapper>(
        &mut self,
        mapper: &mut P,
        size: usize,
        alignment: usize,
    ) -> Result<MemoryBlock<P::Window>, AllocError> {
        let handle = self.mem_alloc(size, alignment)?;

        let bus_address = match self.mem_lock(handle) {
            Ok(bus) => bus,
            Err(err) => {
                self.rollback_free(handle);
                return Err(err);
            }
        };

        let phys = (bus_address & !self.alias_mask) as u64;
        let window = match mapper.map_physical(phys, size) {
            Ok(window) => window,
            Err(err) => {
                if let Err(unlock_err) = self.mem_unlock(handle) {
                    warn!("unlock of handle {} failed during rollback: {}", handle, unlock_err);
                }
                self.rollback_free(handle);
                return Err(AllocError::Map(err));
            }
        };

        debug!(
            "allocated {} bytes: handle {} bus {:#010x} phys {:#x}",
            size, handle, bus_address, phys
        );
        Ok(MemoryBlock {
            handle,
            bus_address,
            window,
            size,
        })
    }

    fn rollback_free(&mut self, handle: u32) {
        if let Err(err) = self.mem_free(handle) {
            warn!("free of handle {} failed during rollback: {}", handle, err);
        }
    }

    /// Unmap, unlock and free `block`
    ///
    /// Every step is attempted; the first failure is returned.
    pub fn release<W: RegisterMap>(&mut self, block: MemoryBlock<W>) -> Result<(), AllocError> {
        let MemoryBlock { handle, window, .. } = block;
        drop(window);

        let unlocked = self.mem_unlock(handle);
        let freed = self.mem_free(handle);
        debug!("released handle {}", handle);
        unlocked.and(freed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPlatform;

    fn allocator(platform: &MockPlatform) -> MailboxAllocator<crate::mock::MockMailbox> {
        MailboxAllocator::new(platform.mailbox(), MemFlags::COHERENT, 0xC000_0000)
    }

    #[test]
    fn test_message_framing() {
        let message = PropertyMessage::new(TAG_ALLOCATE_MEMORY, &[4096, 4096, 0x4]).unwrap();
        assert_eq!(
            message.words(),
            &[36, 0, 0x3000C, 12, 12, 4096, 4096, 0x4, 0]
        );

        let message = PropertyMessage::new(TAG_LOCK_MEMORY, &[7]).unwrap();
        assert_eq!(message.words(), &[28, 0, 0x3000D, 4, 4, 7, 0]);
    }

    #[test]
    fn test_oversized_message_rejected() {
        let values = [0u32; 8];
        assert!(matches!(
            PropertyMessage::new(TAG_ALLOCATE_MEMORY, &values),
            Err(MailboxError::Malformed)
        ));
    }

    #[test]
    fn test_allocate_release_allocate() {
        let mut platform = MockPlatform::new();
        let mut alloc = allocator(&platform);

        let block = alloc.allocate(&mut platform, 4096, 4096).unwrap();
        assert_eq!(platform.live_handles(), 1);
        alloc.release(block).unwrap();
        assert_eq!(platform.live_handles(), 0);

        let block = alloc.allocate(&mut platform, 4096, 4096).unwrap();
        assert_eq!(platform.live_handles(), 1);
        alloc.release(block).unwrap();
        assert_eq!(platform.live_handles(), 0);
        assert_eq!(platform.locked_handles(), 0);
    }

    #[test]
    fn test_block_addresses() {
        let mut platform = MockPlatform::new();
        let mut alloc = allocator(&platform);
        let block = alloc.allocate(&mut platform, 4096, 4096).unwrap();

        let base = block.window().base_ptr() as *const u8;
        assert_eq!(block.virtual_to_bus_address(base), Some(block.bus_address()));
        assert_eq!(
            block.virtual_to_bus_address(base.wrapping_add(32)),
            Some(block.bus_address() + 32)
        );
        assert_eq!(block.virtual_to_bus_address(base.wrapping_add(4096)), None);
        assert_eq!(
            platform.mapped_physical(),
            vec![(block.bus_address() & !0xC000_0000) as u64]
        );
    }

    #[test]
    fn test_no_handle() {
        let mut platform = MockPlatform::new();
        platform.set_alloc_fails(true);
        let mut alloc = allocator(&platform);
        assert!(matches!(
            alloc.allocate(&mut platform, 4096, 4096),
            Err(AllocError::NoHandle { size: 4096 })
        ));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_size_beyond_firmware_range() {
        let platform = MockPlatform::new();
        let mut alloc = allocator(&platform);
        assert_eq!(
            alloc.mem_alloc(1 << 32, 4096),
            Err(AllocError::NoHandle { size: 1 << 32 })
        );
        assert!(platform.events().is_empty());
        assert_eq!(platform.live_handles(), 0);
    }

    #[test]
    fn test_lock_failure_frees_handle() {
        let mut platform = MockPlatform::new();
        platform.set_lock_fails(true);
        let mut alloc = allocator(&platform);
        assert!(matches!(
            alloc.allocate(&mut platform, 4096, 4096),
            Err(AllocError::LockFailed { .. })
        ));
        assert_eq!(platform.live_handles(), 0);
    }

    #[test]
    fn test_map_failure_rolls_back() {
        let mut platform = MockPlatform::new();
        platform.set_map_fails(true);
        let mut alloc = allocator(&platform);
        assert!(matches!(
            alloc.allocate(&mut platform, 4096, 4096),
            Err(AllocError::Map(_))
        ));
        assert_eq!(platform.live_handles(), 0);
        assert_eq!(platform.locked_handles(), 0);
    }

    #[test]
    fn test_rejected_tag() {
        let platform = MockPlatform::new();
        platform.set_reject_requests(true);
        let mut alloc = allocator(&platform);
        assert_eq!(
            alloc.mem_alloc(4096, 4096),
            Err(AllocError::Rejected { tag: TAG_ALLOCATE_MEMORY })
        );
    }

    #[test]
    fn test_release_unknown_handle_reports_status() {
        let platform = MockPlatform::new();
        let mut alloc = allocator(&platform);
        assert!(matches!(
            alloc.mem_free(99),
            Err(AllocError::ReleaseFailed { tag: TAG_RELEASE_MEMORY, handle: 99, .. })
        ));
    }
}
