//! Register windows over memory device mappings
//!
//! A window maps a physical range through a memory device node and gives
//! volatile word access to it. The mapping is released when the window is
//! dropped or closed.

use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;

use log::debug;
use memmap2::{MmapOptions, MmapRaw};

use cadence_hal::register::check_index;
use cadence_hal::{DeviceError, RegisterMap};

/// GPIO-only device, usable without root
pub const DEV_GPIOMEM: &str = "/dev/gpiomem";
/// Full physical memory device
pub const DEV_MEM: &str = "/dev/mem";

/// A memory device node and the offset to map within it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemDevice {
    pub path: PathBuf,
    pub offset: u64,
}

impl MemDevice {
    pub fn new(path: impl Into<PathBuf>, offset: u64) -> Self {
        Self {
            path: path.into(),
            offset,
        }
    }
}

pub(crate) fn errno(err: &io::Error) -> i32 {
    err.raw_os_error().unwrap_or(libc::EIO)
}

/// Mapped physical range with volatile word access
pub struct RegisterWindow {
    map: MmapRaw,
    phys: u64,
    words: usize,
}

impl RegisterWindow {
    /// Map `len` bytes through the first candidate that opens and maps
    ///
    /// `phys` is the physical address the window represents; each candidate
    /// carries the offset to use within its own device.
    pub fn open(candidates: &[MemDevice], phys: u64, len: usize) -> Result<Self, DeviceError> {
        let mut last_error = DeviceError::Open {
            errno: libc::ENOENT,
        };
        for device in candidates {
            match Self::open_device(device, phys, len) {
                Ok(window) => return Ok(window),
                Err(err) => {
                    debug!("{} unusable for {:#x}: {}", device.path.display(), phys, err);
                    last_error = err;
                }
            }
        }
        Err(last_error)
    }

    fn open_device(device: &MemDevice, phys: u64, len: usize) -> Result<Self, DeviceError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(&device.path)
            .map_err(|err| DeviceError::Open { errno: errno(&err) })?;

        // memmap2 maps the enclosing pages when the offset is not page aligned
        let map = MmapOptions::new()
            .offset(device.offset)
            .len(len)
            .map_raw(&file)
            .map_err(|err| DeviceError::Map {
                phys,
                len,
                errno: errno(&err),
            })?;

        debug!(
            "mapped {:#x} bytes of physical {:#x} via {}",
            len,
            phys,
            device.path.display()
        );
        Ok(Self {
            map,
            phys,
            words: len / 4,
        })
    }

    /// Unmap the window
    pub fn close(self) {
        debug!("unmapping window at physical {:#x}", self.phys);
    }
}

impl RegisterMap for RegisterWindow {
    fn len(&self) -> usize {
        self.words
    }

    fn physical_address(&self) -> u64 {
        self.phys
    }

    fn base_ptr(&self) -> *const u32 {
        self.map.as_ptr() as *const u32
    }

    fn read(&self, index: usize) -> u32 {
        check_index(index, self.words);
        // SAFETY: index is checked against the mapping; offsets are word aligned
        unsafe { (self.map.as_ptr() as *const u32).add(index).read_volatile() }
    }

    fn write(&mut self, index: usize, value: u32) {
        check_index(index, self.words);
        // SAFETY: index is checked against the mapping; offsets are word aligned
        unsafe {
            (self.map.as_mut_ptr() as *mut u32)
                .add(index)
                .write_volatile(value)
        }
    }
}
