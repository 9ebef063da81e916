//! GPU mailbox over the VideoCore character device
//!
//! Property messages go to the firmware through one ioctl on `/dev/vcio`.
//! Kernels without that node still expose the driver as a character device
//! with major number 100; a temporary node is created for it and unlinked
//! as soon as it is open.

use std::ffi::CString;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use cadence_hal::{MailboxError, MailboxTransport};

use crate::window::errno;

/// Mailbox device on current kernels
pub const DEV_VCIO: &str = "/dev/vcio";
/// Character device major number of the mailbox driver
pub const MAJOR_NUM: u32 = 100;

/// `_IOWR(type, nr, size)` request encoding
const fn iowr(ty: u32, nr: u32, size: usize) -> u32 {
    (3 << 30) | ((size as u32 & 0x3FFF) << 16) | (ty << 8) | nr
}

/// `_IOWR(100, 0, char *)` for this target's pointer width
pub const IOCTL_MBOX_PROPERTY: u32 = iowr(MAJOR_NUM, 0, core::mem::size_of::<*mut libc::c_char>());

/// Mailbox transport over `/dev/vcio`
///
/// Either holds the device open for its lifetime or opens and closes it
/// around every request.
#[derive(Debug)]
pub struct VcioMailbox {
    device: Option<File>,
    fallback_dir: PathBuf,
}

impl VcioMailbox {
    /// Open the device once and keep it open
    pub fn open() -> Result<Self, MailboxError> {
        let mut mailbox = Self::per_call();
        mailbox.device = Some(mailbox.open_device()?);
        Ok(mailbox)
    }

    /// Open the device for every request
    pub fn per_call() -> Self {
        Self {
            device: None,
            fallback_dir: std::env::temp_dir(),
        }
    }

    /// Directory for the temporary fallback node
    pub fn with_fallback_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.fallback_dir = dir.into();
        self
    }

    /// Check if the device is held open between requests
    pub fn is_persistent(&self) -> bool {
        self.device.is_some()
    }

    fn open_device(&self) -> Result<File, MailboxError> {
        match File::open(DEV_VCIO) {
            Ok(file) => Ok(file),
            Err(err) => {
                debug!("{} unavailable ({}), creating a device node", DEV_VCIO, err);
                self.open_fallback()
            }
        }
    }

    fn fallback_path(&self) -> PathBuf {
        self.fallback_dir
            .join(format!("cadence-mailbox-{}", std::process::id()))
    }

    fn open_fallback(&self) -> Result<File, MailboxError> {
        let path = self.fallback_path();
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(MailboxError::Open { errno: errno(&err) }),
        }

        make_char_device(&path)?;
        let opened = OpenOptions::new().read(true).open(&path);
        if let Err(err) = fs::remove_file(&path) {
            warn!("cannot unlink {}: {}", path.display(), err);
        }
        opened.map_err(|err| MailboxError::Open { errno: errno(&err) })
    }
}

fn make_char_device(path: &Path) -> Result<(), MailboxError> {
    let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| MailboxError::Open {
        errno: libc::EINVAL,
    })?;
    // SAFETY: c_path is a valid NUL-terminated string for the duration of the call
    let ret = unsafe {
        libc::mknod(
            c_path.as_ptr(),
            libc::S_IFCHR | 0o600,
            libc::makedev(MAJOR_NUM, 0),
        )
    };
    if ret < 0 {
        let err = io::Error::last_os_error();
        warn!("cannot create mailbox node {}: {}", path.display(), err);
        return Err(MailboxError::Open { errno: errno(&err) });
    }
    Ok(())
}

fn property_ioctl(file: &File, message: &mut [u32]) -> Result<(), MailboxError> {
    // SAFETY: the driver reads message[0] bytes and rewrites them in place;
    // the caller guarantees message[0] matches the buffer length
    let ret = unsafe {
        libc::ioctl(
            file.as_raw_fd(),
            IOCTL_MBOX_PROPERTY as _,
            message.as_mut_ptr(),
        )
    };
    if ret < 0 {
        let err = io::Error::last_os_error();
        return Err(MailboxError::Request { errno: errno(&err) });
    }
    Ok(())
}

impl MailboxTransport for VcioMailbox {
    fn property(&mut self, message: &mut [u32]) -> Result<(), MailboxError> {
        if message.len() < 3 || message[0] as usize != message.len() * 4 {
            return Err(MailboxError::Malformed);
        }

        match &self.device {
            Some(file) => property_ioctl(file, message),
            None => {
                let file = self.open_device()?;
                property_ioctl(&file, message)
            }
        }
    }
}
