//! GPU mailbox transport
//!
//! The VideoCore firmware answers "property" messages: a buffer of 32-bit
//! words that the transport hands to the firmware and that comes back
//! rewritten in place with the response. Framing and tag semantics live in
//! `cadence-core`; this trait only moves the buffer.

/// Errors from the mailbox transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MailboxError {
    /// Neither the mailbox device nor a fallback node could be opened
    #[error("cannot open mailbox device (errno {errno})")]
    Open { errno: i32 },
    /// The property request was rejected by the kernel driver
    #[error("mailbox property request failed (errno {errno})")]
    Request { errno: i32 },
    /// Message is too short to carry a header and end tag
    #[error("malformed mailbox message")]
    Malformed,
}

/// Channel to the GPU firmware's property interface
pub trait MailboxTransport {
    /// Submit `message` and wait for the firmware to rewrite it
    ///
    /// `message[0]` holds the total size in bytes. On return the buffer
    /// contains the firmware's response.
    fn property(&mut self, message: &mut [u32]) -> Result<(), MailboxError>;
}
