//! Register window abstraction
//!
//! A register window is an exclusively owned mapping of a physical address
//! range, accessed as 32-bit words by index. Peripheral blocks (GPIO, PWM,
//! clock manager, DMA) and mailbox-allocated memory are both exposed this way.

/// Indexed 32-bit register access over a mapped physical range
///
/// Indices are in words, not bytes: index `n` addresses `base + n * 4`.
/// Implementations must perform volatile accesses and must panic on an
/// index outside the mapping (see [`check_index`]); an out-of-range index
/// is a programming error, never a runtime condition.
pub trait RegisterMap {
    /// Number of 32-bit words in the window
    fn len(&self) -> usize;

    /// Check if the window maps nothing
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Physical address of word 0
    fn physical_address(&self) -> u64;

    /// Process-virtual address of word 0
    ///
    /// Used for translating pointers into bus addresses; never dereferenced
    /// by callers.
    fn base_ptr(&self) -> *const u32;

    /// Read the word at `index`
    fn read(&self, index: usize) -> u32;

    /// Write `value` to the word at `index`
    fn write(&mut self, index: usize, value: u32);

    /// Read-modify-write the word at `index`
    fn modify<F: FnOnce(u32) -> u32>(&mut self, index: usize, f: F) {
        let value = self.read(index);
        self.write(index, f(value));
    }

    /// Set `bits` in the word at `index`
    fn set_bits(&mut self, index: usize, bits: u32) {
        self.modify(index, |v| v | bits);
    }

    /// Clear `bits` in the word at `index`
    fn clear_bits(&mut self, index: usize, bits: u32) {
        self.modify(index, |v| v & !bits);
    }

    /// Write consecutive words starting at `start`
    fn write_words(&mut self, start: usize, words: &[u32]) {
        for (offset, word) in words.iter().enumerate() {
            self.write(start + offset, *word);
        }
    }

    /// Set every word in the window to `value`
    fn fill(&mut self, value: u32) {
        for index in 0..self.len() {
            self.write(index, value);
        }
    }
}

/// Panic unless `index` addresses a word inside a window of `len` words
#[track_caller]
#[inline]
pub fn check_index(index: usize, len: usize) {
    assert!(
        index < len,
        "register index {} out of range for window of {} words",
        index,
        len
    );
}
