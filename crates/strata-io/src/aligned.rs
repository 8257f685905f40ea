//! Aligned buffer for Direct I/O.
//!
//! With `O_DIRECT`, the buffer address, the transfer length and the file
//! offset must all be multiples of the block size the prober reported for the
//! directory. `AlignedBuffer` over-allocates a `Vec<u8>` and exposes the
//! aligned window inside it, so no custom allocator is involved.

/// A zero-initialized buffer whose data pointer is aligned to `alignment`.
///
/// The length is always a multiple of the alignment.
#[derive(Debug)]
pub struct AlignedBuffer {
    storage: Vec<u8>,
    start: usize,
    len: usize,
    alignment: usize,
}

impl AlignedBuffer {
    /// Creates a zeroed buffer of at least `len` bytes.
    ///
    /// The length is rounded up to the nearest multiple of `alignment`.
    ///
    /// # Panics
    ///
    /// Panics if `alignment` is not a power of two.
    pub fn zeroed(len: usize, alignment: usize) -> Self {
        assert!(
            alignment.is_power_of_two(),
            "alignment must be a power of two"
        );
        let len = round_up(len, alignment);
        let storage = vec![0u8; len + alignment];
        let start = storage.as_ptr().align_offset(alignment);
        debug_assert!(start < alignment);
        Self {
            storage,
            start,
            len,
            alignment,
        }
    }

    /// Creates an aligned buffer from existing data, padding to alignment.
    ///
    /// The buffer is padded with zeros to the next block boundary.
    pub fn from_data(data: &[u8], alignment: usize) -> Self {
        let mut buf = Self::zeroed(data.len(), alignment);
        buf.as_mut_slice()[..data.len()].copy_from_slice(data);
        buf
    }

    /// Returns the buffer contents as a slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.storage[self.start..self.start + self.len]
    }

    /// Returns the buffer contents as a mutable slice.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.storage[self.start..self.start + self.len]
    }

    /// Returns the (padded) length of the buffer.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Raw pointer to the aligned window, for kernel submissions.
    pub(crate) fn as_mut_ptr(&mut self) -> *mut u8 {
        self.as_mut_slice().as_mut_ptr()
    }
}

impl AsRef<[u8]> for AlignedBuffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsMut<[u8]> for AlignedBuffer {
    fn as_mut(&mut self) -> &mut [u8] {
        self.as_mut_slice()
    }
}

/// Rounds `value` up to the nearest multiple of `alignment`.
pub(crate) fn round_up(value: usize, alignment: usize) -> usize {
    debug_assert!(alignment > 0, "alignment must be positive");
    debug_assert!(
        alignment.is_power_of_two(),
        "alignment must be a power of two"
    );
    (value + alignment - 1) & !(alignment - 1)
}
