//! Page alignment helpers
//!
//! Paged memory types (flash pages, EEPROM pages) can only be accessed in
//! whole pages. These helpers widen an arbitrary access to the smallest
//! page-aligned access that covers it.

/// Align an address down to the start of its page
///
/// A page size of zero or one leaves the address unchanged.
pub fn align_down(address: u32, page_size: u32) -> u32 {
    if page_size <= 1 {
        return address;
    }

    address - (address % page_size)
}

/// Round a byte count up to a whole number of pages
pub fn align_up(bytes: u32, page_size: u32) -> u32 {
    if page_size <= 1 {
        return bytes;
    }

    match bytes % page_size {
        0 => bytes,
        remainder => bytes + (page_size - remainder),
    }
}

/// A page-aligned access covering a requested range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignedAccess {
    /// First address of the aligned access
    pub start: u32,
    /// Number of bytes in the aligned access
    pub bytes: u32,
    /// Offset of the requested start within the aligned buffer
    pub offset: usize,
}

impl AlignedAccess {
    /// Compute the aligned access for `bytes` bytes starting at `start`
    pub fn new(start: u32, bytes: u32, page_size: u32) -> Self {
        let aligned_start = align_down(start, page_size);
        let offset = start - aligned_start;

        Self {
            start: aligned_start,
            bytes: align_up(bytes + offset, page_size),
            offset: offset as usize,
        }
    }

    /// Whether the access had to be widened
    pub fn is_widened(&self, start: u32, bytes: u32) -> bool {
        self.start != start || self.bytes != bytes
    }
}
