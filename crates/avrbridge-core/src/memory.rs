//! Target memory model
//!
//! Memory is described per logical region. Each region has an inclusive
//! address range and a set of access flags. Descriptors are built once from
//! the target description file and never change during a session.

use bitflags::bitflags;

use crate::error::{Error, Result};

/// Logical memory type of a target region
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MemoryType {
    /// Program memory
    Flash,
    /// Data memory (SRAM, including mapped IO and the register file)
    Ram,
    /// Data EEPROM
    Eeprom,
    /// Fuse bytes
    Fuses,
    /// Anything else
    Other,
}

impl MemoryType {
    /// Short lowercase name, used in logs and CLI output
    pub fn name(&self) -> &'static str {
        match self {
            Self::Flash => "flash",
            Self::Ram => "ram",
            Self::Eeprom => "eeprom",
            Self::Fuses => "fuses",
            Self::Other => "other",
        }
    }
}

impl core::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// Inclusive address range over the 32-bit target address space
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MemoryAddressRange {
    /// First address in the range
    pub start: u32,
    /// Last address in the range (inclusive)
    pub end: u32,
}

impl MemoryAddressRange {
    /// Create a new range, rejecting `start > end`
    pub fn new(start: u32, end: u32) -> Result<Self> {
        if start > end {
            return Err(Error::InvalidRange);
        }
        Ok(Self { start, end })
    }

    /// Create a range from a start address and a size in bytes
    pub fn from_start_and_size(start: u32, size: u32) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidRange);
        }
        let end = start
            .checked_add(size - 1)
            .ok_or(Error::AddressOutOfBounds)?;
        Ok(Self { start, end })
    }

    /// Number of bytes covered by the range
    pub fn size(&self) -> u32 {
        self.end - self.start + 1
    }

    /// Check if an address lies within the range
    pub fn contains(&self, address: u32) -> bool {
        address >= self.start && address <= self.end
    }

    /// Check if another range lies entirely within this one
    pub fn contains_range(&self, other: &MemoryAddressRange) -> bool {
        other.start >= self.start && other.end <= self.end
    }

    /// Check if two ranges share at least one address
    pub fn intersects(&self, other: &MemoryAddressRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// The overlapping part of two ranges, if any
    pub fn intersection(&self, other: &MemoryAddressRange) -> Option<MemoryAddressRange> {
        if !self.intersects(other) {
            return None;
        }
        Some(MemoryAddressRange {
            start: self.start.max(other.start),
            end: self.end.min(other.end),
        })
    }

    /// Shift both ends of the range down by `offset`
    pub fn rebased(&self, offset: u32) -> Option<MemoryAddressRange> {
        Some(MemoryAddressRange {
            start: self.start.checked_sub(offset)?,
            end: self.end.checked_sub(offset)?,
        })
    }
}

impl core::fmt::Display for MemoryAddressRange {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "0x{:08X}..=0x{:08X}", self.start, self.end)
    }
}

bitflags! {
    /// Access permissions for a memory region
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MemoryAccess: u8 {
        /// Region can be read
        const READABLE = 1 << 0;
        /// Region can be written
        const WRITABLE = 1 << 1;
        /// Region can be written while a debug session is running
        const WRITABLE_DURING_SESSION = 1 << 2;
    }
}

/// Description of one logical memory region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryDescriptor {
    /// Logical type
    pub memory_type: MemoryType,
    /// Address range of the region
    pub address_range: MemoryAddressRange,
    /// Access permissions
    pub access: MemoryAccess,
    /// Page size for paged regions
    pub page_size: Option<u32>,
}

impl MemoryDescriptor {
    /// Size of the region in bytes
    pub fn size(&self) -> u32 {
        self.address_range.size()
    }

    /// Check that an access of `bytes` bytes at `start` fits in the region
    pub fn check_access(&self, start: u32, bytes: u32) -> Result<MemoryAddressRange> {
        let range = MemoryAddressRange::from_start_and_size(start, bytes)?;
        if !self.address_range.contains_range(&range) {
            return Err(Error::AddressOutOfBounds);
        }
        Ok(range)
    }
}

/// A contiguous buffer of target memory
pub type TargetMemoryBuffer = Vec<u8>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_rejects_inverted() {
        assert_eq!(MemoryAddressRange::new(10, 9), Err(Error::InvalidRange));
        assert!(MemoryAddressRange::new(10, 10).is_ok());
    }

    #[test]
    fn test_range_from_start_and_size() {
        let range = MemoryAddressRange::from_start_and_size(0x100, 0x80).unwrap();
        assert_eq!(range.start, 0x100);
        assert_eq!(range.end, 0x17F);
        assert_eq!(range.size(), 0x80);
        assert!(MemoryAddressRange::from_start_and_size(0x100, 0).is_err());
        assert!(MemoryAddressRange::from_start_and_size(u32::MAX, 2).is_err());
    }

    #[test]
    fn test_range_containment_and_intersection() {
        let a = MemoryAddressRange::new(0x100, 0x1FF).unwrap();
        let b = MemoryAddressRange::new(0x180, 0x27F).unwrap();
        let c = MemoryAddressRange::new(0x200, 0x2FF).unwrap();

        assert!(a.contains(0x100));
        assert!(a.contains(0x1FF));
        assert!(!a.contains(0x200));

        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        assert_eq!(
            a.intersection(&b),
            Some(MemoryAddressRange::new(0x180, 0x1FF).unwrap())
        );
        assert_eq!(a.intersection(&c), None);

        assert!(a.contains_range(&MemoryAddressRange::new(0x110, 0x120).unwrap()));
        assert!(!a.contains_range(&b));
    }

    #[test]
    fn test_descriptor_bounds_check() {
        let flash = MemoryDescriptor {
            memory_type: MemoryType::Flash,
            address_range: MemoryAddressRange::new(0, 0x7FFF).unwrap(),
            access: MemoryAccess::READABLE | MemoryAccess::WRITABLE,
            page_size: Some(128),
        };

        assert!(flash.check_access(0x7F00, 0x100).is_ok());
        assert_eq!(
            flash.check_access(0x7F00, 0x101),
            Err(Error::AddressOutOfBounds)
        );
    }
}
