use std::collections::Bound;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::ops::{Range, RangeBounds, RangeInclusive};
use thiserror::Error;

/// A non-empty range in the 64-bit physical address space, bounded inclusively below and above.
///
/// Enforces the invariant that `self.start() <= self.end()`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct AddressRange {
    start: u64,
    end: u64,
}

impl Display for AddressRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}, {:#x}]", self.start, self.end)
    }
}

impl AddressRange {
    pub fn new(start: u64, end: u64) -> Result<Self, InvalidBoundsError> {
        (start <= end)
            .then_some(Self { start, end })
            .ok_or(InvalidBoundsError { start, end })
    }

    /// Creates the range `[base, base + size - 1]`.
    ///
    /// Fails if `size` is zero or if the range would run past the end of the address space.
    pub fn with_size(base: u64, size: u64) -> Result<Self, InvalidBoundsError> {
        let end = size
            .checked_sub(1)
            .and_then(|delta| base.checked_add(delta))
            .ok_or(InvalidBoundsError {
                start: base,
                end: base.wrapping_add(size),
            })?;
        Self::new(base, end)
    }

    pub fn start(self) -> u64 {
        self.start
    }

    pub fn end(self) -> u64 {
        self.end
    }

    /// Check if an address is contained within this address range.
    pub fn contains(self, address: u64) -> bool {
        self.start <= address && address <= self.end
    }

    /// Check if the `size` bytes starting at `address` all fall within this range.
    pub fn contains_span(self, address: u64, size: u64) -> bool {
        match size.checked_sub(1).and_then(|delta| address.checked_add(delta)) {
            Some(last) => self.contains(address) && last <= self.end,
            None => size == 0 && self.contains(address),
        }
    }

    /// Returns `true` if the two ranges share at least one address.
    pub fn overlaps(self, other: Self) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Returns `self.end() - self.start()`, which is the size minus 1.
    pub fn delta(self) -> u64 {
        self.end - self.start
    }

    /// Returns the size of this address range if it is representable by a `usize`, or `None`
    /// otherwise.
    pub fn size(self) -> Option<usize> {
        usize::try_from(self.delta())
            .ok()
            .and_then(|n| n.checked_add(1))
    }
}

impl TryFrom<RangeInclusive<u64>> for AddressRange {
    type Error = InvalidBoundsError;

    fn try_from(value: RangeInclusive<u64>) -> Result<Self, Self::Error> {
        Self::new(*value.start(), *value.end())
    }
}

impl TryFrom<Range<u64>> for AddressRange {
    type Error = InvalidBoundsError;

    fn try_from(value: Range<u64>) -> Result<Self, Self::Error> {
        match value.end.checked_sub(1) {
            Some(end) => Self::new(value.start, end),
            None => Err(InvalidBoundsError {
                start: value.start,
                end: value.end,
            }),
        }
    }
}

impl From<AddressRange> for RangeInclusive<u64> {
    fn from(value: AddressRange) -> Self {
        value.start..=value.end
    }
}

impl RangeBounds<u64> for AddressRange {
    fn start_bound(&self) -> Bound<&u64> {
        Bound::Included(&self.start)
    }

    fn end_bound(&self) -> Bound<&u64> {
        Bound::Included(&self.end)
    }
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
#[error("bounds [{start:#x}, {end:#x}] do not form a valid physical address range")]
pub struct InvalidBoundsError {
    start: u64,
    end: u64,
}

#[macro_export]
macro_rules! address_range {
    ($start:expr, $end:expr) => {
        $crate::address_range::AddressRange::new($start, $end).unwrap()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_size() {
        let range = AddressRange::with_size(0x8000_0000, 0x1000).unwrap();
        assert_eq!(0x8000_0000, range.start());
        assert_eq!(0x8000_0FFF, range.end());
        assert_eq!(Some(0x1000), range.size());
        assert!(AddressRange::with_size(0x1000, 0).is_err());
        assert!(AddressRange::with_size(u64::MAX, 2).is_err());
    }

    #[test]
    fn test_contains_span() {
        let range = address_range!(0x100, 0x1FF);
        assert!(range.contains_span(0x100, 8));
        assert!(range.contains_span(0x1F8, 8));
        assert!(!range.contains_span(0x1F9, 8));
        assert!(!range.contains_span(0xFF, 2));
    }

    #[test]
    fn test_overlaps() {
        let a = address_range!(0x100, 0x1FF);
        assert!(a.overlaps(address_range!(0x1FF, 0x2FF)));
        assert!(!a.overlaps(address_range!(0x200, 0x2FF)));
        assert!(a.overlaps(address_range!(0x0, 0x100)));
    }

    #[test]
    fn test_try_from_range() {
        assert_eq!(
            address_range!(0x10, 0x1F),
            AddressRange::try_from(0x10..0x20).unwrap()
        );
        assert!(AddressRange::try_from(0..0).is_err());
    }
}
