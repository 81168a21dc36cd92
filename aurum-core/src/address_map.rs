use crate::{address_range, AddressRange};
use std::cmp::Ordering;
use thiserror::Error;

/// Map of non-overlapping physical address ranges to values of type `T`.
///
/// Lookups are a binary search over the ranges, which are kept sorted by start address.
#[derive(Debug)]
pub struct AddressMap<T> {
    ordered_ranges: Vec<(AddressRange, T)>,
}

impl<T> Default for AddressMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> AddressMap<T> {
    /// Create new empty map.
    pub fn new() -> Self {
        Self {
            ordered_ranges: Vec::new(),
        }
    }

    /// Adds a new range, keeping the map ordered.
    pub fn insert(&mut self, range: AddressRange, value: T) -> Result<(), AddressMapError> {
        match self.search(range.start()) {
            Ok(_) => Err(AddressMapError::OverlappingAddressRanges(range)),
            Err(index) => {
                if let Some((next, _)) = self.ordered_ranges.get(index) {
                    if next.overlaps(range) {
                        return Err(AddressMapError::OverlappingAddressRanges(range));
                    }
                }
                self.ordered_ranges.insert(index, (range, value));
                Ok(())
            }
        }
    }

    /// Returns the address range that contains `address`.
    ///
    /// Note that even if `address` maps to a vacant region, that region's range will be returned.
    pub fn range(&self, address: u64) -> AddressRange {
        self.range_value(address).0
    }

    /// Returns the value that the address range containing `address` maps to, or `None` if that
    /// address range is vacant.
    pub fn value(&self, address: u64) -> Option<&T> {
        self.range_value(address).1
    }

    /// Returns the address range that contains `address`, and the value that it maps to.
    ///
    /// The second item will be `None` if `address` is in a vacant region.
    pub fn range_value(&self, address: u64) -> (AddressRange, Option<&T>) {
        match self.search(address) {
            Ok(index) => {
                let (range, value) = &self.ordered_ranges[index];
                (*range, Some(value))
            }
            Err(index) => (self.vacant_range(index), None),
        }
    }

    /// Mutable counterpart of [`range_value`](Self::range_value), without the vacant range.
    pub fn range_value_mut(&mut self, address: u64) -> Option<(AddressRange, &mut T)> {
        let index = self.search(address).ok()?;
        let (range, value) = &mut self.ordered_ranges[index];
        Some((*range, value))
    }

    pub fn iter(&self) -> impl Iterator<Item = (AddressRange, &T)> {
        self.ordered_ranges.iter().map(|(range, value)| (*range, value))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (AddressRange, &mut T)> {
        self.ordered_ranges
            .iter_mut()
            .map(|(range, value)| (*range, value))
    }

    fn search(&self, address: u64) -> Result<usize, usize> {
        self.ordered_ranges.binary_search_by(|(range, _)| {
            if address < range.start() {
                Ordering::Greater
            } else if address <= range.end() {
                Ordering::Equal
            } else {
                Ordering::Less
            }
        })
    }

    fn vacant_range(&self, index: usize) -> AddressRange {
        let start = index
            .checked_sub(1)
            .and_then(|i| self.ordered_ranges.get(i))
            // Cannot overflow: the range before a vacant address never ends at `u64::MAX`.
            .map(|(range, _)| range.end() + 1)
            .unwrap_or(0);
        let end = self
            .ordered_ranges
            .get(index)
            // Cannot underflow: the range after a vacant address never starts at `0`.
            .map(|(range, _)| range.start() - 1)
            .unwrap_or(u64::MAX);
        address_range![start, end]
    }
}

impl<T> TryFrom<Vec<(AddressRange, T)>> for AddressMap<T> {
    type Error = AddressMapError;

    fn try_from(mut value: Vec<(AddressRange, T)>) -> Result<Self, Self::Error> {
        value.sort_by_key(|(range, _)| range.start());

        let mut iter = value.iter();
        if let Some((mut prev_range, _)) = iter.next() {
            for &(range, _) in iter {
                if range.start() <= prev_range.end() {
                    return Err(AddressMapError::OverlappingAddressRanges(range));
                }
                prev_range = range;
            }
        }

        Ok(Self {
            ordered_ranges: value,
        })
    }
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum AddressMapError {
    /// Attempt to add an address range that overlaps with a previously added address range.
    #[error("address range {0} overlaps with previously added address range")]
    OverlappingAddressRanges(AddressRange),
}

#[macro_export]
macro_rules! addr_map {
    ($([$start:expr, $end:expr] => $value:expr,)*) => {
        $crate::address_map::AddressMap::try_from(vec![
            $(($crate::address_range![$start, $end], $value)),*
        ]).unwrap()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_value() {
        let map = addr_map! {
            [0x1000, 0x1FFF] => 'a',
            [0x8000_0000, 0x8FFF_FFFF] => 'b',
        };
        assert_eq!((address_range![0x1000, 0x1FFF], Some(&'a')), map.range_value(0x1234));
        assert_eq!(Some(&'b'), map.value(0x8000_0000));
        assert_eq!(
            (address_range![0x2000, 0x7FFF_FFFF], None),
            map.range_value(0x2000)
        );
        assert_eq!(address_range![0, 0xFFF], map.range(0));
        assert_eq!(address_range![0x9000_0000, u64::MAX], map.range(u64::MAX));
    }

    #[test]
    fn test_insert() {
        let mut map = AddressMap::new();
        map.insert(address_range![0x100, 0x1FF], 1).unwrap();
        map.insert(address_range![0x0, 0xFF], 0).unwrap();
        map.insert(address_range![0x300, 0x3FF], 3).unwrap();
        assert_eq!(
            Err(AddressMapError::OverlappingAddressRanges(address_range![0x1FF, 0x2FF])),
            map.insert(address_range![0x1FF, 0x2FF], 2)
        );
        assert_eq!(
            Err(AddressMapError::OverlappingAddressRanges(address_range![0x200, 0x300])),
            map.insert(address_range![0x200, 0x300], 2)
        );
        let values: Vec<_> = map.iter().map(|(_, value)| *value).collect();
        assert_eq!(vec![0, 1, 3], values);
    }

    #[test]
    fn test_range_value_mut() {
        let mut map = addr_map! {
            [0x10, 0x1F] => 0u32,
        };
        if let Some((_, value)) = map.range_value_mut(0x18) {
            *value = 7;
        }
        assert_eq!(Some(&7), map.value(0x10));
        assert!(map.range_value_mut(0x20).is_none());
    }
}
