// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! An ordered map of non-overlapping address ranges.
//!
//! [`RangeMap`] stores `[base, base + size)` ranges, each carrying a value,
//! keyed internally by the *high* address of the range. Point lookup is a
//! single ordered-map probe: find the lowest stored high address at or above
//! the query, then check that the query is not below that range's base.
//!
//! The address type is generic so that the same map serves file-format
//! readers (`u64` module and memory tables) and symbol tables. Sizes that
//! would wrap the address type are rejected, which for signed address types
//! means sizes that appear negative are rejected too.

use num_traits::{CheckedAdd, PrimInt};
use std::collections::BTreeMap;

#[derive(Clone, Debug)]
struct Entry<A, V> {
    base: A,
    value: V,
}

/// An ordered interval store with point lookup.
#[derive(Clone, Debug)]
pub struct RangeMap<A, V> {
    /// Keyed by the high address (`base + size - 1`) of each range.
    map: BTreeMap<A, Entry<A, V>>,
}

impl<A, V> Default for RangeMap<A, V> {
    fn default() -> RangeMap<A, V> {
        RangeMap {
            map: BTreeMap::new(),
        }
    }
}

impl<A: PrimInt + CheckedAdd, V> RangeMap<A, V> {
    pub fn new() -> RangeMap<A, V> {
        RangeMap {
            map: BTreeMap::new(),
        }
    }

    /// Store `value` for the range `[base, base + size)`.
    ///
    /// Returns `false` and leaves the map unchanged if `size` is not
    /// positive, if `base + size - 1` overflows the address type, or if the
    /// new range would overlap a stored range. Edge-to-edge neighbors are
    /// fine.
    pub fn store_range(&mut self, base: A, size: A, value: V) -> bool {
        if size <= A::zero() {
            return false;
        }
        let high = match base.checked_add(&(size - A::one())) {
            Some(high) => high,
            None => return false,
        };
        // The only candidate for overlap is the stored range with the lowest
        // high address at or above the new base. It conflicts unless it
        // begins entirely above the new range.
        if let Some((_, entry)) = self.map.range(base..).next() {
            if entry.base <= high {
                return false;
            }
        }
        self.map.insert(high, Entry { base, value });
        true
    }

    /// Look up the value whose range contains `address`.
    pub fn retrieve_range(&self, address: A) -> Option<&V> {
        let (_, entry) = self.map.range(address..).next()?;
        if entry.base <= address {
            Some(&entry.value)
        } else {
            None
        }
    }

    /// Like [`retrieve_range`](Self::retrieve_range), also yielding the
    /// containing range as `(base, high)`.
    pub fn retrieve_range_with_bounds(&self, address: A) -> Option<(A, A, &V)> {
        let (&high, entry) = self.map.range(address..).next()?;
        if entry.base <= address {
            Some((entry.base, high, &entry.value))
        } else {
            None
        }
    }

    /// Remove all stored ranges.
    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::RangeMap;

    /// One store/retrieve case: base, size, id, whether the store should
    /// succeed.
    struct RangeTest {
        address: i32,
        size: i32,
        id: i32,
        expect_storable: bool,
    }

    const T: bool = true;
    const F: bool = false;

    fn run_store(map: &mut RangeMap<i32, i32>, test: &RangeTest) {
        let stored = map.store_range(test.address, test.size, test.id);
        assert_eq!(
            stored, test.expect_storable,
            "store_range id {}: expected {}, observed {}",
            test.id, test.expect_storable, stored
        );
    }

    fn run_retrieve(map: &RangeMap<i32, i32>, test: &RangeTest) {
        // Check around both the base address and the high address to guard
        // against off-by-one errors; a size-1 range has no interior to poke.
        for side in 0..2 {
            let (low_offset, high_offset) = if test.size == 1 {
                if side == 0 {
                    (-1, 0)
                } else {
                    (0, 1)
                }
            } else {
                (-1, 1)
            };
            for offset in low_offset..=high_offset {
                let target = if side == 0 {
                    test.address
                } else {
                    test.address + test.size - 1
                };
                let address = match target.checked_add(offset) {
                    Some(address) => address,
                    None => continue,
                };
                let expected = if !test.expect_storable {
                    false
                } else if offset == 0 {
                    true
                } else if offset == -1 {
                    side == 1
                } else {
                    side == 0
                };
                let observed = map.retrieve_range(address) == Some(&test.id);
                assert_eq!(
                    observed, expected,
                    "retrieve_range id {} side {} offset {}",
                    test.id, side, offset
                );
            }
        }
    }

    fn run_set(map: &mut RangeMap<i32, i32>, tests: &[RangeTest]) {
        for test in tests {
            run_store(map, test);
        }
        for test in tests {
            run_retrieve(map, test);
        }
        map.clear();
        assert!(map.is_empty());
    }

    #[test]
    fn test_store_and_retrieve() {
        #[rustfmt::skip]
        let tests = [
            RangeTest { address: i32::min_value(), size: 16,      id: 1,  expect_storable: T }, // lowest possible range
            RangeTest { address: -2,               size: 5,       id: 2,  expect_storable: T }, // a range through zero
            RangeTest { address: i32::max_value() - 9, size: 11,  id: 3,  expect_storable: F }, // overflows the key type
            RangeTest { address: i32::max_value() - 9, size: 10,  id: 4,  expect_storable: T }, // highest possible range
            RangeTest { address: 5,                size: 0,       id: 5,  expect_storable: F }, // empty
            RangeTest { address: 5,                size: 1,       id: 6,  expect_storable: T }, // smallest possible range
            RangeTest { address: -20,              size: 15,      id: 7,  expect_storable: T }, // entirely negative

            RangeTest { address: 10,               size: 10,      id: 10, expect_storable: T }, // blocks the following
            RangeTest { address: 9,                size: 10,      id: 11, expect_storable: F },
            RangeTest { address: 9,                size: 11,      id: 12, expect_storable: F },
            RangeTest { address: 9,                size: 12,      id: 13, expect_storable: F }, // completely contains existing
            RangeTest { address: 10,               size: 9,       id: 14, expect_storable: F },
            RangeTest { address: 10,               size: 10,      id: 15, expect_storable: F }, // exact duplicate
            RangeTest { address: 10,               size: 11,      id: 16, expect_storable: F },
            RangeTest { address: 11,               size: 8,       id: 17, expect_storable: F }, // contained within
            RangeTest { address: 11,               size: 9,       id: 18, expect_storable: F },
            RangeTest { address: 11,               size: 10,      id: 19, expect_storable: F },
            RangeTest { address: 9,                size: 2,       id: 20, expect_storable: F }, // overlaps bottom by one
            RangeTest { address: 10,               size: 1,       id: 21, expect_storable: F },
            RangeTest { address: 19,               size: 1,       id: 22, expect_storable: F },
            RangeTest { address: 19,               size: 2,       id: 23, expect_storable: F }, // overlaps top by one

            RangeTest { address: 9,                size: 1,       id: 24, expect_storable: T }, // directly below, no overlap
            RangeTest { address: 20,               size: 1,       id: 25, expect_storable: T }, // directly above, no overlap

            RangeTest { address: 6,                size: 3,       id: 26, expect_storable: T }, // exactly fills a gap
            RangeTest { address: 7,                size: 3,       id: 27, expect_storable: F }, // spans two ranges
            RangeTest { address: 7,                size: 5,       id: 28, expect_storable: F }, // spans three ranges
            RangeTest { address: 4,                size: 20,      id: 29, expect_storable: F }, // contains several ranges

            RangeTest { address: 30,               size: 50,      id: 30, expect_storable: T },
            RangeTest { address: 90,               size: 25,      id: 31, expect_storable: T },
            RangeTest { address: 35,               size: 65,      id: 32, expect_storable: F }, // spans two noncontiguous
            RangeTest { address: 120,              size: 10000,   id: 33, expect_storable: T },
            RangeTest { address: 20000,            size: 20000,   id: 34, expect_storable: T },
            RangeTest { address: 0x10001,          size: 0x10001, id: 35, expect_storable: T },

            RangeTest { address: 27,               size: -1,      id: 36, expect_storable: F }, // negative size
        ];
        let mut map = RangeMap::new();
        run_set(&mut map, &tests);
        // A cleared map accepts the same sequence again.
        run_set(&mut map, &tests);
    }

    #[test]
    fn test_fill_space() {
        // Filling the whole signed space takes three stores: sizes that
        // appear negative are rejected, so no single range can cover more
        // than half of it.
        #[rustfmt::skip]
        let tests = [
            RangeTest { address: i32::min_value(), size: i32::max_value(), id: 50, expect_storable: T },
            RangeTest { address: -1,               size: 2,                id: 51, expect_storable: T },
            RangeTest { address: 1,                size: i32::max_value(), id: 52, expect_storable: T },
            RangeTest { address: i32::min_value(), size: i32::max_value(), id: 53, expect_storable: F },
            RangeTest { address: -1,               size: 2,                id: 54, expect_storable: F },
            RangeTest { address: 1,                size: i32::max_value(), id: 55, expect_storable: F },
            RangeTest { address: -3,               size: 6,                id: 56, expect_storable: F },
        ];
        let mut map = RangeMap::new();
        run_set(&mut map, &tests);
    }

    #[test]
    fn test_extremities() {
        // Probe the extremities of the key space without anything stored
        // there; size 0 forces the retrieve checks without a store.
        #[rustfmt::skip]
        let tests = [
            RangeTest { address: i32::min_value(), size: 0, id: 100, expect_storable: F },
            RangeTest { address: -1,               size: 3, id: 101, expect_storable: T },
            RangeTest { address: i32::max_value(), size: 0, id: 102, expect_storable: F },
        ];
        let mut map = RangeMap::new();
        run_set(&mut map, &tests);

        #[rustfmt::skip]
        let tests = [
            RangeTest { address: i32::min_value() + 1, size: 1, id: 110, expect_storable: T },
            RangeTest { address: i32::max_value() - 1, size: 1, id: 111, expect_storable: T },
            RangeTest { address: i32::min_value(),     size: 0, id: 112, expect_storable: F },
            RangeTest { address: i32::max_value(),     size: 0, id: 113, expect_storable: F },
        ];
        let mut map = RangeMap::new();
        run_set(&mut map, &tests);
    }

    #[test]
    fn test_unsigned_boundaries() {
        let mut map = RangeMap::new();
        assert!(map.store_range(10u64, 10, 'a'));
        assert!(map.store_range(20u64, 1, 'b'));
        assert_eq!(map.retrieve_range(9), None);
        assert_eq!(map.retrieve_range(10), Some(&'a'));
        assert_eq!(map.retrieve_range(19), Some(&'a'));
        assert_eq!(map.retrieve_range(20), Some(&'b'));
        assert_eq!(map.retrieve_range(21), None);
        // Overlapping both stored ranges.
        assert!(!map.store_range(19, 2, 'c'));
        assert_eq!(map.len(), 2);

        // Wrap of base + size in u64 is rejected too.
        assert!(!map.store_range(u64::max_value() - 1, 3, 'd'));

        let (base, high, value) = map.retrieve_range_with_bounds(15).unwrap();
        assert_eq!((base, high, *value), (10, 19, 'a'));
    }
}
