// Free-space bookkeeping and fit search over physical ranges

use alloc::vec::Vec;

use super::types::{MemoryKind, MemoryRange, Region};

pub fn align_up(value: u64, alignment: u64) -> Option<u64> {
    if alignment <= 1 {
        return Some(value);
    }
    value
        .checked_add(alignment - 1)
        .map(|v| v & !(alignment - 1))
}

pub fn align_down(value: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        return value;
    }
    value & !(alignment - 1)
}

pub fn is_aligned(value: u64, alignment: u64) -> bool {
    alignment <= 1 || value & (alignment - 1) == 0
}

/// Sort and coalesce overlapping or touching regions.
pub fn merge(mut regions: Vec<Region>) -> Vec<Region> {
    regions.retain(|r| !r.is_empty());
    regions.sort();

    let mut merged: Vec<Region> = Vec::with_capacity(regions.len());
    for region in regions {
        match merged.last_mut() {
            Some(last) if region.start <= last.end() => {
                let end = last.end().max(region.end());
                *last = Region::from_bounds(last.start, end);
            }
            _ => merged.push(region),
        }
    }
    merged
}

/// Punch `hole` out of every region.
pub fn subtract(regions: &[Region], hole: Region) -> Vec<Region> {
    let mut out = Vec::with_capacity(regions.len() + 1);
    for region in regions {
        if !region.overlaps(&hole) {
            out.push(*region);
            continue;
        }
        if hole.start > region.start {
            out.push(Region::from_bounds(region.start, hole.start));
        }
        if hole.end() < region.end() {
            out.push(Region::from_bounds(hole.end(), region.end()));
        }
    }
    out
}

/// Free RAM: the union of usable ranges minus everything the map marks
/// as anything else. Firmware maps do overlap in the wild.
pub fn usable_regions(map: &[MemoryRange]) -> Vec<Region> {
    let usable = map
        .iter()
        .filter(|r| r.kind == MemoryKind::Usable)
        .map(MemoryRange::region)
        .collect();

    map.iter()
        .filter(|r| r.kind != MemoryKind::Usable)
        .fold(merge(usable), |free, r| subtract(&free, r.region()))
}

/// Lowest `alignment`-aligned start in `[min, max_end)` with `size` bytes free.
/// `free` must be sorted and disjoint.
pub fn find_lowest(free: &[Region], size: u64, alignment: u64, min: u64, max_end: u64) -> Option<u64> {
    free.iter().find_map(|region| {
        let start = align_up(region.start.max(min), alignment)?;
        let end = start.checked_add(size)?;
        (end <= region.end().min(max_end)).then_some(start)
    })
}

/// Highest `alignment`-aligned start in `[min, max_end)` with `size` bytes free.
/// `free` must be sorted and disjoint.
pub fn find_highest(free: &[Region], size: u64, alignment: u64, min: u64, max_end: u64) -> Option<u64> {
    free.iter().rev().find_map(|region| {
        let top = region.end().min(max_end);
        let start = align_down(top.checked_sub(size)?, alignment);
        (start >= region.start.max(min)).then_some(start)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_functions() {
        assert_eq!(align_up(0, 4096), Some(0));
        assert_eq!(align_up(1, 4096), Some(4096));
        assert_eq!(align_up(4096, 4096), Some(4096));
        assert_eq!(align_up(u64::MAX, 4096), None);
        assert_eq!(align_down(4097, 4096), 4096);
        assert!(is_aligned(0x20_0000, 0x20_0000));
        assert!(!is_aligned(0x10_0000, 0x20_0000));
    }

    #[test]
    fn test_merge_and_subtract() {
        let merged = merge(vec![
            Region::from_bounds(0x3000, 0x4000),
            Region::from_bounds(0x1000, 0x2000),
            Region::from_bounds(0x2000, 0x2800),
            Region::new(0x9000, 0),
        ]);
        assert_eq!(
            merged,
            vec![
                Region::from_bounds(0x1000, 0x2800),
                Region::from_bounds(0x3000, 0x4000),
            ]
        );

        let split = subtract(&merged, Region::from_bounds(0x1800, 0x3800));
        assert_eq!(
            split,
            vec![
                Region::from_bounds(0x1000, 0x1800),
                Region::from_bounds(0x3800, 0x4000),
            ]
        );
    }

    #[test]
    fn test_reserved_punches_usable() {
        let map = [
            MemoryRange::usable(0, 0x10_0000),
            MemoryRange::new(0xa_0000, 0x6_0000, MemoryKind::Reserved),
            MemoryRange::usable(0x8_0000, 0x1000),
        ];
        assert_eq!(usable_regions(&map), vec![Region::from_bounds(0, 0xa_0000)]);
    }

    #[test]
    fn test_find_lowest_respects_alignment_and_floor() {
        let free = [
            Region::from_bounds(0x1000, 0x3000),
            Region::from_bounds(0x10_0000, 0x1000_0000),
        ];
        assert_eq!(find_lowest(&free, 0x1000, 0x1000, 0, u64::MAX), Some(0x1000));
        assert_eq!(find_lowest(&free, 0x4000, 0x1000, 0, u64::MAX), Some(0x10_0000));
        assert_eq!(
            find_lowest(&free, 0x1000, 0x20_0000, 0x10_0000, u64::MAX),
            Some(0x20_0000)
        );
        assert_eq!(find_lowest(&free, 0x1000, 0x1000, 0, 0x1800), None);
    }

    #[test]
    fn test_find_highest_stays_under_ceiling() {
        let free = [
            Region::from_bounds(0x1000, 0x3000),
            Region::from_bounds(0x10_0000, 0x1000_0000),
        ];
        assert_eq!(
            find_highest(&free, 0x1800, 0x1000, 0, u64::MAX),
            Some(0x0fff_e000)
        );
        assert_eq!(
            find_highest(&free, 0x1000, 0x1000, 0, 0x3800_0000),
            Some(0x0fff_f000)
        );
        assert_eq!(find_highest(&free, 0x1000, 0x1000, 0, 0x10_0000), Some(0x2000));
        assert_eq!(find_highest(&free, 0x1000, 0x1000, 0x3000, 0x10_0000), None);
    }
}
