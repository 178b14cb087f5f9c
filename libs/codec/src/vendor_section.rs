//! Vendor bit-vector sections
//!
//! Vendor consents, vendor legitimate interests and disclosed vendors share
//! one layout: `MaxVendorId(16) IsRangeEncoding(1)` followed either by a
//! bitfield of `MaxVendorId` bits or by a list of single IDs and ranges.
//! The encoder emits whichever form is shorter, preferring the bitfield on
//! ties so output is stable.
//!
//! Decoded IDs are kept as merged runs and never expanded here, so a string
//! listing thousands of overlapping `1..65535` ranges costs one run.

use crate::bits::{BitReader, BitWriter};
use crate::constants::{MAX_VENDOR_ID_BITS, NUM_ENTRIES_BITS, VENDOR_ID_BITS};
use crate::error::{CodecResult, DecodeError, DecodeResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Sorted, non-overlapping, non-adjacent inclusive runs of vendor IDs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorRanges(Vec<(u32, u32)>);

impl VendorRanges {
    /// Normalise runs in any order, merging overlapping and touching ones
    pub fn from_runs(mut runs: Vec<(u32, u32)>) -> Self {
        runs.retain(|(start, end)| start <= end);
        runs.sort_unstable();
        let mut merged: Vec<(u32, u32)> = Vec::with_capacity(runs.len());
        for (start, end) in runs {
            match merged.last_mut() {
                Some((_, last_end)) if start <= last_end.saturating_add(1) => {
                    *last_end = (*last_end).max(end);
                }
                _ => merged.push((start, end)),
            }
        }
        Self(merged)
    }

    pub fn contains(&self, id: u32) -> bool {
        let after = self.0.partition_point(|(start, _)| *start <= id);
        after > 0 && self.0[after - 1].1 >= id
    }

    pub fn runs(&self) -> &[(u32, u32)] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of IDs covered
    pub fn id_count(&self) -> u64 {
        self.0
            .iter()
            .map(|(start, end)| u64::from(end - start) + 1)
            .sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().flat_map(|&(start, end)| start..=end)
    }
}

/// Decoded section: the declared maximum and the set IDs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VendorSection {
    pub max_vendor_id: u32,
    pub ids: VendorRanges,
}

/// Collapse sorted IDs into inclusive runs
pub(crate) fn to_ranges(ids: &BTreeSet<u32>) -> Vec<(u32, u32)> {
    let mut ranges: Vec<(u32, u32)> = Vec::new();
    for &id in ids {
        match ranges.last_mut() {
            Some((_, end)) if *end + 1 == id => *end = id,
            _ => ranges.push((id, id)),
        }
    }
    ranges
}

fn range_entries_bits(ranges: &[(u32, u32)]) -> usize {
    ranges
        .iter()
        .map(|(start, end)| {
            let ids = if start == end { 1 } else { 2 };
            1 + ids * VENDOR_ID_BITS as usize
        })
        .sum()
}

pub(crate) fn write_range_entries(
    writer: &mut BitWriter,
    field: &'static str,
    ranges: &[(u32, u32)],
) -> CodecResult<()> {
    writer.write(field, ranges.len() as u64, NUM_ENTRIES_BITS)?;
    for &(start, end) in ranges {
        let is_range = start != end;
        writer.write_bool(is_range);
        writer.write(field, u64::from(start), VENDOR_ID_BITS)?;
        if is_range {
            writer.write(field, u64::from(end), VENDOR_ID_BITS)?;
        }
    }
    Ok(())
}

/// Read an entry list, dropping IDs above `limit`
pub(crate) fn read_range_entries(
    reader: &mut BitReader<'_>,
    field: &'static str,
    limit: u32,
) -> DecodeResult<VendorRanges> {
    let count = reader.read(field, NUM_ENTRIES_BITS)?;
    let mut runs = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let is_range = reader.read_bool(field)?;
        let start = reader.read(field, VENDOR_ID_BITS)? as u32;
        let end = if is_range {
            reader.read(field, VENDOR_ID_BITS)? as u32
        } else {
            start
        };
        if end < start {
            return Err(DecodeError::InvalidRange { field, start, end });
        }
        if start <= limit {
            runs.push((start, end.min(limit)));
        }
    }
    Ok(VendorRanges::from_runs(runs))
}

pub fn write_vendor_section(
    writer: &mut BitWriter,
    field: &'static str,
    ids: &BTreeSet<u32>,
) -> CodecResult<()> {
    let max_vendor_id = ids.iter().next_back().copied().unwrap_or(0);
    writer.write(field, u64::from(max_vendor_id), MAX_VENDOR_ID_BITS)?;

    let ranges = to_ranges(ids);
    let bitfield_bits = max_vendor_id as usize;
    let range_bits = NUM_ENTRIES_BITS as usize + range_entries_bits(&ranges);

    if range_bits < bitfield_bits {
        writer.write_bool(true);
        write_range_entries(writer, field, &ranges)
    } else {
        writer.write_bool(false);
        for id in 1..=max_vendor_id {
            writer.write_bool(ids.contains(&id));
        }
        Ok(())
    }
}

pub fn read_vendor_section(
    reader: &mut BitReader<'_>,
    field: &'static str,
) -> DecodeResult<VendorSection> {
    let max_vendor_id = reader.read(field, MAX_VENDOR_ID_BITS)? as u32;
    let is_range = reader.read_bool(field)?;

    let ids = if is_range {
        read_range_entries(reader, field, max_vendor_id)?
    } else {
        let mut runs: Vec<(u32, u32)> = Vec::new();
        for id in 1..=max_vendor_id {
            if !reader.read_bool(field)? {
                continue;
            }
            match runs.last_mut() {
                Some((_, end)) if *end + 1 == id => *end = id,
                _ => runs.push((id, id)),
            }
        }
        VendorRanges(runs)
    };

    Ok(VendorSection { max_vendor_id, ids })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(ids: &[u32]) -> (usize, VendorSection) {
        let set: BTreeSet<u32> = ids.iter().copied().collect();
        let mut writer = BitWriter::new();
        write_vendor_section(&mut writer, "vendors", &set).unwrap();
        let bits = writer.bit_len();
        let bytes = writer.into_bytes();
        let section = read_vendor_section(&mut BitReader::new(&bytes), "vendors").unwrap();
        (bits, section)
    }

    #[test]
    fn test_ranges_collapse_consecutive_ids() {
        let ids: BTreeSet<u32> = [1, 2, 3, 7, 9, 10].into_iter().collect();
        assert_eq!(to_ranges(&ids), vec![(1, 3), (7, 7), (9, 10)]);
    }

    #[test]
    fn test_dense_ids_use_bitfield() {
        let (bits, section) = round_trip(&[1, 2, 4, 5, 8]);
        assert_eq!(bits, 16 + 1 + 8);
        assert_eq!(section.max_vendor_id, 8);
        assert_eq!(section.ids.id_count(), 5);
        assert_eq!(section.ids.runs(), &[(1, 2), (4, 5), (8, 8)]);
    }

    #[test]
    fn test_sparse_high_ids_use_ranges() {
        let (bits, section) = round_trip(&[2000, 2001, 2002]);
        assert_eq!(bits, 16 + 1 + 12 + 1 + 16 + 16);
        assert_eq!(section.ids.iter().collect::<Vec<_>>(), vec![2000, 2001, 2002]);
    }

    #[test]
    fn test_runs_merge_and_answer_membership() {
        let ranges = VendorRanges::from_runs(vec![(10, 20), (1, 3), (4, 4), (15, 30), (40, 40)]);
        assert_eq!(ranges.runs(), &[(1, 4), (10, 30), (40, 40)]);
        assert!(ranges.contains(1) && ranges.contains(4) && ranges.contains(30));
        assert!(!ranges.contains(0) && !ranges.contains(5) && !ranges.contains(41));
        assert_eq!(ranges.id_count(), 4 + 21 + 1);
    }

    #[test]
    fn test_overlapping_entries_collapse_and_clamp_to_limit() {
        let mut writer = BitWriter::new();
        let entries = vec![(1, 65_535); 900];
        write_range_entries(&mut writer, "vendors", &entries).unwrap();
        write_range_entries(&mut writer, "vendors", &[(500, 900), (1200, 1300)]).unwrap();
        let bytes = writer.into_bytes();
        let mut reader = BitReader::new(&bytes);

        let wide = read_range_entries(&mut reader, "vendors", 65_535).unwrap();
        assert_eq!(wide.runs(), &[(1, 65_535)]);

        let clamped = read_range_entries(&mut reader, "vendors", 1000).unwrap();
        assert_eq!(clamped.runs(), &[(500, 900)]);
    }

    #[test]
    fn test_reversed_range_is_rejected() {
        let mut writer = BitWriter::new();
        write_range_entries(&mut writer, "vendors", &[(9, 3)]).unwrap();
        let bytes = writer.into_bytes();
        let err = read_range_entries(&mut BitReader::new(&bytes), "vendors", 100).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidRange { start: 9, end: 3, .. }));
    }

    #[test]
    fn test_empty_section() {
        let (bits, section) = round_trip(&[]);
        assert_eq!(bits, 17);
        assert_eq!(section, VendorSection::default());
    }
}
