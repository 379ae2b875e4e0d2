//! Minor-frame lookup tables.
//!
//! A lookup table maps a minor frame index to the bytes of that minor frame an element reads.
//! They let an element pick sub-commutated bytes directly out of the minor frame where they
//! are carried, rather than waiting for the sub-commutation tracker to place them.
use std::collections::BTreeMap;

use serde::Serialize;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LutEntry {
    /// Position of the requested offset in the requested offset list.
    pub index: usize,
    /// Requested offset, in the logical frame for sub-commutated tables.
    pub offset: usize,
    /// Which of the group's columns carries the offset in this minor frame.
    pub column: Option<usize>,
    /// Minor-frame byte offset to read.
    pub byte_offset: usize,
}

/// Entries keyed by minor frame index.
pub type LutTable = BTreeMap<usize, Vec<LutEntry>>;

/// Table reading `offset` from every minor frame of the cycle.
#[must_use]
pub fn every_minor_frame(offset: usize, cycle_length: usize) -> LutTable {
    (0..cycle_length)
        .map(|i| {
            (
                i,
                vec![LutEntry {
                    index: 0,
                    offset,
                    column: None,
                    byte_offset: offset,
                }],
            )
        })
        .collect()
}

/// Table locating sub-commutated `offsets` in the minor frames that carry them.
///
/// `columns` are the minor-frame columns of a group whose logical frame is `length` bytes long.
/// Minor frame `i` carries the window of logical offsets starting at `i * columns.len()`
/// (modulo `length`), one per column.
///
/// # Errors
/// [Error::Config] if the group has no columns or is at least as wide as it is long.
pub fn subcom(
    offsets: &[usize],
    columns: &[usize],
    length: usize,
    cycle_length: usize,
) -> Result<LutTable> {
    let width = columns.len();
    if width == 0 || width >= length {
        return Err(Error::Config(format!(
            "cannot build lookup table for {width} columns over {length} bytes"
        )));
    }
    if let Some(o) = offsets.iter().find(|o| **o >= length) {
        return Err(Error::Config(format!(
            "offset {o} outside of {length} byte group"
        )));
    }

    let mut table = LutTable::new();
    let mut start = 0;
    for i in 0..cycle_length {
        let end = (start + width) % length;
        for (index, &offset) in offsets.iter().enumerate() {
            let inside = if start < end {
                offset >= start && offset < end
            } else {
                offset >= start || offset < end
            };
            if !inside {
                continue;
            }
            let column = (offset + length - start) % length;
            table.entry(i).or_default().push(LutEntry {
                index,
                offset,
                column: Some(column),
                byte_offset: columns[column],
            });
        }
        start = end;
    }
    Ok(table)
}

/// Merge tables, keeping the entries of each minor frame in table order.
#[must_use]
pub fn combine(tables: impl IntoIterator<Item = LutTable>) -> LutTable {
    let mut combined = LutTable::new();
    for table in tables {
        for (i, entries) in table {
            combined.entry(i).or_default().extend(entries);
        }
    }
    combined
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MissionConfig;

    #[test]
    fn subcom_table_locates_offsets() {
        let mission = MissionConfig::default();
        let ds = mission.group("DS").unwrap();
        let table = subcom(&[20, 63], &ds.columns, ds.length, 256).unwrap();

        // minor frame 1 covers offsets 17..34, offset 20 is the 4th column
        let entries = &table[&1];
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0],
            LutEntry {
                index: 0,
                offset: 20,
                column: Some(3),
                byte_offset: 23
            }
        );
        // minor frame 3 covers 51..64 and wraps to 0..4
        let entries = &table[&3];
        assert_eq!(entries[0].offset, 63);
        assert_eq!(entries[0].byte_offset, ds.columns[12]);
    }

    #[test]
    fn wrapping_window() {
        let table = subcom(&[0, 1, 5], &[10, 11, 12], 6, 4).unwrap();
        // windows: [0,3) [3,6) [0,3) [3,6)
        assert_eq!(table[&0].iter().map(|e| e.offset).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(table[&1].iter().map(|e| e.byte_offset).collect::<Vec<_>>(), vec![12]);

        let table = subcom(&[0, 3], &[10, 11, 12, 13], 6, 3).unwrap();
        // windows: [0,4) [4,6)+[0,2) [2,6)
        assert_eq!(table[&1].len(), 1);
        assert_eq!(table[&1][0].column, Some(2));
        assert_eq!(table[&2][0].offset, 3);
    }

    #[test]
    fn group_too_wide() {
        assert!(subcom(&[0], &[1, 2, 3], 3, 4).is_err());
        assert!(subcom(&[0], &[], 3, 4).is_err());
        assert!(subcom(&[9], &[1, 2], 6, 4).is_err());
    }

    #[test]
    fn combine_tables() {
        let a = every_minor_frame(85, 4);
        let b = subcom(&[0], &[10, 11], 4, 4).unwrap();
        let table = combine([a, b]);
        assert_eq!(table[&0].len(), 2);
        assert_eq!(table[&0][0].byte_offset, 85);
        assert_eq!(table[&0][1].byte_offset, 10);
        assert_eq!(table[&1].len(), 1);
    }
}
