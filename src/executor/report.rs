//! Volume Group Capacity Report
//!
//! Parses the colon-delimited output of `vgdisplay -c`. Field layout (see the
//! vgdisplay manpage), zero-based:
//!
//! ```text
//! 0  name                      9  max physical volumes
//! 1  access                    10 current physical volumes
//! 2  status                    11 actual physical volumes / size in KiB
//! 3  internal number           12 physical extent size (KiB)
//! 4  max logical volumes       13 total physical extents
//! 5  current logical volumes   14 allocated physical extents
//! 6  open logical volumes      15 free physical extents
//! 7  max logical volume size   16 uuid
//! 8  max physical volumes
//! ```

use crate::error::{Error, Result};

/// Minimum number of fields in a well-formed report line
pub const VGDISPLAY_MIN_FIELDS: usize = 17;

pub const VGDISPLAY_SIZE_KB: usize = 11;
pub const VGDISPLAY_PHYSICAL_EXTENT_SIZE: usize = 12;
pub const VGDISPLAY_TOTAL_NUMBER_EXTENTS: usize = 13;
pub const VGDISPLAY_ALLOCATED_NUMBER_EXTENTS: usize = 14;
pub const VGDISPLAY_FREE_NUMBER_EXTENTS: usize = 15;

/// Extent figures pulled from one report line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VgCapacity {
    /// Physical extent size in KiB
    pub extent_size: u64,
    /// Number of unallocated extents
    pub free_extents: u64,
}

impl VgCapacity {
    /// Parse a single `vgdisplay -c` line
    pub fn parse(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.trim().split(':').collect();
        if fields.len() < VGDISPLAY_MIN_FIELDS {
            return Err(Error::MalformedReport {
                fields: fields.len(),
                expected: VGDISPLAY_MIN_FIELDS,
            });
        }

        let extent_size = parse_field(&fields, VGDISPLAY_PHYSICAL_EXTENT_SIZE, "extent_size")?;
        let free_extents = parse_field(&fields, VGDISPLAY_FREE_NUMBER_EXTENTS, "free_extents")?;

        Ok(Self {
            extent_size,
            free_extents,
        })
    }

    /// Free space in KiB
    pub fn free_kb(&self) -> Result<u64> {
        self.free_extents
            .checked_mul(self.extent_size)
            .ok_or_else(|| {
                Error::Internal(format!(
                    "free capacity overflows: {} extents of {} KiB",
                    self.free_extents, self.extent_size
                ))
            })
    }
}

fn parse_field(fields: &[&str], index: usize, name: &'static str) -> Result<u64> {
    let value = fields[index];
    value.parse::<u64>().map_err(|source| Error::NumericParse {
        field: name,
        value: value.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const SAMPLE: &str =
        "sampleVg:r/w:772:-1:0:0:0:-1:0:4:4:2097135616:4096:511996:0:511996:rJ0bIG-3XNc-NoS0-fkKm-batK-dFyX-xbxHym";

    #[test]
    fn test_parse_sample() {
        let cap = VgCapacity::parse(SAMPLE).unwrap();
        assert_eq!(cap.extent_size, 4096);
        assert_eq!(cap.free_extents, 511996);
        assert_eq!(cap.free_kb().unwrap(), 2_097_135_616);
    }

    #[test]
    fn test_free_matches_size_field_for_empty_group() {
        let fields: Vec<&str> = SAMPLE.split(':').collect();
        let size_kb: u64 = fields[VGDISPLAY_SIZE_KB].parse().unwrap();
        let cap = VgCapacity::parse(SAMPLE).unwrap();
        assert_eq!(cap.free_kb().unwrap(), size_kb);
    }

    #[test]
    fn test_leading_whitespace_is_ignored() {
        let line = format!("  {}\n", SAMPLE);
        let cap = VgCapacity::parse(&line).unwrap();
        assert_eq!(cap.free_extents, 511996);
    }

    #[test]
    fn test_partially_allocated_group() {
        let line = "vg_abc:r/w:772:-1:0:1:1:-1:0:1:1:409600:4096:100:25:75:uuid";
        let cap = VgCapacity::parse(line).unwrap();
        assert_eq!(cap.free_kb().unwrap(), 75 * 4096);
    }

    #[test]
    fn test_too_few_fields() {
        let line = "sampleVg:r/w:772:-1:0:0:0:-1:0:4:4:2097135616:4096:511996:0:511996";
        assert_matches!(
            VgCapacity::parse(line),
            Err(Error::MalformedReport { fields: 16, expected: 17 })
        );
        assert_matches!(VgCapacity::parse(""), Err(Error::MalformedReport { fields: 1, .. }));
    }

    #[test]
    fn test_bad_extent_size() {
        let line = "vg:r/w:772:-1:0:0:0:-1:0:4:4:2097135616:4k:511996:0:511996:id";
        assert_matches!(
            VgCapacity::parse(line),
            Err(Error::NumericParse { field: "extent_size", .. })
        );
    }

    #[test]
    fn test_negative_free_extents() {
        let line = "vg:r/w:772:-1:0:0:0:-1:0:4:4:2097135616:4096:511996:0:-1:id";
        assert_matches!(
            VgCapacity::parse(line),
            Err(Error::NumericParse { field: "free_extents", ref value, .. }) if value == "-1"
        );
    }

    #[test]
    fn test_overflow_is_reported() {
        let line = format!(
            "vg:r/w:772:-1:0:0:0:-1:0:4:4:0:{}:1:0:{}:id",
            u64::MAX,
            2
        );
        let cap = VgCapacity::parse(&line).unwrap();
        assert_matches!(cap.free_kb(), Err(Error::Internal(_)));
    }
}
