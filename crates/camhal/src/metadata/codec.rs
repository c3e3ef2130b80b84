// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Wire form of [`CameraMetadata`].
//!
//! A serialized table keeps its capacities so the receiving side can allocate
//! an identically sized table, and lists every entry with its raw element
//! bytes. Type codes are carried as raw integers so a peer sending an unknown
//! type is rejected on decode instead of failing to parse.

use super::{data_size, CameraMetadata, EntryType};
use crate::Error;
use serde::{Deserialize, Serialize};

/// Fixed header footprint of a packed metadata table.
pub const HEADER_SIZE: usize = 48;

/// Footprint of one entry record in a packed metadata table.
pub const ENTRY_SIZE: usize = 16;

/// Largest entry capacity accepted from a peer.
pub const MAX_ENTRY_CAPACITY: u32 = 1 << 16;

/// Largest data capacity accepted from a peer.
pub const MAX_DATA_CAPACITY: u32 = 16 << 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEntry {
    pub index: u32,
    pub tag: u32,
    #[serde(rename = "type")]
    pub entry_type: u8,
    pub count: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WireMetadata {
    /// Packed size of the table including unused capacity.
    pub size: u32,
    pub entry_count: u32,
    pub entry_capacity: u32,
    pub data_count: u32,
    pub data_capacity: u32,
    pub entries: Vec<WireEntry>,
}

impl WireMetadata {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn to_u32(value: usize, what: &str) -> Result<u32, Error> {
    u32::try_from(value).map_err(|_| Error::Codec(format!("{} {} does not fit in u32", what, value)))
}

/// Packs `metadata` into its wire form.
pub fn serialize(metadata: &CameraMetadata) -> Result<WireMetadata, Error> {
    let mut entries = Vec::with_capacity(metadata.len());
    for (index, entry) in metadata.entries().enumerate() {
        let expected = entry.count() * entry.entry_type().size();
        if entry.data().len() != expected {
            return Err(Error::Codec(format!(
                "tag {:#x}: {} bytes for {} {} elements",
                entry.tag(),
                entry.data().len(),
                entry.count(),
                entry.entry_type()
            )));
        }
        entries.push(WireEntry {
            index: to_u32(index, "entry index")?,
            tag: entry.tag(),
            entry_type: entry.entry_type() as u8,
            count: to_u32(entry.count(), "element count")?,
            data: entry.data().to_vec(),
        });
    }

    let size = HEADER_SIZE + metadata.entry_capacity() * ENTRY_SIZE + metadata.data_capacity();
    Ok(WireMetadata {
        size: to_u32(size, "table size")?,
        entry_count: to_u32(metadata.len(), "entry count")?,
        entry_capacity: to_u32(metadata.entry_capacity(), "entry capacity")?,
        data_count: to_u32(metadata.data_count(), "data count")?,
        data_capacity: to_u32(metadata.data_capacity(), "data capacity")?,
        entries,
    })
}

/// Rebuilds a bounded table sized by the wire capacities.
pub fn deserialize(wire: &WireMetadata) -> Result<CameraMetadata, Error> {
    if wire.entry_capacity > MAX_ENTRY_CAPACITY || wire.data_capacity > MAX_DATA_CAPACITY {
        return Err(Error::Codec(format!(
            "capacity {}/{} exceeds limit {}/{}",
            wire.entry_capacity, wire.data_capacity, MAX_ENTRY_CAPACITY, MAX_DATA_CAPACITY
        )));
    }
    if wire.entry_count as usize != wire.entries.len() {
        return Err(Error::Codec(format!(
            "entry count {} but {} entries present",
            wire.entry_count,
            wire.entries.len()
        )));
    }

    let needed_data: usize = wire.entries.iter().map(|e| data_size(e.data.len())).sum();
    if wire.entries.len() > wire.entry_capacity as usize
        || needed_data > wire.data_capacity as usize
    {
        return Err(Error::Codec(format!(
            "{} entries with {} data bytes exceed capacity {}/{}",
            wire.entries.len(),
            needed_data,
            wire.entry_capacity,
            wire.data_capacity
        )));
    }

    let mut metadata =
        CameraMetadata::with_capacity(wire.entry_capacity as usize, wire.data_capacity as usize);
    for entry in &wire.entries {
        let entry_type = EntryType::from_raw(entry.entry_type).ok_or_else(|| {
            Error::Codec(format!(
                "tag {:#x}: unknown entry type {}",
                entry.tag, entry.entry_type
            ))
        })?;
        metadata.update_raw(entry.tag, entry_type, entry.count as usize, entry.data.clone())?;
    }

    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{tags, Rational};
    use rand::Rng;

    fn random_table(rng: &mut impl Rng) -> CameraMetadata {
        let mut md = CameraMetadata::new();
        for i in 0..rng.random_range(1..40u32) {
            let tag = (rng.random_range(0..0x20u32) << 16) | i;
            let count = rng.random_range(1..9usize);
            let updated = match rng.random_range(0..6u8) {
                0 => md.update(tag, &(0..count).map(|_| rng.random()).collect::<Vec<u8>>()),
                1 => md.update(tag, &(0..count).map(|_| rng.random()).collect::<Vec<i32>>()),
                2 => md.update(tag, &(0..count).map(|_| rng.random()).collect::<Vec<f32>>()),
                3 => md.update(tag, &(0..count).map(|_| rng.random()).collect::<Vec<i64>>()),
                4 => md.update(tag, &(0..count).map(|_| rng.random()).collect::<Vec<f64>>()),
                _ => md.update(
                    tag,
                    &(0..count)
                        .map(|_| Rational {
                            numerator: rng.random(),
                            denominator: rng.random(),
                        })
                        .collect::<Vec<_>>(),
                ),
            };
            updated.unwrap();
        }
        md
    }

    #[test]
    fn test_round_trip_random_tables() {
        let mut rng = rand::rng();
        for _ in 0..64 {
            let md = random_table(&mut rng);
            let wire = serialize(&md).unwrap();
            assert_eq!(wire.entry_count as usize, md.len());
            let decoded = deserialize(&wire).unwrap();
            assert!(decoded.same_entries(&md));
            let order: Vec<u32> = decoded.entries().map(|e| e.tag()).collect();
            let expected: Vec<u32> = md.entries().map(|e| e.tag()).collect();
            assert_eq!(order, expected);
        }
    }

    #[test]
    fn test_wire_entry_layout() {
        let mut md = CameraMetadata::new();
        md.update(tags::ANDROID_REQUEST_PARTIAL_RESULT_COUNT, &[2i32])
            .unwrap();
        md.update(tags::ANDROID_SENSOR_TIMESTAMP, &[1_000_000i64, 2])
            .unwrap();

        let wire = serialize(&md).unwrap();
        assert_eq!(wire.entries[0].index, 0);
        assert_eq!(wire.entries[0].entry_type, EntryType::Int32 as u8);
        assert_eq!(wire.entries[0].data, 2i32.to_le_bytes().to_vec());
        assert_eq!(wire.entries[1].data.len(), 16);
        assert_eq!(wire.data_count, 16);
        assert_eq!(
            wire.size as usize,
            HEADER_SIZE + 2 * ENTRY_SIZE + wire.data_capacity as usize
        );
    }

    #[test]
    fn test_deserialize_rejects_unknown_type() {
        let mut md = CameraMetadata::new();
        md.update(1, &[1u8]).unwrap();
        let mut wire = serialize(&md).unwrap();
        wire.entries[0].entry_type = 9;
        assert!(matches!(deserialize(&wire), Err(Error::Codec(_))));
    }

    #[test]
    fn test_deserialize_rejects_exhausted_table() {
        let mut md = CameraMetadata::new();
        md.update(1, &[1i64, 2, 3]).unwrap();
        let mut wire = serialize(&md).unwrap();
        wire.data_capacity = 8;
        assert!(matches!(deserialize(&wire), Err(Error::Codec(_))));

        let mut wire = serialize(&md).unwrap();
        wire.entry_count = 2;
        assert!(matches!(deserialize(&wire), Err(Error::Codec(_))));
    }

    #[test]
    fn test_deserialize_rejects_oversized_capacity() {
        let wire = WireMetadata {
            entry_capacity: u32::MAX,
            ..WireMetadata::default()
        };
        assert!(matches!(deserialize(&wire), Err(Error::Codec(_))));

        let wire = WireMetadata {
            data_capacity: u32::MAX,
            ..WireMetadata::default()
        };
        assert!(matches!(deserialize(&wire), Err(Error::Codec(_))));

        let wire = WireMetadata {
            entry_capacity: MAX_ENTRY_CAPACITY,
            data_capacity: MAX_DATA_CAPACITY,
            ..WireMetadata::default()
        };
        let md = deserialize(&wire).unwrap();
        assert!(md.is_empty());
        assert_eq!(md.entry_capacity(), MAX_ENTRY_CAPACITY as usize);
    }

    #[test]
    fn test_deserialize_keeps_capacity() {
        let mut md = CameraMetadata::with_capacity(10, 256);
        md.update(1, &[1.5f64]).unwrap();
        let decoded = deserialize(&serialize(&md).unwrap()).unwrap();
        assert_eq!(decoded.entry_capacity(), 10);
        assert_eq!(decoded.data_capacity(), 256);
    }

    #[test]
    fn test_wire_json_transport() {
        let mut md = CameraMetadata::new();
        md.update(tags::ANDROID_LENS_FACING, &[1u8]).unwrap();
        let wire = serialize(&md).unwrap();
        let json = serde_json::to_string(&wire).unwrap();
        assert!(json.contains("\"type\":0"));
        let back: WireMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, wire);
    }
}
