// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Capture Settings and Result Metadata
//!
//! Capture settings, capture results and static camera characteristics are all
//! carried as a [`CameraMetadata`] table: an ordered list of entries indexed by
//! a 32-bit tag, each holding `count` elements of one fixed-size type.
//!
//! | Type | Code | Element size |
//! |------|------|--------------|
//! | [`EntryType::Byte`] | 0 | 1 |
//! | [`EntryType::Int32`] | 1 | 4 |
//! | [`EntryType::Float`] | 2 | 4 |
//! | [`EntryType::Int64`] | 3 | 8 |
//! | [`EntryType::Double`] | 4 | 8 |
//! | [`EntryType::Rational`] | 5 | 8 |
//!
//! The adapter treats the content as opaque except for a handful of well known
//! tags (see [`tags`]) and the vendor tags registered by reprocessing effects.
//!
//! # Example
//!
//! ```
//! use camhal::metadata::{tags, CameraMetadata, EntryType};
//!
//! let mut md = CameraMetadata::new();
//! md.update(tags::ANDROID_REQUEST_PARTIAL_RESULT_COUNT, &[3i32])?;
//!
//! let entry = md.find(tags::ANDROID_REQUEST_PARTIAL_RESULT_COUNT).unwrap();
//! assert_eq!(entry.entry_type(), EntryType::Int32);
//! assert_eq!(entry.values::<i32>(), Some(vec![3]));
//! # Ok::<(), camhal::Error>(())
//! ```
//!
//! The wire form lives in [`codec`].

mod codec;
pub mod tags;

pub use codec::{
    deserialize, serialize, WireEntry, WireMetadata, MAX_DATA_CAPACITY, MAX_ENTRY_CAPACITY,
};

use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Element type of a metadata entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EntryType {
    Byte = 0,
    Int32 = 1,
    Float = 2,
    Int64 = 3,
    Double = 4,
    Rational = 5,
}

impl EntryType {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(EntryType::Byte),
            1 => Some(EntryType::Int32),
            2 => Some(EntryType::Float),
            3 => Some(EntryType::Int64),
            4 => Some(EntryType::Double),
            5 => Some(EntryType::Rational),
            _ => None,
        }
    }

    /// Size in bytes of one element.
    pub fn size(self) -> usize {
        match self {
            EntryType::Byte => 1,
            EntryType::Int32 | EntryType::Float => 4,
            EntryType::Int64 | EntryType::Double | EntryType::Rational => 8,
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EntryType::Byte => write!(f, "byte"),
            EntryType::Int32 => write!(f, "int32"),
            EntryType::Float => write!(f, "float"),
            EntryType::Int64 => write!(f, "int64"),
            EntryType::Double => write!(f, "double"),
            EntryType::Rational => write!(f, "rational"),
        }
    }
}

/// Signed fraction stored by [`EntryType::Rational`] entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rational {
    pub numerator: i32,
    pub denominator: i32,
}

/// A Rust type that can be stored in a metadata entry.
pub trait MetadataValue: Sized + Copy {
    const TYPE: EntryType;

    fn write_le(&self, out: &mut Vec<u8>);

    /// `bytes` is exactly `Self::TYPE.size()` long.
    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_metadata_value {
    ($ty:ty, $entry:expr, $n:expr) => {
        impl MetadataValue for $ty {
            const TYPE: EntryType = $entry;

            fn write_le(&self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn read_le(bytes: &[u8]) -> Self {
                let mut raw = [0u8; $n];
                raw.copy_from_slice(&bytes[..$n]);
                <$ty>::from_le_bytes(raw)
            }
        }
    };
}

impl_metadata_value!(u8, EntryType::Byte, 1);
impl_metadata_value!(i32, EntryType::Int32, 4);
impl_metadata_value!(f32, EntryType::Float, 4);
impl_metadata_value!(i64, EntryType::Int64, 8);
impl_metadata_value!(f64, EntryType::Double, 8);

impl MetadataValue for Rational {
    const TYPE: EntryType = EntryType::Rational;

    fn write_le(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.numerator.to_le_bytes());
        out.extend_from_slice(&self.denominator.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Self {
        Rational {
            numerator: i32::read_le(&bytes[0..4]),
            denominator: i32::read_le(&bytes[4..8]),
        }
    }
}

/// One tag of a [`CameraMetadata`] table.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataEntry {
    tag: u32,
    entry_type: EntryType,
    count: usize,
    data: Vec<u8>,
}

impl MetadataEntry {
    pub fn tag(&self) -> u32 {
        self.tag
    }

    pub fn entry_type(&self) -> EntryType {
        self.entry_type
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Raw little-endian element bytes, `count × size_of(type)` long.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Decodes the elements as `T`, `None` when the entry holds another type.
    pub fn values<T: MetadataValue>(&self) -> Option<Vec<T>> {
        if T::TYPE != self.entry_type {
            return None;
        }
        Some(
            self.data
                .chunks_exact(self.entry_type.size())
                .map(T::read_le)
                .collect(),
        )
    }

    /// First element as `T`.
    pub fn first<T: MetadataValue>(&self) -> Option<T> {
        if T::TYPE != self.entry_type || self.count == 0 {
            return None;
        }
        Some(T::read_le(&self.data[..self.entry_type.size()]))
    }
}

/// Bytes an entry of `len` payload bytes takes in the out-of-line data area.
/// Payloads of four bytes or less are stored inline in the entry itself.
pub(crate) fn data_size(len: usize) -> usize {
    if len <= 4 {
        0
    } else {
        (len + 7) & !7
    }
}

/// Ordered, tag-indexed table of typed entries.
///
/// A table created with [`CameraMetadata::new`] grows on demand. A table
/// created with [`CameraMetadata::with_capacity`] is bounded: inserts fail with
/// [`Error::Codec`] once the entry or data capacity is exhausted.
#[derive(Debug, Clone, Default)]
pub struct CameraMetadata {
    entries: Vec<MetadataEntry>,
    entry_capacity: usize,
    data_capacity: usize,
    data_count: usize,
    bounded: bool,
}

impl CameraMetadata {
    pub fn new() -> Self {
        CameraMetadata::default()
    }

    /// The capacities are limits only; storage grows as entries are added.
    pub fn with_capacity(entry_capacity: usize, data_capacity: usize) -> Self {
        CameraMetadata {
            entries: Vec::new(),
            entry_capacity,
            data_capacity,
            data_count: 0,
            bounded: true,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry_capacity(&self) -> usize {
        self.entry_capacity
    }

    pub fn data_capacity(&self) -> usize {
        self.data_capacity
    }

    /// Out-of-line payload bytes in use.
    pub fn data_count(&self) -> usize {
        self.data_count
    }

    pub fn entries(&self) -> impl Iterator<Item = &MetadataEntry> {
        self.entries.iter()
    }

    pub fn find(&self, tag: u32) -> Option<&MetadataEntry> {
        self.entries.iter().find(|e| e.tag == tag)
    }

    pub fn contains(&self, tag: u32) -> bool {
        self.find(tag).is_some()
    }

    /// Sets `tag` to `values`, replacing any previous entry in place.
    pub fn update<T: MetadataValue>(&mut self, tag: u32, values: &[T]) -> Result<(), Error> {
        let mut data = Vec::with_capacity(values.len() * T::TYPE.size());
        for v in values {
            v.write_le(&mut data);
        }
        self.update_raw(tag, T::TYPE, values.len(), data)
    }

    /// Sets `tag` from raw little-endian element bytes.
    pub fn update_raw(
        &mut self,
        tag: u32,
        entry_type: EntryType,
        count: usize,
        data: Vec<u8>,
    ) -> Result<(), Error> {
        if data.len() != count * entry_type.size() {
            return Err(Error::Codec(format!(
                "tag {:#x}: {} bytes do not hold {} {} elements",
                tag,
                data.len(),
                count,
                entry_type
            )));
        }

        let position = self.entries.iter().position(|e| e.tag == tag);
        let released = position
            .map(|i| data_size(self.entries[i].data.len()))
            .unwrap_or(0);
        let needed_entries = self.entries.len() + usize::from(position.is_none());
        let needed_data = self.data_count - released + data_size(data.len());

        if self.bounded {
            if needed_entries > self.entry_capacity {
                return Err(Error::Codec(format!(
                    "tag {:#x}: entry capacity {} exhausted",
                    tag, self.entry_capacity
                )));
            }
            if needed_data > self.data_capacity {
                return Err(Error::Codec(format!(
                    "tag {:#x}: data capacity {} exhausted",
                    tag, self.data_capacity
                )));
            }
        } else {
            self.entry_capacity = self.entry_capacity.max(needed_entries);
            self.data_capacity = self.data_capacity.max(needed_data);
        }

        let entry = MetadataEntry {
            tag,
            entry_type,
            count,
            data,
        };
        match position {
            Some(i) => self.entries[i] = entry,
            None => self.entries.push(entry),
        }
        self.data_count = needed_data;
        Ok(())
    }

    /// Removes `tag`, returning whether it was present.
    pub fn erase(&mut self, tag: u32) -> bool {
        match self.entries.iter().position(|e| e.tag == tag) {
            Some(i) => {
                let entry = self.entries.remove(i);
                self.data_count -= data_size(entry.data.len());
                true
            }
            None => false,
        }
    }

    /// Copies every entry of `other` into this table; entries of `other` win
    /// over existing entries with the same tag.
    pub fn append(&mut self, other: &CameraMetadata) -> Result<(), Error> {
        for entry in &other.entries {
            self.update_raw(
                entry.tag,
                entry.entry_type,
                entry.count,
                entry.data.clone(),
            )?;
        }
        Ok(())
    }

    /// Whether both tables hold the same tags with identical type, count and bytes.
    pub fn same_entries(&self, other: &CameraMetadata) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .all(|e| other.find(e.tag).is_some_and(|o| o == e))
    }
}
