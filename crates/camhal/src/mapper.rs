// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::{buffer::BufferHandle, format::HalPixelFormat, fourcc::FourCC, Error};

/// Parameters of a buffer allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationDescriptor {
    pub buffer_id: u64,
    pub width: u32,
    pub height: u32,
    pub format: HalPixelFormat,
    pub usage: u64,
}

/// CPU copy of a buffer's planes.
///
/// `data` holds the buffer as laid out in memory. Plane `i` starts at
/// `offsets[i]` and its rows are `strides[i]` bytes apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedImage {
    pub width: u32,
    pub height: u32,
    pub drm_format: FourCC,
    pub strides: Vec<u32>,
    pub offsets: Vec<u32>,
    pub data: Vec<u8>,
}

impl MappedImage {
    /// Bytes of plane `index` from its offset to the end of the image.
    pub fn plane(&self, index: usize) -> Option<&[u8]> {
        let offset = *self.offsets.get(index)? as usize;
        self.data.get(offset..)
    }

    pub fn plane_mut(&mut self, index: usize) -> Option<&mut [u8]> {
        let offset = *self.offsets.get(index)? as usize;
        self.data.get_mut(offset..)
    }
}

/// The graphics buffer allocator and mapper.
///
/// Allocation and CPU mapping of buffers is owned by the platform. The adapter
/// only needs it for scratch buffers and software reprocessing.
pub trait BufferMapper: Send + Sync {
    fn allocate(&self, descriptor: &AllocationDescriptor) -> Result<BufferHandle, Error>;

    fn read(&self, buffer: &BufferHandle) -> Result<MappedImage, Error>;

    fn write(&self, buffer: &BufferHandle, image: &MappedImage) -> Result<(), Error>;
}
