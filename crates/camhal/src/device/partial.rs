// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::{metadata::CameraMetadata, Error};
use std::collections::HashMap;

/// Collects the partial result metadata of in-flight frames.
///
/// A frame is complete once the partial with index `partial_result_count`
/// arrived; its union is then handed out and forgotten.
#[derive(Debug)]
pub struct PartialResultAccumulator {
    partial_result_count: u32,
    pending: HashMap<u32, CameraMetadata>,
}

impl PartialResultAccumulator {
    /// `partial_result_count` below one is treated as one.
    pub fn new(partial_result_count: u32) -> Self {
        PartialResultAccumulator {
            partial_result_count: partial_result_count.max(1),
            pending: HashMap::new(),
        }
    }

    pub fn partial_result_count(&self) -> u32 {
        self.partial_result_count
    }

    /// Adds partial `index` of `frame_number`.
    ///
    /// Returns the union of all partials of the frame when `index` is the
    /// final one. Later partials win over earlier ones for the same tag.
    pub fn add(
        &mut self,
        frame_number: u32,
        index: u32,
        metadata: &CameraMetadata,
    ) -> Result<Option<CameraMetadata>, Error> {
        if index == 0 || index > self.partial_result_count {
            return Err(Error::invalid(format!(
                "frame {}: partial result {} outside 1..={}",
                frame_number, index, self.partial_result_count
            )));
        }

        let accumulated = self.pending.entry(frame_number).or_default();
        accumulated.append(metadata)?;

        if index == self.partial_result_count {
            Ok(self.pending.remove(&frame_number))
        } else {
            Ok(None)
        }
    }

    /// Whether any partial received so far for `frame_number` carries `tag`.
    pub fn is_metadata_key_available(&self, frame_number: u32, tag: u32) -> bool {
        self.pending
            .get(&frame_number)
            .is_some_and(|md| md.contains(tag))
    }

    /// Drops the partials of a frame that will not complete.
    ///
    /// Returns whether anything was pending for `frame_number`.
    pub fn discard(&mut self, frame_number: u32) -> bool {
        self.pending.remove(&frame_number).is_some()
    }

    /// Frames with partials received but not yet complete.
    pub fn pending_frames(&self) -> usize {
        self.pending.len()
    }
}
