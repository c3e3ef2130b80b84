// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::{metadata::EntryType, reprocess::ReprocessEffectManager, Error};
use std::sync::Arc;

/// Describes the vendor tags the adapter defines on top of the vendor modules.
///
/// Without reprocessing effects the set is empty.
#[derive(Clone, Default)]
pub struct VendorTagOps {
    effects: Option<Arc<ReprocessEffectManager>>,
}

impl VendorTagOps {
    pub fn new(effects: Option<Arc<ReprocessEffectManager>>) -> Self {
        VendorTagOps { effects }
    }

    pub fn tag_count(&self) -> usize {
        self.effects
            .as_ref()
            .map(|e| e.vendor_tags().count())
            .unwrap_or(0)
    }

    /// All tags in ascending order.
    pub fn all_tags(&self) -> Vec<u32> {
        self.effects
            .as_ref()
            .map(|e| e.vendor_tags().map(|t| t.tag).collect())
            .unwrap_or_default()
    }

    pub fn section_name(&self, tag: u32) -> Result<&'static str, Error> {
        self.effects
            .as_ref()
            .and_then(|e| e.section_name(tag))
            .ok_or_else(|| unknown(tag))
    }

    pub fn tag_name(&self, tag: u32) -> Result<String, Error> {
        self.effects
            .as_ref()
            .and_then(|e| e.vendor_tag(tag))
            .map(|t| t.name.clone())
            .ok_or_else(|| unknown(tag))
    }

    pub fn tag_type(&self, tag: u32) -> Result<EntryType, Error> {
        self.effects
            .as_ref()
            .and_then(|e| e.vendor_tag(tag))
            .map(|t| t.entry_type)
            .ok_or_else(|| unknown(tag))
    }
}

fn unknown(tag: u32) -> Error {
    Error::invalid(format!("unknown vendor tag {:#x}", tag))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        buffer::BufferHandle,
        mapper::{AllocationDescriptor, BufferMapper, MappedImage},
        metadata::tags::REPROCESS_EFFECT_VENDOR_TAG_START,
        reprocess::MonochromeEffect,
    };

    struct NoMapper;

    impl BufferMapper for NoMapper {
        fn allocate(&self, _: &AllocationDescriptor) -> Result<BufferHandle, Error> {
            Err(Error::NotSupported)
        }

        fn read(&self, _: &BufferHandle) -> Result<MappedImage, Error> {
            Err(Error::NotSupported)
        }

        fn write(&self, _: &BufferHandle, _: &MappedImage) -> Result<(), Error> {
            Err(Error::NotSupported)
        }
    }

    #[test]
    fn test_monochrome_tags() {
        let manager =
            ReprocessEffectManager::new(vec![Arc::new(MonochromeEffect::new())], Arc::new(NoMapper))
                .unwrap();
        let ops = VendorTagOps::new(Some(Arc::new(manager)));

        let start = REPROCESS_EFFECT_VENDOR_TAG_START;
        assert_eq!(ops.tag_count(), 2);
        assert_eq!(ops.all_tags(), vec![start, start + 1]);
        assert_eq!(ops.section_name(start).unwrap(), "com.google");
        assert_eq!(ops.tag_name(start).unwrap(), "com.google.effect.monochrome");
        assert_eq!(ops.tag_type(start + 1).unwrap(), EntryType::Byte);
        assert_eq!(ops.tag_type(start + 2).unwrap_err().errno(), -libc::EINVAL);
    }

    #[test]
    fn test_no_effects() {
        let ops = VendorTagOps::default();
        assert_eq!(ops.tag_count(), 0);
        assert!(ops.all_tags().is_empty());
        assert!(ops.section_name(REPROCESS_EFFECT_VENDOR_TAG_START).is_err());
    }
}
