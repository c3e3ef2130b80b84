// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Software reprocessing effects.
//!
//! An effect is requested by setting one of its request vendor tags in the
//! settings of a reprocessing capture request. The device session then runs
//! the effect on the input buffer before, or instead of, the vendor module's
//! own reprocessing pass.
//!
//! Vendor tag numbers are handed out by the [`ReprocessEffectManager`] from
//! [`REPROCESS_EFFECT_VENDOR_TAG_START`] in registration order, first the
//! request tags then the result tags of each effect.

mod monochrome;

pub use monochrome::MonochromeEffect;

use crate::{
    buffer::BufferHandle,
    mapper::{BufferMapper, MappedImage},
    metadata::{
        tags::{REPROCESS_EFFECT_VENDOR_TAG_START, VENDOR_GOOGLE_SECTION_NAME},
        CameraMetadata, EntryType,
    },
    Error,
};
use log::{debug, error};
use std::{collections::BTreeMap, sync::Arc};

/// A vendor tag declared by an effect.
#[derive(Debug, Clone, PartialEq)]
pub struct VendorTagSpec {
    pub name: &'static str,
    pub entry_type: EntryType,
    /// One element of `entry_type` in little-endian form.
    pub default_value: Vec<u8>,
}

/// An assigned vendor tag.
#[derive(Debug, Clone, PartialEq)]
pub struct VendorTag {
    pub tag: u32,
    pub name: String,
    pub entry_type: EntryType,
    pub default_value: Vec<u8>,
}

/// Tag numbers assigned to one effect, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectTags {
    pub request: Vec<u32>,
    pub result: Vec<u32>,
}

pub trait ReprocessEffect: Send + Sync {
    fn name(&self) -> &str;

    fn request_vendor_tags(&self) -> Vec<VendorTagSpec>;

    fn result_vendor_tags(&self) -> Vec<VendorTagSpec> {
        Vec::new()
    }

    /// Transforms `input` into `output`, which has the same size and format.
    fn reprocess(
        &self,
        tags: &EffectTags,
        settings: &CameraMetadata,
        input: &MappedImage,
        output: &mut MappedImage,
        result: &mut CameraMetadata,
    ) -> Result<(), Error>;
}

struct RegisteredEffect {
    effect: Arc<dyn ReprocessEffect>,
    tags: EffectTags,
}

/// Owns the effects and their vendor tags.
pub struct ReprocessEffectManager {
    effects: Vec<RegisteredEffect>,
    vendor_tags: BTreeMap<u32, VendorTag>,
    mapper: Arc<dyn BufferMapper>,
}

impl ReprocessEffectManager {
    pub fn new(
        effects: Vec<Arc<dyn ReprocessEffect>>,
        mapper: Arc<dyn BufferMapper>,
    ) -> Result<Self, Error> {
        let mut next_tag = REPROCESS_EFFECT_VENDOR_TAG_START;
        let mut vendor_tags = BTreeMap::new();
        let mut registered = Vec::with_capacity(effects.len());

        for effect in effects {
            let mut tags = EffectTags::default();
            let request = effect.request_vendor_tags();
            if request.is_empty() {
                return Err(Error::invalid(format!(
                    "effect {} declares no request tag",
                    effect.name()
                )));
            }
            for (spec, is_request) in request
                .into_iter()
                .map(|s| (s, true))
                .chain(effect.result_vendor_tags().into_iter().map(|s| (s, false)))
            {
                if spec.default_value.len() != spec.entry_type.size() {
                    return Err(Error::invalid(format!(
                        "vendor tag {}: default is not one {} element",
                        spec.name, spec.entry_type
                    )));
                }
                let tag = next_tag;
                next_tag += 1;
                vendor_tags.insert(
                    tag,
                    VendorTag {
                        tag,
                        name: spec.name.to_owned(),
                        entry_type: spec.entry_type,
                        default_value: spec.default_value,
                    },
                );
                if is_request {
                    tags.request.push(tag);
                } else {
                    tags.result.push(tag);
                }
            }
            debug!("reprocess effect {} uses tags {:x?}", effect.name(), tags);
            registered.push(RegisteredEffect { effect, tags });
        }

        Ok(ReprocessEffectManager {
            effects: registered,
            vendor_tags,
            mapper,
        })
    }

    pub fn mapper(&self) -> &Arc<dyn BufferMapper> {
        &self.mapper
    }

    /// All assigned vendor tags ordered by tag number.
    pub fn vendor_tags(&self) -> impl Iterator<Item = &VendorTag> {
        self.vendor_tags.values()
    }

    pub fn vendor_tag(&self, tag: u32) -> Option<&VendorTag> {
        self.vendor_tags.get(&tag)
    }

    pub fn section_name(&self, tag: u32) -> Option<&'static str> {
        self.vendor_tags
            .contains_key(&tag)
            .then_some(VENDOR_GOOGLE_SECTION_NAME)
    }

    fn find_effect(&self, settings: &CameraMetadata) -> Option<&RegisteredEffect> {
        self.effects
            .iter()
            .find(|e| e.tags.request.iter().any(|tag| settings.contains(*tag)))
    }

    /// Whether `settings` request any effect.
    pub fn has_reprocess_effect_vendor_tag(&self, settings: &CameraMetadata) -> bool {
        self.find_effect(settings).is_some()
    }

    /// Runs the effect requested by `settings` from `input` into `output`.
    ///
    /// `output` must have the size and format of `input`. Result tags written
    /// by the effect land in `result`.
    pub fn reprocess_request(
        &self,
        settings: &CameraMetadata,
        input: &BufferHandle,
        output: &BufferHandle,
        result: &mut CameraMetadata,
    ) -> Result<(), Error> {
        let registered = self
            .find_effect(settings)
            .ok_or_else(|| Error::invalid("settings request no reprocess effect"))?;

        if input.width() != output.width()
            || input.height() != output.height()
            || input.drm_format() != output.drm_format()
        {
            return Err(Error::invalid(format!(
                "effect output {}x{} {} does not match input {}x{} {}",
                output.width(),
                output.height(),
                output.drm_format(),
                input.width(),
                input.height(),
                input.drm_format()
            )));
        }

        let source = self.mapper.read(input)?;
        let mut target = self.mapper.read(output)?;
        registered
            .effect
            .reprocess(&registered.tags, settings, &source, &mut target, result)
            .map_err(|err| {
                error!(
                    "reprocess effect {} failed: {}",
                    registered.effect.name(),
                    err
                );
                err
            })?;
        self.mapper.write(output, &target)
    }
}
